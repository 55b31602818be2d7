//! Software-managed TLB, modeled abstractly (spec §6): the exact MIPS-like bit layout
//! is architecture-defined and out of scope; only probe/write/random-replace matter
//! to the fault handler. A small fixed-size array stands in for the real hardware
//! cache under test.

use crate::addrspace::VirtAddr;
use crate::coremap::PhysAddr;

/// TLB key: `page_va | (asid << 6)` in the real hardware encoding; kept structured
/// here since the exact packing is not this core's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbKey {
    pub page_va: VirtAddr,
    pub asid: u8,
}

/// TLB data: physical frame plus flags. Per spec §4.E the teaching kernel always
/// installs `valid = true, writable = true` regardless of segment permission;
/// enforcement happens once, in the fault filter, not on every access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbData {
    pub frame: PhysAddr,
    pub valid: bool,
    pub writable: bool,
    pub global: bool,
}

const TLB_SLOTS: usize = 64;

/// A fixed-size software TLB. `write_random` evicts an arbitrary slot (here: a simple
/// round-robin counter, consistent with "random replacement" being unspecified but
/// deterministic enough to test); `probe`/`overwrite_in_place` support the READONLY
/// fault path, which must hit an existing entry rather than install a fresh one.
pub struct Tlb {
    slots: [Option<(TlbKey, TlbData)>; TLB_SLOTS],
    next_victim: usize,
}

impl Tlb {
    pub const fn new() -> Self {
        Self { slots: [None; TLB_SLOTS], next_victim: 0 }
    }

    pub fn probe(&self, key: TlbKey) -> Option<usize> {
        self.slots.iter().position(|s| matches!(s, Some((k, _)) if *k == key))
    }

    pub fn write_random(&mut self, key: TlbKey, data: TlbData) {
        if let Some(idx) = self.probe(key) {
            self.slots[idx] = Some((key, data));
            return;
        }
        let idx = self.next_victim;
        self.next_victim = (self.next_victim + 1) % TLB_SLOTS;
        self.slots[idx] = Some((key, data));
    }

    /// Overwrites the entry at an already-probed slot (READONLY fault path).
    pub fn overwrite_in_place(&mut self, idx: usize, key: TlbKey, data: TlbData) {
        self.slots[idx] = Some((key, data));
    }

    pub fn lookup(&self, key: TlbKey) -> Option<TlbData> {
        self.probe(key).map(|idx| self.slots[idx].unwrap().1)
    }

    /// Invalidates every entry; called from `AddressSpace::activate` on context switch.
    pub fn invalidate_all(&mut self) {
        self.slots = [None; TLB_SLOTS];
    }
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}
