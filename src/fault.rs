//! TLB-miss fault handler (component E). Grounded on `vm_fault`/`vm_fault_helper` in
//! `generic_vm.c`, with the segment-lock asymmetry noted in spec §9 fixed: the
//! source takes the segment spinlock in `check_writable_segment` but not in
//! `check_readable_segment`; here both paths go through `AddressSpace::segment_containing`,
//! which always locks.

use crate::addrspace::{AddressSpace, VirtAddr};
use crate::coremap::CoreMap;
use crate::error::SysError;
use crate::tlb::{Tlb, TlbData, TlbKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Read,
    Write,
    /// Hardware reports a write to a mapping installed read-only in the TLB even
    /// though the segment permits writing (the TLB always marks entries writable
    /// per spec §4.E, so this case arises only from a stale/evicted-then-reinstalled
    /// entry; handled the same as Write except the TLB slot is overwritten in place).
    ReadOnly,
}

/// Runs the fault handler for `fault_va` against `asp`, allocating a frame from
/// `coremap` and installing a translation in `tlb` as needed. `asid` identifies the
/// faulting process in the TLB key.
pub fn handle_fault(
    asp: &AddressSpace,
    coremap: &CoreMap,
    tlb: &mut Tlb,
    asid: u8,
    kind: FaultKind,
    fault_va: VirtAddr,
) -> Result<(), SysError> {
    let page_va = fault_va.page_round_down();

    if let Some((readable, writable, _executable)) = asp.segment_containing(page_va) {
        match kind {
            FaultKind::Read => {
                if !readable {
                    return Err(SysError::Fault);
                }
            }
            FaultKind::Write | FaultKind::ReadOnly => {
                if !writable {
                    return Err(SysError::Fault);
                }
            }
        }
    } else if asp.in_stack_region(page_va) {
        // within the committed stack range, nothing further to validate
    } else if page_va < asp.stack_top() {
        if asp.can_grow_stack() {
            asp.grow_stack_one_page();
        } else {
            return Err(SysError::Fault);
        }
    } else {
        return Err(SysError::Fault);
    }

    let frame = match asp.lookup_pte(page_va) {
        Some(pa) => pa,
        None => asp.create_pte(coremap, page_va).map_err(|_| SysError::OutOfMemory)?,
    };

    let key = TlbKey { page_va, asid };
    // Flags mark the mapping valid and writable unconditionally: permission is
    // enforced only by the segment/stack check above, never by the TLB itself.
    let data = TlbData { frame, valid: true, writable: true, global: false };

    match kind {
        FaultKind::Read | FaultKind::Write => tlb.write_random(key, data),
        FaultKind::ReadOnly => match tlb.probe(key) {
            Some(idx) => tlb.overwrite_in_place(idx, key, data),
            None => tlb.write_random(key, data),
        },
    }

    Ok(())
}
