//! Per-process virtual address space (component D): segments, lazily-populated page
//! table, stack/heap bounds. Grounded on `kern/vm/addrspace.c`.

use std::collections::HashMap;

use crate::coremap::{CoreMap, PhysAddr};
use crate::param::PAGE_SIZE;
use crate::spinlock::SpinLock;

/// User virtual address, page-aligned when it denotes a page boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    pub fn page_round_down(self) -> VirtAddr {
        VirtAddr(self.0 & !(PAGE_SIZE - 1))
    }

    pub fn page_round_up(self) -> VirtAddr {
        VirtAddr((self.0 + PAGE_SIZE - 1) & !(PAGE_SIZE - 1))
    }
}

/// A named contiguous virtual-address range with uniform permissions.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub start: VirtAddr,
    pub end: VirtAddr,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    /// Writability saved across `prepare_load`/`complete_load`; `None` outside that
    /// bracket (the source's sentinel "not currently overridden" state).
    pub originally_writable: Option<bool>,
}

impl Segment {
    fn empty_heap() -> Self {
        Self {
            start: VirtAddr(0),
            end: VirtAddr(0),
            readable: true,
            writable: true,
            executable: false,
            originally_writable: None,
        }
    }
}

/// Segment index reserved for the heap; always slot 0 per spec §3.
pub const HEAP_SEGMENT: usize = 0;

struct Layout {
    segments: Vec<Segment>,
    stack_base: VirtAddr,
    stack_top: VirtAddr,
}

/// Per-process virtual memory description.
pub struct AddressSpace {
    layout: SpinLock<Layout>,
    ptes: SpinLock<HashMap<VirtAddr, PhysAddr>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrSpaceError {
    OutOfMemory,
}

impl AddressSpace {
    /// Creates an empty address space: heap preallocated at slot 0 (start == end == 0),
    /// stack bounds both at `userstack`.
    pub fn create(userstack: VirtAddr) -> Self {
        Self {
            layout: SpinLock::new(
                Layout { segments: vec![Segment::empty_heap()], stack_base: userstack, stack_top: userstack },
                "as-segments",
            ),
            ptes: SpinLock::new(HashMap::new(), "as-ptes"),
        }
    }

    /// Rounds `va` down and `va + sz` up to page boundaries and appends a new
    /// non-heap segment with the given permissions.
    pub fn define_region(&self, va: VirtAddr, sz: usize, r: bool, w: bool, x: bool) {
        let start = va.page_round_down();
        let end = VirtAddr(va.0 + sz).page_round_up();
        let mut layout = self.layout.lock();
        layout.segments.push(Segment {
            start,
            end,
            readable: r,
            writable: w,
            executable: x,
            originally_writable: None,
        });
    }

    /// Brackets loader writes: every executable segment is temporarily forced
    /// writable, and the heap is positioned just above the highest non-heap segment.
    pub fn prepare_load(&self) {
        let mut layout = self.layout.lock();
        let mut heap_start = VirtAddr(0);
        for (i, seg) in layout.segments.iter_mut().enumerate() {
            if i == HEAP_SEGMENT {
                continue;
            }
            if seg.executable && !seg.writable {
                seg.originally_writable = Some(false);
                seg.writable = true;
            }
            if seg.end > heap_start {
                heap_start = seg.end;
            }
        }
        layout.segments[HEAP_SEGMENT].start = heap_start;
        layout.segments[HEAP_SEGMENT].end = heap_start;
    }

    /// Restores writability saved by `prepare_load`.
    pub fn complete_load(&self) {
        let mut layout = self.layout.lock();
        for (i, seg) in layout.segments.iter_mut().enumerate() {
            if i == HEAP_SEGMENT {
                continue;
            }
            if let Some(original) = seg.originally_writable.take() {
                seg.writable = original;
            }
        }
    }

    /// Returns the initial user stack pointer.
    pub fn define_stack(&self) -> VirtAddr {
        self.layout.lock().stack_top
    }

    pub fn heap_end(&self) -> VirtAddr {
        self.layout.lock().segments[HEAP_SEGMENT].end
    }

    pub fn heap_start(&self) -> VirtAddr {
        self.layout.lock().segments[HEAP_SEGMENT].start
    }

    pub fn stack_top(&self) -> VirtAddr {
        self.layout.lock().stack_top
    }

    /// `sbrk`: see spec §4.G. `amount` must already be page-aligned (checked by the
    /// syscall layer in `proc.rs`); this just applies the bounds check and mutation.
    pub fn adjust_heap(&self, amount: isize) -> Option<VirtAddr> {
        let mut layout = self.layout.lock();
        let heap = &mut layout.segments[HEAP_SEGMENT];
        let old_end = heap.end.0 as isize;
        let new_end = old_end + amount;
        if new_end < 0 {
            return None;
        }
        let new_end = new_end as usize;
        if new_end < heap.start.0 {
            return None;
        }
        if new_end >= layout.stack_top.0 {
            return None;
        }
        let previous = heap.end;
        heap.end = VirtAddr(new_end);
        Some(previous)
    }

    /// Grows the stack down by one page; caller has already verified room exists.
    pub fn grow_stack_one_page(&self) {
        let mut layout = self.layout.lock();
        layout.stack_top = VirtAddr(layout.stack_top.0 - PAGE_SIZE);
    }

    /// Looks up which segment (if any) contains `page_va`, returning its read/write/
    /// exec flags. Used by the fault handler (component E).
    pub fn segment_containing(&self, page_va: VirtAddr) -> Option<(bool, bool, bool)> {
        let layout = self.layout.lock();
        layout
            .segments
            .iter()
            .find(|s| page_va >= s.start && page_va < s.end)
            .map(|s| (s.readable, s.writable, s.executable))
    }

    pub fn in_stack_region(&self, page_va: VirtAddr) -> bool {
        let layout = self.layout.lock();
        page_va >= layout.stack_top && page_va < layout.stack_base
    }

    /// Whether growing the stack down by one page would collide with the heap.
    /// Strict: growing to exactly `heap.end` is still a collision, matching
    /// `generic_vm.c`'s `heap_top >= as_stack_top - PAGE_SIZE` check.
    pub fn can_grow_stack(&self) -> bool {
        let layout = self.layout.lock();
        let heap_end = layout.segments[HEAP_SEGMENT].end;
        heap_end.0 + PAGE_SIZE < layout.stack_top.0
    }

    pub fn lookup_pte(&self, page_va: VirtAddr) -> Option<PhysAddr> {
        self.ptes.lock().get(&page_va).copied()
    }

    /// Allocates one frame from `coremap` and records the mapping. Used by the fault
    /// handler when a page is touched for the first time.
    pub fn create_pte(&self, coremap: &CoreMap, page_va: VirtAddr) -> Result<PhysAddr, AddrSpaceError> {
        let pa = coremap.alloc(1).ok_or(AddrSpaceError::OutOfMemory)?;
        self.ptes.lock().insert(page_va, pa);
        Ok(pa)
    }

    /// Deep-copies this address space: segments and heap/stack bounds are cloned
    /// verbatim, and every mapped page is copied into a freshly allocated frame in
    /// the new address space. The caller provides `copy_page`, the kernel-window
    /// memcpy primitive (an external collaborator in this hosted model).
    pub fn copy(
        &self,
        coremap: &CoreMap,
        copy_page: impl Fn(PhysAddr, PhysAddr),
    ) -> Result<AddressSpace, AddrSpaceError> {
        let src_layout = self.layout.lock();
        let new_layout = Layout {
            segments: src_layout.segments.clone(),
            stack_base: src_layout.stack_base,
            stack_top: src_layout.stack_top,
        };
        // Segment lock may be dropped before the (potentially slow) page-copy loop;
        // the page-table lock below is still held for the duration of that loop.
        drop(src_layout);

        let src_ptes = self.ptes.lock();
        let mut new_ptes = HashMap::with_capacity(src_ptes.len());
        for (&vpn, &old_pa) in src_ptes.iter() {
            let new_pa = match coremap.alloc(1) {
                Some(pa) => pa,
                None => {
                    for pa in new_ptes.values() {
                        coremap.free_page(*pa);
                    }
                    return Err(AddrSpaceError::OutOfMemory);
                }
            };
            copy_page(old_pa, new_pa);
            new_ptes.insert(vpn, new_pa);
        }

        Ok(AddressSpace {
            layout: SpinLock::new(new_layout, "as-segments"),
            ptes: SpinLock::new(new_ptes, "as-ptes"),
        })
    }

    /// Frees every mapped frame back to `coremap`, then drops all segments. Takes
    /// `&self` rather than consuming the address space: callers typically reach it
    /// through a shared `Arc<Process>`, so "free the struct" (per spec §4.D) means
    /// emptying its collections here and letting the final `Arc` drop reclaim the
    /// struct itself, rather than this function taking ownership.
    pub fn destroy(&self, coremap: &CoreMap) {
        let mut ptes = self.ptes.lock();
        for (_, pa) in ptes.drain() {
            coremap.free_page(pa);
        }
        drop(ptes);
        self.layout.lock().segments.clear();
    }

    pub fn pte_count(&self) -> usize {
        self.ptes.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERSTACK: VirtAddr = VirtAddr(0x8000_0000);

    #[test]
    fn heap_never_exceeds_stack_top() {
        let asp = AddressSpace::create(USERSTACK);
        assert!(asp.heap_end().0 <= asp.stack_top().0);
        asp.define_region(VirtAddr(0x400000), PAGE_SIZE, true, false, true);
        asp.prepare_load();
        asp.complete_load();
        assert!(asp.heap_end().0 <= asp.stack_top().0);
    }

    #[test]
    fn sbrk_round_trip() {
        let asp = AddressSpace::create(USERSTACK);
        asp.define_region(VirtAddr(0x400000), PAGE_SIZE, true, false, true);
        asp.prepare_load();
        asp.complete_load();

        let before = asp.heap_end();
        let grown = asp.adjust_heap(PAGE_SIZE as isize).unwrap();
        assert_eq!(grown, before);
        assert_eq!(asp.heap_end().0, before.0 + PAGE_SIZE);

        asp.adjust_heap(-(PAGE_SIZE as isize)).unwrap();
        assert_eq!(asp.heap_end(), before);
    }

    #[test]
    fn sbrk_zero_is_noop() {
        let asp = AddressSpace::create(USERSTACK);
        let before = asp.heap_end();
        let ret = asp.adjust_heap(0).unwrap();
        assert_eq!(ret, before);
        assert_eq!(asp.heap_end(), before);
    }

    #[test]
    fn sbrk_rejects_stack_collision() {
        let asp = AddressSpace::create(VirtAddr(PAGE_SIZE * 4));
        // heap starts at 0; growing to exactly stack_top must be rejected.
        let amount = (PAGE_SIZE * 4) as isize;
        assert!(asp.adjust_heap(amount).is_none());
        assert!(asp.adjust_heap(amount - PAGE_SIZE as isize).is_some());
    }

    #[test]
    fn copy_produces_disjoint_frame_set() {
        let coremap = CoreMap::new(PhysAddr(0), 16);
        let asp = AddressSpace::create(USERSTACK);
        let pa = asp.create_pte(&coremap, VirtAddr(0x400000)).unwrap();
        assert_eq!(asp.pte_count(), 1);

        let clone = asp.copy(&coremap, |_from, _to| {}).unwrap();
        assert_eq!(clone.pte_count(), 1);
        let cloned_pa = clone.lookup_pte(VirtAddr(0x400000)).unwrap();
        assert_ne!(cloned_pa, pa);

        // destroying the clone must not free the original's frame.
        clone.destroy(&coremap);
        assert_eq!(asp.lookup_pte(VirtAddr(0x400000)), Some(pa));
        asp.destroy(&coremap);
    }
}
