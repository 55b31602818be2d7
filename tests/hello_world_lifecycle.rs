//! Scenario 1 from spec §8: one code segment, one data segment, a `write` to
//! stdout, then `_exit`. Verifies the three frames that get faulted in (code,
//! data, one lazily-grown stack page) are all reclaimed once the parent reaps
//! the child, and that the child's PID returns to the pool.

use corevm::addrspace::VirtAddr;
use corevm::fault::{handle_fault, FaultKind};
use corevm::param::PAGE_SIZE;
use corevm::proc::mkwait_exit;
use corevm::tlb::Tlb;
use corevm::Kernel;

#[test]
fn hello_world_lifecycle_allocates_and_frees_three_frames() {
    let _ = env_logger::try_init();

    let kernel = Kernel::bootstrap(64);
    let init = kernel.create_run_program("init", None).unwrap();

    let child_pid = kernel.fork(&init).unwrap();
    let child = kernel.process(child_pid).unwrap();

    child.address_space.define_region(VirtAddr(0x400000), PAGE_SIZE, true, false, true);
    child.address_space.define_region(VirtAddr(0x500000), PAGE_SIZE, true, true, false);
    child.address_space.prepare_load();
    child.address_space.complete_load();

    let mut tlb = Tlb::new();
    handle_fault(&child.address_space, &kernel.coremap, &mut tlb, 0, FaultKind::Read, VirtAddr(0x400000)).unwrap();
    handle_fault(&child.address_space, &kernel.coremap, &mut tlb, 0, FaultKind::Write, VirtAddr(0x500000)).unwrap();

    let stack_page = VirtAddr(child.address_space.stack_top().0 - PAGE_SIZE);
    handle_fault(&child.address_space, &kernel.coremap, &mut tlb, 0, FaultKind::Write, stack_page).unwrap();
    assert_eq!(child.address_space.pte_count(), 3);

    let n = kernel.write(&child, 1, b"hi\n").unwrap();
    assert_eq!(n, 3);

    kernel.exit(&child, 0);
    let (pid, status) = kernel.waitpid(&init, child_pid, 0).unwrap();
    assert_eq!(pid, child_pid);
    assert_eq!(status, mkwait_exit(0));

    assert!(kernel.process(child_pid).is_none(), "pid must be returned to the pool");

    // All 64 frames are free again: the 3 the child faulted in were reclaimed
    // by `destroy_process` when the parent reaped it.
    let reclaimed = kernel.coremap.alloc(64);
    assert!(reclaimed.is_some(), "all frames must be reclaimed after reaping");
    kernel.coremap.free_run(reclaimed.unwrap());
}
