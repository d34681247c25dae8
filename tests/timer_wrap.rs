/// Integration test: tick-wraparound comparisons and end-to-end timer
/// scheduling through the dedicated worker thread.
#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(corekernel::test_runner)]
#![reexport_test_harness_entry = "test_main"]

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use corekernel::config;
use corekernel::sched;
use corekernel::timer::{self, Timer};

entry_point!(main);

fn main(boot_info: &'static mut BootInfo) -> ! {
    corekernel::serial::init();

    let phys_mem_offset = x86_64::VirtAddr::new(
        boot_info
            .physical_memory_offset
            .into_option()
            .expect("physical_memory_offset not available"),
    );
    let mut mapper = unsafe { corekernel::memory::init(phys_mem_offset) };
    let mut frame_allocator =
        unsafe { corekernel::memory::BootInfoFrameAllocator::init(&boot_info.memory_regions) };
    corekernel::mem::init_heap(&mut mapper, &mut frame_allocator)
        .expect("heap initialization failed");

    corekernel::init();

    // Below the timer worker's own priority, so the busy-wait loops in the
    // tests below actually get preempted by the worker when it wakes,
    // rather than starving it by sitting at the top priority forever.
    sched::spawn(
        "test-main",
        run_tests,
        0,
        config::TIMER_PRIORITY - 1,
        config::DEFAULT_STACK_SIZE,
    )
    .expect("failed to spawn test thread");

    sched::enable_scheduler();
}

extern "C" fn run_tests(_arg: usize) {
    test_main();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    corekernel::test_panic_handler(info)
}

#[test_case]
fn test_modular_comparisons_handle_wraparound() {
    assert!(!timer::expired(10, 10));
    assert!(timer::occurred(10, 10));
    assert!(timer::expired(11, 10));
    assert!(!timer::expired(10, 11));

    // A tick count just past the wrap has "expired" relative to a
    // reference point from just before it.
    let ref_point = u32::MAX - 1;
    let after_wrap = 1u32;
    assert!(timer::expired(after_wrap, ref_point));
    assert!(!timer::expired(ref_point, after_wrap));
}

#[test_case]
fn test_scheduled_timer_fires_once() {
    static FIRED: AtomicBool = AtomicBool::new(false);
    static FIRE_COUNT: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn callback(_arg: usize) {
        FIRE_COUNT.fetch_add(1, Ordering::SeqCst);
        FIRED.store(true, Ordering::SeqCst);
    }

    let mut t = Timer::new(callback, 0);
    let deadline = timer::now().wrapping_add(2);
    unsafe { timer::schedule(NonNull::from(&mut t), deadline) };

    for _ in 0..1_000_000 {
        if FIRED.load(Ordering::SeqCst) {
            break;
        }
        sched::yield_now();
    }

    assert!(FIRED.load(Ordering::SeqCst));
    assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
    assert!(timer::occurred(timer::now(), t.deadline()));
}

#[test_case]
fn test_timers_fire_in_deadline_order() {
    static ORDER: [AtomicUsize; 2] = [AtomicUsize::new(0), AtomicUsize::new(0)];
    static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn mark_first(_arg: usize) {
        let slot = NEXT_SLOT.fetch_add(1, Ordering::SeqCst);
        ORDER[slot].store(1, Ordering::SeqCst);
    }
    extern "C" fn mark_second(_arg: usize) {
        let slot = NEXT_SLOT.fetch_add(1, Ordering::SeqCst);
        ORDER[slot].store(2, Ordering::SeqCst);
    }

    let mut later = Timer::new(mark_second, 0);
    let mut sooner = Timer::new(mark_first, 0);

    let now = timer::now();
    unsafe { timer::schedule(NonNull::from(&mut later), now.wrapping_add(6)) };
    unsafe { timer::schedule(NonNull::from(&mut sooner), now.wrapping_add(3)) };

    for _ in 0..2_000_000 {
        if NEXT_SLOT.load(Ordering::SeqCst) >= 2 {
            break;
        }
        sched::yield_now();
    }

    assert_eq!(NEXT_SLOT.load(Ordering::SeqCst), 2);
    assert_eq!(ORDER[0].load(Ordering::SeqCst), 1);
    assert_eq!(ORDER[1].load(Ordering::SeqCst), 2);
}
