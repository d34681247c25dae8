/// Integration test: `sync::Mutex` mutual exclusion and `sync::Condvar`
/// wait/signal across spawned threads.
#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(corekernel::test_runner)]
#![reexport_test_harness_entry = "test_main"]

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicUsize, Ordering};

use corekernel::config;
use corekernel::sched;
use corekernel::sync::{Condvar, Mutex};

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

    sched::spawn(
        "test-main",
        run_tests,
        0,
        config::MAX_PRIORITY,
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

struct Counter {
    value: Mutex<u64>,
}

#[test_case]
fn test_mutex_serializes_concurrent_increments() {
    static FINISHED: AtomicUsize = AtomicUsize::new(0);

    // Lives on this function's stack for the whole test, so the address
    // handed to the worker threads below stays valid and never moves —
    // required since the mutex's waiter list self-links against it.
    let counter = Counter {
        value: Mutex::new(0u64),
    };
    let counter_ptr = &counter as *const Counter as usize;

    extern "C" fn worker(arg: usize) {
        let counter = unsafe { &*(arg as *const Counter) };
        for _ in 0..1000 {
            let mut guard = counter.value.lock();
            *guard += 1;
        }
        FINISHED.fetch_add(1, Ordering::SeqCst);
    }

    const N: usize = 4;
    let mut handles: [Option<sched::JoinHandle>; N] = [None, None, None, None];
    for h in handles.iter_mut() {
        *h = Some(
            sched::spawn(
                "incrementer",
                worker,
                counter_ptr,
                config::MIN_PRIORITY,
                config::THREAD_STACK_MIN_SIZE,
            )
            .expect("spawn failed"),
        );
    }
    for h in handles {
        sched::join(h.unwrap());
    }

    assert_eq!(FINISHED.load(Ordering::SeqCst), N);
    assert_eq!(*counter.value.lock(), (N * 1000) as u64);
}

#[test_case]
fn test_try_lock_fails_while_held() {
    let counter = Counter {
        value: Mutex::new(0u64),
    };

    let guard = counter.value.lock();
    assert!(counter.value.try_lock().is_none());
    drop(guard);
    assert!(counter.value.try_lock().is_some());
}

struct Rendezvous {
    ready: Mutex<bool>,
    condvar: Condvar,
}

#[test_case]
fn test_condvar_wakes_waiter_on_signal() {
    static OBSERVED: AtomicUsize = AtomicUsize::new(0);

    let rendez = Rendezvous {
        ready: Mutex::new(false),
        condvar: Condvar::new(),
    };
    let rendez_ptr = &rendez as *const Rendezvous as usize;

    extern "C" fn waiter(arg: usize) {
        let rendez = unsafe { &*(arg as *const Rendezvous) };
        let mut ready = rendez.ready.lock();
        while !*ready {
            ready = rendez.condvar.wait(ready);
        }
        OBSERVED.store(1, Ordering::SeqCst);
    }
    extern "C" fn signaler(arg: usize) {
        let rendez = unsafe { &*(arg as *const Rendezvous) };
        let mut ready = rendez.ready.lock();
        *ready = true;
        drop(ready);
        rendez.condvar.signal();
    }

    let w = sched::spawn(
        "waiter",
        waiter,
        rendez_ptr,
        config::MIN_PRIORITY,
        config::THREAD_STACK_MIN_SIZE,
    )
    .unwrap();
    let s = sched::spawn(
        "signaler",
        signaler,
        rendez_ptr,
        config::MIN_PRIORITY + 1,
        config::THREAD_STACK_MIN_SIZE,
    )
    .unwrap();

    sched::join(w);
    sched::join(s);

    assert_eq!(OBSERVED.load(Ordering::SeqCst), 1);
}

#[test_case]
fn test_condvar_broadcast_wakes_all_waiters() {
    static WOKEN: AtomicUsize = AtomicUsize::new(0);

    let rendez = Rendezvous {
        ready: Mutex::new(false),
        condvar: Condvar::new(),
    };
    let rendez_ptr = &rendez as *const Rendezvous as usize;

    extern "C" fn waiter(arg: usize) {
        let rendez = unsafe { &*(arg as *const Rendezvous) };
        let mut ready = rendez.ready.lock();
        while !*ready {
            ready = rendez.condvar.wait(ready);
        }
        WOKEN.fetch_add(1, Ordering::SeqCst);
    }
    extern "C" fn broadcaster(arg: usize) {
        let rendez = unsafe { &*(arg as *const Rendezvous) };
        let mut ready = rendez.ready.lock();
        *ready = true;
        drop(ready);
        rendez.condvar.broadcast();
    }

    const N: usize = 3;
    let mut waiters: [Option<sched::JoinHandle>; N] = [None, None, None];
    for h in waiters.iter_mut() {
        *h = Some(
            sched::spawn(
                "waiter",
                waiter,
                rendez_ptr,
                config::MIN_PRIORITY,
                config::THREAD_STACK_MIN_SIZE,
            )
            .unwrap(),
        );
    }
    let b = sched::spawn(
        "broadcaster",
        broadcaster,
        rendez_ptr,
        config::MIN_PRIORITY + 1,
        config::THREAD_STACK_MIN_SIZE,
    )
    .unwrap();

    for h in waiters {
        sched::join(h.unwrap());
    }
    sched::join(b);

    assert_eq!(WOKEN.load(Ordering::SeqCst), N);
}
