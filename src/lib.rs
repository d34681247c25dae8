#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![feature(naked_functions)]
#![cfg_attr(test, feature(custom_test_frameworks))]
#![cfg_attr(test, test_runner(crate::test_runner))]
#![cfg_attr(test, reexport_test_harness_entry = "test_main")]

//! A small preemptive kernel core: a boundary-tag heap, an intrusive list,
//! a priority-based thread scheduler, a mutex/condvar pair, a software
//! timer subsystem and IRQ dispatch, all sitting behind a thin x86_64
//! platform port. This file only wires the pieces together and carries the
//! QEMU test harness.

extern crate alloc;

pub mod config;
pub mod error;
pub mod irq;
pub mod list;
pub mod mem;
pub mod memory;
pub mod platform;
pub mod sched;
pub mod serial;
pub mod sync;
pub mod timer;

use core::panic::PanicInfo;

/// Bring every core subsystem up, in the order each one's own invariants
/// require. Does not start the scheduler; the caller runs that last, since
/// `sched::enable_scheduler` never returns.
///
/// # Safety
/// Must run exactly once, early in `kernel_main`, after `memory::init` and
/// `mem::init_heap` have mapped and initialized the heap.
pub fn init() {
    sched::bootstrap();
    sched::init();
    timer::init();
    platform::init(config::TICK_HZ);
}

/// Spin forever with interrupts disabled. Used by the panic handler and any
/// other path that must stop the core without returning.
pub fn hlt_loop() -> ! {
    platform::halt()
}

// --- QEMU integration test harness ---
//
// This crate is `no_std`/`no_main`: there is no host-side `#[test]` support,
// so every test is a `#[test_case]` integration test run inside a booted
// QEMU instance, which exits via the isa-debug-exit device at port 0xf4.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub fn exit_qemu(exit_code: QemuExitCode) {
    use x86_64::instructions::port::Port;
    unsafe {
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
}

pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

pub fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);
    hlt_loop()
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

#[cfg(test)]
bootloader_api::entry_point!(test_kernel_main);

#[cfg(test)]
fn test_kernel_main(_boot_info: &'static mut bootloader_api::BootInfo) -> ! {
    init();
    test_main();
    hlt_loop()
}
