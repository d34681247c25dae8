/// Integration test: verify the kernel boots and serial logging works.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(corekernel::test_runner)]
#![reexport_test_harness_entry = "test_main"]

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;
use corekernel::serial_println;

entry_point!(main);

fn main(_boot_info: &'static mut BootInfo) -> ! {
    corekernel::serial::init();
    test_main();
    corekernel::hlt_loop();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    corekernel::test_panic_handler(info)
}

#[test_case]
fn test_serial_println_simple() {
    serial_println!("test_serial_println_simple output");
}

#[test_case]
fn test_serial_println_many() {
    for _ in 0..200 {
        serial_println!("test_serial_println_many output");
    }
}
