#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]

use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;

#[allow(deprecated)]
pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    config.kernel_stack_size = 512 * 1024; // 512 KiB (default 80 KiB is too small)
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    corekernel::serial::init();
    corekernel::serial_println!("Serial initialized");

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
    corekernel::serial_println!("Heap initialized");

    corekernel::init();
    corekernel::serial_println!("Scheduler, timer, and platform initialized");

    corekernel::sched::enable_scheduler();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    corekernel::serial_println!("{}", info);
    corekernel::hlt_loop()
}
