/// The platform port: every place the core (`mem`, `list`, `sched`, `sync`,
/// `timer`, `irq`) touches hardware goes through here instead. Nothing
/// outside this module and its `x86` backend does inline assembly, reads or
/// writes an I/O port, or knows the IDT/GDT/PIC exist.
///
/// Swapping targets (a different interrupt controller, SMP, a simulator for
/// host-side testing) means writing a new backend behind this same surface;
/// today there is exactly one, `x86`.
pub mod x86;

pub use x86::{
    context_load, context_switch, halt, idle, init, init_gdt, intr_enable, intr_enabled,
    intr_restore, intr_save, irq_disable, irq_enable, irq_eoi, irq_register, stack_forge,
    tick_count, tick_frequency_hz, DOUBLE_FAULT_IST_INDEX, IntrState,
};
