/// x86_64 platform backend: GDT/TSS, IDT, the 8259 PICs, the 8254 PIT, and
/// the raw context-switch assembly. GDT/TSS/IDT/PIC setup keeps the shape of
/// a typical `gdt.rs`/`interrupts.rs` split, minus the keyboard/VGA/
/// framebuffer wiring those usually also carry (out of scope here). Context
/// switches happen only at ordinary call boundaries, including the one the
/// timer interrupt can trigger indirectly (see `timer_interrupt_handler`
/// below) — not inside a full register-save ISR trampoline.
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use pic8259::ChainedPics;
use spin::{Mutex, Once};
use x86_64::instructions::port::Port;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

use crate::error::{KernelError, KernelResult};

// --- GDT / TSS ---

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;
const STACK_SIZE: usize = 4096 * 5;

#[repr(align(16))]
struct Stack(#[allow(dead_code)] [u8; STACK_SIZE]);

static mut DOUBLE_FAULT_STACK: Stack = Stack([0; STACK_SIZE]);

static TSS: Once<TaskStateSegment> = Once::new();
static GDT: Once<(GlobalDescriptorTable, Selectors)> = Once::new();

struct Selectors {
    code_selector: SegmentSelector,
    tss_selector: SegmentSelector,
}

/// Exposed separately from `init` for the `stack_overflow` integration test,
/// which needs the TSS's IST loaded but installs its own minimal IDT rather
/// than the kernel's full one.
pub fn init_gdt() {
    let tss = TSS.call_once(|| {
        let mut tss = TaskStateSegment::new();
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
            let stack_start = VirtAddr::from_ptr(&raw const DOUBLE_FAULT_STACK);
            stack_start + STACK_SIZE as u64
        };
        tss
    });

    let (gdt, selectors) = GDT.call_once(|| {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment());
        let tss_selector = gdt.append(Descriptor::tss_segment(tss));
        (
            gdt,
            Selectors {
                code_selector,
                tss_selector,
            },
        )
    });

    gdt.load();

    unsafe {
        use x86_64::instructions::segmentation::{Segment, CS};
        use x86_64::instructions::tables::load_tss;
        CS::set_reg(selectors.code_selector);
        load_tss(selectors.tss_selector);
    }
}

// --- IDT / PIC ---

const PIC_1_OFFSET: u8 = 32;
const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;
const NR_IRQ_LINES: usize = 16;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

static IDT: Once<InterruptDescriptorTable> = Once::new();

/// One slot per ISA IRQ line (0..16). The generic vector stubs below look a
/// handler up here and call it; `irq::register` is the typed kernel-facing
/// entry point that fills a slot.
static IRQ_HANDLERS: [Mutex<Option<fn(u8)>>; NR_IRQ_LINES] =
    [const { Mutex::new(None) }; NR_IRQ_LINES];

fn init_idt() {
    let idt = IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(DOUBLE_FAULT_IST_INDEX);
        }
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt[PIC_1_OFFSET].set_handler_fn(timer_interrupt_handler);
        idt[PIC_1_OFFSET + 1].set_handler_fn(irq_stub_1);
        idt[PIC_1_OFFSET + 2].set_handler_fn(irq_stub_2);
        idt[PIC_1_OFFSET + 3].set_handler_fn(irq_stub_3);
        idt[PIC_1_OFFSET + 4].set_handler_fn(irq_stub_4);
        idt[PIC_1_OFFSET + 5].set_handler_fn(irq_stub_5);
        idt[PIC_1_OFFSET + 6].set_handler_fn(irq_stub_6);
        idt[PIC_1_OFFSET + 7].set_handler_fn(irq_stub_7);
        idt[PIC_1_OFFSET + 8].set_handler_fn(irq_stub_8);
        idt[PIC_1_OFFSET + 9].set_handler_fn(irq_stub_9);
        idt[PIC_1_OFFSET + 10].set_handler_fn(irq_stub_10);
        idt[PIC_1_OFFSET + 11].set_handler_fn(irq_stub_11);
        idt[PIC_1_OFFSET + 12].set_handler_fn(irq_stub_12);
        idt[PIC_1_OFFSET + 13].set_handler_fn(irq_stub_13);
        idt[PIC_1_OFFSET + 14].set_handler_fn(irq_stub_14);
        idt[PIC_1_OFFSET + 15].set_handler_fn(irq_stub_15);
        idt
    });
    idt.load();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    crate::serial_println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: x86_64::structures::idt::PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;
    panic!(
        "EXCEPTION: PAGE FAULT at {:?} ({:?})\n{:#?}",
        Cr2::read(),
        error_code,
        stack_frame
    );
}

/// The tick handler is a plain `extern "x86-interrupt"` function like the
/// exception handlers above, not a hand-rolled asm stub: each kernel thread
/// has only one stack, shared between normal execution and any interrupt
/// that preempts it, so a context switch performed from inside this
/// handler (via `sched::on_tick` -> `timer::on_tick` -> `sched::wakeup`)
/// just leaves this call frame dormant until the thread is switched back
/// to, at which point it returns here and the compiler-generated epilogue
/// does the `iretq`.
extern "x86-interrupt" fn timer_interrupt_handler(_frame: InterruptStackFrame) {
    note_tick();
    irq_eoi(0);
    crate::sched::on_tick(tick_count() as u32);
    // A tick can have just woken a higher-priority thread (typically the
    // timer worker); check before returning to whatever this interrupted,
    // or preemption only ever happens when that thread next calls into the
    // scheduler on its own.
    crate::sched::yield_if_needed();
}

fn dispatch_irq(line: u8) {
    if let Some(handler) = *IRQ_HANDLERS[line as usize].lock() {
        handler(line);
    }
    irq_eoi(line);
    crate::sched::yield_if_needed();
}

macro_rules! irq_stub {
    ($name:ident, $line:expr) => {
        extern "x86-interrupt" fn $name(_frame: InterruptStackFrame) {
            dispatch_irq($line);
        }
    };
}

irq_stub!(irq_stub_1, 1);
irq_stub!(irq_stub_2, 2);
irq_stub!(irq_stub_3, 3);
irq_stub!(irq_stub_4, 4);
irq_stub!(irq_stub_5, 5);
irq_stub!(irq_stub_6, 6);
irq_stub!(irq_stub_7, 7);
irq_stub!(irq_stub_8, 8);
irq_stub!(irq_stub_9, 9);
irq_stub!(irq_stub_10, 10);
irq_stub!(irq_stub_11, 11);
irq_stub!(irq_stub_12, 12);
irq_stub!(irq_stub_13, 13);
irq_stub!(irq_stub_14, 14);
irq_stub!(irq_stub_15, 15);

const PIT_OSCILLATOR_HZ: u32 = 1_193_182;
const PIT_COMMAND_PORT: u16 = 0x43;
const PIT_CHANNEL0_PORT: u16 = 0x40;

fn init_pit(hz: u32) {
    let divisor: u16 = (PIT_OSCILLATOR_HZ / hz) as u16;
    unsafe {
        Port::new(PIT_COMMAND_PORT).write(0x36u8);
        Port::new(PIT_CHANNEL0_PORT).write((divisor & 0xFF) as u8);
        Port::new(PIT_CHANNEL0_PORT).write((divisor >> 8) as u8);
    }
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Bring the platform up: GDT/TSS, IDT, remap and unmask the PICs, program
/// the PIT at `tick_hz`. Must run once, before interrupts are enabled.
pub fn init(tick_hz: u32) {
    init_gdt();
    init_idt();
    unsafe { PICS.lock().initialize() };
    init_pit(tick_hz);
    // Every ISA IRQ line starts masked after a PIC remap; line 0 (the timer
    // tick) is the one line this platform unmasks unconditionally, since
    // nothing works without it. Every other line is opt-in via `irq::enable`.
    irq_enable(0);
    INITIALIZED.store(true, Ordering::Release);
}

pub fn tick_frequency_hz() -> u32 {
    crate::config::TICK_HZ
}

// --- Interrupt masking (the scheduler lock's hardware half) ---

/// Saved interrupt-enable state, returned by `intr_save` and consumed by
/// `intr_restore`. Opaque to callers by convention, though it is just the
/// previous value of EFLAGS.IF.
#[derive(Clone, Copy)]
pub struct IntrState(bool);

/// Disable interrupts, returning the previous enabled/disabled state.
pub fn intr_save() -> IntrState {
    let was_enabled = x86_64::instructions::interrupts::are_enabled();
    x86_64::instructions::interrupts::disable();
    IntrState(was_enabled)
}

/// Restore the interrupt state returned by a matching `intr_save`.
pub fn intr_restore(state: IntrState) {
    if state.0 {
        x86_64::instructions::interrupts::enable();
    }
}

pub fn intr_enabled() -> bool {
    x86_64::instructions::interrupts::are_enabled()
}

/// Unconditionally enable interrupts. Used once, by a new thread's own
/// trampoline, to match the forged state `stack_forge` leaves interrupts
/// in (masked, as they always are on a timer-interrupt-forged stack).
pub fn intr_enable() {
    x86_64::instructions::interrupts::enable();
}

/// Halt until the next interrupt, with interrupts enabled. Used by the idle
/// thread's run loop, once per iteration.
pub fn idle() {
    x86_64::instructions::interrupts::enable_and_hlt();
}

/// Stop the core forever. Used by the panic handler and fatal-error paths;
/// never returns.
pub fn halt() -> ! {
    loop {
        x86_64::instructions::interrupts::disable();
        x86_64::instructions::hlt();
    }
}

// --- IRQ control ---

fn pic_line_ports(line: u8) -> (u16, u8) {
    if line < 8 {
        (0x21, line)
    } else {
        (0xA1, line - 8)
    }
}

pub fn irq_enable(line: u8) {
    let (port_addr, bit) = pic_line_ports(line);
    unsafe {
        let mut port: Port<u8> = Port::new(port_addr);
        let mask = port.read();
        port.write(mask & !(1 << bit));
    }
}

pub fn irq_disable(line: u8) {
    let (port_addr, bit) = pic_line_ports(line);
    unsafe {
        let mut port: Port<u8> = Port::new(port_addr);
        let mask = port.read();
        port.write(mask | (1 << bit));
    }
}

pub fn irq_eoi(line: u8) {
    unsafe { PICS.lock().notify_end_of_interrupt(PIC_1_OFFSET + line) };
}

/// Bind `handler` to ISA IRQ `line`. Fails with `Again` if the line is
/// already bound; the caller (`irq::register`) is expected to have already
/// checked this, so this mostly guards against races.
pub fn irq_register(line: u8, handler: fn(u8)) -> KernelResult<()> {
    if line == 0 || line as usize >= NR_IRQ_LINES {
        // Line 0 is the timer tick, wired directly to `timer_interrupt_handler`.
        return Err(KernelError::InvalidArgument);
    }
    let mut slot = IRQ_HANDLERS[line as usize].lock();
    if slot.is_some() {
        return Err(KernelError::Again);
    }
    *slot = Some(handler);
    Ok(())
}

// --- Context switching ---
//
// Only the callee-saved registers (SysV AMD64 ABI: rbx, rbp, r12-r15) need
// saving: every switch, including the one the timer interrupt handler can
// trigger indirectly through `sched::wakeup`, happens at an ordinary call
// boundary rather than inside a raw asm trap stub.

core::arch::global_asm!(
    ".global corekernel_context_switch",
    "corekernel_context_switch:",
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, rsi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
);

core::arch::global_asm!(
    ".global corekernel_context_load",
    "corekernel_context_load:",
    "mov rsp, rdi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
);

extern "C" {
    fn corekernel_context_switch(prev_sp_slot: *mut usize, next_sp: usize);
    fn corekernel_context_load(next_sp: usize) -> !;
}

/// Save the running thread's stack pointer into `*prev_sp_slot` and switch
/// to `next_sp`. Returns once some other thread switches back to the stack
/// `prev_sp_slot` pointed into.
///
/// # Safety
/// `next_sp` must be a stack pointer previously produced by `stack_forge`
/// or saved by an earlier `context_switch`/`context_load` from the same
/// thread.
pub unsafe fn context_switch(prev_sp_slot: *mut usize, next_sp: usize) {
    unsafe { corekernel_context_switch(prev_sp_slot, next_sp) };
}

/// Switch to `sp` with no "previous" context to save. Used exactly once,
/// to leave the boot stack and enter the first scheduled thread.
///
/// # Safety
/// Same as `context_switch`; never returns.
pub unsafe fn context_load(sp: usize) -> ! {
    unsafe { corekernel_context_load(sp) };
}

/// Entry trampoline landed on by the first `ret` inside a forged stack.
/// `corekernel_context_switch`/`corekernel_context_load`'s pops deposit the
/// thread's entry function and argument into r15/r14 just before the `ret`
/// that lands here, so they arrive in rdi/rsi under the SysV ABI.
#[naked]
extern "C" fn thread_trampoline() {
    unsafe {
        core::arch::asm!(
            "mov rdi, r15",
            "mov rsi, r14",
            "call {entry}",
            entry = sym crate::sched::thread_entry_trampoline,
            options(noreturn)
        );
    }
}

/// Build the initial stack for a new thread so that switching onto it for
/// the first time (`context_switch`/`context_load`) lands in
/// `thread_trampoline`, which then calls `sched::thread_entry_trampoline`
/// with `entry_addr`/`arg` (the thread's own entry point and argument,
/// passed through as plain addresses, not called directly from here).
///
/// `stack` is the thread's full stack region; the returned value is the
/// initial stack pointer to hand to `context_switch`/`context_load`.
pub fn stack_forge(stack: &mut [u8], entry_addr: usize, arg: usize) -> usize {
    let top = stack.as_mut_ptr() as usize + stack.len();
    let top = top & !0xf; // 16-byte align before laying down the frame

    // From low to high address: r15, r14, r13, r12, rbx, rbp, return address.
    // The switch routines pop in that order, so r15 <- entry_addr and
    // r14 <- arg end up in those registers right before `ret`.
    let frame_words: [usize; 7] = [
        entry_addr, // -> r15, the thread's entry function address
        arg,        // -> r14, its argument
        0,          // r13
        0,          // r12
        0,          // rbx
        0,          // rbp
        thread_trampoline as usize, // return address
    ];

    let sp = top - frame_words.len() * core::mem::size_of::<usize>();
    unsafe {
        let dst = sp as *mut usize;
        for (i, word) in frame_words.iter().enumerate() {
            dst.add(i).write(*word);
        }
    }
    sp
}

static TICK_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn tick_count() -> u64 {
    TICK_COUNT.load(Ordering::Relaxed)
}

pub(crate) fn note_tick() {
    TICK_COUNT.fetch_add(1, Ordering::Relaxed);
}
