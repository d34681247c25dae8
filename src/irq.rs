/// IRQ dispatch: a handler table keyed by ISA IRQ line (0..16), sitting on
/// top of the platform port's raw vector wiring.
///
/// Line 0 (the timer) is reserved for `sched`'s own tick ISR and cannot be
/// registered here; `platform::irq_register` already rejects it, this just
/// gives callers a typed error instead of a panic.
use crate::error::{KernelError, KernelResult};
use crate::platform;

/// Bind `handler` to `line`. `handler` runs in interrupt context with the
/// scheduler lock *not* held; it must not block and should keep work short,
/// deferring anything expensive to a woken thread.
pub fn register(line: u8, handler: fn(u8)) -> KernelResult<()> {
    validate_line(line)?;
    platform::irq_register(line, handler)
}

/// Unmask `line` at the interrupt controller. A newly registered handler
/// receives nothing until this is called.
pub fn enable(line: u8) {
    platform::irq_enable(line);
}

/// Mask `line` at the interrupt controller.
pub fn disable(line: u8) {
    platform::irq_disable(line);
}

/// Debug-only guard for callers that want to assert a line index is valid
/// before registering, rather than finding out via `InvalidArgument`.
pub fn is_valid_line(line: u8) -> bool {
    (1..16).contains(&line)
}

pub(crate) fn validate_line(line: u8) -> KernelResult<()> {
    if is_valid_line(line) {
        Ok(())
    } else {
        Err(KernelError::InvalidArgument)
    }
}
