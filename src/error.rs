/// Error taxonomy shared by every fallible core operation.
///
/// Invariant violations are not represented here — they go through
/// `panic!` and never return to the caller (see `lib.rs`'s panic handler).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The heap could not satisfy an allocation request.
    OutOfMemory,
    /// A resource is already bound (e.g. an IRQ line already has a handler).
    Again,
    /// A caller passed a value the API forbids (out-of-range priority or
    /// IRQ line, a pointer outside the heap, a double free, ...).
    InvalidArgument,
}

pub type KernelResult<T> = Result<T, KernelError>;
