/// Blocking synchronization primitives built directly on the scheduler
/// (`sched::sleep`/`sched::wakeup`), as opposed to the spin-only
/// `spin::Mutex` used internally by `mem` and `platform` for the handful of
/// critical sections too short-lived to ever want a thread to block.
mod condvar;
mod mutex;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard};
