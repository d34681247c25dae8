/// Compile-time constants shared across the core subsystems, rather than
/// scattered next to each module, since `sched`, `sync`, and `timer` all
/// reach for several of these at once.

/// Number of run-queue priority levels. Priority 0 is reserved for idle;
/// user threads use `1..NR_PRIORITIES`.
pub const NR_PRIORITIES: usize = 20;
pub const IDLE_PRIORITY: u8 = 0;
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = (NR_PRIORITIES - 1) as u8;

/// Default stack size for a spawned kernel thread.
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// Smallest stack allowed for any thread, matching the original kernel's
/// `THREAD_STACK_MIN_SIZE`. Used for the idle and timer-worker threads.
pub const THREAD_STACK_MIN_SIZE: usize = 4096;

/// Bound on a thread's diagnostic name, matching the original kernel's
/// `THREAD_NAME_MAX_SIZE`.
pub const THREAD_NAME_MAX_SIZE: usize = 16;

/// Heap region size. 32 MiB, matching the original kernel's `MEM_HEAP_SIZE`.
pub const HEAP_SIZE: usize = 32 * 1024 * 1024;
pub const HEAP_START: usize = 0x_4444_4444_0000;

/// Timer tick frequency, in Hz. Matches `THREAD_SCHED_FREQ` in the original
/// kernel.
pub const TICK_HZ: u32 = 100;

/// Priority for the dedicated timer worker thread (`timer::init`). Kept
/// near the top of the range so a due timer preempts ordinary work
/// promptly; not the very top, leaving room for anything that genuinely
/// must run ahead of it.
pub const TIMER_PRIORITY: u8 = MAX_PRIORITY - 1;
