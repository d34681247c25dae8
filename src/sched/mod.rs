/// Preemptive thread scheduler core.
///
/// Grounded on `thread.c` in the original kernel: priority run queue
/// (`runq`), a preempt-disable counter plus interrupt masking standing in
/// for a lock ("the scheduler lock"), a one-shot yield-request flag set by
/// whoever makes a higher-priority thread runnable, and direct stack
/// switching (`platform::context_switch`/`context_load`) with no
/// intermediate "ready to run" copy step.
///
/// There is no round-robin timeslicing: a tick only ever causes a switch
/// indirectly, by waking a higher-priority thread (typically the timer
/// worker, see `timer::on_tick`). `runq::RunQueue::add` is what actually
/// requests a yield, by comparing the newly-runnable thread's priority
/// against whoever is current; `preempt_level` gates *when* that request
/// is acted on. A thread interrupted mid critical-section keeps running
/// until it calls `preempt_enable`/`unlock_scheduler` itself and the count
/// drops back to zero — the same deferral the original kernel gets for
/// free from `thread_preempt_enable` calling `thread_yield_if_needed`.
///
/// Every kernel thread shares one stack for both its normal execution and
/// any interrupt that lands on it (there is no separate per-CPU interrupt
/// stack, other than the double-fault IST). A context switch triggered
/// from inside the timer interrupt handler therefore just leaves that
/// handler's call frame dormant on the preempted thread's own stack until
/// it is switched back to, at which point it returns normally and the
/// compiler-generated `iretq` epilogue resumes whatever it interrupted.
pub mod thread;
mod runq;

use core::ptr::NonNull;

use spin::Once;

use crate::config;
use crate::error::{KernelError, KernelResult};
use crate::mem;
use crate::platform;

use runq::RunQueue;
pub use thread::{Thread, ThreadState};

struct RunQueueCell(core::cell::UnsafeCell<RunQueue>);
unsafe impl Sync for RunQueueCell {}

static RUNQ: Once<RunQueueCell> = Once::new();
static mut DUMMY_THREAD: Thread = Thread::dummy();

fn runq() -> &'static mut RunQueue {
    let cell = RUNQ.get().expect("sched::bootstrap not called");
    unsafe { &mut *cell.0.get() }
}

/// Must run once, before any thread is created and before interrupts are
/// ever enabled.
pub fn bootstrap() {
    let dummy = unsafe { NonNull::new_unchecked(&raw mut DUMMY_THREAD) };
    RUNQ.call_once(|| RunQueueCell(core::cell::UnsafeCell::new(unsafe { RunQueue::new(dummy) })));
}

/// Must run once, after the heap is up. Creates the idle thread.
pub fn init() {
    let idle = spawn_raw(
        "idle",
        idle_main,
        0,
        config::IDLE_PRIORITY,
        config::THREAD_STACK_MIN_SIZE,
    )
    .expect("failed to create idle thread");
    runq().set_idle(idle);
}

/// Hand control to the scheduler for the first time. Never returns.
pub fn enable_scheduler() -> ! {
    let (_, next) = runq().schedule();
    let sp = unsafe { next.as_ref().sp };
    unsafe { platform::context_load(sp) }
}

extern "C" fn idle_main(_arg: usize) {
    loop {
        platform::idle();
    }
}

// --- Scheduler lock ---
//
// Acquired preempt-disable-then-intr-save, released in reverse order,
// exactly as in `thread_lock_scheduler`/`thread_unlock_scheduler`.

pub struct SchedGuard {
    intr: platform::IntrState,
    yield_on_unlock: bool,
}

pub fn lock_scheduler() -> SchedGuard {
    preempt_disable();
    let intr = platform::intr_save();
    SchedGuard {
        intr,
        yield_on_unlock: true,
    }
}

/// Like `lock_scheduler`, but `unlock` will not itself run a yield check
/// (used where the caller already ran `runq().schedule()` inline rather
/// than deferring to the unlock).
fn lock_scheduler_no_yield() -> SchedGuard {
    preempt_disable();
    let intr = platform::intr_save();
    SchedGuard {
        intr,
        yield_on_unlock: false,
    }
}

pub fn unlock_scheduler(guard: SchedGuard) {
    platform::intr_restore(guard.intr);
    if guard.yield_on_unlock {
        preempt_enable();
    } else {
        preempt_enable_no_yield();
    }
}

pub fn scheduler_locked() -> bool {
    !platform::intr_enabled() && !preempt_enabled()
}

fn current_thread() -> NonNull<Thread> {
    runq().current()
}

pub fn preempt_disable() {
    let mut current = current_thread();
    let level = unsafe { &mut current.as_mut().preempt_level };
    *level = level.checked_add(1).expect("preempt_level overflow");
}

pub fn preempt_enable_no_yield() {
    let mut current = current_thread();
    let level = unsafe { &mut current.as_mut().preempt_level };
    debug_assert!(*level != 0);
    *level -= 1;
}

pub fn preempt_enable() {
    preempt_enable_no_yield();
    yield_if_needed();
}

pub fn preempt_enabled() -> bool {
    unsafe { current_thread().as_ref().preempt_level == 0 }
}

// --- Voluntary scheduling points ---

/// Switch away from the current thread if the scheduler actually picked a
/// different one.
unsafe fn switch_if_needed(prev: NonNull<Thread>, next: NonNull<Thread>) {
    if prev == next {
        return;
    }
    let prev_sp_slot = unsafe { &raw mut (*prev.as_ptr()).sp };
    let next_sp = unsafe { next.as_ref().sp };
    unsafe { platform::context_switch(prev_sp_slot, next_sp) };
}

/// Give up the CPU voluntarily. No-op if preemption is currently disabled
/// (matching `thread_yield`'s early return).
pub fn yield_now() {
    if !preempt_enabled() {
        return;
    }
    let guard = lock_scheduler_no_yield();
    unsafe { current_thread().as_mut().yield_requested = false };
    let (prev, next) = runq().schedule();
    unsafe { switch_if_needed(prev, next) };
    unlock_scheduler(guard);
}

/// Yield only if something set this thread's yield-request flag (a
/// higher-priority thread became runnable while this one ran on).
pub fn yield_if_needed() {
    if unsafe { current_thread().as_ref().yield_requested } {
        yield_now();
    }
}

/// Block the current thread until some other thread calls `wakeup` on it.
/// Interrupt-masked only: a sleeping thread cannot be concurrently
/// preempted back into running on a uniprocessor, so preempt-disable adds
/// nothing here.
pub fn sleep() {
    let intr = platform::intr_save();
    let mut current = current_thread();
    debug_assert_eq!(unsafe { current.as_ref().state }, ThreadState::Running);
    unsafe { current.as_mut().state = ThreadState::Sleeping };
    let (prev, next) = runq().schedule();
    unsafe { switch_if_needed(prev, next) };
    debug_assert_eq!(unsafe { current_thread().as_ref().state }, ThreadState::Running);
    platform::intr_restore(intr);
}

/// Make `thread` runnable again. A no-op on `None`, on the calling thread
/// itself, or on an already-running thread — mirrors `thread_wakeup`.
pub fn wakeup(thread: Option<NonNull<Thread>>) {
    let Some(mut thread) = thread else { return };
    if thread == current_thread() {
        return;
    }

    let guard = lock_scheduler();
    if unsafe { thread.as_ref().state } != ThreadState::Running {
        debug_assert_ne!(unsafe { thread.as_ref().state }, ThreadState::Dead);
        unsafe { thread.as_mut().state = ThreadState::Running };
        runq().add(thread);
    }
    unlock_scheduler(guard);
}

pub fn self_thread() -> NonNull<Thread> {
    current_thread()
}

// --- Thread lifecycle ---

pub struct JoinHandle(NonNull<Thread>);

impl JoinHandle {
    /// Borrow the raw thread pointer without consuming the handle, for
    /// callers (e.g. `timer`) that need to `wakeup` a specific thread by
    /// name rather than eventually `join` it.
    pub(crate) fn thread_ref(&self) -> NonNull<Thread> {
        self.0
    }
}

fn spawn_raw(
    name: &str,
    entry: extern "C" fn(usize),
    arg: usize,
    priority: u8,
    stack_size: usize,
) -> KernelResult<NonNull<Thread>> {
    if priority as usize >= config::NR_PRIORITIES {
        return Err(KernelError::InvalidArgument);
    }

    let stack_ptr = mem::alloc(stack_size).ok_or(KernelError::OutOfMemory)?;
    let stack_slice = unsafe { core::slice::from_raw_parts_mut(stack_ptr.as_ptr(), stack_size) };
    let sp = platform::stack_forge(stack_slice, entry as usize, arg);

    let thread = Thread::new(name, sp, priority, Some((stack_ptr, stack_size)));
    let thread = alloc::boxed::Box::new(thread);
    let thread = NonNull::from(alloc::boxed::Box::leak(thread));

    let guard = lock_scheduler();
    runq().add(thread);
    unlock_scheduler(guard);

    Ok(thread)
}

/// Spawn a kernel thread at `priority` (in `config::MIN_PRIORITY
/// ..= config::MAX_PRIORITY`) with `stack_size` bytes of stack.
pub fn spawn(
    name: &str,
    entry: extern "C" fn(usize),
    arg: usize,
    priority: u8,
    stack_size: usize,
) -> KernelResult<JoinHandle> {
    if priority < config::MIN_PRIORITY {
        return Err(KernelError::InvalidArgument);
    }
    spawn_raw(name, entry, arg, priority, stack_size).map(JoinHandle)
}

/// Called by the entry trampoline after the thread's own function returns.
/// Never returns; the stack stays allocated until a `join` reclaims it.
pub fn exit() -> ! {
    debug_assert!(preempt_enabled());
    let guard = lock_scheduler_no_yield();
    let mut current = current_thread();
    debug_assert_eq!(unsafe { current.as_ref().state }, ThreadState::Running);
    unsafe { current.as_mut().state = ThreadState::Dead };
    let joiner = unsafe { current.as_ref().joiner };
    wakeup_locked(joiner);
    let (prev, next) = runq().schedule();
    unsafe { switch_if_needed(prev, next) };
    unlock_scheduler(guard);
    unreachable!("dead thread walking");
}

fn wakeup_locked(thread: Option<NonNull<Thread>>) {
    let Some(mut thread) = thread else { return };
    if unsafe { thread.as_ref().state } != ThreadState::Running {
        unsafe { thread.as_mut().state = ThreadState::Running };
        runq().add(thread);
    }
}

/// Block until `thread` has exited, then reclaim its stack and control
/// block. A thread may be joined by at most one other thread.
///
/// Holds the scheduler lock across the whole wait loop, exactly as
/// `thread_join` does: setting `joiner` and checking `state` have to stay
/// atomic with respect to a concurrent `exit()`/`wakeup`, or a wakeup can
/// land in the gap between the check and `sleep()` and be lost for good.
pub fn join(handle: JoinHandle) {
    let mut thread = handle.0;
    let guard = lock_scheduler();
    unsafe { thread.as_mut().joiner = Some(current_thread()) };

    while unsafe { thread.as_ref().state } != ThreadState::Dead {
        sleep();
    }
    unlock_scheduler(guard);

    if let Some((ptr, _)) = unsafe { thread.as_ref().stack_region() } {
        mem::free(ptr).expect("joined thread's stack region was not a live heap allocation");
    }
    unsafe { drop(alloc::boxed::Box::from_raw(thread.as_ptr())) };
}

/// Landed on by the platform's forged-stack trampoline on a new thread's
/// first run. Stands in for `thread_main` in the original kernel: release
/// the scheduler lock borrowed from whoever last called `runq().schedule()`
/// into this thread, run the thread body, then exit.
#[no_mangle]
extern "C" fn thread_entry_trampoline(entry_addr: usize, arg: usize) -> ! {
    debug_assert!(scheduler_locked());
    debug_assert_eq!(unsafe { current_thread().as_ref().preempt_level }, 1);

    platform::intr_enable();
    preempt_enable();

    let entry: extern "C" fn(usize) = unsafe { core::mem::transmute(entry_addr) };
    entry(arg);

    exit();
}

/// Called by the platform's timer interrupt handler on every tick.
/// Forwards to the timer subsystem, which wakes its worker thread (and, by
/// extension, may trigger a priority-preemption switch right here) when a
/// software timer has expired.
pub(crate) fn on_tick(ticks: u32) {
    crate::timer::on_tick(ticks);
}
