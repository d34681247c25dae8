/// Software timer subsystem, grounded directly on `timer.c` in the original
/// kernel: a sorted list of caller-owned `Timer` records, a tick counter
/// advanced by the platform's periodic interrupt, and a dedicated worker
/// thread that runs expired callbacks in ordinary thread context instead of
/// from inside the interrupt handler.
///
/// The tick counter and a small cache of "is anything due" state are kept
/// outside the list's mutex and touched only with interrupts masked. That's
/// deliberate: `on_tick` runs on whatever thread the interrupt landed on,
/// possibly the worker itself mid-callback, and a mutex is not
/// reentrant — locking it from `on_tick` could deadlock against its own
/// owner. Reading two plain fields under an interrupt mask costs nothing
/// and never blocks.
use core::cell::UnsafeCell;
use core::ptr::NonNull;

use spin::Once;

use crate::config;
use crate::list::{Link, List};
use crate::platform;
use crate::sched::{self, Thread};
use crate::sync::Mutex;

pub type TimerFn = fn(usize);

/// A caller-owned timer node. Must be kept alive (not moved, not dropped)
/// for as long as it is scheduled; there is no cancellation yet, so a
/// timer detaches itself from the list only by firing.
pub struct Timer {
    link: Link,
    deadline: u32,
    func: TimerFn,
    arg: usize,
}

impl Timer {
    pub const fn new(func: TimerFn, arg: usize) -> Timer {
        Timer {
            link: Link::new(),
            deadline: 0,
            func,
            arg,
        }
    }

    /// The tick at which this timer last fired or is scheduled to fire.
    pub fn deadline(&self) -> u32 {
        self.deadline
    }

    unsafe fn container_of(link: NonNull<Link>) -> NonNull<Timer> {
        let offset = core::mem::offset_of!(Timer, link);
        unsafe { NonNull::new_unchecked((link.as_ptr() as usize - offset) as *mut Timer) }
    }

    fn link_ptr(this: NonNull<Timer>) -> NonNull<Link> {
        let offset = core::mem::offset_of!(Timer, link);
        unsafe { NonNull::new_unchecked((this.as_ptr() as usize + offset) as *mut Link) }
    }
}

/// `a` has expired relative to reference point `b` under modular tick
/// arithmetic (a tick counter that wraps at `u32::MAX` is still ordered
/// correctly as long as no two compared points are more than half the
/// range apart). Mirrors `timer_ticks_expired`.
pub fn expired(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) > u32::MAX / 2
}

/// Mirrors `timer_ticks_occurred`.
pub fn occurred(a: u32, b: u32) -> bool {
    a == b || expired(a, b)
}

struct Cache {
    ticks: u32,
    wakeup_ticks: u32,
    list_empty: bool,
}

impl Cache {
    fn work_pending(&self) -> bool {
        debug_assert!(!platform::intr_enabled());
        !self.list_empty && occurred(self.wakeup_ticks, self.ticks)
    }
}

struct TimerState {
    list: Mutex<List>,
    cache: UnsafeCell<Cache>,
    worker: UnsafeCell<Option<NonNull<Thread>>>,
}

// Safety: `cache` and `worker` are only ever touched with interrupts
// masked (single core, so that is exclusion enough); `list` guards itself.
unsafe impl Sync for TimerState {}

static STATE: Once<TimerState> = Once::new();

fn state() -> &'static TimerState {
    STATE.get().expect("timer::init not called")
}

/// Must run after the scheduler and heap are up. Spawns the worker thread
/// that actually runs expired callbacks.
pub fn init() {
    STATE.call_once(|| TimerState {
        list: Mutex::new(List::default()),
        cache: UnsafeCell::new(Cache {
            ticks: 0,
            wakeup_ticks: 0,
            list_empty: true,
        }),
        worker: UnsafeCell::new(None),
    });

    let handle = sched::spawn(
        "timer",
        worker_main,
        0,
        config::TIMER_PRIORITY,
        config::THREAD_STACK_MIN_SIZE,
    )
    .expect("failed to create timer worker thread");

    unsafe { *state().worker.get() = Some(handle.thread_ref()) };
    // The worker outlives the whole kernel; nothing ever joins it, so the
    // handle itself is simply dropped here.
}

/// The current tick count. Wraps at `u32::MAX`.
pub fn now() -> u32 {
    let intr = platform::intr_save();
    let ticks = unsafe { (*state().cache.get()).ticks };
    platform::intr_restore(intr);
    ticks
}

pub fn get_time(timer: &Timer) -> u32 {
    let _list = state().list.lock();
    timer.deadline
}

/// Arm `timer` to fire at tick `deadline`. If `timer` is already scheduled,
/// it is moved, not duplicated — a timer has exactly one list slot.
///
/// # Safety
/// `timer` must stay put (no move, no drop) until it fires or the kernel
/// shuts down: the list stores a raw pointer into it, not a copy.
pub unsafe fn schedule(mut timer: NonNull<Timer>, deadline: u32) {
    let mut list = state().list.lock();
    unsafe { timer.as_mut().deadline = deadline };

    let mut before = list.first();
    while let Some(link) = before {
        let tmp = unsafe { Timer::container_of(link) };
        if !expired(unsafe { tmp.as_ref().deadline }, deadline) {
            break;
        }
        before = list.next(link);
    }

    let node = Timer::link_ptr(timer);
    match before {
        Some(b) => unsafe { list.insert_before(b, node) },
        None => unsafe { list.insert_tail(node) },
    }

    let head = unsafe { Timer::container_of(list.first().expect("just inserted")) };
    let head_deadline = unsafe { head.as_ref().deadline };

    let intr = platform::intr_save();
    let cache = unsafe { &mut *state().cache.get() };
    cache.list_empty = false;
    cache.wakeup_ticks = head_deadline;
    platform::intr_restore(intr);

    // Unlocking last, after the cache refresh, is deliberate: it's what
    // lets `on_tick` observe a consistent cache without ever blocking on
    // this mutex from interrupt context.
    drop(list);
}

fn process_list(now_ticks: u32) {
    let mut list = state().list.lock();

    loop {
        let Some(first) = list.first() else { break };
        let timer = unsafe { Timer::container_of(first) };
        if !occurred(unsafe { timer.as_ref().deadline }, now_ticks) {
            break;
        }
        unsafe { list.remove(first) };

        drop(list);
        let (func, arg) = unsafe { (timer.as_ref().func, timer.as_ref().arg) };
        func(arg);
        list = state().list.lock();
    }

    let intr = platform::intr_save();
    let cache = unsafe { &mut *state().cache.get() };
    cache.list_empty = list.is_empty();
    if !cache.list_empty {
        let head = unsafe { Timer::container_of(list.first().expect("not empty")) };
        cache.wakeup_ticks = unsafe { head.as_ref().deadline };
    }
    platform::intr_restore(intr);
}

extern "C" fn worker_main(_arg: usize) {
    loop {
        sched::preempt_disable();
        let intr = platform::intr_save();

        let now_ticks = loop {
            let cache = unsafe { &*state().cache.get() };
            let now_ticks = cache.ticks;
            if cache.work_pending() {
                break now_ticks;
            }
            sched::sleep();
        };

        platform::intr_restore(intr);
        sched::preempt_enable();

        process_list(now_ticks);
    }
}

/// Called once per tick from `sched::on_tick`, itself called from the
/// platform's timer interrupt handler. Mirrors `timer_report_tick`: advance
/// the counter, and if a scheduled timer is now due, wake the worker.
///
/// A no-op before `init()` has run (ticks before the timer subsystem
/// exists are simply not tracked).
pub(crate) fn on_tick(ticks: u32) {
    let Some(st) = STATE.get() else { return };
    let cache = unsafe { &mut *st.cache.get() };
    cache.ticks = ticks;
    if cache.work_pending() {
        let worker = unsafe { *st.worker.get() };
        sched::wakeup(worker);
    }
}
