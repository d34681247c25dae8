/// A blocking mutex with priority-ordered waiters and direct ownership
/// handoff on unlock.
///
/// There is no C `mutex.c` in the original kernel to ground this against —
/// only `condvar.c`, which calls `mutex_lock`/`mutex_unlock` as a black box —
/// so the waiter-queue shape and lock/unlock sequencing here are built to
/// match what `condvar_wait` expects, and the priority-ordered wake-one
/// discipline matches how `thread_runq_add` already treats priority
/// elsewhere in this scheduler.
///
/// `unlock` hands the lock straight to the highest-priority waiter rather
/// than clearing `locked` and letting everyone race for it: the waiter
/// wakes up already owning the mutex, so a low-priority thread that also
/// happened to be runnable can never slip in ahead of a waiter that has
/// been patiently queued at higher priority.
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::list::{Link, List};
use crate::sched::{self, Thread};

struct Waiter {
    link: Link,
    thread: NonNull<Thread>,
}

impl Waiter {
    unsafe fn container_of(link: NonNull<Link>) -> NonNull<Waiter> {
        let offset = core::mem::offset_of!(Waiter, link);
        unsafe { NonNull::new_unchecked((link.as_ptr() as usize - offset) as *mut Waiter) }
    }

    fn link_ptr(this: NonNull<Waiter>) -> NonNull<Link> {
        let offset = core::mem::offset_of!(Waiter, link);
        unsafe { NonNull::new_unchecked((this.as_ptr() as usize + offset) as *mut Link) }
    }
}

struct MutexState {
    locked: bool,
    owner: Option<NonNull<Thread>>,
    waiters: List,
}

/// Inserts `node` so the waiter list stays sorted by non-increasing
/// priority, FIFO among equal priorities (i.e. after any existing waiter
/// of the same priority).
unsafe fn insert_by_priority(waiters: &mut List, node: NonNull<Link>, priority: u8) {
    let mut cursor = waiters.first();
    while let Some(link) = cursor {
        let other = unsafe { Waiter::container_of(link) };
        let other_priority = unsafe { other.as_ref().thread.as_ref().priority() };
        if other_priority < priority {
            unsafe { waiters.insert_before(link, node) };
            return;
        }
        cursor = waiters.next(link);
    }
    unsafe { waiters.insert_tail(node) };
}

pub struct Mutex<T: ?Sized> {
    state: UnsafeCell<MutexState>,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    /// Not `const`: the waiter list's sentinel self-links on construction
    /// (see `list::List::default`), which needs the struct's final
    /// address and so cannot happen at compile time. Build one inside
    /// runtime init (e.g. behind a `spin::Once`), not as a `static`.
    pub fn new(data: T) -> Mutex<T> {
        Mutex {
            state: UnsafeCell::new(MutexState {
                locked: false,
                owner: None,
                waiters: List::default(),
            }),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    fn state(&self) -> &mut MutexState {
        unsafe { &mut *self.state.get() }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        sched::preempt_disable();

        let me = sched::self_thread();
        let state = self.state();
        if !state.locked {
            state.locked = true;
            state.owner = Some(me);
            sched::preempt_enable();
            return MutexGuard { mutex: self };
        }

        let priority = unsafe { me.as_ref().priority() };
        let mut waiter = Waiter {
            link: Link::new(),
            thread: me,
        };
        let waiter_ptr = NonNull::from(&mut waiter);
        unsafe { insert_by_priority(&mut state.waiters, Waiter::link_ptr(waiter_ptr), priority) };

        loop {
            sched::sleep();
            if self.state().owner == Some(me) {
                break;
            }
        }

        sched::preempt_enable();
        MutexGuard { mutex: self }
    }

    /// Take the lock only if it is free right now; never blocks.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        sched::preempt_disable();
        let state = self.state();
        if state.locked {
            sched::preempt_enable();
            return None;
        }
        state.locked = true;
        state.owner = Some(sched::self_thread());
        sched::preempt_enable();
        Some(MutexGuard { mutex: self })
    }

    fn unlock(&self) {
        sched::preempt_disable();
        let me = sched::self_thread();
        let state = self.state();
        debug_assert_eq!(state.owner, Some(me));

        match state.waiters.pop_front() {
            Some(link) => {
                let waiter = unsafe { Waiter::container_of(link) };
                let next_owner = unsafe { waiter.as_ref().thread };
                state.owner = Some(next_owner);
                sched::wakeup(Some(next_owner));
            }
            None => {
                state.locked = false;
                state.owner = None;
            }
        }

        sched::preempt_enable();
    }

}

pub struct MutexGuard<'a, T: ?Sized> {
    pub(crate) mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
