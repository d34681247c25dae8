/// Condition variable, grounded directly on `condvar.c` in the original
/// kernel: a plain wait-queue of stack-local waiter records, each carrying
/// its own `awaken` flag so a `signal` that targets one specific waiter
/// can't be mistaken for a spurious wakeup by another.
///
/// `signal`/`broadcast`/`wait` all guard their queue manipulation with
/// `preempt_disable`/`preempt_enable` only, not the full scheduler lock —
/// same as the original, since on a single core that's already enough to
/// keep the list consistent across a `sleep()`.
use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::list::{Link, List};
use crate::sched::{self, Thread};

use super::mutex::{Mutex, MutexGuard};

struct Waiter {
    link: Link,
    thread: NonNull<Thread>,
    awaken: bool,
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

    /// Wake the waiter's thread, but only the first time — mirrors
    /// `condvar_waiter_wakeup`'s idempotence, which keeps a `broadcast`
    /// racing a `signal` from double-waking the same waiter.
    unsafe fn wake(mut this: NonNull<Waiter>) {
        if !unsafe { this.as_ref().awaken } {
            unsafe { this.as_mut().awaken = true };
            sched::wakeup(Some(unsafe { this.as_ref().thread }));
        }
    }
}

pub struct Condvar {
    waiters: UnsafeCell<List>,
}

impl Condvar {
    /// Not `const`, for the same reason as `Mutex::new`: the sentinel needs
    /// to self-link against its final address.
    pub fn new() -> Condvar {
        Condvar {
            waiters: UnsafeCell::new(List::default()),
        }
    }

    fn waiters(&self) -> &mut List {
        unsafe { &mut *self.waiters.get() }
    }

    /// Wake at most one waiter, highest-seniority (first enqueued) first.
    pub fn signal(&self) {
        sched::preempt_disable();
        if let Some(link) = self.waiters().first() {
            let waiter = unsafe { Waiter::container_of(link) };
            unsafe { Waiter::wake(waiter) };
        }
        sched::preempt_enable();
    }

    /// Wake every waiter currently queued.
    pub fn broadcast(&self) {
        sched::preempt_disable();
        let mut cursor = self.waiters().first();
        while let Some(link) = cursor {
            let next = self.waiters().next(link);
            let waiter = unsafe { Waiter::container_of(link) };
            unsafe { Waiter::wake(waiter) };
            cursor = next;
        }
        sched::preempt_enable();
    }

    /// Atomically unlock `guard`'s mutex and block until woken, then
    /// re-lock it before returning. Follows `condvar_wait`: the unlock and
    /// the enqueue both happen under `preempt_disable`, so no wakeup can be
    /// missed between releasing the mutex and going to sleep.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex: &'a Mutex<T> = guard.mutex;

        sched::preempt_disable();
        drop(guard);

        let mut waiter = Waiter {
            link: Link::new(),
            thread: sched::self_thread(),
            awaken: false,
        };
        let waiter_ptr = NonNull::from(&mut waiter);
        unsafe { self.waiters().insert_tail(Waiter::link_ptr(waiter_ptr)) };

        while !waiter.awaken {
            sched::sleep();
        }

        unsafe { self.waiters().remove(Waiter::link_ptr(waiter_ptr)) };
        sched::preempt_enable();

        mutex.lock()
    }
}

impl Default for Condvar {
    fn default() -> Condvar {
        Condvar::new()
    }
}

unsafe impl Sync for Condvar {}
unsafe impl Send for Condvar {}
