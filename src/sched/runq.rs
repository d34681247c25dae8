/// The per-priority-level run queue. Grounded on `thread_runq` in the
/// original kernel: one FIFO list per priority, scanned highest-first, plus
/// a dedicated idle thread that runs only when every list is empty.
///
/// Every method here assumes the scheduler lock is already held; nothing
/// in this file takes or releases it.
use core::ptr::NonNull;

use crate::config::NR_PRIORITIES;
use crate::list::List;

use super::thread::{Thread, ThreadState};

pub struct RunQueue {
    lists: [List; NR_PRIORITIES],
    nr_threads: usize,
    pub(super) current: NonNull<Thread>,
    pub(super) idle: NonNull<Thread>,
}

impl RunQueue {
    /// # Safety
    /// `dummy` and `idle` must stay alive for as long as this `RunQueue`
    /// does; `dummy` never needs to (it's the "current thread" placeholder
    /// used before the real idle thread exists).
    pub unsafe fn new(dummy: NonNull<Thread>) -> RunQueue {
        let mut lists = core::array::from_fn(|_| List::new());
        for list in lists.iter_mut() {
            list.init();
        }
        RunQueue {
            lists,
            nr_threads: 0,
            current: dummy,
            idle: dummy,
        }
    }

    pub fn set_idle(&mut self, idle: NonNull<Thread>) {
        self.idle = idle;
    }

    pub fn current(&self) -> NonNull<Thread> {
        self.current
    }

    fn list_for(&mut self, priority: u8) -> &mut List {
        &mut self.lists[priority as usize]
    }

    /// Add a runnable thread to its priority list. If it outranks whatever
    /// is currently running, flag the current thread for yield.
    pub fn add(&mut self, thread: NonNull<Thread>) {
        let priority = unsafe { thread.as_ref().priority };
        let link = Thread::link_ptr(thread);
        unsafe { self.list_for(priority).insert_tail(link) };
        self.nr_threads += 1;

        let current_priority = unsafe { self.current.as_ref().priority };
        if priority > current_priority {
            unsafe { self.current.as_mut().yield_requested = true };
        }
    }

    /// Re-enqueue `thread` if it is still runnable (called on the thread
    /// being switched away from, i.e. the outgoing `current`).
    fn put_prev(&mut self, thread: NonNull<Thread>) {
        if thread == self.idle {
            return;
        }
        if unsafe { thread.as_ref().state } == ThreadState::Running {
            self.add(thread);
        }
    }

    /// Highest nonempty priority list, FIFO within it; idle if none.
    fn get_next(&mut self) -> NonNull<Thread> {
        if self.nr_threads == 0 {
            return self.idle;
        }

        for priority in (0..NR_PRIORITIES).rev() {
            if let Some(link) = self.lists[priority].pop_front() {
                self.nr_threads -= 1;
                return unsafe { Thread::container_of(link) };
            }
        }
        unreachable!("nr_threads > 0 but every priority list was empty")
    }

    /// Pick the next thread to run, retiring `current` first. Returns the
    /// new current thread; callers compare against the old one to decide
    /// whether an actual context switch is needed.
    pub fn schedule(&mut self) -> (NonNull<Thread>, NonNull<Thread>) {
        let prev = self.current;
        self.put_prev(prev);
        let next = self.get_next();
        self.current = next;
        (prev, next)
    }
}
