/// Intrusive doubly-linked list with a sentinel node.
///
/// This is the primitive every higher-level list in the kernel is built on:
/// run-queue priority levels, mutex/condvar wait-queues, the timer queue,
/// and the heap's free list. All of them need O(1) removal from an
/// arbitrary position — something `alloc::collections::VecDeque` cannot
/// give without a linear scan — so nodes are embedded directly in the
/// owning structure rather than boxed separately.
///
/// Nodes and lists are linked through raw pointers and are `!Send`/`!Sync`
/// by default; callers synchronize access the same way the rest of the
/// kernel does (scheduler lock, a mutex, or single-threaded startup).
use core::marker::PhantomPinned;
use core::ptr::NonNull;

/// Embedded in every structure that can be a member of a `List`.
pub struct Link {
    prev: Option<NonNull<Link>>,
    next: Option<NonNull<Link>>,
    _pin: PhantomPinned,
}

impl Link {
    pub const fn new() -> Self {
        Link {
            prev: None,
            next: None,
            _pin: PhantomPinned,
        }
    }

    /// True while this node is linked into some list.
    pub fn is_linked(&self) -> bool {
        self.next.is_some()
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

/// A sentinel-based circular doubly-linked list of `Link` nodes.
///
/// `List` does not own its members: it only ever holds raw pointers to
/// `Link`s embedded elsewhere. Callers are responsible for the members'
/// lifetime; unlinking a node that is being dropped is the caller's job
/// (see the "waiter must not return while linked" discipline in
/// `sync::condvar` and `sync::mutex`).
pub struct List {
    sentinel: Link,
}

impl List {
    pub const fn new() -> Self {
        List {
            sentinel: Link::new(),
        }
    }

    /// Must be called once before first use (the sentinel self-links).
    pub fn init(&mut self) {
        let s = NonNull::from(&self.sentinel);
        self.sentinel.prev = Some(s);
        self.sentinel.next = Some(s);
    }

    fn sentinel_ptr(&self) -> NonNull<Link> {
        NonNull::from(&self.sentinel)
    }

    pub fn is_empty(&self) -> bool {
        self.sentinel.next == Some(self.sentinel_ptr())
    }

    /// # Safety
    /// `node` must point to a `Link` that outlives its membership in this
    /// list and is not already linked anywhere.
    pub unsafe fn insert_tail(&mut self, node: NonNull<Link>) {
        unsafe { self.insert_before(self.sentinel_ptr(), node) };
    }

    /// # Safety
    /// Same as `insert_tail`.
    pub unsafe fn insert_head(&mut self, node: NonNull<Link>) {
        let first = self.sentinel.next.unwrap();
        unsafe { self.insert_before(first, node) };
    }

    /// Insert `node` immediately before `before`, which must already be
    /// linked into this list (or be the sentinel itself).
    ///
    /// # Safety
    /// `node` must not already be linked into any list.
    pub unsafe fn insert_before(&mut self, before: NonNull<Link>, mut node: NonNull<Link>) {
        unsafe {
            let prev = (*before.as_ptr()).prev.unwrap();
            node.as_mut().prev = Some(prev);
            node.as_mut().next = Some(before);
            (*prev.as_ptr()).next = Some(node);
            (*before.as_ptr()).prev = Some(node);
        }
    }

    /// Unlink `node` from whichever list it is in (must be this one).
    ///
    /// # Safety
    /// `node` must currently be linked into this list.
    pub unsafe fn remove(&mut self, mut node: NonNull<Link>) {
        unsafe {
            let prev = node.as_ref().prev.unwrap();
            let next = node.as_ref().next.unwrap();
            (*prev.as_ptr()).next = Some(next);
            (*next.as_ptr()).prev = Some(prev);
            node.as_mut().prev = None;
            node.as_mut().next = None;
        }
    }

    /// The first linked node, if any.
    pub fn first(&self) -> Option<NonNull<Link>> {
        if self.is_empty() {
            None
        } else {
            self.sentinel.next
        }
    }

    /// Unlink and return the first node.
    pub fn pop_front(&mut self) -> Option<NonNull<Link>> {
        let first = self.first()?;
        unsafe { self.remove(first) };
        Some(first)
    }

    /// The node following `node`, or `None` if `node` is the last member.
    pub fn next(&self, node: NonNull<Link>) -> Option<NonNull<Link>> {
        let n = unsafe { node.as_ref().next? };
        if n == self.sentinel_ptr() {
            None
        } else {
            Some(n)
        }
    }
}

impl Default for List {
    fn default() -> Self {
        let mut list = Self::new();
        list.init();
        list
    }
}

// Safety: lists cross thread "ownership" only while the caller already
// holds whatever lock protects that list (scheduler lock, mutex, etc).
unsafe impl Send for List {}

