/// Boundary-tag first-fit heap allocator.
///
/// One fixed region (`config::HEAP_SIZE`), 4-byte aligned, carved into
/// blocks laid out `[header tag | payload | footer tag]` where `size` in
/// each tag counts the whole block. Free blocks store a free-list link as
/// the first word(s) of their payload; the free list is LIFO (the most
/// recently freed block is tried first), matching the original kernel's
/// `mem_flist` insertion order.
///
/// This module doubles as the crate's `#[global_allocator]`: the same
/// boundary-tag structure backs both the explicit `alloc`/`free` API below
/// and ordinary `Box`/`Vec`/`VecDeque` use elsewhere in the kernel, instead
/// of wiring in `linked_list_allocator` for that role.
use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr::{self, NonNull};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::list::{Link, List};

#[repr(C)]
struct BoundaryTag {
    size: usize,
    allocated: bool,
}

const TAG_SIZE: usize = size_of::<BoundaryTag>();

/// Free-block payload header: just the intrusive link into the free list.
#[repr(C)]
struct FreeHeader {
    link: Link,
}

const FREE_HEADER_SIZE: usize = size_of::<FreeHeader>();

const fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

const MIN_BLOCK: usize = round_up(2 * TAG_SIZE + FREE_HEADER_SIZE, 4);

/// A single contiguous heap region under boundary-tag management.
pub struct Heap {
    start: usize,
    size: usize,
    free_list: List,
}

unsafe fn write_tags(block_start: usize, size: usize, allocated: bool) {
    unsafe {
        ptr::write(block_start as *mut BoundaryTag, BoundaryTag { size, allocated });
        let footer = (block_start + size - TAG_SIZE) as *mut BoundaryTag;
        ptr::write(footer, BoundaryTag { size, allocated });
    }
}

unsafe fn read_header(block_start: usize) -> BoundaryTag {
    unsafe { ptr::read(block_start as *const BoundaryTag) }
}

fn payload_addr(block_start: usize) -> usize {
    block_start + TAG_SIZE
}

fn block_start_of_payload(payload: usize) -> usize {
    payload - TAG_SIZE
}

impl Heap {
    pub const fn empty() -> Self {
        Heap {
            start: 0,
            size: 0,
            free_list: List::new(),
        }
    }

    /// Initialize the allocator over `[start, start + size)`.
    ///
    /// # Safety
    /// The caller must ensure the range is mapped, writable, and not used
    /// for anything else for the lifetime of this `Heap`.
    pub unsafe fn init(&mut self, start: usize, size: usize) {
        self.start = start;
        self.size = size;
        self.free_list.init();
        unsafe {
            write_tags(start, size, false);
            self.free_list
                .insert_tail(NonNull::new_unchecked(payload_addr(start) as *mut Link));
        }
    }

    fn in_bounds(&self, block_start: usize, size: usize) -> bool {
        block_start >= self.start && block_start + size <= self.start + self.size
    }

    fn free_link_of(&self, block_start: usize) -> NonNull<Link> {
        unsafe { NonNull::new_unchecked(payload_addr(block_start) as *mut Link) }
    }

    /// First-fit allocation. Returns `None` on `n == 0` or exhaustion,
    /// leaving the heap untouched in the failure case.
    pub fn alloc(&mut self, n: usize) -> Option<NonNull<u8>> {
        if n == 0 {
            return None;
        }

        let block_size = core::cmp::max(MIN_BLOCK, round_up(n, 4) + 2 * TAG_SIZE);

        let mut cursor = self.free_list.first();
        let found = loop {
            let node = cursor?;
            let block_start = block_start_of_payload(node.as_ptr() as usize);
            let tag = unsafe { read_header(block_start) };
            if tag.size >= block_size {
                break (node, block_start, tag.size);
            }
            cursor = self.free_list.next(node);
        };

        let (node, block_start, actual_size) = found;
        unsafe { self.free_list.remove(node) };

        let remainder = actual_size - block_size;
        if remainder >= MIN_BLOCK {
            unsafe {
                write_tags(block_start, block_size, true);
                let tail_start = block_start + block_size;
                write_tags(tail_start, remainder, false);
                self.free_list.insert_head(self.free_link_of(tail_start));
            }
        } else {
            unsafe { write_tags(block_start, actual_size, true) };
        }

        Some(unsafe { NonNull::new_unchecked(payload_addr(block_start) as *mut u8) })
    }

    /// Free a block previously returned by `alloc`. Returns
    /// `Err(InvalidArgument)` instead of touching memory if `ptr` doesn't
    /// point at a block this heap actually owns (outside the region
    /// entirely, misaligned, or already free) rather than silently
    /// corrupting the free list.
    pub fn free(&mut self, ptr: NonNull<u8>) -> KernelResult<()> {
        let payload = ptr.as_ptr() as usize;
        if payload < payload_addr(self.start) || payload >= self.start + self.size {
            return Err(KernelError::InvalidArgument);
        }
        let block_start = block_start_of_payload(payload);

        let tag = unsafe { read_header(block_start) };
        if !self.in_bounds(block_start, tag.size) || !tag.allocated {
            return Err(KernelError::InvalidArgument);
        }

        let mut merged_start = block_start;
        let mut merged_size = tag.size;

        // Physically-previous block: its footer sits immediately before our header.
        if merged_start > self.start {
            let prev_footer = unsafe { read_header(merged_start - TAG_SIZE) };
            // The footer tag's `size` field lets us find the previous block's start.
            let prev_start = merged_start - prev_footer.size;
            if !prev_footer.allocated {
                unsafe { self.free_list.remove(self.free_link_of(prev_start)) };
                merged_start = prev_start;
                merged_size += prev_footer.size;
            }
        }

        // Physically-next block: its header sits immediately after our footer.
        let next_start = block_start + tag.size;
        if next_start < self.start + self.size {
            let next_tag = unsafe { read_header(next_start) };
            if !next_tag.allocated {
                unsafe { self.free_list.remove(self.free_link_of(next_start)) };
                merged_size += next_tag.size;
            }
        }

        unsafe {
            write_tags(merged_start, merged_size, false);
            self.free_list.insert_head(self.free_link_of(merged_start));
        }
        Ok(())
    }
}

// The footer read at `merged_start - TAG_SIZE` above reads the *footer* of
// the previous block as if it were a header; `BoundaryTag` is laid out
// identically in both roles, so its `size`/`allocated` fields are valid
// either way.

pub struct LockedHeap(Mutex<Heap>);

impl LockedHeap {
    pub const fn empty() -> Self {
        LockedHeap(Mutex::new(Heap::empty()))
    }

    /// # Safety
    /// See `Heap::init`.
    pub unsafe fn init(&self, start: usize, size: usize) {
        unsafe { self.0.lock().init(start, size) };
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.0
            .lock()
            .alloc(layout.size())
            .map(|p| p.as_ptr())
            .unwrap_or(ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(nn) = NonNull::new(ptr) {
            // `GlobalAlloc::dealloc`'s own contract already requires `ptr`
            // to have come from this allocator, so a validation failure
            // here means caller UB elsewhere; there is no way to propagate
            // an error through this trait's `()` return, so fall back to a
            // debug assertion rather than silently corrupting the heap in
            // a build where it's actually checked.
            let result = self.0.lock().free(nn);
            debug_assert!(result.is_ok(), "dealloc of a pointer this heap doesn't own");
        }
    }
}

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Map and initialize the heap region. Called once during boot, right
/// after paging is set up.
pub fn init_heap(
    mapper: &mut impl x86_64::structures::paging::Mapper<x86_64::structures::paging::Size4KiB>,
    frame_allocator: &mut impl x86_64::structures::paging::FrameAllocator<
        x86_64::structures::paging::Size4KiB,
    >,
) -> Result<(), x86_64::structures::paging::mapper::MapToError<x86_64::structures::paging::Size4KiB>>
{
    use x86_64::structures::paging::{Page, PageTableFlags, Size4KiB};
    use x86_64::VirtAddr;

    let heap_start = VirtAddr::new(crate::config::HEAP_START as u64);
    let heap_end = heap_start + crate::config::HEAP_SIZE as u64 - 1u64;
    let page_range = {
        let start_page = Page::<Size4KiB>::containing_address(heap_start);
        let end_page = Page::<Size4KiB>::containing_address(heap_end);
        Page::range_inclusive(start_page, end_page)
    };

    for page in page_range {
        let frame = frame_allocator
            .allocate_frame()
            .ok_or(x86_64::structures::paging::mapper::MapToError::FrameAllocationFailed)?;
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        unsafe {
            mapper.map_to(page, frame, flags, frame_allocator)?.flush();
        }
    }

    unsafe {
        ALLOCATOR.init(crate::config::HEAP_START, crate::config::HEAP_SIZE);
    }

    Ok(())
}

/// Allocate `n` bytes directly from the core heap API (distinct from the
/// `Box`/`Vec` path, though both share the same underlying structure).
pub fn alloc(n: usize) -> Option<NonNull<u8>> {
    ALLOCATOR.0.lock().alloc(n)
}

/// Free a block returned by `alloc`. Returns `Err(InvalidArgument)` instead
/// of freeing anything if `ptr` isn't a block this heap currently owns.
pub fn free(ptr: NonNull<u8>) -> KernelResult<()> {
    ALLOCATOR.0.lock().free(ptr)
}
