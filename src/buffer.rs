//! DMA buffer memory
//!
//! A [`PipeBuffer`] is a region of DMA memory plus a count of valid bytes. It
//! isn't `Clone`; whoever holds the value owns the region. DMA engines hand
//! buffers out of a pipe, and take them back on commit or discard.
//!
//! DMA engine implementations can carve their buffers out of a static
//! [`BufferMemory`]:
//!
//! ```
//! use usbd_fram::buffer::BufferMemory;
//!
//! static MEMORY: BufferMemory<1024> = BufferMemory::new();
//!
//! let mut allocator = MEMORY.allocator().unwrap();
//! let buffer = allocator.allocate(512).unwrap();
//! assert_eq!(buffer.capacity(), 512);
//!
//! // Memory can only be taken once.
//! assert!(MEMORY.allocator().is_none());
//! ```

use core::{
    cell::UnsafeCell,
    ptr::NonNull,
    sync::atomic::{AtomicBool, Ordering},
};

/// Static memory for DMA buffers
///
/// The memory is word aligned. Place this object wherever your DMA engine
/// can reach it.
#[repr(C, align(4))]
pub struct BufferMemory<const SIZE: usize> {
    buffer: UnsafeCell<[u8; SIZE]>,
    taken: AtomicBool,
}

unsafe impl<const SIZE: usize> Sync for BufferMemory<SIZE> {}

impl<const SIZE: usize> Default for BufferMemory<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> BufferMemory<SIZE> {
    /// Allocate `SIZE` bytes of buffer memory
    pub const fn new() -> Self {
        BufferMemory {
            buffer: UnsafeCell::new([0; SIZE]),
            taken: AtomicBool::new(false),
        }
    }

    /// Take the allocator for this memory
    ///
    /// Returns `None` if the allocator was already taken.
    pub fn allocator(&'static self) -> Option<Allocator> {
        if self.taken.swap(true, Ordering::SeqCst) {
            return None;
        }
        // Safety: the atomic swap ensures that we hand out this
        // memory once.
        let start = unsafe { NonNull::new_unchecked(self.buffer.get().cast::<u8>()) };
        Some(unsafe { Allocator::new(start, SIZE) })
    }
}

/// DMA buffers start on a word boundary.
const ALIGNMENT: usize = 4;

/// Carves DMA buffers out of a block of memory
///
/// Buffers are taken from the end of the block, working down, and each one
/// starts on a word boundary. Nothing is ever freed.
pub struct Allocator {
    start: *mut u8,
    ptr: *mut u8,
}

unsafe impl Send for Allocator {}

impl Allocator {
    /// Manage `size` bytes of memory at `start`
    ///
    /// # Safety
    ///
    /// `start` must point to at least `size` bytes that live for the rest of
    /// the program, and that nothing else uses.
    pub unsafe fn new(start: NonNull<u8>, size: usize) -> Self {
        let start = start.as_ptr();
        Allocator {
            start,
            ptr: start.add(size),
        }
    }

    /// Use a static slice as DMA buffer memory
    pub fn from_static(buffer: &'static mut [u8]) -> Self {
        let size = buffer.len();
        // Safety: a static, mutable slice is never null, and we now own it.
        unsafe { Self::new(NonNull::new_unchecked(buffer.as_mut_ptr()), size) }
    }

    /// Take a buffer of `size` bytes
    ///
    /// The buffer starts out empty. Returns `None` if there isn't enough
    /// memory left.
    pub fn allocate(&mut self, size: usize) -> Option<PipeBuffer> {
        let top = (self.ptr as usize).checked_sub(size)?;
        let base = top & !(ALIGNMENT - 1);
        if base < self.start as usize {
            return None;
        }
        self.ptr = base as *mut u8;
        let ptr = NonNull::new(self.ptr)?;
        // Safety: memory below self.ptr is never handed out again.
        Some(unsafe { PipeBuffer::from_raw_parts(ptr, size) })
    }

    /// Returns the number of bytes that haven't been allocated
    pub fn remaining(&self) -> usize {
        self.ptr as usize - self.start as usize
    }

    /// An allocator without any memory
    pub fn empty() -> Self {
        Allocator {
            start: core::ptr::null_mut(),
            ptr: core::ptr::null_mut(),
        }
    }
}

/// A DMA buffer, and the number of valid bytes it holds
pub struct PipeBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
    len: usize,
}

unsafe impl Send for PipeBuffer {}

impl PipeBuffer {
    /// Describe `capacity` bytes of DMA memory at `ptr`
    ///
    /// The buffer starts out empty.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `capacity` bytes that outlive the buffer.
    /// At most one `PipeBuffer` may describe the memory at any time, and the
    /// DMA engine must not touch the memory while software holds the buffer.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, capacity: usize) -> Self {
        PipeBuffer {
            ptr,
            capacity,
            len: 0,
        }
    }

    /// Returns the start of the buffer memory
    ///
    /// Use this to hand the memory back to a DMA engine.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Size of the buffer memory
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Indicates if there are no valid bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the number of valid bytes
    ///
    /// The count is clamped to the capacity.
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity);
        self.len = len.min(self.capacity);
    }

    /// The valid bytes
    pub fn as_slice(&self) -> &[u8] {
        // Safety: we have exclusive access to capacity bytes, and len <= capacity.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The valid bytes, for writing
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: see as_slice().
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
