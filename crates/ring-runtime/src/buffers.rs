//! Buffer-ring pool: a page-aligned bank of fixed-size buffers the
//! kernel selects from on a buffer-select recv, tracked by a
//! borrowed-set bitmap so a buffer is never handed to two recvs at once.
//!
//! Built on the `io-uring` crate's `opcode::ProvideBuffers` SQE — the
//! legacy buffer-group publish/re-publish mechanism — rather than the
//! newer mmap'd `io_uring_buf_ring` ABI, which needs a raw ring layout
//! this workspace has no other use for.

use io_uring::opcode;
use ring_core::error::{RingError, RingResult};

use crate::engine::RingEngine;

/// Buffer-ring capacity: C = 1024.
pub const CAPACITY: u32 = 1024;
/// Per-buffer size: B = 1024 bytes.
pub const BUFFER_SIZE: u32 = 1024;
/// Buffer-group id: group 0.
pub const GROUP_ID: u16 = 0;

fn is_power_of_two(n: u32) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

/// Owns the raw memory backing every buffer in the group and which ones
/// are currently lent out to a completed recv.
pub struct BufferRingPool {
    region: *mut u8,
    capacity: u32,
    buf_size: u32,
    group_id: u16,
    borrowed: Vec<bool>,
}

// The pool is thread-local in every caller of this workspace (one ring,
// one buffer pool per worker thread), so it never needs to cross a
// thread boundary; it simply isn't `Sync`/`Send` by default because of
// the raw pointer, which matches that usage.

impl BufferRingPool {
    /// Allocate `capacity` buffers of `buf_size` bytes each, page-aligned,
    /// and queue the `ProvideBuffers` SQE that publishes them all to
    /// `group_id`. The caller must still `submit_and_wait` on `engine`
    /// before the kernel will start handing out buffer ids.
    pub fn register(
        engine: &mut RingEngine,
        capacity: u32,
        buf_size: u32,
        group_id: u16,
    ) -> RingResult<Self> {
        if !is_power_of_two(capacity) {
            return Err(RingError::InvalidBufferCapacity(capacity));
        }
        let total = (capacity as usize) * (buf_size as usize);
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let mut ptr: *mut libc::c_void = std::ptr::null_mut();
        let rc = unsafe { libc::posix_memalign(&mut ptr, page_size, total) };
        if rc != 0 || ptr.is_null() {
            return Err(RingError::BufferRingInit("posix_memalign failed"));
        }
        let region = ptr as *mut u8;

        let pool = Self {
            region,
            capacity,
            buf_size,
            group_id,
            borrowed: vec![false; capacity as usize],
        };
        pool.provide(engine, 0, capacity);
        Ok(pool)
    }

    /// Queue a `ProvideBuffers` SQE covering `count` buffers starting at
    /// index `start_id`, letting the kernel draw from them again.
    fn provide(&self, engine: &mut RingEngine, start_id: u16, count: u32) {
        let ptr = unsafe { self.region.add((start_id as usize) * (self.buf_size as usize)) };
        let sqe = opcode::ProvideBuffers::new(ptr, self.buf_size as i32, count as u16, self.group_id, start_id)
            .build()
            .user_data(ring_core::entry::CorrId::NONE.0);
        engine.push_raw(sqe);
    }

    /// The bytes a completed buffer-select recv filled, for `buffer_id`
    /// as reported by the completion flags (`comp_flags::buffer_id`).
    /// `len` is the recv's reported byte count, always `<= buf_size`.
    ///
    /// # Panics
    /// Panics if `buffer_id` is out of range or already borrowed —
    /// both indicate a bug in the caller's bookkeeping, not a runtime
    /// condition to recover from.
    pub fn borrow(&mut self, buffer_id: u16, len: u32) -> &[u8] {
        let idx = buffer_id as usize;
        assert!(idx < self.borrowed.len(), "buffer id {buffer_id} out of range");
        assert!(!self.borrowed[idx], "buffer id {buffer_id} already borrowed");
        self.borrowed[idx] = true;
        let len = len.min(self.buf_size) as usize;
        unsafe {
            let start = self.region.add(idx * self.buf_size as usize);
            std::slice::from_raw_parts(start, len)
        }
    }

    /// Give a previously borrowed buffer back to the kernel's pool.
    pub fn return_buffer(&mut self, engine: &mut RingEngine, buffer_id: u16) {
        let idx = buffer_id as usize;
        assert!(self.borrowed[idx], "returning buffer id {buffer_id} that was not borrowed");
        self.borrowed[idx] = false;
        self.provide(engine, buffer_id, 1);
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn buf_size(&self) -> u32 {
        self.buf_size
    }

    /// Number of buffers currently lent out. Should return to the same
    /// count it held before any handler started, once that handler
    /// finishes.
    pub fn borrowed_count(&self) -> usize {
        self.borrowed.iter().filter(|b| **b).count()
    }
}

impl Drop for BufferRingPool {
    fn drop(&mut self) {
        unsafe { libc::free(self.region as *mut libc::c_void) };
    }
}

thread_local! {
    static POOL: std::cell::RefCell<Option<BufferRingPool>> = const { std::cell::RefCell::new(None) };
}

/// Register this thread's buffer-ring pool. Must be called once per
/// thread, after [`crate::engine::init`]; panics (programmer error) if
/// called twice.
pub fn init(engine: &mut RingEngine, capacity: u32, buf_size: u32, group_id: u16) -> RingResult<()> {
    let pool = BufferRingPool::register(engine, capacity, buf_size, group_id)?;
    POOL.with(|p| {
        let mut slot = p.borrow_mut();
        assert!(slot.is_none(), "buffer-ring pool already initialised on this thread");
        *slot = Some(pool);
    });
    Ok(())
}

/// Borrow this thread's buffer-ring pool. Panics if [`init`] hasn't run.
pub fn with_pool<R>(f: impl FnOnce(&mut BufferRingPool) -> R) -> R {
    POOL.with(|p| {
        let mut slot = p.borrow_mut();
        let pool = slot.as_mut().expect("buffer-ring pool not initialised on this thread");
        f(pool)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_capacity() {
        assert!(!is_power_of_two(1000));
        assert!(is_power_of_two(1024));
    }

    #[test]
    fn borrow_and_return_tracks_the_borrowed_count() {
        // Exercise the bitmap directly without a real ring: construct a
        // pool by hand with a tiny backing region.
        let buf_size = 16u32;
        let capacity = 4u32;
        let total = (capacity as usize) * (buf_size as usize);
        let mut ptr: *mut libc::c_void = std::ptr::null_mut();
        unsafe { libc::posix_memalign(&mut ptr, 4096, total) };
        let mut pool = BufferRingPool {
            region: ptr as *mut u8,
            capacity,
            buf_size,
            group_id: 0,
            borrowed: vec![false; capacity as usize],
        };

        assert_eq!(pool.borrowed_count(), 0);
        let _ = pool.borrow(1, 8);
        assert_eq!(pool.borrowed_count(), 1);
        assert!(pool.borrowed[1]);
    }

    #[test]
    #[should_panic(expected = "already borrowed")]
    fn double_borrow_panics() {
        let buf_size = 16u32;
        let capacity = 2u32;
        let total = (capacity as usize) * (buf_size as usize);
        let mut ptr: *mut libc::c_void = std::ptr::null_mut();
        unsafe { libc::posix_memalign(&mut ptr, 4096, total) };
        let mut pool = BufferRingPool {
            region: ptr as *mut u8,
            capacity,
            buf_size,
            group_id: 0,
            borrowed: vec![false; capacity as usize],
        };
        let _ = pool.borrow(0, 4);
        let _ = pool.borrow(0, 4);
    }
}
