//! Ring engine: the per-thread `io_uring` submission/completion loop.
//! One engine per worker thread, stored thread-local — rings never
//! cross threads, so there's no lock here at all.
//!
//! A thin wrapper around `io_uring::IoUring` (builder, `submit()`,
//! completion iteration, `AsyncCancel`) narrowed from a generic syscall
//! dispatcher down to the three fixed operations this workspace needs:
//! multishot accept, buffer-select recv, and send.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;

use io_uring::{cqueue, opcode, squeue, types, IoUring};
use ring_core::entry::{comp_flags, CompletionEntry, CorrId, SubmitEntry};
use ring_core::error::{RingError, RingResult};
use ring_core::log_warn;

/// Submission queue depth: 2048.
pub const SQ_ENTRIES: u32 = 2048;

/// One connection's worth of completion routing: the address of the
/// `SubmitEntry` an awaitable owns, recovered from `user_data`.
fn entry_from_corr_id(corr_id: CorrId) -> &'static mut SubmitEntry {
    // Safety: every corr_id this engine ever sees was produced by
    // `submit_*` from `&mut SubmitEntry as *mut _ as u64` on an entry
    // the caller keeps pinned until its completion arrives. Resolving
    // it back is a pointer cast, not a table lookup.
    unsafe { &mut *(corr_id.0 as *mut SubmitEntry) }
}

/// Per-thread `io_uring` wrapper. Construct with [`RingEngine::new`] and
/// store it behind the thread-local accessor in this module — never
/// share one across threads.
pub struct RingEngine {
    ring: IoUring,
    backlog: VecDeque<squeue::Entry>,
}

impl RingEngine {
    pub fn new(sq_entries: u32) -> RingResult<Self> {
        let ring = IoUring::builder()
            .build(sq_entries)
            .map_err(|e| RingError::RingInit(e.raw_os_error().unwrap_or(-1)))?;
        Ok(Self { ring, backlog: VecDeque::new() })
    }

    /// Push a pre-built SQE, falling back to the backlog if the
    /// submission queue is momentarily full. Exposed to sibling modules
    /// (`buffers::BufferRingPool`) that build their own opcodes instead
    /// of going through `submit_*`.
    pub(crate) fn push_raw(&mut self, sqe: squeue::Entry) {
        self.push(sqe);
    }

    fn push(&mut self, sqe: squeue::Entry) {
        unsafe {
            if self.ring.submission().push(&sqe).is_err() {
                self.backlog.push_back(sqe);
            }
        }
    }

    fn drain_backlog(&mut self) {
        while let Some(sqe) = self.backlog.pop_front() {
            unsafe {
                if self.ring.submission().push(&sqe).is_err() {
                    self.backlog.push_front(sqe);
                    break;
                }
            }
        }
    }

    /// Register an accept loop that keeps producing connections until
    /// cancelled, without the caller resubmitting after every accept.
    /// The entry's `corr_id` is the completion's `user_data` for every
    /// connection this multishot request ever yields.
    pub fn submit_accept_multishot(&mut self, listener: RawFd, entry: &mut SubmitEntry) {
        let corr_id = entry as *mut SubmitEntry as u64;
        let sqe = opcode::AcceptMulti::new(types::Fd(listener)).build().user_data(corr_id);
        self.push(sqe);
    }

    /// Issue one buffer-select recv: the kernel picks a buffer from
    /// `buf_group` once `fd` is readable and reports which one in the
    /// completion flags.
    pub fn submit_recv_select(&mut self, fd: RawFd, buf_group: u16, entry: &mut SubmitEntry) {
        let corr_id = entry as *mut SubmitEntry as u64;
        let sqe = opcode::Recv::new(types::Fd(fd), std::ptr::null_mut(), 0)
            .buf_group(buf_group)
            .build()
            .flags(squeue::Flags::BUFFER_SELECT)
            .user_data(corr_id);
        self.push(sqe);
    }

    /// Send `len` bytes from `buf` on `fd`.
    ///
    /// # Safety
    /// `buf` must stay valid and unmoved until the completion for this
    /// `entry` arrives; the awaitable pins the buffer for that long.
    pub unsafe fn submit_send(&mut self, fd: RawFd, buf: *const u8, len: u32, entry: &mut SubmitEntry) {
        let corr_id = entry as *mut SubmitEntry as u64;
        let sqe = opcode::Send::new(types::Fd(fd), buf, len).build().user_data(corr_id);
        self.push(sqe);
    }

    /// Open `path` (a NUL-terminated C string) read-only through the
    /// ring.
    ///
    /// # Safety
    /// `path` must stay valid and unmoved until the completion for this
    /// `entry` arrives.
    pub unsafe fn submit_openat(&mut self, path: *const libc::c_char, entry: &mut SubmitEntry) {
        let corr_id = entry as *mut SubmitEntry as u64;
        let sqe = opcode::OpenAt::new(types::Fd(libc::AT_FDCWD), path)
            .flags(libc::O_RDONLY)
            .build()
            .user_data(corr_id);
        self.push(sqe);
    }

    /// Poll `fd` for readability. Used to give the event loop a way to
    /// wake from `submit_and_wait` on something other than client
    /// traffic — the stop-token eventfd — without the loop itself ever
    /// polling with a plain syscall.
    pub fn submit_poll_readable(&mut self, fd: RawFd, entry: &mut SubmitEntry) {
        let corr_id = entry as *mut SubmitEntry as u64;
        let sqe = opcode::PollAdd::new(types::Fd(fd), libc::POLLIN as u32).build().user_data(corr_id);
        self.push(sqe);
    }

    /// Splice up to `len` bytes from `fd_in` to `fd_out`.
    pub fn submit_splice(&mut self, fd_in: RawFd, fd_out: RawFd, len: u32, entry: &mut SubmitEntry) {
        let corr_id = entry as *mut SubmitEntry as u64;
        let sqe = opcode::Splice::new(types::Fd(fd_in), -1, types::Fd(fd_out), -1, len)
            .build()
            .user_data(corr_id);
        self.push(sqe);
    }

    /// Ask the kernel to cancel the operation tagged with `target`.
    /// The cancel's own completion is tagged `CorrId::NONE` and
    /// silently dropped by `drain_completions` — the caller only cares
    /// about the *target* operation's eventual (cancelled) completion.
    pub fn submit_cancel(&mut self, target: CorrId) {
        let sqe = opcode::AsyncCancel::new(target.0).build().user_data(CorrId::NONE.0);
        self.push(sqe);
    }

    /// Flush submissions and block until at least one completion is
    /// ready. Returns the number of completions available to drain;
    /// `0` only if `submit_and_wait` was asked to wait for 0.
    pub fn submit_and_wait(&mut self, want: usize) -> RingResult<usize> {
        self.drain_backlog();
        self.ring
            .submit_and_wait(want)
            .map_err(|e| RingError::SubmitFailed(e.raw_os_error().unwrap_or(-1)))
    }

    /// Drain every completion currently queued, resolving each one back
    /// to its `SubmitEntry` and recording its result/flags there.
    ///
    /// Returns the wakers to resume, collected rather than invoked here:
    /// a slot-waker's `wake()` polls the waiting future in place, which
    /// re-enters this engine (a resubmit from `Accept`/`Recv`/`Send`'s
    /// `poll`, a `return_buffer`, a freshly spawned detached task). The
    /// caller holds this engine behind a `RefCell` (`with_engine`), so
    /// running a completion's waker while still inside this `&mut self`
    /// call would double-borrow it on the very first accepted
    /// connection. The caller must drop its borrow of this engine
    /// before waking anything returned here — see `with_engine`'s docs.
    pub fn drain_completions(&mut self) -> Vec<std::task::Waker> {
        let cq = self.ring.completion();
        let completions: Vec<CompletionEntry> = cq
            .map(|cqe| CompletionEntry {
                corr_id: CorrId(cqe.user_data()),
                result: cqe.result(),
                flags: cqe.flags(),
            })
            .collect();

        let mut wakers = Vec::with_capacity(completions.len());
        for c in completions {
            if c.corr_id == CorrId::NONE {
                continue; // cancel-request completion, nothing to wake
            }
            let entry = entry_from_corr_id(c.corr_id);
            entry.result = c.result;
            entry.flags = c.flags;
            if c.result < 0 && c.result != -(libc::ENOBUFS) {
                log_warn!("completion {:#x} failed: {}", c.corr_id.0, c.result);
            }
            if let Some(waker) = entry.waker.take() {
                wakers.push(waker);
            }
        }
        wakers
    }
}

/// True if a multishot completion promises more completions on the
/// same request; false means the guard must resubmit.
pub fn more_coming(flags: u32) -> bool {
    cqueue::more(flags)
}

thread_local! {
    static ENGINE: std::cell::RefCell<Option<RingEngine>> = const { std::cell::RefCell::new(None) };
}

/// Initialise this thread's engine. Must be called once per thread
/// before any `with_engine` call; panics (programmer error, not a
/// `RingError`) if called twice.
pub fn init(sq_entries: u32) -> RingResult<()> {
    let engine = RingEngine::new(sq_entries)?;
    ENGINE.with(|e| {
        let mut slot = e.borrow_mut();
        assert!(slot.is_none(), "ring engine already initialised on this thread");
        *slot = Some(engine);
    });
    Ok(())
}

/// Borrow this thread's engine. Panics if [`init`] hasn't run yet.
///
/// `f` must not, directly or indirectly, wake a completion's waker
/// while still running: a slot-waker's `wake()` polls a future in
/// place, and that poll can call back into `with_engine` (a resubmit, a
/// `return_buffer`, a freshly spawned detached task). Nesting two
/// `with_engine` calls double-borrows this thread-local `RefCell` and
/// panics. `drain_completions` follows this rule by returning its
/// wakers instead of invoking them; run them only after `f` (and this
/// call) has returned.
pub fn with_engine<R>(f: impl FnOnce(&mut RingEngine) -> R) -> R {
    ENGINE.with(|e| {
        let mut slot = e.borrow_mut();
        let engine = slot.as_mut().expect("ring engine not initialised on this thread");
        f(engine)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corr_id_round_trips_through_entry_address() {
        let mut entry = SubmitEntry::new();
        let corr_id = CorrId(&mut entry as *mut SubmitEntry as u64);
        let recovered = entry_from_corr_id(corr_id);
        recovered.result = 7;
        assert_eq!(entry.result, 7);
    }

    #[test]
    fn more_coming_reads_the_more_bit() {
        assert!(!more_coming(0));
        assert!(more_coming(comp_flags::MORE));
    }
}
