//! Accept/recv/send awaitables: one `Future` per I/O operation, each
//! owning an address-stable [`SubmitEntry`] for as long as it is
//! pinned. The first `poll` submits and returns `Pending`; later polls
//! only run once the engine's completion drain has written a fresh
//! result into the entry and woken this future's waker.
//!
//! # The synchronous-wake invariant
//!
//! `RingEngine::drain_completions` returns one waker per completion, in
//! the order the kernel delivered them, for the caller to invoke *after*
//! releasing its borrow of the engine (`wake()` on a slot-waker polls
//! the waiting future in place, and that poll typically re-enters the
//! engine — a resubmit, a `return_buffer`, a new detached spawn — which
//! would double-borrow the engine's thread-local `RefCell` if still
//! held). For a persistent submission like [`AcceptMultishot`] that can
//! have several completions queued before this future is polled again,
//! correctness also depends on `wake()` driving a fresh `poll`
//! *synchronously*, so the entry's waker is re-armed before the caller
//! moves on to the next completion for the same `corr_id`.
//! `crate::task::spawn_detached`'s slot registry gives exactly that: its
//! waker's `wake()` re-polls the slot immediately, in place. Every task
//! that awaits these futures must go through that registry (or an
//! equivalent synchronous driver) for this reason — a deferred "mark
//! runnable, poll later" executor would drop completions that land
//! before the next poll.

use std::future::Future;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::task::{Context, Poll};

use ring_core::entry::{comp_flags, SubmitEntry};

use crate::buffers::GROUP_ID;
use crate::engine;

/// Outcome of one buffer-select recv.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// Peer sent `length` bytes into buffer `buffer_id`.
    Data { buffer_id: u16, length: u32 },
    /// Peer closed (`res == 0`).
    Closed,
    /// `res < 0`: a raw, signed `errno`, never coerced through an
    /// unsigned type anywhere on this path.
    Err(i32),
}

/// A long-lived multishot accept request on one listening socket.
/// Call [`accept`](Self::accept) in a loop; each call returns a fresh
/// [`Accept`] future sharing this guard's entry and armed state.
pub struct AcceptMultishot {
    listener: RawFd,
    entry: SubmitEntry,
    armed: bool,
}

impl AcceptMultishot {
    pub fn new(listener: RawFd) -> Self {
        Self { listener, entry: SubmitEntry::new(), armed: false }
    }

    pub fn accept(&mut self) -> Accept<'_> {
        Accept { guard: self }
    }
}

impl Drop for AcceptMultishot {
    fn drop(&mut self) {
        if self.armed {
            let corr_id = ring_core::entry::CorrId(&mut self.entry as *mut SubmitEntry as u64);
            engine::with_engine(|e| e.submit_cancel(corr_id));
        }
    }
}

pub struct Accept<'a> {
    guard: &'a mut AcceptMultishot,
}

impl Future for Accept<'_> {
    /// Accepted descriptor, or a negative `errno`.
    type Output = i32;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<i32> {
        let this = unsafe { self.get_unchecked_mut() };
        let guard = &mut *this.guard;
        if !guard.armed {
            guard.entry.waker = Some(cx.waker().clone());
            engine::with_engine(|e| e.submit_accept_multishot(guard.listener, &mut guard.entry));
            guard.armed = true;
            return Poll::Pending;
        }
        if guard.entry.waker.is_some() {
            // Armed, but no completion has landed yet for this poll.
            guard.entry.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let result = guard.entry.result;
        let more = engine::more_coming(guard.entry.flags);
        if !more {
            // The kernel won't deliver another completion on this
            // request until it's resubmitted.
            engine::with_engine(|e| e.submit_accept_multishot(guard.listener, &mut guard.entry));
        }
        guard.entry.waker = Some(cx.waker().clone());
        Poll::Ready(result)
    }
}

/// One buffer-select recv on `fd`. Fresh per call — unlike accept, a
/// recv is not multishot, so each await issues its own submission.
pub struct Recv {
    entry: SubmitEntry,
    fd: RawFd,
    submitted: bool,
}

impl Recv {
    pub fn new(fd: RawFd) -> Self {
        Self { entry: SubmitEntry::new(), fd, submitted: false }
    }
}

impl Future for Recv {
    type Output = RecvOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RecvOutcome> {
        let this = unsafe { self.get_unchecked_mut() };
        if !this.submitted {
            this.entry.waker = Some(cx.waker().clone());
            engine::with_engine(|e| e.submit_recv_select(this.fd, GROUP_ID, &mut this.entry));
            this.submitted = true;
            return Poll::Pending;
        }
        let result = this.entry.result;
        let flags = this.entry.flags;
        let outcome = if result < 0 {
            RecvOutcome::Err(result)
        } else if result == 0 {
            RecvOutcome::Closed
        } else if flags & comp_flags::BUFFER != 0 {
            RecvOutcome::Data { buffer_id: comp_flags::buffer_id(flags), length: result as u32 }
        } else {
            // No buffer selected despite res > 0 would mean the kernel
            // or the submission is misconfigured; treat as a hard error
            // rather than guessing a buffer id.
            RecvOutcome::Err(-(libc::EINVAL))
        };
        Poll::Ready(outcome)
    }
}

/// Send `buf` on `fd`.
pub struct Send<'a> {
    entry: SubmitEntry,
    fd: RawFd,
    buf: &'a [u8],
    submitted: bool,
}

impl<'a> Send<'a> {
    pub fn new(fd: RawFd, buf: &'a [u8]) -> Self {
        Self { entry: SubmitEntry::new(), fd, buf, submitted: false }
    }
}

impl Future for Send<'_> {
    /// Bytes sent, or a negative `errno`.
    type Output = i32;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<i32> {
        let this = unsafe { self.get_unchecked_mut() };
        if !this.submitted {
            this.entry.waker = Some(cx.waker().clone());
            let ptr = this.buf.as_ptr();
            let len = this.buf.len() as u32;
            // Safety: `this.buf` outlives the submission because `this`
            // (and therefore the slice it was built from) stays pinned
            // until this future resolves or is dropped; dropping a send
            // mid-flight is a known resource-lifetime risk this
            // workspace accepts, same as the guard's cancel-on-drop for
            // accept.
            engine::with_engine(|e| unsafe { e.submit_send(this.fd, ptr, len, &mut this.entry) });
            this.submitted = true;
            return Poll::Pending;
        }
        Poll::Ready(this.entry.result)
    }
}

/// One poll-for-readable on `fd`. Fresh per call, same shape as
/// [`Recv`]/[`Send`] — no multishot variant exists for `PollAdd` in this
/// workspace, so a long-lived watcher re-awaits a fresh instance in a
/// loop instead of a persistent guard.
pub struct PollReadable {
    entry: SubmitEntry,
    fd: RawFd,
    submitted: bool,
}

impl PollReadable {
    pub fn new(fd: RawFd) -> Self {
        Self { entry: SubmitEntry::new(), fd, submitted: false }
    }
}

impl Future for PollReadable {
    /// The ready mask, or a negative `errno`.
    type Output = i32;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<i32> {
        let this = unsafe { self.get_unchecked_mut() };
        if !this.submitted {
            this.entry.waker = Some(cx.waker().clone());
            engine::with_engine(|e| e.submit_poll_readable(this.fd, &mut this.entry));
            this.submitted = true;
            return Poll::Pending;
        }
        Poll::Ready(this.entry.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_outcome_distinguishes_close_from_error() {
        assert_eq!(RecvOutcome::Closed, RecvOutcome::Closed);
        assert_ne!(RecvOutcome::Closed, RecvOutcome::Err(-1));
    }

    #[test]
    fn recv_outcome_carries_buffer_and_length() {
        let outcome = RecvOutcome::Data { buffer_id: 3, length: 128 };
        match outcome {
            RecvOutcome::Data { buffer_id, length } => {
                assert_eq!(buffer_id, 3);
                assert_eq!(length, 128);
            }
            _ => panic!("expected Data"),
        }
    }
}
