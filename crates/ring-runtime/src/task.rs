//! Coroutine task abstraction and the detached-task registry.
//!
//! A suspendable computation with exactly one waiting party at a time.
//! Rust's `Future`/`Poll`/`Waker` is that contract with the compiler
//! generating the state machine instead of a hand-rolled coroutine
//! frame, so `Task<V>` is a thin boundary type rather than a
//! reimplementation: every intra-coroutine `.await` (a handler awaiting
//! `recv()` then `send()`) is native Rust async composition and needs
//! no `Task` wrapper at all. `Task<V>` only shows up at the two
//! boundaries that need type erasure or explicit lifetime rules — a
//! detached fire-and-forget root (`spawn_detached`) and a structured
//! root driven to completion (`sync_wait`).
//!
//! Detached tasks must stay pinned to the ring/thread that spawned
//! them, so they are kept in a thread-local slab (`Vec<Option<_>>` plus
//! a free list) rather than behind a shared, refcounted handle.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::waker::slot_waker;

/// A boxed, type-erased future used at a structured-root or detached
/// boundary. Not `Send` — a `Task` only ever runs on the thread that
/// created it, matching every non-pool-scheduled coroutine in this
/// workspace.
pub struct Task<V> {
    inner: Pin<Box<dyn Future<Output = V>>>,
}

impl<V> Task<V> {
    pub fn new(fut: impl Future<Output = V> + 'static) -> Self {
        Self { inner: Box::pin(fut) }
    }

    /// Poll once. Stays `Pending` while suspended.
    pub fn poll_once(&mut self, cx: &mut Context<'_>) -> Poll<V> {
        self.inner.as_mut().poll(cx)
    }
}

impl<V> Future for Task<V> {
    type Output = V;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<V> {
        self.inner.as_mut().poll(cx)
    }
}

type DetachedFuture = Pin<Box<dyn Future<Output = ()>>>;

struct Registry {
    slots: Vec<Option<DetachedFuture>>,
    /// Set when `wake_slot` fires while the slot's future is out being
    /// polled (a future that wakes itself synchronously, e.g. to yield
    /// once). Checked by `drive_slot` after `poll` returns so that wake
    /// is never lost just because the slot was temporarily empty.
    pending_wake: Vec<bool>,
    /// True while `drive_slot` holds this slot's future out for polling.
    polling: Vec<bool>,
    free: Vec<u32>,
}

impl Registry {
    const fn new() -> Self {
        Self { slots: Vec::new(), pending_wake: Vec::new(), polling: Vec::new(), free: Vec::new() }
    }

    fn insert(&mut self, fut: DetachedFuture) -> u32 {
        if let Some(id) = self.free.pop() {
            let i = id as usize;
            self.slots[i] = Some(fut);
            self.pending_wake[i] = false;
            self.polling[i] = false;
            id
        } else {
            self.slots.push(Some(fut));
            self.pending_wake.push(false);
            self.polling.push(false);
            (self.slots.len() - 1) as u32
        }
    }

    /// Take the future out of its slot so a nested call (a handler
    /// spawning another detached task while being polled) can't hit a
    /// re-entrant borrow of the same `RefCell`. Marks the slot as
    /// mid-poll so a synchronous self-wake is recorded instead of lost.
    fn take_for_poll(&mut self, id: u32) -> Option<DetachedFuture> {
        let i = id as usize;
        let fut = self.slots.get_mut(i)?.take()?;
        self.pending_wake[i] = false;
        self.polling[i] = true;
        Some(fut)
    }

    fn put_back(&mut self, id: u32, fut: DetachedFuture) {
        self.slots[id as usize] = Some(fut);
        self.polling[id as usize] = false;
    }

    fn retire(&mut self, id: u32) {
        self.slots[id as usize] = None;
        self.polling[id as usize] = false;
        self.free.push(id);
    }

    /// Returns `true` if the wake was swallowed by an in-progress poll
    /// (caller should loop), `false` if the slot was idle (caller should
    /// drive a fresh poll) or gone (caller has nothing to do).
    fn mark_woken_or_idle(&mut self, id: u32) -> WakeOutcome {
        let i = id as usize;
        if i >= self.polling.len() {
            return WakeOutcome::Gone;
        }
        if self.polling[i] {
            self.pending_wake[i] = true;
            WakeOutcome::Coalesced
        } else if self.slots[i].is_some() {
            WakeOutcome::Idle
        } else {
            WakeOutcome::Gone
        }
    }

    fn take_pending_wake(&mut self, id: u32) -> bool {
        let i = id as usize;
        std::mem::replace(&mut self.pending_wake[i], false)
    }
}

enum WakeOutcome {
    /// Recorded against an in-flight poll; that poll's caller will retry.
    Coalesced,
    /// Slot is idle with a future present; caller should drive a poll.
    Idle,
    /// Slot retired or never existed; nothing to do.
    Gone,
}

thread_local! {
    static REGISTRY: RefCell<Registry> = const { RefCell::new(Registry::new()) };
}

/// Start `fut` immediately and, if it doesn't finish on the first poll,
/// register it for future wakeups on this thread. Starting and
/// registering happen as one call: there is no window where the task
/// has started but isn't yet registered to be woken, which a two-step
/// start-then-register API would allow if a completion raced the
/// registration.
pub fn spawn_detached(fut: impl Future<Output = ()> + 'static) {
    let boxed: DetachedFuture = Box::pin(fut);
    REGISTRY.with(|r| {
        let id = r.borrow_mut().insert(boxed);
        drive_slot(id);
    });
}

/// Poll the future in `id`, retiring the slot on completion and leaving
/// it registered (with a fresh waker for next time) on `Pending`. Loops
/// if the future woke its own slot synchronously during the poll, so
/// that self-wakes are never dropped just because the slot was briefly
/// empty while out for polling.
fn drive_slot(id: u32) {
    loop {
        let fut = REGISTRY.with(|r| r.borrow_mut().take_for_poll(id));
        let Some(mut fut) = fut else {
            // Already being driven by an outer frame, or retired.
            return;
        };
        let waker = slot_waker(id, wake_slot);
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                REGISTRY.with(|r| r.borrow_mut().retire(id));
                return;
            }
            Poll::Pending => {
                let woken_again = REGISTRY.with(|r| {
                    let mut reg = r.borrow_mut();
                    reg.put_back(id, fut);
                    reg.take_pending_wake(id)
                });
                if !woken_again {
                    return;
                }
                // A synchronous self-wake arrived while we were polling;
                // poll again instead of waiting for an external wakeup.
            }
        }
    }
}

/// The function pointer every slot waker carries (see `waker::slot_waker`).
pub(crate) fn wake_slot(id: u32) {
    let outcome = REGISTRY.with(|r| r.borrow_mut().mark_woken_or_idle(id));
    if let WakeOutcome::Idle = outcome {
        drive_slot(id);
    }
}

/// Number of detached tasks currently registered on this thread.
/// Exposed for tests and diagnostics; not part of the public surface.
#[cfg(test)]
fn detached_count() -> usize {
    REGISTRY.with(|r| {
        let reg = r.borrow();
        reg.slots.iter().filter(|s| s.is_some()).count()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn task_completes_synchronously_when_never_pending() {
        let mut t = Task::new(async { 42 });
        let waker = slot_waker(0, |_| {});
        let mut cx = Context::from_waker(&waker);
        assert_eq!(t.poll_once(&mut cx), Poll::Ready(42));
    }

    #[test]
    fn spawn_detached_retires_immediately_ready_futures() {
        let before = detached_count();
        spawn_detached(async {});
        assert_eq!(detached_count(), before);
    }

    #[test]
    fn spawn_detached_keeps_pending_futures_registered() {
        // A future that is Pending on first poll and never wakes itself
        // stays registered until something external wakes its slot.
        struct NeverReady;
        impl Future for NeverReady {
            type Output = ();
            fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
                Poll::Pending
            }
        }
        let before = detached_count();
        spawn_detached(NeverReady);
        assert_eq!(detached_count(), before + 1);
    }

    #[test]
    fn synchronous_self_wake_during_poll_is_not_lost() {
        // Wakes its own slot from inside `poll` before returning Pending;
        // drive_slot must loop and poll again rather than drop the wake.
        let ran = Rc::new(Cell::new(false));
        let ran2 = ran.clone();
        struct PendingThenReady {
            flag: Rc<Cell<bool>>,
            polled_once: Cell<bool>,
        }
        impl Future for PendingThenReady {
            type Output = ();
            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                if self.polled_once.get() {
                    self.flag.set(true);
                    Poll::Ready(())
                } else {
                    self.polled_once.set(true);
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }
        }
        let before = detached_count();
        spawn_detached(PendingThenReady { flag: ran2, polled_once: Cell::new(false) });
        assert!(ran.get(), "self-wake during poll should drive a second poll immediately");
        assert_eq!(detached_count(), before);
    }
}
