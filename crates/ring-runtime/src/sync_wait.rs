//! Sync-wait: block an OS thread on a coroutine until it completes.
//!
//! Eager: the first poll happens the instant `sync_wait` is called. Rust
//! has no `std::atomic_flag::wait`, so the wake side parks/unparks the
//! calling thread directly — the nearest std equivalent to "block this
//! one thread until a flag flips" and the same mechanism
//! `futures::executor::block_on` uses for the same job.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, Thread};

use crate::waker::{arc_waker, Reschedule};

struct WaitState {
    done: AtomicBool,
    thread: Thread,
}

impl Reschedule for WaitState {
    fn reschedule(self: Arc<Self>) {
        // A wake here just means "poll again"; `sync_wait`'s own loop
        // re-polls after every park, so all there is to do is unpark it.
        self.thread.unpark();
    }
}

/// Drive `fut` to completion on the calling thread, blocking it in
/// between polls. Eager by construction: the first poll happens before
/// this function does anything else.
pub fn sync_wait<V>(fut: impl Future<Output = V>) -> V {
    let mut fut = std::pin::pin!(fut);
    let state = Arc::new(WaitState { done: AtomicBool::new(false), thread: thread::current() });
    let waker = arc_waker(state.clone());
    let mut cx = Context::from_waker(&waker);

    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(value) => {
                state.done.store(true, Ordering::Release);
                return value;
            }
            Poll::Pending => {
                // A wake that lands between the poll above and the park
                // below would otherwise be lost; `park` returning
                // spuriously is explicitly allowed by std and exactly
                // what we want here — it just causes one extra poll.
                thread::park();
            }
        }
    }
}

/// Await several tasks to completion, one after another. Not
/// concurrent — each task is driven to completion before the next one
/// is even polled once.
pub fn sync_wait_all<V>(futures: Vec<Pin<Box<dyn Future<Output = V>>>>) -> Vec<V> {
    futures.into_iter().map(sync_wait).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_the_awaited_value() {
        assert_eq!(sync_wait(async { 7 }), 7);
    }

    #[test]
    fn resolves_a_future_that_is_pending_on_first_poll() {
        struct PendingOnce(std::cell::Cell<bool>);
        impl Future for PendingOnce {
            type Output = &'static str;
            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<&'static str> {
                if self.0.get() {
                    Poll::Ready("done")
                } else {
                    self.0.set(true);
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }
        }
        assert_eq!(sync_wait(PendingOnce(std::cell::Cell::new(false))), "done");
    }

    #[test]
    fn sync_wait_all_preserves_order() {
        let a: Pin<Box<dyn Future<Output = i32>>> = Box::pin(async { 1 });
        let b: Pin<Box<dyn Future<Output = i32>>> = Box::pin(async { 2 });
        assert_eq!(sync_wait_all(vec![a, b]), vec![1, 2]);
    }
}
