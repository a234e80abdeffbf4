//! Thread pool: fixed worker threads that drive the root coroutines
//! scheduled onto them.
//!
//! A `Mutex<VecDeque<_>>` FIFO plus a `Condvar`, the same shape as any
//! other cross-thread work queue in this workspace: one mutex guards
//! the deque, the condvar wakes a worker on enqueue or on stop.
//!
//! Rust has no bare `coroutine_handle<>` to enqueue, so the queue holds
//! `Arc<RootTask>` instead: a task that has suspended on [`schedule`]
//! wakes itself by pushing its own `Arc` onto the queue (via
//! [`crate::waker::Reschedule`]) rather than resuming in place. A worker
//! popping the queue polls that task directly — for the one root task
//! this workspace ever schedules (a worker's `schedule().await;
//! event_loop()`), that poll call never returns: `event_loop` loops
//! forever, so the worker thread that drew it is consumed for the rest
//! of the process (coroutines never migrate between rings once started).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::task::{Context, Poll};
use std::thread;

use ring_core::log_debug;

use crate::task::Task;
use crate::waker::{arc_waker, Reschedule};

/// One root coroutine that has been handed to the pool. Holds its own
/// queue slot so waking it (via [`Reschedule::reschedule`]) re-enqueues
/// itself instead of resuming synchronously — the actual poll only ever
/// happens on whichever worker thread pops it off the queue.
struct RootTask {
    task: Mutex<Option<Task<()>>>,
    pool: Weak<Inner>,
}

impl RootTask {
    /// Poll once with a waker that reschedules this same task. Safe to
    /// call from any worker thread; the inner mutex serialises a task
    /// against itself if two wakes race onto two different workers.
    fn poll_once(self: &Arc<Self>) {
        let waker = arc_waker(self.clone());
        let mut cx = Context::from_waker(&waker);
        let mut guard = self.task.lock().unwrap();
        if let Some(task) = guard.as_mut() {
            if Pin::new(task).poll(&mut cx).is_ready() {
                *guard = None;
            }
        }
    }
}

impl Reschedule for RootTask {
    fn reschedule(self: Arc<Self>) {
        if let Some(inner) = self.pool.upgrade() {
            inner.enqueue(self);
        }
    }
}

struct Inner {
    queue: Mutex<VecDeque<Arc<RootTask>>>,
    condvar: Condvar,
    stopping: Mutex<bool>,
}

impl Inner {
    fn enqueue(&self, task: Arc<RootTask>) {
        let mut q = self.queue.lock().unwrap();
        q.push_back(task);
        self.condvar.notify_one();
    }
}

/// Fixed pool of worker threads. Construct with the desired
/// thread count; [`schedule`](ThreadPool::schedule) is the only
/// suspension point a coroutine needs to move onto one of them.
pub struct ThreadPool {
    inner: Arc<Inner>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(thread_count: usize) -> Self {
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stopping: Mutex::new(false),
        });

        let workers = (0..thread_count)
            .map(|id| {
                let inner = inner.clone();
                thread::Builder::new()
                    .name(format!("ring-pool-{id}"))
                    .spawn(move || worker_loop(inner))
                    .expect("failed to spawn thread-pool worker")
            })
            .collect();

        Self { inner, workers }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Suspend the calling coroutine and resume it on whichever worker
    /// thread next pops the queue.
    pub fn schedule(&self) -> Schedule {
        Schedule { inner: self.inner.clone(), submitted: false }
    }

    /// A cheap, `'static` handle that can call [`schedule`](Self::schedule)
    /// from inside a root coroutine without borrowing the `ThreadPool`
    /// itself (whose `Drop` joins every worker thread).
    pub fn handle(&self) -> PoolHandle {
        PoolHandle { inner: self.inner.clone() }
    }

    /// Hand a freshly-constructed root coroutine to the pool and give it
    /// its first poll on the calling thread — matching the reference
    /// source's eager `task.resume()` right after construction. The task
    /// is expected to immediately `.await` [`schedule`](Self::schedule),
    /// so this first poll normally returns `Pending` having already
    /// enqueued itself.
    pub fn spawn_root(&self, fut: impl Future<Output = ()> + 'static) {
        let root = Arc::new(RootTask {
            task: Mutex::new(Some(Task::new(fut))),
            pool: Arc::downgrade(&self.inner),
        });
        root.poll_once();
    }
}

/// See [`ThreadPool::handle`].
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<Inner>,
}

impl PoolHandle {
    pub fn schedule(&self) -> Schedule {
        Schedule { inner: self.inner.clone(), submitted: false }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        *self.inner.stopping.lock().unwrap() = true;
        self.inner.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inner: Arc<Inner>) {
    loop {
        let task = {
            let mut q = inner.queue.lock().unwrap();
            loop {
                if let Some(task) = q.pop_front() {
                    break Some(task);
                }
                if *inner.stopping.lock().unwrap() {
                    break None;
                }
                q = inner.condvar.wait(q).unwrap();
            }
        };
        let Some(task) = task else {
            log_debug!("thread pool worker stopping");
            return;
        };
        task.poll_once();
    }
}

/// Awaitable returned by [`ThreadPool::schedule`]. `ready?` is always
/// false: the first poll always enqueues and suspends; the
/// second poll (driven by whichever worker popped this task) resumes.
pub struct Schedule {
    inner: Arc<Inner>,
    submitted: bool,
}

impl Future for Schedule {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = unsafe { self.get_unchecked_mut() };
        if !this.submitted {
            this.submitted = true;
            // Reuses the same waker that is driving the enclosing
            // RootTask: waking it invokes `RootTask::reschedule`, which
            // is exactly "enqueue me for a worker to resume".
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        Poll::Ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn schedule_moves_the_task_onto_a_worker_thread() {
        let pool = ThreadPool::new(2);
        let handle = pool.handle();
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = done.clone();
        pool.spawn_root(async move {
            handle.schedule().await;
            done2.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..100 {
            if done.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(done.load(Ordering::SeqCst), 1);
        drop(pool);
    }

    #[test]
    fn task_with_no_await_completes_on_the_eager_first_poll() {
        let pool = ThreadPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = done.clone();
        pool.spawn_root(async move {
            done2.fetch_add(1, Ordering::SeqCst);
        });
        // The task ran synchronously to completion on `spawn_root`'s
        // eager first poll since it never awaits anything.
        assert_eq!(done.load(Ordering::SeqCst), 1);
        drop(pool);
    }

    #[test]
    fn pool_size_matches_thread_count() {
        let pool = ThreadPool::new(3);
        assert_eq!(pool.size(), 3);
    }

    #[test]
    fn drop_joins_all_workers_even_when_queue_is_empty() {
        let pool = ThreadPool::new(4);
        drop(pool); // must return promptly, not hang
    }
}
