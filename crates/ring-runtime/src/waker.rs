//! Two `Waker` constructions, for the two places this workspace needs one.
//!
//! A ring and its buffer pool are thread-local and coroutines never
//! migrate between rings, so most futures in this workspace are driven
//! by a single thread that also owns the completion drain. Waking one of
//! those is just "poll this slot again, right now, on this thread" — no
//! allocation, no cross-thread signalling, which is what [`slot_waker`]
//! gives you.
//!
//! A thread pool's `schedule()` is the one place a future crosses
//! threads: the pool decides which worker thread will own the rest of a
//! root task's execution. That task's waker has to survive being cloned
//! onto a pool worker and called from wherever the wakeup originates, so
//! [`arc_waker`] builds the ordinary refcounted `Arc`-based waker.

use std::sync::Arc;
use std::task::{RawWaker, RawWakerVTable, Waker};

/// Build a [`Waker`] whose only payload is `slot`, a free-standing index
/// into a thread-local registry. `wake`/`wake_by_ref` call `on_wake(slot)`
/// directly and synchronously — correct only because the registry and
/// this waker never leave the thread that created them.
///
/// `on_wake` is a plain function pointer rather than a closure so the
/// vtable can stay `'static` without boxing anything: it is always
/// `crate::task::wake_slot`.
pub fn slot_waker(slot: u32, on_wake: fn(u32)) -> Waker {
    // Pack `(slot, on_wake)` into one `usize` payload: the function
    // pointer's address is stable for the process lifetime, and we
    // recover `slot` directly from the data pointer's low bits instead,
    // since a real fn pointer and a u32 don't share a data word cleanly.
    // Simpler: stash both behind a leaked thin record. One u64 alloc
    // per detached task's lifetime is the price of a vtable-stable type.
    let packed = Box::new((slot, on_wake));
    let data = Box::into_raw(packed) as *const ();
    unsafe { Waker::from_raw(RawWaker::new(data, &SLOT_VTABLE)) }
}

unsafe fn slot_clone(data: *const ()) -> RawWaker {
    let packed = &*(data as *const (u32, fn(u32)));
    let cloned = Box::new(*packed);
    RawWaker::new(Box::into_raw(cloned) as *const (), &SLOT_VTABLE)
}

unsafe fn slot_wake(data: *const ()) {
    let packed = Box::from_raw(data as *mut (u32, fn(u32)));
    (packed.1)(packed.0);
}

unsafe fn slot_wake_by_ref(data: *const ()) {
    let packed = &*(data as *const (u32, fn(u32)));
    (packed.1)(packed.0);
}

unsafe fn slot_drop(data: *const ()) {
    drop(Box::from_raw(data as *mut (u32, fn(u32))));
}

static SLOT_VTABLE: RawWakerVTable =
    RawWakerVTable::new(slot_clone, slot_wake, slot_wake_by_ref, slot_drop);

/// Anything that can re-enqueue itself for another poll once woken.
/// Implemented by the thread pool's task record; kept as a trait here
/// so `arc_waker` doesn't need to know about `pool::PoolTask`.
pub trait Reschedule: Send + Sync {
    fn reschedule(self: Arc<Self>);
}

/// Build a [`Waker`] backed by a refcounted `Arc<T>`. Cloning the waker
/// clones the `Arc`; waking calls `T::reschedule` on a clone, so the
/// original owner can keep polling while a wakeup is in flight.
pub fn arc_waker<T: Reschedule + 'static>(task: Arc<T>) -> Waker {
    let data = Arc::into_raw(task) as *const ();
    unsafe { Waker::from_raw(RawWaker::new(data, vtable::<T>())) }
}

fn vtable<T: Reschedule + 'static>() -> &'static RawWakerVTable {
    &RawWakerVTable::new(
        clone_arc::<T>,
        wake_arc::<T>,
        wake_by_ref_arc::<T>,
        drop_arc::<T>,
    )
}

unsafe fn clone_arc<T: Reschedule + 'static>(data: *const ()) -> RawWaker {
    Arc::increment_strong_count(data as *const T);
    RawWaker::new(data, vtable::<T>())
}

unsafe fn wake_arc<T: Reschedule + 'static>(data: *const ()) {
    let task = Arc::from_raw(data as *const T);
    task.reschedule();
}

unsafe fn wake_by_ref_arc<T: Reschedule + 'static>(data: *const ()) {
    let task = Arc::from_raw(data as *const T);
    Arc::increment_strong_count(data as *const T);
    task.reschedule();
    std::mem::forget(task);
}

unsafe fn drop_arc<T: Reschedule + 'static>(data: *const ()) {
    drop(Arc::from_raw(data as *const T));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    thread_local! {
        static LAST_WOKEN: std::cell::Cell<Option<u32>> = const { std::cell::Cell::new(None) };
    }

    fn record_wake(slot: u32) {
        LAST_WOKEN.with(|c| c.set(Some(slot)));
    }

    #[test]
    fn slot_waker_invokes_callback_with_its_slot() {
        let waker = slot_waker(7, record_wake);
        waker.wake();
        LAST_WOKEN.with(|c| assert_eq!(c.get(), Some(7)));
    }

    #[test]
    fn slot_waker_wake_by_ref_does_not_consume() {
        let waker = slot_waker(3, record_wake);
        waker.wake_by_ref();
        waker.wake_by_ref();
        LAST_WOKEN.with(|c| assert_eq!(c.get(), Some(3)));
    }

    struct CountingTask {
        count: AtomicU32,
        log: Mutex<Vec<u32>>,
    }

    impl Reschedule for CountingTask {
        fn reschedule(self: Arc<Self>) {
            let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
            self.log.lock().unwrap().push(n);
        }
    }

    #[test]
    fn arc_waker_reschedules_through_clones() {
        let task = Arc::new(CountingTask { count: AtomicU32::new(0), log: Mutex::new(Vec::new()) });
        let waker = arc_waker(task.clone());
        let cloned = waker.clone();
        waker.wake();
        cloned.wake();
        assert_eq!(task.count.load(Ordering::SeqCst), 2);
        assert_eq!(*task.log.lock().unwrap(), vec![1, 2]);
    }
}
