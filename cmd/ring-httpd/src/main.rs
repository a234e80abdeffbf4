//! Process entry point: argv/env config, signal handling, and starting
//! one root coroutine per worker thread on the shared thread pool.

mod config;
mod http;
mod socket;
mod worker;

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use ring_core::log_info;
use ring_runtime::ThreadPool;

use config::Config;

static STOP: AtomicBool = AtomicBool::new(false);

/// The stop-token eventfd's fd, stashed here because a signal handler
/// can't safely reach a heap-allocated `Arc`/closure — a plain atomic
/// read is the only thing it's allowed to do. Written once, before
/// `install_signal_handlers` runs; `-1` means "not armed yet".
static STOP_EVENTFD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn handle_stop_signal(_sig: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
    // Same notify-by-write as `ksvc-module::eventfd_notifier::EventFdNotifier`,
    // inlined here since a signal handler can't call through a `Notifier`
    // trait object without risking an allocation on the signal stack.
    // `write()` of a fixed-size buffer is on POSIX's async-signal-safe list.
    let fd = STOP_EVENTFD.load(Ordering::Relaxed);
    if fd >= 0 {
        let one: u64 = 1;
        unsafe {
            libc::write(fd, &one as *const u64 as *const libc::c_void, std::mem::size_of::<u64>());
        }
    }
}

fn install_signal_handlers() {
    use nix::sys::signal::{signal, SigHandler, Signal};
    unsafe {
        let _ = signal(Signal::SIGINT, SigHandler::Handler(handle_stop_signal));
        let _ = signal(Signal::SIGTERM, SigHandler::Handler(handle_stop_signal));
        let _ = signal(Signal::SIGPIPE, SigHandler::SigIgn);
    }
}

fn main() {
    ring_core::log::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match Config::parse(&args) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("ring-httpd: {e}");
            std::process::exit(1);
        }
    };

    let stop_eventfd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
    if stop_eventfd < 0 {
        eprintln!("ring-httpd: eventfd() failed: {}", std::io::Error::last_os_error());
        std::process::exit(1);
    }
    STOP_EVENTFD.store(stop_eventfd, Ordering::Relaxed);

    install_signal_handlers();

    let mode = match &config.dir {
        Some(dir) => format!("static({})", dir.display()),
        None => "echo".to_string(),
    };
    log_info!("ring-httpd: port={} threads={} mode={mode}", config.port, config.threads);

    serve(config, stop_eventfd);
    unsafe { libc::close(stop_eventfd) };

    log_info!("shutdown complete");
}

/// Top-level entry: build one root coroutine per worker thread, hand
/// each to the thread pool's queue, then block until every worker's
/// event loop has observed the stop token and returned.
fn serve(config: Arc<Config>, stop_eventfd: RawFd) {
    let pool = ThreadPool::new(config.threads);

    for worker_id in 0..config.threads {
        let config = config.clone();
        let handle = pool.handle();
        let stop = stop_handle(stop_eventfd);
        pool.spawn_root(async move {
            // The one suspension point that crosses threads — everything
            // after this pins to whichever ring the worker owns, since
            // coroutines never migrate between rings once started.
            handle.schedule().await;
            worker::run(config, worker_id as u32, stop, stop_eventfd);
        });
    }

    // `ThreadPool::drop` joins every worker; each worker only returns
    // from `worker::run` once its event loop observes the stop token
    // (each worker keeps its own `PollAdd` on `stop_eventfd` outstanding
    // so it wakes from an idle `submit_and_wait` instead of parking in
    // it forever — see `worker::watch_stop`).
    drop(pool);
}

/// The process-wide stop token observed cooperatively by every worker's
/// event loop between `submit_and_wait` calls.
///
/// `STOP` itself is a `'static` atomic, not an `Arc`; every worker gets
/// its own `Arc` wrapping a thin relay so `worker::run`'s signature
/// stays decoupled from this process-global static. The relay thread
/// blocks on `poll(2)` against `stop_eventfd` rather than polling
/// `STOP` on a timer: the same write that wakes every worker's ring
/// also wakes this thread, so the `Arc` flips the instant a signal
/// lands instead of up to one poll-period late.
///
/// Deliberately never `read()`s the eventfd: that would drain its
/// counter back to zero, and a worker whose own `PollAdd` hasn't been
/// armed yet (still starting up, not yet at `watch_stop`) would then
/// have nothing left to observe — only one write ever happens per
/// signal. Leaving the counter set means every future `PollAdd`
/// against this fd, from any worker, keeps seeing it ready.
fn stop_handle(stop_eventfd: RawFd) -> Arc<AtomicBool> {
    static RELAY: std::sync::OnceLock<Arc<AtomicBool>> = std::sync::OnceLock::new();
    RELAY
        .get_or_init(|| {
            let flag = Arc::new(AtomicBool::new(false));
            let poller = flag.clone();
            std::thread::Builder::new()
                .name("ring-httpd-stop-relay".into())
                .spawn(move || {
                    let mut pfd = libc::pollfd { fd: stop_eventfd, events: libc::POLLIN, revents: 0 };
                    unsafe {
                        libc::poll(&mut pfd, 1, -1);
                    }
                    poller.store(true, Ordering::Relaxed);
                })
                .expect("failed to spawn stop-token relay thread");
            flag
        })
        .clone()
}
