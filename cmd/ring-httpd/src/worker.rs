//! Per-thread worker glue: accept loop, handler loop, event loop.
//!
//! Each worker owns its own listening socket (`SO_REUSEPORT`), its own
//! ring engine and buffer-ring pool, and runs its event loop forever,
//! stopping only when the process-wide stop token is observed between
//! waits.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ring_core::{log_error, log_info, log_warn};
use ring_runtime::awaitables::{self, AcceptMultishot, PollReadable, Recv, RecvOutcome};
use ring_runtime::task::spawn_detached;
use ring_runtime::{buffers, engine, file};

use crate::config::Config;
use crate::http;
use crate::socket::setup_listener;

/// Runs forever on the calling thread. Exits the process on any
/// initialisation-fatal error; returns once `stop` is observed between
/// completion waits.
///
/// `stop_eventfd` is a readable-on-write fd shared by every worker
/// (the signal handler writes to it); each worker keeps one
/// `PollAdd` outstanding against it so `submit_and_wait` has something
/// besides client traffic to wake on, and the idle case — armed
/// multishot accept, no connections — still observes `stop` in
/// bounded time instead of parking in `io_uring_enter` forever.
pub fn run(config: Arc<Config>, worker_id: u32, stop: Arc<AtomicBool>, stop_eventfd: RawFd) {
    ring_core::log::set_worker_tag(worker_id);

    if let Err(e) = engine::init(config.sq_entries) {
        log_error!("ring init failed: {e}");
        std::process::exit(1);
    }

    let listener = match setup_listener(config.port) {
        Ok(fd) => fd,
        Err(e) => {
            log_error!("listener setup failed: {e}");
            std::process::exit(1);
        }
    };

    let registered = engine::with_engine(|e| {
        buffers::init(e, config.buffer_capacity, config.buffer_size, buffers::GROUP_ID)
    });
    if let Err(e) = registered {
        log_error!("buffer-ring registration failed: {e}");
        std::process::exit(1);
    }
    // Flush the ProvideBuffers submission queued by buffers::init before
    // the first recv can possibly select from the group.
    if let Err(e) = engine::with_engine(|e| e.submit_and_wait(0)) {
        log_error!("initial submission failed: {e}");
        std::process::exit(1);
    }

    log_info!("listening on port {}", config.port);

    spawn_detached(accept_loop(listener, config.clone()));
    spawn_detached(watch_stop(stop_eventfd, stop.clone()));

    while !stop.load(Ordering::Relaxed) {
        match engine::with_engine(|e| e.submit_and_wait(1)) {
            Ok(_) => {
                // `drain_completions` only collects wakers; the engine's
                // `RefCell` borrow from `with_engine` ends before any of
                // them runs, so a waker that resubmits (or spawns a new
                // detached task, which re-enters the engine) doesn't
                // double-borrow it.
                let wakers = engine::with_engine(|e| e.drain_completions());
                for waker in wakers {
                    waker.wake();
                }
            }
            Err(e) => {
                log_error!("submission queue failure: {e}");
                std::process::exit(1);
            }
        }
    }

    unsafe { libc::close(listener) };
}

/// Keeps one `PollAdd` outstanding against the stop-token eventfd for
/// as long as `stop` is unset. A readiness notification just means
/// "re-check `stop` and, if it's not set yet, poll again" — the
/// eventfd's counter is never read back down, so a spurious or
/// coalesced wakeup is harmless.
async fn watch_stop(stop_eventfd: RawFd, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        let _ = PollReadable::new(stop_eventfd).await;
    }
}

async fn accept_loop(listener: RawFd, config: Arc<Config>) {
    let mut guard = AcceptMultishot::new(listener);
    loop {
        let client_fd = guard.accept().await;
        if client_fd < 0 {
            log_warn!("accept completion failed: {client_fd}");
            continue;
        }
        spawn_detached(handle_client(client_fd, config.clone()));
    }
}

async fn handle_client(fd: RawFd, config: Arc<Config>) {
    match &config.dir {
        Some(root) => serve_static(fd, root).await,
        None => echo_loop(fd).await,
    }
    unsafe { libc::close(fd) };
}

/// Default behaviour: echo bytes back verbatim until the peer closes.
async fn echo_loop(fd: RawFd) {
    loop {
        let outcome = Recv::new(fd).await;
        let (buffer_id, length) = match outcome {
            RecvOutcome::Closed => return,
            RecvOutcome::Err(e) => {
                log_warn!("recv failed on fd {fd}: {e}");
                return;
            }
            RecvOutcome::Data { buffer_id, length } => (buffer_id, length),
        };

        let (ptr, len) = buffers::with_pool(|pool| {
            let slice = pool.borrow(buffer_id, length);
            (slice.as_ptr(), slice.len())
        });
        // Safety: the buffer stays in the borrowed-set (not re-published
        // to the kernel, so the kernel cannot overwrite it) until
        // `return_buffer` below runs, which happens only after the send
        // below has fully resolved.
        let echoed = unsafe { std::slice::from_raw_parts(ptr, len) };
        send_all(fd, echoed).await;

        buffers::with_pool(|pool| engine::with_engine(|e| pool.return_buffer(e, buffer_id)));
    }
}

/// `--dir` mode: parse just enough of the request to resolve a path,
/// then answer with a header (via `send`) and a zero-copy splice of the
/// file body.
async fn serve_static(fd: RawFd, root: &std::path::Path) {
    let mut request = Vec::new();
    loop {
        let outcome = Recv::new(fd).await;
        let (buffer_id, length) = match outcome {
            RecvOutcome::Closed | RecvOutcome::Err(_) => return,
            RecvOutcome::Data { buffer_id, length } => (buffer_id, length),
        };

        let (ptr, len) = buffers::with_pool(|pool| {
            let slice = pool.borrow(buffer_id, length);
            (slice.as_ptr(), slice.len())
        });
        let chunk = unsafe { std::slice::from_raw_parts(ptr, len) };
        request.extend_from_slice(chunk);
        buffers::with_pool(|pool| engine::with_engine(|e| pool.return_buffer(e, buffer_id)));

        if http::parse_request_path(&request).is_some() {
            break;
        }
        if request.len() > 64 * 1024 {
            return; // malformed/oversized request headers; drop the connection
        }
    }

    let Some(path) = http::parse_request_path(&request) else { return };
    let Some(resolved) = http::resolve_path(root, path) else {
        send_all(fd, &http::response_header("404 Not Found", "text/plain", 0)).await;
        return;
    };

    let Some(open) = file::open_read_only(&resolved) else {
        send_all(fd, &http::response_header("404 Not Found", "text/plain", 0)).await;
        return;
    };
    let raw_fd = open.await;
    if raw_fd < 0 {
        send_all(fd, &http::response_header("404 Not Found", "text/plain", 0)).await;
        return;
    }
    let opened = file::FileDescriptor::from_raw(raw_fd);

    let size = unsafe {
        let mut st: libc::stat = std::mem::zeroed();
        if libc::fstat(opened.raw(), &mut st) == 0 {
            st.st_size.max(0) as u64
        } else {
            0
        }
    };

    let content_type = resolved.to_str().map(http::guess_content_type).unwrap_or("application/octet-stream");
    send_all(fd, &http::response_header("200 OK", content_type, size)).await;

    if size == 0 {
        return;
    }
    let Ok((pipe_read, pipe_write)) = file::pipe() else {
        log_warn!("pipe() failed while serving a static file");
        return;
    };
    let result =
        file::splice_all(opened.raw(), pipe_read.raw(), pipe_write.raw(), fd, size, 256 * 1024).await;
    if result < 0 {
        log_warn!("splice transfer failed: {result}");
    }
}

async fn send_all(fd: RawFd, mut buf: &[u8]) {
    while !buf.is_empty() {
        let sent = awaitables::Send::new(fd, buf).await;
        if sent <= 0 {
            return;
        }
        buf = &buf[sent as usize..];
    }
}
