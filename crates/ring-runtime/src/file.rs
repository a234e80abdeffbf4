//! File transfer: zero-copy static-file responses via splice, used only
//! when `--dir` static-file mode is enabled.
//!
//! Shaped the same way accept/recv/send are in `awaitables.rs`: a
//! `Future`-implementing awaitable per operation, submitted through the
//! same per-thread [`crate::engine`].

use std::ffi::CString;
use std::future::Future;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use ring_core::entry::SubmitEntry;

use crate::engine;

/// An owned file descriptor, closed exactly once on drop. Move-only by
/// construction — there is no `Clone`.
#[derive(Debug)]
pub struct FileDescriptor {
    fd: Option<RawFd>,
}

impl FileDescriptor {
    /// Takes ownership of an already-open descriptor.
    pub fn from_raw(fd: RawFd) -> Self {
        Self { fd: Some(fd) }
    }

    /// # Panics
    /// Panics if the descriptor was already taken — a programmer error,
    /// not a runtime condition.
    pub fn raw(&self) -> RawFd {
        self.fd.expect("use of a FileDescriptor whose descriptor was taken")
    }
}

impl Drop for FileDescriptor {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

/// Create an anonymous pipe. A plain `pipe2` syscall — creating the
/// pipe itself isn't I/O the kernel ring needs to be involved in, only
/// the two splices that move bytes through it are.
pub fn pipe() -> std::io::Result<(FileDescriptor, FileDescriptor)> {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok((FileDescriptor::from_raw(fds[0]), FileDescriptor::from_raw(fds[1])))
}

/// Open `path` read-only through the kernel ring. Returns `None`
/// (caller should answer 404) when `path` can't be represented as a
/// C string — that's a request-shaped failure, not a fatal one.
pub fn open_read_only(path: &Path) -> Option<OpenReadOnly> {
    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    Some(OpenReadOnly { c_path, entry: SubmitEntry::new(), submitted: false })
}

pub struct OpenReadOnly {
    c_path: CString,
    entry: SubmitEntry,
    submitted: bool,
}

impl Future for OpenReadOnly {
    /// The opened fd, or a negative errno (e.g. `-ENOENT`).
    type Output = i32;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<i32> {
        let this = unsafe { self.get_unchecked_mut() };
        if !this.submitted {
            this.entry.waker = Some(cx.waker().clone());
            let ptr = this.c_path.as_ptr();
            engine::with_engine(|e| unsafe { e.submit_openat(ptr, &mut this.entry) });
            this.submitted = true;
            return Poll::Pending;
        }
        Poll::Ready(this.entry.result)
    }
}

/// One `splice` of up to `len` bytes from `fd_in` to `fd_out`. The
/// file-transfer loop below calls this twice per chunk (file → pipe,
/// pipe → socket), looping until a zero-length splice signals EOF.
pub struct Splice {
    entry: SubmitEntry,
    fd_in: RawFd,
    fd_out: RawFd,
    len: u32,
    submitted: bool,
}

impl Splice {
    pub fn new(fd_in: RawFd, fd_out: RawFd, len: u32) -> Self {
        Self { entry: SubmitEntry::new(), fd_in, fd_out, len, submitted: false }
    }
}

impl Future for Splice {
    /// Bytes spliced, `0` on EOF, or a negative errno.
    type Output = i32;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<i32> {
        let this = unsafe { self.get_unchecked_mut() };
        if !this.submitted {
            this.entry.waker = Some(cx.waker().clone());
            engine::with_engine(|e| e.submit_splice(this.fd_in, this.fd_out, this.len, &mut this.entry));
            this.submitted = true;
            return Poll::Pending;
        }
        Poll::Ready(this.entry.result)
    }
}

/// Pure chunk-size bookkeeping pulled out of the transfer loop so it
/// can be unit-tested without a kernel ring.
pub fn next_chunk_len(remaining: u64, chunk_size: u32) -> u32 {
    remaining.min(chunk_size as u64) as u32
}

/// Splice `file` into `socket` via the anonymous pipe (`pipe_read`,
/// `pipe_write`) in chunks of at most `chunk_size`, until `remaining`
/// bytes have moved or a splice fails. Returns `0` on a clean finish,
/// or the first negative result encountered.
pub async fn splice_all(
    file: RawFd,
    pipe_read: RawFd,
    pipe_write: RawFd,
    socket: RawFd,
    mut remaining: u64,
    chunk_size: u32,
) -> i32 {
    while remaining > 0 {
        let len = next_chunk_len(remaining, chunk_size);
        let from_file = Splice::new(file, pipe_write, len).await;
        if from_file <= 0 {
            return from_file;
        }
        let mut piped = from_file as u32;
        while piped > 0 {
            let sent = Splice::new(pipe_read, socket, piped).await;
            if sent <= 0 {
                return sent;
            }
            piped -= sent as u32;
        }
        remaining -= from_file as u64;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_chunk_len_caps_at_chunk_size() {
        assert_eq!(next_chunk_len(10_000, 4096), 4096);
        assert_eq!(next_chunk_len(100, 4096), 100);
        assert_eq!(next_chunk_len(0, 4096), 0);
    }

    #[test]
    fn open_read_only_rejects_paths_with_interior_nul() {
        let path = Path::new("bad\0path");
        assert!(open_read_only(path).is_none());
    }

    #[test]
    fn pipe_returns_two_distinct_readable_writable_fds() {
        let (r, w) = pipe().expect("pipe2 should succeed");
        assert_ne!(r.raw(), w.raw());
    }
}
