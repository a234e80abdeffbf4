//! Error taxonomy for the ring engine.
//!
//! Only initialisation failures and submission-queue failures produce a
//! `RingError`. Per-operation failures (`res < 0` in a completion) are
//! not wrapped here — they propagate to the awaiter as a raw signed
//! result. Programmer errors (double-borrow, use of an absent
//! descriptor) panic instead of returning a `RingError`; they are not
//! meant to be handled.

use core::fmt;

/// Result type for fallible ring/listener/buffer-ring setup.
pub type RingResult<T> = Result<T, RingError>;

/// Fatal errors raised during ring, socket, or buffer-ring setup.
#[derive(Debug)]
pub enum RingError {
    /// `io_uring_queue_init` (or the `io-uring` crate's builder) failed.
    RingInit(i32),
    /// A submission queue push or `submit_and_wait` returned negative.
    SubmitFailed(i32),
    /// `getaddrinfo` returned a non-zero status.
    AddrInfo(i32),
    /// `socket`, `setsockopt`, `bind`, or `listen` failed.
    Socket(&'static str, std::io::Error),
    /// Buffer-ring registration (`posix_memalign`/`io_uring_buf_ring` setup) failed.
    BufferRingInit(&'static str),
    /// Buffer-ring capacity was not a power of two.
    InvalidBufferCapacity(u32),
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::RingInit(code) => write!(f, "ring initialisation failed: {code}"),
            RingError::SubmitFailed(code) => write!(f, "submission queue failure: {code}"),
            RingError::AddrInfo(code) => write!(f, "getaddrinfo failed: {code}"),
            RingError::Socket(call, err) => write!(f, "{call} failed: {err}"),
            RingError::BufferRingInit(reason) => write!(f, "buffer-ring registration failed: {reason}"),
            RingError::InvalidBufferCapacity(c) => {
                write!(f, "buffer-ring capacity {c} is not a power of two")
            }
        }
    }
}

impl std::error::Error for RingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_the_failing_call() {
        let e = RingError::Socket("bind", std::io::Error::from_raw_os_error(98));
        assert!(format!("{e}").starts_with("bind failed"));
    }

    #[test]
    fn invalid_capacity_reports_the_value() {
        let e = RingError::InvalidBufferCapacity(1000);
        assert_eq!(format!("{e}"), "buffer-ring capacity 1000 is not a power of two");
    }
}
