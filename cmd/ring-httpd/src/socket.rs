//! Listener setup: `getaddrinfo` + `socket`/`setsockopt`/`bind`/
//! `listen`, dual-stack, `SO_REUSEADDR`/`SO_REUSEPORT`, backlog 512.
//!
//! Raw syscalls throughout (`libc::socket`/`setsockopt`/`bind`/`listen`
//! directly, no higher-level `std::net` type), since the fd is handed
//! straight to the kernel ring afterwards.

use std::ffi::CString;
use std::os::unix::io::RawFd;

use ring_core::error::{RingError, RingResult};

/// Listen backlog.
pub const LISTEN_QUEUE_SIZE: i32 = 512;

/// Bind and listen on `port` across all interfaces, dual-stack
/// (`AF_UNSPEC`/`SOCK_STREAM`).
pub fn setup_listener(port: u16) -> RingResult<RawFd> {
    let port_cstr = CString::new(port.to_string()).expect("port string has no interior NUL");

    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_flags = libc::AI_PASSIVE;

    let mut result: *mut libc::addrinfo = std::ptr::null_mut();
    let rc = unsafe {
        libc::getaddrinfo(std::ptr::null(), port_cstr.as_ptr(), &hints, &mut result)
    };
    if rc != 0 {
        return Err(RingError::AddrInfo(rc));
    }

    let listener = bind_first_candidate(result);
    unsafe { libc::freeaddrinfo(result) };
    let fd = listener?;

    if unsafe { libc::listen(fd, LISTEN_QUEUE_SIZE) } == -1 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(RingError::Socket("listen", err));
    }

    Ok(fd)
}

fn bind_first_candidate(mut node: *mut libc::addrinfo) -> RingResult<RawFd> {
    while !node.is_null() {
        let info = unsafe { &*node };
        let fd = unsafe { libc::socket(info.ai_family, info.ai_socktype, info.ai_protocol) };
        if fd == -1 {
            node = info.ai_next;
            continue;
        }

        if set_reuse_opts(fd).is_err() {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(RingError::Socket("setsockopt", err));
        }

        if unsafe { libc::bind(fd, info.ai_addr, info.ai_addrlen) } == -1 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(RingError::Socket("bind", err));
        }

        return Ok(fd);
    }
    Err(RingError::Socket("socket", std::io::Error::from_raw_os_error(libc::ENOENT)))
}

fn set_reuse_opts(fd: RawFd) -> Result<(), ()> {
    let flag: libc::c_int = 1;
    let size = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let opts = [libc::SO_REUSEADDR, libc::SO_REUSEPORT];
    for opt in opts {
        let rc = unsafe {
            libc::setsockopt(fd, libc::SOL_SOCKET, opt, &flag as *const _ as *const libc::c_void, size)
        };
        if rc == -1 {
            return Err(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_an_ephemeral_port_and_closes_cleanly() {
        let fd = setup_listener(0).expect("listener setup should succeed");
        assert!(fd >= 0);
        unsafe { libc::close(fd) };
    }
}
