//! Probe socket construction and the non-blocking connect.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{CheckError, Result};

/// Per-socket options, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Reset the connection on close instead of a FIN handshake, so
    /// high-rate probing does not pile up sockets in TIME_WAIT.
    pub zero_linger: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self { zero_linger: true }
    }
}

/// Result of issuing a non-blocking connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Connected,
    InProgress,
}

/// Create a non-blocking, close-on-exec TCP socket ready for a probe.
///
/// On any failure the partially configured socket is dropped, which closes it.
pub fn create_socket(
    family: Domain,
    source: Option<SocketAddr>,
    opts: SocketOptions,
) -> Result<Socket> {
    // socket2 sets SOCK_CLOEXEC on Linux
    let socket = Socket::new(family, Type::STREAM, Some(Protocol::TCP))
        .map_err(CheckError::setup("socket"))?;

    if let Some(source) = source {
        socket
            .bind(&SockAddr::from(source))
            .map_err(CheckError::setup("bind"))?;
    }
    socket
        .set_nonblocking(true)
        .map_err(CheckError::setup("set_nonblocking"))?;
    disable_quickack(&socket).map_err(CheckError::setup("setsockopt(TCP_QUICKACK)"))?;
    if opts.zero_linger {
        socket
            .set_linger(Some(Duration::ZERO))
            .map_err(CheckError::setup("setsockopt(SO_LINGER)"))?;
    }
    Ok(socket)
}

fn disable_quickack(socket: &Socket) -> io::Result<()> {
    let off: libc::c_int = 0;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_QUICKACK,
            &off as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Issue a non-blocking connect and classify the immediate result.
pub fn connect(socket: &Socket, addr: SocketAddr) -> io::Result<ConnectState> {
    match socket.connect(&SockAddr::from(addr)) {
        Ok(()) => Ok(ConnectState::Connected),
        Err(e) => match e.raw_os_error() {
            Some(libc::EINPROGRESS) | Some(libc::EALREADY) | Some(libc::EINTR) => {
                Ok(ConnectState::InProgress)
            }
            Some(libc::EISCONN) => Ok(ConnectState::Connected),
            _ => Err(e),
        },
    }
}
