//! Edge-triggered epoll wrapper.
//!
//! One `Poller` is owned by the polling loop. Caller threads only ever see the
//! raw epoll descriptor, through [`register`].

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use socket2::SockRef;

use crate::error::{CheckError, Result};

/// Upper bound on events drained per wait.
pub const DEFAULT_MAX_EVENTS: usize = 32;

/// Identifies one registration: the probe socket and the sequence number it
/// was registered under. Packed into the epoll event payload so a late event
/// for a recycled descriptor number cannot match a newer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeKey {
    pub fd: RawFd,
    pub seq: u32,
}

impl ProbeKey {
    fn pack(self) -> u64 {
        (u64::from(self.seq) << 32) | u64::from(self.fd as u32)
    }

    fn unpack(data: u64) -> Self {
        Self {
            fd: data as u32 as RawFd,
            seq: (data >> 32) as u32,
        }
    }
}

/// What the handshake on a ready descriptor came to.
pub type Outcome = Result<()>;

#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub key: ProbeKey,
}

impl ReadyEvent {
    /// Read and clear the socket's pending error.
    ///
    /// Only call this while the socket is known to be open, i.e. after taking
    /// its registry entry; the descriptor number may otherwise be reused.
    pub fn take_outcome(&self) -> Outcome {
        let fd = unsafe { BorrowedFd::borrow_raw(self.key.fd) };
        match SockRef::from(&fd).take_error() {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(CheckError::Connect(err)),
            Err(err) => Err(CheckError::poller("getsockopt(SO_ERROR)", err)),
        }
    }
}

pub struct Poller {
    fd: OwnedFd,
    events: Vec<libc::epoll_event>,
}

impl Poller {
    pub fn new(max_events: usize) -> Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(CheckError::poller("epoll_create1", io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            fd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; max_events.max(1)],
        })
    }

    /// Wait up to `timeout` for ready descriptors and append them to `out`.
    ///
    /// `EINTR` yields an empty batch. Any other failure is fatal for the loop.
    pub fn wait(&mut self, timeout: Duration, out: &mut Vec<ReadyEvent>) -> Result<()> {
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let n = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(());
            }
            return Err(CheckError::poller("epoll_wait", err));
        }

        out.extend(self.events[..n as usize].iter().map(|ev| ReadyEvent {
            key: ProbeKey::unpack(ev.u64),
        }));
        Ok(())
    }
}

impl AsRawFd for Poller {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Arm `key.fd` on the epoll instance `poller_fd`: readable, writable,
/// edge-triggered. Each probe socket is armed exactly once.
pub fn register(poller_fd: RawFd, key: ProbeKey) -> Result<()> {
    let mut ev = libc::epoll_event {
        events: (libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLET) as u32,
        u64: key.pack(),
    };
    let ret = unsafe { libc::epoll_ctl(poller_fd, libc::EPOLL_CTL_ADD, key.fd, &mut ev) };
    if ret < 0 {
        return Err(CheckError::poller("epoll_ctl(ADD)", io::Error::last_os_error()));
    }
    Ok(())
}
