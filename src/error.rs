use std::io;

use thiserror::Error;

pub type Result<T, E = CheckError> = std::result::Result<T, E>;

/// Everything a check or the polling loop can fail with.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("checker already started")]
    AlreadyStarted,

    /// The poller is not running, so a pending connect has nobody to report it.
    #[error("checker is not running")]
    NotRunning,

    #[error("invalid address {addr:?}: {source}")]
    AddressParse {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("socket setup failed in {op}: {source}")]
    SocketSetup {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("timed out waiting for handshake")]
    Timeout,

    #[error("poller {op} failed: {source}")]
    Poller {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl CheckError {
    pub(crate) fn setup(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| CheckError::SocketSetup { op, source }
    }

    pub(crate) fn poller(op: &'static str, source: io::Error) -> Self {
        CheckError::Poller { op, source }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CheckError::Timeout)
    }

    /// OS error code carried by the failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            CheckError::Connect(e) => e.raw_os_error(),
            CheckError::SocketSetup { source, .. }
            | CheckError::Poller { source, .. }
            | CheckError::AddressParse { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Short stable name, suitable as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckError::AlreadyStarted => "already_started",
            CheckError::NotRunning => "not_running",
            CheckError::AddressParse { .. } => "address",
            CheckError::SocketSetup { .. } => "socket_setup",
            CheckError::Connect(_) => "connect",
            CheckError::Timeout => "timeout",
            CheckError::Poller { .. } => "poller",
        }
    }
}
