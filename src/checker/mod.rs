//! TCP handshake checker driven by a single shared epoll loop.
//!
//! One thread runs [`Checker::start`] and owns the epoll instance. Any number
//! of threads call the `check_addr*` methods. A probe whose connect does not
//! finish synchronously parks its caller on a pooled conduit until the loop
//! delivers the socket's outcome or the deadline passes.

pub mod poller;
pub mod pool;
pub mod ready;
pub mod registry;
pub mod socket;

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use socket2::Socket;
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

use crate::error::{CheckError, Result};
use crate::resolve::{parse_source, resolve};
use poller::{Poller, ProbeKey, ReadyEvent};
use pool::{Conduit, ConduitPool};
use ready::ReadyGate;
use registry::ResultRegistry;
use socket::{ConnectState, SocketOptions, connect, create_socket};

const NO_POLLER: RawFd = -1;

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Default for checks that do not pass their own zero-linger flag.
    pub zero_linger: bool,
    /// Bounded wait per loop iteration; also the worst-case shutdown latency.
    pub poll_interval: Duration,
    /// Events drained per wait.
    pub max_events: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            zero_linger: true,
            poll_interval: Duration::from_secs(1),
            max_events: poller::DEFAULT_MAX_EVENTS,
        }
    }
}

pub struct Checker {
    config: CheckerConfig,
    poller_fd: AtomicI32,
    poller_lock: Mutex<()>,
    ready: ReadyGate,
    registry: ResultRegistry,
    pool: ConduitPool,
    next_seq: AtomicU32,
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

impl Checker {
    /// A checker whose probes reset their connection on close.
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    pub fn with_zero_linger(zero_linger: bool) -> Self {
        Self::with_config(CheckerConfig {
            zero_linger,
            ..CheckerConfig::default()
        })
    }

    pub fn with_config(config: CheckerConfig) -> Self {
        Self {
            config,
            poller_fd: AtomicI32::new(NO_POLLER),
            poller_lock: Mutex::new(()),
            ready: ReadyGate::new(),
            registry: ResultRegistry::new(),
            pool: ConduitPool::new(),
            next_seq: AtomicU32::new(0),
        }
    }

    /// Run the polling loop on the calling thread.
    ///
    /// Blocks until `shutdown` turns `true` (or all its senders are dropped),
    /// returning `Ok(())`, or until epoll fails, returning that error. Fails
    /// with [`CheckError::AlreadyStarted`] while another loop is running.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut active = self.open_poller()?;
        self.ready.open();
        info!(poller_fd = active.poller.as_raw_fd(), "tcp checker started");

        let result = self.polling_loop(&mut active.poller, &shutdown);
        match &result {
            Ok(()) => info!("tcp checker stopped"),
            Err(e) => error!(error = %e, "tcp checker polling loop failed"),
        }
        result
    }

    /// Run [`start`](Self::start) on a dedicated thread.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> io::Result<JoinHandle<Result<()>>> {
        let checker = Arc::clone(self);
        thread::Builder::new()
            .name("tcp-checker-poller".into())
            .spawn(move || checker.start(shutdown))
    }

    fn lock_poller(&self) -> MutexGuard<'_, ()> {
        self.poller_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_poller(&self) -> Result<ActivePoller<'_>> {
        let _guard = self.lock_poller();
        if self.poller_fd() != NO_POLLER {
            return Err(CheckError::AlreadyStarted);
        }
        let poller = Poller::new(self.config.max_events)?;
        self.poller_fd.store(poller.as_raw_fd(), Ordering::SeqCst);
        Ok(ActivePoller { checker: self, poller })
    }

    fn polling_loop(&self, poller: &mut Poller, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let mut events = Vec::with_capacity(self.config.max_events);
        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                return Ok(());
            }
            poller.wait(self.config.poll_interval, &mut events)?;
            self.dispatch(&mut events);
        }
    }

    fn dispatch(&self, events: &mut Vec<ReadyEvent>) {
        for event in events.drain(..) {
            // pop before reading SO_ERROR: a live entry keeps its socket open
            match self.registry.pop(event.key) {
                Some(delivery) => delivery.deliver(event.take_outcome()),
                // the check already gave up and is closing its socket
                None => trace!(fd = event.key.fd, seq = event.key.seq, "dropping event for finished check"),
            }
        }
    }

    /// Check that a TCP handshake with `addr` completes within `timeout`,
    /// using the checker's default zero-linger setting.
    ///
    /// `timeout` covers name resolution as well as the handshake.
    pub fn check_addr(&self, addr: &str, timeout: Duration) -> Result<()> {
        self.check_addr_zero_linger(addr, timeout, self.config.zero_linger)
    }

    pub fn check_addr_zero_linger(&self, addr: &str, timeout: Duration, zero_linger: bool) -> Result<()> {
        self.probe(addr, None, timeout, zero_linger).map(|_| ())
    }

    /// Like [`check_addr`](Self::check_addr), also reporting how long the
    /// handshake took. `source_addr` picks the local address to connect from.
    pub fn check_addr_with_latency(
        &self,
        addr: &str,
        source_addr: Option<&str>,
        timeout: Duration,
    ) -> Result<Duration> {
        self.check_addr_zero_linger_with_latency(addr, source_addr, timeout, self.config.zero_linger)
    }

    pub fn check_addr_zero_linger_with_latency(
        &self,
        addr: &str,
        source_addr: Option<&str>,
        timeout: Duration,
        zero_linger: bool,
    ) -> Result<Duration> {
        self.probe(addr, source_addr, timeout, zero_linger)
    }

    fn probe(
        &self,
        addr: &str,
        source_addr: Option<&str>,
        timeout: Duration,
        zero_linger: bool,
    ) -> Result<Duration> {
        // None when the timeout is too large to represent: wait indefinitely
        let deadline = Instant::now().checked_add(timeout);

        let target = resolve(addr)?;
        let source = source_addr.map(parse_source).transpose()?;
        // closed on drop, after any pending check below has been cleaned up
        let socket = create_socket(target.family, source, SocketOptions { zero_linger })?;

        let started = Instant::now();
        match connect(&socket, target.addr).map_err(CheckError::Connect)? {
            ConnectState::Connected => {}
            ConnectState::InProgress => self.wait_connect_result(&socket, deadline)?,
        }
        Ok(started.elapsed())
    }

    fn wait_connect_result(&self, socket: &Socket, deadline: Option<Instant>) -> Result<()> {
        let poller_fd = self.poller_fd();
        if poller_fd == NO_POLLER {
            return Err(CheckError::NotRunning);
        }
        let key = ProbeKey {
            fd: socket.as_raw_fd(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        let mut pending = PendingCheck::register(&self.registry, &self.pool, key);
        poller::register(poller_fd, key)?;
        pending.wait(deadline)
    }

    pub fn is_ready(&self) -> bool {
        self.poller_fd() != NO_POLLER
    }

    /// Block until the current or next [`start`](Self::start) has its poller up.
    pub fn wait_until_ready(&self) {
        self.ready.wait();
    }

    pub fn wait_until_ready_timeout(&self, timeout: Duration) -> bool {
        self.ready.wait_timeout(timeout)
    }

    /// Raw epoll descriptor, or -1 when stopped. For diagnostics only.
    pub fn poller_fd(&self) -> RawFd {
        self.poller_fd.load(Ordering::SeqCst)
    }

    /// Checks currently waiting on the poller.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }
}

/// The running loop's epoll instance. Dropping it marks the checker stopped
/// before the descriptor is closed.
struct ActivePoller<'a> {
    checker: &'a Checker,
    poller: Poller,
}

impl Drop for ActivePoller<'_> {
    fn drop(&mut self) {
        let _guard = self.checker.lock_poller();
        self.checker.poller_fd.store(NO_POLLER, Ordering::SeqCst);
        self.checker.ready.close();
        debug!(poller_fd = self.poller.as_raw_fd(), "closing poller");
    }
}

/// A check waiting on the poller. Owns the leased conduit and, on drop,
/// removes the registry entry and returns the conduit empty to the pool.
struct PendingCheck<'a> {
    registry: &'a ResultRegistry,
    pool: &'a ConduitPool,
    key: ProbeKey,
    conduit: Option<Conduit>,
    received: bool,
}

impl<'a> PendingCheck<'a> {
    fn register(registry: &'a ResultRegistry, pool: &'a ConduitPool, key: ProbeKey) -> Self {
        let conduit = pool.get();
        registry.register(key, conduit.delivery());
        Self {
            registry,
            pool,
            key,
            conduit: Some(conduit),
            received: false,
        }
    }

    fn wait(&mut self, deadline: Option<Instant>) -> Result<()> {
        let Some(conduit) = &self.conduit else {
            return Err(CheckError::Timeout);
        };
        let remaining = deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));
        match conduit.recv_timeout(remaining) {
            Some(outcome) => {
                self.received = true;
                outcome
            }
            None => Err(CheckError::Timeout),
        }
    }
}

impl Drop for PendingCheck<'_> {
    fn drop(&mut self) {
        let Some(conduit) = self.conduit.take() else {
            return;
        };
        if !self.registry.deregister(self.key) && !self.received {
            // the loop popped the entry as we timed out; its outcome is on the way
            conduit.drain();
        }
        self.pool.put(conduit);
    }
}
