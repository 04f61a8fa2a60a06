use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use handshake_probe::{CheckError, Checker, CheckerConfig};
use socket2::{Domain, Socket, Type};
use tokio::sync::watch;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Running {
    checker: Arc<Checker>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<handshake_probe::Result<()>>,
}

impl Running {
    fn start() -> Self {
        let checker = Arc::new(Checker::with_config(CheckerConfig {
            poll_interval: POLL_INTERVAL,
            ..CheckerConfig::default()
        }));
        let (shutdown, rx) = watch::channel(false);
        let handle = checker.spawn(rx).unwrap();
        assert!(checker.wait_until_ready_timeout(Duration::from_secs(5)));
        Self {
            checker,
            shutdown,
            handle,
        }
    }

    fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.handle.join().unwrap().unwrap();
    }
}

fn listening() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn refused() -> String {
    let (_listener, addr) = listening();
    addr
}

/// A listener whose accept queue is full: further SYNs are dropped, so
/// connects to it never complete.
struct Unresponsive {
    _listener: Socket,
    _held: Vec<TcpStream>,
    addr: SocketAddr,
}

fn unresponsive() -> Unresponsive {
    let listener = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
    listener
        .bind(&"127.0.0.1:0".parse::<SocketAddr>().unwrap().into())
        .unwrap();
    listener.listen(0).unwrap();
    let addr = listener.local_addr().unwrap().as_socket().unwrap();
    let held = (0..8)
        .map_while(|_| TcpStream::connect_timeout(&addr, Duration::from_millis(200)).ok())
        .collect();
    Unresponsive {
        _listener: listener,
        _held: held,
        addr,
    }
}

#[test]
fn reachable_address_succeeds() {
    let running = Running::start();
    let (_listener, addr) = listening();

    running.checker.check_addr(&addr, Duration::from_secs(2)).unwrap();
    assert_eq!(running.checker.in_flight(), 0);
    running.stop();
}

#[test]
fn zero_linger_override_either_way() {
    let running = Running::start();
    let (_listener, up) = listening();

    for zero_linger in [false, true] {
        running
            .checker
            .check_addr_zero_linger(&up, Duration::from_secs(2), zero_linger)
            .unwrap();
    }
    let err = running
        .checker
        .check_addr_zero_linger(&refused(), Duration::from_secs(2), false)
        .unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));
    assert_eq!(running.checker.in_flight(), 0);
    running.stop();
}

#[test]
fn closed_port_is_refused() {
    let running = Running::start();
    let err = running
        .checker
        .check_addr(&refused(), Duration::from_secs(2))
        .unwrap_err();

    assert!(matches!(err, CheckError::Connect(_)), "got {err:?}");
    assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));
    running.stop();
}

#[test]
fn unresponsive_address_times_out_on_deadline() {
    let running = Running::start();
    let target = unresponsive();
    let timeout = Duration::from_millis(300);

    let started = Instant::now();
    let err = running
        .checker
        .check_addr(&target.addr.to_string(), timeout)
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout(), "got {err:?}");
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(elapsed < timeout + Duration::from_millis(250), "returned late after {elapsed:?}");
    assert_eq!(running.checker.in_flight(), 0);
    running.stop();
}

#[test]
fn concurrent_checks_keep_their_own_outcomes() {
    let running = Running::start();
    let (_listener, up) = listening();
    let down = refused();
    let silent = unresponsive();
    let silent_addr = silent.addr.to_string();

    thread::scope(|s| {
        for i in 0..30 {
            let checker = &running.checker;
            let (up, down, silent) = (&up, &down, &silent_addr);
            s.spawn(move || match i % 3 {
                0 => checker.check_addr(up, Duration::from_secs(2)).unwrap(),
                1 => {
                    let err = checker.check_addr(down, Duration::from_secs(2)).unwrap_err();
                    assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));
                }
                _ => {
                    let err = checker.check_addr(silent, Duration::from_millis(300)).unwrap_err();
                    assert!(err.is_timeout(), "got {err:?}");
                }
            });
        }
    });

    assert_eq!(running.checker.in_flight(), 0);
    running.stop();
}

#[test]
fn sequential_checks_leave_no_registry_entries() {
    let running = Running::start();
    let (_listener, up) = listening();
    let down = refused();

    for _ in 0..50 {
        running.checker.check_addr(&up, Duration::from_secs(2)).unwrap();
        assert_eq!(running.checker.in_flight(), 0);
        let _ = running.checker.check_addr(&down, Duration::from_secs(2));
        assert_eq!(running.checker.in_flight(), 0);
    }
    running.stop();
}

#[test]
fn timed_out_check_does_not_leak_into_next() {
    let running = Running::start();
    let silent = unresponsive();
    let (_listener, up) = listening();

    for _ in 0..5 {
        let err = running
            .checker
            .check_addr(&silent.addr.to_string(), Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_timeout());
        running.checker.check_addr(&up, Duration::from_secs(2)).unwrap();
    }
    running.stop();
}

#[test]
fn second_start_does_not_disturb_running_loop() {
    let running = Running::start();
    let fd = running.checker.poller_fd();

    let (_tx, rx) = watch::channel(false);
    assert!(matches!(running.checker.start(rx), Err(CheckError::AlreadyStarted)));
    assert_eq!(running.checker.poller_fd(), fd);

    let (_listener, up) = listening();
    running.checker.check_addr(&up, Duration::from_secs(2)).unwrap();
    running.stop();
}

#[test]
fn cancellation_stops_within_one_interval() {
    let running = Running::start();
    let checker = running.checker.clone();

    let started = Instant::now();
    running.stop();
    assert!(started.elapsed() < POLL_INTERVAL + Duration::from_millis(200));
    assert!(!checker.is_ready());
    assert_eq!(checker.poller_fd(), -1);
}

#[test]
fn latency_is_positive_and_bounded() {
    let running = Running::start();
    let (_listener, up) = listening();
    let timeout = Duration::from_secs(2);

    let latency = running
        .checker
        .check_addr_with_latency(&up, None, timeout)
        .unwrap();
    assert!(latency > Duration::ZERO);
    assert!(latency <= timeout);

    let latency = running
        .checker
        .check_addr_zero_linger_with_latency(&up, Some("127.0.0.1"), timeout, false)
        .unwrap();
    assert!(latency > Duration::ZERO && latency <= timeout);
    running.stop();
}

#[test]
fn bad_source_address_is_rejected() {
    let running = Running::start();
    let (_listener, up) = listening();

    let err = running
        .checker
        .check_addr_with_latency(&up, Some("not an ip"), Duration::from_secs(1))
        .unwrap_err();
    assert!(matches!(err, CheckError::AddressParse { .. }));
    running.stop();
}

#[test]
fn malformed_address_is_rejected() {
    let checker = Checker::new();
    let err = checker.check_addr("localhost", Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, CheckError::AddressParse { .. }));
}
