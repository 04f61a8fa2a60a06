//! Concurrent TCP handshake checks multiplexed over one epoll instance.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use handshake_probe::Checker;
//!
//! let checker = Arc::new(Checker::new());
//! let (shutdown, rx) = tokio::sync::watch::channel(false);
//! let poller = checker.spawn(rx).unwrap();
//! checker.wait_until_ready();
//!
//! match checker.check_addr_with_latency("example.com:443", None, Duration::from_secs(1)) {
//!     Ok(latency) => println!("up in {latency:?}"),
//!     Err(e) => println!("down: {e}"),
//! }
//!
//! shutdown.send(true).unwrap();
//! poller.join().unwrap().unwrap();
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("handshake-probe is built on epoll and only supports Linux");

pub mod checker;
pub mod error;
pub mod resolve;

pub use checker::{Checker, CheckerConfig};
pub use error::{CheckError, Result};
