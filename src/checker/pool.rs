//! Reusable single-slot result conduits.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use tracing::warn;

use super::poller::Outcome;

/// Holds at most one outcome. The receiving half stays with the lease holder;
/// the loop gets a [`Delivery`] through the registry.
pub struct Conduit {
    tx: SyncSender<Outcome>,
    rx: Receiver<Outcome>,
}

impl Conduit {
    fn new() -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        Self { tx, rx }
    }

    pub fn delivery(&self) -> Delivery {
        Delivery(self.tx.clone())
    }

    /// Wait for the outcome until `timeout` elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Outcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            // we hold a sender, so the channel never disconnects
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Consume an outcome the loop has already committed to sending.
    pub fn drain(&self) {
        let _ = self.rx.recv();
    }
}

/// Sending half of a leased conduit, owned by a registry entry.
pub struct Delivery(SyncSender<Outcome>);

impl Delivery {
    /// Hand the outcome over without blocking.
    pub fn deliver(self, outcome: Outcome) {
        match self.0.try_send(outcome) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("conduit already holds an outcome, dropping"),
            Err(TrySendError::Disconnected(_)) => warn!("conduit receiver gone, dropping outcome"),
        }
    }
}

/// Freelist of conduits. Every pooled conduit is empty.
#[derive(Default)]
pub struct ConduitPool {
    free: SegQueue<Conduit>,
}

impl ConduitPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Conduit {
        self.free.pop().unwrap_or_else(Conduit::new)
    }

    /// Return a conduit. Callers must have consumed or drained its value.
    pub fn put(&self, conduit: Conduit) {
        self.free.push(conduit);
    }

    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CheckError;
    use std::thread;

    #[test]
    fn delivers_one_value() {
        let pool = ConduitPool::new();
        let conduit = pool.get();
        conduit.delivery().deliver(Err(CheckError::Timeout));
        let got = conduit.recv_timeout(Duration::from_millis(10)).unwrap();
        assert!(got.unwrap_err().is_timeout());
        assert!(conduit.recv_timeout(Duration::ZERO).is_none());
    }

    #[test]
    fn second_delivery_is_dropped() {
        let conduit = Conduit::new();
        conduit.delivery().deliver(Ok(()));
        conduit.delivery().deliver(Err(CheckError::Timeout));
        assert!(conduit.recv_timeout(Duration::ZERO).unwrap().is_ok());
        assert!(conduit.recv_timeout(Duration::ZERO).is_none());
    }

    #[test]
    fn reuses_returned_conduits() {
        let pool = ConduitPool::new();
        let a = pool.get();
        let b = pool.get();
        pool.put(a);
        pool.put(b);
        assert_eq!(pool.idle(), 2);
        let _c = pool.get();
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn drain_waits_for_in_flight_value() {
        let pool = ConduitPool::new();
        let conduit = pool.get();
        let delivery = conduit.delivery();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            delivery.deliver(Ok(()));
        });
        conduit.drain();
        sender.join().unwrap();
        pool.put(conduit);

        let again = pool.get();
        assert!(again.recv_timeout(Duration::ZERO).is_none());
    }

    #[test]
    fn concurrent_leases_are_independent() {
        let pool = ConduitPool::new();
        thread::scope(|s| {
            for i in 0..16 {
                let pool = &pool;
                s.spawn(move || {
                    for _ in 0..100 {
                        let conduit = pool.get();
                        let outcome = if i % 2 == 0 { Ok(()) } else { Err(CheckError::Timeout) };
                        conduit.delivery().deliver(outcome);
                        let got = conduit.recv_timeout(Duration::from_secs(1)).unwrap();
                        assert_eq!(got.is_ok(), i % 2 == 0);
                        pool.put(conduit);
                    }
                });
            }
        });
        assert!(pool.idle() <= 16);
    }
}
