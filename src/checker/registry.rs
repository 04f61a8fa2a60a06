//! In-flight checks, keyed by probe socket descriptor.

use std::os::fd::RawFd;

use dashmap::DashMap;

use super::poller::ProbeKey;
use super::pool::Delivery;

struct Entry {
    seq: u32,
    delivery: Delivery,
}

/// Maps each pending probe socket to the conduit its caller waits on.
///
/// An entry is removed exactly once: by [`pop`](Self::pop) when the loop
/// delivers, or by [`deregister`](Self::deregister) when the caller gives up.
/// Both go through `remove_if` on the same shard, so only one of them wins.
#[derive(Default)]
pub struct ResultRegistry {
    entries: DashMap<RawFd, Entry>,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must happen before `key.fd` is armed in the poller.
    pub fn register(&self, key: ProbeKey, delivery: Delivery) {
        let prev = self.entries.insert(key.fd, Entry { seq: key.seq, delivery });
        debug_assert!(prev.is_none(), "fd {} registered twice", key.fd);
    }

    pub fn pop(&self, key: ProbeKey) -> Option<Delivery> {
        self.entries
            .remove_if(&key.fd, |_, entry| entry.seq == key.seq)
            .map(|(_, entry)| entry.delivery)
    }

    /// Returns false if the loop already took the entry.
    pub fn deregister(&self, key: ProbeKey) -> bool {
        self.pop(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
