use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use anyhow::Result;

pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval_ms: u64) -> Result<Self> {
        if interval_ms == 0 {
            return Err(anyhow::anyhow!("scheduler interval must be greater than zero"));
        }
        Ok(Self {
            interval: Duration::from_millis(interval_ms),
        })
    }

    /// job: async closure for each tick. Returns once `shutdown` turns true
    /// or its sender is dropped.
    pub async fn run<J, F>(&self, mut job: J, mut shutdown: watch::Receiver<bool>) -> Result<()>
    where
        J: FnMut() -> F + Send + 'static,
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut next = Instant::now();
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            next += self.interval;
            // spawn job so next tick unaffected by job duration
            tokio::spawn(job());
            tokio::select! {
                _ = sleep_until(next) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
