mod config;
mod scheduler;
mod metrics;
mod util;

use config::ConfigManager;
use scheduler::Scheduler;
use metrics::{observe_latency, inc_timeout, inc_failure, initialize_metrics};
use handshake_probe::{CheckError, Checker};

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, error};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    // Stops the config watcher, the scheduler and the poller thread
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Load config first to get log level
    let config_mgr = Arc::new(ConfigManager::start(shutdown_rx.clone()).await?);
    let (log_level, enable_latency_history, metrics_addr, probe_interval_ms, zero_linger) = {
        let config = config_mgr.config.read().await;
        (
            config.get_tracing_level()?,
            config.enable_latency_history,
            config.metrics_addr,
            config.probe_interval_ms,
            config.zero_linger,
        )
    };

    println!("Starting handshake_probe");

    // Initialize metrics based on configuration
    initialize_metrics(enable_latency_history);

    if enable_latency_history {
        println!("Latency history tracking enabled");
    } else {
        println!("Latency history tracking disabled - showing current latency only");
    }

    // Init tracing with configured log level
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
                         .add_directive(format!("handshake_probe={}", log_level.as_str().to_lowercase()).parse()?))
        .init();

    // Start metrics endpoint
    tokio::spawn(metrics::serve_metrics(metrics_addr));

    // One poller thread serves every check
    let checker = Arc::new(Checker::with_zero_linger(zero_linger));
    let poller = checker.spawn(shutdown_rx.clone())?;
    {
        let checker = checker.clone();
        tokio::task::spawn_blocking(move || checker.wait_until_ready()).await?;
    }
    info!(poller_fd = checker.poller_fd(), "checker ready");

    let scheduler = Scheduler::new(probe_interval_ms)?;

    // Targets list
    let targets = config_mgr.targets.clone();

    let run = scheduler.run(move || {
        let targets = targets.clone();
        let config_mgr = config_mgr.clone();
        let checker = checker.clone();
        async move {
            let targets_snapshot = { targets.read().await.clone() };
            let (default_port, default_timeout_ms, default_source) = {
                let config = config_mgr.config.read().await;
                (config.default_port, config.default_timeout_ms, config.source_addr.clone())
            };
            for t in targets_snapshot.into_iter() {
                let checker = checker.clone();
                let addr = t.probe_addr(default_port);
                let timeout = t.timeout(default_timeout_ms);
                let source = t.source_addr.clone().or_else(|| default_source.clone());
                // checks park their calling thread, keep them off the async workers
                tokio::task::spawn_blocking(move || {
                    match checker.check_addr_with_latency(&addr, source.as_deref(), timeout) {
                        Ok(latency) => {
                            info!("tcp handshake {} ({}) success: {:?}", t.name, addr, latency);
                            observe_latency(&t.name, latency.as_secs_f64() * 1000.0);
                        }
                        Err(CheckError::Timeout) => {
                            warn!("tcp handshake {} ({}) timed out after {:?}", t.name, addr, timeout);
                            inc_timeout(&t.name);
                        }
                        Err(e) => {
                            error!("tcp handshake {} ({}) failed: {}", t.name, addr, e);
                            inc_failure(&t.name, e.kind());
                        }
                    }
                });
            }
        }
    }, shutdown_rx);

    tokio::select! {
        res = run => res?,
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("received ctrl-c, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    tokio::task::spawn_blocking(move || poller.join())
        .await?
        .map_err(|_| anyhow::anyhow!("poller thread panicked"))??;

    Ok(())
}
