use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use anyhow::Result;
use crate::util::{join_host_port, parse_host_port};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TargetConfig {
    pub name: String,
    pub host: String,
    pub port: Option<u16>,
    /// Overrides `default_timeout_ms` for this target
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Overrides the global `source_addr` for this target
    #[serde(default)]
    pub source_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProbeConfig {
    pub probe_interval_ms: u64,
    pub default_timeout_ms: u64,
    #[serde(default = "default_port")]
    pub default_port: u16,
    pub targets: Vec<TargetConfig>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_enable_latency_history")]
    pub enable_latency_history: bool,
    #[serde(default = "default_zero_linger")]
    pub zero_linger: bool,
    #[serde(default)]
    pub source_addr: Option<String>,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,
}

fn default_port() -> u16 {
    80
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enable_latency_history() -> bool {
    false // Default to show current latency only
}

fn default_zero_linger() -> bool {
    true
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9100))
}

impl ProbeConfig {
    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" | "warning" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            _ => Err(anyhow::anyhow!("Invalid log level: {}. Valid levels are: trace, debug, info, warn, error", self.log_level))
        }
    }

    /// Reject configs the prober cannot run with
    pub fn validate(&self) -> Result<()> {
        self.get_tracing_level()?;
        if self.probe_interval_ms == 0 {
            return Err(anyhow::anyhow!("probe_interval_ms must be greater than zero"));
        }
        if self.default_timeout_ms == 0 {
            return Err(anyhow::anyhow!("default_timeout_ms must be greater than zero"));
        }
        Ok(())
    }
}

pub struct ConfigManager {
    pub config: Arc<RwLock<ProbeConfig>>,
    pub targets: Arc<RwLock<Vec<TargetConfig>>>,

    // file watcher, stops when shutdown fires or the manager drops
    watcher: JoinHandle<()>,
}

impl ConfigManager {
    pub async fn start(shutdown: watch::Receiver<bool>) -> Result<Self> {
        let config_file = std::env::var("TARGET_CONFIG")
            .unwrap_or_else(|_| "targets.json".to_string());
        let poll_interval_sec: u64 = std::env::var("CONFIG_POLL_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        Self::start_with_local_file(config_file, Duration::from_secs(poll_interval_sec), shutdown).await
    }

    pub async fn start_with_local_file(
        config_file: String,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        println!("Starting with local file: {}", config_file);

        // Load initial config from file
        let initial = Self::load_file_config(&config_file).await?;
        let config = Arc::new(RwLock::new(initial.clone()));
        let targets = Arc::new(RwLock::new(initial.targets.clone()));

        // Spawn background task to watch file for changes
        let watcher = {
            let config_clone = config.clone();
            let targets_clone = targets.clone();
            let config_file_clone = config_file.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                tracing::debug!("Config watcher stopped");
                                return;
                            }
                            continue;
                        }
                    }
                    match Self::load_file_config(&config_file_clone).await {
                        Ok(new_cfg) => {
                            // check if changed
                            let mut c = config_clone.write().await;
                            if *c != new_cfg {
                                tracing::info!("Local config file updated");
                                *c = new_cfg.clone();
                                // update targets list
                                let mut t = targets_clone.write().await;
                                *t = new_cfg.targets.clone();
                            }
                        }
                        Err(e) => {
                            tracing::error!("Error reading config file {}: {:?}", config_file_clone, e);
                        }
                    }
                }
            })
        };

        Ok(ConfigManager {
            config,
            targets,
            watcher,
        })
    }

    #[cfg(test)]
    fn watcher_finished(&self) -> bool {
        self.watcher.is_finished()
    }

    async fn load_file_config(file_path: &str) -> Result<ProbeConfig> {
        if !Path::new(file_path).exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", file_path));
        }

        let content = fs::read_to_string(file_path).await?;
        let config: ProbeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

impl Drop for ConfigManager {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

impl TargetConfig {
    pub fn get_host_port(&self, default_port: u16) -> (String, u16) {
        parse_host_port(&self.host, self.port.unwrap_or(default_port))
    }

    /// Address string handed to the checker
    pub fn probe_addr(&self, default_port: u16) -> String {
        let (host, port) = self.get_host_port(default_port);
        join_host_port(&host, port)
    }

    pub fn timeout(&self, default_timeout_ms: u64) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(default_timeout_ms))
    }
}
