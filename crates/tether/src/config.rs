use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tether_connector::ConnectorOptions;

use crate::cli::FetchArg;

const DEFAULT_TICK: Duration = Duration::from_millis(16);

/// Contents of a `--config` file.
///
/// ```toml
/// tick_ms = 50
/// dedupe = true
///
/// [connector]
/// concurrency = "fifo-queued"
/// max_concurrent_requests = 2
/// timeout = 5.0
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub connector: ConnectorOptions,
    pub tick_ms: Option<u64>,
    pub dedupe: bool,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }
}

/// Everything a fetch run needs, after flags are applied over the file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub options: ConnectorOptions,
    pub tick: Duration,
    pub dedupe: bool,
}

impl Settings {
    pub fn resolve(arg: &FetchArg) -> Result<Self> {
        let file = match &arg.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(file, arg)
    }

    fn merge(file: FileConfig, arg: &FetchArg) -> Result<Self> {
        let mut options = file.connector;
        if let Some(base) = &arg.base {
            options.base_url = Some(base.clone());
        }
        if let Some(concurrency) = arg.concurrency {
            options.concurrency = concurrency.into();
        }
        if let Some(processing) = arg.processing {
            options.processing = processing.into();
        }
        if let Some(max) = arg.max {
            options.max_concurrent_requests = max;
        }
        if let Some(timeout) = arg.timeout {
            options.timeout = Duration::try_from_secs_f64(timeout)
                .with_context(|| format!("invalid timeout: {timeout}"))?;
        }
        options.reset_timeout_on_progress |= arg.reset_on_progress;
        options.cache_bust |= arg.cache_bust;

        let tick = arg
            .tick
            .or(file.tick_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TICK);
        if tick.is_zero() {
            anyhow::bail!("tick interval must be positive");
        }

        Ok(Self {
            options,
            tick,
            dedupe: file.dedupe || arg.dedupe,
        })
    }
}
