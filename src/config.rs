use crate::buffer::BufferKeys;
use crate::buffer::keys::{DEFAULT_BUFFER_PREFIX, DEFAULT_PROCESSING_PREFIX};
use crate::core::{Result, XpError};
use crate::storage::DurabilityMode;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration of the XP pipeline.
#[derive(Debug, Clone)]
pub struct XpConfig {
    /// Time between two sync cycles
    pub sync_interval: Duration,

    /// Extra durable rows fetched beyond the requested page for live merging
    pub overfetch_margin: usize,

    /// Upper bound for one batch transaction against the durable store
    pub transaction_timeout: Duration,

    /// Snapshots flushed in parallel within one cycle
    pub flush_concurrency: usize,

    /// Prefix of the live per-tenant buffer keys
    pub buffer_prefix: String,

    /// Prefix of drained snapshot keys
    pub processing_prefix: String,

    /// Directory for WAL and snapshot files; memory only when unset
    pub data_dir: Option<PathBuf>,

    pub durability_mode: DurabilityMode,

    /// WAL entries between two checkpoints
    pub checkpoint_threshold: usize,
}

impl Default for XpConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(25),
            overfetch_margin: 20,
            transaction_timeout: Duration::from_secs(10),
            flush_concurrency: 4,
            buffer_prefix: DEFAULT_BUFFER_PREFIX.to_string(),
            processing_prefix: DEFAULT_PROCESSING_PREFIX.to_string(),
            data_dir: None,
            durability_mode: DurabilityMode::default(),
            checkpoint_threshold: 1000,
        }
    }
}

impl XpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn overfetch_margin(mut self, margin: usize) -> Self {
        self.overfetch_margin = margin;
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn flush_concurrency(mut self, concurrency: usize) -> Self {
        self.flush_concurrency = concurrency;
        self
    }

    pub fn buffer_prefix(mut self, prefix: &str) -> Self {
        self.buffer_prefix = prefix.to_string();
        self
    }

    pub fn processing_prefix(mut self, prefix: &str) -> Self {
        self.processing_prefix = prefix.to_string();
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn durability_mode(mut self, mode: DurabilityMode) -> Self {
        self.durability_mode = mode;
        self
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    pub fn buffer_keys(&self) -> BufferKeys {
        BufferKeys::new(self.buffer_prefix.clone(), self.processing_prefix.clone())
    }

    /// Defaults overridden by `XP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("XP_SYNC_INTERVAL_MS")? {
            config.sync_interval = Duration::from_millis(ms);
        }
        if let Some(margin) = env_parse("XP_OVERFETCH_MARGIN")? {
            config.overfetch_margin = margin;
        }
        if let Some(ms) = env_parse::<u64>("XP_TRANSACTION_TIMEOUT_MS")? {
            config.transaction_timeout = Duration::from_millis(ms);
        }
        if let Some(concurrency) = env_parse("XP_FLUSH_CONCURRENCY")? {
            config.flush_concurrency = concurrency;
        }
        if let Some(prefix) = env_var("XP_BUFFER_PREFIX") {
            config.buffer_prefix = prefix;
        }
        if let Some(prefix) = env_var("XP_PROCESSING_PREFIX") {
            config.processing_prefix = prefix;
        }
        if let Some(dir) = env_var("XP_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = env_var("XP_DURABILITY") {
            config.durability_mode = mode.parse()?;
        }
        if let Some(threshold) = env_parse("XP_CHECKPOINT_THRESHOLD")? {
            config.checkpoint_threshold = threshold;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_interval.is_zero() {
            return Err(XpError::ConfigError("sync_interval must be > 0".to_string()));
        }

        if self.transaction_timeout.is_zero() {
            return Err(XpError::ConfigError("transaction_timeout must be > 0".to_string()));
        }

        if self.flush_concurrency == 0 {
            return Err(XpError::ConfigError("flush_concurrency must be > 0".to_string()));
        }

        if self.checkpoint_threshold == 0 {
            return Err(XpError::ConfigError("checkpoint_threshold must be > 0".to_string()));
        }

        for (name, prefix) in [
            ("buffer_prefix", &self.buffer_prefix),
            ("processing_prefix", &self.processing_prefix),
        ] {
            if prefix.is_empty() {
                return Err(XpError::ConfigError(format!("{} cannot be empty", name)));
            }
            if prefix.contains(':') {
                return Err(XpError::ConfigError(format!("{} cannot contain ':'", name)));
            }
        }

        if self.buffer_prefix == self.processing_prefix {
            return Err(XpError::ConfigError(
                "buffer_prefix and processing_prefix must differ".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    env_var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| XpError::ConfigError(format!("{} has invalid value '{}'", name, raw)))
        })
        .transpose()
}
