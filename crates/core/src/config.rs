// crates/core/src/config.rs
//! Tracker configuration and the process-wide default.
//!
//! The global default is a read-mostly snapshot: readers clone an
//! `Arc<TrackerConfig>`, writers publish a whole new `Arc`. A reader can
//! never observe a config that is half old and half new.

use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::status::OperationKind;

/// Default spacing between background refreshes for backup/restore jobs.
pub const DEFAULT_BACKUP_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default spacing between background refreshes for replication jobs.
pub const DEFAULT_REPLICATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default budget for `wait_for_completion` when no override is given.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Buffer size of per-handle status event channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Settings governing one handle's polling and waiting behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    pub default_timeout: Duration,
    /// Upper bound for exponential backoff after consecutive transient
    /// failures. `None` keeps a fixed `poll_interval`.
    pub max_poll_backoff: Option<Duration>,
    /// Dispose the handle as soon as a terminal state is observed.
    pub auto_dispose_on_terminal: bool,
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_BACKUP_POLL_INTERVAL,
            default_timeout: DEFAULT_WAIT_TIMEOUT,
            max_poll_backoff: None,
            auto_dispose_on_terminal: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// On-disk representation with explicit units.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TrackerConfigFile {
    poll_interval_ms: Option<u64>,
    default_timeout_secs: Option<u64>,
    max_poll_backoff_ms: Option<u64>,
    auto_dispose_on_terminal: Option<bool>,
    event_capacity: Option<usize>,
}

impl TrackerConfig {
    /// Built-in defaults for a given job kind.
    pub fn for_kind(kind: OperationKind) -> Self {
        let poll_interval = match kind {
            OperationKind::Backup | OperationKind::Restore => DEFAULT_BACKUP_POLL_INTERVAL,
            OperationKind::Replication => DEFAULT_REPLICATION_POLL_INTERVAL,
        };
        Self {
            poll_interval,
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_poll_backoff(mut self, cap: Option<Duration>) -> Self {
        self.max_poll_backoff = cap;
        self
    }

    pub fn with_auto_dispose(mut self, enabled: bool) -> Self {
        self.auto_dispose_on_terminal = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        Ok(())
    }

    /// Parse a TOML document, filling unspecified keys from `Self::default()`.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: TrackerConfigFile = toml::from_str(raw)?;
        let mut config = Self::default();
        if let Some(ms) = file.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = file.default_timeout_secs {
            config.default_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = file.max_poll_backoff_ms {
            config.max_poll_backoff = Some(Duration::from_millis(ms));
        }
        if let Some(flag) = file.auto_dispose_on_terminal {
            config.auto_dispose_on_terminal = flag;
        }
        if let Some(cap) = file.event_capacity {
            config.event_capacity = cap;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overlay `OPTRACK_*` environment variables onto `self`.
    pub fn with_env_overrides(self) -> Self {
        self.overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse_var::<u64>(&lookup, "OPTRACK_POLL_INTERVAL_MS") {
            if ms > 0 {
                self.poll_interval = Duration::from_millis(ms);
            }
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "OPTRACK_DEFAULT_TIMEOUT_SECS") {
            if secs > 0 {
                self.default_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "OPTRACK_MAX_POLL_BACKOFF_MS") {
            self.max_poll_backoff = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(flag) = parse_var::<bool>(&lookup, "OPTRACK_AUTO_DISPOSE") {
            self.auto_dispose_on_terminal = flag;
        }
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable tracker config variable");
            None
        }
    }
}

static GLOBAL_CONFIG: OnceLock<RwLock<Arc<TrackerConfig>>> = OnceLock::new();

fn global_cell() -> &'static RwLock<Arc<TrackerConfig>> {
    GLOBAL_CONFIG.get_or_init(|| RwLock::new(Arc::new(TrackerConfig::default())))
}

/// Current process-wide default config.
pub fn global_config() -> Arc<TrackerConfig> {
    match global_cell().read() {
        Ok(guard) => Arc::clone(&guard),
        Err(poisoned) => {
            tracing::error!("global tracker config lock poisoned on read");
            Arc::clone(&poisoned.into_inner())
        }
    }
}

/// Publish a new process-wide default. Handles created earlier keep the
/// snapshot they were built with.
pub fn set_global_config(config: TrackerConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let next = Arc::new(config);
    match global_cell().write() {
        Ok(mut guard) => *guard = next,
        Err(poisoned) => {
            tracing::error!("global tracker config lock poisoned on write");
            *poisoned.into_inner() = next;
        }
    }
    Ok(())
}

/// Restore the built-in default.
pub fn reset_global_config() {
    // Built-in defaults always validate.
    let _ = set_global_config(TrackerConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_per_kind() {
        assert_eq!(
            TrackerConfig::for_kind(OperationKind::Backup).poll_interval,
            Duration::from_secs(2)
        );
        assert_eq!(
            TrackerConfig::for_kind(OperationKind::Replication).poll_interval,
            Duration::from_secs(5)
        );
        for kind in [OperationKind::Backup, OperationKind::Restore, OperationKind::Replication] {
            let config = TrackerConfig::for_kind(kind);
            assert_eq!(config.default_timeout, Duration::from_secs(1800));
            assert!(!config.auto_dispose_on_terminal);
            assert!(config.max_poll_backoff.is_none());
        }
    }

    #[test]
    fn test_validate() {
        assert!(TrackerConfig::default().validate().is_ok());
        let zero = TrackerConfig::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(zero.validate(), Err(ConfigError::ZeroPollInterval)));
        let zero = TrackerConfig::default().with_default_timeout(Duration::ZERO);
        assert!(matches!(zero.validate(), Err(ConfigError::ZeroTimeout)));
    }

    #[test]
    fn test_from_toml() {
        let config = TrackerConfig::from_toml_str(
            r#"
            poll_interval_ms = 250
            default_timeout_secs = 60
            max_poll_backoff_ms = 4000
            auto_dispose_on_terminal = true
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.default_timeout, Duration::from_secs(60));
        assert_eq!(config.max_poll_backoff, Some(Duration::from_secs(4)));
        assert!(config.auto_dispose_on_terminal);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_from_toml_rejects_unknown_and_zero() {
        assert!(matches!(
            TrackerConfig::from_toml_str("poll_interval = 5"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            TrackerConfig::from_toml_str("poll_interval_ms = 0"),
            Err(ConfigError::ZeroPollInterval)
        ));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPTRACK_POLL_INTERVAL_MS", "500"),
            ("OPTRACK_DEFAULT_TIMEOUT_SECS", "not-a-number"),
            ("OPTRACK_MAX_POLL_BACKOFF_MS", "8000"),
            ("OPTRACK_AUTO_DISPOSE", "true"),
        ]);
        let config = TrackerConfig::default().overlay(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        // Unparsable values leave the base untouched.
        assert_eq!(config.default_timeout, DEFAULT_WAIT_TIMEOUT);
        assert_eq!(config.max_poll_backoff, Some(Duration::from_secs(8)));
        assert!(config.auto_dispose_on_terminal);
    }

    #[test]
    fn test_global_config_publish_is_whole() {
        let custom = TrackerConfig::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_default_timeout(Duration::from_secs(5));
        set_global_config(custom.clone()).unwrap();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    for _ in 0..200 {
                        let cfg = global_config();
                        // Either the custom pair or the built-in pair, never a mix.
                        let custom_pair = cfg.poll_interval == Duration::from_millis(100)
                            && cfg.default_timeout == Duration::from_secs(5);
                        let default_pair = cfg.poll_interval == DEFAULT_BACKUP_POLL_INTERVAL
                            && cfg.default_timeout == DEFAULT_WAIT_TIMEOUT;
                        assert!(custom_pair || default_pair);
                    }
                })
            })
            .collect();
        for _ in 0..50 {
            reset_global_config();
            set_global_config(custom.clone()).unwrap();
        }
        for r in readers {
            r.join().expect("reader panicked");
        }
        reset_global_config();
    }

    #[test]
    fn test_set_global_rejects_invalid() {
        let bad = TrackerConfig::default().with_poll_interval(Duration::ZERO);
        assert!(set_global_config(bad).is_err());
        assert!(!global_config().poll_interval.is_zero());
    }
}
