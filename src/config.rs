//! Configuration for a watch session.
//!
//! Two layers live here:
//! - [`Configuration`]: the immutable watch request (paths, cursor, latency,
//!   stream flags, output format), built once from CLI input and handed to the
//!   run loop by reference.
//! - [`Settings`]: ambient knobs (logging levels, queue capacity) layered with
//!   figment from defaults and `FSEVENT_WATCH_` environment variables.
//!
//! # Environment Variables
//!
//! Use double underscores to separate nested levels:
//! - `FSEVENT_WATCH_LOGGING__DEFAULT=debug` sets `logging.default`
//! - `FSEVENT_WATCH_LOGGING__MODULES__WATCHER=trace` sets `logging.modules.watcher`
//! - `FSEVENT_WATCH_QUEUE_CAPACITY=4096` sets `queue_capacity`

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::{Capabilities, StreamFeature};
use crate::io::OutputFormat;
use crate::paths::{self, WatchPath};
use crate::types::{EventId, StreamFlags};

/// Environment prefix for [`Settings`].
pub const ENV_PREFIX: &str = "FSEVENT_WATCH_";

/// Latency used when `--latency` is not given.
pub const DEFAULT_LATENCY_SECS: f64 = 0.5;

/// Startup-time configuration failures. All are fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown output format: {name}")]
    UnknownFormat { name: String },

    #[error("Invalid value '{value}' for {option}: {reason}")]
    InvalidNumber {
        option: &'static str,
        value: String,
        reason: String,
    },

    #[error("{option} is not supported by the {backend} backend")]
    Unsupported {
        option: &'static str,
        backend: String,
    },

    #[error("Failed to load settings: {0}")]
    Settings(#[from] Box<figment::Error>),
}

/// Logging levels, applied unless `RUST_LOG` is set.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for every target.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `watcher = "trace"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

/// Ambient settings that are not part of the watch request.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Capacity of the queue between the OS watcher and the coalescer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Settings {
    /// Load settings from defaults and `FSEVENT_WATCH_*` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(ENV_PREFIX))
    }

    /// Defaults layered with environment variables under `prefix`.
    pub fn figment(prefix: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Env::prefixed(prefix).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract::<Settings>()
            .map_err(|e| ConfigError::Settings(Box::new(e)))
    }
}

/// A watch request as parsed from the command line, before validation.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub paths: Vec<PathBuf>,
    pub since: EventId,
    pub latency_secs: f64,
    pub features: Vec<StreamFeature>,
    pub format: OutputFormat,
}

impl Default for WatchRequest {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            since: EventId::SINCE_NOW,
            latency_secs: DEFAULT_LATENCY_SECS,
            features: Vec::new(),
            format: OutputFormat::Classic,
        }
    }
}

/// Immutable snapshot of a watch session.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    watch_paths: Vec<WatchPath>,
    since: EventId,
    latency: Duration,
    flags: StreamFlags,
    format: OutputFormat,
}

impl Configuration {
    /// Validate a request against the host and canonicalize its paths.
    ///
    /// Paths keep input order and duplicates; `.` is watched when none are
    /// given.
    pub fn build(
        request: WatchRequest,
        capabilities: &dyn Capabilities,
    ) -> Result<Self, ConfigError> {
        let latency = Duration::try_from_secs_f64(request.latency_secs).map_err(|e| {
            ConfigError::InvalidNumber {
                option: "--latency",
                value: request.latency_secs.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut flags = StreamFlags::empty();
        for feature in &request.features {
            if !capabilities.supports(*feature) {
                return Err(ConfigError::Unsupported {
                    option: feature.option_name(),
                    backend: capabilities.backend().to_string(),
                });
            }
            flags |= feature.flag();
        }

        let inputs = if request.paths.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            request.paths
        };
        let watch_paths = inputs.iter().map(paths::canonicalize).collect();

        Ok(Self {
            watch_paths,
            since: request.since,
            latency,
            flags,
            format: request.format,
        })
    }

    pub fn watch_paths(&self) -> &[WatchPath] {
        &self.watch_paths
    }

    pub fn since(&self) -> EventId {
        self.since
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    pub fn has(&self, flag: StreamFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Dump the snapshot at debug level.
    pub fn log_summary(&self) {
        crate::debug_event!("config", "since", "{}", self.since);
        crate::debug_event!("config", "latency", "{:.3}s", self.latency.as_secs_f64());
        crate::debug_event!("config", "flags", "{:#010x} {:?}", self.flags.bits(), self.flags);
        crate::debug_event!("config", "format", "{}", self.format);
        for path in &self.watch_paths {
            crate::debug_event!("config", "path", "{path}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Everything;

    impl Capabilities for Everything {
        fn supports(&self, _feature: StreamFeature) -> bool {
            true
        }

        fn backend(&self) -> &str {
            "test"
        }
    }

    struct Nothing;

    impl Capabilities for Nothing {
        fn supports(&self, _feature: StreamFeature) -> bool {
            false
        }

        fn backend(&self) -> &str {
            "limited"
        }
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::build(WatchRequest::default(), &Everything).unwrap();
        assert!(config.since().is_since_now());
        assert_eq!(config.latency(), Duration::from_millis(500));
        assert!(config.flags().is_empty());
        assert_eq!(config.format(), OutputFormat::Classic);
        assert_eq!(config.watch_paths().len(), 1);
        assert_eq!(
            config.watch_paths()[0].as_path(),
            fs::canonicalize(".").unwrap().as_path()
        );
    }

    #[test]
    fn test_paths_keep_order_and_duplicates() {
        let dir = TempDir::new().unwrap();
        let base = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir(base.join("a")).unwrap();

        let request = WatchRequest {
            paths: vec![base.join("b"), base.join("a"), base.join("b")],
            ..WatchRequest::default()
        };
        let config = Configuration::build(request, &Everything).unwrap();
        let got: Vec<PathBuf> = config
            .watch_paths()
            .iter()
            .map(|p| p.as_path().to_path_buf())
            .collect();
        assert_eq!(got, vec![base.join("b"), base.join("a"), base.join("b")]);
    }

    #[test]
    fn test_features_become_flags() {
        let request = WatchRequest {
            features: vec![StreamFeature::NoDefer, StreamFeature::FileEvents],
            ..WatchRequest::default()
        };
        let config = Configuration::build(request, &Everything).unwrap();
        assert_eq!(
            config.flags(),
            StreamFlags::NO_DEFER | StreamFlags::FILE_EVENTS
        );
        assert!(config.has(StreamFlags::FILE_EVENTS));
        assert!(!config.has(StreamFlags::WATCH_ROOT));
    }

    #[test]
    fn test_unsupported_feature_is_rejected() {
        let request = WatchRequest {
            features: vec![StreamFeature::IgnoreSelf],
            ..WatchRequest::default()
        };
        let err = Configuration::build(request, &Nothing).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Unsupported {
                option: "--ignore-self",
                ..
            }
        ));
        assert!(err.to_string().contains("limited"));
    }

    #[test]
    fn test_invalid_latency_is_rejected() {
        for latency_secs in [-1.0, f64::NAN, f64::INFINITY] {
            let request = WatchRequest {
                latency_secs,
                ..WatchRequest::default()
            };
            assert!(matches!(
                Configuration::build(request, &Everything),
                Err(ConfigError::InvalidNumber { option: "--latency", .. })
            ));
        }
    }

    #[test]
    fn test_zero_latency_is_allowed() {
        let request = WatchRequest {
            latency_secs: 0.0,
            ..WatchRequest::default()
        };
        let config = Configuration::build(request, &Everything).unwrap();
        assert_eq!(config.latency(), Duration::ZERO);
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.logging.default, "warn");
        assert!(settings.logging.modules.is_empty());
        assert_eq!(settings.queue_capacity, 1024);
    }

    #[test]
    fn test_settings_layering() {
        let figment = Settings::figment("FSEVENT_WATCH_UNIT_TEST_UNSET_")
            .merge(("logging.default", "debug"))
            .merge(("logging.modules.watcher", "trace"))
            .merge(("queue_capacity", 16));
        let settings = Settings::from_figment(figment).unwrap();
        assert_eq!(settings.logging.default, "debug");
        assert_eq!(settings.logging.modules.get("watcher").unwrap(), "trace");
        assert_eq!(settings.queue_capacity, 16);
    }

    #[test]
    fn test_settings_env_override() {
        let prefix = "FSEVENT_WATCH_UNIT_ENV_";
        unsafe {
            std::env::set_var("FSEVENT_WATCH_UNIT_ENV_LOGGING__DEFAULT", "info");
            std::env::set_var("FSEVENT_WATCH_UNIT_ENV_QUEUE_CAPACITY", "64");
        }

        let settings = Settings::from_figment(Settings::figment(prefix)).unwrap();

        unsafe {
            std::env::remove_var("FSEVENT_WATCH_UNIT_ENV_LOGGING__DEFAULT");
            std::env::remove_var("FSEVENT_WATCH_UNIT_ENV_QUEUE_CAPACITY");
        }

        assert_eq!(settings.logging.default, "info");
        assert_eq!(settings.queue_capacity, 64);
    }

    #[test]
    fn test_bad_settings_value() {
        let figment = Settings::figment("FSEVENT_WATCH_UNIT_TEST_UNSET_")
            .merge(("queue_capacity", "lots"));
        assert!(matches!(
            Settings::from_figment(figment),
            Err(ConfigError::Settings(_))
        ));
    }
}
