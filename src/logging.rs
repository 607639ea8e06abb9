//! Diagnostic logging to standard error.
//!
//! Standard output carries the event stream, so every log line goes to
//! stderr. Levels come from [`LoggingConfig`]; `RUST_LOG` takes precedence.
//!
//! ```bash
//! RUST_LOG=debug fsevent_watch .
//! FSEVENT_WATCH_LOGGING__MODULES__WATCHER=trace fsevent_watch -F src
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Build the filter directive string from configuration.
///
/// Module names are crate-relative (`watcher`, `paths`) and are expanded to
/// full targets.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut filter_str = config.default.clone();
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    for (module, level) in modules {
        filter_str.push_str(&format!(",fsevent_watch::{module}={level}"));
    }
    filter_str
}

/// Initialize logging. Only the first call takes effect.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("watcher", "subscribed", "{} paths", paths.len());
/// log_event!("run_loop", "draining");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("paths", "resolved", "{}", path.display());
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}
