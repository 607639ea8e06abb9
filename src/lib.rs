pub mod capabilities;
pub mod cli;
pub mod config;
pub mod io;
pub mod logging;
pub mod paths;
pub mod process;
pub mod types;
pub mod watcher;

pub use capabilities::{Capabilities, HostCapabilities, StreamFeature};
pub use config::{ConfigError, Configuration, Settings, WatchRequest};
pub use io::{OutputFormat, format_batch};
pub use paths::{WatchPath, canonicalize};
pub use types::*;
pub use watcher::{EventSource, NotifySource, RunLoop, RunState, Subscription, WatchError};
