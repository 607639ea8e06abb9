//! Runtime capability queries for optional stream features.

use crate::types::StreamFlags;

/// Optional features a subscription may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFeature {
    NoDefer,
    WatchRoot,
    IgnoreSelf,
    FileEvents,
}

impl StreamFeature {
    pub const ALL: [StreamFeature; 4] = [
        StreamFeature::NoDefer,
        StreamFeature::WatchRoot,
        StreamFeature::IgnoreSelf,
        StreamFeature::FileEvents,
    ];

    pub fn flag(&self) -> StreamFlags {
        match self {
            Self::NoDefer => StreamFlags::NO_DEFER,
            Self::WatchRoot => StreamFlags::WATCH_ROOT,
            Self::IgnoreSelf => StreamFlags::IGNORE_SELF,
            Self::FileEvents => StreamFlags::FILE_EVENTS,
        }
    }

    /// Command-line spelling, used in diagnostics.
    pub fn option_name(&self) -> &'static str {
        match self {
            Self::NoDefer => "--no-defer",
            Self::WatchRoot => "--watch-root",
            Self::IgnoreSelf => "--ignore-self",
            Self::FileEvents => "--file-events",
        }
    }
}

/// Answers whether the running host can honor a feature.
pub trait Capabilities {
    fn supports(&self, feature: StreamFeature) -> bool;

    /// Name of the backend, for diagnostics.
    fn backend(&self) -> &str;
}

/// Capabilities of the notify-backed event source on this host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCapabilities;

impl Capabilities for HostCapabilities {
    fn supports(&self, feature: StreamFeature) -> bool {
        match feature {
            StreamFeature::NoDefer | StreamFeature::WatchRoot | StreamFeature::FileEvents => true,
            // notify reports no originating process, so own writes can't be filtered
            StreamFeature::IgnoreSelf => false,
        }
    }

    fn backend(&self) -> &str {
        if cfg!(target_os = "macos") {
            "FSEvents (notify)"
        } else if cfg!(any(target_os = "linux", target_os = "android")) {
            "inotify (notify)"
        } else if cfg!(windows) {
            "ReadDirectoryChangesW (notify)"
        } else {
            "notify"
        }
    }
}
