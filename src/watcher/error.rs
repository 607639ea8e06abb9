//! Errors from the event stream and the output it feeds.

use std::path::PathBuf;
use thiserror::Error;

/// Subscription and delivery failures. There is no recovery: every variant
/// ends the session with exit status 1.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Could not create event stream: {reason}")]
    StreamCreate { reason: String },

    #[error("Could not watch {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Event stream failed: {details}")]
    StreamFailed { details: String },

    #[error("Event stream ended unexpectedly")]
    ChannelClosed,

    #[error("Failed to write events to stdout: {0}")]
    Output(#[from] std::io::Error),
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        match e.paths.first() {
            Some(path) => WatchError::PathWatchFailed {
                path: path.clone(),
                reason: describe_kind(&e),
            },
            None => WatchError::StreamCreate {
                reason: e.to_string(),
            },
        }
    }
}

/// The error without notify's trailing path list.
fn describe_kind(e: &notify::Error) -> String {
    match &e.kind {
        notify::ErrorKind::Generic(msg) => msg.clone(),
        notify::ErrorKind::Io(io) => io.to_string(),
        notify::ErrorKind::PathNotFound => "no such path".to_string(),
        notify::ErrorKind::MaxFilesWatch => "OS file watch limit reached".to_string(),
        _ => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_error_with_path_names_the_path() {
        let err: WatchError = notify::Error::path_not_found()
            .add_path(PathBuf::from("/gone"))
            .into();
        assert!(matches!(err, WatchError::PathWatchFailed { ref path, .. } if path == &PathBuf::from("/gone")));
        assert_eq!(err.to_string(), "Could not watch /gone: no such path");
    }

    #[test]
    fn test_notify_error_without_path() {
        let err: WatchError = notify::Error::generic("no backend").into();
        assert!(matches!(err, WatchError::StreamCreate { .. }));
        assert!(err.to_string().contains("no backend"));
    }
}
