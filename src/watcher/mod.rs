//! Change subscription and delivery.
//!
//! # Architecture
//!
//! ```text
//! notify::RecommendedWatcher
//!   -> mpsc channel
//!   -> Translator (kinds to flags, ids)
//!   -> Coalescer (latency batching)
//!   -> RunLoop (format, write, flush)
//! ```
//!
//! [`EventSource`] is the seam: the run loop only sees batches, so tests can
//! drive it with scripted sources.

mod coalescer;
mod error;
mod notify_source;
mod run_loop;
mod source;

pub use coalescer::Coalescer;
pub use error::WatchError;
pub use notify_source::{NotifySource, NotifySubscription};
pub use run_loop::{RunLoop, RunState, RunSummary};
pub use source::{EventSource, Subscription};
