//! The event source seam.
//!
//! The run loop only needs three things from the notification subsystem: a
//! way to await the next batch, a synchronous flush of whatever it still
//! holds, and teardown. Batches are awaited one at a time, so a batch is
//! always fully processed before the next one is requested.

use async_trait::async_trait;

use super::WatchError;
use crate::config::Configuration;
use crate::types::EventBatch;

/// Something that can subscribe to change notifications.
pub trait EventSource {
    type Subscription: Subscription;

    /// Start delivering events for `config.watch_paths()`.
    fn subscribe(&self, config: &Configuration) -> Result<Self::Subscription, WatchError>;
}

/// A live subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next batch. An error means the subscription is broken.
    async fn next_batch(&mut self) -> Result<EventBatch, WatchError>;

    /// Take everything the subscription has received but not yet delivered.
    fn flush_pending(&mut self) -> Option<EventBatch>;

    /// Tear the subscription down. No batches are delivered afterwards.
    fn stop(&mut self);
}
