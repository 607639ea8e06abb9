//! The run loop: subscribe, write every batch, drain on shutdown.
//!
//! ```text
//! Idle -> Subscribed -> Running -> Draining -> Stopped
//! ```
//!
//! Batches are awaited one at a time. Each is formatted, written and flushed
//! before the next is requested, so output order is delivery order. A
//! shutdown signal moves the loop to `Draining`, where whatever the
//! subscription still holds goes out as one last batch before teardown.
//! Any error while running is fatal.

use std::future::Future;
use std::io::Write;

use super::error::WatchError;
use super::source::{EventSource, Subscription};
use crate::config::Configuration;
use crate::io::format_batch;
use crate::types::EventBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Subscribed,
    Running,
    Draining,
    Stopped,
}

/// Counters reported when the loop ends cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: u64,
    pub events: u64,
    /// Whether the drain produced a final batch.
    pub drained: bool,
}

pub struct RunLoop<'a, W: Write> {
    config: &'a Configuration,
    out: W,
    state: RunState,
    summary: RunSummary,
}

impl<'a, W: Write> RunLoop<'a, W> {
    pub fn new(config: &'a Configuration, out: W) -> Self {
        Self {
            config,
            out,
            state: RunState::Idle,
            summary: RunSummary::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Consume the loop and hand back the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Run until `shutdown` resolves or an error occurs.
    ///
    /// Returns once the subscription has been stopped, in both cases.
    pub async fn run<S, F>(&mut self, source: &S, shutdown: F) -> Result<RunSummary, WatchError>
    where
        S: EventSource,
        F: Future<Output = ()>,
    {
        let mut subscription = source.subscribe(self.config)?;
        self.transition(RunState::Subscribed);

        tokio::pin!(shutdown);
        self.transition(RunState::Running);

        let outcome = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break Ok(()),

                batch = subscription.next_batch() => {
                    if let Err(e) = batch.and_then(|batch| self.emit(&batch)) {
                        break Err(e);
                    }
                }
            }
        };

        let outcome = match outcome {
            Ok(()) => {
                self.transition(RunState::Draining);
                match subscription.flush_pending() {
                    Some(batch) => {
                        self.summary.drained = true;
                        self.emit(&batch)
                    }
                    None => Ok(()),
                }
            }
            Err(e) => {
                tracing::error!("[run_loop] subscription failed: {e}");
                Err(e)
            }
        };

        subscription.stop();
        self.transition(RunState::Stopped);

        outcome.map(|()| self.summary)
    }

    /// Write one batch and flush it.
    fn emit(&mut self, batch: &EventBatch) -> Result<(), WatchError> {
        let bytes = format_batch(batch, self.config.format());
        self.out.write_all(&bytes)?;
        self.out.flush()?;

        self.summary.batches += 1;
        self.summary.events += batch.len() as u64;

        if tracing::enabled!(tracing::Level::TRACE) {
            for event in batch {
                tracing::trace!(
                    "[run_loop] {} {:#x} {}: {}",
                    event.id,
                    event.flags.bits(),
                    event.path,
                    event.flags.describe().join(", ")
                );
            }
        }
        Ok(())
    }

    fn transition(&mut self, next: RunState) {
        crate::debug_event!("run_loop", "state", "{:?} -> {next:?}", self.state);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::HostCapabilities;
    use crate::config::WatchRequest;
    use crate::io::OutputFormat;
    use crate::types::{EventFlags, EventId, RawEvent};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    /// Delivers a fixed script, then signals exhaustion and waits forever.
    struct ScriptedSource {
        script: Mutex<Option<VecDeque<Result<EventBatch, WatchError>>>>,
        leftover: Option<EventBatch>,
        exhausted: Mutex<Option<oneshot::Sender<()>>>,
        stopped: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(
            script: Vec<Result<EventBatch, WatchError>>,
            leftover: Option<EventBatch>,
        ) -> (Self, oneshot::Receiver<()>) {
            let (tx, rx) = oneshot::channel();
            let source = Self {
                script: Mutex::new(Some(script.into())),
                leftover,
                exhausted: Mutex::new(Some(tx)),
                stopped: Arc::new(AtomicBool::new(false)),
            };
            (source, rx)
        }
    }

    struct ScriptedSubscription {
        script: VecDeque<Result<EventBatch, WatchError>>,
        leftover: Option<EventBatch>,
        exhausted: Option<oneshot::Sender<()>>,
        stopped: Arc<AtomicBool>,
    }

    impl EventSource for ScriptedSource {
        type Subscription = ScriptedSubscription;

        fn subscribe(&self, _config: &Configuration) -> Result<ScriptedSubscription, WatchError> {
            Ok(ScriptedSubscription {
                script: self.script.lock().unwrap().take().unwrap_or_default(),
                leftover: self.leftover.clone(),
                exhausted: self.exhausted.lock().unwrap().take(),
                stopped: self.stopped.clone(),
            })
        }
    }

    #[async_trait]
    impl Subscription for ScriptedSubscription {
        async fn next_batch(&mut self) -> Result<EventBatch, WatchError> {
            if let Some(next) = self.script.pop_front() {
                return next;
            }
            if let Some(tx) = self.exhausted.take() {
                let _ = tx.send(());
            }
            std::future::pending().await
        }

        fn flush_pending(&mut self) -> Option<EventBatch> {
            self.leftover.take()
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    /// Records every write and flush as it happens.
    #[derive(Default)]
    struct Recorder {
        bytes: Vec<u8>,
        /// Length of `bytes` at each flush.
        flushes: Vec<usize>,
        fail: bool,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fail {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"));
            }
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes.push(self.bytes.len());
            Ok(())
        }
    }

    fn config(format: OutputFormat) -> Configuration {
        let request = WatchRequest {
            format,
            ..WatchRequest::default()
        };
        Configuration::build(request, &HostCapabilities).unwrap()
    }

    fn batch(paths: &[&str]) -> EventBatch {
        paths
            .iter()
            .enumerate()
            .map(|(i, p)| RawEvent::new(*p, EventFlags::ITEM_MODIFIED, EventId::new(i as u64)))
            .collect::<Vec<_>>()
            .into()
    }

    fn shutdown_after(rx: oneshot::Receiver<()>) -> impl Future<Output = ()> {
        async move {
            let _ = rx.await;
        }
    }

    #[tokio::test]
    async fn test_batches_written_in_order_with_one_flush_each() {
        let config = config(OutputFormat::Classic);
        let (source, done) = ScriptedSource::new(
            vec![Ok(batch(&["/a", "/b"])), Ok(batch(&["/c"])), Ok(batch(&["/d"]))],
            None,
        );

        let mut run_loop = RunLoop::new(&config, Recorder::default());
        let summary = run_loop.run(&source, shutdown_after(done)).await.unwrap();

        assert_eq!(run_loop.state(), RunState::Stopped);
        assert_eq!(
            summary,
            RunSummary {
                batches: 3,
                events: 4,
                drained: false
            }
        );
        assert!(source.stopped.load(Ordering::SeqCst));

        let out = run_loop.into_inner();
        assert_eq!(out.bytes, b"/a:/b:\n/c:\n/d:\n");
        assert_eq!(out.flushes, vec![7, 11, 15]);
    }

    #[tokio::test]
    async fn test_drain_emits_final_batch_before_stop() {
        let config = config(OutputFormat::Niw);
        let (source, done) =
            ScriptedSource::new(vec![Ok(batch(&["/a"]))], Some(batch(&["/late"])));

        let mut run_loop = RunLoop::new(&config, Recorder::default());
        let summary = run_loop.run(&source, shutdown_after(done)).await.unwrap();

        assert!(summary.drained);
        assert_eq!(summary.batches, 2);
        let out = run_loop.into_inner();
        assert_eq!(out.bytes, b"4096:0:/a\n\n4096:0:/late\n\n");
        assert_eq!(out.flushes.len(), 2);
    }

    #[tokio::test]
    async fn test_immediate_shutdown_writes_nothing() {
        let config = config(OutputFormat::Classic);
        let (source, _done) = ScriptedSource::new(vec![Ok(batch(&["/a"]))], None);

        let mut run_loop = RunLoop::new(&config, Recorder::default());
        let summary = run_loop.run(&source, async {}).await.unwrap();

        assert_eq!(summary, RunSummary::default());
        assert!(source.stopped.load(Ordering::SeqCst));
        assert!(run_loop.into_inner().bytes.is_empty());
    }

    #[tokio::test]
    async fn test_subscription_error_is_fatal() {
        let config = config(OutputFormat::Classic);
        let (source, done) = ScriptedSource::new(
            vec![
                Ok(batch(&["/a"])),
                Err(WatchError::ChannelClosed),
                Ok(batch(&["/never"])),
            ],
            Some(batch(&["/never-drained"])),
        );

        let mut run_loop = RunLoop::new(&config, Recorder::default());
        let err = run_loop
            .run(&source, shutdown_after(done))
            .await
            .unwrap_err();

        assert!(matches!(err, WatchError::ChannelClosed));
        assert_eq!(run_loop.state(), RunState::Stopped);
        assert!(source.stopped.load(Ordering::SeqCst));
        assert_eq!(run_loop.into_inner().bytes, b"/a:\n");
    }

    #[tokio::test]
    async fn test_write_failure_is_fatal() {
        let config = config(OutputFormat::Tnetstring);
        let (source, done) = ScriptedSource::new(vec![Ok(batch(&["/a"]))], None);

        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut run_loop = RunLoop::new(&config, recorder);
        let err = run_loop
            .run(&source, shutdown_after(done))
            .await
            .unwrap_err();

        assert!(matches!(err, WatchError::Output(_)));
        assert!(source.stopped.load(Ordering::SeqCst));
    }
}
