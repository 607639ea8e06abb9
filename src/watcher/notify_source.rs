//! Event source backed by the portable `notify` watcher.
//!
//! Raw notify events are translated into flag-carrying [`RawEvent`]s with
//! monotonically increasing ids, coalesced by latency, and handed out one
//! batch at a time.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::coalescer::Coalescer;
use super::error::WatchError;
use super::source::{EventSource, Subscription};
use crate::config::Configuration;
use crate::types::{EventBatch, EventFlags, EventId, RawEvent, StreamFlags};

/// Subscribes through `notify::recommended_watcher`.
#[derive(Debug, Clone)]
pub struct NotifySource {
    queue_capacity: usize,
}

impl NotifySource {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
        }
    }
}

impl Default for NotifySource {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSource for NotifySource {
    type Subscription = NotifySubscription;

    fn subscribe(&self, config: &Configuration) -> Result<NotifySubscription, WatchError> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        let roots: Vec<PathBuf> = config
            .watch_paths()
            .iter()
            .map(|p| p.as_path().to_path_buf())
            .collect();
        let targets = watch_targets(&roots, config.has(StreamFlags::WATCH_ROOT));

        for (target, mode) in &targets {
            watcher
                .watch(target, *mode)
                .map_err(|e| WatchError::PathWatchFailed {
                    path: target.clone(),
                    reason: e.to_string(),
                })?;
            crate::debug_event!("watcher", "watching", "{} ({mode:?})", target.display());
        }

        if !config.since().is_since_now() {
            tracing::warn!(
                "[watcher] history before subscription is unavailable; reporting live events after {}",
                config.since()
            );
        }

        crate::log_event!("watcher", "subscribed", "{} paths", roots.len());

        Ok(NotifySubscription {
            watcher: Some(watcher),
            targets,
            rx,
            translator: Translator::new(roots.clone(), config.flags(), config.since()),
            roots,
            watch_root: config.has(StreamFlags::WATCH_ROOT),
            coalescer: Coalescer::new(config.latency(), config.has(StreamFlags::NO_DEFER)),
            ready: VecDeque::new(),
        })
    }
}

/// Directories to hand to notify.
///
/// An existing root is watched recursively. A missing root is watched
/// through its nearest existing ancestor, non-recursively, so creation of
/// the next missing component is seen and the watch can move down. With
/// `watch_root`, each root's parent is watched too so the root itself being
/// moved or deleted is observed. Duplicates are merged, keeping recursion.
fn watch_targets(roots: &[PathBuf], watch_root: bool) -> Vec<(PathBuf, RecursiveMode)> {
    let mut targets: Vec<(PathBuf, RecursiveMode)> = Vec::new();
    let mut add = |path: PathBuf, mode: RecursiveMode| {
        match targets.iter_mut().find(|(existing, _)| *existing == path) {
            Some((_, current)) => {
                if mode == RecursiveMode::Recursive {
                    *current = RecursiveMode::Recursive;
                }
            }
            None => targets.push((path, mode)),
        }
    };

    for root in roots {
        if root.exists() {
            add(root.clone(), RecursiveMode::Recursive);
        } else if let Some(ancestor) = root.ancestors().skip(1).find(|p| p.exists()) {
            add(ancestor.to_path_buf(), RecursiveMode::NonRecursive);
        }

        if watch_root {
            if let Some(parent) = root.parent().filter(|p| p.exists()) {
                add(parent.to_path_buf(), RecursiveMode::NonRecursive);
            }
        }
    }
    targets
}

/// Watches to drop and watches to add to move from `current` to `desired`.
///
/// A path whose mode changes appears in both lists.
fn diff_targets(
    current: &[(PathBuf, RecursiveMode)],
    desired: &[(PathBuf, RecursiveMode)],
) -> (Vec<PathBuf>, Vec<(PathBuf, RecursiveMode)>) {
    let stale = current
        .iter()
        .filter(|target| !desired.contains(target))
        .map(|(path, _)| path.clone())
        .collect();
    let fresh = desired
        .iter()
        .filter(|target| !current.contains(target))
        .cloned()
        .collect();
    (stale, fresh)
}

/// A live notify subscription.
pub struct NotifySubscription {
    watcher: Option<RecommendedWatcher>,
    roots: Vec<PathBuf>,
    watch_root: bool,
    /// Watches currently installed.
    targets: Vec<(PathBuf, RecursiveMode)>,
    rx: mpsc::Receiver<notify::Result<Event>>,
    translator: Translator,
    coalescer: Coalescer,
    /// Batches produced immediately (no-defer) awaiting delivery.
    ready: VecDeque<EventBatch>,
}

impl NotifySubscription {
    fn ingest(&mut self, event: &Event, now: Instant) {
        if event.need_rescan() || changes_tree(&event.kind) {
            self.retarget(event);
        }
        for raw in self.translator.translate(event) {
            if let Some(batch) = self.coalescer.record(raw, now) {
                self.ready.push_back(batch);
            }
        }
    }

    /// Move watches after the tree changed: down towards roots that are
    /// being created, back up from roots that went away.
    fn retarget(&mut self, event: &Event) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };

        // A removed or renamed directory takes its OS watch with it, even if
        // it has been recreated by now.
        if matches!(event.kind, EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))) {
            self.targets.retain(|(target, _)| {
                let gone = event.paths.iter().any(|p| p == target);
                if gone {
                    let _ = watcher.unwatch(target);
                }
                !gone
            });
        }

        let desired = watch_targets(&self.roots, self.watch_root);
        let (stale, fresh) = diff_targets(&self.targets, &desired);
        if stale.is_empty() && fresh.is_empty() {
            return;
        }

        for target in &stale {
            if let Err(e) = watcher.unwatch(target) {
                crate::debug_event!("watcher", "unwatch failed", "{}: {e}", target.display());
            }
        }
        self.targets.retain(|(target, _)| !stale.contains(target));

        for (target, mode) in fresh {
            match watcher.watch(&target, mode) {
                Ok(()) => {
                    crate::debug_event!("watcher", "watching", "{} ({mode:?})", target.display());
                    self.targets.push((target, mode));
                }
                // Gone again already; the next tree change retries.
                Err(e) => {
                    crate::debug_event!("watcher", "watch failed", "{}: {e}", target.display());
                }
            }
        }
    }
}

#[async_trait]
impl Subscription for NotifySubscription {
    async fn next_batch(&mut self) -> Result<EventBatch, WatchError> {
        loop {
            if let Some(batch) = self.ready.pop_front() {
                return Ok(batch);
            }

            let deadline = self.coalescer.deadline();
            let wake = tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now));

            tokio::select! {
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    if let Some(batch) = self.coalescer.take_ready(Instant::now()) {
                        return Ok(batch);
                    }
                }
                message = self.rx.recv() => match message {
                    Some(Ok(event)) => self.ingest(&event, Instant::now()),
                    Some(Err(e)) => {
                        return Err(WatchError::StreamFailed {
                            details: e.to_string(),
                        });
                    }
                    None => return Err(WatchError::ChannelClosed),
                },
            }
        }
    }

    fn flush_pending(&mut self) -> Option<EventBatch> {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                Ok(event) => self.ingest(&event, Instant::now()),
                Err(e) => tracing::warn!("[watcher] error while flushing: {e}"),
            }
        }

        let mut flushed = EventBatch::default();
        for batch in self.ready.drain(..) {
            for event in batch.iter() {
                flushed.push(event.clone());
            }
        }
        if let Some(batch) = self.coalescer.drain() {
            for event in batch.iter() {
                flushed.push(event.clone());
            }
        }

        (!flushed.is_empty()).then_some(flushed)
    }

    fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            for (target, _) in &self.targets {
                if let Err(e) = watcher.unwatch(target) {
                    crate::debug_event!("watcher", "unwatch failed", "{}: {e}", target.display());
                }
            }
        }
        self.rx.close();
        crate::log_event!("watcher", "stopped");
    }
}

/// Monotonic event ids.
#[derive(Debug)]
struct IdSequence {
    next: u64,
}

impl IdSequence {
    fn starting_after(since: EventId) -> Self {
        let start = if since.is_since_now() {
            chrono::Utc::now()
                .timestamp_nanos_opt()
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or(0)
        } else {
            since.value().wrapping_add(1)
        };
        Self { next: start }
    }

    /// Returns the id and whether the sequence wrapped to produce it.
    fn next(&mut self) -> (EventId, bool) {
        // never hand out the since-now sentinel
        let wrapped = self.next == u64::MAX;
        if wrapped {
            self.next = 0;
        }
        let id = EventId::new(self.next);
        self.next += 1;
        (id, wrapped)
    }
}

/// Turns notify events into [`RawEvent`]s.
#[derive(Debug)]
struct Translator {
    roots: Vec<PathBuf>,
    file_events: bool,
    watch_root: bool,
    ids: IdSequence,
}

impl Translator {
    fn new(roots: Vec<PathBuf>, flags: StreamFlags, since: EventId) -> Self {
        Self {
            roots,
            file_events: flags.contains(StreamFlags::FILE_EVENTS),
            watch_root: flags.contains(StreamFlags::WATCH_ROOT),
            ids: IdSequence::starting_after(since),
        }
    }

    fn translate(&mut self, event: &Event) -> Vec<RawEvent> {
        let mut out = Vec::new();

        if event.need_rescan() {
            let candidates = if event.paths.is_empty() {
                &self.roots
            } else {
                &event.paths
            };
            let rendered: Vec<String> = candidates
                .iter()
                .filter(|p| self.in_scope(p))
                .map(|p| self.render(p))
                .collect();
            for path in rendered {
                let flags = EventFlags::MUST_SCAN_SUB_DIRS | EventFlags::KERNEL_DROPPED;
                out.push(self.make(path, flags));
            }
            return out;
        }

        let Some(item_flags) = item_flags(&event.kind) else {
            return out;
        };

        for path in &event.paths {
            if self.watch_root && self.is_root(path) && changes_tree(&event.kind) {
                out.push(self.make(lossy(path), EventFlags::ROOT_CHANGED));
                continue;
            }
            if !self.in_scope(path) {
                continue;
            }

            let rendered = self.render(path);
            let flags = if self.file_events {
                item_flags | item_type(&event.kind, path)
            } else {
                EventFlags::empty()
            };
            out.push(self.make(rendered, flags));
        }
        out
    }

    fn make(&mut self, path: String, mut flags: EventFlags) -> RawEvent {
        let (id, wrapped) = self.ids.next();
        if wrapped {
            flags |= EventFlags::EVENT_IDS_WRAPPED;
        }
        RawEvent::new(path, flags, id)
    }

    fn is_root(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| root == path)
    }

    fn in_scope(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }

    /// File-level events report the item; directory-level events report the
    /// containing directory with a trailing slash.
    fn render(&self, path: &Path) -> String {
        if self.file_events {
            return lossy(path);
        }
        let dir = if self.is_root(path) {
            path
        } else {
            path.parent().unwrap_or(path)
        };
        format!("{}/", lossy(dir).trim_end_matches('/'))
    }
}

fn lossy(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Item flags for an event kind, or `None` for kinds that are not reported.
fn item_flags(kind: &EventKind) -> Option<EventFlags> {
    let flags = match kind {
        EventKind::Access(_) | EventKind::Other => return None,
        EventKind::Any => EventFlags::ITEM_MODIFIED,
        EventKind::Create(_) => EventFlags::ITEM_CREATED,
        EventKind::Remove(_) => EventFlags::ITEM_REMOVED,
        EventKind::Modify(ModifyKind::Name(_)) => EventFlags::ITEM_RENAMED,
        EventKind::Modify(ModifyKind::Metadata(meta)) => match meta {
            MetadataKind::Ownership => EventFlags::ITEM_CHANGE_OWNER,
            MetadataKind::Extended => EventFlags::ITEM_XATTR_MOD,
            _ => EventFlags::ITEM_INODE_META_MOD,
        },
        EventKind::Modify(_) => EventFlags::ITEM_MODIFIED,
    };
    Some(flags)
}

/// File/dir/symlink flag, from the kind when it says, otherwise from disk.
fn item_type(kind: &EventKind, path: &Path) -> EventFlags {
    match kind {
        EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => {
            return EventFlags::ITEM_IS_FILE;
        }
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
            return EventFlags::ITEM_IS_DIR;
        }
        _ => {}
    }

    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => EventFlags::ITEM_IS_SYMLINK,
        Ok(meta) if meta.is_dir() => EventFlags::ITEM_IS_DIR,
        Ok(_) => EventFlags::ITEM_IS_FILE,
        Err(_) => EventFlags::empty(),
    }
}

fn changes_tree(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}
