//! Core event types shared by the source, the formatter and the run loop.

use bitflags::bitflags;

/// Position in the change-notification history.
///
/// `EventId::SINCE_NOW` is the sentinel asking for events from the moment
/// of subscription onward. Any other value is an opaque cursor passed
/// through to the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    pub const SINCE_NOW: EventId = EventId(u64::MAX);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_since_now(&self) -> bool {
        *self == Self::SINCE_NOW
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::SINCE_NOW
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_since_now() {
            write!(f, "now")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

bitflags! {
    /// Options requested when subscribing to the event source.
    ///
    /// Bit values match the historical FSEvents stream-creation flags so
    /// debug dumps stay comparable across implementations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StreamFlags: u32 {
        const NO_DEFER    = 0x0000_0002;
        const WATCH_ROOT  = 0x0000_0004;
        const IGNORE_SELF = 0x0000_0008;
        const FILE_EVENTS = 0x0000_0010;
    }
}

bitflags! {
    /// Per-event flag bitset, emitted verbatim in NIW and tnetstring output.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventFlags: u32 {
        const MUST_SCAN_SUB_DIRS    = 0x0000_0001;
        const USER_DROPPED          = 0x0000_0002;
        const KERNEL_DROPPED        = 0x0000_0004;
        const EVENT_IDS_WRAPPED     = 0x0000_0008;
        const HISTORY_DONE          = 0x0000_0010;
        const ROOT_CHANGED          = 0x0000_0020;
        const MOUNT                 = 0x0000_0040;
        const UNMOUNT               = 0x0000_0080;
        const ITEM_CREATED          = 0x0000_0100;
        const ITEM_REMOVED          = 0x0000_0200;
        const ITEM_INODE_META_MOD   = 0x0000_0400;
        const ITEM_RENAMED          = 0x0000_0800;
        const ITEM_MODIFIED         = 0x0000_1000;
        const ITEM_FINDER_INFO_MOD  = 0x0000_2000;
        const ITEM_CHANGE_OWNER     = 0x0000_4000;
        const ITEM_XATTR_MOD        = 0x0000_8000;
        const ITEM_IS_FILE          = 0x0001_0000;
        const ITEM_IS_DIR           = 0x0002_0000;
        const ITEM_IS_SYMLINK       = 0x0004_0000;
    }
}

impl EventFlags {
    /// Human-readable descriptions of the set bits, used for trace output.
    pub fn describe(&self) -> Vec<&'static str> {
        const DESCRIPTIONS: &[(EventFlags, &str)] = &[
            (EventFlags::MUST_SCAN_SUB_DIRS, "Recursive scanning of directory required"),
            (EventFlags::USER_DROPPED, "Buffering problem: events dropped user-side"),
            (EventFlags::KERNEL_DROPPED, "Buffering problem: events dropped kernel-side"),
            (EventFlags::EVENT_IDS_WRAPPED, "Event IDs have wrapped"),
            (EventFlags::HISTORY_DONE, "All historical events have been processed"),
            (EventFlags::ROOT_CHANGED, "Root path has changed"),
            (EventFlags::MOUNT, "A new volume was mounted at this path"),
            (EventFlags::UNMOUNT, "A volume was unmounted from this path"),
            (EventFlags::ITEM_CREATED, "Item created"),
            (EventFlags::ITEM_REMOVED, "Item removed"),
            (EventFlags::ITEM_INODE_META_MOD, "Item metadata modified"),
            (EventFlags::ITEM_RENAMED, "Item renamed"),
            (EventFlags::ITEM_MODIFIED, "Item modified"),
            (EventFlags::ITEM_FINDER_INFO_MOD, "Item Finder Info modified"),
            (EventFlags::ITEM_CHANGE_OWNER, "Item changed ownership"),
            (EventFlags::ITEM_XATTR_MOD, "Item extended attributes modified"),
            (EventFlags::ITEM_IS_FILE, "Item is a file"),
            (EventFlags::ITEM_IS_DIR, "Item is a directory"),
            (EventFlags::ITEM_IS_SYMLINK, "Item is a symbolic link"),
        ];

        DESCRIPTIONS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, text)| *text)
            .collect()
    }
}

/// A single change notification.
///
/// Paths are carried as `String`; sources replace invalid UTF-8 before
/// constructing the event so formatting never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: String,
    pub flags: EventFlags,
    pub id: EventId,
}

impl RawEvent {
    pub fn new(path: impl Into<String>, flags: EventFlags, id: EventId) -> Self {
        Self {
            path: path.into(),
            flags,
            id,
        }
    }
}

/// Events delivered together by one source callback, in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    events: Vec<RawEvent>,
}

impl EventBatch {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn push(&mut self, event: RawEvent) {
        self.events.push(event);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RawEvent> {
        self.events.iter()
    }
}

impl From<Vec<RawEvent>> for EventBatch {
    fn from(events: Vec<RawEvent>) -> Self {
        Self::new(events)
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a RawEvent;
    type IntoIter = std::slice::Iter<'a, RawEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
