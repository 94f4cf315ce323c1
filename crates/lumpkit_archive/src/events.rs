//! Change notification for entry trees and archives.

use std::fmt::{self, Debug};

use derive_more::derive::Display;
use tracing::trace;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ChangeKind {
    /// An entry was added
    #[display("entry added")]
    EntryAdded,
    /// An entry was removed
    #[display("entry removed")]
    EntryRemoved,
    /// An entry was renamed, the field holds the old path
    #[display("entry renamed from {_0}")]
    EntryRenamed(String),
    /// An entry was moved, the field holds the old path
    #[display("entry moved from {_0}")]
    EntryMoved(String),
    /// The payload of an entry was replaced
    #[display("entry data changed")]
    EntryData,
    /// A directory was created
    #[display("directory added")]
    DirectoryAdded,
    /// A directory and everything below it was removed
    #[display("directory removed")]
    DirectoryRemoved,
    /// The archive finished opening
    #[display("opened")]
    Opened,
    /// The archive was written to its backing store
    #[display("saved")]
    Saved,
    /// The archive was re-read from its backing store
    #[display("rescanned")]
    Rescanned,
}

/// A single change, with the path it affected (empty for the root or the archive itself)
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{kind} ({path:?})")]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: String,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Receives change events
pub trait ChangeObserver: Send {
    fn on_change(&mut self, event: &ChangeEvent);
}

impl<F> ChangeObserver for F
where
    F: FnMut(&ChangeEvent) + Send,
{
    fn on_change(&mut self, event: &ChangeEvent) {
        self(event)
    }
}

/// Handle returned by [`Announcer::subscribe`], used to unsubscribe again
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fans change events out to observers unless muted
#[derive(Default)]
pub struct Announcer {
    observers: Vec<(SubscriptionId, Box<dyn ChangeObserver>)>,
    next_id: u64,
    muted: bool,
}

impl Debug for Announcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Announcer")
            .field("observers", &self.observers.len())
            .field("muted", &self.muted)
            .finish()
    }
}

impl Announcer {
    pub fn subscribe(&mut self, observer: impl ChangeObserver + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Returns whether the subscription existed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        before != self.observers.len()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Set the muted flag, returning the previous value
    pub(crate) fn set_muted(&mut self, muted: bool) -> bool {
        std::mem::replace(&mut self.muted, muted)
    }

    pub fn announce(&mut self, event: ChangeEvent) {
        if self.muted {
            trace!(%event, "muted");
            return;
        }

        trace!(%event, observers = self.observers.len(), "announcing");
        for (_, observer) in self.observers.iter_mut() {
            observer.on_change(&event);
        }
    }
}
