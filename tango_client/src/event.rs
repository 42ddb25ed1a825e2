//! Application-facing events.
//!
//! Sessions deliver events two ways: into the manager's event channel, and
//! to any callbacks registered on the session itself. Callbacks form an
//! explicit, ordered subscriber list invoked in registration order; there
//! is no implicit chaining between them.

use crate::error::ConnectionError;
use crate::member::Member;
use crate::moderation::{Ban, ModLogEntry};
use crate::post::Post;
use tango_proto::GroupFlags;

/// A participant referenced by a roster event. Anonymous placeholders pass
/// through unresolved rather than being given a `Member` record.
#[derive(Debug, Clone)]
pub enum UserRef {
    Member(Member),
    Anon(String),
}

impl UserRef {
    pub fn name(&self) -> &str {
        match self {
            Self::Member(m) => m.name(),
            Self::Anon(name) => name,
        }
    }
}

/// Events raised by a room session.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// Initial handshake completed; the session is usable
    Connected,
    /// The server rejected the room outright
    Denied,
    /// Supplied credentials do not match the account
    LoginFailed,
    /// The chosen temporary alias was rejected
    BadAlias,
    /// A live post, fully resolved with its durable id
    Message(Post),
    /// A message was deleted, by durable id
    MessageDeleted(String),
    /// One immutable batch of backfilled history
    HistoryBatch(Vec<Post>),
    /// The server has no further history
    NoMoreHistory,
    Announcement(Post),
    /// Reply to an announcement query, carrying enabled state and period
    AnnouncementInfo(Post),
    /// Roster snapshot replaced
    Participants,
    MemberJoin(UserRef),
    MemberLeave(UserRef),
    UserCount(u32),
    Ban(Ban),
    Unban(Ban),
    BanListUpdate,
    ModAdded(Member),
    ModRemoved(Member),
    ModsChanged,
    ModLog(Vec<ModLogEntry>),
    FloodWarning,
    /// Flood ban, with its duration in seconds
    FloodBan(u32),
    FloodBanRepeat(u32),
    RateLimit(u32),
    SettingsChanged(GroupFlags),
    GroupInfo { title: String, message: String },
    /// Deliberate, caller-initiated close
    Disconnected,
    /// The transport dropped without an explicit disconnect
    ConnectionLost(Option<ConnectionError>),
}

/// Presence status reported for a watched or tracked user.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    pub last_seen: f64,
    pub status: String,
}

/// Events raised by the private-message session.
#[derive(Debug, Clone)]
pub enum PmEvent {
    Connected,
    /// A direct message; `offline` when it was queued while we were away
    Message { post: Post, offline: bool },
    /// Watch list replaced wholesale
    WatchList,
    /// A single watch-list entry added, removed or updated
    WatchListUpdate,
    /// A tracked user's presence changed
    Track,
    Disconnected,
    ConnectionLost(Option<ConnectionError>),
}

/// An event as delivered through the manager: tagged with its source.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Room { room: String, event: RoomEvent },
    Pm(PmEvent),
}

/// Ordered list of subscriber callbacks for one event type.
pub struct Subscribers<E> {
    callbacks: Vec<Box<dyn Fn(&E) + Send + Sync>>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }
}

impl<E> Subscribers<E> {
    /// Register a callback. Callbacks run in registration order.
    pub fn subscribe(&mut self, callback: impl Fn(&E) + Send + Sync + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn emit(&self, event: &E) {
        for callback in &self.callbacks {
            callback(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn subscribers_run_in_registration_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut subs = Subscribers::default();
        for tag in 0..3 {
            let order = order.clone();
            subs.subscribe(move |_: &u32| order.lock().push(tag));
        }
        subs.emit(&0);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn each_emit_reaches_every_subscriber() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut subs = Subscribers::default();
        let c = count.clone();
        subs.subscribe(move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        subs.emit(&1);
        subs.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
