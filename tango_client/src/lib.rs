//! Async client for the Chatango chat service.
//!
//! A [`Manager`] owns the account identity and any number of live
//! sessions: one [`RoomSession`](room::RoomSession) per joined room and
//! at most one [`PmSession`](pm::PmSession) for direct messages. Every
//! session runs its own connection task; all events funnel into the
//! receiver returned by [`Manager::new`], and per-session callbacks can
//! additionally be registered with `subscribe`.

pub mod connection;
pub mod error;
pub mod event;
pub mod manager;
pub mod member;
pub mod moderation;
pub mod pm;
pub mod post;
pub mod room;

pub use error::{ClientError, ConnectError, ConnectionError, ValidationError};
pub use event::{ClientEvent, PmEvent, Presence, RoomEvent, UserRef};
pub use manager::Manager;
pub use member::Member;
pub use moderation::{Ban, ModAction, ModLogEntry};
pub use pm::PmSession;
pub use post::Post;
pub use room::RoomSession;

pub use tango_proto::format::{Badge, Channel, PostFormat};
pub use tango_proto::{GroupFlags, ModFlags};
