//! Pure protocol layer for the Chatango wire format.
//!
//! Nothing in this crate performs I/O. It covers tokenizing and serializing
//! the colon-delimited, NUL-terminated command stream, the embedded message
//! markup, the deterministic room-to-shard and anonymous-id algorithms, and
//! the permission flag domains used by the moderation model.

pub mod command;
pub mod flags;
pub mod format;
pub mod ident;

pub use command::{Command, FrameBuffer};
pub use flags::{GroupFlags, ModFlags};
pub use format::{Badge, Channel, PostFormat};
pub use ident::InvalidRoomName;
