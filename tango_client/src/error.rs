use thiserror::Error;

pub use tango_proto::InvalidRoomName;

/// Failure to establish a session's transport. Distinct from a mid-session
/// drop, which is reported as an event rather than an error.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not reach {host}: {source}")]
    Unreachable {
        host: String,
        source: std::io::Error,
    },
}

/// An error terminating an established connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection closed by peer")]
    Closed,
    #[error("i/o error: {0}")]
    Io(String),
    #[error("no data received within the idle timeout")]
    IdleTimeout,
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Caller-supplied input rejected before anything is sent on the wire.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0:?} is not a valid hex color")]
    InvalidColor(String),
    #[error(transparent)]
    RoomName(#[from] InvalidRoomName),
    #[error("name color cannot be set while anonymous")]
    AnonymousNameColor,
}

/// Top-level error for session-manager operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("already joined room {0:?}")]
    AlreadyJoined(String),
    #[error("not connected to private messaging")]
    NoPmSession,
    #[error(transparent)]
    Auth(#[from] tango_auth::AuthError),
}

impl From<InvalidRoomName> for ClientError {
    fn from(e: InvalidRoomName) -> Self {
        Self::Validation(ValidationError::RoomName(e))
    }
}
