//! Error types shared by the ring engine, the codec and the sequencer.

use thiserror::Error;

use crate::protocol::{
    DecodeError,
    Status,
};

/// Every failure a ring operation can surface to its caller.
///
/// The first five variants travel over the engine wire as a [`Status`]; the
/// rest are produced on the caller side of the channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("ring not found")]
    RingNotFound,

    #[error("node not found")]
    NodeNotFound,

    #[error("invalid ring reference")]
    InvalidRing,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("unknown engine error")]
    Unknown,

    #[error("ring already exists")]
    RingExists,

    #[error("engine channel closed")]
    ChannelClosed,

    #[error("timed out waiting for the engine")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),

    #[error("unexpected response from engine: {0}")]
    UnexpectedResponse(&'static str),
}

impl RingError {
    /// The wire status carrying this error, if it is one the engine produces.
    pub fn status(&self) -> Option<Status> {
        match self {
            RingError::RingNotFound => Some(Status::RingNotFound),
            RingError::NodeNotFound => Some(Status::NodeNotFound),
            RingError::InvalidRing => Some(Status::InvalidRing),
            RingError::InvalidArgument => Some(Status::InvalidArgument),
            RingError::Unknown => Some(Status::Unknown),
            _ => None,
        }
    }
}

impl From<Status> for RingError {
    fn from(status: Status) -> Self {
        match status {
            Status::RingNotFound => RingError::RingNotFound,
            Status::NodeNotFound => RingError::NodeNotFound,
            Status::InvalidRing => RingError::InvalidRing,
            Status::InvalidArgument => RingError::InvalidArgument,
            Status::Unknown => RingError::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_is_reversible() {
        for status in [
            Status::RingNotFound,
            Status::NodeNotFound,
            Status::InvalidRing,
            Status::InvalidArgument,
            Status::Unknown,
        ] {
            assert_eq!(RingError::from(status).status(), Some(status));
        }
    }

    #[test]
    fn test_local_errors_have_no_status() {
        assert_eq!(RingError::RingExists.status(), None);
        assert_eq!(RingError::ChannelClosed.status(), None);
        assert_eq!(RingError::Timeout.status(), None);
    }
}
