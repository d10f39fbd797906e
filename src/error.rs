//! Error taxonomy for the relay engine.

use thiserror::Error;

/// Errors raised while registering channels or delivering relayed content.
///
/// Delivery-path variants (`GroupNotFound`, `ChannelNotFound`, `Identity`, `Send`) are
/// always scoped to a single job or destination and never abort the surrounding loop.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("group {group_id} not found or inaccessible")]
    GroupNotFound { group_id: String },

    #[error("channel {channel_id} not found or not a text channel")]
    ChannelNotFound { channel_id: String },

    #[error("send identity error: {0}")]
    Identity(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("group {group_id} already has a relay channel ({channel_id})")]
    AlreadyRegistered {
        group_id: String,
        channel_id: String,
    },

    #[error("group {group_id} has no relay channel")]
    NotRegistered { group_id: String },

    #[error("registration table I/O: {0}")]
    Persist(#[from] std::io::Error),

    #[error("platform call failed: {0}")]
    Platform(String),

    #[error("platform session is not ready")]
    NotReady,
}

impl RelayError {
    /// True for group/channel lookup failures.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            RelayError::GroupNotFound { .. } | RelayError::ChannelNotFound { .. }
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
