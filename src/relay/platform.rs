//! Chat-platform trait and core types for the relay mesh.

use super::message::BroadcastPayload;
use crate::error::RelayResult;
use std::collections::HashMap;

/// An independent community (a Discord guild)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Platform-specific group ID
    pub id: String,
    /// Human-readable name, used in join announcements
    pub name: String,
}

/// A message-bearing destination within a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Owning group ID
    pub group_id: String,
    /// Platform-specific channel ID
    pub id: String,
}

/// Opaque platform handle for a send identity (a webhook ID on Discord)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityHandle(pub String);

/// A reusable named sender scoped to one destination channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendIdentity {
    /// Display name the identity currently posts under
    pub name: String,
    /// Avatar URL, if the platform reports one
    pub avatar_url: Option<String>,
    /// Channel the identity belongs to
    pub channel_id: String,
    /// Platform handle
    pub handle: IdentityHandle,
    /// Whether the relay can post through it. Foreign identities still count toward the cap.
    pub executable: bool,
}

/// Transport-neutral reference to an attachment on the source message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub url: String,
    pub filename: String,
}

impl AttachmentRef {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
        }
    }
}

/// The bot's own presentation, used for broadcasts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotProfile {
    pub name: String,
    pub avatar_url: Option<String>,
}

/// Reference to the message being replied to
#[derive(Debug, Clone, Default)]
pub struct ReplyRef {
    /// ID of the referenced message
    pub message_id: String,
    /// Content, when the platform delivered it with the event
    pub content: Option<String>,
}

/// Inbound "message created" event, already flattened from the platform model
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub message_id: String,
    pub channel_id: String,
    /// None for direct messages
    pub group_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
    /// Automated sender (bots, webhooks)
    pub author_is_bot: bool,
    pub content: String,
    pub reply_to: Option<ReplyRef>,
    pub attachments: Vec<AttachmentRef>,
    /// Mentioned user ID -> display name
    pub mentions: HashMap<String, String>,
}

/// Operations the relay engine needs from the chat platform.
///
/// Every call may suspend on network I/O. Implementations map platform failures onto
/// the matching [`RelayError`](crate::error::RelayError) variant so callers can log
/// them with the right classification.
#[async_trait::async_trait]
pub trait RelayPlatform: Send + Sync {
    /// Platform name (e.g., "discord")
    fn name(&self) -> &str;

    /// Look up a group by ID
    async fn fetch_group(&self, group_id: &str) -> RelayResult<Group>;

    /// Look up a text channel within a group
    async fn fetch_channel(&self, group: &Group, channel_id: &str) -> RelayResult<Channel>;

    /// List every send identity on a channel, including ones the relay cannot post through
    async fn list_identities(&self, channel: &Channel) -> RelayResult<Vec<SendIdentity>>;

    /// Create a new send identity on a channel
    async fn create_identity(
        &self,
        channel: &Channel,
        name: &str,
        avatar_url: Option<&str>,
    ) -> RelayResult<SendIdentity>;

    /// Overwrite name and avatar of an existing identity
    async fn rename_identity(
        &self,
        identity: &SendIdentity,
        name: &str,
        avatar_url: Option<&str>,
    ) -> RelayResult<SendIdentity>;

    /// Post content and attachments as the given identity
    async fn send_as_identity(
        &self,
        identity: &SendIdentity,
        content: &str,
        attachments: &[AttachmentRef],
    ) -> RelayResult<()>;

    /// Post a rendered broadcast card as the given identity
    async fn send_card_as_identity(
        &self,
        identity: &SendIdentity,
        card: &BroadcastPayload,
        profile: &BotProfile,
    ) -> RelayResult<()>;

    /// Post a plain message as the bot itself
    async fn send_notice(&self, channel: &Channel, text: &str) -> RelayResult<()>;

    /// Fetch the text of a message, for reply quoting
    async fn fetch_message_text(&self, channel_id: &str, message_id: &str) -> RelayResult<String>;

    /// Whether a member holds the elevated permission required to register channels
    async fn member_can_manage(&self, group_id: &str, user_id: &str) -> RelayResult<bool>;

    /// Delete a message
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> RelayResult<()>;

    /// Reply inline to a message
    async fn reply(&self, channel_id: &str, message_id: &str, text: &str) -> RelayResult<()>;

    /// The bot's own display name and avatar
    async fn bot_profile(&self) -> RelayResult<BotProfile>;

    /// Apply platform naming rules to an identity name.
    ///
    /// The identity pool matches on the normalized name, so it must be the name the
    /// platform will actually store.
    fn normalize_identity_name(&self, name: &str) -> String {
        name.to_string()
    }
}
