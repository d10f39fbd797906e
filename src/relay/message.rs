//! Payloads and delivery jobs carried through the queue.

use super::platform::AttachmentRef;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// A channel that is part of the relay mesh
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRegistration {
    pub group_id: String,
    pub channel_id: String,
}

impl ChannelRegistration {
    pub fn new(group_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// Chat message ready to be posted under its author's identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub content: String,
    pub author_name: String,
    pub author_avatar_url: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

/// Administrative announcement, rendered as a card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastPayload {
    pub title: String,
    pub body: String,
    /// 0xRRGGBB
    pub color: u32,
}

/// What a job delivers. Shared between all jobs of one fan-out.
#[derive(Debug, Clone)]
pub enum Payload {
    Relay(Arc<RelayMessage>),
    Broadcast(Arc<BroadcastPayload>),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Relay(_) => "relay",
            Payload::Broadcast(_) => "broadcast",
        }
    }
}

/// One unit of queued work: send this payload to this destination
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub destination: ChannelRegistration,
    pub payload: Payload,
    /// Time the job entered the queue
    pub queued_at: Instant,
}

impl DeliveryJob {
    pub fn new(destination: ChannelRegistration, payload: Payload) -> Self {
        Self {
            destination,
            payload,
            queued_at: Instant::now(),
        }
    }
}
