use crate::error::{RelayError, RelayResult};
use crate::relay::message::BroadcastPayload;
use crate::relay::platform::{
    AttachmentRef, BotProfile, Channel, Group, IdentityHandle, RelayPlatform, SendIdentity,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Something the mock platform was asked to post
#[derive(Clone, Debug)]
pub enum Sent {
    Message {
        identity: SendIdentity,
        content: String,
        attachments: Vec<AttachmentRef>,
    },
    Card {
        identity: SendIdentity,
        card: BroadcastPayload,
        profile: BotProfile,
    },
    Notice {
        channel_id: String,
        text: String,
    },
}

impl Sent {
    pub fn channel_id(&self) -> &str {
        match self {
            Sent::Message { identity, .. } | Sent::Card { identity, .. } => &identity.channel_id,
            Sent::Notice { channel_id, .. } => channel_id,
        }
    }
}

#[derive(Default)]
struct MockState {
    groups: HashMap<String, Group>,
    /// channel ID -> group ID
    channels: HashMap<String, String>,
    /// channel ID -> identities in creation order
    identities: HashMap<String, Vec<SendIdentity>>,
    /// (channel ID, message ID) -> content
    messages: HashMap<(String, String), String>,
    managers: HashSet<(String, String)>,
    failing_sends: HashSet<String>,
    failing_identity: HashSet<String>,
    next_handle: u64,
    sent: Vec<Sent>,
    replies: Vec<(String, String)>,
    deleted: Vec<(String, String)>,
}

/// In-memory platform recording every outbound call
#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub const BOT_NAME: &'static str = "Mesh Relay";

    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or rename) a group and give it a text channel
    pub fn add_channel(&self, group_id: &str, group_name: &str, channel_id: &str) {
        let mut state = self.lock();
        state.groups.insert(
            group_id.to_string(),
            Group {
                id: group_id.to_string(),
                name: group_name.to_string(),
            },
        );
        state
            .channels
            .insert(channel_id.to_string(), group_id.to_string());
    }

    /// Make a channel unreachable
    pub fn remove_channel(&self, channel_id: &str) {
        self.lock().channels.remove(channel_id);
    }

    pub fn add_message(&self, channel_id: &str, message_id: &str, content: &str) {
        self.lock().messages.insert(
            (channel_id.to_string(), message_id.to_string()),
            content.to_string(),
        );
    }

    pub fn grant_manage(&self, group_id: &str, user_id: &str) {
        self.lock()
            .managers
            .insert((group_id.to_string(), user_id.to_string()));
    }

    pub fn fail_sends(&self, channel_id: &str) {
        self.lock().failing_sends.insert(channel_id.to_string());
    }

    pub fn fail_identity_ops(&self, channel_id: &str) {
        self.lock().failing_identity.insert(channel_id.to_string());
    }

    /// Seed an identity the relay cannot post through (e.g. a channel follower)
    pub fn add_foreign_identity(&self, channel_id: &str, name: &str) {
        let mut state = self.lock();
        state.next_handle += 1;
        let identity = SendIdentity {
            name: name.to_string(),
            avatar_url: None,
            channel_id: channel_id.to_string(),
            handle: IdentityHandle(format!("foreign-{}", state.next_handle)),
            executable: false,
        };
        state
            .identities
            .entry(channel_id.to_string())
            .or_default()
            .push(identity);
    }

    pub fn identities(&self, channel_id: &str) -> Vec<SendIdentity> {
        self.lock()
            .identities
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.lock().sent.clone()
    }

    pub fn replies(&self) -> Vec<(String, String)> {
        self.lock().replies.clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.lock().deleted.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock")
    }

    fn check_identity_ops(state: &MockState, channel_id: &str) -> RelayResult<()> {
        if state.failing_identity.contains(channel_id) {
            return Err(RelayError::Identity(format!(
                "missing webhook permission in {channel_id}"
            )));
        }
        Ok(())
    }

    fn check_send(state: &MockState, channel_id: &str) -> RelayResult<()> {
        if state.failing_sends.contains(channel_id) {
            return Err(RelayError::Send(format!("rejected in {channel_id}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RelayPlatform for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_group(&self, group_id: &str) -> RelayResult<Group> {
        self.lock()
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| RelayError::GroupNotFound {
                group_id: group_id.to_string(),
            })
    }

    async fn fetch_channel(&self, group: &Group, channel_id: &str) -> RelayResult<Channel> {
        match self.lock().channels.get(channel_id) {
            Some(owner) if *owner == group.id => Ok(Channel {
                group_id: group.id.clone(),
                id: channel_id.to_string(),
            }),
            _ => Err(RelayError::ChannelNotFound {
                channel_id: channel_id.to_string(),
            }),
        }
    }

    async fn list_identities(&self, channel: &Channel) -> RelayResult<Vec<SendIdentity>> {
        let state = self.lock();
        Self::check_identity_ops(&state, &channel.id)?;
        Ok(state
            .identities
            .get(&channel.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_identity(
        &self,
        channel: &Channel,
        name: &str,
        avatar_url: Option<&str>,
    ) -> RelayResult<SendIdentity> {
        let mut state = self.lock();
        Self::check_identity_ops(&state, &channel.id)?;
        state.next_handle += 1;
        let identity = SendIdentity {
            name: name.to_string(),
            avatar_url: avatar_url.map(str::to_string),
            channel_id: channel.id.clone(),
            handle: IdentityHandle(format!("wh-{}", state.next_handle)),
            executable: true,
        };
        state
            .identities
            .entry(channel.id.clone())
            .or_default()
            .push(identity.clone());
        Ok(identity)
    }

    async fn rename_identity(
        &self,
        identity: &SendIdentity,
        name: &str,
        avatar_url: Option<&str>,
    ) -> RelayResult<SendIdentity> {
        let mut state = self.lock();
        Self::check_identity_ops(&state, &identity.channel_id)?;
        let stored = state
            .identities
            .get_mut(&identity.channel_id)
            .and_then(|list| list.iter_mut().find(|i| i.handle == identity.handle))
            .ok_or_else(|| RelayError::Identity("unknown identity".to_string()))?;
        stored.name = name.to_string();
        stored.avatar_url = avatar_url.map(str::to_string);
        Ok(stored.clone())
    }

    async fn send_as_identity(
        &self,
        identity: &SendIdentity,
        content: &str,
        attachments: &[AttachmentRef],
    ) -> RelayResult<()> {
        let mut state = self.lock();
        Self::check_send(&state, &identity.channel_id)?;
        state.sent.push(Sent::Message {
            identity: identity.clone(),
            content: content.to_string(),
            attachments: attachments.to_vec(),
        });
        Ok(())
    }

    async fn send_card_as_identity(
        &self,
        identity: &SendIdentity,
        card: &BroadcastPayload,
        profile: &BotProfile,
    ) -> RelayResult<()> {
        let mut state = self.lock();
        Self::check_send(&state, &identity.channel_id)?;
        state.sent.push(Sent::Card {
            identity: identity.clone(),
            card: card.clone(),
            profile: profile.clone(),
        });
        Ok(())
    }

    async fn send_notice(&self, channel: &Channel, text: &str) -> RelayResult<()> {
        let mut state = self.lock();
        Self::check_send(&state, &channel.id)?;
        state.sent.push(Sent::Notice {
            channel_id: channel.id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn fetch_message_text(&self, channel_id: &str, message_id: &str) -> RelayResult<String> {
        self.lock()
            .messages
            .get(&(channel_id.to_string(), message_id.to_string()))
            .cloned()
            .ok_or_else(|| RelayError::Platform(format!("unknown message {message_id}")))
    }

    async fn member_can_manage(&self, group_id: &str, user_id: &str) -> RelayResult<bool> {
        Ok(self
            .lock()
            .managers
            .contains(&(group_id.to_string(), user_id.to_string())))
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> RelayResult<()> {
        self.lock()
            .deleted
            .push((channel_id.to_string(), message_id.to_string()));
        Ok(())
    }

    async fn reply(&self, channel_id: &str, _message_id: &str, text: &str) -> RelayResult<()> {
        self.lock()
            .replies
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn bot_profile(&self) -> RelayResult<BotProfile> {
        Ok(BotProfile {
            name: Self::BOT_NAME.to_string(),
            avatar_url: Some("https://cdn.example/bot.png".to_string()),
        })
    }
}
