//! Discord binding using serenity.
//!
//! Groups are guilds, channels are guild text channels and send identities are
//! channel webhooks. Webhooks are cached by ID once listed or created.

pub mod formatting;

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::relay::message::BroadcastPayload;
use crate::relay::platform::{
    AttachmentRef, BotProfile, Channel, Group, IdentityHandle, InboundMessage, RelayPlatform,
    ReplyRef, SendIdentity,
};
use crate::relay::{InboundOutcome, RegistrationStore, RelayService};
use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    async_trait as serenity_async_trait,
    builder::{CreateAttachment, CreateMessage, CreateWebhook, EditWebhook, ExecuteWebhook},
    client::{Client, Context, EventHandler},
    http::Http,
    model::{
        channel::{ChannelType, Message},
        gateway::{GatewayIntents, Ready},
        id::{ChannelId, GuildId, MessageId, RoleId, UserId, WebhookId},
        permissions::Permissions,
        webhook::Webhook,
    },
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Exit code used by the kill switch
const KILL_SWITCH_EXIT_CODE: i32 = 1;

/// Discord implementation of [`RelayPlatform`]
pub struct DiscordPlatform {
    /// HTTP client (available once the client is built)
    http: RwLock<Option<Arc<Http>>>,
    /// Bot user (available after ready)
    profile: RwLock<Option<BotProfile>>,
    /// Webhook ID -> webhook, including its execution token
    webhooks: DashMap<u64, Webhook>,
}

impl Default for DiscordPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscordPlatform {
    pub fn new() -> Self {
        Self {
            http: RwLock::new(None),
            profile: RwLock::new(None),
            webhooks: DashMap::new(),
        }
    }

    /// Attach the client's HTTP handle
    pub async fn attach(&self, http: Arc<Http>) {
        *self.http.write().await = Some(http);
    }

    pub async fn set_profile(&self, profile: BotProfile) {
        *self.profile.write().await = Some(profile);
    }

    async fn get_http(&self) -> RelayResult<Arc<Http>> {
        self.http.read().await.clone().ok_or(RelayError::NotReady)
    }

    /// Resolve a webhook handle, from cache or over HTTP
    async fn webhook(&self, http: &Arc<Http>, handle: &IdentityHandle) -> RelayResult<Webhook> {
        let id = parse_id(&handle.0)
            .ok_or_else(|| RelayError::Identity(format!("invalid webhook id {}", handle.0)))?;

        if let Some(hook) = self.webhooks.get(&id).map(|entry| entry.value().clone()) {
            return Ok(hook);
        }

        let hook = http
            .get_webhook(WebhookId::new(id))
            .await
            .map_err(identity_err)?;
        self.webhooks.insert(id, hook.clone());
        Ok(hook)
    }

    fn remember(&self, hook: &Webhook) {
        self.webhooks.insert(hook.id.get(), hook.clone());
    }

    /// Download an image for a webhook avatar. Failures only cost the avatar.
    async fn fetch_avatar(&self, http: &Arc<Http>, url: Option<&str>) -> Option<CreateAttachment> {
        let url = url?;
        match CreateAttachment::url(http, url).await {
            Ok(avatar) => Some(avatar),
            Err(e) => {
                debug!(url, error = %e, "Avatar download failed, using default avatar");
                None
            }
        }
    }

    /// Download attachments for re-upload. Returns the files and the URLs that could
    /// not be fetched.
    async fn fetch_attachments(
        &self,
        http: &Arc<Http>,
        attachments: &[AttachmentRef],
    ) -> (Vec<CreateAttachment>, Vec<String>) {
        let mut files = Vec::with_capacity(attachments.len());
        let mut unreachable = Vec::new();

        for attachment in attachments {
            match CreateAttachment::url(http, &attachment.url).await {
                Ok(mut file) => {
                    file.filename = attachment.filename.clone();
                    files.push(file);
                }
                Err(e) => {
                    warn!(url = %attachment.url, error = %e, "Attachment download failed, linking instead");
                    unreachable.push(attachment.url.clone());
                }
            }
        }

        (files, unreachable)
    }
}

#[async_trait::async_trait]
impl RelayPlatform for DiscordPlatform {
    fn name(&self) -> &str {
        "discord"
    }

    async fn fetch_group(&self, group_id: &str) -> RelayResult<Group> {
        let http = self.get_http().await?;
        let not_found = || RelayError::GroupNotFound {
            group_id: group_id.to_string(),
        };
        let id = parse_id(group_id).ok_or_else(not_found)?;

        let guild = GuildId::new(id).to_partial_guild(&http).await.map_err(|e| {
            debug!(group_id, error = %e, "Guild lookup failed");
            not_found()
        })?;

        Ok(Group {
            id: guild.id.to_string(),
            name: guild.name,
        })
    }

    async fn fetch_channel(&self, group: &Group, channel_id: &str) -> RelayResult<Channel> {
        let http = self.get_http().await?;
        let not_found = || RelayError::ChannelNotFound {
            channel_id: channel_id.to_string(),
        };
        let id = parse_id(channel_id).ok_or_else(not_found)?;

        let channel = ChannelId::new(id).to_channel(&http).await.map_err(|e| {
            debug!(channel_id, error = %e, "Channel lookup failed");
            not_found()
        })?;

        match channel.guild() {
            Some(gc) if gc.kind == ChannelType::Text && gc.guild_id.to_string() == group.id => {
                Ok(Channel {
                    group_id: group.id.clone(),
                    id: gc.id.to_string(),
                })
            }
            _ => Err(not_found()),
        }
    }

    async fn list_identities(&self, channel: &Channel) -> RelayResult<Vec<SendIdentity>> {
        let http = self.get_http().await?;
        let channel_id = channel_id_of(&channel.id)?;

        let hooks = channel_id.webhooks(&http).await.map_err(identity_err)?;

        // Webhooks without a token (e.g. channel followers) cannot be executed but still
        // count toward the per-channel webhook limit
        let identities = hooks
            .iter()
            .map(|hook| {
                if hook.token.is_some() {
                    self.remember(hook);
                }
                identity_of(hook, &channel.id, None)
            })
            .collect();

        Ok(identities)
    }

    async fn create_identity(
        &self,
        channel: &Channel,
        name: &str,
        avatar_url: Option<&str>,
    ) -> RelayResult<SendIdentity> {
        let http = self.get_http().await?;
        let channel_id = channel_id_of(&channel.id)?;

        let avatar = self.fetch_avatar(&http, avatar_url).await;
        let mut builder = CreateWebhook::new(name);
        if let Some(avatar) = &avatar {
            builder = builder.avatar(avatar);
        }

        let hook = channel_id
            .create_webhook(&http, builder)
            .await
            .map_err(identity_err)?;
        self.remember(&hook);

        debug!(channel_id = %channel.id, webhook_id = %hook.id, name, "Created webhook");
        Ok(identity_of(&hook, &channel.id, avatar_url))
    }

    async fn rename_identity(
        &self,
        identity: &SendIdentity,
        name: &str,
        avatar_url: Option<&str>,
    ) -> RelayResult<SendIdentity> {
        let http = self.get_http().await?;
        let mut hook = self.webhook(&http, &identity.handle).await?;

        let avatar = self.fetch_avatar(&http, avatar_url).await;
        let mut builder = EditWebhook::new().name(name);
        if let Some(avatar) = &avatar {
            builder = builder.avatar(avatar);
        }

        hook.edit(&http, builder).await.map_err(identity_err)?;
        self.remember(&hook);

        Ok(identity_of(&hook, &identity.channel_id, avatar_url))
    }

    async fn send_as_identity(
        &self,
        identity: &SendIdentity,
        content: &str,
        attachments: &[AttachmentRef],
    ) -> RelayResult<()> {
        let http = self.get_http().await?;
        let hook = self
            .webhook(&http, &identity.handle)
            .await
            .map_err(|e| RelayError::Send(e.to_string()))?;

        let (files, unreachable) = self.fetch_attachments(&http, attachments).await;
        let content = formatting::with_attachment_links(content, &unreachable);

        let mut builder = ExecuteWebhook::new()
            .content(formatting::truncate(&content, formatting::MAX_CONTENT_LEN))
            .username(&identity.name)
            .add_files(files);
        if let Some(url) = &identity.avatar_url {
            builder = builder.avatar_url(url);
        }

        hook.execute(&http, false, builder).await.map_err(send_err)?;
        Ok(())
    }

    async fn send_card_as_identity(
        &self,
        identity: &SendIdentity,
        card: &BroadcastPayload,
        profile: &BotProfile,
    ) -> RelayResult<()> {
        let http = self.get_http().await?;
        let hook = self
            .webhook(&http, &identity.handle)
            .await
            .map_err(|e| RelayError::Send(e.to_string()))?;

        let mut builder = ExecuteWebhook::new()
            .embed(formatting::create_broadcast_embed(card))
            .username(&profile.name);
        if let Some(url) = &profile.avatar_url {
            builder = builder.avatar_url(url);
        }

        hook.execute(&http, false, builder).await.map_err(send_err)?;
        Ok(())
    }

    async fn send_notice(&self, channel: &Channel, text: &str) -> RelayResult<()> {
        let http = self.get_http().await?;
        channel_id_of(&channel.id)?
            .say(&http, formatting::truncate(text, formatting::MAX_CONTENT_LEN))
            .await
            .map_err(send_err)?;
        Ok(())
    }

    async fn fetch_message_text(&self, channel_id: &str, message_id: &str) -> RelayResult<String> {
        let http = self.get_http().await?;
        let message = channel_id_of(channel_id)?
            .message(&http, message_id_of(message_id)?)
            .await
            .map_err(platform_err)?;
        Ok(message.content)
    }

    async fn member_can_manage(&self, group_id: &str, user_id: &str) -> RelayResult<bool> {
        let http = self.get_http().await?;
        let guild_id = GuildId::new(
            parse_id(group_id)
                .ok_or_else(|| RelayError::Platform(format!("invalid guild id {group_id}")))?,
        );
        let user_id = UserId::new(
            parse_id(user_id)
                .ok_or_else(|| RelayError::Platform(format!("invalid user id {user_id}")))?,
        );

        let guild = guild_id.to_partial_guild(&http).await.map_err(platform_err)?;
        if guild.owner_id == user_id {
            return Ok(true);
        }

        let member = guild_id.member(&http, user_id).await.map_err(platform_err)?;

        // @everyone shares the guild's ID
        let everyone = RoleId::new(guild_id.get());
        let granted = std::iter::once(&everyone)
            .chain(member.roles.iter())
            .filter_map(|role_id| guild.roles.get(role_id))
            .fold(Permissions::empty(), |acc, role| acc | role.permissions);

        Ok(grants_manage(granted))
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> RelayResult<()> {
        let http = self.get_http().await?;
        channel_id_of(channel_id)?
            .delete_message(&http, message_id_of(message_id)?)
            .await
            .map_err(platform_err)
    }

    async fn reply(&self, channel_id: &str, message_id: &str, text: &str) -> RelayResult<()> {
        let http = self.get_http().await?;
        let channel_id = channel_id_of(channel_id)?;
        let message_id = message_id_of(message_id)?;

        channel_id
            .send_message(
                &http,
                CreateMessage::new()
                    .content(formatting::truncate(text, formatting::MAX_CONTENT_LEN))
                    .reference_message((channel_id, message_id)),
            )
            .await
            .map_err(send_err)?;
        Ok(())
    }

    async fn bot_profile(&self) -> RelayResult<BotProfile> {
        self.profile.read().await.clone().ok_or(RelayError::NotReady)
    }

    fn normalize_identity_name(&self, name: &str) -> String {
        formatting::webhook_name(name)
    }
}

/// Discord event handler
struct RelayHandler {
    service: Arc<RelayService>,
    platform: Arc<DiscordPlatform>,
}

#[serenity_async_trait]
impl EventHandler for RelayHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "Connected to Discord");

        self.platform
            .set_profile(BotProfile {
                name: ready.user.name.clone(),
                avatar_url: Some(ready.user.face()),
            })
            .await;

        // Reconnects fire ready again; start is a no-op after the first
        self.service.start();
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let inbound = to_inbound(&msg);
        if let InboundOutcome::Terminate = self.service.handle_message(&inbound).await {
            std::process::exit(KILL_SWITCH_EXIT_CODE);
        }
    }
}

/// Connect to Discord and relay until the gateway closes or ctrl-c is pressed
pub async fn run(config: Config) -> Result<()> {
    let token = config
        .discord
        .resolve_bot_token()
        .ok_or_else(|| anyhow::anyhow!("Discord bot token not configured"))?;

    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

    let platform = Arc::new(DiscordPlatform::new());
    let store = Arc::new(RegistrationStore::new(
        config.relay.resolve_registrations_file(),
    ));
    let service = RelayService::new(config.relay.clone(), store, platform.clone());

    let handler = RelayHandler {
        service: service.clone(),
        platform: platform.clone(),
    };

    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .await?;

    // Store HTTP client before any event can arrive
    platform.attach(client.http.clone()).await;

    let shard_manager = client.shard_manager.clone();
    tokio::select! {
        result = client.start() => {
            service.shutdown();
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            service.shutdown();
            shard_manager.shutdown_all().await;
        }
    }

    Ok(())
}

/// Convert a gateway message into the platform-neutral form
fn to_inbound(msg: &Message) -> InboundMessage {
    let reply_to = msg
        .message_reference
        .as_ref()
        .and_then(|reference| reference.message_id)
        .map(|id| ReplyRef {
            message_id: id.to_string(),
            content: msg.referenced_message.as_ref().map(|m| m.content.clone()),
        });

    InboundMessage {
        message_id: msg.id.to_string(),
        channel_id: msg.channel_id.to_string(),
        group_id: msg.guild_id.map(|id| id.to_string()),
        author_id: msg.author.id.to_string(),
        author_name: display_name(msg),
        author_avatar_url: Some(msg.author.face()),
        // Relayed messages come back as webhook messages and must not loop
        author_is_bot: msg.author.bot || msg.webhook_id.is_some(),
        content: msg.content.clone(),
        reply_to,
        attachments: msg
            .attachments
            .iter()
            .map(|a| AttachmentRef::new(&a.url, &a.filename))
            .collect(),
        mentions: msg
            .mentions
            .iter()
            .map(|user| {
                let nick = user.member.as_ref().and_then(|member| member.nick.as_deref());
                let name = preferred_name(nick, user.global_name.as_deref(), &user.name);
                (user.id.to_string(), name)
            })
            .collect(),
    }
}

fn display_name(msg: &Message) -> String {
    let nick = msg.member.as_ref().and_then(|member| member.nick.as_deref());
    preferred_name(nick, msg.author.global_name.as_deref(), &msg.author.name)
}

/// Server nickname, then global display name, then username
fn preferred_name(nick: Option<&str>, global_name: Option<&str>, username: &str) -> String {
    nick.or(global_name).unwrap_or(username).to_string()
}

fn identity_of(hook: &Webhook, channel_id: &str, avatar_url: Option<&str>) -> SendIdentity {
    let avatar_url = avatar_url.map(str::to_string).or_else(|| {
        hook.avatar
            .as_ref()
            .map(|hash| formatting::webhook_avatar_url(hook.id.get(), &hash.to_string()))
    });

    SendIdentity {
        name: hook.name.clone().unwrap_or_default(),
        avatar_url,
        channel_id: channel_id.to_string(),
        handle: IdentityHandle(hook.id.to_string()),
        executable: hook.token.is_some(),
    }
}

fn grants_manage(permissions: Permissions) -> bool {
    permissions.contains(Permissions::ADMINISTRATOR) || permissions.contains(Permissions::MANAGE_GUILD)
}

/// Snowflakes are non-zero; the id constructors panic on zero
fn parse_id(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|id| *id != 0)
}

fn channel_id_of(raw: &str) -> RelayResult<ChannelId> {
    parse_id(raw)
        .map(ChannelId::new)
        .ok_or_else(|| RelayError::ChannelNotFound {
            channel_id: raw.to_string(),
        })
}

fn message_id_of(raw: &str) -> RelayResult<MessageId> {
    parse_id(raw)
        .map(MessageId::new)
        .ok_or_else(|| RelayError::Platform(format!("invalid message id {raw}")))
}

fn identity_err(e: serenity::Error) -> RelayError {
    RelayError::Identity(e.to_string())
}

fn send_err(e: serenity::Error) -> RelayError {
    RelayError::Send(e.to_string())
}

fn platform_err(e: serenity::Error) -> RelayError {
    RelayError::Platform(e.to_string())
}
