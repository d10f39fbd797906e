//! Relay orchestration: turns inbound chat events into registrations and delivery jobs.

use super::command::{self, Command};
use super::identity::IdentityPool;
use super::message::{BroadcastPayload, ChannelRegistration, DeliveryJob, Payload};
use super::platform::{InboundMessage, RelayPlatform};
use super::queue::DeliveryQueue;
use super::registry::RegistrationStore;
use super::transform;
use super::worker::DeliveryWorker;
use crate::config::RelayConfig;
use crate::error::RelayError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const REPLY_NO_PERMISSION: &str = "You do not have permission to use this command.";
pub const REPLY_ALREADY_REGISTERED: &str = "This server already has a global chat channel.";
pub const REPLY_REGISTERED: &str = "Global chat channel set successfully.";
pub const REPLY_NOT_REGISTERED: &str = "This server has no global chat channel.";
pub const REPLY_UNREGISTERED: &str = "Global chat channel removed.";

/// Why an inbound message produced no work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by a bot or webhook
    Automated,
    /// Prefixed command that is not handled here
    Command,
    /// Posted outside the mesh
    UnregisteredChannel,
    /// Management command outside a group
    DirectMessage,
}

/// Result of handling one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Ignored(IgnoreReason),
    /// Chat message fanned out as `jobs` delivery jobs
    Relayed { jobs: usize },
    /// Channel registered; join notice delivered to `announced` channels
    Registered { announced: usize },
    Unregistered,
    /// Command rejected with an inline reply
    Rejected,
    /// Broadcast fanned out as `jobs` delivery jobs
    Broadcast { jobs: usize },
    /// Operator kill switch; the caller terminates the process
    Terminate,
}

/// Single owner of the registration table and the delivery queue
pub struct RelayService {
    config: RelayConfig,
    store: Arc<RegistrationStore>,
    queue: Arc<DeliveryQueue>,
    platform: Arc<dyn RelayPlatform>,
    worker_started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayService {
    pub fn new(
        config: RelayConfig,
        store: Arc<RegistrationStore>,
        platform: Arc<dyn RelayPlatform>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            store,
            queue: DeliveryQueue::new(),
            platform,
            worker_started: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    pub fn store(&self) -> &Arc<RegistrationStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    /// Handle the platform's ready event: load the registration table and start the
    /// delivery worker. Only the first call does anything; returns whether it did.
    pub fn start(&self) -> bool {
        if self.worker_started.swap(true, Ordering::SeqCst) {
            debug!("Relay already started, ignoring repeated ready");
            return false;
        }

        self.store.load();

        let worker = DeliveryWorker::new(
            self.queue.clone(),
            self.platform.clone(),
            IdentityPool::new(self.config.max_identities_per_channel),
            self.shutdown_tx.subscribe(),
        );
        tokio::spawn(worker.run());

        info!(
            registrations = self.store.len(),
            "Relay started"
        );
        true
    }

    /// Stop the delivery worker. Queued jobs are dropped.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Route one inbound message.
    pub async fn handle_message(&self, msg: &InboundMessage) -> InboundOutcome {
        if msg.author_is_bot {
            return InboundOutcome::Ignored(IgnoreReason::Automated);
        }

        match command::parse(&msg.content, &self.config.command_prefixes) {
            Some(Command::Crash) if self.config.is_admin(&msg.author_id) => {
                error!(author_id = %msg.author_id, "Kill switch received, terminating");
                InboundOutcome::Terminate
            }
            Some(Command::Broadcast(text)) => self.handle_broadcast(msg, text).await,
            Some(Command::Register) => self.handle_register(msg).await,
            Some(Command::Unregister) => self.handle_unregister(msg).await,
            Some(Command::Crash) | Some(Command::Other) => {
                InboundOutcome::Ignored(IgnoreReason::Command)
            }
            None => self.relay(msg).await,
        }
    }

    /// Relay flow: transform and enqueue one job per other registered channel
    async fn relay(&self, msg: &InboundMessage) -> InboundOutcome {
        if !self.store.contains_channel(&msg.channel_id) {
            return InboundOutcome::Ignored(IgnoreReason::UnregisteredChannel);
        }

        info!(
            channel_id = %msg.channel_id,
            author = %msg.author_name,
            "Message received"
        );
        debug!(content = %msg.content, "Message content");

        let quote = match &msg.reply_to {
            Some(reply) => {
                let referenced = match &reply.content {
                    Some(text) => Some(text.clone()),
                    None => match self
                        .platform
                        .fetch_message_text(&msg.channel_id, &reply.message_id)
                        .await
                    {
                        Ok(text) => Some(text),
                        Err(e) => {
                            warn!(
                                channel_id = %msg.channel_id,
                                message_id = %reply.message_id,
                                error = %e,
                                "Could not fetch referenced message"
                            );
                            None
                        }
                    },
                };
                referenced.map(|text| transform::extract_quote(&text))
            }
            None => None,
        };

        let message = transform::build_relay_message(
            &msg.content,
            quote.as_deref(),
            &msg.author_name,
            msg.author_avatar_url.as_deref(),
            msg.attachments.clone(),
            |id| msg.mentions.get(id).cloned(),
        );

        let payload = Payload::Relay(Arc::new(message));
        let jobs = self.enqueue(
            self.store
                .all()
                .into_iter()
                .filter(|r| r.channel_id != msg.channel_id),
            &payload,
        );

        InboundOutcome::Relayed { jobs }
    }

    /// Registration flow for `!live`
    async fn handle_register(&self, msg: &InboundMessage) -> InboundOutcome {
        let Some(group_id) = msg.group_id.as_deref() else {
            return InboundOutcome::Ignored(IgnoreReason::DirectMessage);
        };

        if !self.can_manage(group_id, &msg.author_id).await {
            self.reply(msg, REPLY_NO_PERMISSION).await;
            return InboundOutcome::Rejected;
        }

        let registration = match self.store.register(group_id, &msg.channel_id) {
            Ok(registration) => registration,
            Err(RelayError::AlreadyRegistered { channel_id, .. }) => {
                info!(%group_id, %channel_id, "Group already registered");
                self.reply(msg, REPLY_ALREADY_REGISTERED).await;
                return InboundOutcome::Rejected;
            }
            Err(e) => {
                warn!(%group_id, error = %e, "Registration failed");
                return InboundOutcome::Rejected;
            }
        };

        info!(
            %group_id,
            channel_id = %registration.channel_id,
            "Channel registered"
        );
        self.persist();

        let group_name = match self.platform.fetch_group(group_id).await {
            Ok(group) => group.name,
            Err(e) => {
                warn!(%group_id, error = %e, "Could not resolve group name");
                group_id.to_string()
            }
        };
        let announced = self.announce_join(&group_name, &registration).await;

        self.reply(msg, REPLY_REGISTERED).await;
        InboundOutcome::Registered { announced }
    }

    /// `!live leave`
    async fn handle_unregister(&self, msg: &InboundMessage) -> InboundOutcome {
        let Some(group_id) = msg.group_id.as_deref() else {
            return InboundOutcome::Ignored(IgnoreReason::DirectMessage);
        };

        if !self.can_manage(group_id, &msg.author_id).await {
            self.reply(msg, REPLY_NO_PERMISSION).await;
            return InboundOutcome::Rejected;
        }

        match self.store.unregister(group_id) {
            Ok(removed) => {
                info!(%group_id, channel_id = %removed.channel_id, "Channel unregistered");
                self.persist();
                self.reply(msg, REPLY_UNREGISTERED).await;
                InboundOutcome::Unregistered
            }
            Err(_) => {
                self.reply(msg, REPLY_NOT_REGISTERED).await;
                InboundOutcome::Rejected
            }
        }
    }

    /// Broadcast flow for `!live broadcast "<text>"`
    async fn handle_broadcast(&self, msg: &InboundMessage, text: Option<String>) -> InboundOutcome {
        if !self.config.is_admin(&msg.author_id) {
            self.reply(msg, REPLY_NO_PERMISSION).await;
            return InboundOutcome::Rejected;
        }

        if let Err(e) = self
            .platform
            .delete_message(&msg.channel_id, &msg.message_id)
            .await
        {
            warn!(channel_id = %msg.channel_id, error = %e, "Could not delete broadcast command");
        }

        let Some(body) = text else {
            warn!(author_id = %msg.author_id, "Broadcast without quoted text, nothing sent");
            return InboundOutcome::Broadcast { jobs: 0 };
        };

        let payload = Payload::Broadcast(Arc::new(BroadcastPayload {
            title: self.config.broadcast_title.clone(),
            body,
            color: self.config.broadcast_color,
        }));
        let jobs = self.enqueue(self.store.all(), &payload);
        info!(jobs, "Broadcast queued");

        InboundOutcome::Broadcast { jobs }
    }

    /// Send the join notice to every registered channel except `joined`.
    ///
    /// Sent inline rather than through the queue. Returns the number of channels reached.
    pub async fn announce_join(&self, group_name: &str, joined: &ChannelRegistration) -> usize {
        let text = format!("**{}** has joined the global chat!", group_name);
        let mut announced = 0;

        for target in self.store.all().into_iter().filter(|r| r != joined) {
            let result = async {
                let group = self.platform.fetch_group(&target.group_id).await?;
                let channel = self
                    .platform
                    .fetch_channel(&group, &target.channel_id)
                    .await?;
                self.platform.send_notice(&channel, &text).await
            }
            .await;

            match result {
                Ok(()) => {
                    announced += 1;
                    debug!(channel_id = %target.channel_id, "Join notice sent");
                }
                Err(e) => warn!(
                    group_id = %target.group_id,
                    channel_id = %target.channel_id,
                    error = %e,
                    "Could not send join notice"
                ),
            }
        }

        announced
    }

    fn enqueue(
        &self,
        destinations: impl IntoIterator<Item = ChannelRegistration>,
        payload: &Payload,
    ) -> usize {
        let jobs = destinations
            .into_iter()
            .map(|destination| DeliveryJob::new(destination, payload.clone()));
        let added = self.queue.push_all(jobs);
        debug!(added, pending = self.queue.len(), kind = payload.kind(), "Jobs queued");
        added
    }

    async fn can_manage(&self, group_id: &str, user_id: &str) -> bool {
        match self.platform.member_can_manage(group_id, user_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(%group_id, %user_id, error = %e, "Permission check failed");
                false
            }
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save() {
            error!(
                path = %self.store.path().display(),
                error = %e,
                "Failed to save registration table"
            );
        }
    }

    async fn reply(&self, msg: &InboundMessage, text: &str) {
        if let Err(e) = self
            .platform
            .reply(&msg.channel_id, &msg.message_id, text)
            .await
        {
            warn!(channel_id = %msg.channel_id, error = %e, "Could not send reply");
        }
    }
}
