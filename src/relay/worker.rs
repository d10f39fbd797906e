//! The single consumer of the delivery queue.

use super::identity::IdentityPool;
use super::message::{DeliveryJob, Payload};
use super::platform::RelayPlatform;
use super::queue::DeliveryQueue;
use crate::error::RelayResult;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Drains the delivery queue one job at a time until shutdown
pub struct DeliveryWorker {
    queue: Arc<DeliveryQueue>,
    platform: Arc<dyn RelayPlatform>,
    pool: IdentityPool,
    shutdown: watch::Receiver<bool>,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        platform: Arc<dyn RelayPlatform>,
        pool: IdentityPool,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            platform,
            pool,
            shutdown,
        }
    }

    /// Run until the shutdown flag flips to true (or its sender is dropped).
    ///
    /// Each job runs to completion, external calls included, before the next is popped.
    pub async fn run(mut self) {
        info!(platform = self.platform.name(), "Delivery worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                job = self.queue.next() => {
                    self.process(job).await;
                }
            }
        }

        info!(
            pending = self.queue.len(),
            "Delivery worker stopped, pending jobs dropped"
        );
    }

    /// Process one job. Failures are logged and counted, never propagated.
    pub async fn process(&self, job: DeliveryJob) -> bool {
        let group_id = job.destination.group_id.clone();
        let channel_id = job.destination.channel_id.clone();
        let kind = job.payload.kind();

        match self.deliver(&job).await {
            Ok(()) => {
                self.queue.record_outcome(true);
                info!(%group_id, %channel_id, kind, "Delivered");
                debug!(pending = self.queue.len(), "Queue depth");
                true
            }
            Err(e) => {
                self.queue.record_outcome(false);
                warn!(
                    %group_id,
                    %channel_id,
                    kind,
                    lookup = e.is_lookup(),
                    error = %e,
                    "Delivery failed, skipping"
                );
                false
            }
        }
    }

    async fn deliver(&self, job: &DeliveryJob) -> RelayResult<()> {
        let platform = self.platform.as_ref();
        let group = platform.fetch_group(&job.destination.group_id).await?;
        let channel = platform
            .fetch_channel(&group, &job.destination.channel_id)
            .await?;

        match &job.payload {
            Payload::Relay(message) => {
                let (identity, _) = self
                    .pool
                    .acquire(
                        platform,
                        &channel,
                        &message.author_name,
                        message.author_avatar_url.as_deref(),
                    )
                    .await?;
                platform
                    .send_as_identity(&identity, &message.content, &message.attachments)
                    .await
            }
            Payload::Broadcast(card) => {
                let profile = platform.bot_profile().await?;
                let (identity, _) = self
                    .pool
                    .acquire(
                        platform,
                        &channel,
                        &profile.name,
                        profile.avatar_url.as_deref(),
                    )
                    .await?;
                platform
                    .send_card_as_identity(&identity, card, &profile)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::message::{BroadcastPayload, ChannelRegistration, RelayMessage};
    use crate::test_utils::{MockPlatform, Sent};
    use std::time::Duration;

    fn relay_job(group: &str, channel: &str, content: &str) -> DeliveryJob {
        DeliveryJob::new(
            ChannelRegistration::new(group, channel),
            Payload::Relay(Arc::new(RelayMessage {
                content: content.to_string(),
                author_name: "alice".to_string(),
                author_avatar_url: None,
                attachments: vec![],
            })),
        )
    }

    fn worker(platform: &Arc<MockPlatform>) -> (Arc<DeliveryQueue>, DeliveryWorker, watch::Sender<bool>) {
        let queue = DeliveryQueue::new();
        let (tx, rx) = watch::channel(false);
        let worker = DeliveryWorker::new(
            queue.clone(),
            platform.clone(),
            IdentityPool::default(),
            rx,
        );
        (queue, worker, tx)
    }

    #[tokio::test]
    async fn test_bad_destination_does_not_stall_queue() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_channel("gb", "B", "cb");
        platform.add_channel("gc", "C", "cc");
        let (queue, worker, _tx) = worker(&platform);

        queue.push(relay_job("ga", "ca", "one"));
        queue.push(relay_job("gb", "cb", "two"));
        queue.push(relay_job("gc", "cc", "three"));

        let mut outcomes = Vec::new();
        while let Some(job) = queue.try_pop() {
            outcomes.push(worker.process(job).await);
        }

        assert_eq!(outcomes, vec![false, true, true]);
        let channels: Vec<_> = platform.sent().iter().map(|s| s.channel_id().to_string()).collect();
        assert_eq!(channels, vec!["cb", "cc"]);
        assert_eq!(queue.stats().total_failed, 1);
        assert_eq!(queue.stats().total_delivered, 2);
    }

    #[tokio::test]
    async fn test_send_failure_is_isolated() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_channel("g1", "One", "c1");
        platform.add_channel("g2", "Two", "c2");
        platform.fail_sends("c1");
        let (queue, worker, _tx) = worker(&platform);

        assert!(!worker.process(relay_job("g1", "c1", "x")).await);
        assert!(worker.process(relay_job("g2", "c2", "y")).await);
        assert_eq!(platform.sent().len(), 1);
        assert_eq!(queue.stats().total_failed, 1);
    }

    #[tokio::test]
    async fn test_relay_sends_as_author() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_channel("g2", "Two", "c2");
        let (_queue, worker, _tx) = worker(&platform);

        assert!(worker.process(relay_job("g2", "c2", "hello")).await);
        match &platform.sent()[0] {
            Sent::Message {
                identity, content, ..
            } => {
                assert_eq!(identity.name, "alice");
                assert_eq!(content, "hello");
            }
            other => panic!("unexpected send: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_uses_bot_identity() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_channel("g1", "One", "c1");
        let (_queue, worker, _tx) = worker(&platform);

        let job = DeliveryJob::new(
            ChannelRegistration::new("g1", "c1"),
            Payload::Broadcast(Arc::new(BroadcastPayload {
                title: "News".to_string(),
                body: "Hello world".to_string(),
                color: 0xFEEA3B,
            })),
        );
        assert!(worker.process(job).await);

        match &platform.sent()[0] {
            Sent::Card { identity, card, .. } => {
                assert_eq!(identity.name, MockPlatform::BOT_NAME);
                assert_eq!(card.body, "Hello world");
            }
            other => panic!("unexpected send: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_at_cap_relabels_an_author_identity() {
        use crate::relay::identity::MAX_IDENTITIES_PER_CHANNEL;
        use crate::relay::platform::Channel;
        use std::collections::HashSet;

        let platform = Arc::new(MockPlatform::new());
        platform.add_channel("g1", "One", "c1");
        let channel = Channel {
            group_id: "g1".to_string(),
            id: "c1".to_string(),
        };
        for i in 0..MAX_IDENTITIES_PER_CHANNEL {
            platform
                .create_identity(&channel, &format!("author-{i}"), None)
                .await
                .unwrap();
        }
        let before = platform.identities("c1");
        let (_queue, worker, _tx) = worker(&platform);

        let job = DeliveryJob::new(
            ChannelRegistration::new("g1", "c1"),
            Payload::Broadcast(Arc::new(BroadcastPayload {
                title: "News".to_string(),
                body: "Hello world".to_string(),
                color: 0xFEEA3B,
            })),
        );
        assert!(worker.process(job).await);

        let after = platform.identities("c1");
        assert_eq!(after.len(), MAX_IDENTITIES_PER_CHANNEL);

        let handles_before: HashSet<_> = before.iter().map(|i| i.handle.clone()).collect();
        let handles_after: HashSet<_> = after.iter().map(|i| i.handle.clone()).collect();
        assert_eq!(handles_before, handles_after);

        let renamed: Vec<_> = after
            .iter()
            .filter(|i| i.name == MockPlatform::BOT_NAME)
            .collect();
        assert_eq!(renamed.len(), 1);

        match &platform.sent()[0] {
            Sent::Card { identity, .. } => {
                assert_eq!(identity.name, MockPlatform::BOT_NAME);
                assert!(handles_before.contains(&identity.handle));
            }
            other => panic!("unexpected send: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_drains_in_order_and_stops() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_channel("g1", "One", "c1");
        let (queue, worker, tx) = worker(&platform);
        let handle = tokio::spawn(worker.run());

        for text in ["1", "2", "3"] {
            queue.push(relay_job("g1", "c1", text));
        }

        for _ in 0..100 {
            if platform.sent().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let contents: Vec<_> = platform
            .sent()
            .iter()
            .filter_map(|s| match s {
                Sent::Message { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["1", "2", "3"]);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker stopped")
            .unwrap();
    }
}
