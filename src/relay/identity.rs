//! Per-channel pool of reusable send identities.
//!
//! Each destination channel holds at most a fixed number of named identities. A relayed
//! author reuses an identity with their exact name, otherwise a new one is created while
//! the channel is under the cap, otherwise an existing one is relabelled.
//!
//! ```text
//! list(channel) ──► name match? ──yes──► reuse
//!                        │no
//!                        ▼
//!                  count < cap? ──yes──► create(name, avatar)
//!                        │no
//!                        ▼
//!                  pick victim ─────────► rename(victim, name, avatar)
//! ```

use super::platform::{Channel, RelayPlatform, SendIdentity};
use crate::error::{RelayError, RelayResult};
use rand::Rng;
use tracing::debug;

/// Upper bound on live identities per destination channel
pub const MAX_IDENTITIES_PER_CHANNEL: usize = 15;

/// Chooses which identity to relabel when a channel is at its cap
pub trait VictimPicker: Send + Sync {
    /// Index into `identities` of the identity to relabel. `identities` is never empty.
    fn pick(&self, identities: &[SendIdentity]) -> usize;
}

/// Uniform random choice over the full set
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomVictim;

impl VictimPicker for RandomVictim {
    fn pick(&self, identities: &[SendIdentity]) -> usize {
        rand::thread_rng().gen_range(0..identities.len())
    }
}

/// How an identity was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// An identity with the desired name already existed
    Reused,
    /// A new identity was created
    Created,
    /// An existing identity was relabelled; holds its previous name
    Relabeled { previous: String },
}

/// Identity pool policy: cap plus eviction strategy
pub struct IdentityPool {
    cap: usize,
    picker: Box<dyn VictimPicker>,
}

impl IdentityPool {
    /// Pool with the given cap and random eviction
    pub fn new(cap: usize) -> Self {
        Self::with_picker(cap, Box::new(RandomVictim))
    }

    pub fn with_picker(cap: usize, picker: Box<dyn VictimPicker>) -> Self {
        Self {
            cap: cap.max(1),
            picker,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Obtain an identity on `channel` that posts as `desired_name`.
    ///
    /// Never blocks on cap exhaustion. Any failing platform call surfaces as
    /// [`RelayError::Identity`].
    pub async fn acquire(
        &self,
        platform: &dyn RelayPlatform,
        channel: &Channel,
        desired_name: &str,
        desired_avatar: Option<&str>,
    ) -> RelayResult<(SendIdentity, Acquisition)> {
        let name = platform.normalize_identity_name(desired_name);
        let listed = platform
            .list_identities(channel)
            .await
            .map_err(into_identity_error)?;

        // Every identity occupies a slot; only executable ones can be reused or relabelled
        let occupied = listed.len();
        let mut identities: Vec<SendIdentity> =
            listed.into_iter().filter(|i| i.executable).collect();

        if let Some(pos) = identities.iter().position(|i| i.name == name) {
            return Ok((identities.swap_remove(pos), Acquisition::Reused));
        }

        if occupied < self.cap {
            let created = platform
                .create_identity(channel, &name, desired_avatar)
                .await
                .map_err(into_identity_error)?;
            debug!(channel_id = %channel.id, name = %name, "Created send identity");
            return Ok((created, Acquisition::Created));
        }

        if identities.is_empty() {
            return Err(RelayError::Identity(format!(
                "channel {} is full of identities the relay cannot use",
                channel.id
            )));
        }

        let idx = self.picker.pick(&identities).min(identities.len() - 1);
        let victim = identities.swap_remove(idx);
        let relabeled = platform
            .rename_identity(&victim, &name, desired_avatar)
            .await
            .map_err(into_identity_error)?;
        debug!(
            channel_id = %channel.id,
            previous = %victim.name,
            name = %name,
            "Relabelled send identity"
        );

        Ok((
            relabeled,
            Acquisition::Relabeled {
                previous: victim.name,
            },
        ))
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::new(MAX_IDENTITIES_PER_CHANNEL)
    }
}

fn into_identity_error(err: RelayError) -> RelayError {
    match err {
        RelayError::Identity(_) => err,
        other => RelayError::Identity(other.to_string()),
    }
}
