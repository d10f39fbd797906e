//! The relay/fan-out engine.
//!
//! # Architecture
//!
//! ```text
//!  message created ──► RelayService ──► transform ──► DeliveryQueue (FIFO)
//!                          │                              │
//!                          ▼                              ▼
//!                  RegistrationStore               DeliveryWorker (one)
//!                    (channels.csv)                       │
//!                                                         ├─► IdentityPool ──► webhooks
//!                                                         └─► RelayPlatform::send_*
//! ```
//!
//! Every failure on the delivery path is scoped to one job (or, for join notices, one
//! destination) and logged; it never stops the queue.

pub mod command;
pub mod identity;
pub mod message;
pub mod orchestrator;
pub mod platform;
pub mod queue;
pub mod registry;
pub mod transform;
pub mod worker;

pub use identity::{IdentityPool, VictimPicker, MAX_IDENTITIES_PER_CHANNEL};
pub use message::{BroadcastPayload, ChannelRegistration, DeliveryJob, Payload, RelayMessage};
pub use orchestrator::{InboundOutcome, RelayService};
pub use platform::{InboundMessage, RelayPlatform};
pub use queue::DeliveryQueue;
pub use registry::RegistrationStore;
