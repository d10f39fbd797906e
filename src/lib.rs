//! meshrelay - a relay that joins channels of independent Discord servers into one chat.
//!
//! This library provides the relay engine and the Discord binding used by the
//! `meshrelay` binary.

pub mod cli;
pub mod config;
pub mod error;
pub mod relay;

#[cfg(feature = "discord")]
pub mod discord;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export Args for the binary
pub use cli::Args;
