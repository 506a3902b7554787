//! Core client state machine of the pairing/session protocol: sequence
//! controllers over an abstract relay transport, with key agreement,
//! subscription tracking and persistence.
//!
//! The heavy lifting lives in the two sequence controllers
//! ([`sequence::pairing`] and [`sequence::session`]); [`client::Client`] is
//! the thin facade that aggregates them and re-emits their lifecycle events.

pub mod client;
pub mod crypto;
pub mod error;
pub mod event;
pub mod relay;
pub mod sequence;
pub mod storage;
pub mod subscription;
pub mod uri;

pub use {
    client::{Client, ClientOptions, ConnectParams},
    error::ClientError,
    event::ClientEvent,
    sequence::{pairing::SettledPairing, session::SettledSession},
};
