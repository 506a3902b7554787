//! Facade crate re-exporting the client core and the wire-level RPC types.

#[cfg(feature = "client")]
pub use client_core as client;

#[cfg(feature = "rpc")]
pub use client_rpc as rpc;
