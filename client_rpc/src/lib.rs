//! This crate provides domain interfaces and the JSON RPC data types that are
//! exchanged between the two clients of a pairing or session.

pub mod domain;
pub mod macros;
pub mod rpc;
