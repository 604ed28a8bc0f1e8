//! Room signaling wire protocol.
//!
//! This crate defines the JSON documents exchanged with the signaling
//! server:
//!
//! - [`snapshot`] - inbound room state snapshots and the outbound local
//!   participant state
//! - [`message`] - side-channel messages, tagged by their `type` field
//! - [`codec`] - encoding and decoding over [`bytes::Bytes`]
//!
//! Every inbound field is optional on the wire unless the protocol
//! guarantees it, so a partial snapshot deserializes into the same types
//! as a full one.

#![warn(clippy::pedantic)]

#[macro_use]
mod open_enum;

pub mod codec;
pub mod message;
pub mod snapshot;
