//! Client-side RTMP publisher transport.
//!
//! [`RtmpClient`] performs the handshake and connect/createStream/publish
//! negotiation, then accepts finalized FLV tags and re-frames each one as an
//! RTMP media message. Inbound control traffic is drained with
//! [`RtmpClient::poll_control`] without blocking the caller.

mod chunk;
mod client;
pub mod error;
mod handshake;
mod message;

pub use client::{RtmpClient, RtmpClientConfig};
pub use error::RtmpError;
