//! # traffic_net
//!
//! Messaging layer shared by the coordinator and the zones.
//!
//! This crate provides:
//!
//! - [`subjects`]: Queue names and NATS subject builders.
//! - [`messages`]: The message envelope and its typed payloads.
//! - [`rpc`]: Request and response types of the registry RPC.
//! - [`codec`]: JSON serialisation helpers.
//! - [`connection`]: NATS connection management.
//! - [`retry`]: Backoff policy for outbound calls.
//! - [`bus`]: Acknowledged, retried delivery over a pluggable transport.
//! - [`jetstream`]: The JetStream transport.
//! - [`memory`]: An in-process transport.
//! - [`supervisor`]: Supervised task groups with shared cancellation.
//! - [`error`]: Network-layer error types.

pub mod bus;
pub mod codec;
pub mod connection;
pub mod error;
pub mod jetstream;
pub mod memory;
pub mod messages;
pub mod retry;
pub mod rpc;
pub mod subjects;
pub mod supervisor;

pub use bus::{Delivery, Handler, HandlerSet, Inbox, MessageBus, Transport};
pub use codec::{decode, encode};
pub use connection::NatsConnection;
pub use error::{NetError, ProtocolError};
pub use jetstream::JetStreamTransport;
pub use memory::{InboxFault, MemoryTransport};
pub use messages::{Envelope, Health, MessageKind, Payload, TrafficLevel};
pub use retry::RetryPolicy;
pub use supervisor::TaskGroup;
