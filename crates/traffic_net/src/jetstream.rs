//! JetStream transport.
//!
//! All queues share the work-queue stream [`STREAM`], one subject per queue.
//! Each queue is read through a durable pull consumer with explicit acks, so
//! a message stays on the stream until a consumer acks it and survives
//! restarts of either side.

use std::time::Duration;

use async_nats::jetstream::{self, AckKind, consumer, stream};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use crate::bus::{Acknowledge, Delivery, Inbox, Transport};
use crate::connection::NatsConnection;
use crate::error::NetError;
use crate::subjects::{QUEUE_WILDCARD, STREAM, consumer_name, queue_subject};

/// Window within which JetStream drops a republished message id.
const DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// Redelivery delay for an unacked message.
const ACK_WAIT: Duration = Duration::from_secs(30);

fn nats_err(e: impl std::fmt::Display) -> NetError {
    NetError::Nats(e.to_string())
}

/// [`Transport`] backed by a JetStream work-queue stream.
#[derive(Debug, Clone)]
pub struct JetStreamTransport {
    context: jetstream::Context,
    stream: stream::Stream,
}

impl JetStreamTransport {
    /// Create the stream if it does not exist yet and bind to it.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Nats`] if the stream cannot be created or looked up.
    pub async fn new(connection: &NatsConnection) -> Result<Self, NetError> {
        let context = jetstream::new(connection.client().clone());
        let stream = context
            .get_or_create_stream(stream::Config {
                name: STREAM.to_string(),
                subjects: vec![QUEUE_WILDCARD.to_string()],
                retention: stream::RetentionPolicy::WorkQueue,
                duplicate_window: DUPLICATE_WINDOW,
                ..Default::default()
            })
            .await
            .map_err(nats_err)?;
        info!(stream = STREAM, subjects = QUEUE_WILDCARD, "JetStream stream ready");
        Ok(Self { context, stream })
    }
}

#[async_trait]
impl Transport for JetStreamTransport {
    async fn publish(&self, queue: &str, message_id: &str, payload: Vec<u8>) -> Result<(), NetError> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", message_id);
        let ack = self
            .context
            .publish_with_headers(queue_subject(queue), headers, payload.into())
            .await
            .map_err(nats_err)?;
        let ack = ack.await.map_err(nats_err)?;
        debug!(queue, message_id, sequence = ack.sequence, duplicate = ack.duplicate, "stored");
        Ok(())
    }

    async fn open(&self, queue: &str) -> Result<Box<dyn Inbox>, NetError> {
        let name = consumer_name(queue);
        let consumer: consumer::PullConsumer = self
            .stream
            .get_or_create_consumer(
                &name,
                consumer::pull::Config {
                    durable_name: Some(name.clone()),
                    filter_subject: queue_subject(queue),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: ACK_WAIT,
                    ..Default::default()
                },
            )
            .await
            .map_err(nats_err)?;
        let messages = consumer.messages().await.map_err(nats_err)?;
        debug!(queue, consumer = %name, "opened durable consumer");
        Ok(Box::new(JetStreamInbox { messages }))
    }
}

struct JetStreamInbox {
    messages: consumer::pull::Stream,
}

#[async_trait]
impl Inbox for JetStreamInbox {
    async fn next(&mut self) -> Option<Result<Delivery, NetError>> {
        let message = match self.messages.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(nats_err(e))),
        };
        let payload = message.payload.to_vec();
        Some(Ok(Delivery::new(payload, Box::new(JetStreamSettle(message)))))
    }
}

struct JetStreamSettle(jetstream::Message);

#[async_trait]
impl Acknowledge for JetStreamSettle {
    async fn ack(self: Box<Self>) -> Result<(), NetError> {
        self.0.ack().await.map_err(nats_err)
    }

    async fn nak(self: Box<Self>) -> Result<(), NetError> {
        self.0.ack_with(AckKind::Nak(None)).await.map_err(nats_err)
    }
}
