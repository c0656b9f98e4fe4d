//! Acknowledged, retried delivery of envelopes between zone queues.
//!
//! A [`MessageBus`] sits on top of a [`Transport`], which moves opaque bytes
//! into named durable queues and hands them back as [`Delivery`] values that
//! must be acked or naked. The bus adds the envelope codec, retry on publish
//! and the consume loop:
//!
//! | outcome of a delivery                  | action |
//! |----------------------------------------|--------|
//! | malformed bytes or invalid payload     | warn, ack (dropped) |
//! | unknown kind                           | warn, ack (discarded) |
//! | no handler registered for the kind     | warn, ack |
//! | handler returns `Ok`                   | ack |
//! | handler returns `Err`                  | nak (redelivered) |

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{NetError, ProtocolError};
use crate::messages::{Envelope, MessageKind, Payload};
use crate::retry::RetryPolicy;

// ── Transport ───────────────────────────────────────────────────────────────

/// Moves bytes into durable named queues.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Store `payload` on `queue`. Resolves once the broker has accepted it.
    ///
    /// `message_id` lets the broker drop duplicates of a retried publish.
    async fn publish(&self, queue: &str, message_id: &str, payload: Vec<u8>) -> Result<(), NetError>;

    /// Open the consuming side of `queue`. Reopening resumes where the
    /// previous inbox left off.
    async fn open(&self, queue: &str) -> Result<Box<dyn Inbox>, NetError>;
}

/// The consuming side of a queue.
#[async_trait]
pub trait Inbox: Send {
    /// Wait for the next delivery. `None` means the inbox is closed.
    async fn next(&mut self) -> Option<Result<Delivery, NetError>>;
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledge: Send {
    async fn ack(self: Box<Self>) -> Result<(), NetError>;
    async fn nak(self: Box<Self>) -> Result<(), NetError>;
}

/// A message taken from a queue, not yet settled.
pub struct Delivery {
    payload: Vec<u8>,
    settle: Box<dyn Acknowledge>,
}

impl Delivery {
    #[must_use]
    pub fn new(payload: Vec<u8>, settle: Box<dyn Acknowledge>) -> Self {
        Self { payload, settle }
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Confirm processing; the message will not be delivered again.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if the broker cannot be told.
    pub async fn ack(self) -> Result<(), NetError> {
        self.settle.ack().await
    }

    /// Reject; the message will be delivered again.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if the broker cannot be told.
    pub async fn nak(self) -> Result<(), NetError> {
        self.settle.nak().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// Processes one kind of envelope.
///
/// An `Err` leaves the message on the queue for redelivery, so handlers must
/// be idempotent.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Envelope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        (self.0)(envelope).await
    }
}

/// Wrap a closure returning a boxed future as a [`Handler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Envelope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// At most one handler per message kind.
#[derive(Clone, Default)]
pub struct HandlerSet {
    vehicle_entering: Option<Arc<dyn Handler>>,
    zone_state: Option<Arc<dyn Handler>>,
    ack: Option<Arc<dyn Handler>>,
}

impl HandlerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    #[must_use]
    pub fn on(mut self, kind: MessageKind, handler: Arc<dyn Handler>) -> Self {
        let slot = match kind {
            MessageKind::VehicleEntering => &mut self.vehicle_entering,
            MessageKind::ZoneState => &mut self.zone_state,
            MessageKind::Ack => &mut self.ack,
        };
        *slot = Some(handler);
        self
    }

    fn handler_for(&self, payload: &Payload) -> Option<&Arc<dyn Handler>> {
        match payload {
            Payload::VehicleEntering(_) => self.vehicle_entering.as_ref(),
            Payload::ZoneState(_) => self.zone_state.as_ref(),
            Payload::Ack(_) => self.ack.as_ref(),
        }
    }
}

// ── Bus ─────────────────────────────────────────────────────────────────────

/// What the bus did with a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A handler accepted the message; acked.
    Handled,
    /// A handler failed; naked for redelivery.
    Failed,
    /// The message could not be decoded or validated; acked and dropped.
    Rejected,
    /// The kind is unknown; acked and discarded.
    Discarded,
    /// No handler is registered for the kind; acked.
    Unhandled,
}

/// Envelope-level publish and consume over a [`Transport`].
#[derive(Clone)]
pub struct MessageBus {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl MessageBus {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Publish `envelope` to `queue`, retrying per the bus's [`RetryPolicy`].
    ///
    /// Every attempt carries the envelope id, so a retry after a lost broker
    /// ack does not produce a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Encode`] if the envelope cannot be serialised, or
    /// [`NetError::DeliveryFailed`] once every attempt has failed.
    pub async fn publish(&self, envelope: &Envelope, queue: &str) -> Result<(), NetError> {
        let bytes = envelope.encode()?;
        let message_id = envelope.id.to_string();
        self.retry
            .run(queue, || {
                self.transport
                    .publish(queue, &message_id, bytes.clone())
            })
            .await?;
        debug!(queue, id = %envelope.id, kind = %envelope.kind(), "published");
        Ok(())
    }

    /// Decode one delivery, dispatch it, and settle it with the broker.
    pub async fn process(&self, delivery: Delivery, handlers: &HandlerSet) -> Outcome {
        let outcome = match Envelope::decode(delivery.payload()) {
            Err(ProtocolError::UnknownKind(kind)) => {
                warn!(kind = %kind, "discarding message of unknown kind");
                Outcome::Discarded
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed message");
                Outcome::Rejected
            }
            Ok(envelope) => match handlers.handler_for(&envelope.payload) {
                None => {
                    warn!(kind = %envelope.kind(), id = %envelope.id, "no handler registered");
                    Outcome::Unhandled
                }
                Some(handler) => {
                    let id = envelope.id;
                    let kind = envelope.kind();
                    match handler.handle(envelope).await {
                        Ok(()) => Outcome::Handled,
                        Err(e) => {
                            warn!(%kind, %id, error = %e, "handler failed; message will be redelivered");
                            Outcome::Failed
                        }
                    }
                }
            },
        };

        let settled = match outcome {
            Outcome::Failed => delivery.nak().await,
            _ => delivery.ack().await,
        };
        if let Err(e) = settled {
            warn!(error = %e, ?outcome, "failed to settle delivery");
        }
        outcome
    }

    /// Consume `queue` until `cancel` fires.
    ///
    /// When the inbox fails or closes it is reopened after a backoff delay and
    /// consumption resumes on the same durable queue.
    ///
    /// # Errors
    ///
    /// Never returns an error today; the signature leaves room for fatal
    /// transport conditions.
    pub async fn consume(
        &self,
        queue: &str,
        handlers: &HandlerSet,
        cancel: &CancellationToken,
    ) -> Result<(), NetError> {
        let mut failures = 0u32;
        info!(queue, "consuming");
        'reopen: loop {
            if failures > 0 {
                let pause = self.retry.delay(failures);
                tokio::select! {
                    () = cancel.cancelled() => break 'reopen,
                    () = tokio::time::sleep(pause) => {}
                }
            }

            let mut inbox = tokio::select! {
                () = cancel.cancelled() => break 'reopen,
                opened = self.transport.open(queue) => match opened {
                    Ok(inbox) => inbox,
                    Err(e) => {
                        failures += 1;
                        error!(queue, error = %e, failures, "failed to open queue");
                        continue 'reopen;
                    }
                },
            };

            loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => break 'reopen,
                    next = inbox.next() => next,
                };
                match next {
                    Some(Ok(delivery)) => {
                        failures = 0;
                        self.process(delivery, handlers).await;
                    }
                    Some(Err(e)) => {
                        failures += 1;
                        warn!(queue, error = %e, failures, "inbox failed; reopening");
                        continue 'reopen;
                    }
                    None => {
                        failures += 1;
                        warn!(queue, failures, "inbox closed; reopening");
                        continue 'reopen;
                    }
                }
            }
        }
        info!(queue, "stopped consuming");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;
    use traffic_sim::{DVec2, Heading, Vehicle};
    use uuid::Uuid;

    use super::*;
    use crate::memory::{InboxFault, MemoryTransport};

    fn bus(transport: &MemoryTransport) -> MessageBus {
        MessageBus::new(Arc::new(transport.clone())).with_retry(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(10)),
        )
    }

    fn counting(counter: Arc<AtomicUsize>, fail_first: usize) -> Arc<dyn Handler> {
        handler_fn(move |_envelope| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < fail_first {
                    anyhow::bail!("transient failure {n}");
                }
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        })
    }

    async fn next(transport: &MemoryTransport, queue: &str) -> Delivery {
        let mut inbox = transport.open(queue).await.unwrap();
        inbox.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_handled_message_is_acked() {
        let transport = MemoryTransport::new();
        let bus = bus(&transport);
        let env = Envelope::ack("south", "north", Uuid::new_v4()).unwrap();
        bus.publish(&env, "north_queue").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let handlers = HandlerSet::new().on(MessageKind::Ack, counting(Arc::clone(&calls), 0));
        let outcome = bus.process(next(&transport, "north_queue").await, &handlers).await;

        assert_eq!(outcome, Outcome::Handled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.acks("north_queue"), 1);
        assert_eq!(transport.backlog("north_queue"), 0);
    }

    #[tokio::test]
    async fn test_handler_error_naks_and_redelivers() {
        let transport = MemoryTransport::new();
        let bus = bus(&transport);
        let v = Vehicle::new("NORTH-V1", DVec2::new(1.0, 2.0), 3.0, Heading::East);
        let env = Envelope::vehicle_entering("north", "south", &v).unwrap();
        bus.publish(&env, "south_queue").await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let handlers =
            HandlerSet::new().on(MessageKind::VehicleEntering, counting(Arc::clone(&calls), 1));

        let first = bus.process(next(&transport, "south_queue").await, &handlers).await;
        assert_eq!(first, Outcome::Failed);
        assert_eq!(transport.naks("south_queue"), 1);

        let second = bus.process(next(&transport, "south_queue").await, &handlers).await;
        assert_eq!(second, Outcome::Handled);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(transport.backlog("south_queue"), 0);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_are_acked() {
        let transport = MemoryTransport::new();
        let bus = bus(&transport);
        transport.publish("q", "m1", b"not json".to_vec()).await.unwrap();
        let unknown = serde_json::json!({
            "id": Uuid::new_v4(),
            "timestamp": "2024-05-01T12:00:00Z",
            "kind": "TRAFFIC_LIGHT_UPDATE",
            "origin": "a",
            "destination": "b",
            "payload": {}
        });
        transport
            .publish("q", "m2", serde_json::to_vec(&unknown).unwrap())
            .await
            .unwrap();

        let handlers = HandlerSet::new();
        assert_eq!(bus.process(next(&transport, "q").await, &handlers).await, Outcome::Rejected);
        assert_eq!(bus.process(next(&transport, "q").await, &handlers).await, Outcome::Discarded);
        assert_eq!(transport.acks("q"), 2);
        assert_eq!(transport.naks("q"), 0);
    }

    #[tokio::test]
    async fn test_missing_handler_is_acked() {
        let transport = MemoryTransport::new();
        let bus = bus(&transport);
        let env = Envelope::zone_state("a", "coordinator", "a", 3, crate::TrafficLevel::Low).unwrap();
        bus.publish(&env, "q").await.unwrap();

        let outcome = bus.process(next(&transport, "q").await, &HandlerSet::new()).await;
        assert_eq!(outcome, Outcome::Unhandled);
        assert_eq!(transport.acks("q"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_retries_transient_failures() {
        let transport = MemoryTransport::new();
        let bus = bus(&transport);
        transport.fail_next(2);
        let env = Envelope::ack("a", "b", Uuid::new_v4()).unwrap();
        bus.publish(&env, "b_queue").await.unwrap();
        assert_eq!(transport.backlog("b_queue"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_exhausted_is_delivery_failed() {
        let transport = MemoryTransport::new();
        let bus = bus(&transport);
        transport.fail_next(3);
        let env = Envelope::ack("a", "b", Uuid::new_v4()).unwrap();
        let err = bus.publish(&env, "b_queue").await.unwrap_err();
        assert!(matches!(err, NetError::DeliveryFailed { attempts: 3, .. }));
        assert_eq!(transport.backlog("b_queue"), 0);
    }

    #[tokio::test]
    async fn test_consume_until_cancelled() {
        let transport = MemoryTransport::new();
        let bus = bus(&transport);
        for _ in 0..3 {
            let env = Envelope::ack("a", "b", Uuid::new_v4()).unwrap();
            bus.publish(&env, "b_queue").await.unwrap();
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let seen = Arc::clone(&calls);
        let handlers = HandlerSet::new().on(
            MessageKind::Ack,
            handler_fn(move |_| {
                let seen = Arc::clone(&seen);
                let stop = stop.clone();
                async move {
                    if seen.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                        stop.cancel();
                    }
                    Ok::<(), anyhow::Error>(())
                }
                .boxed()
            }),
        );

        tokio::time::timeout(
            Duration::from_secs(5),
            bus.consume("b_queue", &handlers, &cancel),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_reopens_queue_after_inbox_failures() {
        let transport = MemoryTransport::new();
        let bus = bus(&transport);
        transport.inject_inbox_fault("b_queue", InboxFault::Error);
        transport.inject_inbox_fault("b_queue", InboxFault::Closed);

        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let seen = Arc::clone(&calls);
        let handlers = HandlerSet::new().on(
            MessageKind::Ack,
            handler_fn(move |_| {
                let seen = Arc::clone(&seen);
                let stop = stop.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    stop.cancel();
                    Ok::<(), anyhow::Error>(())
                }
                .boxed()
            }),
        );

        let consumer = {
            let bus = bus.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.consume("b_queue", &handlers, &cancel).await })
        };

        // One open per fault plus the one that stays up.
        while transport.opens("b_queue") < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let env = Envelope::ack("a", "b", Uuid::new_v4()).unwrap();
        bus.publish(&env, "b_queue").await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.opens("b_queue"), 3);
        assert_eq!(transport.acks("b_queue"), 1);
        assert_eq!(transport.backlog("b_queue"), 0);
    }
}
