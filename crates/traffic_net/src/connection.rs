//! NATS connection management.
//!
//! Provides a thin wrapper around `async-nats` with reconnect-forever
//! defaults. The initial connect is not retried, so a wrong URL fails fast.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::NetError;

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

const RECONNECT_BASE: Duration = Duration::from_millis(100);
const RECONNECT_MAX: Duration = Duration::from_secs(10);

/// Pause before reconnect attempt number `attempts`.
fn reconnect_delay(attempts: usize) -> Duration {
    let exponent = attempts.min(16) as u32;
    RECONNECT_BASE
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(RECONNECT_MAX)
}

/// A wrapper around an `async-nats` client.
#[derive(Debug, Clone)]
pub struct NatsConnection {
    client: async_nats::Client,
}

impl NatsConnection {
    /// Connect to NATS at the specified URL.
    ///
    /// Once connected, the client reconnects on its own with capped
    /// exponential backoff for as long as the process runs.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the connection cannot be established.
    pub async fn connect_to(url: &str) -> Result<Self, NetError> {
        info!(url, "connecting to NATS");
        let client = async_nats::ConnectOptions::new()
            .max_reconnects(None::<usize>)
            .reconnect_delay_callback(reconnect_delay)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => info!("NATS connected"),
                    async_nats::Event::Disconnected => warn!("NATS disconnected"),
                    other => warn!(event = %other, "NATS event"),
                }
            })
            .connect(url)
            .await?;
        info!("NATS connection established");
        Ok(Self { client })
    }

    /// Returns a reference to the underlying `async-nats` client.
    #[must_use]
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Send a JSON request and decode the JSON reply, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Timeout`] if no reply arrives in time, and
    /// [`NetError`] for encoding, request or decoding failures.
    pub async fn request<Req, Resp>(
        &self,
        subject: &str,
        body: &Req,
        timeout: Duration,
    ) -> Result<Resp, NetError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = crate::codec::encode(body)?;
        let reply = tokio::time::timeout(
            timeout,
            self.client.request(subject.to_string(), payload.into()),
        )
        .await
        .map_err(|_| NetError::Timeout(timeout))??;
        crate::codec::decode(&reply.payload)
    }

    /// Subscribe to a subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Subscribe`] if the subscription fails.
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, NetError> {
        let sub = self.client.subscribe(subject.to_string()).await?;
        Ok(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_is_capped() {
        assert_eq!(reconnect_delay(0), Duration::from_millis(100));
        assert_eq!(reconnect_delay(3), Duration::from_millis(800));
        assert_eq!(reconnect_delay(1_000), RECONNECT_MAX);
    }
}
