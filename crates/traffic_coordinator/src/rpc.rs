//! NATS request/reply front of the node registry, used by zones.
//!
//! Subjects:
//!
//! ```text
//! traffic.registry.register      register or re-register a zone
//! traffic.registry.heartbeat     heartbeat with the current load
//! traffic.registry.least_loaded  pick a migration target
//! traffic.registry.nodes         list every record
//! ```
//!
//! Replies are `{"ok": ...}` or `{"error": {"code", "message"}}`.

use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use traffic_net::NatsConnection;
use traffic_net::rpc::{
    FaultCode, HeartbeatResponse, LeastLoadedRequest, LeastLoadedResponse, RegisterRequest,
    RegisterResponse, RegistryFault, RegistryReply,
};
use traffic_net::subjects::{
    REGISTRY_HEARTBEAT, REGISTRY_LEAST_LOADED, REGISTRY_NODES, REGISTRY_REGISTER, REGISTRY_WILDCARD,
};

use crate::state::CoordinatorState;

pub struct RegistryResponder {
    state: CoordinatorState,
}

fn reply_bytes<T: Serialize>(result: Result<T, RegistryFault>) -> Vec<u8> {
    serde_json::to_vec(&RegistryReply::from(result)).unwrap_or_else(|_| b"{}".to_vec())
}

fn parse<T: DeserializeOwned>(payload: &[u8]) -> Result<T, RegistryFault> {
    serde_json::from_slice(payload).map_err(|e| RegistryFault::new(FaultCode::BadRequest, e))
}

impl RegistryResponder {
    #[must_use]
    pub fn new(state: CoordinatorState) -> Self {
        Self { state }
    }

    /// Serve registry requests until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be created.
    pub async fn run(&self, connection: &NatsConnection, cancel: &CancellationToken) -> anyhow::Result<()> {
        let mut sub = connection.subscribe(REGISTRY_WILDCARD).await?;
        info!(subject = REGISTRY_WILDCARD, "registry responder ready");

        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => break,
                msg = sub.next() => match msg {
                    Some(msg) => msg,
                    None => {
                        warn!("registry subscription closed");
                        break;
                    }
                },
            };

            let Some(reply_to) = msg.reply.clone() else {
                debug!(subject = %msg.subject, "ignoring registry message without reply subject");
                continue;
            };
            let response = self.handle(msg.subject.as_str(), &msg.payload).await;
            if let Err(e) = connection.client().publish(reply_to, response.into()).await {
                error!(%e, "failed to publish reply");
            }
        }

        if let Err(e) = sub.unsubscribe().await {
            debug!(%e, "unsubscribe failed");
        }
        Ok(())
    }

    /// Handle one request on `subject` and return the encoded reply.
    pub async fn handle(&self, subject: &str, payload: &[u8]) -> Vec<u8> {
        debug!(subject, "registry request");
        match subject {
            REGISTRY_REGISTER => reply_bytes(self.handle_register(payload).await),
            REGISTRY_HEARTBEAT => reply_bytes(self.handle_heartbeat(payload).await),
            REGISTRY_LEAST_LOADED => reply_bytes(self.handle_least_loaded(payload).await),
            REGISTRY_NODES => reply_bytes(Ok(self.state.nodes().await)),
            other => {
                warn!(subject = %other, "unknown registry operation");
                reply_bytes::<()>(Err(RegistryFault::new(
                    FaultCode::BadRequest,
                    format!("unknown operation: {other}"),
                )))
            }
        }
    }

    async fn handle_register(&self, payload: &[u8]) -> Result<RegisterResponse, RegistryFault> {
        let req: RegisterRequest = parse(payload)?;
        let message = self.state.register(req).await?;
        Ok(RegisterResponse { message })
    }

    async fn handle_heartbeat(&self, payload: &[u8]) -> Result<HeartbeatResponse, RegistryFault> {
        let req: RegisterRequest = parse(payload)?;
        match self.state.heartbeat(&req).await {
            Ok(health) => Ok(HeartbeatResponse { health }),
            Err(e) => {
                warn!(zone = %req.zone, error = %e, "heartbeat rejected");
                Err(e.into())
            }
        }
    }

    async fn handle_least_loaded(&self, payload: &[u8]) -> Result<LeastLoadedResponse, RegistryFault> {
        let req: LeastLoadedRequest = if payload.is_empty() {
            LeastLoadedRequest::default()
        } else {
            parse(payload)?
        };
        let zone = self.state.least_loaded(&req.exclude).await?;
        Ok(LeastLoadedResponse { zone })
    }
}

#[cfg(test)]
mod tests {
    use traffic_net::messages::Health;
    use traffic_net::rpc::NodesResponse;
    use traffic_net::TrafficLevel;

    use super::*;
    use crate::state::{test_request, test_state};

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RegistryFault> {
        serde_json::from_slice::<RegistryReply<T>>(bytes)
            .unwrap()
            .into_result()
    }

    #[tokio::test]
    async fn test_register_heartbeat_and_least_loaded() {
        let responder = RegistryResponder::new(test_state());
        let body = serde_json::to_vec(&test_request("A", 5, TrafficLevel::Low)).unwrap();
        let reply: RegisterResponse = decode(&responder.handle(REGISTRY_REGISTER, &body).await).unwrap();
        assert!(reply.message.contains('A'));

        let body = serde_json::to_vec(&test_request("A", 60, TrafficLevel::High)).unwrap();
        let reply: HeartbeatResponse = decode(&responder.handle(REGISTRY_HEARTBEAT, &body).await).unwrap();
        assert_eq!(reply.health, Health::Overloaded);

        let fault = decode::<LeastLoadedResponse>(&responder.handle(REGISTRY_LEAST_LOADED, b"").await)
            .unwrap_err();
        assert_eq!(fault.code, FaultCode::NoHealthyTarget);

        let nodes: NodesResponse = decode(&responder.handle(REGISTRY_NODES, b"").await).unwrap();
        assert_eq!(nodes["A"].vehicle_count, 60);
    }

    #[tokio::test]
    async fn test_least_loaded_excludes_caller() {
        let state = test_state();
        state.register(test_request("A", 0, TrafficLevel::Low)).await.unwrap();
        state.register(test_request("B", 9, TrafficLevel::Low)).await.unwrap();
        let responder = RegistryResponder::new(state);
        let body = serde_json::to_vec(&LeastLoadedRequest {
            exclude: vec!["A".into()],
        })
        .unwrap();
        let reply: LeastLoadedResponse =
            decode(&responder.handle(REGISTRY_LEAST_LOADED, &body).await).unwrap();
        assert_eq!(reply.zone, "B");
    }

    #[tokio::test]
    async fn test_heartbeat_unregistered_zone() {
        let responder = RegistryResponder::new(test_state());
        let body = serde_json::to_vec(&test_request("ghost", 1, TrafficLevel::Low)).unwrap();
        let fault = decode::<HeartbeatResponse>(&responder.handle(REGISTRY_HEARTBEAT, &body).await)
            .unwrap_err();
        assert_eq!(fault.code, FaultCode::NotRegistered);
    }

    #[tokio::test]
    async fn test_bad_payload_and_unknown_subject() {
        let responder = RegistryResponder::new(test_state());
        let fault = decode::<RegisterResponse>(&responder.handle(REGISTRY_REGISTER, b"not json").await)
            .unwrap_err();
        assert_eq!(fault.code, FaultCode::BadRequest);

        let fault = decode::<()>(&responder.handle("traffic.registry.bogus", b"{}").await).unwrap_err();
        assert_eq!(fault.code, FaultCode::BadRequest);
    }
}
