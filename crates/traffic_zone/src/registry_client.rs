//! Client side of the coordinator's registry RPC.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use traffic_net::messages::Health;
use traffic_net::rpc::{
    FaultCode, HeartbeatResponse, LeastLoadedRequest, LeastLoadedResponse, RegisterRequest,
    RegisterResponse, RegistryFault, RegistryReply,
};
use traffic_net::subjects::{REGISTRY_HEARTBEAT, REGISTRY_LEAST_LOADED, REGISTRY_REGISTER};
use traffic_net::{NatsConnection, NetError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryClientError {
    /// The coordinator answered with an error.
    #[error("registry refused the request: {0}")]
    Fault(#[from] RegistryFault),

    /// The coordinator could not be reached in time.
    #[error("registry unreachable: {0}")]
    Unreachable(#[from] NetError),
}

impl RegistryClientError {
    fn code(&self) -> Option<FaultCode> {
        match self {
            RegistryClientError::Fault(fault) => Some(fault.code),
            RegistryClientError::Unreachable(_) => None,
        }
    }

    #[must_use]
    pub fn is_no_healthy_target(&self) -> bool {
        self.code() == Some(FaultCode::NoHealthyTarget)
    }

    #[must_use]
    pub fn is_not_registered(&self) -> bool {
        self.code() == Some(FaultCode::NotRegistered)
    }
}

/// Operations a zone needs from the node registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn register(&self, req: &RegisterRequest) -> Result<String, RegistryClientError>;

    async fn heartbeat(&self, req: &RegisterRequest) -> Result<Health, RegistryClientError>;

    /// Least-loaded healthy zone outside `exclude`.
    async fn least_loaded(&self, exclude: &[String]) -> Result<String, RegistryClientError>;
}

/// [`RegistryClient`] over NATS request/reply.
#[derive(Debug, Clone)]
pub struct NatsRegistryClient {
    connection: NatsConnection,
    timeout: Duration,
}

impl NatsRegistryClient {
    #[must_use]
    pub fn new(connection: NatsConnection, timeout: Duration) -> Self {
        Self { connection, timeout }
    }

    async fn call<Req, Resp>(&self, subject: &str, body: &Req) -> Result<Resp, RegistryClientError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let reply: RegistryReply<Resp> = self.connection.request(subject, body, self.timeout).await?;
        Ok(reply.into_result()?)
    }
}

#[async_trait]
impl RegistryClient for NatsRegistryClient {
    async fn register(&self, req: &RegisterRequest) -> Result<String, RegistryClientError> {
        let resp: RegisterResponse = self.call(REGISTRY_REGISTER, req).await?;
        Ok(resp.message)
    }

    async fn heartbeat(&self, req: &RegisterRequest) -> Result<Health, RegistryClientError> {
        let resp: HeartbeatResponse = self.call(REGISTRY_HEARTBEAT, req).await?;
        Ok(resp.health)
    }

    async fn least_loaded(&self, exclude: &[String]) -> Result<String, RegistryClientError> {
        let req = LeastLoadedRequest {
            exclude: exclude.to_vec(),
        };
        let resp: LeastLoadedResponse = self.call(REGISTRY_LEAST_LOADED, &req).await?;
        Ok(resp.zone)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = RegistryClientError::from(RegistryFault::new(FaultCode::NoHealthyTarget, "none"));
        assert!(err.is_no_healthy_target());
        assert!(!err.is_not_registered());

        let err = RegistryClientError::from(RegistryFault::new(FaultCode::NotRegistered, "A"));
        assert!(err.is_not_registered());

        let err = RegistryClientError::from(NetError::Timeout(Duration::from_secs(1)));
        assert!(!err.is_no_healthy_target());
        assert!(!err.is_not_registered());
    }
}
