//! Registry RPC wire types.
//!
//! The coordinator answers on the `traffic.registry.*` subjects (see
//! [`subjects`](crate::subjects)). Every reply is either `{"ok": T}` or
//! `{"error": {"code": ..., "message": ...}}`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::{Health, TrafficLevel};

/// Body of a registration or a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub zone: String,
    pub queue: String,
    pub vehicle_count: usize,
    pub traffic_level: TrafficLevel,
}

/// Heartbeat body; same fields as a registration.
pub type HeartbeatRequest = RegisterRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub health: Health,
}

/// Ask for the least-loaded healthy zone, never one of `exclude`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeastLoadedRequest {
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeastLoadedResponse {
    pub zone: String,
}

/// Public view of a registered zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub zone: String,
    pub queue: String,
    pub vehicle_count: usize,
    pub traffic_level: TrafficLevel,
    pub last_heartbeat: DateTime<Utc>,
    pub health: Health,
}

/// Every known node, keyed by zone name.
pub type NodesResponse = BTreeMap<String, NodeView>;

/// Machine-readable reason for a failed registry call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    NotRegistered,
    NoHealthyTarget,
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct RegistryFault {
    pub code: FaultCode,
    pub message: String,
}

impl RegistryFault {
    #[must_use]
    pub fn new(code: FaultCode, message: impl fmt::Display) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

/// Reply envelope of every registry call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryReply<T> {
    Ok(T),
    Error(RegistryFault),
}

impl<T> RegistryReply<T> {
    /// Convert into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the carried [`RegistryFault`] for an error reply.
    pub fn into_result(self) -> Result<T, RegistryFault> {
        match self {
            RegistryReply::Ok(value) => Ok(value),
            RegistryReply::Error(fault) => Err(fault),
        }
    }
}

impl<T> From<Result<T, RegistryFault>> for RegistryReply<T> {
    fn from(result: Result<T, RegistryFault>) -> Self {
        match result {
            Ok(value) => RegistryReply::Ok(value),
            Err(fault) => RegistryReply::Error(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_reply_shapes() {
        let ok: RegistryReply<HeartbeatResponse> = RegistryReply::Ok(HeartbeatResponse {
            health: Health::Overloaded,
        });
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"ok": {"health": "OVERLOADED"}})
        );

        let err: RegistryReply<HeartbeatResponse> =
            RegistryReply::Error(RegistryFault::new(FaultCode::NotRegistered, "zone x"));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"error": {"code": "not_registered", "message": "zone x"}})
        );
    }

    #[test]
    fn test_register_request_fields() {
        let req: RegisterRequest = serde_json::from_value(json!({
            "zone": "a", "queue": "a_queue", "vehicleCount": 5, "trafficLevel": "LOW"
        }))
        .unwrap();
        assert_eq!(req.vehicle_count, 5);
        assert_eq!(req.traffic_level, TrafficLevel::Low);
    }

    #[test]
    fn test_into_result() {
        let reply: RegistryReply<LeastLoadedResponse> =
            serde_json::from_value(json!({"error": {"code": "no_healthy_target", "message": "none"}}))
                .unwrap();
        let fault = reply.into_result().unwrap_err();
        assert_eq!(fault.code, FaultCode::NoHealthyTarget);
    }
}
