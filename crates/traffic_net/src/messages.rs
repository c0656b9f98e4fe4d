//! Message envelope and typed payloads exchanged between zones.
//!
//! On the wire every message is a JSON object:
//!
//! ```json
//! {
//!   "id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
//!   "timestamp": "2024-05-01T12:00:00Z",
//!   "kind": "VEHICLE_ENTERING",
//!   "origin": "north",
//!   "destination": "south",
//!   "payload": { "id": "NORTH-V1", "position": [10.0, 0.0], "speed": 3.0, "heading": "EAST" }
//! }
//! ```
//!
//! `kind` is the discriminator for `payload`. In memory the pair is a single
//! [`Payload`] enum, so every consumer dispatches with an exhaustive match and
//! a kind this build does not know is rejected once, in [`Envelope::decode`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use glam::DVec2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use traffic_sim::{Heading, Vehicle, VehicleId};
use uuid::Uuid;

use crate::error::{NetError, ProtocolError};

/// Discriminator of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    VehicleEntering,
    ZoneState,
    Ack,
}

impl MessageKind {
    pub const ALL: [MessageKind; 3] = [
        MessageKind::VehicleEntering,
        MessageKind::ZoneState,
        MessageKind::Ack,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::VehicleEntering => "VEHICLE_ENTERING",
            MessageKind::ZoneState => "ZONE_STATE",
            MessageKind::Ack => "ACK",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_string()))
    }
}

/// Coarse load indicator reported by a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficLevel {
    Low,
    Moderate,
    High,
}

impl fmt::Display for TrafficLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrafficLevel::Low => "LOW",
            TrafficLevel::Moderate => "MODERATE",
            TrafficLevel::High => "HIGH",
        })
    }
}

/// Health of a zone as classified by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Healthy,
    Overloaded,
    Unhealthy,
}

impl Health {
    pub const ALL: [Health; 3] = [Health::Healthy, Health::Overloaded, Health::Unhealthy];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Health::Healthy => "HEALTHY",
            Health::Overloaded => "OVERLOADED",
            Health::Unhealthy => "UNHEALTHY",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Payloads ────────────────────────────────────────────────────────────────

/// A vehicle handed from one zone to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleEntering {
    pub id: VehicleId,
    pub position: DVec2,
    pub speed: f64,
    pub heading: Heading,
}

impl VehicleEntering {
    /// The vehicle described by this payload, moving.
    #[must_use]
    pub fn into_vehicle(self) -> Vehicle {
        Vehicle::new(self.id, self.position, self.speed, self.heading)
    }
}

impl From<&Vehicle> for VehicleEntering {
    fn from(v: &Vehicle) -> Self {
        Self {
            id: v.id.clone(),
            position: v.position,
            speed: v.speed,
            heading: v.heading,
        }
    }
}

/// Periodic load summary of a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneState {
    pub zone: String,
    pub vehicle_count: usize,
    pub traffic_level: TrafficLevel,
}

/// Acknowledgment of a previously received envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub acknowledged_id: Uuid,
    #[serde(default = "accepted")]
    pub ok: bool,
}

fn accepted() -> bool {
    true
}

/// Kind-specific body of an [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    VehicleEntering(VehicleEntering),
    ZoneState(ZoneState),
    Ack(Ack),
}

impl Payload {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::VehicleEntering(_) => MessageKind::VehicleEntering,
            Payload::ZoneState(_) => MessageKind::ZoneState,
            Payload::Ack(_) => MessageKind::Ack,
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let invalid = |reason: String| ProtocolError::InvalidPayload {
            kind: self.kind(),
            reason,
        };
        match self {
            Payload::VehicleEntering(p) => p
                .clone()
                .into_vehicle()
                .validate()
                .map_err(|e| invalid(e.to_string())),
            Payload::ZoneState(p) if p.zone.is_empty() => Err(invalid("zone is empty".into())),
            Payload::ZoneState(_) | Payload::Ack(_) => Ok(()),
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Payload::VehicleEntering(p) => serde_json::to_value(p),
            Payload::ZoneState(p) => serde_json::to_value(p),
            Payload::Ack(p) => serde_json::to_value(p),
        }
    }

    fn from_value(kind: MessageKind, value: Value) -> Result<Self, ProtocolError> {
        let invalid = |e: serde_json::Error| ProtocolError::InvalidPayload {
            kind,
            reason: e.to_string(),
        };
        Ok(match kind {
            MessageKind::VehicleEntering => {
                Payload::VehicleEntering(serde_json::from_value(value).map_err(invalid)?)
            }
            MessageKind::ZoneState => Payload::ZoneState(serde_json::from_value(value).map_err(invalid)?),
            MessageKind::Ack => Payload::Ack(serde_json::from_value(value).map_err(invalid)?),
        })
    }
}

// ── Envelope ────────────────────────────────────────────────────────────────

/// A routed, uniquely identified message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub origin: String,
    pub destination: String,
    pub payload: Payload,
}

/// Wire shape of an [`Envelope`] before the payload is interpreted.
#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    id: Uuid,
    timestamp: DateTime<Utc>,
    kind: String,
    origin: String,
    destination: String,
    payload: Value,
}

impl Envelope {
    fn build(
        origin: impl Into<String>,
        destination: impl Into<String>,
        payload: Payload,
    ) -> Result<Self, ProtocolError> {
        let envelope = Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            origin: origin.into(),
            destination: destination.into(),
            payload,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Hand `vehicle` from `origin` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if the vehicle fails
    /// validation or either zone name is empty.
    pub fn vehicle_entering(
        origin: impl Into<String>,
        destination: impl Into<String>,
        vehicle: &Vehicle,
    ) -> Result<Self, ProtocolError> {
        Self::build(origin, destination, Payload::VehicleEntering(vehicle.into()))
    }

    /// Report the load of `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if a name is empty.
    pub fn zone_state(
        origin: impl Into<String>,
        destination: impl Into<String>,
        zone: impl Into<String>,
        vehicle_count: usize,
        traffic_level: TrafficLevel,
    ) -> Result<Self, ProtocolError> {
        Self::build(
            origin,
            destination,
            Payload::ZoneState(ZoneState {
                zone: zone.into(),
                vehicle_count,
                traffic_level,
            }),
        )
    }

    /// Acknowledge the envelope with id `acknowledged_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] if a zone name is empty.
    pub fn ack(
        origin: impl Into<String>,
        destination: impl Into<String>,
        acknowledged_id: Uuid,
    ) -> Result<Self, ProtocolError> {
        Self::build(
            origin,
            destination,
            Payload::Ack(Ack {
                acknowledged_id,
                ok: true,
            }),
        )
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.origin.is_empty() || self.destination.is_empty() {
            return Err(ProtocolError::InvalidPayload {
                kind: self.kind(),
                reason: "origin and destination must be set".into(),
            });
        }
        self.payload.validate()
    }

    /// Serialise to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Encode`] if serialisation fails.
    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        let raw = RawEnvelope {
            id: self.id,
            timestamp: self.timestamp,
            kind: self.kind().as_str().to_string(),
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            payload: self.payload.to_value().map_err(NetError::Encode)?,
        };
        crate::codec::encode(&raw)
    }

    /// Parse and validate an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the bytes are not an envelope,
    /// [`ProtocolError::UnknownKind`] for an unrecognised `kind`, and
    /// [`ProtocolError::InvalidPayload`] if the payload does not match its
    /// kind or fails validation.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes).map_err(ProtocolError::Malformed)?;
        let kind = raw.kind.parse::<MessageKind>()?;
        let envelope = Self {
            id: raw.id,
            timestamp: raw.timestamp,
            origin: raw.origin,
            destination: raw.destination,
            payload: Payload::from_value(kind, raw.payload)?,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vehicle() -> Vehicle {
        Vehicle::new("NORTH-V1", DVec2::new(10.0, 0.0), 3.0, Heading::East)
    }

    #[test]
    fn test_vehicle_entering_wire_shape() {
        let env = Envelope::vehicle_entering("north", "south", &vehicle()).unwrap();
        let value: Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(value["kind"], "VEHICLE_ENTERING");
        assert_eq!(value["origin"], "north");
        assert_eq!(value["destination"], "south");
        assert_eq!(value["id"], env.id.to_string());
        assert_eq!(
            value["payload"],
            json!({"id": "NORTH-V1", "position": [10.0, 0.0], "speed": 3.0, "heading": "EAST"})
        );
    }

    #[test]
    fn test_decode_restores_envelope() {
        let env = Envelope::zone_state("north", "coordinator", "north", 12, TrafficLevel::Moderate)
            .unwrap();
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded, env);
        let Payload::ZoneState(state) = decoded.payload else {
            panic!("expected ZONE_STATE");
        };
        assert_eq!(state.vehicle_count, 12);
    }

    #[test]
    fn test_zone_state_uses_camel_case() {
        let env = Envelope::zone_state("a", "b", "a", 4, TrafficLevel::Low).unwrap();
        let value: Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(
            value["payload"],
            json!({"zone": "a", "vehicleCount": 4, "trafficLevel": "LOW"})
        );
    }

    #[test]
    fn test_ack_defaults_ok() {
        let id = Uuid::new_v4();
        let bytes = serde_json::to_vec(&json!({
            "id": Uuid::new_v4(),
            "timestamp": "2024-05-01T12:00:00Z",
            "kind": "ACK",
            "origin": "south",
            "destination": "north",
            "payload": {"acknowledgedId": id}
        }))
        .unwrap();
        let env = Envelope::decode(&bytes).unwrap();
        assert_eq!(
            env.payload,
            Payload::Ack(Ack {
                acknowledged_id: id,
                ok: true
            })
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let bytes = serde_json::to_vec(&json!({
            "id": Uuid::new_v4(),
            "timestamp": "2024-05-01T12:00:00Z",
            "kind": "ALLIANCE",
            "origin": "a",
            "destination": "b",
            "payload": {}
        }))
        .unwrap();
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(ProtocolError::UnknownKind(kind)) if kind == "ALLIANCE"
        ));
    }

    #[test]
    fn test_payload_must_match_kind() {
        let bytes = serde_json::to_vec(&json!({
            "id": Uuid::new_v4(),
            "timestamp": "2024-05-01T12:00:00Z",
            "kind": "VEHICLE_ENTERING",
            "origin": "a",
            "destination": "b",
            "payload": {"zone": "a", "vehicleCount": 1, "trafficLevel": "LOW"}
        }))
        .unwrap();
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(ProtocolError::InvalidPayload {
                kind: MessageKind::VehicleEntering,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_vehicle_rejected() {
        let mut v = vehicle();
        v.speed = -1.0;
        assert!(matches!(
            Envelope::vehicle_entering("a", "b", &v),
            Err(ProtocolError::InvalidPayload { .. })
        ));
        assert!(Envelope::ack("", "b", Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_malformed_bytes() {
        assert!(matches!(
            Envelope::decode(b"\x00garbage"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::decode(br#"{"id": "not-a-uuid"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_entering_payload_into_vehicle() {
        let mut v = vehicle();
        v.moving = false;
        let restored = VehicleEntering::from(&v).into_vehicle();
        assert_eq!(restored.id, v.id);
        assert!(restored.moving);
    }
}
