//! Queue names and NATS subject hierarchy.
//!
//! Every zone owns one inbound queue named `{zone}_queue`. Queues are carried
//! on the subjects `traffic.queue.{queue}`, all captured by a single
//! work-queue stream. Registry RPC lives under `traffic.registry.`.

/// Name of the JetStream stream holding every queue.
pub const STREAM: &str = "TRAFFIC";

/// Wildcard matching every queue subject.
pub const QUEUE_WILDCARD: &str = "traffic.queue.*";

/// Queue on which zones publish their periodic ZONE_STATE reports.
pub const REPORT_QUEUE: &str = "zone_state_queue";

// ── Registry RPC ────────────────────────────────────────────────────────────

/// Register or re-register a zone. Zone → Coordinator.
pub const REGISTRY_REGISTER: &str = "traffic.registry.register";

/// Periodic heartbeat. Zone → Coordinator.
pub const REGISTRY_HEARTBEAT: &str = "traffic.registry.heartbeat";

/// Least-loaded target lookup. Zone → Coordinator.
pub const REGISTRY_LEAST_LOADED: &str = "traffic.registry.least_loaded";

/// List of every known node. Any → Coordinator.
pub const REGISTRY_NODES: &str = "traffic.registry.nodes";

/// Wildcard matching every registry RPC subject.
pub const REGISTRY_WILDCARD: &str = "traffic.registry.>";

// ── Dynamic builders ────────────────────────────────────────────────────────

/// Inbound queue of a zone.
///
/// `{zone}_queue`
#[must_use]
pub fn queue_name(zone: &str) -> String {
    format!("{zone}_queue")
}

/// Subject carrying a queue.
///
/// `traffic.queue.{queue}`
#[must_use]
pub fn queue_subject(queue: &str) -> String {
    format!("traffic.queue.{queue}")
}

/// Durable consumer name for a queue. Consumer names may not contain dots.
#[must_use]
pub fn consumer_name(queue: &str) -> String {
    format!("consumer_{}", queue.replace(['.', '*', '>', ' '], "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name() {
        assert_eq!(queue_name("north"), "north_queue");
    }

    #[test]
    fn test_queue_subject() {
        assert_eq!(queue_subject("north_queue"), "traffic.queue.north_queue");
        assert_eq!(queue_subject(REPORT_QUEUE), "traffic.queue.zone_state_queue");
    }

    #[test]
    fn test_consumer_name_is_sanitised() {
        assert_eq!(consumer_name("a.b_queue"), "consumer_a_b_queue");
    }
}
