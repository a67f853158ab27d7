//! Order update payload and the status policy applied before forwarding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HandleError;

/// Status written by the rewrite policy when none is configured.
pub const RECEIVED_STATUS: &str = "orden recibida";

/// The subset of an order this bridge cares about.
///
/// Fields beyond `id` and `status` are kept so a rewrite does not drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub id: i64,
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrderUpdate {
    /// Decode a raw queue payload.
    pub fn parse(payload: &[u8]) -> Result<Self, HandleError> {
        serde_json::from_slice(payload).map_err(HandleError::MalformedPayload)
    }
}

/// What happens to `status` before the update is forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatusPolicy {
    /// Forward the original payload untouched.
    #[default]
    Passthrough,
    /// Overwrite `status` with the given value.
    Rewrite(String),
}

/// A payload that passed validation and is ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedUpdate {
    pub order_id: i64,
    pub status: String,
    pub body: Vec<u8>,
    /// Whether `body` differs from the raw payload.
    pub rewritten: bool,
}

/// Parse `payload`, apply `policy` and encode the outgoing body.
///
/// When the policy leaves the record unchanged the raw bytes are forwarded
/// as received.
pub fn prepare(payload: &[u8], policy: &StatusPolicy) -> Result<PreparedUpdate, HandleError> {
    let mut order = OrderUpdate::parse(payload)?;

    match policy {
        StatusPolicy::Rewrite(status) if order.status != *status => {
            order.status.clone_from(status);
            // Re-encoding a value decoded from JSON only fails on non-string
            // map keys, which serde_json never produces.
            let body = serde_json::to_vec(&order).map_err(HandleError::MalformedPayload)?;
            Ok(PreparedUpdate {
                order_id: order.id,
                status: order.status,
                body,
                rewritten: true,
            })
        }
        _ => Ok(PreparedUpdate {
            order_id: order.id,
            status: order.status,
            body: payload.to_vec(),
            rewritten: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite() -> StatusPolicy {
        StatusPolicy::Rewrite(RECEIVED_STATUS.to_string())
    }

    #[test]
    fn test_parse_valid_order() {
        let order = OrderUpdate::parse(br#"{"id": 42, "status": "pending"}"#).unwrap();
        assert_eq!(order.id, 42);
        assert_eq!(order.status, "pending");
        assert!(order.extra.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        let cases: [&[u8]; 6] = [
            b"not-json",
            br#"{"status": "pending"}"#,
            br#"{"id": "42", "status": "pending"}"#,
            br#"{"id": 4.2, "status": "pending"}"#,
            br#"{"id": 42}"#,
            br#"{"id": 42, "status": "pend"#,
        ];

        for payload in cases {
            let result = OrderUpdate::parse(payload);
            assert!(
                matches!(result, Err(HandleError::MalformedPayload(_))),
                "accepted {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_passthrough_forwards_raw_bytes() {
        let payload = br#"{ "status": "pending",  "id": 7 }"#;
        let prepared = prepare(payload, &StatusPolicy::Passthrough).unwrap();

        assert_eq!(prepared.order_id, 7);
        assert_eq!(prepared.status, "pending");
        assert_eq!(prepared.body, payload.to_vec());
        assert!(!prepared.rewritten);
    }

    #[test]
    fn test_rewrite_overwrites_status() {
        let prepared = prepare(br#"{"id":42,"status":"pending"}"#, &rewrite()).unwrap();

        assert!(prepared.rewritten);
        assert_eq!(prepared.status, RECEIVED_STATUS);
        let body: Value = serde_json::from_slice(&prepared.body).unwrap();
        assert_eq!(body, serde_json::json!({"id": 42, "status": "orden recibida"}));
    }

    #[test]
    fn test_rewrite_keeps_extra_fields() {
        let payload = br#"{"id":9,"status":"pending","total":19.5,"items":[1,2]}"#;
        let prepared = prepare(payload, &rewrite()).unwrap();

        let body: Value = serde_json::from_slice(&prepared.body).unwrap();
        assert_eq!(body["status"], "orden recibida");
        assert_eq!(body["total"], 19.5);
        assert_eq!(body["items"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_rewrite_skips_reencode_when_status_already_set() {
        let payload = br#"{"id": 3, "status": "orden recibida"}"#;
        let prepared = prepare(payload, &rewrite()).unwrap();

        assert!(!prepared.rewritten);
        assert_eq!(prepared.body, payload.to_vec());
    }
}
