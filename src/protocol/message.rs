//! Relay envelopes and hub frames.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::protocol::ids::{ConnectionId, OriginId, RequestId, TenantId};

/// Body payload carried by a request or response envelope.
///
/// Payloads up to the binary-size threshold travel inline with the
/// envelope; anything larger is staged in the body store under the
/// request id and fetched out of band.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyContent {
    /// No body at all.
    #[default]
    Empty,
    /// Body travels with the envelope, base64-encoded on the wire.
    Inline {
        #[serde(with = "inline_bytes")]
        data: Bytes,
    },
    /// Body was staged in the body store; fetch it by request id.
    Outsourced,
}

impl BodyContent {
    pub fn inline(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        if data.is_empty() {
            Self::Empty
        } else {
            Self::Inline { data }
        }
    }

    pub fn is_outsourced(&self) -> bool {
        matches!(self, Self::Outsourced)
    }

    /// Inline bytes, if present.
    pub fn as_inline(&self) -> Option<&Bytes> {
        match self {
            Self::Inline { data } => Some(data),
            _ => None,
        }
    }
}

mod inline_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// The forwarded HTTP call, server to connector.
///
/// Immutable once the ingress interceptors have run; every downstream
/// component observes the same snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRequest {
    pub request_id: RequestId,
    pub origin_id: OriginId,
    pub tenant_id: TenantId,
    pub tenant_name: String,
    /// Named target within the tenant the connector should invoke.
    pub target: String,
    pub method: String,
    /// Path below the tenant segment, always with a leading slash.
    pub path: String,
    #[serde(default)]
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: BodyContent,
    /// Authoritative byte count of the body, inline or outsourced.
    pub body_size: u64,
    #[serde(default)]
    pub enable_tracing: bool,
    /// Receipt the connector must echo back once it has safely taken
    /// possession of an outsourced body. Absent for inline deliveries.
    #[serde(default)]
    pub acknowledge_id: Option<String>,
    /// Remaining lifetime at dispatch time, if the edge enforces one.
    #[serde(default)]
    pub expires_in_ms: Option<u64>,
}

/// The target's answer, connector to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResponse {
    pub request_id: RequestId,
    pub origin_id: OriginId,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: BodyContent,
    pub body_size: u64,
    /// The connector could not reach the target.
    #[serde(default)]
    pub failed: bool,
    /// The request deadline elapsed before the target answered.
    /// Mutually exclusive with `failed`.
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TargetResponse {
    /// Response reporting that the target could not be invoked.
    pub fn failure(request: &RelayRequest, message: impl Into<String>) -> Self {
        Self {
            request_id: request.request_id,
            origin_id: request.origin_id,
            status: 502,
            headers: Vec::new(),
            body: BodyContent::Empty,
            body_size: 0,
            failed: true,
            expired: false,
            error_message: Some(message.into()),
        }
    }

    /// Response reporting that the deadline elapsed at the connector.
    pub fn timed_out(request: &RelayRequest) -> Self {
        Self {
            request_id: request.request_id,
            origin_id: request.origin_id,
            status: 504,
            headers: Vec::new(),
            body: BodyContent::Empty,
            body_size: 0,
            failed: false,
            expired: true,
            error_message: None,
        }
    }
}

/// Receipt for an at-least-once delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcknowledgeRequest {
    pub request_id: RequestId,
    pub origin_id: OriginId,
    pub acknowledge_id: String,
}

/// Per-tenant connection policy, pushed over the hub on accept and
/// whenever the tenant's configuration changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub keep_alive_interval_ms: Option<u64>,
    #[serde(default)]
    pub reconnect_minimum_delay_ms: Option<u64>,
    #[serde(default)]
    pub reconnect_maximum_delay_ms: Option<u64>,
    /// Forces tracing on for every request of this tenant when set.
    #[serde(default)]
    pub enable_tracing: Option<bool>,
}

/// Frames the server sends down a hub session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Session accepted; carries the transport-assigned connection id.
    Accepted { connection_id: ConnectionId },
    /// Deliver this request to the local target.
    RequestTarget { request: RelayRequest },
    /// Apply updated tenant policy. Applied in arrival order.
    Configure { config: TenantConfig },
}

/// Frames a connector sends up a hub session.
///
/// Responses and acknowledgements do not travel here; they take the
/// broker return path so any origin instance can accept them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorFrame {
    /// First frame after the socket opens.
    Hello {
        connector_name: String,
        /// Largest inline body this connector accepts, if it wants a
        /// limit below the server default.
        #[serde(default)]
        binary_size_limit: Option<u64>,
        /// Previous connection id, to resume the same identity after a
        /// reconnect.
        #[serde(default)]
        resume_connection_id: Option<ConnectionId>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> RelayRequest {
        RelayRequest {
            request_id: RequestId::new(),
            origin_id: OriginId::new(),
            tenant_id: TenantId::new(),
            tenant_name: "t1".into(),
            target: "default".into(),
            method: "POST".into(),
            path: "/orders".into(),
            query: Some("verbose=1".into()),
            headers: vec![("content-type".into(), "application/json".into())],
            body: BodyContent::inline(&b"{\"n\":1}"[..]),
            body_size: 7,
            enable_tracing: false,
            acknowledge_id: None,
            expires_in_ms: Some(30_000),
        }
    }

    #[test]
    fn inline_body_survives_json() {
        let frame = ServerFrame::RequestTarget {
            request: sample_request(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"request_target\""));
        match serde_json::from_str::<ServerFrame>(&json).unwrap() {
            ServerFrame::RequestTarget { request } => {
                assert_eq!(request.body.as_inline().unwrap().as_ref(), b"{\"n\":1}");
                assert_eq!(request.body_size, 7);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn empty_inline_collapses_to_empty() {
        assert_eq!(BodyContent::inline(Bytes::new()), BodyContent::Empty);
    }

    #[test]
    fn outsourced_body_has_no_payload_field() {
        let mut request = sample_request();
        request.body = BodyContent::Outsourced;
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"kind\":\"outsourced\""));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn failure_and_timeout_flags_are_exclusive() {
        let request = sample_request();
        let failed = TargetResponse::failure(&request, "connection refused");
        assert!(failed.failed && !failed.expired);
        let expired = TargetResponse::timed_out(&request);
        assert!(expired.expired && !expired.failed);
    }
}
