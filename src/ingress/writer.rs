//! Response writer: turns a matched target response into the HTTP
//! answer for the waiting caller, stripping hop-by-hop headers.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use crate::coordination::ReceivedResponse;
use crate::protocol::BodyContent;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Write the matched response back to the caller.
pub fn write_response(received: ReceivedResponse) -> Response {
    let ReceivedResponse { response, body } = received;
    let request_id = response.request_id;

    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let out_body = match (&response.body, body) {
        (BodyContent::Inline { data }, _) => Body::from(data.clone()),
        (BodyContent::Outsourced, Some(stored)) => Body::from_stream(stored.into_stream()),
        (BodyContent::Outsourced, None) => {
            tracing::warn!(request_id = %request_id, "outsourced response body missing, writing empty body");
            Body::empty()
        }
        (BodyContent::Empty, _) => Body::empty(),
    };

    let mut out = Response::new(out_body);
    *out.status_mut() = status;
    for (name, value) in &response.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        let Ok(name) = name.parse::<HeaderName>() else {
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            continue;
        };
        out.headers_mut().append(name, value);
    }

    tracing::debug!(request_id = %request_id, status = %status, "response written");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{OriginId, RequestId, TargetResponse};

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let response = TargetResponse {
            request_id: RequestId::new(),
            origin_id: OriginId::new(),
            status: 200,
            headers: vec![
                ("content-type".into(), "text/plain".into()),
                ("Transfer-Encoding".into(), "chunked".into()),
                ("Connection".into(), "close".into()),
            ],
            body: BodyContent::inline(&b"ok"[..]),
            body_size: 2,
            failed: false,
            expired: false,
            error_message: None,
        };

        let written = write_response(ReceivedResponse {
            response,
            body: None,
        });
        assert_eq!(written.status(), StatusCode::OK);
        assert!(written.headers().contains_key("content-type"));
        assert!(!written.headers().contains_key("transfer-encoding"));
        assert!(!written.headers().contains_key("connection"));
    }

    #[test]
    fn invalid_status_becomes_500() {
        let response = TargetResponse {
            request_id: RequestId::new(),
            origin_id: OriginId::new(),
            status: 42,
            headers: Vec::new(),
            body: BodyContent::Empty,
            body_size: 0,
            failed: true,
            expired: false,
            error_message: Some("bogus".into()),
        };
        let written = write_response(ReceivedResponse {
            response,
            body: None,
        });
        assert_eq!(written.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
