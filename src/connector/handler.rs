//! Invocation of the local target.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::ingress::is_hop_by_hop;
use crate::protocol::{BodyContent, RelayRequest, TargetResponse};

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("target call timed out")]
    Timeout,
    #[error("target unreachable: {0}")]
    Unreachable(String),
}

/// Invokes the local target for one relay request.
///
/// The request body is always inline by the time a handler sees it;
/// outsourced bodies are fetched by the connection first.
#[async_trait]
pub trait TargetHandler: Send + Sync {
    async fn handle(&self, request: &RelayRequest) -> Result<TargetResponse, TargetError>;
}

/// Forwards relay requests to an HTTP target behind the connector.
pub struct HttpTargetHandler {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTargetHandler {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn target_url(&self, request: &RelayRequest) -> Result<Url, TargetError> {
        let mut url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|err| TargetError::Unreachable(err.to_string()))?;
        url.set_query(request.query.as_deref());
        Ok(url)
    }
}

#[async_trait]
impl TargetHandler for HttpTargetHandler {
    async fn handle(&self, request: &RelayRequest) -> Result<TargetResponse, TargetError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|err| TargetError::Unreachable(err.to_string()))?;
        let url = self.target_url(request)?;

        let mut call = self.client.request(method, url);
        if let Some(expires_in_ms) = request.expires_in_ms {
            call = call.timeout(Duration::from_millis(expires_in_ms));
        }
        for (name, value) in &request.headers {
            if is_hop_by_hop(name) || name.eq_ignore_ascii_case("host") {
                continue;
            }
            call = call.header(name.as_str(), value.as_str());
        }
        if let Some(data) = request.body.as_inline() {
            call = call.body(data.clone());
        }

        if request.enable_tracing {
            tracing::info!(
                request_id = %request.request_id,
                method = %request.method,
                path = %request.path,
                "invoking target"
            );
        }

        let response = call.send().await.map_err(|err| {
            if err.is_timeout() {
                TargetError::Timeout
            } else {
                TargetError::Unreachable(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| TargetError::Unreachable(err.to_string()))?;

        Ok(TargetResponse {
            request_id: request.request_id,
            origin_id: request.origin_id,
            status,
            headers,
            body_size: body.len() as u64,
            body: BodyContent::inline(body),
            failed: false,
            expired: false,
            error_message: None,
        })
    }
}
