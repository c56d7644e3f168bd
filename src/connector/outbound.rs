//! Return path from connector to server.
//!
//! Responses, acknowledgements, and oversized bodies travel over plain
//! HTTP to whichever server instance the connector can reach; the
//! broker on the server side routes them to the owning origin.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::TransportError;
use crate::protocol::{AcknowledgeRequest, RequestId, TargetResponse};

#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn publish_response(&self, response: &TargetResponse) -> Result<(), TransportError>;
    async fn publish_acknowledge(&self, ack: &AcknowledgeRequest) -> Result<(), TransportError>;
    /// Fetch a staged request body; the server deletes it on read.
    async fn fetch_request_body(&self, id: RequestId) -> Result<Bytes, TransportError>;
    /// Stage an oversized response body before posting the response.
    async fn store_response_body(&self, id: RequestId, body: Bytes) -> Result<(), TransportError>;
}

/// HTTP implementation against the server's `/_relay` endpoints.
pub struct HttpOutbound {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpOutbound {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|err| TransportError::Publish(err.to_string()))
    }

    fn check(response: &reqwest::Response, what: &str) -> Result<(), TransportError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Publish(format!(
                "{what} rejected with status {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl OutboundTransport for HttpOutbound {
    async fn publish_response(&self, response: &TargetResponse) -> Result<(), TransportError> {
        let url = self.endpoint("_relay/response")?;
        let reply = self
            .client
            .post(url)
            .json(response)
            .send()
            .await
            .map_err(|err| TransportError::Publish(err.to_string()))?;
        Self::check(&reply, "response")
    }

    async fn publish_acknowledge(&self, ack: &AcknowledgeRequest) -> Result<(), TransportError> {
        let url = self.endpoint("_relay/acknowledge")?;
        let reply = self
            .client
            .post(url)
            .json(ack)
            .send()
            .await
            .map_err(|err| TransportError::Publish(err.to_string()))?;
        Self::check(&reply, "acknowledge")
    }

    async fn fetch_request_body(&self, id: RequestId) -> Result<Bytes, TransportError> {
        let url = self.endpoint(&format!("_relay/body/request/{id}"))?;
        let reply = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| TransportError::Publish(err.to_string()))?;
        Self::check(&reply, "body fetch")?;
        reply
            .bytes()
            .await
            .map_err(|err| TransportError::Publish(err.to_string()))
    }

    async fn store_response_body(&self, id: RequestId, body: Bytes) -> Result<(), TransportError> {
        let url = self.endpoint(&format!("_relay/body/response/{id}"))?;
        let reply = self
            .client
            .post(url)
            .body(body)
            .send()
            .await
            .map_err(|err| TransportError::Publish(err.to_string()))?;
        Self::check(&reply, "body store")
    }
}
