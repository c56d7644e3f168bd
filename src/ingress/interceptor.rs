//! Interceptor pipeline.
//!
//! Interceptors are plain ordered lists of trait objects, run in
//! registration order within a single request. A client-request
//! interceptor may mutate the request (including swapping the body),
//! provide a response directly (short-circuit), or force delivery to a
//! connector even though it provided one.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RelayError;
use crate::ingress::spool::SpoolFile;
use crate::protocol::{BodyContent, RelayRequest, TargetResponse};

/// Per-request view handed to client-request interceptors.
pub struct RelayContext {
    pub request: RelayRequest,
    /// Set to short-circuit the connector round-trip.
    pub response: Option<TargetResponse>,
    /// Dispatch to a connector even when `response` is set.
    pub force_connector_delivery: bool,
    /// Spilled body backing an `Outsourced` placeholder, when the
    /// caller's payload exceeded the memory spool bound.
    pub(crate) spool: Option<SpoolFile>,
    /// Body contents replaced by interceptors; kept alive until the
    /// request's disposable bag is released.
    pub(crate) replaced: Vec<BodyContent>,
}

impl RelayContext {
    pub fn new(request: RelayRequest, spool: Option<SpoolFile>) -> Self {
        Self {
            request,
            response: None,
            force_connector_delivery: false,
            spool,
            replaced: Vec::new(),
        }
    }

    /// Replace the request body. The previous content stays alive
    /// until the request is finished.
    pub fn set_body(&mut self, body: BodyContent) {
        self.request.body_size = match &body {
            BodyContent::Empty => 0,
            BodyContent::Inline { data } => data.len() as u64,
            BodyContent::Outsourced => self.request.body_size,
        };
        let previous = std::mem::replace(&mut self.request.body, body);
        self.replaced.push(previous);
        self.spool = None;
    }
}

#[async_trait]
pub trait ClientRequestInterceptor: Send + Sync {
    async fn on_request(&self, ctx: &mut RelayContext) -> Result<(), RelayError>;
}

#[async_trait]
pub trait TargetResponseInterceptor: Send + Sync {
    async fn on_response(&self, response: &mut TargetResponse) -> Result<(), RelayError>;
}

/// Ordered interceptor registrations.
#[derive(Clone, Default)]
pub struct Interceptors {
    client_request: Vec<Arc<dyn ClientRequestInterceptor>>,
    target_response: Vec<Arc<dyn TargetResponseInterceptor>>,
}

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_client_request(mut self, interceptor: impl ClientRequestInterceptor + 'static) -> Self {
        self.client_request.push(Arc::new(interceptor));
        self
    }

    pub fn on_target_response(
        mut self,
        interceptor: impl TargetResponseInterceptor + 'static,
    ) -> Self {
        self.target_response.push(Arc::new(interceptor));
        self
    }

    pub async fn run_client_request(&self, ctx: &mut RelayContext) -> Result<(), RelayError> {
        for interceptor in &self.client_request {
            interceptor.on_request(ctx).await?;
        }
        Ok(())
    }

    pub async fn run_target_response(
        &self,
        response: &mut TargetResponse,
    ) -> Result<(), RelayError> {
        for interceptor in &self.target_response {
            interceptor.on_response(response).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{OriginId, RequestId, TenantId};

    struct AppendHeader(&'static str);

    #[async_trait]
    impl ClientRequestInterceptor for AppendHeader {
        async fn on_request(&self, ctx: &mut RelayContext) -> Result<(), RelayError> {
            ctx.request
                .headers
                .push(("x-order".into(), self.0.to_string()));
            Ok(())
        }
    }

    fn context() -> RelayContext {
        RelayContext::new(
            RelayRequest {
                request_id: RequestId::new(),
                origin_id: OriginId::new(),
                tenant_id: TenantId::new(),
                tenant_name: "t1".into(),
                target: "default".into(),
                method: "GET".into(),
                path: "/x".into(),
                query: None,
                headers: Vec::new(),
                body: BodyContent::inline(&b"old"[..]),
                body_size: 3,
                enable_tracing: false,
                acknowledge_id: None,
                expires_in_ms: None,
            },
            None,
        )
    }

    #[tokio::test]
    async fn interceptors_run_in_registration_order() {
        let interceptors = Interceptors::new()
            .on_client_request(AppendHeader("first"))
            .on_client_request(AppendHeader("second"));

        let mut ctx = context();
        interceptors.run_client_request(&mut ctx).await.unwrap();

        let order: Vec<&str> = ctx
            .request
            .headers
            .iter()
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(order, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn replaced_body_is_retained_and_size_updated() {
        let mut ctx = context();
        ctx.set_body(BodyContent::inline(&b"new-body"[..]));

        assert_eq!(ctx.request.body_size, 8);
        assert_eq!(ctx.replaced.len(), 1);
        assert_eq!(
            ctx.replaced[0].as_inline().map(|b| b.as_ref()),
            Some(&b"old"[..])
        );
    }
}
