//! The relay middleware: per-request orchestration.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::coordination::{ReceivedResponse, ResponseCoordinator};
use crate::dispatch::RequestCoordinator;
use crate::error::RelayError;
use crate::ingress::interceptor::{Interceptors, RelayContext};
use crate::ingress::spool::DrainedBody;
use crate::ingress::writer::write_response;
use crate::observability::metrics;
use crate::protocol::{BodyContent, OriginId, RelayRequest, RequestId};
use crate::store::FsBodyStore;
use crate::tenant::{Tenant, TenantRegistry};

/// Header a caller can set to request tracing for one call.
pub const TRACING_HEADER: &str = "x-relay-tracing";

/// Ingress tunables, taken from the server configuration.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Deadline for the whole pipeline, body drain included.
    pub request_expiration: Option<Duration>,
    /// Server-wide ceiling for inline bodies.
    pub max_inline_body_bytes: u64,
    /// Bytes buffered in memory before the spool spills to disk.
    pub spool_memory_limit: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            request_expiration: Some(Duration::from_secs(30)),
            max_inline_body_bytes: 1024 * 1024,
            spool_memory_limit: 256 * 1024,
        }
    }
}

/// Everything the ingress pipeline needs, cheap to clone per request.
#[derive(Clone)]
pub struct RelayState {
    pub origin_id: OriginId,
    pub tenants: Arc<dyn TenantRegistry>,
    pub requests: Arc<RequestCoordinator>,
    pub responses: ResponseCoordinator,
    pub store: FsBodyStore,
    pub interceptors: Arc<Interceptors>,
    pub settings: RelaySettings,
}

/// Axum middleware entry point.
///
/// Requests whose first path segment is not a known tenant fall
/// through to the inner router untouched.
pub async fn relay_middleware(
    State(state): State<RelayState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some((tenant_name, rest)) = split_tenant_path(request.uri().path()) else {
        return next.run(request).await;
    };
    let Some(tenant) = state.tenants.load_by_name(&tenant_name).await else {
        return next.run(request).await;
    };

    let started = Instant::now();
    let method = request.method().as_str().to_string();

    let outcome = match state.settings.request_expiration {
        Some(expiration) => {
            match tokio::time::timeout(expiration, handle_relay(&state, &tenant, rest, request))
                .await
            {
                Ok(outcome) => outcome,
                // Dropping the pipeline future released the waiter slot
                // and every other per-request resource.
                Err(_) => Err(RelayError::Expired),
            }
        }
        None => handle_relay(&state, &tenant, rest, request).await,
    };

    match outcome {
        Ok(response) => {
            metrics::request_completed(&tenant.name, &method, response.status().as_u16(), started);
            response
        }
        Err(err) => {
            let response = error_response(err, &tenant.name);
            metrics::request_completed(&tenant.name, &method, response.status().as_u16(), started);
            response
        }
    }
}

fn split_tenant_path(path: &str) -> Option<(String, String)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return None;
    }
    let (tenant, rest) = match trimmed.split_once('/') {
        Some((tenant, rest)) => (tenant, format!("/{rest}")),
        None => (trimmed, "/".to_string()),
    };
    if tenant.is_empty() {
        return None;
    }
    Some((tenant.to_string(), rest))
}

async fn handle_relay(
    state: &RelayState,
    tenant: &Tenant,
    path: String,
    request: Request<Body>,
) -> Result<Response, RelayError> {
    let request_id = RequestId::new();
    let (parts, body) = request.into_parts();

    tracing::debug!(
        request_id = %request_id,
        tenant = %tenant.name,
        method = %parts.method,
        path = %path,
        "request received"
    );

    // The waiter slot must exist before the request can be dispatched,
    // otherwise the response could race the registration.
    let pending = state.responses.register(request_id)?;

    // Fully drain the caller's body so interceptors and the size
    // decision see a complete, re-readable payload.
    let drained = DrainedBody::drain(
        body,
        state.store.spool_path(request_id),
        state.settings.spool_memory_limit,
    )
    .await?;

    let relay_request = build_relay_request(request_id, state, tenant, &path, &parts, &drained);
    let spool = match drained {
        DrainedBody::Spilled(file) => Some(file),
        _ => None,
    };
    let mut ctx = RelayContext::new(relay_request, spool);

    state.interceptors.run_client_request(&mut ctx).await?;

    // Guards that must outlive the connector round-trip: staged body,
    // acknowledge slot, an overridden interceptor response.
    let mut retained: Vec<Box<dyn Any + Send>> = Vec::new();

    let mut received = match (ctx.response.take(), ctx.force_connector_delivery) {
        (Some(response), false) => {
            tracing::debug!(request_id = %request_id, "interceptor short-circuited the request");
            ReceivedResponse {
                response,
                body: None,
            }
        }
        (interceptor_response, _) => {
            prepare_body(state, tenant, &mut ctx, &mut retained).await?;

            let delivery = state.requests.deliver(ctx.request.clone()).await?;
            if let Some(registration) = delivery.ack_registration {
                retained.push(Box::new(registration));
            }
            if let Some(overridden) = interceptor_response {
                // Forced delivery: the connector's response wins.
                retained.push(Box::new(overridden));
            }

            pending.wait().await?
        }
    };

    state
        .interceptors
        .run_target_response(&mut received.response)
        .await?;

    let response = write_response(received);
    drop(ctx);
    drop(retained);
    Ok(response)
}

/// Decide how the request body travels: inline with the envelope, or
/// staged in the body store and fetched by request id.
async fn prepare_body(
    state: &RelayState,
    tenant: &Tenant,
    ctx: &mut RelayContext,
    retained: &mut Vec<Box<dyn Any + Send>>,
) -> Result<(), RelayError> {
    let max_inline = state
        .settings
        .max_inline_body_bytes
        .min(state.requests.binary_size_threshold(&tenant.name));
    let id = ctx.request.request_id;

    let inline_len = match &ctx.request.body {
        BodyContent::Inline { data } => Some(data.len() as u64),
        _ => None,
    };

    if let Some(len) = inline_len {
        if len > max_inline {
            let previous = std::mem::replace(&mut ctx.request.body, BodyContent::Outsourced);
            if let BodyContent::Inline { data } = &previous {
                state.store.store_request_body(id, &mut data.as_ref()).await?;
            }
            ctx.replaced.push(previous);
            retained.push(Box::new(state.store.stage_guard(id)));
            metrics::body_outsourced("request", len);
        }
        return Ok(());
    }

    if let Some(spool) = ctx.spool.take() {
        if spool.len() <= max_inline {
            let data = spool.read_to_bytes().await.map_err(RelayError::BodyStore)?;
            ctx.request.body = BodyContent::inline(data);
        } else {
            let len = spool.len();
            let guard = spool
                .persist(&state.store, id)
                .await
                .map_err(RelayError::BodyStore)?;
            retained.push(Box::new(guard));
            metrics::body_outsourced("request", len);
        }
    }
    Ok(())
}

fn build_relay_request(
    request_id: RequestId,
    state: &RelayState,
    tenant: &Tenant,
    path: &str,
    parts: &Parts,
    drained: &DrainedBody,
) -> RelayRequest {
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    // Tenant-forced tracing ORs into whatever the caller asked for.
    let enable_tracing =
        parts.headers.contains_key(TRACING_HEADER) || tenant.config.enable_tracing.unwrap_or(false);

    let body = match drained {
        DrainedBody::Empty => BodyContent::Empty,
        DrainedBody::Memory(data) => BodyContent::inline(data.clone()),
        DrainedBody::Spilled(_) => BodyContent::Outsourced,
    };

    RelayRequest {
        request_id,
        origin_id: state.origin_id,
        tenant_id: tenant.id,
        tenant_name: tenant.name.clone(),
        target: "default".to_string(),
        method: parts.method.as_str().to_string(),
        path: path.to_string(),
        query: parts.uri.query().map(str::to_string),
        headers,
        body,
        body_size: drained.len(),
        enable_tracing,
        acknowledge_id: None,
        expires_in_ms: state
            .settings
            .request_expiration
            .map(|d| d.as_millis() as u64),
    }
}

fn error_response(err: RelayError, tenant: &str) -> Response {
    match err {
        RelayError::Transport(err) => {
            tracing::warn!(tenant = %tenant, error = %err, "relay transport failure");
            (StatusCode::SERVICE_UNAVAILABLE, "no connector available").into_response()
        }
        RelayError::WaiterGone(id) => {
            tracing::warn!(tenant = %tenant, request_id = %id, "waiter released before a response arrived");
            (StatusCode::SERVICE_UNAVAILABLE, "relay shutting down").into_response()
        }
        RelayError::Expired => {
            tracing::info!(tenant = %tenant, "request expired");
            (StatusCode::REQUEST_TIMEOUT, "request expired").into_response()
        }
        RelayError::ClientAborted => {
            // Nobody is listening anymore; the status is never seen.
            tracing::debug!(tenant = %tenant, "client aborted the request");
            StatusCode::from_u16(499)
                .unwrap_or(StatusCode::BAD_REQUEST)
                .into_response()
        }
        err => {
            tracing::error!(tenant = %tenant, error = %err, "relay pipeline failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "relay failure").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_segment_is_split_off_the_path() {
        assert_eq!(
            split_tenant_path("/t1/ping"),
            Some(("t1".into(), "/ping".into()))
        );
        assert_eq!(
            split_tenant_path("/t1/a/b"),
            Some(("t1".into(), "/a/b".into()))
        );
        assert_eq!(split_tenant_path("/t1"), Some(("t1".into(), "/".into())));
    }

    #[test]
    fn empty_tenant_segment_is_not_a_relay_url() {
        assert_eq!(split_tenant_path("/"), None);
        assert_eq!(split_tenant_path(""), None);
        assert_eq!(split_tenant_path("//x"), None);
    }
}
