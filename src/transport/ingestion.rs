//! HTTP return path for connectors.
//!
//! A connector may be routed to any server instance, so these
//! endpoints accept responses and acknowledgements from anywhere and
//! publish them into the broker, which routes them to the owning
//! origin. The body endpoints move oversized payloads in and out of
//! the body store.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::TryStreamExt;
use std::sync::Arc;
use tokio_util::io::StreamReader;

use crate::error::BodyStoreError;
use crate::protocol::{AcknowledgeRequest, RequestId, TargetResponse};
use crate::store::FsBodyStore;
use crate::transport::ServerTransport;

#[derive(Clone)]
pub struct IngestionState {
    pub broker: Arc<dyn ServerTransport>,
    pub store: FsBodyStore,
}

/// Routes mounted under `/_relay` next to the hub endpoint.
pub fn ingestion_router(state: IngestionState) -> Router {
    Router::new()
        .route("/response", post(post_response))
        .route("/acknowledge", post(post_acknowledge))
        .route("/body/request/{id}", get(get_request_body))
        .route("/body/response/{id}", post(post_response_body))
        .with_state(state)
}

async fn post_response(State(state): State<IngestionState>, payload: Bytes) -> Response {
    let response: TargetResponse = match serde_json::from_slice(&payload) {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "undecodable response payload");
            return (StatusCode::BAD_REQUEST, "undecodable response").into_response();
        }
    };
    match state.broker.dispatch_response(response).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to publish response");
            (StatusCode::SERVICE_UNAVAILABLE, "publish failed").into_response()
        }
    }
}

async fn post_acknowledge(State(state): State<IngestionState>, payload: Bytes) -> Response {
    let ack: AcknowledgeRequest = match serde_json::from_slice(&payload) {
        Ok(ack) => ack,
        Err(err) => {
            tracing::warn!(error = %err, "undecodable acknowledge payload");
            return (StatusCode::BAD_REQUEST, "undecodable acknowledge").into_response();
        }
    };
    tracing::debug!(request_id = %ack.request_id, "ack received");
    match state.broker.dispatch_acknowledge(ack).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to publish acknowledge");
            (StatusCode::SERVICE_UNAVAILABLE, "publish failed").into_response()
        }
    }
}

/// Stream a staged request body to the connector. The entry is deleted
/// once the stream has been consumed (or abandoned).
async fn get_request_body(
    State(state): State<IngestionState>,
    Path(id): Path<RequestId>,
) -> Response {
    match state.store.open_request_body(id).await {
        Ok(body) => {
            let len = body.len();
            let mut response = Body::from_stream(body.into_stream()).into_response();
            response.headers_mut().insert(
                axum::http::header::CONTENT_LENGTH,
                axum::http::HeaderValue::from(len),
            );
            response
        }
        Err(BodyStoreError::Missing(_)) => {
            (StatusCode::NOT_FOUND, "no staged body").into_response()
        }
        Err(err) => {
            tracing::warn!(request_id = %id, error = %err, "failed to open staged body");
            (StatusCode::INTERNAL_SERVER_ERROR, "body store failure").into_response()
        }
    }
}

/// Stage an oversized response body before its response frame arrives.
async fn post_response_body(
    State(state): State<IngestionState>,
    Path(id): Path<RequestId>,
    body: Body,
) -> Response {
    let stream = body
        .into_data_stream()
        .map_err(|err| std::io::Error::other(err));
    let mut reader = StreamReader::new(stream);
    match state.store.store_response_body(id, &mut reader).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            tracing::warn!(request_id = %id, error = %err, "failed to stage response body");
            (StatusCode::INTERNAL_SERVER_ERROR, "body store failure").into_response()
        }
    }
}
