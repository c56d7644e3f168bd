//! Pending-request registry and response matching.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::RelayError;
use crate::protocol::{RequestId, TargetResponse};
use crate::store::{FsBodyStore, StoredBody};

/// A response matched to its waiter, with the staged body resolved.
#[derive(Debug)]
pub struct ReceivedResponse {
    pub response: TargetResponse,
    /// Present when the response body was outsourced. Dropping it (or
    /// the stream derived from it) releases the body store entry.
    pub body: Option<StoredBody>,
}

type Slot = oneshot::Sender<ReceivedResponse>;

/// Registers pending requests and fulfils them when their response
/// lands on the broker.
#[derive(Clone)]
pub struct ResponseCoordinator {
    pending: Arc<DashMap<RequestId, Slot>>,
    store: FsBodyStore,
}

impl ResponseCoordinator {
    pub fn new(store: FsBodyStore) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            store,
        }
    }

    /// Reserve the waiter slot for `id`.
    ///
    /// Must be called before the request is dispatched, otherwise the
    /// response can race the registration. Installing a second waiter
    /// for the same id is an error.
    pub fn register(&self, id: RequestId) -> Result<PendingResponse, RelayError> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(id) {
            Entry::Occupied(_) => Err(RelayError::DuplicateWaiter(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx);
                Ok(PendingResponse {
                    id,
                    rx,
                    pending: Arc::clone(&self.pending),
                })
            }
        }
    }

    /// Fulfil the waiter for this response, if one still exists.
    ///
    /// Responses without a waiter are dropped with a warning: the
    /// originating server instance is gone, or the caller stopped
    /// waiting. Their staged bodies are released here.
    pub async fn process(&self, response: TargetResponse) {
        let id = response.request_id;
        let outsourced = response.body.is_outsourced() && response.body_size > 0;

        let Some((_, slot)) = self.pending.remove(&id) else {
            tracing::warn!(request_id = %id, "response received without a waiter, dropping");
            if outsourced {
                self.store.delete_response_body(id).await;
            }
            return;
        };

        let body = if outsourced {
            match self.store.open_response_body(id).await {
                Ok(body) => Some(body),
                Err(err) => {
                    tracing::warn!(request_id = %id, error = %err, "outsourced response body unavailable");
                    None
                }
            }
        } else {
            None
        };

        tracing::debug!(request_id = %id, status = response.status, "response received");
        if slot.send(ReceivedResponse { response, body }).is_err() {
            // Waiter dropped between removal and send; the body guard
            // (if any) just released the store entry.
            tracing::debug!(request_id = %id, "waiter released while fulfilling");
        }
    }

    /// Number of registered waiters. Test and introspection hook.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Reserved waiter slot for one request id.
///
/// Dropping it releases the slot, whether or not a response ever
/// arrives; a response landing afterwards is dropped by `process`.
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<ReceivedResponse>,
    pending: Arc<DashMap<RequestId, Slot>>,
}

impl PendingResponse {
    pub fn request_id(&self) -> RequestId {
        self.id
    }

    /// Single-consumer wait for the matching response.
    ///
    /// Cancel-safe: dropping the future releases the slot.
    pub async fn wait(mut self) -> Result<ReceivedResponse, RelayError> {
        let received = (&mut self.rx).await;
        received.map_err(|_| RelayError::WaiterGone(self.id))
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BodyContent, OriginId};

    async fn coordinator() -> (tempfile::TempDir, ResponseCoordinator) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBodyStore::open(dir.path()).await.unwrap();
        (dir, ResponseCoordinator::new(store))
    }

    fn response(id: RequestId) -> TargetResponse {
        TargetResponse {
            request_id: id,
            origin_id: OriginId::new(),
            status: 200,
            headers: Vec::new(),
            body: BodyContent::inline(&b"pong"[..]),
            body_size: 4,
            failed: false,
            expired: false,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn response_reaches_registered_waiter() {
        let (_dir, coordinator) = coordinator().await;
        let id = RequestId::new();
        let pending = coordinator.register(id).unwrap();

        coordinator.process(response(id)).await;

        let received = pending.wait().await.unwrap();
        assert_eq!(received.response.status, 200);
        assert_eq!(coordinator.pending_len(), 0);
    }

    #[tokio::test]
    async fn second_registration_for_same_id_is_an_error() {
        let (_dir, coordinator) = coordinator().await;
        let id = RequestId::new();
        let _pending = coordinator.register(id).unwrap();
        assert!(matches!(
            coordinator.register(id),
            Err(RelayError::DuplicateWaiter(_))
        ));
    }

    #[tokio::test]
    async fn dropping_the_waiter_releases_the_slot() {
        let (_dir, coordinator) = coordinator().await;
        let id = RequestId::new();
        let pending = coordinator.register(id).unwrap();
        drop(pending);
        assert_eq!(coordinator.pending_len(), 0);

        // The id is free again.
        coordinator.register(id).unwrap();
    }

    #[tokio::test]
    async fn response_without_waiter_is_dropped() {
        let (_dir, coordinator) = coordinator().await;
        coordinator.process(response(RequestId::new())).await;
        assert_eq!(coordinator.pending_len(), 0);
    }

    #[tokio::test]
    async fn outsourced_body_is_resolved_from_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBodyStore::open(dir.path()).await.unwrap();
        let coordinator = ResponseCoordinator::new(store.clone());

        let id = RequestId::new();
        let payload = vec![3u8; 8192];
        store
            .store_response_body(id, &mut payload.as_slice())
            .await
            .unwrap();

        let pending = coordinator.register(id).unwrap();
        let mut resp = response(id);
        resp.body = BodyContent::Outsourced;
        resp.body_size = payload.len() as u64;
        coordinator.process(resp).await;

        let received = pending.wait().await.unwrap();
        let body = received.body.expect("outsourced body attached");
        assert_eq!(body.read_to_end().await.unwrap().as_ref(), &payload[..]);

        // Last reader deleted the entry.
        assert!(store.open_response_body(id).await.is_err());
    }

    #[tokio::test]
    async fn waiters_on_distinct_ids_do_not_interfere() {
        let (_dir, coordinator) = coordinator().await;
        let a = RequestId::new();
        let b = RequestId::new();
        let pending_a = coordinator.register(a).unwrap();
        let pending_b = coordinator.register(b).unwrap();

        coordinator.process(response(b)).await;
        let received = pending_b.wait().await.unwrap();
        assert_eq!(received.response.request_id, b);

        drop(pending_a);
        assert_eq!(coordinator.pending_len(), 0);
    }
}
