//! Acknowledgement matching for at-least-once deliveries.
//!
//! When a request body is staged in the body store, the dispatcher
//! registers a callback here before transmitting. The connector sends
//! an acknowledgement once it has safely taken possession of the body;
//! the callback runs exactly once. Duplicate acknowledgements for the
//! same id are a no-op, which is what makes redelivery harmless.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::RelayError;
use crate::protocol::{AcknowledgeRequest, RequestId};

type AckCallback = Box<dyn FnOnce(AcknowledgeRequest) + Send + Sync>;

#[derive(Clone, Default)]
pub struct AcknowledgeCoordinator {
    pending: Arc<DashMap<RequestId, AckCallback>>,
}

impl AcknowledgeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the acknowledge callback for `id`.
    ///
    /// The callback runs at most once, on the first matching
    /// acknowledgement. The returned guard removes the slot if no
    /// acknowledgement ever arrives.
    pub fn register(
        &self,
        id: RequestId,
        callback: impl FnOnce(AcknowledgeRequest) + Send + Sync + 'static,
    ) -> Result<AckRegistration, RelayError> {
        match self.pending.entry(id) {
            Entry::Occupied(_) => Err(RelayError::DuplicateWaiter(id)),
            Entry::Vacant(slot) => {
                slot.insert(Box::new(callback));
                Ok(AckRegistration {
                    id,
                    pending: Arc::clone(&self.pending),
                })
            }
        }
    }

    /// Consume an acknowledgement arriving from the broker.
    pub fn process(&self, ack: AcknowledgeRequest) {
        let id = ack.request_id;
        match self.pending.remove(&id) {
            Some((_, callback)) => {
                tracing::debug!(request_id = %id, acknowledge_id = %ack.acknowledge_id, "ack consumed");
                callback(ack);
            }
            None => {
                // Duplicate delivery, or the slot was released; both fine.
                tracing::debug!(request_id = %id, "acknowledgement without a slot, ignoring");
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Slot guard; dropping it removes the callback without running it.
pub struct AckRegistration {
    id: RequestId,
    pending: Arc<DashMap<RequestId, AckCallback>>,
}

impl std::fmt::Debug for AckRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckRegistration").field("id", &self.id).finish()
    }
}

impl Drop for AckRegistration {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}
