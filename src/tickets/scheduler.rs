use log::{debug, info};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::tickets::SpaceId;

/// Delayed close jobs keyed by ticket. A key holds at most one pending job.
#[derive(Clone, Default)]
pub struct CloseScheduler {
    pending: Arc<RwLock<HashMap<SpaceId, JoinHandle<()>>>>,
}

impl CloseScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` once `delay` has elapsed. Returns false, leaving the
    /// existing job untouched, when one is already pending for `id`.
    pub async fn schedule<F>(&self, id: SpaceId, delay: Duration, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.write().await;
        if pending.get(&id).is_some_and(|h| !h.is_finished()) {
            debug!("Close for thread {id} already scheduled");
            return false;
        }

        let registry = Arc::clone(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
            registry.write().await.remove(&id);
        });
        pending.insert(id, handle);
        info!("Scheduled close of thread {id} in {}s", delay.as_secs());
        true
    }

    pub async fn cancel(&self, id: SpaceId) -> bool {
        let mut pending = self.pending.write().await;
        match pending.remove(&id) {
            Some(handle) => {
                handle.abort();
                info!("Cancelled close of thread {id}");
                true
            }
            None => false,
        }
    }

    pub async fn is_pending(&self, id: SpaceId) -> bool {
        let pending = self.pending.read().await;
        pending.get(&id).is_some_and(|h| !h.is_finished())
    }

    pub async fn pending_count(&self) -> usize {
        let pending = self.pending.read().await;
        pending.values().filter(|h| !h.is_finished()).count()
    }
}
