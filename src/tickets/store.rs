use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::tickets::{SpaceId, Ticket};

/// Where live tickets are kept. Swap the in-memory store for a durable one to
/// survive restarts.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert(&self, ticket: Ticket);
    async fn get(&self, id: SpaceId) -> Option<Ticket>;
    async fn update(&self, ticket: Ticket);
    async fn remove(&self, id: SpaceId) -> Option<Ticket>;
    async fn list(&self) -> Vec<Ticket>;
}

#[derive(Default)]
pub struct InMemoryTicketStore {
    tickets: RwLock<HashMap<SpaceId, Ticket>>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn insert(&self, ticket: Ticket) {
        let mut tickets = self.tickets.write().await;
        tickets.insert(ticket.id, ticket);
    }

    async fn get(&self, id: SpaceId) -> Option<Ticket> {
        let tickets = self.tickets.read().await;
        tickets.get(&id).cloned()
    }

    async fn update(&self, ticket: Ticket) {
        let mut tickets = self.tickets.write().await;
        if let Some(slot) = tickets.get_mut(&ticket.id) {
            *slot = ticket;
        }
    }

    async fn remove(&self, id: SpaceId) -> Option<Ticket> {
        let mut tickets = self.tickets.write().await;
        tickets.remove(&id)
    }

    async fn list(&self) -> Vec<Ticket> {
        let tickets = self.tickets.read().await;
        tickets.values().cloned().collect()
    }
}

/// One async lock per ticket; transitions on the same ticket run one at a time.
#[derive(Default)]
pub struct TicketLocks {
    locks: Mutex<HashMap<SpaceId, Arc<Mutex<()>>>>,
}

impl TicketLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: SpaceId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    pub async fn forget(&self, id: SpaceId) {
        let mut locks = self.locks.lock().await;
        locks.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}
