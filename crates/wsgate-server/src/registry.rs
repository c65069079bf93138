//! Client registry: the one shared mutable structure in the gateway.
//!
//! Tracks one [`ClientRecord`] per live connection, indexed by the
//! connection's random id. All accessors are safe under any interleaving
//! of connection tasks plus the sweeper; callers never hold an external
//! lock. The WebSocket sink itself stays exclusively owned by the
//! connection's lifecycle task; the registry only holds the mpsc sender
//! feeding that task, so writes from outside (broadcast, send_to, sweeper
//! eviction) are commands, not direct socket access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use wsgate_core::{GateError, GateResult};

/// Commands accepted by a connection's lifecycle task.
#[derive(Debug)]
pub enum ConnCommand {
    /// Write an already-encoded frame to the peer.
    Frame(String),
    /// Force-close the connection (sweeper eviction).
    Close,
}

pub type ConnSender = mpsc::UnboundedSender<ConnCommand>;

/// One entry per active connection.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// Random 128-bit id, immutable for the connection's lifetime.
    pub id: String,
    /// Channel into the owning connection task.
    pub sender: ConnSender,
    /// Set at most once, by a successful authenticate exchange.
    pub user_id: Option<String>,
    /// Captured at accept time.
    pub connected_at: Instant,
    /// Updated whenever the connection proves it is alive.
    pub last_liveness: Instant,
}

impl ClientRecord {
    pub fn new(id: String, sender: ConnSender) -> Self {
        let now = Instant::now();
        Self {
            id,
            sender,
            user_id: None,
            connected_at: now,
            last_liveness: now,
        }
    }
}

/// Concurrency-safe store of active connections.
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<String, ClientRecord>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a new entry. Ids are caller-generated and must be fresh.
    pub async fn insert(&self, record: ClientRecord) -> GateResult<()> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&record.id) {
            return Err(GateError::DuplicateClient(record.id));
        }
        clients.insert(record.id.clone(), record);
        Ok(())
    }

    /// Snapshot of a single record.
    pub async fn get(&self, id: &str) -> Option<ClientRecord> {
        self.clients.read().await.get(id).cloned()
    }

    /// Idempotent removal. Returns whether an entry was actually removed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.clients.write().await.remove(id).is_some();
        if removed {
            debug!(client_id = %id, "client removed from registry");
        }
        removed
    }

    /// Snapshot of all records. May be momentarily stale; never blocks
    /// concurrent inserts or removes beyond the read lock.
    pub async fn all(&self) -> Vec<ClientRecord> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Connections bound to the given user id. Linear scan; not a hot path.
    pub async fn by_user_id(&self, user_id: &str) -> Vec<ClientRecord> {
        self.clients
            .read()
            .await
            .values()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect()
    }

    /// Update `last_liveness` if the entry still exists.
    pub async fn touch(&self, id: &str) {
        if let Some(record) = self.clients.write().await.get_mut(id) {
            record.last_liveness = Instant::now();
        }
    }

    /// Bind a user id to a connection, set-once.
    pub async fn bind_user(&self, id: &str, user_id: String) -> GateResult<()> {
        let mut clients = self.clients.write().await;
        let record = clients
            .get_mut(id)
            .ok_or_else(|| GateError::ClientNotFound(id.to_string()))?;
        if record.user_id.is_some() {
            return Err(GateError::UserAlreadyBound(id.to_string()));
        }
        record.user_id = Some(user_id);
        Ok(())
    }

    /// Number of active connections.
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Generate a random client id (hex-encoded, 16 bytes = 32 hex chars).
pub fn generate_client_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> (ClientRecord, mpsc::UnboundedReceiver<ConnCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientRecord::new(id.to_string(), tx), rx)
    }

    #[tokio::test]
    async fn insert_get_remove() {
        let registry = ClientRegistry::new();
        let (rec, _rx) = record("a");
        registry.insert(rec).await.unwrap();
        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.get("a").await.unwrap().id, "a");

        assert!(registry.remove("a").await);
        assert_eq!(registry.count().await, 0);
        assert!(registry.get("a").await.is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = ClientRegistry::new();
        let (rec, _rx) = record("a");
        registry.insert(rec).await.unwrap();
        assert!(registry.remove("a").await);
        assert!(!registry.remove("a").await);
        assert!(!registry.remove("never-existed").await);
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let registry = ClientRegistry::new();
        let (rec1, _rx1) = record("a");
        let (rec2, _rx2) = record("a");
        registry.insert(rec1).await.unwrap();
        assert!(matches!(
            registry.insert(rec2).await,
            Err(GateError::DuplicateClient(_))
        ));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn bind_user_is_set_once() {
        let registry = ClientRegistry::new();
        let (rec, _rx) = record("a");
        registry.insert(rec).await.unwrap();

        registry.bind_user("a", "u1".into()).await.unwrap();
        assert!(matches!(
            registry.bind_user("a", "u2".into()).await,
            Err(GateError::UserAlreadyBound(_))
        ));
        assert_eq!(registry.get("a").await.unwrap().user_id.as_deref(), Some("u1"));

        assert!(matches!(
            registry.bind_user("gone", "u3".into()).await,
            Err(GateError::ClientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn by_user_id_filters() {
        let registry = ClientRegistry::new();
        let (rec_a, _ra) = record("a");
        let (rec_b, _rb) = record("b");
        let (rec_c, _rc) = record("c");
        registry.insert(rec_a).await.unwrap();
        registry.insert(rec_b).await.unwrap();
        registry.insert(rec_c).await.unwrap();
        registry.bind_user("a", "u1".into()).await.unwrap();
        registry.bind_user("b", "u1".into()).await.unwrap();

        let matched = registry.by_user_id("u1").await;
        assert_eq!(matched.len(), 2);
        assert!(registry.by_user_id("u9").await.is_empty());
    }

    #[tokio::test]
    async fn touch_advances_liveness() {
        let registry = ClientRegistry::new();
        let (rec, _rx) = record("a");
        registry.insert(rec).await.unwrap();
        let before = registry.get("a").await.unwrap().last_liveness;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry.touch("a").await;
        let after = registry.get("a").await.unwrap().last_liveness;
        assert!(after > before);

        // Touching a missing entry is a no-op.
        registry.touch("gone").await;
    }

    #[tokio::test]
    async fn registry_drains_after_all_removals() {
        let registry = ClientRegistry::new();
        let mut rxs = Vec::new();
        for i in 0..16 {
            let (rec, rx) = record(&format!("c{i}"));
            registry.insert(rec).await.unwrap();
            rxs.push(rx);
        }
        for i in 0..16 {
            assert!(registry.remove(&format!("c{i}")).await);
        }
        assert_eq!(registry.count().await, 0);
        assert!(registry.all().await.is_empty());
    }

    #[test]
    fn client_ids_are_fresh() {
        let a = generate_client_id();
        let b = generate_client_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
