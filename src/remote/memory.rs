use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{ChangeBatch, ChangeKind, RemoteChange, RemoteLedger, Subscription, to_document};
use crate::core::task::TaskDefinition;
use crate::error::RemoteError;

static NEXT_DEVICE: AtomicU64 = AtomicU64::new(1);

struct Listener {
    device: u64,
    owner: String,
    tx: mpsc::UnboundedSender<ChangeBatch>,
    cancel: CancellationToken,
}

impl Listener {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

struct LedgerState {
    /// owner -> document id -> document
    collections: HashMap<String, BTreeMap<String, serde_json::Value>>,
    listeners: Vec<Listener>,
    reachable: bool,
}

/// In-process document store with per-document last-write-wins and a
/// change stream per owner.
///
/// Each handle acts as one device: its own writes are echoed to its own
/// listeners as cache-origin batches before the confirmed batch, which goes
/// to every listener of the owner. [`MemoryLedger::device`] returns a handle
/// for another device sharing the same documents.
#[derive(Clone)]
pub struct MemoryLedger {
    device: u64,
    state: Arc<Mutex<LedgerState>>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            device: NEXT_DEVICE.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(Mutex::new(LedgerState {
                collections: HashMap::new(),
                listeners: Vec::new(),
                reachable: true,
            })),
        }
    }

    /// Another device's view of the same ledger.
    pub fn device(&self) -> Self {
        Self {
            device: NEXT_DEVICE.fetch_add(1, Ordering::Relaxed),
            state: Arc::clone(&self.state),
        }
    }

    /// Simulate losing or regaining connectivity.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub fn document(&self, owner: &str, id: &str) -> Option<serde_json::Value> {
        self.lock()
            .collections
            .get(owner)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn document_count(&self, owner: &str) -> usize {
        self.lock().collections.get(owner).map_or(0, BTreeMap::len)
    }

    pub fn listener_count(&self, owner: &str) -> usize {
        let mut state = self.lock();
        state.listeners.retain(Listener::is_live);
        state.listeners.iter().filter(|l| l.owner == owner).count()
    }

    /// Deliver an arbitrary batch to every live listener of `owner`.
    pub fn inject(&self, owner: &str, batch: ChangeBatch) {
        let mut state = self.lock();
        broadcast(&mut state, owner, None, batch);
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_reachable(state: &LedgerState) -> Result<(), RemoteError> {
        if state.reachable {
            Ok(())
        } else {
            Err(RemoteError::Unreachable("memory ledger offline".to_string()))
        }
    }

    /// Send the pending echo to this device, then the confirmed change to all.
    fn publish(&self, state: &mut LedgerState, owner: &str, change: RemoteChange) {
        broadcast(state, owner, Some(self.device), vec![change.clone().cached()]);
        broadcast(state, owner, None, vec![change]);
    }
}

fn broadcast(state: &mut LedgerState, owner: &str, device: Option<u64>, batch: ChangeBatch) {
    state.listeners.retain(Listener::is_live);
    for listener in &state.listeners {
        if listener.owner != owner || device.is_some_and(|d| d != listener.device) {
            continue;
        }
        let _ = listener.tx.send(batch.clone());
    }
}

#[async_trait]
impl RemoteLedger for MemoryLedger {
    async fn put(&self, task: &TaskDefinition) -> Result<(), RemoteError> {
        let owner = task
            .owner_id
            .clone()
            .filter(|o| !o.is_empty())
            .ok_or_else(|| RemoteError::MissingOwner(task.id.to_string()))?;
        let document = to_document(task)?;
        let id = task.id.to_string();

        let mut state = self.lock();
        Self::check_reachable(&state)?;
        let previous = state
            .collections
            .entry(owner.clone())
            .or_default()
            .insert(id.clone(), document.clone());
        let kind = if previous.is_some() {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        let change = RemoteChange {
            kind,
            id,
            document: Some(document),
            from_local_cache: false,
        };
        self.publish(&mut state, &owner, change);
        Ok(())
    }

    async fn delete(&self, owner: &str, id: Uuid) -> Result<(), RemoteError> {
        let id = id.to_string();
        let mut state = self.lock();
        Self::check_reachable(&state)?;
        let removed = state
            .collections
            .get_mut(owner)
            .and_then(|docs| docs.remove(&id));
        if removed.is_some() {
            self.publish(&mut state, owner, RemoteChange::removed(id));
        }
        Ok(())
    }

    async fn subscribe(&self, owner: &str) -> Result<Subscription, RemoteError> {
        let mut state = self.lock();
        Self::check_reachable(&state)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let initial: ChangeBatch = state
            .collections
            .get(owner)
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| RemoteChange {
                        kind: ChangeKind::Added,
                        id: id.clone(),
                        document: Some(doc.clone()),
                        from_local_cache: false,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !initial.is_empty() {
            let _ = tx.send(initial);
        }

        state.listeners.push(Listener {
            device: self.device,
            owner: owner.to_string(),
            tx,
            cancel: cancel.clone(),
        });
        log::debug!("Memory ledger: listener opened for {}", owner);

        Ok(Subscription::new(owner, rx, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recurrence::Recurrence;

    fn owned_task(owner: &str) -> TaskDefinition {
        let mut t = TaskDefinition::new("Sync me", 1_000, 1_000, Recurrence::daily());
        t.owner_id = Some(owner.to_string());
        t
    }

    #[tokio::test]
    async fn put_echoes_locally_then_confirms() {
        let ledger = MemoryLedger::new();
        let mut sub = ledger.subscribe("u1").await.unwrap();
        let task = owned_task("u1");

        ledger.put(&task).await.unwrap();

        let echo = sub.next_batch().await.unwrap();
        assert!(echo[0].from_local_cache);
        assert_eq!(echo[0].kind, ChangeKind::Added);
        let confirmed = sub.next_batch().await.unwrap();
        assert!(!confirmed[0].from_local_cache);
        assert_eq!(confirmed[0].id, task.id.to_string());

        ledger.put(&task).await.unwrap();
        sub.next_batch().await.unwrap();
        assert_eq!(sub.next_batch().await.unwrap()[0].kind, ChangeKind::Modified);
    }

    #[tokio::test]
    async fn other_devices_only_see_confirmed_changes() {
        let phone = MemoryLedger::new();
        let laptop = phone.device();
        let mut laptop_sub = laptop.subscribe("u1").await.unwrap();

        phone.put(&owned_task("u1")).await.unwrap();

        let batch = laptop_sub.next_batch().await.unwrap();
        assert!(!batch[0].from_local_cache);
        assert!(laptop_sub.changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_replays_existing_documents() {
        let ledger = MemoryLedger::new();
        let a = owned_task("u1");
        let b = owned_task("u1");
        ledger.put(&a).await.unwrap();
        ledger.put(&b).await.unwrap();
        ledger.put(&owned_task("u2")).await.unwrap();

        let mut sub = ledger.subscribe("u1").await.unwrap();
        let initial = sub.next_batch().await.unwrap();
        assert_eq!(initial.len(), 2);
        assert!(initial.iter().all(|c| c.kind == ChangeKind::Added));
    }

    #[tokio::test]
    async fn delete_notifies_removal_once() {
        let ledger = MemoryLedger::new();
        let task = owned_task("u1");
        ledger.put(&task).await.unwrap();
        let mut sub = ledger.subscribe("u1").await.unwrap();
        sub.next_batch().await.unwrap();

        ledger.delete("u1", task.id).await.unwrap();
        ledger.delete("u1", task.id).await.unwrap();

        sub.next_batch().await.unwrap();
        let removed = sub.next_batch().await.unwrap();
        assert_eq!(removed[0].kind, ChangeKind::Removed);
        assert!(sub.changes.try_recv().is_err());
        assert!(ledger.document("u1", &task.id.to_string()).is_none());
    }

    #[tokio::test]
    async fn ownerless_put_is_rejected() {
        let ledger = MemoryLedger::new();
        let task = TaskDefinition::new("Local", 1, 1, Recurrence::once());
        assert_eq!(
            ledger.put(&task).await,
            Err(RemoteError::MissingOwner(task.id.to_string()))
        );
    }

    #[tokio::test]
    async fn unreachable_ledger_fails_every_call() {
        let ledger = MemoryLedger::new();
        ledger.set_reachable(false);
        let task = owned_task("u1");
        assert!(matches!(ledger.put(&task).await, Err(RemoteError::Unreachable(_))));
        assert!(matches!(ledger.subscribe("u1").await, Err(RemoteError::Unreachable(_))));
        assert_eq!(ledger.document_count("u1"), 0);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let ledger = MemoryLedger::new();
        let sub = ledger.subscribe("u1").await.unwrap();
        assert_eq!(ledger.listener_count("u1"), 1);
        sub.unsubscribe();
        assert_eq!(ledger.listener_count("u1"), 0);
    }
}
