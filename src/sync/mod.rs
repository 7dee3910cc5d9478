//! Keeps the local task store and the remote ledger convergent.
//!
//! The local store is always written first and is the only thing readers
//! consult. While a user is signed in, every local mutation is mirrored to
//! the remote ledger on a best-effort basis, and one listener task applies
//! the ledger's confirmed changes back into the store in arrival order.

pub mod apply;
pub mod rollover;

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::task::{OwnerScope, TaskDefinition, TaskStatus};
use crate::error::{StoreError, TaskError};
use crate::identity::IdentityProvider;
use crate::remote::{RemoteLedger, Subscription};
use crate::store::TaskStore;

pub use apply::{ApplyReport, apply_batch};
pub use rollover::RolloverScheduler;

/// Session state as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Writes stay local; no remote listener.
    #[default]
    Anonymous,
    /// `live` is false when the change stream could not be opened or has
    /// closed; the next sign-in transition retries it.
    Authenticated { owner: String, live: bool },
}

impl SessionState {
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated { owner, .. } => Some(owner),
        }
    }

    pub fn scope(&self) -> OwnerScope {
        OwnerScope::from_owner(self.owner())
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Authenticated { live: true, .. })
    }
}

struct Listener {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Session {
    owner: Option<String>,
    listener: Option<Listener>,
}

pub struct ReconciliationEngine {
    store: Arc<dyn TaskStore>,
    remote: Arc<dyn RemoteLedger>,
    rollover: RolloverScheduler,
    /// Held across every transition and every local write, which gives the
    /// single-writer ordering between commands, migration and teardown.
    session: Mutex<Session>,
    state: Arc<watch::Sender<SessionState>>,
    applied: Arc<watch::Sender<u64>>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn TaskStore>, remote: Arc<dyn RemoteLedger>) -> Self {
        let (state, _) = watch::channel(SessionState::Anonymous);
        let (applied, _) = watch::channel(0);
        Self {
            rollover: RolloverScheduler::new(Arc::clone(&store)),
            store,
            remote,
            session: Mutex::new(Session::default()),
            state: Arc::new(state),
            applied: Arc::new(applied),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn scope(&self) -> OwnerScope {
        self.state.borrow().scope()
    }

    /// Running count of remote batches the listener has processed.
    pub fn applied_batches(&self) -> watch::Receiver<u64> {
        self.applied.subscribe()
    }

    /// Enter the authenticated state for `owner`.
    ///
    /// Tears down any previous listener, attaches every ownerless local task
    /// to `owner` and mirrors those tasks remotely, then opens exactly one
    /// change stream. Failing to open the stream leaves the session signed in
    /// without live updates. A local store failure during migration aborts
    /// the transition and leaves the session anonymous. Signing in again as
    /// the current owner keeps the session state unchanged throughout.
    pub async fn sign_in(&self, owner: &str) -> Result<(), StoreError> {
        let mut session = self.session.lock().await;
        let same_owner = session.owner.as_deref() == Some(owner);
        self.teardown(&mut session).await;
        if !same_owner {
            session.owner = None;
            self.publish(SessionState::Anonymous);
        }

        let migrated = match self.store.bulk_reassign_owner(owner) {
            Ok(migrated) => migrated,
            Err(e) => {
                session.owner = None;
                self.publish(SessionState::Anonymous);
                return Err(e);
            }
        };
        log::info!("Signed in as {}: migrated {} local tasks", owner, migrated.len());
        session.owner = Some(owner.to_string());
        if !same_owner {
            self.publish(SessionState::Authenticated {
                owner: owner.to_string(),
                live: false,
            });
        }

        for task in &migrated {
            self.mirror(task).await;
        }

        match self.remote.subscribe(owner).await {
            Ok(subscription) => {
                session.listener = Some(self.spawn_listener(subscription));
                self.publish(SessionState::Authenticated {
                    owner: owner.to_string(),
                    live: true,
                });
                log::info!("Subscribed to remote changes for {}", owner);
            }
            Err(e) => {
                log::warn!("Remote subscription for {} failed: {}", owner, e);
                self.publish(SessionState::Authenticated {
                    owner: owner.to_string(),
                    live: false,
                });
            }
        }

        Ok(())
    }

    /// Drop the listener and return to the anonymous state. Local tasks keep
    /// their owner; batches not yet applied are discarded.
    pub async fn sign_out(&self) {
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;
        if let Some(owner) = session.owner.take() {
            log::info!("Signed out {}", owner);
        }
        self.publish(SessionState::Anonymous);
    }

    /// Stop the listener without changing identity.
    pub async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;
        if let Some(owner) = session.owner.clone() {
            self.publish(SessionState::Authenticated { owner, live: false });
        }
    }

    /// Follow `provider`, signing in and out as its identity changes.
    pub fn follow_identity(
        self: &Arc<Self>,
        provider: Arc<dyn IdentityProvider>,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut changes = provider.identity_changes();
        tokio::spawn(async move {
            let mut current: Option<String> = None;
            loop {
                let next = changes.borrow_and_update().clone();
                if next != current {
                    match &next {
                        Some(uid) => {
                            if let Err(e) = engine.sign_in(uid).await {
                                log::error!("Sign-in transition for {} failed: {}", uid, e);
                            }
                        }
                        None => engine.sign_out().await,
                    }
                    current = next;
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Run the overdue pass for the current scope and mirror what changed.
    pub async fn activate(&self) -> Result<usize, StoreError> {
        let (owner, failed) = {
            let session = self.session.lock().await;
            let scope = OwnerScope::from_owner(session.owner.as_deref());
            (session.owner.clone(), self.rollover.run(&scope)?)
        };
        if owner.is_some() {
            for task in &failed {
                self.mirror(task).await;
            }
        }
        Ok(failed.len())
    }

    /// Validate and write `task` locally, then mirror it if signed in.
    /// Returns the record as stored.
    pub async fn upsert(&self, task: TaskDefinition) -> Result<TaskDefinition, TaskError> {
        let [task] = self.commit([task]).await?;
        Ok(task)
    }

    /// Validate every record, then write them all in one store mutation and
    /// mirror each if signed in. Nothing is written if any record is invalid.
    async fn commit<const N: usize>(
        &self,
        mut tasks: [TaskDefinition; N],
    ) -> Result<[TaskDefinition; N], TaskError> {
        for task in &tasks {
            task.validate()?;
        }
        let owned = {
            let session = self.session.lock().await;
            if let Some(owner) = &session.owner {
                for task in &mut tasks {
                    task.owner_id = Some(owner.clone());
                }
            }
            self.store.upsert_all(tasks.to_vec())?;
            session.owner.is_some()
        };
        if owned {
            for task in &tasks {
                self.mirror(task).await;
            }
        }
        Ok(tasks)
    }

    /// Delete locally, then remotely if signed in. Returns whether a local
    /// record existed.
    pub async fn delete(&self, id: Uuid) -> Result<bool, TaskError> {
        let (removed, owner) = {
            let session = self.session.lock().await;
            (self.store.delete(id)?, session.owner.clone())
        };
        if let Some(owner) = owner {
            if let Err(e) = self.remote.delete(&owner, id).await {
                log::warn!("Remote delete of {} failed: {}", id, e);
            }
        }
        Ok(removed)
    }

    /// Move an Active task to `status`. Carrying forward also spawns the
    /// next day's task, which is returned.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
    ) -> Result<Option<TaskDefinition>, TaskError> {
        let task = self.active_task(id, status)?;
        match status {
            TaskStatus::Active => Ok(None),
            TaskStatus::CarriedForward => {
                let (closed, next) = task.carried_forward();
                let [_, next] = self.commit([closed, next]).await?;
                log::info!("Carried {} forward as {}", id, next.id);
                Ok(Some(next))
            }
            _ => {
                self.upsert(task.with_status(status)).await?;
                Ok(None)
            }
        }
    }

    pub async fn carry_forward(&self, id: Uuid) -> Result<TaskDefinition, TaskError> {
        self.set_status(id, TaskStatus::CarriedForward)
            .await?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    fn active_task(&self, id: Uuid, to: TaskStatus) -> Result<TaskDefinition, TaskError> {
        let task = self
            .store
            .get(id)?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if task.status != TaskStatus::Active {
            return Err(TaskError::InvalidTransition {
                id: id.to_string(),
                from: task.status,
                to,
            });
        }
        Ok(task)
    }

    fn publish(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    async fn mirror(&self, task: &TaskDefinition) {
        if let Err(e) = self.remote.put(task).await {
            log::warn!("Remote write of {} failed: {}", task.id, e);
        }
    }

    async fn teardown(&self, session: &mut Session) {
        if let Some(listener) = session.listener.take() {
            listener.cancel.cancel();
            if let Err(e) = listener.handle.await {
                log::error!("Remote listener ended abnormally: {}", e);
            }
            log::debug!("Remote listener torn down");
        }
    }

    fn spawn_listener(&self, subscription: Subscription) -> Listener {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(listen(
            Arc::clone(&self.store),
            subscription,
            cancel.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.applied),
        ));
        Listener { cancel, handle }
    }
}

/// Apply batches from `subscription` one at a time until cancelled or the
/// stream closes.
async fn listen(
    store: Arc<dyn TaskStore>,
    mut subscription: Subscription,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
    applied: Arc<watch::Sender<u64>>,
) {
    let owner = subscription.owner().to_string();
    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            batch = subscription.next() => batch,
        };
        let Some(batch) = batch else {
            log::warn!("Remote change stream for {} closed", owner);
            state.send_if_modified(|s| match s {
                SessionState::Authenticated { owner: o, live } if *o == owner && *live => {
                    *live = false;
                    true
                }
                _ => false,
            });
            break;
        };

        let report = apply_batch(store.as_ref(), &batch);
        log::debug!(
            "Applied remote batch for {}: {} upserted, {} removed, {} echoes skipped",
            owner,
            report.upserted,
            report.removed,
            report.echoes_skipped
        );
        if !report.is_clean() {
            log::warn!(
                "Remote batch for {} had {} malformed and {} failed records",
                owner,
                report.malformed.len(),
                report.failed.len()
            );
        }
        applied.send_modify(|n| *n += 1);
    }
    subscription.unsubscribe();
}
