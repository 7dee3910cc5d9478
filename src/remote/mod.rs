//! The remote authoritative store shared across devices.
//!
//! Documents live per owner and are keyed by task id. Writes are full-record
//! replacements; the change stream delivers ordered batches of document
//! changes, including latency-compensated echoes of this device's own writes
//! that have not yet been confirmed by the server.

pub mod memory;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::task::TaskDefinition;
use crate::error::RemoteError;

pub use memory::MemoryLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One document change as delivered by the change stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub kind: ChangeKind,
    /// Document key. Kept as raw text so a malformed record is still attributable.
    pub id: String,
    /// Raw document body; `None` for removals.
    pub document: Option<serde_json::Value>,
    /// Set when the event reflects a local write the server has not yet confirmed.
    pub from_local_cache: bool,
}

impl RemoteChange {
    pub fn upserted(kind: ChangeKind, task: &TaskDefinition) -> Result<Self, RemoteError> {
        Ok(Self {
            kind,
            id: task.id.to_string(),
            document: Some(to_document(task)?),
            from_local_cache: false,
        })
    }

    pub fn removed(id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            id: id.into(),
            document: None,
            from_local_cache: false,
        }
    }

    pub fn cached(mut self) -> Self {
        self.from_local_cache = true;
        self
    }
}

pub type ChangeBatch = Vec<RemoteChange>;

pub fn to_document(task: &TaskDefinition) -> Result<serde_json::Value, RemoteError> {
    serde_json::to_value(task).map_err(|e| RemoteError::Rejected(e.to_string()))
}

/// A live, owner-filtered change stream. Dropping it unsubscribes.
pub struct Subscription {
    owner: String,
    changes: mpsc::UnboundedReceiver<ChangeBatch>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        owner: impl Into<String>,
        changes: mpsc::UnboundedReceiver<ChangeBatch>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            owner: owner.into(),
            changes,
            cancel,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Next batch in delivery order; `None` once the ledger closes the stream.
    pub async fn next_batch(&mut self) -> Option<ChangeBatch> {
        self.changes.recv().await
    }

    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Stream for Subscription {
    type Item = ChangeBatch;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().changes.poll_recv(cx)
    }
}

#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Replace the owner's document keyed by `task.id` with `task`.
    async fn put(&self, task: &TaskDefinition) -> Result<(), RemoteError>;

    async fn delete(&self, owner: &str, id: Uuid) -> Result<(), RemoteError>;

    /// Open a change stream over `owner`'s documents. The first batch lists
    /// every existing document as `Added`.
    async fn subscribe(&self, owner: &str) -> Result<Subscription, RemoteError>;
}
