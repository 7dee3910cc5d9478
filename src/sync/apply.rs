use uuid::Uuid;

use crate::core::task::TaskDefinition;
use crate::remote::{ChangeKind, RemoteChange};
use crate::store::TaskStore;

/// What applying one remote batch did to the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub upserted: usize,
    pub removed: usize,
    pub echoes_skipped: usize,
    /// Ids of records that could not be materialised.
    pub malformed: Vec<String>,
    /// Ids of records the local store refused to write.
    pub failed: Vec<String>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.malformed.is_empty() && self.failed.is_empty()
    }
}

/// Turn a remote document into a definition keyed by the change's id.
pub fn materialize(change: &RemoteChange) -> Result<TaskDefinition, String> {
    let document = change
        .document
        .clone()
        .ok_or_else(|| "document body missing".to_string())?;
    let task: TaskDefinition = serde_json::from_value(document).map_err(|e| e.to_string())?;
    if task.id.to_string() != change.id {
        return Err(format!("document id {} does not match key", task.id));
    }
    Ok(task)
}

/// Apply a batch of confirmed remote changes to `store`, in order.
///
/// Cache-origin echoes are skipped. Added and Modified replace the local
/// record verbatim; Removed deletes it if present. A record that fails to
/// materialise or write is logged and skipped without affecting its
/// neighbours.
pub fn apply_batch(store: &dyn TaskStore, batch: &[RemoteChange]) -> ApplyReport {
    let mut report = ApplyReport::default();

    for change in batch {
        if change.from_local_cache {
            log::debug!("Skipping local echo for {}", change.id);
            report.echoes_skipped += 1;
            continue;
        }

        match change.kind {
            ChangeKind::Added | ChangeKind::Modified => {
                let task = match materialize(change) {
                    Ok(t) => t,
                    Err(e) => {
                        log::warn!("Skipping malformed remote task {}: {}", change.id, e);
                        report.malformed.push(change.id.clone());
                        continue;
                    }
                };
                match store.upsert(task) {
                    Ok(()) => report.upserted += 1,
                    Err(e) => {
                        log::error!("Failed to store remote task {}: {}", change.id, e);
                        report.failed.push(change.id.clone());
                    }
                }
            }
            ChangeKind::Removed => {
                let id = match Uuid::parse_str(&change.id) {
                    Ok(id) => id,
                    Err(e) => {
                        log::warn!("Skipping removal with malformed id {}: {}", change.id, e);
                        report.malformed.push(change.id.clone());
                        continue;
                    }
                };
                match store.delete(id) {
                    Ok(true) => report.removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        log::error!("Failed to delete remote-removed task {}: {}", change.id, e);
                        report.failed.push(change.id.clone());
                    }
                }
            }
        }
    }

    report
}
