//! On-device durable task storage: the only data source the UI reads from.
//!
//! Every store publishes its complete record set, ordered by anchor date, on
//! a watch channel after each successful mutation. A mutation is applied to
//! a copy, persisted, and only then swapped in and published, so readers
//! never observe a half-applied bulk operation.

pub mod json;
pub mod memory;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::task::{OwnerScope, TaskDefinition, TaskStatus};
use crate::error::StoreError;

pub use json::JsonStore;
pub use memory::MemoryStore;

/// Full, anchor-ordered record set as of one mutation.
pub type Snapshot = Arc<Vec<TaskDefinition>>;

pub trait TaskStore: Send + Sync {
    /// Records visible in `scope`, ordered by anchor date.
    fn list(&self, scope: &OwnerScope) -> Result<Vec<TaskDefinition>, StoreError>;

    fn get(&self, id: Uuid) -> Result<Option<TaskDefinition>, StoreError>;

    /// Insert or fully replace the record with the same id.
    fn upsert(&self, task: TaskDefinition) -> Result<(), StoreError>;

    /// Upsert several records as one mutation, published once.
    fn upsert_all(&self, tasks: Vec<TaskDefinition>) -> Result<(), StoreError>;

    /// Returns whether a record was removed. Absence is not an error.
    fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Attach every ownerless record to `owner` in one step. Returns the
    /// records that changed.
    fn bulk_reassign_owner(&self, owner: &str) -> Result<Vec<TaskDefinition>, StoreError>;

    /// Mark Active records in `scope` anchored before `before` (epoch millis)
    /// as Failed. Returns the records that changed.
    fn bulk_mark_failed(
        &self,
        before: i64,
        scope: &OwnerScope,
    ) -> Result<Vec<TaskDefinition>, StoreError>;

    /// Change feed of the full record set.
    fn changes(&self) -> watch::Receiver<Snapshot>;
}

/// The in-memory record table shared by every backend.
#[derive(Debug, Clone, Default)]
pub(crate) struct Records {
    tasks: HashMap<Uuid, TaskDefinition>,
}

impl Records {
    pub(crate) fn from_tasks(tasks: impl IntoIterator<Item = TaskDefinition>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|t| (t.id, t)).collect(),
        }
    }

    pub(crate) fn sorted(&self) -> Vec<TaskDefinition> {
        let mut tasks: Vec<TaskDefinition> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.anchor_date
                .cmp(&b.anchor_date)
                .then(a.execution_time.cmp(&b.execution_time))
                .then(a.id.cmp(&b.id))
        });
        tasks
    }

    fn upsert(&mut self, task: TaskDefinition) -> bool {
        match self.tasks.get(&task.id) {
            Some(existing) if *existing == task => false,
            _ => {
                self.tasks.insert(task.id, task);
                true
            }
        }
    }

    fn delete(&mut self, id: Uuid) -> bool {
        self.tasks.remove(&id).is_some()
    }

    fn reassign_owner(&mut self, owner: &str) -> Vec<TaskDefinition> {
        let mut changed = Vec::new();
        for task in self.tasks.values_mut() {
            if task.owner().is_none() {
                task.owner_id = Some(owner.to_string());
                changed.push(task.clone());
            }
        }
        changed
    }

    fn mark_failed(&mut self, before: i64, scope: &OwnerScope) -> Vec<TaskDefinition> {
        let mut changed = Vec::new();
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::Active && task.anchor_date < before && scope.contains(task)
            {
                task.status = TaskStatus::Failed;
                changed.push(task.clone());
            }
        }
        changed
    }
}

/// How a backend makes a new record set durable.
pub trait Persist: Send + Sync {
    fn persist(&self, tasks: &[TaskDefinition]) -> Result<(), StoreError>;
}

/// Store implementation shared by the memory and JSON backends.
pub struct StoreCore<P> {
    records: Mutex<Records>,
    feed: watch::Sender<Snapshot>,
    persist: P,
}

impl<P: Persist> StoreCore<P> {
    pub(crate) fn with_records(records: Records, persist: P) -> Self {
        let (feed, _) = watch::channel(Arc::new(records.sorted()));
        Self {
            records: Mutex::new(records),
            feed,
            persist,
        }
    }

    pub(crate) fn backend(&self) -> &P {
        &self.persist
    }

    /// Apply `f` to a copy of the table; if it reports a change, persist the
    /// copy, swap it in and publish.
    fn mutate<T>(&self, f: impl FnOnce(&mut Records) -> (T, bool)) -> Result<T, StoreError> {
        let mut guard = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        let mut next = guard.clone();
        let (out, changed) = f(&mut next);
        if changed {
            let sorted = next.sorted();
            self.persist.persist(&sorted)?;
            *guard = next;
            self.feed.send_replace(Arc::new(sorted));
        }
        Ok(out)
    }
}

impl<P: Persist> TaskStore for StoreCore<P> {
    fn list(&self, scope: &OwnerScope) -> Result<Vec<TaskDefinition>, StoreError> {
        let guard = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .sorted()
            .into_iter()
            .filter(|t| scope.contains(t))
            .collect())
    }

    fn get(&self, id: Uuid) -> Result<Option<TaskDefinition>, StoreError> {
        let guard = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.tasks.get(&id).cloned())
    }

    fn upsert(&self, task: TaskDefinition) -> Result<(), StoreError> {
        self.mutate(|records| ((), records.upsert(task)))
    }

    fn upsert_all(&self, tasks: Vec<TaskDefinition>) -> Result<(), StoreError> {
        self.mutate(|records| {
            let mut any = false;
            for task in tasks {
                any |= records.upsert(task);
            }
            ((), any)
        })
    }

    fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.mutate(|records| {
            let removed = records.delete(id);
            (removed, removed)
        })
    }

    fn bulk_reassign_owner(&self, owner: &str) -> Result<Vec<TaskDefinition>, StoreError> {
        self.mutate(|records| {
            let changed = records.reassign_owner(owner);
            let any = !changed.is_empty();
            (changed, any)
        })
    }

    fn bulk_mark_failed(
        &self,
        before: i64,
        scope: &OwnerScope,
    ) -> Result<Vec<TaskDefinition>, StoreError> {
        self.mutate(|records| {
            let changed = records.mark_failed(before, scope);
            let any = !changed.is_empty();
            (changed, any)
        })
    }

    fn changes(&self) -> watch::Receiver<Snapshot> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recurrence::Recurrence;

    fn task(name: &str, anchor: i64) -> TaskDefinition {
        TaskDefinition::new(name, anchor, anchor, Recurrence::once())
    }

    #[test]
    fn upsert_replaces_by_id() {
        let store = MemoryStore::new();
        let mut t = task("Draft", 1_000);
        store.upsert(t.clone()).unwrap();
        t.name = "Final".to_string();
        store.upsert(t.clone()).unwrap();

        let all = store.list(&OwnerScope::Anonymous).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Final");
    }

    #[test]
    fn list_is_ordered_by_anchor_and_scoped() {
        let store = MemoryStore::new();
        let late = task("Late", 3_000);
        let early = task("Early", 1_000);
        let mut owned = task("Owned", 2_000);
        owned.owner_id = Some("u1".to_string());
        for t in [late, early, owned] {
            store.upsert(t).unwrap();
        }

        let names: Vec<String> = store
            .list(&OwnerScope::Anonymous)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Early", "Late"]);
        assert_eq!(store.list(&OwnerScope::Owner("u1".into())).unwrap().len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = MemoryStore::new();
        let t = task("Gone", 1_000);
        store.upsert(t.clone()).unwrap();
        assert!(store.delete(t.id).unwrap());
        assert!(!store.delete(t.id).unwrap());
        assert!(store.get(t.id).unwrap().is_none());
    }

    #[test]
    fn reassign_owner_publishes_once_and_is_idempotent() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.upsert(task(&format!("t{}", i), i)).unwrap();
        }
        let mut other = task("Other", 10);
        other.owner_id = Some("someone-else".to_string());
        store.upsert(other.clone()).unwrap();

        let mut feed = store.changes();
        feed.borrow_and_update();

        let migrated = store.bulk_reassign_owner("u1").unwrap();
        assert_eq!(migrated.len(), 5);
        assert!(feed.has_changed().unwrap());
        let snapshot = feed.borrow_and_update().clone();
        assert!(snapshot.iter().all(|t| t.owner_id.is_some()));
        assert_eq!(
            store.get(other.id).unwrap().unwrap().owner_id.as_deref(),
            Some("someone-else")
        );

        let again = store.bulk_reassign_owner("u1").unwrap();
        assert!(again.is_empty());
        assert!(!feed.has_changed().unwrap());
    }

    #[test]
    fn upsert_all_publishes_once() {
        let store = MemoryStore::new();
        let mut feed = store.changes();
        feed.borrow_and_update();

        store.upsert_all(vec![task("a", 1), task("b", 2)]).unwrap();

        assert!(feed.has_changed().unwrap());
        assert_eq!(feed.borrow_and_update().len(), 2);
        store.upsert_all(store.list(&OwnerScope::Anonymous).unwrap()).unwrap();
        assert!(!feed.has_changed().unwrap());
    }

    #[test]
    fn empty_owner_rows_are_anonymous_for_listing_and_rollover() {
        let store = MemoryStore::new();
        let mut t = task("Blank owner", 1);
        t.owner_id = Some(String::new());
        store.upsert(t.clone()).unwrap();

        assert_eq!(store.list(&OwnerScope::Anonymous).unwrap().len(), 1);
        let failed = store.bulk_mark_failed(10, &OwnerScope::Anonymous).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(store.get(t.id).unwrap().unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn empty_owner_counts_as_ownerless() {
        let store = MemoryStore::new();
        let mut t = task("Blank owner", 1);
        t.owner_id = Some(String::new());
        store.upsert(t.clone()).unwrap();
        store.bulk_reassign_owner("u1").unwrap();
        assert_eq!(store.get(t.id).unwrap().unwrap().owner_id.as_deref(), Some("u1"));
    }

    #[test]
    fn mark_failed_respects_cutoff_status_and_scope() {
        let store = MemoryStore::new();
        let overdue = task("Overdue", 100);
        let current = task("Current", 500);
        let mut done = task("Done", 100);
        done.status = TaskStatus::Completed;
        let mut foreign = task("Foreign", 100);
        foreign.owner_id = Some("u2".to_string());
        for t in [overdue.clone(), current.clone(), done.clone(), foreign.clone()] {
            store.upsert(t).unwrap();
        }

        let failed = store.bulk_mark_failed(500, &OwnerScope::Anonymous).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, overdue.id);

        let status = |id| store.get(id).unwrap().unwrap().status;
        assert_eq!(status(overdue.id), TaskStatus::Failed);
        assert_eq!(status(current.id), TaskStatus::Active);
        assert_eq!(status(done.id), TaskStatus::Completed);
        assert_eq!(status(foreign.id), TaskStatus::Active);
    }
}
