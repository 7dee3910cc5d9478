use super::{Persist, Records, StoreCore};
use crate::core::task::TaskDefinition;
use crate::error::StoreError;

/// Keeps nothing beyond the process lifetime.
#[derive(Debug, Default)]
pub struct Volatile;

impl Persist for Volatile {
    fn persist(&self, _tasks: &[TaskDefinition]) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-process task store.
pub type MemoryStore = StoreCore<Volatile>;

impl StoreCore<Volatile> {
    pub fn new() -> Self {
        Self::with_records(Records::default(), Volatile)
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = TaskDefinition>) -> Self {
        Self::with_records(Records::from_tasks(tasks), Volatile)
    }
}

impl Default for StoreCore<Volatile> {
    fn default() -> Self {
        Self::new()
    }
}
