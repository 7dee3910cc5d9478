use std::path::{Path, PathBuf};

use super::{Persist, Records, StoreCore};
use crate::core::task::TaskDefinition;
use crate::error::StoreError;

/// Persists the record set as a pretty-printed JSON array.
#[derive(Debug)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    fn load(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Persist for JsonFile {
    fn persist(&self, tasks: &[TaskDefinition]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(tasks)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Replace atomically so a crash mid-write leaves the old file intact.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Durable task store backed by a single JSON file.
pub type JsonStore = StoreCore<JsonFile>;

impl StoreCore<JsonFile> {
    /// Open the store at `path`. A missing file opens empty; a malformed one
    /// is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file = JsonFile { path: path.into() };
        let tasks = file.load()?;
        log::info!(
            "Opened task store {} with {} tasks",
            file.path.display(),
            tasks.len()
        );
        Ok(Self::with_records(Records::from_tasks(tasks), file))
    }

    pub fn path(&self) -> &Path {
        &self.backend().path
    }
}
