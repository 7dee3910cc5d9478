//! The task surface consumed by the presentation layer.

use chrono::{NaiveDate, NaiveTime};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::recurrence::{self, Occurrence, Recurrence};
use crate::core::stats::{DayProgress, Statistics, StatsRange};
use crate::core::task::{OwnerScope, TaskDefinition, TaskStatus, default_validity_label};
use crate::core::temporal;
use crate::error::{StoreError, TaskError};
use crate::store::Snapshot;
use crate::sync::{ReconciliationEngine, SessionState};

/// Input for a new task, anchored at the service's selected date.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub time: NaiveTime,
    pub recurrence: Recurrence,
    pub validity_label: Option<String>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, time: NaiveTime) -> Self {
        Self {
            name: name.into(),
            time,
            recurrence: Recurrence::once(),
            validity_label: None,
        }
    }

    pub fn recurring(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.validity_label = Some(label.into());
        self
    }
}

/// The owner-scoped definitions at one point in time, plus the set of
/// dates carrying a calendar dot.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub scope: OwnerScope,
    /// Ordered by anchor date.
    pub definitions: Arc<Vec<TaskDefinition>>,
    dots: Arc<HashSet<NaiveDate>>,
}

impl TaskView {
    fn build(snapshot: &Snapshot, scope: OwnerScope) -> Self {
        let definitions: Vec<TaskDefinition> = snapshot
            .iter()
            .filter(|t| scope.contains(t))
            .cloned()
            .collect();
        let dots = definitions.iter().filter_map(TaskDefinition::anchor_day).collect();
        Self {
            scope,
            definitions: Arc::new(definitions),
            dots: Arc::new(dots),
        }
    }

    /// Whether `date` has at least one definition anchored on it.
    pub fn has_dot(&self, date: NaiveDate) -> bool {
        self.dots.contains(&date)
    }

    pub fn dot_dates(&self) -> &HashSet<NaiveDate> {
        &self.dots
    }

    pub fn occurrences_on(&self, date: NaiveDate) -> Vec<Occurrence> {
        self.definitions
            .iter()
            .filter_map(|t| recurrence::occurrence_on(t, date))
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<&TaskDefinition> {
        self.definitions.iter().find(|t| t.id == id)
    }
}

/// A continuously updated sequence of [`TaskView`]s.
pub struct TaskFeed {
    tasks: watch::Receiver<Snapshot>,
    session: watch::Receiver<SessionState>,
}

impl TaskFeed {
    /// The view as of now, marking it seen.
    pub fn current(&mut self) -> TaskView {
        let scope = self.session.borrow_and_update().scope();
        let snapshot = self.tasks.borrow_and_update().clone();
        TaskView::build(&snapshot, scope)
    }

    /// Wait for the next change to the stored tasks or the session scope.
    /// Returns `None` once the engine and store are gone.
    pub async fn next(&mut self) -> Option<TaskView> {
        tokio::select! {
            changed = self.tasks.changed() => changed.ok()?,
            changed = self.session.changed() => changed.ok()?,
        }
        Some(self.current())
    }
}

struct CachedView {
    feed: TaskFeed,
    view: TaskView,
}

pub struct TaskService {
    engine: Arc<ReconciliationEngine>,
    cache: Mutex<CachedView>,
    selected: Mutex<NaiveDate>,
}

impl TaskService {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        let mut feed = Self::feed_for(&engine);
        let view = feed.current();
        Self {
            engine,
            cache: Mutex::new(CachedView { feed, view }),
            selected: Mutex::new(temporal::today()),
        }
    }

    fn feed_for(engine: &ReconciliationEngine) -> TaskFeed {
        TaskFeed {
            tasks: engine.store().changes(),
            session: engine.watch_state(),
        }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    pub fn feed(&self) -> TaskFeed {
        Self::feed_for(&self.engine)
    }

    /// Current view. Rebuilt only when the store or the session changed
    /// since the last call.
    pub fn view(&self) -> TaskView {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let stale = cache.feed.tasks.has_changed().unwrap_or(false)
            || cache.feed.session.has_changed().unwrap_or(false);
        if stale {
            let view = cache.feed.current();
            cache.view = view;
        }
        cache.view.clone()
    }

    pub fn definitions(&self) -> Arc<Vec<TaskDefinition>> {
        self.view().definitions
    }

    pub fn occurrences_on(&self, date: NaiveDate) -> Vec<Occurrence> {
        self.view().occurrences_on(date)
    }

    pub fn has_dot(&self, date: NaiveDate) -> bool {
        self.view().has_dot(date)
    }

    pub fn selected_date(&self) -> NaiveDate {
        *self.selected.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn select_date(&self, date: NaiveDate) {
        *self.selected.lock().unwrap_or_else(|e| e.into_inner()) = date;
    }

    pub fn occurrences_on_selected(&self) -> Vec<Occurrence> {
        self.occurrences_on(self.selected_date())
    }

    pub fn day_progress(&self, date: NaiveDate) -> DayProgress {
        DayProgress::build(&self.definitions(), date)
    }

    pub fn statistics(&self, range: StatsRange) -> Statistics {
        Statistics::build(&self.definitions(), temporal::today(), range)
    }

    /// Run the overdue pass. Call once when the application starts.
    pub async fn start(&self) -> Result<usize, StoreError> {
        self.engine.activate().await
    }

    /// Create an Active task anchored at the selected date.
    pub async fn add(&self, new: NewTask) -> Result<TaskDefinition, TaskError> {
        let date = self.selected_date();
        let anchor = temporal::start_of_local_day(date);
        let execution_time = temporal::local_millis(date, new.time);
        let mut task = TaskDefinition::new(new.name, anchor, execution_time, new.recurrence);
        task.validity_label = new
            .validity_label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| default_validity_label(task.recurrence.kind).to_string());
        let task = self.engine.upsert(task).await?;
        log::info!("Added task {} ({})", task.name, task.id);
        Ok(task)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, TaskError> {
        self.engine.delete(id).await
    }

    pub async fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
    ) -> Result<Option<TaskDefinition>, TaskError> {
        self.engine.set_status(id, status).await
    }

    pub async fn complete(&self, id: Uuid) -> Result<(), TaskError> {
        self.set_status(id, TaskStatus::Completed).await.map(|_| ())
    }

    pub async fn fail(&self, id: Uuid) -> Result<(), TaskError> {
        self.set_status(id, TaskStatus::Failed).await.map(|_| ())
    }

    pub async fn carry_forward(&self, id: Uuid) -> Result<TaskDefinition, TaskError> {
        self.engine.carry_forward(id).await
    }
}
