use chrono::NaiveDate;
use std::sync::Arc;

use crate::core::task::{OwnerScope, TaskDefinition};
use crate::core::temporal;
use crate::error::StoreError;
use crate::store::TaskStore;

/// Marks Active tasks whose anchor day has fully elapsed as Failed.
///
/// Only the anchor date is consulted, not the expanded occurrence calendar,
/// so a recurring definition is judged by its original anchor like any other.
/// Running it again in the same day finds nothing left to change.
pub struct RolloverScheduler {
    store: Arc<dyn TaskStore>,
}

impl RolloverScheduler {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn run(&self, scope: &OwnerScope) -> Result<Vec<TaskDefinition>, StoreError> {
        self.run_at(scope, temporal::today())
    }

    /// Roll over as if the local date were `today`.
    pub fn run_at(
        &self,
        scope: &OwnerScope,
        today: NaiveDate,
    ) -> Result<Vec<TaskDefinition>, StoreError> {
        let cutoff = temporal::start_of_local_day(today);
        let failed = self.store.bulk_mark_failed(cutoff, scope)?;
        if !failed.is_empty() {
            log::info!("Rollover marked {} overdue tasks as failed", failed.len());
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recurrence::Recurrence;
    use crate::core::task::TaskStatus;
    use crate::store::MemoryStore;
    use chrono::{Duration, NaiveTime};

    fn task_on(day: NaiveDate, recurrence: Recurrence) -> TaskDefinition {
        let time = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        let anchor = temporal::local_millis(day, time);
        TaskDefinition::new("Journal", anchor, anchor, recurrence)
    }

    fn setup(tasks: Vec<TaskDefinition>) -> (Arc<MemoryStore>, RolloverScheduler) {
        let store = Arc::new(MemoryStore::with_tasks(tasks));
        let scheduler = RolloverScheduler::new(store.clone());
        (store, scheduler)
    }

    #[test]
    fn yesterday_fails_today_survives() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let yesterday = task_on(today - Duration::days(1), Recurrence::once());
        let current = task_on(today, Recurrence::once());
        let (store, scheduler) = setup(vec![yesterday.clone(), current.clone()]);

        let failed = scheduler.run_at(&OwnerScope::Anonymous, today).unwrap();

        assert_eq!(failed.len(), 1);
        assert_eq!(store.get(yesterday.id).unwrap().unwrap().status, TaskStatus::Failed);
        assert_eq!(store.get(current.id).unwrap().unwrap().status, TaskStatus::Active);
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let (_store, scheduler) = setup(vec![task_on(today - Duration::days(3), Recurrence::once())]);

        assert_eq!(scheduler.run_at(&OwnerScope::Anonymous, today).unwrap().len(), 1);
        assert!(scheduler.run_at(&OwnerScope::Anonymous, today).unwrap().is_empty());
    }

    #[test]
    fn terminal_statuses_are_left_alone() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let mut carried = task_on(today - Duration::days(2), Recurrence::once());
        carried.status = TaskStatus::CarriedForward;
        let mut completed = task_on(today - Duration::days(2), Recurrence::once());
        completed.status = TaskStatus::Completed;
        let (store, scheduler) = setup(vec![carried.clone(), completed.clone()]);

        assert!(scheduler.run_at(&OwnerScope::Anonymous, today).unwrap().is_empty());
        assert_eq!(store.get(carried.id).unwrap(), Some(carried));
        assert_eq!(store.get(completed.id).unwrap(), Some(completed));
    }

    #[test]
    fn recurring_definition_is_judged_by_its_anchor() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let daily = task_on(today - Duration::days(1), Recurrence::daily());
        let (store, scheduler) = setup(vec![daily.clone()]);

        scheduler.run_at(&OwnerScope::Anonymous, today).unwrap();
        assert_eq!(store.get(daily.id).unwrap().unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn only_the_given_scope_rolls_over() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        let anonymous = task_on(today - Duration::days(1), Recurrence::once());
        let mut owned = task_on(today - Duration::days(1), Recurrence::once());
        owned.owner_id = Some("u1".to_string());
        let (store, scheduler) = setup(vec![anonymous.clone(), owned.clone()]);

        scheduler.run_at(&OwnerScope::Owner("u1".into()), today).unwrap();

        assert_eq!(store.get(owned.id).unwrap().unwrap().status, TaskStatus::Failed);
        assert_eq!(store.get(anonymous.id).unwrap().unwrap().status, TaskStatus::Active);
    }
}
