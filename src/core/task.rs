use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recurrence::{self, Recurrence, RecurrenceKind};
use super::temporal::{self, MILLIS_PER_DAY};
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Active,
    Completed,
    Failed,
    CarriedForward,
}

impl TaskStatus {
    pub fn as_keyword(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::CarriedForward => "CARRIED",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CARRIED" => Some(Self::CarriedForward),
            _ => None,
        }
    }

    /// Completed, Failed and CarriedForward never transition again on their own.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Which rows a store operation may see or touch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerScope {
    /// Rows not yet attached to a signed-in identity.
    Anonymous,
    Owner(String),
}

impl OwnerScope {
    pub fn from_owner(owner: Option<&str>) -> Self {
        match owner {
            Some(uid) => Self::Owner(uid.to_string()),
            None => Self::Anonymous,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Owner(uid) => Some(uid),
        }
    }

    pub fn contains(&self, task: &TaskDefinition) -> bool {
        task.owner() == self.owner()
    }
}

/// A stored task record, possibly recurring. The unit of storage and sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub id: Uuid,
    pub name: String,
    /// Epoch millis of the day the task was scheduled for; the recurrence origin.
    pub anchor_date: i64,
    /// Absolute epoch millis: the anchor date combined with the chosen time of day.
    pub execution_time: i64,
    #[serde(default)]
    pub validity_label: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub recurrence: Recurrence,
}

impl TaskDefinition {
    pub fn new(
        name: impl Into<String>,
        anchor_date: i64,
        execution_time: i64,
        recurrence: Recurrence,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            anchor_date,
            execution_time,
            validity_label: default_validity_label(recurrence.kind).to_string(),
            status: TaskStatus::Active,
            owner_id: None,
            recurrence,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.recurrence.is_bounded() {
            let anchor = temporal::local_date(self.anchor_date);
            let until = temporal::local_date(self.recurrence.valid_until);
            if let (Some(anchor), Some(until)) = (anchor, until) {
                if until < anchor {
                    return Err(ValidationError::ValidUntilBeforeAnchor);
                }
            }
        }
        Ok(())
    }

    /// The owner, with an empty id read as ownerless.
    pub fn owner(&self) -> Option<&str> {
        self.owner_id.as_deref().filter(|o| !o.is_empty())
    }

    pub fn anchor_day(&self) -> Option<NaiveDate> {
        temporal::local_date(self.anchor_date)
    }

    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        recurrence::occurs_on(self, date)
    }

    pub fn with_status(&self, status: TaskStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Close this instance as CarriedForward and spawn tomorrow's Active copy.
    ///
    /// The successor gets a fresh id, is anchored one calendar day later and
    /// its execution time moves by exactly 24 hours. Recurrence, owner and
    /// label are kept, except that a recurrence ending before the new anchor
    /// is extended to it so the successor occurs at least once.
    pub fn carried_forward(&self) -> (Self, Self) {
        let closed = self.with_status(TaskStatus::CarriedForward);
        let mut successor = Self {
            id: Uuid::new_v4(),
            anchor_date: temporal::add_local_days(self.anchor_date, 1),
            execution_time: self.execution_time.saturating_add(MILLIS_PER_DAY),
            status: TaskStatus::Active,
            ..self.clone()
        };
        if successor.recurrence.valid_until < successor.anchor_date {
            successor.recurrence.valid_until = successor.anchor_date;
        }
        (closed, successor)
    }
}

/// Label shown when the user gives none.
pub fn default_validity_label(kind: RecurrenceKind) -> &'static str {
    match kind {
        RecurrenceKind::None => "One Time",
        other => other.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recurrence::WeekdaySet;
    use chrono::NaiveTime;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn make_task(anchor: NaiveDate) -> TaskDefinition {
        let time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        TaskDefinition::new(
            "Stretch",
            temporal::start_of_local_day(anchor),
            temporal::local_millis(anchor, time),
            Recurrence::weekly(WeekdaySet::parse("2,4").unwrap()),
        )
    }

    #[test]
    fn new_task_is_active_and_anonymous() {
        let task = make_task(date(2026, 3, 2));
        assert_eq!(task.status, TaskStatus::Active);
        assert!(task.owner_id.is_none());
        assert_eq!(task.validity_label, "Weekly");
        assert!(OwnerScope::Anonymous.contains(&task));
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut task = make_task(date(2026, 3, 2));
        task.name = "   ".to_string();
        assert_eq!(task.validate(), Err(ValidationError::EmptyName));
    }

    #[test]
    fn valid_until_before_anchor_is_rejected() {
        let mut task = make_task(date(2026, 3, 2));
        task.recurrence.valid_until = temporal::start_of_local_day(date(2026, 3, 1));
        assert_eq!(task.validate(), Err(ValidationError::ValidUntilBeforeAnchor));

        task.recurrence.valid_until = temporal::start_of_local_day(date(2026, 3, 2));
        assert_eq!(task.validate(), Ok(()));
    }

    #[test]
    fn carry_forward_spawns_next_day() {
        let mut task = make_task(date(2026, 3, 2));
        task.owner_id = Some("user-1".to_string());

        let (closed, next) = task.carried_forward();

        assert_eq!(closed.id, task.id);
        assert_eq!(closed.status, TaskStatus::CarriedForward);
        assert!(closed.status.is_terminal());

        assert_ne!(next.id, task.id);
        assert_eq!(next.status, TaskStatus::Active);
        assert_eq!(next.anchor_day(), Some(date(2026, 3, 3)));
        assert_eq!(next.execution_time, task.execution_time + MILLIS_PER_DAY);
        assert_eq!(next.recurrence, task.recurrence);
        assert_eq!(next.owner_id, task.owner_id);
        assert_eq!(next.name, task.name);
    }

    #[test]
    fn carry_forward_on_last_valid_day_extends_the_range() {
        let last = date(2026, 3, 2);
        let mut task = make_task(last);
        task.recurrence = Recurrence::daily().until(temporal::start_of_local_day(last));

        let (_, next) = task.carried_forward();

        assert_eq!(next.validate(), Ok(()));
        assert_eq!(temporal::local_date(next.recurrence.valid_until), Some(date(2026, 3, 3)));
        assert!(next.occurs_on(date(2026, 3, 3)));
        assert!(!next.occurs_on(date(2026, 3, 4)));
    }

    #[test]
    fn unbounded_recurrence_stays_unbounded_when_carried() {
        let mut task = make_task(date(2026, 3, 2));
        task.recurrence = Recurrence::daily();
        let (_, next) = task.carried_forward();
        assert!(!next.recurrence.is_bounded());
    }

    #[test]
    fn empty_owner_reads_as_anonymous() {
        let mut task = make_task(date(2026, 3, 2));
        task.owner_id = Some(String::new());
        assert_eq!(task.owner(), None);
        assert!(OwnerScope::Anonymous.contains(&task));
        assert!(!OwnerScope::Owner(String::new()).contains(&task));
    }

    #[test]
    fn keywords_roundtrip() {
        for status in [
            TaskStatus::Active,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::CarriedForward,
        ] {
            assert_eq!(TaskStatus::from_keyword(status.as_keyword()), Some(status));
        }
        assert_eq!(TaskStatus::from_keyword("DONE"), None);
    }

    #[test]
    fn document_fields_are_camel_case() {
        let task = make_task(date(2026, 3, 2));
        let value = serde_json::to_value(&task).unwrap();
        assert!(value.get("anchorDate").is_some());
        assert!(value.get("executionTime").is_some());
        assert_eq!(value["recurrence"]["weeklyDays"], serde_json::json!([2, 4]));
    }
}
