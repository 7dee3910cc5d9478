use chrono::{Datelike, Duration, NaiveDate};

use super::task::{TaskDefinition, TaskStatus};

/// Completion progress of the tasks anchored on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayProgress {
    pub date: NaiveDate,
    pub total: usize,
    pub completed: usize,
}

impl DayProgress {
    pub fn build(tasks: &[TaskDefinition], date: NaiveDate) -> Self {
        let mut total = 0;
        let mut completed = 0;
        for task in tasks.iter().filter(|t| t.anchor_day() == Some(date)) {
            total += 1;
            if task.status == TaskStatus::Completed {
                completed += 1;
            }
        }
        Self {
            date,
            total,
            completed,
        }
    }

    /// Fraction in `0.0..=1.0`; zero for a day with no tasks.
    pub fn ratio(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f32 / self.total as f32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsRange {
    /// Monday through Sunday of the current week.
    Weekly,
    /// The current calendar month.
    Monthly,
}

impl StatsRange {
    /// Inclusive bounds of the range containing `today`.
    pub fn bounds(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Self::Weekly => {
                let start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
                (start, start + Duration::days(6))
            }
            Self::Monthly => {
                let start = today.with_day(1).unwrap_or(today);
                let next_month = if start.month() == 12 {
                    NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
                };
                let end = next_month.and_then(|d| d.pred_opt()).unwrap_or(today);
                (start, end)
            }
        }
    }
}

/// Status breakdown of the tasks anchored within a week or month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics {
    pub range: StatsRange,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub carried_forward: usize,
}

impl Statistics {
    pub fn build(tasks: &[TaskDefinition], today: NaiveDate, range: StatsRange) -> Self {
        let (start, end) = range.bounds(today);
        let mut stats = Self {
            range,
            start,
            end,
            total: 0,
            active: 0,
            completed: 0,
            failed: 0,
            carried_forward: 0,
        };

        for task in tasks {
            let Some(day) = task.anchor_day() else {
                continue;
            };
            if day < start || day > end {
                continue;
            }
            stats.total += 1;
            match task.status {
                TaskStatus::Active => stats.active += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::CarriedForward => stats.carried_forward += 1,
            }
        }

        stats
    }

    /// Whole-number completion percentage, 0 when the range is empty.
    pub fn completion_percent(&self) -> u32 {
        if self.total == 0 {
            0
        } else {
            (self.completed * 100 / self.total) as u32
        }
    }
}
