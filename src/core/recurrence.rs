use chrono::{Datelike, Local, NaiveDate, TimeZone, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::task::TaskDefinition;
use super::temporal::{self, UNBOUNDED};

/// How a definition repeats after its anchor date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecurrenceKind {
    /// Occurs only on the anchor date.
    #[default]
    None,
    Daily,
    /// On the weekdays listed in `weekly_days`.
    Weekly,
    /// On the anchor's day of month. A 31st-anchored task skips shorter months.
    Monthly,
}

impl RecurrenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
        }
    }
}

impl fmt::Display for RecurrenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of ISO weekdays (1 = Monday ... 7 = Sunday), stored as a bitmask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_weekdays(days: impl IntoIterator<Item = Weekday>) -> Self {
        let mut set = Self::empty();
        for day in days {
            set.insert(day);
        }
        set
    }

    /// Parse a comma-separated list of ISO weekday numbers, e.g. "1,3,5".
    pub fn parse(s: &str) -> Option<Self> {
        let mut numbers = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            numbers.push(part.parse::<u8>().ok()?);
        }
        Self::try_from(numbers).ok()
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// ISO numbers of the contained weekdays, ascending.
    pub fn numbers(&self) -> Vec<u8> {
        (1..=7u8).filter(|n| self.0 & (1 << (n - 1)) != 0).collect()
    }
}

impl fmt::Debug for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.numbers()).finish()
    }
}

impl TryFrom<Vec<u8>> for WeekdaySet {
    type Error = String;

    fn try_from(numbers: Vec<u8>) -> Result<Self, Self::Error> {
        let mut bits = 0u8;
        for n in numbers {
            if !(1..=7).contains(&n) {
                return Err(format!("weekday {} out of range 1..=7", n));
            }
            bits |= 1 << (n - 1);
        }
        Ok(Self(bits))
    }
}

impl From<WeekdaySet> for Vec<u8> {
    fn from(set: WeekdaySet) -> Self {
        set.numbers()
    }
}

fn unbounded() -> i64 {
    UNBOUNDED
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    pub kind: RecurrenceKind,
    /// Only consulted for `Weekly`; empty means the definition never occurs.
    #[serde(default)]
    pub weekly_days: WeekdaySet,
    /// Last day (inclusive, date-truncated) the definition may occur on.
    #[serde(default = "unbounded")]
    pub valid_until: i64,
}

impl Default for Recurrence {
    fn default() -> Self {
        Self::once()
    }
}

impl Recurrence {
    pub fn once() -> Self {
        Self {
            kind: RecurrenceKind::None,
            weekly_days: WeekdaySet::empty(),
            valid_until: UNBOUNDED,
        }
    }

    pub fn daily() -> Self {
        Self {
            kind: RecurrenceKind::Daily,
            ..Self::once()
        }
    }

    pub fn weekly(days: WeekdaySet) -> Self {
        Self {
            kind: RecurrenceKind::Weekly,
            weekly_days: days,
            valid_until: UNBOUNDED,
        }
    }

    pub fn monthly() -> Self {
        Self {
            kind: RecurrenceKind::Monthly,
            ..Self::once()
        }
    }

    pub fn until(mut self, valid_until: i64) -> Self {
        self.valid_until = valid_until;
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.valid_until != UNBOUNDED
    }
}

/// A definition materialised on a concrete calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub definition: TaskDefinition,
    pub date: NaiveDate,
    /// The definition's time of day on `date`, as epoch millis.
    pub execution_at: i64,
}

/// Whether `definition` occurs on `date` in the device's current zone.
pub fn occurs_on(definition: &TaskDefinition, date: NaiveDate) -> bool {
    occurs_on_in(definition, date, &Local)
}

pub fn occurs_on_in<Tz: TimeZone>(definition: &TaskDefinition, date: NaiveDate, tz: &Tz) -> bool {
    let Some(anchor) = temporal::date_in(definition.anchor_date, tz) else {
        return false;
    };
    let rule = &definition.recurrence;
    // Timestamps past chrono's range (the unbounded sentinel) never cut off.
    let valid_until = temporal::date_in(rule.valid_until, tz).unwrap_or(NaiveDate::MAX);

    if date < anchor || date > valid_until {
        return false;
    }

    match rule.kind {
        RecurrenceKind::None => date == anchor,
        RecurrenceKind::Daily => true,
        RecurrenceKind::Weekly => rule.weekly_days.contains(date.weekday()),
        RecurrenceKind::Monthly => date.day() == anchor.day(),
    }
}

/// Materialise `definition` on `date`, if it occurs there.
pub fn occurrence_on(definition: &TaskDefinition, date: NaiveDate) -> Option<Occurrence> {
    if !occurs_on(definition, date) {
        return None;
    }
    let execution_at = match temporal::local_time_of_day(definition.execution_time) {
        Some(time) => temporal::local_millis(date, time),
        None => definition.execution_time,
    };
    Some(Occurrence {
        definition: definition.clone(),
        date,
        execution_at,
    })
}
