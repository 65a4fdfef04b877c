//! Cron pattern types for the conveyor job engine.
//!
//! A schedule file is a list of lines in a reduced crontab dialect:
//!
//! ```text
//! ┌───────────── minute (0 - 59)
//! │ ┌───────────── hour (0 - 23)
//! │ │ ┌───────────── day of the month (1 - 31)
//! │ │ │ ┌───────────── month (1 - 12)
//! │ │ │ │ ┌───────────── day of the week (0 - 6, Sunday to Saturday)
//! │ │ │ │ │ ┌───────────── worker identifier to insert
//! │ │ │ │ │ │      ┌────────── optional options (`?key=value&key=value`)
//! │ │ │ │ │ │      │      ┌────── optional JSON args object
//! * * * * * worker ?opts  {"a": 1}
//! ```
//!
//! The first five fields accept a number, `*`, `*/n` steps, `lo-hi` ranges,
//! and comma-separated combinations of those. Comment lines start with `#`.
//!
//! Supported options: `id` (stable identifier for the rule), `queue`,
//! `max` (max attempts override) and `priority`.

use chrono::prelude::*;
use getset::Getters;

mod parse;

pub use parse::{parse_cron, ScheduleParseError};

/// One field of a cron pattern.
#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub enum CronValue {
    Number(u32),
    Range(u32, u32),
    Step(u32),
    #[default]
    Any,
}

/// The five time fields of a cron pattern.
#[derive(Debug, PartialEq, Eq, Clone, Getters)]
#[getset(get = "pub")]
pub struct CronTimer {
    pub minutes: Vec<CronValue>,
    pub hours: Vec<CronValue>,
    pub days: Vec<CronValue>,
    pub months: Vec<CronValue>,
    /// Days of week, 0 = Sunday.
    pub dows: Vec<CronValue>,
}

/// Per-rule overrides parsed from the `?opts` segment.
#[derive(Debug, PartialEq, Eq, Default, Clone, Getters)]
#[getset(get = "pub")]
pub struct CronOptions {
    /// Stable identifier for this rule. Defaults to the worker identifier;
    /// required when the same worker is scheduled by more than one rule.
    pub id: Option<String>,
    /// Queue override for the inserted job.
    pub queue: Option<String>,
    /// Max attempts override for the inserted job.
    pub max: Option<u32>,
    /// Priority override for the inserted job.
    pub priority: Option<i32>,
}

/// A single parsed schedule rule: a time pattern, the worker to insert,
/// and an optional args template.
#[derive(Debug, PartialEq, Clone, Getters, Default)]
#[getset(get = "pub")]
pub struct CronEntry {
    pub timer: CronTimer,
    pub worker: String,
    pub options: CronOptions,
    pub args: Option<serde_json::Value>,
}

impl Default for CronTimer {
    fn default() -> Self {
        Self {
            minutes: vec![CronValue::default()],
            hours: vec![CronValue::default()],
            days: vec![CronValue::default()],
            months: vec![CronValue::default()],
            dows: vec![CronValue::default()],
        }
    }
}

impl CronValue {
    fn matches(&self, value: u32, step_offset: u32) -> bool {
        match self {
            CronValue::Number(n) => &value == n,
            CronValue::Range(low, high) => &value >= low && &value <= high,
            // A zero divider never matches; the parser rejects it up front.
            CronValue::Step(0) => false,
            CronValue::Step(n) => (value % n) == step_offset,
            CronValue::Any => true,
        }
    }
}

impl CronTimer {
    /// Check whether the timer matches the given wall-clock minute.
    ///
    /// ```rust
    /// use conveyor_schedule::{CronTimer, CronValue};
    ///
    /// let timer = CronTimer {
    ///     minutes: vec![CronValue::Number(30)],
    ///     hours: vec![CronValue::Range(8, 10)],
    ///     ..Default::default()
    /// };
    /// assert!(timer.should_run_at(&"2026-03-02T08:30:00".parse().unwrap()));
    /// assert!(!timer.should_run_at(&"2026-03-02T11:30:00".parse().unwrap()));
    /// ```
    pub fn should_run_at(&self, at: &NaiveDateTime) -> bool {
        self.minutes.iter().any(|v| v.matches(at.minute(), 0))
            && self.hours.iter().any(|v| v.matches(at.hour(), 0))
            && self.days.iter().any(|v| v.matches(at.day(), 1))
            && self.months.iter().any(|v| v.matches(at.month(), 1))
            && self
                .dows
                .iter()
                .any(|v| v.matches(at.weekday().num_days_from_sunday(), 0))
    }
}

impl CronEntry {
    /// Shortcut to the timer check.
    pub fn should_run_at(&self, at: &NaiveDateTime) -> bool {
        self.timer.should_run_at(at)
    }

    /// Identifier used to track this rule: the explicit `id` option when
    /// present, the worker identifier otherwise.
    pub fn identifier(&self) -> &str {
        self.options.id.as_deref().unwrap_or(self.worker.as_str())
    }
}
