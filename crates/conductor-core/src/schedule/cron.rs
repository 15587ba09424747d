//! Five-field cron expressions.
//!
//! Grammar per field: `*`, a literal, a comma list, a range `a-b`, or a step
//! `*/n` / `a-b/n`. Fields are minute (0-59), hour (0-23), day of month
//! (1-31), month (1-12), and weekday (0-6, 0 = Sunday). A time matches when
//! all five fields match. All evaluation is in UTC.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};

/// How far `next_run` scans before giving up.
pub const NEXT_RUN_HORIZON_DAYS: i64 = 4 * 366;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const FIELDS: [FieldSpec; 5] = [
    FieldSpec { name: "minute", min: 0, max: 59 },
    FieldSpec { name: "hour", min: 0, max: 23 },
    FieldSpec { name: "day", min: 1, max: 31 },
    FieldSpec { name: "month", min: 1, max: 12 },
    FieldSpec { name: "weekday", min: 0, max: 6 },
];

// ---------------------------------------------------------------------------
// CronSchedule
// ---------------------------------------------------------------------------

/// A parsed expression: one sorted set of accepted values per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    pub minute: BTreeSet<u32>,
    pub hour: BTreeSet<u32>,
    pub day: BTreeSet<u32>,
    pub month: BTreeSet<u32>,
    pub weekday: BTreeSet<u32>,
}

impl CronSchedule {
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        self.minute.contains(&at.minute())
            && self.hour.contains(&at.hour())
            && self.day.contains(&at.day())
            && self.month.contains(&at.month())
            && self.weekday.contains(&at.weekday().num_days_from_sunday())
    }

    /// First matching minute strictly after `after`, within the horizon.
    ///
    /// Walks forward in whole minutes, jumping over months, days, and hours
    /// that cannot match.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let horizon = after.timestamp() + NEXT_RUN_HORIZON_DAYS * 86_400;
        let first = after.timestamp().div_euclid(60) * 60 + 60;
        let mut t = DateTime::<Utc>::from_timestamp(first, 0)?;

        while t.timestamp() <= horizon {
            if !self.month.contains(&t.month()) {
                t = start_of_next_month(&t)?;
                continue;
            }
            if !self.day.contains(&t.day())
                || !self.weekday.contains(&t.weekday().num_days_from_sunday())
            {
                t = DateTime::<Utc>::from_timestamp(next_boundary(t.timestamp(), 86_400), 0)?;
                continue;
            }
            if !self.hour.contains(&t.hour()) {
                t = DateTime::<Utc>::from_timestamp(next_boundary(t.timestamp(), 3_600), 0)?;
                continue;
            }
            if !self.minute.contains(&t.minute()) {
                t = DateTime::<Utc>::from_timestamp(t.timestamp() + 60, 0)?;
                continue;
            }
            return Some(t);
        }
        None
    }
}

fn next_boundary(ts: i64, unit: i64) -> i64 {
    ts.div_euclid(unit) * unit + unit
}

fn start_of_next_month(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    let midnight = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

// ---------------------------------------------------------------------------
// CronParser
// ---------------------------------------------------------------------------

pub struct CronParser;

impl CronParser {
    pub fn parse(expr: &str) -> Result<CronSchedule, CronError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronError::FieldCount(parts.len()));
        }

        let sets = parts
            .iter()
            .zip(FIELDS.iter())
            .map(|(part, spec)| parse_field(part, spec))
            .collect::<Result<Vec<_>, _>>()?;
        let [minute, hour, day, month, weekday]: [BTreeSet<u32>; 5] = sets
            .try_into()
            .map_err(|v: Vec<_>| CronError::FieldCount(v.len()))?;

        Ok(CronSchedule {
            minute,
            hour,
            day,
            month,
            weekday,
        })
    }

    /// Whether `at` matches `expr`. An unparseable expression never matches.
    pub fn matches(expr: &str, at: &DateTime<Utc>) -> bool {
        Self::parse(expr).is_ok_and(|s| s.matches(at))
    }

    /// Next matching time strictly after `after` (default now).
    ///
    /// `None` if the expression is invalid or nothing matches within
    /// `NEXT_RUN_HORIZON_DAYS`.
    pub fn next_run(expr: &str, after: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        Self::parse(expr)
            .ok()?
            .next_after(after.unwrap_or_else(Utc::now))
    }
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<BTreeSet<u32>, CronError> {
    let invalid = |reason: String| CronError::InvalidField {
        field: spec.name,
        value: field.to_string(),
        reason,
    };

    let mut values = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("bad step '{step}'")))?;
                if step == 0 {
                    return Err(invalid("step must be greater than zero".to_string()));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a = parse_value(a, spec).map_err(&invalid)?;
            let b = parse_value(b, spec).map_err(&invalid)?;
            if a > b {
                return Err(invalid(format!("range start {a} exceeds end {b}")));
            }
            (a, b)
        } else {
            if step.is_some() {
                return Err(invalid("a step needs '*' or a range".to_string()));
            }
            let v = parse_value(range, spec).map_err(&invalid)?;
            (v, v)
        };

        values.extend((start..=end).step_by(step.unwrap_or(1) as usize));
    }
    Ok(values)
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, String> {
    let v: u32 = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
    if v < spec.min || v > spec.max {
        return Err(format!("{v} outside {}-{}", spec.min, spec.max));
    }
    Ok(v)
}
