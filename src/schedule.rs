//! Schedule calculator
//!
//! Computes when an indicator is due next. Everything in here is pure: the
//! result only depends on the schedule, the last fire instant and the "as of"
//! instant handed in by the caller.
//!
//! ## Expressions
//!
//! Cron schedules accept the classic 5-field form (`min hour dom month dow`) as
//! well as the 6/7-field form with a leading seconds (and trailing years) field.
//! Expressions are checked once via [`validate`] when the configuration is
//! loaded; an expression that still fails to parse at evaluation time simply has
//! no next due time.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::model::ScheduleId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleKind {
    /// Fire every `minutes` after the last fire
    Interval { minutes: u32 },

    /// Fire on every match of a cron expression, evaluated in `timezone`
    Cron {
        expression: String,
        #[serde(default = "default_timezone")]
        timezone: Tz,
    },
}

fn default_timezone() -> Tz {
    Tz::UTC
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,

    #[serde(flatten)]
    pub kind: ScheduleKind,

    /// Start of the validity window (inclusive)
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,

    /// End of the validity window (inclusive)
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Bookkeeping written by the scheduler after each scheduled execution
    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub next_due_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl Schedule {
    pub fn interval(id: ScheduleId, minutes: u32) -> Self {
        Self::with_kind(id, ScheduleKind::Interval { minutes })
    }

    pub fn cron(id: ScheduleId, expression: impl Into<String>, timezone: Tz) -> Self {
        Self::with_kind(
            id,
            ScheduleKind::Cron {
                expression: expression.into(),
                timezone,
            },
        )
    }

    fn with_kind(id: ScheduleId, kind: ScheduleKind) -> Self {
        Self {
            id,
            kind,
            valid_from: None,
            valid_until: None,
            enabled: true,
            last_fired_at: None,
            next_due_at: None,
        }
    }

    pub fn next_due(
        &self,
        last_fire: Option<DateTime<Utc>>,
        as_of: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        compute_next_due(self, last_fire, as_of)
    }
}

/// Compute the next due instant of `schedule`.
///
/// Returns `None` when the schedule is disabled, expired at `as_of`, or when the
/// next candidate lies past the end of the validity window.
pub fn compute_next_due(
    schedule: &Schedule,
    last_fire: Option<DateTime<Utc>>,
    as_of: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !schedule.enabled {
        return None;
    }

    if schedule.valid_until.is_some_and(|until| as_of > until) {
        return None;
    }

    let candidate = match &schedule.kind {
        ScheduleKind::Interval { minutes } => {
            let next = last_fire.map_or(as_of, |fired| fired + Duration::minutes(*minutes as i64));
            match schedule.valid_from {
                Some(from) if next < from => from,
                _ => next,
            }
        }
        ScheduleKind::Cron {
            expression,
            timezone,
        } => {
            let cron = parse_cron(expression).ok()?;
            let mut base = last_fire.unwrap_or(as_of);
            // jump to the window start instead of walking every fire before it
            if let Some(from) = schedule.valid_from {
                base = base.max(from - Duration::seconds(1));
            }

            cron.after(&base.with_timezone(timezone))
                .map(|next| next.with_timezone(&Utc))
                .find(|next| schedule.valid_from.is_none_or(|from| *next >= from))?
        }
    };

    if schedule.valid_until.is_some_and(|until| candidate > until) {
        return None;
    }

    Some(candidate)
}

/// Check a schedule definition, returning every problem found.
pub fn validate(kind: &ScheduleKind) -> Vec<String> {
    match kind {
        ScheduleKind::Interval { minutes } => {
            if *minutes == 0 {
                vec!["interval must be at least one minute".to_string()]
            } else {
                vec![]
            }
        }
        ScheduleKind::Cron { expression, .. } => validate_expression(expression),
    }
}

pub fn validate_expression(expression: &str) -> Vec<String> {
    let fields = expression.split_whitespace().count();
    if fields == 0 {
        return vec!["cron expression is empty".to_string()];
    }

    if !(5..=7).contains(&fields) {
        return vec![format!(
            "cron expression `{expression}` has {fields} fields, expected 5 to 7"
        )];
    }

    match parse_cron(expression) {
        Ok(_) => vec![],
        Err(e) => vec![format!("invalid cron expression `{expression}`: {e}")],
    }
}

fn parse_cron(expression: &str) -> Result<cron::Schedule, cron::error::Error> {
    let expression = expression.trim();
    if expression.split_whitespace().count() == 5 {
        cron::Schedule::from_str(&format!("0 {expression}"))
    } else {
        cron::Schedule::from_str(expression)
    }
}
