use crate::models::{Link, Schedule};
use chrono::{Datelike, NaiveDateTime};

// ── Evaluator ──────────────────────────────────────────────────────────────

/// Decide whether a visibility rule allows rendering at the given instant.
///
/// Permissive by construction: no rule, an `always` rule, or a rule with
/// missing bounds all evaluate to visible. Incorrectly hiding a link is
/// worse than incorrectly showing one, so nothing here can fail.
///
/// Time and date bounds are compared lexicographically on the zero-padded
/// `HH:MM` / `YYYY-MM-DD` strings, which orders the same as chronological
/// order. A `time_range` whose start is later than its end (a
/// midnight-crossing window) is therefore never true; callers relying on
/// overnight windows must split them into two rules.
///
/// The rule's stored `timezone` is not consulted; `now` is taken as-is.
pub fn schedule_allows(schedule: Option<&Schedule>, now: NaiveDateTime) -> bool {
    let Some(schedule) = schedule else {
        return true;
    };

    match schedule {
        Schedule::Always => true,

        Schedule::SpecificDays { days, .. } => match days {
            // 0 = Sunday .. 6 = Saturday
            Some(days) => days.contains(&now.weekday().num_days_from_sunday()),
            None => true,
        },

        Schedule::TimeRange {
            start_time,
            end_time,
            ..
        } => match (start_time, end_time) {
            (Some(start), Some(end)) => {
                let current = now.format("%H:%M").to_string();
                *start <= current && current <= *end
            }
            _ => true,
        },

        Schedule::OneTime {
            start_date,
            end_date,
            ..
        } => match (start_date, end_date) {
            (Some(start), Some(end)) => {
                let today = now.format("%Y-%m-%d").to_string();
                *start <= today && today <= *end
            }
            _ => true,
        },
    }
}

impl Link {
    /// `true` when the link should be rendered at `now`: it must be active
    /// and its schedule (if any) must allow the instant.
    pub fn is_visible_at(&self, now: NaiveDateTime) -> bool {
        self.is_active && schedule_allows(self.parsed_schedule().as_ref(), now)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
