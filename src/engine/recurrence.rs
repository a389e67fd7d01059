// ==========================================
// Recurrence Engine
// ==========================================
// Pure expansion of a RecurrenceRule into concrete occurrence
// datetimes: deterministic, side-effect free, strictly increasing,
// deduplicated. Generation is always capped by the hard ceiling even
// when the rule carries its own bounds.
// ==========================================

use crate::domain::schedule::RecurrenceRule;
use crate::domain::types::RecurrenceKind;
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("invalid recurrence rule: {0}")]
    InvalidRule(String),
}

pub struct RecurrenceEngine {
    hard_ceiling: u32,
}

impl RecurrenceEngine {
    pub fn new(hard_ceiling: u32) -> Self {
        Self { hard_ceiling }
    }

    /// Reject malformed rules: zero interval, weekday values outside 0..=6.
    pub fn validate(&self, rule: &RecurrenceRule) -> Result<(), RecurrenceError> {
        if rule.interval == 0 {
            return Err(RecurrenceError::InvalidRule(
                "interval must be positive".to_string(),
            ));
        }
        if rule.kind == RecurrenceKind::Weekly {
            if let Some(bad) = rule.days_of_week.iter().find(|d| **d > 6) {
                return Err(RecurrenceError::InvalidRule(format!(
                    "weekday {bad} out of range 0..=6 (0=Monday)"
                )));
            }
        }
        Ok(())
    }

    /// Expand the rule into occurrence datetimes in (inclusive) order,
    /// bounded by `horizon`, the rule's own end_date / max_occurrences,
    /// and the hard ceiling — whichever is hit first.
    ///
    /// An anchor already past every bound yields an empty sequence, not
    /// an error.
    pub fn expand(
        &self,
        rule: &RecurrenceRule,
        anchor: NaiveDateTime,
        horizon: NaiveDateTime,
    ) -> Result<Vec<NaiveDateTime>, RecurrenceError> {
        self.expand_bounded(rule, anchor, Some(horizon))
    }

    /// Total number of occurrences the rule can ever produce from the
    /// anchor (bounded only by the rule itself and the hard ceiling).
    /// Drives the completion check of the lifecycle manager.
    pub fn planned_total(
        &self,
        rule: &RecurrenceRule,
        anchor: NaiveDateTime,
    ) -> Result<usize, RecurrenceError> {
        Ok(self.expand_bounded(rule, anchor, None)?.len())
    }

    fn expand_bounded(
        &self,
        rule: &RecurrenceRule,
        anchor: NaiveDateTime,
        horizon: Option<NaiveDateTime>,
    ) -> Result<Vec<NaiveDateTime>, RecurrenceError> {
        self.validate(rule)?;

        let cap = rule
            .max_occurrences
            .map_or(self.hard_ceiling, |m| m.min(self.hard_ceiling))
            as usize;

        let mut out: Vec<NaiveDateTime> = Vec::new();
        let mut emit = |candidate: NaiveDateTime| -> bool {
            // false = a bound was hit, stop generating
            if out.len() >= cap {
                return false;
            }
            if let Some(end) = rule.end_date {
                if candidate.date() >= end {
                    return false;
                }
            }
            if let Some(h) = horizon {
                if candidate > h {
                    return false;
                }
            }
            // strictly increasing, deduplicated
            if out.last().is_some_and(|last| *last >= candidate) {
                return true;
            }
            out.push(candidate);
            true
        };

        match rule.kind {
            RecurrenceKind::None => {
                emit(anchor);
            }
            RecurrenceKind::Daily => {
                let mut current = anchor;
                loop {
                    if !emit(current) {
                        break;
                    }
                    current = match current.checked_add_days(Days::new(rule.interval as u64)) {
                        Some(next) => next,
                        None => break,
                    };
                }
            }
            RecurrenceKind::Weekly => {
                let mut days: Vec<u8> = if rule.days_of_week.is_empty() {
                    vec![anchor.weekday().num_days_from_monday() as u8]
                } else {
                    rule.days_of_week.clone()
                };
                days.sort_unstable();
                days.dedup();

                // Monday of the anchor's week
                let week_start = anchor.date()
                    - Days::new(anchor.weekday().num_days_from_monday() as u64);
                let time = anchor.time();

                'weeks: for week_index in 0u64.. {
                    let week = match week_start
                        .checked_add_days(Days::new(week_index * 7 * rule.interval as u64))
                    {
                        Some(w) => w,
                        None => break,
                    };
                    for day in &days {
                        let candidate = (week + Days::new(*day as u64)).and_time(time);
                        if candidate < anchor {
                            // only happens inside the anchor's own week
                            continue;
                        }
                        if !emit(candidate) {
                            break 'weeks;
                        }
                    }
                }
            }
            RecurrenceKind::Monthly => {
                let day_of_month = anchor.day();
                let time = anchor.time();
                let base_months = anchor.year() as i64 * 12 + anchor.month0() as i64;

                for step in 0i64.. {
                    let months = base_months + step * rule.interval as i64;
                    let year = months.div_euclid(12) as i32;
                    let month = months.rem_euclid(12) as u32 + 1;
                    // clamp to the month's last day instead of skipping
                    let day = day_of_month.min(days_in_month(year, month));
                    let candidate = match NaiveDate::from_ymd_opt(year, month, day) {
                        Some(d) => d.and_time(time),
                        None => break,
                    };
                    if !emit(candidate) {
                        break;
                    }
                }
            }
        }

        Ok(out)
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match next.and_then(|d| d.pred_opt()) {
        Some(last) => last.day(),
        None => 28,
    }
}
