//! Pure occurrence calculation. Nothing here touches the store.

use crate::config::OneTimePolicy;
use crate::schema::{Frequency, RecurrenceRule};
use crate::utils::{effective_due_day, first_anchor_on_or_after, weeks_between, weeks_since_year_start};
use crate::week::WeekKey;
use chrono::{Datelike, NaiveDate, Weekday};
use log::warn;

/// A rule's occurrence inside one week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekOccurrence {
    pub due_date: NaiveDate,
    /// The rule lacked data it needed and a fallback decided the outcome.
    pub degraded: bool,
}

impl WeekOccurrence {
    fn exact(due_date: NaiveDate) -> Self {
        Self {
            due_date,
            degraded: false,
        }
    }
}

/// Maps 0 = Sunday .. 6 = Saturday.
pub fn weekday_from_sunday(day: u32) -> Option<Weekday> {
    match day {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// Whether the rule occurs in `week`, and on which day.
pub fn occurs_in_week(rule: &RecurrenceRule, week: WeekKey, policy: OneTimePolicy) -> Option<WeekOccurrence> {
    match rule.frequency {
        Frequency::Weekly => Some(WeekOccurrence::exact(weekday_due_date(rule, week))),
        Frequency::Biweekly => biweekly_occurrence(rule, week),
        Frequency::Monthly => rule
            .anchor_day
            .and_then(|anchor| monthly_due_date(anchor, week))
            .map(WeekOccurrence::exact),
        Frequency::OneTime => one_time_occurrence(rule, week, policy),
    }
}

/// Pay day, else the clamped anchor day, else the first day of the week.
fn weekday_due_date(rule: &RecurrenceRule, week: WeekKey) -> NaiveDate {
    if let Some(weekday) = rule.pay_day.and_then(weekday_from_sunday) {
        return week.day(weekday);
    }
    rule.anchor_day
        .and_then(|anchor| monthly_due_date(anchor, week))
        .unwrap_or_else(|| week.start())
}

fn biweekly_occurrence(rule: &RecurrenceRule, week: WeekKey) -> Option<WeekOccurrence> {
    let (elapsed, degraded) = match rule.start_date {
        Some(start) => (weeks_between(start, week.start()), false),
        None => {
            warn!(
                "Biweekly rule without start_date; using calendar-year parity for week {}",
                week
            );
            (weeks_since_year_start(week.start()), true)
        }
    };

    if elapsed.rem_euclid(2) != 0 {
        return None;
    }

    Some(WeekOccurrence {
        due_date: weekday_due_date(rule, week),
        degraded,
    })
}

/// The day of the week matching the anchor, each day tested against its own month.
pub fn monthly_due_date(anchor_day: u32, week: WeekKey) -> Option<NaiveDate> {
    week.days()
        .find(|day| day.day() == effective_due_day(anchor_day, day.year(), day.month()))
}

fn one_time_occurrence(rule: &RecurrenceRule, week: WeekKey, policy: OneTimePolicy) -> Option<WeekOccurrence> {
    let anchor = rule.anchor_day?;

    if policy == OneTimePolicy::RecurMonthly {
        return monthly_due_date(anchor, week).map(WeekOccurrence::exact);
    }

    match rule.start_date {
        Some(start) => {
            let due = first_anchor_on_or_after(anchor, start).ok()?;
            week.contains(due).then(|| WeekOccurrence::exact(due))
        }
        None => {
            warn!("One-time rule without start_date; treating as monthly for week {}", week);
            monthly_due_date(anchor, week).map(|due_date| WeekOccurrence {
                due_date,
                degraded: true,
            })
        }
    }
}
