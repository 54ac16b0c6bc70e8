//! One-way backfill from the legacy per-week override tables into the schedule.
//!
//! Safe to run repeatedly: explicit values already on a schedule row are
//! never overwritten, and rows are only created when absent.

use crate::config::OneTimePolicy;
use crate::error::Result;
use crate::materializer::relocate_occurrence;
use crate::recurrence::occurs_in_week;
use crate::schema::{Definition, NewScheduleEntry, ScheduleOwner};
use crate::store::BudgetStore;
use crate::utils::anchor_date_in_month;
use crate::week::WeekKey;
use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub due_dates: usize,
    pub amounts: usize,
    pub quick_expenses: usize,
}

impl BackfillReport {
    pub fn total(&self) -> usize {
        self.due_dates + self.amounts + self.quick_expenses
    }
}

/// Due date for a legacy override that has no occurrence of its own: the
/// clamped anchor in the week's starting month, else the week start.
fn fallback_due_date(def: &Definition, week: WeekKey, policy: OneTimePolicy) -> NaiveDate {
    if let Some(occurrence) = occurs_in_week(def.recurrence(), week, policy) {
        return occurrence.due_date;
    }
    let start = week.start();
    def.recurrence()
        .anchor_day
        .and_then(|anchor| anchor_date_in_month(anchor, start.year(), start.month()).ok())
        .unwrap_or(start)
}

/// Copies the legacy override tables into the schedule in one transaction.
/// A failure anywhere leaves the schedule as it was.
pub fn backfill_legacy_overrides(store: &dyn BudgetStore, policy: OneTimePolicy) -> Result<BackfillReport> {
    let mut report = BackfillReport::default();
    store.atomically(&mut |tx| {
        report = backfill(tx, policy)?;
        Ok(())
    })?;

    info!(
        "Backfilled {} due dates, {} amounts, {} quick expenses",
        report.due_dates, report.amounts, report.quick_expenses
    );
    Ok(report)
}

fn backfill(store: &dyn BudgetStore, policy: OneTimePolicy) -> Result<BackfillReport> {
    let mut report = BackfillReport::default();

    for legacy in store.list_legacy_due_dates()? {
        let Some(expense) = store.get_expense(legacy.expense_id)? else {
            warn!("Legacy due date for missing expense #{} skipped", legacy.expense_id);
            continue;
        };
        let owner = ScheduleOwner::Expense(legacy.expense_id);
        if let Some(entry) = store.find_occurrence(owner, legacy.week_key)? {
            if entry.due_date_overridden {
                continue;
            }
        }
        relocate_occurrence(store, &Definition::Expense(expense), legacy.week_key, legacy.due_date)?;
        report.due_dates += 1;
    }

    for legacy in store.list_weekly_amount_overrides()? {
        let Some(expense) = store.get_expense(legacy.expense_id)? else {
            warn!("Legacy amount for missing expense #{} skipped", legacy.expense_id);
            continue;
        };
        let def = Definition::Expense(expense);
        let owner = ScheduleOwner::Expense(legacy.expense_id);

        match store.find_occurrence(owner, legacy.week_key)? {
            Some(entry) if entry.amount_overridden => {}
            Some(mut entry) => {
                entry.amount = legacy.actual_amount;
                entry.amount_overridden = true;
                store.update_schedule_entry(&entry)?;
                report.amounts += 1;
            }
            None => {
                let due_date = fallback_due_date(&def, legacy.week_key, policy);
                let mut entry = NewScheduleEntry::calculated(
                    def.reference(),
                    def.name(),
                    legacy.week_key,
                    due_date,
                    legacy.actual_amount,
                );
                entry.amount_overridden = true;
                if store.insert_schedule_entry_if_absent(&entry)? {
                    report.amounts += 1;
                }
            }
        }
    }

    for quick in store.list_quick_expenses()? {
        if store.insert_schedule_entry_if_absent(&NewScheduleEntry::for_quick_expense(&quick))? {
            report.quick_expenses += 1;
        }
    }

    Ok(report)
}
