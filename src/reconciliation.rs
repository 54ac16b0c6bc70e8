//! Weekly totals over the materialized schedule.
//!
//! Figures are plain `f64` sums with no rounding.

use crate::config::OneTimePolicy;
use crate::error::Result;
use crate::materializer::{materialize_week, WeekSchedule};
use crate::recurrence::occurs_in_week;
use crate::schema::{Definition, ScheduleOwner};
use crate::store::BudgetStore;
use crate::week::WeekKey;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Next week computed from the rules alone, at base amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NextWeekOutlook {
    pub week_key: WeekKey,
    pub income: f64,
    pub expenses: f64,
    pub base_remaining: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NextWeekWarning {
    pub week_key: WeekKey,
    pub shortfall: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WeekSummary {
    pub week_key: WeekKey,
    pub weekly_income: f64,
    pub total_expenses: f64,
    pub total_paid: f64,
    pub total_unpaid: f64,
    pub rollover: f64,
    pub total_available: f64,
    pub discretionary: f64,
    pub remaining: f64,
    pub actual_balance: Option<f64>,
    #[schemars(description = "remaining - actual_balance; absent without a recorded balance")]
    pub untracked: Option<f64>,
    pub next_week: NextWeekOutlook,
    pub next_week_warning: Option<NextWeekWarning>,
    pub safe_to_spend: f64,
}

pub fn summarize_week(store: &dyn BudgetStore, week: WeekKey, policy: OneTimePolicy) -> Result<WeekSummary> {
    let schedule = materialize_week(store, week, policy)?;
    summarize_schedule(store, &schedule, policy)
}

/// Totals for an already materialized week.
pub fn summarize_schedule(
    store: &dyn BudgetStore,
    schedule: &WeekSchedule,
    policy: OneTimePolicy,
) -> Result<WeekSummary> {
    let week = schedule.week_key;

    let weekly_income: f64 = schedule.income().map(|e| e.amount).sum();
    let total_expenses: f64 = schedule
        .entries
        .iter()
        .filter(|e| e.owner.is_expense_side())
        .map(|e| e.amount)
        .sum();

    let mut total_paid = 0.0;
    for entry in &schedule.entries {
        match entry.owner {
            ScheduleOwner::Expense(id) => {
                total_paid += store.total_paid(id, week)?.min(entry.amount);
            }
            // Quick expenses are money already spent
            ScheduleOwner::QuickExpense(_) => total_paid += entry.amount,
            ScheduleOwner::Income(_) => {}
        }
    }

    let rollover = store
        .get_rollover(week)?
        .map(|r| r.rollover_amount)
        .unwrap_or(0.0);
    let total_available = weekly_income + rollover;
    let discretionary = total_available - total_expenses;
    let remaining = discretionary;

    let actual_balance = store.get_actual_balance(week)?.map(|b| b.actual_balance);
    let untracked = actual_balance.map(|balance| remaining - balance);

    let next_week = next_week_outlook(store, week.next(), policy)?;
    let next_week_warning = (next_week.base_remaining < 0.0).then(|| NextWeekWarning {
        week_key: next_week.week_key,
        shortfall: -next_week.base_remaining,
        message: format!(
            "Week of {} is short by {} at base amounts",
            next_week.week_key, -next_week.base_remaining
        ),
    });
    let safe_to_spend = (remaining + next_week.base_remaining).max(0.0);

    debug!(
        "Week {} summary: income {}, expenses {}, remaining {}, safe to spend {}",
        week, weekly_income, total_expenses, remaining, safe_to_spend
    );

    Ok(WeekSummary {
        week_key: week,
        weekly_income,
        total_expenses,
        total_paid,
        total_unpaid: total_expenses - total_paid,
        rollover,
        total_available,
        discretionary,
        remaining,
        actual_balance,
        untracked,
        next_week,
        next_week_warning,
        safe_to_spend,
    })
}

/// Read-only projection: no overrides, no schedule writes.
pub fn next_week_outlook(store: &dyn BudgetStore, week: WeekKey, policy: OneTimePolicy) -> Result<NextWeekOutlook> {
    let mut income = 0.0;
    let mut expenses = 0.0;

    for def in store.active_definitions()? {
        if occurs_in_week(def.recurrence(), week, policy).is_none() {
            continue;
        }
        match def {
            Definition::Expense(e) => expenses += e.amount,
            Definition::Income(i) => income += i.amount,
        }
    }

    for quick in store.quick_expenses_for_week(week)? {
        expenses += quick.amount;
    }

    Ok(NextWeekOutlook {
        week_key: week,
        income,
        expenses,
        base_remaining: income - expenses,
    })
}
