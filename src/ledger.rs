//! Append-only payment ledger. Totals are always summed from the store.

use crate::config::OverpaymentPolicy;
use crate::error::{BudgetError, Result};
use crate::overrides::resolve_amount;
use crate::schema::{Definition, Payment};
use crate::store::BudgetStore;
use crate::week::WeekKey;
use chrono::{NaiveDate, Utc};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Unpaid,
    Partial,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PaymentStatus {
    pub expense_id: i64,
    pub week_key: WeekKey,
    pub total_paid: f64,
    pub resolved_amount: f64,
    pub state: PaymentState,
    /// How far the payments exceed the resolved amount; zero when they do not.
    pub overpaid_by: f64,
}

impl PaymentState {
    pub fn classify(total_paid: f64, resolved_amount: f64) -> Self {
        if total_paid >= resolved_amount {
            Self::Paid
        } else if total_paid > 0.0 {
            Self::Partial
        } else {
            Self::Unpaid
        }
    }
}

fn require_expense(store: &dyn BudgetStore, expense_id: i64) -> Result<Definition> {
    store
        .get_expense(expense_id)?
        .map(Definition::Expense)
        .ok_or_else(|| BudgetError::not_found("Expense", expense_id))
}

pub fn add_payment(
    store: &dyn BudgetStore,
    expense_id: i64,
    week: WeekKey,
    amount: f64,
    paid_date: Option<NaiveDate>,
    policy: OverpaymentPolicy,
) -> Result<Payment> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(BudgetError::validation(
            "amount",
            format!("payment must be a positive amount, got {}", amount),
        ));
    }
    let expense = require_expense(store, expense_id)?;

    if policy == OverpaymentPolicy::Reject {
        let resolved = resolve_amount(store, &expense, week)?.amount;
        let already_paid = store.total_paid(expense_id, week)?;
        if already_paid + amount > resolved {
            return Err(BudgetError::validation(
                "amount",
                format!(
                    "payment of {} exceeds the {} outstanding on {}",
                    amount,
                    (resolved - already_paid).max(0.0),
                    expense.name()
                ),
            ));
        }
    }

    let paid_date = paid_date.unwrap_or_else(|| Utc::now().date_naive());
    let payment = store.insert_payment(expense_id, week, amount, paid_date)?;
    info!(
        "Recorded payment #{} of {} on expense #{} for week {}",
        payment.id, amount, expense_id, week
    );
    Ok(payment)
}

pub fn total_paid(store: &dyn BudgetStore, expense_id: i64, week: WeekKey) -> Result<f64> {
    store.total_paid(expense_id, week)
}

pub fn payment_status(store: &dyn BudgetStore, expense_id: i64, week: WeekKey) -> Result<PaymentStatus> {
    let expense = require_expense(store, expense_id)?;
    let resolved_amount = resolve_amount(store, &expense, week)?.amount;
    let total_paid = store.total_paid(expense_id, week)?;

    Ok(PaymentStatus {
        expense_id,
        week_key: week,
        total_paid,
        resolved_amount,
        state: PaymentState::classify(total_paid, resolved_amount),
        overpaid_by: (total_paid - resolved_amount).max(0.0),
    })
}

pub fn delete_payment(store: &dyn BudgetStore, payment_id: i64) -> Result<()> {
    if !store.delete_payment(payment_id)? {
        return Err(BudgetError::not_found("Payment", payment_id));
    }
    info!("Deleted payment #{}", payment_id);
    Ok(())
}

pub fn clear_payments(store: &dyn BudgetStore, expense_id: i64, week: WeekKey) -> Result<usize> {
    let removed = store.clear_payments(expense_id, week)?;
    info!(
        "Cleared {} payments on expense #{} for week {}",
        removed, expense_id, week
    );
    Ok(removed)
}

/// Changes the recorded paid date; amounts are never edited in place.
pub fn correct_paid_date(store: &dyn BudgetStore, payment_id: i64, paid_date: NaiveDate) -> Result<Payment> {
    let payment = store
        .update_payment_date(payment_id, paid_date)?
        .ok_or_else(|| BudgetError::not_found("Payment", payment_id))?;
    info!("Payment #{} paid date corrected to {}", payment_id, paid_date);
    Ok(payment)
}

pub fn payments_for_week(store: &dyn BudgetStore, week: WeekKey) -> Result<Vec<Payment>> {
    store.payments_for_week(week)
}
