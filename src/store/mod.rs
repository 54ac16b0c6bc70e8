//! Persistence for definitions, the materialized schedule and the ledger.
//!
//! The engine only talks to the [`BudgetStore`] trait; [`SqliteStore`] is the
//! shipped backend.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::backup::{BackupData, ImportCounts, ImportOptions};
use crate::error::Result;
use crate::schema::{
    ActualBalance, Definition, DefinitionRef, Expense, ExpenseDraft, Income, IncomeDraft,
    LegacyDueDate, NewScheduleEntry, Payment, QuickExpense, Rollover, ScheduleEntry,
    ScheduleOwner, WeeklyAmountOverride, WeeklyIncomeOverride,
};
use crate::week::WeekKey;
use chrono::NaiveDate;

/// Storage backend trait. All reads hit the backing store; nothing is cached.
///
/// Shared backends are additionally `Send + Sync`; the view handed out by
/// [`BudgetStore::atomically`] is bound to one open transaction and is not.
pub trait BudgetStore {
    // ---- Definitions ----

    fn insert_expense(&self, draft: &ExpenseDraft) -> Result<Expense>;

    /// Replaces every mutable field. `NotFound` when the expense does not exist.
    fn update_expense(&self, id: i64, draft: &ExpenseDraft) -> Result<Expense>;

    /// Removes the expense and, by cascade, its schedule rows, payments and legacy overrides.
    fn delete_expense(&self, id: i64) -> Result<bool>;

    fn get_expense(&self, id: i64) -> Result<Option<Expense>>;

    /// Ordered by category, then name.
    fn list_expenses(&self) -> Result<Vec<Expense>>;

    fn insert_income(&self, draft: &IncomeDraft) -> Result<Income>;

    fn update_income(&self, id: i64, draft: &IncomeDraft) -> Result<Income>;

    fn delete_income(&self, id: i64) -> Result<bool>;

    fn get_income(&self, id: i64) -> Result<Option<Income>>;

    /// Ordered by name.
    fn list_income(&self) -> Result<Vec<Income>>;

    fn get_definition(&self, reference: DefinitionRef) -> Result<Option<Definition>> {
        match reference {
            DefinitionRef::Expense(id) => Ok(self.get_expense(id)?.map(Definition::Expense)),
            DefinitionRef::Income(id) => Ok(self.get_income(id)?.map(Definition::Income)),
        }
    }

    /// Active expenses followed by active income.
    fn active_definitions(&self) -> Result<Vec<Definition>> {
        let mut definitions: Vec<Definition> = self
            .list_expenses()?
            .into_iter()
            .filter(|e| e.is_active)
            .map(Definition::Expense)
            .collect();
        definitions.extend(
            self.list_income()?
                .into_iter()
                .filter(|i| i.is_active)
                .map(Definition::Income),
        );
        Ok(definitions)
    }

    // ---- Schedule ----

    /// Inserts unless a row already exists for the same owner and week key or
    /// origin week. Returns whether a row was written.
    fn insert_schedule_entry_if_absent(&self, entry: &NewScheduleEntry) -> Result<bool>;

    /// Inserts and fails on any uniqueness conflict.
    fn insert_schedule_entry(&self, entry: &NewScheduleEntry) -> Result<ScheduleEntry>;

    fn get_schedule_entry(&self, id: i64) -> Result<Option<ScheduleEntry>>;

    /// The row standing for the definition's occurrence in `week`: the one
    /// whose origin is `week`, otherwise the one filed under `week`.
    fn find_occurrence(&self, owner: ScheduleOwner, week: WeekKey) -> Result<Option<ScheduleEntry>>;

    /// Writes week key, due date, amount, flags and note of an existing row.
    fn update_schedule_entry(&self, entry: &ScheduleEntry) -> Result<()>;

    fn delete_schedule_entries(&self, ids: &[i64]) -> Result<usize>;

    /// Rows with `from <= due_date <= to`, ordered by due date then id.
    fn schedule_entries_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ScheduleEntry>>;

    fn schedule_entries_for_owner(&self, owner: ScheduleOwner) -> Result<Vec<ScheduleEntry>>;

    fn list_schedule_entries(&self) -> Result<Vec<ScheduleEntry>>;

    /// Deletes `delete_ids` and inserts `entry` in a single transaction.
    fn replace_schedule_entries(&self, delete_ids: &[i64], entry: &NewScheduleEntry) -> Result<ScheduleEntry>;

    /// Deletes the definition's rows that carry no override.
    fn delete_calculated_entries(&self, reference: DefinitionRef) -> Result<usize>;

    // ---- Legacy overrides (read-only) ----

    fn legacy_expense_amount(&self, expense_id: i64, week: WeekKey) -> Result<Option<f64>>;

    fn legacy_income_amount(&self, income_id: i64, week: WeekKey) -> Result<Option<f64>>;

    fn list_weekly_amount_overrides(&self) -> Result<Vec<WeeklyAmountOverride>>;

    fn list_weekly_income_overrides(&self) -> Result<Vec<WeeklyIncomeOverride>>;

    fn list_legacy_due_dates(&self) -> Result<Vec<LegacyDueDate>>;

    // ---- Payments ----

    fn insert_payment(&self, expense_id: i64, week: WeekKey, amount: f64, paid_date: NaiveDate) -> Result<Payment>;

    fn delete_payment(&self, id: i64) -> Result<bool>;

    fn clear_payments(&self, expense_id: i64, week: WeekKey) -> Result<usize>;

    fn update_payment_date(&self, id: i64, paid_date: NaiveDate) -> Result<Option<Payment>>;

    fn payments_for(&self, expense_id: i64, week: WeekKey) -> Result<Vec<Payment>>;

    fn payments_for_week(&self, week: WeekKey) -> Result<Vec<Payment>>;

    fn total_paid(&self, expense_id: i64, week: WeekKey) -> Result<f64>;

    fn list_payments(&self) -> Result<Vec<Payment>>;

    // ---- Rollovers and balances ----

    fn set_rollover(&self, week: WeekKey, amount: f64) -> Result<Rollover>;

    fn get_rollover(&self, week: WeekKey) -> Result<Option<Rollover>>;

    fn delete_rollover(&self, week: WeekKey) -> Result<bool>;

    fn list_rollovers(&self) -> Result<Vec<Rollover>>;

    fn set_actual_balance(&self, week: WeekKey, balance: f64) -> Result<ActualBalance>;

    fn get_actual_balance(&self, week: WeekKey) -> Result<Option<ActualBalance>>;

    fn delete_actual_balance(&self, week: WeekKey) -> Result<bool>;

    fn list_actual_balances(&self) -> Result<Vec<ActualBalance>>;

    // ---- Quick expenses ----

    /// Inserts the quick expense together with its schedule row.
    fn insert_quick_expense(&self, week: WeekKey, name: &str, amount: f64, note: Option<&str>) -> Result<QuickExpense>;

    fn get_quick_expense(&self, id: i64) -> Result<Option<QuickExpense>>;

    fn delete_quick_expense(&self, id: i64) -> Result<bool>;

    fn quick_expenses_for_week(&self, week: WeekKey) -> Result<Vec<QuickExpense>>;

    fn list_quick_expenses(&self) -> Result<Vec<QuickExpense>>;

    // ---- Bulk ----

    /// Writes a whole backup in one transaction; any failure leaves the store untouched.
    fn import_backup(&self, data: &BackupData, options: &ImportOptions) -> Result<ImportCounts>;

    /// Runs `work` against a view of this store inside one transaction.
    /// Everything `work` wrote is rolled back when it returns an error.
    /// Nested calls are allowed.
    fn atomically(&self, work: &mut dyn FnMut(&dyn BudgetStore) -> Result<()>) -> Result<()>;
}
