use crate::backup::{self, BackupDocument, ImportCounts, ImportOptions};
use crate::config::BudgetConfig;
use crate::crosscheck::{self, CrosscheckReport};
use crate::error::{BudgetError, Result};
use crate::ledger::{self, PaymentStatus};
use crate::materializer::{self, WeekSchedule};
use crate::migration::{self, BackfillReport};
use crate::overrides;
use crate::reconciliation::{self, WeekSummary};
use crate::schema::{
    ActualBalance, Definition, DefinitionRef, Expense, ExpenseDraft, Frequency, Income,
    IncomeDraft, Payment, QuickExpense, Rollover, ScheduleEntry,
};
use crate::store::{BudgetStore, SqliteStore};
use crate::utils::{validate_amount, validate_finite};
use crate::week::WeekKey;
use chrono::{NaiveDate, Utc};
use log::{debug, info};

/// The weekly budget over one store. Every call re-reads the store.
///
/// The engine is `Send + Sync` and may be shared between threads.
pub struct BudgetEngine {
    store: Box<dyn BudgetStore + Send + Sync>,
    config: BudgetConfig,
}

impl BudgetEngine {
    /// Opens the configured database, or an in-memory one when no path is set.
    pub fn open(config: BudgetConfig) -> Result<Self> {
        config.validate()?;
        let store = match &config.database_path {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::open_in_memory()?,
        };
        info!(
            "Budget engine ready ({})",
            config
                .database_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in-memory".to_string())
        );
        Ok(Self {
            store: Box::new(store),
            config,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(BudgetConfig::in_memory())
    }

    pub fn with_store(store: Box<dyn BudgetStore + Send + Sync>, config: BudgetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn BudgetStore {
        self.store.as_ref()
    }

    fn definition(&self, reference: DefinitionRef) -> Result<Definition> {
        self.store
            .get_definition(reference)?
            .ok_or_else(|| BudgetError::not_found(reference.kind().entity_name(), reference.id()))
    }

    // ---- Definitions ----

    pub fn create_expense(&self, mut draft: ExpenseDraft) -> Result<Expense> {
        if draft.recurrence.frequency == Frequency::OneTime && draft.recurrence.start_date.is_none() {
            draft.recurrence.start_date = Some(Utc::now().date_naive());
        }
        draft.validate()?;
        let expense = self.store.insert_expense(&draft)?;
        info!("Created expense #{} '{}'", expense.id, expense.name);
        Ok(expense)
    }

    /// Replaces the expense and drops its calculated schedule rows.
    pub fn update_expense(&self, id: i64, draft: ExpenseDraft) -> Result<Expense> {
        draft.validate()?;
        let expense = self.store.update_expense(id, &draft)?;
        materializer::invalidate_definition(self.store(), DefinitionRef::Expense(id))?;
        info!("Updated expense #{} '{}'", id, expense.name);
        Ok(expense)
    }

    pub fn delete_expense(&self, id: i64) -> Result<()> {
        if !self.store.delete_expense(id)? {
            return Err(BudgetError::not_found("Expense", id));
        }
        info!("Deleted expense #{}", id);
        Ok(())
    }

    pub fn get_expense(&self, id: i64) -> Result<Expense> {
        self.store
            .get_expense(id)?
            .ok_or_else(|| BudgetError::not_found("Expense", id))
    }

    pub fn list_expenses(&self) -> Result<Vec<Expense>> {
        self.store.list_expenses()
    }

    pub fn create_income(&self, mut draft: IncomeDraft) -> Result<Income> {
        if draft.recurrence.pay_day.is_none() {
            draft.recurrence.pay_day = Some(self.config.default_pay_day);
        }
        if draft.recurrence.frequency == Frequency::OneTime && draft.recurrence.start_date.is_none() {
            draft.recurrence.start_date = Some(Utc::now().date_naive());
        }
        draft.validate()?;
        let income = self.store.insert_income(&draft)?;
        info!("Created income source #{} '{}'", income.id, income.name);
        Ok(income)
    }

    pub fn update_income(&self, id: i64, draft: IncomeDraft) -> Result<Income> {
        draft.validate()?;
        let income = self.store.update_income(id, &draft)?;
        materializer::invalidate_definition(self.store(), DefinitionRef::Income(id))?;
        info!("Updated income source #{} '{}'", id, income.name);
        Ok(income)
    }

    pub fn delete_income(&self, id: i64) -> Result<()> {
        if !self.store.delete_income(id)? {
            return Err(BudgetError::not_found("Income source", id));
        }
        info!("Deleted income source #{}", id);
        Ok(())
    }

    pub fn get_income(&self, id: i64) -> Result<Income> {
        self.store
            .get_income(id)?
            .ok_or_else(|| BudgetError::not_found("Income source", id))
    }

    pub fn list_income(&self) -> Result<Vec<Income>> {
        self.store.list_income()
    }

    /// Weekly equivalent of all active recurring income. One-time income is excluded.
    pub fn weekly_income_equivalent(&self) -> Result<f64> {
        let total = self
            .store
            .list_income()?
            .iter()
            .filter(|i| i.is_active)
            .map(|i| match i.recurrence.frequency {
                Frequency::Weekly => i.amount,
                Frequency::Biweekly => i.amount / 2.0,
                Frequency::Monthly => i.amount * 12.0 / 52.0,
                Frequency::OneTime => 0.0,
            })
            .sum();
        Ok(total)
    }

    // ---- Schedule ----

    pub fn get_week_schedule(&self, week: WeekKey) -> Result<WeekSchedule> {
        materializer::materialize_week(self.store(), week, self.config.one_time)
    }

    pub fn get_week_summary(&self, week: WeekKey) -> Result<WeekSummary> {
        reconciliation::summarize_week(self.store(), week, self.config.one_time)
    }

    pub fn set_amount_override(&self, reference: DefinitionRef, week: WeekKey, amount: f64) -> Result<ScheduleEntry> {
        let def = self.definition(reference)?;
        overrides::set_amount_override(self.store(), &def, week, amount, self.config.one_time)
    }

    pub fn reset_amount_override(&self, reference: DefinitionRef, week: WeekKey) -> Result<Option<ScheduleEntry>> {
        let def = self.definition(reference)?;
        overrides::reset_amount_override(self.store(), &def, week)
    }

    pub fn set_due_date(
        &self,
        expense_id: i64,
        week: WeekKey,
        due_date: NaiveDate,
        amount: Option<f64>,
    ) -> Result<ScheduleEntry> {
        let def = self.definition(DefinitionRef::Expense(expense_id))?;
        materializer::move_occurrence(self.store(), &def, week, due_date, amount)
    }

    pub fn reset_due_date(&self, expense_id: i64, week: WeekKey) -> Result<Option<ScheduleEntry>> {
        let def = self.definition(DefinitionRef::Expense(expense_id))?;
        materializer::reset_due_date(self.store(), &def, week, self.config.one_time)
    }

    pub fn set_pay_date(
        &self,
        income_id: i64,
        week: WeekKey,
        pay_date: NaiveDate,
        amount: Option<f64>,
    ) -> Result<ScheduleEntry> {
        let def = self.definition(DefinitionRef::Income(income_id))?;
        materializer::move_occurrence(self.store(), &def, week, pay_date, amount)
    }

    pub fn reset_pay_date(&self, income_id: i64, week: WeekKey) -> Result<Option<ScheduleEntry>> {
        let def = self.definition(DefinitionRef::Income(income_id))?;
        materializer::reset_due_date(self.store(), &def, week, self.config.one_time)
    }

    // ---- Payments ----

    pub fn add_payment(
        &self,
        expense_id: i64,
        week: WeekKey,
        amount: f64,
        paid_date: Option<NaiveDate>,
    ) -> Result<Payment> {
        ledger::add_payment(self.store(), expense_id, week, amount, paid_date, self.config.overpayment)
    }

    pub fn delete_payment(&self, payment_id: i64) -> Result<()> {
        ledger::delete_payment(self.store(), payment_id)
    }

    pub fn clear_payments(&self, expense_id: i64, week: WeekKey) -> Result<usize> {
        ledger::clear_payments(self.store(), expense_id, week)
    }

    pub fn correct_payment_date(&self, payment_id: i64, paid_date: NaiveDate) -> Result<Payment> {
        ledger::correct_paid_date(self.store(), payment_id, paid_date)
    }

    pub fn payment_status(&self, expense_id: i64, week: WeekKey) -> Result<PaymentStatus> {
        ledger::payment_status(self.store(), expense_id, week)
    }

    pub fn payments_for_week(&self, week: WeekKey) -> Result<Vec<Payment>> {
        ledger::payments_for_week(self.store(), week)
    }

    // ---- Rollovers and balances ----

    pub fn set_rollover(&self, week: WeekKey, amount: f64) -> Result<Rollover> {
        validate_finite("rollover_amount", amount)?;
        let rollover = self.store.set_rollover(week, amount)?;
        info!("Rollover for week {} set to {}", week, amount);
        Ok(rollover)
    }

    pub fn get_rollover(&self, week: WeekKey) -> Result<Option<Rollover>> {
        self.store.get_rollover(week)
    }

    pub fn clear_rollover(&self, week: WeekKey) -> Result<bool> {
        let removed = self.store.delete_rollover(week)?;
        debug!("Cleared rollover for week {}: {}", week, removed);
        Ok(removed)
    }

    pub fn set_actual_balance(&self, week: WeekKey, balance: f64) -> Result<ActualBalance> {
        validate_finite("actual_balance", balance)?;
        let recorded = self.store.set_actual_balance(week, balance)?;
        info!("Actual balance for week {} set to {}", week, balance);
        Ok(recorded)
    }

    pub fn get_actual_balance(&self, week: WeekKey) -> Result<Option<ActualBalance>> {
        self.store.get_actual_balance(week)
    }

    pub fn clear_actual_balance(&self, week: WeekKey) -> Result<bool> {
        let removed = self.store.delete_actual_balance(week)?;
        debug!("Cleared actual balance for week {}: {}", week, removed);
        Ok(removed)
    }

    // ---- Quick expenses ----

    pub fn add_quick_expense(
        &self,
        week: WeekKey,
        name: &str,
        amount: f64,
        note: Option<&str>,
    ) -> Result<QuickExpense> {
        if name.trim().is_empty() {
            return Err(BudgetError::validation("name", "must not be empty"));
        }
        validate_amount("amount", amount)?;
        let quick = self.store.insert_quick_expense(week, name, amount, note)?;
        info!("Logged quick expense #{} '{}' of {} in week {}", quick.id, name, amount, week);
        Ok(quick)
    }

    /// Removes the quick expense together with its schedule row.
    pub fn delete_quick_expense(&self, id: i64) -> Result<()> {
        if !self.store.delete_quick_expense(id)? {
            return Err(BudgetError::not_found("Quick expense", id));
        }
        info!("Deleted quick expense #{}", id);
        Ok(())
    }

    pub fn quick_expenses_for_week(&self, week: WeekKey) -> Result<Vec<QuickExpense>> {
        self.store.quick_expenses_for_week(week)
    }

    // ---- Maintenance ----

    pub fn export_all(&self) -> Result<BackupDocument> {
        backup::export_all(self.store())
    }

    pub fn import_all(&self, document: &BackupDocument, options: ImportOptions) -> Result<ImportCounts> {
        backup::import_all(self.store(), document, options)
    }

    pub fn crosscheck(&self, week: WeekKey) -> Result<CrosscheckReport> {
        crosscheck::crosscheck(self.store(), week, self.config.one_time)
    }

    pub fn backfill_legacy_overrides(&self) -> Result<BackfillReport> {
        migration::backfill_legacy_overrides(self.store(), self.config.one_time)
    }
}
