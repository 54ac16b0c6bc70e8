//! Full export/import of the store as a versioned JSON document.

use crate::error::{BudgetError, Result};
use crate::schema::{
    ActualBalance, Expense, Income, LegacyDueDate, Payment, QuickExpense, Rollover,
    ScheduleEntry, WeeklyAmountOverride, WeeklyIncomeOverride,
};
use crate::store::BudgetStore;
use chrono::{DateTime, Utc};
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const BACKUP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BackupDocument {
    #[schemars(description = "Format version; currently 1")]
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub data: BackupData,
}

/// Every table of the store. Missing arrays import as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BackupData {
    #[serde(default)]
    pub expenses: Vec<Expense>,
    #[serde(default)]
    pub income: Vec<Income>,
    #[serde(default)]
    pub payments: Vec<Payment>,
    #[serde(default)]
    pub rollovers: Vec<Rollover>,
    #[serde(default)]
    pub weekly_income_overrides: Vec<WeeklyIncomeOverride>,
    #[serde(default)]
    pub weekly_amount_overrides: Vec<WeeklyAmountOverride>,
    #[serde(default)]
    pub legacy_due_dates: Vec<LegacyDueDate>,
    #[serde(default)]
    pub quick_expenses: Vec<QuickExpense>,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
    #[serde(default)]
    pub balances: Vec<ActualBalance>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Wipe every table before importing.
    #[serde(default)]
    pub clear_existing: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounts {
    pub expenses: usize,
    pub income: usize,
    pub payments: usize,
    pub rollovers: usize,
    pub weekly_income_overrides: usize,
    pub weekly_amount_overrides: usize,
    pub legacy_due_dates: usize,
    pub quick_expenses: usize,
    pub schedule: usize,
    pub balances: usize,
}

impl ImportCounts {
    pub fn total(&self) -> usize {
        self.expenses
            + self.income
            + self.payments
            + self.rollovers
            + self.weekly_income_overrides
            + self.weekly_amount_overrides
            + self.legacy_due_dates
            + self.quick_expenses
            + self.schedule
            + self.balances
    }
}

impl BackupDocument {
    pub fn new(data: BackupData) -> Self {
        Self {
            version: BACKUP_VERSION,
            exported_at: Utc::now(),
            data,
        }
    }

    /// JSON Schema of the backup format.
    pub fn schema_as_json() -> Result<String> {
        let schema = schemars::schema_for!(BackupDocument);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: Self = serde_json::from_str(json)?;
        document.validate()?;
        Ok(document)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != BACKUP_VERSION {
            return Err(BudgetError::validation(
                "version",
                format!("unsupported backup version {}", self.version),
            ));
        }
        Ok(())
    }
}

pub fn export_all(store: &dyn BudgetStore) -> Result<BackupDocument> {
    let data = BackupData {
        expenses: store.list_expenses()?,
        income: store.list_income()?,
        payments: store.list_payments()?,
        rollovers: store.list_rollovers()?,
        weekly_income_overrides: store.list_weekly_income_overrides()?,
        weekly_amount_overrides: store.list_weekly_amount_overrides()?,
        legacy_due_dates: store.list_legacy_due_dates()?,
        quick_expenses: store.list_quick_expenses()?,
        schedule: store.list_schedule_entries()?,
        balances: store.list_actual_balances()?,
    };
    debug!(
        "Exported {} expenses, {} income sources, {} schedule rows",
        data.expenses.len(),
        data.income.len(),
        data.schedule.len()
    );
    Ok(BackupDocument::new(data))
}

pub fn import_all(
    store: &dyn BudgetStore,
    document: &BackupDocument,
    options: ImportOptions,
) -> Result<ImportCounts> {
    document.validate()?;
    let counts = store.import_backup(&document.data, &options)?;
    info!(
        "Imported backup from {} ({} rows, clear_existing={})",
        document.exported_at,
        counts.total(),
        options.clear_existing
    );
    Ok(counts)
}
