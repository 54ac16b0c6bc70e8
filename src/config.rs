//! Engine configuration.
//!
//! Every field is defaulted, so `{}` is a valid configuration document.

use crate::error::{BudgetError, Result};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the ledger treats a payment that would exceed the resolved amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverpaymentPolicy {
    /// Accept it; status reports `overpaid_by` and reconciliation caps the paid total.
    #[default]
    Allow,
    Reject,
}

/// How `one-time` definitions are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OneTimePolicy {
    /// Exactly one occurrence: the first anchor date on or after `start_date`.
    #[default]
    SingleOccurrence,
    /// Behaves like a monthly rule on the anchor day.
    RecurMonthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BudgetConfig {
    #[serde(default)]
    #[schemars(description = "SQLite database file; omitted for an in-memory database")]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub overpayment: OverpaymentPolicy,

    #[serde(default)]
    pub one_time: OneTimePolicy,

    #[serde(default = "default_pay_day")]
    #[schemars(description = "Weekday (0 = Sunday .. 6 = Saturday) given to new income without a pay day")]
    pub default_pay_day: u32,
}

fn default_pay_day() -> u32 {
    5
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            overpayment: OverpaymentPolicy::default(),
            one_time: OneTimePolicy::default(),
            default_pay_day: default_pay_day(),
        }
    }
}

impl BudgetConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BudgetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        debug!("Loaded budget config from {}", path.display());
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_pay_day > 6 {
            return Err(BudgetError::Config(format!(
                "default_pay_day must be between 0 (Sunday) and 6 (Saturday), got {}",
                self.default_pay_day
            )));
        }
        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                return Err(BudgetError::Config(
                    "database_path must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
