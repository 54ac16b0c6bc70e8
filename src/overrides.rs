use crate::config::OneTimePolicy;
use crate::error::{BudgetError, Result};
use crate::recurrence::occurs_in_week;
use crate::schema::{Definition, DefinitionRef, NewScheduleEntry, ScheduleEntry};
use crate::store::BudgetStore;
use crate::utils::validate_amount;
use crate::week::WeekKey;
use chrono::NaiveDate;
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AmountSource {
    #[schemars(description = "The materialized schedule row for the occurrence")]
    Schedule,
    #[schemars(description = "A per-week override from the legacy tables")]
    LegacyOverride,
    #[schemars(description = "The definition's base amount")]
    Definition,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResolvedAmount {
    pub amount: f64,
    pub source: AmountSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DueDateSource {
    Schedule,
    Calculated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResolvedDueDate {
    pub due_date: NaiveDate,
    pub source: DueDateSource,
}

/// Legacy override, else the definition amount. Ignores the schedule.
pub fn default_amount(store: &dyn BudgetStore, def: &Definition, week: WeekKey) -> Result<ResolvedAmount> {
    let legacy = match def.reference() {
        DefinitionRef::Expense(id) => store.legacy_expense_amount(id, week)?,
        DefinitionRef::Income(id) => store.legacy_income_amount(id, week)?,
    };

    Ok(match legacy {
        Some(amount) => ResolvedAmount {
            amount,
            source: AmountSource::LegacyOverride,
        },
        None => ResolvedAmount {
            amount: def.amount(),
            source: AmountSource::Definition,
        },
    })
}

/// Schedule row, then legacy override, then definition amount.
pub fn resolve_amount(store: &dyn BudgetStore, def: &Definition, week: WeekKey) -> Result<ResolvedAmount> {
    if let Some(entry) = store.find_occurrence(def.reference().into(), week)? {
        return Ok(ResolvedAmount {
            amount: entry.amount,
            source: AmountSource::Schedule,
        });
    }
    default_amount(store, def, week)
}

/// Schedule row, then the calculated default. `None` when the definition
/// has no occurrence in `week`.
pub fn resolve_due_date(
    store: &dyn BudgetStore,
    def: &Definition,
    week: WeekKey,
    policy: OneTimePolicy,
) -> Result<Option<ResolvedDueDate>> {
    if let Some(entry) = store.find_occurrence(def.reference().into(), week)? {
        return Ok(Some(ResolvedDueDate {
            due_date: entry.due_date,
            source: DueDateSource::Schedule,
        }));
    }

    Ok(occurs_in_week(def.recurrence(), week, policy).map(|occurrence| ResolvedDueDate {
        due_date: occurrence.due_date,
        source: DueDateSource::Calculated,
    }))
}

/// Writes the amount onto the occurrence's schedule row, creating the row at
/// the calculated due date when it is not materialized yet.
pub fn set_amount_override(
    store: &dyn BudgetStore,
    def: &Definition,
    week: WeekKey,
    amount: f64,
    policy: OneTimePolicy,
) -> Result<ScheduleEntry> {
    validate_amount("amount", amount)?;
    let owner = def.reference().into();

    if store.find_occurrence(owner, week)?.is_none() {
        let occurrence = occurs_in_week(def.recurrence(), week, policy).ok_or_else(|| {
            BudgetError::validation(
                "week_key",
                format!("{} does not occur in week {}", def.name(), week),
            )
        })?;
        let mut entry =
            NewScheduleEntry::calculated(def.reference(), def.name(), week, occurrence.due_date, amount);
        entry.amount_overridden = true;
        store.insert_schedule_entry_if_absent(&entry)?;
    }

    let mut entry = store
        .find_occurrence(owner, week)?
        .ok_or_else(|| BudgetError::not_found("Schedule entry", format!("{} in {}", def.reference(), week)))?;
    entry.amount = amount;
    entry.amount_overridden = true;
    store.update_schedule_entry(&entry)?;

    info!("Amount for {} in week {} set to {}", def.reference(), week, amount);
    Ok(entry)
}

/// Puts the occurrence back on its default amount. Returns the surviving row,
/// or `None` when the row carried no other override and was removed.
pub fn reset_amount_override(
    store: &dyn BudgetStore,
    def: &Definition,
    week: WeekKey,
) -> Result<Option<ScheduleEntry>> {
    let Some(mut entry) = store.find_occurrence(def.reference().into(), week)? else {
        return Ok(None);
    };

    info!("Amount override for {} in week {} reset", def.reference(), week);

    if !entry.due_date_overridden {
        store.delete_schedule_entries(&[entry.id])?;
        return Ok(None);
    }

    entry.amount = default_amount(store, def, week)?.amount;
    entry.amount_overridden = false;
    store.update_schedule_entry(&entry)?;
    Ok(Some(entry))
}
