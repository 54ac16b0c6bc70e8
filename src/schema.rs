use crate::error::{BudgetError, Result};
use crate::utils::validate_amount;
use crate::week::WeekKey;
use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    #[schemars(description = "Occurs once, on the anchor day (see OneTimePolicy)")]
    OneTime,

    #[schemars(description = "Occurs every week")]
    Weekly,

    #[schemars(description = "Occurs every other week, with parity fixed by start_date")]
    Biweekly,

    #[schemars(description = "Occurs once a month on the anchor day, clamped to the month length")]
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one-time",
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
            Self::Monthly => "monthly",
        }
    }

    /// Monthly-anchored rules need an anchor day to ever occur.
    pub fn requires_anchor_day(&self) -> bool {
        matches!(self, Self::OneTime | Self::Monthly)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Frequency {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "one-time" => Ok(Self::OneTime),
            "weekly" => Ok(Self::Weekly),
            "biweekly" => Ok(Self::Biweekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(ParseEnumError {
                kind: "frequency",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseCategory {
    Bill,
    Living,
    Debt,
    Savings,
}

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bill => "bill",
            Self::Living => "living",
            Self::Debt => "debt",
            Self::Savings => "savings",
        }
    }
}

impl FromStr for ExpenseCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bill" => Ok(Self::Bill),
            "living" => Ok(Self::Living),
            "debt" => Ok(Self::Debt),
            "savings" => Ok(Self::Savings),
            other => Err(ParseEnumError {
                kind: "expense category",
                value: other.to_string(),
            }),
        }
    }
}

/// The recurrence half of a recurring definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RecurrenceRule {
    pub frequency: Frequency,

    #[serde(default)]
    #[schemars(description = "Day of month (1-31) for monthly and one-time rules; clamped to the month length")]
    pub anchor_day: Option<u32>,

    #[serde(default)]
    #[schemars(description = "Weekday (0 = Sunday .. 6 = Saturday) an income is paid on")]
    pub pay_day: Option<u32>,

    #[serde(default)]
    #[schemars(description = "Fixes biweekly parity; lower bound for one-time occurrences")]
    pub start_date: Option<NaiveDate>,
}

impl RecurrenceRule {
    pub fn weekly() -> Self {
        Self {
            frequency: Frequency::Weekly,
            anchor_day: None,
            pay_day: None,
            start_date: None,
        }
    }

    pub fn biweekly(start_date: NaiveDate) -> Self {
        Self {
            frequency: Frequency::Biweekly,
            anchor_day: None,
            pay_day: None,
            start_date: Some(start_date),
        }
    }

    pub fn monthly(anchor_day: u32) -> Self {
        Self {
            frequency: Frequency::Monthly,
            anchor_day: Some(anchor_day),
            pay_day: None,
            start_date: None,
        }
    }

    pub fn one_time(anchor_day: u32, start_date: NaiveDate) -> Self {
        Self {
            frequency: Frequency::OneTime,
            anchor_day: Some(anchor_day),
            pay_day: None,
            start_date: Some(start_date),
        }
    }

    pub fn with_pay_day(mut self, pay_day: u32) -> Self {
        self.pay_day = Some(pay_day);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(day) = self.anchor_day {
            if !(1..=31).contains(&day) {
                return Err(BudgetError::validation(
                    "anchor_day",
                    format!("must be between 1 and 31, got {}", day),
                ));
            }
        } else if self.frequency.requires_anchor_day() {
            return Err(BudgetError::validation(
                "anchor_day",
                format!("required for {} definitions", self.frequency),
            ));
        }

        if let Some(day) = self.pay_day {
            if day > 6 {
                return Err(BudgetError::validation(
                    "pay_day",
                    format!("must be between 0 (Sunday) and 6 (Saturday), got {}", day),
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Expense,
    Income,
}

impl DefinitionKind {
    pub fn entity_name(&self) -> &'static str {
        match self {
            Self::Expense => "Expense",
            Self::Income => "Income source",
        }
    }
}

/// Points at one recurring definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DefinitionRef {
    Expense(i64),
    Income(i64),
}

impl DefinitionRef {
    pub fn new(kind: DefinitionKind, id: i64) -> Self {
        match kind {
            DefinitionKind::Expense => Self::Expense(id),
            DefinitionKind::Income => Self::Income(id),
        }
    }

    pub fn kind(&self) -> DefinitionKind {
        match self {
            Self::Expense(_) => DefinitionKind::Expense,
            Self::Income(_) => DefinitionKind::Income,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Expense(id) | Self::Income(id) => *id,
        }
    }
}

impl fmt::Display for DefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expense(id) => write!(f, "expense #{}", id),
            Self::Income(id) => write!(f, "income #{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Expense {
    pub id: i64,
    pub name: String,
    pub amount: f64,
    pub category: ExpenseCategory,
    #[serde(flatten)]
    pub recurrence: RecurrenceRule,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Income {
    pub id: i64,
    pub name: String,
    pub amount: f64,
    #[serde(flatten)]
    pub recurrence: RecurrenceRule,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Create/update payload for an expense. Updates replace every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExpenseDraft {
    pub name: String,
    pub amount: f64,
    pub category: ExpenseCategory,
    #[serde(flatten)]
    pub recurrence: RecurrenceRule,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IncomeDraft {
    pub name: String,
    pub amount: f64,
    #[serde(flatten)]
    pub recurrence: RecurrenceRule,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BudgetError::validation("name", "must not be empty"));
    }
    Ok(())
}

impl ExpenseDraft {
    pub fn new(name: impl Into<String>, amount: f64, category: ExpenseCategory, recurrence: RecurrenceRule) -> Self {
        Self {
            name: name.into(),
            amount,
            category,
            recurrence,
            is_active: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_amount("amount", self.amount)?;
        self.recurrence.validate()
    }
}

impl IncomeDraft {
    pub fn new(name: impl Into<String>, amount: f64, recurrence: RecurrenceRule) -> Self {
        Self {
            name: name.into(),
            amount,
            recurrence,
            is_active: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_amount("amount", self.amount)?;
        self.recurrence.validate()
    }
}

/// Either kind of recurring definition, as read for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Expense(Expense),
    Income(Income),
}

impl Definition {
    pub fn reference(&self) -> DefinitionRef {
        match self {
            Self::Expense(e) => DefinitionRef::Expense(e.id),
            Self::Income(i) => DefinitionRef::Income(i.id),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Expense(e) => &e.name,
            Self::Income(i) => &i.name,
        }
    }

    pub fn amount(&self) -> f64 {
        match self {
            Self::Expense(e) => e.amount,
            Self::Income(i) => i.amount,
        }
    }

    pub fn recurrence(&self) -> &RecurrenceRule {
        match self {
            Self::Expense(e) => &e.recurrence,
            Self::Income(i) => &i.recurrence,
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            Self::Expense(e) => e.is_active,
            Self::Income(i) => i.is_active,
        }
    }
}

/// Who a schedule row belongs to. Exactly one owner per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ScheduleOwner {
    Expense(i64),
    Income(i64),
    QuickExpense(i64),
}

impl ScheduleOwner {
    pub fn definition(&self) -> Option<DefinitionRef> {
        match self {
            Self::Expense(id) => Some(DefinitionRef::Expense(*id)),
            Self::Income(id) => Some(DefinitionRef::Income(*id)),
            Self::QuickExpense(_) => None,
        }
    }

    pub fn is_expense_side(&self) -> bool {
        matches!(self, Self::Expense(_) | Self::QuickExpense(_))
    }
}

impl From<DefinitionRef> for ScheduleOwner {
    fn from(reference: DefinitionRef) -> Self {
        match reference {
            DefinitionRef::Expense(id) => Self::Expense(id),
            DefinitionRef::Income(id) => Self::Income(id),
        }
    }
}

/// A materialized occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleEntry {
    pub id: i64,
    pub owner: ScheduleOwner,
    pub name: String,
    pub week_key: WeekKey,
    #[schemars(description = "Week whose calculated occurrence this row represents; absent for quick expenses")]
    pub origin_week_key: Option<WeekKey>,
    pub due_date: NaiveDate,
    pub amount: f64,
    pub amount_overridden: bool,
    pub due_date_overridden: bool,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleEntry {
    pub fn is_quick_expense(&self) -> bool {
        matches!(self.owner, ScheduleOwner::QuickExpense(_))
    }

    /// Auto-inserted by the materializer and never touched by the user.
    pub fn is_calculated(&self) -> bool {
        !self.is_quick_expense() && !self.amount_overridden && !self.due_date_overridden
    }

    pub fn has_overrides(&self) -> bool {
        self.amount_overridden || self.due_date_overridden
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewScheduleEntry {
    pub owner: ScheduleOwner,
    pub name: String,
    pub week_key: WeekKey,
    pub origin_week_key: Option<WeekKey>,
    pub due_date: NaiveDate,
    pub amount: f64,
    pub amount_overridden: bool,
    pub due_date_overridden: bool,
    pub note: Option<String>,
}

impl NewScheduleEntry {
    pub fn calculated(reference: DefinitionRef, name: &str, week: WeekKey, due_date: NaiveDate, amount: f64) -> Self {
        Self {
            owner: reference.into(),
            name: name.to_string(),
            week_key: WeekKey::containing(due_date),
            origin_week_key: Some(week),
            due_date,
            amount,
            amount_overridden: false,
            due_date_overridden: false,
            note: None,
        }
    }

    pub fn for_quick_expense(quick: &QuickExpense) -> Self {
        Self {
            owner: ScheduleOwner::QuickExpense(quick.id),
            name: quick.name.clone(),
            week_key: quick.week_key,
            origin_week_key: None,
            due_date: quick.week_key.start(),
            amount: quick.amount,
            amount_overridden: false,
            due_date_overridden: false,
            note: quick.note.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WeeklyAmountOverride {
    pub expense_id: i64,
    pub week_key: WeekKey,
    pub actual_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WeeklyIncomeOverride {
    pub income_id: i64,
    pub week_key: WeekKey,
    pub actual_amount: f64,
    #[serde(default = "default_active")]
    pub received: bool,
}

/// The original per-week due-date override table. Only read by the backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LegacyDueDate {
    pub expense_id: i64,
    pub week_key: WeekKey,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Payment {
    pub id: i64,
    pub expense_id: i64,
    pub week_key: WeekKey,
    pub amount_paid: f64,
    pub paid_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rollover {
    pub week_key: WeekKey,
    pub rollover_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuickExpense {
    pub id: i64,
    pub week_key: WeekKey,
    pub name: String,
    pub amount: f64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActualBalance {
    pub week_key: WeekKey,
    pub actual_balance: f64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_round_trips_through_str() {
        for frequency in [
            Frequency::OneTime,
            Frequency::Weekly,
            Frequency::Biweekly,
            Frequency::Monthly,
        ] {
            assert_eq!(frequency.as_str().parse::<Frequency>().unwrap(), frequency);
        }
        assert!("fortnightly".parse::<Frequency>().is_err());
    }

    #[test]
    fn test_recurrence_validation() {
        assert!(RecurrenceRule::weekly().validate().is_ok());
        assert!(RecurrenceRule::monthly(31).validate().is_ok());
        assert!(RecurrenceRule::monthly(0).validate().is_err());
        assert!(RecurrenceRule::monthly(32).validate().is_err());
        assert!(RecurrenceRule::weekly().with_pay_day(7).validate().is_err());

        let missing_anchor = RecurrenceRule {
            frequency: Frequency::Monthly,
            anchor_day: None,
            pay_day: None,
            start_date: None,
        };
        let err = missing_anchor.validate().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_draft_validation_rejects_bad_amounts() {
        let draft = ExpenseDraft::new("Rent", -5.0, ExpenseCategory::Bill, RecurrenceRule::monthly(1));
        assert!(draft.validate().is_err());

        let draft = ExpenseDraft::new("  ", 5.0, ExpenseCategory::Bill, RecurrenceRule::monthly(1));
        assert!(draft.validate().is_err());

        let draft = IncomeDraft::new("Salary", f64::NAN, RecurrenceRule::weekly());
        assert!(draft.validate().is_err());
    }

    #[test]
    fn test_expense_serialization_flattens_recurrence() {
        let json = r#"{
            "name": "Phone",
            "amount": 45.0,
            "category": "bill",
            "frequency": "monthly",
            "anchor_day": 12
        }"#;
        let draft: ExpenseDraft = serde_json::from_str(json).unwrap();
        assert_eq!(draft.recurrence.frequency, Frequency::Monthly);
        assert_eq!(draft.recurrence.anchor_day, Some(12));
        assert!(draft.is_active);
    }

    #[test]
    fn test_schedule_owner_serialization() {
        let owner = ScheduleOwner::QuickExpense(7);
        let json = serde_json::to_string(&owner).unwrap();
        assert_eq!(json, r#"{"kind":"quick_expense","id":7}"#);
        assert_eq!(owner.definition(), None);
        assert_eq!(
            ScheduleOwner::Income(3).definition(),
            Some(DefinitionRef::Income(3))
        );
    }
}
