//! # Weekly Budget Engine
//!
//! Recurring expense and income schedules resolved into Friday-to-Thursday
//! budget weeks, with per-occurrence overrides, a payment ledger and weekly
//! reconciliation.
//!
//! ## Core Concepts
//!
//! - **Definitions**: recurring expenses and income sources (`one-time`, `weekly`, `biweekly`, `monthly`)
//! - **Week keys**: each week is named by its Friday; `WeekKey::containing` maps any date to its week
//! - **Materialization**: a week's occurrences are persisted the first time it is viewed
//! - **Overrides**: the materialized row is the single place a per-week amount or due date lives
//! - **Reconciliation**: income, expenses, payments and rollover folded into what remains to spend
//!
//! ## Example
//!
//! ```rust,ignore
//! use weekly_budget_engine::*;
//! use chrono::NaiveDate;
//!
//! let engine = BudgetEngine::in_memory()?;
//! engine.create_income(IncomeDraft::new("Wages", 1000.0, RecurrenceRule::weekly()))?;
//! let rent = engine.create_expense(ExpenseDraft::new(
//!     "Rent",
//!     800.0,
//!     ExpenseCategory::Bill,
//!     RecurrenceRule::monthly(1),
//! ))?;
//!
//! let week = WeekKey::containing(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
//! engine.add_payment(rent.id, week, 400.0, None)?;
//!
//! let summary = engine.get_week_summary(week)?;
//! println!("{} left, {} safe to spend", summary.remaining, summary.safe_to_spend);
//! ```

pub mod backup;
pub mod config;
pub mod crosscheck;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod materializer;
pub mod migration;
pub mod overrides;
pub mod reconciliation;
pub mod recurrence;
pub mod schema;
pub mod store;
pub mod utils;
pub mod week;

pub use backup::{BackupData, BackupDocument, ImportCounts, ImportOptions};
pub use config::{BudgetConfig, OneTimePolicy, OverpaymentPolicy};
pub use crosscheck::{AmountMismatch, CrosscheckCounts, CrosscheckItem, CrosscheckReport};
pub use engine::BudgetEngine;
pub use error::{BudgetError, Result};
pub use ledger::{PaymentState, PaymentStatus};
pub use materializer::WeekSchedule;
pub use migration::BackfillReport;
pub use overrides::{AmountSource, DueDateSource, ResolvedAmount, ResolvedDueDate};
pub use reconciliation::{NextWeekOutlook, NextWeekWarning, WeekSummary};
pub use recurrence::{occurs_in_week, WeekOccurrence};
pub use schema::*;
pub use store::{BudgetStore, SqliteStore};
pub use utils::*;
pub use week::{WeekDays, WeekKey, WEEK_START_DAY};
