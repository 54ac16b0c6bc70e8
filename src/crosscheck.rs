//! Compares the persisted schedule against what the rules alone would produce.
//! Only reports; never corrects.

use crate::config::OneTimePolicy;
use crate::error::Result;
use crate::recurrence::occurs_in_week;
use crate::schema::ScheduleOwner;
use crate::store::BudgetStore;
use crate::week::WeekKey;
use chrono::NaiveDate;
use log::warn;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CrosscheckItem {
    pub owner: ScheduleOwner,
    pub name: String,
    pub due_date: NaiveDate,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AmountMismatch {
    pub owner: ScheduleOwner,
    pub name: String,
    pub due_date: NaiveDate,
    pub expected_amount: f64,
    pub actual_amount: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CrosscheckCounts {
    pub expected: usize,
    pub actual: usize,
    pub missing: usize,
    pub extra: usize,
    pub mismatched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CrosscheckReport {
    pub week_key: WeekKey,
    /// Expected by the rules but not persisted.
    pub missing: Vec<CrosscheckItem>,
    /// Persisted but not expected; typically a moved occurrence.
    pub extra: Vec<CrosscheckItem>,
    pub mismatched: Vec<AmountMismatch>,
    pub summary: CrosscheckCounts,
}

impl CrosscheckReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.mismatched.is_empty()
    }
}

type Key = (ScheduleOwner, NaiveDate);

pub fn crosscheck(store: &dyn BudgetStore, week: WeekKey, policy: OneTimePolicy) -> Result<CrosscheckReport> {
    let mut expected: BTreeMap<Key, CrosscheckItem> = BTreeMap::new();
    for def in store.active_definitions()? {
        if let Some(occurrence) = occurs_in_week(def.recurrence(), week, policy) {
            let owner = ScheduleOwner::from(def.reference());
            expected.insert(
                (owner, occurrence.due_date),
                CrosscheckItem {
                    owner,
                    name: def.name().to_string(),
                    due_date: occurrence.due_date,
                    amount: def.amount(),
                },
            );
        }
    }

    let mut actual: BTreeMap<Key, CrosscheckItem> = BTreeMap::new();
    for entry in store.schedule_entries_between(week.start(), week.end())? {
        if entry.is_quick_expense() {
            continue;
        }
        actual.insert(
            (entry.owner, entry.due_date),
            CrosscheckItem {
                owner: entry.owner,
                name: entry.name,
                due_date: entry.due_date,
                amount: entry.amount,
            },
        );
    }

    let mut missing = Vec::new();
    let mut mismatched = Vec::new();
    for (key, item) in &expected {
        match actual.get(key) {
            None => missing.push(item.clone()),
            Some(found) if found.amount != item.amount => mismatched.push(AmountMismatch {
                owner: item.owner,
                name: item.name.clone(),
                due_date: item.due_date,
                expected_amount: item.amount,
                actual_amount: found.amount,
            }),
            Some(_) => {}
        }
    }
    let extra: Vec<CrosscheckItem> = actual
        .iter()
        .filter(|(key, _)| !expected.contains_key(*key))
        .map(|(_, item)| item.clone())
        .collect();

    let summary = CrosscheckCounts {
        expected: expected.len(),
        actual: actual.len(),
        missing: missing.len(),
        extra: extra.len(),
        mismatched: mismatched.len(),
    };

    if summary.missing + summary.extra + summary.mismatched > 0 {
        warn!(
            "Crosscheck for week {}: {} missing, {} extra, {} mismatched",
            week, summary.missing, summary.extra, summary.mismatched
        );
    }

    Ok(CrosscheckReport {
        week_key: week,
        missing,
        extra,
        mismatched,
        summary,
    })
}
