//! Keeps the persisted schedule in step with the recurrence rules.
//!
//! Occurrences are written lazily, the first time a week is viewed. A row
//! records both the week it is filed under (`week_key`, derived from its due
//! date) and the week whose calculated occurrence it stands for
//! (`origin_week_key`). The store refuses a second row for either key, which
//! is what keeps a moved occurrence from coming back in its original week.

use crate::config::OneTimePolicy;
use crate::error::Result;
use crate::overrides::default_amount;
use crate::recurrence::occurs_in_week;
use crate::schema::{Definition, DefinitionRef, Frequency, NewScheduleEntry, ScheduleEntry, ScheduleOwner};
use crate::store::BudgetStore;
use crate::utils::{same_month, validate_amount};
use crate::week::WeekKey;
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Everything due inside one week, ordered by due date then id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekSchedule {
    pub week_key: WeekKey,
    pub entries: Vec<ScheduleEntry>,
}

impl WeekSchedule {
    pub fn expenses(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(|e| matches!(e.owner, ScheduleOwner::Expense(_)))
    }

    pub fn income(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(|e| matches!(e.owner, ScheduleOwner::Income(_)))
    }

    pub fn quick_expenses(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(|e| e.is_quick_expense())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn materialize_week(store: &dyn BudgetStore, week: WeekKey, policy: OneTimePolicy) -> Result<WeekSchedule> {
    let mut inserted = 0usize;

    for def in store.active_definitions()? {
        let Some(occurrence) = occurs_in_week(def.recurrence(), week, policy) else {
            continue;
        };
        let amount = default_amount(store, &def, week)?.amount;
        let entry = NewScheduleEntry::calculated(def.reference(), def.name(), week, occurrence.due_date, amount);
        if store.insert_schedule_entry_if_absent(&entry)? {
            inserted += 1;
        }
    }

    for quick in store.quick_expenses_for_week(week)? {
        if store.insert_schedule_entry_if_absent(&NewScheduleEntry::for_quick_expense(&quick))? {
            inserted += 1;
        }
    }

    let entries = store.schedule_entries_between(week.start(), week.end())?;
    debug!(
        "Materialized week {}: {} new rows, {} entries",
        week,
        inserted,
        entries.len()
    );

    Ok(WeekSchedule {
        week_key: week,
        entries,
    })
}

/// Moves the occurrence of `week` to `new_due_date`.
///
/// Monthly rules drop every row of the definition due in the target month;
/// other rules drop every row of the definition. The moved occurrence's own
/// row goes too, as does anything already filed under the target week.
pub fn move_occurrence(
    store: &dyn BudgetStore,
    def: &Definition,
    week: WeekKey,
    new_due_date: NaiveDate,
    amount: Option<f64>,
) -> Result<ScheduleEntry> {
    let monthly = def.recurrence().frequency == Frequency::Monthly;
    let sweep = |e: &ScheduleEntry| !monthly || same_month(e.due_date, new_due_date);
    replace_occurrence(store, def, week, new_due_date, amount, &sweep)
}

/// Moves the occurrence of `week` to `new_due_date`, removing only the rows
/// it would collide with. Other weeks of the definition are left alone.
pub fn relocate_occurrence(
    store: &dyn BudgetStore,
    def: &Definition,
    week: WeekKey,
    new_due_date: NaiveDate,
) -> Result<ScheduleEntry> {
    replace_occurrence(store, def, week, new_due_date, None, &|_| false)
}

fn replace_occurrence(
    store: &dyn BudgetStore,
    def: &Definition,
    week: WeekKey,
    new_due_date: NaiveDate,
    amount: Option<f64>,
    sweep: &dyn Fn(&ScheduleEntry) -> bool,
) -> Result<ScheduleEntry> {
    if let Some(amount) = amount {
        validate_amount("amount", amount)?;
    }

    let reference = def.reference();
    let owner = reference.into();
    let target_week = WeekKey::containing(new_due_date);
    let current = store.find_occurrence(owner, week)?;

    let delete_ids: Vec<i64> = store
        .schedule_entries_for_owner(owner)?
        .into_iter()
        .filter(|e| {
            sweep(e)
                || current.as_ref().is_some_and(|c| c.id == e.id)
                || e.origin_week_key == Some(week)
                || e.week_key == target_week
        })
        .map(|e| e.id)
        .collect();

    let (amount, amount_overridden) = match (amount, &current) {
        (Some(amount), _) => (amount, true),
        (None, Some(existing)) if existing.amount_overridden => (existing.amount, true),
        (None, _) => (default_amount(store, def, week)?.amount, false),
    };

    let entry = NewScheduleEntry {
        owner,
        name: def.name().to_string(),
        week_key: target_week,
        origin_week_key: Some(week),
        due_date: new_due_date,
        amount,
        amount_overridden,
        due_date_overridden: true,
        note: current.and_then(|c| c.note),
    };

    let moved = store.replace_schedule_entries(&delete_ids, &entry)?;
    info!(
        "Moved {} occurrence of week {} to {} ({} rows replaced)",
        reference,
        week,
        new_due_date,
        delete_ids.len()
    );
    Ok(moved)
}

/// Puts the occurrence back on its calculated date, keeping an amount
/// override. Returns `None` when the row was removed instead.
pub fn reset_due_date(
    store: &dyn BudgetStore,
    def: &Definition,
    week: WeekKey,
    policy: OneTimePolicy,
) -> Result<Option<ScheduleEntry>> {
    let owner = def.reference().into();
    let Some(mut entry) = store.find_occurrence(owner, week)? else {
        return Ok(None);
    };

    let origin = entry.origin_week_key.unwrap_or(week);
    let calculated = occurs_in_week(def.recurrence(), origin, policy);

    let Some(occurrence) = calculated.filter(|_| entry.amount_overridden) else {
        store.delete_schedule_entries(&[entry.id])?;
        info!("Due date for {} in week {} reset; row removed", def.reference(), week);
        return Ok(None);
    };

    let calculated_week = WeekKey::containing(occurrence.due_date);
    let displaced: Vec<i64> = store
        .schedule_entries_for_owner(owner)?
        .into_iter()
        .filter(|e| e.id != entry.id && e.week_key == calculated_week && e.is_calculated())
        .map(|e| e.id)
        .collect();
    if !displaced.is_empty() {
        store.delete_schedule_entries(&displaced)?;
    }

    entry.due_date = occurrence.due_date;
    entry.week_key = calculated_week;
    entry.due_date_overridden = false;
    store.update_schedule_entry(&entry)?;

    info!(
        "Due date for {} in week {} reset to {}",
        def.reference(),
        week,
        occurrence.due_date
    );
    Ok(Some(entry))
}

/// Drops the definition's calculated rows so they re-materialize from the
/// current rule. Rows carrying an override survive.
pub fn invalidate_definition(store: &dyn BudgetStore, reference: DefinitionRef) -> Result<usize> {
    let removed = store.delete_calculated_entries(reference)?;
    debug!("Invalidated {} calculated rows of {}", removed, reference);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::set_amount_override;
    use crate::schema::{ExpenseCategory, ExpenseDraft, IncomeDraft, RecurrenceRule};
    use crate::store::SqliteStore;

    const POLICY: OneTimePolicy = OneTimePolicy::SingleOccurrence;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn monthly_expense(store: &SqliteStore, anchor: u32) -> Definition {
        let expense = store
            .insert_expense(&ExpenseDraft::new(
                "Car insurance",
                150.0,
                ExpenseCategory::Bill,
                RecurrenceRule::monthly(anchor),
            ))
            .unwrap();
        Definition::Expense(expense)
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        monthly_expense(&store, 12);
        store
            .insert_income(&IncomeDraft::new("Salary", 1000.0, RecurrenceRule::weekly().with_pay_day(5)))
            .unwrap();
        let week = WeekKey::containing(date(2025, 3, 12));

        let first = materialize_week(&store, week, POLICY).unwrap();
        let second = materialize_week(&store, week, POLICY).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.entries.len(), 2);
        assert!(first.entries.iter().all(|e| e.is_calculated()));
        assert_eq!(first.expenses().count(), 1);
        assert_eq!(first.income().count(), 1);
    }

    #[test]
    fn test_entries_are_ordered_by_due_date() {
        let store = SqliteStore::open_in_memory().unwrap();
        monthly_expense(&store, 13);
        monthly_expense(&store, 8);
        let week = WeekKey::containing(date(2025, 3, 8));
        let schedule = materialize_week(&store, week, POLICY).unwrap();
        let dates: Vec<_> = schedule.entries.iter().map(|e| e.due_date).collect();
        assert_eq!(dates, vec![date(2025, 3, 8), date(2025, 3, 13)]);
    }

    #[test]
    fn test_moved_monthly_occurrence_never_returns() {
        let store = SqliteStore::open_in_memory().unwrap();
        let def = monthly_expense(&store, 10);
        let week_a = WeekKey::containing(date(2025, 3, 10));
        let week_b = week_a.next();
        materialize_week(&store, week_a, POLICY).unwrap();

        let moved = move_occurrence(&store, &def, week_a, date(2025, 3, 18), None).unwrap();
        assert_eq!(moved.week_key, week_b);
        assert_eq!(moved.origin_week_key, Some(week_a));
        assert!(moved.due_date_overridden);
        assert!(!moved.amount_overridden);

        for _ in 0..3 {
            let a = materialize_week(&store, week_a, POLICY).unwrap();
            assert!(a.is_empty());
            let b = materialize_week(&store, week_b, POLICY).unwrap();
            assert_eq!(b.entries.len(), 1);
            assert_eq!(b.entries[0].due_date, date(2025, 3, 18));
        }
    }

    fn weekly_expense(store: &SqliteStore) -> Definition {
        let expense = store
            .insert_expense(&ExpenseDraft::new(
                "Groceries",
                120.0,
                ExpenseCategory::Living,
                RecurrenceRule::weekly(),
            ))
            .unwrap();
        Definition::Expense(expense)
    }

    #[test]
    fn test_weekly_move_clears_every_row_of_the_definition() {
        let store = SqliteStore::open_in_memory().unwrap();
        let def = weekly_expense(&store);
        let first = WeekKey::containing(date(2025, 5, 2));
        let weeks = [first, first.next(), first.next().next(), first.next().next().next()];
        for week in weeks {
            materialize_week(&store, week, POLICY).unwrap();
        }
        let owner = ScheduleOwner::from(def.reference());
        assert_eq!(store.schedule_entries_for_owner(owner).unwrap().len(), 4);

        // Second week's occurrence moves to its Tuesday
        let moved = move_occurrence(&store, &def, weeks[1], date(2025, 5, 13), None).unwrap();
        let rows = store.schedule_entries_for_owner(owner).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, moved.id);

        for (i, week) in weeks.iter().enumerate() {
            let schedule = materialize_week(&store, *week, POLICY).unwrap();
            assert_eq!(schedule.expenses().count(), 1, "week {}", week);
            let entry = schedule.expenses().next().unwrap();
            if i == 1 {
                assert_eq!(entry.id, moved.id);
                assert_eq!(entry.due_date, date(2025, 5, 13));
            } else {
                assert!(entry.is_calculated());
                assert_eq!(entry.due_date, week.start());
            }
        }
    }

    #[test]
    fn test_relocate_only_clears_colliding_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let def = weekly_expense(&store);
        let w1 = WeekKey::containing(date(2025, 5, 2));
        let w2 = w1.next();
        let w3 = w2.next();
        for week in [w1, w2, w3] {
            materialize_week(&store, week, POLICY).unwrap();
        }
        set_amount_override(&store, &def, w3, 130.0, POLICY).unwrap();

        // First week's occurrence lands inside the second week
        let moved = relocate_occurrence(&store, &def, w1, date(2025, 5, 10)).unwrap();
        assert_eq!(moved.week_key, w2);
        assert_eq!(moved.origin_week_key, Some(w1));

        let owner = ScheduleOwner::from(def.reference());
        let rows = store.schedule_entries_for_owner(owner).unwrap();
        assert_eq!(rows.len(), 2);
        let kept = rows.iter().find(|e| e.week_key == w3).unwrap();
        assert_eq!(kept.amount, 130.0);
        assert!(materialize_week(&store, w1, POLICY).unwrap().is_empty());
    }

    #[test]
    fn test_move_with_amount_marks_amount_overridden() {
        let store = SqliteStore::open_in_memory().unwrap();
        let def = monthly_expense(&store, 10);
        let week = WeekKey::containing(date(2025, 3, 10));
        let moved = move_occurrence(&store, &def, week, date(2025, 3, 11), Some(99.0)).unwrap();
        assert!(moved.amount_overridden);
        assert_eq!(moved.amount, 99.0);
    }

    #[test]
    fn test_reset_due_date_keeps_amount_override() {
        let store = SqliteStore::open_in_memory().unwrap();
        let def = monthly_expense(&store, 10);
        let week = WeekKey::containing(date(2025, 3, 10));
        move_occurrence(&store, &def, week, date(2025, 3, 18), Some(99.0)).unwrap();

        let restored = reset_due_date(&store, &def, week, POLICY).unwrap().unwrap();
        assert_eq!(restored.due_date, date(2025, 3, 10));
        assert_eq!(restored.week_key, week);
        assert_eq!(restored.amount, 99.0);
        assert!(!restored.due_date_overridden);

        let schedule = materialize_week(&store, week, POLICY).unwrap();
        assert_eq!(schedule.entries.len(), 1);
    }

    #[test]
    fn test_reset_due_date_without_amount_override_deletes_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let def = monthly_expense(&store, 10);
        let week = WeekKey::containing(date(2025, 3, 10));
        move_occurrence(&store, &def, week, date(2025, 3, 18), None).unwrap();

        assert!(reset_due_date(&store, &def, week, POLICY).unwrap().is_none());
        let schedule = materialize_week(&store, week, POLICY).unwrap();
        assert_eq!(schedule.entries[0].due_date, date(2025, 3, 10));
        assert!(schedule.entries[0].is_calculated());
    }

    #[test]
    fn test_invalidation_keeps_explicit_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let def = monthly_expense(&store, 10);
        let march = WeekKey::containing(date(2025, 3, 10));
        let april = WeekKey::containing(date(2025, 4, 10));
        materialize_week(&store, march, POLICY).unwrap();
        move_occurrence(&store, &def, april, date(2025, 4, 9), None).unwrap();

        assert_eq!(invalidate_definition(&store, def.reference()).unwrap(), 1);
        let remaining = store.list_schedule_entries().unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].due_date_overridden);
    }
}
