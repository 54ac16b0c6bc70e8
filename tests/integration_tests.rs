use chrono::{Datelike, NaiveDate};
use weekly_budget_engine::*;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn week_of(y: i32, m: u32, d: u32) -> WeekKey {
    WeekKey::containing(date(y, m, d))
}

fn weekly_budget(income: f64, expense: f64) -> (BudgetEngine, Income, Expense) {
    let engine = BudgetEngine::in_memory().unwrap();
    let income = engine
        .create_income(IncomeDraft::new("Wages", income, RecurrenceRule::weekly()))
        .unwrap();
    let expense = engine
        .create_expense(ExpenseDraft::new(
            "Groceries",
            expense,
            ExpenseCategory::Living,
            RecurrenceRule::weekly(),
        ))
        .unwrap();
    (engine, income, expense)
}

#[test]
fn test_weekly_income_and_expense_summary() {
    let (engine, _, _) = weekly_budget(1000.0, 200.0);
    let week = week_of(2025, 5, 2);

    let summary = engine.get_week_summary(week).unwrap();
    assert_eq!(summary.weekly_income, 1000.0);
    assert_eq!(summary.total_expenses, 200.0);
    assert_eq!(summary.remaining, 800.0);
    assert_eq!(summary.next_week.base_remaining, 800.0);
    assert!(summary.next_week_warning.is_none());
    assert_eq!(summary.safe_to_spend, 1600.0);

    engine.set_actual_balance(week, 700.0).unwrap();
    let summary = engine.get_week_summary(week).unwrap();
    assert_eq!(summary.actual_balance, Some(700.0));
    assert_eq!(summary.untracked, Some(100.0));

    assert!(engine.clear_actual_balance(week).unwrap());
    assert_eq!(engine.get_week_summary(week).unwrap().untracked, None);
}

#[test]
fn test_monthly_anchor_31_lands_on_last_day_of_february() {
    let engine = BudgetEngine::in_memory().unwrap();
    engine
        .create_expense(ExpenseDraft::new(
            "Credit card",
            250.0,
            ExpenseCategory::Debt,
            RecurrenceRule::monthly(31),
        ))
        .unwrap();

    let schedule = engine.get_week_schedule(week_of(2025, 2, 28)).unwrap();
    assert_eq!(schedule.entries.len(), 1);
    assert_eq!(schedule.entries[0].due_date, date(2025, 2, 28));
    assert!(schedule.entries[0].is_calculated());
}

#[test]
fn test_partial_then_full_payment() {
    let (engine, _, expense) = weekly_budget(1000.0, 100.0);
    let week = week_of(2025, 5, 2);

    engine.add_payment(expense.id, week, 50.0, None).unwrap();
    engine.add_payment(expense.id, week, 30.0, Some(date(2025, 5, 3))).unwrap();
    let status = engine.payment_status(expense.id, week).unwrap();
    assert_eq!(status.state, PaymentState::Partial);
    assert_eq!(status.total_paid, 80.0);

    engine.add_payment(expense.id, week, 20.0, None).unwrap();
    let status = engine.payment_status(expense.id, week).unwrap();
    assert_eq!(status.state, PaymentState::Paid);
    assert_eq!(status.total_paid, 100.0);

    let summary = engine.get_week_summary(week).unwrap();
    assert_eq!(summary.total_paid, 100.0);
    assert_eq!(summary.total_unpaid, 0.0);
}

#[test]
fn test_payment_totals_follow_deletions() {
    let (engine, _, expense) = weekly_budget(1000.0, 100.0);
    let week = week_of(2025, 5, 2);

    let x = engine.add_payment(expense.id, week, 33.5, None).unwrap();
    engine.add_payment(expense.id, week, 21.25, None).unwrap();
    engine.delete_payment(x.id).unwrap();

    assert_eq!(engine.payment_status(expense.id, week).unwrap().total_paid, 21.25);
    assert_eq!(engine.payments_for_week(week).unwrap().len(), 1);
    assert_eq!(engine.clear_payments(expense.id, week).unwrap(), 1);
    assert_eq!(
        engine.payment_status(expense.id, week).unwrap().state,
        PaymentState::Unpaid
    );
}

#[test]
fn test_biweekly_income_alternates() {
    let engine = BudgetEngine::in_memory().unwrap();
    let start = date(2025, 1, 3);
    engine
        .create_income(IncomeDraft::new("Paycheck", 1500.0, RecurrenceRule::biweekly(start)))
        .unwrap();

    let mut week = WeekKey::containing(start);
    for n in 0..10 {
        let schedule = engine.get_week_schedule(week).unwrap();
        assert_eq!(schedule.income().count(), usize::from(n % 2 == 0), "week {}", week);
        week = week.next();
    }
}

#[test]
fn test_materialization_is_idempotent() {
    let (engine, _, _) = weekly_budget(1000.0, 200.0);
    engine
        .create_expense(ExpenseDraft::new(
            "Phone",
            40.0,
            ExpenseCategory::Bill,
            RecurrenceRule::monthly(6),
        ))
        .unwrap();
    let week = week_of(2025, 5, 2);

    let first = engine.get_week_schedule(week).unwrap();
    for _ in 0..3 {
        assert_eq!(engine.get_week_schedule(week).unwrap(), first);
    }
    assert_eq!(first.entries.len(), 3);
    assert_eq!(engine.store().list_schedule_entries().unwrap().len(), 3);
}

#[test]
fn test_moved_monthly_expense_leaves_original_week_for_good() {
    let engine = BudgetEngine::in_memory().unwrap();
    let expense = engine
        .create_expense(ExpenseDraft::new(
            "Insurance",
            120.0,
            ExpenseCategory::Bill,
            RecurrenceRule::monthly(10),
        ))
        .unwrap();
    let week_a = week_of(2025, 3, 10);
    let week_b = week_a.next();

    assert_eq!(engine.get_week_schedule(week_a).unwrap().entries.len(), 1);
    let moved = engine
        .set_due_date(expense.id, week_a, date(2025, 3, 18), None)
        .unwrap();
    assert_eq!(moved.week_key, week_b);

    for _ in 0..3 {
        assert!(engine.get_week_schedule(week_a).unwrap().is_empty());
        let b = engine.get_week_schedule(week_b).unwrap();
        assert_eq!(b.entries.len(), 1);
        assert_eq!(b.entries[0].due_date, date(2025, 3, 18));
        assert!(!b.entries[0].is_calculated());
    }

    let report = engine.crosscheck(week_b).unwrap();
    assert_eq!(report.summary.extra, 1);
    assert_eq!(report.summary.missing, 0);

    // The following month is untouched
    let april = engine.get_week_schedule(week_of(2025, 4, 10)).unwrap();
    assert_eq!(april.entries[0].due_date, date(2025, 4, 10));
}

#[test]
fn test_moving_a_pay_date_within_the_week() {
    let (engine, income, _) = weekly_budget(1000.0, 200.0);
    let week = week_of(2025, 3, 7);

    let moved = engine.set_pay_date(income.id, week, date(2025, 3, 10), Some(900.0)).unwrap();
    assert!(moved.amount_overridden && moved.due_date_overridden);

    let summary = engine.get_week_summary(week).unwrap();
    assert_eq!(summary.weekly_income, 900.0);

    let next = engine.get_week_schedule(week.next()).unwrap();
    let pay = next.income().next().unwrap();
    assert_eq!(pay.due_date, week.next().start());
    assert_eq!(pay.amount, 1000.0);

    // Resetting the date keeps the amount override
    let restored = engine.reset_pay_date(income.id, week).unwrap().unwrap();
    assert_eq!(restored.due_date, week.start());
    assert_eq!(restored.amount, 900.0);
}

#[test]
fn test_amount_override_and_reset() {
    let (engine, _, expense) = weekly_budget(1000.0, 200.0);
    let week = week_of(2025, 5, 2);
    let reference = DefinitionRef::Expense(expense.id);

    engine.set_amount_override(reference, week, 260.0).unwrap();
    assert_eq!(engine.get_week_summary(week).unwrap().total_expenses, 260.0);
    assert_eq!(engine.payment_status(expense.id, week).unwrap().resolved_amount, 260.0);

    assert!(engine.reset_amount_override(reference, week).unwrap().is_none());
    assert_eq!(engine.get_week_summary(week).unwrap().total_expenses, 200.0);

    assert!(engine
        .set_amount_override(reference, week, -1.0)
        .unwrap_err()
        .is_validation());
}

#[test]
fn test_remaining_identity_with_rollover_and_quick_expenses() {
    let (engine, _, _) = weekly_budget(812.34, 210.5);
    let week = week_of(2025, 5, 2);
    engine.set_rollover(week, -15.75).unwrap();
    engine.add_quick_expense(week, "Takeaway", 23.9, Some("friday")).unwrap();

    let summary = engine.get_week_summary(week).unwrap();
    assert_eq!(
        summary.remaining,
        (summary.weekly_income + summary.rollover) - summary.total_expenses
    );
    assert_eq!(summary.rollover, -15.75);
    assert_eq!(engine.quick_expenses_for_week(week).unwrap().len(), 1);
}

#[test]
fn test_deleting_a_quick_expense_removes_its_row() {
    let (engine, _, _) = weekly_budget(1000.0, 200.0);
    let week = week_of(2025, 5, 2);
    let quick = engine.add_quick_expense(week, "Taxi", 18.0, None).unwrap();
    assert_eq!(engine.get_week_schedule(week).unwrap().quick_expenses().count(), 1);

    engine.delete_quick_expense(quick.id).unwrap();
    assert_eq!(engine.get_week_schedule(week).unwrap().quick_expenses().count(), 0);
    assert!(engine.delete_quick_expense(quick.id).unwrap_err().is_not_found());
}

#[test]
fn test_definition_updates_rematerialize_calculated_rows() {
    let (engine, _, expense) = weekly_budget(1000.0, 200.0);
    let week = week_of(2025, 5, 2);
    assert_eq!(engine.get_week_summary(week).unwrap().total_expenses, 200.0);

    let mut draft = ExpenseDraft::new(
        "Groceries",
        250.0,
        ExpenseCategory::Living,
        RecurrenceRule::weekly(),
    );
    engine.update_expense(expense.id, draft.clone()).unwrap();
    assert_eq!(engine.get_week_summary(week).unwrap().total_expenses, 250.0);

    draft.is_active = false;
    engine.update_expense(expense.id, draft).unwrap();
    assert_eq!(engine.get_week_summary(week).unwrap().total_expenses, 0.0);
}

#[test]
fn test_one_time_expense_occurs_once() {
    let engine = BudgetEngine::in_memory().unwrap();
    engine
        .create_expense(ExpenseDraft::new(
            "Car registration",
            700.0,
            ExpenseCategory::Bill,
            RecurrenceRule::one_time(12, date(2025, 6, 1)),
        ))
        .unwrap();

    let mut hits = Vec::new();
    let mut week = week_of(2025, 5, 30);
    while week.start() < date(2025, 12, 31) {
        for entry in engine.get_week_schedule(week).unwrap().expenses() {
            hits.push(entry.due_date);
        }
        week = week.next();
    }
    assert_eq!(hits, vec![date(2025, 6, 12)]);
}

#[test]
fn test_overpayment_rejected_when_configured() {
    let config = BudgetConfig::from_json_str(r#"{"overpayment": "reject"}"#).unwrap();
    let engine = BudgetEngine::open(config).unwrap();
    let expense = engine
        .create_expense(ExpenseDraft::new(
            "Gas",
            60.0,
            ExpenseCategory::Bill,
            RecurrenceRule::weekly(),
        ))
        .unwrap();
    let week = week_of(2025, 5, 2);

    engine.add_payment(expense.id, week, 60.0, None).unwrap();
    assert!(engine
        .add_payment(expense.id, week, 0.01, None)
        .unwrap_err()
        .is_validation());
}

#[test]
fn test_backup_restores_into_a_fresh_engine() -> anyhow::Result<()> {
    let (engine, _, expense) = weekly_budget(1000.0, 200.0);
    let week = week_of(2025, 5, 2);
    engine.add_payment(expense.id, week, 75.0, None)?;
    engine.set_rollover(week, 40.0)?;
    engine.add_quick_expense(week, "Books", 12.0, None)?;
    engine.set_due_date(expense.id, week, date(2025, 5, 6), Some(210.0))?;
    let original = engine.get_week_summary(week)?;

    let json = engine.export_all()?.to_json()?;
    let document = BackupDocument::from_json(&json)?;

    let restored = BudgetEngine::in_memory()?;
    let counts = restored.import_all(&document, ImportOptions::default())?;
    assert_eq!(counts.expenses, 1);
    assert_eq!(counts.payments, 1);
    assert_eq!(counts.quick_expenses, 1);

    assert_eq!(restored.get_week_summary(week)?, original);
    Ok(())
}

#[test]
fn test_failed_import_changes_nothing() {
    let (engine, _, expense) = weekly_budget(1000.0, 200.0);
    let week = week_of(2025, 5, 2);
    engine.get_week_schedule(week).unwrap();
    let before = engine.export_all().unwrap().data;

    let mut data = BackupData::default();
    data.payments.push(Payment {
        id: 500,
        expense_id: expense.id + 100,
        week_key: week,
        amount_paid: 10.0,
        paid_date: week.start(),
    });
    let document = BackupDocument::new(data);

    let err = engine
        .import_all(&document, ImportOptions { clear_existing: true })
        .unwrap_err();
    assert!(matches!(err, BudgetError::Storage(_)));
    assert_eq!(engine.export_all().unwrap().data, before);
}

#[test]
fn test_legacy_overrides_resolve_and_backfill() {
    let (engine, _, expense) = weekly_budget(1000.0, 200.0);
    let week = week_of(2025, 5, 2);

    let mut data = BackupData::default();
    data.weekly_amount_overrides.push(WeeklyAmountOverride {
        expense_id: expense.id,
        week_key: week,
        actual_amount: 180.0,
    });
    engine
        .import_all(&BackupDocument::new(data), ImportOptions::default())
        .unwrap();

    // Legacy amount is the default until the schedule carries its own
    assert_eq!(engine.get_week_summary(week).unwrap().total_expenses, 180.0);

    let report = engine.backfill_legacy_overrides().unwrap();
    assert_eq!(report.amounts, 1);
    let entry = engine.get_week_schedule(week).unwrap();
    let groceries = entry.expenses().next().unwrap();
    assert!(groceries.amount_overridden);
    assert_eq!(engine.backfill_legacy_overrides().unwrap().total(), 0);
}

#[test]
fn test_file_backed_engine_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("budget.db");
    let week = week_of(2025, 5, 2);

    {
        let engine = BudgetEngine::open(BudgetConfig::with_database(&path)).unwrap();
        let expense = engine
            .create_expense(ExpenseDraft::new(
                "Rent",
                900.0,
                ExpenseCategory::Bill,
                RecurrenceRule::monthly(1),
            ))
            .unwrap();
        engine.add_payment(expense.id, week, 900.0, None).unwrap();
    }

    let engine = BudgetEngine::open(BudgetConfig::with_database(&path)).unwrap();
    let expenses = engine.list_expenses().unwrap();
    assert_eq!(expenses.len(), 1);
    assert_eq!(
        engine.payment_status(expenses[0].id, week).unwrap().state,
        PaymentState::Paid
    );
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"one_time": "recur_monthly", "default_pay_day": 2}"#).unwrap();

    let config = BudgetConfig::from_file(&path).unwrap();
    assert_eq!(config.one_time, OneTimePolicy::RecurMonthly);
    let engine = BudgetEngine::open(config).unwrap();
    let income = engine
        .create_income(IncomeDraft::new("Tips", 50.0, RecurrenceRule::weekly()))
        .unwrap();
    assert_eq!(income.recurrence.pay_day, Some(2));

    let schedule = engine.get_week_schedule(week_of(2025, 5, 2)).unwrap();
    let tips = schedule.income().next().unwrap();
    // Tuesday of the week starting Friday 2025-05-02
    assert_eq!(tips.due_date.weekday(), chrono::Weekday::Tue);
}

#[test]
fn test_import_snaps_week_keys_to_friday() -> anyhow::Result<()> {
    let (engine, _, expense) = weekly_budget(1000.0, 100.0);
    let week = week_of(2025, 5, 2);
    engine.add_payment(expense.id, week, 60.0, None)?;

    // Hand-edited backups may key a week by any of its days
    let mut value = serde_json::to_value(engine.export_all()?)?;
    value["data"]["payments"][0]["week_key"] = serde_json::json!("2025-05-04");
    value["data"]["rollovers"] = serde_json::json!([{"week_key": "2025-05-06", "rollover_amount": 25.0}]);
    let document: BackupDocument = serde_json::from_value(value)?;
    assert_eq!(document.data.payments[0].week_key, week);

    let restored = BudgetEngine::in_memory()?;
    restored.import_all(&document, ImportOptions::default())?;
    assert_eq!(restored.payment_status(expense.id, week)?.total_paid, 60.0);
    assert_eq!(restored.payments_for_week(week)?.len(), 1);
    assert_eq!(restored.get_rollover(week)?.map(|r| r.rollover_amount), Some(25.0));
    Ok(())
}

#[test]
fn test_moving_a_weekly_expense_leaves_no_stale_rows() {
    let (engine, _, expense) = weekly_budget(1000.0, 200.0);
    let first = week_of(2025, 5, 2);
    let weeks: Vec<WeekKey> = std::iter::successors(Some(first), |w| Some(w.next())).take(5).collect();
    for week in &weeks {
        engine.get_week_schedule(*week).unwrap();
    }
    engine
        .set_amount_override(DefinitionRef::Expense(expense.id), weeks[3], 240.0)
        .unwrap();

    engine.set_due_date(expense.id, weeks[2], date(2025, 5, 19), None).unwrap();

    for week in &weeks {
        let schedule = engine.get_week_schedule(*week).unwrap();
        let groceries: Vec<_> = schedule.expenses().collect();
        assert_eq!(groceries.len(), 1, "week {}", week);
        if *week == weeks[2] {
            assert_eq!(groceries[0].due_date, date(2025, 5, 19));
        } else {
            assert!(groceries[0].is_calculated(), "week {}", week);
            assert_eq!(groceries[0].amount, 200.0);
        }
    }
    assert_eq!(engine.store().list_schedule_entries().unwrap().len(), 10);
}

#[test]
fn test_concurrent_views_of_one_week() {
    let (engine, _, _) = weekly_budget(1000.0, 200.0);
    engine
        .create_expense(ExpenseDraft::new(
            "Phone",
            40.0,
            ExpenseCategory::Bill,
            RecurrenceRule::monthly(6),
        ))
        .unwrap();
    let week = week_of(2025, 5, 2);

    let schedules: Vec<WeekSchedule> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| engine.get_week_schedule(week)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect()
    });

    for schedule in &schedules {
        assert_eq!(schedule, &schedules[0]);
        assert_eq!(schedule.entries.len(), 3);
    }
    let rows = engine.store().list_schedule_entries().unwrap();
    assert_eq!(rows.len(), 3);
    let mut owners: Vec<_> = rows.iter().map(|e| e.owner).collect();
    owners.sort();
    owners.dedup();
    assert_eq!(owners.len(), 3);
}
