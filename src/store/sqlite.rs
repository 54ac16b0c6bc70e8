//! SQLite-backed budget store.

use super::BudgetStore;
use crate::backup::{BackupData, ImportCounts, ImportOptions};
use crate::error::{BudgetError, Result};
use crate::schema::{
    ActualBalance, DefinitionRef, Expense, ExpenseCategory, ExpenseDraft, Frequency, Income,
    IncomeDraft, LegacyDueDate, NewScheduleEntry, Payment, QuickExpense, RecurrenceRule,
    Rollover, ScheduleEntry, ScheduleOwner, WeeklyAmountOverride, WeeklyIncomeOverride,
};
use crate::week::WeekKey;
use chrono::{NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS expenses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    amount REAL NOT NULL,
    category TEXT NOT NULL DEFAULT 'bill',
    frequency TEXT NOT NULL DEFAULT 'monthly',
    anchor_day INTEGER,
    pay_day INTEGER,
    start_date TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS income (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    amount REAL NOT NULL,
    frequency TEXT NOT NULL DEFAULT 'weekly',
    anchor_day INTEGER,
    pay_day INTEGER,
    start_date TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS quick_expenses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    week_key TEXT NOT NULL,
    name TEXT NOT NULL,
    amount REAL NOT NULL,
    note TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quick_expenses_week ON quick_expenses(week_key);

CREATE TABLE IF NOT EXISTS schedule_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    expense_id INTEGER REFERENCES expenses(id) ON DELETE CASCADE,
    income_id INTEGER REFERENCES income(id) ON DELETE CASCADE,
    quick_expense_id INTEGER REFERENCES quick_expenses(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    week_key TEXT NOT NULL,
    origin_week_key TEXT,
    due_date TEXT NOT NULL,
    amount REAL NOT NULL,
    amount_overridden INTEGER NOT NULL DEFAULT 0,
    due_date_overridden INTEGER NOT NULL DEFAULT 0,
    note TEXT,
    created_at TEXT NOT NULL,
    CHECK ((expense_id IS NOT NULL) + (income_id IS NOT NULL) + (quick_expense_id IS NOT NULL) = 1)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_schedule_expense_week
    ON schedule_entries(expense_id, week_key) WHERE expense_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_schedule_expense_origin
    ON schedule_entries(expense_id, origin_week_key) WHERE expense_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_schedule_income_week
    ON schedule_entries(income_id, week_key) WHERE income_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_schedule_income_origin
    ON schedule_entries(income_id, origin_week_key) WHERE income_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_schedule_quick_expense
    ON schedule_entries(quick_expense_id) WHERE quick_expense_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_schedule_due_date ON schedule_entries(due_date);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    expense_id INTEGER NOT NULL REFERENCES expenses(id) ON DELETE CASCADE,
    week_key TEXT NOT NULL,
    amount_paid REAL NOT NULL CHECK (amount_paid > 0),
    paid_date TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_payments_expense_week ON payments(expense_id, week_key);

CREATE TABLE IF NOT EXISTS weekly_amount_overrides (
    expense_id INTEGER NOT NULL REFERENCES expenses(id) ON DELETE CASCADE,
    week_key TEXT NOT NULL,
    actual_amount REAL NOT NULL,
    PRIMARY KEY (expense_id, week_key)
);

CREATE TABLE IF NOT EXISTS weekly_income_overrides (
    income_id INTEGER NOT NULL REFERENCES income(id) ON DELETE CASCADE,
    week_key TEXT NOT NULL,
    actual_amount REAL NOT NULL,
    received INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (income_id, week_key)
);

CREATE TABLE IF NOT EXISTS legacy_due_dates (
    expense_id INTEGER NOT NULL REFERENCES expenses(id) ON DELETE CASCADE,
    week_key TEXT NOT NULL,
    due_date TEXT NOT NULL,
    PRIMARY KEY (expense_id, week_key)
);

CREATE TABLE IF NOT EXISTS rollovers (
    week_key TEXT PRIMARY KEY NOT NULL,
    rollover_amount REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS actual_balances (
    week_key TEXT PRIMARY KEY NOT NULL,
    actual_balance REAL NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const EXPENSE_COLUMNS: &str =
    "id, name, amount, category, frequency, anchor_day, pay_day, start_date, is_active, created_at";
const INCOME_COLUMNS: &str =
    "id, name, amount, frequency, anchor_day, pay_day, start_date, is_active, created_at";
const SCHEDULE_COLUMNS: &str = "id, expense_id, income_id, quick_expense_id, name, week_key, \
     origin_week_key, due_date, amount, amount_overridden, due_date_overridden, note, created_at";

impl ToSql for WeekKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for WeekKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        NaiveDate::column_result(value).map(WeekKey::containing)
    }
}

impl ToSql for Frequency {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Frequency {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for ExpenseCategory {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ExpenseCategory {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

fn expense_from_row(row: &Row<'_>) -> rusqlite::Result<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        name: row.get(1)?,
        amount: row.get(2)?,
        category: row.get(3)?,
        recurrence: RecurrenceRule {
            frequency: row.get(4)?,
            anchor_day: row.get(5)?,
            pay_day: row.get(6)?,
            start_date: row.get(7)?,
        },
        is_active: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn income_from_row(row: &Row<'_>) -> rusqlite::Result<Income> {
    Ok(Income {
        id: row.get(0)?,
        name: row.get(1)?,
        amount: row.get(2)?,
        recurrence: RecurrenceRule {
            frequency: row.get(3)?,
            anchor_day: row.get(4)?,
            pay_day: row.get(5)?,
            start_date: row.get(6)?,
        },
        is_active: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleEntry> {
    let expense_id: Option<i64> = row.get(1)?;
    let income_id: Option<i64> = row.get(2)?;
    let quick_expense_id: Option<i64> = row.get(3)?;
    let owner = match (expense_id, income_id, quick_expense_id) {
        (Some(id), None, None) => ScheduleOwner::Expense(id),
        (None, Some(id), None) => ScheduleOwner::Income(id),
        (None, None, Some(id)) => ScheduleOwner::QuickExpense(id),
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                1,
                "expense_id".to_string(),
                Type::Null,
            ))
        }
    };

    Ok(ScheduleEntry {
        id: row.get(0)?,
        owner,
        name: row.get(4)?,
        week_key: row.get(5)?,
        origin_week_key: row.get(6)?,
        due_date: row.get(7)?,
        amount: row.get(8)?,
        amount_overridden: row.get(9)?,
        due_date_overridden: row.get(10)?,
        note: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        expense_id: row.get(1)?,
        week_key: row.get(2)?,
        amount_paid: row.get(3)?,
        paid_date: row.get(4)?,
    })
}

fn quick_expense_from_row(row: &Row<'_>) -> rusqlite::Result<QuickExpense> {
    Ok(QuickExpense {
        id: row.get(0)?,
        week_key: row.get(1)?,
        name: row.get(2)?,
        amount: row.get(3)?,
        note: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Splits an owner into the three nullable owner columns.
fn owner_columns(owner: ScheduleOwner) -> (Option<i64>, Option<i64>, Option<i64>) {
    match owner {
        ScheduleOwner::Expense(id) => (Some(id), None, None),
        ScheduleOwner::Income(id) => (None, Some(id), None),
        ScheduleOwner::QuickExpense(id) => (None, None, Some(id)),
    }
}

fn owner_filter(owner: ScheduleOwner) -> (&'static str, i64) {
    match owner {
        ScheduleOwner::Expense(id) => ("expense_id", id),
        ScheduleOwner::Income(id) => ("income_id", id),
        ScheduleOwner::QuickExpense(id) => ("quick_expense_id", id),
    }
}

fn insert_entry(conn: &Connection, entry: &NewScheduleEntry, on_conflict: &str) -> rusqlite::Result<usize> {
    let (expense_id, income_id, quick_expense_id) = owner_columns(entry.owner);
    conn.execute(
        &format!(
            "INSERT INTO schedule_entries (expense_id, income_id, quick_expense_id, name, week_key,
                 origin_week_key, due_date, amount, amount_overridden, due_date_overridden, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) {}",
            on_conflict
        ),
        params![
            expense_id,
            income_id,
            quick_expense_id,
            entry.name,
            entry.week_key,
            entry.origin_week_key,
            entry.due_date,
            entry.amount,
            entry.amount_overridden,
            entry.due_date_overridden,
            entry.note,
            Utc::now(),
        ],
    )
}

fn get_entry(conn: &Connection, id: i64) -> rusqlite::Result<Option<ScheduleEntry>> {
    conn.query_row(
        &format!("SELECT {} FROM schedule_entries WHERE id = ?1", SCHEDULE_COLUMNS),
        params![id],
        schedule_from_row,
    )
    .optional()
}

fn delete_entries(conn: &Connection, ids: &[i64]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare("DELETE FROM schedule_entries WHERE id = ?1")?;
    let mut deleted = 0;
    for id in ids {
        deleted += stmt.execute(params![id])?;
    }
    Ok(deleted)
}

const SAVEPOINT: &str = "budget_atomic";

/// Runs `work` inside a savepoint: released on success, rolled back on error.
/// Savepoints nest, so this is safe inside an outer `atomic` call.
fn atomic<T, E>(conn: &Connection, work: impl FnOnce(&Connection) -> std::result::Result<T, E>) -> std::result::Result<T, E>
where
    E: From<rusqlite::Error> + std::fmt::Display,
{
    conn.execute_batch(&format!("SAVEPOINT {}", SAVEPOINT))?;
    match work(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", SAVEPOINT))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = conn.execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", SAVEPOINT)) {
                warn!("Rollback after '{}' failed: {}", err, rollback);
            }
            Err(err)
        }
    }
}

/// Thread-safe SQLite store: one connection behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// The store as seen through one locked connection.
struct Db<'c> {
    conn: &'c Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        debug!("Opened budget database at {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BudgetError::StorageUnavailable("connection lock poisoned".to_string()))
    }

    fn clear_all(tx: &Connection) -> rusqlite::Result<()> {
        tx.execute_batch(
            "DELETE FROM schedule_entries;
             DELETE FROM payments;
             DELETE FROM weekly_amount_overrides;
             DELETE FROM weekly_income_overrides;
             DELETE FROM legacy_due_dates;
             DELETE FROM quick_expenses;
             DELETE FROM rollovers;
             DELETE FROM actual_balances;
             DELETE FROM expenses;
             DELETE FROM income;",
        )
    }

    fn import_into(tx: &Connection, data: &BackupData) -> rusqlite::Result<ImportCounts> {
        let mut counts = ImportCounts::default();

        for e in &data.expenses {
            tx.execute(
                "INSERT INTO expenses (id, name, amount, category, frequency, anchor_day, pay_day,
                     start_date, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name, amount = excluded.amount, category = excluded.category,
                     frequency = excluded.frequency, anchor_day = excluded.anchor_day,
                     pay_day = excluded.pay_day, start_date = excluded.start_date,
                     is_active = excluded.is_active, created_at = excluded.created_at",
                params![
                    e.id,
                    e.name,
                    e.amount,
                    e.category,
                    e.recurrence.frequency,
                    e.recurrence.anchor_day,
                    e.recurrence.pay_day,
                    e.recurrence.start_date,
                    e.is_active,
                    e.created_at,
                ],
            )?;
            counts.expenses += 1;
        }

        for i in &data.income {
            tx.execute(
                "INSERT INTO income (id, name, amount, frequency, anchor_day, pay_day, start_date,
                     is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name, amount = excluded.amount, frequency = excluded.frequency,
                     anchor_day = excluded.anchor_day, pay_day = excluded.pay_day,
                     start_date = excluded.start_date, is_active = excluded.is_active,
                     created_at = excluded.created_at",
                params![
                    i.id,
                    i.name,
                    i.amount,
                    i.recurrence.frequency,
                    i.recurrence.anchor_day,
                    i.recurrence.pay_day,
                    i.recurrence.start_date,
                    i.is_active,
                    i.created_at,
                ],
            )?;
            counts.income += 1;
        }

        for q in &data.quick_expenses {
            tx.execute(
                "INSERT INTO quick_expenses (id, week_key, name, amount, note, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     week_key = excluded.week_key, name = excluded.name, amount = excluded.amount,
                     note = excluded.note, created_at = excluded.created_at",
                params![q.id, q.week_key, q.name, q.amount, q.note, q.created_at],
            )?;
            counts.quick_expenses += 1;
        }

        for p in &data.payments {
            tx.execute(
                "INSERT INTO payments (id, expense_id, week_key, amount_paid, paid_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     expense_id = excluded.expense_id, week_key = excluded.week_key,
                     amount_paid = excluded.amount_paid, paid_date = excluded.paid_date",
                params![p.id, p.expense_id, p.week_key, p.amount_paid, p.paid_date],
            )?;
            counts.payments += 1;
        }

        for r in &data.rollovers {
            tx.execute(
                "INSERT INTO rollovers (week_key, rollover_amount) VALUES (?1, ?2)
                 ON CONFLICT(week_key) DO UPDATE SET rollover_amount = excluded.rollover_amount",
                params![r.week_key, r.rollover_amount],
            )?;
            counts.rollovers += 1;
        }

        for o in &data.weekly_income_overrides {
            tx.execute(
                "INSERT INTO weekly_income_overrides (income_id, week_key, actual_amount, received)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(income_id, week_key) DO UPDATE SET
                     actual_amount = excluded.actual_amount, received = excluded.received",
                params![o.income_id, o.week_key, o.actual_amount, o.received],
            )?;
            counts.weekly_income_overrides += 1;
        }

        for o in &data.weekly_amount_overrides {
            tx.execute(
                "INSERT INTO weekly_amount_overrides (expense_id, week_key, actual_amount)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(expense_id, week_key) DO UPDATE SET actual_amount = excluded.actual_amount",
                params![o.expense_id, o.week_key, o.actual_amount],
            )?;
            counts.weekly_amount_overrides += 1;
        }

        for d in &data.legacy_due_dates {
            tx.execute(
                "INSERT INTO legacy_due_dates (expense_id, week_key, due_date) VALUES (?1, ?2, ?3)
                 ON CONFLICT(expense_id, week_key) DO UPDATE SET due_date = excluded.due_date",
                params![d.expense_id, d.week_key, d.due_date],
            )?;
            counts.legacy_due_dates += 1;
        }

        for s in &data.schedule {
            let (expense_id, income_id, quick_expense_id) = owner_columns(s.owner);
            // Rows clashing on id or on a natural key give way to the imported row
            tx.execute(
                "DELETE FROM schedule_entries
                 WHERE id = ?1
                    OR (?2 IS NOT NULL AND expense_id = ?2 AND (week_key = ?5 OR origin_week_key = ?6))
                    OR (?3 IS NOT NULL AND income_id = ?3 AND (week_key = ?5 OR origin_week_key = ?6))
                    OR (?4 IS NOT NULL AND quick_expense_id = ?4)",
                params![s.id, expense_id, income_id, quick_expense_id, s.week_key, s.origin_week_key],
            )?;
            tx.execute(
                "INSERT INTO schedule_entries (id, expense_id, income_id, quick_expense_id, name,
                     week_key, origin_week_key, due_date, amount, amount_overridden,
                     due_date_overridden, note, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    s.id,
                    expense_id,
                    income_id,
                    quick_expense_id,
                    s.name,
                    s.week_key,
                    s.origin_week_key,
                    s.due_date,
                    s.amount,
                    s.amount_overridden,
                    s.due_date_overridden,
                    s.note,
                    s.created_at,
                ],
            )?;
            counts.schedule += 1;
        }

        for b in &data.balances {
            tx.execute(
                "INSERT INTO actual_balances (week_key, actual_balance, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(week_key) DO UPDATE SET
                     actual_balance = excluded.actual_balance, updated_at = excluded.updated_at",
                params![b.week_key, b.actual_balance, b.updated_at],
            )?;
            counts.balances += 1;
        }

        Ok(counts)
    }
}

impl BudgetStore for Db<'_> {
    fn insert_expense(&self, draft: &ExpenseDraft) -> Result<Expense> {
        let conn = self.conn;
        conn.execute(
            "INSERT INTO expenses (name, amount, category, frequency, anchor_day, pay_day,
                 start_date, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                draft.name,
                draft.amount,
                draft.category,
                draft.recurrence.frequency,
                draft.recurrence.anchor_day,
                draft.recurrence.pay_day,
                draft.recurrence.start_date,
                draft.is_active,
                Utc::now(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {} FROM expenses WHERE id = ?1", EXPENSE_COLUMNS),
            params![id],
            expense_from_row,
        )
        .map_err(BudgetError::from)
    }

    fn update_expense(&self, id: i64, draft: &ExpenseDraft) -> Result<Expense> {
        let conn = self.conn;
        let changed = conn.execute(
            "UPDATE expenses SET name = ?2, amount = ?3, category = ?4, frequency = ?5,
                 anchor_day = ?6, pay_day = ?7, start_date = ?8, is_active = ?9
             WHERE id = ?1",
            params![
                id,
                draft.name,
                draft.amount,
                draft.category,
                draft.recurrence.frequency,
                draft.recurrence.anchor_day,
                draft.recurrence.pay_day,
                draft.recurrence.start_date,
                draft.is_active,
            ],
        )?;
        if changed == 0 {
            return Err(BudgetError::not_found("Expense", id));
        }
        conn.query_row(
            &format!("SELECT {} FROM expenses WHERE id = ?1", EXPENSE_COLUMNS),
            params![id],
            expense_from_row,
        )
        .map_err(BudgetError::from)
    }

    fn delete_expense(&self, id: i64) -> Result<bool> {
        let conn = self.conn;
        let deleted = conn.execute("DELETE FROM expenses WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn get_expense(&self, id: i64) -> Result<Option<Expense>> {
        let conn = self.conn;
        let expense = conn
            .query_row(
                &format!("SELECT {} FROM expenses WHERE id = ?1", EXPENSE_COLUMNS),
                params![id],
                expense_from_row,
            )
            .optional()?;
        Ok(expense)
    }

    fn list_expenses(&self) -> Result<Vec<Expense>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM expenses ORDER BY category, name, id",
            EXPENSE_COLUMNS
        ))?;
        let expenses = stmt
            .query_map([], expense_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(expenses)
    }

    fn insert_income(&self, draft: &IncomeDraft) -> Result<Income> {
        let conn = self.conn;
        conn.execute(
            "INSERT INTO income (name, amount, frequency, anchor_day, pay_day, start_date,
                 is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                draft.name,
                draft.amount,
                draft.recurrence.frequency,
                draft.recurrence.anchor_day,
                draft.recurrence.pay_day,
                draft.recurrence.start_date,
                draft.is_active,
                Utc::now(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {} FROM income WHERE id = ?1", INCOME_COLUMNS),
            params![id],
            income_from_row,
        )
        .map_err(BudgetError::from)
    }

    fn update_income(&self, id: i64, draft: &IncomeDraft) -> Result<Income> {
        let conn = self.conn;
        let changed = conn.execute(
            "UPDATE income SET name = ?2, amount = ?3, frequency = ?4, anchor_day = ?5,
                 pay_day = ?6, start_date = ?7, is_active = ?8
             WHERE id = ?1",
            params![
                id,
                draft.name,
                draft.amount,
                draft.recurrence.frequency,
                draft.recurrence.anchor_day,
                draft.recurrence.pay_day,
                draft.recurrence.start_date,
                draft.is_active,
            ],
        )?;
        if changed == 0 {
            return Err(BudgetError::not_found("Income source", id));
        }
        conn.query_row(
            &format!("SELECT {} FROM income WHERE id = ?1", INCOME_COLUMNS),
            params![id],
            income_from_row,
        )
        .map_err(BudgetError::from)
    }

    fn delete_income(&self, id: i64) -> Result<bool> {
        let conn = self.conn;
        let deleted = conn.execute("DELETE FROM income WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn get_income(&self, id: i64) -> Result<Option<Income>> {
        let conn = self.conn;
        let income = conn
            .query_row(
                &format!("SELECT {} FROM income WHERE id = ?1", INCOME_COLUMNS),
                params![id],
                income_from_row,
            )
            .optional()?;
        Ok(income)
    }

    fn list_income(&self) -> Result<Vec<Income>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM income ORDER BY name, id",
            INCOME_COLUMNS
        ))?;
        let income = stmt
            .query_map([], income_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(income)
    }

    fn insert_schedule_entry_if_absent(&self, entry: &NewScheduleEntry) -> Result<bool> {
        let conn = self.conn;
        let inserted = insert_entry(conn, entry, "ON CONFLICT DO NOTHING")?;
        Ok(inserted > 0)
    }

    fn insert_schedule_entry(&self, entry: &NewScheduleEntry) -> Result<ScheduleEntry> {
        let conn = self.conn;
        insert_entry(conn, entry, "")?;
        let id = conn.last_insert_rowid();
        get_entry(conn, id)?.ok_or_else(|| BudgetError::not_found("Schedule entry", id))
    }

    fn get_schedule_entry(&self, id: i64) -> Result<Option<ScheduleEntry>> {
        let conn = self.conn;
        Ok(get_entry(conn, id)?)
    }

    fn find_occurrence(&self, owner: ScheduleOwner, week: WeekKey) -> Result<Option<ScheduleEntry>> {
        let conn = self.conn;
        let (column, id) = owner_filter(owner);
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {} FROM schedule_entries
                     WHERE {} = ?1 AND (origin_week_key = ?2 OR week_key = ?2)
                     ORDER BY (origin_week_key IS NOT NULL AND origin_week_key = ?2) DESC, id
                     LIMIT 1",
                    SCHEDULE_COLUMNS, column
                ),
                params![id, week],
                schedule_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn update_schedule_entry(&self, entry: &ScheduleEntry) -> Result<()> {
        let conn = self.conn;
        let changed = conn.execute(
            "UPDATE schedule_entries SET name = ?2, week_key = ?3, origin_week_key = ?4,
                 due_date = ?5, amount = ?6, amount_overridden = ?7, due_date_overridden = ?8,
                 note = ?9
             WHERE id = ?1",
            params![
                entry.id,
                entry.name,
                entry.week_key,
                entry.origin_week_key,
                entry.due_date,
                entry.amount,
                entry.amount_overridden,
                entry.due_date_overridden,
                entry.note,
            ],
        )?;
        if changed == 0 {
            return Err(BudgetError::not_found("Schedule entry", entry.id));
        }
        Ok(())
    }

    fn delete_schedule_entries(&self, ids: &[i64]) -> Result<usize> {
        let conn = self.conn;
        Ok(delete_entries(conn, ids)?)
    }

    fn schedule_entries_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ScheduleEntry>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schedule_entries
             WHERE due_date >= ?1 AND due_date <= ?2
             ORDER BY due_date, id",
            SCHEDULE_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![from, to], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn schedule_entries_for_owner(&self, owner: ScheduleOwner) -> Result<Vec<ScheduleEntry>> {
        let conn = self.conn;
        let (column, id) = owner_filter(owner);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schedule_entries WHERE {} = ?1 ORDER BY due_date, id",
            SCHEDULE_COLUMNS, column
        ))?;
        let entries = stmt
            .query_map(params![id], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn list_schedule_entries(&self) -> Result<Vec<ScheduleEntry>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schedule_entries ORDER BY id",
            SCHEDULE_COLUMNS
        ))?;
        let entries = stmt
            .query_map([], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn replace_schedule_entries(&self, delete_ids: &[i64], entry: &NewScheduleEntry) -> Result<ScheduleEntry> {
        atomic(self.conn, |conn| {
            delete_entries(conn, delete_ids)?;
            insert_entry(conn, entry, "")?;
            let id = conn.last_insert_rowid();
            get_entry(conn, id)?.ok_or_else(|| BudgetError::not_found("Schedule entry", id))
        })
    }

    fn delete_calculated_entries(&self, reference: DefinitionRef) -> Result<usize> {
        let conn = self.conn;
        let (column, id) = owner_filter(reference.into());
        let deleted = conn.execute(
            &format!(
                "DELETE FROM schedule_entries
                 WHERE {} = ?1 AND amount_overridden = 0 AND due_date_overridden = 0",
                column
            ),
            params![id],
        )?;
        Ok(deleted)
    }

    fn legacy_expense_amount(&self, expense_id: i64, week: WeekKey) -> Result<Option<f64>> {
        let conn = self.conn;
        let amount = conn
            .query_row(
                "SELECT actual_amount FROM weekly_amount_overrides WHERE expense_id = ?1 AND week_key = ?2",
                params![expense_id, week],
                |row| row.get(0),
            )
            .optional()?;
        Ok(amount)
    }

    fn legacy_income_amount(&self, income_id: i64, week: WeekKey) -> Result<Option<f64>> {
        let conn = self.conn;
        let amount = conn
            .query_row(
                "SELECT actual_amount FROM weekly_income_overrides WHERE income_id = ?1 AND week_key = ?2",
                params![income_id, week],
                |row| row.get(0),
            )
            .optional()?;
        Ok(amount)
    }

    fn list_weekly_amount_overrides(&self) -> Result<Vec<WeeklyAmountOverride>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(
            "SELECT expense_id, week_key, actual_amount FROM weekly_amount_overrides
             ORDER BY week_key, expense_id",
        )?;
        let overrides = stmt
            .query_map([], |row| {
                Ok(WeeklyAmountOverride {
                    expense_id: row.get(0)?,
                    week_key: row.get(1)?,
                    actual_amount: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(overrides)
    }

    fn list_weekly_income_overrides(&self) -> Result<Vec<WeeklyIncomeOverride>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(
            "SELECT income_id, week_key, actual_amount, received FROM weekly_income_overrides
             ORDER BY week_key, income_id",
        )?;
        let overrides = stmt
            .query_map([], |row| {
                Ok(WeeklyIncomeOverride {
                    income_id: row.get(0)?,
                    week_key: row.get(1)?,
                    actual_amount: row.get(2)?,
                    received: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(overrides)
    }

    fn list_legacy_due_dates(&self) -> Result<Vec<LegacyDueDate>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(
            "SELECT expense_id, week_key, due_date FROM legacy_due_dates ORDER BY week_key, expense_id",
        )?;
        let due_dates = stmt
            .query_map([], |row| {
                Ok(LegacyDueDate {
                    expense_id: row.get(0)?,
                    week_key: row.get(1)?,
                    due_date: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(due_dates)
    }

    fn insert_payment(&self, expense_id: i64, week: WeekKey, amount: f64, paid_date: NaiveDate) -> Result<Payment> {
        let conn = self.conn;
        conn.execute(
            "INSERT INTO payments (expense_id, week_key, amount_paid, paid_date) VALUES (?1, ?2, ?3, ?4)",
            params![expense_id, week, amount, paid_date],
        )?;
        Ok(Payment {
            id: conn.last_insert_rowid(),
            expense_id,
            week_key: week,
            amount_paid: amount,
            paid_date,
        })
    }

    fn delete_payment(&self, id: i64) -> Result<bool> {
        let conn = self.conn;
        let deleted = conn.execute("DELETE FROM payments WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn clear_payments(&self, expense_id: i64, week: WeekKey) -> Result<usize> {
        let conn = self.conn;
        let deleted = conn.execute(
            "DELETE FROM payments WHERE expense_id = ?1 AND week_key = ?2",
            params![expense_id, week],
        )?;
        Ok(deleted)
    }

    fn update_payment_date(&self, id: i64, paid_date: NaiveDate) -> Result<Option<Payment>> {
        let conn = self.conn;
        let changed = conn.execute(
            "UPDATE payments SET paid_date = ?2 WHERE id = ?1",
            params![id, paid_date],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let payment = conn
            .query_row(
                "SELECT id, expense_id, week_key, amount_paid, paid_date FROM payments WHERE id = ?1",
                params![id],
                payment_from_row,
            )
            .optional()?;
        Ok(payment)
    }

    fn payments_for(&self, expense_id: i64, week: WeekKey) -> Result<Vec<Payment>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(
            "SELECT id, expense_id, week_key, amount_paid, paid_date FROM payments
             WHERE expense_id = ?1 AND week_key = ?2
             ORDER BY paid_date, id",
        )?;
        let payments = stmt
            .query_map(params![expense_id, week], payment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(payments)
    }

    fn payments_for_week(&self, week: WeekKey) -> Result<Vec<Payment>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(
            "SELECT id, expense_id, week_key, amount_paid, paid_date FROM payments
             WHERE week_key = ?1
             ORDER BY expense_id, paid_date, id",
        )?;
        let payments = stmt
            .query_map(params![week], payment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(payments)
    }

    fn total_paid(&self, expense_id: i64, week: WeekKey) -> Result<f64> {
        let conn = self.conn;
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_paid), 0.0) FROM payments WHERE expense_id = ?1 AND week_key = ?2",
            params![expense_id, week],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    fn list_payments(&self) -> Result<Vec<Payment>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(
            "SELECT id, expense_id, week_key, amount_paid, paid_date FROM payments ORDER BY id",
        )?;
        let payments = stmt
            .query_map([], payment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(payments)
    }

    fn set_rollover(&self, week: WeekKey, amount: f64) -> Result<Rollover> {
        let conn = self.conn;
        conn.execute(
            "INSERT INTO rollovers (week_key, rollover_amount) VALUES (?1, ?2)
             ON CONFLICT(week_key) DO UPDATE SET rollover_amount = excluded.rollover_amount",
            params![week, amount],
        )?;
        Ok(Rollover {
            week_key: week,
            rollover_amount: amount,
        })
    }

    fn get_rollover(&self, week: WeekKey) -> Result<Option<Rollover>> {
        let conn = self.conn;
        let rollover = conn
            .query_row(
                "SELECT week_key, rollover_amount FROM rollovers WHERE week_key = ?1",
                params![week],
                |row| {
                    Ok(Rollover {
                        week_key: row.get(0)?,
                        rollover_amount: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(rollover)
    }

    fn delete_rollover(&self, week: WeekKey) -> Result<bool> {
        let conn = self.conn;
        let deleted = conn.execute("DELETE FROM rollovers WHERE week_key = ?1", params![week])?;
        Ok(deleted > 0)
    }

    fn list_rollovers(&self) -> Result<Vec<Rollover>> {
        let conn = self.conn;
        let mut stmt = conn.prepare("SELECT week_key, rollover_amount FROM rollovers ORDER BY week_key")?;
        let rollovers = stmt
            .query_map([], |row| {
                Ok(Rollover {
                    week_key: row.get(0)?,
                    rollover_amount: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rollovers)
    }

    fn set_actual_balance(&self, week: WeekKey, balance: f64) -> Result<ActualBalance> {
        let conn = self.conn;
        let updated_at = Utc::now();
        conn.execute(
            "INSERT INTO actual_balances (week_key, actual_balance, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(week_key) DO UPDATE SET
                 actual_balance = excluded.actual_balance, updated_at = excluded.updated_at",
            params![week, balance, updated_at],
        )?;
        Ok(ActualBalance {
            week_key: week,
            actual_balance: balance,
            updated_at,
        })
    }

    fn get_actual_balance(&self, week: WeekKey) -> Result<Option<ActualBalance>> {
        let conn = self.conn;
        let balance = conn
            .query_row(
                "SELECT week_key, actual_balance, updated_at FROM actual_balances WHERE week_key = ?1",
                params![week],
                |row| {
                    Ok(ActualBalance {
                        week_key: row.get(0)?,
                        actual_balance: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(balance)
    }

    fn delete_actual_balance(&self, week: WeekKey) -> Result<bool> {
        let conn = self.conn;
        let deleted = conn.execute("DELETE FROM actual_balances WHERE week_key = ?1", params![week])?;
        Ok(deleted > 0)
    }

    fn list_actual_balances(&self) -> Result<Vec<ActualBalance>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(
            "SELECT week_key, actual_balance, updated_at FROM actual_balances ORDER BY week_key",
        )?;
        let balances = stmt
            .query_map([], |row| {
                Ok(ActualBalance {
                    week_key: row.get(0)?,
                    actual_balance: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(balances)
    }

    fn insert_quick_expense(&self, week: WeekKey, name: &str, amount: f64, note: Option<&str>) -> Result<QuickExpense> {
        atomic(self.conn, |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO quick_expenses (week_key, name, amount, note, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![week, name, amount, note, created_at],
            )?;
            let quick = QuickExpense {
                id: conn.last_insert_rowid(),
                week_key: week,
                name: name.to_string(),
                amount,
                note: note.map(str::to_string),
                created_at,
            };
            insert_entry(conn, &NewScheduleEntry::for_quick_expense(&quick), "ON CONFLICT DO NOTHING")?;
            Ok::<_, BudgetError>(quick)
        })
    }

    fn get_quick_expense(&self, id: i64) -> Result<Option<QuickExpense>> {
        let conn = self.conn;
        let quick = conn
            .query_row(
                "SELECT id, week_key, name, amount, note, created_at FROM quick_expenses WHERE id = ?1",
                params![id],
                quick_expense_from_row,
            )
            .optional()?;
        Ok(quick)
    }

    fn delete_quick_expense(&self, id: i64) -> Result<bool> {
        let conn = self.conn;
        let deleted = conn.execute("DELETE FROM quick_expenses WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn quick_expenses_for_week(&self, week: WeekKey) -> Result<Vec<QuickExpense>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(
            "SELECT id, week_key, name, amount, note, created_at FROM quick_expenses
             WHERE week_key = ?1 ORDER BY id",
        )?;
        let quick = stmt
            .query_map(params![week], quick_expense_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(quick)
    }

    fn list_quick_expenses(&self) -> Result<Vec<QuickExpense>> {
        let conn = self.conn;
        let mut stmt = conn.prepare(
            "SELECT id, week_key, name, amount, note, created_at FROM quick_expenses ORDER BY id",
        )?;
        let quick = stmt
            .query_map([], quick_expense_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(quick)
    }

    fn import_backup(&self, data: &BackupData, options: &ImportOptions) -> Result<ImportCounts> {
        atomic(self.conn, |conn| {
            if options.clear_existing {
                SqliteStore::clear_all(conn)?;
            }
            Ok::<_, BudgetError>(SqliteStore::import_into(conn, data)?)
        })
    }

    fn atomically(&self, work: &mut dyn FnMut(&dyn BudgetStore) -> Result<()>) -> Result<()> {
        atomic(self.conn, |conn| work(&Db { conn }))
    }
}

/// Forwards each trait method to a [`Db`] over the locked connection.
macro_rules! locked {
    ($(fn $name:ident(&self $(, $arg:ident: $ty:ty)*) -> $ret:ty;)*) => {
        $(
            fn $name(&self $(, $arg: $ty)*) -> $ret {
                let conn = self.conn()?;
                Db { conn: &conn }.$name($($arg),*)
            }
        )*
    };
}

impl BudgetStore for SqliteStore {
    locked! {
        fn insert_expense(&self, draft: &ExpenseDraft) -> Result<Expense>;
        fn update_expense(&self, id: i64, draft: &ExpenseDraft) -> Result<Expense>;
        fn delete_expense(&self, id: i64) -> Result<bool>;
        fn get_expense(&self, id: i64) -> Result<Option<Expense>>;
        fn list_expenses(&self) -> Result<Vec<Expense>>;
        fn insert_income(&self, draft: &IncomeDraft) -> Result<Income>;
        fn update_income(&self, id: i64, draft: &IncomeDraft) -> Result<Income>;
        fn delete_income(&self, id: i64) -> Result<bool>;
        fn get_income(&self, id: i64) -> Result<Option<Income>>;
        fn list_income(&self) -> Result<Vec<Income>>;

        fn insert_schedule_entry_if_absent(&self, entry: &NewScheduleEntry) -> Result<bool>;
        fn insert_schedule_entry(&self, entry: &NewScheduleEntry) -> Result<ScheduleEntry>;
        fn get_schedule_entry(&self, id: i64) -> Result<Option<ScheduleEntry>>;
        fn find_occurrence(&self, owner: ScheduleOwner, week: WeekKey) -> Result<Option<ScheduleEntry>>;
        fn update_schedule_entry(&self, entry: &ScheduleEntry) -> Result<()>;
        fn delete_schedule_entries(&self, ids: &[i64]) -> Result<usize>;
        fn schedule_entries_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ScheduleEntry>>;
        fn schedule_entries_for_owner(&self, owner: ScheduleOwner) -> Result<Vec<ScheduleEntry>>;
        fn list_schedule_entries(&self) -> Result<Vec<ScheduleEntry>>;
        fn replace_schedule_entries(&self, delete_ids: &[i64], entry: &NewScheduleEntry) -> Result<ScheduleEntry>;
        fn delete_calculated_entries(&self, reference: DefinitionRef) -> Result<usize>;

        fn legacy_expense_amount(&self, expense_id: i64, week: WeekKey) -> Result<Option<f64>>;
        fn legacy_income_amount(&self, income_id: i64, week: WeekKey) -> Result<Option<f64>>;
        fn list_weekly_amount_overrides(&self) -> Result<Vec<WeeklyAmountOverride>>;
        fn list_weekly_income_overrides(&self) -> Result<Vec<WeeklyIncomeOverride>>;
        fn list_legacy_due_dates(&self) -> Result<Vec<LegacyDueDate>>;

        fn insert_payment(&self, expense_id: i64, week: WeekKey, amount: f64, paid_date: NaiveDate) -> Result<Payment>;
        fn delete_payment(&self, id: i64) -> Result<bool>;
        fn clear_payments(&self, expense_id: i64, week: WeekKey) -> Result<usize>;
        fn update_payment_date(&self, id: i64, paid_date: NaiveDate) -> Result<Option<Payment>>;
        fn payments_for(&self, expense_id: i64, week: WeekKey) -> Result<Vec<Payment>>;
        fn payments_for_week(&self, week: WeekKey) -> Result<Vec<Payment>>;
        fn total_paid(&self, expense_id: i64, week: WeekKey) -> Result<f64>;
        fn list_payments(&self) -> Result<Vec<Payment>>;

        fn set_rollover(&self, week: WeekKey, amount: f64) -> Result<Rollover>;
        fn get_rollover(&self, week: WeekKey) -> Result<Option<Rollover>>;
        fn delete_rollover(&self, week: WeekKey) -> Result<bool>;
        fn list_rollovers(&self) -> Result<Vec<Rollover>>;
        fn set_actual_balance(&self, week: WeekKey, balance: f64) -> Result<ActualBalance>;
        fn get_actual_balance(&self, week: WeekKey) -> Result<Option<ActualBalance>>;
        fn delete_actual_balance(&self, week: WeekKey) -> Result<bool>;
        fn list_actual_balances(&self) -> Result<Vec<ActualBalance>>;

        fn insert_quick_expense(&self, week: WeekKey, name: &str, amount: f64, note: Option<&str>) -> Result<QuickExpense>;
        fn get_quick_expense(&self, id: i64) -> Result<Option<QuickExpense>>;
        fn delete_quick_expense(&self, id: i64) -> Result<bool>;
        fn quick_expenses_for_week(&self, week: WeekKey) -> Result<Vec<QuickExpense>>;
        fn list_quick_expenses(&self) -> Result<Vec<QuickExpense>>;

        fn import_backup(&self, data: &BackupData, options: &ImportOptions) -> Result<ImportCounts>;
    }

    /// Holds the connection lock for the whole of `work`.
    fn atomically(&self, work: &mut dyn FnMut(&dyn BudgetStore) -> Result<()>) -> Result<()> {
        let conn = self.conn()?;
        Db { conn: &conn }.atomically(work)
    }
}
