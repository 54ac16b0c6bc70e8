use crate::error::{BudgetError, Result};
use chrono::{Datelike, NaiveDate};

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, days_in_month(year, month)).ok_or_else(|| {
        BudgetError::DateError(format!("Invalid year/month combination: {}-{}", year, month))
    })
}

pub fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// Clamps an anchor day-of-month to the length of the given month.
///
/// An anchor of 31 maps to the 30th in April and to the 28th/29th in February.
pub fn effective_due_day(anchor_day: u32, year: i32, month: u32) -> u32 {
    anchor_day.min(days_in_month(year, month))
}

/// The clamped anchor date inside the given month.
pub fn anchor_date_in_month(anchor_day: u32, year: i32, month: u32) -> Result<NaiveDate> {
    let day = effective_due_day(anchor_day, year, month);
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        BudgetError::DateError(format!(
            "Anchor day {} does not resolve in {}-{:02}",
            anchor_day, year, month
        ))
    })
}

/// The first clamped anchor date on or after `from`.
pub fn first_anchor_on_or_after(anchor_day: u32, from: NaiveDate) -> Result<NaiveDate> {
    let candidate = anchor_date_in_month(anchor_day, from.year(), from.month())?;
    if candidate >= from {
        return Ok(candidate);
    }
    let (year, month) = next_month(from.year(), from.month());
    anchor_date_in_month(anchor_day, year, month)
}

pub fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

/// Whole weeks from `from` to `to`, rounded to the nearest week so that a
/// start date a few days off the week boundary still lands on the right week.
pub fn weeks_between(from: NaiveDate, to: NaiveDate) -> i64 {
    let days = (to - from).num_days();
    (days + 3).div_euclid(7)
}

/// Whole weeks elapsed since January 1st of the date's year (floored).
pub fn weeks_since_year_start(date: NaiveDate) -> i64 {
    i64::from(date.ordinal0()) / 7
}

/// Parses a strict `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        BudgetError::validation(
            "date",
            format!("'{}' must be a valid date in YYYY-MM-DD format", value),
        )
    })
}

pub fn validate_amount(field: &str, amount: f64) -> Result<()> {
    if !amount.is_finite() {
        return Err(BudgetError::validation(field, "amount must be a finite number"));
    }
    if amount < 0.0 {
        return Err(BudgetError::validation(
            field,
            format!("amount must not be negative, got {}", amount),
        ));
    }
    Ok(())
}

pub fn validate_finite(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(BudgetError::validation(field, "value must be a finite number"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(2023, 2).unwrap(), date(2023, 2, 28));
        assert_eq!(last_day_of_month(2024, 2).unwrap(), date(2024, 2, 29));
        assert_eq!(last_day_of_month(2023, 4).unwrap(), date(2023, 4, 30));
        assert!(last_day_of_month(2023, 13).is_err());
    }

    #[test]
    fn test_effective_due_day_never_exceeds_month_length() {
        for year in [2023, 2024, 1900, 2000] {
            for month in 1..=12 {
                for anchor in 29..=31 {
                    let effective = effective_due_day(anchor, year, month);
                    assert!(effective <= days_in_month(year, month));
                    if days_in_month(year, month) >= anchor {
                        assert_eq!(effective, anchor);
                    }
                }
            }
        }
    }

    #[test]
    fn test_first_anchor_on_or_after() {
        assert_eq!(
            first_anchor_on_or_after(15, date(2025, 3, 10)).unwrap(),
            date(2025, 3, 15)
        );
        assert_eq!(
            first_anchor_on_or_after(15, date(2025, 3, 16)).unwrap(),
            date(2025, 4, 15)
        );
        // Carried into a short month, the anchor clamps
        assert_eq!(
            first_anchor_on_or_after(31, date(2025, 1, 31)).unwrap(),
            date(2025, 1, 31)
        );
        assert_eq!(
            first_anchor_on_or_after(30, date(2023, 1, 31)).unwrap(),
            date(2023, 2, 28)
        );
    }

    #[test]
    fn test_weeks_between_rounds_to_nearest() {
        let start = date(2025, 1, 3);
        assert_eq!(weeks_between(start, date(2025, 1, 3)), 0);
        assert_eq!(weeks_between(start, date(2025, 1, 10)), 1);
        assert_eq!(weeks_between(start, date(2025, 1, 13)), 1);
        assert_eq!(weeks_between(start, date(2025, 1, 14)), 2);
        assert_eq!(weeks_between(date(2025, 1, 6), start), 0);
        assert_eq!(weeks_between(date(2025, 1, 7), start), -1);
        assert_eq!(weeks_between(date(2025, 1, 17), start), -2);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2025-02-28").unwrap(), date(2025, 2, 28));
        assert!(parse_date("2025-02-30").unwrap_err().is_validation());
        assert!(parse_date("02/28/2025").is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount("amount", 0.0).is_ok());
        assert!(validate_amount("amount", -1.0).is_err());
        assert!(validate_amount("amount", f64::NAN).is_err());
        assert!(validate_amount("amount", f64::INFINITY).is_err());
    }
}
