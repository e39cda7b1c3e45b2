//! Statistics over a date range
//!
//! Everything here is a pure function of the habit list and the ledger.
//! Entries for habits that are no longer registered are ignored.

use crate::entries::{day_key, parse_day, EntryLedger};
use crate::error::{HabitError, Result};
use crate::habits::Habit;
use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(HabitError::Validation(format!(
                "Range start {} is after its end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Range from two `YYYY-MM-DD` strings
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_day(start)?, parse_day(end)?)
    }

    /// The `days` days ending with `today`. Fails when the start would fall
    /// before the earliest representable date.
    pub fn last_days(days: u32, today: NaiveDate) -> Result<Self> {
        let span = i64::from(days.max(1)) - 1;
        let start = today.checked_sub_signed(Duration::days(span)).ok_or_else(|| {
            HabitError::Validation(format!("A range of {} days ending {} is too long", days, today))
        })?;
        Ok(Self { start, end: today })
    }

    /// Calendar month containing `date`
    pub fn month_of(date: NaiveDate) -> Self {
        let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
        let next_month = if date.month() == 12 {
            NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
        };
        let end = next_month.map(|d| d - Duration::days(1)).unwrap_or(date);
        Self { start, end }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days in the range
    pub fn day_count(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

fn number_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"-?\d+(?:[.,]\d+)?").ok())
        .as_ref()
}

/// First number in a free-text detail, accepting `,` as decimal mark
pub fn parse_numeric(text: &str) -> Option<f64> {
    let found = number_pattern()?.find(text)?;
    found.as_str().replace(',', ".").parse().ok()
}

/// Per-habit statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HabitStats {
    pub habit_id: String,
    pub name: String,
    /// Days in range with a saved record for this habit
    pub days_tracked: usize,
    pub days_done: usize,
    /// `days_done` over the number of days in range
    pub completion_rate: f64,
    /// Consecutive done days ending on the last day of the range
    pub current_streak: usize,
    pub longest_streak: usize,
    pub numeric_total: f64,
    pub numeric_count: usize,
}

impl HabitStats {
    pub fn numeric_average(&self) -> Option<f64> {
        (self.numeric_count > 0).then(|| self.numeric_total / self.numeric_count as f64)
    }
}

/// One point of the daily trend series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub range: DateRange,
    pub habits: Vec<HabitStats>,
    pub daily: Vec<DailyPoint>,
}

impl Report {
    /// Share of all habit-days in range that were done
    pub fn overall_rate(&self) -> f64 {
        let possible: usize = self.daily.iter().map(|p| p.total).sum();
        if possible == 0 {
            return 0.0;
        }
        let done: usize = self.daily.iter().map(|p| p.done).sum();
        done as f64 / possible as f64
    }
}

fn habit_stats(habit: &Habit, ledger: &EntryLedger, range: &DateRange) -> HabitStats {
    let mut stats = HabitStats {
        habit_id: habit.id.clone(),
        name: habit.name.clone(),
        days_tracked: 0,
        days_done: 0,
        completion_rate: 0.0,
        current_streak: 0,
        longest_streak: 0,
        numeric_total: 0.0,
        numeric_count: 0,
    };

    let mut run = 0;
    for date in range.days() {
        let entry = ledger
            .get(&day_key(date))
            .and_then(|day| day.get(&habit.id));

        if entry.is_some() {
            stats.days_tracked += 1;
        }

        if entry.map(|e| e.done).unwrap_or(false) {
            stats.days_done += 1;
            run += 1;
            stats.longest_streak = stats.longest_streak.max(run);
        } else {
            run = 0;
        }

        if habit.has_text {
            if let Some(value) = entry.and_then(|e| parse_numeric(&e.text)) {
                stats.numeric_total += value;
                stats.numeric_count += 1;
            }
        }
    }

    stats.current_streak = run;
    stats.completion_rate = stats.days_done as f64 / range.day_count() as f64;
    stats
}

pub fn build_report(habits: &[Habit], ledger: &EntryLedger, range: DateRange) -> Report {
    let daily = range
        .days()
        .map(|date| {
            let done = ledger
                .get(&day_key(date))
                .map(|day| {
                    habits
                        .iter()
                        .filter(|h| day.get(&h.id).map(|e| e.done).unwrap_or(false))
                        .count()
                })
                .unwrap_or(0);
            DailyPoint {
                date,
                done,
                total: habits.len(),
            }
        })
        .collect();

    Report {
        range,
        habits: habits
            .iter()
            .map(|habit| habit_stats(habit, ledger, &range))
            .collect(),
        daily,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::{DayRecord, HabitEntry};

    fn date(s: &str) -> NaiveDate {
        parse_day(s).unwrap()
    }

    fn ledger(days: Vec<(&str, Vec<(&str, bool, &str)>)>) -> EntryLedger {
        days.into_iter()
            .map(|(d, entries)| {
                let day: DayRecord = entries
                    .into_iter()
                    .map(|(id, done, text)| (id.to_string(), HabitEntry::new(done, text)))
                    .collect();
                (d.to_string(), day)
            })
            .collect()
    }

    #[test]
    fn test_range_constructors() {
        let range = DateRange::last_days(7, date("2024-03-10")).unwrap();
        assert_eq!(range.start(), date("2024-03-04"));
        assert_eq!(range.day_count(), 7);

        let feb = DateRange::month_of(date("2024-02-14"));
        assert_eq!(feb.start(), date("2024-02-01"));
        assert_eq!(feb.end(), date("2024-02-29"));

        let dec = DateRange::month_of(date("2023-12-31"));
        assert_eq!(dec.end(), date("2023-12-31"));
        assert_eq!(dec.days().count(), 31);

        assert!(DateRange::parse("2024-03-02", "2024-03-01").is_err());
        assert_eq!(DateRange::last_days(0, date("2024-03-10")).unwrap().day_count(), 1);
    }

    #[test]
    fn test_last_days_out_of_range() {
        assert!(matches!(
            DateRange::last_days(u32::MAX, date("2024-03-10")),
            Err(HabitError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("30 min"), Some(30.0));
        assert_eq!(parse_numeric("ran 2,5 km"), Some(2.5));
        assert_eq!(parse_numeric("-3.25"), Some(-3.25));
        assert_eq!(parse_numeric("none today"), None);
        assert_eq!(parse_numeric(""), None);
    }

    #[test]
    fn test_habit_stats_and_streaks() {
        let habits = vec![Habit::new("run", "Run").with_text("km")];
        let ledger = ledger(vec![
            ("2024-03-01", vec![("run", true, "5 km")]),
            ("2024-03-02", vec![("run", true, "3")]),
            ("2024-03-03", vec![("run", false, "")]),
            ("2024-03-04", vec![("run", true, "n/a")]),
            ("2024-03-05", vec![("run", true, "4,5")]),
        ]);
        let range = DateRange::parse("2024-03-01", "2024-03-05").unwrap();

        let report = build_report(&habits, &ledger, range);
        let stats = &report.habits[0];
        assert_eq!(stats.days_tracked, 5);
        assert_eq!(stats.days_done, 4);
        assert_eq!(stats.longest_streak, 2);
        assert_eq!(stats.current_streak, 2);
        assert!((stats.completion_rate - 0.8).abs() < 1e-9);
        assert_eq!(stats.numeric_count, 3);
        assert!((stats.numeric_total - 12.5).abs() < 1e-9);
        assert!((stats.numeric_average().unwrap() - 12.5 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_daily_series_ignores_orphans() {
        let habits = vec![Habit::new("a", "A"), Habit::new("b", "B")];
        let ledger = ledger(vec![
            ("2024-03-01", vec![("a", true, ""), ("gone", true, "")]),
            ("2024-03-03", vec![("a", true, ""), ("b", true, "")]),
        ]);
        let range = DateRange::parse("2024-03-01", "2024-03-03").unwrap();

        let report = build_report(&habits, &ledger, range);
        let done: Vec<usize> = report.daily.iter().map(|p| p.done).collect();
        assert_eq!(done, vec![1, 0, 2]);
        assert!(report.daily.iter().all(|p| p.total == 2));
        assert!((report.overall_rate() - 0.5).abs() < 1e-9);

        let b = &report.habits[1];
        assert_eq!(b.current_streak, 1);
        assert_eq!(b.days_tracked, 1);
        assert_eq!(b.numeric_average(), None);
    }
}
