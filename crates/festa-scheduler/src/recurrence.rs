//! Recurrence matching — which records fall on a given day, and when each
//! record next comes around.
//!
//! Everything here is pure: same `(today, records)` in, same answer out.

use chrono::{Datelike, NaiveDate};
use festa_core::error::{FestaError, Result};
use festa_core::types::{DateRecord, LeapDayPolicy, NamedRecord};

/// A leap day can be up to 8 years away (e.g. 2096 → 2104).
const MAX_YEARS_AHEAD: i32 = 8;

/// An upcoming occurrence of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upcoming {
    pub record: NamedRecord,
    pub date: NaiveDate,
    pub days_until: i64,
    /// Years since the anchor year, as of `date`.
    pub years: Option<i32>,
}

/// Date matcher configured with a leap-day policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecurrenceMatcher {
    policy: LeapDayPolicy,
}

impl RecurrenceMatcher {
    pub fn new(policy: LeapDayPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> LeapDayPolicy {
        self.policy
    }

    /// The date a record is celebrated on in `year`, if it is celebrated at all.
    pub fn occurrence_in_year(&self, date: &DateRecord, year: i32) -> Option<NaiveDate> {
        if let Some(d) = NaiveDate::from_ymd_opt(year, date.month, date.day) {
            return Some(d);
        }
        if !date.is_leap_day() {
            return None;
        }
        match self.policy {
            LeapDayPolicy::Skip => None,
            LeapDayPolicy::Feb28 => NaiveDate::from_ymd_opt(year, 2, 28),
            LeapDayPolicy::Mar1 => NaiveDate::from_ymd_opt(year, 3, 1),
        }
    }

    /// Whether a record is celebrated on `day`. The record's year is ignored.
    pub fn occurs_on(&self, date: &DateRecord, day: NaiveDate) -> bool {
        self.occurrence_in_year(date, day.year()) == Some(day)
    }

    /// Records celebrated today, in input order.
    pub fn matches_today<'a>(
        &self,
        today: NaiveDate,
        records: &'a [NamedRecord],
    ) -> Vec<&'a NamedRecord> {
        records
            .iter()
            .filter(|r| self.occurs_on(&r.date, today))
            .collect()
    }

    /// Next celebration on or after `today`, with the day count until it.
    ///
    /// Fails with `InvalidDate` when the day/month never forms a real
    /// date within reach (e.g. 31.04, or 29.02 under a skipping policy in
    /// a span without leap years).
    pub fn next_occurrence(&self, date: &DateRecord, today: NaiveDate) -> Result<(NaiveDate, i64)> {
        for year in today.year()..=today.year() + MAX_YEARS_AHEAD {
            if let Some(candidate) = self.occurrence_in_year(date, year) {
                if candidate >= today {
                    return Ok((candidate, (candidate - today).num_days()));
                }
            }
        }
        Err(FestaError::InvalidDate {
            day: date.day,
            month: date.month,
        })
    }

    /// Upcoming occurrences sorted by `days_until` (stable). Records whose
    /// date cannot be formed are skipped.
    pub fn upcoming(&self, records: &[NamedRecord], today: NaiveDate) -> Vec<Upcoming> {
        let mut upcoming: Vec<Upcoming> = records
            .iter()
            .filter_map(|record| match self.next_occurrence(&record.date, today) {
                Ok((date, days_until)) => Some(Upcoming {
                    record: record.clone(),
                    date,
                    days_until,
                    years: years_since(&record.date, date.year()),
                }),
                Err(e) => {
                    tracing::debug!("Skipping '{}': {e}", record.label);
                    None
                }
            })
            .collect();
        upcoming.sort_by_key(|u| u.days_until);
        upcoming
    }
}

/// `reference_year - record.year`, or `None` without an anchor year.
pub fn years_since(date: &DateRecord, reference_year: i32) -> Option<i32> {
    date.year.map(|y| reference_year - y)
}

/// Calendar order for listings: by `(month, day)`, ties keep input order.
pub fn sort_for_listing(records: &mut [NamedRecord]) {
    records.sort_by_key(|r| (r.date.month, r.date.day));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rec(label: &str, day: u32, month: u32, year: Option<i32>) -> NamedRecord {
        NamedRecord::new(label, DateRecord::new(day, month, year).unwrap())
    }

    #[test]
    fn test_matches_today_ignores_year() {
        let records = vec![
            rec("Ann", 1, 1, Some(1990)),
            rec("Bob", 1, 1, None),
            rec("Cid", 2, 1, Some(1990)),
            rec("Dee", 1, 2, None),
        ];
        let matcher = RecurrenceMatcher::default();
        let hits: Vec<&str> = matcher
            .matches_today(ymd(2024, 1, 1), &records)
            .iter()
            .map(|r| r.label.as_str())
            .collect();
        assert_eq!(hits, vec!["Ann", "Bob"]);
    }

    #[test]
    fn test_matches_today_over_whole_year() {
        let matcher = RecurrenceMatcher::default();
        let records = vec![rec("X", 17, 8, None)];
        let mut day = ymd(2023, 1, 1);
        while day.year() == 2023 {
            let expected = day.day() == 17 && day.month() == 8;
            assert_eq!(!matcher.matches_today(day, &records).is_empty(), expected);
            day = day.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_next_occurrence_today_is_zero() {
        let matcher = RecurrenceMatcher::default();
        let (date, days) = matcher
            .next_occurrence(&DateRecord::new(15, 3, None).unwrap(), ymd(2024, 3, 15))
            .unwrap();
        assert_eq!(date, ymd(2024, 3, 15));
        assert_eq!(days, 0);
    }

    #[test]
    fn test_next_occurrence_rolls_over_year() {
        let matcher = RecurrenceMatcher::default();
        let (date, days) = matcher
            .next_occurrence(&DateRecord::new(1, 1, None).unwrap(), ymd(2024, 12, 31))
            .unwrap();
        assert_eq!(date, ymd(2025, 1, 1));
        assert_eq!(days, 1);

        let (date, days) = matcher
            .next_occurrence(&DateRecord::new(31, 12, None).unwrap(), ymd(2025, 1, 1))
            .unwrap();
        assert_eq!(date, ymd(2025, 12, 31));
        assert_eq!(days, 364);
    }

    #[test]
    fn test_leap_day_skips_to_next_leap_year() {
        let matcher = RecurrenceMatcher::default();
        let (date, days) = matcher
            .next_occurrence(&DateRecord::new(29, 2, None).unwrap(), ymd(2025, 3, 1))
            .unwrap();
        assert_eq!(date, ymd(2028, 2, 29));
        assert_eq!(days, (ymd(2028, 2, 29) - ymd(2025, 3, 1)).num_days());
        assert!(!matcher.occurs_on(&DateRecord::new(29, 2, None).unwrap(), ymd(2025, 2, 28)));
    }

    #[test]
    fn test_leap_day_policies() {
        let leap = DateRecord::new(29, 2, Some(2000)).unwrap();

        let feb28 = RecurrenceMatcher::new(LeapDayPolicy::Feb28);
        assert!(feb28.occurs_on(&leap, ymd(2025, 2, 28)));
        assert!(!feb28.occurs_on(&leap, ymd(2024, 2, 28)));
        assert!(feb28.occurs_on(&leap, ymd(2024, 2, 29)));

        let mar1 = RecurrenceMatcher::new(LeapDayPolicy::Mar1);
        assert!(mar1.occurs_on(&leap, ymd(2025, 3, 1)));
        assert!(!mar1.occurs_on(&leap, ymd(2024, 3, 1)));
        let (date, _) = mar1.next_occurrence(&leap, ymd(2025, 2, 1)).unwrap();
        assert_eq!(date, ymd(2025, 3, 1));
    }

    #[test]
    fn test_impossible_date_fails() {
        let matcher = RecurrenceMatcher::default();
        let bogus = DateRecord {
            day: 31,
            month: 4,
            year: None,
        };
        assert!(matches!(
            matcher.next_occurrence(&bogus, ymd(2024, 1, 1)),
            Err(FestaError::InvalidDate { day: 31, month: 4 })
        ));
    }

    #[test]
    fn test_years_since() {
        assert_eq!(years_since(&DateRecord::new(1, 6, Some(2015)).unwrap(), 2024), Some(9));
        assert_eq!(years_since(&DateRecord::new(1, 6, None).unwrap(), 2024), None);
    }

    #[test]
    fn test_upcoming_sorted_and_skips_invalid() {
        let matcher = RecurrenceMatcher::default();
        let records = vec![
            rec("Late", 10, 3, None),
            NamedRecord::new(
                "Broken",
                DateRecord {
                    day: 30,
                    month: 2,
                    year: None,
                },
            ),
            rec("Soon", 5, 3, Some(2010)),
            rec("AlsoSoon", 5, 3, None),
            rec("Passed", 1, 3, None),
        ];
        let list = matcher.upcoming(&records, ymd(2024, 3, 2));
        let labels: Vec<&str> = list.iter().map(|u| u.record.label.as_str()).collect();
        assert_eq!(labels, vec!["Soon", "AlsoSoon", "Late", "Passed"]);
        assert_eq!(list[0].days_until, 3);
        assert_eq!(list[0].years, Some(14));
        assert_eq!(list[3].date, ymd(2025, 3, 1));
    }

    #[test]
    fn test_sort_for_listing_is_stable() {
        let mut records = vec![
            rec("B", 5, 6, None),
            rec("A", 1, 2, None),
            rec("C", 5, 6, None),
        ];
        sort_for_listing(&mut records);
        let labels: Vec<&str> = records.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "B", "C"]);
    }
}
