//! Dates, tenors, calendars and day counting for FX option expiries.
//!
//! FX quotes are tenor-based: a "3M" smile refers to a delivery date advanced
//! from the FX spot date, with the option expiry (fixing date) rolled back by
//! the spot lag. This module provides just enough calendar machinery for that
//! arithmetic; holiday data beyond weekends is out of scope.

use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of a [`Period`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Days,
    Weeks,
    Months,
    Years,
}

/// A market tenor such as `1W`, `3M` or `2Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    length: i32,
    unit: TimeUnit,
}

impl Period {
    pub fn new(length: i32, unit: TimeUnit) -> Self {
        Period { length, unit }
    }

    pub fn days(n: i32) -> Self {
        Period::new(n, TimeUnit::Days)
    }

    pub fn weeks(n: i32) -> Self {
        Period::new(n, TimeUnit::Weeks)
    }

    pub fn months(n: i32) -> Self {
        Period::new(n, TimeUnit::Months)
    }

    pub fn years(n: i32) -> Self {
        Period::new(n, TimeUnit::Years)
    }

    pub fn length(&self) -> i32 {
        self.length
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.unit {
            TimeUnit::Days => "D",
            TimeUnit::Weeks => "W",
            TimeUnit::Months => "M",
            TimeUnit::Years => "Y",
        };
        write!(f, "{}{}", self.length, suffix)
    }
}

/// Date rolling convention applied when an advanced date lands on a holiday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusinessDayConvention {
    /// Roll forward to the next business day.
    Following,
    /// Roll forward unless that crosses a month boundary, then roll back.
    ModifiedFollowing,
    /// Roll back to the previous business day.
    Preceding,
}

/// Business-day calendar.
///
/// `Joint` combines two calendars; a date is a business day only if it is a
/// business day in both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Calendar {
    /// Every day is a business day.
    Null,
    /// Saturdays and Sundays are holidays.
    WeekendsOnly,
    /// Intersection of two calendars.
    Joint(Box<Calendar>, Box<Calendar>),
}

fn plus_days(d: NaiveDate, n: u64) -> NaiveDate {
    d.checked_add_days(Days::new(n)).unwrap_or(NaiveDate::MAX)
}

fn minus_days(d: NaiveDate, n: u64) -> NaiveDate {
    d.checked_sub_days(Days::new(n)).unwrap_or(NaiveDate::MIN)
}

fn plus_months(d: NaiveDate, n: i32) -> NaiveDate {
    if n >= 0 {
        d.checked_add_months(Months::new(n as u32))
            .unwrap_or(NaiveDate::MAX)
    } else {
        d.checked_sub_months(Months::new((-n) as u32))
            .unwrap_or(NaiveDate::MIN)
    }
}

impl Calendar {
    /// Joint calendar over `a` and `b`.
    pub fn joint(a: Calendar, b: Calendar) -> Self {
        Calendar::Joint(Box::new(a), Box::new(b))
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        match self {
            Calendar::Null => true,
            Calendar::WeekendsOnly => {
                !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
            }
            Calendar::Joint(a, b) => a.is_business_day(date) && b.is_business_day(date),
        }
    }

    /// Roll `date` onto a business day according to `convention`.
    pub fn adjust(&self, date: NaiveDate, convention: BusinessDayConvention) -> NaiveDate {
        match convention {
            BusinessDayConvention::Following => {
                let mut d = date;
                while !self.is_business_day(d) {
                    d = plus_days(d, 1);
                }
                d
            }
            BusinessDayConvention::ModifiedFollowing => {
                let rolled = self.adjust(date, BusinessDayConvention::Following);
                if rolled.month() != date.month() {
                    self.adjust(date, BusinessDayConvention::Preceding)
                } else {
                    rolled
                }
            }
            BusinessDayConvention::Preceding => {
                let mut d = date;
                while !self.is_business_day(d) {
                    d = minus_days(d, 1);
                }
                d
            }
        }
    }

    /// Advance by `n` business days (`n` may be negative).
    pub fn advance_business_days(&self, date: NaiveDate, n: i64) -> NaiveDate {
        let mut d = date;
        let mut remaining = n.abs();
        while remaining > 0 {
            d = if n > 0 { plus_days(d, 1) } else { minus_days(d, 1) };
            while !self.is_business_day(d) {
                d = if n > 0 { plus_days(d, 1) } else { minus_days(d, 1) };
            }
            remaining -= 1;
        }
        d
    }

    /// Last business day of the month containing `date`.
    pub fn end_of_month(&self, date: NaiveDate) -> NaiveDate {
        let first_next = plus_months(
            NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date),
            1,
        );
        self.adjust(minus_days(first_next, 1), BusinessDayConvention::Preceding)
    }

    /// Whether `date` is the last business day of its month.
    pub fn is_end_of_month(&self, date: NaiveDate) -> bool {
        self.is_business_day(date) && self.end_of_month(date) == date
    }

    /// Advance `date` by `period`, rolling per `convention`.
    ///
    /// Day periods advance business days; week periods advance calendar days
    /// and then roll. Month and year periods honour `end_of_month`: if the
    /// start date is the last business day of its month, the result is pinned
    /// to the last business day of the target month.
    pub fn advance(
        &self,
        date: NaiveDate,
        period: Period,
        convention: BusinessDayConvention,
        end_of_month: bool,
    ) -> NaiveDate {
        match period.unit() {
            TimeUnit::Days => self.advance_business_days(date, period.length() as i64),
            TimeUnit::Weeks => {
                let target = if period.length() >= 0 {
                    plus_days(date, 7 * period.length() as u64)
                } else {
                    minus_days(date, 7 * (-period.length()) as u64)
                };
                self.adjust(target, convention)
            }
            TimeUnit::Months | TimeUnit::Years => {
                let months = match period.unit() {
                    TimeUnit::Years => 12 * period.length(),
                    _ => period.length(),
                };
                let target = plus_months(date, months);
                if end_of_month && self.is_end_of_month(date) {
                    self.end_of_month(target)
                } else {
                    self.adjust(target, convention)
                }
            }
        }
    }
}

/// Day-count convention used to turn dates into year fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayCounter {
    /// Actual days divided by a fixed 365-day year.
    Act365Fixed,
}

impl DayCounter {
    pub fn year_fraction(&self, start: NaiveDate, end: NaiveDate) -> f64 {
        match self {
            DayCounter::Act365Fixed => (end - start).num_days() as f64 / 365.0,
        }
    }
}
