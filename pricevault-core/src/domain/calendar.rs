//! Business-day calendar (Monday to Friday, no exchange holidays).

use chrono::{Datelike, Duration, NaiveDate, Weekday};

pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// `date` itself if it is a business day, otherwise the next one.
pub fn roll_forward(date: NaiveDate) -> NaiveDate {
    let mut d = date;
    while !is_business_day(d) {
        d += Duration::days(1);
    }
    d
}

/// `date` itself if it is a business day, otherwise the previous one.
pub fn roll_back(date: NaiveDate) -> NaiveDate {
    let mut d = date;
    while !is_business_day(d) {
        d -= Duration::days(1);
    }
    d
}

/// All business days in `[start, end]`, ascending.
pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| is_business_day(*d))
        .collect()
}

/// Number of business days in `[start, end]`. Zero when `start > end`.
pub fn business_day_count(start: NaiveDate, end: NaiveDate) -> usize {
    if start > end {
        return 0;
    }
    let total = (end - start).num_days() + 1;
    let full_weeks = total / 7;
    let mut count = full_weeks * 5;
    let mut d = start + Duration::days(full_weeks * 7);
    while d <= end {
        if is_business_day(d) {
            count += 1;
        }
        d += Duration::days(1);
    }
    count as usize
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Shift the start forward and the end backward onto business days.
    ///
    /// Returns `None` when no business day is left, e.g. a Saturday-to-Sunday request.
    pub fn normalized(&self) -> Option<DateWindow> {
        let start = roll_forward(self.start);
        let end = roll_back(self.end);
        (start <= end).then_some(DateWindow { start, end })
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn business_day_count(&self) -> usize {
        business_day_count(self.start, self.end)
    }

    /// Smallest window holding both.
    pub fn hull(self, other: DateWindow) -> DateWindow {
        DateWindow::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
