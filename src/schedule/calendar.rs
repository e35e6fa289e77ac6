//! Calendar arithmetic for the schedule views.
//!
//! Weeks start on Sunday. No timezone handling: all dates are plain
//! calendar dates.

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const GRID_ROWS: usize = 6;
pub const DAYS_PER_WEEK: usize = 7;

/// Calendar display mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarView {
    #[default]
    Month,
    Week,
    Day,
}

impl fmt::Display for CalendarView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Month => write!(f, "month"),
            Self::Week => write!(f, "week"),
            Self::Day => write!(f, "day"),
        }
    }
}

impl FromStr for CalendarView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "month" => Ok(Self::Month),
            "week" => Ok(Self::Week),
            "day" => Ok(Self::Day),
            other => Err(format!("unknown calendar view: {}", other)),
        }
    }
}

/// `yyyy-mm-dd` key used for stored events
pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Sunday on or before `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

/// 6×7 grid covering the anchor's month, starting on the Sunday on or
/// before the 1st. Leading and trailing cells spill into the adjacent months.
pub fn month_grid(anchor: NaiveDate) -> Vec<[NaiveDate; DAYS_PER_WEEK]> {
    let mut cursor = week_start(first_of_month(anchor));
    (0..GRID_ROWS)
        .map(|_| {
            let row = week_from(cursor);
            cursor += Duration::days(DAYS_PER_WEEK as i64);
            row
        })
        .collect()
}

/// Sunday..Saturday containing the anchor
pub fn week_strip(anchor: NaiveDate) -> [NaiveDate; DAYS_PER_WEEK] {
    week_from(week_start(anchor))
}

pub fn day_view(anchor: NaiveDate) -> NaiveDate {
    anchor
}

fn week_from(start: NaiveDate) -> [NaiveDate; DAYS_PER_WEEK] {
    let mut days = [start; DAYS_PER_WEEK];
    for (offset, day) in days.iter_mut().enumerate() {
        *day = start + Duration::days(offset as i64);
    }
    days
}

/// Move the anchor by `steps` months, weeks or days. Month moves clamp the
/// day of month (Jan 31 + 1 month = Feb 28/29). Out-of-range moves keep
/// the anchor.
pub fn shift(anchor: NaiveDate, view: CalendarView, steps: i32) -> NaiveDate {
    let shifted = match view {
        CalendarView::Month => {
            let months = Months::new(steps.unsigned_abs());
            if steps >= 0 {
                anchor.checked_add_months(months)
            } else {
                anchor.checked_sub_months(months)
            }
        }
        CalendarView::Week => anchor.checked_add_signed(Duration::weeks(i64::from(steps))),
        CalendarView::Day => anchor.checked_add_signed(Duration::days(i64::from(steps))),
    };
    shifted.unwrap_or(anchor)
}

/// Header label for the view, e.g. "March 2024"
pub fn title(anchor: NaiveDate, view: CalendarView) -> String {
    match view {
        CalendarView::Month => anchor.format("%B %Y").to_string(),
        CalendarView::Week => {
            let days = week_strip(anchor);
            format!(
                "{} - {}",
                days[0].format("%b %-d"),
                days[DAYS_PER_WEEK - 1].format("%b %-d, %Y")
            )
        }
        CalendarView::Day => anchor.format("%A, %B %-d, %Y").to_string(),
    }
}
