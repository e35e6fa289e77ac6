//! Personal schedule: calendar views and date-keyed events.

pub mod calendar;
pub mod store;

pub use calendar::{day_view, iso_date, month_grid, parse_iso_date, shift, week_strip, CalendarView};
pub use store::{EventMap, ScheduleError, ScheduleEvent, ScheduleStore, SCHEDULE_KEY};
