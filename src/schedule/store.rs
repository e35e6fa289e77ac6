//! Persisted schedule events, keyed by ISO date.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use super::calendar::{iso_date, parse_iso_date};
use crate::bus::{BusEvent, SharedBus};
use crate::storage::{LocalStore, StorageError};

/// Storage key for the event map
pub const SCHEDULE_KEY: &str = "schedule-events";
pub const DEFAULT_COLOR: &str = "blue";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("event title must not be empty")]
    EmptyTitle,

    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),

    #[error("no event #{index} on {date}")]
    NoSuchEvent { date: String, index: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub title: String,
    /// `HH:MM`
    pub time: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

impl ScheduleEvent {
    pub fn new(title: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            time: time.into(),
            color: default_color(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Trim the title and normalize the time to zero-padded `HH:MM`
    fn validated(self) -> Result<Self, ScheduleError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(ScheduleError::EmptyTitle);
        }
        let time = NaiveTime::parse_from_str(self.time.trim(), "%H:%M")
            .map_err(|_| ScheduleError::InvalidTime(self.time.clone()))?;
        let color = match self.color.trim() {
            "" => default_color(),
            color => color.to_string(),
        };
        Ok(Self {
            title,
            time: time.format("%H:%M").to_string(),
            color,
        })
    }
}

pub type EventMap = BTreeMap<String, Vec<ScheduleEvent>>;

/// Schedule events backed by the local store. Every mutation is written
/// through before it becomes visible.
pub struct ScheduleStore {
    store: LocalStore,
    bus: Option<SharedBus>,
    events: EventMap,
}

impl ScheduleStore {
    /// Load the stored map; a corrupt value starts an empty schedule
    pub fn open(store: LocalStore) -> Self {
        let events: EventMap = store.load_or_default(SCHEDULE_KEY);
        debug!("Loaded schedule with {} dates", events.len());
        Self {
            store,
            bus: None,
            events,
        }
    }

    /// Publish `ScheduleChanged` after each mutation
    pub fn with_bus(mut self, bus: SharedBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Append an event to `date`. Returns the new number of events that day.
    pub fn add(&mut self, date: NaiveDate, event: ScheduleEvent) -> Result<usize, ScheduleError> {
        let event = event.validated()?;
        let key = iso_date(date);

        let mut next = self.events.clone();
        let day = next.entry(key.clone()).or_default();
        day.push(event);
        let count = day.len();

        self.commit(next)?;
        info!("Added event on {} ({} total)", key, count);
        self.announce(key, count);
        Ok(count)
    }

    /// Remove the event at `index` on `date`. The date disappears from the
    /// map once its last event is gone.
    pub fn delete(&mut self, date: NaiveDate, index: usize) -> Result<ScheduleEvent, ScheduleError> {
        let key = iso_date(date);
        let missing = || ScheduleError::NoSuchEvent {
            date: key.clone(),
            index,
        };

        let mut next = self.events.clone();
        let day = next.get_mut(&key).ok_or_else(missing)?;
        if index >= day.len() {
            return Err(missing());
        }
        let removed = day.remove(index);
        let count = day.len();
        if count == 0 {
            next.remove(&key);
        }

        self.commit(next)?;
        info!("Deleted event on {} ({} left)", key, count);
        self.announce(key, count);
        Ok(removed)
    }

    pub fn events_on(&self, date: NaiveDate) -> &[ScheduleEvent] {
        self.events
            .get(&iso_date(date))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Dates in `from..=to` with at least one event, for grid markers
    pub fn dates_with_events(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        if from > to {
            return Vec::new();
        }
        self.events
            .range(iso_date(from)..=iso_date(to))
            .filter(|(_, events)| !events.is_empty())
            .filter_map(|(key, _)| parse_iso_date(key))
            .collect()
    }

    pub fn all(&self) -> &EventMap {
        &self.events
    }

    fn commit(&mut self, next: EventMap) -> Result<(), ScheduleError> {
        self.store.save(SCHEDULE_KEY, &next)?;
        self.events = next;
        Ok(())
    }

    fn announce(&self, date: String, event_count: usize) {
        if let Some(ref bus) = self.bus {
            bus.publish(BusEvent::ScheduleChanged { date, event_count });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn add_appends_and_normalizes() {
        let mut schedule = ScheduleStore::open(LocalStore::in_memory());
        let day = date(2024, 3, 8);

        assert_eq!(schedule.add(day, ScheduleEvent::new("  Jumuah ", "9:05")).unwrap(), 1);
        assert_eq!(
            schedule
                .add(day, ScheduleEvent::new("Halaqa", "18:30").with_color("green"))
                .unwrap(),
            2
        );

        let events = schedule.events_on(day);
        assert_eq!(events[0].title, "Jumuah");
        assert_eq!(events[0].time, "09:05");
        assert_eq!(events[0].color, DEFAULT_COLOR);
        assert_eq!(events[1].color, "green");
    }

    #[test]
    fn add_rejects_blank_title_and_bad_time() {
        let mut schedule = ScheduleStore::open(LocalStore::in_memory());
        let day = date(2024, 3, 8);

        assert!(matches!(
            schedule.add(day, ScheduleEvent::new("   ", "10:00")),
            Err(ScheduleError::EmptyTitle)
        ));
        assert!(matches!(
            schedule.add(day, ScheduleEvent::new("Dars", "25:00")),
            Err(ScheduleError::InvalidTime(_))
        ));
        assert!(schedule.all().is_empty());
    }

    #[test]
    fn deleting_last_event_drops_the_date_key() {
        let store = LocalStore::in_memory();
        let mut schedule = ScheduleStore::open(store.clone());
        let day = date(2024, 3, 8);
        schedule.add(day, ScheduleEvent::new("Jumuah", "13:00")).unwrap();

        let removed = schedule.delete(day, 0).unwrap();
        assert_eq!(removed.title, "Jumuah");
        assert!(!schedule.all().contains_key("2024-03-08"));

        let stored: EventMap = store.load(SCHEDULE_KEY).unwrap().unwrap();
        assert!(stored.is_empty());
    }

    #[test]
    fn delete_out_of_range_is_an_error() {
        let mut schedule = ScheduleStore::open(LocalStore::in_memory());
        let day = date(2024, 3, 8);
        schedule.add(day, ScheduleEvent::new("Jumuah", "13:00")).unwrap();

        assert!(matches!(
            schedule.delete(day, 1),
            Err(ScheduleError::NoSuchEvent { index: 1, .. })
        ));
        assert!(matches!(
            schedule.delete(date(2024, 3, 9), 0),
            Err(ScheduleError::NoSuchEvent { .. })
        ));
        assert_eq!(schedule.events_on(day).len(), 1);
    }

    #[test]
    fn dates_with_events_respects_range() {
        let mut schedule = ScheduleStore::open(LocalStore::in_memory());
        for d in [1, 15, 31] {
            schedule
                .add(date(2024, 3, d), ScheduleEvent::new("Event", "10:00"))
                .unwrap();
        }
        schedule
            .add(date(2024, 4, 1), ScheduleEvent::new("Next month", "10:00"))
            .unwrap();

        let marked = schedule.dates_with_events(date(2024, 3, 1), date(2024, 3, 31));
        assert_eq!(marked, vec![date(2024, 3, 1), date(2024, 3, 15), date(2024, 3, 31)]);
    }

    #[test]
    fn stored_format_is_a_flat_date_map() {
        let store = LocalStore::in_memory();
        let mut schedule = ScheduleStore::open(store.clone());
        schedule
            .add(date(2024, 3, 8), ScheduleEvent::new("Jumuah", "13:00").with_color("red"))
            .unwrap();

        let raw: serde_json::Value = store.load(SCHEDULE_KEY).unwrap().unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "2024-03-08": [{ "title": "Jumuah", "time": "13:00", "color": "red" }]
            })
        );
    }

    #[test]
    fn mutations_publish_schedule_changed() {
        let bus = crate::bus::create_bus();
        let mut rx = bus.subscribe();
        let mut schedule = ScheduleStore::open(LocalStore::in_memory()).with_bus(bus);

        schedule
            .add(date(2024, 3, 8), ScheduleEvent::new("Jumuah", "13:00"))
            .unwrap();

        match rx.try_recv().unwrap() {
            BusEvent::ScheduleChanged { date, event_count } => {
                assert_eq!(date, "2024-03-08");
                assert_eq!(event_count, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
