//! Growth-modifier events (e.g. double-XP weekends).
//!
//! At most one event is open (no end time) at any moment. The partial unique
//! index `idx_events_single_open` backs this up at the storage level.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::info;

use super::store::{Store, StoreError};
use crate::model::{Event, from_micros, to_micros};

/// Closed events shorter than this fraction of a query window are dropped
/// from range results; they would not be visible on a chart of that window.
pub const MIN_VISIBLE_FRACTION: f64 = 0.01;

const EVENT_COLUMNS: &str = "id, start_time, end_time, multiplier";

impl Store {
    /// Record a new event starting at `start`. Without `end` the event stays
    /// open until [`Store::end_event`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EventExists`] while another event is open.
    pub fn create_event(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        multiplier: Option<f64>,
    ) -> Result<Event, StoreError> {
        if end.is_some_and(|end| end < start) {
            return Err(StoreError::InvalidArgument(
                "event cannot end before it starts",
            ));
        }
        if multiplier.is_some_and(|m| !m.is_finite() || m <= 0.0) {
            return Err(StoreError::InvalidArgument(
                "event multiplier must be a positive number",
            ));
        }

        let event = self.write(|pass| {
            let conn = pass.connection();
            if let Some(open) = query_open(conn)? {
                return Err(StoreError::EventExists(open.id));
            }
            conn.execute(
                "INSERT INTO events (start_time, end_time, multiplier) VALUES (?1, ?2, ?3)",
                params![to_micros(start), end.map(to_micros), multiplier],
            )?;
            Ok(Event {
                id: conn.last_insert_rowid(),
                start_time: start,
                end_time: end,
                multiplier,
            })
        })?;

        info!(event = event.id, start = %event.start_time, open = event.is_open(), "event created");
        Ok(event)
    }

    /// Close the currently open event at `end`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoOpenEvent`] when no event is open, or
    /// [`StoreError::InvalidArgument`] when `end` precedes its start.
    pub fn end_event(&self, end: DateTime<Utc>) -> Result<Event, StoreError> {
        let event = self.write(|pass| {
            let conn = pass.connection();
            let Some(mut open) = query_open(conn)? else {
                return Err(StoreError::NoOpenEvent);
            };
            if end < open.start_time {
                return Err(StoreError::InvalidArgument(
                    "event cannot end before it starts",
                ));
            }
            conn.execute(
                "UPDATE events SET end_time = ?1 WHERE id = ?2",
                params![to_micros(end), open.id],
            )?;
            open.end_time = Some(end);
            Ok(open)
        })?;

        info!(event = event.id, end = %end, "event ended");
        Ok(event)
    }

    /// The event that is currently open, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn current_event(&self) -> Result<Option<Event>, StoreError> {
        query_open(self.connection())
    }

    /// All events, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn events(&self) -> Result<Vec<Event>, StoreError> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY start_time, id"
        ))?;
        let rows = stmt.query_map([], row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Events overlapping `[start, end]` (`end` defaults to `now`).
    ///
    /// Closed events shorter than [`MIN_VISIBLE_FRACTION`] of the window are
    /// omitted; open events are always kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>, StoreError> {
        let end = end.unwrap_or(now);
        let window_us = (to_micros(end) - to_micros(start)).max(0);
        #[allow(clippy::cast_precision_loss)]
        let min_len_us = window_us as f64 * MIN_VISIBLE_FRACTION;

        let mut stmt = self.connection().prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE start_time <= ?2 AND (end_time IS NULL OR end_time >= ?1) \
             ORDER BY start_time, id"
        ))?;
        let rows = stmt.query_map(params![to_micros(start), to_micros(end)], row_to_event)?;

        let mut events = Vec::new();
        for row in rows {
            let event = row?;
            if let Some(closed_at) = event.end_time {
                #[allow(clippy::cast_precision_loss)]
                let len_us = (to_micros(closed_at) - to_micros(event.start_time)) as f64;
                if len_us < min_len_us {
                    continue;
                }
            }
            events.push(event);
        }
        Ok(events)
    }
}

fn query_open(conn: &rusqlite::Connection) -> Result<Option<Event>, StoreError> {
    let event = conn
        .query_row(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE end_time IS NULL \
                 ORDER BY start_time DESC LIMIT 1"
            ),
            [],
            row_to_event,
        )
        .optional()?;
    Ok(event)
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let convert = |idx: usize, us: i64| {
        from_micros(us).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Integer,
                Box::new(e),
            )
        })
    };
    let start_us: i64 = row.get(1)?;
    let end_us: Option<i64> = row.get(2)?;
    Ok(Event {
        id: row.get(0)?,
        start_time: convert(1, start_us)?,
        end_time: end_us.map(|us| convert(2, us)).transpose()?,
        multiplier: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Denylist;
    use crate::error::ErrorCode;
    use chrono::{Duration, TimeZone};

    fn t(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn store() -> Store {
        Store::in_memory(Denylist::default()).unwrap()
    }

    #[test]
    fn open_then_close_lifecycle() {
        let store = store();
        assert!(store.current_event().unwrap().is_none());

        let started = store.create_event(t(0), None, Some(2.0)).unwrap();
        assert!(started.is_open());
        assert_eq!(store.current_event().unwrap(), Some(started.clone()));

        let ended = store.end_event(t(48)).unwrap();
        assert_eq!(ended.id, started.id);
        assert_eq!(ended.end_time, Some(t(48)));
        assert!(store.current_event().unwrap().is_none());
        assert_eq!(store.events().unwrap(), vec![ended]);
    }

    #[test]
    fn second_open_event_is_rejected() {
        let store = store();
        let first = store.create_event(t(0), None, None).unwrap();
        let err = store.create_event(t(1), None, None).unwrap_err();
        assert!(matches!(err, StoreError::EventExists(id) if id == first.id));
        assert_eq!(err.code(), ErrorCode::EventExists);
        assert_eq!(store.events().unwrap().len(), 1);
    }

    #[test]
    fn ending_without_open_event_fails() {
        let store = store();
        assert!(matches!(
            store.end_event(t(0)).unwrap_err(),
            StoreError::NoOpenEvent
        ));
    }

    #[test]
    fn end_before_start_is_rejected_and_event_stays_open() {
        let store = store();
        store.create_event(t(10), None, None).unwrap();
        assert!(matches!(
            store.end_event(t(5)).unwrap_err(),
            StoreError::InvalidArgument(_)
        ));
        assert!(store.current_event().unwrap().is_some());
    }

    #[test]
    fn range_drops_closed_events_too_short_to_see() {
        let store = store();
        // 1 hour event inside a 30 day window: 1/720 of the window.
        store.create_event(t(0), None, None).unwrap();
        store.end_event(t(1)).unwrap();
        // 2 day event: well above 1%.
        store.create_event(t(100), None, None).unwrap();
        store.end_event(t(148)).unwrap();
        // Still running.
        let running = store.create_event(t(300), None, Some(1.5)).unwrap();

        let now = t(720);
        let in_range = store.events_in_range(t(0), None, now).unwrap();
        assert_eq!(in_range.len(), 2);
        assert_eq!(in_range[1], running);

        // A narrow window keeps the short event.
        let narrow = store.events_in_range(t(0), Some(t(10)), now).unwrap();
        assert_eq!(narrow.len(), 1);
        assert_eq!(narrow[0].start_time, t(0));
    }

    #[test]
    fn closed_event_can_be_recorded_directly() {
        let store = store();
        let event = store.create_event(t(0), Some(t(24)), None).unwrap();
        assert!(!event.is_open());
        assert!(store.current_event().unwrap().is_none());
        // Nothing is open, so another event may start.
        store.create_event(t(30), None, None).unwrap();
    }

    #[test]
    fn non_positive_multiplier_is_invalid() {
        let store = store();
        assert!(matches!(
            store.create_event(t(0), None, Some(0.0)).unwrap_err(),
            StoreError::InvalidArgument(_)
        ));
    }
}
