//! Geotagged attendance events, at most one per identity per calendar day.

use crate::database::SharedConnection;
use crate::enrollment::validate_identity;
use crate::error::{is_constraint_violation, StoreError};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, Timelike};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::sync::MutexGuard;
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// Capture location attached to an attendance event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geotag {
    pub latitude: f64,
    pub longitude: f64,
}

impl Geotag {
    /// Validated geotag: both coordinates finite, latitude in [-90, 90],
    /// longitude in [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, StoreError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(StoreError::InvalidGeotag(format!(
                "latitude {latitude} outside [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(StoreError::InvalidGeotag(format!(
                "longitude {longitude} outside [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub event_id: Uuid,
    pub identity_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub geotag: Geotag,
    /// Verification distance that admitted this event.
    pub distance: f32,
}

impl AttendanceEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        fn text_column<T, E>(
            row: &Row,
            idx: usize,
            parse: impl Fn(&str) -> Result<T, E>,
        ) -> rusqlite::Result<T>
        where
            E: std::error::Error + Send + Sync + 'static,
        {
            let raw: String = row.get(idx)?;
            parse(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        }

        Ok(Self {
            event_id: text_column(row, 0, Uuid::parse_str)?,
            identity_id: row.get(1)?,
            date: text_column(row, 2, |s| NaiveDate::parse_from_str(s, DATE_FORMAT))?,
            time: text_column(row, 3, |s| NaiveTime::parse_from_str(s, TIME_FORMAT))?,
            geotag: Geotag {
                latitude: row.get(4)?,
                longitude: row.get(5)?,
            },
            distance: row.get::<_, f64>(6)? as f32,
        })
    }
}

const SELECT_EVENT: &str =
    "SELECT event_id, identity_id, date, time, latitude, longitude, distance FROM attendance";

/// Repository of attendance events over the `attendance` table.
///
/// History is keyed by identity string only, so it survives removal of the
/// identity's enrollment.
#[derive(Debug, Clone)]
pub struct AttendanceLog {
    con: SharedConnection,
}

impl AttendanceLog {
    pub fn new(con: SharedConnection) -> Self {
        Self { con }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.con.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Record attendance for `identity` on the local date of `at`.
    ///
    /// A second mark on the same date fails with [`StoreError::AlreadyMarked`].
    pub fn mark(
        &self,
        identity: &str,
        geotag: Geotag,
        distance: f32,
        at: DateTime<Local>,
    ) -> Result<AttendanceEvent, StoreError> {
        validate_identity(identity)?;
        let geotag = Geotag::new(geotag.latitude, geotag.longitude)?;

        let naive = at.naive_local();
        let event = AttendanceEvent {
            event_id: Uuid::new_v4(),
            identity_id: identity.to_string(),
            date: naive.date(),
            // second resolution, as stored
            time: naive.time().with_nanosecond(0).unwrap_or(naive.time()),
            geotag,
            distance,
        };

        let con = self.lock()?;
        let inserted = con.execute(
            "INSERT INTO attendance (event_id, identity_id, date, time, latitude, longitude, distance)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_id.to_string(),
                identity,
                event.date.format(DATE_FORMAT).to_string(),
                event.time.format(TIME_FORMAT).to_string(),
                geotag.latitude,
                geotag.longitude,
                f64::from(distance),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::AlreadyMarked {
                    identity: identity.to_string(),
                    date: event.date,
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            identity,
            event_id = %event.event_id,
            date = %event.date,
            time = %event.time,
            latitude = geotag.latitude,
            longitude = geotag.longitude,
            distance,
            "attendance marked"
        );
        Ok(event)
    }

    pub fn already_marked(&self, identity: &str, date: NaiveDate) -> Result<bool, StoreError> {
        let con = self.lock()?;
        let count: i64 = con.query_row(
            "SELECT COUNT(*) FROM attendance WHERE identity_id = ?1 AND date = ?2",
            params![identity, date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Events for one identity, newest first.
    pub fn history(&self, identity: &str) -> Result<Vec<AttendanceEvent>, StoreError> {
        let con = self.lock()?;
        let mut stmt = con.prepare(&format!(
            "{SELECT_EVENT} WHERE identity_id = ?1 ORDER BY date DESC, time DESC"
        ))?;
        let events = stmt
            .query_map([identity], AttendanceEvent::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Every event, newest first.
    pub fn all(&self) -> Result<Vec<AttendanceEvent>, StoreError> {
        let con = self.lock()?;
        let mut stmt = con.prepare(&format!(
            "{SELECT_EVENT} ORDER BY date DESC, time DESC, identity_id ASC"
        ))?;
        let events = stmt
            .query_map([], AttendanceEvent::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Delete one event. `false` if no such event exists.
    pub fn delete(&self, event_id: Uuid) -> Result<bool, StoreError> {
        let con = self.lock()?;
        let removed = con.execute(
            "DELETE FROM attendance WHERE event_id = ?1",
            [event_id.to_string()],
        )?;
        if removed > 0 {
            tracing::info!(event_id = %event_id, "attendance event deleted");
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::enrollment::{EnrollmentStore, SqliteEnrollmentStore};
    use chrono::TimeZone;

    fn log() -> AttendanceLog {
        AttendanceLog::new(database::open_in_memory().unwrap())
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .earliest()
            .unwrap()
    }

    fn campus() -> Geotag {
        Geotag::new(12.9716, 77.5946).unwrap()
    }

    #[test]
    fn geotag_bounds() {
        assert!(Geotag::new(90.0, 180.0).is_ok());
        assert!(Geotag::new(-90.0, -180.0).is_ok());
        assert!(matches!(Geotag::new(90.5, 0.0), Err(StoreError::InvalidGeotag(_))));
        assert!(matches!(Geotag::new(0.0, -180.1), Err(StoreError::InvalidGeotag(_))));
        assert!(matches!(Geotag::new(f64::NAN, 0.0), Err(StoreError::InvalidGeotag(_))));
        assert!(matches!(Geotag::new(0.0, f64::INFINITY), Err(StoreError::InvalidGeotag(_))));
    }

    #[test]
    fn mark_records_event() {
        let log = log();
        let event = log.mark("R001", campus(), 0.42, at(2025, 3, 14, 9, 30)).unwrap();

        assert_eq!(event.identity_id, "R001");
        assert_eq!(event.date, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        assert_eq!(event.time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(log.history("R001").unwrap(), vec![event]);
    }

    #[test]
    fn second_mark_same_day_is_rejected() {
        let log = log();
        log.mark("R001", campus(), 0.4, at(2025, 3, 14, 9, 0)).unwrap();

        match log.mark("R001", campus(), 0.3, at(2025, 3, 14, 15, 45)) {
            Err(StoreError::AlreadyMarked { identity, date }) => {
                assert_eq!(identity, "R001");
                assert_eq!(date, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
            }
            other => panic!("expected AlreadyMarked, got {other:?}"),
        }
        assert_eq!(log.history("R001").unwrap().len(), 1);
    }

    #[test]
    fn marks_on_different_days_or_identities_coexist() {
        let log = log();
        log.mark("R001", campus(), 0.4, at(2025, 3, 14, 9, 0)).unwrap();
        log.mark("R001", campus(), 0.4, at(2025, 3, 15, 9, 0)).unwrap();
        log.mark("R002", campus(), 0.4, at(2025, 3, 14, 9, 5)).unwrap();
        assert_eq!(log.all().unwrap().len(), 3);
    }

    #[test]
    fn already_marked_tracks_date() {
        let log = log();
        let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert!(!log.already_marked("R001", day).unwrap());

        log.mark("R001", campus(), 0.4, at(2025, 3, 14, 9, 0)).unwrap();
        assert!(log.already_marked("R001", day).unwrap());
        assert!(!log.already_marked("R001", day.succ_opt().unwrap()).unwrap());
        assert!(!log.already_marked("R002", day).unwrap());
    }

    #[test]
    fn history_is_newest_first() {
        let log = log();
        log.mark("R001", campus(), 0.4, at(2025, 3, 13, 9, 0)).unwrap();
        log.mark("R001", campus(), 0.4, at(2025, 3, 15, 8, 0)).unwrap();
        log.mark("R001", campus(), 0.4, at(2025, 3, 14, 10, 0)).unwrap();

        let days: Vec<u32> = log
            .history("R001")
            .unwrap()
            .iter()
            .map(|e| chrono::Datelike::day(&e.date))
            .collect();
        assert_eq!(days, vec![15, 14, 13]);
    }

    #[test]
    fn mark_rejects_invalid_geotag() {
        let log = log();
        let bogus = Geotag {
            latitude: 120.0,
            longitude: 0.0,
        };
        assert!(matches!(
            log.mark("R001", bogus, 0.4, at(2025, 3, 14, 9, 0)),
            Err(StoreError::InvalidGeotag(_))
        ));
        assert!(log.all().unwrap().is_empty());
    }

    #[test]
    fn delete_removes_only_that_event() {
        let log = log();
        let first = log.mark("R001", campus(), 0.4, at(2025, 3, 14, 9, 0)).unwrap();
        let second = log.mark("R001", campus(), 0.4, at(2025, 3, 15, 9, 0)).unwrap();

        assert!(log.delete(first.event_id).unwrap());
        assert!(!log.delete(first.event_id).unwrap());
        assert_eq!(log.history("R001").unwrap(), vec![second]);
    }

    #[test]
    fn history_survives_enrollment_removal() {
        let con = database::open_in_memory().unwrap();
        let store = SqliteEnrollmentStore::new(con.clone());
        let log = AttendanceLog::new(con);

        store
            .save("R001", &rollcall_core::Embedding::new(vec![0.1, 0.2], None))
            .unwrap();
        log.mark("R001", campus(), 0.2, at(2025, 3, 14, 9, 0)).unwrap();
        assert!(store.remove("R001").unwrap());

        assert_eq!(log.history("R001").unwrap().len(), 1);
    }
}
