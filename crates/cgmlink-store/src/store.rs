//! Main store implementation.

use std::io::Write;
use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info};

use cgmlink_types::{GlucoseUnit, PairingCredential, Reading};

use crate::error::{Error, Result};
use crate::models::{ReadingStats, StoredPairing, StoredReading};
use crate::queries::ReadingQuery;
use crate::schema;

/// SQLite-based store for glucose readings and the transmitter pairing.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // === Reading operations ===

    /// Store a reading under `scope`.
    ///
    /// Returns `false` when a reading with the same timestamp is already
    /// stored for the scope; the existing row is kept.
    pub fn insert_reading(&self, scope: &str, reading: &Reading) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO readings (scope, captured_at, value, trend, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                scope,
                reading.timestamp.unix_timestamp(),
                reading.value,
                reading.trend,
                OffsetDateTime::now_utc().unix_timestamp(),
            ],
        )?;

        if inserted == 0 {
            debug!("Skipped duplicate reading at {}", reading.timestamp);
        }
        Ok(inserted > 0)
    }

    /// Store a batch of readings in one transaction.
    ///
    /// Returns the number of new rows.
    pub fn insert_readings(&self, scope: &str, readings: &[Reading]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO readings (scope, captured_at, value, trend, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for reading in readings {
                inserted += stmt.execute(rusqlite::params![
                    scope,
                    reading.timestamp.unix_timestamp(),
                    reading.value,
                    reading.trend,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            "Stored {} of {} readings for {}",
            inserted,
            readings.len(),
            scope
        );
        Ok(inserted)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();
        let params: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params.as_slice(), stored_reading)?;
        let readings = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(readings)
    }

    /// The newest reading for a scope.
    pub fn latest_reading(&self, scope: &str) -> Result<Option<StoredReading>> {
        let mut readings = self.query_readings(&ReadingQuery::new().scope(scope).limit(1))?;
        Ok(readings.pop())
    }

    /// Count readings, optionally restricted to one scope.
    pub fn count_readings(&self, scope: Option<&str>) -> Result<u64> {
        let count: i64 = match scope {
            Some(scope) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE scope = ?",
                [scope],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    /// Scopes that have stored readings, sorted.
    pub fn list_scopes(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT scope FROM readings ORDER BY scope")?;
        let scopes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(scopes)
    }

    /// Delete readings captured before `cutoff`. Returns the number deleted.
    pub fn prune_before(&self, cutoff: OffsetDateTime) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM readings WHERE captured_at < ?",
            [cutoff.unix_timestamp()],
        )?;
        if deleted > 0 {
            info!("Pruned {} readings older than {}", deleted, cutoff);
        }
        Ok(deleted)
    }

    /// Summary statistics over the readings matched by `query`.
    ///
    /// Limit and offset are ignored.
    pub fn reading_stats(&self, query: &ReadingQuery) -> Result<ReadingStats> {
        let (where_clause, params) = query.build_where();
        let params: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let sql = format!(
            "SELECT COUNT(*), MIN(value), MAX(value), AVG(value),
                    SUM(value < ?), SUM(value >= ? AND value <= ?), SUM(value > ?)
             FROM readings {}",
            where_clause
        );

        let low = ReadingStats::RANGE_LOW;
        let high = ReadingStats::RANGE_HIGH;
        let mut all: Vec<&dyn rusqlite::ToSql> =
            vec![&low as &dyn rusqlite::ToSql, &low, &high, &high];
        all.extend(params);

        let stats = self.conn.query_row(&sql, all.as_slice(), |row| {
            Ok(ReadingStats {
                count: row.get::<_, i64>(0)? as u64,
                min: row.get(1)?,
                max: row.get(2)?,
                mean: row.get(3)?,
                below_range: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u64,
                in_range: row.get::<_, Option<i64>>(5)?.unwrap_or(0) as u64,
                above_range: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as u64,
            })
        })?;
        Ok(stats)
    }

    /// Write the readings matched by `query` as CSV.
    ///
    /// Values are written in mg/dL plus a column converted to `unit`.
    /// Returns the number of rows written.
    pub fn export_csv<W: Write>(
        &self,
        query: &ReadingQuery,
        unit: GlucoseUnit,
        writer: W,
    ) -> Result<usize> {
        #[derive(Serialize)]
        struct CsvRow<'a> {
            scope: &'a str,
            captured_at: String,
            mg_per_dl: f64,
            value: f64,
            unit: &'static str,
            trend: Option<i8>,
            arrow: &'static str,
        }

        let readings = self.query_readings(query)?;
        let mut csv = csv::Writer::from_writer(writer);
        for reading in &readings {
            let captured_at = reading
                .captured_at
                .format(&Rfc3339)
                .map_err(|e| Error::InvalidTimestamp(e.to_string()))?;
            csv.serialize(CsvRow {
                scope: &reading.scope,
                captured_at,
                mg_per_dl: reading.value,
                value: round_to(unit.from_mg_per_dl(reading.value), 2),
                unit: unit.symbol(),
                trend: reading.trend,
                arrow: reading.trend_arrow().map(|t| t.arrow()).unwrap_or(""),
            })?;
        }
        csv.flush()?;
        Ok(readings.len())
    }

    // === Pairing operations ===

    /// Remember `credential` as the paired transmitter.
    ///
    /// Saving the same credential again only refreshes `last_connected_at`.
    /// A different credential replaces the record.
    pub fn save_pairing(&self, credential: &PairingCredential) -> Result<StoredPairing> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.conn.execute(
            "INSERT INTO pairing (id, serial, device_id, paired_at, last_connected_at)
             VALUES (1, ?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET
                paired_at = CASE
                    WHEN pairing.serial = excluded.serial
                     AND pairing.device_id = excluded.device_id
                    THEN pairing.paired_at
                    ELSE excluded.paired_at
                END,
                serial = excluded.serial,
                device_id = excluded.device_id,
                last_connected_at = excluded.last_connected_at",
            rusqlite::params![credential.serial(), credential.device_id().as_str(), now],
        )?;

        info!("Saved pairing for {}", credential.device_id());
        self.load_pairing()?
            .ok_or(Error::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    /// The paired transmitter, if any.
    pub fn load_pairing(&self) -> Result<Option<StoredPairing>> {
        let pairing = self
            .conn
            .query_row(
                "SELECT serial, device_id, paired_at, last_connected_at FROM pairing WHERE id = 1",
                [],
                |row| {
                    let last_connected_at: Option<i64> = row.get(3)?;
                    Ok(StoredPairing {
                        serial: row.get(0)?,
                        device_id: row.get(1)?,
                        paired_at: timestamp(2, row.get(2)?)?,
                        last_connected_at: last_connected_at
                            .map(|secs| timestamp(3, secs))
                            .transpose()?,
                    })
                },
            )
            .optional()?;
        Ok(pairing)
    }

    /// Forget the paired transmitter. Returns `false` if none was stored.
    pub fn clear_pairing(&self) -> Result<bool> {
        let deleted = self.conn.execute("DELETE FROM pairing WHERE id = 1", [])?;
        if deleted > 0 {
            info!("Cleared stored pairing");
        }
        Ok(deleted > 0)
    }
}

fn stored_reading(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    Ok(StoredReading {
        id: row.get(0)?,
        scope: row.get(1)?,
        captured_at: timestamp(2, row.get(2)?)?,
        value: row.get(3)?,
        trend: row.get(4)?,
    })
}

fn timestamp(column: usize, secs: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Integer, Box::new(e)))
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmlink_types::DeviceId;
    use time::macros::datetime;

    fn reading(minute: u8, value: f64) -> Reading {
        let base = datetime!(2025-06-01 08:00 UTC);
        Reading::new(
            value,
            base + time::Duration::minutes(minute as i64),
            Some(0),
        )
    }

    fn credential(serial: &str, device: &str) -> PairingCredential {
        PairingCredential::new(serial, DeviceId::new(device).unwrap()).unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count_readings(None).unwrap(), 0);
        assert!(store.load_pairing().unwrap().is_none());
    }

    #[test]
    fn test_insert_and_query_readings() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.insert_reading("alice", &reading(0, 100.0)).unwrap());
        assert!(store.insert_reading("alice", &reading(5, 110.0)).unwrap());
        assert!(store.insert_reading("bob", &reading(5, 90.0)).unwrap());

        let alice = store
            .query_readings(&ReadingQuery::new().scope("alice"))
            .unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].value, 110.0);
        assert_eq!(alice[1].value, 100.0);
        assert_eq!(alice[0].to_reading(), reading(5, 110.0));

        let oldest = store
            .query_readings(&ReadingQuery::new().scope("alice").oldest_first())
            .unwrap();
        assert_eq!(oldest[0].value, 100.0);
    }

    #[test]
    fn test_duplicate_timestamp_is_ignored() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.insert_reading("alice", &reading(0, 100.0)).unwrap());
        assert!(!store.insert_reading("alice", &reading(0, 140.0)).unwrap());

        let rows = store.query_readings(&ReadingQuery::new()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 100.0);

        // Same time under another scope is a separate reading.
        assert!(store.insert_reading("bob", &reading(0, 140.0)).unwrap());
    }

    #[test]
    fn test_insert_readings_batch() {
        let store = Store::open_in_memory().unwrap();
        store.insert_reading("alice", &reading(0, 100.0)).unwrap();
        let batch: Vec<Reading> = (0..6).map(|i| reading(i * 5, 100.0 + i as f64)).collect();
        assert_eq!(store.insert_readings("alice", &batch).unwrap(), 5);
        assert_eq!(store.count_readings(Some("alice")).unwrap(), 6);
        assert_eq!(store.insert_readings("alice", &batch).unwrap(), 0);
    }

    #[test]
    fn test_time_range_and_paging() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..10 {
            store.insert_reading("alice", &reading(i * 5, 100.0)).unwrap();
        }

        let ranged = store
            .query_readings(
                &ReadingQuery::new()
                    .since(datetime!(2025-06-01 08:10 UTC))
                    .until(datetime!(2025-06-01 08:20 UTC)),
            )
            .unwrap();
        assert_eq!(ranged.len(), 3);

        let page = store
            .query_readings(&ReadingQuery::new().oldest_first().limit(3).offset(3))
            .unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].captured_at, datetime!(2025-06-01 08:15 UTC));
    }

    #[test]
    fn test_latest_reading() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.latest_reading("alice").unwrap().is_none());
        store.insert_reading("alice", &reading(10, 120.0)).unwrap();
        store.insert_reading("alice", &reading(5, 110.0)).unwrap();
        let latest = store.latest_reading("alice").unwrap().unwrap();
        assert_eq!(latest.value, 120.0);
    }

    #[test]
    fn test_list_scopes_and_prune() {
        let store = Store::open_in_memory().unwrap();
        store.insert_reading("bob", &reading(0, 100.0)).unwrap();
        store.insert_reading("alice", &reading(30, 100.0)).unwrap();
        assert_eq!(store.list_scopes().unwrap(), vec!["alice", "bob"]);

        let deleted = store
            .prune_before(datetime!(2025-06-01 08:10 UTC))
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.list_scopes().unwrap(), vec!["alice"]);
    }

    #[test]
    fn test_reading_stats() {
        let store = Store::open_in_memory().unwrap();
        let empty = store.reading_stats(&ReadingQuery::new()).unwrap();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.mean, None);
        assert_eq!(empty.in_range, 0);

        for (i, value) in [60.0, 70.0, 120.0, 180.0, 250.0].into_iter().enumerate() {
            store.insert_reading("alice", &reading(i as u8 * 5, value)).unwrap();
        }
        store.insert_reading("bob", &reading(0, 400.0)).unwrap();

        let stats = store
            .reading_stats(&ReadingQuery::new().scope("alice").limit(1))
            .unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.min, Some(60.0));
        assert_eq!(stats.max, Some(250.0));
        assert_eq!(stats.mean, Some(136.0));
        assert_eq!(stats.below_range, 1);
        assert_eq!(stats.in_range, 3);
        assert_eq!(stats.above_range, 1);
    }

    #[test]
    fn test_export_csv() {
        let store = Store::open_in_memory().unwrap();
        store.insert_reading("alice", &reading(5, 180.0)).unwrap();
        store
            .insert_reading(
                "alice",
                &Reading::new(90.0, datetime!(2025-06-01 08:00 UTC), None),
            )
            .unwrap();

        let mut out = Vec::new();
        let written = store
            .export_csv(
                &ReadingQuery::new().oldest_first(),
                GlucoseUnit::MmolPerL,
                &mut out,
            )
            .unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "scope,captured_at,mg_per_dl,value,unit,trend,arrow"
        );
        assert_eq!(lines[1], "alice,2025-06-01T08:00:00Z,90.0,5.0,mmol/L,,");
        assert_eq!(lines[2], "alice,2025-06-01T08:05:00Z,180.0,9.99,mmol/L,0,→");
    }

    #[test]
    fn test_save_and_load_pairing() {
        let store = Store::open_in_memory().unwrap();
        let saved = store.save_pairing(&credential("8g1234", "AA:BB")).unwrap();
        assert_eq!(saved.serial, "8G1234");
        assert_eq!(saved.last_connected_at, Some(saved.paired_at));

        let loaded = store.load_pairing().unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(
            loaded.credential().unwrap(),
            credential("8G1234", "AA:BB")
        );
    }

    #[test]
    fn test_pairing_is_single_row() {
        let store = Store::open_in_memory().unwrap();
        store.save_pairing(&credential("8G1234", "AA:BB")).unwrap();
        store.save_pairing(&credential("9H5678", "CC:DD")).unwrap();

        let loaded = store.load_pairing().unwrap().unwrap();
        assert_eq!(loaded.serial, "9H5678");
        assert_eq!(loaded.device_id, "CC:DD");
    }

    #[test]
    fn test_clear_pairing() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.clear_pairing().unwrap());
        store.save_pairing(&credential("8G1234", "AA:BB")).unwrap();
        assert!(store.clear_pairing().unwrap());
        assert!(store.load_pairing().unwrap().is_none());
    }

    #[test]
    fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");

        {
            let store = Store::open(&path).unwrap();
            store.insert_reading("alice", &reading(0, 100.0)).unwrap();
            store.save_pairing(&credential("8G1234", "AA:BB")).unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.count_readings(Some("alice")).unwrap(), 1);
        assert!(store.load_pairing().unwrap().is_some());
    }
}
