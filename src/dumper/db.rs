use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::{ensure_persistable, DumpError, Dumper};
use crate::storage::snapshot::Snapshot;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS gauges (
    name TEXT PRIMARY KEY,
    value REAL NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

const UPSERT_GAUGE: &str = "
INSERT INTO gauges (name, value, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
ON CONFLICT (name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

const UPSERT_COUNTER: &str = "
INSERT INTO counters (name, value, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
ON CONFLICT (name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

/// Relational backend, one row per metric holding its current value.
///
/// Counters store the running total, not the history of deltas.
#[derive(Debug)]
pub struct DbDumper {
    conn: Mutex<Connection>,
}

impl DbDumper {
    /// Accepts a plain path, `sqlite://<path>` or `:memory:`.
    pub fn open(dsn: &str) -> Result<Self, DumpError> {
        let path = parse_dsn(dsn)?;
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, DumpError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DumpError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_dsn(dsn: &str) -> Result<&str, DumpError> {
    let trimmed = dsn.trim();
    let path = trimmed
        .strip_prefix("sqlite://")
        .or_else(|| trimmed.strip_prefix("sqlite:"))
        .unwrap_or(trimmed);
    if path.is_empty() {
        Err(DumpError::InvalidDsn(dsn.to_string()))
    } else {
        Ok(path)
    }
}

impl Dumper for DbDumper {
    fn save_data(&self, snapshot: &Snapshot) -> Result<(), DumpError> {
        ensure_persistable(snapshot)?;
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();

        let mut conn = self.connection();
        // dropping the transaction without commit rolls it back
        let tx = conn.transaction()?;
        {
            let mut upsert = tx.prepare_cached(UPSERT_GAUGE)?;
            for (name, value) in &snapshot.gauges {
                upsert.execute(params![name, value, now])?;
            }
            let mut upsert = tx.prepare_cached(UPSERT_COUNTER)?;
            for (name, value) in &snapshot.counters {
                upsert.execute(params![name, value, now])?;
            }
        }
        tx.commit()?;

        log::debug!("Saved {} metrics to database", snapshot.len());
        Ok(())
    }

    fn restore_data(&self) -> Result<Snapshot, DumpError> {
        let conn = self.connection();

        let mut stmt = conn.prepare("SELECT name, value FROM gauges")?;
        let gauges = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;

        let mut stmt = conn.prepare("SELECT name, value FROM counters")?;
        let counters = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;

        Ok(Snapshot::new(gauges, counters))
    }

    fn check_health(&self) -> bool {
        self.connection()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|err| log::warn!("Database ping failed - {err}"))
            .is_ok()
    }
}

#[cfg(test)]
mod test {
    use crate::dumper::db::{parse_dsn, DbDumper};
    use crate::dumper::{DumpError, Dumper};
    use crate::storage::snapshot::Snapshot;

    fn snapshot(alloc: f64, poll_count: i64) -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.gauges.insert("Alloc".to_string(), alloc);
        snapshot.counters.insert("PollCount".to_string(), poll_count);
        snapshot
    }

    #[test]
    fn test_parse_dsn() {
        assert_eq!(parse_dsn("sqlite:///var/lib/metrics.db").unwrap(), "/var/lib/metrics.db");
        assert_eq!(parse_dsn("sqlite::memory:").unwrap(), ":memory:");
        assert_eq!(parse_dsn(" metrics.db ").unwrap(), "metrics.db");
        assert!(matches!(parse_dsn("sqlite://"), Err(DumpError::InvalidDsn(_))));
        assert!(matches!(parse_dsn(""), Err(DumpError::InvalidDsn(_))));
    }

    #[test]
    fn test_empty_tables_restore_empty() {
        let dumper = DbDumper::open_in_memory().unwrap();
        assert!(dumper.restore_data().unwrap().is_empty());
        assert!(dumper.check_health());
    }

    #[test]
    fn test_upsert_keeps_current_totals() {
        let dumper = DbDumper::open_in_memory().unwrap();
        dumper.save_data(&snapshot(512.0, 3)).unwrap();
        dumper.save_data(&snapshot(600.0, 7)).unwrap();

        assert_eq!(dumper.restore_data().unwrap(), snapshot(600.0, 7));

        let rows: i64 = dumper
            .connection()
            .query_row("SELECT COUNT(*) FROM counters", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_failed_save_rolls_back() {
        let dumper = DbDumper::open_in_memory().unwrap();
        dumper.save_data(&snapshot(1.0, 1)).unwrap();
        dumper
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_poison BEFORE INSERT ON counters
                 WHEN NEW.name = 'poison'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let mut rejected = snapshot(2.0, 2);
        rejected.counters.insert("poison".to_string(), 1);
        let err = dumper.save_data(&rejected).unwrap_err();
        assert!(matches!(err, DumpError::Database(_)), "{err}");

        assert_eq!(dumper.restore_data().unwrap(), snapshot(1.0, 1));
    }

    #[test]
    fn test_non_finite_gauge_keeps_previous_rows() {
        let dumper = DbDumper::open_in_memory().unwrap();
        dumper.save_data(&snapshot(1.0, 5)).unwrap();

        let mut broken = snapshot(2.0, 6);
        broken.gauges.insert("Weird".to_string(), f64::NAN);
        let err = dumper.save_data(&broken).unwrap_err();
        assert!(matches!(err, DumpError::NonFiniteGauge { .. }), "{err}");

        assert_eq!(dumper.restore_data().unwrap(), snapshot(1.0, 5));
        dumper.save_data(&snapshot(3.0, 7)).unwrap();
        assert_eq!(dumper.restore_data().unwrap(), snapshot(3.0, 7));
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let dsn = format!("sqlite://{}", dir.path().join("metrics.db").display());
        {
            let dumper = DbDumper::open(&dsn).unwrap();
            dumper.save_data(&snapshot(0.1 + 0.2, i64::MAX)).unwrap();
        }

        let restored = DbDumper::open(&dsn).unwrap().restore_data().unwrap();
        assert_eq!(restored.gauges["Alloc"].to_bits(), (0.1f64 + 0.2).to_bits());
        assert_eq!(restored.counters["PollCount"], i64::MAX);
    }
}
