//! Local rusqlite-backed statistics store.

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::store::{StatStore, StatisticType, StoreError};
use crate::{SeriesMetadata, StatPoint};

const SCHEMA_VERSION: i64 = 1;

pub struct SqliteStatStore {
    conn: Connection,
}

impl SqliteStatStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    StoreError::Connection(format!("{}: {err}", parent.display()))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        ensure_schema(&conn)?;

        info!(
            component = "sqlite_store",
            event = "store.open",
            path = %path.display()
        );
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    fn metadata_id(&self, statistic_id: &str) -> Result<Option<i64>, StoreError> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM statistics_meta WHERE statistic_id = ?1",
                params![statistic_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn stored_unit(&self, statistic_id: &str) -> Result<Option<String>, StoreError> {
        let unit = self
            .conn
            .query_row(
                "SELECT unit FROM statistics_meta WHERE statistic_id = ?1",
                params![statistic_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(unit)
    }
}

impl StatStore for SqliteStatStore {
    fn statistics_during_period(
        &mut self,
        statistic_id: &str,
        start_ts_ms_utc: i64,
        end_ts_ms_utc_exclusive: i64,
    ) -> Result<Vec<StatPoint>, StoreError> {
        let Some(metadata_id) = self.metadata_id(statistic_id)? else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(
            "
            SELECT start_ts_ms, state, sum
            FROM statistics
            WHERE metadata_id = ?1
              AND start_ts_ms >= ?2
              AND start_ts_ms < ?3
            ORDER BY start_ts_ms
            ",
        )?;
        let rows = stmt.query_map(
            params![metadata_id, start_ts_ms_utc, end_ts_ms_utc_exclusive],
            |row| {
                Ok(StatPoint {
                    start_ts_ms_utc: row.get(0)?,
                    state: row.get(1)?,
                    sum: row.get(2)?,
                })
            },
        )?;

        let mut points = Vec::new();
        for row in rows {
            points.push(row?);
        }
        Ok(points)
    }

    fn list_statistic_ids(
        &mut self,
        statistic_type: StatisticType,
    ) -> Result<BTreeSet<String>, StoreError> {
        let has_sum = matches!(statistic_type, StatisticType::Sum);
        let mut stmt = self
            .conn
            .prepare("SELECT statistic_id FROM statistics_meta WHERE has_sum = ?1")?;
        let rows = stmt.query_map(params![has_sum], |row| row.get::<_, String>(0))?;

        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    fn import_statistics(
        &mut self,
        metadata: &SeriesMetadata,
        points: &[StatPoint],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "
            INSERT INTO statistics_meta (statistic_id, source, name, unit, has_sum)
            VALUES (?1, ?2, ?3, ?4, 1)
            ON CONFLICT(statistic_id) DO UPDATE SET
                source = excluded.source,
                name = excluded.name,
                unit = excluded.unit,
                has_sum = excluded.has_sum
            ",
            params![
                metadata.statistic_id,
                metadata.source,
                metadata.name,
                metadata.unit
            ],
        )?;
        let metadata_id: i64 = tx.query_row(
            "SELECT id FROM statistics_meta WHERE statistic_id = ?1",
            params![metadata.statistic_id],
            |row| row.get(0),
        )?;

        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO statistics (metadata_id, start_ts_ms, state, sum)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(metadata_id, start_ts_ms) DO UPDATE SET
                    state = excluded.state,
                    sum = excluded.sum
                ",
            )?;
            for point in points {
                stmt.execute(params![
                    metadata_id,
                    point.start_ts_ms_utc,
                    point.state,
                    point.sum
                ])?;
            }
        }

        tx.commit()?;
        debug!(
            component = "sqlite_store",
            event = "store.import",
            statistic_id = %metadata.statistic_id,
            points = points.len()
        );
        Ok(())
    }

    fn adjust_sum(
        &mut self,
        statistic_id: &str,
        start_ts_ms_utc: i64,
        adjustment: f64,
        unit: &str,
    ) -> Result<(), StoreError> {
        let Some(stored) = self.stored_unit(statistic_id)? else {
            return Err(StoreError::Rejected {
                command: "adjust_sum".to_string(),
                code: "unknown_statistic_id".to_string(),
                message: format!("no statistic {statistic_id}"),
            });
        };
        if stored != unit {
            return Err(StoreError::UnitMismatch {
                statistic_id: statistic_id.to_string(),
                stored,
                requested: unit.to_string(),
            });
        }

        let updated = self.conn.execute(
            "
            UPDATE statistics
            SET sum = sum + ?3
            WHERE metadata_id = (SELECT id FROM statistics_meta WHERE statistic_id = ?1)
              AND start_ts_ms >= ?2
            ",
            params![statistic_id, start_ts_ms_utc, adjustment],
        )?;
        debug!(
            component = "sqlite_store",
            event = "store.adjust",
            statistic_id,
            start_ts_ms_utc,
            adjustment,
            updated
        );
        Ok(())
    }

    fn clear_statistics(&mut self, statistic_ids: &[String]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        for statistic_id in statistic_ids {
            tx.execute(
                "
                DELETE FROM statistics
                WHERE metadata_id = (SELECT id FROM statistics_meta WHERE statistic_id = ?1)
                ",
                params![statistic_id],
            )?;
            tx.execute(
                "DELETE FROM statistics_meta WHERE statistic_id = ?1",
                params![statistic_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    match version {
        0 => {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS statistics_meta (
                    id INTEGER PRIMARY KEY,
                    statistic_id TEXT NOT NULL UNIQUE,
                    source TEXT NOT NULL,
                    name TEXT NOT NULL,
                    unit TEXT NOT NULL,
                    has_sum INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS statistics (
                    metadata_id INTEGER NOT NULL,
                    start_ts_ms INTEGER NOT NULL,
                    state REAL,
                    sum REAL NOT NULL,
                    PRIMARY KEY(metadata_id, start_ts_ms)
                ) WITHOUT ROWID;
                PRAGMA user_version = 1;
                ",
            )?;
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        other => Err(StoreError::UnsupportedSchema(other)),
    }
}
