use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::schema_gen::{generate_create_table, generate_indexes};
use crate::error::WriteError;
use crate::features::AnalyticsRow;
use crate::month::SnapshotMonth;
use crate::schema::{TableSchema, USAGE_TABLE};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Rows replaced by one upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WriteReport {
    pub deleted: usize,
    pub inserted: usize,
}

/// Row count per ingested (month, format)
#[derive(Debug, Clone, PartialEq)]
pub struct MonthSummary {
    pub snapshot_month: String,
    pub format: String,
    pub rows: u64,
}

pub struct SqliteWriter {
    conn: Connection,
}

impl SqliteWriter {
    /// Open (or create) the analytics database and make sure the table exists
    pub fn open(db_path: &Path) -> Result<Self, WriteError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        let writer = Self { conn };
        writer.ensure_schema()?;
        Ok(writer)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the table and its indexes if missing
    pub fn ensure_schema(&self) -> Result<(), WriteError> {
        self.conn.execute(&generate_create_table(&USAGE_TABLE), [])?;
        for index_sql in generate_indexes(&USAGE_TABLE) {
            self.conn.execute(&index_sql, [])?;
        }
        Ok(())
    }

    /// Replace every row of (month, format) with `rows`, atomically.
    ///
    /// The immediate transaction takes the write lock before the delete, so
    /// two runs for the same key cannot interleave. On any error the
    /// transaction rolls back and the previous rows stay visible.
    pub fn upsert(
        &mut self,
        rows: &[AnalyticsRow],
        month: SnapshotMonth,
        format: &str,
    ) -> Result<WriteReport, WriteError> {
        let month_key = month.to_string();
        if let Some(row) = rows
            .iter()
            .find(|r| r.snapshot_month != month_key || r.format != format)
        {
            return Err(WriteError::KeyMismatch {
                name: row.name.clone(),
                row_key: format!("{}/{}", row.snapshot_month, row.format),
                key: format!("{}/{}", month_key, format),
            });
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let deleted = tx.execute(
            &format!(
                "DELETE FROM {} WHERE snapshot_month = ?1 AND format = ?2",
                USAGE_TABLE.name
            ),
            params![month_key, format],
        )?;

        let insert_sql = insert_statement(&USAGE_TABLE);
        insert_rows(&tx, &insert_sql, rows)?;

        tx.commit()?;

        let report = WriteReport {
            deleted,
            inserted: rows.len(),
        };
        info!(%month, format = %format, deleted, inserted = report.inserted, "upserted rows");
        Ok(report)
    }

    /// Distinct months present, optionally for one format only
    pub fn existing_months(&self, format: Option<&str>) -> Result<Vec<String>, WriteError> {
        let sql = format!(
            "SELECT DISTINCT snapshot_month FROM {} WHERE ?1 IS NULL OR format = ?1 ORDER BY 1",
            USAGE_TABLE.name
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let months = stmt
            .query_map([format], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(months)
    }

    pub fn month_summaries(&self) -> Result<Vec<MonthSummary>, WriteError> {
        let sql = format!(
            "SELECT snapshot_month, format, COUNT(*) FROM {} GROUP BY 1, 2 ORDER BY 1, 2",
            USAGE_TABLE.name
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let summaries = stmt
            .query_map([], |row| {
                Ok(MonthSummary {
                    snapshot_month: row.get(0)?,
                    format: row.get(1)?,
                    rows: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Refresh a read-only copy for the dashboard: snapshot into a temp file,
    /// then rename over the destination so readers never see a partial file.
    pub fn sync_read_copy(&self, dest: &Path) -> Result<(), WriteError> {
        let mut tmp = dest.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        if tmp.exists() {
            std::fs::remove_file(&tmp)?;
        }

        self.conn
            .execute("VACUUM INTO ?1", [tmp.to_string_lossy().as_ref()])?;
        std::fs::rename(&tmp, dest)?;

        debug!(dest = %dest.display(), "refreshed read-only copy");
        Ok(())
    }

    /// Finalize the database
    pub fn finalize(self) -> Result<(), WriteError> {
        self.conn.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }
}

fn insert_statement(schema: &TableSchema) -> String {
    let columns = schema.column_names();
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema.name,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Insert rows into the open transaction
fn insert_rows(
    tx: &rusqlite::Transaction,
    sql: &str,
    rows: &[AnalyticsRow],
) -> Result<(), WriteError> {
    let mut stmt = tx.prepare_cached(sql)?;

    for row in rows {
        for (idx, value) in row.values().iter().enumerate() {
            value.bind_to(idx + 1, &mut stmt)?;
        }
        stmt.raw_execute()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::derive_row;
    use crate::parser::EntityUsageRecord;

    fn month() -> SnapshotMonth {
        "2025-08".parse().unwrap()
    }

    fn rows(names: &[(&str, f64)], format: &str) -> Vec<AnalyticsRow> {
        names
            .iter()
            .map(|(name, usage)| derive_row(&EntityUsageRecord::usage_only(*name, *usage), month(), format))
            .collect()
    }

    #[test]
    fn test_upsert_replaces_month() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SqliteWriter::open(&dir.path().join("usage.db")).unwrap();

        let first = writer
            .upsert(&rows(&[("Incineroar", 48.0), ("Rillaboom", 30.0)], "fmt"), month(), "fmt")
            .unwrap();
        assert_eq!(first, WriteReport { deleted: 0, inserted: 2 });

        let second = writer
            .upsert(&rows(&[("Incineroar", 50.0)], "fmt"), month(), "fmt")
            .unwrap();
        assert_eq!(second, WriteReport { deleted: 2, inserted: 1 });

        let summaries = writer.month_summaries().unwrap();
        assert_eq!(
            summaries,
            vec![MonthSummary {
                snapshot_month: "2025-08".to_string(),
                format: "fmt".to_string(),
                rows: 1,
            }]
        );
    }

    #[test]
    fn test_other_formats_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SqliteWriter::open(&dir.path().join("usage.db")).unwrap();

        writer.upsert(&rows(&[("Incineroar", 48.0)], "bo3"), month(), "bo3").unwrap();
        writer.upsert(&rows(&[("Incineroar", 40.0)], "bo1"), month(), "bo1").unwrap();
        writer.upsert(&rows(&[("Amoonguss", 20.0)], "bo1"), month(), "bo1").unwrap();

        assert_eq!(writer.month_summaries().unwrap().len(), 2);
        assert_eq!(writer.existing_months(Some("bo3")).unwrap(), vec!["2025-08"]);
        assert!(writer.existing_months(Some("gen9ou")).unwrap().is_empty());
        assert_eq!(writer.existing_months(None).unwrap(), vec!["2025-08"]);
    }

    #[test]
    fn test_failed_upsert_keeps_prior_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SqliteWriter::open(&dir.path().join("usage.db")).unwrap();
        writer.upsert(&rows(&[("Incineroar", 48.0)], "fmt"), month(), "fmt").unwrap();

        // Duplicate primary key aborts the whole replacement
        let result = writer.upsert(
            &rows(&[("Rillaboom", 30.0), ("Rillaboom", 31.0)], "fmt"),
            month(),
            "fmt",
        );
        assert!(matches!(result, Err(WriteError::Sqlite(_))));

        let names: Vec<String> = writer
            .connection()
            .prepare("SELECT name FROM smogon_usage")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(names, vec!["Incineroar"]);
    }

    #[test]
    fn test_rows_for_another_key_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SqliteWriter::open(&dir.path().join("usage.db")).unwrap();
        let result = writer.upsert(&rows(&[("Incineroar", 48.0)], "bo1"), month(), "bo3");
        assert!(matches!(result, Err(WriteError::KeyMismatch { .. })));
    }

    #[test]
    fn test_sync_read_copy() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SqliteWriter::open(&dir.path().join("usage.db")).unwrap();
        writer.upsert(&rows(&[("Incineroar", 48.0)], "fmt"), month(), "fmt").unwrap();

        let copy = dir.path().join("usage_read.db");
        writer.sync_read_copy(&copy).unwrap();
        // A second refresh replaces the first
        writer.sync_read_copy(&copy).unwrap();

        let conn = Connection::open(&copy).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM smogon_usage", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
