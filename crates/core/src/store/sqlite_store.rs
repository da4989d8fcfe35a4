//! SQLite-backed job store implementation.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{JobFilter, JobStore, StoreError};
use crate::job::{JobCompletion, JobRecord, JobStatus, NewJob};

const COLUMNS: &str = "id, original_name, original_size, mime_type, declared_mime_type, family, \
     source_format, operation, target_format, options, status, output_identity, output_path, \
     output_size, compression_ratio, output_sha256, error, created_at, started_at, finished_at, \
     expires_at";

/// SQL list of the statuses allowed to move to `next`, e.g. `'pending', 'running'`.
fn transition_sources(next: JobStatus) -> String {
    JobStatus::sources_of(next)
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fixed-width UTC timestamp, so string comparison in SQL is chronological.
pub(crate) fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time at the precision the store keeps.
pub(crate) fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_column<T: FromStr<Err = String>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let value: String = row.get(idx)?;
    value.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn parse_time(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(idx)?;
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_error(idx, e.to_string()))
        })
        .transpose()
}

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Opens (or creates) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                original_name TEXT NOT NULL,
                original_size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                declared_mime_type TEXT,
                family TEXT NOT NULL,
                source_format TEXT NOT NULL,
                operation TEXT NOT NULL,
                target_format TEXT,
                options TEXT NOT NULL,
                status TEXT NOT NULL,
                output_identity TEXT UNIQUE,
                output_path TEXT,
                output_size INTEGER,
                compression_ratio INTEGER,
                output_sha256 TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                expires_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_expires_at ON jobs(expires_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let options_json: String = row.get(9)?;
        let options = serde_json::from_str(&options_json)
            .map_err(|e| conversion_error(9, e.to_string()))?;

        Ok(JobRecord {
            id: row.get(0)?,
            original_name: row.get(1)?,
            original_size: row.get::<_, i64>(2)? as u64,
            mime_type: row.get(3)?,
            declared_mime_type: row.get(4)?,
            family: parse_column(row, 5)?,
            source_format: row.get(6)?,
            operation: parse_column(row, 7)?,
            target_format: row.get(8)?,
            options,
            status: parse_column(row, 10)?,
            output_identity: row.get(11)?,
            output_path: row.get::<_, Option<String>>(12)?.map(PathBuf::from),
            output_size: row.get::<_, Option<i64>>(13)?.map(|s| s as u64),
            compression_ratio: row.get(14)?,
            output_sha256: row.get(15)?,
            error: row.get(16)?,
            created_at: parse_time(row, 17)?
                .ok_or_else(|| conversion_error(17, "created_at is null".to_string()))?,
            started_at: parse_time(row, 18)?,
            finished_at: parse_time(row, 19)?,
            expires_at: parse_time(row, 20)?,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_job)
            .optional()?)
    }

    /// Reads back a record after an update touched `changed` rows.
    ///
    /// Zero rows means the compare-and-set lost: report why.
    fn after_transition(
        conn: &Connection,
        id: &str,
        changed: usize,
        requested: JobStatus,
    ) -> Result<JobRecord, StoreError> {
        let record = Self::fetch(conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if changed == 0 {
            return Err(StoreError::InvalidTransition {
                job_id: id.to_string(),
                current: record.status,
                requested,
            });
        }
        Ok(record)
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let conn = self.conn()?;

        let record = JobRecord {
            id: uuid::Uuid::new_v4().to_string(),
            original_name: job.original_name,
            original_size: job.original_size,
            mime_type: job.mime_type,
            declared_mime_type: job.declared_mime_type,
            family: job.family,
            source_format: job.source_format,
            operation: job.operation,
            target_format: job.target_format,
            options: job.options,
            status: JobStatus::Pending,
            output_identity: None,
            output_path: None,
            output_size: None,
            compression_ratio: None,
            output_sha256: None,
            error: None,
            created_at: now_millis(),
            started_at: None,
            finished_at: None,
            expires_at: None,
        };

        conn.execute(
            "INSERT INTO jobs (id, original_name, original_size, mime_type, declared_mime_type, family, source_format, operation, target_format, options, status, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.id,
                record.original_name,
                record.original_size as i64,
                record.mime_type,
                record.declared_mime_type,
                record.family.as_str(),
                record.source_format,
                record.operation.as_str(),
                record.target_format,
                serde_json::to_string(&record.options)?,
                record.status.as_str(),
                encode_time(record.created_at),
            ],
        )?;

        Ok(record)
    }

    fn get(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn get_by_output_identity(&self, identity: &str) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM jobs WHERE output_identity = ?", COLUMNS);
        Ok(conn
            .query_row(&sql, params![identity], Self::row_to_job)
            .optional()?)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.conn()?;

        let (where_clause, status) = match filter.status {
            Some(status) => ("WHERE status = ?1", Some(status.as_str())),
            None => ("WHERE ?1 IS NULL", None),
        };
        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at DESC, id ASC LIMIT ?2 OFFSET ?3",
            COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status, filter.limit, filter.offset], Self::row_to_job)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let count = match filter.status {
            Some(status) => conn.query_row(
                "SELECT COUNT(*) FROM jobs WHERE status = ?",
                params![status.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    fn mark_running(&self, id: &str) -> Result<JobRecord, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE jobs SET status = ?, started_at = ? WHERE id = ? AND status IN ({})",
            transition_sources(JobStatus::Running)
        );
        let changed = conn.execute(
            &sql,
            params![JobStatus::Running.as_str(), encode_time(now_millis()), id],
        )?;
        Self::after_transition(&conn, id, changed, JobStatus::Running)
    }

    fn complete(&self, id: &str, completion: JobCompletion) -> Result<JobRecord, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE jobs SET status = ?, output_identity = ?, output_path = ?, output_size = ?, compression_ratio = ?, output_sha256 = ?, finished_at = ?, expires_at = ? WHERE id = ? AND status IN ({})",
            transition_sources(JobStatus::Completed)
        );
        let changed = conn.execute(
            &sql,
            params![
                JobStatus::Completed.as_str(),
                completion.output_identity,
                completion.output_path.to_string_lossy().to_string(),
                completion.output_size as i64,
                completion.compression_ratio,
                completion.output_sha256,
                encode_time(now_millis()),
                encode_time(completion.expires_at),
                id
            ],
        )?;
        Self::after_transition(&conn, id, changed, JobStatus::Completed)
    }

    fn fail(&self, id: &str, error: &str) -> Result<JobRecord, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE jobs SET status = ?, error = ?, finished_at = ? WHERE id = ? AND status IN ({})",
            transition_sources(JobStatus::Failed)
        );
        let changed = conn.execute(
            &sql,
            params![JobStatus::Failed.as_str(), error, encode_time(now_millis()), id],
        )?;
        Self::after_transition(&conn, id, changed, JobStatus::Failed)
    }

    fn mark_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<JobRecord, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET expires_at = ? WHERE id = ? AND status = ? AND expires_at IS NULL",
            params![encode_time(expires_at), id, JobStatus::Completed.as_str()],
        )?;

        let record = Self::fetch(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if changed == 0 {
            if record.status != JobStatus::Completed {
                return Err(StoreError::InvalidTransition {
                    job_id: id.to_string(),
                    current: record.status,
                    requested: JobStatus::Completed,
                });
            }
            return Err(StoreError::ExpiryAlreadySet(id.to_string()));
        }
        Ok(record)
    }

    fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM jobs WHERE expires_at IS NOT NULL AND expires_at <= ? ORDER BY expires_at ASC",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![encode_time(now)], Self::row_to_job)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FormatFamily;
    use crate::job::Operation;
    use chrono::Duration;

    fn create_test_store() -> SqliteJobStore {
        SqliteJobStore::in_memory().unwrap()
    }

    fn new_job() -> NewJob {
        NewJob {
            original_name: "holiday.png".to_string(),
            original_size: 4096,
            mime_type: "image/png".to_string(),
            declared_mime_type: Some("image/png".to_string()),
            family: FormatFamily::Image,
            source_format: "png".to_string(),
            operation: Operation::Convert,
            target_format: Some("webp".to_string()),
            options: serde_json::json!({"quality": 90}),
        }
    }

    fn completion(identity: &str, expires_at: DateTime<Utc>) -> JobCompletion {
        JobCompletion {
            output_identity: identity.to_string(),
            output_path: PathBuf::from(format!("/artifacts/{}", identity)),
            output_size: 1024,
            compression_ratio: 75,
            output_sha256: "ab".repeat(32),
            expires_at,
        }
    }

    /// Creates a completed job expiring at `expires_at`.
    fn completed(store: &SqliteJobStore, identity: &str, expires_at: DateTime<Utc>) -> JobRecord {
        let job = store.create(new_job()).unwrap();
        store.mark_running(&job.id).unwrap();
        store.complete(&job.id, completion(identity, expires_at)).unwrap()
    }

    #[test]
    fn test_transition_sources() {
        assert_eq!(transition_sources(JobStatus::Running), "'pending'");
        assert_eq!(transition_sources(JobStatus::Failed), "'pending', 'running'");
    }

    #[test]
    fn test_create_and_get() {
        let store = create_test_store();
        let created = store.create(new_job()).unwrap();

        assert!(!created.id.is_empty());
        assert_eq!(created.status, JobStatus::Pending);
        assert!(created.expires_at.is_none());

        let fetched = store.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_get_nonexistent_job() {
        let store = create_test_store();
        assert!(store.get("nonexistent-id").unwrap().is_none());
    }

    #[test]
    fn test_full_success_lifecycle() {
        let store = create_test_store();
        let job = store.create(new_job()).unwrap();

        let running = store.mark_running(&job.id).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());

        let expires_at = now_millis() + Duration::hours(24);
        let done = store.complete(&job.id, completion("holiday_convert_1.webp", expires_at)).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.expires_at, Some(expires_at));
        assert_eq!(done.output_size, Some(1024));
        assert_eq!(done.compression_ratio, Some(75));
        assert!(done.error.is_none());
        assert!(done.finished_at.is_some());

        let by_identity = store
            .get_by_output_identity("holiday_convert_1.webp")
            .unwrap()
            .unwrap();
        assert_eq!(by_identity.id, job.id);
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let store = create_test_store();
        let job = store.create(new_job()).unwrap();

        // Cannot complete before running.
        let err = store
            .complete(&job.id, completion("x.webp", Utc::now()))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                current: JobStatus::Pending,
                requested: JobStatus::Completed,
                ..
            }
        ));

        store.mark_running(&job.id).unwrap();
        assert!(store.mark_running(&job.id).is_err());

        store.fail(&job.id, "codec exploded").unwrap();
        assert!(store.mark_running(&job.id).is_err());
        assert!(store.fail(&job.id, "again").is_err());
        assert!(store
            .complete(&job.id, completion("y.webp", Utc::now()))
            .is_err());

        let record = store.get(&job.id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("codec exploded"));
        assert!(record.output_path.is_none());
        assert!(record.expires_at.is_none());
    }

    #[test]
    fn test_pending_can_fail_directly() {
        let store = create_test_store();
        let job = store.create(new_job()).unwrap();
        let failed = store.fail(&job.id, "could not start").unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.started_at.is_none());
    }

    #[test]
    fn test_transition_on_missing_job() {
        let store = create_test_store();
        assert!(matches!(
            store.mark_running("missing").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_mark_expiry_is_set_once() {
        let store = create_test_store();
        let job = store.create(new_job()).unwrap();

        // Not completed yet.
        assert!(matches!(
            store.mark_expiry(&job.id, Utc::now()).unwrap_err(),
            StoreError::InvalidTransition { .. }
        ));

        let done = completed(&store, "a.webp", now_millis());
        assert!(matches!(
            store.mark_expiry(&done.id, Utc::now()).unwrap_err(),
            StoreError::ExpiryAlreadySet(_)
        ));
    }

    #[test]
    fn test_list_expired_is_exact() {
        let store = create_test_store();
        let now = now_millis();

        let past = completed(&store, "past.webp", now - Duration::hours(1));
        let boundary = completed(&store, "boundary.webp", now);
        let future = completed(&store, "future.webp", now + Duration::milliseconds(1));
        let pending = store.create(new_job()).unwrap();
        let failed = store.create(new_job()).unwrap();
        store.fail(&failed.id, "boom").unwrap();

        let expired: Vec<String> = store
            .list_expired(now)
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();

        assert_eq!(expired, vec![past.id, boundary.id]);
        assert!(!expired.contains(&future.id));
        assert!(!expired.contains(&pending.id));
        assert!(!expired.contains(&failed.id));
    }

    #[test]
    fn test_list_and_count_with_filter() {
        let store = create_test_store();
        for _ in 0..3 {
            store.create(new_job()).unwrap();
        }
        completed(&store, "done.webp", now_millis());

        assert_eq!(store.count(&JobFilter::new()).unwrap(), 4);
        assert_eq!(
            store
                .count(&JobFilter::new().with_status(JobStatus::Pending))
                .unwrap(),
            3
        );

        let completed_jobs = store
            .list(&JobFilter::new().with_status(JobStatus::Completed))
            .unwrap();
        assert_eq!(completed_jobs.len(), 1);

        let page = store.list(&JobFilter::new().with_limit(2)).unwrap();
        assert_eq!(page.len(), 2);
        let rest = store
            .list(&JobFilter::new().with_limit(10).with_offset(2))
            .unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = create_test_store();
        let job = store.create(new_job()).unwrap();
        assert!(store.delete(&job.id).unwrap());
        assert!(!store.delete(&job.id).unwrap());
        assert!(store.get(&job.id).unwrap().is_none());
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let a = encode_time(DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc));
        let b = encode_time(
            DateTime::parse_from_rfc3339("2026-01-02T03:04:05.123456Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        assert_eq!(a, "2026-01-02T03:04:05.000Z");
        assert_eq!(b, "2026-01-02T03:04:05.123Z");
        assert!(a < b);
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("db").join("jobs.db");

        let id = {
            let store = SqliteJobStore::new(&db_path).unwrap();
            store.create(new_job()).unwrap().id
        };

        let store = SqliteJobStore::new(&db_path).unwrap();
        let job = store.get(&id).unwrap().unwrap();
        assert_eq!(job.original_name, "holiday.png");
        assert_eq!(job.options["quality"], 90);
    }
}
