// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print record store backed by SQLite.
//
// One row per accepted job: identity, origin, template, and the latest
// lifecycle state with its message. The payload itself is never stored.
// Status writes that fail are reported to the caller, who logs them and
// carries on; a lost record never blocks printing.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use printgate_core::error::{PrintgateError, Result};
use printgate_core::types::{ClientType, JobRecord, JobStatus, TaskId};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS print_records (
        task_id TEXT PRIMARY KEY,
        name TEXT NOT NULL DEFAULT '',
        template_id TEXT,
        client_type TEXT NOT NULL,
        print_time TEXT NOT NULL,
        print_status TEXT NOT NULL,
        msg TEXT
    )
"#;

const SELECT_COLUMNS: &str =
    "SELECT task_id, name, template_id, client_type, print_time, print_status, msg FROM print_records";

fn db_err(context: &str) -> impl FnOnce(rusqlite::Error) -> PrintgateError + '_ {
    move |e| PrintgateError::Persistence(format!("{context}: {e}"))
}

/// Persistent job records.
///
/// Synchronous; `rusqlite::Connection` is `Send` but not `Sync`, so shared
/// owners wrap it in a mutex.
pub struct JobStore {
    conn: Connection,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore").finish_non_exhaustive()
    }
}

impl JobStore {
    /// Open (or create) the record database at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;

        info!("print record database opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;
        debug!("in-memory print record database opened");
        Ok(Self { conn })
    }

    /// Insert a freshly accepted job.
    #[instrument(skip(self, record), fields(task_id = %record.task_id))]
    pub fn insert_job(&self, record: &JobRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO print_records
                 (task_id, name, template_id, client_type, print_time, print_status, msg)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.task_id.as_str(),
                    record.name,
                    record.template_id,
                    record.client_type.as_str(),
                    record.print_time.to_rfc3339(),
                    record.print_status.as_str(),
                    record.msg,
                ],
            )
            .map_err(db_err("insert record"))?;

        debug!(task_id = %record.task_id, "print record inserted");
        Ok(())
    }

    /// Record the terminal state of a job and its message.
    #[instrument(skip(self, msg), fields(task_id = %task_id))]
    pub fn update_status(&self, task_id: &TaskId, status: JobStatus, msg: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE print_records SET print_status = ?1, msg = ?2 WHERE task_id = ?3",
                params![status.as_str(), msg, task_id.as_str()],
            )
            .map_err(db_err("update status"))?;

        if rows == 0 {
            return Err(PrintgateError::Persistence(format!(
                "record {task_id} not found"
            )));
        }
        debug!(task_id = %task_id, status = status.as_str(), "print record updated");
        Ok(())
    }

    /// Look up one record; `None` if the task was never recorded.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub fn get_record(&self, task_id: &TaskId) -> Result<Option<JobRecord>> {
        self.conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE task_id = ?1"),
                params![task_id.as_str()],
                row_to_record,
            )
            .optional()
            .map_err(db_err("get record"))
    }

    /// The `limit` most recent records, newest first.
    #[instrument(skip(self))]
    pub fn recent_records(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{SELECT_COLUMNS} ORDER BY print_time DESC, rowid DESC LIMIT ?1"
            ))
            .map_err(db_err("prepare recent"))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map(params![limit], row_to_record)
            .map_err(db_err("query recent"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("collect rows"))?;

        debug!(count = records.len(), "retrieved recent records");
        Ok(records)
    }
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

#[derive(Debug)]
struct UnknownValue(String);

impl std::fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unrecognised stored value {:?}", self.0)
    }
}

impl std::error::Error for UnknownValue {}

/// Column order matches `SELECT_COLUMNS`.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    let task_id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let template_id: Option<String> = row.get(2)?;
    let client_type: String = row.get(3)?;
    let print_time: String = row.get(4)?;
    let print_status: String = row.get(5)?;
    let msg: Option<String> = row.get(6)?;

    let client_type = match client_type.as_str() {
        "local" => ClientType::Local,
        "transit" => ClientType::Transit,
        _ => return Err(conversion_error(3, UnknownValue(client_type))),
    };
    let print_time: DateTime<Utc> = DateTime::parse_from_rfc3339(&print_time)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(4, e))?;
    let print_status = JobStatus::parse(&print_status)
        .ok_or_else(|| conversion_error(5, UnknownValue(print_status.clone())))?;

    Ok(JobRecord {
        task_id: TaskId(task_id),
        name,
        template_id,
        client_type,
        print_time,
        print_status,
        msg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use printgate_core::types::{JobDescriptor, JobPayload};

    fn pending_record() -> JobRecord {
        let mut job = JobDescriptor::local("P1", JobPayload::default());
        job.name = "invoice".into();
        job.template_id = Some("tpl-1".into());
        JobRecord::pending(&job)
    }

    #[test]
    fn insert_and_fetch_record() {
        let store = JobStore::open_in_memory().expect("open");
        let record = pending_record();
        store.insert_job(&record).expect("insert");

        let fetched = store.get_record(&record.task_id).expect("get").expect("found");
        assert_eq!(fetched.task_id, record.task_id);
        assert_eq!(fetched.print_status, JobStatus::Pending);
        assert_eq!(fetched.template_id.as_deref(), Some("tpl-1"));
        assert_eq!(fetched.client_type, ClientType::Local);
    }

    #[test]
    fn update_status_sets_message() {
        let store = JobStore::open_in_memory().expect("open");
        let record = pending_record();
        store.insert_job(&record).expect("insert");

        store
            .update_status(&record.task_id, JobStatus::Failed, "paper jam")
            .expect("update");

        let fetched = store.get_record(&record.task_id).unwrap().unwrap();
        assert_eq!(fetched.print_status, JobStatus::Failed);
        assert_eq!(fetched.msg.as_deref(), Some("paper jam"));
    }

    #[test]
    fn update_unknown_record_is_persistence_error() {
        let store = JobStore::open_in_memory().expect("open");
        let err = store
            .update_status(&TaskId::from("ghost"), JobStatus::Completed, "")
            .unwrap_err();
        assert_eq!(err.kind(), "PersistenceWarning");
    }

    #[test]
    fn missing_record_is_none() {
        let store = JobStore::open_in_memory().expect("open");
        assert!(store.get_record(&TaskId::from("nope")).unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = JobStore::open_in_memory().expect("open");
        let record = pending_record();
        store.insert_job(&record).expect("insert");
        assert!(store.insert_job(&record).is_err());
    }

    #[test]
    fn recent_records_newest_first_and_limited() {
        let store = JobStore::open_in_memory().expect("open");
        let mut ids = Vec::new();
        for minutes in 0..3 {
            let mut record = pending_record();
            record.print_time += chrono::Duration::minutes(minutes);
            ids.push(record.task_id.clone());
            store.insert_job(&record).unwrap();
        }

        let recent = store.recent_records(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].task_id, ids[2]);
        assert_eq!(recent[1].task_id, ids[1]);
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("records.db");
        let record = pending_record();
        {
            let store = JobStore::open(&path).expect("open");
            store.insert_job(&record).unwrap();
        }
        let store = JobStore::open(&path).expect("reopen");
        assert!(store.get_record(&record.task_id).unwrap().is_some());
    }
}
