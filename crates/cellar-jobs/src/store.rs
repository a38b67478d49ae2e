//! SQLite-backed job catalog.
//!
//! Jobs live in the `jobs` table as JSON with the transient `tasks` field
//! stripped. Tasks live in the `tasks` table; the rows sharing a `job_id`
//! form that job's task bucket and are removed with it in one transaction.
//! Reads come back ordered by key.

use cellar_core::{CellarError, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::model::{Job, Task, TaskStatus};

/// Filters of [`JobStore::list_jobs`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListJobsRequest {
    /// Only jobs owned by this user, when non-empty.
    pub owner: String,
    /// Only jobs subscribed to at least one event.
    pub events_only: bool,
    /// Only jobs carrying a schedule.
    pub timers_only: bool,
    /// Tasks to attach. `Unknown` loads none.
    pub load_tasks: TaskStatus,
}

/// Conditions of [`JobStore::delete_tasks`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteTasksRequest {
    /// Job whose tasks are deleted. Empty means every job.
    pub job_id: String,
    /// Delete exactly these tasks.
    pub task_ids: Vec<String>,
    /// Delete the tasks in any of these states.
    pub statuses: Vec<TaskStatus>,
    /// With `statuses`: keep this many of the most recent matching tasks.
    pub prune_limit: usize,
}

/// Persistent store of jobs and their tasks.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::debug!("💾 Job store opened at {}", path.display());
        Ok(store)
    }

    /// Store without a backing file.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> Result<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL DEFAULT '',
                data TEXT NOT NULL               -- JSON, tasks stripped
            );

            CREATE TABLE IF NOT EXISTS tasks (
                job_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                status INTEGER NOT NULL,
                start_time INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL,              -- JSON
                PRIMARY KEY (job_id, task_id)
            );
            ",
        )?;
        Ok(())
    }

    // ─── Jobs ─────────────────────────────────────────────────

    /// Upsert a job. Its `tasks` field is never written.
    pub fn put_job(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_string(&job.without_tasks())?;
        self.conn().execute(
            "INSERT OR REPLACE INTO jobs (id, owner, data) VALUES (?1, ?2, ?3)",
            rusqlite::params![job.id, job.owner, data],
        )?;
        Ok(())
    }

    /// Fetch a job, attaching its tasks in state `load_tasks` unless that is
    /// `Unknown`.
    pub fn get_job(&self, job_id: &str, load_tasks: TaskStatus) -> Result<Job> {
        let data: Option<String> = self
            .conn()
            .query_row(
                "SELECT data FROM jobs WHERE id = ?1",
                rusqlite::params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(data) = data else {
            return Err(CellarError::not_found(format!("job {job_id}")));
        };
        let mut job: Job = serde_json::from_str(&data)?;
        if load_tasks != TaskStatus::Unknown {
            job.tasks = self.list_tasks(job_id, load_tasks)?;
        }
        Ok(job)
    }

    /// Remove a job and its task bucket. A missing job is not an error.
    pub fn delete_job(&self, job_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM tasks WHERE job_id = ?1", rusqlite::params![job_id])?;
        tx.execute("DELETE FROM jobs WHERE id = ?1", rusqlite::params![job_id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_jobs(&self, req: &ListJobsRequest) -> Result<Vec<Job>> {
        let rows: Vec<String> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT data FROM jobs WHERE (?1 = '' OR owner = ?1) ORDER BY id",
            )?;
            let rows = stmt.query_map(rusqlite::params![req.owner], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let skip_empty = !matches!(req.load_tasks, TaskStatus::Unknown | TaskStatus::Any);
        let mut jobs = Vec::with_capacity(rows.len());
        for data in rows {
            let mut job: Job = serde_json::from_str(&data)?;
            if req.events_only && job.event_names.is_empty() {
                continue;
            }
            if req.timers_only && job.schedule.is_none() {
                continue;
            }
            if req.load_tasks != TaskStatus::Unknown {
                job.tasks = self.list_tasks(&job.id, req.load_tasks)?;
                if skip_empty && job.tasks.is_empty() {
                    continue;
                }
            }
            jobs.push(job);
        }
        Ok(jobs)
    }

    // ─── Tasks ────────────────────────────────────────────────

    /// Upsert a task into its job's bucket. The job itself need not exist.
    pub fn put_task(&self, task: &Task) -> Result<()> {
        let data = serde_json::to_string(task)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO tasks (job_id, task_id, status, start_time, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![task.job_id, task.id, task.status.as_i32(), task.start_time, data],
        )?;
        Ok(())
    }

    /// Tasks of `job_id` (every job when empty) in state `status`.
    pub fn list_tasks(&self, job_id: &str, status: TaskStatus) -> Result<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT data FROM tasks
             WHERE (?1 = '' OR job_id = ?1) AND (?2 = ?3 OR status = ?2)
             ORDER BY job_id, task_id",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![job_id, status.as_i32(), TaskStatus::Any.as_i32()],
            |row| row.get::<_, String>(0),
        )?;
        let mut tasks = Vec::new();
        for data in rows {
            tasks.push(serde_json::from_str(&data?)?);
        }
        Ok(tasks)
    }

    /// Delete tasks by id, or by status keeping the `prune_limit` most
    /// recent per job. Returns the deleted tasks.
    pub fn delete_tasks(&self, req: &DeleteTasksRequest) -> Result<Vec<Task>> {
        if req.task_ids.is_empty() && req.statuses.is_empty() {
            return Err(CellarError::bad_request(
                "delete tasks needs task ids or statuses",
            ));
        }

        let candidates = self.list_tasks(&req.job_id, TaskStatus::Any)?;
        let doomed: Vec<Task> = if !req.task_ids.is_empty() {
            candidates
                .into_iter()
                .filter(|t| req.task_ids.contains(&t.id))
                .collect()
        } else {
            let mut matching: Vec<Task> = candidates
                .into_iter()
                .filter(|t| req.statuses.iter().any(|s| t.status.matches(*s)))
                .collect();
            // Newest first within each job, so the kept ones lead.
            matching.sort_by(|a, b| {
                a.job_id
                    .cmp(&b.job_id)
                    .then(b.start_time.cmp(&a.start_time))
                    .then(a.id.cmp(&b.id))
            });
            let mut doomed = Vec::new();
            let mut kept_in_job = 0usize;
            let mut current_job: Option<String> = None;
            for task in matching {
                if current_job.as_deref() != Some(task.job_id.as_str()) {
                    current_job = Some(task.job_id.clone());
                    kept_in_job = 0;
                }
                if kept_in_job < req.prune_limit {
                    kept_in_job += 1;
                } else {
                    doomed.push(task);
                }
            }
            doomed
        };

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for task in &doomed {
            tx.execute(
                "DELETE FROM tasks WHERE job_id = ?1 AND task_id = ?2",
                rusqlite::params![task.job_id, task.id],
            )?;
        }
        tx.commit()?;
        Ok(doomed)
    }
}
