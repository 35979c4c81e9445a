//! Panel database — tasks, execution logs, accounts, SSH keys and settings.

use chrono::{DateTime, SecondsFormat, Utc};
use cloudclaw_core::error::{CloudClawError, Result};
use cloudclaw_core::traits::TaskStore;
use cloudclaw_core::types::{
    Account, ExecutionRecord, LogKind, ProvisioningTask, SshKey, TaskLog, TaskStatus,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const TASK_COLUMNS: &str = "id, account_id, ssh_key_id, region, architecture, operating_system, \
     ocpus, memory_gb, disk_gb, boot_volume_vpu, image_id, create_numbers, interval_secs, \
     status, execute_count, success_count, last_execute_time, last_message, created_at";

/// SQLite implementation of [`TaskStore`].
pub struct PanelDb {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> CloudClawError {
    CloudClawError::Database(e.to_string())
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<ProvisioningTask> {
    let status: String = row.get(13)?;
    let last_execute_time: Option<String> = row.get(16)?;
    let created_at: String = row.get(18)?;
    Ok(ProvisioningTask {
        id: row.get(0)?,
        account_id: row.get(1)?,
        ssh_key_id: row.get(2)?,
        region: row.get(3)?,
        architecture: row.get(4)?,
        operating_system: row.get(5)?,
        ocpus: row.get::<_, f64>(6)? as f32,
        memory_gb: row.get::<_, f64>(7)? as f32,
        disk_gb: row.get(8)?,
        boot_volume_vpu: row.get(9)?,
        image_id: row.get(10)?,
        create_numbers: row.get::<_, i64>(11)? as u32,
        interval_secs: row.get::<_, i64>(12)?.max(0) as u64,
        // Unknown values park the task rather than resuming it.
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Stopped),
        execute_count: row.get::<_, i64>(14)? as u32,
        success_count: row.get::<_, i64>(15)? as u32,
        last_execute_time: last_execute_time.as_deref().map(parse_ts),
        last_message: row.get(17)?,
        created_at: parse_ts(&created_at),
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<TaskLog> {
    let kind: String = row.get(2)?;
    let execute_time: String = row.get(4)?;
    Ok(TaskLog {
        id: row.get(0)?,
        task_id: row.get(1)?,
        kind: LogKind::parse(&kind).unwrap_or(LogKind::Error),
        message: row.get(3)?,
        execute_time: parse_ts(&execute_time),
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        region: row.get(2)?,
        tenant_id: row.get(3)?,
        tenant_name: row.get(4)?,
        credentials: row.get(5)?,
    })
}

impl PanelDb {
    /// Open or create the panel database. `:memory:` gives a private
    /// in-process database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| db_err(format!("open: {e}")))?;

        // WAL is unavailable for in-memory databases; ignore the failure there.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        tracing::debug!("💾 Panel DB ready at {}", path.display());
        Ok(db)
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| db_err(format!("lock: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                region TEXT NOT NULL DEFAULT '',
                tenant_id TEXT NOT NULL DEFAULT '',
                tenant_name TEXT NOT NULL DEFAULT '',
                credentials TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS ssh_keys (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                public_key TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS provision_tasks (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                ssh_key_id TEXT NOT NULL,
                region TEXT NOT NULL,
                architecture TEXT NOT NULL,
                operating_system TEXT NOT NULL,
                ocpus REAL NOT NULL,
                memory_gb REAL NOT NULL,
                disk_gb INTEGER NOT NULL,
                boot_volume_vpu INTEGER NOT NULL DEFAULT 10,
                image_id TEXT,
                create_numbers INTEGER NOT NULL DEFAULT 1,
                interval_secs INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'stopped',   -- running, stopped, completed, error
                execute_count INTEGER NOT NULL DEFAULT 0,
                success_count INTEGER NOT NULL DEFAULT 0,
                last_execute_time TEXT,
                last_message TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_provision_tasks_status ON provision_tasks(status);

            CREATE TABLE IF NOT EXISTS task_logs (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                kind TEXT NOT NULL,                        -- success, error
                message TEXT NOT NULL,
                execute_time TEXT NOT NULL,
                FOREIGN KEY (task_id) REFERENCES provision_tasks(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_task_logs_task ON task_logs(task_id, execute_time);

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL DEFAULT '',
                updated_at TEXT DEFAULT (datetime('now'))
            );
            ",
        )
        .map_err(|e| db_err(format!("migration: {e}")))?;
        Ok(())
    }
}

impl TaskStore for PanelDb {
    // ─── Tasks ─────────────────────────────────────────────

    fn insert_task(&self, task: &ProvisioningTask) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO provision_tasks ({TASK_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
            ),
            params![
                task.id,
                task.account_id,
                task.ssh_key_id,
                task.region,
                task.architecture,
                task.operating_system,
                task.ocpus as f64,
                task.memory_gb as f64,
                task.disk_gb,
                task.boot_volume_vpu,
                task.image_id,
                task.create_numbers as i64,
                task.interval_secs as i64,
                task.status.as_str(),
                task.execute_count as i64,
                task.success_count as i64,
                task.last_execute_time.as_ref().map(ts),
                task.last_message,
                ts(&task.created_at),
            ],
        )
        .map_err(|e| db_err(format!("insert task: {e}")))?;
        Ok(())
    }

    fn get_task(&self, id: &str) -> Result<Option<ProvisioningTask>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM provision_tasks WHERE id = ?1"),
            params![id],
            task_from_row,
        )
        .optional()
        .map_err(|e| db_err(format!("get task: {e}")))
    }

    fn list_tasks(&self) -> Result<Vec<ProvisioningTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM provision_tasks ORDER BY created_at, rowid"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([], task_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<ProvisioningTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM provision_tasks WHERE status = ?1 ORDER BY created_at, rowid"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![status.as_str()], task_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE provision_tasks SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )
            .map_err(|e| db_err(format!("set status: {e}")))?;
        Ok(changed > 0)
    }

    fn record_execution(
        &self,
        id: &str,
        record: &ExecutionRecord,
        only_if_running: bool,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let sql = if only_if_running {
            "UPDATE provision_tasks
             SET execute_count = execute_count + 1, success_count = success_count + ?2,
                 last_execute_time = ?3, last_message = ?4, status = ?5
             WHERE id = ?1 AND status = 'running'"
        } else {
            "UPDATE provision_tasks
             SET execute_count = execute_count + 1, success_count = success_count + ?2,
                 last_execute_time = ?3, last_message = ?4, status = ?5
             WHERE id = ?1"
        };
        let changed = conn
            .execute(
                sql,
                params![
                    id,
                    if record.succeeded { 1i64 } else { 0i64 },
                    ts(&record.executed_at),
                    record.message,
                    record.new_status.as_str(),
                ],
            )
            .map_err(|e| db_err(format!("record execution: {e}")))?;
        Ok(changed > 0)
    }

    fn delete_task(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM provision_tasks WHERE id = ?1", params![id])
            .map_err(|e| db_err(format!("delete task: {e}")))?;
        Ok(changed > 0)
    }

    // ─── Execution log ─────────────────────────────────────

    fn append_log(&self, log: &TaskLog) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO task_logs (id, task_id, kind, message, execute_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.id,
                log.task_id,
                log.kind.as_str(),
                log.message,
                ts(&log.execute_time),
            ],
        )
        .map_err(|e| db_err(format!("append log: {e}")))?;
        Ok(())
    }

    fn list_logs(&self, task_id: &str, page: u32, page_size: u32) -> Result<(Vec<TaskLog>, u64)> {
        let page_size = i64::from(page_size.max(1));
        let offset = i64::from(page.max(1) - 1).saturating_mul(page_size);
        let conn = self.lock()?;

        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM task_logs WHERE task_id = ?1",
                params![task_id],
                |r| r.get(0),
            )
            .map_err(db_err)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, kind, message, execute_time FROM task_logs
                 WHERE task_id = ?1
                 ORDER BY execute_time DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![task_id, page_size, offset],
                log_from_row,
            )
            .map_err(db_err)?;
        let logs = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?;
        Ok((logs, total.max(0) as u64))
    }

    fn delete_logs(&self, task_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM task_logs WHERE task_id = ?1", params![task_id])
            .map_err(|e| db_err(format!("delete logs: {e}")))
    }

    // ─── Accounts & keys ───────────────────────────────────

    fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, region, tenant_id, tenant_name, credentials FROM accounts WHERE id = ?1",
            params![id],
            account_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, region, tenant_id, tenant_name, credentials FROM accounts
                 ORDER BY rowid",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([], account_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn upsert_account(&self, account: &Account) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO accounts (id, name, region, tenant_id, tenant_name, credentials)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, region = excluded.region,
                 tenant_id = excluded.tenant_id, tenant_name = excluded.tenant_name,
                 credentials = excluded.credentials",
            params![
                account.id,
                account.name,
                account.region,
                account.tenant_id,
                account.tenant_name,
                account.credentials,
            ],
        )
        .map_err(|e| db_err(format!("upsert account: {e}")))?;
        Ok(())
    }

    fn get_ssh_key(&self, id: &str) -> Result<Option<SshKey>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, public_key FROM ssh_keys WHERE id = ?1",
            params![id],
            |row| {
                Ok(SshKey {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    public_key: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    fn upsert_ssh_key(&self, key: &SshKey) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO ssh_keys (id, name, public_key) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, public_key = excluded.public_key",
            params![key.id, key.name, key.public_key],
        )
        .map_err(|e| db_err(format!("upsert ssh key: {e}")))?;
        Ok(())
    }

    // ─── Settings ──────────────────────────────────────────

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )
        .map_err(|e| db_err(format!("set setting: {e}")))?;
        Ok(())
    }
}
