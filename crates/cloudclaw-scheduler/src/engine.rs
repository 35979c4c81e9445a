//! Scheduler engine — one tokio timer per `running` task.
//!
//! The timer table is the only in-memory state. Task status, counters and
//! logs live in the [`TaskStore`] and are re-read at every decision point, so
//! concurrent stop/delete requests always win over a stale firing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use cloudclaw_core::config::SchedulerConfig;
use cloudclaw_core::error::{CloudClawError, Result};
use cloudclaw_core::traits::{ProvisioningClient, TaskStore};
use cloudclaw_core::types::{
    Account, ExecutionRecord, InstanceRequest, LogKind, NewTask, ProvisioningTask, SshKey,
    TaskLog, TaskStatus,
};
use tokio::task::JoinHandle;

use crate::message::extract_upstream_message;
use crate::transition::{FiringOutcome, NextStep, effective_interval, next_step};

/// Stored as `last_message` and logged when an attempt succeeds.
pub const SUCCESS_MESSAGE: &str = "Instance created successfully";

/// Lowest retry floor a configuration can set.
pub const MIN_INTERVAL_FLOOR: Duration = Duration::from_secs(1);

/// Recurring retry scheduler. Cheap to clone; clones share the timer table.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TaskStore>,
    client: Arc<dyn ProvisioningClient>,
    min_interval: Duration,
    table: Mutex<TimerTable>,
}

#[derive(Default)]
struct TimerTable {
    started: bool,
    next_generation: u64,
    timers: HashMap<String, TimerEntry>,
    /// Tasks whose firing has claimed its timer and not yet finished. The
    /// firing re-arms them itself.
    in_flight: HashSet<String>,
}

struct TimerEntry {
    /// Distinguishes this arming from earlier ones for the same task.
    generation: u64,
    interval: Duration,
    handle: JoinHandle<()>,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        client: Arc<dyn ProvisioningClient>,
        min_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                min_interval,
                table: Mutex::new(TimerTable::default()),
            }),
        }
    }

    /// Build from config. `min_interval_secs` below [`MIN_INTERVAL_FLOOR`]
    /// is raised to it.
    pub fn from_config(
        store: Arc<dyn TaskStore>,
        client: Arc<dyn ProvisioningClient>,
        config: &SchedulerConfig,
    ) -> Self {
        let configured = Duration::from_secs(config.min_interval_secs);
        if configured < MIN_INTERVAL_FLOOR {
            tracing::warn!(
                "⚠️ scheduler.min_interval_secs = {} is too low, using {}s",
                config.min_interval_secs,
                MIN_INTERVAL_FLOOR.as_secs()
            );
        }
        Self::new(store, client, configured.max(MIN_INTERVAL_FLOOR))
    }

    /// Retry floor in effect.
    pub fn min_interval(&self) -> Duration {
        self.inner.min_interval
    }

    // ─── Lifecycle ─────────────────────────────────────────

    /// Arm a timer for every persisted `running` task. No-op when already
    /// started. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        {
            let mut table = self.inner.lock_table();
            if table.started {
                return;
            }
            table.started = true;
        }

        let tasks = match self.inner.store.list_tasks_by_status(TaskStatus::Running) {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!("❌ Scheduler could not load running tasks: {e}");
                Vec::new()
            }
        };
        for task in &tasks {
            self.inner.arm(&task.id, self.inner.interval_for(task));
        }
        tracing::info!("⏰ Task scheduler started ({} running tasks)", tasks.len());
    }

    /// Cancel every pending timer. Persisted statuses are untouched, so the
    /// next [`start`](Self::start) resumes the same tasks. Idempotent.
    pub fn stop(&self) {
        let drained: Vec<TimerEntry> = {
            let mut table = self.inner.lock_table();
            let was_started = table.started;
            table.started = false;
            let drained = table.timers.drain().map(|(_, entry)| entry).collect();
            if !was_started {
                return;
            }
            drained
        };
        for entry in &drained {
            entry.handle.abort();
        }
        tracing::info!("⏹️ Task scheduler stopped ({} timers cancelled)", drained.len());
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_table().started
    }

    // ─── Task management ───────────────────────────────────

    /// Persist a new task and arm it when it starts out `running`.
    pub fn add_task(&self, params: NewTask) -> Result<ProvisioningTask> {
        validate(&params)?;
        let task = ProvisioningTask::from_new(params);
        self.inner.store.insert_task(&task)?;
        tracing::info!(
            "📅 Task added: {} ({} {} in {}, every {}s)",
            task.id,
            task.architecture,
            task.operating_system,
            task.region,
            task.interval_secs
        );
        if task.status == TaskStatus::Running {
            self.inner.arm(&task.id, self.inner.interval_for(&task));
        }
        Ok(task)
    }

    /// Flip the task to `running` and arm a fresh timer, whatever state it
    /// was in before. A task whose attempt is still in flight is re-armed by
    /// that attempt once it finishes.
    pub fn start_task(&self, id: &str) -> Result<()> {
        let task = self.inner.require_task(id)?;
        if !self.inner.store.set_task_status(id, TaskStatus::Running)? {
            return Err(not_found_task(id));
        }
        self.inner.arm(id, self.inner.interval_for(&task));
        tracing::info!("▶️ Task started: {id}");
        Ok(())
    }

    /// Flip the task to `stopped`, then cancel its timer. The status is
    /// written first so a firing already in flight sees it and drops its
    /// result.
    pub fn stop_task(&self, id: &str) -> Result<()> {
        if !self.inner.store.set_task_status(id, TaskStatus::Stopped)? {
            return Err(not_found_task(id));
        }
        self.inner.cancel(id);
        tracing::info!("⏸️ Task stopped: {id}");
        Ok(())
    }

    /// Cancel the timer, purge the task's logs, then delete the task.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.inner.cancel(id);
        let purged = self.inner.store.delete_logs(id)?;
        if !self.inner.store.delete_task(id)? {
            return Err(not_found_task(id));
        }
        tracing::info!("🗑️ Task deleted: {id} ({purged} log entries purged)");
        Ok(())
    }

    /// One provisioning attempt outside the recurring schedule. Terminal
    /// either way: success → `completed`, failure → `error`. Never touches
    /// the timer table.
    pub async fn execute_once(&self, id: &str) -> Result<()> {
        let task = self.inner.require_task(id)?;

        let (account, key) = match self.inner.resolve(&task) {
            Ok(pair) => pair,
            Err(e) => {
                self.inner
                    .store
                    .append_log(&TaskLog::new(id, LogKind::Error, e.to_string()))?;
                return Err(e);
            }
        };

        tracing::info!("🚀 Executing task {id} once");
        let request = InstanceRequest::for_task(&task, &key);
        match self.inner.client.create_instance(&account, &request).await {
            Ok(()) => {
                let record = ExecutionRecord {
                    succeeded: true,
                    message: SUCCESS_MESSAGE.to_string(),
                    executed_at: Utc::now(),
                    new_status: TaskStatus::Completed,
                };
                self.inner.store.record_execution(id, &record, false)?;
                self.inner
                    .store
                    .append_log(&TaskLog::new(id, LogKind::Success, SUCCESS_MESSAGE))?;
                tracing::info!("✅ Task {id} provisioned (one-shot)");
                Ok(())
            }
            Err(e) => {
                let message = extract_upstream_message(&e.to_string());
                let record = ExecutionRecord {
                    succeeded: false,
                    message: message.clone(),
                    executed_at: Utc::now(),
                    new_status: TaskStatus::Error,
                };
                self.inner.store.record_execution(id, &record, false)?;
                self.inner
                    .store
                    .append_log(&TaskLog::new(id, LogKind::Error, message.clone()))?;
                tracing::warn!("⚠️ Task {id} one-shot failed: {message}");
                Err(CloudClawError::Upstream(message))
            }
        }
    }

    /// Newest-first page of a task's execution log, plus the total count.
    pub fn get_logs(&self, id: &str, page: u32, page_size: u32) -> Result<(Vec<TaskLog>, u64)> {
        self.inner.store.list_logs(id, page, page_size)
    }

    pub fn clear_logs(&self, id: &str) -> Result<()> {
        let purged = self.inner.store.delete_logs(id)?;
        tracing::debug!("🧹 Cleared {purged} log entries for task {id}");
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<ProvisioningTask> {
        self.inner.require_task(id)
    }

    pub fn list_tasks(&self) -> Result<Vec<ProvisioningTask>> {
        self.inner.store.list_tasks()
    }

    // ─── Introspection ─────────────────────────────────────

    pub fn has_timer(&self, id: &str) -> bool {
        self.inner.lock_table().timers.contains_key(id)
    }

    /// Interval the pending timer for `id` was armed with.
    pub fn scheduled_interval(&self, id: &str) -> Option<Duration> {
        self.inner.lock_table().timers.get(id).map(|t| t.interval)
    }

    pub fn active_timers(&self) -> usize {
        self.inner.lock_table().timers.len()
    }

    /// Whether an attempt for `id` is currently running.
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.inner.lock_table().in_flight.contains(id)
    }
}

impl Inner {
    fn lock_table(&self) -> MutexGuard<'_, TimerTable> {
        // The table holds no invariants a panicking holder could break halfway.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn interval_for(&self, task: &ProvisioningTask) -> Duration {
        effective_interval(task.interval_secs, self.min_interval)
    }

    fn require_task(&self, id: &str) -> Result<ProvisioningTask> {
        self.store.get_task(id)?.ok_or_else(|| not_found_task(id))
    }

    fn resolve(&self, task: &ProvisioningTask) -> Result<(Account, SshKey)> {
        let account = self
            .store
            .get_account(&task.account_id)?
            .ok_or_else(|| CloudClawError::NotFound(format!("account {}", task.account_id)))?;
        let key = self
            .store
            .get_ssh_key(&task.ssh_key_id)?
            .ok_or_else(|| CloudClawError::NotFound(format!("SSH key {}", task.ssh_key_id)))?;
        Ok((account, key))
    }

    /// Register a timer for `task_id`, replacing any existing one. Returns
    /// the new generation, or `None` while the scheduler is stopped or an
    /// attempt for the task is in flight.
    fn arm(self: &Arc<Self>, task_id: &str, interval: Duration) -> Option<u64> {
        let mut table = self.lock_table();
        if table.in_flight.contains(task_id) {
            tracing::debug!("Task {task_id} attempt in flight; it re-arms on completion");
            return None;
        }
        self.arm_locked(&mut table, task_id, interval)
    }

    fn arm_locked(
        self: &Arc<Self>,
        table: &mut TimerTable,
        task_id: &str,
        interval: Duration,
    ) -> Option<u64> {
        if !table.started {
            tracing::debug!("Scheduler stopped; task {task_id} will be armed on start");
            return None;
        }
        table.next_generation += 1;
        let generation = table.next_generation;

        let inner = Arc::clone(self);
        let id = task_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if inner.claim(&id, generation) {
                inner.fire(&id, interval).await;
            }
        });

        let previous = table.timers.insert(
            task_id.to_string(),
            TimerEntry {
                generation,
                interval,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        tracing::debug!("⏲️ Task {task_id} armed for {}s", interval.as_secs());
        Some(generation)
    }

    /// Called by an expired timer: moves the task from the timer table to
    /// the in-flight set. False when the timer was cancelled or replaced.
    fn claim(&self, task_id: &str, generation: u64) -> bool {
        let mut table = self.lock_table();
        match table.timers.get(task_id) {
            Some(entry) if entry.generation == generation => {
                table.timers.remove(task_id);
                table.in_flight.insert(task_id.to_string());
                true
            }
            _ => false,
        }
    }

    fn cancel(&self, task_id: &str) -> bool {
        let removed = self.lock_table().timers.remove(task_id);
        match removed {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    fn cancel_generation(&self, task_id: &str, generation: u64) {
        let removed = {
            let mut table = self.lock_table();
            match table.timers.get(task_id) {
                Some(entry) if entry.generation == generation => table.timers.remove(task_id),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            entry.handle.abort();
        }
    }

    /// One timer firing.
    async fn fire(self: &Arc<Self>, task_id: &str, interval: Duration) {
        let outcome = match self.store.get_task(task_id) {
            Ok(Some(task)) => self.attempt(&task).await,
            Ok(None) => FiringOutcome::Inactive,
            Err(e) => {
                // Status unknown; keep the task alive and look again next time.
                tracing::warn!("⚠️ Task {task_id} could not be read: {e}");
                FiringOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };

        let reschedule = match next_step(&outcome, interval) {
            NextStep::Reschedule(every) => Some(every),
            NextStep::Retire => {
                tracing::debug!("Task {task_id} retired after {outcome:?}");
                None
            }
        };
        // A provisioned task is never resumed, even if its completion was
        // not persisted.
        let resume = !matches!(outcome, FiringOutcome::Provisioned);
        self.finish(task_id, reschedule, resume);
    }

    async fn attempt(&self, task: &ProvisioningTask) -> FiringOutcome {
        if task.status != TaskStatus::Running {
            return FiringOutcome::Inactive;
        }
        let id = task.id.as_str();
        tracing::info!("🔔 Task fired: {id} (attempt #{})", task.execute_count + 1);

        let (account, key) = match self.resolve(task) {
            Ok(pair) => pair,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!("⚠️ Task {id} misconfigured: {reason}");
                self.append_log(id, LogKind::Error, &reason);
                return FiringOutcome::ResolutionFailed { reason };
            }
        };

        let request = InstanceRequest::for_task(task, &key);
        let result = self.client.create_instance(&account, &request).await;

        let (record, outcome) = match result {
            Ok(()) => (
                ExecutionRecord {
                    succeeded: true,
                    message: SUCCESS_MESSAGE.to_string(),
                    executed_at: Utc::now(),
                    new_status: TaskStatus::Completed,
                },
                FiringOutcome::Provisioned,
            ),
            Err(e) => {
                let message = extract_upstream_message(&e.to_string());
                (
                    ExecutionRecord {
                        succeeded: false,
                        message: message.clone(),
                        executed_at: Utc::now(),
                        new_status: TaskStatus::Running,
                    },
                    FiringOutcome::Failed { message },
                )
            }
        };

        match self.store.record_execution(id, &record, true) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("Task {id} left running during its attempt; result discarded");
                return FiringOutcome::Discarded;
            }
            Err(e) => tracing::error!("❌ Task {id} outcome not persisted: {e}"),
        }

        match &outcome {
            FiringOutcome::Provisioned => {
                tracing::info!("✅ Task {id} provisioned");
                self.append_log(id, LogKind::Success, SUCCESS_MESSAGE);
            }
            FiringOutcome::Failed { message } => {
                tracing::info!("🔁 Task {id} failed: {message}");
                self.append_log(id, LogKind::Error, message);
            }
            _ => {}
        }
        outcome
    }

    /// Leave the in-flight set, arming the next firing in the same step,
    /// then confirm against the store. A stop that lands in between is caught
    /// either here or by its own cancel, which always follows its status
    /// write. With `resume`, a task restarted while in flight is armed here.
    fn finish(self: &Arc<Self>, task_id: &str, reschedule: Option<Duration>, resume: bool) {
        let generation = {
            let mut table = self.lock_table();
            table.in_flight.remove(task_id);
            reschedule.and_then(|every| self.arm_locked(&mut table, task_id, every))
        };
        match self.store.get_task(task_id) {
            Ok(Some(task)) if task.status == TaskStatus::Running => {
                if generation.is_none() && resume {
                    self.arm(task_id, self.interval_for(&task));
                }
            }
            Ok(_) => {
                if let Some(generation) = generation {
                    self.cancel_generation(task_id, generation);
                }
            }
            Err(e) => tracing::warn!("⚠️ Task {task_id} re-arm check failed: {e}"),
        }
    }

    fn append_log(&self, task_id: &str, kind: LogKind, message: &str) {
        if let Err(e) = self.store.append_log(&TaskLog::new(task_id, kind, message)) {
            tracing::warn!("⚠️ Failed to log execution of task {task_id}: {e}");
        }
    }
}

fn not_found_task(id: &str) -> CloudClawError {
    CloudClawError::NotFound(format!("task {id}"))
}

fn validate(params: &NewTask) -> Result<()> {
    let missing = [
        ("account_id", params.account_id.trim()),
        ("ssh_key_id", params.ssh_key_id.trim()),
        ("region", params.region.trim()),
    ]
    .into_iter()
    .find(|(_, value)| value.is_empty());
    if let Some((field, _)) = missing {
        return Err(CloudClawError::Scheduler(format!("{field} is required")));
    }
    if params.ocpus <= 0.0 || params.memory_gb <= 0.0 {
        return Err(CloudClawError::Scheduler(
            "ocpus and memory_gb must be positive".into(),
        ));
    }
    Ok(())
}
