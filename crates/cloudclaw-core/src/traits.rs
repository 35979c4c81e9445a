//! Seams to the collaborators the scheduler and the bot consume but do not
//! implement: the record store, the cloud API and the messaging transport.

use async_trait::async_trait;

use crate::control::{BotIdentity, InlineKeyboard, Update};
use crate::error::Result;
use crate::types::{
    Account, ExecutionRecord, InstanceInfo, InstanceRequest, ProvisioningTask, SshKey, TaskLog,
    TaskStatus, TrafficStats,
};

/// Identifier-keyed record store for tasks, logs, accounts and settings.
///
/// Implementations must be safe to call from many tokio tasks at once; every
/// call is short and synchronous.
pub trait TaskStore: Send + Sync {
    // ─── Tasks ─────────────────────────────────────────────
    fn insert_task(&self, task: &ProvisioningTask) -> Result<()>;
    fn get_task(&self, id: &str) -> Result<Option<ProvisioningTask>>;
    /// All tasks, oldest first.
    fn list_tasks(&self) -> Result<Vec<ProvisioningTask>>;
    fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<ProvisioningTask>>;
    /// Returns false when no task has this id.
    fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<bool>;
    /// Bump `execute_count` (and `success_count` on success), stamp the
    /// execution time, store the message and status. With `only_if_running`
    /// the write is skipped unless the stored status is still `running`;
    /// the return value says whether the row was written.
    fn record_execution(
        &self,
        id: &str,
        record: &ExecutionRecord,
        only_if_running: bool,
    ) -> Result<bool>;
    /// Returns false when no task has this id.
    fn delete_task(&self, id: &str) -> Result<bool>;

    // ─── Execution log ─────────────────────────────────────
    fn append_log(&self, log: &TaskLog) -> Result<()>;
    /// One newest-first page (1-based) plus the total number of entries.
    fn list_logs(&self, task_id: &str, page: u32, page_size: u32) -> Result<(Vec<TaskLog>, u64)>;
    fn delete_logs(&self, task_id: &str) -> Result<usize>;

    // ─── Accounts & keys ───────────────────────────────────
    fn get_account(&self, id: &str) -> Result<Option<Account>>;
    fn list_accounts(&self) -> Result<Vec<Account>>;
    fn upsert_account(&self, account: &Account) -> Result<()>;
    fn get_ssh_key(&self, id: &str) -> Result<Option<SshKey>>;
    fn upsert_ssh_key(&self, key: &SshKey) -> Result<()>;

    // ─── Settings ──────────────────────────────────────────
    fn get_setting(&self, key: &str) -> Result<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
}

/// Cloud API operations. Failures carry the upstream's free-form text.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// One create-instance attempt. May take seconds to minutes.
    async fn create_instance(&self, account: &Account, request: &InstanceRequest) -> Result<()>;

    async fn list_instances(&self, account: &Account) -> Result<Vec<InstanceInfo>>;

    async fn monthly_traffic(&self, account: &Account) -> Result<TrafficStats>;
}

/// Request/response messaging API with long-poll update delivery.
/// Every call is parameterized by the bot token in effect at call time.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Long-poll for updates with id >= `offset`, waiting up to `timeout_secs`.
    async fn get_updates(&self, token: &str, offset: i64, timeout_secs: u64) -> Result<Vec<Update>>;

    async fn send_message(
        &self,
        token: &str,
        chat_id: &str,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()>;

    async fn edit_message(
        &self,
        token: &str,
        chat_id: &str,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()>;

    async fn delete_message(&self, token: &str, chat_id: &str, message_id: i64) -> Result<()>;

    async fn answer_callback(&self, token: &str, callback_id: &str) -> Result<()>;

    async fn get_me(&self, token: &str) -> Result<BotIdentity>;
}
