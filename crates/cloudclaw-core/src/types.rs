//! Data model — provisioning tasks, their execution log, and the account
//! records they reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a provisioning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Stopped,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Stopped => "stopped",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(TaskStatus::Running),
            "stopped" => Some(TaskStatus::Stopped),
            "completed" => Some(TaskStatus::Completed),
            "error" => Some(TaskStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recurring attempt to acquire one cloud instance shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningTask {
    pub id: String,
    pub account_id: String,
    pub ssh_key_id: String,
    pub region: String,
    pub architecture: String,
    pub operating_system: String,
    pub ocpus: f32,
    pub memory_gb: f32,
    pub disk_gb: i64,
    pub boot_volume_vpu: i64,
    pub image_id: Option<String>,
    /// Number of instances requested.
    pub create_numbers: u32,
    /// Retry interval in seconds, before the scheduler's floor is applied.
    pub interval_secs: u64,
    pub status: TaskStatus,
    pub execute_count: u32,
    pub success_count: u32,
    pub last_execute_time: Option<DateTime<Utc>>,
    pub last_message: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for a new task, as supplied by the caller of `add_task`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub account_id: String,
    pub ssh_key_id: String,
    pub region: String,
    pub architecture: String,
    pub operating_system: String,
    pub ocpus: f32,
    pub memory_gb: f32,
    pub disk_gb: i64,
    #[serde(default = "default_vpu")]
    pub boot_volume_vpu: i64,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default = "default_create_numbers")]
    pub create_numbers: u32,
    pub interval_secs: u64,
    /// Schedule immediately (`running`) or park the task as `stopped`.
    #[serde(default = "default_true")]
    pub start_immediately: bool,
}

fn default_vpu() -> i64 { 10 }
fn default_create_numbers() -> u32 { 1 }
fn default_true() -> bool { true }

impl ProvisioningTask {
    /// Materialize a fresh task record with a new id.
    pub fn from_new(params: NewTask) -> Self {
        Self {
            id: uuid_v4(),
            account_id: params.account_id,
            ssh_key_id: params.ssh_key_id,
            region: params.region,
            architecture: params.architecture,
            operating_system: params.operating_system,
            ocpus: params.ocpus,
            memory_gb: params.memory_gb,
            disk_gb: params.disk_gb,
            boot_volume_vpu: params.boot_volume_vpu,
            image_id: params.image_id,
            create_numbers: params.create_numbers,
            interval_secs: params.interval_secs,
            status: if params.start_immediately {
                TaskStatus::Running
            } else {
                TaskStatus::Stopped
            },
            execute_count: 0,
            success_count: 0,
            last_execute_time: None,
            last_message: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome kind of one logged execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Success,
    Error,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Success => "success",
            LogKind::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(LogKind::Success),
            "error" => Some(LogKind::Error),
            _ => None,
        }
    }
}

/// Append-only record of one firing or one-shot execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLog {
    pub id: String,
    pub task_id: String,
    pub kind: LogKind,
    pub message: String,
    pub execute_time: DateTime<Utc>,
}

impl TaskLog {
    pub fn new(task_id: &str, kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            id: uuid_v4(),
            task_id: task_id.to_string(),
            kind,
            message: message.into(),
            execute_time: Utc::now(),
        }
    }
}

/// Counter/status write produced by one provisioning attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub succeeded: bool,
    pub message: String,
    pub executed_at: DateTime<Utc>,
    pub new_status: TaskStatus,
}

/// A cloud tenancy the panel can act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub region: String,
    pub tenant_id: String,
    pub tenant_name: String,
    /// Opaque credential material forwarded to the provisioning client.
    #[serde(default, skip_serializing)]
    pub credentials: String,
}

/// SSH public key injected into provisioned instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKey {
    pub id: String,
    pub name: String,
    pub public_key: String,
}

/// Everything the cloud API needs for one create-instance attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub region: String,
    pub architecture: String,
    pub operating_system: String,
    pub ocpus: f32,
    pub memory_gb: f32,
    pub disk_gb: i64,
    pub boot_volume_vpu: i64,
    pub ssh_public_key: String,
    pub image_id: Option<String>,
}

impl InstanceRequest {
    pub fn for_task(task: &ProvisioningTask, key: &SshKey) -> Self {
        Self {
            region: task.region.clone(),
            architecture: task.architecture.clone(),
            operating_system: task.operating_system.clone(),
            ocpus: task.ocpus,
            memory_gb: task.memory_gb,
            disk_gb: task.disk_gb,
            boot_volume_vpu: task.boot_volume_vpu,
            ssh_public_key: key.public_key.clone(),
            image_id: task.image_id.clone(),
        }
    }
}

/// Summary of one compute instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    pub display_name: String,
    pub lifecycle_state: String,
    #[serde(default)]
    pub region: String,
}

impl InstanceInfo {
    pub fn is_running(&self) -> bool {
        self.lifecycle_state.eq_ignore_ascii_case("RUNNING")
    }
}

/// Month-to-date network totals for one account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficStats {
    pub instance_count: u32,
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
}

fn uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}
