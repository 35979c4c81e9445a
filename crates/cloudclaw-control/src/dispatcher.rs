//! Menu command dispatcher — renders read-only snapshots of panel state.
//!
//! Each renderer returns one text block and never fails: store errors and
//! per-account cloud failures are folded into the text so one bad account
//! cannot hide the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use cloudclaw_core::config::{AppConfig, CloudConfig};
use cloudclaw_core::control::{InlineButton, InlineKeyboard};
use cloudclaw_core::error::{CloudClawError, Result};
use cloudclaw_core::traits::{ProvisioningClient, TaskStore};
use cloudclaw_core::types::{Account, TaskStatus};
use futures::future::join_all;

/// Callback actions attached to the main menu buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    CheckAlive,
    TaskDetails,
    InstanceStats,
    ConfigList,
    VersionInfo,
    TrafficStats,
    Cancel,
}

impl MenuAction {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "check_alive" => Some(Self::CheckAlive),
            "task_details" => Some(Self::TaskDetails),
            "instance_stats" => Some(Self::InstanceStats),
            "config_list" => Some(Self::ConfigList),
            "version_info" => Some(Self::VersionInfo),
            "traffic_stats" => Some(Self::TrafficStats),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }

    pub fn callback_data(&self) -> &'static str {
        match self {
            Self::CheckAlive => "check_alive",
            Self::TaskDetails => "task_details",
            Self::InstanceStats => "instance_stats",
            Self::ConfigList => "config_list",
            Self::VersionInfo => "version_info",
            Self::TrafficStats => "traffic_stats",
            Self::Cancel => "cancel",
        }
    }
}

/// Main menu: six snapshot actions in three rows, a repository link and a
/// close button.
pub fn main_menu(repository: &str) -> InlineKeyboard {
    let button = |text: &str, action: MenuAction| InlineButton::callback(text, action.callback_data());
    InlineKeyboard {
        inline_keyboard: vec![
            vec![
                button("🔍 Check accounts", MenuAction::CheckAlive),
                button("📋 Task details", MenuAction::TaskDetails),
            ],
            vec![
                button("🖥️ Instance stats", MenuAction::InstanceStats),
                button("📂 Account list", MenuAction::ConfigList),
            ],
            vec![
                button("ℹ️ Version", MenuAction::VersionInfo),
                button("📊 Traffic stats", MenuAction::TrafficStats),
            ],
            vec![InlineButton::link("⭐ Source code", repository)],
            vec![button("❌ Close", MenuAction::Cancel)],
        ],
    }
}

/// Binary-unit rendering of a byte count: `1536` → `1.50 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Minimal escaping for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Renders the text behind every menu action.
pub struct CommandDispatcher {
    store: Arc<dyn TaskStore>,
    client: Arc<dyn ProvisioningClient>,
    app: AppConfig,
    liveness_timeout: Duration,
    inventory_timeout: Duration,
    traffic_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        client: Arc<dyn ProvisioningClient>,
        app: AppConfig,
        cloud: &CloudConfig,
    ) -> Self {
        Self {
            store,
            client,
            app,
            liveness_timeout: Duration::from_secs(cloud.liveness_timeout_secs),
            inventory_timeout: Duration::from_secs(cloud.inventory_timeout_secs),
            traffic_timeout: Duration::from_secs(cloud.traffic_timeout_secs),
        }
    }

    pub fn menu(&self) -> InlineKeyboard {
        main_menu(&self.app.repository)
    }

    /// Reply sent to chats other than the authorized one.
    pub fn unauthorized_reply(&self) -> String {
        format!(
            "❌ You are not authorized to use this bot 🤖\nProject: {}",
            self.app.repository
        )
    }

    /// Snapshot text for `action`; `None` for [`MenuAction::Cancel`].
    pub async fn render(&self, action: MenuAction) -> Option<String> {
        let text = match action {
            MenuAction::CheckAlive => self.check_alive().await,
            MenuAction::TaskDetails => self.task_details(),
            MenuAction::InstanceStats => self.instance_stats().await,
            MenuAction::ConfigList => self.config_list(),
            MenuAction::VersionInfo => self.version_info(),
            MenuAction::TrafficStats => self.traffic_stats().await,
            MenuAction::Cancel => return None,
        };
        Some(text)
    }

    /// Probe every account's credentials with a cheap listing call.
    pub async fn check_alive(&self) -> String {
        const TITLE: &str = "【Account check】";
        let accounts = match self.accounts(TITLE) {
            Ok(accounts) => accounts,
            Err(text) => return text,
        };

        let probes = accounts.iter().map(|account| async move {
            let result = timed(self.liveness_timeout, self.client.list_instances(account)).await;
            (account, result)
        });
        let results = join_all(probes).await;

        let dead: Vec<String> = results
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(a, _)| escape_html(&a.name))
            .collect();
        let mut text = format!(
            "{TITLE}\n\n✅ Reachable: {}\n❌ Unreachable: {}\n🔑 Total: {}",
            accounts.len() - dead.len(),
            dead.len(),
            accounts.len()
        );
        if !dead.is_empty() {
            text.push_str(&format!("\n\n⚠️ Unreachable accounts:\n{}", dead.join("\n")));
        }
        text
    }

    /// Running provisioning tasks, one line each.
    pub fn task_details(&self) -> String {
        const TITLE: &str = "【Task details】";
        let tasks = match self.store.list_tasks_by_status(TaskStatus::Running) {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!("⚠️ Task summary unavailable: {e}");
                return format!("{TITLE}\n\n❌ Failed to load tasks");
            }
        };
        let header = format!("{TITLE}\n\n🕐 Time: {}\n\n🛎 Running tasks:", now_stamp());
        if tasks.is_empty() {
            return format!("{header} none");
        }

        let names: HashMap<String, String> = self
            .store
            .list_accounts()
            .unwrap_or_default()
            .into_iter()
            .map(|a| (a.id, a.name))
            .collect();
        let lines: Vec<String> = tasks
            .iter()
            .map(|t| {
                let owner = names.get(&t.account_id).unwrap_or(&t.account_id);
                format!(
                    "[{}] [{}] [{:.0}C/{:.0}GB/{}GB] [x{}] [{}] [{} attempts]",
                    escape_html(owner),
                    escape_html(&t.architecture),
                    t.ocpus,
                    t.memory_gb,
                    t.disk_gb,
                    t.create_numbers,
                    t.status,
                    t.execute_count
                )
            })
            .collect();
        format!("{header}\n{}", lines.join("\n"))
    }

    /// Instance totals across all accounts plus one line per account.
    pub async fn instance_stats(&self) -> String {
        const TITLE: &str = "【Instance stats】";
        let accounts = match self.accounts(TITLE) {
            Ok(accounts) => accounts,
            Err(text) => return text,
        };

        let probes = accounts.iter().map(|account| async move {
            let result = timed(self.inventory_timeout, self.client.list_instances(account)).await;
            (account, result)
        });

        let mut total = 0;
        let mut running = 0;
        let mut lines = Vec::with_capacity(accounts.len());
        for (account, result) in join_all(probes).await {
            match result {
                Ok(instances) => {
                    let up = instances.iter().filter(|i| i.is_running()).count();
                    total += instances.len();
                    running += up;
                    lines.push(format!(
                        "🔑 {} [{}]: {} instances ({} running)",
                        escape_html(&account.name),
                        account.region,
                        instances.len(),
                        up
                    ));
                }
                Err(e) => {
                    tracing::debug!("Instance listing failed for '{}': {e}", account.name);
                    lines.push(format!("❌ {}: unavailable", escape_html(&account.name)));
                }
            }
        }

        format!(
            "{TITLE}\n\n🕐 Time: {}\n📊 Total instances: {total}\n🟢 Running: {running}\n\n{}",
            now_stamp(),
            lines.join("\n")
        )
    }

    /// Configured accounts, numbered.
    pub fn config_list(&self) -> String {
        const TITLE: &str = "【Account list】";
        let accounts = match self.accounts(TITLE) {
            Ok(accounts) => accounts,
            Err(text) => return text,
        };
        let entries: Vec<String> = accounts
            .iter()
            .enumerate()
            .map(|(i, a)| {
                format!(
                    "{}. {}\n   Region: {}\n   Tenant: {}",
                    i + 1,
                    escape_html(&a.name),
                    a.region,
                    escape_html(&a.tenant_name)
                )
            })
            .collect();
        format!(
            "{TITLE}\n\n🔑 Accounts: {}\n\n{}",
            accounts.len(),
            entries.join("\n\n")
        )
    }

    pub fn version_info(&self) -> String {
        format!(
            "【Version】\n\n📦 Application: {}\n🏷️ Version: v{}\n🔧 Runtime: Rust + Tokio\n💾 Storage: SQLite\n\n🕐 Time: {}",
            self.app.name,
            self.app.version,
            now_stamp()
        )
    }

    /// Month-to-date traffic per account.
    pub async fn traffic_stats(&self) -> String {
        const TITLE: &str = "【Traffic stats】";
        let accounts = match self.accounts(TITLE) {
            Ok(accounts) => accounts,
            Err(text) => return text,
        };

        let probes = accounts.iter().map(|account| async move {
            let result = timed(self.traffic_timeout, self.client.monthly_traffic(account)).await;
            (account, result)
        });
        let blocks: Vec<String> = join_all(probes)
            .await
            .into_iter()
            .map(|(account, result)| match result {
                Ok(stats) => format!(
                    "🔑 Account: 【{}】\n🌏 Region: 【{}】\n🖥️ Instances: 【{}】\n⬇️ Inbound this month: {}\n⬆️ Outbound this month: {}",
                    escape_html(&account.name),
                    account.region,
                    stats.instance_count,
                    format_bytes(stats.inbound_bytes),
                    format_bytes(stats.outbound_bytes)
                ),
                Err(_) => format!("❌ {}: unavailable", escape_html(&account.name)),
            })
            .collect();

        format!("{TITLE}\n\n🕐 Time: {}\n\n{}", now_stamp(), blocks.join("\n\n"))
    }

    /// Accounts, or the finished reply when there is nothing to show.
    fn accounts(&self, title: &str) -> std::result::Result<Vec<Account>, String> {
        match self.store.list_accounts() {
            Ok(accounts) if accounts.is_empty() => Err(format!("{title}\n\nNo accounts configured")),
            Ok(accounts) => Ok(accounts),
            Err(e) => {
                tracing::warn!("⚠️ Account list unavailable: {e}");
                Err(format!("{title}\n\n❌ Failed to load accounts"))
            }
        }
    }
}

/// Bound one per-account call.
async fn timed<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CloudClawError::Upstream(format!(
            "timed out after {}s",
            limit.as_secs()
        ))),
    }
}
