//! API route handlers for the gateway.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use cloudclaw_core::error::Result;
use cloudclaw_core::types::NewTask;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::server::AppState;

const DEFAULT_TEST_MESSAGE: &str = "🔔 CloudClaw test message: the Telegram bot is working.";
const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Mask a bot token for display: keep the first 6 and last 4 characters of
/// long tokens, hide short ones entirely.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 10 {
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}****{tail}")
    } else if !chars.is_empty() {
        "****".to_string()
    } else {
        String::new()
    }
}

fn ok_or_error(result: Result<()>) -> Json<Value> {
    match result {
        Ok(()) => Json(json!({"ok": true})),
        Err(e) => Json(json!({"ok": false, "error": e.to_string()})),
    }
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "cloudclaw-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "scheduler_running": state.scheduler.is_running(),
        "active_timers": state.scheduler.active_timers(),
        "bot_running": state.bot.is_running(),
    }))
}

// ---- Provisioning tasks ----

/// List all tasks, each annotated with whether a timer is armed for it.
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Value> {
    match state.scheduler.list_tasks() {
        Ok(tasks) => {
            let tasks: Vec<Value> = tasks
                .iter()
                .map(|t| {
                    let mut v = json!(t);
                    v["scheduled"] = json!(state.scheduler.has_timer(&t.id));
                    v
                })
                .collect();
            Json(json!({"ok": true, "tasks": tasks}))
        }
        Err(e) => Json(json!({"ok": false, "error": e.to_string()})),
    }
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    match state.scheduler.get_task(&id) {
        Ok(task) => Json(json!({
            "ok": true,
            "task": task,
            "scheduled": state.scheduler.has_timer(&id),
        })),
        Err(e) => Json(json!({"ok": false, "error": e.to_string()})),
    }
}

/// Create a task from a JSON body shaped like [`NewTask`].
pub async fn add_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let params: NewTask = match serde_json::from_value(body) {
        Ok(params) => params,
        Err(e) => return Json(json!({"ok": false, "error": format!("Invalid task: {e}")})),
    };
    match state.scheduler.add_task(params) {
        Ok(task) => Json(json!({"ok": true, "task": task})),
        Err(e) => Json(json!({"ok": false, "error": e.to_string()})),
    }
}

pub async fn start_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    ok_or_error(state.scheduler.start_task(&id))
}

pub async fn stop_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    ok_or_error(state.scheduler.stop_task(&id))
}

/// One immediate provisioning attempt outside the schedule.
pub async fn execute_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    ok_or_error(state.scheduler.execute_once(&id).await)
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    ok_or_error(state.scheduler.delete_task(&id))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Json<Value> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    match state.scheduler.get_logs(&id, page, page_size) {
        Ok((logs, total)) => Json(json!({
            "ok": true,
            "logs": logs,
            "total": total,
            "page": page,
            "page_size": page_size,
        })),
        Err(e) => Json(json!({"ok": false, "error": e.to_string()})),
    }
}

pub async fn clear_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    ok_or_error(state.scheduler.clear_logs(&id))
}

// ---- Telegram control bot ----

pub async fn telegram_get_config(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = state.bot.get_config();
    Json(json!({
        "ok": true,
        "bot_token": mask_token(&config.token),
        "chat_id": config.chat_id,
        "enabled": config.enabled,
        "running": state.bot.is_running(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct TelegramConfigBody {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Save bot settings. A blank or still-masked token keeps the stored one.
pub async fn telegram_update_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TelegramConfigBody>,
) -> Json<Value> {
    let submitted = body.bot_token.trim();
    let token = if submitted.is_empty() || submitted.contains("****") {
        state.bot.get_config().token
    } else {
        submitted.to_string()
    };
    ok_or_error(
        state
            .bot
            .update_config(&token, body.chat_id.trim(), body.enabled),
    )
}

pub async fn telegram_test(State(state): State<Arc<AppState>>) -> Json<Value> {
    match state.bot.test_connection().await {
        Ok(me) => Json(json!({
            "ok": true,
            "bot_id": me.id,
            "bot_username": me.username,
            "bot_name": me.first_name,
        })),
        Err(e) => Json(json!({"ok": false, "error": e.to_string()})),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SendBody {
    #[serde(default)]
    pub message: String,
}

pub async fn telegram_send(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendBody>,
) -> Json<Value> {
    let message = if body.message.trim().is_empty() {
        DEFAULT_TEST_MESSAGE
    } else {
        body.message.as_str()
    };
    ok_or_error(state.bot.send_message(message).await)
}

pub async fn telegram_start(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = state.bot.get_config();
    if !config.enabled || !config.is_configured() {
        return Json(json!({
            "ok": false,
            "error": "Telegram bot is not enabled or not configured",
        }));
    }
    ok_or_error(state.bot.start_bot())
}

pub async fn telegram_stop(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.bot.stop_bot();
    Json(json!({"ok": true}))
}

pub async fn telegram_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"ok": true, "running": state.bot.is_running()}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cloudclaw_control::{CommandDispatcher, ControlBot};
    use cloudclaw_core::config::{AppConfig, CloudConfig, GatewayConfig, TelegramConfig};
    use cloudclaw_core::control::{BotIdentity, InlineKeyboard, Update};
    use cloudclaw_core::error::CloudClawError;
    use cloudclaw_core::traits::{ControlTransport, ProvisioningClient, TaskStore};
    use cloudclaw_core::types::{
        Account, InstanceInfo, InstanceRequest, SshKey, TaskStatus, TrafficStats,
    };
    use cloudclaw_db::PanelDb;
    use cloudclaw_scheduler::TaskScheduler;
    use std::time::Duration;

    /// Every provisioning attempt fails with a capacity error.
    struct NoCapacity;

    #[async_trait]
    impl ProvisioningClient for NoCapacity {
        async fn create_instance(&self, _: &Account, _: &InstanceRequest) -> Result<()> {
            Err(CloudClawError::Upstream(
                "ServiceError. Message: Out of host capacity. code: 500".into(),
            ))
        }
        async fn list_instances(&self, _: &Account) -> Result<Vec<InstanceInfo>> {
            Ok(Vec::new())
        }
        async fn monthly_traffic(&self, _: &Account) -> Result<TrafficStats> {
            Ok(TrafficStats::default())
        }
    }

    /// Accepts everything, delivers nothing.
    struct SilentTransport;

    #[async_trait]
    impl ControlTransport for SilentTransport {
        async fn get_updates(&self, _: &str, _: i64, timeout: u64) -> Result<Vec<Update>> {
            tokio::time::sleep(Duration::from_secs(timeout)).await;
            Ok(Vec::new())
        }
        async fn send_message(&self, _: &str, _: &str, _: &str, _: Option<&InlineKeyboard>) -> Result<()> {
            Ok(())
        }
        async fn edit_message(&self, _: &str, _: &str, _: i64, _: &str, _: Option<&InlineKeyboard>) -> Result<()> {
            Ok(())
        }
        async fn delete_message(&self, _: &str, _: &str, _: i64) -> Result<()> {
            Ok(())
        }
        async fn answer_callback(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn get_me(&self, _: &str) -> Result<BotIdentity> {
            Ok(BotIdentity {
                id: 7,
                first_name: "CloudClaw".into(),
                username: Some("cloudclaw_bot".into()),
            })
        }
    }

    fn test_state() -> State<Arc<AppState>> {
        let db = Arc::new(PanelDb::in_memory().unwrap());
        db.upsert_account(&Account {
            id: "acc-1".into(),
            name: "tokyo".into(),
            region: "ap-tokyo-1".into(),
            tenant_id: "ten-1".into(),
            tenant_name: "acme".into(),
            credentials: String::new(),
        })
        .unwrap();
        db.upsert_ssh_key(&SshKey {
            id: "key-1".into(),
            name: "ops".into(),
            public_key: "ssh-ed25519 AAAA".into(),
        })
        .unwrap();

        let client = Arc::new(NoCapacity);
        let scheduler = TaskScheduler::new(db.clone(), client.clone(), Duration::from_secs(10));
        let dispatcher =
            CommandDispatcher::new(db.clone(), client, AppConfig::default(), &CloudConfig::default());
        let bot = ControlBot::load(
            db,
            Arc::new(SilentTransport),
            dispatcher,
            &TelegramConfig::default(),
        )
        .unwrap();

        State(Arc::new(AppState {
            gateway_config: GatewayConfig::default(),
            start_time: std::time::Instant::now(),
            scheduler,
            bot,
        }))
    }

    fn task_body() -> Value {
        json!({
            "account_id": "acc-1",
            "ssh_key_id": "key-1",
            "region": "ap-tokyo-1",
            "architecture": "ARM",
            "operating_system": "Ubuntu",
            "ocpus": 4.0,
            "memory_gb": 24.0,
            "disk_gb": 100,
            "interval_secs": 60
        })
    }

    async fn create_task(state: &State<Arc<AppState>>) -> String {
        let json = add_task(state.clone(), Json(task_body())).await.0;
        assert_eq!(json["ok"], true);
        json["task"]["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("123456789:ABCdefGHIjkl"), "123456****Ijkl");
        assert_eq!(mask_token("short"), "****");
        assert_eq!(mask_token("0123456789"), "****");
        assert_eq!(mask_token(""), "");
    }

    #[tokio::test]
    async fn test_health_check() {
        let json = health_check(test_state()).await.0;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["scheduler_running"], false);
        assert_eq!(json["bot_running"], false);
    }

    #[tokio::test]
    async fn test_task_lifecycle() {
        let state = test_state();
        state.scheduler.start();
        let id = create_task(&state).await;

        let listed = list_tasks(state.clone()).await.0;
        assert_eq!(listed["tasks"].as_array().unwrap().len(), 1);
        assert_eq!(listed["tasks"][0]["status"], "running");
        assert_eq!(listed["tasks"][0]["scheduled"], true);

        let stopped = stop_task(state.clone(), Path(id.clone())).await.0;
        assert_eq!(stopped["ok"], true);
        let fetched = get_task(state.clone(), Path(id.clone())).await.0;
        assert_eq!(fetched["task"]["status"], "stopped");
        assert_eq!(fetched["scheduled"], false);

        let started = start_task(state.clone(), Path(id.clone())).await.0;
        assert_eq!(started["ok"], true);
        assert!(state.scheduler.has_timer(&id));

        let deleted = delete_task(state.clone(), Path(id.clone())).await.0;
        assert_eq!(deleted["ok"], true);
        let missing = get_task(state.clone(), Path(id)).await.0;
        assert_eq!(missing["ok"], false);
        state.scheduler.stop();
    }

    #[tokio::test]
    async fn test_add_task_rejects_bad_body() {
        let json = add_task(test_state(), Json(json!({"region": "x"}))).await.0;
        assert_eq!(json["ok"], false);
        assert!(json["error"].as_str().unwrap().starts_with("Invalid task"));
    }

    #[tokio::test]
    async fn test_execute_records_failure_and_logs() {
        let state = test_state();
        let id = create_task(&state).await;

        let json = execute_task(state.clone(), Path(id.clone())).await.0;
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "Out of host capacity");
        assert_eq!(
            state.scheduler.get_task(&id).unwrap().status,
            TaskStatus::Error
        );

        let logs = get_logs(
            state.clone(),
            Path(id.clone()),
            Query(LogQuery {
                page: None,
                page_size: None,
            }),
        )
        .await
        .0;
        assert_eq!(logs["total"], 1);
        assert_eq!(logs["page_size"], DEFAULT_PAGE_SIZE);
        assert_eq!(logs["logs"][0]["kind"], "error");

        let cleared = clear_logs(state.clone(), Path(id.clone())).await.0;
        assert_eq!(cleared["ok"], true);
        assert_eq!(state.scheduler.get_logs(&id, 1, 10).unwrap().1, 0);
    }

    #[tokio::test]
    async fn test_get_logs_clamps_paging() {
        let state = test_state();
        let id = create_task(&state).await;
        let _ = execute_task(state.clone(), Path(id.clone())).await;

        let json = get_logs(
            state.clone(),
            Path(id.clone()),
            Query(LogQuery {
                page: Some(u32::MAX),
                page_size: Some(u32::MAX),
            }),
        )
        .await
        .0;
        assert_eq!(json["ok"], true);
        assert_eq!(json["page_size"], MAX_PAGE_SIZE);
        assert_eq!(json["total"], 1);
        assert_eq!(json["logs"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_task_errors() {
        let state = test_state();
        for json in [
            start_task(state.clone(), Path("nope".into())).await.0,
            stop_task(state.clone(), Path("nope".into())).await.0,
            delete_task(state.clone(), Path("nope".into())).await.0,
            execute_task(state.clone(), Path("nope".into())).await.0,
        ] {
            assert_eq!(json["ok"], false);
            assert!(json["error"].as_str().unwrap().contains("Not found"));
        }
    }

    #[tokio::test]
    async fn test_telegram_config_masking_and_keep_token() {
        let state = test_state();
        let saved = telegram_update_config(
            state.clone(),
            Json(TelegramConfigBody {
                bot_token: "123456789:ABCdefGHIjkl".into(),
                chat_id: "1001".into(),
                enabled: false,
            }),
        )
        .await
        .0;
        assert_eq!(saved["ok"], true);

        let shown = telegram_get_config(state.clone()).await.0;
        assert_eq!(shown["bot_token"], "123456****Ijkl");
        assert_eq!(shown["chat_id"], "1001");
        assert_eq!(shown["running"], false);

        // Submitting the masked value back keeps the real token.
        telegram_update_config(
            state.clone(),
            Json(TelegramConfigBody {
                bot_token: "123456****Ijkl".into(),
                chat_id: "1001".into(),
                enabled: false,
            }),
        )
        .await;
        assert_eq!(state.bot.get_config().token, "123456789:ABCdefGHIjkl");
    }

    #[tokio::test]
    async fn test_telegram_start_requires_enabled() {
        let state = test_state();
        let json = telegram_start(state.clone()).await.0;
        assert_eq!(json["ok"], false);

        state.bot.update_config("123456789:ABCdefGHIjkl", "1001", true).unwrap();
        let status = telegram_status(state.clone()).await.0;
        assert_eq!(status["running"], true);
        assert_eq!(telegram_start(state.clone()).await.0["ok"], true);

        telegram_stop(state.clone()).await;
        assert_eq!(telegram_status(state.clone()).await.0["running"], false);
    }

    #[tokio::test]
    async fn test_telegram_send_and_test() {
        let state = test_state();
        let json = telegram_send(state.clone(), Json(SendBody::default())).await.0;
        assert_eq!(json["ok"], false);

        state.bot.update_config("123456789:ABCdefGHIjkl", "1001", true).unwrap();
        let sent = telegram_send(state.clone(), Json(SendBody::default())).await.0;
        assert_eq!(sent["ok"], true);
        let me = telegram_test(state.clone()).await.0;
        assert_eq!(me["bot_username"], "cloudclaw_bot");
        state.bot.stop_bot();
    }
}
