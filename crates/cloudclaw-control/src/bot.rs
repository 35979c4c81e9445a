//! Control bot — long-poll loop, sender authorization and menu dispatch.
//!
//! Bot configuration (token, authorized chat, enabled flag) lives in the
//! settings table and can change while the loop runs; every poll and every
//! reply reads the values in effect at that moment.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Local;
use cloudclaw_core::config::TelegramConfig;
use cloudclaw_core::control::{BotIdentity, CallbackQuery, IncomingMessage, Update};
use cloudclaw_core::error::{CloudClawError, Result};
use cloudclaw_core::traits::{ControlTransport, TaskStore};
use serde::Serialize;
use tokio::sync::Notify;

use crate::dispatcher::{CommandDispatcher, MenuAction, escape_html};

pub const SETTING_TOKEN: &str = "tg_bot_token";
pub const SETTING_CHAT_ID: &str = "tg_chat_id";
pub const SETTING_ENABLED: &str = "tg_enabled";

const MENU_PROMPT: &str = "Please choose an action:";

/// Persisted bot settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BotConfig {
    pub token: String,
    /// The one chat (or user) id allowed to drive the bot.
    pub chat_id: String,
    pub enabled: bool,
}

impl BotConfig {
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.chat_id.is_empty()
    }
}

struct BotState {
    config: BotConfig,
    running: bool,
    /// Present exactly while a loop is running; taken to stop it.
    stop: Option<Arc<Notify>>,
}

/// Chat control plane. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ControlBot {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TaskStore>,
    transport: Arc<dyn ControlTransport>,
    dispatcher: CommandDispatcher,
    poll_timeout_secs: u64,
    error_backoff: Duration,
    poll_interval: Duration,
    state: RwLock<BotState>,
    /// Next update id to request. Survives loop restarts; reset when the
    /// token changes.
    offset: AtomicI64,
}

impl ControlBot {
    /// Build the bot from the persisted settings. Does not start polling.
    pub fn load(
        store: Arc<dyn TaskStore>,
        transport: Arc<dyn ControlTransport>,
        dispatcher: CommandDispatcher,
        settings: &TelegramConfig,
    ) -> Result<Self> {
        let config = BotConfig {
            token: store.get_setting(SETTING_TOKEN)?.unwrap_or_default(),
            chat_id: store.get_setting(SETTING_CHAT_ID)?.unwrap_or_default(),
            enabled: store.get_setting(SETTING_ENABLED)?.as_deref() == Some("true"),
        };
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                transport,
                dispatcher,
                poll_timeout_secs: settings.poll_timeout_secs,
                error_backoff: Duration::from_secs(settings.error_backoff_secs),
                poll_interval: Duration::from_secs(settings.poll_interval_secs),
                state: RwLock::new(BotState {
                    config,
                    running: false,
                    stop: None,
                }),
                offset: AtomicI64::new(0),
            }),
        })
    }

    pub fn get_config(&self) -> BotConfig {
        self.inner.read_state().config.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.read_state().running
    }

    /// Persist new settings, then start the loop when enabled and
    /// configured, otherwise stop it.
    pub fn update_config(&self, token: &str, chat_id: &str, enabled: bool) -> Result<()> {
        let store = &self.inner.store;
        store.set_setting(SETTING_TOKEN, token)?;
        store.set_setting(SETTING_CHAT_ID, chat_id)?;
        store.set_setting(SETTING_ENABLED, if enabled { "true" } else { "false" })?;

        let config = BotConfig {
            token: token.to_string(),
            chat_id: chat_id.to_string(),
            enabled,
        };
        let should_run = config.enabled && config.is_configured();
        let previous = std::mem::replace(&mut self.inner.write_state().config, config);
        if previous.token != token {
            // Update ids belong to one bot.
            self.inner.offset.store(0, Ordering::SeqCst);
        }
        tracing::info!("⚙️ Telegram bot config updated (enabled: {enabled})");

        if should_run {
            self.start_bot()
        } else {
            self.stop_bot();
            Ok(())
        }
    }

    /// Start polling when enabled and configured; used at process start.
    pub fn start_if_enabled(&self) -> Result<bool> {
        let config = self.get_config();
        if !(config.enabled && config.is_configured()) {
            return Ok(false);
        }
        self.start_bot()?;
        Ok(true)
    }

    /// Spawn the long-poll loop. No-op when already running. Must be called
    /// from within a Tokio runtime.
    pub fn start_bot(&self) -> Result<()> {
        let stop = {
            let mut state = self.inner.write_state();
            if !state.config.is_configured() {
                return Err(CloudClawError::Config(
                    "Telegram bot token and chat id must be set".into(),
                ));
            }
            if state.running {
                return Ok(());
            }
            let stop = Arc::new(Notify::new());
            state.running = true;
            state.stop = Some(Arc::clone(&stop));
            stop
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.poll_loop(stop).await });
        tracing::info!("🤖 Telegram bot started");
        Ok(())
    }

    /// Signal the loop to exit. No-op when not running.
    pub fn stop_bot(&self) {
        let stop = {
            let mut state = self.inner.write_state();
            state.running = false;
            state.stop.take()
        };
        if let Some(stop) = stop {
            // A stored permit reaches the loop even if it is not waiting yet.
            stop.notify_one();
            tracing::info!("🛑 Telegram bot stopped");
        }
    }

    /// `getMe` with the current token.
    pub async fn test_connection(&self) -> Result<BotIdentity> {
        let token = self.get_config().token;
        if token.is_empty() {
            return Err(CloudClawError::Config("Telegram bot token is not set".into()));
        }
        self.inner.transport.get_me(&token).await
    }

    /// Send `text` to the authorized chat.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let config = self.get_config();
        if !config.enabled || !config.is_configured() {
            return Err(CloudClawError::Channel(
                "Telegram bot is not enabled or not configured".into(),
            ));
        }
        self.inner
            .transport
            .send_message(&config.token, &config.chat_id, text, None)
            .await
    }

    /// Bold title, body and a timestamp.
    pub async fn send_notification(&self, title: &str, body: &str) -> Result<()> {
        let text = format!(
            "<b>{}</b>\n\n{}\n\n🕐 {}",
            escape_html(title),
            body,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        self.send_message(&text).await
    }

    /// One poll: fetch updates at `offset`, handle them in order and return
    /// the next offset. Updates below the current offset are skipped. The
    /// loop resumes from the highest offset reached.
    pub async fn poll_once(&self, offset: i64) -> Result<i64> {
        self.inner.poll_once(offset).await
    }
}

impl Inner {
    fn read_state(&self) -> RwLockReadGuard<'_, BotState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, BotState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn config(&self) -> BotConfig {
        self.read_state().config.clone()
    }

    async fn poll_loop(&self, stop: Arc<Notify>) {
        loop {
            let offset = self.offset.load(Ordering::SeqCst);
            let pause = tokio::select! {
                _ = stop.notified() => break,
                result = self.poll_once(offset) => match result {
                    Ok(_) => self.poll_interval,
                    Err(e) => {
                        tracing::warn!("⚠️ Telegram poll error: {e}");
                        self.error_backoff
                    }
                },
            };
            tokio::select! {
                _ = stop.notified() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        tracing::debug!("Telegram poll loop exited");
    }

    async fn poll_once(&self, offset: i64) -> Result<i64> {
        let token = self.config().token;
        if token.is_empty() {
            return Err(CloudClawError::Config("Telegram bot token is not set".into()));
        }
        let updates = self
            .transport
            .get_updates(&token, offset, self.poll_timeout_secs)
            .await?;

        let mut next = offset;
        for update in &updates {
            if update.update_id < next {
                tracing::debug!("Skipping stale update {}", update.update_id);
                continue;
            }
            next = update.update_id + 1;
            // Recorded before handling so a stop mid-batch never redelivers.
            self.offset.fetch_max(next, Ordering::SeqCst);
            self.handle_update(update).await;
        }
        Ok(next)
    }

    async fn handle_update(&self, update: &Update) {
        let config = self.config();
        if let Some(message) = &update.message {
            self.handle_message(&config, message).await;
        }
        if let Some(callback) = &update.callback_query {
            self.handle_callback(&config, callback).await;
        }
    }

    async fn handle_message(&self, config: &BotConfig, message: &IncomingMessage) {
        let chat_id = message.chat.id.to_string();
        if chat_id != config.chat_id {
            tracing::warn!("🚫 Rejected message from unauthorized chat {chat_id}");
            let reply = self.dispatcher.unauthorized_reply();
            self.report(self.transport.send_message(&config.token, &chat_id, &reply, None).await);
            return;
        }

        let text = message.text.as_deref().unwrap_or("").trim();
        let command = text.split('@').next().unwrap_or("");
        if command == "/start" {
            let menu = self.dispatcher.menu();
            self.report(
                self.transport
                    .send_message(&config.token, &chat_id, MENU_PROMPT, Some(&menu))
                    .await,
            );
        }
    }

    async fn handle_callback(&self, config: &BotConfig, callback: &CallbackQuery) {
        self.report(self.transport.answer_callback(&config.token, &callback.id).await);

        if callback.from.id.to_string() != config.chat_id {
            tracing::warn!("🚫 Ignored button press from unauthorized user {}", callback.from.id);
            return;
        }
        let Some(origin) = &callback.message else {
            return;
        };
        let Some(action) = callback.data.as_deref().and_then(MenuAction::parse) else {
            tracing::debug!("Unknown callback data: {:?}", callback.data);
            return;
        };

        let chat_id = origin.chat.id.to_string();
        tracing::info!("📨 Menu action: {}", action.callback_data());
        let result = match self.dispatcher.render(action).await {
            Some(text) => {
                let menu = self.dispatcher.menu();
                self.transport
                    .edit_message(&config.token, &chat_id, origin.message_id, &text, Some(&menu))
                    .await
            }
            None => {
                self.transport
                    .delete_message(&config.token, &chat_id, origin.message_id)
                    .await
            }
        };
        self.report(result);
    }

    fn report(&self, result: Result<()>) {
        if let Err(e) = result {
            tracing::warn!("⚠️ Telegram reply failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockCloud, MockTransport, Sent, account, store_with};
    use cloudclaw_core::config::{AppConfig, CloudConfig};
    use cloudclaw_core::control::{CallbackMessage, Chat, Sender};
    use cloudclaw_db::PanelDb;

    const OWNER: i64 = 1001;

    struct Harness {
        bot: ControlBot,
        store: Arc<PanelDb>,
        transport: Arc<MockTransport>,
        cloud: Arc<MockCloud>,
    }

    fn harness(transport: MockTransport, configured: bool) -> Harness {
        let store = store_with(&[account("a1", "tokyo")]);
        if configured {
            store.set_setting(SETTING_TOKEN, "123:abc").unwrap();
            store.set_setting(SETTING_CHAT_ID, &OWNER.to_string()).unwrap();
            store.set_setting(SETTING_ENABLED, "true").unwrap();
        }
        let cloud = Arc::new(MockCloud::default());
        let transport = Arc::new(transport);
        let dispatcher = CommandDispatcher::new(
            store.clone(),
            cloud.clone(),
            AppConfig::default(),
            &CloudConfig::default(),
        );
        let bot = ControlBot::load(
            store.clone(),
            transport.clone(),
            dispatcher,
            &TelegramConfig::default(),
        )
        .unwrap();
        Harness {
            bot,
            store,
            transport,
            cloud,
        }
    }

    fn message(update_id: i64, chat: i64, text: &str) -> Update {
        Update {
            update_id,
            message: Some(IncomingMessage {
                message_id: update_id * 10,
                from: None,
                chat: Chat {
                    id: chat,
                    chat_type: "private".into(),
                },
                text: Some(text.into()),
                date: 0,
            }),
            callback_query: None,
        }
    }

    fn press(update_id: i64, from: i64, data: &str) -> Update {
        Update {
            update_id,
            message: None,
            callback_query: Some(CallbackQuery {
                id: format!("cb-{update_id}"),
                from: Sender {
                    id: from,
                    is_bot: false,
                    first_name: "someone".into(),
                    username: None,
                },
                message: Some(CallbackMessage {
                    message_id: 77,
                    chat: Chat {
                        id: from,
                        chat_type: "private".into(),
                    },
                }),
                data: Some(data.into()),
            }),
        }
    }

    #[tokio::test]
    async fn test_load_reads_settings() {
        let h = harness(MockTransport::default(), true);
        let config = h.bot.get_config();
        assert_eq!(config.token, "123:abc");
        assert_eq!(config.chat_id, "1001");
        assert!(config.enabled);
        assert!(!h.bot.is_running());

        let blank = harness(MockTransport::default(), false);
        assert_eq!(blank.bot.get_config(), BotConfig::default());
    }

    #[tokio::test]
    async fn test_offset_advances_past_batch() {
        let h = harness(
            MockTransport::with_batches(vec![Ok(vec![
                message(5, OWNER, "/start"),
                message(6, OWNER, "hello"),
                message(7, OWNER, "/start@cloudclaw_bot"),
            ])]),
            true,
        );
        assert_eq!(h.bot.poll_once(0).await.unwrap(), 8);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|s| matches!(
            s,
            Sent::Message { keyboard: true, chat_id, .. } if chat_id == "1001"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offset_survives_restart() {
        let h = harness(
            MockTransport::with_batches(vec![Ok(vec![
                message(5, OWNER, "/start"),
                message(6, OWNER, "/start"),
                message(7, OWNER, "/start"),
            ])]),
            true,
        );
        h.bot.start_bot().unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.transport.sent().len(), 3);
        h.bot.stop_bot();

        h.bot.start_bot().unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.transport.offsets(), vec![0, 8]);
        assert_eq!(h.transport.sent().len(), 3);
        h.bot.stop_bot();

        // A different bot starts from its own first update.
        h.bot.update_config("456:def", "1001", true).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.transport.offsets().last(), Some(&0));
        h.bot.stop_bot();
    }

    #[tokio::test]
    async fn test_stale_updates_skipped() {
        let h = harness(
            MockTransport::with_batches(vec![Ok(vec![
                message(8, OWNER, "/start"),
                message(10, OWNER, "/start"),
            ])]),
            true,
        );
        assert_eq!(h.bot.poll_once(10).await.unwrap(), 11);
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_keeps_offset() {
        let h = harness(MockTransport::with_batches(vec![Ok(vec![])]), true);
        assert_eq!(h.bot.poll_once(42).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_unauthorized_message_rejected() {
        let h = harness(
            MockTransport::with_batches(vec![Ok(vec![message(1, 555, "/start")])]),
            true,
        );
        h.bot.poll_once(0).await.unwrap();
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Sent::Message {
                chat_id,
                text,
                keyboard,
            } => {
                assert_eq!(chat_id, "555");
                assert!(text.contains("not authorized"));
                assert!(!keyboard);
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unauthorized_press_only_acknowledged() {
        let h = harness(
            MockTransport::with_batches(vec![Ok(vec![press(1, 555, "check_alive")])]),
            true,
        );
        h.bot.poll_once(0).await.unwrap();
        assert_eq!(h.transport.sent(), vec![Sent::Answer("cb-1".into())]);
        assert_eq!(h.cloud.calls(), 0);
    }

    #[tokio::test]
    async fn test_press_edits_in_place() {
        let h = harness(
            MockTransport::with_batches(vec![Ok(vec![press(3, OWNER, "check_alive")])]),
            true,
        );
        h.bot.poll_once(0).await.unwrap();
        let sent = h.transport.sent();
        assert_eq!(sent[0], Sent::Answer("cb-3".into()));
        match &sent[1] {
            Sent::Edit {
                message_id, text, ..
            } => {
                assert_eq!(*message_id, 77);
                assert!(text.contains("Reachable: 1"));
            }
            other => panic!("unexpected call: {other:?}"),
        }
        assert_eq!(h.cloud.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_deletes_message() {
        let h = harness(
            MockTransport::with_batches(vec![Ok(vec![press(4, OWNER, "cancel")])]),
            true,
        );
        h.bot.poll_once(0).await.unwrap();
        assert_eq!(
            h.transport.sent()[1],
            Sent::Delete {
                chat_id: "1001".into(),
                message_id: 77
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_press_only_acknowledged() {
        let h = harness(
            MockTransport::with_batches(vec![Ok(vec![press(4, OWNER, "reboot_all")])]),
            true,
        );
        h.bot.poll_once(0).await.unwrap();
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_idempotent() {
        let h = harness(MockTransport::default(), true);
        h.bot.start_bot().unwrap();
        h.bot.start_bot().unwrap();
        assert!(h.bot.is_running());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.transport.polls(), 1);

        h.bot.stop_bot();
        h.bot.stop_bot();
        assert!(!h.bot.is_running());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.transport.polls(), 1);

        h.bot.start_bot().unwrap();
        assert!(h.bot.is_running());
        h.bot.stop_bot();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_backs_off_after_error() {
        let h = harness(
            MockTransport::with_batches(vec![
                Err(CloudClawError::Channel("connection reset".into())),
                Ok(vec![message(1, OWNER, "/start")]),
            ]),
            true,
        );
        h.bot.start_bot().unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.transport.polls(), 1);
        assert!(h.transport.sent().is_empty());

        // Retry lands at t=5s; the next poll is due at t=6s.
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(h.transport.polls(), 2);
        assert_eq!(h.transport.sent().len(), 1);
        h.bot.stop_bot();
    }

    #[tokio::test]
    async fn test_start_requires_configuration() {
        let h = harness(MockTransport::default(), false);
        assert!(h.bot.start_bot().is_err());
        assert!(!h.bot.start_if_enabled().unwrap());
        assert!(!h.bot.is_running());
    }

    #[tokio::test]
    async fn test_update_config_persists_and_toggles() {
        let h = harness(MockTransport::default(), false);
        h.bot.update_config("456:def", "2002", true).unwrap();
        assert!(h.bot.is_running());
        assert_eq!(
            h.store.get_setting(SETTING_TOKEN).unwrap().as_deref(),
            Some("456:def")
        );
        assert_eq!(
            h.store.get_setting(SETTING_ENABLED).unwrap().as_deref(),
            Some("true")
        );

        h.bot.update_config("456:def", "2002", false).unwrap();
        assert!(!h.bot.is_running());
        assert_eq!(
            h.store.get_setting(SETTING_ENABLED).unwrap().as_deref(),
            Some("false")
        );
        assert!(!h.bot.get_config().enabled);
    }

    #[tokio::test]
    async fn test_send_message_requires_enabled_bot() {
        let h = harness(MockTransport::default(), false);
        assert!(h.bot.send_message("hi").await.is_err());

        let h = harness(MockTransport::default(), true);
        h.bot.send_notification("Task <done>", "Instance created").await.unwrap();
        match &h.transport.sent()[0] {
            Sent::Message { text, chat_id, .. } => {
                assert_eq!(chat_id, "1001");
                assert!(text.starts_with("<b>Task &lt;done&gt;</b>\n\nInstance created\n\n🕐 "));
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_check() {
        let h = harness(MockTransport::default(), false);
        assert!(h.bot.test_connection().await.is_err());

        let h = harness(MockTransport::default(), true);
        let me = h.bot.test_connection().await.unwrap();
        assert_eq!(me.username.as_deref(), Some("cloudclaw_bot"));
    }
}
