//! Test doubles shared by the bot and dispatcher tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cloudclaw_core::control::{BotIdentity, InlineKeyboard, Update};
use cloudclaw_core::error::{CloudClawError, Result};
use cloudclaw_core::traits::{ControlTransport, ProvisioningClient, TaskStore};
use cloudclaw_core::types::{Account, InstanceInfo, InstanceRequest, TrafficStats};
use cloudclaw_db::PanelDb;

/// Per-account scripted cloud client.
#[derive(Default)]
pub struct MockCloud {
    pub instances: HashMap<String, Vec<InstanceInfo>>,
    pub traffic: HashMap<String, TrafficStats>,
    pub failing: HashSet<String>,
    pub hanging: HashSet<String>,
    pub calls: AtomicUsize,
}

impl MockCloud {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self, account: &Account) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.contains(&account.id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.contains(&account.id) {
            return Err(CloudClawError::Upstream("NotAuthenticated".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisioningClient for MockCloud {
    async fn create_instance(&self, _: &Account, _: &InstanceRequest) -> Result<()> {
        Ok(())
    }

    async fn list_instances(&self, account: &Account) -> Result<Vec<InstanceInfo>> {
        self.gate(account).await?;
        Ok(self.instances.get(&account.id).cloned().unwrap_or_default())
    }

    async fn monthly_traffic(&self, account: &Account) -> Result<TrafficStats> {
        self.gate(account).await?;
        Ok(self.traffic.get(&account.id).cloned().unwrap_or_default())
    }
}

/// One recorded outbound transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message { chat_id: String, text: String, keyboard: bool },
    Edit { chat_id: String, message_id: i64, text: String },
    Delete { chat_id: String, message_id: i64 },
    Answer(String),
}

/// Transport double: scripted `getUpdates` batches, recorded sends.
#[derive(Default)]
pub struct MockTransport {
    pub batches: Mutex<VecDeque<Result<Vec<Update>>>>,
    pub sent: Mutex<Vec<Sent>>,
    pub polls: AtomicUsize,
    pub offsets: Mutex<Vec<i64>>,
}

impl MockTransport {
    pub fn with_batches(batches: Vec<Result<Vec<Update>>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Offsets requested by each `getUpdates`, in order.
    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }

    fn record(&self, call: Sent) {
        self.sent.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ControlTransport for MockTransport {
    async fn get_updates(&self, _: &str, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.offsets.lock().unwrap().push(offset);
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                // Idle long poll.
                tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send_message(
        &self,
        _: &str,
        chat_id: &str,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()> {
        self.record(Sent::Message {
            chat_id: chat_id.into(),
            text: text.into(),
            keyboard: keyboard.is_some(),
        });
        Ok(())
    }

    async fn edit_message(
        &self,
        _: &str,
        chat_id: &str,
        message_id: i64,
        text: &str,
        _: Option<&InlineKeyboard>,
    ) -> Result<()> {
        self.record(Sent::Edit {
            chat_id: chat_id.into(),
            message_id,
            text: text.into(),
        });
        Ok(())
    }

    async fn delete_message(&self, _: &str, chat_id: &str, message_id: i64) -> Result<()> {
        self.record(Sent::Delete {
            chat_id: chat_id.into(),
            message_id,
        });
        Ok(())
    }

    async fn answer_callback(&self, _: &str, callback_id: &str) -> Result<()> {
        self.record(Sent::Answer(callback_id.into()));
        Ok(())
    }

    async fn get_me(&self, token: &str) -> Result<BotIdentity> {
        if token == "bad" {
            return Err(CloudClawError::Channel("Telegram API error on getMe: Unauthorized".into()));
        }
        Ok(BotIdentity {
            id: 99,
            first_name: "CloudClaw".into(),
            username: Some("cloudclaw_bot".into()),
        })
    }
}

pub fn account(id: &str, name: &str) -> Account {
    Account {
        id: id.into(),
        name: name.into(),
        region: "ap-tokyo-1".into(),
        tenant_id: format!("ten-{id}"),
        tenant_name: format!("{name}-tenancy"),
        credentials: String::new(),
    }
}

pub fn instance(id: &str, state: &str) -> InstanceInfo {
    InstanceInfo {
        id: id.into(),
        display_name: format!("vm-{id}"),
        lifecycle_state: state.into(),
        region: "ap-tokyo-1".into(),
    }
}

/// In-memory store holding the given accounts.
pub fn store_with(accounts: &[Account]) -> Arc<PanelDb> {
    let db = PanelDb::in_memory().unwrap();
    for a in accounts {
        db.upsert_account(a).unwrap();
    }
    Arc::new(db)
}
