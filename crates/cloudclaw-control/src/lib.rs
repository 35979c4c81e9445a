//! # CloudClaw Control
//!
//! Chat-driven control plane. A single long-poll loop reads updates from the
//! control transport, checks every sender against the one authorized chat and
//! answers menu presses with read-only snapshots of panel state.
//!
//! ## Architecture
//! ```text
//! ControlBot (one tokio task)
//!   ├── getUpdates(offset, timeout) ──► Update
//!   │     ├── message  → /start → main menu
//!   │     └── callback → answer → CommandDispatcher → edit in place
//!   └── stop signal (Notify) ends the loop between polls
//!
//! CommandDispatcher
//!   ├── check_alive / instance_stats / traffic_stats  (per account, concurrent, timed)
//!   └── task_details / config_list / version_info     (store only)
//! ```

pub mod bot;
pub mod dispatcher;

#[cfg(test)]
pub(crate) mod testing;

pub use bot::{BotConfig, ControlBot};
pub use dispatcher::{CommandDispatcher, MenuAction, format_bytes, main_menu};
