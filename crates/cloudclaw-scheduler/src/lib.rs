//! # CloudClaw Scheduler
//!
//! Recurring retry scheduler for provisioning tasks.
//!
//! ## Architecture
//! ```text
//! TaskScheduler
//!   ├── timer table: task id → one tokio timer (single mutex, no I/O under it)
//!   ├── on expiry → claim: timer entry → in-flight set (no second attempt)
//!   ├── fire(task id)
//!   │     ├── re-read task from TaskStore, abort unless `running`
//!   │     ├── resolve account + SSH key
//!   │     ├── ProvisioningClient::create_instance
//!   │     ├── record attempt (only while still `running`) + append log
//!   │     └── transition::next_step → Reschedule(interval) | Retire,
//!   │         leaving the in-flight set in the same step
//!   └── execute_once(task id) — same attempt, no timer, terminal either way
//! ```

pub mod engine;
pub mod message;
pub mod transition;

pub use engine::{MIN_INTERVAL_FLOOR, TaskScheduler};
pub use message::extract_upstream_message;
pub use transition::{FiringOutcome, NextStep, effective_interval, next_step};
