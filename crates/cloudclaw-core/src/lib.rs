//! # CloudClaw Core
//!
//! Shared vocabulary of the CloudClaw workspace: the task/account data model,
//! the seams to external collaborators (record store, cloud API, messaging
//! transport), the error type and the TOML configuration.

pub mod config;
pub mod control;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CloudClawConfig;
pub use error::{CloudClawError, Result};
