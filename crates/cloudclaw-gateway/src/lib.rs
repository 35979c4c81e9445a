//! # CloudClaw Gateway
//! HTTP JSON API over the task scheduler and the control bot.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, serve};
