//! # CloudClaw Channels
//! Messaging transports for the remote control plane.

pub mod telegram;

pub use telegram::TelegramClient;
