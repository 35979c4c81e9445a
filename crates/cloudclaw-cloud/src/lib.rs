//! # CloudClaw Cloud
//!
//! [`ProvisioningClient`](cloudclaw_core::traits::ProvisioningClient) backed by
//! a JSON REST endpoint that fronts the cloud provider's SDK.

pub mod rest;

pub use rest::RestCloudClient;
