//! REST provisioning client.
//!
//! Talks JSON to a provisioning endpoint. Every failure, whether transport or
//! API, comes back as [`CloudClawError::Upstream`] carrying the raw text so
//! the scheduler can extract a readable reason from it.

use async_trait::async_trait;
use cloudclaw_core::config::CloudConfig;
use cloudclaw_core::error::{CloudClawError, Result};
use cloudclaw_core::traits::ProvisioningClient;
use cloudclaw_core::types::{Account, InstanceInfo, InstanceRequest, TrafficStats};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

/// Provisioning client for a JSON REST endpoint.
pub struct RestCloudClient {
    /// Base URL, without trailing slash.
    base_url: String,
    /// Bearer token; empty disables the header.
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl RestCloudClient {
    pub fn new(config: &CloudConfig) -> Self {
        Self {
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        let response = self
            .apply_auth(self.client.post(&url))
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CloudClawError::Upstream(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CloudClawError::Upstream(format!("reading response failed: {e}")))?;

        if !status.is_success() {
            return Err(CloudClawError::Upstream(upstream_error_text(
                status.as_u16(),
                &text,
            )));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| CloudClawError::Upstream(format!("invalid response from {url}: {e}")))
    }

    async fn post_typed<T: DeserializeOwned>(&self, path: &str, body: &Value, key: &str) -> Result<T> {
        let value = self.post_json(path, body).await?;
        let inner = value.get(key).cloned().unwrap_or(value);
        serde_json::from_value(inner)
            .map_err(|e| CloudClawError::Upstream(format!("unexpected {key} payload: {e}")))
    }
}

/// Account fields the endpoint needs to pick a tenancy and sign requests.
fn account_payload(account: &Account) -> Value {
    json!({
        "id": account.id,
        "region": account.region,
        "tenant_id": account.tenant_id,
        "credentials": account.credentials,
    })
}

/// Prefer the endpoint's own error message; fall back to the raw body.
fn upstream_error_text(status: u16, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .or_else(|| v.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });
    match message {
        Some(m) if !m.is_empty() => m,
        _ if body.trim().is_empty() => format!("HTTP {status}"),
        _ => format!("HTTP {status}: {}", body.trim()),
    }
}

#[async_trait]
impl ProvisioningClient for RestCloudClient {
    async fn create_instance(&self, account: &Account, request: &InstanceRequest) -> Result<()> {
        tracing::debug!(
            "☁️ create_instance {} {} {}c/{}GB for '{}'",
            request.region,
            request.architecture,
            request.ocpus,
            request.memory_gb,
            account.name
        );
        let body = json!({
            "account": account_payload(account),
            "instance": request,
        });
        self.post_json("instances", &body).await?;
        Ok(())
    }

    async fn list_instances(&self, account: &Account) -> Result<Vec<InstanceInfo>> {
        let body = json!({ "account": account_payload(account) });
        self.post_typed("instances/list", &body, "instances").await
    }

    async fn monthly_traffic(&self, account: &Account) -> Result<TrafficStats> {
        let body = json!({ "account": account_payload(account) });
        self.post_typed("traffic/monthly", &body, "traffic").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            id: "acc-1".into(),
            name: "main".into(),
            region: "ap-tokyo-1".into(),
            tenant_id: "ten-1".into(),
            tenant_name: "acme".into(),
            credentials: "{\"fingerprint\":\"aa:bb\"}".into(),
        }
    }

    #[test]
    fn test_url_joining() {
        let client = RestCloudClient::new(&CloudConfig {
            endpoint: "http://cloud.local/v1/".into(),
            ..CloudConfig::default()
        });
        assert_eq!(client.url("instances"), "http://cloud.local/v1/instances");
        assert_eq!(client.url("/traffic/monthly"), "http://cloud.local/v1/traffic/monthly");
    }

    #[test]
    fn test_error_text_prefers_message_field() {
        assert_eq!(
            upstream_error_text(500, r#"{"error": {"message": "Out of host capacity."}}"#),
            "Out of host capacity."
        );
        assert_eq!(
            upstream_error_text(429, r#"{"error": "TooManyRequests"}"#),
            "TooManyRequests"
        );
        assert_eq!(
            upstream_error_text(400, r#"{"message": "bad shape"}"#),
            "bad shape"
        );
    }

    #[test]
    fn test_error_text_falls_back_to_body() {
        assert_eq!(upstream_error_text(502, "bad gateway"), "HTTP 502: bad gateway");
        assert_eq!(upstream_error_text(503, "  "), "HTTP 503");
    }

    #[test]
    fn test_account_payload_carries_credentials() {
        let payload = account_payload(&account());
        assert_eq!(payload["tenant_id"], "ten-1");
        assert!(payload["credentials"].as_str().unwrap().contains("fingerprint"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_upstream_error() {
        let client = RestCloudClient::new(&CloudConfig {
            endpoint: "http://127.0.0.1:9/v1".into(),
            request_timeout_secs: 2,
            ..CloudConfig::default()
        });
        let err = client.list_instances(&account()).await.unwrap_err();
        assert!(matches!(err, CloudClawError::Upstream(_)));
    }
}
