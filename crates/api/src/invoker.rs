//! Blocking action invocation.
//!
//! Forwards a storage notification to a serverless action and waits for its
//! result. Calls are not retried; the caller sees the failure.

use pipeline_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Action endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Scheme and host of the action API, e.g. `https://whisk.local:443`
    #[serde(default)]
    pub api_host: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub action_name: String,
    /// Sent verbatim after `Basic `
    #[serde(default)]
    pub auth_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_namespace() -> String {
    "guest".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            api_host: String::new(),
            namespace: default_namespace(),
            action_name: String::new(),
            auth_key: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl InvokerConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_host.is_empty() && !self.action_name.is_empty()
    }

    /// Blocking invocation URL returning only the action result.
    pub fn action_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/actions/{}?blocking=true&result=true",
            self.api_host.trim_end_matches('/'),
            self.namespace,
            self.action_name
        )
    }
}

/// Client for blocking action invocations.
#[derive(Clone)]
pub struct ActionInvoker {
    config: InvokerConfig,
    http_client: reqwest::Client,
}

impl ActionInvoker {
    pub fn new(config: InvokerConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(Error::config(
                "invoker requires api_host and action_name",
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Invokes the action with `{"event": payload}` and returns its result.
    ///
    /// Any status other than 200 is a downstream error naming that status.
    pub async fn invoke(&self, payload: Value) -> Result<Value> {
        let url = self.config.action_url();
        debug!(url = %url, "Invoking action");

        let response = self
            .http_client
            .post(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", self.config.auth_key),
            )
            .json(&json!({ "event": payload }))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Action invocation failed");
                if e.is_timeout() {
                    Error::timeout(format!("action invocation timed out: {e}"))
                } else {
                    Error::downstream(format!("action endpoint unavailable: {e}"))
                }
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Action returned error");
            return Err(Error::downstream(format!(
                "action invocation returned {}",
                status.as_u16()
            )));
        }

        let result = response
            .json()
            .await
            .map_err(|e| Error::downstream(format!("invalid action result: {e}")))?;

        info!(action = %self.config.action_name, "Action invoked");
        Ok(result)
    }
}
