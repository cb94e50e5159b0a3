//! Webhook notifications for the refactor orchestrator.
//!
//! Every phase transition, retry, and terminal outcome can optionally be
//! mirrored to a single HTTP endpoint as a one-line JSON message. Delivery
//! never blocks or fails the run: webhooks are disabled unless both
//! `enabled` and `url` are set, and transport errors are only logged.
//!
//! # Example
//!
//! ```ignore
//! use refactor_webhook::{WebhookConfig, NotifyStatus, notify};
//!
//! let config = WebhookConfig {
//!     enabled: true,
//!     url: Some("https://hooks.example.com/orchestrator".to_string()),
//!     ..Default::default()
//! };
//!
//! notify(&config, NotifyStatus::Success, "implement group 2", None);
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Webhook configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Enable webhook notifications (default: false - disabled)
    pub enabled: bool,
    /// The webhook URL to POST status lines to
    pub url: Option<String>,
    /// Optional secret used to sign the request body (`X-Refactor-Signature`)
    pub secret: Option<String>,
    /// Request timeout (default: 10 seconds, matching the orchestrator's
    /// notifier contract)
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            secret: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Status of the step being reported, mirrored into the message verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyStatus {
    Started,
    InProgress,
    Success,
    Failure,
    Rollback,
}

impl NotifyStatus {
    fn verb(self) -> &'static str {
        match self {
            NotifyStatus::Started => "started",
            NotifyStatus::InProgress => "is in progress",
            NotifyStatus::Success => "succeeded",
            NotifyStatus::Failure => "failed",
            NotifyStatus::Rollback => "rolled back",
        }
    }
}

const ERROR_TAIL_LEN: usize = 80;

/// Build the single-line message body for a notification: `"<host> says
/// <step> <verb>"`, with an 80-character error tail appended on failure.
fn format_message(step: &str, status: NotifyStatus, error: Option<&str>) -> String {
    let host = hostname();
    let mut message = format!("{} says {} {}", host, step, status.verb());

    if status == NotifyStatus::Failure {
        if let Some(err) = error {
            let tail: String = err.chars().rev().take(ERROR_TAIL_LEN).collect();
            let tail: String = tail.chars().rev().collect();
            message.push_str(": ");
            message.push_str(&tail);
        }
    }

    message
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "orchestrator".to_string())
}

/// Send a status notification if webhooks are configured.
///
/// Returns `true` if a delivery attempt was dispatched, `false` if webhooks
/// are disabled or no URL is set. The actual HTTP call happens on a
/// background thread; this function never blocks on network I/O and never
/// propagates transport errors to the caller.
pub fn notify(config: &WebhookConfig, status: NotifyStatus, step: &str, error: Option<&str>) -> bool {
    if !config.enabled {
        return false;
    }

    let url = match &config.url {
        Some(url) if !url.is_empty() => url.clone(),
        _ => return false,
    };

    let message = format_message(step, status, error);
    let secret = config.secret.clone();
    let timeout = config.timeout;

    std::thread::spawn(move || {
        if let Err(e) = deliver(&url, &message, secret.as_deref(), timeout) {
            tracing::warn!(error = %e, "webhook delivery failed (non-blocking)");
        }
    });

    true
}

fn deliver(url: &str, message: &str, secret: Option<&str>, timeout: Duration) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build webhook HTTP client")?;

    let body = serde_json::to_string(&serde_json::json!({ "text": message }))
        .context("failed to serialize webhook payload")?;

    let mut request = client.post(url).header("Content-Type", "application/json");

    if let Some(secret) = secret {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;
        type HmacSha256 = Hmac<Sha256>;
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
        mac.update(body.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        request = request.header("X-Refactor-Signature", format!("sha256={}", signature));
    }

    let response = request
        .body(body)
        .send()
        .context("failed to send webhook request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        anyhow::bail!("webhook returned error status {}: {}", status, body);
    }

    Ok(())
}
