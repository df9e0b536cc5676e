//! Discord webhook delivery.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::info;
use url::Url;

use crate::fetch::{with_retries, FetchError};
use crate::DISCORD_WEBHOOK_HOSTS;

/// Reject anything that is not an HTTPS URL on a known Discord host;
/// a mistyped webhook must not leak notifications elsewhere.
pub fn validate_webhook_url(webhook_url: &str) -> Result<Url> {
    let cleaned = webhook_url.trim();
    if cleaned.is_empty() {
        bail!("Discord webhook URL is empty");
    }
    let url = Url::parse(cleaned).context("webhook URL does not parse")?;
    if url.scheme() != "https" {
        bail!("webhook URL must use https");
    }
    let host = url.host_str().unwrap_or_default();
    if !DISCORD_WEBHOOK_HOSTS.contains(&host) {
        bail!("webhook host {host:?} is not a Discord webhook host");
    }
    Ok(url)
}

/// Post a message to the webhook, retrying transient failures.
pub async fn send_discord_message(
    client: &reqwest::Client,
    webhook_url: &str,
    message: &str,
    retries: u32,
    backoff: Duration,
) -> Result<()> {
    let url = validate_webhook_url(webhook_url)?;
    let payload = json!({ "content": message });

    with_retries("Discord message send", retries, backoff, || {
        let url = url.clone();
        let payload = payload.clone();
        async move {
            let response = client.post(url.clone()).json(&payload).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status,
                    url: url.to_string(),
                });
            }
            Ok(())
        }
    })
    .await
    .context("failed to deliver Discord notification")?;

    info!("Discord notification sent");
    Ok(())
}
