//! Fire-and-forget event publishing.
//!
//! Reports are pushed to an external journal over HTTP with a bearer
//! token. Publishing is strictly best-effort: failures are logged and
//! never surface to the caller, so telemetry can never break a crawl.

use serde::Serialize;
use serde_json::json;

/// Publisher for named, tagged JSON reports.
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    endpoint: String,
    token: String,
    http: reqwest::Client,
}

impl TelemetryClient {
    /// A publisher posting to `endpoint` with `token` as bearer auth.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Publish one report. Never fails; errors are logged at warn.
    pub async fn publish<T: Serialize>(
        &self,
        event: &str,
        title: &str,
        content: &T,
        tags: &[String],
    ) {
        let payload = match payload(event, title, content, tags) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(event, error = %err, "telemetry payload not serializable");
                return;
            }
        };
        let sent = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await;
        match sent {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(event, "telemetry published");
            }
            Ok(response) => {
                tracing::warn!(event, status = %response.status(), "telemetry rejected");
            }
            Err(err) => {
                tracing::warn!(event, error = %err, "telemetry publish failed");
            }
        }
    }
}

fn payload<T: Serialize>(
    event: &str,
    title: &str,
    content: &T,
    tags: &[String],
) -> serde_json::Result<serde_json::Value> {
    Ok(json!({
        "event": event,
        "title": title,
        "content": serde_json::to_value(content)?,
        "tags": tags,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_event_title_content_and_tags() {
        let tags = vec!["crawler_version:0.2.1".to_owned()];
        let body = payload("block_window", "Blocks: (100, 200]", &json!({"n": 1}), &tags).unwrap();
        assert_eq!(body["event"], "block_window");
        assert_eq!(body["title"], "Blocks: (100, 200]");
        assert_eq!(body["content"]["n"], 1);
        assert_eq!(body["tags"][0], "crawler_version:0.2.1");
    }
}
