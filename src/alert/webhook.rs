use super::{Alert, AlertError, AlertSink};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// POSTs alerts as JSON to a webhook URL.
///
/// A configured recipient travels in the payload for relays that fan out to e-mail.
pub struct WebhookSink {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
    recipient: Option<String>,
}

#[derive(Serialize)]
struct Payload<'a> {
    #[serde(flatten)]
    alert: &'a Alert,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient: Option<&'a str>,
}

impl WebhookSink {
    pub fn new(url: &str, headers: HashMap<String, String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            headers,
            recipient: None,
        })
    }

    pub fn with_recipient(mut self, recipient: Option<String>) -> Self {
        self.recipient = recipient;
        self
    }
}

#[async_trait::async_trait]
impl AlertSink for WebhookSink {
    async fn publish(&self, alert: &Alert) -> Result<(), AlertError> {
        let mut request = self.client.post(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let payload = Payload {
            alert,
            recipient: self.recipient.as_deref(),
        };
        let response = request.json(&payload).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AlertError::Status {
                status: response.status().as_u16(),
            })
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
