use crate::domain::notice::Notice;
use crate::domain::ports::Notifier;
use crate::error::{ProcessorError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Sends template messages through an HTTP messaging gateway.
///
/// The gateway receives `{to, template, parameters}` and answers with the
/// provider message id, either as `message_id` or as `messages[0].id`.
pub struct WhatsAppNotifier {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl WhatsAppNotifier {
    pub fn new(endpoint: String, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    async fn send(&self, notice: &Notice) -> Result<String> {
        let body = json!({
            "to": notice.phone_number,
            "template": notice.kind.template(),
            "parameters": notice.parameters(),
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "(no body)".to_string());
            return Err(ProcessorError::NotificationError(format!(
                "gateway returned {}: {}",
                status, text
            )));
        }

        let payload: Value = response.json().await?;
        debug!(loan_id = %notice.loan_id, response = %payload, "gateway accepted notice");
        extract_message_id(&payload).ok_or_else(|| {
            ProcessorError::NotificationError("gateway response carried no message id".to_string())
        })
    }
}

fn extract_message_id(payload: &Value) -> Option<String> {
    payload
        .get("message_id")
        .or_else(|| payload.pointer("/messages/0/id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
