//! Failure notifications
//!
//! A run that fails reports the error to an operator-facing webhook before
//! returning it.
//!
//! ```text
//! POST {webhook-url}
//! Content-Type: application/json
//!
//! {
//!   "subject": "Error renewing certificates",
//!   "message": "{\n  \"error-message\": \"1 of 3 failed\"\n}"
//! }
//! ```

use std::fmt::{Debug, Display};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};

use certwright_config::NotificationConfig;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while sending a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification endpoint is misconfigured: {0}")]
    Configuration(String),

    #[error("Failed to send notification: {0}")]
    Request(String),

    #[error("Notification endpoint returned HTTP {status}")]
    Rejected { status: u16 },

    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for operator notifications
#[async_trait]
pub trait Notifier: Send + Sync + Debug {
    async fn notify(&self, subject: &str, payload: &Value) -> Result<(), NotifyError>;
}

/// Notifier used when no endpoint is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, subject: &str, _payload: &Value) -> Result<(), NotifyError> {
        debug!(subject = %subject, "No notification endpoint configured, dropping notification");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    subject: &'a str,
    message: String,
}

/// Posts notifications as JSON to a webhook
#[derive(Debug)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| NotifyError::Configuration(format!("'{}': {}", url, e)))?;

        let client = Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            url: parsed.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, payload: &Value) -> Result<(), NotifyError> {
        let message = WebhookMessage {
            subject,
            message: serde_json::to_string_pretty(payload)?,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected {
                status: response.status().as_u16(),
            });
        }

        debug!(subject = %subject, "Notification sent");
        Ok(())
    }
}

/// Build the notifier for the `notifications` configuration block
pub fn from_config(config: &NotificationConfig) -> Result<Box<dyn Notifier>, NotifyError> {
    match &config.webhook_url {
        Some(url) => Ok(Box::new(WebhookNotifier::new(url)?)),
        None => Ok(Box::new(NoopNotifier)),
    }
}

/// Report a failed result under `subject` and hand it back unchanged
///
/// A failure to deliver the notification is logged and does not replace the
/// original error.
pub async fn notify_error<T, E: Display>(
    notifier: &dyn Notifier,
    subject: &str,
    result: Result<T, E>,
) -> Result<T, E> {
    if let Err(err) = &result {
        let payload = json!({ "error-message": err.to_string() });
        if let Err(e) = notifier.notify(subject, &payload).await {
            error!(subject = %subject, error = %e, "Failed to send failure notification");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, Value)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, subject: &str, payload: &Value) -> Result<(), NotifyError> {
            self.sent.lock().push((subject.to_string(), payload.clone()));
            if self.fail {
                return Err(NotifyError::Rejected { status: 503 });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ok_result_is_not_reported() {
        let notifier = RecordingNotifier::default();

        let result: Result<u32, String> = notify_error(&notifier, "subject", Ok(7)).await;

        assert_eq!(result.unwrap(), 7);
        assert!(notifier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_error_is_reported_and_returned() {
        let notifier = RecordingNotifier::default();

        let result: Result<(), String> = notify_error(
            &notifier,
            "Error renewing certificates",
            Err("1 of 3 failed".to_string()),
        )
        .await;

        assert_eq!(result.unwrap_err(), "1 of 3 failed");
        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Error renewing certificates");
        assert_eq!(sent[0].1, json!({ "error-message": "1 of 3 failed" }));
    }

    #[tokio::test]
    async fn test_send_failure_keeps_original_error() {
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };

        let result: Result<(), String> =
            notify_error(&notifier, "subject", Err("boom".to_string())).await;

        assert_eq!(result.unwrap_err(), "boom");
    }

    #[test]
    fn test_from_config_without_url_is_noop() {
        let notifier = from_config(&NotificationConfig::default()).unwrap();
        assert!(format!("{:?}", notifier).contains("NoopNotifier"));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(matches!(
            WebhookNotifier::new("not a url"),
            Err(NotifyError::Configuration(_))
        ));
    }
}
