//! JSON webhook delivery of run reports.
//!
//! The blocking client owns a private runtime, so it is built and dropped
//! inside [`NotificationSink::notify`], which runs on the blocking pool.
//! Constructing the notifier is safe from async code.

use super::{NotificationSink, NotifyContext, NotifyError, PipelineOutcome};
use reqwest::Url;
use std::time::Duration;
use tracing::info;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WebhookNotifier {
    url: Url,
    recipients: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(url: &str, recipients: Vec<String>) -> Result<Self, NotifyError> {
        let url = Url::parse(url).map_err(|e| NotifyError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { url, recipients })
    }

    pub fn payload(&self, outcome: &PipelineOutcome, context: &NotifyContext) -> serde_json::Value {
        serde_json::json!({
            "recipients": self.recipients,
            "success": outcome.is_success(),
            "status": outcome.status_label(),
            "exit_code": outcome.status.code(),
            "run_name": context.run_name,
            "run_id": context.run_id,
            "host": context.host,
            "finished_at": context.finished_at.to_rfc3339(),
            "bundle": outcome.bundle,
            "digest": outcome.digest.as_ref().map(|d| d.to_string()),
            "destination": outcome.destination,
            "error": outcome.error,
            "fields": context.extra,
        })
    }
}

impl NotificationSink for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn notify(&self, outcome: &PipelineOutcome, context: &NotifyContext) -> Result<(), NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let response = client
            .post(self.url.clone())
            .json(&self.payload(outcome, context))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        info!(url = %self.url, recipients = self.recipients.len(), "Webhook report delivered");
        Ok(())
    }
}
