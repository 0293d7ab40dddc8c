//! Run reports.
//!
//! Every pipeline run ends with exactly one [`PipelineOutcome`] handed to a
//! [`NotificationSink`]. Sinks never influence the exit status: a failed
//! report is logged and the run's own status stands.

pub mod template;
pub mod webhook;

pub use webhook::WebhookNotifier;

use crate::checksum::Digest;
use crate::config::NotifyConfig;
use crate::utils::{ArchiveError, ExitStatus};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid webhook URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    Status(u16),
}

/// Pipeline stage a run stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Manifest,
    Archive,
    Mount,
    Transfer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Manifest => "manifest",
            Stage::Archive => "archive",
            Stage::Mount => "mount check",
            Stage::Transfer => "transfer",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub status: ExitStatus,
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    pub bundle: Option<String>,
    pub digest: Option<Digest>,
    pub destination: Option<PathBuf>,
}

impl PipelineOutcome {
    pub fn committed(bundle: String, digest: Option<Digest>, destination: PathBuf) -> Self {
        Self {
            status: ExitStatus::Success,
            failed_stage: None,
            error: None,
            bundle: Some(bundle),
            digest,
            destination: Some(destination),
        }
    }

    pub fn failed(stage: Stage, error: &ArchiveError) -> Self {
        Self {
            status: error.exit_status(),
            failed_stage: Some(stage),
            error: Some(error.to_string()),
            bundle: None,
            digest: None,
            destination: None,
        }
    }

    pub fn with_bundle(mut self, bundle: impl Into<String>) -> Self {
        self.bundle = Some(bundle.into());
        self
    }

    pub fn with_destination(mut self, digest: Option<Digest>, destination: PathBuf) -> Self {
        self.digest = digest;
        self.destination = Some(destination);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExitStatus::Success
    }

    pub fn status_label(&self) -> String {
        match self.failed_stage {
            None => "success".to_string(),
            Some(stage) => format!("failed at {}", stage),
        }
    }

    /// Template fields for this outcome in `context`.
    pub fn fields<'a>(&self, context: &'a NotifyContext) -> BTreeMap<&'a str, String> {
        let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
        let mut fields: BTreeMap<&'a str, String> = BTreeMap::from([
            ("status", self.status_label()),
            ("exit_code", self.status.code().to_string()),
            ("run_name", context.run_name.clone()),
            ("host", context.host.clone()),
            ("run_id", context.run_id.to_string()),
            ("finished_at", context.finished_at.to_rfc3339()),
            ("bundle", or_dash(self.bundle.clone())),
            ("digest", or_dash(self.digest.as_ref().map(|d| d.to_string()))),
            (
                "destination",
                or_dash(self.destination.as_ref().map(|p| p.display().to_string())),
            ),
            ("error", or_dash(self.error.clone())),
        ]);
        for (key, value) in &context.extra {
            fields.entry(key.as_str()).or_insert_with(|| value.clone());
        }
        fields
    }
}

/// Free-form facts about the run a report is for.
#[derive(Debug, Clone)]
pub struct NotifyContext {
    pub run_name: String,
    pub host: String,
    pub run_id: Uuid,
    pub finished_at: DateTime<Utc>,
    pub extra: BTreeMap<String, String>,
}

impl NotifyContext {
    pub fn new(run_name: impl Into<String>) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            run_name: run_name.into(),
            host,
            run_id: Uuid::new_v4(),
            finished_at: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    /// Add a field for templates that is not otherwise known.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    fn notify(&self, outcome: &PipelineOutcome, context: &NotifyContext) -> Result<(), NotifyError>;
}

/// Writes the outcome to the tracing log.
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, outcome: &PipelineOutcome, context: &NotifyContext) -> Result<(), NotifyError> {
        if outcome.is_success() {
            info!(
                run = %context.run_name,
                bundle = outcome.bundle.as_deref().unwrap_or("-"),
                digest = %outcome.digest.as_ref().map(|d| d.as_str()).unwrap_or("-"),
                "Run archived"
            );
        } else {
            error!(
                run = %context.run_name,
                stage = %outcome.status_label(),
                exit_code = outcome.status.code(),
                error = outcome.error.as_deref().unwrap_or("-"),
                "Run archive failed"
            );
        }
        Ok(())
    }
}

/// Renders the report template into `<dir>/<run_name>-<run_id>.txt`.
pub struct ReportFileNotifier {
    dir: PathBuf,
    template: String,
}

impl ReportFileNotifier {
    pub fn new(dir: impl Into<PathBuf>, template: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            template: template.unwrap_or_else(|| template::DEFAULT_TEMPLATE.to_string()),
        }
    }

    pub fn report_path(&self, context: &NotifyContext) -> PathBuf {
        self.dir
            .join(format!("{}-{}.txt", context.run_name, context.run_id))
    }
}

impl NotificationSink for ReportFileNotifier {
    fn name(&self) -> &str {
        "report-file"
    }

    fn notify(&self, outcome: &PipelineOutcome, context: &NotifyContext) -> Result<(), NotifyError> {
        let io_err = |path: &Path, source| NotifyError::Io {
            path: path.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let path = self.report_path(context);
        let body = template::render(&self.template, &outcome.fields(context));
        std::fs::write(&path, body).map_err(|e| io_err(&path, e))?;

        info!(report = %path.display(), "Report written");
        Ok(())
    }
}

/// Delivers to every configured sink; individual failures are only logged.
pub struct FanoutNotifier {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    /// Log sink always, plus report file and webhook when configured.
    pub fn from_config(config: &NotifyConfig) -> Self {
        let mut sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(LogNotifier)];

        if let Some(dir) = &config.report_dir {
            sinks.push(Box::new(ReportFileNotifier::new(dir, config.template.clone())));
        }

        if let Some(url) = &config.webhook_url {
            match WebhookNotifier::new(url, config.recipients.clone()) {
                Ok(webhook) => sinks.push(Box::new(webhook)),
                Err(e) => warn!(url = %url, error = %e, "Webhook notifier disabled"),
            }
        }

        Self::new(sinks)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl NotificationSink for FanoutNotifier {
    fn name(&self) -> &str {
        "fanout"
    }

    fn notify(&self, outcome: &PipelineOutcome, context: &NotifyContext) -> Result<(), NotifyError> {
        for sink in &self.sinks {
            if let Err(e) = sink.notify(outcome, context) {
                warn!(sink = sink.name(), error = %e, "Notification failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MissingItem;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn context() -> NotifyContext {
        NotifyContext::new("R_2017_demo").with_field("case_id", "CASE-17")
    }

    #[test]
    fn test_failure_outcome_fields() {
        let err = ArchiveError::MissingData(MissingItem::File(PathBuf::from("basecaller_results")));
        let outcome = PipelineOutcome::failed(Stage::Manifest, &err);
        let ctx = context();
        let fields = outcome.fields(&ctx);

        assert!(!outcome.is_success());
        assert_eq!(fields["status"], "failed at manifest");
        assert_eq!(fields["exit_code"], "2");
        assert_eq!(fields["digest"], "-");
        assert_eq!(fields["case_id"], "CASE-17");
        assert!(fields["error"].contains("basecaller_results"));
    }

    #[test]
    fn test_extra_fields_do_not_shadow_builtins() {
        let ctx = context().with_field("status", "forged");
        let outcome = PipelineOutcome::committed("R.tar.gz".into(), None, PathBuf::from("/archive/R.tar.gz"));
        assert_eq!(outcome.fields(&ctx)["status"], "success");
    }

    #[test]
    fn test_report_file_is_rendered() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let notifier = ReportFileNotifier::new(
            temp_dir.path().join("reports"),
            Some("{run_name} {status} {destination} {case_id} {unknown}".to_string()),
        );
        let ctx = context();
        let outcome = PipelineOutcome::committed("R.tar.gz".into(), None, PathBuf::from("/archive/R.tar.gz"));

        notifier.notify(&outcome, &ctx).unwrap();
        let body = std::fs::read_to_string(notifier.report_path(&ctx))?;
        assert_eq!(body, "R_2017_demo success /archive/R.tar.gz CASE-17 {unknown}");
        Ok(())
    }

    struct Failing;

    impl NotificationSink for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn notify(&self, _: &PipelineOutcome, _: &NotifyContext) -> Result<(), NotifyError> {
            Err(NotifyError::Status(503))
        }
    }

    struct Recording(Arc<Mutex<Vec<String>>>);

    impl NotificationSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn notify(&self, outcome: &PipelineOutcome, _: &NotifyContext) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(outcome.status_label());
            Ok(())
        }
    }

    #[test]
    fn test_fanout_continues_past_failing_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let fanout = FanoutNotifier::new(vec![Box::new(Failing), Box::new(Recording(seen.clone()))]);
        let outcome = PipelineOutcome::failed(Stage::Mount, &ArchiveError::NotMounted(PathBuf::from("/mnt/x")));

        assert!(fanout.notify(&outcome, &context()).is_ok());
        assert_eq!(*seen.lock().unwrap(), vec!["failed at mount check".to_string()]);
    }

    #[test]
    fn test_fanout_from_config() {
        let config = NotifyConfig {
            report_dir: Some(PathBuf::from("/tmp/reports")),
            ..Default::default()
        };
        assert_eq!(FanoutNotifier::from_config(&config).len(), 2);
        assert_eq!(FanoutNotifier::from_config(&NotifyConfig::default()).len(), 1);
    }

    #[tokio::test]
    async fn test_fanout_with_webhook_builds_on_runtime() {
        let config = NotifyConfig {
            webhook_url: Some("http://127.0.0.1:9/hooks/archive".to_string()),
            ..Default::default()
        };
        let notifier = FanoutNotifier::from_config(&config);
        assert_eq!(notifier.len(), 2);
        drop(notifier);
    }

    #[test]
    fn test_fanout_skips_invalid_webhook_url() {
        let config = NotifyConfig {
            webhook_url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert_eq!(FanoutNotifier::from_config(&config).len(), 1);
    }
}
