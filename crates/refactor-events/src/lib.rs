//! Run logging for the refactor orchestrator: a human-readable log file,
//! an append-only JSONL event log, and optional webhook notifications,
//! all driven from the same call sites.
//!
//! # Example
//!
//! ```
//! use refactor_events::RunLogger;
//! use refactor_webhook::WebhookConfig;
//! use tempfile::tempdir;
//!
//! let dir = tempdir().unwrap();
//! let mut logger = RunLogger::new(dir.path(), "refactor", None, WebhookConfig::default()).unwrap();
//! logger.phase_start("audit", false);
//! logger.step("reading plan.md", false);
//! logger.phase_complete("audit", true, None, false);
//! logger.finalize(true, false);
//! ```

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use refactor_types::{AgentProvider, RetryCode, ValidationVerdict};
use refactor_webhook::{notify, NotifyStatus, WebhookConfig};

/// Default JSONL event log file name within a run's log directory.
pub const EVENTS_FILE: &str = "events.jsonl";

/// Get the events file path for a run's log directory.
pub fn events_path(log_dir: &Path) -> PathBuf {
    log_dir.join(EVENTS_FILE)
}

/// A single lifecycle event: phase transitions, agent calls, validation
/// verdicts, and group-level commit/rollback outcomes, one per JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    PhaseStart {
        phase: String,
    },
    PhaseComplete {
        phase: String,
        success: bool,
        error: Option<String>,
    },
    Step {
        description: String,
    },
    AgentCall {
        provider: AgentProvider,
        prompt_label: String,
        retry: RetryCode,
    },
    Validation {
        group_index: usize,
        verdict: ValidationVerdict,
    },
    Commit {
        group_index: usize,
        commit_hash: String,
    },
    Rollback {
        group_index: usize,
        reason: String,
    },
    Error {
        context: Option<String>,
        message: String,
    },
    Summary {
        fields: BTreeMap<String, String>,
    },
    Finalize {
        success: bool,
    },
}

/// A timestamped `RunEvent` as written to the JSONL log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Writes a timestamped text log plus a parallel JSONL event log for one
/// orchestrator run, and mirrors select events to a configured webhook.
///
/// Mirrors the Python original's `RunLogger`: a `[HH:MM:SS] <line>` text
/// log for humans, single-line webhook notifications for the important
/// transitions, with step-level detail suppressed from the webhook by
/// default (`notify` defaults to `false` for `step`, `true` elsewhere).
pub struct RunLogger {
    run_type: String,
    timestamp: String,
    log_file: PathBuf,
    events_file: PathBuf,
    webhook: WebhookConfig,
    mirror_to_stdout: bool,
}

impl RunLogger {
    /// Create a new run logger, writing the log header immediately.
    ///
    /// `timestamp` defaults to `now` formatted `%Y%m%d%H%M%S` when `None`.
    pub fn new(
        log_dir: &Path,
        run_type: &str,
        timestamp: Option<String>,
        webhook: WebhookConfig,
    ) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;

        let timestamp = timestamp.unwrap_or_else(|| Utc::now().format("%Y%m%d%H%M%S").to_string());
        let log_file = log_dir.join(format!("{}_{}_run.log", timestamp, run_type));
        let events_file = log_dir.join(EVENTS_FILE);

        let logger = Self {
            run_type: run_type.to_string(),
            timestamp,
            log_file,
            events_file,
            webhook,
            mirror_to_stdout: true,
        };

        logger.write_header()?;
        Ok(logger)
    }

    /// Disable mirroring log lines to stdout (the run logger always writes
    /// to the log file regardless of this setting).
    pub fn set_mirror_to_stdout(&mut self, mirror: bool) {
        self.mirror_to_stdout = mirror;
    }

    fn write_header(&self) -> Result<()> {
        let mut file = fs::File::create(&self.log_file)
            .with_context(|| format!("failed to create log file {}", self.log_file.display()))?;
        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file, "ORCHESTRATOR RUN LOG: {}", self.run_type)?;
        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file, "Session ID: {}_{}", self.run_type, self.timestamp)?;
        writeln!(file, "Timestamp: {}", self.timestamp)?;
        writeln!(file, "Start Time: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(file, "{}\n", "=".repeat(60))?;
        Ok(())
    }

    fn log_line(&self, line: &str) {
        let timestamped = format!("[{}] {}", Utc::now().format("%H:%M:%S"), line);

        if let Ok(mut file) = OpenOptions::new().append(true).open(&self.log_file) {
            let _ = writeln!(file, "{}", timestamped);
        }

        if self.mirror_to_stdout {
            // ASCII fallback matches the Python original's Windows cp1252 guard.
            if line.is_ascii() {
                println!("{}", line);
            } else {
                println!("{}", line.replace(|c: char| !c.is_ascii(), "?"));
            }
        }

        tracing::info!(run = %self.run_type, "{}", line);
    }

    fn record_event(&self, event: RunEvent) {
        let logged = LoggedEvent {
            timestamp: Utc::now(),
            event,
        };

        if let Ok(json) = serde_json::to_string(&logged) {
            if let Ok(mut file) = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.events_file)
            {
                let _ = writeln!(file, "{}", json);
            }
        }
    }

    fn maybe_notify(&self, status: NotifyStatus, step: &str, error: Option<&str>, should: bool) {
        if should {
            notify(&self.webhook, status, step, error);
        }
    }

    /// Log the start of a phase (audit, implement, validate, ...).
    pub fn phase_start(&self, phase_name: &str, notify: bool) {
        self.log_line(&format!("\n{}", "=".repeat(60)));
        self.log_line(phase_name);
        self.log_line(&"=".repeat(60));
        self.record_event(RunEvent::PhaseStart {
            phase: phase_name.to_string(),
        });
        self.maybe_notify(
            NotifyStatus::InProgress,
            &format!("{}: {}", self.run_type, phase_name),
            None,
            notify,
        );
    }

    /// Log completion of a phase.
    pub fn phase_complete(&self, phase_name: &str, success: bool, error: Option<&str>, notify: bool) {
        let status = if success { "OK" } else { "FAIL" };
        self.log_line(&format!("[{}] {}", status, phase_name));
        self.record_event(RunEvent::PhaseComplete {
            phase: phase_name.to_string(),
            success,
            error: error.map(str::to_string),
        });

        let step = format!("{}: {}", self.run_type, phase_name);
        self.maybe_notify(
            if success { NotifyStatus::Success } else { NotifyStatus::Failure },
            &step,
            error,
            notify,
        );
    }

    /// Log a step within a phase. Notifications are off by default.
    pub fn step(&self, description: &str, notify: bool) {
        self.log_line(&format!("  -> {}", description));
        self.record_event(RunEvent::Step {
            description: description.to_string(),
        });
        self.maybe_notify(
            NotifyStatus::InProgress,
            &format!("{}: {}", self.run_type, description),
            None,
            notify,
        );
    }

    /// Record an agent call (provider, which prompt, retry classification)
    /// in the structured event log only; this is too frequent for the
    /// human-readable log or a webhook line.
    pub fn agent_call(&self, provider: AgentProvider, prompt_label: &str, retry: RetryCode) {
        self.record_event(RunEvent::AgentCall {
            provider,
            prompt_label: prompt_label.to_string(),
            retry,
        });
    }

    /// Record a deferred-validation verdict for a refactor group.
    pub fn validation(&self, group_index: usize, verdict: ValidationVerdict) {
        self.log_line(&format!(
            "  [validation] group {} -> {:?}",
            group_index, verdict
        ));
        self.record_event(RunEvent::Validation {
            group_index,
            verdict,
        });
    }

    /// Record a successful group commit.
    pub fn commit(&self, group_index: usize, commit_hash: &str) {
        self.log_line(&format!("  [commit] group {} -> {}", group_index, commit_hash));
        self.record_event(RunEvent::Commit {
            group_index,
            commit_hash: commit_hash.to_string(),
        });
    }

    /// Record a scoped rollback for a refactor group.
    pub fn rollback(&self, group_index: usize, reason: &str) {
        self.log_line(&format!("  [rollback] group {} -> {}", group_index, reason));
        self.record_event(RunEvent::Rollback {
            group_index,
            reason: reason.to_string(),
        });
    }

    /// Log an error with optional context.
    pub fn error(&self, message: &str, context: Option<&str>, notify: bool) {
        self.log_line(&format!("\n{}", "-".repeat(60)));
        self.log_line(&format!("[ERROR] {}", context.unwrap_or("Error occurred")));
        self.log_line(&format!("Message: {}", message));
        self.log_line(&"-".repeat(60));

        self.record_event(RunEvent::Error {
            context: context.map(str::to_string),
            message: message.to_string(),
        });

        let brief: String = message.chars().take(80).collect();
        self.maybe_notify(
            NotifyStatus::Failure,
            &format!("{}: {}", self.run_type, context.unwrap_or("Error")),
            Some(&brief),
            notify,
        );
    }

    /// Log a summary section of key/value pairs.
    pub fn summary(&self, fields: &[(&str, String)]) {
        self.log_line(&format!("\n{}", "=".repeat(60)));
        self.log_line("SUMMARY");
        self.log_line(&"=".repeat(60));
        for (key, value) in fields {
            self.log_line(&format!("  {}: {}", title_case(key), value));
        }
        self.log_line(&"=".repeat(60));

        self.record_event(RunEvent::Summary {
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        });
    }

    /// Write the footer and optionally send a final webhook notification.
    pub fn finalize(&self, success: bool, notify: bool) {
        if let Ok(mut file) = OpenOptions::new().append(true).open(&self.log_file) {
            let _ = writeln!(file, "\n{}", "=".repeat(60));
            let _ = writeln!(file, "End Time: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
            let _ = writeln!(file, "Status: {}", if success { "SUCCESS" } else { "FAILED" });
            let _ = writeln!(file, "Log File: {}", self.log_file.display());
            let _ = writeln!(file, "{}", "=".repeat(60));
        }

        self.log_line(&format!("\nLog saved to: {}", self.log_file.display()));
        self.record_event(RunEvent::Finalize { success });

        let step = format!("{}: Run complete", self.run_type);
        self.maybe_notify(
            if success { NotifyStatus::Success } else { NotifyStatus::Failure },
            &step,
            if success { None } else { Some("See log") },
            notify,
        );
    }

    /// Path to the human-readable log file.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Path to the structured JSONL event log.
    pub fn events_file(&self) -> &Path {
        &self.events_file
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read and parse all events previously written to a run's JSONL log.
pub fn read_events(events_file: &Path) -> Result<Vec<LoggedEvent>> {
    if !events_file.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(events_file)
        .with_context(|| format!("failed to read events file {}", events_file.display()))?;

    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .with_context(|| format!("failed to parse event JSON from line: {}", line))
        })
        .collect()
}
