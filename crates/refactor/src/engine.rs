//! Orchestrator (C13): drives a refactor run end to end — audit, plan
//! parse, dependency graph, dev server, then a sequential per-group
//! implement/validate/commit cycle with consecutive-failure pause/resume
//! and `Ctrl-C` handling.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use refactor_events::RunLogger;
use refactor_retry::{RetryStrategyConfig, RetryStrategyType};
use refactor_types::{
    AgentProvider, GroupOutcome, OrchestrationResult, PauseReason, RunRecord, RuntimeOptions,
    ValidationBatch, ValidationVerdict,
};

use crate::agent::{run_agent_with_retry, AgentRequest};
use crate::dev_server::DevServerManager;
use crate::plan_parser::parse_plan;
use crate::scope::ScopeTracker;
use crate::validator::{validate, ValidatorConfig};
use crate::{ast, graph};

/// Everything the orchestrator needs beyond [`RuntimeOptions`]: things that
/// are environment or invocation specifics rather than tunable policy.
pub struct OrchestratorConfig {
    pub project_root: PathBuf,
    pub run_id: String,
    pub provider: AgentProvider,
    pub audit_prompt: String,
    pub plan_path: PathBuf,
    pub dev_server_command: String,
    pub dev_server_args: Vec<String>,
    pub build_command: String,
    pub build_args: Vec<String>,
    pub live_base_url: String,
    pub dev_base_url: String,
    pub disable_fallback: bool,
}

/// Sink for human-facing progress, separate from [`RunLogger`]'s durable
/// text/JSONL/webhook trail. The CLI adapter implements this with a
/// terminal progress bar; embedders can no-op it.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

struct NoopReporter;

impl Reporter for NoopReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

pub struct Orchestrator {
    options: RuntimeOptions,
    config: OrchestratorConfig,
    logger: RunLogger,
    reporter: Box<dyn Reporter>,
    interrupted: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(options: RuntimeOptions, config: OrchestratorConfig, logger: RunLogger) -> Result<Self> {
        Self::with_reporter(options, config, logger, Box::new(NoopReporter))
    }

    pub fn with_reporter(
        options: RuntimeOptions,
        config: OrchestratorConfig,
        logger: RunLogger,
        reporter: Box<dyn Reporter>,
    ) -> Result<Self> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;

        Ok(Self {
            options,
            config,
            logger,
            reporter,
            interrupted,
        })
    }

    fn retry_config(&self) -> RetryStrategyConfig {
        RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            max_attempts: self.options.max_attempts,
            base_delay: self.options.base_delay,
            max_delay: self.options.max_delay,
            jitter: 0.5,
        }
    }

    fn agents_dir(&self) -> PathBuf {
        self.options.state_dir.join("agents")
    }

    /// Phase A: run the audit agent, writing the raw plan markdown to
    /// `config.plan_path`. Skipped entirely when resuming (the prior run
    /// already produced and persisted a plan).
    fn run_audit(&mut self) -> Result<String> {
        self.logger.phase_start("audit", true);
        self.reporter.info("running audit");

        let request = AgentRequest {
            prompt: self.config.audit_prompt.clone(),
            working_dir: self.config.project_root.clone(),
            model: "sonnet",
            agent_name: "auditor",
            output_file: self.agents_dir().join("auditor").join("output.jsonl"),
            skip_permissions: true,
            mcp_session: None,
            provider: self.config.provider,
        };

        let response = run_agent_with_retry(
            request,
            &self.config.run_id,
            self.options.agent_timeout,
            &self.retry_config(),
            self.config.disable_fallback,
        )?;

        self.logger
            .agent_call(self.config.provider, "audit", response.retry_code);

        if !response.success {
            self.logger.phase_complete("audit", false, Some("audit agent call failed"), true);
            self.reporter.error("audit agent call failed");
            anyhow::bail!("audit agent did not complete successfully");
        }

        std::fs::create_dir_all(
            self.config
                .plan_path
                .parent()
                .unwrap_or_else(|| std::path::Path::new(".")),
        )
        .ok();
        std::fs::write(&self.config.plan_path, &response.output)
            .with_context(|| format!("failed to write plan to {}", self.config.plan_path.display()))?;

        self.logger.phase_complete("audit", true, None, true);
        self.reporter.info("audit complete");
        Ok(response.output)
    }

    /// Run a full, non-resumed refactor run from audit through the last
    /// group (or until a pause condition fires).
    pub fn run(&mut self) -> Result<OrchestrationResult> {
        let started_at = Utc::now();
        let plan_markdown = self.run_audit()?;
        self.run_from_plan(plan_markdown, 0, started_at)
    }

    /// Resume a previously paused run: skip the audit phase, re-read the
    /// persisted plan, and continue from the group the run paused at.
    pub fn resume(&mut self, record: RunRecord) -> Result<OrchestrationResult> {
        let started_at = Utc::now();
        let plan_markdown = std::fs::read_to_string(&record.plan_path)
            .with_context(|| format!("failed to reread plan at {}", record.plan_path.display()))?;
        self.run_from_plan(plan_markdown, record.group_index, started_at)
    }

    fn run_from_plan(
        &mut self,
        plan_markdown: String,
        start_group: usize,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<OrchestrationResult> {
        self.logger.phase_start("plan parse", false);
        let groups = parse_plan(&plan_markdown).context("failed to parse audit plan")?;
        self.logger.phase_complete("plan parse", true, None, false);

        self.logger.phase_start("dependency graph", false);
        let context = ast::analyze_directory(&self.config.project_root);
        let _analysis = graph::analyze_graph(&context);
        self.logger.phase_complete("dependency graph", true, None, false);

        self.logger.phase_start("dev server", true);
        let diagnostics_log = self.options.state_dir.join("dev_server_diagnostics.jsonl");
        let mut dev_server = DevServerManager::new(
            self.config.dev_server_command.clone(),
            self.config.dev_server_args.clone(),
            self.config.project_root.clone(),
            self.options.dev_server_port,
            diagnostics_log,
        );
        if let Err(e) = dev_server.start() {
            self.logger.phase_complete("dev server", false, Some(&e.to_string()), true);
            self.reporter.error(&format!("dev server failed to start: {e}"));
            return Err(e);
        }
        self.logger.phase_complete("dev server", true, None, true);

        let validator_config = ValidatorConfig {
            project_root: self.config.project_root.clone(),
            build_command: self.config.build_command.clone(),
            build_args: self.config.build_args.clone(),
            agent_timeout: self.options.agent_timeout,
            provider: self.config.provider,
            adw_id: self.config.run_id.clone(),
            agent_working_dir: self.config.project_root.clone(),
            agent_output_dir: self.agents_dir(),
            live_base_url: self.config.live_base_url.clone(),
            dev_base_url: self.config.dev_base_url.clone(),
            visual_concurrent: false,
            visual_max_retries: 2,
            visual_base_delay: Duration::from_secs(2),
            ..ValidatorConfig::default()
        };

        let mut outcomes = Vec::new();
        let mut consecutive_failures: u32 = 0;
        let mut paused = None;
        let total_groups = groups.len();

        for (group_index, group) in groups.iter().enumerate().skip(start_group) {
            if self.interrupted.load(Ordering::SeqCst) {
                paused = Some(self.save_pause(group_index, total_groups, PauseReason::Interrupted)?);
                break;
            }

            self.logger.phase_start(&format!("group {group_index}"), false);
            self.reporter
                .info(&format!("group {}/{total_groups}: implementing", group_index + 1));

            let mut scope = ScopeTracker::new(&self.config.project_root, "");
            for chunk in &group.chunks {
                scope.track_from_chunk(chunk)?;
            }

            let mut implement_failed = false;
            for chunk in &group.chunks {
                let prompt = format!(
                    "/implement chunk {} — {}\nFile: {}\nCurrent:\n{}\nRefactored:\n{}",
                    chunk.number, chunk.title, chunk.file_path.display(), chunk.current_code, chunk.refactored_code
                );
                let request = AgentRequest {
                    prompt,
                    working_dir: self.config.project_root.clone(),
                    model: "sonnet",
                    agent_name: "implementer",
                    output_file: self
                        .agents_dir()
                        .join("implementer")
                        .join(format!("group-{group_index}-chunk-{}.jsonl", chunk.number)),
                    skip_permissions: true,
                    mcp_session: None,
                    provider: self.config.provider,
                };

                let response = run_agent_with_retry(
                    request,
                    &self.config.run_id,
                    self.options.agent_timeout,
                    &self.retry_config(),
                    self.config.disable_fallback,
                )?;
                self.logger.agent_call(
                    self.config.provider,
                    &format!("implement-chunk-{}", chunk.number),
                    response.retry_code,
                );

                if !response.success {
                    warn!(group = group_index, chunk = chunk.number, "implementation chunk failed");
                    implement_failed = true;
                    break;
                }
            }

            let verdict = if implement_failed {
                ValidationVerdict::BuildFailed
            } else {
                let batch = ValidationBatch {
                    group_index,
                    modified_files: scope.tracked_files(),
                    affected_pages: group.pages.clone(),
                    skip_visual: self.options.skip_visual,
                    chunks: group.chunks.clone(),
                };
                let result = validate(&batch, &validator_config)?;
                self.logger.validation(group_index, result.verdict);
                result.verdict
            };

            let committed = if verdict == ValidationVerdict::Passed {
                self.commit_group(group_index, &scope)?
            } else {
                self.rollback_group(group_index, &scope, &verdict)?;
                false
            };

            outcomes.push(GroupOutcome {
                group_index,
                pages: group.pages.clone(),
                verdict,
                attempts: 1,
                committed,
            });

            self.logger.phase_complete(&format!("group {group_index}"), committed, None, false);
            if committed {
                self.reporter.info(&format!("group {}/{total_groups}: committed", group_index + 1));
            } else {
                self.reporter
                    .warn(&format!("group {}/{total_groups}: rolled back ({verdict:?})", group_index + 1));
            }

            if committed {
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
                if consecutive_failures >= self.options.consecutive_failure_cap {
                    paused = Some(self.save_pause(
                        group_index + 1,
                        total_groups,
                        PauseReason::ConsecutiveFailures,
                    )?);
                    break;
                }
            }
        }

        dev_server.stop();

        let success = paused.is_none();
        self.logger.summary(&[
            ("groups_total", total_groups.to_string()),
            ("groups_committed", outcomes.iter().filter(|o| o.committed).count().to_string()),
            ("paused", paused.is_some().to_string()),
        ]);
        self.logger.finalize(success, true);
        if success {
            self.reporter.info("run complete");
        } else {
            self.reporter.warn("run paused");
        }

        Ok(OrchestrationResult {
            run_id: self.config.run_id.clone(),
            started_at,
            finished_at: Some(Utc::now()),
            total_groups,
            groups: outcomes,
            paused,
        })
    }

    fn commit_group(&self, group_index: usize, scope: &ScopeTracker) -> Result<bool> {
        let tracked = scope.tracked_files();
        if tracked.is_empty() {
            return Ok(true);
        }
        refactor_git::stage_paths(&self.config.project_root, &tracked)?;
        refactor_git::commit(
            &self.config.project_root,
            &format!("refactor: group {group_index}"),
        )?;
        let hash = refactor_git::get_commit_hash(&self.config.project_root).unwrap_or_default();
        self.logger.commit(group_index, &hash);
        Ok(true)
    }

    fn rollback_group(&self, group_index: usize, scope: &ScopeTracker, verdict: &ValidationVerdict) -> Result<()> {
        let report = scope.reset_scoped()?;
        if !report.untracked_changes.is_empty() {
            warn!(
                group = group_index,
                count = report.untracked_changes.len(),
                "untracked changes left outside group scope after rollback"
            );
        }
        self.logger.rollback(group_index, &format!("{verdict:?}"));
        Ok(())
    }

    fn save_pause(&self, group_index: usize, total_groups: usize, reason: PauseReason) -> Result<RunRecord> {
        let record = RunRecord {
            plan_path: self.config.plan_path.clone(),
            group_index,
            total_groups,
            timestamp: Utc::now(),
            reason,
        };
        refactor_state::save_state(&self.options.state_dir, &record)?;
        info!(group = group_index, reason = ?record.reason, "run paused");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_derives_from_runtime_options() {
        let options = RuntimeOptions {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..RuntimeOptions::default()
        };
        let config = OrchestratorConfig {
            project_root: PathBuf::from("."),
            run_id: "adw-test".to_string(),
            provider: AgentProvider::Claude,
            audit_prompt: "/audit".to_string(),
            plan_path: PathBuf::from("plan.md"),
            dev_server_command: "true".to_string(),
            dev_server_args: vec![],
            build_command: "true".to_string(),
            build_args: vec![],
            live_base_url: "http://localhost:3000".to_string(),
            dev_base_url: "http://localhost:8010".to_string(),
            disable_fallback: false,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = RunLogger::new(
            dir.path(),
            "refactor",
            Some("20260101000000".to_string()),
            refactor_webhook::WebhookConfig::default(),
        )
        .expect("logger");
        let orchestrator = Orchestrator::new(options, config, logger).expect("orchestrator");
        let retry_config = orchestrator.retry_config();
        assert_eq!(retry_config.max_attempts, 5);
        assert_eq!(retry_config.base_delay, Duration::from_secs(1));
    }
}
