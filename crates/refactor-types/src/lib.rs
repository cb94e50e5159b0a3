//! # Types
//!
//! Core domain types shared across the refactor orchestrator: plan chunks,
//! the import/export dependency graph, graph-analysis results, refactor
//! scope tracking, validation batches and verdicts, the orchestration
//! summary, and the page registry consulted by visual validation.
//!
//! ## Serialization
//!
//! Most types implement `Serialize`/`Deserialize` for persistence to disk
//! (run logs, paused-run state) and for snapshot testing. Durations are
//! serialized as milliseconds for cross-platform stability, mirroring
//! [`refactor_duration`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{DurationMilliSeconds, serde_as};

pub use refactor_retry::{RetryPolicy, RetryStrategyConfig, RetryStrategyType};
pub use refactor_webhook::WebhookConfig;

/// Deserialize a Duration from either a string (human-readable) or u64 (milliseconds).
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        U64(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration: {}", e))),
        DurationHelper::U64(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a Duration as milliseconds so it roundtrips with [`deserialize_duration`].
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// One refactor unit extracted from an audit plan's markdown body.
///
/// Mirrors the Python original's `ChunkData`: a numbered chunk names a file,
/// the line range it touches, a current/refactored code pair, and the pages
/// it's believed to affect (consumed by the visual judge to scope its check).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkData {
    pub number: u32,
    pub title: String,
    pub file_path: PathBuf,
    pub line_number: Option<u32>,
    pub current_code: String,
    pub refactored_code: String,
    pub affected_pages: Vec<String>,
}

/// A set of chunks that must land together because they share at least one
/// affected page, grouped for implement-then-validate-then-commit cycling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageGroup {
    pub index: usize,
    pub pages: Vec<String>,
    pub chunks: Vec<ChunkData>,
}

/// Kind of export a source file makes available to importers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    Named,
    Default,
    ReExport,
    TypeOnly,
    Declaration,
}

/// Kind of import a source file performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportType {
    Named,
    Default,
    Namespace,
    SideEffect,
    TypeOnly,
    Require,
}

/// A symbol exported by a file, at a given line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedSymbol {
    pub name: String,
    pub export_type: ExportType,
    pub line: u32,
    pub source_file: PathBuf,
}

/// A symbol a file imports, with its source specifier resolved (when
/// possible) to a path inside the analyzed root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedSymbol {
    pub name: String,
    pub import_type: ImportType,
    pub source_specifier: String,
    pub resolved_path: Option<PathBuf>,
    pub line: u32,
    pub importing_file: PathBuf,
}

/// Per-file analysis: what it imports and exports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file_path: PathBuf,
    pub exports: Vec<ExportedSymbol>,
    pub imports: Vec<ImportedSymbol>,
    pub parse_error: Option<String>,
}

/// Whole-project import/export graph built by the AST dependency analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyContext {
    pub root_dir: PathBuf,
    pub files: BTreeMap<PathBuf, FileAnalysis>,
    /// file -> files it imports from (resolved only).
    pub dependency_graph: BTreeMap<PathBuf, Vec<PathBuf>>,
    /// file -> files that import from it.
    pub reverse_dependencies: BTreeMap<PathBuf, Vec<PathBuf>>,
    pub total_files: usize,
    pub total_exports: usize,
    pub total_imports: usize,
    pub parse_error_count: usize,
}

/// Default "unknown" topological level assigned to a file absent from the
/// analyzed graph, matching the Python original's sentinel.
pub const UNKNOWN_LEVEL: usize = 999;

/// Result of running transitive reduction, cycle detection, and leveling
/// over a [`DependencyContext`]'s simple file graph.
///
/// Exposes O(1) per-file lookups the same way the Python `GraphAnalysisResult`
/// dataclass does, backed by the two maps below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphAnalysisResult {
    pub reduced_graph: BTreeMap<PathBuf, Vec<PathBuf>>,
    pub reduction_pct: f64,
    pub cycles: Vec<Vec<PathBuf>>,
    pub file_to_level: BTreeMap<PathBuf, usize>,
    pub file_to_cycle: BTreeMap<PathBuf, usize>,
}

impl GraphAnalysisResult {
    pub fn get_level(&self, file: &std::path::Path) -> usize {
        self.file_to_level
            .get(file)
            .copied()
            .unwrap_or(UNKNOWN_LEVEL)
    }

    pub fn get_cycle_id(&self, file: &std::path::Path) -> Option<usize> {
        self.file_to_cycle.get(file).copied()
    }

    pub fn is_in_cycle(&self, file: &std::path::Path) -> bool {
        self.file_to_cycle.contains_key(file)
    }

    pub fn get_cycle_members(&self, cycle_id: usize) -> Option<&[PathBuf]> {
        self.cycles.get(cycle_id).map(Vec::as_slice)
    }
}

/// Files a single chunk or group touches that sit at a high fan-in level of
/// the dependency graph, surfaced so the audit plan can flag blast radius.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HighImpactSummary {
    pub files: Vec<PathBuf>,
    pub max_level: usize,
    pub dependents_count: BTreeMap<PathBuf, usize>,
}

/// Tracks files modified during a group's implement phase so a failed
/// validation can reset exactly those files instead of the whole tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefactorScope {
    pub project_root: PathBuf,
    pub base_path: PathBuf,
    pub tracked_files: Vec<PathBuf>,
}

/// A batch of files to validate together: a build pass followed by an
/// optional visual pass over the pages those files are believed to affect.
/// `chunks` carries the group's chunk data through so the pageless
/// test-driven fallback (spec 4.12.4) has `current_code`/`refactored_code`
/// to generate synthetic tests from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationBatch {
    pub group_index: usize,
    pub modified_files: Vec<PathBuf>,
    pub affected_pages: Vec<String>,
    pub skip_visual: bool,
    pub chunks: Vec<ChunkData>,
}

/// Outcome of validating one batch: did the build pass, did the pages match,
/// should the group be committed or rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationVerdict {
    Passed,
    BuildFailed,
    VisualMismatch,
    /// Visual check could not be completed (no MCP session, page not
    /// resolvable, session expired) — treated as inconclusive, not a hard
    /// failure, per the Design Notes decision on MCP session expiry.
    Blocked,
    /// Pageless chunk's synthetic test suite (spec 4.12.4) produced
    /// predictable but unexpected results. A suite that never became
    /// predictable is logged as flaky, not reported through this verdict.
    TestDrivenMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub verdict: ValidationVerdict,
    pub build_output_tail: Option<String>,
    pub pages_checked: Vec<String>,
    pub pages_mismatched: Vec<String>,
    /// Informational only: a page whose visual check disagreed between
    /// repeated attempts. Never gates the verdict (see Design Notes).
    pub flaky_pages: Vec<String>,
}

/// Which coding-agent CLI drives a given prompt. Threaded explicitly through
/// every agent call rather than read from an ambient environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentProvider {
    Claude,
    Gemini,
}

impl Default for AgentProvider {
    fn default() -> Self {
        AgentProvider::Claude
    }
}

/// Classifies a failed agent invocation for retry purposes. Only the first
/// four variants are retried; `None` means the call is terminal (success or
/// a non-retryable failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCode {
    None,
    ClaudeCodeError,
    TimeoutError,
    ExecutionError,
    ErrorDuringExecution,
}

impl RetryCode {
    pub fn is_retryable(self) -> bool {
        !matches!(self, RetryCode::None)
    }
}

/// Response from a single agent prompt invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPromptResponse {
    pub success: bool,
    pub output: String,
    pub session_id: Option<String>,
    pub retry_code: RetryCode,
}

/// Minimal session configuration for an MCP browser session used by the
/// visual judge. Modeled as plain internal types: no externally-fetchable
/// MCP protocol crate exists in the pack (see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSessionConfig {
    pub server_name: String,
    pub page_url: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

/// Static registry of known pages, consulted by the heuristic page
/// classifier to map a source file to the page(s) it renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub name: String,
    pub route: String,
    pub entry_file: PathBuf,
}

/// Kind of audit requested for the run (full project sweep vs. a named
/// subset), mirroring the original's `audit_type` CLI argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditType {
    #[default]
    Full,
    Targeted,
}

/// All runtime knobs for a run, merged from defaults, `orchestrator.toml`,
/// `.env`, and CLI flags (in that precedence order — see [`refactor_config`]).
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeOptions {
    pub target_path: PathBuf,
    pub audit_type: AuditType,
    pub skip_visual: bool,
    pub slack_channel: Option<String>,
    pub no_slack: bool,
    pub use_gemini: bool,
    pub max_attempts: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub agent_timeout: Duration,
    pub dev_server_port: u16,
    pub consecutive_failure_cap: u32,
    pub state_dir: PathBuf,
    pub force_resume: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            target_path: PathBuf::from("."),
            audit_type: AuditType::default(),
            skip_visual: false,
            slack_channel: None,
            no_slack: false,
            use_gemini: false,
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            agent_timeout: Duration::from_secs(900),
            dev_server_port: 8010,
            consecutive_failure_cap: 3,
            state_dir: PathBuf::from(".refactor"),
            force_resume: false,
        }
    }
}

/// Why a run paused before reaching the last group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    ConsecutiveFailures,
    Interrupted,
    AgentUnavailable,
}

/// Persisted marker written when a run pauses, enabling `resume` to pick up
/// at the next group instead of restarting the whole plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub plan_path: PathBuf,
    pub group_index: usize,
    pub total_groups: usize,
    pub timestamp: DateTime<Utc>,
    pub reason: PauseReason,
}

/// Per-group outcome recorded into the final summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub group_index: usize,
    pub pages: Vec<String>,
    pub verdict: ValidationVerdict,
    pub attempts: u32,
    pub committed: bool,
}

/// Final report for a completed (or paused) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_groups: usize,
    pub groups: Vec<GroupOutcome>,
    pub paused: Option<RunRecord>,
}

impl OrchestrationResult {
    pub fn committed_count(&self) -> usize {
        self.groups.iter().filter(|g| g.committed).count()
    }

    pub fn to_summary(&self) -> String {
        let committed = self.committed_count();
        let status = if self.paused.is_some() {
            "paused"
        } else {
            "completed"
        };
        format!(
            "run {} {status}: {committed}/{} groups committed",
            self.run_id, self.total_groups
        )
    }
}
