//! # Refactor
//!
//! An AI-driven code-refactoring orchestrator: audits a project, parses the
//! resulting markdown plan into page-scoped groups of chunks, drives a
//! coding agent to implement each group, validates the result with a build
//! pass and a headless-browser visual comparison against the page's live
//! counterpart, and commits or rolls back the group accordingly.
//!
//! ## Pipeline
//!
//! 1. [`agent`] drives the audit and per-chunk implementation prompts
//!    through the configured coding-agent CLI.
//! 2. [`plan_parser`] turns the audit's markdown plan into page groups.
//! 3. [`ast`] builds a whole-project import/export dependency context;
//!    [`graph`] reduces it, detects cycles, and assigns topological levels.
//! 4. [`scope`] tracks which files a group's agent call touched, for
//!    targeted rollback.
//! 5. [`dev_server`] starts and supervises the project's dev server.
//! 6. [`validator`] runs the build and, via [`visual_judge`], the visual
//!    comparison for each page a group is believed to affect.
//! 7. [`engine`] is the orchestrator tying all of the above into the
//!    sequential per-group implement/validate/commit loop.
//!
//! ## Ambient stack
//!
//! Cross-cutting concerns each live in their own standalone crate and are
//! re-exported here for a single import surface:
//!
//! - [`types`] — domain types: chunks, groups, graph results, options
//! - [`config`] — `orchestrator.toml` + `.env` layered configuration
//! - [`state`] — paused-run state persistence (resume support)
//! - [`retry`] — retry strategies with backoff and jitter
//! - [`git`] — git operations (scoped reset, staging, commits)
//! - [`process`] — sandboxed subprocess execution
//! - [`webhook`] — webhook notifications for run events
//! - [`environment`] — environment fingerprinting (CI detection)
//! - [`events`] — structured run logging (text + JSONL + webhook)
//! - [`duration`] — human-readable duration parsing/formatting

/// Agent Driver (C6): uniform facade over external LLM CLIs.
pub mod agent;

/// AST Dependency Analyzer (C7): tree-sitter import/export extraction.
pub mod ast;

/// Dev-Server Manager (C5): dev server lifecycle and readiness polling.
pub mod dev_server;

/// Orchestrator (C13): end-to-end run driver.
pub mod engine;

/// Graph Engine (C8): transitive reduction, cycle detection, leveling.
pub mod graph;

/// Plan Parser (C9): markdown audit plan into page-scoped chunk groups.
pub mod plan_parser;

/// Refactor Scope (C10): per-group file tracking and scoped reset.
pub mod scope;

/// Deferred Validator (C12): build check plus per-page visual validation.
pub mod validator;

/// Visual Judge (C11): agent-driven visual regression comparison.
pub mod visual_judge;

/// Domain types: chunks, groups, graph results, options.
pub use refactor_types as types;

/// Layered configuration (`orchestrator.toml`, `.env`, CLI overrides).
pub use refactor_config as config;

/// Paused-run state persistence.
pub use refactor_state as state;

/// Configurable retry strategies with backoff and jitter.
pub use refactor_retry as retry;

/// Git operations (scoped reset, staging, commits).
pub use refactor_git as git;

/// Sandboxed subprocess execution.
pub use refactor_process as process;

/// Webhook notifications for run events.
pub use refactor_webhook as webhook;

/// Environment fingerprinting (CI detection, tool versions).
pub use refactor_environment as environment;

/// Structured run logging (text log + JSONL events + webhook mirror).
pub use refactor_events as events;

/// Human-readable duration parsing and serde helpers.
pub use refactor_duration as duration;
