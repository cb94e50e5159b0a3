//! Layered configuration for the refactor orchestrator.
//!
//! Three sources, lowest to highest precedence: [`RuntimeOptions::default`],
//! an optional `orchestrator.toml` file, and `.env`-sourced credentials.
//! The CLI layer (highest precedence) is applied by the caller via
//! [`FileOverrides`] built from parsed flags; this crate only owns the
//! file/env layers and the merge itself.
//!
//! # Example
//!
//! ```
//! use refactor_config::{load_file_overrides, load_env_credentials, apply_overrides};
//! use refactor_types::RuntimeOptions;
//! use std::path::Path;
//!
//! let overrides = load_file_overrides(Path::new(".")).expect("load");
//! let base = RuntimeOptions::default();
//! let merged = apply_overrides(base, &overrides);
//! let _creds = load_env_credentials(Path::new("."));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use refactor_types::{AuditType, RuntimeOptions};

/// Default configuration file name, read from the target project's root.
pub const CONFIG_FILE: &str = "orchestrator.toml";

/// Path to the config file within a directory.
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Sparse set of [`RuntimeOptions`] overrides: every field is optional so a
/// layer only has to specify what it changes. `Option::None` means
/// "inherit from the next-lower-precedence layer", not "empty".
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileOverrides {
    pub audit_type: Option<AuditType>,
    pub skip_visual: Option<bool>,
    pub slack_channel: Option<String>,
    pub no_slack: Option<bool>,
    pub use_gemini: Option<bool>,
    pub max_attempts: Option<u32>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub base_delay: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub max_delay: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub agent_timeout: Option<Duration>,
    pub dev_server_port: Option<u16>,
    pub consecutive_failure_cap: Option<u32>,
    pub state_dir: Option<PathBuf>,
}

/// Load `orchestrator.toml` from a directory, if present. Unknown keys are
/// rejected so a typo in the file surfaces immediately rather than
/// silently being ignored.
pub fn load_file_overrides(dir: &Path) -> Result<FileOverrides> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(FileOverrides::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    toml::from_str(&content).with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Apply a sparse override layer onto a base [`RuntimeOptions`], returning
/// a new value with every `Some` field from `overrides` replacing the
/// corresponding field in `base`.
pub fn apply_overrides(base: RuntimeOptions, overrides: &FileOverrides) -> RuntimeOptions {
    RuntimeOptions {
        audit_type: overrides.audit_type.unwrap_or(base.audit_type),
        skip_visual: overrides.skip_visual.unwrap_or(base.skip_visual),
        slack_channel: overrides.slack_channel.clone().or(base.slack_channel),
        no_slack: overrides.no_slack.unwrap_or(base.no_slack),
        use_gemini: overrides.use_gemini.unwrap_or(base.use_gemini),
        max_attempts: overrides.max_attempts.unwrap_or(base.max_attempts),
        base_delay: overrides.base_delay.unwrap_or(base.base_delay),
        max_delay: overrides.max_delay.unwrap_or(base.max_delay),
        agent_timeout: overrides.agent_timeout.unwrap_or(base.agent_timeout),
        dev_server_port: overrides.dev_server_port.unwrap_or(base.dev_server_port),
        consecutive_failure_cap: overrides
            .consecutive_failure_cap
            .unwrap_or(base.consecutive_failure_cap),
        state_dir: overrides.state_dir.clone().unwrap_or(base.state_dir),
        ..base
    }
}

/// Credentials and endpoints read from `.env`/the process environment.
/// These never live in `orchestrator.toml` (committed to the target
/// project) — only in `.env` or real environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub git_token: Option<String>,
    pub webhook_url: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_default_channel: Option<String>,
    pub disable_fallback: bool,
}

/// Load `.env` from `dir` (if present) and collect the orchestrator's
/// known credential variables. Loading `.env` never overrides a variable
/// already set in the real process environment.
pub fn load_env_credentials(dir: &Path) -> EnvCredentials {
    let dotenv_path = dir.join(".env");
    if dotenv_path.exists() {
        let _ = dotenvy::from_path(&dotenv_path);
    }

    EnvCredentials {
        anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
        gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
        git_token: std::env::var("GIT_TOKEN").ok(),
        webhook_url: std::env::var("REFACTOR_WEBHOOK_URL").ok(),
        slack_bot_token: std::env::var("SLACK_BOT_TOKEN").ok(),
        slack_default_channel: std::env::var("SLACK_DEFAULT_CHANNEL").ok(),
        disable_fallback: std::env::var("REFACTOR_DISABLE_FALLBACK")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
    }
}

/// Find `orchestrator.toml` by walking up from `start_dir`.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let candidate = current.join(CONFIG_FILE);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_no_overrides() {
        let td = tempdir().expect("tempdir");
        let overrides = load_file_overrides(td.path()).expect("load");
        assert_eq!(overrides, FileOverrides::default());
    }

    #[test]
    fn apply_overrides_keeps_base_when_empty() {
        let base = RuntimeOptions::default();
        let merged = apply_overrides(base.clone(), &FileOverrides::default());
        assert_eq!(merged.max_attempts, base.max_attempts);
        assert_eq!(merged.dev_server_port, base.dev_server_port);
    }

    #[test]
    fn apply_overrides_replaces_specified_fields_only() {
        let base = RuntimeOptions::default();
        let overrides = FileOverrides {
            max_attempts: Some(5),
            dev_server_port: Some(9000),
            ..Default::default()
        };

        let merged = apply_overrides(base.clone(), &overrides);
        assert_eq!(merged.max_attempts, 5);
        assert_eq!(merged.dev_server_port, 9000);
        assert_eq!(merged.agent_timeout, base.agent_timeout);
    }

    #[test]
    fn load_config_from_toml_parses_known_fields() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(CONFIG_FILE);

        std::fs::write(
            &path,
            r#"
skip_visual = true
max_attempts = 5
dev_server_port = 9010
"#,
        )
        .expect("write");

        let overrides = load_file_overrides(td.path()).expect("load");
        assert_eq!(overrides.skip_visual, Some(true));
        assert_eq!(overrides.max_attempts, Some(5));
        assert_eq!(overrides.dev_server_port, Some(9010));
    }

    #[test]
    fn load_config_rejects_unknown_keys() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join(CONFIG_FILE);
        std::fs::write(&path, "totally_unknown_field = true").expect("write");

        let result = load_file_overrides(td.path());
        assert!(result.is_err());
    }

    #[test]
    fn find_config_walks_up_directory_tree() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&nested).expect("create dirs");

        let path = td.path().join(CONFIG_FILE);
        std::fs::write(&path, "max_attempts = 4").expect("write");

        let found = find_config(&nested);
        assert_eq!(found, Some(path));
    }

    #[test]
    fn find_config_returns_none_when_absent() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("a");
        std::fs::create_dir_all(&nested).expect("create dirs");
        assert!(find_config(&nested).is_none());
    }

    #[test]
    #[serial]
    fn load_env_credentials_reads_dotenv_file() {
        let td = tempdir().expect("tempdir");
        std::fs::write(
            td.path().join(".env"),
            "ANTHROPIC_API_KEY=test-key-123\nSLACK_DEFAULT_CHANNEL=#refactors\n",
        )
        .expect("write");

        std::env::remove_var("ANTHROPIC_API_KEY");
        std::env::remove_var("SLACK_DEFAULT_CHANNEL");

        let creds = load_env_credentials(td.path());
        assert_eq!(creds.anthropic_api_key.as_deref(), Some("test-key-123"));
        assert_eq!(creds.slack_default_channel.as_deref(), Some("#refactors"));

        std::env::remove_var("ANTHROPIC_API_KEY");
        std::env::remove_var("SLACK_DEFAULT_CHANNEL");
    }

    #[test]
    #[serial]
    fn load_env_credentials_defaults_disable_fallback_to_false() {
        let td = tempdir().expect("tempdir");
        std::env::remove_var("REFACTOR_DISABLE_FALLBACK");
        let creds = load_env_credentials(td.path());
        assert!(!creds.disable_fallback);
    }
}
