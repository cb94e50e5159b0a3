use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use refactor::config::{apply_overrides, load_env_credentials, load_file_overrides};
use refactor::engine::{Orchestrator, OrchestratorConfig, Reporter};
use refactor::events::RunLogger;
use refactor::state::{load_state, STATE_FILE};
use refactor::webhook::WebhookConfig;
use refactor_types::{AgentProvider, AuditType, RuntimeOptions};

mod progress;

#[derive(Parser, Debug)]
#[command(name = "refactor-cli", version)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (sha:", env!("REFACTOR_GIT_SHA"),
    ", profile:", env!("REFACTOR_BUILD_PROFILE"),
    ", ", env!("REFACTOR_RUSTC_VERSION"), ")",
))]
#[command(about = "AI-driven code-refactoring orchestrator: audit, plan, implement, validate, commit")]
struct Cli {
    /// Path to the project to refactor
    #[arg(long, default_value = ".")]
    target_path: PathBuf,

    /// Audit the whole project instead of a targeted subset
    #[arg(long)]
    full_audit: bool,

    /// Skip the visual-regression comparison pass
    #[arg(long)]
    skip_visual: bool,

    /// Slack channel to post run updates to
    #[arg(long)]
    slack_channel: Option<String>,

    /// Disable Slack notifications entirely
    #[arg(long)]
    no_slack: bool,

    /// Use Gemini as the primary coding agent instead of Claude
    #[arg(long)]
    use_gemini: bool,

    /// Max attempts per agent call
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Base backoff delay (e.g. 2s, 500ms)
    #[arg(long, default_value = "2s")]
    base_delay: String,

    /// Max backoff delay (e.g. 1m)
    #[arg(long, default_value = "60s")]
    max_delay: String,

    /// Per-agent-call timeout (e.g. 15m)
    #[arg(long, default_value = "900s")]
    agent_timeout: String,

    /// Port the project's dev server listens on
    #[arg(long, default_value_t = 8010)]
    dev_server_port: u16,

    /// Pause the run after this many consecutive group failures
    #[arg(long, default_value_t = 3)]
    consecutive_failure_cap: u32,

    /// Directory for run state and logs
    #[arg(long, default_value = ".refactor")]
    state_dir: PathBuf,

    /// Resume even if the persisted state looks stale
    #[arg(long)]
    force_resume: bool,

    /// Shell command that starts the project's dev server
    #[arg(long, default_value = "npm run dev")]
    dev_server_command: String,

    /// Shell command that builds the project
    #[arg(long, default_value = "npm run build")]
    build_command: String,

    /// Base URL of the live (pre-refactor) site for visual comparison
    #[arg(long, default_value = "http://localhost:3000")]
    live_base_url: String,

    /// Base URL of the dev server started for this run
    #[arg(long, default_value = "http://localhost:8010")]
    dev_base_url: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an audit and then the full implement/validate/commit pipeline.
    Run,
    /// Resume a previously paused run from its last completed group.
    Resume,
    /// Print environment and configuration diagnostics.
    Doctor,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn build_runtime_options(cli: &Cli) -> Result<RuntimeOptions> {
    let base = apply_overrides(RuntimeOptions::default(), &load_file_overrides(&cli.target_path)?);

    Ok(RuntimeOptions {
        target_path: cli.target_path.clone(),
        audit_type: if cli.full_audit { AuditType::Full } else { base.audit_type },
        skip_visual: cli.skip_visual || base.skip_visual,
        slack_channel: cli.slack_channel.clone().or(base.slack_channel),
        no_slack: cli.no_slack || base.no_slack,
        use_gemini: cli.use_gemini || base.use_gemini,
        max_attempts: cli.max_attempts,
        base_delay: parse_duration(&cli.base_delay)?,
        max_delay: parse_duration(&cli.max_delay)?,
        agent_timeout: parse_duration(&cli.agent_timeout)?,
        dev_server_port: cli.dev_server_port,
        consecutive_failure_cap: cli.consecutive_failure_cap,
        state_dir: cli.state_dir.clone(),
        force_resume: cli.force_resume,
    })
}

fn build_orchestrator(cli: &Cli, options: &RuntimeOptions, run_id: String) -> Result<Orchestrator> {
    let creds = load_env_credentials(&cli.target_path);

    let webhook = WebhookConfig {
        enabled: !options.no_slack && creds.webhook_url.is_some(),
        url: creds.webhook_url.clone(),
        secret: None,
        ..WebhookConfig::default()
    };

    let logger = RunLogger::new(&options.state_dir, "refactor", None, webhook)?;

    let config = OrchestratorConfig {
        project_root: options.target_path.clone(),
        run_id,
        provider: if options.use_gemini { AgentProvider::Gemini } else { AgentProvider::Claude },
        audit_prompt: "/audit".to_string(),
        plan_path: options.state_dir.join("plan.md"),
        dev_server_command: cli.dev_server_command.clone(),
        dev_server_args: Vec::new(),
        build_command: cli.build_command.clone(),
        build_args: Vec::new(),
        live_base_url: cli.live_base_url.clone(),
        dev_base_url: cli.dev_base_url.clone(),
        disable_fallback: creds.disable_fallback,
    };

    Orchestrator::with_reporter(options.clone(), config, logger, Box::new(CliReporter))
}

fn run_doctor(cli: &Cli, options: &RuntimeOptions) -> Result<()> {
    println!("target_path: {}", options.target_path.display());
    println!("state_dir: {}", options.state_dir.display());
    println!("dev_server_port: {}", options.dev_server_port);

    let creds = load_env_credentials(&cli.target_path);
    println!("anthropic_api_key: {}", creds.anthropic_api_key.is_some());
    println!("gemini_api_key: {}", creds.gemini_api_key.is_some());
    println!("webhook_url: {}", creds.webhook_url.is_some());

    println!("git_repo: {}", refactor::git::is_git_repo(&options.target_path));

    let config_path = refactor::config::find_config(&options.target_path);
    match config_path {
        Some(p) => println!("orchestrator.toml: {}", p.display()),
        None => println!("orchestrator.toml: not found"),
    }

    println!();
    print_cmd_version("claude");
    print_cmd_version("gemini");
    print_cmd_version("git");

    let state_path = options.state_dir.join(STATE_FILE);
    println!();
    println!(
        "paused_run: {}",
        if state_path.exists() { "present" } else { "none" }
    );

    Ok(())
}

fn print_cmd_version(cmd: &str) {
    let out = Command::new(cmd).arg("--version").output();
    match out {
        Ok(o) if o.status.success() => {
            let s = String::from_utf8_lossy(&o.stdout).trim().to_string();
            println!("{cmd}: {s}");
        }
        Ok(o) => {
            eprintln!(
                "[warn] {cmd} --version failed: {}",
                String::from_utf8_lossy(&o.stderr).trim()
            );
        }
        Err(e) => {
            eprintln!("[warn] unable to run {cmd} --version: {e}");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = build_runtime_options(&cli)?;

    match cli.cmd {
        Commands::Run => {
            let run_id = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
            let mut orchestrator = build_orchestrator(&cli, &options, run_id)?;
            let result = orchestrator.run()?;
            println!("{}", result.to_summary());
        }
        Commands::Resume => {
            let record = load_state(&options.state_dir)
                .context("no paused run found — nothing to resume")?;
            let run_id = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
            let mut orchestrator = build_orchestrator(&cli, &options, run_id)?;
            let result = orchestrator.resume(record)?;
            println!("{}", result.to_summary());
        }
        Commands::Doctor => {
            run_doctor(&cli, &options)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    use serial_test::serial;
    use tempfile::tempdir;

    use super::*;

    #[derive(Default)]
    struct TestReporter {
        infos: Vec<String>,
        warns: Vec<String>,
        errors: Vec<String>,
    }

    impl Reporter for TestReporter {
        fn info(&mut self, msg: &str) {
            self.infos.push(msg.to_string());
        }

        fn warn(&mut self, msg: &str) {
            self.warns.push(msg.to_string());
        }

        fn error(&mut self, msg: &str) {
            self.errors.push(msg.to_string());
        }
    }

    #[test]
    fn parse_duration_handles_valid_and_invalid_inputs() {
        assert!(parse_duration("1s").is_ok());
        assert!(parse_duration("nope").is_err());
    }

    #[test]
    fn cli_reporter_methods_are_callable() {
        let mut rep = CliReporter;
        rep.info("info");
        rep.warn("warn");
        rep.error("error");
    }

    #[test]
    fn test_reporter_collects_all_levels() {
        let mut reporter = TestReporter::default();
        reporter.info("i");
        reporter.warn("w");
        reporter.error("e");
        assert_eq!(reporter.infos, vec!["i".to_string()]);
        assert_eq!(reporter.warns, vec!["w".to_string()]);
        assert_eq!(reporter.errors, vec!["e".to_string()]);
    }

    #[test]
    fn print_cmd_version_reports_missing_command() {
        print_cmd_version("definitely-not-a-real-command-refactor-cli");
    }

    #[test]
    #[serial]
    fn print_cmd_version_reports_non_zero_exit() {
        let td = tempdir().expect("tempdir");
        let bin_dir = td.path().join("bin");
        fs::create_dir_all(&bin_dir).expect("mkdir");

        #[cfg(windows)]
        let cmd_path = {
            let p = bin_dir.join("badver.cmd");
            fs::write(
                &p,
                "@echo off\r\necho bad version error 1>&2\r\nexit /b 1\r\n",
            )
            .expect("write");
            p
        };

        #[cfg(not(windows))]
        let cmd_path = {
            use std::os::unix::fs::PermissionsExt;

            let p = bin_dir.join("badver");
            fs::write(
                &p,
                "#!/usr/bin/env sh\necho bad version error >&2\nexit 1\n",
            )
            .expect("write");
            let mut perms = fs::metadata(&p).expect("meta").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&p, perms).expect("chmod");
            p
        };

        print_cmd_version(cmd_path.to_str().expect("utf8"));
    }

    #[test]
    fn build_runtime_options_reflects_cli_flags() {
        let td = tempdir().expect("tempdir");
        let cli = Cli {
            target_path: td.path().to_path_buf(),
            full_audit: true,
            skip_visual: true,
            slack_channel: Some("#refactors".to_string()),
            no_slack: false,
            use_gemini: true,
            max_attempts: 5,
            base_delay: "1s".to_string(),
            max_delay: "30s".to_string(),
            agent_timeout: "60s".to_string(),
            dev_server_port: 9090,
            consecutive_failure_cap: 2,
            state_dir: td.path().join(".refactor"),
            force_resume: true,
            dev_server_command: "echo dev".to_string(),
            build_command: "echo build".to_string(),
            live_base_url: "http://localhost:4000".to_string(),
            dev_base_url: "http://localhost:9090".to_string(),
            cmd: Commands::Doctor,
        };

        let options = build_runtime_options(&cli).expect("options");
        assert_eq!(options.audit_type, AuditType::Full);
        assert!(options.skip_visual);
        assert_eq!(options.slack_channel.as_deref(), Some("#refactors"));
        assert!(options.use_gemini);
        assert_eq!(options.max_attempts, 5);
        assert_eq!(options.dev_server_port, 9090);
        assert!(options.force_resume);
    }

    #[test]
    #[serial]
    fn run_doctor_reports_missing_config_and_state() {
        let td = tempdir().expect("tempdir");
        let cli = Cli {
            target_path: td.path().to_path_buf(),
            full_audit: false,
            skip_visual: false,
            slack_channel: None,
            no_slack: false,
            use_gemini: false,
            max_attempts: 1,
            base_delay: "1s".to_string(),
            max_delay: "2s".to_string(),
            agent_timeout: "5s".to_string(),
            dev_server_port: 8010,
            consecutive_failure_cap: 3,
            state_dir: td.path().join(".refactor"),
            force_resume: false,
            dev_server_command: "echo dev".to_string(),
            build_command: "echo build".to_string(),
            live_base_url: "http://localhost:3000".to_string(),
            dev_base_url: "http://localhost:8010".to_string(),
            cmd: Commands::Doctor,
        };

        unsafe { env::remove_var("ANTHROPIC_API_KEY") };
        unsafe { env::remove_var("GEMINI_API_KEY") };
        unsafe { env::remove_var("REFACTOR_WEBHOOK_URL") };

        let options = build_runtime_options(&cli).expect("options");
        run_doctor(&cli, &options).expect("doctor");
    }
}
