//! Uniform facade over external LLM CLIs (C6): builds the prompt file,
//! spawns the configured agent CLI with the prompt piped via stdin, parses
//! its stream-JSON output, and retries transient failures with provider
//! fallback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use refactor_process::{run_command_with_stdin, safe_subprocess_env};
use refactor_retry::{RetryStrategyConfig, calculate_delay};
use refactor_types::{AgentProvider, AgentPromptResponse, RetryCode};

/// One call to an agent CLI.
pub struct AgentRequest<'a> {
    pub prompt: String,
    pub working_dir: PathBuf,
    /// Logical model name the agent CLI understands ("sonnet", "opus").
    pub model: &'a str,
    pub agent_name: &'a str,
    pub output_file: PathBuf,
    pub skip_permissions: bool,
    pub mcp_session: Option<&'a str>,
    pub provider: AgentProvider,
}

fn provider_binary(provider: AgentProvider) -> &'static str {
    match provider {
        AgentProvider::Claude => "claude",
        AgentProvider::Gemini => "gemini",
    }
}

/// Save the prompt under a deterministic path keyed by the leading
/// slash-command token (`/implement foo bar` -> `implement.md`), or
/// `prompt.md` if the prompt has no such token.
pub fn prompt_path(adw_id: &str, agent_name: &str, prompt: &str) -> PathBuf {
    let token = prompt
        .trim_start()
        .strip_prefix('/')
        .and_then(|rest| rest.split_whitespace().next())
        .filter(|t| !t.is_empty())
        .unwrap_or("prompt");
    PathBuf::from("agents")
        .join(adw_id)
        .join(agent_name)
        .join("prompts")
        .join(format!("{token}.md"))
}

fn build_args(request: &AgentRequest, output_file: &Path) -> Vec<String> {
    let mut args = vec![
        "--model".to_string(),
        request.model.to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--output-file".to_string(),
        output_file.display().to_string(),
    ];
    if request.skip_permissions {
        args.push("--dangerously-skip-permissions".to_string());
    }
    if let Some(session) = request.mcp_session {
        args.push("--mcp-session".to_string());
        args.push(session.to_string());
    }
    args
}

/// Run one agent call without retry: spawn, wait, parse output. Retry and
/// fallback policy live in [`run_agent_with_retry`].
fn run_once(request: &AgentRequest, adw_id: &str, timeout: Duration) -> Result<AgentPromptResponse> {
    let prompt_path = prompt_path(adw_id, request.agent_name, &request.prompt);
    if let Some(parent) = prompt_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    std::fs::write(&prompt_path, &request.prompt).context("failed to write agent prompt file")?;

    if let Some(parent) = request.output_file.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let binary = provider_binary(request.provider);
    let args = build_args(request, &request.output_file);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let env = safe_subprocess_env(&[]);

    let output = run_command_with_stdin(
        binary,
        &arg_refs,
        &request.working_dir,
        &env,
        &request.prompt,
        Some(timeout),
    )?;

    if output.timed_out {
        return Ok(AgentPromptResponse {
            success: false,
            output: String::new(),
            session_id: None,
            retry_code: RetryCode::TimeoutError,
        });
    }

    let raw_output = std::fs::read_to_string(&request.output_file).unwrap_or_default();
    let parsed = parse_stream_json(&raw_output);

    if parsed.output.is_empty() && output.exit_code != 0 {
        return Ok(AgentPromptResponse {
            success: false,
            output: output.stderr,
            session_id: parsed.session_id,
            retry_code: RetryCode::ExecutionError,
        });
    }

    Ok(AgentPromptResponse {
        success: parsed.success,
        output: parsed.output,
        session_id: parsed.session_id,
        retry_code: if parsed.success { RetryCode::None } else { RetryCode::ErrorDuringExecution },
    })
}

struct ParsedStream {
    output: String,
    success: bool,
    session_id: Option<String>,
}

/// Parse the agent's stream-JSON output file: prefer the last `type:
/// result` record; fall back to reconstructing text from assistant message
/// parts. Tolerates non-JSON preamble lines (auth prompts) by slicing from
/// the first `{"type":` occurrence.
fn parse_stream_json(raw: &str) -> ParsedStream {
    let mut session_id = None;
    let mut last_result: Option<Value> = None;
    let mut assistant_text = String::new();

    for line in raw.lines() {
        let sliced = match line.find("{\"type\":") {
            Some(idx) => &line[idx..],
            None => line,
        };
        let Ok(value) = serde_json::from_str::<Value>(sliced) else {
            continue;
        };

        match value.get("type").and_then(Value::as_str) {
            Some("system") | Some("init") => {
                if let Some(id) = value.get("session_id").and_then(Value::as_str) {
                    session_id = Some(id.to_string());
                }
            }
            Some("assistant") => {
                if let Some(parts) = value
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_array)
                {
                    for part in parts {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            assistant_text.push_str(text);
                        }
                    }
                }
            }
            Some("result") => {
                last_result = Some(value);
            }
            _ => {}
        }
    }

    if let Some(result) = last_result {
        let is_error = result
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || result.get("status").and_then(Value::as_str) == Some("error");
        let text = result
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or(&assistant_text)
            .to_string();
        return ParsedStream {
            output: text,
            success: !is_error,
            session_id,
        };
    }

    ParsedStream {
        output: assistant_text.clone(),
        success: !assistant_text.is_empty(),
        session_id,
    }
}

/// Classify whether a failed Gemini call should fall back to Claude for a
/// single retry: quota/rate-limit errors and generic execution errors are
/// eligible; timeouts are not (a slow provider staying slow on retry gains
/// nothing from switching providers).
fn eligible_for_fallback(retry_code: RetryCode) -> bool {
    matches!(retry_code, RetryCode::ExecutionError | RetryCode::ErrorDuringExecution)
}

/// Run a single agent call with no retry policy applied, for callers (the
/// Visual Judge) that implement their own retry/verdict loop around the
/// raw response.
pub fn run_agent_once(request: &AgentRequest, adw_id: &str, timeout: Duration) -> Result<AgentPromptResponse> {
    run_once(request, adw_id, timeout)
}

/// Run an agent call with retry/backoff and, when enabled, a single
/// provider-fallback attempt.
pub fn run_agent_with_retry(
    mut request: AgentRequest,
    adw_id: &str,
    timeout: Duration,
    retry_config: &RetryStrategyConfig,
    disable_fallback: bool,
) -> Result<AgentPromptResponse> {
    let mut attempt = 1;
    let mut fallback_used = false;

    loop {
        let response = run_once(&request, adw_id, timeout)?;

        if !response.retry_code.is_retryable() {
            return Ok(response);
        }

        if attempt >= retry_config.max_attempts {
            return Ok(response);
        }

        if !disable_fallback
            && !fallback_used
            && request.provider == AgentProvider::Gemini
            && eligible_for_fallback(response.retry_code)
        {
            warn!("falling back from gemini to claude for this call");
            request.provider = AgentProvider::Claude;
            fallback_used = true;
        }

        let delay = calculate_delay(retry_config, attempt);
        std::thread::sleep(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_path_keys_on_leading_slash_command() {
        let path = prompt_path("adw-1", "implementer", "/implement do the thing");
        assert_eq!(path, PathBuf::from("agents/adw-1/implementer/prompts/implement.md"));
    }

    #[test]
    fn prompt_path_falls_back_without_slash_command() {
        let path = prompt_path("adw-1", "implementer", "do the thing");
        assert_eq!(path, PathBuf::from("agents/adw-1/implementer/prompts/prompt.md"));
    }

    #[test]
    fn parse_stream_json_prefers_last_result_record() {
        let raw = r#"
{"type":"init","session_id":"sess-1"}
{"type":"assistant","message":{"content":[{"text":"partial"}]}}
{"type":"result","is_error":false,"result":"final answer"}
"#;
        let parsed = parse_stream_json(raw);
        assert_eq!(parsed.output, "final answer");
        assert!(parsed.success);
        assert_eq!(parsed.session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn parse_stream_json_falls_back_to_assistant_text() {
        let raw = r#"{"type":"assistant","message":{"content":[{"text":"hello "}, {"text":"world"}]}}"#;
        let parsed = parse_stream_json(raw);
        assert_eq!(parsed.output, "hello world");
        assert!(parsed.success);
    }

    #[test]
    fn parse_stream_json_tolerates_preamble() {
        let raw = "Login to continue...\n{\"type\":\"result\",\"is_error\":false,\"result\":\"ok\"}";
        let parsed = parse_stream_json(raw);
        assert_eq!(parsed.output, "ok");
    }

    #[test]
    fn parse_stream_json_detects_error_result() {
        let raw = r#"{"type":"result","is_error":true,"result":"boom"}"#;
        let parsed = parse_stream_json(raw);
        assert!(!parsed.success);
    }

    #[test]
    fn eligible_for_fallback_excludes_timeout() {
        assert!(!eligible_for_fallback(RetryCode::TimeoutError));
        assert!(eligible_for_fallback(RetryCode::ExecutionError));
    }
}
