//! Visual Judge (C11): asks an agent to compare a dev URL against its
//! production counterpart and normalizes the agent's verdict, with a
//! mandatory browser-profile cleanup preamble and a preflight accessibility
//! check in concurrent mode.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use refactor_types::{AgentProvider, McpSessionConfig};

use crate::agent::{run_agent_once, AgentRequest};

const MIN_CONFIDENCE: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PageVerdict {
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifferenceSeverity {
    Critical,
    Major,
    Minor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualDifference {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub severity: DifferenceSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawJudgeResponse {
    verdict: String,
    confidence: u8,
    #[serde(default)]
    visual_differences: Vec<VisualDifference>,
    summary: String,
}

#[derive(Debug, Clone)]
pub struct VisualJudgeOutput {
    pub verdict: PageVerdict,
    pub confidence: u8,
    pub differences: Vec<VisualDifference>,
    pub summary: String,
    pub passed: bool,
    pub raw_output: String,
    pub accessibility: Option<String>,
}

pub struct VisualJudgeRequest<'a> {
    pub page_path: String,
    pub live_session: &'a McpSessionConfig,
    pub dev_session: &'a McpSessionConfig,
    pub concurrent: bool,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub provider: AgentProvider,
    pub adw_id: &'a str,
    pub working_dir: PathBuf,
    pub output_dir: PathBuf,
    pub timeout: Duration,
}

/// Guards against leftover headless-browser processes and singleton lock
/// files colliding with a new session. `acquire` is the mandatory pre-run
/// cleanup; `release` is a no-op kept as an RAII guard against re-entry so
/// a panic mid-run still runs cleanup semantics via `Drop`.
pub struct BrowserSessionGuard {
    profile_dirs: Vec<PathBuf>,
    released: bool,
}

impl BrowserSessionGuard {
    pub fn acquire(profile_dirs: Vec<PathBuf>) -> Self {
        for dir in &profile_dirs {
            let lock_file = dir.join("SingletonLock");
            if lock_file.exists() {
                if let Err(e) = std::fs::remove_file(&lock_file) {
                    warn!(path = %lock_file.display(), error = %e, "failed to remove browser singleton lock");
                }
            }
        }
        Self { profile_dirs, released: false }
    }

    pub fn release(&mut self) {
        self.released = true;
    }
}

impl Drop for BrowserSessionGuard {
    fn drop(&mut self) {
        if !self.released {
            self.release();
        }
    }
}

fn preflight_accessible(url: &str) -> Result<bool, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| e.to_string())?;
    match client.head(url).send() {
        Ok(resp) if resp.status().as_u16() >= 500 => Err(format!("{} returned {}", url, resp.status())),
        Ok(_) => Ok(true),
        Err(e) => Err(format!("{url} unreachable: {e}")),
    }
}

fn build_prompt(request: &VisualJudgeRequest) -> String {
    if request.concurrent {
        format!(
            "Compare the live and dev versions of {page}.\n\
             MANDATORY session binding: the '{live}' MCP session must navigate ONLY to {live_url}; \
             the '{dev}' MCP session must navigate ONLY to {dev_url}. Screenshot both, then compare.\n\
             Respond with a JSON object only: {{\"verdict\": \"PASS\"|\"FAIL\"|\"ERROR\", \"confidence\": 0-100, \
             \"visual_differences\": [{{\"type\":...,\"description\":...,\"severity\":\"critical\"|\"major\"|\"minor\"}}], \"summary\": \"...\"}}",
            page = request.page_path,
            live = request.live_session.server_name,
            live_url = request.live_session.page_url,
            dev = request.dev_session.server_name,
            dev_url = request.dev_session.page_url,
        )
    } else {
        format!(
            "Navigate to the live page at {live_url}, take a screenshot. Then navigate to the dev page at \
             {dev_url}, take a screenshot. Compare them for {page}.\n\
             Respond with a JSON object only: {{\"verdict\": \"PASS\"|\"FAIL\"|\"ERROR\", \"confidence\": 0-100, \
             \"visual_differences\": [{{\"type\":...,\"description\":...,\"severity\":\"critical\"|\"major\"|\"minor\"}}], \"summary\": \"...\"}}",
            page = request.page_path,
            live_url = request.live_session.page_url,
            dev_url = request.dev_session.page_url,
        )
    }
}

/// Extract the first JSON object from a free-form agent response.
fn extract_first_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (offset, byte) in bytes[start..].iter().enumerate() {
        match *byte as char {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return serde_json::from_str(&text[start..end]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Apply the verdict-normalization contract: contradictions, low confidence,
/// empty-differences FAILs, and unparseable responses all map onto a
/// well-defined (verdict, differences) pair.
fn normalize(raw: Option<RawJudgeResponse>) -> (PageVerdict, u8, Vec<VisualDifference>, String) {
    let Some(parsed) = raw else {
        return (PageVerdict::Error, 0, vec![], "agent response was not parseable JSON".to_string());
    };

    let verdict = match parsed.verdict.as_str() {
        "PASS" => PageVerdict::Pass,
        "FAIL" => PageVerdict::Fail,
        "ERROR" => PageVerdict::Error,
        other => {
            return (
                PageVerdict::Error,
                parsed.confidence,
                vec![synthetic_difference("invalid_verdict", &format!("unknown verdict: {other}"))],
                parsed.summary,
            );
        }
    };

    match verdict {
        PageVerdict::Pass if !parsed.visual_differences.is_empty() => (
            PageVerdict::Fail,
            parsed.confidence,
            parsed.visual_differences,
            parsed.summary,
        ),
        PageVerdict::Pass if parsed.confidence < MIN_CONFIDENCE => (
            PageVerdict::Error,
            parsed.confidence,
            vec![synthetic_difference("low_confidence", "confidence below minimum threshold")],
            parsed.summary,
        ),
        PageVerdict::Fail if parsed.visual_differences.is_empty() => (
            PageVerdict::Fail,
            parsed.confidence,
            vec![synthetic_difference("unspecified", "fail reported with no listed differences")],
            parsed.summary,
        ),
        other => (other, parsed.confidence, parsed.visual_differences, parsed.summary),
    }
}

fn synthetic_difference(kind: &str, description: &str) -> VisualDifference {
    let severity = if kind == "unspecified" { DifferenceSeverity::Major } else { DifferenceSeverity::Minor };
    VisualDifference {
        kind: kind.to_string(),
        description: description.to_string(),
        severity,
    }
}

/// Run the full Visual Judge state machine for one page.
pub fn judge(request: VisualJudgeRequest) -> VisualJudgeOutput {
    if request.concurrent {
        for url in [&request.live_session.page_url, &request.dev_session.page_url] {
            if let Err(reason) = preflight_accessible(url) {
                return VisualJudgeOutput {
                    verdict: PageVerdict::Error,
                    confidence: 0,
                    differences: vec![],
                    summary: "preflight accessibility check failed".to_string(),
                    passed: false,
                    raw_output: String::new(),
                    accessibility: Some(reason),
                };
            }
        }
    }

    let prompt = build_prompt(&request);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let agent_request = AgentRequest {
            prompt: format!("/visual-judge {}", request.page_path) + "\n" + &prompt,
            working_dir: request.working_dir.clone(),
            model: "sonnet",
            agent_name: "visual-judge",
            output_file: request
                .output_dir
                .join(format!("{}-{attempt}.jsonl", sanitize(&request.page_path))),
            skip_permissions: true,
            mcp_session: Some(request.live_session.server_name.as_str()),
            provider: request.provider,
        };

        let response = match run_agent_once(&agent_request, request.adw_id, request.timeout) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "visual judge agent call failed");
                refactor_types::AgentPromptResponse {
                    success: false,
                    output: String::new(),
                    session_id: None,
                    retry_code: refactor_types::RetryCode::ErrorDuringExecution,
                }
            }
        };

        let parsed_json = extract_first_json_object(&response.output);
        let raw: Option<RawJudgeResponse> = parsed_json.and_then(|v| serde_json::from_value(v).ok());
        let (verdict, confidence, differences, summary) = normalize(raw);

        let is_final = verdict != PageVerdict::Error || attempt >= request.max_retries;
        if is_final {
            return VisualJudgeOutput {
                passed: verdict == PageVerdict::Pass,
                verdict,
                confidence,
                differences,
                summary,
                raw_output: response.output,
                accessibility: None,
            };
        }

        let delay = request.base_delay.saturating_mul(attempt);
        std::thread::sleep(delay);
    }
}

fn sanitize(page_path: &str) -> String {
    page_path.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(verdict: &str, confidence: u8, diffs: Vec<VisualDifference>) -> Option<RawJudgeResponse> {
        Some(RawJudgeResponse {
            verdict: verdict.to_string(),
            confidence,
            visual_differences: diffs,
            summary: "s".to_string(),
        })
    }

    #[test]
    fn normalize_pass_with_differences_becomes_fail() {
        let diffs = vec![synthetic_difference("layout", "d")];
        let (verdict, _, _, _) = normalize(raw("PASS", 95, diffs));
        assert_eq!(verdict, PageVerdict::Fail);
    }

    #[test]
    fn normalize_low_confidence_pass_becomes_error() {
        let (verdict, _, differences, _) = normalize(raw("PASS", 50, vec![]));
        assert_eq!(verdict, PageVerdict::Error);
        assert_eq!(differences[0].kind, "low_confidence");
    }

    #[test]
    fn normalize_fail_with_no_differences_gets_synthetic_one() {
        let (verdict, _, differences, _) = normalize(raw("FAIL", 90, vec![]));
        assert_eq!(verdict, PageVerdict::Fail);
        assert_eq!(differences.len(), 1);
        assert_eq!(differences[0].kind, "unspecified");
    }

    #[test]
    fn normalize_unknown_verdict_becomes_error() {
        let (verdict, _, _, _) = normalize(raw("MAYBE", 90, vec![]));
        assert_eq!(verdict, PageVerdict::Error);
    }

    #[test]
    fn normalize_none_becomes_error() {
        let (verdict, confidence, _, _) = normalize(None);
        assert_eq!(verdict, PageVerdict::Error);
        assert_eq!(confidence, 0);
    }

    #[test]
    fn normalize_clean_pass_stays_pass() {
        let (verdict, _, differences, _) = normalize(raw("PASS", 95, vec![]));
        assert_eq!(verdict, PageVerdict::Pass);
        assert!(differences.is_empty());
    }

    #[test]
    fn extract_first_json_object_skips_leading_prose() {
        let text = "Here is my result:\n{\"verdict\":\"PASS\",\"confidence\":90,\"visual_differences\":[],\"summary\":\"ok\"}\nThanks!";
        let value = extract_first_json_object(text).expect("json found");
        assert_eq!(value["verdict"], "PASS");
    }

    #[test]
    fn browser_session_guard_removes_lock_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = dir.path().join("SingletonLock");
        std::fs::write(&lock, b"pid").unwrap();

        let _guard = BrowserSessionGuard::acquire(vec![dir.path().to_path_buf()]);
        assert!(!lock.exists());
    }
}
