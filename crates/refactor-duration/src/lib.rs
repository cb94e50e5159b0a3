//! Human-friendly duration parsing and serde codecs shared across the
//! refactor orchestrator: CLI flags (`--base-delay 2s`) and
//! `orchestrator.toml` fields both accept the same `humantime` syntax
//! rather than raw milliseconds.
//!
//! # Example
//!
//! ```
//! use refactor_duration::parse_duration;
//! use std::time::Duration;
//!
//! assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
//! assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
//! ```

use std::time::Duration;

use anyhow::{Context, Result};

/// Parse a `humantime`-formatted duration string (`"2s"`, `"500ms"`,
/// `"1m 30s"`), used by CLI flags that take a duration.
pub fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

/// Format a duration back into `humantime` syntax, the inverse of
/// [`parse_duration`], used for echoing effective config back to the user
/// (e.g. the `doctor` subcommand).
pub fn format_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

/// Serde module for a required `Duration` field stored as a `humantime`
/// string (`base_delay = "2s"` in `orchestrator.toml`, rather than a raw
/// millisecond integer).
pub mod humantime_duration {
    pub use humantime_serde::{deserialize, serialize};
}

/// Serde module for an `Option<Duration>` field stored as a `humantime`
/// string when present, used by the sparse `FileOverrides` layer where a
/// field's absence must be distinguishable from an explicit zero.
pub mod humantime_duration_option {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => {
                let formatted = humantime::format_duration(*d).to_string();
                formatted.serialize(serializer)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => humantime::parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
