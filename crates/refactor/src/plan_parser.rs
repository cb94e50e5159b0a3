//! Parses an audit's markdown plan into page-grouped chunks.
//!
//! Mirrors the original's layered `re.search`/`re.split` fallback chain:
//! try page-group headings first, then fall back to grouping ungrouped
//! chunks by their own `Affected Pages` metadata.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use regex::Regex;

use refactor_types::{ChunkData, PageGroup};

const CHUNK_DELIMITER_MIN_TILDES: usize = 5;

/// Parse a markdown plan into ordered page groups. Fails if the plan
/// contains no chunks at all.
pub fn parse_plan(markdown: &str) -> Result<Vec<PageGroup>> {
    let chunk_blocks = split_chunk_blocks(markdown);
    if chunk_blocks.is_empty() {
        bail!("plan contains no chunk delimiters");
    }

    let mut chunks = Vec::new();
    for block in &chunk_blocks {
        if let Some(chunk) = parse_chunk_block(block)? {
            chunks.push(chunk);
        }
    }

    if chunks.is_empty() {
        bail!("plan parsed zero usable chunks");
    }

    let groups = if let Some(declared) = parse_declared_groups(markdown, &chunks) {
        declared
    } else {
        group_by_affected_pages(chunks)
    };

    Ok(groups)
}

/// Split the plan body on runs of `~~~~~` (5+ tildes), the chunk delimiter.
fn split_chunk_blocks(markdown: &str) -> Vec<String> {
    let delimiter = Regex::new(&format!(r"~{{{},}}", CHUNK_DELIMITER_MIN_TILDES)).expect("valid regex");
    delimiter
        .split(markdown)
        .map(str::to_string)
        .filter(|block| block.contains("CHUNK"))
        .collect()
}

fn parse_chunk_block(block: &str) -> Result<Option<ChunkData>> {
    let header_re = Regex::new(r"###\s*CHUNK\s+(\d+)\s*:\s*(.+)").expect("valid regex");
    let Some(header) = header_re.captures(block) else {
        return Ok(None);
    };
    let number: u32 = header[1].parse().context("chunk number not an integer")?;
    let title = header[2].trim().to_string();

    if checklist_fully_ticked(block) {
        return Ok(None);
    }

    let file_path = parse_file_path(block)?;
    let line_number = parse_line_number(block);
    let affected_pages = parse_affected_pages(block);

    let code_blocks = parse_fenced_code_blocks(block);
    if code_blocks.len() < 2 {
        bail!("chunk {number} is missing current/refactored code blocks");
    }
    let current_code = code_blocks[0].clone();
    let refactored_code = code_blocks[1].clone();

    if current_code.trim().is_empty() || refactored_code.trim().is_empty() {
        bail!("chunk {number} has an empty code block");
    }

    Ok(Some(ChunkData {
        number,
        title,
        file_path,
        line_number,
        current_code,
        refactored_code,
        affected_pages,
    }))
}

/// `**File(s):**` may hold a single path, a bulleted list on following
/// lines, or a comma-separated list. Every recognized entry is kept,
/// re-joined as a comma-separated string — `ChunkData::file_path` carries
/// the whole raw list this way, and `ScopeTracker::track_from_chunk` (see
/// `scope.rs`) splits it back out on `,` so every listed file gets tracked.
fn parse_file_path(block: &str) -> Result<PathBuf> {
    let header_re = Regex::new(r"(?m)^\*\*File\(s\):\*\*\s*(.*)$").expect("valid regex");
    let header = header_re
        .captures(block)
        .context("chunk is missing a **File(s):** line")?;
    let header_end = header.get(0).unwrap().end();

    let mut entries: Vec<&str> = Vec::new();
    entries.extend(
        header[1]
            .split(',')
            .map(|s| s.trim().trim_matches('`'))
            .filter(|s| !s.is_empty()),
    );

    // A bulleted continuation list (`- path`, one per line) immediately
    // following the header line, up to the next blank line or metadata key.
    for line in block[header_end..].lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || !trimmed.starts_with('-') {
            break;
        }
        let entry = trimmed.trim_start_matches('-').trim().trim_matches('`');
        if !entry.is_empty() {
            entries.push(entry);
        }
    }

    if entries.is_empty() {
        bail!("chunk's **File(s):** line has no entries");
    }

    Ok(PathBuf::from(entries.join(", ")))
}

/// `**Line(s):**` may be `N`, `N-M`, or `unknown`; only the leading integer
/// is kept (the domain type models a single starting line, see DESIGN.md).
fn parse_line_number(block: &str) -> Option<u32> {
    let lines_re = Regex::new(r"(?m)^\*\*Line\(s\):\*\*\s*(.+)$").ok()?;
    let captures = lines_re.captures(block)?;
    let raw = captures[1].trim();
    let leading_digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    leading_digits.parse().ok()
}

fn parse_affected_pages(block: &str) -> Vec<String> {
    let pages_re = Regex::new(r"(?m)^\*\*Affected Pages?:?\*\*\s*(.+)$").expect("valid regex");
    let Some(captures) = pages_re.captures(block) else {
        return vec!["AUTO".to_string()];
    };
    let raw = captures[1].trim();
    if raw.eq_ignore_ascii_case("AUTO") {
        return vec!["AUTO".to_string()];
    }
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn parse_fenced_code_blocks(block: &str) -> Vec<String> {
    let fence_re = Regex::new(r"(?s)```(?:javascript|typescript|python)?\n(.*?)```").expect("valid regex");
    fence_re
        .captures_iter(block)
        .map(|c| c[1].trim_end().to_string())
        .collect()
}

/// A chunk whose testing checklist is fully ticked (all `- [x]`, none
/// remaining `- [ ]`) is considered already verified and is skipped.
fn checklist_fully_ticked(block: &str) -> bool {
    let unticked = Regex::new(r"(?m)^\s*-\s*\[\s*\]").expect("valid regex");
    let ticked = Regex::new(r"(?m)^\s*-\s*\[[xX]\]").expect("valid regex");
    ticked.is_match(block) && !unticked.is_match(block)
}

/// Try the declared `## PAGE GROUP: <key>` heading format first.
fn parse_declared_groups(markdown: &str, chunks: &[ChunkData]) -> Option<Vec<PageGroup>> {
    let group_re = Regex::new(
        r"(?m)^##\s*PAGE GROUP:\s*(?P<key>[^\n(]+?)\s*(?:\(Chunks:\s*(?P<chunk_ids>[\d,\s]+)\))?\s*$",
    )
    .expect("valid regex");
    let affected_pages_re = Regex::new(r"(?m)^\*\*Affected Pages?:?\*\*\s*(.+)$").expect("valid regex");

    let mut matches: Vec<_> = group_re.captures_iter(markdown).collect();
    if matches.is_empty() {
        return None;
    }

    let mut groups = Vec::new();
    for (idx, m) in matches.drain(..).enumerate() {
        let key = m.name("key").unwrap().as_str().trim().to_string();
        let whole = m.get(0).unwrap();
        let section_end = markdown[whole.end()..]
            .find("\n## PAGE GROUP:")
            .map(|offset| whole.end() + offset)
            .unwrap_or(markdown.len());
        let section = &markdown[whole.start()..section_end];

        let pages = if let Some(ids) = m.name("chunk_ids") {
            let wanted: Vec<u32> = ids
                .as_str()
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            let group_chunks: Vec<ChunkData> = chunks
                .iter()
                .filter(|c| wanted.contains(&c.number))
                .cloned()
                .collect();
            if group_chunks.is_empty() {
                continue;
            }
            groups.push(PageGroup {
                index: idx,
                pages: vec![key],
                chunks: group_chunks,
            });
            continue;
        } else if let Some(pages_match) = affected_pages_re.captures(section) {
            pages_match[1]
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else {
            vec![key.clone()]
        };

        let chunk_numbers: Vec<u32> = Regex::new(r"###\s*CHUNK\s+(\d+)")
            .expect("valid regex")
            .captures_iter(section)
            .filter_map(|c| c[1].parse().ok())
            .collect();
        let group_chunks: Vec<ChunkData> = chunks
            .iter()
            .filter(|c| chunk_numbers.contains(&c.number))
            .cloned()
            .collect();
        if group_chunks.is_empty() {
            continue;
        }

        groups.push(PageGroup {
            index: idx,
            pages,
            chunks: group_chunks,
        });
    }

    if groups.is_empty() { None } else { Some(groups) }
}

/// Fallback: no declared groups found, so group ungrouped chunks by their
/// own `affected_pages` metadata, preserving first-seen order.
fn group_by_affected_pages(chunks: Vec<ChunkData>) -> Vec<PageGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: std::collections::BTreeMap<String, Vec<ChunkData>> = std::collections::BTreeMap::new();

    for chunk in chunks {
        let key = chunk
            .affected_pages
            .first()
            .cloned()
            .unwrap_or_else(|| "AUTO".to_string());
        if !by_key.contains_key(&key) {
            order.push(key.clone());
        }
        by_key.entry(key).or_default().push(chunk);
    }

    order
        .into_iter()
        .enumerate()
        .map(|(index, key)| PageGroup {
            index,
            pages: vec![key.clone()],
            chunks: by_key.remove(&key).unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_PLAN: &str = r#"
## PAGE GROUP: /search
**Affected Pages**: /search

### CHUNK 1: Use spread instead of push
**File(s):** src/logic/foo.js
**Line(s):** 12

```javascript
arr.push(x);
```

```javascript
arr = [...arr, x];
```

~~~~~~~~~~
"#;

    #[test]
    fn parse_plan_extracts_single_chunk() {
        let groups = parse_plan(SIMPLE_PLAN).expect("parse");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].chunks.len(), 1);
        assert_eq!(groups[0].chunks[0].number, 1);
        assert_eq!(groups[0].chunks[0].file_path, PathBuf::from("src/logic/foo.js"));
        assert_eq!(groups[0].chunks[0].line_number, Some(12));
        assert_eq!(groups[0].pages, vec!["/search".to_string()]);
    }

    #[test]
    fn parse_plan_rejects_empty_input() {
        assert!(parse_plan("no chunks here").is_err());
    }

    #[test]
    fn checklist_fully_ticked_detects_all_boxes_checked() {
        let block = "- [x] test one\n- [x] test two";
        assert!(checklist_fully_ticked(block));
    }

    #[test]
    fn checklist_fully_ticked_false_when_box_remains() {
        let block = "- [x] test one\n- [ ] test two";
        assert!(!checklist_fully_ticked(block));
    }

    #[test]
    fn fully_ticked_chunk_is_skipped() {
        let plan = format!(
            "{}\n- [x] already verified\n~~~~~~~~~~\n",
            SIMPLE_PLAN.trim_end_matches("~~~~~~~~~~\n")
        );
        let result = parse_plan(&plan);
        assert!(result.is_err() || result.unwrap().iter().all(|g| g.chunks.is_empty()));
    }

    #[test]
    fn parse_file_path_handles_bulleted_list() {
        let block = "**File(s):**\n- src/a.ts\n- src/b.ts\n";
        let path = parse_file_path(block).expect("parse");
        assert_eq!(path, PathBuf::from("src/a.ts, src/b.ts"));
    }

    #[test]
    fn parse_file_path_handles_comma_separated_list() {
        let block = "**File(s):** src/a.ts, src/b.ts\n**Line(s):** unknown\n";
        let path = parse_file_path(block).expect("parse");
        assert_eq!(path, PathBuf::from("src/a.ts, src/b.ts"));
    }

    #[test]
    fn parse_line_number_handles_range() {
        assert_eq!(parse_line_number("**Line(s):** 10-20"), Some(10));
    }

    #[test]
    fn parse_line_number_handles_unknown() {
        assert_eq!(parse_line_number("**Line(s):** unknown"), None);
    }

    #[test]
    fn group_by_affected_pages_preserves_first_seen_order() {
        let chunks = vec![
            ChunkData {
                number: 1,
                title: "a".into(),
                file_path: PathBuf::from("a.ts"),
                line_number: None,
                current_code: "x".into(),
                refactored_code: "y".into(),
                affected_pages: vec!["/b".into()],
            },
            ChunkData {
                number: 2,
                title: "b".into(),
                file_path: PathBuf::from("b.ts"),
                line_number: None,
                current_code: "x".into(),
                refactored_code: "y".into(),
                affected_pages: vec!["/a".into()],
            },
        ];
        let groups = group_by_affected_pages(chunks);
        assert_eq!(groups[0].pages, vec!["/b".to_string()]);
        assert_eq!(groups[1].pages, vec!["/a".to_string()]);
    }
}
