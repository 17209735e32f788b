// Response normalization
//
// Result payloads arrive in several shapes depending on the path that produced
// them: a tabular JSON object, an agent response whose content blocks wrap a
// tool result, or free text with JSON embedded in it (possibly fenced). Each
// strategy below is a pure function tried in a fixed order; the first one that
// yields rows wins and its rows are uppercased exactly once afterwards.

use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::LazyLock;

use crate::api::middleware::truncate_detail;
use crate::models::{NormalizationOutcome, ResultSet, Row};

/// Fields that carry the row array, in lookup order
const ROWS_FIELDS: &[&str] = &["data", "rows"];

/// Content block types that wrap the output of an invoked tool
const TOOL_RESULT_TYPES: &[&str] = &["mcp_tool_result", "tool_result"];

/// Upper bound on `[` positions tried by the embedded array scan
const MAX_ARRAY_CANDIDATES: usize = 64;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("valid regex"));

static FENCE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("valid regex"));

/// Which strategy accepted a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    ToolResult,
    TextBlock,
    TabularBody,
    EmbeddedArray,
}

/// Normalize a raw response body into the canonical tabular contract
pub fn normalize(body: &str) -> NormalizationOutcome {
    match extract(body) {
        Some((strategy, rows)) => {
            tracing::debug!(?strategy, rows = rows.len(), "Result payload accepted");
            if rows.is_empty() {
                NormalizationOutcome::NoData
            } else {
                NormalizationOutcome::Rows(ResultSet::from_rows(rows))
            }
        }
        None => {
            let parsed = try_parse(body);
            let content_types = parsed
                .as_ref()
                .and_then(content_blocks)
                .map(block_types)
                .unwrap_or_default();
            tracing::warn!(?content_types, "No strategy could extract rows from the payload");
            NormalizationOutcome::Unparseable {
                content_types,
                fragment: truncate_detail(body),
            }
        }
    }
}

/// Run the strategies in priority order and return the raw accepted rows
pub fn extract(body: &str) -> Option<(Strategy, Vec<Row>)> {
    let parsed = try_parse(body);
    let blocks = parsed.as_ref().and_then(content_blocks);

    blocks
        .and_then(from_tool_results)
        .map(|rows| (Strategy::ToolResult, rows))
        .or_else(|| blocks.and_then(from_text_blocks).map(|rows| (Strategy::TextBlock, rows)))
        .or_else(|| {
            parsed
                .as_ref()
                .and_then(from_tabular_body)
                .map(|rows| (Strategy::TabularBody, rows))
        })
        .or_else(|| {
            // Agent responses are scanned through their text, never their envelope
            let text = match blocks {
                Some(blocks) => Cow::Owned(joined_text(blocks)),
                None => Cow::Borrowed(body),
            };
            from_embedded_array(&text).map(|rows| (Strategy::EmbeddedArray, rows))
        })
}

fn try_parse(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

fn content_blocks(body: &Value) -> Option<&[Value]> {
    body.get("content").and_then(Value::as_array).map(Vec::as_slice)
}

fn block_type(block: &Value) -> &str {
    block.get("type").and_then(Value::as_str).unwrap_or("unknown")
}

fn block_types(blocks: &[Value]) -> Vec<String> {
    blocks.iter().map(|b| block_type(b).to_string()).collect()
}

fn joined_text(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter(|b| block_type(b) == "text")
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strategy 1: tool-result blocks wrapping a JSON string
fn from_tool_results(blocks: &[Value]) -> Option<Vec<Row>> {
    blocks
        .iter()
        .filter(|b| TOOL_RESULT_TYPES.contains(&block_type(b)))
        .flat_map(tool_result_texts)
        .filter_map(try_parse)
        .find_map(|value| rows_from_value(&value, true))
}

fn tool_result_texts(block: &Value) -> Vec<&str> {
    match block.get("content") {
        Some(Value::String(text)) => vec![text.as_str()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect(),
        _ => Vec::new(),
    }
}

/// Strategy 2: plain text blocks holding JSON, fenced or not
fn from_text_blocks(blocks: &[Value]) -> Option<Vec<Row>> {
    blocks
        .iter()
        .filter(|b| block_type(b) == "text")
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .flat_map(text_candidates)
        .filter_map(|candidate| try_parse(&candidate))
        .find_map(|value| rows_from_value(&value, false))
}

/// Fenced block bodies first, then the whole text with fence markers removed
fn text_candidates(text: &str) -> Vec<String> {
    let mut candidates: Vec<String> = FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect();
    candidates.push(strip_fences(text));
    candidates
}

fn strip_fences(text: &str) -> String {
    FENCE_MARKER.replace_all(text, "").trim().to_string()
}

/// Strategy 3: the body itself is tabular JSON
fn from_tabular_body(body: &Value) -> Option<Vec<Row>> {
    rows_field(body).and_then(|items| rows_from_array(items, column_names(body)))
}

/// Strategy 4: first JSON array found anywhere in the text
fn from_embedded_array(text: &str) -> Option<Vec<Row>> {
    let embedded = text
        .match_indices('[')
        .take(MAX_ARRAY_CANDIDATES)
        .filter_map(|(start, _)| matching_bracket(text, start).map(|end| &text[start..=end]))
        .filter_map(try_parse)
        .find_map(|value| non_empty_rows(&value));

    embedded.or_else(|| {
        // Greedy first `[` to last `]`, for arrays the scan could not delimit
        let start = text.find('[')?;
        let end = text.rfind(']')?;
        (end > start)
            .then(|| try_parse(&text[start..=end]))
            .flatten()
            .and_then(|value| non_empty_rows(&value))
    })
}

fn non_empty_rows(value: &Value) -> Option<Vec<Row>> {
    match value {
        Value::Array(items) if !items.is_empty() => rows_from_array(items, None),
        _ => None,
    }
}

/// Index of the `]` closing the `[` at `start`, skipping string contents
fn matching_bracket(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

/// Rows from a candidate: a rows-array field, or a bare array. Empty bare
/// arrays only count when `allow_empty_array` is set.
fn rows_from_value(value: &Value, allow_empty_array: bool) -> Option<Vec<Row>> {
    if let Some(items) = rows_field(value) {
        return rows_from_array(items, column_names(value));
    }

    match value {
        Value::Array(items) if allow_empty_array || !items.is_empty() => rows_from_array(items, None),
        _ => None,
    }
}

fn rows_field(value: &Value) -> Option<&Vec<Value>> {
    let object = value.as_object()?;
    ROWS_FIELDS
        .iter()
        .find_map(|field| object.get(*field).and_then(Value::as_array))
}

/// Column names declared next to positional rows: `columns` or `meta.columns`,
/// given as strings or `{ "name": .. }` objects
fn column_names(value: &Value) -> Option<Vec<String>> {
    let columns = value
        .get("columns")
        .or_else(|| value.get("meta").and_then(|m| m.get("columns")))?
        .as_array()?;

    columns
        .iter()
        .map(|column| match column {
            Value::String(name) => Some(name.clone()),
            other => other.get("name").and_then(Value::as_str).map(String::from),
        })
        .collect()
}

/// Every item must be an object, or an array matching the declared columns
fn rows_from_array(items: &[Value], columns: Option<Vec<String>>) -> Option<Vec<Row>> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(row) => Some(row.clone()),
            Value::Array(cells) => {
                let columns = columns.as_ref()?;
                (cells.len() == columns.len())
                    .then(|| columns.iter().cloned().zip(cells.iter().cloned()).collect())
            }
            _ => None,
        })
        .collect()
}
