//! 模型输出的 JSON 修复与解析
//!
//! 模型经常在 JSON 外面包 markdown 围栏、夹带控制字符或留下尾逗号。
//! 解析顺序：围栏内 JSON → 宽松抽取 + 清洗 → 最外层 `[...]` + 清洗。

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::PipelineError;
use crate::utils::preview;

/// 解析失败时错误信息里保留的响应字符数
pub const RESPONSE_PREVIEW_CHARS: usize = 1000;

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```json\s*(.*?)```").expect("json fence regex"));

static ANY_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\s*(.*?)```").expect("fence regex"));

static OBJECT_ARRAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[\s*\{.*?\}\s*\]").expect("object array regex"));

static OPENING_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```json\s*").expect("opening fence regex"));

static CLOSING_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```\s*$").expect("closing fence regex"));

static CONTROL_CHARS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F]").expect("control chars regex")
});

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma regex"));

/// 解析 ```json 围栏内的内容，失败返回 None
pub fn extract_fenced_json(text: &str) -> Option<JsonValue> {
    let caps = JSON_FENCE_RE.captures(text)?;
    serde_json::from_str(caps.get(1)?.as_str()).ok()
}

/// 宽松抽取 JSON 文本：json 围栏 → 任意围栏 → 对象数组 → 原文
pub fn extract_json_block(text: &str) -> String {
    if let Some(inner) = JSON_FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        return inner.as_str().trim().to_string();
    }
    if let Some(inner) = ANY_FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        return inner.as_str().trim().to_string();
    }
    if let Some(m) = OBJECT_ARRAY_RE.find(text) {
        return m.as_str().trim().to_string();
    }
    text.trim().to_string()
}

/// 第一个 `[` 到最后一个 `]` 之间的文本
pub fn outermost_array_span(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// 清洗常见的模型 JSON 问题：围栏、控制字符、尾逗号
pub fn sanitize_json(json_str: &str) -> String {
    if json_str.is_empty() {
        return String::new();
    }
    let without_open = OPENING_FENCE_RE.replace_all(json_str, "");
    let without_close = CLOSING_FENCE_RE.replace_all(&without_open, "");
    let without_controls = CONTROL_CHARS_RE.replace_all(&without_close, " ");
    let without_trailing = TRAILING_COMMA_RE.replace_all(&without_controls, "$1");
    without_trailing.trim().to_string()
}

/// 从模型输出中解析 JSON 数组
pub fn parse_json_array(raw_text: &str) -> Result<Vec<JsonValue>, PipelineError> {
    let unparseable = || PipelineError::UnparseableOutput {
        length: raw_text.chars().count(),
        preview: preview(raw_text, RESPONSE_PREVIEW_CHARS),
    };
    if raw_text.trim().is_empty() {
        return Err(unparseable());
    }

    if let Some(JsonValue::Array(items)) = extract_fenced_json(raw_text) {
        return Ok(items);
    }

    let block = sanitize_json(&extract_json_block(raw_text));
    match serde_json::from_str::<JsonValue>(&block) {
        Ok(JsonValue::Array(items)) => return Ok(items),
        Ok(_) => {}
        Err(e) => warn!("清洗后 JSON 解析失败: {}", e),
    }

    if let Some(span) = outermost_array_span(raw_text) {
        match serde_json::from_str::<JsonValue>(&sanitize_json(span)) {
            Ok(JsonValue::Array(items)) => return Ok(items),
            Ok(_) => {}
            Err(e) => warn!("最外层数组解析失败: {}", e),
        }
    }

    Err(unparseable())
}
