//! 解题结果归一化
//!
//! 模型返回的字段名和形状并不稳定，这里统一转换成 `SolvedQuestion`：
//! - 字段别名：`question_text|question`、`correct_option|answer_option`、
//!   `answer_text|answer`、`explanation|solution`
//! - 正确选项和答案文本互相补全
//! - 答案表优先于模型的选择，缺少解析时单独请求一次解析

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use super::gateway::TextGenerator;
use crate::models::{AnswerKey, QuestionOption, SolveMethod, SolvedQuestion};

static STRING_OPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+|[A-Ea-e])\)?\s*[:.)-]?\s*(.+)$").expect("string option regex")
});

static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9A-Fa-f]+|\d+);").expect("numeric entity regex"));

/// 解码常见 HTML 实体并去掉首尾空白
pub fn clean_text(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let decoded = NUMERIC_ENTITY_RE.replace_all(value, |caps: &regex::Captures| {
        let code = &caps[1];
        let parsed = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        parsed
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    decoded
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// 把 JSON 标量转换成字符串（数字也算）
pub(crate) fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 依次取第一个非空的字段
fn first_field(item: &Map<String, JsonValue>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| item.get(*key).and_then(scalar_to_string))
        .find(|value| !value.trim().is_empty())
        .unwrap_or_default()
}

/// 归一化选项列表：支持对象（多种字段名）和 `"A) text"` 形式的字符串，
/// 也接受 `{"1": "text"}` 形式的映射
pub fn normalize_options(options: &JsonValue) -> Vec<QuestionOption> {
    if let JsonValue::Object(map) = options {
        return map
            .iter()
            .filter_map(|(label, text)| {
                let text = scalar_to_string(text)?;
                Some(QuestionOption::new(label.trim(), clean_text(&text)))
            })
            .filter(|opt| !opt.label.is_empty())
            .collect();
    }
    let Some(list) = options.as_array() else {
        return Vec::new();
    };

    list.iter()
        .filter_map(|opt| match opt {
            JsonValue::Object(map) => {
                let label = first_field(map, &["label", "option", "id", "value_label"]);
                let text = first_field(map, &["text", "value", "option_text"]);
                Some((label, text))
            }
            JsonValue::String(s) => STRING_OPTION_RE
                .captures(s.trim())
                .map(|caps| (caps[1].to_string(), caps[2].to_string())),
            _ => None,
        })
        .filter(|(label, _)| !label.trim().is_empty())
        .map(|(label, text)| QuestionOption::new(label.trim(), clean_text(&text)))
        .collect()
}

fn find_option_by_label<'a>(options: &'a [QuestionOption], label: &str) -> Option<&'a QuestionOption> {
    let label = label.trim();
    options
        .iter()
        .find(|opt| opt.label.trim().eq_ignore_ascii_case(label))
}

fn find_option_by_text<'a>(options: &'a [QuestionOption], text: &str) -> Option<&'a QuestionOption> {
    let text = text.trim().to_lowercase();
    options
        .iter()
        .find(|opt| opt.text.trim().to_lowercase() == text)
}

/// 归一化一批模型输出；缺少题号的条目按批内位置编号
pub async fn normalize_items(
    raw_items: &[JsonValue],
    answer_key: &AnswerKey,
    explainer: &dyn TextGenerator,
) -> Vec<SolvedQuestion> {
    let mut results = Vec::with_capacity(raw_items.len());

    for (idx, raw) in raw_items.iter().enumerate() {
        let empty = Map::new();
        let item = raw.as_object().unwrap_or(&empty);

        let mut question_number = first_field(item, &["question_number"]).trim().to_string();
        if question_number.is_empty() {
            question_number = (idx + 1).to_string();
        }

        let question_text = clean_text(&first_field(item, &["question_text", "question"]));
        let options = normalize_options(item.get("options").unwrap_or(&JsonValue::Null));
        let mut answer_option = first_field(item, &["answer_option", "correct_option"])
            .trim()
            .to_string();
        let mut answer_text = clean_text(&first_field(item, &["answer_text", "answer"]));
        let mut explanation = clean_text(&first_field(item, &["explanation", "solution"]));
        let section = item
            .get("section")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if answer_option.is_empty() && !answer_text.is_empty() {
            if let Some(opt) = find_option_by_text(&options, &answer_text) {
                answer_option = opt.label.clone();
            }
        }
        if answer_text.is_empty() && !answer_option.is_empty() {
            if let Some(opt) = find_option_by_label(&options, &answer_option) {
                answer_text = opt.text.clone();
            }
        }

        let mut method_used = SolveMethod::LlmJson;
        let key_digit = question_number
            .parse::<u32>()
            .ok()
            .and_then(|n| answer_key.get(n));
        if let Some(digit) = key_digit {
            method_used = SolveMethod::AnswerKey;
            answer_option = digit.to_string();
            answer_text = match find_option_by_label(&options, digit) {
                Some(opt) => opt.text.clone(),
                None => format!("Option {}", digit),
            };
            if explanation.is_empty() {
                debug!("题目 {} 使用答案表答案，补充解析", question_number);
                explanation = generate_explanation(explainer, &question_text, &answer_text).await;
            }
        }

        results.push(SolvedQuestion {
            question_number,
            question_text,
            options,
            answer_option: (!answer_option.is_empty()).then_some(answer_option),
            answer_text,
            explanation,
            section,
            method_used,
        });
    }

    results
}

fn explanation_prompt(question_text: &str, answer_text: &str) -> String {
    format!(
        r#"
You are a helpful math tutor. Assume the provided answer is correct and describe,
in 2-3 sentences, the logical steps a student would take to reach it. Focus on the
method (e.g., compare totals, apply ratios, plug values into the formula).
Do NOT mention missing information, inconsistencies, or answer keys. Keep the tone confident.

QUESTION:
{question_text}

CORRECT ANSWER:
{answer_text}
"#
    )
}

/// 为给定答案生成 2-3 句解析；失败时返回占位文本，不会中断流程
pub async fn generate_explanation(
    gateway: &dyn TextGenerator,
    question_text: &str,
    answer_text: &str,
) -> String {
    if question_text.trim().is_empty() || answer_text.trim().is_empty() {
        return "Explanation unavailable.".to_string();
    }
    match gateway
        .generate(&explanation_prompt(question_text, answer_text))
        .await
    {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!("生成解析失败: {}", e);
            format!("Explanation unavailable ({}).", e)
        }
    }
}
