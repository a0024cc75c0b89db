//! 分题器 - 业务能力层
//!
//! 把 PDF 抽取出的线性文本切分成题目块：
//! 1. 找到 `KEY` 标记，解析其后的答案表，之前的文本作为题目语料
//! 2. 以行首的 2-3 位题号（`31.` / `31)`）切分题目
//! 3. 在每个题目块内识别行首的 1-5 选项标签，失败时尝试 `(1) text` 形式
//!
//! 题号至少两位，选项只有一位，所以选项行不会被误认为新题目。

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::normalizer::clean_text;
use crate::models::{AnswerKey, QuestionBlock, QuestionOption};

/// 提取的批次文本少于该字符数时，改用题目块原文拼接
const MIN_BATCH_TEXT_CHARS: usize = 100;

/// 原文比解析出的题干长出该字符数时，认为题干被截断
const TRUNCATION_SLACK_CHARS: usize = 50;

static KEY_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bKEY\b").expect("key marker regex"));

static KEY_PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})\s*[.\-]\s*(\d)").expect("key pair regex"));

static QUESTION_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(\d{2,3})[.)]").expect("question marker regex"));

/// 只在行首匹配，所以 `12.` 这类更大数字的尾部不会被当成选项
static OPTION_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*([1-5])[.)]").expect("option line regex"));

/// 一行以另一个选项标签开头
static OPTION_LABEL_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([1-5])[.)](\s|$)").expect("option label regex"));

static INLINE_OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([1-5])\)").expect("inline option regex"));

/// 分题结果
#[derive(Debug, Clone, Default)]
pub struct SegmentedDocument {
    pub answer_key: AnswerKey,
    /// 题目语料（答案表之前的文本）
    pub questions_text: String,
    pub blocks: Vec<QuestionBlock>,
}

/// 完整分题流程：答案表 + 题目块
pub fn segment_document(full_text: &str) -> SegmentedDocument {
    let (answer_key, key_start) = extract_answer_key(full_text);
    let questions_text = match key_start {
        Some(offset) => &full_text[..offset],
        None => full_text,
    };
    let blocks = segment_questions(questions_text);

    debug!(
        "分题完成: {} 道题, 答案表 {} 条",
        blocks.len(),
        answer_key.len()
    );

    SegmentedDocument {
        answer_key,
        questions_text: questions_text.to_string(),
        blocks,
    }
}

/// 解析答案表，返回答案表和 `KEY` 标记的起始位置
pub fn extract_answer_key(full_text: &str) -> (AnswerKey, Option<usize>) {
    let Some(marker) = KEY_MARKER_RE.find(full_text) else {
        return (AnswerKey::default(), None);
    };

    let key_section = &full_text[marker.end()..];
    let answer_key = KEY_PAIR_RE
        .captures_iter(key_section)
        .filter_map(|caps| {
            let question = caps.get(1)?.as_str().parse::<u32>().ok()?;
            let digit = caps.get(2)?.as_str().to_string();
            Some((question, digit))
        })
        .collect();

    (answer_key, Some(marker.start()))
}

/// 按题号切分题目块，保持文档顺序
pub fn segment_questions(text: &str) -> Vec<QuestionBlock> {
    let markers: Vec<_> = QUESTION_MARKER_RE.captures_iter(text).collect();
    let mut blocks = Vec::with_capacity(markers.len());

    for (idx, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = markers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());

        let raw_block = text[whole.end()..end].trim();
        if raw_block.is_empty() {
            continue;
        }

        let (question_text, options) = split_prompt_and_options(raw_block);
        if question_text.is_empty() {
            debug!("丢弃题干为空的题目块: {}", number.as_str());
            continue;
        }

        blocks.push(QuestionBlock {
            question_number: number.as_str().to_string(),
            question_text,
            options,
            raw_block: raw_block.to_string(),
        });
    }

    blocks
}

/// 拆分题干和选项
fn split_prompt_and_options(raw_block: &str) -> (String, Vec<QuestionOption>) {
    let mut first_option_start = None;
    let mut options = line_options(raw_block, &mut first_option_start);

    if options.is_empty() {
        options = inline_options(raw_block, &mut first_option_start);
    }

    let prompt = match first_option_start {
        Some(start) if !options.is_empty() => raw_block[..start].trim(),
        _ => cut_at_key(raw_block).trim(),
    };

    (prompt.to_string(), options)
}

/// 行首选项：`1) text` / `1. text`
fn line_options(raw_block: &str, first_start: &mut Option<usize>) -> Vec<QuestionOption> {
    let mut options = Vec::new();

    for caps in OPTION_LINE_RE.captures_iter(raw_block) {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let text = option_text(&raw_block[whole.end()..]);
        if text.is_empty() {
            continue;
        }

        first_start.get_or_insert(whole.start());
        options.push(QuestionOption::new(label.as_str(), text));
    }

    options
}

/// 行内选项：`(1) text (2) text`
fn inline_options(raw_block: &str, first_start: &mut Option<usize>) -> Vec<QuestionOption> {
    let markers: Vec<_> = INLINE_OPTION_RE.captures_iter(raw_block).collect();
    let mut options = Vec::new();

    for (idx, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let next_start = markers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(raw_block.len(), |m| m.start());

        let text = option_text(&raw_block[whole.end()..next_start]);
        if text.is_empty() {
            continue;
        }

        first_start.get_or_insert(whole.start());
        options.push(QuestionOption::new(label.as_str(), text));
    }

    options
}

/// 标签后的第一行非空文本；PDF 导出常把选项文本折到下一行
fn option_text(rest: &str) -> &str {
    let line = rest
        .trim_start()
        .split('\n')
        .next()
        .unwrap_or_default();
    if OPTION_LABEL_START_RE.is_match(line) {
        return "";
    }
    cut_at_key(line).trim()
}

fn cut_at_key(text: &str) -> &str {
    match text.find("KEY") {
        Some(pos) => &text[..pos],
        None => text,
    }
}

/// 从题目语料中截取一个批次对应的原始文本
///
/// 起点是批次第一题的题号，终点是最后一题题号 +1 的位置。
/// 截取结果过短时退回到各题目块原文的拼接。
pub fn extract_batch_text(full_text: &str, batch: &[QuestionBlock]) -> String {
    let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
        return String::new();
    };

    let start = find_question_number(full_text, &first.question_number).unwrap_or(0);

    let end = last
        .question_number
        .trim()
        .parse::<u32>()
        .ok()
        .and_then(|n| {
            let search_from = next_char_boundary(full_text, start);
            find_question_number(&full_text[search_from..], &(n + 1).to_string())
                .map(|pos| search_from + pos)
        })
        .unwrap_or(full_text.len());

    let batch_text = if end > start {
        full_text[start..end].trim()
    } else {
        ""
    };

    if batch_text.chars().count() < MIN_BATCH_TEXT_CHARS {
        return batch
            .iter()
            .filter(|block| !block.raw_block.is_empty())
            .map(|block| block.raw_block.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
    }

    batch_text.to_string()
}

/// 依次尝试 `31.`、`31)`、`31 ` 三种写法
fn find_question_number(text: &str, number: &str) -> Option<usize> {
    let number = number.trim();
    if number.is_empty() {
        return None;
    }
    let escaped = regex::escape(number);
    [r"\.", r"\)", r"\s"].iter().find_map(|suffix| {
        Regex::new(&format!(r"\b{}{}", escaped, suffix))
            .ok()?
            .find(text)
            .map(|m| m.start())
    })
}

fn next_char_boundary(text: &str, pos: usize) -> usize {
    text[pos..]
        .chars()
        .next()
        .map_or(text.len(), |c| pos + c.len_utf8())
}

/// 把题目块整理成干净的 `Question N: ...` 文本
///
/// 解析出的题干明显短于原文时，从原文重新推导题干。
pub fn format_blocks_for_solver(blocks: &[QuestionBlock]) -> String {
    let mut lines: Vec<String> = Vec::new();

    for (idx, block) in blocks.iter().enumerate() {
        let number = if block.question_number.is_empty() {
            (idx + 1).to_string()
        } else {
            block.question_number.clone()
        };

        let raw = block.raw_block.trim();
        let mut question_text = block.question_text.trim().to_string();
        if question_text.is_empty()
            || (!raw.is_empty()
                && raw.chars().count() > question_text.chars().count() + TRUNCATION_SLACK_CHARS)
        {
            let (prompt, _) = split_prompt_and_options(raw);
            if !prompt.is_empty() {
                question_text = prompt;
            }
        }

        let question_text = clean_text(&question_text);
        if question_text.is_empty() {
            continue;
        }
        lines.push(format!("Question {}: {}", number, question_text));

        let options = if block.options.is_empty() {
            split_prompt_and_options(raw).1
        } else {
            block.options.clone()
        };
        if !options.is_empty() {
            lines.push("Options:".to_string());
            for opt in &options {
                let text = clean_text(&opt.text);
                if !opt.label.trim().is_empty() && !text.is_empty() {
                    lines.push(format!("  {}) {}", opt.label.trim(), text));
                }
            }
        }
        lines.push(String::new());
    }

    lines.join("\n").trim().to_string()
}
