//! 解题结果翻译
//!
//! 按批（默认 5 题）以 JSON 形式请求翻译：
//! - 整批失败或返回条目不足时，缺失条目逐题重试
//! - 逐题仍失败时保留原文，并在 `translation_error` 中记录原因
//! - 目标语言为英文时直接跳过

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use super::gateway::TextGenerator;
use super::json_repair::{extract_fenced_json, extract_json_block, parse_json_array, sanitize_json};
use super::normalizer::normalize_options;
use super::progress::{scale_progress, ProgressSink};
use crate::error::PipelineError;
use crate::models::{LogLevel, SolvedQuestion, Stage, TranslatedQuestion};

/// 模型返回的单题译文
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TranslatedFields {
    #[serde(default)]
    question_text: Option<String>,
    #[serde(default)]
    options: Option<JsonValue>,
    #[serde(default)]
    answer_text: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

pub struct Translator {
    gateway: Arc<dyn TextGenerator>,
    batch_size: usize,
    char_limit: usize,
}

impl Translator {
    pub fn new(gateway: Arc<dyn TextGenerator>, batch_size: usize, char_limit: usize) -> Self {
        Self {
            gateway,
            batch_size: batch_size.max(1),
            char_limit,
        }
    }

    pub fn needs_translation(language: &str) -> bool {
        !language.trim().eq_ignore_ascii_case("english")
    }

    /// 翻译全部题目，返回顺序与输入一致
    pub async fn translate_all(
        &self,
        items: &[SolvedQuestion],
        language: &str,
        progress: &dyn ProgressSink,
        span: (u8, u8),
    ) -> Vec<TranslatedQuestion> {
        if !Self::needs_translation(language) {
            return items
                .iter()
                .cloned()
                .map(|item| TranslatedQuestion::untranslated(item, language, None))
                .collect();
        }

        let total = items.len();
        let mut translated = Vec::with_capacity(total);

        for (batch_idx, batch) in items.chunks(self.batch_size).enumerate() {
            let payload = batch_payload(batch);
            let payload_chars = payload.chars().count();

            let mut batch_result = if payload_chars > self.char_limit {
                warn!(
                    "翻译批次 {} 过大 ({} 字符 > {})，逐题翻译",
                    batch_idx + 1,
                    payload_chars,
                    self.char_limit
                );
                Vec::new()
            } else {
                match self.translate_batch(batch, &payload, language).await {
                    Ok(done) => done,
                    Err(e) => {
                        progress.log(
                            &format!("⚠️ Translation batch {} failed: {}. Falling back to individual translation.", batch_idx + 1, e),
                            LogLevel::Warning,
                        );
                        Vec::new()
                    }
                }
            };

            if batch_result.len() < batch.len() {
                if !batch_result.is_empty() {
                    warn!(
                        "翻译返回 {} 条，批次共有 {} 条，补齐缺失条目",
                        batch_result.len(),
                        batch.len()
                    );
                }
                for item in &batch[batch_result.len()..] {
                    batch_result.push(self.translate_single(item, language).await);
                }
            }

            translated.extend(batch_result);

            let done = translated.len();
            progress.report(
                scale_progress(span.0, span.1, done, total),
                &format!("Translated {}/{} questions to {}", done, total, language),
                Stage::Translation,
            );
        }

        info!("✓ 翻译完成: {} 道题 → {}", translated.len(), language);
        translated
    }

    async fn translate_batch(
        &self,
        batch: &[SolvedQuestion],
        payload: &str,
        language: &str,
    ) -> Result<Vec<TranslatedQuestion>, PipelineError> {
        let prompt = batch_prompt(payload, language, batch.len());
        let raw = self.gateway.generate(&prompt).await?;
        let parsed = parse_json_array(&raw)?;

        Ok(batch
            .iter()
            .zip(parsed)
            .map(|(original, value)| merge_translation(original, value, language))
            .collect())
    }

    /// 逐题翻译，失败时保留原文并记录错误
    async fn translate_single(&self, item: &SolvedQuestion, language: &str) -> TranslatedQuestion {
        let prompt = single_prompt(item, language);
        let raw = match self.gateway.generate(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("题目 {} 翻译失败: {}", item.question_number, e);
                return TranslatedQuestion::untranslated(item.clone(), language, Some(e.to_string()));
            }
        };

        let parsed = extract_fenced_json(&raw).or_else(|| {
            serde_json::from_str::<JsonValue>(&sanitize_json(&extract_json_block(&raw))).ok()
        });

        match parsed {
            Some(value @ JsonValue::Object(_)) => merge_translation(item, value, language),
            _ => TranslatedQuestion::untranslated(
                item.clone(),
                language,
                Some("Could not parse translation output".to_string()),
            ),
        }
    }
}

fn item_payload(item: &SolvedQuestion) -> JsonValue {
    json!({
        "question_number": item.question_number,
        "question_text": item.question_text,
        "options": item.options,
        "answer_text": item.answer_text,
        "explanation": item.explanation,
    })
}

fn batch_payload(batch: &[SolvedQuestion]) -> String {
    let values: Vec<JsonValue> = batch.iter().map(item_payload).collect();
    serde_json::to_string_pretty(&values).unwrap_or_default()
}

fn batch_prompt(payload: &str, language: &str, count: usize) -> String {
    format!(
        r#"
Translate the following solved MCQs to {language}.

RULES:
1. Return ONLY a JSON array with exactly {count} objects, in the same order as the input.
2. Keep every key and "question_number" unchanged; keep option "label" values unchanged.
3. Translate "question_text", option "text", "answer_text" and "explanation".
4. Keep mathematical symbols, numbers, and formulas as-is.
5. Translate ALL questions in the batch - do not skip any.

INPUT:
{payload}
"#
    )
}

fn single_prompt(item: &SolvedQuestion, language: &str) -> String {
    let payload = serde_json::to_string_pretty(&item_payload(item)).unwrap_or_default();
    format!(
        r#"
Translate the following solved MCQ into {language}.

Keep all numbers, symbols, and math expressions unchanged.
Return output strictly as a single JSON object with the same keys as the input.

{payload}
"#
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// 合并译文，缺失字段保持为 None（展示时回退到原文）
fn merge_translation(original: &SolvedQuestion, value: JsonValue, language: &str) -> TranslatedQuestion {
    let fields: TranslatedFields = serde_json::from_value(value).unwrap_or_default();

    let options = fields
        .options
        .map(|raw| normalize_options(&raw))
        .filter(|opts| !opts.is_empty());

    TranslatedQuestion {
        original: original.clone(),
        language: language.to_string(),
        question_text: non_empty(fields.question_text),
        options,
        answer_text: non_empty(fields.answer_text),
        explanation: non_empty(fields.explanation),
        translation_error: None,
    }
}
