//! 按主题生成选择题

use serde_json::Value as JsonValue;
use tracing::debug;

use super::json_repair::{outermost_array_span, sanitize_json};
use super::normalizer::scalar_to_string;
use crate::error::PipelineError;
use crate::models::{GeneratedMcq, QuestionOption};

pub const MIN_QUESTIONS: u32 = 1;
pub const MAX_QUESTIONS: u32 = 25;
pub const DEFAULT_QUESTIONS: u32 = 5;

/// 构建生成提示词；非英文时要求全部内容使用目标语言
pub fn build_mcq_prompt(topic: &str, num_questions: u32, language: &str) -> String {
    if language.eq_ignore_ascii_case("english") {
        format!(
            "\nGenerate {num_questions} high-quality MCQs on \"{topic}\".\n\
             Return JSON array with fields question, options, correct_answer, explanation.\n\
             Language: English.\n"
        )
    } else {
        format!(
            "\nGenerate {num_questions} high-quality MCQs on \"{topic}\" in {language} language.\n\
             Return JSON array with fields question, options, correct_answer, explanation.\n\
             All content must be in {language} language.\n"
        )
    }
}

/// 选项可能是对象（标签 → 文本）或字符串数组（按顺序标为 A、B、C…）
pub fn iter_options(raw_options: &JsonValue) -> Vec<QuestionOption> {
    match raw_options {
        JsonValue::Object(map) => map
            .iter()
            .filter_map(|(label, text)| {
                scalar_to_string(text).map(|text| QuestionOption::new(label.as_str(), text))
            })
            .collect(),
        JsonValue::Array(list) => list
            .iter()
            .enumerate()
            .filter_map(|(idx, value)| {
                let text = value.as_str()?;
                let label = char::from_u32('A' as u32 + idx as u32)?;
                Some(QuestionOption::new(label.to_string(), text))
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// 解析模型输出中的最外层 JSON 数组
pub fn parse_mcqs(raw_text: &str) -> Result<Vec<GeneratedMcq>, PipelineError> {
    let span = outermost_array_span(raw_text).ok_or(PipelineError::McqParse)?;
    let items: Vec<JsonValue> = serde_json::from_str(span)
        .or_else(|_| serde_json::from_str(&sanitize_json(span)))
        .map_err(|_| PipelineError::McqParse)?;

    if items.is_empty() {
        return Err(PipelineError::McqParse);
    }

    let mcqs: Vec<GeneratedMcq> = items
        .iter()
        .map(|item| {
            let field = |key: &str| {
                item.get(key)
                    .and_then(scalar_to_string)
                    .unwrap_or_default()
            };
            GeneratedMcq {
                question: field("question"),
                options: iter_options(item.get("options").unwrap_or(&JsonValue::Null)),
                answer: field("correct_answer"),
                explanation: field("explanation"),
            }
        })
        .collect();

    debug!("解析出 {} 道选择题", mcqs.len());
    Ok(mcqs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_mentions_language() {
        let english = build_mcq_prompt("Fractions", 5, "English");
        assert!(english.contains("Generate 5 high-quality MCQs on \"Fractions\"."));
        assert!(english.contains("Language: English."));

        let hindi = build_mcq_prompt("Fractions", 3, "Hindi");
        assert!(hindi.contains("in Hindi language"));
        assert!(hindi.contains("All content must be in Hindi language."));
    }

    #[test]
    fn test_iter_options_list_and_map() {
        let from_list = iter_options(&json!(["x", "y", 3, "z"]));
        let labels: Vec<&str> = from_list.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "B", "D"]);

        let from_map = iter_options(&json!({"A": "one", "B": "two"}));
        assert_eq!(from_map, vec![QuestionOption::new("A", "one"), QuestionOption::new("B", "two")]);
    }

    #[test]
    fn test_parse_mcqs_from_prose() {
        let raw = r#"Sure! [{"question": "1/2 + 1/2?", "options": ["1", "2"], "correct_answer": "A", "explanation": "Halves add to one."}] Enjoy."#;
        let mcqs = parse_mcqs(raw).unwrap();
        assert_eq!(mcqs.len(), 1);
        assert_eq!(mcqs[0].answer, "A");
        assert_eq!(mcqs[0].options[1], QuestionOption::new("B", "2"));
    }

    #[test]
    fn test_parse_mcqs_failure() {
        assert!(matches!(parse_mcqs("no json here"), Err(PipelineError::McqParse)));
        assert!(matches!(parse_mcqs("[]"), Err(PipelineError::McqParse)));
    }
}
