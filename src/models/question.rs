use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 选项（标签 + 文本）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    pub text: String,
}

impl QuestionOption {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// 分题器产出的题目块，创建后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionBlock {
    pub question_number: String,
    pub question_text: String,
    pub options: Vec<QuestionOption>,
    /// 题号之后、下一题号之前的原始文本
    pub raw_block: String,
}

/// 试卷末尾的答案表：题号 → 正确选项数字
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerKey(BTreeMap<u32, String>);

impl AnswerKey {
    pub fn insert(&mut self, question: u32, option_digit: impl Into<String>) {
        self.0.insert(question, option_digit.into());
    }

    pub fn get(&self, question: u32) -> Option<&str> {
        self.0.get(&question).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(u32, String)> for AnswerKey {
    fn from_iter<T: IntoIterator<Item = (u32, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 答案来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveMethod {
    /// 模型给出的答案
    LlmJson,
    /// 答案表覆盖了模型的选择
    AnswerKey,
}

/// 归一化后的解题结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvedQuestion {
    pub question_number: String,
    pub question_text: String,
    pub options: Vec<QuestionOption>,
    pub answer_option: Option<String>,
    pub answer_text: String,
    pub explanation: String,
    pub section: Option<String>,
    pub method_used: SolveMethod,
}

impl SolvedQuestion {
    /// 正确选项对应的文本（按标签查找）
    pub fn correct_option_text(&self) -> Option<&str> {
        let label = self.answer_option.as_deref()?;
        self.options
            .iter()
            .find(|opt| opt.label == label)
            .map(|opt| opt.text.as_str())
    }
}

/// 翻译后的解题结果；翻译失败时保留原文并记录错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedQuestion {
    #[serde(flatten)]
    pub original: SolvedQuestion,
    pub language: String,
    #[serde(rename = "translated_question_text")]
    pub question_text: Option<String>,
    #[serde(rename = "translated_options")]
    pub options: Option<Vec<QuestionOption>>,
    #[serde(rename = "translated_answer_text")]
    pub answer_text: Option<String>,
    #[serde(rename = "translated_explanation")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_error: Option<String>,
}

impl TranslatedQuestion {
    pub fn untranslated(original: SolvedQuestion, language: &str, error: Option<String>) -> Self {
        Self {
            original,
            language: language.to_string(),
            question_text: None,
            options: None,
            answer_text: None,
            explanation: None,
            translation_error: error,
        }
    }

    pub fn display_question(&self) -> &str {
        self.question_text
            .as_deref()
            .unwrap_or(&self.original.question_text)
    }

    pub fn display_options(&self) -> &[QuestionOption] {
        match &self.options {
            Some(options) if !options.is_empty() => options,
            _ => &self.original.options,
        }
    }

    pub fn display_explanation(&self) -> &str {
        self.explanation
            .as_deref()
            .unwrap_or(&self.original.explanation)
    }

    pub fn display_answer_text(&self) -> &str {
        self.answer_text
            .as_deref()
            .unwrap_or(&self.original.answer_text)
    }
}
