use serde::{Deserialize, Serialize};

use super::question::QuestionOption;

/// 按主题生成的选择题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedMcq {
    pub question: String,
    pub options: Vec<QuestionOption>,
    pub answer: String,
    pub explanation: String,
}
