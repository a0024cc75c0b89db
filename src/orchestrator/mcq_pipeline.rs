//! 选择题生成流水线：主题 → 提示词 → 解析 → 文档

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::info;

use super::{prepare_job_dir, save_artifact};
use crate::config::Config;
use crate::error::AppResult;
use crate::models::{LogLevel, Stage};
use crate::services::document::{mcq_display_lines, DocumentBuilder};
use crate::services::gateway::TextGenerator;
use crate::services::mcq::{build_mcq_prompt, parse_mcqs};
use crate::services::progress::ProgressSink;

/// 一次选择题任务的输入
#[derive(Debug, Clone)]
pub struct McqJob {
    pub job_id: String,
    pub topic: String,
    pub num_questions: u32,
    pub language: String,
}

pub struct McqPipeline {
    gateway: Arc<dyn TextGenerator>,
    documents: Arc<dyn DocumentBuilder>,
    jobs_root: PathBuf,
}

impl McqPipeline {
    pub fn new(
        config: &Config,
        gateway: Arc<dyn TextGenerator>,
        documents: Arc<dyn DocumentBuilder>,
    ) -> Self {
        Self {
            gateway,
            documents,
            jobs_root: PathBuf::from(&config.jobs_root),
        }
    }

    pub async fn run(&self, job: McqJob, progress: &dyn ProgressSink) -> AppResult<JsonValue> {
        let McqJob {
            job_id,
            topic,
            num_questions,
            language,
        } = job;

        info!("🚀 开始选择题任务 {} ({} x{}, {})", job_id, topic, num_questions, language);
        progress.log(&format!("📚 Topic: {}", topic), LogLevel::Info);
        progress.log(&format!("🌍 Language: {}", language), LogLevel::Info);

        progress.report(
            10,
            &format!("Generating {} MCQs...", num_questions),
            Stage::McqGeneration,
        );
        let prompt = build_mcq_prompt(&topic, num_questions, &language);
        let raw = self.gateway.generate(&prompt).await?;
        progress.debug("mcq_raw_response", json!(raw));

        let mcqs = parse_mcqs(&raw)?;
        progress.log(
            &format!("✅ Generated {} MCQs successfully", mcqs.len()),
            LogLevel::Success,
        );
        progress.report(60, "MCQs generated", Stage::McqGeneration);

        progress.report(80, "Creating Word document...", Stage::DocumentGeneration);
        let lines = mcq_display_lines(&topic, &language, &mcqs);
        let bytes = self
            .documents
            .build(&format!("MCQs - {}", topic), &lines)?;
        let job_dir = prepare_job_dir(&self.jobs_root, &job_id).await?;
        let docx_path = job_dir.join(format!("mcqs.{}", self.documents.extension()));
        save_artifact(&docx_path, &bytes).await?;

        info!("✅ 选择题任务 {} 完成: {} 道题", job_id, mcqs.len());

        Ok(json!({
            "topic": topic,
            "language": language,
            "num_questions": mcqs.len(),
            "mcqs": mcqs,
            "docx_path": docx_path.display().to_string(),
            "docx_size": bytes.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, GatewayError, PipelineError};
    use crate::services::document::DocxBuilder;
    use crate::services::progress::NoopProgress;
    use async_trait::async_trait;

    struct Fixed(Result<String, GatewayError>);

    #[async_trait]
    impl TextGenerator for Fixed {
        async fn generate(&self, _prompt: &str) -> Result<String, GatewayError> {
            self.0.clone()
        }
    }

    fn pipeline(root: &std::path::Path, reply: Result<String, GatewayError>) -> McqPipeline {
        let config = Config {
            jobs_root: root.display().to_string(),
            ..Config::default()
        };
        McqPipeline::new(&config, Arc::new(Fixed(reply)), Arc::new(DocxBuilder))
    }

    fn job() -> McqJob {
        McqJob {
            job_id: "mcq-1".into(),
            topic: "Photosynthesis".into(),
            num_questions: 2,
            language: "English".into(),
        }
    }

    #[tokio::test]
    async fn test_generates_document_and_result() {
        let root = std::env::temp_dir().join(format!("mcq-test-{}", uuid::Uuid::new_v4()));
        let reply = r#"```json
[{"question": "Where does photosynthesis happen?", "options": {"A": "Chloroplast", "B": "Nucleus"}, "correct_answer": "A", "explanation": "Chlorophyll lives there."},
 {"question": "Which gas is released?", "options": ["Oxygen", "Nitrogen"], "correct_answer": "A", "explanation": "Water is split."}]
```"#;
        let result = pipeline(&root, Ok(reply.into()))
            .run(job(), &NoopProgress)
            .await
            .unwrap();

        assert_eq!(result["num_questions"], json!(2));
        assert_eq!(result["mcqs"][1]["options"][0]["label"], json!("A"));
        let path = PathBuf::from(result["docx_path"].as_str().unwrap());
        assert!(path.ends_with("mcq-1/mcqs.docx"));
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_unparseable_reply_fails() {
        let root = std::env::temp_dir().join(format!("mcq-test-{}", uuid::Uuid::new_v4()));
        let err = pipeline(&root, Ok("I cannot help with that.".into()))
            .run(job(), &NoopProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Pipeline(PipelineError::McqParse)));
        assert_eq!(err.to_string(), "Failed to parse MCQ output");
    }

    #[tokio::test]
    async fn test_gateway_error_propagates_message() {
        let root = std::env::temp_dir().join(format!("mcq-test-{}", uuid::Uuid::new_v4()));
        let err = pipeline(&root, Err(GatewayError::Exhausted { attempts: 3 }))
            .run(job(), &NoopProgress)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "API request failed after 3 attempts. Please try again later."
        );
    }
}
