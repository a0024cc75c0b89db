//! 解题流水线
//!
//! 上传的 PDF → 抽取文本 → 分题 + 分批解题 → 翻译 → 解答文档。
//!
//! 进度区间：抽取 5%，解题 10-45%，翻译 50-80%，生成文档 90%。

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use super::batch_solver::BatchSolver;
use super::{prepare_job_dir, save_artifact, save_json};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{language_code, LogLevel, Stage};
use crate::services::document::{solution_display_lines, DocumentBuilder};
use crate::services::gateway::TextGenerator;
use crate::services::pdf_text;
use crate::services::progress::ProgressSink;
use crate::services::segmenter::segment_document;
use crate::services::translator::Translator;
use crate::utils::preview;

/// 一次解题任务的输入
#[derive(Debug, Clone)]
pub struct SolutionJob {
    pub job_id: String,
    pub filename: String,
    pub pdf_bytes: Vec<u8>,
    pub target_language: String,
}

pub struct SolutionPipeline {
    solver: BatchSolver,
    translator: Translator,
    documents: Arc<dyn DocumentBuilder>,
    jobs_root: PathBuf,
}

impl SolutionPipeline {
    pub fn new(
        config: &Config,
        gateway: Arc<dyn TextGenerator>,
        documents: Arc<dyn DocumentBuilder>,
    ) -> Self {
        Self {
            solver: BatchSolver::new(
                gateway.clone(),
                config.solver_batch_size,
                config.solver_char_limit,
            ),
            translator: Translator::new(
                gateway,
                config.translation_batch_size,
                config.translation_char_limit,
            ),
            documents,
            jobs_root: PathBuf::from(&config.jobs_root),
        }
    }

    pub async fn run(&self, job: SolutionJob, progress: &dyn ProgressSink) -> AppResult<JsonValue> {
        let SolutionJob {
            job_id,
            filename,
            pdf_bytes,
            target_language,
        } = job;
        let lang_lower = target_language.trim().to_lowercase();

        info!("🚀 开始解题任务 {} ({}, {})", job_id, filename, target_language);
        progress.log(&format!("📄 PDF file received: {}", filename), LogLevel::Info);
        progress.log(&format!("🌍 Target language: {}", target_language), LogLevel::Info);

        // 1. 保存上传文件
        progress.report(2, "Uploading PDF...", Stage::FileUpload);
        let job_dir = prepare_job_dir(&self.jobs_root, &job_id).await?;
        save_artifact(&job_dir.join("input.pdf"), &pdf_bytes).await?;

        // 2. 抽取文本（lopdf 是同步解析，放到阻塞线程）
        progress.report(5, "Extracting PDF...", Stage::Extraction);
        let pages = tokio::task::spawn_blocking(move || pdf_text::extract_pages(&pdf_bytes))
            .await
            .map_err(|e| AppError::Other(format!("PDF extraction task failed: {}", e)))??;
        let extracted_json = job_dir.join("extracted.json");
        let page_records: Vec<JsonValue> = pages
            .iter()
            .map(|(page, text)| json!({ "page": page, "text": text }))
            .collect();
        save_json(&extracted_json, &page_records).await?;

        let full_text = pdf_text::join_pages(&pages)?;
        progress.log(
            &format!(
                "📖 Extracted {} characters of text",
                full_text.chars().count()
            ),
            LogLevel::Info,
        );
        progress.debug("extracted_pdf_text", json!(full_text));

        // 3. 分题
        progress.report(8, "Segmenting questions...", Stage::Segmentation);
        let doc = segment_document(&full_text);
        progress.debug(
            "questions_text_after_key_removal",
            json!(doc.questions_text),
        );
        progress.debug("answer_key", serde_json::to_value(&doc.answer_key)?);
        progress.debug("segmented_question_blocks_count", json!(doc.blocks.len()));
        if !doc.answer_key.is_empty() {
            progress.log(
                &format!("🔑 Answer key found: {} entries", doc.answer_key.len()),
                LogLevel::Info,
            );
        }
        progress.log(
            &format!("🧩 Segmented {} question blocks", doc.blocks.len()),
            LogLevel::Info,
        );

        // 4. 解题
        progress.report(10, "Solving questions...", Stage::Solving);
        let solved = self.solver.solve(&doc, progress, (10, 45)).await?;
        let solved_json = job_dir.join("solved.json");
        save_json(&solved_json, &solved).await?;

        // 5. 翻译
        progress.report(
            50,
            &format!("Translating to {}...", target_language),
            Stage::Translation,
        );
        let translated = self
            .translator
            .translate_all(&solved, &target_language, progress, (50, 80))
            .await;
        let failed_items = translated
            .iter()
            .filter(|item| item.translation_error.is_some())
            .count();
        if failed_items > 0 {
            warn!("{} 道题翻译失败，保留原文", failed_items);
            progress.log(
                &format!("⚠️ {} questions kept untranslated", failed_items),
                LogLevel::Warning,
            );
        }
        let translated_json = job_dir.join("translated.json");
        save_json(&translated_json, &translated).await?;

        // 6. 生成文档
        progress.report(90, "Building DOCX output...", Stage::DocumentGeneration);
        let lines = solution_display_lines(&translated, &target_language);
        let title = format!("Solutions - {}", target_language);
        let bytes = self.documents.build(&title, &lines)?;
        let final_docx = job_dir.join(format!(
            "solutions_{}.{}",
            lang_lower,
            self.documents.extension()
        ));
        save_artifact(&final_docx, &bytes).await?;
        progress.log(
            &format!("📝 Document saved ({} bytes)", bytes.len()),
            LogLevel::Success,
        );

        info!(
            "✅ 解题任务 {} 完成: {} 道题, 文档 {}",
            job_id,
            translated.len(),
            final_docx.display()
        );
        if let Some(first) = translated.first() {
            info!("   首题预览: {}", preview(first.display_question(), 60));
        }

        Ok(json!({
            "job_dir": job_dir.display().to_string(),
            "extracted_json": extracted_json.display().to_string(),
            "solved_json": solved_json.display().to_string(),
            "translated_json": translated_json.display().to_string(),
            "final_docx": final_docx.display().to_string(),
            "docx_size": bytes.len(),
            "questions_count": translated.len(),
            "sample": translated.iter().take(5).collect::<Vec<_>>(),
            "language": target_language,
            "lang_code": language_code(&target_language),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GatewayError, PipelineError};
    use crate::services::document::DocxBuilder;
    use crate::services::progress::NoopProgress;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl TextGenerator for Unreachable {
        async fn generate(&self, _prompt: &str) -> Result<String, GatewayError> {
            Err(GatewayError::Permanent("unexpected call".into()))
        }
    }

    fn test_config(root: &std::path::Path) -> Config {
        Config {
            jobs_root: root.display().to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_pdf_fails_before_any_model_call() {
        let root = std::env::temp_dir().join(format!("solution-test-{}", uuid::Uuid::new_v4()));
        let pipeline = SolutionPipeline::new(
            &test_config(&root),
            Arc::new(Unreachable),
            Arc::new(DocxBuilder),
        );
        let job = SolutionJob {
            job_id: "job-1".into(),
            filename: "paper.pdf".into(),
            pdf_bytes: b"definitely not a pdf".to_vec(),
            target_language: "Telugu".into(),
        };

        let err = pipeline.run(job, &NoopProgress).await.unwrap_err();
        assert!(matches!(err, AppError::Pipeline(PipelineError::PdfLoad(_))));
        assert!(root.join("job-1").join("input.pdf").exists());

        let _ = std::fs::remove_dir_all(root);
    }
}
