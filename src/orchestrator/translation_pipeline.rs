//! PDF 翻译流水线：保存上传文件 → 外部工具翻译 → 返回单语 / 双语 PDF 路径

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::info;

use super::{prepare_job_dir, save_artifact};
use crate::config::Config;
use crate::error::{AppResult, PipelineError};
use crate::models::{language_code, LogLevel, Stage};
use crate::services::pdf_translator::{PdfTranslationRequest, PdfTranslator};
use crate::services::progress::ProgressSink;

/// 一次 PDF 翻译任务的输入
#[derive(Debug, Clone)]
pub struct PdfTranslationJob {
    pub job_id: String,
    pub filename: String,
    pub pdf_bytes: Vec<u8>,
    pub target_language: String,
}

pub struct TranslationPipeline {
    translator: Arc<dyn PdfTranslator>,
    jobs_root: PathBuf,
}

impl TranslationPipeline {
    pub fn new(config: &Config, translator: Arc<dyn PdfTranslator>) -> Self {
        Self {
            translator,
            jobs_root: PathBuf::from(&config.jobs_root),
        }
    }

    pub async fn run(
        &self,
        job: PdfTranslationJob,
        progress: &dyn ProgressSink,
    ) -> AppResult<JsonValue> {
        let PdfTranslationJob {
            job_id,
            filename,
            pdf_bytes,
            target_language,
        } = job;
        let lang_code = language_code(&target_language)
            .ok_or_else(|| PipelineError::UnsupportedLanguage(target_language.clone()))?;

        info!("🚀 开始 PDF 翻译任务 {} ({} → {})", job_id, filename, lang_code);
        progress.log(&format!("📄 PDF file received: {}", filename), LogLevel::Info);
        progress.log(&format!("🌍 Target language: {}", target_language), LogLevel::Info);

        progress.report(2, "Uploading PDF...", Stage::FileUpload);
        let job_dir = prepare_job_dir(&self.jobs_root, &job_id).await?;
        let input_pdf = job_dir.join("input.pdf");
        save_artifact(&input_pdf, &pdf_bytes).await?;

        let request = PdfTranslationRequest {
            input_pdf,
            output_dir: job_dir.clone(),
            target_language: target_language.clone(),
            lang_code: lang_code.to_string(),
        };
        let output = self.translator.translate(&request, progress).await?;

        let path_string = |path: &Option<PathBuf>| path.as_ref().map(|p| p.display().to_string());
        info!(
            "✅ PDF 翻译任务 {} 完成 (mono: {}, dual: {})",
            job_id,
            output.mono_pdf_path.is_some(),
            output.dual_pdf_path.is_some()
        );

        Ok(json!({
            "job_dir": job_dir.display().to_string(),
            "mono_pdf_path": path_string(&output.mono_pdf_path),
            "dual_pdf_path": path_string(&output.dual_pdf_path),
            "lang_code": lang_code,
            "lang_label": target_language,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pdf_translator::PdfTranslationOutput;
    use crate::services::progress::NoopProgress;
    use async_trait::async_trait;

    /// 把输入文件复制成 mono 结果
    struct CopyTranslator;

    #[async_trait]
    impl PdfTranslator for CopyTranslator {
        async fn translate(
            &self,
            request: &PdfTranslationRequest,
            progress: &dyn ProgressSink,
        ) -> Result<PdfTranslationOutput, PipelineError> {
            progress.report(50, "Translating pages 50%", Stage::Translation);
            let mono = request
                .output_dir
                .join(format!("input.{}.mono.pdf", request.lang_code));
            tokio::fs::copy(&request.input_pdf, &mono)
                .await
                .map_err(|e| PipelineError::Translation(e.to_string()))?;
            Ok(PdfTranslationOutput {
                mono_pdf_path: Some(mono),
                dual_pdf_path: None,
            })
        }
    }

    fn job(language: &str) -> PdfTranslationJob {
        PdfTranslationJob {
            job_id: "pdf-1".into(),
            filename: "notes.pdf".into(),
            pdf_bytes: b"%PDF-1.4".to_vec(),
            target_language: language.into(),
        }
    }

    #[tokio::test]
    async fn test_result_carries_output_paths() {
        let root = std::env::temp_dir().join(format!("translate-test-{}", uuid::Uuid::new_v4()));
        let config = Config {
            jobs_root: root.display().to_string(),
            ..Config::default()
        };
        let pipeline = TranslationPipeline::new(&config, Arc::new(CopyTranslator));

        let result = pipeline.run(job("Hindi"), &NoopProgress).await.unwrap();
        assert_eq!(result["lang_code"], json!("hi"));
        assert_eq!(result["dual_pdf_path"], JsonValue::Null);
        assert!(result["mono_pdf_path"]
            .as_str()
            .unwrap()
            .ends_with("input.hi.mono.pdf"));

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_unknown_language_is_rejected() {
        let config = Config::default();
        let pipeline = TranslationPipeline::new(&config, Arc::new(CopyTranslator));
        let err = pipeline.run(job("Klingon"), &NoopProgress).await.unwrap_err();
        assert_eq!(err.to_string(), "Unsupported language: Klingon");
    }
}
