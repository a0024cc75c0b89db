use std::sync::Arc;

use axum::extract::{Extension, Multipart};
use axum::response::Response;
use serde_json::json;
use tracing::info;

use super::errors::{accepted, bad_request};
use super::upload::read_pdf_upload;
use crate::app::AppState;
use crate::models::{language_code, JobType};
use crate::orchestrator::PdfTranslationJob;
use crate::services::progress::JobReporter;

const DEFAULT_LANGUAGE: &str = "Hindi";

/// `POST /api/pdf/translate`
pub async fn translate_pdf(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Response {
    let upload = match read_pdf_upload(multipart, DEFAULT_LANGUAGE).await {
        Ok(upload) => upload,
        Err(response) => return response,
    };
    if language_code(&upload.target_language).is_none() {
        return bad_request(format!("Unsupported language: {}", upload.target_language));
    }

    let job_id = state.store.create(
        JobType::PdfTranslation,
        json!({
            "filename": upload.filename,
            "target_language": upload.target_language,
        }),
    );
    info!("📥 新的 PDF 翻译任务 {} ({} bytes)", job_id, upload.bytes.len());

    let job = PdfTranslationJob {
        job_id: job_id.clone(),
        filename: upload.filename,
        pdf_bytes: upload.bytes,
        target_language: upload.target_language,
    };
    let pipeline = state.translations.clone();
    let reporter = JobReporter::new(state.store.clone(), job_id.clone());
    state
        .runner
        .spawn(job_id.clone(), "PDF translation", async move {
            pipeline.run(job, &reporter).await
        });

    accepted(&job_id, "PDF translation job created")
}
