use std::sync::Arc;

use axum::extract::{Extension, Multipart};
use axum::response::Response;
use serde_json::json;
use tracing::info;

use super::errors::accepted;
use super::upload::read_pdf_upload;
use crate::app::AppState;
use crate::models::JobType;
use crate::orchestrator::SolutionJob;
use crate::services::progress::JobReporter;

const DEFAULT_LANGUAGE: &str = "Telugu";

/// `POST /api/solution/generate`
pub async fn generate_solution(
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> Response {
    let upload = match read_pdf_upload(multipart, DEFAULT_LANGUAGE).await {
        Ok(upload) => upload,
        Err(response) => return response,
    };

    let job_id = state.store.create(
        JobType::SolutionGeneration,
        json!({
            "filename": upload.filename,
            "target_language": upload.target_language,
        }),
    );
    info!("📥 新的解题任务 {} ({} bytes)", job_id, upload.bytes.len());

    let job = SolutionJob {
        job_id: job_id.clone(),
        filename: upload.filename,
        pdf_bytes: upload.bytes,
        target_language: upload.target_language,
    };
    let pipeline = state.solutions.clone();
    let reporter = JobReporter::new(state.store.clone(), job_id.clone());
    state
        .runner
        .spawn(job_id.clone(), "Solution generation", async move {
            pipeline.run(job, &reporter).await
        });

    accepted(&job_id, "Solution generation job created")
}
