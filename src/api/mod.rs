//! HTTP 接口层（axum）
//!
//! 上传类接口只负责校验和创建任务，立即返回 202；实际处理交给 `JobRunner`。

pub mod errors;
pub mod jobs;
pub mod mcq;
pub mod pdf;
pub mod solution;
pub mod upload;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::app::AppState;

/// 上传文件大小上限
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(jobs::health))
        .route("/api/languages", get(jobs::languages))
        .route("/api/jobs", get(jobs::list_jobs))
        .route("/api/jobs/:job_id", delete(jobs::delete_job))
        .route("/api/jobs/:job_id/status", get(jobs::job_status))
        .route("/api/jobs/:job_id/download", get(jobs::download_result))
        .route("/api/solution/generate", post(solution::generate_solution))
        .route("/api/mcq/generate", post(mcq::generate_mcqs))
        .route("/api/pdf/translate", post(pdf::translate_pdf))
        .fallback(route_not_found)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(Extension(state))
}

async fn route_not_found() -> Response {
    errors::not_found("Not found")
}
