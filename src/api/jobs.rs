//! 任务查询、删除、下载与语言列表

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, warn};

use super::errors::{bad_request, not_found};
use crate::app::AppState;
use crate::models::{JobStatus, JobType, LANGUAGES};
use crate::services::document::DOCX_CONTENT_TYPE;

const DEFAULT_LIST_LIMIT: usize = 50;

pub async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

pub async fn job_status(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    match state.store.view(&job_id) {
        Some(view) => Json(view).into_response(),
        None => not_found("Job not found"),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_jobs(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let job_type = match query.job_type.as_deref().filter(|t| !t.is_empty()) {
        Some(raw) => match raw.parse::<JobType>() {
            Ok(job_type) => Some(job_type),
            Err(_) => return bad_request("Unknown job type"),
        },
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let jobs = state.store.list(job_type, limit);
    Json(json!({ "jobs": jobs })).into_response()
}

pub async fn delete_job(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    if state.store.delete(&job_id) {
        debug!("删除任务 {}", job_id);
        Json(json!({ "deleted": true, "job_id": job_id })).into_response()
    } else {
        not_found("Job not found")
    }
}

pub async fn languages() -> Response {
    let languages: Map<String, JsonValue> = LANGUAGES
        .iter()
        .map(|(name, code)| (name.to_string(), json!(code)))
        .collect();
    let language_list: Vec<&str> = LANGUAGES.iter().map(|(name, _)| *name).collect();
    Json(json!({
        "languages": languages,
        "language_list": language_list,
    }))
    .into_response()
}

/// 可下载的任务产物
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArtifact {
    pub path: PathBuf,
    pub filename: String,
    pub content_type: &'static str,
}

/// 根据任务类型从结果中找到要下载的文件
pub fn download_artifact(job_type: JobType, result: &JsonValue) -> Option<DownloadArtifact> {
    let field = |key: &str| {
        result
            .get(key)
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
    };

    match job_type {
        JobType::PdfTranslation => {
            let lang_code = field("lang_code").unwrap_or("out");
            let (path, variant) = match (field("mono_pdf_path"), field("dual_pdf_path")) {
                (Some(mono), _) => (mono, "mono"),
                (None, Some(dual)) => (dual, "dual"),
                (None, None) => return None,
            };
            Some(DownloadArtifact {
                path: PathBuf::from(path),
                filename: format!("translated_{}_{}.pdf", lang_code, variant),
                content_type: "application/pdf",
            })
        }
        JobType::SolutionGeneration => {
            let language = field("language").unwrap_or("output").to_lowercase();
            Some(DownloadArtifact {
                path: PathBuf::from(field("final_docx")?),
                filename: format!("solutions_{}.docx", language),
                content_type: DOCX_CONTENT_TYPE,
            })
        }
        JobType::McqGeneration => {
            let topic = field("topic").unwrap_or("mcqs").replace(' ', "_");
            let language = field("language").unwrap_or("English");
            Some(DownloadArtifact {
                path: PathBuf::from(field("docx_path")?),
                filename: format!("mcqs_{}_{}.docx", topic, language),
                content_type: DOCX_CONTENT_TYPE,
            })
        }
    }
}

pub async fn download_result(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    let Some(job) = state.store.get(&job_id) else {
        return not_found("Job not found");
    };
    if job.status != JobStatus::Completed {
        return bad_request("Job not completed yet");
    }
    let Some(result) = job.result.as_ref() else {
        return not_found("No result available");
    };
    let Some(artifact) = download_artifact(job.job_type, result) else {
        return not_found("File not found");
    };

    let bytes = match tokio::fs::read(&artifact.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("读取产物失败 {}: {}", artifact.path.display(), e);
            return not_found("File not found");
        }
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.filename),
            ),
        ],
        bytes,
    )
        .into_response()
}
