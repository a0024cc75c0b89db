use std::sync::Arc;

use axum::extract::Extension;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::errors::{accepted, bad_request};
use crate::app::AppState;
use crate::models::JobType;
use crate::orchestrator::McqJob;
use crate::services::mcq::{DEFAULT_QUESTIONS, MAX_QUESTIONS, MIN_QUESTIONS};
use crate::services::progress::JobReporter;

#[derive(Debug, Deserialize)]
pub struct McqRequest {
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_num_questions")]
    pub num_questions: i64,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_num_questions() -> i64 {
    i64::from(DEFAULT_QUESTIONS)
}

fn default_language() -> String {
    "English".to_string()
}

/// `POST /api/mcq/generate`
pub async fn generate_mcqs(
    Extension(state): Extension<Arc<AppState>>,
    body: Option<Json<McqRequest>>,
) -> Response {
    let Some(Json(request)) = body else {
        return bad_request("No JSON data provided");
    };

    let topic = request.topic.trim().to_string();
    if topic.is_empty() {
        return bad_request("Topic is required");
    }
    let num_questions = match u32::try_from(request.num_questions) {
        Ok(n) if (MIN_QUESTIONS..=MAX_QUESTIONS).contains(&n) => n,
        _ => {
            return bad_request(format!(
                "num_questions must be between {} and {}",
                MIN_QUESTIONS, MAX_QUESTIONS
            ))
        }
    };
    let language = match request.language.trim() {
        "" => default_language(),
        other => other.to_string(),
    };

    let job_id = state.store.create(
        JobType::McqGeneration,
        json!({
            "topic": topic,
            "num_questions": num_questions,
            "language": language,
        }),
    );
    info!("📥 新的选择题任务 {} ({} x{})", job_id, topic, num_questions);

    let job = McqJob {
        job_id: job_id.clone(),
        topic,
        num_questions,
        language,
    };
    let pipeline = state.mcqs.clone();
    let reporter = JobReporter::new(state.store.clone(), job_id.clone());
    state
        .runner
        .spawn(job_id.clone(), "MCQ generation", async move {
            pipeline.run(job, &reporter).await
        });

    accepted(&job_id, "MCQ generation job created")
}
