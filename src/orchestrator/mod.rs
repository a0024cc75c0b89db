//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 把能力层（services）串成完整的任务流水线，并负责在后台运行它们。
//!
//! ## 模块划分
//!
//! - `batch_solver` - 分批解题、修复 JSON、答案表覆盖
//! - `solution_pipeline` - 抽取 → 分题解题 → 翻译 → 生成文档
//! - `mcq_pipeline` - 按主题生成选择题并输出文档
//! - `translation_pipeline` - 保留版式的 PDF 翻译
//! - `runner` - 每个任务一个 tokio 任务，统一写入终态
//!
//! ## 层次关系
//!
//! ```text
//! api (HTTP 路由，创建任务)
//!     ↓
//! runner (后台执行，捕获错误 / panic / 超时)
//!     ↓
//! *_pipeline (单个任务的完整流程)
//!     ↓
//! services (能力层：gateway / segmenter / translator / document)
//! ```

pub mod batch_solver;
pub mod mcq_pipeline;
pub mod runner;
pub mod solution_pipeline;
pub mod translation_pipeline;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{AppError, AppResult};

pub use batch_solver::BatchSolver;
pub use mcq_pipeline::{McqJob, McqPipeline};
pub use runner::JobRunner;
pub use solution_pipeline::{SolutionJob, SolutionPipeline};
pub use translation_pipeline::{PdfTranslationJob, TranslationPipeline};

/// 创建任务输出目录 `<jobs_root>/<job_id>`
pub(crate) async fn prepare_job_dir(jobs_root: &Path, job_id: &str) -> AppResult<PathBuf> {
    let job_dir = jobs_root.join(job_id);
    tokio::fs::create_dir_all(&job_dir)
        .await
        .map_err(|e| AppError::file_write_failed(job_dir.display().to_string(), e))?;
    Ok(job_dir)
}

/// 写入产物文件
pub(crate) async fn save_artifact(path: &Path, bytes: &[u8]) -> AppResult<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))
}

/// 以格式化 JSON 写入中间结果
pub(crate) async fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> AppResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    save_artifact(path, &bytes).await
}
