//! 后台任务执行器
//!
//! 每个任务一个 tokio 任务，发出后不等待。工作函数返回的错误、panic 和超时
//! 都在这里统一转换成 `failed`，成功结果转换成 `completed`。

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use serde_json::Value as JsonValue;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

use crate::error::{AppResult, PipelineError};
use crate::models::{JobStatus, LogLevel};
use crate::services::job_store::{JobStore, JobUpdate};

#[derive(Debug, Clone)]
pub struct JobRunner {
    store: JobStore,
    timeout: Option<Duration>,
}

impl JobRunner {
    pub fn new(store: JobStore, timeout: Option<Duration>) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// 在后台运行任务；返回的句柄只在测试中需要等待
    pub fn spawn<F>(&self, job_id: String, label: &'static str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = AppResult<JsonValue>> + Send + 'static,
    {
        let store = self.store.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            store.update(
                &job_id,
                JobUpdate::new()
                    .status(JobStatus::Processing)
                    .progress(0)
                    .message(format!("Starting {}...", label.to_lowercase()))
                    .without_log(),
            );
            info!("▶️ 任务 {} 开始执行 ({})", job_id, label);

            // 内层任务用于捕获 panic
            let handle = tokio::spawn(work);
            let abort = handle.abort_handle();
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, handle).await {
                    Ok(joined) => flatten(joined),
                    Err(_) => {
                        abort.abort();
                        Err(PipelineError::Timeout(limit).into())
                    }
                },
                None => flatten(handle.await),
            };

            finish(&store, &job_id, label, outcome);
        })
    }
}

fn flatten(joined: Result<AppResult<JsonValue>, JoinError>) -> anyhow::Result<JsonValue> {
    match joined {
        Ok(result) => result.map_err(anyhow::Error::from),
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow!("Worker panicked: {}", detail))
        }
        Err(join_err) => Err(anyhow!("Worker cancelled: {}", join_err)),
    }
}

fn finish(store: &JobStore, job_id: &str, label: &str, outcome: anyhow::Result<JsonValue>) {
    match outcome {
        Ok(result) => {
            info!("✅ 任务 {} 完成 ({})", job_id, label);
            store.add_log(
                job_id,
                format!("✅ {} completed successfully!", label),
                LogLevel::Success,
            );
            store.update(
                job_id,
                JobUpdate::completed(result, format!("{} completed successfully!", label))
                    .without_log(),
            );
        }
        Err(e) => {
            error!("❌ 任务 {} 失败 ({}): {:#}", job_id, label, e);
            store.add_log(job_id, format!("❌ {} failed: {}", label, e), LogLevel::Error);
            store.update(
                job_id,
                JobUpdate::failed(e.to_string(), format!("{} failed: {}", label, e)),
            );
        }
    }
}
