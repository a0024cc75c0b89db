//! 进度上报
//!
//! 流水线只依赖 `ProgressSink`，不直接接触任务存储。
//! `JobReporter` 把上报转发到 `JobStore`，`NoopProgress` 用于单元测试。

use std::sync::Mutex;

use serde_json::Value as JsonValue;

use super::job_store::{JobStore, JobUpdate};
use crate::models::{LogLevel, Stage};

pub trait ProgressSink: Send + Sync {
    /// 上报进度（0-100）和当前阶段；阶段变化时自动结束上一阶段
    fn report(&self, progress: u8, message: &str, stage: Stage);

    /// 追加一条日志
    fn log(&self, message: &str, level: LogLevel);

    /// 保存调试数据
    fn debug(&self, key: &str, value: JsonValue);
}

/// 不做任何事的上报器
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _progress: u8, _message: &str, _stage: Stage) {}
    fn log(&self, _message: &str, _level: LogLevel) {}
    fn debug(&self, _key: &str, _value: JsonValue) {}
}

/// 绑定到单个任务的上报器
pub struct JobReporter {
    store: JobStore,
    job_id: String,
    current_stage: Mutex<Option<Stage>>,
}

impl JobReporter {
    pub fn new(store: JobStore, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
            current_stage: Mutex::new(None),
        }
    }

    fn enter_stage(&self, stage: Stage) {
        let mut current = self
            .current_stage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != Some(stage) {
            self.store.start_stage(&self.job_id, stage);
            *current = Some(stage);
        }
    }
}

impl ProgressSink for JobReporter {
    fn report(&self, progress: u8, message: &str, stage: Stage) {
        self.enter_stage(stage);
        self.store.update(
            &self.job_id,
            JobUpdate::new().progress(i64::from(progress)).message(message),
        );
    }

    fn log(&self, message: &str, level: LogLevel) {
        self.store.add_log(&self.job_id, message, level);
    }

    fn debug(&self, key: &str, value: JsonValue) {
        self.store.set_debug_data(&self.job_id, key, value);
    }
}

/// 把子任务进度 `done/total` 映射到总进度区间 `[start, end]`
pub fn scale_progress(start: u8, end: u8, done: usize, total: usize) -> u8 {
    if total == 0 || end <= start {
        return end.max(start);
    }
    let span = f64::from(end - start);
    let ratio = (done.min(total) as f64) / (total as f64);
    start + (span * ratio).round() as u8
}
