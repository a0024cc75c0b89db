//! 任务存储 - 业务能力层
//!
//! 内存中的任务注册表。整个 map 由一把 `std::sync::Mutex` 保护：
//! 所有写操作和多字段读取都在锁内完成，持锁时间只覆盖一次记录拷贝。
//!
//! 对未知任务 ID 的操作返回 `false` / `None`，从不 panic。
//! 处于终态（completed / failed）的任务拒绝任何后续修改。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Job, JobStatus, JobSummary, JobType, JobView, LogLevel, Stage};

/// 部分更新，未设置的字段保持不变
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<i64>,
    pub message: Option<String>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    /// 是否把 `message` 同时写入日志（高频进度更新时关闭）
    pub add_log_entry: bool,
}

impl Default for JobUpdate {
    fn default() -> Self {
        Self::new()
    }
}

impl JobUpdate {
    pub fn new() -> Self {
        Self {
            status: None,
            progress: None,
            message: None,
            result: None,
            error: None,
            add_log_entry: true,
        }
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: i64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn result(mut self, result: JsonValue) -> Self {
        self.result = Some(result);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn without_log(mut self) -> Self {
        self.add_log_entry = false;
        self
    }

    /// 完成任务：状态、结果、进度 100 一起写入
    pub fn completed(result: JsonValue, message: impl Into<String>) -> Self {
        Self::new()
            .status(JobStatus::Completed)
            .progress(100)
            .message(message)
            .result(result)
    }

    /// 任务失败：状态和错误一起写入
    pub fn failed(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new()
            .status(JobStatus::Failed)
            .message(message)
            .error(error)
            .without_log()
    }
}

/// 线程安全的任务存储
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        // 持锁期间不会 panic，中毒时直接取回数据
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 在锁内修改一个未结束的任务，返回是否找到并修改
    fn mutate_active(&self, job_id: &str, op: &str, f: impl FnOnce(&mut Job)) -> bool {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            debug!("{} 跳过: 任务 {} 不存在", op, job_id);
            return false;
        };
        if job.is_finished() {
            warn!("{} 被拒绝: 任务 {} 已处于终态 {:?}", op, job_id, job.status);
            return false;
        }
        f(job);
        job.updated_at = Utc::now();
        true
    }

    /// 创建任务，返回新的任务 ID
    pub fn create(&self, job_type: JobType, metadata: JsonValue) -> String {
        let job_id = Uuid::new_v4().to_string();
        let job = Job::new(job_id.clone(), job_type, metadata);
        self.lock().insert(job_id.clone(), job);
        debug!("创建任务 {} ({})", job_id, job_type);
        job_id
    }

    /// 获取任务快照
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.lock().get(job_id).cloned()
    }

    /// 获取任务的序列化视图
    pub fn view(&self, job_id: &str) -> Option<JobView> {
        self.lock().get(job_id).map(Job::to_view)
    }

    /// 部分更新任务
    ///
    /// - `progress` 被限制在 [0, 100]，且不会回退
    /// - `completed` 必须同时带 `result`，`failed` 必须同时带 `error`
    /// - 非空 `error` 总会追加一条 error 日志
    pub fn update(&self, job_id: &str, update: JobUpdate) -> bool {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            debug!("update 跳过: 任务 {} 不存在", job_id);
            return false;
        };

        if job.is_finished() {
            warn!("update 被拒绝: 任务 {} 已处于终态 {:?}", job_id, job.status);
            return false;
        }

        let next_status = update.status.unwrap_or(job.status);
        if let Some(reason) = invalid_transition(job.status, next_status, &update) {
            warn!("update 被拒绝: 任务 {} {}", job_id, reason);
            return false;
        }

        let now = Instant::now();
        if next_status != JobStatus::Pending {
            job.latch_start_time(now);
        }
        job.status = next_status;

        if let Some(progress) = update.progress {
            let clamped = progress.clamp(0, 100) as u8;
            job.progress = job.progress.max(clamped);
        }

        if let Some(message) = update.message {
            if update.add_log_entry && !message.is_empty() {
                let level = if next_status == JobStatus::Failed {
                    LogLevel::Error
                } else {
                    LogLevel::Info
                };
                job.push_log(message.clone(), level);
            }
            job.message = message;
        }

        if let Some(result) = update.result {
            job.result = Some(result);
        }

        if let Some(error) = update.error {
            if !error.is_empty() {
                job.push_log(format!("Error: {}", error), LogLevel::Error);
            }
            job.error = Some(error);
        }

        job.updated_at = Utc::now();
        true
    }

    /// 追加一条日志
    pub fn add_log(&self, job_id: &str, message: impl Into<String>, level: LogLevel) -> bool {
        let message = message.into();
        self.mutate_active(job_id, "add_log", |job| job.push_log(message, level))
    }

    /// 结束上一个阶段（记录耗时）并开始新阶段
    pub fn start_stage(&self, job_id: &str, stage: Stage) -> bool {
        self.mutate_active(job_id, "start_stage", |job| {
            let now = Instant::now();
            job.latch_start_time(now);

            if let Some(stage_start) = job.stage_start_time {
                let elapsed = now.duration_since(stage_start).as_secs_f64();
                let previous = job
                    .current_stage
                    .map(|s| s.as_str())
                    .unwrap_or("previous stage");
                job.push_log(
                    format!("✓ {} completed in {:.1}s", previous, elapsed),
                    LogLevel::Success,
                );
            }

            job.stage_start_time = Some(now);
            job.current_stage = Some(stage);
        })
    }

    /// 保存调试数据（提示词、原始响应等）
    pub fn set_debug_data(&self, job_id: &str, key: impl Into<String>, value: JsonValue) -> bool {
        let key = key.into();
        self.mutate_active(job_id, "set_debug_data", |job| {
            job.debug_data.insert(key, value);
        })
    }

    /// 删除任务，返回任务是否存在
    pub fn delete(&self, job_id: &str) -> bool {
        self.lock().remove(job_id).is_some()
    }

    /// 按创建时间倒序列出任务
    pub fn list(&self, job_type: Option<JobType>, limit: usize) -> Vec<JobSummary> {
        let jobs = self.lock();
        let mut summaries: Vec<JobSummary> = jobs
            .values()
            .filter(|job| job_type.map_or(true, |t| job.job_type == t))
            .map(Job::to_summary)
            .collect();
        drop(jobs);

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit);
        summaries
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 检查状态迁移是否合法，返回拒绝原因
fn invalid_transition(
    current: JobStatus,
    next: JobStatus,
    update: &JobUpdate,
) -> Option<&'static str> {
    if next == JobStatus::Pending && current != JobStatus::Pending {
        return Some("不能回到 pending");
    }
    if current == JobStatus::Pending && next.is_terminal() {
        return Some("pending 必须先进入 processing");
    }
    if update.result.is_some() && next != JobStatus::Completed {
        return Some("result 只能随 completed 一起设置");
    }
    if update.error.is_some() && next != JobStatus::Failed {
        return Some("error 只能随 failed 一起设置");
    }
    if next == JobStatus::Completed && update.result.is_none() {
        return Some("completed 缺少 result");
    }
    if next == JobStatus::Failed && update.error.is_none() {
        return Some("failed 缺少 error");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MAX_LOG_ENTRIES;
    use serde_json::json;
    use std::thread;

    fn processing_job(store: &JobStore) -> String {
        let id = store.create(JobType::SolutionGeneration, json!({"filename": "paper.pdf"}));
        assert!(store.update(&id, JobUpdate::new().status(JobStatus::Processing).without_log()));
        id
    }

    #[test]
    fn test_create_starts_pending_and_empty() {
        let store = JobStore::new();
        let id = store.create(JobType::McqGeneration, json!({"topic": "ratios"}));
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.logs.is_empty());
        assert!(job.debug_data.is_empty());
        assert!(job.result.is_none() && job.error.is_none());
        assert!(job.job_start_time.is_none());
    }

    #[test]
    fn test_unknown_id_is_safe() {
        let store = JobStore::new();
        assert!(!store.update("missing", JobUpdate::new().progress(10)));
        assert!(store.get("missing").is_none());
        assert!(!store.add_log("missing", "x", LogLevel::Info));
        assert!(!store.start_stage("missing", Stage::Solving));
        assert!(!store.set_debug_data("missing", "k", json!(1)));
        assert!(!store.delete("missing"));
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let store = JobStore::new();
        let id = processing_job(&store);

        store.update(&id, JobUpdate::new().progress(250).without_log());
        assert_eq!(store.get(&id).unwrap().progress, 100);

        let id = processing_job(&store);
        store.update(&id, JobUpdate::new().progress(-5).without_log());
        assert_eq!(store.get(&id).unwrap().progress, 0);

        store.update(&id, JobUpdate::new().progress(40).without_log());
        store.update(&id, JobUpdate::new().progress(20).without_log());
        assert_eq!(store.get(&id).unwrap().progress, 40);
    }

    #[test]
    fn test_processing_latches_start_time_once() {
        let store = JobStore::new();
        let id = processing_job(&store);
        let first = store.get(&id).unwrap().job_start_time;
        assert!(first.is_some());
        store.update(&id, JobUpdate::new().status(JobStatus::Processing).without_log());
        store.start_stage(&id, Stage::Extraction);
        assert_eq!(store.get(&id).unwrap().job_start_time, first);
    }

    #[test]
    fn test_message_logging_flag() {
        let store = JobStore::new();
        let id = processing_job(&store);
        store.update(&id, JobUpdate::new().message("tick").without_log());
        assert!(store.get(&id).unwrap().logs.is_empty());
        store.update(&id, JobUpdate::new().message("milestone"));
        let job = store.get(&id).unwrap();
        assert_eq!(job.message, "milestone");
        assert_eq!(job.logs.len(), 1);
        assert_eq!(job.logs[0].level, LogLevel::Info);
    }

    #[test]
    fn test_failed_sets_error_and_logs() {
        let store = JobStore::new();
        let id = processing_job(&store);
        assert!(store.update(&id, JobUpdate::failed("boom", "Solution generation failed: boom")));
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result.is_none());
        let last = job.logs.back().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert_eq!(last.message, "Error: boom");
    }

    #[test]
    fn test_terminal_exclusivity_is_enforced() {
        let store = JobStore::new();
        let id = processing_job(&store);

        // completed 不带 result / result 不带 completed 都被拒绝
        assert!(!store.update(&id, JobUpdate::new().status(JobStatus::Completed)));
        assert!(!store.update(&id, JobUpdate::new().result(json!({"x": 1}))));
        assert!(!store.update(&id, JobUpdate::new().error("oops")));
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Processing);

        assert!(store.update(&id, JobUpdate::completed(json!({"ok": true}), "done")));
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());
        assert_eq!(job.result, Some(json!({"ok": true})));
    }

    #[test]
    fn test_pending_cannot_skip_processing() {
        let store = JobStore::new();
        let id = store.create(JobType::PdfTranslation, json!({}));

        assert!(!store.update(&id, JobUpdate::completed(json!({"ok": true}), "done")));
        assert!(!store.update(&id, JobUpdate::failed("boom", "failed")));
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none() && job.error.is_none());
        assert!(job.job_start_time.is_none());

        assert!(store.update(&id, JobUpdate::new().status(JobStatus::Processing)));
        assert!(store.update(&id, JobUpdate::failed("boom", "failed")));
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_terminal_jobs_reject_mutation() {
        let store = JobStore::new();
        let id = processing_job(&store);
        store.update(&id, JobUpdate::completed(json!(1), "done"));
        let logs_before = store.get(&id).unwrap().logs.len();

        assert!(!store.update(&id, JobUpdate::failed("late", "late failure")));
        assert!(!store.add_log(&id, "late log", LogLevel::Info));
        assert!(!store.start_stage(&id, Stage::Rendering));
        assert!(!store.set_debug_data(&id, "k", json!("v")));

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
        assert_eq!(job.logs.len(), logs_before);
    }

    #[test]
    fn test_cannot_return_to_pending() {
        let store = JobStore::new();
        let id = processing_job(&store);
        assert!(!store.update(&id, JobUpdate::new().status(JobStatus::Pending)));
    }

    #[test]
    fn test_log_ring_buffer_keeps_most_recent() {
        let store = JobStore::new();
        let id = processing_job(&store);
        for i in 0..150 {
            store.add_log(&id, format!("log {}", i), LogLevel::Info);
        }
        let job = store.get(&id).unwrap();
        assert_eq!(job.logs.len(), MAX_LOG_ENTRIES);
        let messages: Vec<&str> = job.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages.first(), Some(&"log 50"));
        assert_eq!(messages.last(), Some(&"log 149"));
        for pair in messages.windows(2) {
            let a: usize = pair[0][4..].parse().unwrap();
            let b: usize = pair[1][4..].parse().unwrap();
            assert_eq!(a + 1, b);
        }
    }

    #[test]
    fn test_start_stage_closes_previous_stage() {
        let store = JobStore::new();
        let id = processing_job(&store);
        store.start_stage(&id, Stage::Extraction);
        store.add_log(&id, "extracting", LogLevel::Info);
        store.start_stage(&id, Stage::Solving);

        let job = store.get(&id).unwrap();
        assert_eq!(job.current_stage, Some(Stage::Solving));
        let entry = &job.logs[0];
        assert!(entry.elapsed.is_some());
        assert!(entry.time.contains('('));
        let closing = job.logs.back().unwrap();
        assert_eq!(closing.level, LogLevel::Success);
        assert!(closing.message.starts_with("✓ extraction completed in"));
    }

    #[test]
    fn test_log_without_stage_has_short_label() {
        let store = JobStore::new();
        let id = processing_job(&store);
        store.add_log(&id, "hello", LogLevel::Warning);
        let entry = store.get(&id).unwrap().logs[0].clone();
        assert!(entry.elapsed.is_none());
        assert!(!entry.time.contains('('));
        assert!(entry.total_elapsed >= 0.0);
    }

    #[test]
    fn test_debug_data_overwrites_key() {
        let store = JobStore::new();
        let id = processing_job(&store);
        store.set_debug_data(&id, "prompt", json!("a"));
        store.set_debug_data(&id, "prompt", json!("b"));
        assert_eq!(store.get(&id).unwrap().debug_data["prompt"], json!("b"));
    }

    #[test]
    fn test_list_filters_sorts_and_limits() {
        let store = JobStore::new();
        let first = store.create(JobType::McqGeneration, json!({}));
        thread::sleep(std::time::Duration::from_millis(5));
        let _pdf = store.create(JobType::PdfTranslation, json!({}));
        thread::sleep(std::time::Duration::from_millis(5));
        let third = store.create(JobType::McqGeneration, json!({}));

        let all = store.list(None, 50);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].job_id, third);

        let mcq = store.list(Some(JobType::McqGeneration), 50);
        assert_eq!(
            mcq.iter().map(|s| s.job_id.as_str()).collect::<Vec<_>>(),
            vec![third.as_str(), first.as_str()]
        );

        assert_eq!(store.list(None, 1).len(), 1);
    }

    #[test]
    fn test_delete_removes_job() {
        let store = JobStore::new();
        let id = store.create(JobType::PdfTranslation, json!({}));
        assert!(store.delete(&id));
        assert!(store.get(&id).is_none());
        assert!(!store.delete(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = JobStore::new();
        let ids: Vec<String> = (0..8).map(|_| processing_job(&store)).collect();

        let writers: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = store.clone();
                thread::spawn(move || {
                    for p in 0..=100 {
                        store.update(&id, JobUpdate::new().progress(p).message(format!("step {}", p)));
                    }
                    store.update(&id, JobUpdate::completed(json!({"id": id}), "done"));
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let ids = ids.clone();
                thread::spawn(move || {
                    let mut last = vec![0u8; ids.len()];
                    for _ in 0..200 {
                        for (i, id) in ids.iter().enumerate() {
                            let job = store.get(id).unwrap();
                            assert!(job.progress >= last[i]);
                            last[i] = job.progress;
                            if job.status == JobStatus::Completed {
                                assert!(job.error.is_none() && job.result.is_some());
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }

        for id in &ids {
            let job = store.get(id).unwrap();
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.logs.len(), MAX_LOG_ENTRIES);
        }
    }
}
