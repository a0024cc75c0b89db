//! 任务数据模型
//!
//! `Job` 是可追踪的异步工作单元；`JobView` / `JobSummary` 是给轮询客户端的序列化视图。

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 日志环形缓冲区容量
pub const MAX_LOG_ENTRIES: usize = 100;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    PdfTranslation,
    SolutionGeneration,
    McqGeneration,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PdfTranslation => "pdf_translation",
            JobType::SolutionGeneration => "solution_generation",
            JobType::McqGeneration => "mcq_generation",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf_translation" => Ok(JobType::PdfTranslation),
            "solution_generation" => Ok(JobType::SolutionGeneration),
            "mcq_generation" => Ok(JobType::McqGeneration),
            other => Err(format!("unknown job type: {}", other)),
        }
    }
}

/// 任务状态
///
/// `pending → processing → {completed | failed}`，后两者为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// 流水线阶段，由调用方显式传入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FileUpload,
    Extraction,
    Segmentation,
    Solving,
    Translation,
    Rendering,
    DocumentGeneration,
    McqGeneration,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::FileUpload => "file_upload",
            Stage::Extraction => "extraction",
            Stage::Segmentation => "segmentation",
            Stage::Solving => "solving",
            Stage::Translation => "translation",
            Stage::Rendering => "rendering",
            Stage::DocumentGeneration => "document_generation",
            Stage::McqGeneration => "mcq_generation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// 单条任务日志，追加后不可变
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// 形如 `[12.3s (4.1s)]` 或 `[12.3s]`
    pub time: String,
    pub message: String,
    #[serde(rename = "type")]
    pub level: LogLevel,
    /// 当前阶段已用时间（秒），没有打开的阶段时为 null
    pub elapsed: Option<f64>,
    /// 任务总用时（秒）
    pub total_elapsed: f64,
}

/// 任务记录
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub logs: VecDeque<LogEntry>,
    pub current_stage: Option<Stage>,
    pub stage_start_time: Option<Instant>,
    pub job_start_time: Option<Instant>,
    pub debug_data: BTreeMap<String, JsonValue>,
}

impl Job {
    pub fn new(id: String, job_type: JobType, metadata: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type,
            status: JobStatus::Pending,
            progress: 0,
            message: "Job created, waiting to start...".to_string(),
            result: None,
            error: None,
            metadata,
            created_at: now,
            updated_at: now,
            logs: VecDeque::new(),
            current_stage: None,
            stage_start_time: None,
            job_start_time: None,
            debug_data: BTreeMap::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// 第一次写入生效，之后保持不变
    pub fn latch_start_time(&mut self, now: Instant) -> Instant {
        *self.job_start_time.get_or_insert(now)
    }

    /// 追加日志并维持环形缓冲区上限
    pub fn push_log(&mut self, message: impl Into<String>, level: LogLevel) {
        let now = Instant::now();
        let job_start = self.latch_start_time(now);
        let total_elapsed = now.duration_since(job_start).as_secs_f64();
        let elapsed = self
            .stage_start_time
            .map(|stage_start| now.duration_since(stage_start).as_secs_f64());

        self.logs.push_back(LogEntry {
            timestamp: Utc::now(),
            time: format_elapsed_label(total_elapsed, elapsed),
            message: message.into(),
            level,
            elapsed,
            total_elapsed,
        });

        while self.logs.len() > MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
    }

    pub fn to_view(&self) -> JobView {
        JobView {
            job_id: self.id.clone(),
            job_type: self.job_type,
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            metadata: self.metadata.clone(),
            current_stage: self.current_stage,
            created_at: self.created_at,
            updated_at: self.updated_at,
            logs: self.logs.iter().cloned().collect(),
            debug_data: self.debug_data.clone(),
        }
    }

    pub fn to_summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            job_type: self.job_type,
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// `[total s (stage s)]` 或 `[total s]`
pub fn format_elapsed_label(total_elapsed: f64, stage_elapsed: Option<f64>) -> String {
    match stage_elapsed {
        Some(stage) => format!("[{:.1}s ({:.1}s)]", total_elapsed, stage),
        None => format!("[{:.1}s]", total_elapsed),
    }
}

/// `GET /api/jobs/:id/status` 的响应体
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub metadata: JsonValue,
    pub current_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub logs: Vec<LogEntry>,
    pub debug_data: BTreeMap<String, JsonValue>,
}

/// 任务列表中的单项
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_label_formats() {
        assert_eq!(format_elapsed_label(12.34, Some(4.06)), "[12.3s (4.1s)]");
        assert_eq!(format_elapsed_label(0.0, None), "[0.0s]");
    }

    #[test]
    fn test_job_type_round_trips_through_str() {
        for job_type in [
            JobType::PdfTranslation,
            JobType::SolutionGeneration,
            JobType::McqGeneration,
        ] {
            assert_eq!(job_type.as_str().parse::<JobType>().unwrap(), job_type);
        }
        assert!("cancelled".parse::<JobType>().is_err());
    }

    #[test]
    fn test_push_log_latches_start_time_once() {
        let mut job = Job::new("j".into(), JobType::McqGeneration, JsonValue::Null);
        job.push_log("first", LogLevel::Info);
        let start = job.job_start_time;
        assert!(start.is_some());
        job.push_log("second", LogLevel::Info);
        assert_eq!(job.job_start_time, start);
        assert_eq!(job.logs[0].elapsed, None);
        assert!(job.logs[1].time.starts_with('['));
    }

    #[test]
    fn test_view_serializes_type_field() {
        let job = Job::new("abc".into(), JobType::SolutionGeneration, serde_json::json!({}));
        let value = serde_json::to_value(job.to_view()).unwrap();
        assert_eq!(value["type"], "solution_generation");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["result"], JsonValue::Null);
    }
}
