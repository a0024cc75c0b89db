//! # Study Assistant
//!
//! 学习助手后端：把上传的试卷解成带解析的文档、按主题生成选择题、保留版式翻译 PDF。
//! 所有耗时工作都是可轮询的后台任务。
//!
//! ## 架构设计
//!
//! ### ① 数据模型（Models）
//! - `models/` - 任务、题目、选择题、语言表
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `JobStore` - 任务状态机，唯一的共享可变结构
//! - `RateLimitedGateway` - 串行化的生成模型调用，配额错误自动重试
//! - `segmenter` / `normalizer` / `translator` - 分题、答案归一化、翻译
//!
//! ### ③ 编排层（Orchestration）
//! - `orchestrator/batch_solver` - 分批解题，单批失败不影响其他批次
//! - `orchestrator/*_pipeline` - 三种任务的完整流程
//! - `orchestrator/runner` - 后台执行并写入终态
//!
//! ### ④ 接口层（API）
//! - `api/` - axum 路由：创建任务、轮询状态、下载产物
//!
//! ## 模块结构

pub mod api;
pub mod app;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use app::{App, AppState};
pub use config::Config;
pub use error::{AppError, AppResult, GatewayError, PipelineError};
pub use models::{Job, JobStatus, JobType, LogLevel, Stage};
pub use services::{JobStore, JobUpdate, ProgressSink, TextGenerator};
