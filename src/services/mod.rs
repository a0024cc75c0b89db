//! 业务能力层（Services）
//!
//! 每个模块只描述"我能做什么"，不关心任务如何被调度：
//!
//! - `job_store` / `progress` - 任务状态机与进度上报
//! - `gateway` - 生成模型调用（串行化 + 配额重试）
//! - `segmenter` / `json_repair` / `normalizer` - 试卷分题与模型输出修复
//! - `translator` / `mcq` - 翻译与选择题生成
//! - `pdf_text` / `pdf_translator` / `document` - 文件输入输出

pub mod document;
pub mod gateway;
pub mod job_store;
pub mod json_repair;
pub mod mcq;
pub mod normalizer;
pub mod pdf_text;
pub mod pdf_translator;
pub mod progress;
pub mod segmenter;
pub mod translator;

pub use document::{DocumentBuilder, DocxBuilder};
pub use gateway::{RateLimitedGateway, RetryPolicy, TextGenerator};
pub use job_store::{JobStore, JobUpdate};
pub use pdf_translator::{Pdf2zhCli, PdfTranslationOutput, PdfTranslationRequest, PdfTranslator};
pub use progress::{JobReporter, NoopProgress, ProgressSink};
pub use segmenter::{segment_document, SegmentedDocument};
pub use translator::Translator;
