//! 保留版式的 PDF 翻译
//!
//! 翻译本身交给外部 `pdf2zh` 命令；这里负责启动子进程、把输出行转换成进度、
//! 并在输出目录中找到单语 / 双语 PDF。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::progress::ProgressSink;
use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{LogLevel, Stage};
use crate::utils::truncate_text;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").expect("percent regex"));

/// 单次翻译请求
#[derive(Debug, Clone)]
pub struct PdfTranslationRequest {
    pub input_pdf: PathBuf,
    pub output_dir: PathBuf,
    pub target_language: String,
    pub lang_code: String,
}

/// 翻译产物
#[derive(Debug, Clone, Default, Serialize)]
pub struct PdfTranslationOutput {
    pub mono_pdf_path: Option<PathBuf>,
    pub dual_pdf_path: Option<PathBuf>,
}

#[async_trait]
pub trait PdfTranslator: Send + Sync {
    async fn translate(
        &self,
        request: &PdfTranslationRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PdfTranslationOutput, PipelineError>;
}

/// 根据工具输出判断当前阶段
pub fn classify_stage(line: &str) -> Stage {
    let lower = line.to_lowercase();
    if lower.contains("extract") || lower.contains("pars") {
        Stage::Extraction
    } else if lower.contains("translat") {
        Stage::Translation
    } else if ["render", "pdf", "save", "font"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        Stage::Rendering
    } else {
        Stage::Translation
    }
}

/// 从输出行中提取百分比（0-100）
pub fn parse_percent(line: &str) -> Option<u8> {
    let caps = PERCENT_RE.captures(line)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.clamp(0.0, 100.0) as u8)
}

/// 调用 `pdf2zh` 命令行
pub struct Pdf2zhCli {
    command: String,
    api_key: String,
    model_name: String,
}

impl Pdf2zhCli {
    pub fn new(config: &Config) -> Self {
        Self {
            command: config.pdf2zh_command.clone(),
            api_key: config.llm_api_key.clone(),
            model_name: config.llm_model_name.clone(),
        }
    }

    fn build_command(&self, request: &PdfTranslationRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg(&request.input_pdf)
            .arg("--lang-in")
            .arg("auto")
            .arg("--lang-out")
            .arg(&request.lang_code)
            .arg("--output")
            .arg(&request.output_dir)
            .arg("--gemini")
            .arg("--gemini-model")
            .arg(&self.model_name)
            .arg("--watermark-output-mode")
            .arg("no_watermark")
            .env("GEMINI_API_KEY", &self.api_key)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl PdfTranslator for Pdf2zhCli {
    async fn translate(
        &self,
        request: &PdfTranslationRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PdfTranslationOutput, PipelineError> {
        if self.api_key.trim().is_empty() {
            return Err(PipelineError::Translation(
                "API key not configured. Please set LLM_API_KEY in your environment.".to_string(),
            ));
        }

        info!(
            "📄 启动 {}: {} → {}",
            self.command,
            request.input_pdf.display(),
            request.target_language
        );
        progress.report(5, "🚀 Starting PDF translation process...", Stage::Translation);

        let mut child = self
            .build_command(request)
            .spawn()
            .map_err(|e| PipelineError::Translation(format!("无法启动 {}: {}", self.command, e)))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut tail: Vec<String> = Vec::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("pdf2zh stderr: {}", line);
                    tail.push(line);
                    if tail.len() > 20 {
                        tail.remove(0);
                    }
                }
                tail.join("\n")
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            let mut last_progress = 5u8;
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let stage = classify_stage(line);
                match parse_percent(line) {
                    Some(pct) => {
                        // 工具的 0-100 映射到任务的 5-95
                        let mapped = 5 + (u16::from(pct) * 90 / 100) as u8;
                        last_progress = last_progress.max(mapped);
                        progress.report(last_progress, line, stage);
                    }
                    None => progress.log(line, LogLevel::Info),
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| PipelineError::Translation(e.to_string()))?;
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            warn!("pdf2zh 退出码异常: {:?}", status.code());
            let detail = truncate_text(&stderr_tail, 300);
            return Err(PipelineError::Translation(format!(
                "{} exited with {}: {}",
                self.command, status, detail
            )));
        }

        let output = find_outputs(&request.output_dir).await?;
        if output.mono_pdf_path.is_none() && output.dual_pdf_path.is_none() {
            return Err(PipelineError::Translation(
                "Translation completed but returned no result.".to_string(),
            ));
        }
        Ok(output)
    }
}

/// 在输出目录中查找 `*.mono.pdf` 和 `*.dual.pdf`
pub async fn find_outputs(dir: &Path) -> Result<PdfTranslationOutput, PipelineError> {
    let mut output = PdfTranslationOutput::default();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PipelineError::Translation(format!("读取输出目录失败: {}", e)))?;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if name.ends_with(".mono.pdf") {
            output.mono_pdf_path = Some(path);
        } else if name.ends_with(".dual.pdf") {
            output.dual_pdf_path = Some(path);
        }
    }

    Ok(output)
}
