use std::time::Duration;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 生成模型网关错误
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// 流水线错误
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 生成模型网关错误
///
/// `Quota` 是唯一可重试的变体，其余都视为终止错误。
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// 配额 / 频率限制，可能附带服务端建议的等待时间
    #[error("请求频率限制: {message}")]
    Quota {
        message: String,
        retry_after: Option<Duration>,
    },
    /// 不可重试的失败
    #[error("{0}")]
    Permanent(String),
    /// 重试次数耗尽
    #[error("API request failed after {attempts} attempts. Please try again later.")]
    Exhausted { attempts: u32 },
    /// 未配置 API Key
    #[error("Generative model API key not configured. Please set LLM_API_KEY in your environment.")]
    NotConfigured,
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Quota { .. })
    }
}

/// 流水线错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 所有批次都没有产出结果
    #[error("JSON solver returned no results from any batch")]
    NoResults,
    /// 模型输出无法解析为 JSON 数组
    #[error("Could not parse valid JSON array from model output ({length} characters). Response preview: {preview}")]
    UnparseableOutput { length: usize, preview: String },
    /// PDF 中没有可用文本
    #[error("No extractable text found in PDF")]
    EmptyDocument,
    /// PDF 解析失败
    #[error("Failed to load PDF: {0}")]
    PdfLoad(String),
    /// MCQ 输出解析失败
    #[error("Failed to parse MCQ output")]
    McqParse,
    /// 文档构建失败
    #[error("Failed to create DOCX document: {0}")]
    Document(String),
    /// 外部翻译工具失败
    #[error("PDF translation failed: {0}")]
    Translation(String),
    /// 不支持的目标语言
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
    /// 任务超时
    #[error("Job exceeded its deadline of {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置项取值非法
    #[error("配置项 {key} 非法: {reason}")]
    Invalid { key: String, reason: String },
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: err,
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(format!("JSON解析失败: {}", err))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
