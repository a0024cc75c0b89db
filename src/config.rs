use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError, FileError};

const DEFAULT_GATEWAY_COOLDOWN_SECS: f64 = 45.0;
const DEFAULT_INTER_CALL_DELAY_SECS: f64 = 1.0;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP 监听地址
    pub bind_addr: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 任务产物输出目录
    pub jobs_root: String,
    /// 单个任务的最长执行时间（秒），0 表示不限制
    pub job_timeout_secs: u64,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    // --- 网关重试配置 ---
    /// 配额错误的最大尝试次数
    pub gateway_max_attempts: u32,
    /// 两次尝试之间的固定冷却时间（秒）
    pub gateway_cooldown_secs: f64,
    /// 每次成功调用后的间隔（秒），用于遵守每分钟请求限制
    pub gateway_inter_call_delay_secs: f64,
    // --- 解题流水线配置 ---
    pub solver_batch_size: usize,
    pub solver_char_limit: usize,
    pub translation_batch_size: usize,
    pub translation_char_limit: usize,
    // --- PDF 翻译 ---
    pub pdf2zh_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            verbose_logging: false,
            jobs_root: "jobs".to_string(),
            job_timeout_secs: 0,
            llm_api_key: String::new(),
            llm_api_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            llm_model_name: "gemini-2.0-flash".to_string(),
            llm_max_tokens: 16384,
            llm_temperature: 0.3,
            gateway_max_attempts: 3,
            gateway_cooldown_secs: DEFAULT_GATEWAY_COOLDOWN_SECS,
            gateway_inter_call_delay_secs: DEFAULT_INTER_CALL_DELAY_SECS,
            solver_batch_size: 10,
            solver_char_limit: 50_000,
            translation_batch_size: 5,
            translation_char_limit: 30_000,
            pdf2zh_command: "pdf2zh".to_string(),
        }
    }
}

impl Config {
    /// 读取 TOML 配置文件（不存在时使用默认值），再用环境变量覆盖
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let base = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
            toml::from_str::<Config>(&content).map_err(|e| FileError::TomlParseFailed {
                path: path.display().to_string(),
                source: e,
            })?
        } else {
            Self::default()
        };
        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(self) -> Self {
        let default = self;
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(default.bind_addr),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            jobs_root: std::env::var("JOBS_ROOT").unwrap_or(default.jobs_root),
            job_timeout_secs: std::env::var("JOB_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.job_timeout_secs),
            llm_api_key: std::env::var("LLM_API_KEY")
                .or_else(|_| std::env::var("GENAI_API_KEY"))
                .or_else(|_| std::env::var("GEMINI_API_KEY"))
                .unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME")
                .or_else(|_| std::env::var("GENAI_MODEL"))
                .unwrap_or(default.llm_model_name),
            llm_max_tokens: std::env::var("LLM_MAX_TOKENS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_max_tokens),
            llm_temperature: std::env::var("LLM_TEMPERATURE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_temperature),
            gateway_max_attempts: std::env::var("GATEWAY_MAX_ATTEMPTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.gateway_max_attempts),
            gateway_cooldown_secs: std::env::var("GATEWAY_COOLDOWN_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.gateway_cooldown_secs),
            gateway_inter_call_delay_secs: std::env::var("GATEWAY_INTER_CALL_DELAY_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.gateway_inter_call_delay_secs),
            solver_batch_size: std::env::var("SOLVER_BATCH_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.solver_batch_size),
            solver_char_limit: std::env::var("SOLVER_CHAR_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.solver_char_limit),
            translation_batch_size: std::env::var("TRANSLATION_BATCH_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.translation_batch_size),
            translation_char_limit: std::env::var("TRANSLATION_CHAR_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.translation_char_limit),
            pdf2zh_command: std::env::var("PDF2ZH_COMMAND").unwrap_or(default.pdf2zh_command),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.solver_batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "solver_batch_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.translation_batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "translation_batch_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.gateway_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "gateway_max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        for (key, secs) in [
            ("gateway_cooldown_secs", self.gateway_cooldown_secs),
            ("gateway_inter_call_delay_secs", self.gateway_inter_call_delay_secs),
        ] {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: format!("{} is not a valid non-negative delay", secs),
                });
            }
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    pub fn gateway_cooldown(&self) -> Duration {
        secs_or_default(self.gateway_cooldown_secs, DEFAULT_GATEWAY_COOLDOWN_SECS)
    }

    pub fn gateway_inter_call_delay(&self) -> Duration {
        secs_or_default(self.gateway_inter_call_delay_secs, DEFAULT_INTER_CALL_DELAY_SECS)
    }
}

/// `from_env` 不经过校验，非法值退回默认
fn secs_or_default(secs: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| Duration::from_secs_f64(default))
}
