//! 日志工具模块
//!
//! 初始化 tracing 订阅器，并提供启动信息和文本截断等辅助函数

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化全局日志订阅器
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug / info。
/// 重复初始化（例如测试中）会被静默忽略。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录服务启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 学习助手服务启动");
    info!("🌐 监听地址: {}", config.bind_addr);
    info!("🤖 模型: {}", config.llm_model_name);
    info!(
        "📦 解题批大小: {} / 翻译批大小: {}",
        config.solver_batch_size, config.translation_batch_size
    );
    if config.llm_api_key.is_empty() {
        info!("⚠️  未配置 LLM_API_KEY，生成类任务将失败");
    }
    match config.job_timeout() {
        Some(timeout) => info!("⏱️  任务超时: {}s", timeout.as_secs()),
        None => info!("⏱️  任务超时: 未启用"),
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// 按字符截断，不会切断多字节字符
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

/// 取文本前 `max_len` 个字符，不追加省略号
pub fn preview(text: &str, max_len: usize) -> String {
    text.chars().take(max_len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_respects_char_boundaries() {
        assert_eq!(truncate_text("సమాధానం", 3), "సమా...");
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn test_preview_has_no_ellipsis() {
        assert_eq!(preview("abcdef", 3), "abc");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
