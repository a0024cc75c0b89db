//! 生成模型客户端
//!
//! 基于 `async-openai`，兼容 OpenAI API 的服务（Gemini、Azure 等）都可以通过
//! `llm_api_base_url` 接入。底层错误统一经 `classify_error` 归类为配额错误或终止错误，
//! 重试交给 `RateLimitedGateway`。

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::GatewayError;
use crate::services::gateway::{classify_error, TextGenerator};

/// LLM 客户端
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model_name: String,
    max_tokens: u32,
    temperature: f32,
    system_message: Option<String>,
    configured: bool,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
            system_message: None,
            configured: !config.llm_api_key.trim().is_empty(),
        }
    }

    /// 为所有请求附加系统消息
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    fn build_messages(&self, prompt: &str) -> Result<Vec<ChatCompletionRequestMessage>, GatewayError> {
        let mut messages = Vec::with_capacity(2);

        if let Some(sys_msg) = &self.system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg.as_str())
                .build()
                .map_err(|e| GatewayError::Permanent(format!("构建系统消息失败: {}", e)))?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| GatewayError::Permanent(format!("构建用户消息失败: {}", e)))?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        Ok(messages)
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        if !self.configured {
            return Err(GatewayError::NotConfigured);
        }

        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("提示词长度: {} 字符", prompt.len());

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(self.build_messages(prompt)?)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(|e| GatewayError::Permanent(format!("构建请求失败: {}", e)))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_error(e.to_string())
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| GatewayError::Permanent("LLM 返回内容为空".to_string()))?;

        Ok(content.trim().to_string())
    }
}
