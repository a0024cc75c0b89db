use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api;
use crate::clients::LlmClient;
use crate::config::Config;
use crate::orchestrator::{JobRunner, McqPipeline, SolutionPipeline, TranslationPipeline};
use crate::services::document::{DocumentBuilder, DocxBuilder};
use crate::services::gateway::{RateLimitedGateway, RetryPolicy, TextGenerator};
use crate::services::job_store::JobStore;
use crate::services::pdf_translator::{Pdf2zhCli, PdfTranslator};

/// 所有请求共享的服务对象
pub struct AppState {
    pub config: Config,
    pub store: JobStore,
    pub runner: JobRunner,
    pub solutions: Arc<SolutionPipeline>,
    pub mcqs: Arc<McqPipeline>,
    pub translations: Arc<TranslationPipeline>,
}

impl AppState {
    /// 用给定的外部依赖组装服务；测试中传入脚本化的实现
    pub fn new(
        config: Config,
        gateway: Arc<dyn TextGenerator>,
        documents: Arc<dyn DocumentBuilder>,
        pdf_translator: Arc<dyn PdfTranslator>,
    ) -> Self {
        let store = JobStore::new();
        let runner = JobRunner::new(store.clone(), config.job_timeout());
        Self {
            solutions: Arc::new(SolutionPipeline::new(
                &config,
                gateway.clone(),
                documents.clone(),
            )),
            mcqs: Arc::new(McqPipeline::new(&config, gateway, documents)),
            translations: Arc::new(TranslationPipeline::new(&config, pdf_translator)),
            store,
            runner,
            config,
        }
    }

    /// 按配置组装真实依赖：限流网关 + DOCX + pdf2zh
    pub fn from_config(config: Config) -> Self {
        let client: Arc<dyn TextGenerator> = Arc::new(LlmClient::new(&config));
        let gateway: Arc<dyn TextGenerator> = Arc::new(RateLimitedGateway::new(
            client,
            RetryPolicy::from_config(&config),
        ));
        let pdf_translator: Arc<dyn PdfTranslator> = Arc::new(Pdf2zhCli::new(&config));
        Self::new(config, gateway, Arc::new(DocxBuilder), pdf_translator)
    }
}

/// 应用主结构
pub struct App {
    state: Arc<AppState>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        if config.llm_api_key.trim().is_empty() {
            warn!("⚠️ 未配置 LLM_API_KEY，生成类任务会直接失败");
        }

        tokio::fs::create_dir_all(&config.jobs_root)
            .await
            .with_context(|| format!("无法创建任务目录 {}", config.jobs_root))?;

        Ok(Self {
            state: Arc::new(AppState::from_config(config)),
        })
    }

    /// 启动 HTTP 服务，直到进程退出
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.bind_addr.clone();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("无法监听 {}", addr))?;

        info!("🌐 HTTP 服务已启动: http://{}", addr);
        axum::serve(listener, api::router(self.state))
            .await
            .context("HTTP 服务异常退出")?;
        Ok(())
    }
}
