use anyhow::Context;
use faultline_runtime::engines::capability::GatewayHealthProber;
use faultline_runtime::engines::llm::providers::openai::OpenAiProvider;
use faultline_runtime::engines::rca::RcaConfig;
use faultline_runtime::tools::code::HttpCodeHost;
use faultline_runtime::tools::observability::HttpObservabilityGateway;
use faultline_runtime::worker::preprocess::{HttpMetadataProvider, PreprocessConfig, Preprocessor};
use faultline_runtime::{
    Database, DatabaseConfig, FaultlineEngines, JobWorker, LlmHandler, LlmHandlerConfig, SqsQueue,
    WebChannels, WorkerConfig,
};
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing with environment-based filtering
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Faultline worker starting up...");
    info!("Version: {}", faultline_runtime::RUNTIME_VERSION);

    let db_config = DatabaseConfig {
        url: env_or("DATABASE_URL", "sqlite://faultline.db?mode=rwc"),
        max_connections: 10,
    };
    let db = Database::connect(&db_config)
        .await
        .context("database initialization failed")?;

    // LLM provider from environment
    let llm = Arc::new(LlmHandler::new(LlmHandlerConfig::default()));
    match env::var("OPENAI_API_KEY") {
        Ok(api_key) if !api_key.is_empty() => {
            let provider = OpenAiProvider::new(api_key)
                .context("OpenAI provider setup failed")?
                .with_model(env_or("FAULTLINE_MODEL", "gpt-4o-mini"));
            llm.register_provider(Arc::new(provider)).await;
        }
        _ => {
            error!("OPENAI_API_KEY is required");
            return Err("OPENAI_API_KEY is required".into());
        }
    }

    // Collaborator gateways
    let observability = Arc::new(HttpObservabilityGateway::new(
        env_or("FAULTLINE_OBSERVABILITY_URL", "http://localhost:8081"),
        30,
    )?);
    let code_host = Arc::new(HttpCodeHost::new(
        env_or("FAULTLINE_CODE_HOST_URL", "http://localhost:8082"),
        30,
    )?);
    let metadata = Arc::new(HttpMetadataProvider::new(env_or(
        "FAULTLINE_METADATA_URL",
        "http://localhost:8083",
    ))?);

    let prober = Arc::new(GatewayHealthProber::new(
        code_host.clone(),
        observability.clone(),
    ));
    let engines = Arc::new(FaultlineEngines::new(
        db.clone(),
        llm,
        observability,
        code_host.clone(),
        prober,
        RcaConfig::default(),
    ));

    if !engines.health_check().await {
        warn!("LLM provider health check failed at startup, continuing anyway");
    }

    let queue = Arc::new(SqsQueue::new(
        env_or("FAULTLINE_SQS_ENDPOINT", "http://localhost:9324"),
        env_or(
            "FAULTLINE_QUEUE_URL",
            "http://localhost:9324/queue/faultline-jobs",
        ),
    )?);

    let preprocessor = Preprocessor::new(
        db.clone(),
        code_host,
        metadata,
        PreprocessConfig::default(),
    );

    let web_channels = WebChannels::new();
    let worker_config = WorkerConfig {
        app_base_url: env_or("FAULTLINE_APP_URL", "https://app.faultline.dev"),
        slack_token: env::var("SLACK_BOT_TOKEN").ok(),
        ..Default::default()
    };

    // SSE endpoint for web progress streaming
    let sse_addr = env_or("FAULTLINE_SSE_ADDR", "0.0.0.0:8090");
    let router = faultline_runtime::sse_router(web_channels.clone());
    let listener = tokio::net::TcpListener::bind(&sse_addr)
        .await
        .with_context(|| format!("failed to bind {}", sse_addr))?;
    info!(addr = %sse_addr, "progress SSE endpoint listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "SSE server exited");
        }
    });

    let worker = JobWorker::new(db, queue, engines, preprocessor, web_channels, worker_config);

    tokio::select! {
        _ = worker.run() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received");
        }
    }

    info!("Faultline worker shutdown complete");
    Ok(())
}
