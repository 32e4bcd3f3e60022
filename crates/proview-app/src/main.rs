//! ProView server binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Install tracing
//! 3. Create the shared embedding and LLM handles
//! 4. Build the coaching core and start the session janitor
//! 5. Serve the HTTP API until Ctrl-C / SIGTERM, then stop the janitor

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use proview_api::auth::resolve_api_key;
use proview_api::{start_server, AppState};
use proview_coach::{ConversationOrchestrator, LlmBackend, LlmHandle, OpenAiCompatBackend};
use proview_core::config::{EmbeddingConfig, LlmConfig, ProviewConfig};
use proview_core::error::ProviewError;
use proview_core::shared::SharedHandle;
use proview_vector::embedding::{DynEmbeddingService, MockEmbedding, OnnxEmbeddingService};
use proview_vector::EmbedderHandle;

use cli::CliArgs;

/// Embedding handle: the ONNX model when a model directory is configured,
/// otherwise the deterministic mock.
fn embedder_handle(config: &EmbeddingConfig) -> EmbedderHandle {
    match config.model_dir.clone() {
        Some(dir) => {
            tracing::info!(model = %config.model, dir = %dir, "Using ONNX embedding model");
            SharedHandle::lazy("embedder", move || {
                let service: Arc<dyn DynEmbeddingService> =
                    Arc::new(OnnxEmbeddingService::from_directory(&PathBuf::from(&dir))?);
                Ok(service)
            })
        }
        None => {
            tracing::warn!(
                "No embedding.model_dir configured; using mock embeddings (retrieval quality is not meaningful)"
            );
            let service: Arc<dyn DynEmbeddingService> = Arc::new(MockEmbedding::with_dimensions(config.dimensions));
            SharedHandle::ready("embedder", service)
        }
    }
}

/// LLM handle; the client is built on the first chat turn.
fn llm_handle(config: &LlmConfig) -> LlmHandle {
    if std::env::var(&config.api_key_env).is_err() {
        tracing::warn!(env = %config.api_key_env, "LLM API key not set; chat requests will fail");
    }

    let config = config.clone();
    SharedHandle::lazy("llm", move || {
        let key = std::env::var(&config.api_key_env).map_err(|_| {
            ProviewError::BackendUnavailable(format!("LLM API key {} is not set", config.api_key_env))
        })?;
        let backend: Arc<dyn LlmBackend> = Arc::new(OpenAiCompatBackend::new(&config, key)?);
        Ok(backend)
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_path = args.resolve_config_path();
    let config_found = config_path.exists();
    let mut config = if config_found {
        ProviewConfig::load(&config_path)?
    } else {
        ProviewConfig::default()
    };
    config.general.host = args.resolve_host(&config.general.host);
    config.general.port = args.resolve_port(config.general.port);
    config.general.log_level = args.resolve_log_level(&config.general.log_level);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting ProView v{}", env!("CARGO_PKG_VERSION"));
    if config_found {
        tracing::info!(path = %config_path.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %config_path.display(), "No configuration file, using defaults");
    }
    config.validate()?;

    // Shared backends.
    let embedder = Arc::new(embedder_handle(&config.embedding));
    let llm = Arc::new(llm_handle(&config.llm));

    // Core.
    let orchestrator = Arc::new(ConversationOrchestrator::new(&config, embedder, llm));
    orchestrator.janitor().start();

    // API.
    let (api_key, generated) = resolve_api_key(&config.security.api_key_env);
    if generated {
        tracing::warn!(
            env = %config.security.api_key_env,
            "API key not set; generated a temporary key for this run"
        );
        eprintln!("Temporary API key (x-proview-key): {}", api_key);
    }
    let state = AppState::new(config, Arc::clone(&orchestrator), api_key);

    let served = start_server(state, shutdown_signal()).await;

    orchestrator.janitor().stop().await;
    tracing::info!("ProView stopped");

    served?;
    Ok(())
}
