use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use api::middleware::AuthState;
use api::routes;
use api::state::AppState;
use config::{ApiConfig, LoggingConfig, ProviderConfig};
use database::{Database, MongoBufferRepository, MongoSessionRepository, RedisBroker};
use inference_providers::{
    GoogleSpeech, GoogleSpeechConfig, LlmProvider, MockLlm, MockStt, SttProvider, VertexGemini,
    VertexGeminiConfig,
};
use services::buffers::BufferRepository;
use services::realtime::{MessageBus, WorkLog};
use services::sessions::SessionRepository;
use services::{AudioWorkerPool, BufferService, RealtimeService, SessionService};

#[tokio::main]
async fn main() {
    let config = ApiConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    init_tracing(&config.logging);

    // Stores
    let database = match Database::connect(&config.mongo).await {
        Ok(database) => database,
        Err(e) => {
            tracing::error!(error = %e, "MongoDB init error");
            std::process::exit(1);
        }
    };
    if let Err(e) = database.ensure_indexes().await {
        tracing::error!(error = %e, "MongoDB index error");
        std::process::exit(1);
    }

    let broker = match RedisBroker::connect(&config.redis).await {
        Ok(broker) => broker,
        Err(e) => {
            tracing::error!(error = %e, "Redis init error");
            std::process::exit(1);
        }
    };

    // Repositories and broker ports
    let session_repo: Arc<dyn SessionRepository> =
        Arc::new(MongoSessionRepository::new(&database));
    let buffer_repo: Arc<dyn BufferRepository> = Arc::new(MongoBufferRepository::new(&database));
    let work_log: Arc<dyn WorkLog> =
        Arc::new(broker.work_log(&config.workers.stream, &config.workers.group));
    let bus: Arc<dyn MessageBus> = Arc::new(broker.message_bus());

    // Services
    let sessions = Arc::new(SessionService::new(session_repo));
    let buffers = Arc::new(BufferService::new(
        buffer_repo,
        Duration::from_secs(config.buffer_ttl_seconds),
    ));
    let realtime = Arc::new(RealtimeService::new(
        sessions.clone(),
        buffers.clone(),
        work_log.clone(),
        bus.clone(),
    ));

    // Worker pool (co-hosted when RUN_WORKERS=1)
    let shutdown = CancellationToken::new();
    let mut worker_handles = Vec::new();
    if config.workers.enabled {
        let (stt, llm) = match build_providers(&config.providers) {
            Ok(providers) => providers,
            Err(e) => {
                tracing::error!(error = %e, "provider init error");
                std::process::exit(1);
            }
        };

        let pool = AudioWorkerPool::new(
            work_log,
            bus,
            buffers.clone(),
            stt,
            llm,
            config.workers.num_workers,
            &config.workers.consumer_prefix,
        );
        worker_handles = match pool.start(shutdown.clone()).await {
            Ok(handles) => handles,
            Err(e) => {
                tracing::error!(error = %e, "worker pool start error");
                std::process::exit(1);
            }
        };
    }

    let app = routes::app(
        AppState {
            sessions,
            buffers,
            realtime,
        },
        AuthState::from_config(&config.auth),
    );

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_address, error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!(address = %bind_address, "Server started successfully");

    let server_shutdown = shutdown.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }

    // Let in-flight chunks finish before exiting.
    shutdown.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }
}

fn build_providers(
    cfg: &ProviderConfig,
) -> Result<(Arc<dyn SttProvider>, Arc<dyn LlmProvider>), String> {
    if cfg.use_mock {
        tracing::info!("using in-process mock STT/LLM providers");
        return Ok((
            Arc::new(MockStt::new()),
            Arc::new(MockLlm::with_fragments(vec![
                "This is a mock coaching answer.",
            ])),
        ));
    }

    let stt = GoogleSpeech::new(GoogleSpeechConfig {
        api_key: cfg.google_api_key.clone(),
        ..Default::default()
    })
    .map_err(|e| e.to_string())?;

    let llm = VertexGemini::new(VertexGeminiConfig {
        project_id: cfg.vertex_project_id.clone(),
        location: cfg.vertex_location.clone(),
        model: cfg.vertex_gemini_model.clone(),
        api_key: cfg.google_api_key.clone(),
        ..Default::default()
    })
    .map_err(|e| e.to_string())?;

    Ok((Arc::new(stt), Arc::new(llm)))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level.clone()));

    match logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .compact()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .init();
        }
    }
}
