//! # Interview Clone Server - Main Application Entry Point
//!
//! Serves the interview web client and drives one conversational session
//! per WebSocket connection: the candidate's resume is fetched, questions
//! are answered by a chat completion model, and every answer is spoken by a
//! neural voice with a viseme timeline for lip-sync.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, `config.toml`, environment)
//! - **state**: Shared application state and metrics
//! - **session**: Session state machine, transcript, storage and registry
//! - **resume / completion / speech**: External service clients
//! - **websocket**: The `/ws` event protocol
//! - **health / handlers / middleware**: HTTP monitoring and admin endpoints
//!
//! Run with `--listen` to do one local speech recognition from the default
//! microphone instead of starting the server.

mod completion;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod resume;
mod session;
mod speech;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_files::Files;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use completion::OpenAiCompletion;
use config::AppConfig;
use resume::ResumeLoader;
use session::{SessionRegistry, SessionServices};
use speech::{AzureSpeechEngine, SpeechBridge, SpeechProfile};
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    for name in config.missing_credentials() {
        warn!("{} is not set; sessions will fail when they need it", name);
    }

    if std::env::args().any(|arg| arg == "--listen") {
        return listen_once(&config).await;
    }

    tokio::fs::create_dir_all(&config.storage.root)
        .await
        .with_context(|| format!("creating storage root {}", config.storage.root.display()))?;

    let services = SessionServices {
        resume: Arc::new(ResumeLoader::new(config.storage.download_timeout())?),
        completion: Arc::new(OpenAiCompletion::new(&config.completion)?),
        speech: Arc::new(AzureSpeechEngine::new(&config.speech)?),
        synthesis_timeout: config.speech.synthesis_timeout(),
        storage_root: config.storage.root.clone(),
    };
    let sessions = Arc::new(SessionRegistry::new(
        config.performance.max_concurrent_sessions,
        services,
    ));

    let app_state = web::Data::new(AppState::new(config.clone(), sessions.clone()));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let storage_root = config.storage.root.clone();
    let static_dir = config.server.static_dir.clone();
    let serve_client = static_dir.is_dir();
    if !serve_client {
        warn!("Static directory {} not found; web client will not be served", static_dir.display());
    }

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let mut app = App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .route("/ws", web::get().to(websocket::interview_websocket))
            .route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/{id}", web::get().to(handlers::get_session))
                    .route("/sessions/{id}/export", web::post().to(handlers::export_session)),
            )
            .service(Files::new(session::storage::PUBLIC_PREFIX, storage_root.clone()));

        if serve_client {
            app = app.service(Files::new("/", static_dir.clone()).index_file("index.html"));
        }
        app
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    let open_sessions = sessions.get_active_session_ids();
    if !open_sessions.is_empty() {
        info!(sessions = ?open_sessions, "Closing open sessions");
    }
    sessions.close_all().await;
    info!("Server stopped gracefully");
    Ok(())
}

/// One recognition from the default microphone; Enter stops listening.
///
/// Voice and locale come from `LISTEN_VOICE` and `LISTEN_LANGUAGE`.
async fn listen_once(config: &AppConfig) -> Result<()> {
    let profile = SpeechProfile {
        voice: std::env::var("LISTEN_VOICE").unwrap_or_else(|_| "en-US-JennyNeural".to_string()),
        language: std::env::var("LISTEN_LANGUAGE").unwrap_or_else(|_| "en-US".to_string()),
    };
    let engine = Arc::new(AzureSpeechEngine::new(&config.speech)?);
    let bridge = SpeechBridge::open(engine, profile, config.speech.synthesis_timeout())?;
    info!(
        voice = %bridge.profile().voice,
        language = %bridge.profile().language,
        "Speech bridge ready"
    );

    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut line = String::new();
        if BufReader::new(tokio::io::stdin()).read_line(&mut line).await.is_ok() {
            let _ = stop_tx.send(());
        }
    });

    println!("Listening... press Enter to stop.");
    let result = tokio::time::timeout(
        config.speech.recognition_timeout(),
        bridge.recognize_once(stop_rx),
    )
    .await;
    bridge.dispose().await;

    match result {
        Ok(Ok(text)) => {
            println!("{}", text);
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(anyhow::anyhow!("recognition timed out")),
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_clone_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set the shutdown flag on SIGTERM or SIGINT.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
