use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod cache;
mod config;
mod controllers;
mod db;
mod error;
mod export;
mod models;
mod notes;

use cache::CacheManager;
use config::Config;
use db::Database;
use export::pool::EngineFactory;
use export::{ChromiumFactory, ExportPipeline, LocalBlobStore, RenderPool};
use notes::NoteStore;

pub struct AppState {
    pub config: Config,
    pub notes: Arc<NoteStore>,
    pub exporter: Arc<ExportPipeline>,
    /// Concrete store: the download route needs `read` and `verify_link`
    pub blobs: Arc<LocalBlobStore>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the process-wide services. Called once at startup.
    pub fn build(config: Config, engines: Arc<dyn EngineFactory>) -> Result<Self, String> {
        log::info!("Initializing database at: {}", config.database_url);
        let db = Database::new(&config.database_url)
            .map_err(|e| format!("Failed to open database {}: {}", config.database_url, e))?;

        let cache = Arc::new(CacheManager::from_config(&config.cache));
        log::info!(
            "[CACHE] prefix '{}', ttl {:?}, lru capacity {}",
            config.cache.key_prefix,
            config.cache.default_ttl,
            config.cache.capacity
        );
        let notes = Arc::new(NoteStore::new(Arc::new(db), cache));

        let blobs = Arc::new(
            LocalBlobStore::new(
                config.export.blob_dir.clone(),
                &config.public_url,
                config.export.signing_secret.clone(),
            )
            .map_err(|e| format!("Failed to open blob directory {:?}: {}", config.export.blob_dir, e))?,
        );
        log::info!("[BLOBS] Storing exports under {}", blobs.root().display());

        let pool = Arc::new(RenderPool::new(
            config.export.render_pool_size,
            config.export.render_timeout,
            engines,
        ));
        let exporter = Arc::new(ExportPipeline::new(
            Arc::clone(&notes),
            pool,
            blobs.clone(),
            config.export.link_ttl(),
        ));

        Ok(Self {
            config,
            notes,
            exporter,
            blobs,
            started_at: Instant::now(),
        })
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;
    log::info!(
        "Starting notes-backend v{} ({:?})",
        controllers::health::VERSION,
        config.app_env
    );

    let engines = Arc::new(ChromiumFactory::new(config.export.chromium_path.clone()));
    log::info!(
        "[RENDER] Pool of {} engine(s) using {}",
        config.export.render_pool_size,
        config.export.chromium_path.display()
    );
    let state = match AppState::build(config, engines) {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let sweeper = state
        .config
        .cache
        .sweep_interval
        .map(|interval| state.notes.cache().start_background_sweeper(interval));

    let server_state = state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(server_state.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config_routes)
            .configure(controllers::notes::config)
            .configure(controllers::exports::config)
    })
    .bind(("0.0.0.0", port))?
    .run();

    log::info!("Listening on 0.0.0.0:{}", port);

    // Get server handle for graceful shutdown
    let server_handle = server.handle();
    let shutdown_pool = Arc::clone(state.exporter.pool());

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        log::info!("Received Ctrl+C, shutting down...");

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        shutdown_pool.close();

        log::info!("Stopping HTTP server...");
        let server_stop = server_handle.stop(true);
        if tokio::time::timeout(Duration::from_secs(5), server_stop).await.is_err() {
            log::warn!("Timeout waiting for HTTP server to stop, forcing exit...");
        }

        log::info!("Shutdown complete");
    });

    server.await
}
