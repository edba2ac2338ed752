use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
#[cfg(test)]
mod test_utils;

use services::{
    database_sink::{self, DatabaseSink, PoolSettings},
    file_sink::FileSink,
    generator::GeneratorInvoker,
    pipeline::{GenerationPipeline, PipelineLimits},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting kg-service with config: {:?}", cfg);

    // --- Ensure output (0700) and staging directories exist ---
    let files = FileSink::new(&cfg.output_dir);
    files.prepare().await?;
    if !fs::try_exists(&cfg.staging_dir).await? {
        fs::create_dir_all(&cfg.staging_dir).await?;
        tracing::info!("Created staging directory at {}", cfg.staging_dir);
    }

    // --- Initialize SQLite pool ---
    tracing::debug!("Connecting using raw URL => {}", cfg.database_url);
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if let Some(parent) = std::path::Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !fs::try_exists(parent).await? {
            fs::create_dir_all(parent).await?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let db = Arc::new(
        database_sink::connect(
            &cfg.database_url,
            PoolSettings {
                max_connections: cfg.db_max_connections,
                acquire_timeout: cfg.db_acquire_timeout,
            },
        )
        .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        database_sink::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core pipeline ---
    let pipeline = GenerationPipeline::new(
        GeneratorInvoker::new(&cfg.generator_program, &cfg.generator_args),
        files,
        DatabaseSink::new(db.clone(), cfg.max_content_bytes),
        &cfg.staging_dir,
        PipelineLimits {
            max_input_bytes: cfg.max_input_bytes,
            generation_timeout: cfg.generation_timeout,
        },
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(pipeline);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
