//! Defines routes for generation and stored-content operations.
//!
//! ## Structure
//! - **Generation**
//!   - `POST   /generate?output_mode=file|db|both` — multipart upload, run pipeline
//!
//! - **Stored content**
//!   - `GET    /contents`      — list records (supports limit, offset)
//!   - `GET    /content/{id}`  — fetch one record with its content
//!   - `DELETE /content/{id}`  — delete one record
//!
//! - **Probes**
//!   - `GET    /healthz`, `GET /readyz`

use crate::{
    handlers::{
        content_handlers::{delete_content, get_content, list_contents},
        generate_handlers::generate,
        health_handlers::{healthz, readyz},
    },
    services::pipeline::GenerationPipeline,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all service routes.
///
/// The router carries shared state (`GenerationPipeline`) to all handlers.
/// The upload route has no framework body limit; the handler enforces the
/// configured input limit while streaming.
pub fn routes() -> Router<GenerationPipeline> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/generate",
            post(generate).layer(DefaultBodyLimit::disable()),
        )
        .route("/contents", get(list_contents))
        .route("/content/{id}", get(get_content).delete(delete_content))
}
