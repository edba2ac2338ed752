//! Core data models for the knowledge-graph generation service.
//!
//! `generation` holds the per-request types that flow through the pipeline;
//! `content` holds the persisted record, which maps to the `html_content`
//! table via `sqlx::FromRow` and serializes as JSON via `serde`.

pub mod content;
pub mod generation;
