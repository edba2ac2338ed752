//! Fixtures shared by the unit and handler tests.

use crate::services::{
    database_sink::{self, DatabaseSink, PoolSettings},
    file_sink::FileSink,
    generator::GeneratorInvoker,
    pipeline::{GenerationPipeline, PipelineLimits},
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tempfile::TempDir;
use uuid::Uuid;

/// Generator body that wraps the input text in a minimal HTML page.
pub const GENERATE_HTML: &str = "printf '<html><body>%s</body></html>' \"$(cat \"$1\")\" > \"$2\"";

/// Write a `sh` script into `dir` and return its path.
pub fn write_script(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join(format!("generator-{}.sh", Uuid::new_v4()));
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write generator script");
    path
}

/// An invoker running `sh <script> <input> <output>`.
pub fn script_invoker(dir: &TempDir, body: &str) -> GeneratorInvoker {
    GeneratorInvoker::new("sh", [write_script(dir, body)])
}

/// A migrated SQLite pool stored inside `dir`.
pub async fn test_pool(dir: &TempDir) -> Arc<SqlitePool> {
    let url = format!("sqlite://{}", dir.path().join("kg_test.db").display());
    let pool = database_sink::connect(
        &url,
        PoolSettings {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        },
    )
    .await
    .expect("open test pool");
    database_sink::run_migrations(&pool)
        .await
        .expect("migrate test pool");
    Arc::new(pool)
}

pub struct TestOptions {
    pub max_input_bytes: usize,
    pub max_content_bytes: usize,
    pub generation_timeout: Duration,
    /// Point the file sink at a directory that does not exist.
    pub missing_output_dir: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        let limits = PipelineLimits::default();
        Self {
            max_input_bytes: limits.max_input_bytes,
            max_content_bytes: 10_000_000,
            generation_timeout: limits.generation_timeout,
            missing_output_dir: false,
        }
    }
}

/// A fully wired pipeline living in a temp directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub output_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub pipeline: GenerationPipeline,
}

impl TestEnv {
    pub async fn new(script: &str) -> Self {
        Self::with_options(script, TestOptions::default()).await
    }

    pub async fn with_options(script: &str, options: TestOptions) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let output_dir = if options.missing_output_dir {
            dir.path().join("missing").join("output")
        } else {
            dir.path().join("output")
        };
        let staging_dir = dir.path().join("staging");
        std::fs::create_dir_all(&staging_dir).expect("create staging dir");

        let files = FileSink::new(&output_dir);
        if !options.missing_output_dir {
            files.prepare().await.expect("prepare output dir");
        }

        let records = DatabaseSink::new(test_pool(&dir).await, options.max_content_bytes);
        let pipeline = GenerationPipeline::new(
            script_invoker(&dir, script),
            files,
            records,
            &staging_dir,
            PipelineLimits {
                max_input_bytes: options.max_input_bytes,
                generation_timeout: options.generation_timeout,
            },
        );

        Self {
            dir,
            output_dir,
            staging_dir,
            pipeline,
        }
    }
}
