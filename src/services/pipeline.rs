//! src/services/pipeline.rs
//!
//! GenerationPipeline — drives one upload through generation and persistence.
//!
//! Stages run strictly in order: validate, generate, write the file, write the
//! record, verify. Any failure aborts the remaining stages. Nothing is retried
//! and nothing already written is compensated: in `both` mode a database
//! failure leaves the file in place.

use crate::{
    models::generation::{GeneratedArtifact, GenerationRequest, OutputMode, PipelineResult},
    services::{
        consistency::{self, DualWriteInconsistency},
        database_sink::{DatabaseError, DatabaseSink},
        file_sink::{FileSink, FileSinkError},
        generator::{GeneratorError, GeneratorInvoker},
    },
};
use std::{
    fmt, io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input is {size} bytes, exceeding the {limit} byte limit")]
    InputTooLarge { size: usize, limit: usize },
    #[error("invalid filename `{0}`")]
    InvalidFilename(String),
    #[error("directory {} is not writable", .0.display())]
    PermissionDenied(PathBuf),
    #[error("generation timed out after {} seconds", .0.as_secs_f64())]
    GenerationTimeout(Duration),
    #[error("generation failed: {0}")]
    GenerationFailure(String),
    #[error("content is {size} bytes, exceeding the {limit} byte limit")]
    ContentTooLarge { size: usize, limit: usize },
    #[error("database write failed: {0}")]
    DatabaseWrite(DatabaseError),
    #[error(transparent)]
    DualWrite(#[from] DualWriteInconsistency),
    #[error("staging area unavailable: {0}")]
    Staging(io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<GeneratorError> for PipelineError {
    fn from(err: GeneratorError) -> Self {
        match err {
            GeneratorError::Timeout(limit) => PipelineError::GenerationTimeout(limit),
            GeneratorError::Spawn { .. } | GeneratorError::Io(_) => {
                warn!(error = %err, "generator could not run");
                PipelineError::GenerationFailure("generator could not be run".to_string())
            }
            other => PipelineError::GenerationFailure(other.to_string()),
        }
    }
}

impl From<FileSinkError> for PipelineError {
    fn from(err: FileSinkError) -> Self {
        match err {
            FileSinkError::PermissionDenied { path, reason } => {
                debug!("{} not writable: {}", path.display(), reason);
                PipelineError::PermissionDenied(path)
            }
            FileSinkError::Io(err) => PipelineError::Io(err),
        }
    }
}

impl From<DatabaseError> for PipelineError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::ContentTooLarge { size, limit } => {
                PipelineError::ContentTooLarge { size, limit }
            }
            other => PipelineError::DatabaseWrite(other),
        }
    }
}

/// Request-independent bounds enforced by the pipeline.
#[derive(Clone, Copy, Debug)]
pub struct PipelineLimits {
    pub max_input_bytes: usize,
    pub generation_timeout: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: 10_485_760,
            generation_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Validate,
    Generate,
    FileWrite,
    DbWrite,
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Validate => "validate",
            Stage::Generate => "generate",
            Stage::FileWrite => "file_write",
            Stage::DbWrite => "db_write",
            Stage::Verify => "verify",
        })
    }
}

/// Transient files for one run; both live in the staging directory.
struct StagedPaths {
    input: PathBuf,
    output: PathBuf,
}

impl StagedPaths {
    /// Names come from the run id, so their length does not depend on the
    /// uploaded filename. Only a short extension is carried over.
    fn new(staging_dir: &Path, filename: &str) -> Self {
        let run_id = Uuid::new_v4();
        let ext = staged_extension(filename);
        Self {
            input: staging_dir.join(format!("in-{run_id}{ext}")),
            output: staging_dir.join(format!("out-{run_id}.html")),
        }
    }

    async fn cleanup(&self) {
        for path in [&self.input, &self.output] {
            match fs::remove_file(path).await {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => debug!("could not remove staged file {}: {}", path.display(), err),
            }
        }
    }
}

/// Coordinates the generator and both sinks. Cheap to clone; clones share
/// the same pool.
#[derive(Clone)]
pub struct GenerationPipeline {
    generator: GeneratorInvoker,
    files: FileSink,
    records: DatabaseSink,
    staging_dir: PathBuf,
    limits: PipelineLimits,
}

impl GenerationPipeline {
    pub fn new(
        generator: GeneratorInvoker,
        files: FileSink,
        records: DatabaseSink,
        staging_dir: impl Into<PathBuf>,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            generator,
            files,
            records,
            staging_dir: staging_dir.into(),
            limits,
        }
    }

    pub fn files(&self) -> &FileSink {
        &self.files
    }

    pub fn records(&self) -> &DatabaseSink {
        &self.records
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn limits(&self) -> PipelineLimits {
        self.limits
    }

    /// Run one request through every stage its output mode requires.
    pub async fn run(&self, request: GenerationRequest) -> Result<PipelineResult, PipelineError> {
        let mut stage = Stage::Validate;

        // Staged paths embed the filename, so they only exist once it is validated.
        let outcome = match self.validate(&request).await {
            Ok(()) => {
                let staged = StagedPaths::new(&self.staging_dir, &request.filename);
                let outcome = self.execute(&request, &staged, &mut stage).await;
                staged.cleanup().await;
                outcome
            }
            Err(err) => Err(err),
        };

        match &outcome {
            Ok(result) => info!(
                filename = %request.filename,
                mode = %request.output_mode,
                file_path = ?result.file_path,
                db_id = ?result.db_id,
                "generation complete"
            ),
            Err(err) => warn!(
                filename = %request.filename,
                mode = %request.output_mode,
                %stage,
                error = %err,
                "generation failed"
            ),
        }
        outcome
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        staged: &StagedPaths,
        stage: &mut Stage,
    ) -> Result<PipelineResult, PipelineError> {
        let mode = request.output_mode;

        *stage = Stage::Generate;
        let artifact = self.generate(request, staged).await?;

        let mut file_path = None;
        if mode.writes_file() {
            *stage = Stage::FileWrite;
            let path = self.files.path_for(&request.filename)?;
            self.files.write(&path, &artifact.content).await?;
            debug!(path = %path.display(), "file sink written");
            file_path = Some(path);
        }

        let mut db_id = None;
        if mode.writes_db() {
            *stage = Stage::DbWrite;
            let record = self
                .records
                .insert(
                    &request.filename,
                    &artifact.content,
                    request.metadata.as_ref(),
                )
                .await
                .inspect_err(|_| {
                    if let Some(path) = &file_path {
                        warn!(
                            path = %path.display(),
                            "database write failed after file write; file left in place"
                        );
                    }
                })?;
            debug!(id = record.id, "database sink written");
            db_id = Some(record.id);
        }

        if mode == OutputMode::Both {
            *stage = Stage::Verify;
            self.verify_writes(file_path.as_deref(), db_id).await?;
        }

        Ok(PipelineResult {
            file_path: file_path.map(|p| p.to_string_lossy().into_owned()),
            db_id,
        })
    }

    /// Both sinks must be observable: the file on disk and a positive id.
    async fn verify_writes(
        &self,
        file_path: Option<&Path>,
        db_id: Option<i64>,
    ) -> Result<(), PipelineError> {
        let file_present = match file_path {
            Some(path) => self.files.exists(path).await,
            None => false,
        };
        let db_id_present = db_id.is_some_and(|id| id > 0);
        consistency::verify(file_present, db_id_present)?;
        Ok(())
    }

    /// Checks that must pass before the generator is ever started.
    async fn validate(&self, request: &GenerationRequest) -> Result<(), PipelineError> {
        if request.size() > self.limits.max_input_bytes {
            return Err(PipelineError::InputTooLarge {
                size: request.size(),
                limit: self.limits.max_input_bytes,
            });
        }
        ensure_filename_safe(&request.filename)?;
        if request.output_mode.writes_file() {
            self.files.ensure_writable().await?;
        }
        Ok(())
    }

    /// Stage the upload and run the generator against it.
    ///
    /// Runs in every mode: `db` mode still needs the artifact as its content
    /// source, it just never lands in the output directory.
    async fn generate(
        &self,
        request: &GenerationRequest,
        staged: &StagedPaths,
    ) -> Result<GeneratedArtifact, PipelineError> {
        fs::write(&staged.input, &request.content)
            .await
            .map_err(PipelineError::Staging)?;

        let artifact = self
            .generator
            .invoke(
                &staged.input,
                &staged.output,
                self.limits.generation_timeout,
            )
            .await?;
        debug!(
            staged = %artifact.path.display(),
            bytes = artifact.content.len(),
            "artifact generated"
        );
        Ok(artifact)
    }
}

fn staged_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 16 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// Reject filenames that could escape the output directory or collide with
/// in-flight temp files.
///
/// Separators are banned outright, so the name is a single path component;
/// `.` and `..` are covered by the leading-dot rule.
fn ensure_filename_safe(name: &str) -> Result<(), PipelineError> {
    let invalid = name.is_empty()
        || name.len() > MAX_FILENAME_LEN
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.chars().any(|c| c.is_control());
    if invalid {
        return Err(PipelineError::InvalidFilename(name.to_string()));
    }
    Ok(())
}
