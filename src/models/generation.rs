//! Request and result types flowing through the generation pipeline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr};

/// Free-form caller metadata: string keys, arbitrary JSON values.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Where a generated artifact should be persisted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Write the artifact to the output directory only.
    #[default]
    File,
    /// Insert the artifact into the content table only.
    Db,
    /// Write to both sinks and verify that both succeeded.
    Both,
}

impl OutputMode {
    pub fn writes_file(self) -> bool {
        matches!(self, OutputMode::File | OutputMode::Both)
    }

    pub fn writes_db(self) -> bool {
        matches!(self, OutputMode::Db | OutputMode::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputMode::File => "file",
            OutputMode::Db => "db",
            OutputMode::Both => "both",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(OutputMode::File),
            "db" => Ok(OutputMode::Db),
            "both" => Ok(OutputMode::Both),
            other => Err(format!(
                "unknown output mode `{other}` (expected file, db or both)"
            )),
        }
    }
}

/// An uploaded document plus the caller's persistence choices.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Original upload filename; also names the artifact and the record.
    pub filename: String,

    /// Raw uploaded bytes.
    pub content: Bytes,

    pub output_mode: OutputMode,

    pub metadata: Option<Metadata>,
}

impl GenerationRequest {
    pub fn new(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            output_mode: OutputMode::default(),
            metadata: None,
        }
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Size of the uploaded document in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Output of a successful generator run.
#[derive(Clone, Debug)]
pub struct GeneratedArtifact {
    pub path: PathBuf,
    pub content: String,
}

/// What the caller gets back: a reference into each sink that was written.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineResult {
    /// Absolute path of the written artifact (file and both modes).
    pub file_path: Option<String>,

    /// Identifier of the inserted record (db and both modes).
    pub db_id: Option<i64>,
}
