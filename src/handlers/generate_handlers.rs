//! HTTP handler for `POST /generate`.
//!
//! Reads the multipart upload incrementally, aborting as soon as a part grows
//! past its limit, then hands a `GenerationRequest` to the pipeline.

use crate::{
    errors::AppError,
    models::generation::{GenerationRequest, Metadata, OutputMode, PipelineResult},
    services::pipeline::{GenerationPipeline, PipelineError},
};
use axum::{
    Json,
    extract::{Multipart, Query, State, multipart::Field},
    http::StatusCode,
};
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tracing::{debug, warn};

/// Upper bound for the `metadata` text part.
const MAX_METADATA_BYTES: usize = 64 * 1024;

/// Query params accepted by `POST /generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateQuery {
    /// `file` (default), `db` or `both`.
    pub output_mode: Option<String>,
}

/// Generate an artifact from the uploaded `input_file` part and persist it.
///
/// Optional `metadata` part: a JSON object, stored with the record.
pub async fn generate(
    State(pipeline): State<GenerationPipeline>,
    Query(query): Query<GenerateQuery>,
    mut multipart: Multipart,
) -> Result<Json<PipelineResult>, AppError> {
    let output_mode = query
        .output_mode
        .as_deref()
        .map(str::parse::<OutputMode>)
        .transpose()
        .map_err(AppError::bad_request)?
        .unwrap_or_default();
    let max_input_bytes = pipeline.limits().max_input_bytes;

    let mut upload: Option<(String, Bytes)> = None;
    let mut metadata: Option<Metadata> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("Failed to parse multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "input_file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("input_file part has no filename"))?;

                let content = match read_capped(&mut field, max_input_bytes).await? {
                    FieldRead::Complete(bytes) => bytes,
                    FieldRead::TooLarge(received) => {
                        warn!(
                            filename = %filename,
                            received,
                            max_input_bytes,
                            "upload exceeds input limit, aborting"
                        );
                        return Err(PipelineError::InputTooLarge {
                            size: received,
                            limit: max_input_bytes,
                        }
                        .into());
                    }
                };

                debug!(filename = %filename, bytes = content.len(), "upload received");
                upload = Some((filename, content));
            }
            "metadata" => {
                let raw = match read_capped(&mut field, MAX_METADATA_BYTES).await? {
                    FieldRead::Complete(bytes) => bytes,
                    FieldRead::TooLarge(received) => {
                        warn!(received, "metadata exceeds limit, aborting");
                        return Err(AppError::new(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            format!(
                                "metadata is larger than the {MAX_METADATA_BYTES} byte limit"
                            ),
                        ));
                    }
                };
                let text = std::str::from_utf8(&raw)
                    .map_err(|_| AppError::bad_request("metadata is not valid UTF-8"))?;
                metadata = parse_metadata(text)?;
            }
            other => debug!("ignoring multipart field `{}`", other),
        }
    }

    let (filename, content) =
        upload.ok_or_else(|| AppError::bad_request("missing input_file part"))?;

    let mut request = GenerationRequest::new(filename, content).with_mode(output_mode);
    if let Some(metadata) = metadata {
        request = request.with_metadata(metadata);
    }

    let result = pipeline.run(request).await?;
    Ok(Json(result))
}

enum FieldRead {
    Complete(Bytes),
    /// Bytes received when the limit was crossed.
    TooLarge(usize),
}

/// Buffer one multipart part, stopping at the first chunk that crosses `limit`.
async fn read_capped(field: &mut Field<'_>, limit: usize) -> Result<FieldRead, AppError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::bad_request(format!("Failed to read upload: {e}")))?
    {
        let received = buf.len() + chunk.len();
        if received > limit {
            return Ok(FieldRead::TooLarge(received));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(FieldRead::Complete(buf.freeze()))
}

/// Parse the `metadata` part. Blank means none.
///
/// Shell-quoted values such as `'{"project":"kg"}'` are accepted with the
/// outer single quotes stripped.
fn parse_metadata(raw: &str) -> Result<Option<Metadata>, AppError> {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(trimmed)
        .trim();
    if unquoted.is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<serde_json::Value>(unquoted) {
        Ok(serde_json::Value::Object(map)) => Ok(Some(map)),
        Ok(_) => Err(AppError::bad_request("metadata must be a JSON object")),
        Err(e) => Err(AppError::bad_request(format!("metadata is not valid JSON: {e}"))),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        routes::routes::routes,
        test_utils::{GENERATE_HTML, TestEnv, TestOptions},
    };
    use axum::http::StatusCode;
    use axum_test::{
        TestServer,
        multipart::{MultipartForm, Part},
    };
    use serde_json::{Value, json};

    fn server(env: &TestEnv) -> TestServer {
        TestServer::new(routes().with_state(env.pipeline.clone())).expect("test server")
    }

    fn upload(name: &str, bytes: Vec<u8>) -> MultipartForm {
        MultipartForm::new().add_part("input_file", Part::bytes(bytes).file_name(name))
    }

    #[tokio::test]
    async fn both_mode_returns_path_and_id() {
        let env = TestEnv::new(GENERATE_HTML).await;
        let server = server(&env);

        let response = server
            .post("/generate")
            .add_query_param("output_mode", "both")
            .multipart(upload("doc.txt", vec![b'x'; 500]))
            .await;

        response.assert_status_ok();
        let body: PipelineResult = response.json();
        let expected = env.output_dir.join("doc.txt");
        assert_eq!(body.file_path.as_deref(), expected.to_str());
        assert!(body.db_id.is_some_and(|id| id > 0));
    }

    #[tokio::test]
    async fn default_mode_is_file_only() {
        let env = TestEnv::new(GENERATE_HTML).await;
        let server = server(&env);

        let response = server.post("/generate").multipart(upload("doc.txt", b"hi".to_vec())).await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert!(body["file_path"].is_string());
        assert!(body["db_id"].is_null());
    }

    #[tokio::test]
    async fn db_mode_stores_metadata() {
        let env = TestEnv::new(GENERATE_HTML).await;
        let server = server(&env);

        let form = upload("doc.txt", b"hi".to_vec())
            .add_text("metadata", r#"'{"project":"AI research"}'"#);
        let response = server
            .post("/generate")
            .add_query_param("output_mode", "db")
            .multipart(form)
            .await;

        response.assert_status_ok();
        let body: PipelineResult = response.json();
        assert_eq!(body.file_path, None);
        let record = env
            .pipeline
            .records()
            .get_by_id(body.db_id.expect("db id"))
            .await
            .unwrap();
        assert_eq!(
            record.metadata.map(|m| Value::Object(m.0)),
            Some(json!({ "project": "AI research" }))
        );
    }

    #[tokio::test]
    async fn oversized_upload_is_413() {
        let env = TestEnv::with_options(
            GENERATE_HTML,
            TestOptions {
                max_input_bytes: 64,
                ..TestOptions::default()
            },
        )
        .await;
        let server = server(&env);

        let response = server
            .post("/generate")
            .multipart(upload("doc.txt", vec![0u8; 65]))
            .await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!env.output_dir.join("doc.txt").exists());
    }

    #[tokio::test]
    async fn oversized_metadata_is_413() {
        let env = TestEnv::with_options(
            GENERATE_HTML,
            TestOptions {
                max_input_bytes: 64,
                ..TestOptions::default()
            },
        )
        .await;
        let server = server(&env);

        let big = format!(r#"{{"blob":"{}"}}"#, "x".repeat(1024 * 1024));
        let response = server
            .post("/generate")
            .add_query_param("output_mode", "both")
            .multipart(upload("doc.txt", b"hi".to_vec()).add_text("metadata", big))
            .await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!env.output_dir.join("doc.txt").exists());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM html_content")
            .fetch_one(env.pipeline.records().pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn metadata_at_the_limit_is_accepted() {
        let env = TestEnv::new(GENERATE_HTML).await;
        let server = server(&env);

        let envelope = r#"{"blob":""}"#.len();
        let metadata = format!(
            r#"{{"blob":"{}"}}"#,
            "x".repeat(MAX_METADATA_BYTES - envelope)
        );
        assert_eq!(metadata.len(), MAX_METADATA_BYTES);

        let response = server
            .post("/generate")
            .add_query_param("output_mode", "db")
            .multipart(upload("doc.txt", b"hi".to_vec()).add_text("metadata", metadata))
            .await;

        response.assert_status_ok();
    }

    #[tokio::test]
    async fn generator_stderr_reaches_caller() {
        let env = TestEnv::new("echo 'parse error' >&2\nexit 1").await;
        let server = server(&env);

        let response = server.post("/generate").multipart(upload("doc.txt", b"hi".to_vec())).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert!(body["error"].as_str().unwrap().contains("parse error"));
        assert_eq!(body["status"], 500);
    }

    #[tokio::test]
    async fn unwritable_output_is_403() {
        let env = TestEnv::with_options(
            GENERATE_HTML,
            TestOptions {
                missing_output_dir: true,
                ..TestOptions::default()
            },
        )
        .await;
        let server = server(&env);

        let response = server.post("/generate").multipart(upload("doc.txt", b"hi".to_vec())).await;

        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn timeout_is_504() {
        let env = TestEnv::with_options(
            "sleep 10",
            TestOptions {
                generation_timeout: std::time::Duration::from_millis(300),
                ..TestOptions::default()
            },
        )
        .await;
        let server = server(&env);

        let response = server.post("/generate").multipart(upload("doc.txt", b"hi".to_vec())).await;

        response.assert_status(StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn bad_requests_are_400() {
        let env = TestEnv::new(GENERATE_HTML).await;
        let server = server(&env);

        let unknown_mode = server
            .post("/generate")
            .add_query_param("output_mode", "s3")
            .multipart(upload("doc.txt", b"hi".to_vec()))
            .await;
        unknown_mode.assert_status(StatusCode::BAD_REQUEST);

        let missing_file = server
            .post("/generate")
            .multipart(MultipartForm::new().add_text("metadata", "{}"))
            .await;
        missing_file.assert_status(StatusCode::BAD_REQUEST);

        let bad_metadata = server
            .post("/generate")
            .multipart(upload("doc.txt", b"hi".to_vec()).add_text("metadata", "[1, 2]"))
            .await;
        bad_metadata.assert_status(StatusCode::BAD_REQUEST);
    }

    #[test]
    fn metadata_parsing() {
        assert!(parse_metadata("  ").unwrap().is_none());
        let parsed = parse_metadata(r#"'{"a": 1}'"#).unwrap().unwrap();
        assert_eq!(parsed["a"], 1);
        assert!(parse_metadata("not json").is_err());
        assert!(parse_metadata("\"text\"").is_err());
    }
}
