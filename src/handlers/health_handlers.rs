//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and both directories

use crate::services::{file_sink::probe_writable, pipeline::GenerationPipeline};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against SQLite (`SELECT 1`).
/// 2. Probes that the output directory accepts new files.
/// 3. Probes the staging directory the generator works in.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(pipeline): State<GenerationPipeline>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pipeline.records().pool())
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let output_check = match pipeline.files().ensure_writable().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(e.to_string()),
    };

    let staging_check = match probe_writable(pipeline.staging_dir()).await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(e.to_string()),
    };

    let overall_ok = sqlite_check.ok && output_check.ok && staging_check.ok;

    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite_check);
    checks.insert("output_dir", output_check);
    checks.insert("staging_dir", staging_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use crate::{
        routes::routes::routes,
        test_utils::{GENERATE_HTML, TestEnv, TestOptions},
    };
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::Value;

    #[tokio::test]
    async fn healthz_is_ok() {
        let env = TestEnv::new(GENERATE_HTML).await;
        let server = TestServer::new(routes().with_state(env.pipeline.clone())).unwrap();

        let body: Value = server.get("/healthz").await.json();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn readyz_reports_each_check() {
        let env = TestEnv::new(GENERATE_HTML).await;
        let server = TestServer::new(routes().with_state(env.pipeline.clone())).unwrap();

        let response = server.get("/readyz").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["output_dir"]["ok"], true);
        assert_eq!(body["checks"]["staging_dir"]["ok"], true);
    }

    #[tokio::test]
    async fn readyz_fails_without_output_dir() {
        let env = TestEnv::with_options(
            GENERATE_HTML,
            TestOptions {
                missing_output_dir: true,
                ..TestOptions::default()
            },
        )
        .await;
        let server = TestServer::new(routes().with_state(env.pipeline.clone())).unwrap();

        let response = server.get("/readyz").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = response.json();
        assert_eq!(body["status"], "error");
        assert_eq!(body["checks"]["output_dir"]["ok"], false);
    }
}
