use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use clap::Parser;
use docket_api::{
    BuildIndexResult, CaseIndexApi, CreateCaseResult, ListFilesResult, PresignUploadRequest,
    PresignUploadResult, API_CONTRACT_VERSION,
};
use docket_core::IndexError;
use docket_store::{FsObjectStore, LinkMethod, ObjectStore};
use serde::{Deserialize, Serialize};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const DEFAULT_BLOB_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
struct ServiceState {
    api: CaseIndexApi<FsObjectStore>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LinkQuery {
    expires: i64,
    token: String,
}

#[derive(Debug, Clone, Serialize)]
struct BlobPutResult {
    key: String,
    size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "docket-service")]
#[command(about = "HTTP service for the Docket case-document catalog")]
struct Args {
    #[arg(long, default_value = "./docket_data")]
    root: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Validation problems are the caller's fault; everything else is a store or
/// transport failure the caller may retry.
fn map_api_error(err: &anyhow::Error) -> ServiceError {
    if err.downcast_ref::<IndexError>().is_some() {
        ServiceError::bad_request(err.to_string())
    } else {
        tracing::warn!(error = %err, "store operation failed");
        ServiceError::internal(err.to_string())
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/cases", post(create_case))
        .route("/v1/cases/:case_id/uploads", post(presign_upload))
        .route("/v1/cases/:case_id/files", get(list_files))
        .route("/v1/cases/:case_id/index", post(build_index))
        .route("/v1/blobs/*key", put(blob_put).get(blob_get))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let store = FsObjectStore::open(&args.root)?;
    let state = ServiceState { api: CaseIndexApi::new(store) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, root = %args.root.display(), "docket service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn create_case(
    State(state): State<ServiceState>,
) -> Json<ServiceEnvelope<CreateCaseResult>> {
    Json(envelope(state.api.create_case()))
}

async fn presign_upload(
    State(state): State<ServiceState>,
    Path(case_id): Path<String>,
    Json(request): Json<PresignUploadRequest>,
) -> Result<Json<ServiceEnvelope<PresignUploadResult>>, ServiceError> {
    let result = state
        .api
        .presign_upload(&case_id, request)
        .map_err(|err| map_api_error(&err))?;
    Ok(Json(envelope(result)))
}

async fn list_files(
    State(state): State<ServiceState>,
    Path(case_id): Path<String>,
) -> Result<Json<ServiceEnvelope<ListFilesResult>>, ServiceError> {
    let result = state.api.list_files(&case_id).map_err(|err| map_api_error(&err))?;
    Ok(Json(envelope(result)))
}

async fn build_index(
    State(state): State<ServiceState>,
    Path(case_id): Path<String>,
) -> Result<Json<ServiceEnvelope<BuildIndexResult>>, ServiceError> {
    let result = state.api.build_index(&case_id).map_err(|err| map_api_error(&err))?;
    tracing::info!(case_id = %result.case_id, records = result.record_count, "manifest rebuilt");
    Ok(Json(envelope(result)))
}

async fn blob_put(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
    Query(link): Query<LinkQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ServiceEnvelope<BlobPutResult>>, ServiceError> {
    state
        .api
        .store()
        .verify_link(LinkMethod::Put, &key, link.expires, &link.token)
        .map_err(|err| ServiceError::forbidden(err.to_string()))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(DEFAULT_BLOB_CONTENT_TYPE);
    state
        .api
        .store()
        .put(&key, &body, content_type)
        .map_err(|err| map_api_error(&err))?;

    let size_bytes = body.len() as u64;
    Ok(Json(envelope(BlobPutResult { key, size_bytes })))
}

async fn blob_get(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
    Query(link): Query<LinkQuery>,
) -> Result<Response, ServiceError> {
    state
        .api
        .store()
        .verify_link(LinkMethod::Get, &key, link.expires, &link.token)
        .map_err(|err| ServiceError::forbidden(err.to_string()))?;

    let bytes = state
        .api
        .store()
        .get(&key)
        .map_err(|err| ServiceError::not_found(err.to_string()))?;
    let content_type = state
        .api
        .store()
        .content_type(&key)
        .map_err(|err| map_api_error(&err))?
        .unwrap_or_else(|| DEFAULT_BLOB_CONTENT_TYPE.to_string());

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}
