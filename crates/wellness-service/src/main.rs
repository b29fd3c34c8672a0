use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use wellness_api::{
    InvestmentPlan, PlanRequest, RankRequest, RankResponse, ReportRequest, WellnessApi,
    WellnessReport, API_CONTRACT_VERSION,
};
use wellness_core::CandidateItem;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const LOG_FILTER_ENV: &str = "WELLNESS_LOG";

#[derive(Debug, Clone)]
struct ServiceState {
    api: WellnessApi,
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
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct CatalogResponse {
    items: Vec<CandidateItem>,
}

#[derive(Debug, Parser)]
#[command(name = "wellness-service")]
#[command(about = "Local HTTP service for the wellness planner")]
struct Args {
    /// Report config (YAML or JSON) used when a request carries none.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(err: &anyhow::Error) -> ServiceError {
        let message = format!("{err:#}");
        tracing::warn!(error = %message, "request failed");
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message }
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
        .route("/v1/catalog", get(catalog))
        .route("/v1/rank", post(rank))
        .route("/v1/plan", post(plan))
        .route("/v1/report", post(report))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let api = match args.config.as_deref() {
        Some(path) => WellnessApi::from_config_file(path)?,
        None => WellnessApi::default(),
    };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "wellness service listening");
    axum::serve(listener, app(ServiceState { api })).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn catalog(State(state): State<ServiceState>) -> Json<ServiceEnvelope<CatalogResponse>> {
    Json(envelope(CatalogResponse { items: state.api.catalog() }))
}

async fn rank(
    State(state): State<ServiceState>,
    Json(request): Json<RankRequest>,
) -> Result<Json<ServiceEnvelope<RankResponse>>, ServiceError> {
    let response = state.api.rank(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(response)))
}

async fn plan(
    State(state): State<ServiceState>,
    Json(request): Json<PlanRequest>,
) -> Result<Json<ServiceEnvelope<InvestmentPlan>>, ServiceError> {
    let plan = state.api.plan(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(plan)))
}

async fn report(
    State(state): State<ServiceState>,
    Json(request): Json<ReportRequest>,
) -> Result<Json<ServiceEnvelope<WellnessReport>>, ServiceError> {
    let report = state.api.report(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(report)))
}
