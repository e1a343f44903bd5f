//! ---
//! farm_section: "05-networking-external-interfaces"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "REST surface for cows, measurements, and reports."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use ingfarm_core::{MeasurementService, ServiceError};
use ingfarm_persistence::{
    CowRecord, CowWeightReport, DailyMilkReport, MilkSummaryReport, NewCow, PersistenceError,
};
use ingfarm_sim::EmittedMeasurement;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared API state exposed to handlers.
pub struct ApiState {
    service: MeasurementService,
    version: String,
    start: Instant,
}

impl ApiState {
    pub fn new(service: MeasurementService, version: impl Into<String>) -> Self {
        Self {
            service,
            version: version.into(),
            start: Instant::now(),
        }
    }

    pub fn service(&self) -> &MeasurementService {
        &self.service
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("version", &self.version)
            .field("uptime_seconds", &self.start.elapsed().as_secs())
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Build the router without binding a socket.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/api/v1/cows", get(list_cows))
        .route("/api/v1/cows/", get(list_cows))
        .route("/api/v1/cows/:id", get(get_cow).post(create_cow))
        .route("/api/v1/measurements/:cow_id", get(next_measurement))
        .route("/api/v1/replay/cows", get(known_cows))
        .route("/api/v1/replay/reset", post(reset_all))
        .route("/api/v1/replay/cursors/:cow_id", get(cursor_status))
        .route("/api/v1/replay/cursors/:cow_id/reset", post(reset_cow))
        .route(
            "/api/v1/reports/milk/daily/:cow_id/:date",
            get(daily_milk_report),
        )
        .route("/api/v1/reports/milk/summary/:cow_id", get(milk_summary))
        .route("/api/v1/reports/weight/:cow_id", get(weight_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve the API until [`ApiServer::shutdown`] is called.
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let bound = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %bound, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %bound, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
    version: String,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct CursorResponse {
    cow_id: String,
    position: usize,
    emitted: u64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(context: &str, err: impl fmt::Display) -> Self {
        error!(error = %err, "{context}");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{context}: {err}"),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::InvalidCowId(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            PersistenceError::CowExists(_) => ApiError::new(StatusCode::CONFLICT, err.to_string()),
            other => ApiError::internal("Storage error", other),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Replay(err) => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            ServiceError::Persistence(err) => err.into(),
        }
    }
}

async fn get_root(State(state): State<Arc<ApiState>>) -> Json<RootResponse> {
    Json(RootResponse {
        message: "Welcome to IngFarm API",
        version: state.version.clone(),
        uptime_seconds: state.start.elapsed().as_secs(),
    })
}

async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Run store-backed work on the blocking pool; SQLite calls park on the connection mutex.
async fn blocking<T, F>(state: &Arc<ApiState>, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ApiState) -> Result<T, ApiError> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .map_err(|err| ApiError::internal("Request task failed", err))?
}

async fn create_cow(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(cow): Json<NewCow>,
) -> Result<(StatusCode, Json<CowRecord>), ApiError> {
    let record = blocking(&state, move |state| {
        Ok(state.service.store().create_cow(&id, &cow)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_cow(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<CowRecord>, ApiError> {
    blocking(&state, move |state| {
        state
            .service
            .store()
            .cow(&id)?
            .map(Json)
            .ok_or_else(|| {
                ApiError::new(StatusCode::NOT_FOUND, format!("Cow with id {id} not found"))
            })
    })
    .await
}

async fn list_cows(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<CowRecord>>, ApiError> {
    blocking(&state, |state| Ok(Json(state.service.store().list_cows()?))).await
}

async fn next_measurement(
    State(state): State<Arc<ApiState>>,
    Path(cow_id): Path<String>,
) -> Result<Json<EmittedMeasurement>, ApiError> {
    blocking(&state, move |state| {
        Ok(Json(state.service.next_measurement(&cow_id)?))
    })
    .await
}

async fn reset_all(State(state): State<Arc<ApiState>>) -> Json<MessageResponse> {
    state.service.reset(None);
    Json(MessageResponse {
        message: "All replay cursors reset".into(),
    })
}

async fn reset_cow(
    State(state): State<Arc<ApiState>>,
    Path(cow_id): Path<String>,
) -> Json<MessageResponse> {
    state.service.reset(Some(&cow_id));
    Json(MessageResponse {
        message: format!("Replay cursor reset for cow {cow_id}"),
    })
}

async fn known_cows(State(state): State<Arc<ApiState>>) -> Json<Vec<String>> {
    Json(state.service.known_cow_ids().into_iter().collect())
}

async fn cursor_status(
    State(state): State<Arc<ApiState>>,
    Path(cow_id): Path<String>,
) -> Result<Json<CursorResponse>, ApiError> {
    let engine = state.service.engine();
    match (engine.cursor_position(&cow_id), engine.emission_count(&cow_id)) {
        (Some(position), Some(emitted)) => Ok(Json(CursorResponse {
            cow_id,
            position,
            emitted,
        })),
        _ => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("No replay cursor for cow_id: {cow_id}"),
        )),
    }
}

async fn daily_milk_report(
    State(state): State<Arc<ApiState>>,
    Path((cow_id, date)): Path<(String, String)>,
) -> Result<Json<DailyMilkReport>, ApiError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|err| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid date {date}: {err}"))
    })?;
    blocking(&state, move |state| {
        state
            .service
            .store()
            .daily_milk_report(&cow_id, date)
            .map_err(|err| ApiError::internal("Error generating report", err))?
            .map(Json)
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::NOT_FOUND,
                    format!("No milk measurements found for {date}"),
                )
            })
    })
    .await
}

async fn milk_summary(
    State(state): State<Arc<ApiState>>,
    Path(cow_id): Path<String>,
) -> Result<Json<MilkSummaryReport>, ApiError> {
    blocking(&state, move |state| {
        state
            .service
            .store()
            .milk_summary(&cow_id)
            .map(Json)
            .map_err(|err| ApiError::internal("Error generating summary", err))
    })
    .await
}

async fn weight_report(
    State(state): State<Arc<ApiState>>,
    Path(cow_id): Path<String>,
) -> Result<Json<CowWeightReport>, ApiError> {
    blocking(&state, move |state| {
        state
            .service
            .store()
            .weight_report(&cow_id, Utc::now())
            .map_err(|err| ApiError::internal("Error generating weight report", err))?
            .map(Json)
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::NOT_FOUND,
                    format!("No weight measurements found for cow {cow_id}"),
                )
            })
    })
    .await
}
