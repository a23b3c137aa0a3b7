use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use common::store::{CoordinationStore, OpenMode, StoreError};
use common::worker::list_workers as store_workers;
use common::{
    reducer_by_name, JobInfo, JobResults, JobStatus, OutputFormatRegistry, ReduceJobRequest,
    StoreErrorBody, StoreExistsResponse, StoreListResponse, StoreRequest, StoreValueResponse,
    WorkerHandle, WorkerRegisterRequest, WorkerRegisterResponse, WorkerSummary,
};
use glob::glob;
use std::fs;
use std::sync::{Mutex, MutexGuard};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::jobs::spawn_reduce_job;
use crate::state::AppState;

type ApiError = (StatusCode, Json<StoreErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/store/list", post(store_list))
        .route("/api/v1/store/open", post(store_open))
        .route("/api/v1/store/attribute/get", post(store_get_attribute))
        .route("/api/v1/store/attribute/set", post(store_set_attribute))
        .route("/api/v1/store/string/get", post(store_retrieve_string))
        .route("/api/v1/store/string/set", post(store_store_string))
        .route("/api/v1/store/exists", post(store_exists))
        .route("/api/v1/store/remove", post(store_remove))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/jobs", post(create_job))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/results", get(get_job_results))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- errores ---------------- */

fn store_error(e: StoreError) -> ApiError {
    let status = match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        StoreError::InvalidPath(_) | StoreError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
        StoreError::Transport(_) | StoreError::Lock(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(StoreErrorBody::from_error(&e)))
}

fn api_error(status: StatusCode, kind: &str, message: String) -> ApiError {
    (
        status,
        Json(StoreErrorBody {
            kind: kind.to_string(),
            message,
        }),
    )
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, ApiError> {
    m.lock().map_err(|_| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "lock",
            format!("lock envenenado: {}", what),
        )
    })
}

fn field(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value.ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("falta el campo '{}'", name),
        )
    })
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

/* ----- store ----- */

async fn store_list(
    State(state): State<AppState>,
    Json(req): Json<StoreRequest>,
) -> ApiResult<StoreListResponse> {
    let entries = state.store.list(&req.path).await.map_err(store_error)?;
    Ok(Json(StoreListResponse { entries }))
}

async fn store_open(
    State(state): State<AppState>,
    Json(req): Json<StoreRequest>,
) -> ApiResult<StoreExistsResponse> {
    let mode = req.mode.unwrap_or(OpenMode::READ);
    state.store.open(&req.path, mode).await.map_err(store_error)?;
    Ok(Json(StoreExistsResponse { exists: true }))
}

async fn store_get_attribute(
    State(state): State<AppState>,
    Json(req): Json<StoreRequest>,
) -> ApiResult<StoreValueResponse> {
    let name = field(req.name, "name")?;
    let value = state
        .store
        .get_attribute(&req.path, &name)
        .await
        .map_err(store_error)?;
    Ok(Json(StoreValueResponse { value }))
}

async fn store_set_attribute(
    State(state): State<AppState>,
    Json(req): Json<StoreRequest>,
) -> ApiResult<StoreExistsResponse> {
    let name = field(req.name, "name")?;
    let value = field(req.value, "value")?;
    state
        .store
        .set_attribute(&req.path, &name, &value)
        .await
        .map_err(store_error)?;
    Ok(Json(StoreExistsResponse { exists: true }))
}

async fn store_retrieve_string(
    State(state): State<AppState>,
    Json(req): Json<StoreRequest>,
) -> ApiResult<StoreValueResponse> {
    let value = state
        .store
        .retrieve_string(&req.path)
        .await
        .map_err(store_error)?;
    Ok(Json(StoreValueResponse { value }))
}

async fn store_store_string(
    State(state): State<AppState>,
    Json(req): Json<StoreRequest>,
) -> ApiResult<StoreExistsResponse> {
    let value = field(req.value, "value")?;
    state
        .store
        .store_string(&req.path, &value)
        .await
        .map_err(store_error)?;
    Ok(Json(StoreExistsResponse { exists: true }))
}

async fn store_exists(
    State(state): State<AppState>,
    Json(req): Json<StoreRequest>,
) -> ApiResult<StoreExistsResponse> {
    let exists = state.store.exists(&req.path).await.map_err(store_error)?;
    Ok(Json(StoreExistsResponse { exists }))
}

async fn store_remove(
    State(state): State<AppState>,
    Json(req): Json<StoreRequest>,
) -> ApiResult<StoreExistsResponse> {
    state.store.remove(&req.path).await.map_err(store_error)?;
    Ok(Json(StoreExistsResponse { exists: false }))
}

/* ----- workers ----- */

// Registra un worker nuevo con el siguiente id libre
async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> ApiResult<WorkerRegisterResponse> {
    let worker_id = {
        let mut next = lock(&state.next_worker_id, "next_worker_id")?;
        let id = *next;
        *next += 1;
        id
    };

    WorkerHandle::new(&state.store, worker_id)
        .register(&req.hostname)
        .await
        .map_err(store_error)?;

    info!("worker registrado: {} (host={})", worker_id, req.hostname);
    Ok(Json(WorkerRegisterResponse { worker_id }))
}

async fn list_workers(State(state): State<AppState>) -> ApiResult<Vec<WorkerSummary>> {
    let mut out = Vec::new();
    for id in store_workers(&state.store).await.map_err(store_error)? {
        let summary = WorkerHandle::new(&state.store, id)
            .summary()
            .await
            .map_err(store_error)?;
        out.push(summary);
    }
    Ok(Json(out))
}

/* ----- jobs ----- */

// Crea un job de reduce y arranca su coordinador
async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<ReduceJobRequest>,
) -> ApiResult<JobInfo> {
    let formats = OutputFormatRegistry::default();
    formats
        .get_by_key(&req.output_format)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "unknown_format", e.to_string()))?;
    reducer_by_name(&req.reducer)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "unknown_reducer", e.to_string()))?;

    let job_id = uuid::Uuid::new_v4().to_string();

    {
        let mut running = lock(&state.running_job, "running_job")?;
        if let Some(current) = running.as_ref() {
            return Err(api_error(
                StatusCode::CONFLICT,
                "job_running",
                format!("ya hay un job de reduce en curso: {}", current),
            ));
        }
        if req.partitions > 0 {
            *running = Some(job_id.clone());
        }
    }

    let job_output_dir = format!("{}/{}", req.output_dir.trim_end_matches('/'), job_id);
    if let Err(e) = fs::create_dir_all(&job_output_dir) {
        // los workers crean el directorio igual al escribir
        warn!("no se pudo crear {}: {}", job_output_dir, e);
    }

    let now = Utc::now();
    let initial_status = if req.partitions == 0 {
        JobStatus::Succeeded
    } else {
        JobStatus::Accepted
    };

    let job_info = JobInfo {
        id: job_id.clone(),
        name: req.name,
        status: initial_status,
        partitions: req.partitions,
        output_format: req.output_format,
        reducer: req.reducer,
        output_dir: job_output_dir,

        submitted_at: now,
        started_at: None,
        finished_at: if req.partitions == 0 { Some(now) } else { None },
        assigned_partitions: 0,
        completed_partitions: 0,
        reassignments: 0,
        error: None,
    };

    lock(&state.jobs, "jobs")?.insert(job_id.clone(), job_info.clone());

    info!(
        "job {} recibido: {} partición(es), reducer={}, formato={}",
        job_id, job_info.partitions, job_info.reducer, job_info.output_format
    );

    if req.partitions > 0 {
        spawn_reduce_job(state.clone(), job_id);
    }

    Ok(Json(job_info))
}

fn not_found(id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "not_found", format!("job {}", id))
}

// Devuelve info de un job
async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<JobInfo> {
    let jobs = lock(&state.jobs, "jobs")?;
    jobs.get(&id).cloned().map(Json).ok_or_else(|| not_found(&id))
}

// Salidas registradas por el coordinador + archivos part-* visibles
async fn get_job_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<JobResults> {
    let job = {
        let jobs = lock(&state.jobs, "jobs")?;
        jobs.get(&id).cloned().ok_or_else(|| not_found(&id))?
    };

    let finished = lock(&state.results, "results")?
        .get(&id)
        .cloned()
        .unwrap_or_default();

    let mut files = Vec::new();
    if let Ok(paths) = glob(&format!("{}/part-*", job.output_dir)) {
        for path in paths.flatten() {
            let name = path.to_string_lossy().to_string();
            if path.is_file() && !name.ends_with(".tmp") {
                files.push(name);
            }
        }
    }

    Ok(Json(JobResults {
        job_id: job.id,
        status: job.status,
        output_dir: job.output_dir,
        finished,
        files,
    }))
}
