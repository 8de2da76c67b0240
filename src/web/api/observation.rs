use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

use crate::config::Permission;
use crate::observation::ObservationParams;
use crate::state::{
    load_all_logs, load_log, ImageLogEntry, ObservationSession, StatusSnapshot, SESSION_LOG_FILE,
};
use crate::web::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::auth::{require_permission, AppState, AuthenticatedUser};

pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Start parameters; anything omitted falls back to the configuration.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StartRequest {
    pub folder: Option<String>,
    pub threads: Option<usize>,
    pub step: Option<u64>,
    pub height_m: Option<f64>,
    pub extent_m: Option<f64>,
}

impl StartRequest {
    pub fn into_params(self, defaults: ObservationParams) -> ObservationParams {
        ObservationParams {
            folder: self.folder.map(PathBuf::from).unwrap_or(defaults.folder),
            threads: self.threads.unwrap_or(defaults.threads),
            step: self.step.unwrap_or(defaults.step),
            height_m: self.height_m.unwrap_or(defaults.height_m),
            extent_m: self.extent_m.unwrap_or(defaults.extent_m),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StartResponse {
    pub session: ObservationSession,
    pub params: ObservationParams,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopResponse {
    pub stopping: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecentImagesQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ObservationSummary {
    pub name: String,
    pub images: usize,
    pub first_image: Option<String>,
    pub last_image: Option<String>,
}

impl ObservationSummary {
    fn from_log(name: String, log: &[ImageLogEntry]) -> Self {
        ObservationSummary {
            name,
            images: log.len(),
            first_image: log.first().map(|e| e.timestamp.to_rfc3339()),
            last_image: log.last().map(|e| e.timestamp.to_rfc3339()),
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/observation/start",
    request_body = StartRequest,
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Observation started", body = StartResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Observation already running", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "observation"
)]
pub async fn start(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<StartResponse>> {
    require_permission(&user, Permission::ControlObservation)?;

    let params = request.into_params(state.config.default_params());
    let session = state.controller.start(params.clone())?;
    log::info!("{} started observation {}", user.name, session.name);

    Ok(Json(StartResponse { session, params }))
}

#[utoipa::path(
    post,
    path = "/api/observation/stop",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Stop requested", body = StopResponse),
        (status = 409, description = "No observation running", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "observation"
)]
pub async fn stop(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<StopResponse>> {
    require_permission(&user, Permission::ControlObservation)?;

    if !state.controller.stop() {
        return Err(ApiError::Conflict("no_observation_running"));
    }
    log::info!("{} requested stop", user.name);
    Ok(Json(StopResponse { stopping: true }))
}

#[utoipa::path(
    get,
    path = "/api/status",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Pipeline status", body = StatusSnapshot),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "observation"
)]
pub async fn status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<StatusSnapshot>> {
    require_permission(&user, Permission::ViewStatus)?;
    Ok(Json(state.controller.state().snapshot()))
}

#[utoipa::path(
    get,
    path = "/api/images/recent",
    params(
        ("limit" = Option<usize>, Query, description = "Maximum number of images (default 10)")
    ),
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Newest images first", body = Vec<ImageLogEntry>),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "observation"
)]
pub async fn recent_images(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<RecentImagesQuery>,
) -> ApiResult<Json<Vec<ImageLogEntry>>> {
    require_permission(&user, Permission::ViewStatus)?;
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    Ok(Json(state.controller.state().recent_images(limit)))
}

#[utoipa::path(
    get,
    path = "/api/observations",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Past observations", body = Vec<ObservationSummary>),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "observation"
)]
pub async fn list_observations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<Vec<ObservationSummary>>> {
    require_permission(&user, Permission::ViewStatus)?;

    let logs = load_all_logs(&state.config.output.base_folder)?;
    let summaries = logs
        .into_iter()
        .rev()
        .map(|(name, log)| ObservationSummary::from_log(name, &log))
        .collect();
    Ok(Json(summaries))
}

#[utoipa::path(
    get,
    path = "/api/observations/{name}",
    params(
        ("name" = String, Path, description = "Observation name")
    ),
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Image log of the observation", body = Vec<ImageLogEntry>),
        (status = 404, description = "Observation not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "observation"
)]
pub async fn get_observation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<ImageLogEntry>>> {
    require_permission(&user, Permission::ViewStatus)?;

    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(ApiError::NotFound);
    }
    let log_path = state
        .config
        .output
        .base_folder
        .join(&name)
        .join(SESSION_LOG_FILE);
    if !log_path.is_file() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(load_log(&log_path)?))
}
