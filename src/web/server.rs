use axum::{routing::get, routing::post, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::observation::ObservationController;

use super::api::observation as observation_handlers;
use super::api_doc::ApiDoc;
use super::auth::AppState;

pub fn router(controller: Arc<ObservationController>) -> Router {
    let state = AppState {
        config: Arc::clone(controller.config()),
        controller,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Observation control
        .route(
            "/api/observation/start",
            post(observation_handlers::start),
        )
        .route("/api/observation/stop", post(observation_handlers::stop))
        // Monitoring
        .route("/api/status", get(observation_handlers::status))
        .route(
            "/api/images/recent",
            get(observation_handlers::recent_images),
        )
        .route(
            "/api/observations",
            get(observation_handlers::list_observations),
        )
        .route(
            "/api/observations/{name}",
            get(observation_handlers::get_observation),
        )
        // OpenAPI / Swagger
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(controller: Arc<ObservationController>) -> std::io::Result<()> {
    let bind_addr = controller.config().web.bind.clone();
    let app = router(controller);

    log::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await
}
