use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use super::api::error::ErrorResponse;
use super::api::observation::{
    ObservationSummary, RecentImagesQuery, StartRequest, StartResponse, StopResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        super::api::observation::start,
        super::api::observation::stop,
        super::api::observation::status,
        super::api::observation::recent_images,
        super::api::observation::list_observations,
        super::api::observation::get_observation,
    ),
    components(
        schemas(
            StartRequest,
            StartResponse,
            StopResponse,
            RecentImagesQuery,
            ObservationSummary,
            ErrorResponse,
            crate::observation::ObservationParams,
            crate::state::ObservationSession,
            crate::state::ImageLogEntry,
            crate::state::StatusSnapshot,
            crate::state::SystemStatus,
            crate::state::TrackingSample,
            crate::acquisition::SubbandRange,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "XST Stream API",
        description = "API for controlling and monitoring XST correlation observations",
        version = "0.1.0"
    ),
    tags(
        (name = "observation", description = "Observation control and status")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}
