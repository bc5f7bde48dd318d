use axum::http::Method;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::settings;

pub fn cors_layer() -> CorsLayer {
    let configured = &settings().application.cors_allowed_origins;

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_origin(allowed_origins(configured))
}

fn allowed_origins(configured: &[String]) -> AllowOrigin {
    if configured.iter().any(|o| o == "*") {
        return AllowOrigin::any();
    }
    let origins: Vec<_> = configured.iter().filter_map(|o| o.parse().ok()).collect();
    AllowOrigin::list(origins)
}
