pub mod detect;
pub mod remote;
pub mod safe_video;
pub mod scans;

use axum::Router;
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

use crate::AppState;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    let processing = Router::new()
        .merge(detect::routes())
        .merge(remote::routes())
        .merge(safe_video::routes());

    Router::new()
        .merge(with_upload_rate_limit(processing))
        .merge(scans::routes())
}

/// Per-IP limit for the endpoints that decode media or run the model
fn with_upload_rate_limit(router: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(2) // one token every 2 seconds
        .burst_size(10)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("Failed to build rate limit config");

    router.layer(GovernorLayer {
        config: rate_limit_config.into(),
    })
}
