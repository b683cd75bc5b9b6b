pub mod commissions;
pub mod events;
pub mod health;
pub mod payouts;

use crate::db::Repository;
use crate::engine::{BatchPayoutEngine, InstantDistributor};
use crate::referral::ReferralDirectory;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub instant: Arc<InstantDistributor>,
    pub batch: Arc<BatchPayoutEngine>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, directory: Arc<dyn ReferralDirectory>) -> Self {
        let instant = Arc::new(InstantDistributor::new(repo.clone(), directory.clone()));
        let batch = Arc::new(BatchPayoutEngine::new(repo.clone(), directory));
        Self {
            repo,
            instant,
            batch,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/events/trade-closed", post(events::trade_closed))
        .route("/v1/events/user-activated", post(events::user_activated))
        .route("/v1/payouts/run", post(payouts::run_payout))
        .route("/v1/payouts/runs", get(payouts::list_runs))
        .route("/v1/commissions", get(commissions::list_commissions))
        .route("/v1/commissions/summary", get(commissions::summary))
        .route(
            "/v1/commissions/:id/reverse",
            post(commissions::reverse_commission),
        )
        .route("/v1/wallets/:user", get(commissions::get_wallet))
        .layer(cors)
        .with_state(state)
}
