//! Ingestion endpoints for facts pushed by the trading and identity
//! subsystems.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::AppState;
use crate::domain::{ActivationTrigger, Decimal, TimeMs, TradeFact, UserId, VolumeAccumulator};
use crate::engine::DistributionResult;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeClosedRequest {
    pub user_id: String,
    pub symbol: String,
    pub quantity_lots: Decimal,
    pub notional_volume: Option<Decimal>,
    pub trade_id: Option<i64>,
    pub closed_at_ms: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorDto {
    pub user: String,
    pub period: String,
    pub total_lots: String,
    pub total_trades: i64,
    pub total_notional: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fact_key: Option<String>,
}

impl From<VolumeAccumulator> for AccumulatorDto {
    fn from(acc: VolumeAccumulator) -> Self {
        AccumulatorDto {
            user: acc.user.as_str().to_string(),
            period: acc.period.as_str().to_string(),
            total_lots: acc.total_lots.to_canonical_string(),
            total_trades: acc.total_trades,
            total_notional: acc.total_notional.to_canonical_string(),
            status: acc.status.as_str().to_string(),
            last_fact_key: acc.last_fact_key,
        }
    }
}

pub async fn trade_closed(
    State(state): State<AppState>,
    Json(body): Json<TradeClosedRequest>,
) -> Result<Json<AccumulatorDto>, AppError> {
    if body.user_id.trim().is_empty() {
        return Err(AppError::BadRequest("userId must not be empty".into()));
    }

    let fact = TradeFact::new(
        UserId::new(body.user_id),
        body.symbol,
        body.quantity_lots,
        body.notional_volume.unwrap_or_else(Decimal::zero),
        body.trade_id,
        TimeMs::new(body.closed_at_ms),
    );

    let snapshot = state.repo.record_volume(&fact).await?;
    Ok(Json(snapshot.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivatedRequest {
    pub user_id: String,
    pub trigger: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelPayoutDto {
    pub level: u32,
    pub beneficiary: String,
    pub amount: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionResultDto {
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub commissions_created: u32,
    pub total_distributed: String,
    pub per_level: Vec<LevelPayoutDto>,
}

impl From<DistributionResult> for DistributionResultDto {
    fn from(result: DistributionResult) -> Self {
        DistributionResultDto {
            processed: result.processed,
            reason: result.reason.map(|r| r.as_str().to_string()),
            commissions_created: result.commissions_created,
            total_distributed: result.total_distributed.to_canonical_string(),
            per_level: result
                .per_level
                .into_iter()
                .map(|p| LevelPayoutDto {
                    level: p.level,
                    beneficiary: p.beneficiary.as_str().to_string(),
                    amount: p.amount.to_canonical_string(),
                })
                .collect(),
        }
    }
}

pub async fn user_activated(
    State(state): State<AppState>,
    Json(body): Json<UserActivatedRequest>,
) -> Result<Json<DistributionResultDto>, AppError> {
    if body.user_id.trim().is_empty() {
        return Err(AppError::BadRequest("userId must not be empty".into()));
    }
    let trigger = ActivationTrigger::from_str(&body.trigger).map_err(|_| {
        AppError::BadRequest(format!("unknown activation trigger: {}", body.trigger))
    })?;

    let settings = state.repo.load_settings().await?;
    let result = state
        .instant
        .distribute_activation(
            &settings,
            &UserId::new(body.user_id),
            trigger,
            TimeMs::now(),
        )
        .await?;

    Ok(Json(result.into()))
}
