//! Payout run trigger (scheduler-facing) and batch-run audit views.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::{BatchRun, PeriodKey, TimeMs};
use crate::engine::{CancelToken, PayoutSkip};
use crate::error::AppError;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunPayoutRequest {
    pub target_period: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchErrorDto {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRunDto {
    pub id: String,
    pub target_period: String,
    pub status: String,
    pub started_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<i64>,
    pub traders_processed: i64,
    pub entries_created: i64,
    pub total_amount: String,
    pub errors: Vec<BatchErrorDto>,
}

impl From<BatchRun> for BatchRunDto {
    fn from(run: BatchRun) -> Self {
        BatchRunDto {
            id: run.id,
            target_period: run.target_period.as_str().to_string(),
            status: run.status.as_str().to_string(),
            started_at_ms: run.started_at.as_i64(),
            finished_at_ms: run.finished_at.map(|t| t.as_i64()),
            traders_processed: run.traders_processed,
            entries_created: run.entries_created,
            total_amount: run.total_amount.to_canonical_string(),
            errors: run
                .errors
                .into_iter()
                .map(|e| BatchErrorDto {
                    source: e.source.as_str().to_string(),
                    message: e.message,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutResponse {
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<BatchRunDto>,
}

pub async fn run_payout(
    State(state): State<AppState>,
    body: Option<Json<RunPayoutRequest>>,
) -> Result<Json<PayoutResponse>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let target = body
        .target_period
        .map(|s| {
            s.parse::<PeriodKey>()
                .map_err(|e| AppError::BadRequest(e.to_string()))
        })
        .transpose()?;

    let settings = state.repo.load_settings().await?;
    let outcome = state
        .batch
        .run_monthly_payout(&settings, target, TimeMs::now(), &CancelToken::new())
        .await?;

    let reason = outcome.skip.map(|skip| match skip {
        PayoutSkip::Disabled => "DISABLED".to_string(),
        PayoutSkip::AlreadyProcessed(period) => format!("already processed {}", period),
    });

    Ok(Json(PayoutResponse {
        executed: outcome.run.is_some(),
        reason,
        run: outcome.run.map(Into::into),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRunsQuery {
    pub period: Option<String>,
}

pub async fn list_runs(
    Query(params): Query<ListRunsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<BatchRunDto>>, AppError> {
    let period = params
        .period
        .map(|s| {
            s.parse::<PeriodKey>()
                .map_err(|e| AppError::BadRequest(e.to_string()))
        })
        .transpose()?;

    let runs = state.repo.list_batch_runs(period.as_ref()).await?;
    Ok(Json(runs.into_iter().map(Into::into).collect()))
}
