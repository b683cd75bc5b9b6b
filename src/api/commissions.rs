//! Admin reporting over the commission ledger, plus the reversal mutator.

use axum::extract::{Path, Query, State};
use axum::Json;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::AppState;
use crate::db::repo::{EntryFilter, ReversalOutcome};
use crate::domain::{CommissionLedgerEntry, EntryStatus, TimeMs, UserId};
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDto {
    pub id: i64,
    pub beneficiary: String,
    pub source: String,
    pub period_or_trigger: String,
    pub level: u32,
    pub rate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lots: Option<String>,
    pub amount: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_trigger: Option<String>,
    pub created_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credited_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversed_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reversal_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<CommissionLedgerEntry> for EntryDto {
    fn from(entry: CommissionLedgerEntry) -> Self {
        EntryDto {
            id: entry.id,
            beneficiary: entry.beneficiary.as_str().to_string(),
            source: entry.source.as_str().to_string(),
            period_or_trigger: entry.period_or_trigger,
            level: entry.level,
            rate: entry.rate.to_canonical_string(),
            lots: entry.lots.map(|l| l.to_canonical_string()),
            amount: entry.amount.to_canonical_string(),
            status: entry.status.as_str().to_string(),
            batch_id: entry.batch_id,
            activation_trigger: entry.activation_trigger.map(|t| t.as_str().to_string()),
            created_at_ms: entry.created_at.as_i64(),
            credited_at_ms: entry.credited_at.map(|t| t.as_i64()),
            reversed_at_ms: entry.reversed_at.map(|t| t.as_i64()),
            reversed_by: entry.reversed_by.map(|u| u.as_str().to_string()),
            reversal_reason: entry.reversal_reason,
            error: entry.error,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsQuery {
    pub beneficiary: Option<String>,
    pub source: Option<String>,
    pub period_or_trigger: Option<String>,
    pub status: Option<String>,
    pub batch_id: Option<String>,
}

pub async fn list_commissions(
    Query(params): Query<CommissionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<EntryDto>>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            EntryStatus::from_str(s)
                .map_err(|_| AppError::BadRequest(format!("unknown entry status: {}", s)))
        })
        .transpose()?;

    let filter = EntryFilter {
        beneficiary: params.beneficiary.map(UserId::new),
        source: params.source.map(UserId::new),
        period_or_trigger: params.period_or_trigger,
        status,
        batch_id: params.batch_id,
    };

    let entries = state.repo.query_entries(&filter).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    pub period_or_trigger: String,
    /// Comma-separated beneficiary ids to include wallet details for.
    pub beneficiaries: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSummaryDto {
    pub level: u32,
    pub entries: i64,
    pub total_amount: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeneficiarySummaryDto {
    pub user: String,
    pub balance: String,
    pub total_earned: String,
    pub credited_entries: i64,
    pub credited_amount: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub period_or_trigger: String,
    pub levels: Vec<LevelSummaryDto>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub beneficiaries: Vec<BeneficiarySummaryDto>,
}

pub async fn summary(
    Query(params): Query<SummaryQuery>,
    State(state): State<AppState>,
) -> Result<Json<SummaryResponse>, AppError> {
    let levels = state
        .repo
        .level_summary(&params.period_or_trigger)
        .await?
        .into_iter()
        .map(|s| LevelSummaryDto {
            level: s.level,
            entries: s.entries,
            total_amount: s.total_amount.to_canonical_string(),
        })
        .collect();

    let users: Vec<UserId> = params
        .beneficiaries
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(UserId::new)
        .collect();

    let beneficiaries = try_join_all(users.into_iter().map(|user| {
        let repo = state.repo.clone();
        let key = params.period_or_trigger.clone();
        async move {
            let wallet = repo.get_wallet(&user).await?;
            let (credited_entries, credited_amount) = repo
                .credited_totals_for_beneficiary(&user, Some(&key))
                .await?;
            Ok::<BeneficiarySummaryDto, sqlx::Error>(BeneficiarySummaryDto {
                user: user.as_str().to_string(),
                balance: wallet.balance().to_canonical_string(),
                total_earned: wallet.total_earned().to_canonical_string(),
                credited_entries,
                credited_amount: credited_amount.to_canonical_string(),
            })
        }
    }))
    .await?;

    Ok(Json(SummaryResponse {
        period_or_trigger: params.period_or_trigger,
        levels,
        beneficiaries,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseRequest {
    pub actor_id: String,
    pub reason: String,
}

pub async fn reverse_commission(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<ReverseRequest>,
) -> Result<Json<EntryDto>, AppError> {
    if body.actor_id.trim().is_empty() {
        return Err(AppError::BadRequest("actorId must not be empty".into()));
    }
    if body.reason.trim().is_empty() {
        return Err(AppError::BadRequest("reason must not be empty".into()));
    }

    let outcome = state
        .repo
        .reverse_entry(id, &UserId::new(body.actor_id), &body.reason, TimeMs::now())
        .await?;

    match outcome {
        ReversalOutcome::Reversed(entry) => Ok(Json(entry.into())),
        ReversalOutcome::AlreadyReversed => Err(AppError::Conflict(format!(
            "commission entry {} is already reversed",
            id
        ))),
        ReversalOutcome::NotFound => {
            Err(AppError::NotFound(format!("commission entry {}", id)))
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDto {
    pub user: String,
    pub balance: String,
    pub total_earned: String,
}

pub async fn get_wallet(
    Path(user): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WalletDto>, AppError> {
    let user = UserId::new(user);
    let wallet = state.repo.get_wallet(&user).await?;
    Ok(Json(WalletDto {
        user: user.as_str().to_string(),
        balance: wallet.balance().to_canonical_string(),
        total_earned: wallet.total_earned().to_canonical_string(),
    }))
}
