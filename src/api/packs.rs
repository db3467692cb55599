use axum::{
    extract::{Query, State},
    Json,
};
use ethers::types::Address;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::{
    error::{AppError, Result},
    models::ApiResponse,
    services::pack_history::{PackHistoryReport, PackHistoryRequest},
    services::pack_preview::PackQuote,
};

use super::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PackHistoryParams {
    #[serde(alias = "accountName", alias = "name", alias = "username")]
    pub account_name: Option<String>,
    pub wallet: Option<String>,
    #[serde(alias = "fromBlock")]
    pub from_block: Option<u64>,
    #[serde(alias = "maxDurationSeconds", alias = "maxSecs")]
    pub max_duration_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PackPreviewQuery {
    #[serde(alias = "clubId")]
    pub club_id: u64,
    #[serde(alias = "numPacks")]
    pub num_packs: Option<u64>,
    pub tier: Option<u8>,
}

// Internal helper that parses or transforms values for `to_history_request`.
fn to_history_request(params: PackHistoryParams) -> Result<PackHistoryRequest> {
    let wallet = match params.wallet.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(
            Address::from_str(raw)
                .map_err(|_| AppError::BadRequest(format!("Invalid wallet address '{}'", raw)))?,
        ),
        _ => None,
    };
    let account_name = params
        .account_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    if account_name.is_none() && wallet.is_none() {
        return Err(AppError::BadRequest(
            "account_name or wallet is required".to_string(),
        ));
    }

    Ok(PackHistoryRequest {
        account_name,
        wallet,
        from_block: params.from_block,
        max_duration: params.max_duration_seconds.map(Duration::from_secs),
    })
}

/// POST /api/v1/packs/history-onchain
pub async fn history_onchain(
    State(state): State<AppState>,
    Json(params): Json<PackHistoryParams>,
) -> Result<Json<ApiResponse<PackHistoryReport>>> {
    run_history(&state, params).await
}

/// GET /api/v1/packs/history-onchain
pub async fn history_onchain_query(
    State(state): State<AppState>,
    Query(params): Query<PackHistoryParams>,
) -> Result<Json<ApiResponse<PackHistoryReport>>> {
    run_history(&state, params).await
}

async fn run_history(
    state: &AppState,
    params: PackHistoryParams,
) -> Result<Json<ApiResponse<PackHistoryReport>>> {
    let request = to_history_request(params)?;
    tracing::info!(
        "Pack history requested for {}",
        request
            .account_name
            .clone()
            .or_else(|| request.wallet.map(|w| format!("{:#x}", w)))
            .unwrap_or_default()
    );
    let report = state.pipeline.run(request).await?;
    Ok(Json(ApiResponse::success(report)))
}

/// GET /api/v1/packs/preview
pub async fn preview_pack(
    State(state): State<AppState>,
    Query(query): Query<PackPreviewQuery>,
) -> Result<Json<ApiResponse<PackQuote>>> {
    if query.club_id == 0 {
        return Err(AppError::BadRequest("club_id must be > 0".to_string()));
    }
    let num_packs = query.num_packs.unwrap_or(1);
    if num_packs == 0 {
        return Err(AppError::BadRequest("num_packs must be > 0".to_string()));
    }

    let quote = state
        .previewer
        .quote_latest(
            state.chain.as_ref(),
            &state.contracts,
            query.club_id,
            num_packs,
            query.tier,
        )
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}
