use axum::{
    extract::{Query, State},
    Json,
};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::ApiResponse,
};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveWalletQuery {
    #[serde(alias = "account_name", alias = "username")]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ResolvedWallet {
    pub name: String,
    pub wallet: Address,
}

/// GET /api/v1/wallet/resolve
pub async fn resolve_wallet(
    State(state): State<AppState>,
    Query(query): Query<ResolveWalletQuery>,
) -> Result<Json<ApiResponse<ResolvedWallet>>> {
    let name = query.name.trim().to_string();
    match state.resolver.resolve(&name).await? {
        Some(wallet) => Ok(Json(ApiResponse::success(ResolvedWallet { name, wallet }))),
        None => Err(AppError::WalletNotFound(format!(
            "no wallet registered for account '{}'",
            name
        ))),
    }
}
