use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::indexer::polygon_client::RpcError;
use crate::services::pack_history::PackHistoryError;
use crate::services::pack_preview::PreviewError;
use crate::services::wallet_resolver::ResolveError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Blockchain RPC error: {0}")]
    BlockchainRPC(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Scan timeout: {0}")]
    ScanTimeout(String),

    #[error("Budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BlockchainRPC(_) => (StatusCode::BAD_GATEWAY, "BLOCKCHAIN_RPC_ERROR"),
            AppError::WalletNotFound(_) => (StatusCode::NOT_FOUND, "WALLET_NOT_FOUND"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::ScanTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "SCAN_TIMEOUT"),
            AppError::BudgetExhausted(_) => (StatusCode::GATEWAY_TIMEOUT, "BUDGET_EXHAUSTED"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match self {
            AppError::BlockchainRPC(msg)
            | AppError::WalletNotFound(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::ScanTimeout(msg)
            | AppError::BudgetExhausted(msg)
            | AppError::Internal(msg) => msg,
        };
        if status.is_server_error() {
            tracing::error!("{} ({}): {}", code, status, message);
        }

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        });

        (status, body).into_response()
    }
}

impl From<RpcError> for AppError {
    fn from(error: RpcError) -> Self {
        AppError::BlockchainRPC(error.to_string())
    }
}

impl From<ResolveError> for AppError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::EmptyName => AppError::BadRequest(error.to_string()),
            ResolveError::InvalidRpcUrl(_) => AppError::Internal(error.to_string()),
            ResolveError::Rpc(e) => e.into(),
        }
    }
}

impl From<PreviewError> for AppError {
    fn from(error: PreviewError) -> Self {
        match error {
            PreviewError::NoQuote { .. } => AppError::NotFound(error.to_string()),
            PreviewError::Rpc(e) => e.into(),
            _ => AppError::BlockchainRPC(error.to_string()),
        }
    }
}

impl From<PackHistoryError> for AppError {
    fn from(error: PackHistoryError) -> Self {
        match error {
            PackHistoryError::InvalidRequest(msg) => AppError::BadRequest(msg),
            PackHistoryError::WalletNotFound(_) => AppError::WalletNotFound(error.to_string()),
            PackHistoryError::ScanTimeout { .. } => AppError::ScanTimeout(error.to_string()),
            PackHistoryError::BudgetExhausted { .. } => {
                AppError::BudgetExhausted(error.to_string())
            }
            PackHistoryError::Resolve(e) => e.into(),
            PackHistoryError::Rpc(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
