use axum::{extract::State, Json};
use serde::Serialize;
use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub rpc: String,
    pub latest_block: Option<u64>,
    pub sale_contracts: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // Reachability only; a failing RPC does not fail the probe.
    let latest_block = match state.chain.block_number().await {
        Ok(block) => Some(block),
        Err(e) => {
            tracing::warn!("Health check could not reach Polygon RPC: {}", e);
            None
        }
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rpc: if latest_block.is_some() {
            "connected".to_string()
        } else {
            "unreachable".to_string()
        },
        latest_block,
        sale_contracts: state.contracts.addresses().len(),
    })
}
