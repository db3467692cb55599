use async_trait::async_trait;
use ethers::types::{Address, Bytes, Filter, Log, U64};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

fn rpc_request(method: &str, params: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    })
}

fn call_params(to: Address, data: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "to": format!("{:#x}", to),
        "data": format!("0x{}", hex::encode(data)),
    })
}

fn block_tag(block_number: u64) -> String {
    format!("{:#x}", block_number)
}

/// How an upstream failure should be treated by callers. Decided here, at
/// the transport boundary, so business logic never inspects messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorKind {
    RangeTooLarge,
    /// Timeouts and temporarily unavailable gateways.
    Timeout,
    RateLimited,
    Reverted,
    Fatal,
}

impl RpcErrorKind {
    /// Whether a log scan may shrink its window and retry.
    pub fn is_scan_retryable(self) -> bool {
        matches!(
            self,
            RpcErrorKind::RangeTooLarge | RpcErrorKind::Timeout | RpcErrorKind::RateLimited
        )
    }
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RpcErrorKind::RangeTooLarge => "range too large",
            RpcErrorKind::Timeout => "timeout",
            RpcErrorKind::RateLimited => "rate limited",
            RpcErrorKind::Reverted => "reverted",
            RpcErrorKind::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} RPC error: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_transport(method: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            RpcErrorKind::Timeout
        } else if let Some(status) = err.status() {
            classify_http_status(status)
        } else {
            RpcErrorKind::Fatal
        };
        Self::new(kind, format!("{}: {}", method, err))
    }
}

/// Maps a JSON-RPC error object onto a kind. Providers disagree on codes for
/// log-range limits, so the message is consulted as well.
pub fn classify_rpc_error(code: i64, message: &str) -> RpcErrorKind {
    let lower = message.to_ascii_lowercase();
    if code == 3 || lower.contains("revert") {
        return RpcErrorKind::Reverted;
    }
    if code == 429
        || code == -32029
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("exceeded the quota")
    {
        return RpcErrorKind::RateLimited;
    }
    if code == -32005
        || lower.contains("block range")
        || lower.contains("range is too")
        || lower.contains("query returned more than")
        || lower.contains("response size")
        || lower.contains("too many results")
        || lower.contains("limit exceeded")
    {
        return RpcErrorKind::RangeTooLarge;
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return RpcErrorKind::Timeout;
    }
    RpcErrorKind::Fatal
}

pub fn classify_http_status(status: StatusCode) -> RpcErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RpcErrorKind::RateLimited,
        StatusCode::PAYLOAD_TOO_LARGE => RpcErrorKind::RangeTooLarge,
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::GATEWAY_TIMEOUT
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => RpcErrorKind::Timeout,
        _ => RpcErrorKind::Fatal,
    }
}

#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;
}

#[async_trait]
pub trait LogSource: Send + Sync {
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError>;
}

#[async_trait]
pub trait ContractCaller: Send + Sync {
    /// Read-only call evaluated against state at `block_number`.
    async fn call_at(&self, to: Address, data: Vec<u8>, block_number: u64)
        -> Result<Bytes, RpcError>;
}

/// Polygon JSON-RPC client
pub struct PolygonClient {
    rpc_url: String,
    client: reqwest::Client,
}

impl PolygonClient {
    pub fn new(rpc_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { rpc_url, client }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        let request = rpc_request(method, params);

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::from_transport(method, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::new(
                classify_http_status(status),
                format!("{} returned HTTP {}", method, status),
            ));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| RpcError::from_transport(method, &e))?;

        if let Some(error) = body.error {
            return Err(RpcError::new(
                classify_rpc_error(error.code, &error.message),
                format!("{}: {} (code {})", method, error.message, error.code),
            ));
        }

        body.result.ok_or_else(|| {
            RpcError::new(
                RpcErrorKind::Fatal,
                format!("{} returned neither result nor error", method),
            )
        })
    }
}

#[async_trait]
impl BlockSource for PolygonClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let block: U64 = self.send("eth_blockNumber", serde_json::json!([])).await?;
        Ok(block.as_u64())
    }
}

#[async_trait]
impl LogSource for PolygonClient {
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        self.send("eth_getLogs", serde_json::json!([filter])).await
    }
}

#[async_trait]
impl ContractCaller for PolygonClient {
    async fn call_at(
        &self,
        to: Address,
        data: Vec<u8>,
        block_number: u64,
    ) -> Result<Bytes, RpcError> {
        self.send(
            "eth_call",
            serde_json::json!([call_params(to, &data), block_tag(block_number)]),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rpc_request_sets_method_and_id() {
        let req = rpc_request("eth_blockNumber", serde_json::json!([]));
        assert_eq!(req.get("method").and_then(|v| v.as_str()), Some("eth_blockNumber"));
        assert_eq!(req.get("id").and_then(|v| v.as_i64()), Some(1));
        assert_eq!(req.get("jsonrpc").and_then(|v| v.as_str()), Some("2.0"));
    }

    #[test]
    fn call_params_hex_encodes_calldata() {
        let to = Address::from_str("0x8501A9018A5625b720355A5A05c5dA3D5E8bB003").unwrap();
        let params = call_params(to, &[0xab, 0xcd]);
        assert_eq!(
            params.get("to").and_then(|v| v.as_str()),
            Some("0x8501a9018a5625b720355a5a05c5da3d5e8bb003")
        );
        assert_eq!(params.get("data").and_then(|v| v.as_str()), Some("0xabcd"));
    }

    #[test]
    fn block_tag_is_hex_quantity() {
        assert_eq!(block_tag(0), "0x0");
        assert_eq!(block_tag(255), "0xff");
    }

    #[test]
    fn classifies_range_limits() {
        assert_eq!(
            classify_rpc_error(-32005, "query returned more than 10000 results"),
            RpcErrorKind::RangeTooLarge
        );
        assert_eq!(
            classify_rpc_error(-32000, "block range is too wide"),
            RpcErrorKind::RangeTooLarge
        );
        assert_eq!(
            classify_rpc_error(-32602, "Log response size exceeded"),
            RpcErrorKind::RangeTooLarge
        );
    }

    #[test]
    fn classifies_rate_limits_before_range_limits() {
        assert_eq!(
            classify_rpc_error(-32005, "daily request rate limit exceeded"),
            RpcErrorKind::RateLimited
        );
        assert_eq!(classify_rpc_error(429, "slow down"), RpcErrorKind::RateLimited);
    }

    #[test]
    fn classifies_reverts_and_unknowns() {
        assert_eq!(classify_rpc_error(3, "execution reverted"), RpcErrorKind::Reverted);
        assert_eq!(
            classify_rpc_error(-32000, "execution reverted: bad club"),
            RpcErrorKind::Reverted
        );
        assert_eq!(classify_rpc_error(-32601, "method not found"), RpcErrorKind::Fatal);
        assert_eq!(classify_rpc_error(-32000, "request timed out"), RpcErrorKind::Timeout);
    }

    #[test]
    fn classifies_http_statuses() {
        assert_eq!(
            classify_http_status(StatusCode::TOO_MANY_REQUESTS),
            RpcErrorKind::RateLimited
        );
        assert_eq!(classify_http_status(StatusCode::GATEWAY_TIMEOUT), RpcErrorKind::Timeout);
        assert_eq!(classify_http_status(StatusCode::UNAUTHORIZED), RpcErrorKind::Fatal);
    }

    #[test]
    fn only_transient_kinds_are_scan_retryable() {
        assert!(RpcErrorKind::RangeTooLarge.is_scan_retryable());
        assert!(RpcErrorKind::Timeout.is_scan_retryable());
        assert!(RpcErrorKind::RateLimited.is_scan_retryable());
        assert!(!RpcErrorKind::Reverted.is_scan_retryable());
        assert!(!RpcErrorKind::Fatal.is_scan_retryable());
    }

    #[test]
    fn rpc_response_deserializes_error_object() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#;
        let parsed: RpcResponse<Vec<Log>> = serde_json::from_str(raw).unwrap();
        assert!(parsed.result.is_none());
        assert_eq!(parsed.error.map(|e| e.code), Some(-32005));
    }
}
