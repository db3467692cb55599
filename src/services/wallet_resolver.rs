use async_trait::async_trait;
use ethers::contract::ContractError;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::Address;
use std::sync::Arc;
use thiserror::Error;

use crate::indexer::polygon_client::{classify_rpc_error, RpcError, RpcErrorKind};

ethers::contract::abigen!(
    XayaAccounts,
    r#"[
        function tokenIdForName(string) view returns (uint256)
        function ownerOf(uint256) view returns (address)
    ]"#
);

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("account name is empty")]
    EmptyName,

    #[error("invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Maps an account name to the wallet that owns it.
#[async_trait]
pub trait WalletResolver: Send + Sync {
    /// `Ok(None)` when the name is not registered.
    async fn resolve(&self, account_name: &str) -> Result<Option<Address>, ResolveError>;
}

/// Resolves names through the XayaAccounts registry on Polygon.
pub struct XayaAccountsResolver {
    contract: XayaAccounts<Provider<Http>>,
}

impl XayaAccountsResolver {
    pub fn new(rpc_url: &str, registry: Address) -> Result<Self, ResolveError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ResolveError::InvalidRpcUrl(e.to_string()))?;
        Ok(Self {
            contract: XayaAccounts::new(registry, Arc::new(provider)),
        })
    }
}

#[async_trait]
impl WalletResolver for XayaAccountsResolver {
    async fn resolve(&self, account_name: &str) -> Result<Option<Address>, ResolveError> {
        let name = normalize_name(account_name)?;

        let token_id = match self.contract.token_id_for_name(name.to_string()).call().await {
            Ok(id) => id,
            Err(e) => return not_found_on_revert("tokenIdForName", e),
        };
        if token_id.is_zero() {
            tracing::debug!("XayaAccounts has no token for '{}'", name);
            return Ok(None);
        }

        let owner = match self.contract.owner_of(token_id).call().await {
            Ok(owner) => owner,
            Err(e) => return not_found_on_revert("ownerOf", e),
        };
        if owner.is_zero() {
            return Ok(None);
        }

        tracing::info!("Resolved '{}' to {:#x}", name, owner);
        Ok(Some(owner))
    }
}

fn normalize_name(account_name: &str) -> Result<&str, ResolveError> {
    let name = account_name.trim();
    if name.is_empty() {
        return Err(ResolveError::EmptyName);
    }
    Ok(name)
}

// A reverting registry call means the name or token does not exist.
fn not_found_on_revert<M: Middleware>(
    method: &str,
    error: ContractError<M>,
) -> Result<Option<Address>, ResolveError> {
    let message = error.to_string();
    let kind = if error.is_revert() {
        RpcErrorKind::Reverted
    } else {
        classify_rpc_error(0, &message)
    };
    if kind == RpcErrorKind::Reverted {
        tracing::debug!("XayaAccounts.{} reverted: {}", method, message);
        return Ok(None);
    }
    Err(RpcError::new(kind, format!("XayaAccounts.{}: {}", method, message)).into())
}
