use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::constants::{PREVIEW_FUNCTION_SIGNATURE, USDC_MICROS_PER_UNIT};
use crate::indexer::abi_codec::{decode_uint_array, encode_call, u256_to_u64, DecodeError};
use crate::indexer::polygon_client::{BlockSource, ContractCaller, RpcError, RpcErrorKind};
use crate::models::{InfluenceDistribution, InfluenceShare};

// ==================== SALE CONTRACTS ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleContract {
    pub tier: u8,
    pub address: Address,
}

/// The configured SwappingPackSale deployments, in tier order.
#[derive(Debug, Clone, Default)]
pub struct SaleContracts {
    contracts: Vec<SaleContract>,
}

impl SaleContracts {
    /// Orders by tier; an address listed twice keeps its lowest tier.
    pub fn new(mut contracts: Vec<SaleContract>) -> Self {
        contracts.sort_by_key(|c| c.tier);
        let mut seen = HashSet::new();
        contracts.retain(|c| seen.insert(c.address));
        Self { contracts }
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.contracts.iter().map(|c| c.address).collect()
    }

    /// Contracts ordered for a lookup: the hinted tier first, then the rest.
    pub fn ordered_from(&self, tier_hint: Option<u8>) -> Vec<SaleContract> {
        let mut ordered = self.contracts.clone();
        if let Some(hint) = tier_hint {
            ordered.sort_by_key(|c| (c.tier != hint, c.tier));
        }
        ordered
    }
}

// ==================== PREVIEW ====================

#[derive(Debug, Clone, Copy)]
pub struct PreviewLayout {
    /// Metadata words returned ahead of the (id, weight) pairs.
    pub prefix_words: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreviewMetadata {
    pub primary_id: u64,
    pub pack_count: u64,
    pub price_micros: u64,
    pub discounted_micros: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewResult {
    pub metadata: PreviewMetadata,
    pub distribution: InfluenceDistribution,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackQuote {
    pub tier: u8,
    pub sale_contract: Address,
    pub block_number: u64,
    pub club_id: u64,
    pub num_packs: u64,
    pub price_usd: f64,
    pub distribution: InfluenceDistribution,
    pub total_influence: u128,
    /// Price divided by total influence; 0 when no influence is granted.
    pub unit_usd: f64,
}

#[derive(Debug, Clone, Error)]
pub enum PreviewError {
    #[error("preview reverted: {0}")]
    Reverted(String),

    #[error("preview returned undecodable data: {0}")]
    Decode(#[from] DecodeError),

    #[error("preview returned {found} words, expected at least {expected} metadata words")]
    MissingPrefix { found: usize, expected: usize },

    #[error("preview did not complete within {0}s")]
    Timeout(u64),

    #[error("preview call failed: {0}")]
    Rpc(RpcError),

    #[error("no sale contract returned a distribution for club {club_id} (tiers tried: {tried:?})")]
    NoQuote {
        club_id: u64,
        tried: Vec<u8>,
        last_error: Option<String>,
    },
}

impl From<RpcError> for PreviewError {
    fn from(error: RpcError) -> Self {
        match error.kind {
            RpcErrorKind::Reverted => PreviewError::Reverted(error.message),
            _ => PreviewError::Rpc(error),
        }
    }
}

/// Pack Previewer - asks a sale contract how a pack splits its influence
pub struct PackPreviewer {
    caller: Arc<dyn ContractCaller>,
    layout: PreviewLayout,
}

impl PackPreviewer {
    pub fn new(caller: Arc<dyn ContractCaller>, layout: PreviewLayout) -> Self {
        Self { caller, layout }
    }

    /// Calls `preview(clubId, numPacks)` against state at `block_number`.
    pub async fn preview_at(
        &self,
        sale_contract: Address,
        beneficiary_id: u64,
        pack_count: u64,
        block_number: u64,
    ) -> Result<PreviewResult, PreviewError> {
        let calldata = encode_call(
            PREVIEW_FUNCTION_SIGNATURE,
            &[U256::from(beneficiary_id), U256::from(pack_count)],
        );
        let returned = self
            .caller
            .call_at(sale_contract, calldata, block_number)
            .await?;
        self.decode_preview(returned.as_ref())
    }

    /// Quotes a pack at the latest block, trying `tier_hint` first and then
    /// every other configured tier.
    pub async fn quote_latest(
        &self,
        chain: &dyn BlockSource,
        contracts: &SaleContracts,
        club_id: u64,
        num_packs: u64,
        tier_hint: Option<u8>,
    ) -> Result<PackQuote, PreviewError> {
        let block_number = chain.block_number().await?;
        let mut tried = Vec::new();
        let mut last_error = None;

        for contract in contracts.ordered_from(tier_hint) {
            tried.push(contract.tier);
            match self
                .preview_at(contract.address, club_id, num_packs, block_number)
                .await
            {
                Ok(result) if !result.distribution.is_empty() => {
                    return Ok(build_quote(&contract, block_number, club_id, num_packs, result));
                }
                Ok(_) => {
                    tracing::debug!("Tier {} has no distribution for club {}", contract.tier, club_id);
                }
                Err(e) => {
                    tracing::debug!("Tier {} preview failed for club {}: {}", contract.tier, club_id, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(PreviewError::NoQuote {
            club_id,
            tried,
            last_error,
        })
    }

    fn decode_preview(&self, returned: &[u8]) -> Result<PreviewResult, PreviewError> {
        let words = decode_uint_array(returned)?;
        let prefix = self.layout.prefix_words;
        if words.len() < prefix {
            return Err(PreviewError::MissingPrefix {
                found: words.len(),
                expected: prefix,
            });
        }

        let meta = |i: usize| words[..prefix].get(i).map(saturating_u64).unwrap_or(0);
        let metadata = PreviewMetadata {
            primary_id: meta(0),
            pack_count: meta(1),
            price_micros: meta(2),
            discounted_micros: meta(3),
        };

        let mut shares = Vec::new();
        for pair in words[prefix..].chunks_exact(2) {
            if pair[0].is_zero() {
                break;
            }
            let weight = u256_to_u64(pair[1])?;
            if weight == 0 {
                continue;
            }
            shares.push(InfluenceShare {
                beneficiary_id: u256_to_u64(pair[0])?,
                weight,
            });
        }

        Ok(PreviewResult {
            metadata,
            distribution: InfluenceDistribution::new(shares),
        })
    }
}

fn saturating_u64(word: &U256) -> u64 {
    u256_to_u64(*word).unwrap_or(u64::MAX)
}

fn build_quote(
    contract: &SaleContract,
    block_number: u64,
    club_id: u64,
    num_packs: u64,
    result: PreviewResult,
) -> PackQuote {
    let price_usd = result.metadata.price_micros as f64 / USDC_MICROS_PER_UNIT;
    let total_influence = result.distribution.total_weight();
    let unit_usd = if total_influence > 0 {
        price_usd / total_influence as f64
    } else {
        0.0
    };
    PackQuote {
        tier: contract.tier,
        sale_contract: contract.address,
        block_number,
        club_id: if result.metadata.primary_id > 0 {
            result.metadata.primary_id
        } else {
            club_id
        },
        num_packs: if result.metadata.pack_count > 0 {
            result.metadata.pack_count
        } else {
            num_packs
        },
        price_usd,
        distribution: result.distribution,
        total_influence,
        unit_usd,
    }
}
