use ethers::types::{Address, H256};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::constants::USDC_MICROS_PER_UNIT;

// ==================== PURCHASE ====================

/// One timed-sale purchase decoded from a sale contract log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseEvent {
    pub tx_hash: H256,
    pub block_number: u64,
    pub log_index: u64,
    pub buyer: Address,
    pub sale_contract: Address,
    pub primary_beneficiary_id: u64,
    pub pack_count: u64,
    pub unit_price_micros: u64,
}

impl PurchaseEvent {
    pub fn unit_price_usd(&self) -> f64 {
        self.unit_price_micros as f64 / USDC_MICROS_PER_UNIT
    }

    pub fn total_price_usd(&self) -> f64 {
        self.unit_price_usd() * self.pack_count as f64
    }

    pub fn chain_position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

// ==================== INFLUENCE ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InfluenceShare {
    pub beneficiary_id: u64,
    pub weight: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InfluenceDistribution(Vec<InfluenceShare>);

impl InfluenceDistribution {
    pub fn new(shares: Vec<InfluenceShare>) -> Self {
        Self(shares)
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(u64, u64)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|&(beneficiary_id, weight)| InfluenceShare {
                    beneficiary_id,
                    weight,
                })
                .collect(),
        )
    }

    pub fn shares(&self) -> &[InfluenceShare] {
        &self.0
    }

    pub fn total_weight(&self) -> u128 {
        self.0.iter().map(|s| s.weight as u128).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ==================== LEDGER ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostAllocationEntry {
    pub beneficiary_id: u64,
    pub amount_usd: f64,
}

/// Accumulated pack spend per beneficiary for one wallet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    totals: BTreeMap<u64, f64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&mut self, beneficiary_id: u64, amount_usd: f64) {
        *self.totals.entry(beneficiary_id).or_insert(0.0) += amount_usd;
    }

    #[cfg(test)]
    pub fn get(&self, beneficiary_id: u64) -> Option<f64> {
        self.totals.get(&beneficiary_id).copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.totals.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    pub fn total_usd(&self) -> f64 {
        self.totals.values().sum()
    }

    /// Entries ordered by beneficiary id.
    pub fn entries(&self) -> Vec<CostAllocationEntry> {
        self.totals
            .iter()
            .map(|(&beneficiary_id, &amount_usd)| CostAllocationEntry {
                beneficiary_id,
                amount_usd,
            })
            .collect()
    }
}

// ==================== AUDIT ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    ZeroInfluence,
    ZeroPrice,
    PreviewFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditStatus {
    Allocated,
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    #[serde(flatten)]
    pub event: PurchaseEvent,
    pub unit_price_usd: f64,
    pub total_price_usd: f64,
    pub total_influence: u128,
    pub distribution: InfluenceDistribution,
    pub allocations: Vec<CostAllocationEntry>,
    #[serde(flatten)]
    pub status: AuditStatus,
}

impl AuditRecord {
    pub fn is_skipped(&self) -> bool {
        matches!(self.status, AuditStatus::Skipped { .. })
    }
}

// ==================== API RESPONSE ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
