use crate::models::{
    AuditRecord, AuditStatus, CostAllocationEntry, InfluenceDistribution, Ledger, PurchaseEvent,
    SkipReason,
};

use super::pack_preview::PreviewError;

/// Cost Allocator - splits a purchase's USDC cost across beneficiaries
pub struct CostAllocator;

impl CostAllocator {
    /// Credits `total × weight / Σweight` to every share of `distribution`.
    ///
    /// Purchases with no influence or no price leave the ledger untouched and
    /// come back as skipped records.
    pub fn allocate(
        event: &PurchaseEvent,
        distribution: &InfluenceDistribution,
        ledger: &mut Ledger,
    ) -> AuditRecord {
        let total_price_usd = event.total_price_usd();
        let total_influence = distribution.total_weight();

        if total_influence == 0 {
            tracing::debug!(
                "Skipping purchase {:#x}/{}: no influence granted",
                event.tx_hash,
                event.log_index
            );
            return skipped(event, distribution, SkipReason::ZeroInfluence);
        }
        if total_price_usd <= 0.0 {
            tracing::debug!(
                "Skipping purchase {:#x}/{}: zero price",
                event.tx_hash,
                event.log_index
            );
            return skipped(event, distribution, SkipReason::ZeroPrice);
        }

        let denominator = total_influence as f64;
        let allocations: Vec<CostAllocationEntry> = distribution
            .shares()
            .iter()
            .map(|share| CostAllocationEntry {
                beneficiary_id: share.beneficiary_id,
                amount_usd: total_price_usd * share.weight as f64 / denominator,
            })
            .collect();

        for entry in &allocations {
            ledger.credit(entry.beneficiary_id, entry.amount_usd);
        }

        AuditRecord {
            event: event.clone(),
            unit_price_usd: event.unit_price_usd(),
            total_price_usd,
            total_influence,
            distribution: distribution.clone(),
            allocations,
            status: AuditStatus::Allocated,
        }
    }

    pub fn skip_failed_preview(event: &PurchaseEvent, error: &PreviewError) -> AuditRecord {
        skipped(
            event,
            &InfluenceDistribution::default(),
            SkipReason::PreviewFailed {
                message: error.to_string(),
            },
        )
    }
}

fn skipped(
    event: &PurchaseEvent,
    distribution: &InfluenceDistribution,
    reason: SkipReason,
) -> AuditRecord {
    AuditRecord {
        event: event.clone(),
        unit_price_usd: event.unit_price_usd(),
        total_price_usd: event.total_price_usd(),
        total_influence: distribution.total_weight(),
        distribution: distribution.clone(),
        allocations: Vec::new(),
        status: AuditStatus::Skipped { reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, H256};

    fn purchase(pack_count: u64, unit_price_micros: u64) -> PurchaseEvent {
        PurchaseEvent {
            tx_hash: H256::repeat_byte(0x22),
            block_number: 1_000,
            log_index: 4,
            buyer: Address::repeat_byte(0xab),
            sale_contract: Address::repeat_byte(0x01),
            primary_beneficiary_id: 101,
            pack_count,
            unit_price_micros,
        }
    }

    #[test]
    fn splits_price_by_weight() {
        let mut ledger = Ledger::new();
        let dist = InfluenceDistribution::from_pairs(&[(101, 80), (202, 20)]);

        let record = CostAllocator::allocate(&purchase(2, 1_990_000), &dist, &mut ledger);

        assert!(!record.is_skipped());
        assert_eq!(record.total_influence, 100);
        assert!((ledger.get(101).unwrap() - 3.184).abs() < 1e-9);
        assert!((ledger.get(202).unwrap() - 0.796).abs() < 1e-9);
        assert_eq!(record.allocations.len(), 2);
    }

    #[test]
    fn allocations_sum_to_total_price() {
        let mut ledger = Ledger::new();
        let dist = InfluenceDistribution::from_pairs(&[(1, 3), (2, 7), (3, 11), (4, 13), (5, 1)]);
        let event = purchase(7, 4_990_000);

        let record = CostAllocator::allocate(&event, &dist, &mut ledger);

        let sum: f64 = record.allocations.iter().map(|a| a.amount_usd).sum();
        let total = event.total_price_usd();
        assert!(((sum - total) / total).abs() <= 1e-6);
        assert!(((ledger.total_usd() - total) / total).abs() <= 1e-6);
    }

    #[test]
    fn accumulates_across_purchases() {
        let mut ledger = Ledger::new();
        let dist = InfluenceDistribution::from_pairs(&[(101, 1)]);
        CostAllocator::allocate(&purchase(1, 1_000_000), &dist, &mut ledger);
        CostAllocator::allocate(&purchase(2, 1_000_000), &dist, &mut ledger);
        assert!((ledger.get(101).unwrap() - 3.0).abs() < 1e-12);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn zero_influence_is_skipped_without_touching_ledger() {
        let mut ledger = Ledger::new();
        let record = CostAllocator::allocate(
            &purchase(1, 1_000_000),
            &InfluenceDistribution::from_pairs(&[(101, 0)]),
            &mut ledger,
        );
        assert!(ledger.is_empty());
        assert_eq!(
            record.status,
            AuditStatus::Skipped {
                reason: SkipReason::ZeroInfluence
            }
        );
    }

    #[test]
    fn zero_price_is_skipped_without_touching_ledger() {
        let mut ledger = Ledger::new();
        let record = CostAllocator::allocate(
            &purchase(3, 0),
            &InfluenceDistribution::from_pairs(&[(101, 10)]),
            &mut ledger,
        );
        assert!(ledger.is_empty());
        assert!(record.allocations.is_empty());
        assert_eq!(
            record.status,
            AuditStatus::Skipped {
                reason: SkipReason::ZeroPrice
            }
        );
    }

    #[test]
    fn failed_preview_records_the_error() {
        let record = CostAllocator::skip_failed_preview(
            &purchase(1, 1_000_000),
            &PreviewError::Reverted("execution reverted".to_string()),
        );
        match record.status {
            AuditStatus::Skipped {
                reason: SkipReason::PreviewFailed { message },
            } => assert!(message.contains("reverted")),
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(record.total_influence, 0);
    }
}
