use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout, Instant};

use super::cost_allocator::CostAllocator;
use super::pack_preview::{PackPreviewer, PreviewError, PreviewResult, SaleContracts};
use super::wallet_resolver::{ResolveError, WalletResolver};
use crate::indexer::polygon_client::{BlockSource, RpcError};
use crate::indexer::purchase_parser::{address_to_topic, PurchaseParser};
use crate::indexer::range_scanner::{LogFilter, RangeScanner, ScanError, ScanStats};
use crate::models::{AuditRecord, CostAllocationEntry, Ledger, PurchaseEvent};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub purchase_topic: H256,
    pub default_lookback_blocks: u64,
    pub default_max_duration: Duration,
    pub max_duration_cap: Duration,
    pub preview_timeout: Duration,
    pub preview_concurrency: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PackHistoryRequest {
    pub account_name: Option<String>,
    /// Skips name resolution when set.
    pub wallet: Option<Address>,
    pub from_block: Option<u64>,
    pub max_duration: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackHistoryReport {
    pub account_name: Option<String>,
    pub wallet: Address,
    pub from_block: u64,
    pub to_block: u64,
    pub purchases: usize,
    pub allocated: usize,
    pub skipped: usize,
    pub malformed_logs: usize,
    pub total_packs: u64,
    pub total_spent_usd: f64,
    /// Spend per pack over every scanned purchase; 0 when there are none.
    pub avg_unit_price_usd: f64,
    pub total_influence: u128,
    pub total_allocated_usd: f64,
    pub ledger: Vec<CostAllocationEntry>,
    pub audit: Vec<AuditRecord>,
    pub scan: ScanStats,
    pub elapsed_ms: u128,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    ResolvingWallet,
    Scanning,
    AllocatingEach,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::ResolvingWallet => "resolving_wallet",
            PipelineStage::Scanning => "scanning",
            PipelineStage::AllocatingEach => "allocating_each",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum PackHistoryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no wallet registered for account '{0}'")]
    WalletNotFound(String),

    #[error("wallet resolution failed: {0}")]
    Resolve(ResolveError),

    #[error("block scan did not finish within {budget_secs}s (stopped at block {cursor}); retry with a later from_block")]
    ScanTimeout { budget_secs: u64, cursor: u64 },

    #[error("time budget exhausted after {processed} of {total} purchases")]
    BudgetExhausted { processed: usize, total: usize },

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl PackHistoryError {
    /// Stage the run was in when it failed.
    pub fn stage(&self) -> PipelineStage {
        match self {
            PackHistoryError::InvalidRequest(_)
            | PackHistoryError::WalletNotFound(_)
            | PackHistoryError::Resolve(_) => PipelineStage::ResolvingWallet,
            PackHistoryError::ScanTimeout { .. } | PackHistoryError::Rpc(_) => PipelineStage::Scanning,
            PackHistoryError::BudgetExhausted { .. } => PipelineStage::AllocatingEach,
        }
    }
}

enum PreviewOutcome {
    Ready(PurchaseEvent, Result<PreviewResult, PreviewError>),
    OutOfBudget,
}

/// Pack History Pipeline - rebuilds a wallet's pack spend per beneficiary
pub struct PackHistoryPipeline {
    chain: Arc<dyn BlockSource>,
    scanner: RangeScanner,
    previewer: Arc<PackPreviewer>,
    resolver: Arc<dyn WalletResolver>,
    contracts: SaleContracts,
    parser: PurchaseParser,
    settings: PipelineSettings,
}

impl PackHistoryPipeline {
    pub fn new(
        chain: Arc<dyn BlockSource>,
        scanner: RangeScanner,
        previewer: Arc<PackPreviewer>,
        resolver: Arc<dyn WalletResolver>,
        contracts: SaleContracts,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            chain,
            scanner,
            previewer,
            resolver,
            contracts,
            parser: PurchaseParser::new(settings.purchase_topic),
            settings,
        }
    }

    /// Budget for one run: the requested duration, else the default, capped.
    pub fn effective_budget(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|d| !d.is_zero())
            .unwrap_or(self.settings.default_max_duration)
            .min(self.settings.max_duration_cap)
    }

    pub async fn run(&self, request: PackHistoryRequest) -> Result<PackHistoryReport, PackHistoryError> {
        let started = Instant::now();
        let budget = self.effective_budget(request.max_duration);
        let deadline = started + budget;
        tracing::debug!("Pack history run entering {} (budget {}s)", PipelineStage::Idle, budget.as_secs());

        let result = self.run_stages(&request, started, budget, deadline).await;
        match &result {
            Ok(report) => tracing::info!(
                "Pack history {} for {:#x}: {} purchases, {} skipped, ${:.2} allocated in {}ms",
                PipelineStage::Done,
                report.wallet,
                report.purchases,
                report.skipped,
                report.total_allocated_usd,
                report.elapsed_ms
            ),
            Err(e) => tracing::warn!(
                "Pack history {} during {}: {}",
                PipelineStage::Failed,
                e.stage(),
                e
            ),
        }
        result
    }

    async fn run_stages(
        &self,
        request: &PackHistoryRequest,
        started: Instant,
        budget: Duration,
        deadline: Instant,
    ) -> Result<PackHistoryReport, PackHistoryError> {
        tracing::debug!("Pack history stage: {}", PipelineStage::ResolvingWallet);
        let wallet = self.resolve_wallet(request).await?;

        tracing::debug!("Pack history stage: {}", PipelineStage::Scanning);
        let to_block = self.chain.block_number().await?;
        let from_block = request
            .from_block
            .unwrap_or_else(|| to_block.saturating_sub(self.settings.default_lookback_blocks));
        let filter = LogFilter {
            addresses: self.contracts.addresses(),
            topic0: self.parser.purchase_topic(),
            topic1: Some(address_to_topic(wallet)),
        };
        let scan = self
            .scanner
            .scan(&filter, from_block, to_block, budget.saturating_sub(started.elapsed()))
            .await
            .map_err(|e| match e {
                ScanError::Timeout { cursor, .. } => PackHistoryError::ScanTimeout {
                    budget_secs: budget.as_secs(),
                    cursor,
                },
                ScanError::Rpc { source, .. } => PackHistoryError::Rpc(source),
            })?;

        let mut events: Vec<PurchaseEvent> = Vec::with_capacity(scan.logs.len());
        let mut malformed_logs = 0;
        for log in &scan.logs {
            match self.parser.parse_log(log) {
                Some(event) => events.push(event),
                None => {
                    malformed_logs += 1;
                    tracing::warn!(
                        "Ignoring undecodable purchase log in tx {:?} at block {:?}",
                        log.transaction_hash,
                        log.block_number
                    );
                }
            }
        }
        events.sort_by_key(PurchaseEvent::chain_position);

        tracing::debug!(
            "Pack history stage: {} ({} purchases)",
            PipelineStage::AllocatingEach,
            events.len()
        );
        let total = events.len();
        let mut ledger = Ledger::new();
        let mut audit = Vec::with_capacity(total);

        let mut previews = stream::iter(events)
            .map(|event| self.preview_event(event, deadline))
            .buffered(self.settings.preview_concurrency.max(1));

        while let Some(outcome) = previews.next().await {
            match outcome {
                PreviewOutcome::Ready(event, Ok(preview)) => {
                    audit.push(CostAllocator::allocate(&event, &preview.distribution, &mut ledger));
                }
                PreviewOutcome::Ready(event, Err(e)) => {
                    tracing::warn!(
                        "Preview failed for purchase {:#x}/{} at block {}: {}",
                        event.tx_hash,
                        event.log_index,
                        event.block_number,
                        e
                    );
                    audit.push(CostAllocator::skip_failed_preview(&event, &e));
                }
                PreviewOutcome::OutOfBudget => {
                    return Err(PackHistoryError::BudgetExhausted {
                        processed: audit.len(),
                        total,
                    });
                }
            }
        }

        if Instant::now() >= deadline {
            return Err(PackHistoryError::BudgetExhausted {
                processed: audit.len(),
                total,
            });
        }

        let skipped = audit.iter().filter(|r| r.is_skipped()).count();
        let total_packs: u64 = audit.iter().map(|r| r.event.pack_count).sum();
        let total_spent_usd: f64 = audit.iter().map(|r| r.total_price_usd).sum();
        let avg_unit_price_usd = if total_packs == 0 {
            0.0
        } else {
            total_spent_usd / total_packs as f64
        };
        Ok(PackHistoryReport {
            account_name: request.account_name.clone(),
            wallet,
            from_block,
            to_block,
            purchases: total,
            allocated: total - skipped,
            skipped,
            malformed_logs,
            total_packs,
            total_spent_usd,
            avg_unit_price_usd,
            total_influence: audit.iter().map(|r| r.total_influence).sum(),
            total_allocated_usd: ledger.total_usd(),
            ledger: ledger.entries(),
            audit,
            scan: scan.stats,
            elapsed_ms: started.elapsed().as_millis(),
            generated_at: Utc::now(),
        })
    }

    async fn resolve_wallet(&self, request: &PackHistoryRequest) -> Result<Address, PackHistoryError> {
        if let Some(wallet) = request.wallet {
            return Ok(wallet);
        }
        let name = request
            .account_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                PackHistoryError::InvalidRequest("account_name or wallet is required".to_string())
            })?;

        match self.resolver.resolve(name).await {
            Ok(Some(wallet)) => Ok(wallet),
            Ok(None) => Err(PackHistoryError::WalletNotFound(name.to_string())),
            Err(ResolveError::EmptyName) => Err(PackHistoryError::InvalidRequest(
                "account_name is empty".to_string(),
            )),
            Err(e) => Err(PackHistoryError::Resolve(e)),
        }
    }

    // Runs under the per-event timeout, never past the overall deadline. A call
    // cut short by the deadline rather than its own timeout ends the run.
    async fn preview_event(&self, event: PurchaseEvent, deadline: Instant) -> PreviewOutcome {
        let now = Instant::now();
        if now >= deadline {
            return PreviewOutcome::OutOfBudget;
        }
        let limit = self.settings.preview_timeout.min(deadline - now);
        let call = self.previewer.preview_at(
            event.sale_contract,
            event.primary_beneficiary_id,
            event.pack_count,
            event.block_number,
        );
        let result = match timeout(limit, call).await {
            Ok(result) => result,
            Err(_) if limit < self.settings.preview_timeout => return PreviewOutcome::OutOfBudget,
            Err(_) => Err(PreviewError::Timeout(limit.as_secs())),
        };
        PreviewOutcome::Ready(event, result)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Name registry backed by a map.
    #[derive(Default)]
    pub(crate) struct MapResolver {
        pub(crate) names: HashMap<String, Address>,
    }

    impl MapResolver {
        pub(crate) fn with(name: &str, wallet: Address) -> Self {
            let mut names = HashMap::new();
            names.insert(name.to_string(), wallet);
            Self { names }
        }
    }

    #[async_trait]
    impl WalletResolver for MapResolver {
        async fn resolve(&self, account_name: &str) -> Result<Option<Address>, ResolveError> {
            if account_name.trim().is_empty() {
                return Err(ResolveError::EmptyName);
            }
            Ok(self.names.get(account_name).copied())
        }
    }
}
