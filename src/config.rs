use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_LOOKBACK_BLOCKS, DEFAULT_MAX_DURATION_SECS, DEFAULT_PREVIEW_PREFIX_WORDS,
    DEFAULT_PURCHASE_EVENT_SIGNATURE, MAX_DURATION_CAP_SECS, PREVIEW_CONCURRENCY,
    PREVIEW_TIMEOUT_SECS, RPC_TIMEOUT_SECS, SALE_CONTRACT_TIERS, SCAN_INITIAL_CHUNK_BLOCKS,
    SCAN_MAX_CHUNK_BLOCKS, SCAN_MIN_CHUNK_BLOCKS, SCAN_RETRY_DELAY_MAX_MS, SCAN_RETRY_DELAY_MS,
    XAYA_ACCOUNTS_ADDRESS,
};
use crate::indexer::range_scanner::ScanConfig;
use crate::services::pack_history::PipelineSettings;
use crate::services::pack_preview::{PreviewLayout, SaleContract, SaleContracts};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: String,

    // Blockchain
    pub polygon_rpc_url: String,
    pub rpc_timeout_secs: u64,

    // Contracts
    pub sale_contracts: Vec<SaleContract>,
    pub xaya_accounts_address: Address,
    pub purchase_event_signature: String,
    pub preview_prefix_words: usize,

    // Range scanning
    pub scan_initial_chunk: u64,
    pub scan_min_chunk: u64,
    pub scan_max_chunk: u64,
    pub scan_retry_delay_ms: u64,
    pub default_lookback_blocks: u64,

    // Budgets
    pub default_max_duration_secs: u64,
    pub max_duration_cap_secs: u64,
    pub preview_timeout_secs: u64,
    pub preview_concurrency: usize,

    // CORS
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let sale_contracts = match env::var("SALE_CONTRACTS") {
            Ok(raw) if !raw.trim().is_empty() => parse_sale_contracts(&raw)?,
            _ => default_sale_contracts()?,
        };

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),

            polygon_rpc_url: env::var("POLYGON_RPC_URL")
                .unwrap_or_else(|_| "https://polygon-rpc.com".to_string()),
            rpc_timeout_secs: env::var("RPC_TIMEOUT_SECS")
                .unwrap_or_else(|_| RPC_TIMEOUT_SECS.to_string())
                .parse()?,

            sale_contracts,
            xaya_accounts_address: Address::from_str(
                &env::var("XAYA_ACCOUNTS_ADDRESS")
                    .unwrap_or_else(|_| XAYA_ACCOUNTS_ADDRESS.to_string()),
            )?,
            purchase_event_signature: env::var("PURCHASE_EVENT_SIGNATURE")
                .unwrap_or_else(|_| DEFAULT_PURCHASE_EVENT_SIGNATURE.to_string()),
            preview_prefix_words: env::var("PREVIEW_PREFIX_WORDS")
                .unwrap_or_else(|_| DEFAULT_PREVIEW_PREFIX_WORDS.to_string())
                .parse()?,

            scan_initial_chunk: env::var("SCAN_INITIAL_CHUNK")
                .unwrap_or_else(|_| SCAN_INITIAL_CHUNK_BLOCKS.to_string())
                .parse()?,
            scan_min_chunk: env::var("SCAN_MIN_CHUNK")
                .unwrap_or_else(|_| SCAN_MIN_CHUNK_BLOCKS.to_string())
                .parse()?,
            scan_max_chunk: env::var("SCAN_MAX_CHUNK")
                .unwrap_or_else(|_| SCAN_MAX_CHUNK_BLOCKS.to_string())
                .parse()?,
            scan_retry_delay_ms: env::var("SCAN_RETRY_DELAY_MS")
                .unwrap_or_else(|_| SCAN_RETRY_DELAY_MS.to_string())
                .parse()?,
            default_lookback_blocks: env::var("DEFAULT_LOOKBACK_BLOCKS")
                .unwrap_or_else(|_| DEFAULT_LOOKBACK_BLOCKS.to_string())
                .parse()?,

            default_max_duration_secs: env::var("DEFAULT_MAX_DURATION_SECS")
                .unwrap_or_else(|_| DEFAULT_MAX_DURATION_SECS.to_string())
                .parse()?,
            max_duration_cap_secs: env::var("MAX_DURATION_CAP_SECS")
                .unwrap_or_else(|_| MAX_DURATION_CAP_SECS.to_string())
                .parse()?,
            preview_timeout_secs: env::var("PREVIEW_TIMEOUT_SECS")
                .unwrap_or_else(|_| PREVIEW_TIMEOUT_SECS.to_string())
                .parse()?,
            preview_concurrency: env::var("PREVIEW_CONCURRENCY")
                .unwrap_or_else(|_| PREVIEW_CONCURRENCY.to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.polygon_rpc_url.trim().is_empty() {
            anyhow::bail!("POLYGON_RPC_URL is empty");
        }
        url::Url::parse(&self.polygon_rpc_url)
            .map_err(|e| anyhow::anyhow!("POLYGON_RPC_URL is not a valid URL: {}", e))?;
        if self.sale_contracts.is_empty() {
            anyhow::bail!("SALE_CONTRACTS resolved to an empty list");
        }
        if self.purchase_event_signature.trim().is_empty() {
            anyhow::bail!("PURCHASE_EVENT_SIGNATURE is empty");
        }
        if self.scan_min_chunk == 0 {
            anyhow::bail!("SCAN_MIN_CHUNK must be > 0");
        }
        if self.scan_min_chunk > self.scan_max_chunk {
            anyhow::bail!(
                "SCAN_MIN_CHUNK ({}) exceeds SCAN_MAX_CHUNK ({})",
                self.scan_min_chunk,
                self.scan_max_chunk
            );
        }
        if self.default_max_duration_secs == 0 || self.max_duration_cap_secs == 0 {
            anyhow::bail!("Duration budgets must be > 0");
        }

        if self.polygon_rpc_url.contains("polygon-rpc.com") {
            tracing::warn!("Using the public Polygon RPC; historical eth_call may be rate limited");
        }
        if self.scan_initial_chunk < self.scan_min_chunk
            || self.scan_initial_chunk > self.scan_max_chunk
        {
            tracing::warn!(
                "SCAN_INITIAL_CHUNK={} outside [{}, {}]; it will be clamped",
                self.scan_initial_chunk,
                self.scan_min_chunk,
                self.scan_max_chunk
            );
        }
        if self.preview_timeout_secs >= self.default_max_duration_secs {
            tracing::warn!("PREVIEW_TIMEOUT_SECS should be smaller than the request budget");
        }
        if self.preview_concurrency == 0 {
            tracing::warn!("PREVIEW_CONCURRENCY is 0; falling back to sequential previews");
        }
        if self.cors_allowed_origins.trim().is_empty() {
            tracing::warn!("CORS_ALLOWED_ORIGINS is empty; requests may be blocked");
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn purchase_topic(&self) -> H256 {
        H256::from(keccak256(self.purchase_event_signature.trim().as_bytes()))
    }

    pub fn sale_contracts(&self) -> SaleContracts {
        SaleContracts::new(self.sale_contracts.clone())
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            initial_chunk: self.scan_initial_chunk,
            min_chunk: self.scan_min_chunk,
            max_chunk: self.scan_max_chunk,
            retry_delay: Duration::from_millis(self.scan_retry_delay_ms),
            max_retry_delay: Duration::from_millis(SCAN_RETRY_DELAY_MAX_MS),
        }
    }

    pub fn preview_layout(&self) -> PreviewLayout {
        PreviewLayout {
            prefix_words: self.preview_prefix_words,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            purchase_topic: self.purchase_topic(),
            default_lookback_blocks: self.default_lookback_blocks,
            default_max_duration: Duration::from_secs(self.default_max_duration_secs),
            max_duration_cap: Duration::from_secs(self.max_duration_cap_secs),
            preview_timeout: Duration::from_secs(self.preview_timeout_secs),
            preview_concurrency: self.preview_concurrency.max(1),
        }
    }
}

fn default_sale_contracts() -> anyhow::Result<Vec<SaleContract>> {
    SALE_CONTRACT_TIERS
        .iter()
        .map(|(tier, address)| {
            Ok(SaleContract {
                tier: *tier,
                address: Address::from_str(address)?,
            })
        })
        .collect()
}

/// Parses `tier:address` pairs separated by commas, e.g. `1:0xabc…,2:0xdef…`.
fn parse_sale_contracts(raw: &str) -> anyhow::Result<Vec<SaleContract>> {
    raw.split([',', ';', '\n'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (tier, address) = entry
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("SALE_CONTRACTS entry '{}' is not tier:address", entry))?;
            Ok(SaleContract {
                tier: tier.trim().parse()?,
                address: Address::from_str(address.trim())?,
            })
        })
        .collect()
}
