// src/api/mod.rs
pub mod health;
pub mod packs;
pub mod wallet;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::indexer::polygon_client::{BlockSource, PolygonClient};
use crate::indexer::range_scanner::RangeScanner;
use crate::services::pack_preview::{PackPreviewer, SaleContracts};
use crate::services::{PackHistoryPipeline, WalletResolver, XayaAccountsResolver};

// AppState definition
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub chain: Arc<dyn BlockSource>,
    pub contracts: SaleContracts,
    pub previewer: Arc<PackPreviewer>,
    pub resolver: Arc<dyn WalletResolver>,
    pub pipeline: Arc<PackHistoryPipeline>,
}

impl AppState {
    /// Wires one shared Polygon client into every component.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let client = Arc::new(PolygonClient::new(
            config.polygon_rpc_url.clone(),
            Duration::from_secs(config.rpc_timeout_secs),
        ));
        let resolver: Arc<dyn WalletResolver> = Arc::new(XayaAccountsResolver::new(
            &config.polygon_rpc_url,
            config.xaya_accounts_address,
        )?);
        let previewer = Arc::new(PackPreviewer::new(client.clone(), config.preview_layout()));
        let contracts = config.sale_contracts();
        let pipeline = Arc::new(PackHistoryPipeline::new(
            client.clone(),
            RangeScanner::new(client.clone(), config.scan_config()),
            previewer.clone(),
            resolver.clone(),
            contracts.clone(),
            config.pipeline_settings(),
        ));

        Ok(Self {
            config,
            chain: client,
            contracts,
            previewer,
            resolver,
            pipeline,
        })
    }
}
