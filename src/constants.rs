/// Application constants

pub const API_VERSION: &str = "v1";

// Polygon mainnet contracts
pub const XAYA_ACCOUNTS_ADDRESS: &str = "0x8C12253F71091b9582908C8a44F78870Ec6F304F";

// SwappingPackSale per tier (same preview signature on all five)
pub const SALE_CONTRACT_TIERS: [(u8, &str); 5] = [
    (1, "0x8501A9018A5625b720355A5A05c5dA3D5E8bB003"),
    (2, "0x0bF818f3A69485c8B05Cf6292D9A04C6f58ADF08"),
    (3, "0x4259D89087b6EBBC8bE38A30393a2F99F798FE2f"),
    (4, "0x167360A54746b82e38f700dF0ef812c269c4e565"),
    (5, "0x3d25Cb3139811c6AeE9D5ae8a01B2e5824b5dB91"),
];

// Sale contract ABI surface
pub const PREVIEW_FUNCTION_SIGNATURE: &str = "preview(uint256,uint256)";
pub const DEFAULT_PURCHASE_EVENT_SIGNATURE: &str = "PackPurchased(address,uint256,uint256,uint256)";
// primary club, packs, price, discounted price
pub const DEFAULT_PREVIEW_PREFIX_WORDS: usize = 4;

// USDC has 6 decimals
pub const USDC_MICROS_PER_UNIT: f64 = 1_000_000.0;

// Range scanning
pub const SCAN_INITIAL_CHUNK_BLOCKS: u64 = 50_000;
pub const SCAN_MIN_CHUNK_BLOCKS: u64 = 10_000;
pub const SCAN_MAX_CHUNK_BLOCKS: u64 = 200_000;
pub const SCAN_RETRY_DELAY_MS: u64 = 250;
pub const SCAN_RETRY_DELAY_MAX_MS: u64 = 4_000;
pub const DEFAULT_LOOKBACK_BLOCKS: u64 = 500_000;

// Request budgets
pub const DEFAULT_MAX_DURATION_SECS: u64 = 60;
pub const MAX_DURATION_CAP_SECS: u64 = 300;
pub const PREVIEW_TIMEOUT_SECS: u64 = 8;
pub const PREVIEW_CONCURRENCY: usize = 4;
pub const RPC_TIMEOUT_SECS: u64 = 20;
