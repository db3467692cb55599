// All service modules
pub mod cost_allocator;
pub mod pack_history;
pub mod pack_preview;
pub mod wallet_resolver;

// Re-export for convenience
pub use pack_history::PackHistoryPipeline;
pub use wallet_resolver::{WalletResolver, XayaAccountsResolver};
