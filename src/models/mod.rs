// src/models/mod.rs
pub mod pack;

pub use pack::{
    ApiResponse,
    AuditRecord,
    AuditStatus,
    CostAllocationEntry,
    InfluenceDistribution,
    InfluenceShare,
    Ledger,
    PurchaseEvent,
    SkipReason,
};
