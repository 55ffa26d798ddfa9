// Meal Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod error;
pub mod import;
pub mod ledger;
pub mod models;
pub mod money;
pub mod settlement;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{LedgerError, Result};
pub use import::{import_csv, import_reader, ImportSummary};
pub use ledger::{
    retention_cutoff, Event, EventKind, InMemoryLedger, LedgerReader, LedgerStore, SqliteLedger,
};
pub use models::{
    Item, Meal, MealId, MealOverview, MealSnapshot, Member, MenuItem, NewItem, Payment,
    Restaurant, SHARED_CONSUMER,
};
pub use money::{Money, SETTLE_TOLERANCE};
pub use settlement::{
    compute_settlement, MealSummary, SettlementEngine, SettlementReport, Transfer,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
