pub mod accumulator;
pub mod cycle;
pub mod evaluator;
pub mod migrations;
pub mod state;
pub mod store;
pub mod units;

pub use accumulator::{observe, Observation};
pub use cycle::{current_cycle_id, maybe_rollover, Rollover};
pub use evaluator::{evaluate, usage_percent, QuotaEvent, ThresholdError, Thresholds};
pub use state::{AccountingState, CycleId};
pub use store::{AccountingStore, CycleSummary, DeliveryRecord, StoreError};
