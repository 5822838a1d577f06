//! Dynamic auction pricing core.
//!
//! Four cooperating phases, each its own module: the Demand Tracker
//! (`demand_tracker`) aggregates raw buyer activity into a normalized demand
//! score; the Quality Scorer (`quality_scorer`) maps provider telemetry into
//! a composite quality score; the Pricing Engine (`engine`) composes both
//! plus scarcity and momentum into a price; and the Price Updater
//! (`updater`) drives the whole thing on a timer, diffing and publishing
//! changes. `ports` and `adapters` isolate everything the core depends on
//! that lives outside this crate.

pub mod adapters;
pub mod clock;
pub mod config;
pub mod demand_tracker;
pub mod engine;
pub mod error_reporter;
pub mod ports;
pub mod quality_scorer;
pub mod types;
pub mod updater;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    validate_ceiling_above_floor, ConfigError, PricingConfig, PricingConfigOverrides,
    PricingPreset, PricingServiceConfig,
};
pub use demand_tracker::DemandTracker;
pub use engine::PricingEngine;
pub use error_reporter::{ErrorReport, ErrorReporter, Severity as ErrorSeverity};
pub use ports::{
    FallbackDemandSource, ListingStore, PriceHistoryEntry, PriceHistoryStore, PriceTickPublisher,
    QualityRollupStore, SnapshotStore, SupplyStore,
};
pub use quality_scorer::score_quality;
pub use types::{
    AuctionResult, AuctionResultInputs, BoundedBuyerSet, DemandSignal, DemandState,
    DemandTrackerStats, DemandWeights, Listing, ListingStatus, PercentileThresholds,
    PercentileThresholdsPatch, PriceMultipliers, PriceSnapshot, PriceTick, PricingInput,
    QualityMetrics, RawProviderMetrics, SignalKind, SimulationResult, SupplyState, TickDirection,
    TransactionSplit,
};
pub use updater::{CycleReport, PriceUpdater};
