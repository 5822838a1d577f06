//! External collaborator contracts.
//!
//! The persistent store, pub/sub broker, and sorted-set history store are all
//! out of scope for this crate (see `SPEC_FULL.md` §1) — these traits are
//! the narrow contracts the Price Updater depends on. Production adapters
//! (a Postgres-backed `ListingStore`, a Redis-backed `PriceTickPublisher` /
//! `PriceHistoryStore`) are a deployment concern; `adapters.rs` ships an
//! in-process reference implementation of each, sufficient for tests and for
//! running the worker standalone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::pricing::types::{
    AuctionResult, DemandSignal, Listing, PriceMultipliers, PriceSnapshot, PriceTick,
    QualityMetrics, SupplyState,
};

/// Loads active listings and persists the stored price back. The single
/// source of truth for `current_price_usdc`.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn active_listings(&self) -> anyhow::Result<Vec<Listing>>;
    async fn update_current_price(&self, listing_id: &str, new_price: f64) -> anyhow::Result<()>;
}

/// Latest quality rollup for a listing, if one has been computed.
#[async_trait]
pub trait QualityRollupStore: Send + Sync {
    async fn latest_quality(&self, listing_id: &str) -> anyhow::Result<Option<QualityMetrics>>;
}

/// Category-level scarcity inputs for a listing.
#[async_trait]
pub trait SupplyStore: Send + Sync {
    async fn supply_state(&self, listing: &Listing) -> anyhow::Result<SupplyState>;
}

/// Fallback raw-signal source, consulted only when the Demand Tracker has
/// never seen a listing (cold start / warm restart). Resolves the spec's
/// "reduces to min(100, rawSum)" open question by handing the raw signals
/// back to the Demand Tracker rather than re-deriving a score independently
/// — see `SPEC_FULL.md` §9.
#[async_trait]
pub trait FallbackDemandSource: Send + Sync {
    async fn recent_signals(
        &self,
        listing_id: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DemandSignal>>;
}

/// Publishes changed price ticks to the `prices` channel.
#[async_trait]
pub trait PriceTickPublisher: Send + Sync {
    async fn publish(&self, tick: &PriceTick) -> anyhow::Result<()>;
}

/// One entry in the `price_history:{slug}` sorted set.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PriceHistoryEntry {
    pub price: f64,
    pub floor: f64,
    pub multipliers: PriceMultipliers,
    pub demand_score: f64,
    pub demand_velocity: f64,
    pub timestamp: DateTime<Utc>,
}

/// Sorted-set history store keyed by `price_history:{slug}`, score =
/// millisecond timestamp.
#[async_trait]
pub trait PriceHistoryStore: Send + Sync {
    async fn push(&self, slug: &str, entry: PriceHistoryEntry) -> anyhow::Result<()>;
    async fn trim_older_than(&self, slug: &str, cutoff: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Durable snapshot + auction-result persistence.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_snapshot(&self, snapshot: &PriceSnapshot) -> anyhow::Result<()>;
    async fn save_auction_result(&self, result: &AuctionResult) -> anyhow::Result<()>;
}
