//! Shared data model for the auction pricing core.
//!
//! These types are the contract between the Demand Tracker, Quality Scorer,
//! Pricing Engine, and Price Updater. None of them own I/O; they are plain
//! data plus a handful of constructors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Lifecycle state of a listing. Only `Active` listings are priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Draft,
    Paused,
    Deprecated,
}

/// Identity and pricing parameters of a listing, as loaded from the external
/// listing store. The core never mutates identity fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub listing_id: String,
    pub slug: String,
    pub name: String,
    pub category_id: String,
    pub floor_price_usdc: f64,
    pub ceiling_price_usdc: Option<f64>,
    pub current_price_usdc: f64,
    pub capacity_per_minute: u32,
    pub status: ListingStatus,
}

impl Listing {
    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }
}

/// Closed set of demand-signal kinds. Unlike an open string tag, a wire value
/// that doesn't match one of these is a deserialization error, not a silent
/// zero-weight signal — see `DemandWeights` for the "unknown kind" case that
/// the spec actually means (a kind present here but absent from an override
/// table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    ApiCall,
    View,
    WatchlistAdd,
    SandboxTest,
    Subscription,
    Unsubscription,
    RateLimited,
}

impl SignalKind {
    pub const ALL: [SignalKind; 7] = [
        SignalKind::ApiCall,
        SignalKind::View,
        SignalKind::WatchlistAdd,
        SignalKind::SandboxTest,
        SignalKind::Subscription,
        SignalKind::Unsubscription,
        SignalKind::RateLimited,
    ];

    /// Default per-kind weight, before the signal's own instance weight is
    /// multiplied in.
    pub fn default_weight(self) -> f64 {
        match self {
            SignalKind::ApiCall => 1.0,
            SignalKind::View => 0.1,
            SignalKind::WatchlistAdd => 0.3,
            SignalKind::SandboxTest => 0.5,
            SignalKind::Subscription => 2.0,
            SignalKind::Unsubscription => -1.5,
            SignalKind::RateLimited => 1.5,
        }
    }
}

/// Per-kind weight table. Starts from `SignalKind::default_weight` and can be
/// overridden per-kind; a kind missing from an override map simply keeps its
/// default.
#[derive(Debug, Clone)]
pub struct DemandWeights {
    weights: [f64; 7],
}

impl Default for DemandWeights {
    fn default() -> Self {
        let mut weights = [0.0; 7];
        for (i, kind) in SignalKind::ALL.iter().enumerate() {
            weights[i] = kind.default_weight();
        }
        Self { weights }
    }
}

impl DemandWeights {
    pub fn weight_for(&self, kind: SignalKind) -> f64 {
        self.weights[SignalKind::ALL
            .iter()
            .position(|k| *k == kind)
            .expect("SignalKind::ALL is exhaustive")]
    }

    /// Merge overrides into a fresh default table. Unknown kinds can't appear
    /// here because `SignalKind` is closed, so "unknown kind -> weight 0"
    /// never arises at this layer.
    pub fn merge(overrides: &[(SignalKind, f64)]) -> Self {
        let mut table = Self::default();
        for (kind, weight) in overrides {
            let idx = SignalKind::ALL.iter().position(|k| k == kind).unwrap();
            table.weights[idx] = *weight;
        }
        table
    }
}

/// One demand event for a single listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandSignal {
    pub listing_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: SignalKind,
    /// Per-instance multiplier on top of the kind's default weight. Negative
    /// values are accepted (e.g. paired with `Unsubscription`'s already
    /// negative kind weight) and dampen the running sum; they are never
    /// coerced to zero.
    pub weight: f64,
    pub buyer_id: Option<String>,
}

impl DemandSignal {
    pub fn new(listing_id: impl Into<String>, kind: SignalKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            listing_id: listing_id.into(),
            timestamp,
            kind,
            weight: 1.0,
            buyer_id: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_buyer(mut self, buyer_id: impl Into<String>) -> Self {
        self.buyer_id = Some(buyer_id.into());
        self
    }
}

/// Percentile thresholds used to normalize a raw signal sum into a [0,100]
/// score. Bootstrapped to values that produce sane scores before any real
/// traffic has been observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileThresholds {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

impl Default for PercentileThresholds {
    fn default() -> Self {
        Self {
            p10: 5.0,
            p50: 50.0,
            p90: 200.0,
            p99: 1000.0,
        }
    }
}

/// Partial update for `PercentileThresholds`; `None` fields keep their
/// current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct PercentileThresholdsPatch {
    pub p10: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p99: Option<f64>,
}

impl PercentileThresholds {
    pub fn apply(&mut self, patch: PercentileThresholdsPatch) {
        if let Some(p10) = patch.p10 {
            self.p10 = p10;
        }
        if let Some(p50) = patch.p50 {
            self.p50 = p50;
        }
        if let Some(p90) = patch.p90 {
            self.p90 = p90;
        }
        if let Some(p99) = patch.p99 {
            self.p99 = p99;
        }
    }
}

/// Normalized demand snapshot for a listing, the output of the Demand
/// Tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandState {
    pub listing_id: String,
    pub score: f64,
    pub raw_signal_sum: f64,
    pub unique_buyers: usize,
    pub velocity: f64,
    pub computed_at: DateTime<Utc>,
    pub window_ms: u64,
}

impl DemandState {
    /// The empty state returned for a listing the tracker has never seen.
    pub fn empty(listing_id: impl Into<String>, now: DateTime<Utc>, window_ms: u64) -> Self {
        Self {
            listing_id: listing_id.into(),
            score: 0.0,
            raw_signal_sum: 0.0,
            unique_buyers: 0,
            velocity: 0.0,
            computed_at: now,
            window_ms,
        }
    }
}

/// Raw telemetry the Quality Scorer maps into a `QualityMetrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawProviderMetrics {
    pub uptime_minutes: f64,
    pub total_minutes: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub median_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub average_rating: f64,
    pub rating_count: u64,
}

/// Composite quality metrics for a listing, the output of the Quality Scorer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub uptime_percent: f64,
    pub median_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub error_rate_percent: f64,
    pub average_rating: f64,
    pub rating_count: u64,
    pub composite_score: f64,
}

impl QualityMetrics {
    /// Defaults used when a listing has no quality rollup yet; it still gets
    /// priced rather than blocked.
    pub fn defaults() -> Self {
        Self {
            uptime_percent: 99.9,
            median_latency_ms: 100.0,
            p99_latency_ms: 500.0,
            error_rate_percent: 0.5,
            average_rating: 4.0,
            rating_count: 0,
            composite_score: 70.0,
        }
    }
}

/// Category-level scarcity inputs for a listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SupplyState {
    pub competitor_count: u32,
    pub is_unique: bool,
    pub capacity_per_minute: u32,
    pub utilization_percent: f64,
}

/// The five multipliers composed into a price, plus their product.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceMultipliers {
    pub demand: f64,
    pub scarcity: f64,
    pub quality: f64,
    pub momentum: f64,
    pub temporal: f64,
    pub combined: f64,
}

/// Inputs the Pricing Engine needs for one listing's `compute_price` call.
#[derive(Debug, Clone)]
pub struct PricingInput {
    pub listing_id: String,
    pub floor_price: f64,
    pub ceiling_price: Option<f64>,
    pub demand: DemandState,
    pub quality: QualityMetrics,
    pub supply: SupplyState,
    pub previous_price: Option<f64>,
}

/// The demand/quality/supply inputs a particular `compute_price` call was
/// given, carried alongside the result so a persisted `AuctionResult` row can
/// be audited without joining back to the collaborators that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionResultInputs {
    pub demand: DemandState,
    pub quality: QualityMetrics,
    pub supply: SupplyState,
}

/// Result of one `compute_price` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionResult {
    pub listing_id: String,
    pub price: f64,
    pub floor_price: f64,
    pub multipliers: PriceMultipliers,
    pub inputs: AuctionResultInputs,
    pub computed_at: DateTime<Utc>,
    pub compute_time_us: u64,
}

/// Durable history record: an `AuctionResult` plus the diff against the price
/// it replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub listing_id: String,
    pub floor_price: f64,
    pub ceiling_price: Option<f64>,
    pub price: f64,
    pub previous_price: f64,
    pub price_change_pct: f64,
    pub multipliers: PriceMultipliers,
    pub windows_at_floor: u32,
    pub windows_at_ceiling: u32,
    pub computed_at: DateTime<Utc>,
}

/// Direction of a price tick relative to the previous stored price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickDirection {
    Up,
    Down,
    Flat,
}

/// Pub/sub payload published on the `prices` channel whenever a listing's
/// computed price differs from its stored price. Field names are
/// `snake_case` on the wire to stay bit-compatible with existing consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub slug: String,
    pub name: String,
    pub listing_id: String,
    pub current_price: f64,
    pub previous_price: f64,
    pub change_percent: f64,
    pub direction: TickDirection,
    pub timestamp: DateTime<Utc>,
    pub multipliers: PriceMultipliers,
    pub demand_score: f64,
    pub demand_velocity: f64,
}

/// Split of a price into provider and platform shares.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransactionSplit {
    pub buyer_pays: f64,
    pub provider_receives: f64,
    pub platform_fee: f64,
    pub fee_rate: f64,
}

/// Output of `PricingEngine::simulate_price`, for provider "what-if" tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub price: f64,
    pub multipliers: PriceMultipliers,
}

/// Rollup read from `DemandTracker::stats`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DemandTrackerStats {
    pub tracked_listings: usize,
    pub total_signals_in_current_windows: u64,
    pub total_unique_buyers: usize,
}

/// Ordered-insertion set of buyer ids capped to bound memory. Past the cap,
/// new distinct buyers are no longer inserted, so `len()` can undercount the
/// true unique-buyer count but never overcounts or forgets an already-seen
/// buyer.
#[derive(Debug, Clone, Default)]
pub struct BoundedBuyerSet {
    seen: HashSet<String>,
    cap: usize,
}

impl BoundedBuyerSet {
    pub const DEFAULT_CAP: usize = 100_000;

    pub fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            cap,
        }
    }

    pub fn insert(&mut self, buyer_id: &str) {
        if self.seen.contains(buyer_id) {
            return;
        }
        if self.seen.len() >= self.cap {
            return;
        }
        self.seen.insert(buyer_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
