//! Price Updater
//!
//! Periodic batch worker: gathers per-listing state, runs the Pricing Engine
//! in a batch, diffs against the stored price, and publishes + persists the
//! deltas. Owns no domain state of its own — everything it touches is read
//! from or written to a collaborator behind a port trait (`ports.rs`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::pricing::clock::Clock;
use crate::pricing::config::PricingServiceConfig;
use crate::pricing::demand_tracker::DemandTracker;
use crate::pricing::engine::PricingEngine;
use crate::pricing::error_reporter::{ErrorReport, ErrorReporter};
use crate::pricing::ports::{
    FallbackDemandSource, ListingStore, PriceHistoryEntry, PriceHistoryStore, PriceTickPublisher,
    QualityRollupStore, SnapshotStore, SupplyStore,
};
use crate::pricing::types::{
    AuctionResult, Listing, PriceSnapshot, PriceTick, PricingInput, QualityMetrics, TickDirection,
};

/// How far back history entries are retained.
const HISTORY_RETENTION_HOURS: i64 = 24;

/// Outcome of one cycle, returned by `run_once` and logged by `run`.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub listings_considered: usize,
    pub ticks_published: usize,
    pub price_write_errors: usize,
    pub history_errors: usize,
    pub elapsed_ms: u64,
    pub skipped_single_flight: bool,
}

/// Per-listing streak counters backing `windows_at_floor` / `windows_at_ceiling`.
#[derive(Debug, Clone, Copy, Default)]
struct PriceStreak {
    windows_at_floor: u32,
    windows_at_ceiling: u32,
}

pub struct PriceUpdater {
    config: PricingServiceConfig,
    engine: Arc<PricingEngine>,
    demand_tracker: Arc<DemandTracker>,
    listing_store: Arc<dyn ListingStore>,
    quality_store: Arc<dyn QualityRollupStore>,
    supply_store: Arc<dyn SupplyStore>,
    fallback_demand_source: Option<Arc<dyn FallbackDemandSource>>,
    publisher: Arc<dyn PriceTickPublisher>,
    history_store: Arc<dyn PriceHistoryStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    error_reporter: Arc<ErrorReporter>,
    cycle_running: AtomicBool,
    streaks: RwLock<HashMap<String, PriceStreak>>,
}

impl PriceUpdater {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PricingServiceConfig,
        engine: Arc<PricingEngine>,
        demand_tracker: Arc<DemandTracker>,
        listing_store: Arc<dyn ListingStore>,
        quality_store: Arc<dyn QualityRollupStore>,
        supply_store: Arc<dyn SupplyStore>,
        fallback_demand_source: Option<Arc<dyn FallbackDemandSource>>,
        publisher: Arc<dyn PriceTickPublisher>,
        history_store: Arc<dyn PriceHistoryStore>,
        snapshot_store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        error_reporter: Arc<ErrorReporter>,
    ) -> Self {
        Self {
            config,
            engine,
            demand_tracker,
            listing_store,
            quality_store,
            supply_store,
            fallback_demand_source,
            publisher,
            history_store,
            snapshot_store,
            clock,
            error_reporter,
            cycle_running: AtomicBool::new(false),
            streaks: RwLock::new(HashMap::new()),
        }
    }

    /// Drives the interval loop until `shutdown` fires, then lets the
    /// in-flight cycle finish. `MissedTickBehavior::Skip` plus the
    /// single-flight guard in `run_once` together realize "skip ticks rather
    /// than queue them" even though a cycle's own async work can outlast one
    /// tick period.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(self.config.pricing.update_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once().await?;
                    if report.skipped_single_flight {
                        warn!("price updater cycle overran; skipping this tick");
                    } else {
                        info!(
                            listings = report.listings_considered,
                            ticks = report.ticks_published,
                            elapsed_ms = report.elapsed_ms,
                            "price updater cycle complete"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("price updater shutting down after in-flight cycle");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Runs exactly one cycle synchronously. Used by tests and by an
    /// operator-triggered manual repricing. Single-flight: a cycle already
    /// in progress causes this call to return immediately with
    /// `skipped_single_flight = true`.
    pub async fn run_once(&self) -> anyhow::Result<CycleReport> {
        if self
            .cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(CycleReport {
                skipped_single_flight: true,
                ..Default::default()
            });
        }

        let result = self.run_cycle().await;
        self.cycle_running.store(false, Ordering::Release);
        result
    }

    async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        let cycle_start = self.clock.now_instant();

        let listings = self.listing_store.active_listings().await?;
        let max_concurrent = self.config.max_concurrent_listings.max(1);
        let per_listing_deadline =
            std::time::Duration::from_millis(self.config.pricing.update_interval_ms.max(1));

        let gathered: Vec<Option<(Listing, PricingInput)>> = stream::iter(listings.into_iter())
            .map(|listing| async move {
                match tokio::time::timeout(per_listing_deadline, self.gather_inputs(&listing)).await {
                    Ok(input) => Some((listing, input)),
                    Err(_) => {
                        warn!(listing_id = %listing.listing_id, "listing state gather timed out, dropping from this cycle");
                        None
                    }
                }
            })
            .buffer_unordered(max_concurrent)
            .collect()
            .await;

        let gathered: Vec<(Listing, PricingInput)> = gathered.into_iter().flatten().collect();
        let listings_considered = gathered.len();
        let (listings, inputs): (Vec<Listing>, Vec<PricingInput>) = gathered.into_iter().unzip();
        let results = self.engine.compute_batch(&inputs);

        let mut ticks_published = 0usize;
        let mut price_write_errors = 0usize;
        let mut history_errors = 0usize;

        for (listing, result) in listings.iter().zip(results.iter()) {
            let previous_price = listing.current_price_usdc;
            if (result.price - previous_price).abs() < 1e-9 {
                continue;
            }

            let tick = self.build_tick(listing, result, previous_price);
            if let Err(e) = self.publisher.publish(&tick).await {
                self.error_reporter.report(ErrorReport::warn(
                    &listing.listing_id,
                    "publish_tick",
                    format!("failed to publish price tick: {e}"),
                ));
            } else {
                ticks_published += 1;
            }

            if let Err(e) = self
                .listing_store
                .update_current_price(&listing.listing_id, result.price)
                .await
            {
                error!(listing_id = %listing.listing_id, error = %e, "failed to persist new current price");
                price_write_errors += 1;
                continue;
            }

            let snapshot = self.build_snapshot(listing, result, previous_price);
            if let Err(e) = self.snapshot_store.save_snapshot(&snapshot).await {
                self.error_reporter.report(ErrorReport::warn(
                    &listing.listing_id,
                    "save_snapshot",
                    format!("failed to persist price snapshot: {e}"),
                ));
                history_errors += 1;
            }
            if let Err(e) = self.snapshot_store.save_auction_result(result).await {
                self.error_reporter.report(ErrorReport::warn(
                    &listing.listing_id,
                    "save_auction_result",
                    format!("failed to persist auction result: {e}"),
                ));
                history_errors += 1;
            }

            let entry = PriceHistoryEntry {
                price: result.price,
                floor: result.floor_price,
                multipliers: result.multipliers,
                demand_score: result.inputs.demand.score,
                demand_velocity: result.inputs.demand.velocity,
                timestamp: result.computed_at,
            };
            if let Err(e) = self.history_store.push(&listing.slug, entry).await {
                self.error_reporter.report(ErrorReport::warn(
                    &listing.listing_id,
                    "history_push",
                    format!("failed to push price history entry: {e}"),
                ));
                history_errors += 1;
            }
            let cutoff = result.computed_at - chrono::Duration::hours(HISTORY_RETENTION_HOURS);
            if let Err(e) = self.history_store.trim_older_than(&listing.slug, cutoff).await {
                self.error_reporter.report(ErrorReport::warn(
                    &listing.listing_id,
                    "history_trim",
                    format!("failed to trim price history: {e}"),
                ));
                history_errors += 1;
            }
        }

        let elapsed_ms = self
            .clock
            .now_instant()
            .duration_since(cycle_start)
            .as_millis() as u64;

        if elapsed_ms > self.config.pricing.update_interval_ms {
            warn!(elapsed_ms, interval_ms = self.config.pricing.update_interval_ms, "cycle overran its interval");
        }

        Ok(CycleReport {
            listings_considered,
            ticks_published,
            price_write_errors,
            history_errors,
            elapsed_ms,
            skipped_single_flight: false,
        })
    }

    async fn gather_inputs(&self, listing: &Listing) -> PricingInput {
        if self.demand_tracker.last_state(&listing.listing_id).is_none() {
            if let Some(fallback) = &self.fallback_demand_source {
                let since = self.clock.now_utc()
                    - chrono::Duration::milliseconds(self.config.pricing.demand_window_ms as i64);
                match fallback.recent_signals(&listing.listing_id, since).await {
                    Ok(signals) => self.demand_tracker.ingest_batch(signals),
                    Err(e) => self.error_reporter.report(ErrorReport::warn(
                        &listing.listing_id,
                        "fallback_demand",
                        format!("fallback demand source failed: {e}"),
                    )),
                }
            }
        }
        let demand = self.demand_tracker.compute_demand_state(&listing.listing_id);

        let quality = match self.quality_store.latest_quality(&listing.listing_id).await {
            Ok(Some(q)) => q,
            Ok(None) => QualityMetrics::defaults(),
            Err(e) => {
                self.error_reporter.report(ErrorReport::warn(
                    &listing.listing_id,
                    "quality_read",
                    format!("quality rollup read failed, using defaults: {e}"),
                ));
                QualityMetrics::defaults()
            }
        };

        let supply = match self.supply_store.supply_state(listing).await {
            Ok(s) => s,
            Err(e) => {
                self.error_reporter.report(ErrorReport::warn(
                    &listing.listing_id,
                    "supply_read",
                    format!("supply read failed, assuming uncontested: {e}"),
                ));
                crate::pricing::types::SupplyState {
                    competitor_count: 0,
                    is_unique: true,
                    capacity_per_minute: listing.capacity_per_minute,
                    utilization_percent: 0.0,
                }
            }
        };

        PricingInput {
            listing_id: listing.listing_id.clone(),
            floor_price: listing.floor_price_usdc,
            ceiling_price: listing.ceiling_price_usdc,
            demand,
            quality,
            supply,
            previous_price: Some(listing.current_price_usdc).filter(|p| *p > 0.0),
        }
    }

    fn build_tick(&self, listing: &Listing, result: &AuctionResult, previous_price: f64) -> PriceTick {
        let change_percent = if previous_price > 0.0 {
            (((result.price - previous_price) / previous_price) * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };
        let direction = if result.price > previous_price {
            TickDirection::Up
        } else if result.price < previous_price {
            TickDirection::Down
        } else {
            TickDirection::Flat
        };
        let demand = &result.inputs.demand;

        PriceTick {
            slug: listing.slug.clone(),
            name: listing.name.clone(),
            listing_id: listing.listing_id.clone(),
            current_price: result.price,
            previous_price,
            change_percent,
            direction,
            timestamp: result.computed_at,
            multipliers: result.multipliers,
            demand_score: demand.score,
            demand_velocity: demand.velocity,
        }
    }

    fn build_snapshot(&self, listing: &Listing, result: &AuctionResult, previous_price: f64) -> PriceSnapshot {
        let price_change_pct = if previous_price > 0.0 {
            ((result.price - previous_price) / previous_price) * 100.0
        } else {
            0.0
        };

        let mut streaks = self.streaks.write();
        let streak = streaks.entry(listing.listing_id.clone()).or_default();
        let at_floor = (result.price - result.floor_price).abs() < 1e-9;
        let at_ceiling = listing
            .ceiling_price_usdc
            .is_some_and(|c| (result.price - c).abs() < 1e-9);
        streak.windows_at_floor = if at_floor { streak.windows_at_floor + 1 } else { 0 };
        streak.windows_at_ceiling = if at_ceiling { streak.windows_at_ceiling + 1 } else { 0 };

        PriceSnapshot {
            listing_id: listing.listing_id.clone(),
            floor_price: result.floor_price,
            ceiling_price: listing.ceiling_price_usdc,
            price: result.price,
            previous_price,
            price_change_pct,
            multipliers: result.multipliers,
            windows_at_floor: streak.windows_at_floor,
            windows_at_ceiling: streak.windows_at_ceiling,
            computed_at: result.computed_at,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::adapters::{
        BroadcastTickPublisher, InMemoryHistoryStore, InMemoryListingStore, InMemoryQualityStore,
        InMemorySnapshotStore, InMemorySupplyStore,
    };
    use crate::pricing::clock::SystemClock;
    use crate::pricing::config::{PricingConfig, PricingServiceConfig, PricingPreset};
    use crate::pricing::types::ListingStatus;

    fn sample_listing(id: &str) -> Listing {
        Listing {
            listing_id: id.to_string(),
            slug: format!("{id}-slug"),
            name: format!("Listing {id}"),
            category_id: "cat-1".to_string(),
            floor_price_usdc: 0.01,
            ceiling_price_usdc: None,
            current_price_usdc: 0.01,
            capacity_per_minute: 60,
            status: ListingStatus::Active,
        }
    }

    fn build_updater() -> (
        PriceUpdater,
        Arc<InMemoryListingStore>,
        Arc<InMemorySnapshotStore>,
        Arc<InMemoryHistoryStore>,
    ) {
        let listing_store = Arc::new(InMemoryListingStore::new());
        let quality_store = Arc::new(InMemoryQualityStore::new());
        let supply_store = Arc::new(InMemorySupplyStore::new());
        let publisher = Arc::new(BroadcastTickPublisher::new(64));
        let history_store = Arc::new(InMemoryHistoryStore::new());
        let snapshot_store = Arc::new(InMemorySnapshotStore::new());
        let clock = Arc::new(SystemClock);

        let config = PricingServiceConfig {
            preset: PricingPreset::Growth,
            pricing: PricingConfig::growth(),
            max_concurrent_listings: 8,
        };
        let engine = Arc::new(PricingEngine::new(config.pricing, clock.clone()));
        let demand_tracker = Arc::new(DemandTracker::new(config.pricing.demand_window_ms, clock.clone()));
        let error_reporter = Arc::new(ErrorReporter::spawn(64));

        let updater = PriceUpdater::new(
            config,
            engine,
            demand_tracker,
            listing_store.clone(),
            quality_store,
            supply_store,
            None,
            publisher,
            history_store.clone(),
            snapshot_store.clone(),
            clock,
            error_reporter,
        );

        (updater, listing_store, snapshot_store, history_store)
    }

    #[tokio::test]
    async fn cycle_with_no_listings_is_a_no_op() {
        let (updater, _listings, _snapshots, _history) = build_updater();
        let report = updater.run_once().await.unwrap();
        assert_eq!(report.listings_considered, 0);
        assert_eq!(report.ticks_published, 0);
    }

    #[tokio::test]
    async fn s5_tick_fires_only_on_change() {
        let (updater, listing_store, snapshot_store, _history) = build_updater();
        let listing = sample_listing("l1");
        listing_store.upsert(listing.clone());

        let first = updater.run_once().await.unwrap();
        assert_eq!(first.listings_considered, 1);

        let stored = listing_store.get("l1").unwrap();
        let second = updater.run_once().await.unwrap();
        assert!(second.ticks_published <= 1);

        if stored.current_price_usdc == listing.floor_price_usdc {
            assert_eq!(second.ticks_published, 0);
        }
        assert!(!snapshot_store.snapshots().is_empty() || first.ticks_published == 0);
    }

    #[tokio::test]
    async fn concurrent_cycles_single_flight() {
        let (updater, listing_store, _snapshots, _history) = build_updater();
        listing_store.upsert(sample_listing("l1"));

        let updater = Arc::new(updater);
        let a = updater.clone();
        let b = updater.clone();
        let (ra, rb) = tokio::join!(a.run_once(), b.run_once());
        let ra = ra.unwrap();
        let rb = rb.unwrap();
        assert!(
            !(ra.skipped_single_flight && rb.skipped_single_flight),
            "at least one of two concurrently-launched cycles must actually run"
        );
    }
}
