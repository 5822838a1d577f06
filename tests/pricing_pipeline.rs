//! End-to-end pipeline test: Quality Scorer -> Demand Tracker -> Pricing
//! Engine -> Price Updater, wired together through the in-memory reference
//! adapters exactly as `main.rs` wires the real worker.

use std::sync::Arc;

use chrono::Utc;
use nexusx_pricing::pricing::adapters::{
    BroadcastTickPublisher, InMemoryHistoryStore, InMemoryListingStore, InMemoryQualityStore,
    InMemorySnapshotStore, InMemorySupplyStore,
};
use nexusx_pricing::pricing::{
    score_quality, DemandSignal, DemandTracker, ErrorReporter, Listing, ListingStatus,
    PriceUpdater, PricingConfig, PricingEngine, PricingPreset, PricingServiceConfig,
    RawProviderMetrics, SignalKind, SystemClock,
};

fn sample_listing(id: &str, category: &str) -> Listing {
    Listing {
        listing_id: id.to_string(),
        slug: format!("{id}-slug"),
        name: format!("Listing {id}"),
        category_id: category.to_string(),
        floor_price_usdc: 0.01,
        ceiling_price_usdc: Some(1.0),
        current_price_usdc: 0.01,
        capacity_per_minute: 120,
        status: ListingStatus::Active,
    }
}

#[tokio::test]
async fn full_pipeline_prices_an_active_listing_and_publishes_a_tick() {
    let clock = Arc::new(SystemClock);
    let config = PricingServiceConfig {
        preset: PricingPreset::Growth,
        pricing: PricingConfig::growth(),
        max_concurrent_listings: 8,
    };

    let engine = Arc::new(PricingEngine::new(config.pricing, clock.clone()));
    let demand_tracker = Arc::new(DemandTracker::new(config.pricing.demand_window_ms, clock.clone()));

    let listing_store = Arc::new(InMemoryListingStore::new());
    let quality_store = Arc::new(InMemoryQualityStore::new());
    let supply_store = Arc::new(InMemorySupplyStore::new());
    let history_store = Arc::new(InMemoryHistoryStore::new());
    let snapshot_store = Arc::new(InMemorySnapshotStore::new());
    let publisher = Arc::new(BroadcastTickPublisher::new(16));
    let mut tick_rx = publisher.subscribe();

    let listing = sample_listing("listing-1", "category-a");
    listing_store.upsert(listing.clone());
    supply_store.sync_listings(&[listing.clone()]);
    supply_store.set_utilization(&listing.listing_id, 40.0);

    // Quality Scorer: a provider with strong but not perfect telemetry.
    let quality = score_quality(&RawProviderMetrics {
        uptime_minutes: 9_990.0,
        total_minutes: 10_000.0,
        success_count: 9_500,
        failure_count: 50,
        median_latency_ms: 80.0,
        p99_latency_ms: 300.0,
        average_rating: 4.2,
        rating_count: 120,
    });
    assert!((0.0..=100.0).contains(&quality.composite_score));
    quality_store.set(&listing.listing_id, quality);

    // Demand Tracker: a burst of buyer activity before the first cycle runs.
    for i in 0..40 {
        demand_tracker.ingest_signal(
            DemandSignal::new(&listing.listing_id, SignalKind::ApiCall, Utc::now())
                .with_buyer(format!("buyer-{i}")),
        );
    }
    demand_tracker.ingest_signal(DemandSignal::new(
        &listing.listing_id,
        SignalKind::Subscription,
        Utc::now(),
    ));

    let error_reporter = Arc::new(ErrorReporter::spawn(32));
    let updater = PriceUpdater::new(
        config,
        engine.clone(),
        demand_tracker.clone(),
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

    let report = updater.run_once().await.expect("cycle should not error");
    assert_eq!(report.listings_considered, 1);
    assert!(!report.skipped_single_flight);

    let stored = listing_store.get(&listing.listing_id).expect("listing still present");
    assert!(stored.current_price_usdc >= listing.floor_price_usdc);
    assert!(stored.current_price_usdc <= listing.ceiling_price_usdc.unwrap());

    let snapshots = snapshot_store.snapshots();
    let auction_results = snapshot_store.auction_results();
    if report.ticks_published > 0 {
        assert_eq!(snapshots.len(), 1);
        assert_eq!(auction_results.len(), 1);
        assert_eq!(snapshots[0].listing_id, listing.listing_id);
        assert!(snapshots[0].price >= snapshots[0].floor_price);

        let tick = tick_rx.try_recv().expect("a tick should have been published");
        assert_eq!(tick.listing_id, listing.listing_id);
        assert_eq!(tick.slug, listing.slug);

        let history = history_store.entries(&listing.slug);
        assert_eq!(history.len(), 1);
        assert!(history[0].demand_score > 0.0);
    }

    // Re-running immediately with unchanged demand/quality/supply inputs:
    // smoothing keeps nudging the price toward the same unconstrained
    // target, so a second change (and tick) is expected here, but the
    // per-cycle rate limit must still hold (invariant 2).
    let before_second = listing_store.get(&listing.listing_id).unwrap().current_price_usdc;
    let second = updater.run_once().await.expect("second cycle should not error");
    assert!(second.ticks_published <= 1);
    let after_second = listing_store.get(&listing.listing_id).unwrap().current_price_usdc;
    let max_delta = before_second * 0.15 + 1e-6;
    assert!((after_second - before_second).abs() <= max_delta);
}

#[tokio::test]
async fn demand_tracker_is_shared_state_across_cycles() {
    let clock = Arc::new(SystemClock);
    let tracker = Arc::new(DemandTracker::new(60_000, clock));

    for _ in 0..5 {
        tracker.ingest_signal(DemandSignal::new(
            "listing-x",
            SignalKind::ApiCall,
            Utc::now(),
        ));
    }
    let first = tracker.compute_demand_state("listing-x");
    assert!(first.raw_signal_sum > 0.0);

    tracker.remove_listing("listing-x");
    let after_removal = tracker.compute_demand_state("listing-x");
    assert_eq!(after_removal.raw_signal_sum, 0.0);
}
