//! In-process reference adapters for the external-collaborator ports.
//!
//! These back tests and a standalone run of the worker. A real deployment
//! swaps them for a relational-database-backed `ListingStore` and a
//! Redis-backed `PriceTickPublisher` / `PriceHistoryStore` without touching
//! the Price Updater itself.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use crate::pricing::config::validate_ceiling_above_floor;
use crate::pricing::ports::{
    ListingStore, PriceHistoryEntry, PriceHistoryStore, PriceTickPublisher, QualityRollupStore,
    SnapshotStore, SupplyStore,
};
use crate::pricing::types::{
    AuctionResult, Listing, PriceSnapshot, PriceTick, QualityMetrics, SupplyState,
};

/// In-memory listing book. `update_current_price` is the only mutation path;
/// everything else about a listing is set up by the host before the worker
/// starts.
#[derive(Default)]
pub struct InMemoryListingStore {
    listings: RwLock<HashMap<String, Listing>>,
}

impl InMemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surfaces a ceiling-below-floor misconfiguration at listing-update time
    /// (a `warn!`, not a rejection — the engine's floor-wins step is the
    /// actual enforcement; this is the earlier of the two lines of defense).
    pub fn upsert(&self, listing: Listing) {
        if let Err(e) = validate_ceiling_above_floor(
            &listing.listing_id,
            listing.floor_price_usdc,
            listing.ceiling_price_usdc,
        ) {
            tracing::warn!(listing_id = %listing.listing_id, error = %e, "listing upsert with invalid pricing params");
        }
        self.listings.write().insert(listing.listing_id.clone(), listing);
    }

    pub fn get(&self, listing_id: &str) -> Option<Listing> {
        self.listings.read().get(listing_id).cloned()
    }
}

#[async_trait]
impl ListingStore for InMemoryListingStore {
    async fn active_listings(&self) -> anyhow::Result<Vec<Listing>> {
        Ok(self
            .listings
            .read()
            .values()
            .filter(|l| l.is_active())
            .cloned()
            .collect())
    }

    async fn update_current_price(&self, listing_id: &str, new_price: f64) -> anyhow::Result<()> {
        let mut listings = self.listings.write();
        match listings.get_mut(listing_id) {
            Some(listing) => {
                listing.current_price_usdc = new_price;
                Ok(())
            }
            None => Err(anyhow::anyhow!("unknown listing {listing_id}")),
        }
    }
}

/// In-memory quality rollups, keyed by listing id.
#[derive(Default)]
pub struct InMemoryQualityStore {
    rollups: RwLock<HashMap<String, QualityMetrics>>,
}

impl InMemoryQualityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, listing_id: impl Into<String>, metrics: QualityMetrics) {
        self.rollups.write().insert(listing_id.into(), metrics);
    }
}

#[async_trait]
impl QualityRollupStore for InMemoryQualityStore {
    async fn latest_quality(&self, listing_id: &str) -> anyhow::Result<Option<QualityMetrics>> {
        Ok(self.rollups.read().get(listing_id).copied())
    }
}

/// Derives supply state from the same in-memory listing book (competitor
/// count within a category) plus an externally-fed utilization map.
#[derive(Default)]
pub struct InMemorySupplyStore {
    listings: RwLock<HashMap<String, Listing>>,
    utilization_percent: RwLock<HashMap<String, f64>>,
}

impl InMemorySupplyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync_listings(&self, listings: &[Listing]) {
        let mut guard = self.listings.write();
        guard.clear();
        for listing in listings {
            guard.insert(listing.listing_id.clone(), listing.clone());
        }
    }

    pub fn set_utilization(&self, listing_id: impl Into<String>, utilization_percent: f64) {
        self.utilization_percent
            .write()
            .insert(listing_id.into(), utilization_percent);
    }
}

#[async_trait]
impl SupplyStore for InMemorySupplyStore {
    async fn supply_state(&self, listing: &Listing) -> anyhow::Result<SupplyState> {
        let competitor_count = self
            .listings
            .read()
            .values()
            .filter(|other| {
                other.category_id == listing.category_id
                    && other.listing_id != listing.listing_id
                    && other.is_active()
            })
            .count() as u32;

        let utilization_percent = self
            .utilization_percent
            .read()
            .get(&listing.listing_id)
            .copied()
            .unwrap_or(0.0);

        Ok(SupplyState {
            competitor_count,
            is_unique: competitor_count == 0,
            capacity_per_minute: listing.capacity_per_minute,
            utilization_percent,
        })
    }
}

/// `tokio::sync::broadcast`-backed reference publisher, mirroring the
/// `broadcast` channel this codebase already uses for its own realtime
/// fan-out. A send with no subscribers is not an error — it just means the
/// realtime UI currently has nobody watching.
pub struct BroadcastTickPublisher {
    sender: broadcast::Sender<PriceTick>,
}

impl BroadcastTickPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PriceTick> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl PriceTickPublisher for BroadcastTickPublisher {
    async fn publish(&self, tick: &PriceTick) -> anyhow::Result<()> {
        match self.sender.send(tick.clone()) {
            Ok(_) | Err(broadcast::error::SendError(_)) => {
                trace!(listing_id = %tick.listing_id, "published price tick");
                Ok(())
            }
        }
    }
}

/// In-memory sorted-set stand-in for `price_history:{slug}`, ordered by
/// timestamp the same way a real sorted set would be.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    history: RwLock<HashMap<String, Vec<PriceHistoryEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, slug: &str) -> Vec<PriceHistoryEntry> {
        self.history.read().get(slug).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PriceHistoryStore for InMemoryHistoryStore {
    async fn push(&self, slug: &str, entry: PriceHistoryEntry) -> anyhow::Result<()> {
        let mut history = self.history.write();
        let entries = history.entry(slug.to_string()).or_default();
        entries.push(entry);
        entries.sort_by_key(|e| e.timestamp);
        Ok(())
    }

    async fn trim_older_than(&self, slug: &str, cutoff: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(entries) = self.history.write().get_mut(slug) {
            entries.retain(|e| e.timestamp >= cutoff);
        }
        Ok(())
    }
}

/// Append-only in-memory snapshot + auction-result log.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<Vec<PriceSnapshot>>,
    auction_results: RwLock<Vec<AuctionResult>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<PriceSnapshot> {
        self.snapshots.read().clone()
    }

    pub fn auction_results(&self) -> Vec<AuctionResult> {
        self.auction_results.read().clone()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_snapshot(&self, snapshot: &PriceSnapshot) -> anyhow::Result<()> {
        self.snapshots.write().push(snapshot.clone());
        Ok(())
    }

    async fn save_auction_result(&self, result: &AuctionResult) -> anyhow::Result<()> {
        self.auction_results.write().push(result.clone());
        Ok(())
    }
}
