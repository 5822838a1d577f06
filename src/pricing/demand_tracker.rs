//! Demand Tracker
//!
//! Converts a stream of per-listing demand signals into a normalized [0,100]
//! score and a velocity estimate, cheaply and resistant to flash spikes. The
//! hot path (`ingest_signal`) never suspends and never panics.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::trace;

use crate::pricing::clock::Clock;
use crate::pricing::types::{
    BoundedBuyerSet, DemandSignal, DemandState, DemandTrackerStats, DemandWeights,
    PercentileThresholds, PercentileThresholdsPatch,
};

/// Windows retained per listing beyond the current one.
const MAX_HISTORICAL_WINDOWS: usize = 12;

/// Windows used for the velocity least-squares fit.
const VELOCITY_WINDOWS: usize = 6;

struct SignalWindow {
    weighted_sum: f64,
    unique_buyers: BoundedBuyerSet,
    opened_at: Instant,
    raw_count: u64,
}

impl SignalWindow {
    fn new(opened_at: Instant) -> Self {
        Self {
            weighted_sum: 0.0,
            unique_buyers: BoundedBuyerSet::new(BoundedBuyerSet::DEFAULT_CAP),
            opened_at,
            raw_count: 0,
        }
    }
}

/// A window that has rotated out of current; immutable from here on.
struct ClosedWindow {
    weighted_sum: f64,
    unique_buyers: usize,
    closed_at: Instant,
}

struct ListingTracker {
    current_window: SignalWindow,
    historical_windows: VecDeque<ClosedWindow>,
    last_state: Option<DemandState>,
}

impl ListingTracker {
    fn new(now: Instant) -> Self {
        Self {
            current_window: SignalWindow::new(now),
            historical_windows: VecDeque::with_capacity(MAX_HISTORICAL_WINDOWS),
            last_state: None,
        }
    }

    /// Rotate the current window if it has expired. No back-filling: signals
    /// that arrive after rotation land in the new window regardless of their
    /// own timestamp.
    fn rotate_if_expired(&mut self, now: Instant, window_duration: Duration) {
        if now.duration_since(self.current_window.opened_at) < window_duration {
            return;
        }
        let closed = ClosedWindow {
            weighted_sum: self.current_window.weighted_sum,
            unique_buyers: self.current_window.unique_buyers.len(),
            closed_at: now,
        };
        self.historical_windows.push_back(closed);
        while self.historical_windows.len() > MAX_HISTORICAL_WINDOWS {
            self.historical_windows.pop_front();
        }
        self.current_window = SignalWindow::new(now);
    }
}

/// Piecewise-linear normalization of a raw weighted-signal sum into [0,100].
fn normalize_score(raw_sum: f64, thresholds: &PercentileThresholds) -> f64 {
    if raw_sum <= 0.0 {
        return 0.0;
    }
    let lerp = |lo_x: f64, hi_x: f64, lo_y: f64, hi_y: f64, x: f64| {
        if (hi_x - lo_x).abs() < f64::EPSILON {
            return hi_y;
        }
        lo_y + (hi_y - lo_y) * (x - lo_x) / (hi_x - lo_x)
    };
    if raw_sum <= thresholds.p10 {
        lerp(0.0, thresholds.p10, 0.0, 10.0, raw_sum)
    } else if raw_sum <= thresholds.p50 {
        lerp(thresholds.p10, thresholds.p50, 10.0, 50.0, raw_sum)
    } else if raw_sum <= thresholds.p90 {
        lerp(thresholds.p50, thresholds.p90, 50.0, 90.0, raw_sum)
    } else if raw_sum <= thresholds.p99 {
        lerp(thresholds.p90, thresholds.p99, 90.0, 100.0, raw_sum)
    } else {
        100.0
    }
    .clamp(0.0, 100.0)
}

/// Ordinary least-squares slope of `score = a + b*i` over `scores`, indexed
/// oldest-first. Returns 0 for fewer than 2 points or a degenerate
/// denominator.
fn least_squares_slope(scores: &[f64]) -> f64 {
    let n = scores.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let sum_i: f64 = (0..n).map(|i| i as f64).sum();
    let mean_i = sum_i / n_f;
    let mean_y = scores.iter().sum::<f64>() / n_f;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, &y) in scores.iter().enumerate() {
        let x = i as f64 - mean_i;
        numerator += x * (y - mean_y);
        denominator += x * x;
    }
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    numerator / denominator
}

/// Sliding-window signal aggregator with percentile-based normalization and
/// velocity estimation. One instance per marketplace; tracks every listing
/// that has received at least one signal.
pub struct DemandTracker {
    trackers: RwLock<HashMap<String, ListingTracker>>,
    thresholds: RwLock<PercentileThresholds>,
    weights: RwLock<DemandWeights>,
    window_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl DemandTracker {
    pub fn new(window_duration_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            trackers: RwLock::new(HashMap::new()),
            thresholds: RwLock::new(PercentileThresholds::default()),
            weights: RwLock::new(DemandWeights::default()),
            window_duration: Duration::from_millis(window_duration_ms),
            clock,
        }
    }

    /// Replace the default per-kind weight table. Overrides merge into
    /// defaults; call `new` again (or keep a handle) if you need to reset.
    pub fn set_weights(&self, weights: DemandWeights) {
        *self.weights.write() = weights;
    }

    /// Must not suspend. Rotates the listing's window if expired, adds the
    /// weighted contribution, and records the buyer if present.
    pub fn ingest_signal(&self, signal: DemandSignal) {
        let now = self.clock.now_instant();
        let kind_weight = self.weights.read().weight_for(signal.kind);
        let contribution = kind_weight * signal.weight;

        let mut trackers = self.trackers.write();
        let tracker = trackers
            .entry(signal.listing_id.clone())
            .or_insert_with(|| ListingTracker::new(now));
        tracker.rotate_if_expired(now, self.window_duration);

        tracker.current_window.weighted_sum += contribution;
        tracker.current_window.raw_count += 1;
        if let Some(buyer_id) = signal.buyer_id.as_deref() {
            tracker.current_window.unique_buyers.insert(buyer_id);
        }

        trace!(
            listing_id = %signal.listing_id,
            kind = ?signal.kind,
            contribution,
            "ingested demand signal"
        );
    }

    pub fn ingest_batch(&self, signals: impl IntoIterator<Item = DemandSignal>) {
        for signal in signals {
            self.ingest_signal(signal);
        }
    }

    /// Rotates the window if expired, computes score + velocity, stores as
    /// `last_state`, and returns it. Unknown listings get an empty tracker
    /// (score 0, velocity 0) rather than an error.
    pub fn compute_demand_state(&self, listing_id: &str) -> DemandState {
        let now = self.clock.now_instant();
        let now_utc = self.clock.now_utc();
        let thresholds = *self.thresholds.read();
        let window_ms = self.window_duration.as_millis() as u64;

        let mut trackers = self.trackers.write();
        let tracker = trackers
            .entry(listing_id.to_string())
            .or_insert_with(|| ListingTracker::new(now));
        tracker.rotate_if_expired(now, self.window_duration);

        let raw_sum = tracker.current_window.weighted_sum;
        let score = normalize_score(raw_sum, &thresholds);

        let take = tracker.historical_windows.len().min(VELOCITY_WINDOWS);
        let recent_scores: Vec<f64> = tracker
            .historical_windows
            .iter()
            .rev()
            .take(take)
            .rev()
            .map(|w| normalize_score(w.weighted_sum, &thresholds))
            .collect();
        let velocity = (least_squares_slope(&recent_scores) * 100.0).round() / 100.0;

        let state = DemandState {
            listing_id: listing_id.to_string(),
            score,
            raw_signal_sum: raw_sum,
            unique_buyers: tracker.current_window.unique_buyers.len(),
            velocity,
            computed_at: now_utc,
            window_ms,
        };
        tracker.last_state = Some(state.clone());
        state
    }

    pub fn compute_all_demand_states(&self) -> Vec<DemandState> {
        let listing_ids: Vec<String> = self.trackers.read().keys().cloned().collect();
        listing_ids
            .into_iter()
            .map(|id| self.compute_demand_state(&id))
            .collect()
    }

    /// Pure read: returns the last computed state without rotating anything.
    pub fn last_state(&self, listing_id: &str) -> Option<DemandState> {
        self.trackers.read().get(listing_id).and_then(|t| t.last_state.clone())
    }

    pub fn update_percentiles(&self, patch: PercentileThresholdsPatch) {
        self.thresholds.write().apply(patch);
    }

    pub fn remove_listing(&self, listing_id: &str) {
        self.trackers.write().remove(listing_id);
    }

    pub fn stats(&self) -> DemandTrackerStats {
        let trackers = self.trackers.read();
        let mut total_signals = 0u64;
        let mut total_unique_buyers = 0usize;
        for tracker in trackers.values() {
            total_signals += tracker.current_window.raw_count;
            total_unique_buyers += tracker.current_window.unique_buyers.len();
        }
        DemandTrackerStats {
            tracked_listings: trackers.len(),
            total_signals_in_current_windows: total_signals,
            total_unique_buyers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::clock::FixedClock;
    use crate::pricing::types::SignalKind;
    use chrono::Utc;

    fn tracker_with_clock(window_ms: u64) -> (DemandTracker, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let tracker = DemandTracker::new(window_ms, clock.clone());
        (tracker, clock)
    }

    #[test]
    fn unknown_listing_returns_empty_state() {
        let (tracker, _clock) = tracker_with_clock(60_000);
        let state = tracker.compute_demand_state("ghost");
        assert_eq!(state.score, 0.0);
        assert_eq!(state.velocity, 0.0);
    }

    #[test]
    fn score_always_in_bounds() {
        let (tracker, _clock) = tracker_with_clock(60_000);
        for _ in 0..500 {
            tracker.ingest_signal(DemandSignal::new(
                "listing-1",
                SignalKind::Subscription,
                Utc::now(),
            ));
        }
        let state = tracker.compute_demand_state("listing-1");
        assert!((0.0..=100.0).contains(&state.score));
    }

    #[test]
    fn unsubscription_dampens_without_floor_at_zero_contribution() {
        let (tracker, _clock) = tracker_with_clock(60_000);
        tracker.ingest_signal(DemandSignal::new(
            "listing-1",
            SignalKind::Subscription,
            Utc::now(),
        ));
        let before = tracker.compute_demand_state("listing-1").raw_signal_sum;
        tracker.ingest_signal(DemandSignal::new(
            "listing-1",
            SignalKind::Unsubscription,
            Utc::now(),
        ));
        let after = tracker.compute_demand_state("listing-1").raw_signal_sum;
        assert!(after < before);
    }

    #[test]
    fn velocity_zero_with_fewer_than_two_windows() {
        let (tracker, clock) = tracker_with_clock(1_000);
        tracker.ingest_signal(DemandSignal::new("listing-1", SignalKind::ApiCall, Utc::now()));
        clock.advance(chrono::Duration::milliseconds(1_500));
        let state = tracker.compute_demand_state("listing-1");
        assert_eq!(state.velocity, 0.0);
    }

    #[test]
    fn velocity_turns_positive_on_sustained_acceleration() {
        let (tracker, clock) = tracker_with_clock(1_000);
        for _ in 0..3 {
            for _ in 0..10 {
                tracker.ingest_signal(DemandSignal::new(
                    "listing-1",
                    SignalKind::ApiCall,
                    Utc::now(),
                ));
            }
            clock.advance(chrono::Duration::milliseconds(1_100));
            tracker.compute_demand_state("listing-1");
        }
        for _ in 0..3 {
            for _ in 0..50 {
                tracker.ingest_signal(DemandSignal::new(
                    "listing-1",
                    SignalKind::ApiCall,
                    Utc::now(),
                ));
            }
            clock.advance(chrono::Duration::milliseconds(1_100));
            tracker.compute_demand_state("listing-1");
        }
        let final_state = tracker.compute_demand_state("listing-1");
        assert!(final_state.velocity > 0.5, "velocity was {}", final_state.velocity);
    }

    #[test]
    fn remove_listing_drops_tracker() {
        let (tracker, _clock) = tracker_with_clock(60_000);
        tracker.ingest_signal(DemandSignal::new("listing-1", SignalKind::ApiCall, Utc::now()));
        tracker.remove_listing("listing-1");
        assert!(tracker.last_state("listing-1").is_none());
        assert_eq!(tracker.stats().tracked_listings, 0);
    }
}
