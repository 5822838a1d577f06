//! Pricing Engine
//!
//! Pure, stateless, configurable multiplier composition. All per-call state
//! is supplied as arguments; the engine itself owns only its config. Safe to
//! invoke concurrently from any thread with the same config snapshot.

use std::f64::consts::PI;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use crate::pricing::clock::Clock;
use crate::pricing::config::PricingConfig;
use crate::pricing::types::{
    AuctionResult, AuctionResultInputs, PriceMultipliers, PricingInput, QualityMetrics,
    SimulationResult, SupplyState, TransactionSplit,
};

/// Logistic steepness for the demand multiplier.
const DEMAND_SIGMOID_K: f64 = 0.08;

/// Pure multiplier-composition engine. Config is copy-on-update: `ArcSwap`
/// lets `update_config` publish a new snapshot atomically while in-flight
/// `compute_price` calls finish against whichever snapshot they already
/// loaded, never a torn mix.
pub struct PricingEngine {
    config: ArcSwap<PricingConfig>,
    clock: Arc<dyn Clock>,
}

impl PricingEngine {
    pub fn new(config: PricingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            clock,
        }
    }

    pub fn config(&self) -> PricingConfig {
        **self.config.load()
    }

    pub fn update_config(&self, config: PricingConfig) {
        self.config.store(Arc::new(config));
    }

    /// Steps are normative and ordered: multipliers -> combine -> smooth ->
    /// rate-limit -> floor -> ceiling -> quantize.
    pub fn compute_price(&self, input: &PricingInput) -> AuctionResult {
        let start = self.clock.now_instant();
        let config = self.config();

        let floor = sanitize_floor(input.floor_price);
        let ceiling = input.ceiling_price.and_then(|c| {
            if c.is_finite() && c > 0.0 {
                Some(c)
            } else {
                warn!(listing_id = %input.listing_id, ceiling = c, "non-finite ceiling ignored");
                None
            }
        });
        if let Some(c) = ceiling {
            if c < floor {
                warn!(
                    listing_id = %input.listing_id,
                    floor,
                    ceiling = c,
                    "ceiling below floor: provider misconfiguration, floor wins"
                );
            }
        }

        let demand = neutral_if_not_finite(demand_multiplier(
            input.demand.score,
            config.max_demand_multiplier,
        ));
        let scarcity = neutral_if_not_finite(scarcity_multiplier(
            &input.supply,
            config.max_scarcity_multiplier,
        ));
        let quality = neutral_if_not_finite(quality_multiplier(
            &input.quality,
            config.max_quality_multiplier,
        ));
        let momentum = neutral_if_not_finite(momentum_multiplier(
            input.demand.velocity,
            config.max_momentum_multiplier,
        ));
        let temporal = neutral_if_not_finite(temporal_multiplier(self.clock.now_utc()));

        let combined = neutral_if_not_finite(demand * scarcity * quality * momentum * temporal);

        let mut raw = floor * combined;

        if let Some(previous) = input.previous_price.filter(|p| *p > 0.0) {
            raw = lerp(previous, raw, config.smoothing_factor.clamp(0.0, 1.0));

            let max_delta = previous * (config.max_price_change_percent / 100.0).max(0.0);
            let lo = previous - max_delta;
            let hi = previous + max_delta;
            raw = raw.clamp(lo, hi);
        }

        // Floor is sacred: restores even if smoothing + rate-limit pushed below it.
        raw = raw.max(floor);

        // A ceiling below floor is a provider misconfiguration (logged above);
        // floor wins, so the ceiling clamp is simply not applied in that case.
        if let Some(c) = ceiling.filter(|c| *c >= floor) {
            raw = raw.min(c);
        }

        let price = quantize6(raw);

        if cfg!(debug_assertions) {
            debug_assert!(
                price >= floor - 1e-9,
                "consistency violation: price {price} below floor {floor} after floor step"
            );
        } else if price < floor {
            warn!(
                listing_id = %input.listing_id,
                price,
                floor,
                "consistency violation clamped in release build"
            );
        }
        let price = price.max(floor);

        let multipliers = PriceMultipliers {
            demand,
            scarcity,
            quality,
            momentum,
            temporal,
            combined,
        };

        let elapsed = self.clock.now_instant().duration_since(start);

        debug!(
            listing_id = %input.listing_id,
            price,
            ?multipliers,
            "computed price"
        );

        AuctionResult {
            listing_id: input.listing_id.clone(),
            price,
            floor_price: floor,
            multipliers,
            inputs: AuctionResultInputs {
                demand: input.demand.clone(),
                quality: input.quality,
                supply: input.supply,
            },
            computed_at: self.clock.now_utc(),
            compute_time_us: elapsed.as_micros() as u64,
        }
    }

    /// Maps an input slice to results, order preserved.
    pub fn compute_batch(&self, inputs: &[PricingInput]) -> Vec<AuctionResult> {
        inputs.iter().map(|input| self.compute_price(input)).collect()
    }

    /// Splits `price` into provider and platform shares using the engine's
    /// own `platform_fee_rate` — the single source of truth (see
    /// `SPEC_FULL.md` §9 on fee-rate drift).
    pub fn compute_transaction_split(&self, price: f64) -> TransactionSplit {
        let fee_rate = self.config().platform_fee_rate.clamp(0.0, 1.0);
        let platform_fee = quantize6(price * fee_rate);
        let provider_receives = quantize6(price - platform_fee);
        TransactionSplit {
            buyer_pays: quantize6(price),
            provider_receives,
            platform_fee,
            fee_rate,
        }
    }

    /// Constructs mock inputs and calls `compute_price` with
    /// `previous_price = None, ceiling = None`. Used by provider tooling for
    /// "what-if" experiments.
    pub fn simulate_price(
        &self,
        floor: f64,
        demand_score: f64,
        competitor_count: u32,
        quality_score: f64,
    ) -> SimulationResult {
        use crate::pricing::types::DemandState;

        let now = self.clock.now_utc();
        let input = PricingInput {
            listing_id: "simulation".to_string(),
            floor_price: floor,
            ceiling_price: None,
            demand: DemandState {
                listing_id: "simulation".to_string(),
                score: demand_score.clamp(0.0, 100.0),
                raw_signal_sum: 0.0,
                unique_buyers: 0,
                velocity: 0.0,
                computed_at: now,
                window_ms: 0,
            },
            quality: QualityMetrics {
                uptime_percent: 100.0,
                median_latency_ms: 0.0,
                p99_latency_ms: 0.0,
                error_rate_percent: 0.0,
                average_rating: 5.0,
                rating_count: 1000,
                composite_score: quality_score.clamp(0.0, 100.0),
            },
            supply: SupplyState {
                competitor_count,
                is_unique: competitor_count == 0,
                capacity_per_minute: 60,
                utilization_percent: 0.0,
            },
            previous_price: None,
        };
        let result = self.compute_price(&input);
        SimulationResult {
            price: result.price,
            multipliers: result.multipliers,
        }
    }
}

fn sanitize_floor(floor: f64) -> f64 {
    if floor.is_finite() && floor > 0.0 {
        floor
    } else {
        warn!(floor, "non-positive or non-finite floor clamped to epsilon");
        1e-6
    }
}

fn neutral_if_not_finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        1.0
    }
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

/// Quantize to 6 decimal places, half-away-from-zero.
pub fn quantize6(value: f64) -> f64 {
    let scaled = value * 1_000_000.0;
    let rounded = if scaled >= 0.0 {
        (scaled + 0.5).floor()
    } else {
        (scaled - 0.5).ceil()
    };
    rounded / 1_000_000.0
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn demand_multiplier(score: f64, max_demand: f64) -> f64 {
    let score = score.clamp(0.0, 100.0);
    let raw = 1.0 + (max_demand - 1.0) * sigmoid(DEMAND_SIGMOID_K * (score - 50.0));
    (raw * 10_000.0).round() / 10_000.0
}

fn scarcity_multiplier(supply: &SupplyState, max_scarcity: f64) -> f64 {
    let competitor_factor = if supply.is_unique || supply.competitor_count == 0 {
        1.0
    } else if supply.competitor_count <= 2 {
        0.6
    } else if supply.competitor_count <= 5 {
        0.25
    } else {
        0.0
    };

    let utilization = supply.utilization_percent.clamp(0.0, 100.0);
    let utilization_factor = if utilization <= 70.0 {
        0.0
    } else {
        (((utilization - 70.0) / 30.0) * 0.4).min(0.4)
    };

    let scarcity_factor = competitor_factor.max(utilization_factor).min(1.0);
    1.0 + (max_scarcity - 1.0) * scarcity_factor
}

fn quality_multiplier(quality: &QualityMetrics, max_quality: f64) -> f64 {
    let score = quality.composite_score.clamp(0.0, 100.0);
    let base = 0.7 + (max_quality - 0.7) * (score / 100.0);

    let excellence_bonus = if score >= 90.0 {
        ((score - 90.0) / 10.0) * 0.15
    } else {
        0.0
    };

    let mut multiplier = base + excellence_bonus;

    if quality.average_rating < 3.0 && quality.rating_count >= 20 {
        multiplier *= 0.85;
    }

    multiplier.clamp(0.7, max_quality + 0.15)
}

fn momentum_multiplier(velocity: f64, max_momentum: f64) -> f64 {
    if velocity == 0.0 {
        return 1.0;
    }
    let min_m = 1.0 / max_momentum;
    if velocity > 0.0 {
        let lift = (max_momentum - 1.0) * (velocity / 20.0).min(1.0).sqrt();
        (1.0 + lift).clamp(1.0, max_momentum)
    } else {
        let drop = (1.0 - min_m) * (velocity.abs() / 20.0).min(1.0).sqrt();
        (1.0 - drop).clamp(min_m, 1.0)
    }
}

fn temporal_multiplier(now_utc: chrono::DateTime<chrono::Utc>) -> f64 {
    use chrono::Timelike;
    let hour_utc = now_utc.hour() as f64
        + now_utc.minute() as f64 / 60.0
        + now_utc.second() as f64 / 3600.0;
    1.0 + 0.05 * (2.0 * PI * (hour_utc - 14.0) / 24.0).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::clock::FixedClock;
    use crate::pricing::types::DemandState;
    use chrono::{TimeZone, Utc};

    fn engine_at_hour(hour: u32) -> (PricingEngine, Arc<FixedClock>) {
        let fixed_time = Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(fixed_time));
        let engine = PricingEngine::new(PricingConfig::growth(), clock.clone());
        (engine, clock)
    }

    fn input(
        listing_id: &str,
        floor: f64,
        ceiling: Option<f64>,
        demand_score: f64,
        velocity: f64,
        quality_score: f64,
        competitors: u32,
        is_unique: bool,
        utilization: f64,
        previous: Option<f64>,
    ) -> PricingInput {
        PricingInput {
            listing_id: listing_id.to_string(),
            floor_price: floor,
            ceiling_price: ceiling,
            demand: DemandState {
                listing_id: listing_id.to_string(),
                score: demand_score,
                raw_signal_sum: 0.0,
                unique_buyers: 0,
                velocity,
                computed_at: Utc::now(),
                window_ms: 300_000,
            },
            quality: QualityMetrics {
                uptime_percent: 99.9,
                median_latency_ms: 100.0,
                p99_latency_ms: 500.0,
                error_rate_percent: 0.5,
                average_rating: 4.0,
                rating_count: 50,
                composite_score: quality_score,
            },
            supply: SupplyState {
                competitor_count: competitors,
                is_unique,
                capacity_per_minute: 60,
                utilization_percent: utilization,
            },
            previous_price: previous,
        }
    }

    #[test]
    fn s1_floor_preserved_under_zero_demand() {
        let (engine, _clock) = engine_at_hour(14);
        let result = engine.compute_price(&input(
            "l1", 0.01, None, 0.0, 0.0, 50.0, 10, false, 30.0, None,
        ));
        assert!(result.price >= 0.01);
        assert!(result.price < 0.02);
        assert!((result.multipliers.demand - 1.0).abs() < 0.05);
    }

    #[test]
    fn s2_ceiling_respected_at_max_everything() {
        let (engine, _clock) = engine_at_hour(14);
        let result = engine.compute_price(&input(
            "l2",
            0.001,
            Some(0.005),
            100.0,
            20.0,
            100.0,
            0,
            true,
            100.0,
            None,
        ));
        assert!(result.price <= 0.005);
    }

    #[test]
    fn s3_rate_limit_active() {
        let (engine, _clock) = engine_at_hour(14);
        let mut config = PricingConfig::growth();
        config.max_price_change_percent = 10.0;
        engine.update_config(config);
        let result = engine.compute_price(&input(
            "l3",
            0.01,
            None,
            100.0,
            20.0,
            100.0,
            0,
            true,
            100.0,
            Some(0.01),
        ));
        assert!(result.price <= 0.011 + 1e-6, "price was {}", result.price);
    }

    #[test]
    fn s4_excellence_bonus_is_convex_above_90() {
        let (engine, _clock) = engine_at_hour(14);
        let base = input("l4", 0.01, None, 50.0, 0.0, 75.0, 2, false, 50.0, None);
        let q85 = engine.compute_price(&PricingInput {
            quality: QualityMetrics {
                composite_score: 85.0,
                ..base.quality
            },
            ..base.clone()
        });
        let q95 = engine.compute_price(&PricingInput {
            quality: QualityMetrics {
                composite_score: 95.0,
                ..base.quality
            },
            ..base.clone()
        });
        let q75 = engine.compute_price(&PricingInput {
            quality: QualityMetrics {
                composite_score: 75.0,
                ..base.quality
            },
            ..base.clone()
        });
        let hi_gap = q95.multipliers.quality - q85.multipliers.quality;
        let lo_gap = q85.multipliers.quality - q75.multipliers.quality;
        assert!(hi_gap > lo_gap, "hi_gap={hi_gap} lo_gap={lo_gap}");
    }

    #[test]
    fn combined_multiplier_is_product_of_five() {
        let (engine, _clock) = engine_at_hour(14);
        let result = engine.compute_price(&input(
            "l5", 1.0, None, 73.0, 4.0, 82.0, 3, false, 65.0, Some(1.0),
        ));
        let m = result.multipliers;
        let expected = m.demand * m.scarcity * m.quality * m.momentum * m.temporal;
        assert!((m.combined - expected).abs() < 1e-4);
    }

    #[test]
    fn demand_multiplier_is_monotonic_in_score() {
        assert!(demand_multiplier(30.0, 3.5) < demand_multiplier(70.0, 3.5));
        assert!(demand_multiplier(0.0, 3.5) >= 1.0);
        assert!(demand_multiplier(100.0, 3.5) <= 3.5 + 1e-9);
    }

    #[test]
    fn quality_multiplier_is_monotonic_without_rating_penalty() {
        let low = QualityMetrics {
            uptime_percent: 99.0,
            median_latency_ms: 100.0,
            p99_latency_ms: 500.0,
            error_rate_percent: 1.0,
            average_rating: 4.5,
            rating_count: 5,
            composite_score: 40.0,
        };
        let high = QualityMetrics {
            composite_score: 80.0,
            ..low
        };
        assert!(quality_multiplier(&low, 1.5) < quality_multiplier(&high, 1.5));
    }

    #[test]
    fn deterministic_with_fixed_clock() {
        let (engine, _clock) = engine_at_hour(9);
        let i = input("l6", 0.02, None, 60.0, 3.0, 77.0, 1, false, 80.0, Some(0.021));
        let a = engine.compute_price(&i);
        let b = engine.compute_price(&i);
        assert_eq!(a.price, b.price);
        assert_eq!(a.multipliers.combined, b.multipliers.combined);
    }

    #[test]
    fn s7_transaction_split_precision() {
        let (engine, _clock) = engine_at_hour(14);
        let mut config = PricingConfig::growth();
        config.platform_fee_rate = 0.12;
        engine.update_config(config);
        let split = engine.compute_transaction_split(0.000012);
        assert!((split.buyer_pays - 0.000012).abs() < 1e-9);
        assert!((split.platform_fee - 0.000001).abs() < 1e-9);
        assert!((split.provider_receives - 0.000011).abs() < 1e-9);
        assert!((split.provider_receives + split.platform_fee - 0.000012).abs() < 1e-9);
    }

    #[test]
    fn transaction_split_always_sums_to_price() {
        for cents in [1, 17, 9999, 1_000_000] {
            let price = cents as f64 / 1_000_000.0;
            let (engine, _clock) = engine_at_hour(14);
            let split = engine.compute_transaction_split(price);
            assert!(
                (split.provider_receives + split.platform_fee - price).abs() < 1e-6,
                "mismatch at price {price}"
            );
        }
    }

    #[test]
    fn non_finite_multiplier_inputs_never_produce_nan() {
        let (engine, _clock) = engine_at_hour(14);
        let result = engine.compute_price(&input(
            "l7", 0.0, None, f64::NAN, 0.0, 50.0, 0, true, 0.0, None,
        ));
        assert!(result.price.is_finite());
        assert!(result.price > 0.0);
    }

    #[test]
    fn ceiling_below_floor_floor_still_wins() {
        let (engine, _clock) = engine_at_hour(14);
        let result = engine.compute_price(&input(
            "l8", 1.0, Some(0.5), 50.0, 0.0, 70.0, 2, false, 40.0, None,
        ));
        assert!(result.price >= 1.0);
    }
}
