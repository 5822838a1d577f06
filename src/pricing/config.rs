//! Pricing configuration: presets, merge semantics, and env loading.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tunable knobs shared by the Demand Tracker and Pricing Engine. One config
/// struct per phase, per the external-interfaces contract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub update_interval_ms: u64,
    pub demand_window_ms: u64,
    pub max_demand_multiplier: f64,
    pub max_scarcity_multiplier: f64,
    pub max_quality_multiplier: f64,
    pub max_momentum_multiplier: f64,
    pub smoothing_factor: f64,
    pub max_price_change_percent: f64,
    pub platform_fee_rate: f64,
}

impl PricingConfig {
    /// `launch`: conservative, slow-moving, for brand-new providers.
    pub fn launch() -> Self {
        Self {
            update_interval_ms: 30_000,
            demand_window_ms: 10 * 60_000,
            max_demand_multiplier: 2.0,
            max_scarcity_multiplier: 1.5,
            max_quality_multiplier: 1.3,
            max_momentum_multiplier: 1.2,
            smoothing_factor: 0.2,
            max_price_change_percent: 8.0,
            platform_fee_rate: 0.12,
        }
    }

    /// `growth`: the default profile for established marketplace listings.
    pub fn growth() -> Self {
        Self {
            update_interval_ms: 10_000,
            demand_window_ms: 5 * 60_000,
            max_demand_multiplier: 3.5,
            max_scarcity_multiplier: 2.0,
            max_quality_multiplier: 1.5,
            max_momentum_multiplier: 1.3,
            smoothing_factor: 0.3,
            max_price_change_percent: 15.0,
            platform_fee_rate: 0.12,
        }
    }

    /// `scale`: wider swings tolerated, for high-volume listings that can
    /// absorb faster repricing.
    pub fn scale() -> Self {
        Self {
            update_interval_ms: 5_000,
            demand_window_ms: 2 * 60_000,
            max_demand_multiplier: 5.0,
            max_scarcity_multiplier: 2.5,
            max_quality_multiplier: 1.7,
            max_momentum_multiplier: 1.5,
            smoothing_factor: 0.4,
            max_price_change_percent: 25.0,
            platform_fee_rate: 0.10,
        }
    }

    /// Merge `overrides` onto `self`, keeping a field's current value unless
    /// the override specifies one. Used to customize a preset without
    /// hand-writing every field.
    pub fn merge(self, overrides: PricingConfigOverrides) -> Self {
        Self {
            update_interval_ms: overrides.update_interval_ms.unwrap_or(self.update_interval_ms),
            demand_window_ms: overrides.demand_window_ms.unwrap_or(self.demand_window_ms),
            max_demand_multiplier: overrides
                .max_demand_multiplier
                .unwrap_or(self.max_demand_multiplier),
            max_scarcity_multiplier: overrides
                .max_scarcity_multiplier
                .unwrap_or(self.max_scarcity_multiplier),
            max_quality_multiplier: overrides
                .max_quality_multiplier
                .unwrap_or(self.max_quality_multiplier),
            max_momentum_multiplier: overrides
                .max_momentum_multiplier
                .unwrap_or(self.max_momentum_multiplier),
            smoothing_factor: overrides.smoothing_factor.unwrap_or(self.smoothing_factor),
            max_price_change_percent: overrides
                .max_price_change_percent
                .unwrap_or(self.max_price_change_percent),
            platform_fee_rate: overrides.platform_fee_rate.unwrap_or(self.platform_fee_rate),
        }
    }

    /// Reject configurations that can never produce a sane price, before they
    /// ever reach the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smoothing_factor < 0.0 || self.smoothing_factor > 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "smoothing_factor",
                value: self.smoothing_factor,
            });
        }
        if self.max_price_change_percent < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "max_price_change_percent",
                value: self.max_price_change_percent,
            });
        }
        if self.platform_fee_rate < 0.0 || self.platform_fee_rate > 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "platform_fee_rate",
                value: self.platform_fee_rate,
            });
        }
        if self.max_momentum_multiplier < 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "max_momentum_multiplier",
                value: self.max_momentum_multiplier,
            });
        }
        Ok(())
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self::growth()
    }
}

/// Sparse override set applied on top of a preset via `PricingConfig::merge`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PricingConfigOverrides {
    pub update_interval_ms: Option<u64>,
    pub demand_window_ms: Option<u64>,
    pub max_demand_multiplier: Option<f64>,
    pub max_scarcity_multiplier: Option<f64>,
    pub max_quality_multiplier: Option<f64>,
    pub max_momentum_multiplier: Option<f64>,
    pub smoothing_factor: Option<f64>,
    pub max_price_change_percent: Option<f64>,
    pub platform_fee_rate: Option<f64>,
}

/// Named preset profile, selectable at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingPreset {
    Launch,
    Growth,
    Scale,
}

impl PricingPreset {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "launch" => Ok(Self::Launch),
            "growth" => Ok(Self::Growth),
            "scale" => Ok(Self::Scale),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }

    pub fn config(self) -> PricingConfig {
        match self {
            Self::Launch => PricingConfig::launch(),
            Self::Growth => PricingConfig::growth(),
            Self::Scale => PricingConfig::scale(),
        }
    }
}

/// Top-level environment-driven configuration for the pricing service: which
/// preset to run, and how often to tick. Store/broker connection strings are
/// intentionally absent — those collaborators are wired by the host, not
/// parsed here (see `SPEC_FULL.md` §6).
#[derive(Debug, Clone)]
pub struct PricingServiceConfig {
    pub preset: PricingPreset,
    pub pricing: PricingConfig,
    pub max_concurrent_listings: usize,
}

impl PricingServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let preset_name =
            std::env::var("PRICING_PRESET").unwrap_or_else(|_| "growth".to_string());
        let preset = PricingPreset::parse(&preset_name)?;

        let max_concurrent_listings = std::env::var("PRICING_MAX_CONCURRENT_LISTINGS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(32);

        let pricing = preset.config();
        pricing.validate()?;

        Ok(Self {
            preset,
            pricing,
            max_concurrent_listings,
        })
    }
}

/// Configuration errors are fatal at startup: the process refuses to start
/// rather than run with a guessed-at default.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    UnknownPreset(String),
    OutOfRange { field: &'static str, value: f64 },
    CeilingBelowFloor { listing_id: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPreset(name) => write!(f, "unknown pricing preset '{name}'"),
            Self::OutOfRange { field, value } => {
                write!(f, "config field '{field}' out of range: {value}")
            }
            Self::CeilingBelowFloor { listing_id } => {
                write!(f, "listing '{listing_id}' has ceiling price below floor price")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Validates a listing's floor/ceiling at configuration/listing-update time,
/// before it ever reaches the engine. The engine's own floor-wins behavior
/// (`engine::compute_price` step 6) is a second line of defense regardless —
/// this catches the provider misconfiguration earlier, at the edge where a
/// host would persist a listing update (see `SPEC_FULL.md` §9).
pub fn validate_ceiling_above_floor(
    listing_id: &str,
    floor_price: f64,
    ceiling_price: Option<f64>,
) -> Result<(), ConfigError> {
    if let Some(ceiling) = ceiling_price {
        if ceiling < floor_price {
            return Err(ConfigError::CeilingBelowFloor {
                listing_id: listing_id.to_string(),
            });
        }
    }
    Ok(())
}
