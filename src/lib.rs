//! NexusX dynamic auction pricing core.
//!
//! Exposes the pricing module for use by the `nexusx-pricing` binary and by
//! integration tests. The four cooperating phases — Demand Tracker, Quality
//! Scorer, Pricing Engine, Price Updater — live under `pricing`; nothing
//! else is part of this crate's public surface.

pub mod pricing;
