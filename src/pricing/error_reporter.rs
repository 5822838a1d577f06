//! Bounded error-reporter channel.
//!
//! Non-critical failures observed during a price-update cycle (a quality
//! rollup read, a history push, a supply read) are reported here instead of
//! logged inline on the updater's async path. Mirrors
//! `backtest_v2::book_recorder::AsyncBookRecorder`'s buffered background
//! writer: a bounded `mpsc` channel, a spawned consumer task draining it, and
//! a non-blocking `try_send` at the call site that silently drops a report
//! under overload rather than ever blocking the cycle on logging.

use tokio::sync::mpsc;
use tracing::{error, warn};

/// Severity of a reported failure; drives which `tracing` level the consumer
/// task logs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
}

/// One non-critical failure observed while updating a listing.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub listing_id: String,
    pub stage: &'static str,
    pub message: String,
    pub severity: Severity,
}

impl ErrorReport {
    pub fn warn(listing_id: impl Into<String>, stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            stage,
            message: message.into(),
            severity: Severity::Warn,
        }
    }

    pub fn error(listing_id: impl Into<String>, stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            stage,
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

/// Sender half plus the spawned consumer task. Cloning a `Arc<ErrorReporter>`
/// is how the updater shares one reporter across its fan-out.
pub struct ErrorReporter {
    tx: mpsc::Sender<ErrorReport>,
}

impl ErrorReporter {
    /// Spawns the consumer task and returns the reporter. The task exits once
    /// every sender clone (and this `ErrorReporter`) is dropped.
    pub fn spawn(buffer_size: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(buffer_size);

        tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                match report.severity {
                    Severity::Warn => warn!(
                        listing_id = %report.listing_id,
                        stage = report.stage,
                        "{}", report.message
                    ),
                    Severity::Error => error!(
                        listing_id = %report.listing_id,
                        stage = report.stage,
                        "{}", report.message
                    ),
                }
            }
        });

        Self { tx }
    }

    /// Non-blocking. A full channel means the updater is overloaded; dropping
    /// the report here is acceptable per the design note this module
    /// implements — the cycle itself must never stall on logging.
    pub fn report(&self, report: ErrorReport) {
        let _ = self.tx.try_send(report);
    }
}
