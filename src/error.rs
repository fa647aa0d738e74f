use thiserror::Error;

use crate::types::Tier;

/// Errors surfaced to callers of the resolution engine.
///
/// Tier-level misses (accessibility found nothing, OCR found nothing) are
/// recovered internally by falling through to the next tier; only tier
/// exhaustion or hard precondition failures appear here.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Application not found: {0}")]
    AppNotFound(String),

    #[error("Element not found: {label} (tiers attempted: {tiers:?}, best confidence: {best_confidence:.2})")]
    ElementNotFound {
        label: String,
        tiers: Vec<Tier>,
        best_confidence: f32,
    },

    /// The registry epoch advanced since this id was issued. Never
    /// auto-retried: the caller must re-traverse and re-resolve by label.
    #[error("Stale element reference: {0}")]
    StaleReference(String),

    #[error("Accessibility unavailable: {0}")]
    AccessibilityUnavailable(String),

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ResolveError>;
