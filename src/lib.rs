//! Multi-tier desktop UI element resolution.
//!
//! Locates and interacts with elements of third-party desktop
//! applications by human-readable label instead of hardcoded coordinates,
//! across Windows, macOS and Linux.
//!
//! ## Architecture
//!
//! - [`Resolver`] - orchestrator: tier composition, fallback policy,
//!   click dispatch
//! - [`platform::AccessibilityBackend`] - one implementation per OS
//!   (UI Automation / AX API / AT-SPI2) behind a common trait
//! - [`registry`] - stable element ids with epoch-based staleness
//! - [`vision`] - OCR + fuzzy text + color matching fallback when
//!   accessibility data is absent or incomplete
//! - [`screenshot`] - capture and HiDPI coordinate normalization
//!
//! ## Example
//!
//! ```rust,ignore
//! use ui_resolver::{ClickType, Resolver, ResolverConfig};
//!
//! let resolver = Resolver::with_platform_defaults(ResolverConfig::default())?;
//!
//! // Enumerate controls for a planner prompt
//! let listing = resolver.describe_elements("Calculator").await?;
//!
//! // Click by label, with a spatial hint for duplicate labels
//! let result = resolver
//!     .resolve_and_click("Calculator", "7", None, ClickType::Single)
//!     .await?;
//! println!("clicked via {:?}", result.method);
//! ```
//!
//! All state is in-memory and scoped to process lifetime; nothing is
//! persisted.

pub mod config;
pub mod error;
pub mod input;
pub mod platform;
pub mod registry;
pub mod resolver;
pub mod screenshot;
pub mod serializer;
pub mod types;
pub mod vision;

pub use config::ResolverConfig;
pub use error::{ResolveError, Result};
pub use input::{EnigoDriver, InputDriver};
pub use platform::{create_backend, AccessibilityBackend, ClickOutcome};
pub use registry::{AppCache, ElementRegistry, InvalidationReason, Lookup};
pub use resolver::Resolver;
pub use screenshot::{ScreenCapture, ScreenSource};
pub use types::{
    Category, ClickResult, ClickType, DetectedElement, DetectedKind, DetectionMethod,
    ElementRecord, Rect, ResolveMethod, Role, Tier,
};
pub use vision::{NativeOcr, OcrEngine, OcrSpan, VisionTier};
