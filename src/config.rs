use std::env;
use std::time::Duration;

/// Tunables for the resolution engine.
///
/// The OCR scoring offsets were tuned empirically in the field and may need
/// recalibration per font/DPI, so they are configuration rather than
/// constants. Everything is an explicitly constructed value passed into the
/// resolver; nothing here is process-global.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Score base for an exact OCR text match.
    pub score_exact: f32,
    /// Score base for a prefix match (detected text starts with target).
    pub score_prefix: f32,
    /// Score base for a substring match, before the length penalty.
    pub score_substring: f32,
    /// Score base for a reverse-prefix match (target starts with detected
    /// text of at least `reverse_prefix_min_len` chars).
    pub score_reverse_prefix: f32,
    /// Additive weight applied to OCR confidence so ties prefer
    /// higher-confidence reads.
    pub confidence_weight: f32,
    /// Minimum detected-text length for a reverse-prefix match to count.
    pub reverse_prefix_min_len: usize,

    /// Minimum OCR confidence for the direct text-match stage.
    pub min_ocr_confidence: f32,
    /// Minimum pixel area for a color-matched region.
    pub min_color_region_area: u32,

    /// Recursion bound for accessibility tree traversal. Guarantees
    /// termination on cyclic or pathological native trees.
    pub max_traversal_depth: u32,
    /// How many ancestors to walk when a leaf exposes no press action.
    pub ancestor_climb_limit: u32,

    /// Quiet period after an interaction during which cached app handles
    /// and element lists are not trusted.
    pub cache_quiet_period: Duration,
    /// Registry entries older than this are stale regardless of epoch.
    pub element_ttl: Duration,

    /// Per-call bound on OCR inference.
    pub ocr_timeout: Duration,
    /// Per-call bound on screenshot capture.
    pub capture_timeout: Duration,
}

impl ResolverConfig {
    /// Read overrides from `UI_RESOLVER_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse("UI_RESOLVER_MAX_DEPTH") {
            cfg.max_traversal_depth = v;
        }
        if let Some(v) = env_parse("UI_RESOLVER_MIN_OCR_CONFIDENCE") {
            cfg.min_ocr_confidence = v;
        }
        if let Some(secs) = env_parse::<u64>("UI_RESOLVER_ELEMENT_TTL_SECS") {
            cfg.element_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("UI_RESOLVER_QUIET_PERIOD_MS") {
            cfg.cache_quiet_period = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("UI_RESOLVER_OCR_TIMEOUT_MS") {
            cfg.ocr_timeout = Duration::from_millis(ms);
        }

        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            score_exact: 1000.0,
            score_prefix: 700.0,
            score_substring: 400.0,
            score_reverse_prefix: 300.0,
            confidence_weight: 100.0,
            reverse_prefix_min_len: 3,
            min_ocr_confidence: 0.6,
            min_color_region_area: 100,
            max_traversal_depth: 25,
            ancestor_climb_limit: 5,
            cache_quiet_period: Duration::from_secs(2),
            element_ttl: Duration::from_secs(30),
            ocr_timeout: Duration::from_secs(10),
            capture_timeout: Duration::from_secs(5),
        }
    }
}
