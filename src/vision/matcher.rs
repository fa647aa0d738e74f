//! Fuzzy text matching over OCR spans.
//!
//! Match classes form a fixed precedence — exact > prefix > substring >
//! reverse-prefix — with OCR confidence as an additive tiebreaker inside a
//! class. The base offsets are far enough apart that no confidence value
//! can promote a weaker class over a stronger one.

use crate::config::ResolverConfig;
use crate::types::{DetectedElement, DetectedKind, DetectionMethod};

use super::ocr::OcrSpan;

/// A span that survived filtering, with its score.
#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub span: OcrSpan,
    pub score: f32,
    pub method: DetectionMethod,
}

/// Score one span against the target. `None` when no match class applies.
pub fn score_span(span: &OcrSpan, target: &str, cfg: &ResolverConfig) -> Option<ScoredMatch> {
    let text = span.text.trim().to_lowercase();
    let target = target.trim().to_lowercase();
    if text.is_empty() || target.is_empty() {
        return None;
    }

    let confidence_bonus = span.confidence * cfg.confidence_weight;

    let (base, method) = if text == target {
        (cfg.score_exact, DetectionMethod::Ocr)
    } else if text.starts_with(&target) {
        (cfg.score_prefix, DetectionMethod::Fuzzy)
    } else if text.contains(&target) {
        // Longer surrounding text is a weaker signal.
        let penalty = (text.len() - target.len()) as f32;
        (cfg.score_substring - penalty, DetectionMethod::Fuzzy)
    } else if target.starts_with(&text) && text.len() >= cfg.reverse_prefix_min_len {
        (cfg.score_reverse_prefix, DetectionMethod::Fuzzy)
    } else {
        return None;
    };

    Some(ScoredMatch {
        span: span.clone(),
        score: base + confidence_bonus,
        method,
    })
}

/// Partition candidates by the caller's spatial hint before scoring.
///
/// Vertical and horizontal keywords use screen-thirds cutoffs;
/// "first"/"last" keep the 3 extremes in (y, x) reading order. This is how
/// duplicate labels on screen get disambiguated.
pub fn spatial_filter(
    spans: Vec<OcrSpan>,
    hint: &str,
    image_w: u32,
    image_h: u32,
) -> Vec<OcrSpan> {
    let hint = hint.to_lowercase();
    let w = image_w as f32;
    let h = image_h as f32;
    let mut spans = spans;

    if hint.contains("top") || hint.contains("above") {
        spans.retain(|s| (s.center().1 as f32) < h * 0.4);
    } else if hint.contains("bottom") || hint.contains("below") {
        spans.retain(|s| (s.center().1 as f32) > h * 0.6);
    } else if hint.contains("middle") || hint.contains("center") {
        spans.retain(|s| {
            let y = s.center().1 as f32;
            y > h * 0.3 && y < h * 0.7
        });
    }

    if hint.contains("left") {
        spans.retain(|s| (s.center().0 as f32) < w * 0.4);
    } else if hint.contains("right") {
        spans.retain(|s| (s.center().0 as f32) > w * 0.6);
    }

    if hint.contains("first") {
        spans.sort_by_key(|s| (s.center().1, s.center().0));
        spans.truncate(3);
    } else if hint.contains("last") {
        spans.sort_by_key(|s| (s.center().1, s.center().0));
        let keep = spans.len().saturating_sub(3);
        spans.drain(..keep);
    }

    spans
}

/// Best-scoring candidate for `target` among OCR spans, spatially filtered
/// when a hint is present. At most one result: the caller's only action is
/// to click the best guess.
pub fn best_text_match(
    spans: Vec<OcrSpan>,
    target: &str,
    hint: Option<&str>,
    image_w: u32,
    image_h: u32,
    cfg: &ResolverConfig,
) -> Option<ScoredMatch> {
    let candidates = match hint {
        Some(hint) if !hint.trim().is_empty() => spatial_filter(spans, hint, image_w, image_h),
        _ => spans,
    };

    candidates
        .iter()
        .filter_map(|span| score_span(span, target, cfg))
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Turn a winning span into a detection. Bounds are still in OCR-image
/// space; the caller applies scale/crop correction.
pub fn to_detection(matched: ScoredMatch) -> DetectedElement {
    DetectedElement {
        kind: DetectedKind::Text,
        label: Some(matched.span.text.clone()),
        bounds: matched.span.bounds,
        center: matched.span.center(),
        confidence: matched.span.confidence,
        method: matched.method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;

    fn span(text: &str, x: i32, y: i32, confidence: f32) -> OcrSpan {
        OcrSpan {
            text: text.into(),
            bounds: Rect::new(x, y, 60, 20),
            confidence,
        }
    }

    fn cfg() -> ResolverConfig {
        ResolverConfig::default()
    }

    #[test]
    fn exact_outranks_prefix_regardless_of_confidence() {
        let exact = score_span(&span("Submit", 0, 0, 0.9), "Submit", &cfg()).unwrap();
        let prefix = score_span(&span("Submit Now", 0, 0, 0.95), "Submit", &cfg()).unwrap();
        assert!(exact.score > prefix.score);
        assert_eq!(exact.method, DetectionMethod::Ocr);
        assert_eq!(prefix.method, DetectionMethod::Fuzzy);
    }

    #[test]
    fn substring_penalized_by_surrounding_length() {
        let short = score_span(&span("Save File", 0, 0, 0.8), "File", &cfg()).unwrap();
        let long = score_span(&span("Save File As Template", 0, 0, 0.8), "File", &cfg()).unwrap();
        assert!(short.score > long.score);
    }

    #[test]
    fn reverse_prefix_needs_three_chars() {
        // OCR read a truncated label; target starts with it.
        assert!(score_span(&span("Down", 0, 0, 0.9), "Downloads", &cfg()).is_some());
        assert!(score_span(&span("Do", 0, 0, 0.9), "Downloads", &cfg()).is_none());
    }

    #[test]
    fn ties_prefer_higher_confidence() {
        let best = best_text_match(
            vec![span("OK", 10, 10, 0.7), span("OK", 200, 10, 0.95)],
            "OK",
            None,
            800,
            600,
            &cfg(),
        )
        .unwrap();
        assert_eq!(best.span.bounds.x, 200);
    }

    #[test]
    fn bottom_hint_excludes_upper_duplicate() {
        // "Delete" appears twice; hint="bottom" keeps only the candidate in
        // the lower 40% of the screen, even though the upper one reads with
        // higher confidence.
        let upper = span("Delete", 100, 100, 0.99);
        let lower = span("Delete", 100, 500, 0.70);

        let best = best_text_match(
            vec![upper, lower],
            "Delete",
            Some("bottom"),
            800,
            600,
            &cfg(),
        )
        .unwrap();
        assert_eq!(best.span.bounds.y, 500);
    }

    #[test]
    fn first_hint_keeps_reading_order_extremes() {
        let spans = vec![
            span("Item", 10, 500, 0.9),
            span("Item", 10, 10, 0.9),
            span("Item", 10, 250, 0.9),
            span("Item", 10, 300, 0.9),
        ];
        let kept = spatial_filter(spans, "first", 800, 600);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|s| s.bounds.y <= 300));
    }

    #[test]
    fn no_match_class_yields_none() {
        assert!(score_span(&span("Cancel", 0, 0, 0.9), "Submit", &cfg()).is_none());
        assert!(best_text_match(vec![], "Submit", None, 800, 600, &cfg()).is_none());
    }
}
