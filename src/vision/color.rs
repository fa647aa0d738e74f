//! Color-region matching for targets described by appearance ("red icon")
//! rather than text. Works in HSV space with OpenCV-style ranges
//! (H 0-180, S/V 0-255); red wraps the hue circle and gets two ranges.

use image::RgbaImage;

use crate::types::{DetectedElement, DetectedKind, DetectionMethod, Rect};

/// Inclusive HSV range.
#[derive(Debug, Clone, Copy)]
pub struct HsvRange {
    pub lo: (u16, u8, u8),
    pub hi: (u16, u8, u8),
}

impl HsvRange {
    const fn new(lo: (u16, u8, u8), hi: (u16, u8, u8)) -> Self {
        Self { lo, hi }
    }

    fn contains(&self, h: u16, s: u8, v: u8) -> bool {
        h >= self.lo.0
            && h <= self.hi.0
            && s >= self.lo.1
            && s <= self.hi.1
            && v >= self.lo.2
            && v <= self.hi.2
    }
}

/// Map a color word inside a hint to HSV ranges. Empty when the hint names
/// no known color.
pub fn parse_color_hint(hint: &str) -> Vec<HsvRange> {
    let hint = hint.to_lowercase();

    const TABLE: &[(&str, &[HsvRange])] = &[
        (
            "red",
            &[
                HsvRange::new((0, 100, 100), (10, 255, 255)),
                HsvRange::new((170, 100, 100), (180, 255, 255)),
            ],
        ),
        ("blue", &[HsvRange::new((100, 100, 100), (130, 255, 255))]),
        ("green", &[HsvRange::new((40, 100, 100), (80, 255, 255))]),
        ("yellow", &[HsvRange::new((20, 100, 100), (40, 255, 255))]),
        ("orange", &[HsvRange::new((10, 100, 100), (20, 255, 255))]),
        ("purple", &[HsvRange::new((130, 100, 100), (170, 255, 255))]),
    ];

    for (name, ranges) in TABLE {
        if hint.contains(name) {
            return ranges.to_vec();
        }
    }
    Vec::new()
}

/// RGB → HSV on the OpenCV scale (H in 0-180, S and V in 0-255).
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u16, u8, u8) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max == 0.0 { 0.0 } else { delta / max };

    ((h / 2.0) as u16, (s * 255.0) as u8, (max * 255.0) as u8)
}

// Sampling stride for the match mask; bounds are scaled back afterwards.
const STRIDE: u32 = 2;

/// Largest connected region of pixels falling inside any of the ranges.
/// `min_area` is in full-resolution pixels. Confidence is the matched-pixel
/// density of the region's bounding box.
pub fn find_color_region(
    image: &RgbaImage,
    ranges: &[HsvRange],
    min_area: u32,
) -> Option<DetectedElement> {
    if ranges.is_empty() || image.width() < STRIDE || image.height() < STRIDE {
        return None;
    }

    let gw = image.width() / STRIDE;
    let gh = image.height() / STRIDE;
    let mut mask = vec![false; (gw * gh) as usize];

    for gy in 0..gh {
        for gx in 0..gw {
            let p = image.get_pixel(gx * STRIDE, gy * STRIDE);
            let (h, s, v) = rgb_to_hsv(p[0], p[1], p[2]);
            if ranges.iter().any(|r| r.contains(h, s, v)) {
                mask[(gy * gw + gx) as usize] = true;
            }
        }
    }

    let mut visited = vec![false; mask.len()];
    let mut best: Option<(u32, Rect)> = None;
    let min_cells = (min_area / (STRIDE * STRIDE)).max(1);

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }

        // Flood fill one component, tracking its cell count and bbox.
        let mut stack = vec![start as u32];
        visited[start] = true;
        let mut cells = 0u32;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);

        while let Some(idx) = stack.pop() {
            let (gx, gy) = (idx % gw, idx / gw);
            cells += 1;
            min_x = min_x.min(gx);
            min_y = min_y.min(gy);
            max_x = max_x.max(gx);
            max_y = max_y.max(gy);

            let mut push = |nx: u32, ny: u32| {
                let nidx = (ny * gw + nx) as usize;
                if mask[nidx] && !visited[nidx] {
                    visited[nidx] = true;
                    stack.push(nidx as u32);
                }
            };
            if gx > 0 {
                push(gx - 1, gy);
            }
            if gx + 1 < gw {
                push(gx + 1, gy);
            }
            if gy > 0 {
                push(gx, gy - 1);
            }
            if gy + 1 < gh {
                push(gx, gy + 1);
            }
        }

        if cells < min_cells {
            continue;
        }
        let bounds = Rect::new(
            (min_x * STRIDE) as i32,
            (min_y * STRIDE) as i32,
            ((max_x - min_x + 1) * STRIDE) as i32,
            ((max_y - min_y + 1) * STRIDE) as i32,
        );
        if best.as_ref().map(|(c, _)| cells > *c).unwrap_or(true) {
            best = Some((cells, bounds));
        }
    }

    best.map(|(cells, bounds)| {
        let bbox_cells = ((bounds.w / STRIDE as i32) * (bounds.h / STRIDE as i32)).max(1) as f32;
        DetectedElement {
            kind: DetectedKind::Visual,
            label: None,
            bounds,
            center: bounds.center(),
            confidence: (cells as f32 / bbox_cells).min(1.0),
            method: DetectionMethod::Template,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsv_conversion_primaries() {
        assert_eq!(rgb_to_hsv(255, 0, 0), (0, 255, 255));
        let (h, s, v) = rgb_to_hsv(0, 255, 0);
        assert_eq!((h, s, v), (60, 255, 255));
        let (h, _, _) = rgb_to_hsv(0, 0, 255);
        assert_eq!(h, 120);
        // Gray has no saturation.
        let (_, s, _) = rgb_to_hsv(128, 128, 128);
        assert_eq!(s, 0);
    }

    #[test]
    fn color_hint_lookup() {
        assert_eq!(parse_color_hint("the red icon").len(), 2);
        assert_eq!(parse_color_hint("blue button").len(), 1);
        assert!(parse_color_hint("big shiny thing").is_empty());
    }

    #[test]
    fn finds_solid_region() {
        // 200x100 gray canvas with a 40x30 red block at (60, 20).
        let mut img = RgbaImage::from_pixel(200, 100, image::Rgba([200, 200, 200, 255]));
        for y in 20..50 {
            for x in 60..100 {
                img.put_pixel(x, y, image::Rgba([230, 20, 20, 255]));
            }
        }

        let found = find_color_region(&img, &parse_color_hint("red"), 100).unwrap();
        assert_eq!(found.method, DetectionMethod::Template);
        let (cx, cy) = found.center;
        assert!((58..=102).contains(&cx), "cx = {cx}");
        assert!((18..=52).contains(&cy), "cy = {cy}");
        assert!(found.confidence > 0.8);
    }

    #[test]
    fn small_regions_ignored() {
        let mut img = RgbaImage::from_pixel(100, 100, image::Rgba([255, 255, 255, 255]));
        // 4x4 red speck: below the 100-pixel area floor.
        for y in 10..14 {
            for x in 10..14 {
                img.put_pixel(x, y, image::Rgba([230, 20, 20, 255]));
            }
        }
        assert!(find_color_region(&img, &parse_color_hint("red"), 100).is_none());
    }
}
