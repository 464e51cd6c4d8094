//! Structural quality score.
//!
//! Presence-only and deterministic: each structural element contributes a
//! fixed weight when present. The weights sum to 1.0.

use super::document::DocumentContent;

/// Minimum characters for the full text to count as present.
pub const FULL_TEXT_MIN_CHARS: usize = 200;

pub const WEIGHT_FULL_TEXT: f64 = 0.30;
pub const WEIGHT_SECTIONS: f64 = 0.25;
pub const WEIGHT_REFERENCES: f64 = 0.20;
pub const WEIGHT_TABLES: f64 = 0.15;
pub const WEIGHT_FIGURES: f64 = 0.10;

/// Score in `0.0..=1.0`, rounded to three decimals.
#[must_use]
pub fn quality_score(content: &DocumentContent) -> f64 {
    let signals = [
        (content.full_text.trim().chars().count() >= FULL_TEXT_MIN_CHARS, WEIGHT_FULL_TEXT),
        (!content.sections.is_empty(), WEIGHT_SECTIONS),
        (!content.references.is_empty(), WEIGHT_REFERENCES),
        (!content.tables.is_empty(), WEIGHT_TABLES),
        (!content.figures.is_empty(), WEIGHT_FIGURES),
    ];
    let raw: f64 = signals
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, weight)| weight)
        .sum();
    (raw * 1000.0).round() / 1000.0
}
