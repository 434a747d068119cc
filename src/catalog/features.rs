//! C1 — Feature Extractor.
//!
//! Deterministic, total, idempotent map from a product record to a fixed
//! length binary feature vector. Slots are one-hot over a closed
//! vocabulary, laid out as in spec §4.1:
//!
//! category (0-4) | color (5-12) | occasion (13-16) | season (17-20) | style (21-25)

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::models::FEATURE_DIMENSIONS as D;

pub const CATEGORY_SLOT: (usize, usize) = (0, 5);
pub const COLOR_SLOT: (usize, usize) = (5, 13);
pub const OCCASION_SLOT: (usize, usize) = (13, 17);
pub const SEASON_SLOT: (usize, usize) = (17, 21);
pub const STYLE_SLOT: (usize, usize) = (21, 26);

const CATEGORIES: [&str; 5] = ["tops", "bottoms", "dresses", "outerwear", "shoes"];
const COLORS: [&str; 8] = [
    "black", "white", "grey", "blue", "red", "green", "brown", "pink",
];
const OCCASIONS: [&str; 4] = ["casual", "formal", "business", "athletic"];
const SEASONS: [&str; 4] = ["spring", "summer", "fall", "winter"];
const STYLES: [&str; 5] = ["classic", "trendy", "minimalist", "bohemian", "sporty"];

const DEFAULT_CATEGORY: &str = "tops";
const DEFAULT_OCCASION: &str = "casual";
const DEFAULT_STYLE: &str = "classic";

lazy_static! {
    /// Synonym folding applied before vocabulary lookup, e.g. "gray" -> "grey".
    static ref SYNONYMS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("gray", "grey");
        m.insert("navy", "blue");
        m.insert("fall/autumn", "fall");
        m.insert("autumn", "fall");
        m.insert("sneakers", "shoes");
        m.insert("footwear", "shoes");
        m.insert("jacket", "outerwear");
        m.insert("coat", "outerwear");
        m.insert("dress", "dresses");
        m.insert("top", "tops");
        m.insert("bottom", "bottoms");
        m.insert("pants", "bottoms");
        m.insert("office", "business");
        m.insert("sport", "athletic");
        m.insert("sports", "athletic");
        m.insert("minimal", "minimalist");
        m.insert("boho", "bohemian");
        m
    };
}

fn normalize<'a>(raw: &'a str, scratch: &'a mut String) -> &'a str {
    *scratch = raw.trim().to_lowercase();
    if let Some(folded) = SYNONYMS.get(scratch.as_str()) {
        folded
    } else {
        scratch.as_str()
    }
}

fn one_hot(slot: &mut [u8], vocab: &[&str], value: &str) {
    if let Some(idx) = vocab.iter().position(|v| *v == value) {
        slot[idx] = 1;
    }
}

/// Raw, denormalized attributes as read from the catalog source. Mirrors
/// the subset of `Product` fields C1 actually consumes.
pub struct FeatureInput<'a> {
    pub category_main: &'a str,
    pub primary_color: &'a str,
    pub occasion: Option<&'a str>,
    pub season: Option<&'a str>,
    pub style: Option<&'a str>,
}

/// Compute the `D`-length binary feature vector for a product. Total and
/// deterministic: always returns a full vector, falling back to the slot
/// default when a field is missing or not in the closed vocabulary.
pub fn extract_features(input: &FeatureInput) -> Vec<u8> {
    let mut v = vec![0u8; D];
    let mut scratch = String::new();

    let category = normalize(input.category_main, &mut scratch).to_string();
    let category = if CATEGORIES.contains(&category.as_str()) {
        category
    } else {
        DEFAULT_CATEGORY.to_string()
    };
    one_hot(&mut v[CATEGORY_SLOT.0..CATEGORY_SLOT.1], &CATEGORIES, &category);

    let color = normalize(input.primary_color, &mut scratch).to_string();
    // Color has no default: an unknown/missing color leaves the slot all-zero.
    one_hot(&mut v[COLOR_SLOT.0..COLOR_SLOT.1], &COLORS, &color);

    let occasion = input
        .occasion
        .map(|o| normalize(o, &mut scratch).to_string())
        .filter(|o| OCCASIONS.contains(&o.as_str()))
        .unwrap_or_else(|| DEFAULT_OCCASION.to_string());
    one_hot(&mut v[OCCASION_SLOT.0..OCCASION_SLOT.1], &OCCASIONS, &occasion);

    if let Some(season) = input.season {
        let season = normalize(season, &mut scratch).to_string();
        one_hot(&mut v[SEASON_SLOT.0..SEASON_SLOT.1], &SEASONS, &season);
    }
    // No season given: slot stays all-zero, per spec §4.1.

    let style = input
        .style
        .map(|s| normalize(s, &mut scratch).to_string())
        .filter(|s| STYLES.contains(&s.as_str()))
        .unwrap_or_else(|| DEFAULT_STYLE.to_string());
    one_hot(&mut v[STYLE_SLOT.0..STYLE_SLOT.1], &STYLES, &style);

    // Invariant: at least one entry is 1 (category and occasion and style
    // always default-fill), so the "at least one entry equals 1" invariant
    // in spec §3 always holds even for a fully-unknown product.
    v
}

/// Map a category/color/brand slot index back to a human slot name, used
/// by C2's insight reporting (top-k theta components by facet).
pub fn category_name(index: usize) -> Option<&'static str> {
    CATEGORIES.get(index).copied()
}

pub fn color_name(index: usize) -> Option<&'static str> {
    COLORS.get(index).copied()
}

pub fn occasion_name(index: usize) -> Option<&'static str> {
    OCCASIONS.get(index).copied()
}

pub fn season_name(index: usize) -> Option<&'static str> {
    SEASONS.get(index).copied()
}

pub fn style_name(index: usize) -> Option<&'static str> {
    STYLES.get(index).copied()
}

/// Given a global feature-vector index (0..D), return `(slot_name, label)`.
pub fn slot_label(global_index: usize) -> Option<(&'static str, &'static str)> {
    if (CATEGORY_SLOT.0..CATEGORY_SLOT.1).contains(&global_index) {
        category_name(global_index - CATEGORY_SLOT.0).map(|n| ("category", n))
    } else if (COLOR_SLOT.0..COLOR_SLOT.1).contains(&global_index) {
        color_name(global_index - COLOR_SLOT.0).map(|n| ("color", n))
    } else if (OCCASION_SLOT.0..OCCASION_SLOT.1).contains(&global_index) {
        occasion_name(global_index - OCCASION_SLOT.0).map(|n| ("occasion", n))
    } else if (SEASON_SLOT.0..SEASON_SLOT.1).contains(&global_index) {
        season_name(global_index - SEASON_SLOT.0).map(|n| ("season", n))
    } else if (STYLE_SLOT.0..STYLE_SLOT.1).contains(&global_index) {
        style_name(global_index - STYLE_SLOT.0).map(|n| ("style", n))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(
        category: &'a str,
        color: &'a str,
        occasion: Option<&'a str>,
        season: Option<&'a str>,
        style: Option<&'a str>,
    ) -> FeatureInput<'a> {
        FeatureInput {
            category_main: category,
            primary_color: color,
            occasion,
            season,
            style,
        }
    }

    #[test]
    fn vector_has_fixed_length_and_binary_entries() {
        let v = extract_features(&input("Tops", "Black", Some("Casual"), Some("Summer"), Some("Trendy")));
        assert_eq!(v.len(), D);
        assert!(v.iter().all(|&b| b == 0 || b == 1));
        assert!(v.iter().sum::<u8>() >= 1);
    }

    #[test]
    fn synonym_folding_maps_gray_to_grey_and_navy_to_blue() {
        let v1 = extract_features(&input("Tops", "Gray", None, None, None));
        let v2 = extract_features(&input("Tops", "Grey", None, None, None));
        assert_eq!(v1, v2);

        let v3 = extract_features(&input("Tops", "Navy", None, None, None));
        let v4 = extract_features(&input("Tops", "Blue", None, None, None));
        assert_eq!(v3, v4);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let v = extract_features(&input("", "", None, None, None));
        // category defaults to tops (index 0), occasion to casual (index 0),
        // style to classic (index 0); color/season left zero.
        assert_eq!(v[CATEGORY_SLOT.0], 1);
        assert_eq!(v[OCCASION_SLOT.0], 1);
        assert_eq!(v[STYLE_SLOT.0], 1);
        assert_eq!(&v[COLOR_SLOT.0..COLOR_SLOT.1], &[0; 8]);
        assert_eq!(&v[SEASON_SLOT.0..SEASON_SLOT.1], &[0; 4]);
    }

    #[test]
    fn is_deterministic_and_idempotent() {
        let i = input("Dresses", "Pink", Some("Formal"), Some("Winter"), Some("Bohemian"));
        let a = extract_features(&i);
        let b = extract_features(&i);
        assert_eq!(a, b);
    }

    #[test]
    fn slot_label_round_trips_category() {
        assert_eq!(slot_label(0), Some(("category", "tops")));
        assert_eq!(slot_label(5), Some(("color", "black")));
    }
}
