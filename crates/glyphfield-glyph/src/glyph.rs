//! Glyph state generation: a fixed draw sequence over a tiny LCG turns a
//! feature vector into the immutable geometry handed to the drawing layer.

use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::{FeatureVector, clamp01, map_clamped};

const LCG_MULTIPLIER: u32 = 1_664_525;
const LCG_INCREMENT: u32 = 1_013_904_223;

/// Seed used when a feature vector carries a zero seed.
const SEED_FALLBACK: u32 = 12_345;

/// Deterministic unit-interval draw source.
///
/// A plain 32-bit linear-congruential generator: no platform- or
/// standard-library-dependent behavior, so the same seed yields the same
/// draw sequence everywhere, forever. Not a statistical RNG and not meant
/// to be one.
#[derive(Debug, Clone)]
pub struct GlyphRng {
    state: u32,
}

impl GlyphRng {
    #[must_use]
    pub fn new(seed: u32) -> Self {
        let state = if seed == 0 { SEED_FALLBACK } else { seed };
        Self { state }
    }

    /// Next draw in `[0, 1]`.
    pub fn next_unit(&mut self) -> f32 {
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        (f64::from(self.state) / f64::from(u32::MAX)) as f32
    }
}

/// Hue/saturation/lightness triplet, hue in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HslColor {
    pub h: f32,
    pub s: f32,
    pub l: f32,
}

impl HslColor {
    #[must_use]
    pub const fn new(h: f32, s: f32, l: f32) -> Self {
        Self { h, s, l }
    }

    /// Copy with the hue rotated by `degrees`, normalized into `[0, 360)`.
    #[must_use]
    pub fn hue_shifted(self, degrees: f32) -> Self {
        Self {
            h: (self.h + degrees).rem_euclid(360.0),
            ..self
        }
    }
}

/// Ring and accent colors for one glyph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlyphPalette {
    pub ring: HslColor,
    pub accent: HslColor,
}

/// The fixed palette table; selection by `color_seed` consumes no draws.
pub const PALETTES: [GlyphPalette; 3] = [
    GlyphPalette {
        ring: HslColor::new(210.0, 40.0, 14.0),
        accent: HslColor::new(35.0, 90.0, 55.0),
    },
    GlyphPalette {
        ring: HslColor::new(28.0, 80.0, 18.0),
        accent: HslColor::new(12.0, 90.0, 60.0),
    },
    GlyphPalette {
        ring: HslColor::new(220.0, 14.0, 20.0),
        accent: HslColor::new(40.0, 25.0, 85.0),
    },
];

/// Interior node: polar offset from the glyph center, radius in glyph units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlyphNode {
    #[serde(rename = "a")]
    pub angle: f32,
    #[serde(rename = "r")]
    pub radius: f32,
}

/// Accent dot near the glyph rim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccentDot {
    #[serde(rename = "ang")]
    pub angle: f32,
    #[serde(rename = "rad")]
    pub radius: f32,
    pub size: f32,
}

/// Immutable geometric description of one participant's glyph.
///
/// A pure function of the feature vector. Rendering transforms (zone
/// overrides and the like) always clone; a generated state is never edited
/// in place. Serialized field names match what the drawing layer consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphState {
    pub seed: u32,
    pub palette: GlyphPalette,
    #[serde(rename = "sides")]
    pub sides_count: u32,
    #[serde(rename = "ringCount")]
    pub ring_count: u32,
    #[serde(rename = "creaseCount")]
    pub crease_count: u32,
    #[serde(rename = "asymAngle")]
    pub asymmetry_angle: f32,
    pub asymmetry: f32,
    #[serde(rename = "audioDurationNorm")]
    pub audio_duration_norm: f32,
    pub nodes: Vec<GlyphNode>,
    pub dots: Vec<AccentDot>,
}

impl GlyphState {
    /// Generate the glyph for a feature vector.
    ///
    /// Draw order is part of the contract: nodes first (two draws each),
    /// then dots (three draws each). Palette selection consumes no draws.
    /// Identical vectors produce bit-identical states.
    #[must_use]
    pub fn from_feature(feature: &FeatureVector) -> Self {
        let mut rng = GlyphRng::new(feature.seed);

        let palette = PALETTES[feature.color_seed as usize % PALETTES.len()];
        let sides_count = feature.sides_count.max(3);
        let ring_count = feature.ring_count.max(1);
        let crease_count = feature.crease_count.max(1);

        let node_count =
            map_clamped(feature.name_length as f32, 1.0, 30.0, 3.0, 18.0).floor() as usize;
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let angle = rng.next_unit() * TAU;
            let radius = 0.15 + rng.next_unit() * 0.25;
            nodes.push(GlyphNode { angle, radius });
        }

        let dot_count = 4 + (clamp01(feature.highlight_clusters) * 8.0).floor() as usize;
        let mut dots = Vec::with_capacity(dot_count);
        for _ in 0..dot_count {
            let angle = rng.next_unit() * TAU;
            let radius = 0.45 + rng.next_unit() * 0.08;
            let size = 4.0 + rng.next_unit() * 4.0;
            dots.push(AccentDot {
                angle,
                radius,
                size,
            });
        }

        Self {
            seed: feature.seed,
            palette,
            sides_count,
            ring_count,
            crease_count,
            asymmetry_angle: feature.asymmetry * 0.55,
            asymmetry: feature.asymmetry,
            audio_duration_norm: feature.audio_duration_norm,
            nodes,
            dots,
        }
    }

    /// Transformed copy with a zone's presentation override applied.
    ///
    /// The receiver is left untouched; overridden counts are re-clamped to
    /// the documented floors (sides ≥ 3, rings ≥ 1, creases ≥ 1).
    #[must_use]
    pub fn with_override(&self, presentation: &GlyphOverride) -> Self {
        let mut variant = self.clone();
        if let Some(sides) = presentation.sides_count {
            variant.sides_count = sides.max(3);
        }
        if let Some(cap) = presentation.ring_count_max {
            variant.ring_count = variant.ring_count.min(cap).max(1);
        }
        if let Some((lo, hi)) = presentation.crease_bounds {
            variant.crease_count = variant.crease_count.clamp(lo.max(1), hi.max(1));
        }
        if presentation.hue_shift_deg != 0.0 {
            variant.palette.ring = variant.palette.ring.hue_shifted(presentation.hue_shift_deg);
        }
        variant
    }
}

/// Presentation override a zone imposes on glyphs inside it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GlyphOverride {
    pub sides_count: Option<u32>,
    pub ring_count_max: Option<u32>,
    pub crease_bounds: Option<(u32, u32)>,
    pub hue_shift_deg: f32,
}

/// One band of the staged reveal: an element fades in while overall
/// progress crosses `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevealBand {
    pub start: f32,
    pub end: f32,
}

impl RevealBand {
    #[must_use]
    pub const fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    /// Visibility of this band's element at `progress`, in `[0, 1]`.
    #[must_use]
    pub fn amount(&self, progress: f32) -> f32 {
        map_clamped(progress, self.start, self.end, 0.0, 1.0)
    }
}

/// Visibility of each glyph element at a given reveal progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevealAmounts {
    pub rings: f32,
    pub core: f32,
    pub nodes: f32,
    pub dots: f32,
}

/// The fixed band layout of the onboarding reveal: rings first, then the
/// core polygon, then interior nodes, accent dots last.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevealSchedule {
    pub rings: RevealBand,
    pub core: RevealBand,
    pub nodes: RevealBand,
    pub dots: RevealBand,
}

impl RevealSchedule {
    pub const STANDARD: Self = Self {
        rings: RevealBand::new(0.0, 0.5),
        core: RevealBand::new(0.2, 0.6),
        nodes: RevealBand::new(0.4, 0.95),
        dots: RevealBand::new(0.65, 1.0),
    };

    #[must_use]
    pub fn visibility(&self, progress: f32) -> RevealAmounts {
        let progress = clamp01(progress);
        RevealAmounts {
            rings: self.rings.amount(progress),
            core: self.core.amount(progress),
            nodes: self.nodes.amount(progress),
            dots: self.dots.amount(progress),
        }
    }
}

impl Default for RevealSchedule {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioMeasure, NameParts};

    fn fixed_vector(seed: u32) -> FeatureVector {
        FeatureVector {
            seed,
            name_length: 4,
            vowel_ratio: 0.5,
            cluster_index: 0.0,
            audio_duration_norm: 0.0,
            audio_energy: 0.0,
            sides_count: 4 + seed % 6,
            ring_count: 2,
            crease_count: 2 + seed % 6,
            asymmetry: 0.4,
            highlight_clusters: 0.5,
            color_seed: seed % 360,
        }
    }

    #[test]
    fn zero_seed_uses_fallback_sequence() {
        let mut zero = GlyphRng::new(0);
        let mut fallback = GlyphRng::new(12_345);
        for _ in 0..8 {
            assert_eq!(zero.next_unit(), fallback.next_unit());
        }
    }

    #[test]
    fn draw_sequences_differ_across_seeds() {
        let mut a = GlyphRng::new(1);
        let mut b = GlyphRng::new(2);
        let first_a: Vec<f32> = (0..4).map(|_| a.next_unit()).collect();
        let first_b: Vec<f32> = (0..4).map(|_| b.next_unit()).collect();
        assert_ne!(first_a, first_b);
        assert!(first_a.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn generation_is_bit_identical_per_vector() {
        let vector = FeatureVector::derive(
            &NameParts::first_only("Grace Hopper"),
            Some(AudioMeasure::new(2.0, 0.02)),
        );
        let first = GlyphState::from_feature(&vector);
        let second = GlyphState::from_feature(&vector);
        assert_eq!(first, second);
        assert_eq!(first.nodes, second.nodes);
        assert_eq!(first.dots, second.dots);
    }

    #[test]
    fn seed_42_scenario_is_stable() {
        let vector = fixed_vector(42);
        assert_eq!(vector.sides_count, 4);

        let state = GlyphState::from_feature(&vector);
        let again = GlyphState::from_feature(&vector);
        assert_eq!(state, again);
        assert_eq!(state.sides_count, 4);
        // name_length 4 maps into [3, 18]: floor(3 + (3/29) * 15) = 4 nodes.
        assert_eq!(state.nodes.len(), 4);
        // highlight 0.5: 4 + floor(4) = 8 dots.
        assert_eq!(state.dots.len(), 8);
        assert_eq!(state.palette, PALETTES[0]);
        let angles: Vec<f32> = state.nodes.iter().map(|n| n.angle).collect();
        let angles_again: Vec<f32> = again.nodes.iter().map(|n| n.angle).collect();
        assert_eq!(angles, angles_again);
    }

    #[test]
    fn different_seeds_produce_different_geometry() {
        let a = GlyphState::from_feature(&fixed_vector(42));
        let b = GlyphState::from_feature(&fixed_vector(43));
        assert_ne!(
            (a.sides_count, a.nodes[0].angle.to_bits()),
            (b.sides_count, b.nodes[0].angle.to_bits()),
        );
    }

    #[test]
    fn node_count_clamps_at_name_length_extremes() {
        let mut vector = fixed_vector(7);
        vector.name_length = 1;
        assert_eq!(GlyphState::from_feature(&vector).nodes.len(), 3);
        vector.name_length = 200;
        assert_eq!(GlyphState::from_feature(&vector).nodes.len(), 18);
    }

    #[test]
    fn geometry_values_stay_in_documented_ranges() {
        let vector = FeatureVector::derive(&NameParts::first_only("Ada Lovelace"), None);
        let state = GlyphState::from_feature(&vector);
        assert!(state.sides_count >= 3);
        assert!(state.ring_count >= 1);
        assert!(state.crease_count >= 1);
        for node in &state.nodes {
            assert!((0.0..=std::f32::consts::TAU).contains(&node.angle));
            assert!((0.15..=0.40 + 1e-6).contains(&node.radius));
        }
        for dot in &state.dots {
            assert!((0.45..=0.53 + 1e-6).contains(&dot.radius));
            assert!((4.0..=8.0 + 1e-6).contains(&dot.size));
        }
    }

    #[test]
    fn override_clamps_and_shifts_without_touching_original() {
        let original = GlyphState::from_feature(&fixed_vector(9));
        let presentation = GlyphOverride {
            sides_count: Some(20),
            ring_count_max: Some(1),
            crease_bounds: Some((1, 3)),
            hue_shift_deg: 200.0,
        };
        let variant = original.with_override(&presentation);

        assert_eq!(variant.sides_count, 20);
        assert_eq!(variant.ring_count, 1);
        assert!((1..=3).contains(&variant.crease_count));
        assert!((variant.palette.ring.h - (original.palette.ring.h + 200.0).rem_euclid(360.0))
            .abs()
            < 1e-6);
        // Original is untouched.
        assert_eq!(original, GlyphState::from_feature(&fixed_vector(9)));
        assert_eq!(variant.nodes, original.nodes);
    }

    #[test]
    fn reveal_schedule_band_edges() {
        let schedule = RevealSchedule::STANDARD;
        let start = schedule.visibility(0.0);
        assert_eq!(
            (start.rings, start.core, start.nodes, start.dots),
            (0.0, 0.0, 0.0, 0.0)
        );

        let mid = schedule.visibility(0.5);
        assert_eq!(mid.rings, 1.0);
        assert!((mid.core - 0.75).abs() < 1e-6);
        assert!((mid.nodes - (0.1 / 0.55)).abs() < 1e-6);
        assert_eq!(mid.dots, 0.0);

        let done = schedule.visibility(1.0);
        assert_eq!((done.rings, done.core, done.nodes, done.dots), (1.0, 1.0, 1.0, 1.0));
    }
}
