//! Deterministic glyph generation for the glyphfield installation.
//!
//! A participant's name and a short voice measurement are reduced to a
//! [`FeatureVector`]; the vector seeds a platform-independent draw sequence
//! that produces an immutable [`GlyphState`]. Regenerating from the same
//! vector is bit-identical, which is the whole point: a participant's glyph
//! must look the same every time it is rebuilt from stored data.
//!
//! The crate is pure. It never touches a clock, the filesystem, or an
//! ambient RNG; the only randomness is the caller-provided generator used to
//! synthesize placeholder vectors for unresolvable participants.

mod features;
mod glyph;
mod progress;

pub use features::{AudioMeasure, FeatureVector, NameParts, name_seed};
pub use glyph::{
    AccentDot, GlyphNode, GlyphOverride, GlyphPalette, GlyphRng, GlyphState, HslColor, PALETTES,
    RevealAmounts, RevealBand, RevealSchedule,
};
pub use progress::reveal_progress;

/// Clamp to the unit interval.
#[must_use]
pub fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Linear remap of `value` from `[in_min, in_max]` to `[out_min, out_max]`,
/// clamping the normalized position so outputs never leave the target range.
#[must_use]
pub fn map_clamped(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    let t = clamp01((value - in_min) / (in_max - in_min));
    out_min + t * (out_max - out_min)
}

#[cfg(test)]
mod tests {
    use super::{clamp01, map_clamped};

    #[test]
    fn clamp01_pins_extremes() {
        assert_eq!(clamp01(-0.5), 0.0);
        assert_eq!(clamp01(0.25), 0.25);
        assert_eq!(clamp01(7.0), 1.0);
    }

    #[test]
    fn map_clamped_holds_output_range() {
        assert_eq!(map_clamped(1.0, 1.0, 30.0, 3.0, 18.0), 3.0);
        assert_eq!(map_clamped(30.0, 1.0, 30.0, 3.0, 18.0), 18.0);
        assert_eq!(map_clamped(99.0, 1.0, 30.0, 3.0, 18.0), 18.0);
        assert_eq!(map_clamped(-4.0, 1.0, 30.0, 3.0, 18.0), 3.0);
        let mid = map_clamped(15.5, 1.0, 30.0, 3.0, 18.0);
        assert!((mid - 10.5).abs() < 1e-6);
    }
}
