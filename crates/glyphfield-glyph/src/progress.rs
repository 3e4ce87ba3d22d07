//! Staged reveal progress for onboarding: how much of a glyph is shown
//! while a participant is still filling in their registration.

use crate::{AudioMeasure, NameParts, clamp01};

/// Reveal scalar in `[0, 1]` for a partially-completed registration.
///
/// Four disjoint bands, each latching the scalar to its own range: a first
/// name reaches 0.25; the share of the three extra name fields lifts it into
/// (0.25, 0.55]; recorded audio lifts it into (0.55, 0.85] scaled by
/// duration (capped at three seconds). The final 1.0 is assigned by the
/// caller on submission, never here. Adding fields never lowers the result.
#[must_use]
pub fn reveal_progress(parts: &NameParts, audio: Option<AudioMeasure>) -> f32 {
    let mut progress = 0.0;

    if !parts.first.trim().is_empty() {
        progress = 0.25;
    }

    let extras = [&parts.middle, &parts.last, &parts.native]
        .into_iter()
        .filter(|field| !field.trim().is_empty())
        .count();
    if extras > 0 {
        progress = 0.25 + (extras as f32 / 3.0) * 0.30;
    }

    if let Some(measure) = audio {
        if measure.duration_secs > 0.0 {
            progress = 0.55 + clamp01(measure.duration_secs / 3.0) * 0.30;
        }
    }

    clamp01(progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(first: &str, middle: &str, last: &str, native: &str) -> NameParts {
        NameParts {
            first: first.to_owned(),
            middle: middle.to_owned(),
            last: last.to_owned(),
            native: native.to_owned(),
        }
    }

    #[test]
    fn empty_registration_is_zero() {
        assert_eq!(reveal_progress(&NameParts::default(), None), 0.0);
        assert_eq!(reveal_progress(&named("   ", "", "", ""), None), 0.0);
    }

    #[test]
    fn first_name_reaches_first_band() {
        assert_eq!(reveal_progress(&NameParts::first_only("Ada"), None), 0.25);
    }

    #[test]
    fn extra_fields_fill_second_band() {
        let one = reveal_progress(&named("Ada", "", "L", ""), None);
        assert!((one - 0.35).abs() < 1e-6);
        assert!(one > 0.25 && one <= 0.55);

        let all = reveal_progress(&named("Ada", "King", "Lovelace", "Ada"), None);
        assert!((all - 0.55).abs() < 1e-6);
    }

    #[test]
    fn audio_fills_third_band() {
        let full = reveal_progress(
            &NameParts::first_only("Ada"),
            Some(AudioMeasure::new(3.0, 0.0)),
        );
        assert!((full - 0.85).abs() < 1e-6);

        let half = reveal_progress(
            &NameParts::first_only("Ada"),
            Some(AudioMeasure::new(1.5, 0.0)),
        );
        assert!((half - 0.70).abs() < 1e-6);

        let long = reveal_progress(
            &NameParts::first_only("Ada"),
            Some(AudioMeasure::new(9.0, 0.0)),
        );
        assert!((long - 0.85).abs() < 1e-6);

        let silent = reveal_progress(
            &NameParts::first_only("Ada"),
            Some(AudioMeasure::new(0.0, 0.0)),
        );
        assert_eq!(silent, 0.25);
    }

    #[test]
    fn progress_is_monotone_as_fields_accumulate() {
        let stages = [
            (NameParts::default(), None),
            (NameParts::first_only("Ada"), None),
            (named("Ada", "", "Lovelace", ""), None),
            (named("Ada", "King", "Lovelace", ""), None),
            (named("Ada", "King", "Lovelace", "Ada"), None),
            (
                named("Ada", "King", "Lovelace", "Ada"),
                Some(AudioMeasure::new(1.0, 0.1)),
            ),
            (
                named("Ada", "King", "Lovelace", "Ada"),
                Some(AudioMeasure::new(3.0, 0.1)),
            ),
        ];

        let mut previous = -1.0;
        for (parts, audio) in stages {
            let value = reveal_progress(&parts, audio);
            assert!(
                value >= previous,
                "progress regressed: {value} < {previous}"
            );
            assert!((0.0..=0.85 + 1e-6).contains(&value));
            previous = value;
        }
    }
}
