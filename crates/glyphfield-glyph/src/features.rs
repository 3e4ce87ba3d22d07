//! Feature extraction: reduces a participant's name and voice measurement to
//! the numeric vector that drives every downstream glyph decision.

use rand::Rng;
use serde::{Deserialize, Serialize};

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Display string used when every name field is blank.
const ANON_NAME: &str = "anon";

/// Name fields captured during registration. Any part may be empty.
///
/// Serialized keys match the registration archive's record format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameParts {
    #[serde(rename = "firstName")]
    pub first: String,
    #[serde(rename = "middleName")]
    pub middle: String,
    #[serde(rename = "lastName")]
    pub last: String,
    #[serde(rename = "nativeName")]
    pub native: String,
}

impl NameParts {
    /// Convenience constructor for the common single-field case.
    #[must_use]
    pub fn first_only(first: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            ..Self::default()
        }
    }

    /// Canonical display string fed to the seed hash.
    ///
    /// The three Latin parts are joined with single spaces and the result is
    /// trimmed at the ends only; an empty middle part therefore leaves a
    /// double space inside the string, and that exact string is what gets
    /// hashed and measured. Collapsing it would silently re-seed every
    /// returning participant.
    #[must_use]
    pub fn canonical(&self) -> String {
        let joined = format!("{} {} {}", self.first, self.middle, self.last);
        let trimmed = joined.trim();
        if !trimmed.is_empty() {
            return trimmed.to_owned();
        }
        let native = self.native.trim();
        if !native.is_empty() {
            return native.to_owned();
        }
        ANON_NAME.to_owned()
    }

    /// True when no field carries a non-blank value.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        [&self.first, &self.middle, &self.last, &self.native]
            .iter()
            .all(|part| part.trim().is_empty())
    }
}

/// Summary statistics from a short voice recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMeasure {
    /// Recording length in seconds.
    #[serde(rename = "duration")]
    pub duration_secs: f32,
    /// Root-mean-square amplitude of the clip.
    pub rms: f32,
}

impl AudioMeasure {
    #[must_use]
    pub const fn new(duration_secs: f32, rms: f32) -> Self {
        Self { duration_secs, rms }
    }
}

/// 32-bit FNV-1a over the string's UTF-16 code units.
///
/// Order-sensitive and stable across runs and platforms; two canonical names
/// agree on a seed only if they agree code unit for code unit.
#[must_use]
pub fn name_seed(canonical: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for unit in canonical.encode_utf16() {
        hash ^= u32::from(unit);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Numeric summary of a participant's name and voice sample.
///
/// Derived once and then immutable; everything a glyph needs is a pure
/// function of these fields. Serialized field names match the archive's
/// stored metric records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub seed: u32,
    #[serde(rename = "nameLen")]
    pub name_length: u32,
    pub vowel_ratio: f32,
    pub cluster_index: f32,
    pub audio_duration_norm: f32,
    pub audio_energy: f32,
    #[serde(rename = "basePolygonSides")]
    pub sides_count: u32,
    #[serde(rename = "rings")]
    pub ring_count: u32,
    #[serde(rename = "creases")]
    pub crease_count: u32,
    pub asymmetry: f32,
    pub highlight_clusters: f32,
    pub color_seed: u32,
}

impl FeatureVector {
    /// Derive the full vector from name parts and an optional audio measure.
    ///
    /// Never fails: blank input degrades to the `"anon"` canonical name and
    /// missing audio contributes zero to both audio terms.
    #[must_use]
    pub fn derive(parts: &NameParts, audio: Option<AudioMeasure>) -> Self {
        let canonical = parts.canonical();
        let seed = name_seed(&canonical);
        let name_length = canonical.encode_utf16().count().max(1) as u32;

        let vowels = count_vowels(&canonical);
        let vowel_ratio = vowels as f32 / name_length as f32;
        let cluster_index = (consonant_runs(&canonical) as f32 / 4.0).min(1.0);

        let (duration, rms) = match audio {
            Some(measure) => (measure.duration_secs.max(0.0), measure.rms.max(0.0)),
            None => (0.0, 0.0),
        };
        let audio_duration_norm = (duration / 3.0).min(1.0);
        let audio_energy = (rms * 30.0).min(1.0);

        // Signed shift; the remainder keeps the dividend's sign, so seeds in
        // the top half of the u32 range fold toward maximal asymmetry.
        let cents = ((seed as i32 >> 4) % 100) as f32 / 100.0;
        let asymmetry = ((cents - 0.5).abs() * 2.0 + (1.0 - vowel_ratio) * 0.4).min(1.0);

        Self {
            seed,
            name_length,
            vowel_ratio,
            cluster_index,
            audio_duration_norm,
            audio_energy,
            sides_count: 4 + seed % 6,
            ring_count: 1 + (vowel_ratio * 3.0 + audio_duration_norm * 2.0).round() as u32,
            crease_count: 2 + seed % 6,
            asymmetry,
            highlight_clusters: (vowel_ratio + cluster_index * 0.4).min(1.0),
            color_seed: seed % 360,
        }
    }

    /// Fully-specified stand-in for a participant whose record could not be
    /// resolved, so the agent is still renderable.
    #[must_use]
    pub fn placeholder<R: Rng + ?Sized>(rng: &mut R, first_name_len: usize) -> Self {
        let name_length = if first_name_len == 0 {
            5
        } else {
            first_name_len as u32
        };
        Self {
            seed: rng.random_range(0..1_000_000_000),
            name_length,
            vowel_ratio: 0.3,
            cluster_index: 0.0,
            audio_duration_norm: 0.0,
            audio_energy: 0.0,
            sides_count: 6,
            ring_count: 2,
            crease_count: 2,
            asymmetry: 0.2,
            highlight_clusters: 0.4,
            color_seed: rng.random_range(0..360),
        }
    }
}

/// Count of vowel characters, case-insensitive, `y` included.
fn count_vowels(text: &str) -> usize {
    text.chars()
        .filter(|c| {
            matches!(
                c,
                'a' | 'e' | 'i' | 'o' | 'u' | 'y' | 'A' | 'E' | 'I' | 'O' | 'U' | 'Y'
            )
        })
        .count()
}

/// Number of maximal runs of two or more consonants.
///
/// A consonant here is any ASCII letter outside `aeiou`; `y` counts on both
/// sides of the ledger (it is a vowel for the ratio and a consonant for
/// clustering). Non-letters break a run.
fn consonant_runs(text: &str) -> usize {
    let mut runs = 0;
    let mut current = 0usize;
    for c in text.chars() {
        let lower = c.to_ascii_lowercase();
        let consonant = c.is_ascii_alphabetic() && !matches!(lower, 'a' | 'e' | 'i' | 'o' | 'u');
        if consonant {
            current += 1;
        } else {
            if current >= 2 {
                runs += 1;
            }
            current = 0;
        }
    }
    if current >= 2 {
        runs += 1;
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn parts(first: &str, middle: &str, last: &str, native: &str) -> NameParts {
        NameParts {
            first: first.to_owned(),
            middle: middle.to_owned(),
            last: last.to_owned(),
            native: native.to_owned(),
        }
    }

    #[test]
    fn canonical_name_keeps_interior_double_space() {
        let name = parts("Ada", "", "Lovelace", "");
        assert_eq!(name.canonical(), "Ada  Lovelace");
    }

    #[test]
    fn canonical_name_falls_back_to_native_then_anon() {
        assert_eq!(parts("", "", "", "Ada").canonical(), "Ada");
        assert_eq!(parts("", "", "", "  ").canonical(), "anon");
        assert_eq!(NameParts::default().canonical(), "anon");
    }

    #[test]
    fn seed_is_stable_and_order_sensitive() {
        let a = name_seed("Ada Lovelace");
        assert_eq!(a, name_seed("Ada Lovelace"));
        assert_ne!(a, name_seed("Lovelace Ada"));
        assert_ne!(a, name_seed("ada lovelace"));
    }

    #[test]
    fn vowel_and_cluster_statistics_match_known_names() {
        let vector = FeatureVector::derive(&parts("Ada", "", "Lovelace", ""), None);
        // "Ada  Lovelace": 13 code units, vowels A,a,o,e,a,e.
        assert_eq!(vector.name_length, 13);
        assert!((vector.vowel_ratio - 6.0 / 13.0).abs() < 1e-6);
        assert_eq!(vector.cluster_index, 0.0);

        let clustered = FeatureVector::derive(&parts("Strength", "", "", ""), None);
        // Runs "Str" and "ngth".
        assert!((clustered.cluster_index - 0.5).abs() < 1e-6);
        assert!((clustered.vowel_ratio - 1.0 / 8.0).abs() < 1e-6);
    }

    #[test]
    fn semivowel_counts_for_both_statistics() {
        let vector = FeatureVector::derive(&parts("Yyy", "", "", ""), None);
        assert!((vector.vowel_ratio - 1.0).abs() < 1e-6);
        assert!((vector.cluster_index - 0.25).abs() < 1e-6);
    }

    #[test]
    fn derived_geometry_stays_in_documented_ranges() {
        for name in ["Ada", "Grace Hopper", "Y", "anon", "Åsa Öberg", "张伟"] {
            let vector = FeatureVector::derive(&NameParts::first_only(name), None);
            assert!((4..=9).contains(&vector.sides_count), "{name}");
            assert!((2..=7).contains(&vector.crease_count), "{name}");
            assert!(vector.ring_count >= 1, "{name}");
            assert!(vector.color_seed < 360, "{name}");
            assert!((0.0..=1.0).contains(&vector.asymmetry), "{name}");
            assert!((0.0..=1.0).contains(&vector.highlight_clusters), "{name}");
        }
    }

    #[test]
    fn geometry_tracks_the_name_seed() {
        for name in ["Ada", "Grace Hopper", "서연", "anon"] {
            let parts = NameParts::first_only(name);
            let seed = name_seed(&parts.canonical());
            let vector = FeatureVector::derive(&parts, None);
            assert_eq!(vector.seed, seed, "{name}");
            assert_eq!(vector.sides_count, 4 + seed % 6, "{name}");
            assert_eq!(vector.crease_count, 2 + seed % 6, "{name}");
            assert_eq!(vector.color_seed, seed % 360, "{name}");
        }
    }

    #[test]
    fn audio_terms_normalize_and_cap() {
        let quiet = FeatureVector::derive(
            &NameParts::first_only("Ada"),
            Some(AudioMeasure::new(1.5, 0.01)),
        );
        assert!((quiet.audio_duration_norm - 0.5).abs() < 1e-6);
        assert!((quiet.audio_energy - 0.3).abs() < 1e-6);

        let loud = FeatureVector::derive(
            &NameParts::first_only("Ada"),
            Some(AudioMeasure::new(9.0, 2.0)),
        );
        assert_eq!(loud.audio_duration_norm, 1.0);
        assert_eq!(loud.audio_energy, 1.0);

        let silent = FeatureVector::derive(&NameParts::first_only("Ada"), None);
        assert_eq!(silent.audio_duration_norm, 0.0);
        assert_eq!(silent.audio_energy, 0.0);
    }

    #[test]
    fn audio_duration_raises_ring_count() {
        let name = NameParts::first_only("Bcd");
        let without = FeatureVector::derive(&name, None);
        let with = FeatureVector::derive(&name, Some(AudioMeasure::new(3.0, 0.0)));
        assert!(with.ring_count > without.ring_count);
    }

    #[test]
    fn placeholder_is_fully_specified() {
        let mut rng = SmallRng::seed_from_u64(7);
        let vector = FeatureVector::placeholder(&mut rng, 0);
        assert_eq!(vector.name_length, 5);
        assert_eq!(vector.sides_count, 6);
        assert_eq!(vector.ring_count, 2);
        assert_eq!(vector.crease_count, 2);
        assert!(vector.seed < 1_000_000_000);
        assert!(vector.color_seed < 360);

        let named = FeatureVector::placeholder(&mut rng, 3);
        assert_eq!(named.name_length, 3);
    }

    #[test]
    fn serialized_field_names_match_stored_records() {
        let vector = FeatureVector::derive(&NameParts::first_only("Ada"), None);
        let json = serde_json::to_value(vector).expect("serialize vector");
        for key in [
            "seed",
            "nameLen",
            "vowelRatio",
            "clusterIndex",
            "basePolygonSides",
            "rings",
            "creases",
            "highlightClusters",
            "colorSeed",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
    }
}
