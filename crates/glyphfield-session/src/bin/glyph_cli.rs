//! Offline glyph inspector.
//!
//! Derives the feature vector, glyph geometry, and reveal progress for one
//! registration without running a session. Used while tuning the generator
//! and for spot-checking that a kiosk build draws the same glyph for the
//! same name.

use anyhow::Result;
use clap::Parser;
use glyphfield_glyph::{AudioMeasure, FeatureVector, GlyphState, NameParts, reveal_progress};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "glyph_cli",
    version,
    about = "Derive the glyph for a registration name, printed as JSON"
)]
struct Cli {
    /// Given name as typed on the registration page.
    #[arg(long, default_value = "")]
    first: String,

    /// Middle name, if any.
    #[arg(long, default_value = "")]
    middle: String,

    /// Family name.
    #[arg(long, default_value = "")]
    last: String,

    /// Name in native script; used alone when the latin fields are empty.
    #[arg(long, default_value = "")]
    native: String,

    /// Voice recording length in seconds; enables the audio contribution.
    #[arg(long)]
    duration: Option<f32>,

    /// Root-mean-square amplitude of the recording.
    #[arg(long, default_value_t = 0.0)]
    rms: f32,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    canonical: String,
    progress: f32,
    feature: FeatureVector,
    glyph: GlyphState,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let parts = NameParts {
        first: cli.first,
        middle: cli.middle,
        last: cli.last,
        native: cli.native,
    };
    let audio = cli
        .duration
        .map(|duration| AudioMeasure::new(duration, cli.rms));

    let feature = FeatureVector::derive(&parts, audio);
    let glyph = GlyphState::from_feature(&feature);
    let report = Report {
        canonical: parts.canonical(),
        progress: reveal_progress(&parts, audio),
        feature,
        glyph,
    };

    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");
    Ok(())
}
