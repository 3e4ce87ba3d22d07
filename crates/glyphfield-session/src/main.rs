//! Headless installation driver.
//!
//! Runs one field session with scripted participants: seeds a registration
//! directory, pushes joins and controller packets through the message bus,
//! and drains-then-steps in a fixed loop. With `GLYPHFIELD_SEED` set the
//! whole run is reproducible, which is how exhibition builds are rehearsed.
//!
//! Environment knobs: `GLYPHFIELD_MODE`, `GLYPHFIELD_TICKS`,
//! `GLYPHFIELD_PARTICIPANTS`, `GLYPHFIELD_SEED`, `GLYPHFIELD_FRAME_OUT`.

use anyhow::{Context, Result};
use glyphfield_core::{
    ControlUpdate, FieldState, GlyphFieldConfig, InteractionMode, ParticipantId, ParticipantRecord,
    RegistrationData,
};
use glyphfield_glyph::{AudioMeasure, FeatureVector, NameParts, reveal_progress};
use glyphfield_session::{
    InMemoryDirectory, InMemoryMirror, InboundMessage, LiveMirror, LiveSnapshot,
    create_message_bus, drain_pending_messages, make_message_submit,
};
use tracing::{info, warn};

fn main() -> Result<()> {
    init_tracing();

    let mode = env_mode("GLYPHFIELD_MODE").unwrap_or(InteractionMode::Relational);
    let ticks = env_u64("GLYPHFIELD_TICKS").unwrap_or(600);
    let participants = env_u64("GLYPHFIELD_PARTICIPANTS").unwrap_or(8) as usize;
    let seed = env_u64("GLYPHFIELD_SEED");

    let directory = seed_directory();
    let mirror = InMemoryMirror::new();
    let config = GlyphFieldConfig {
        mode,
        rng_seed: seed,
        ..GlyphFieldConfig::default()
    };
    let tick_interval_ms = config.tick_interval_ms;
    let mut field = FieldState::with_source(config, Box::new(directory.clone()))?;

    info!(%mode, ticks, participants, seed = ?seed, "starting field session");

    let (sender, receiver) = create_message_bus((participants * 2).max(256));
    let submit = make_message_submit(sender);

    let roles = ["Nurse", "Gardener", "Courier", "Analyst", "Cook", "Driver"];
    let mut joined = 0usize;
    let leave_at = ticks / 2;
    let rejoin_at = ticks * 3 / 4;
    let mut last_summary = None;

    for step in 0..ticks {
        // Stagger arrivals so eviction and history get exercised.
        if step % 6 == 0 && joined < participants {
            let participant = visitor_id(joined);
            if let Some(record) = directory.get(&participant) {
                publish_typing(&mirror, &record, step * tick_interval_ms);
            }
            submit(InboundMessage::Join {
                participant: participant.clone(),
            });
            if mode == InteractionMode::Multiple {
                submit(InboundMessage::AddRole {
                    participant,
                    role: roles[joined % roles.len()].to_owned(),
                });
            }
            joined += 1;
        }

        if step == leave_at && joined > 0 {
            submit(InboundMessage::Leave {
                participant: visitor_id(0),
            });
        }
        if step == rejoin_at && joined > 0 {
            submit(InboundMessage::Join {
                participant: visitor_id(0),
            });
        }

        if step % 4 == 0 {
            for index in 0..joined {
                if let Some(update) = scripted_update(mode, index, step) {
                    submit(InboundMessage::Control {
                        participant: visitor_id(index),
                        update,
                        ts: None,
                    });
                }
            }
        }

        drain_pending_messages(&mut field, &receiver);
        let output = field.step();

        if output.summary.tick.0 % 60 == 0 {
            info!(
                tick = output.summary.tick.0,
                clock_ms = output.summary.clock_ms,
                agents = output.summary.agent_count,
                merges = output.summary.merges_active,
                remnants = output.summary.remnant_count,
                mean_intensity = output.summary.mean_intensity,
                "field summary",
            );
        }
        last_summary = Some(output);
    }

    let Some(output) = last_summary else {
        warn!("session finished without running a single tick");
        return Ok(());
    };
    info!(
        tick = output.summary.tick.0,
        agents = output.summary.agent_count,
        merges_formed = output.summary.merges_formed,
        zone_crossings = output.summary.zone_crossings,
        remnants = output.summary.remnant_count,
        lobby_snapshots = mirror.len(),
        "session complete",
    );

    if let Ok(path) = std::env::var("GLYPHFIELD_FRAME_OUT") {
        let json = serde_json::to_string_pretty(&output.frame)
            .context("serializing the final frame")?;
        std::fs::write(&path, json).with_context(|| format!("writing frame to {path}"))?;
        info!(path = %path, "final frame written");
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, value = %raw, "ignoring unparseable value");
            None
        }
    }
}

fn env_mode(name: &str) -> Option<InteractionMode> {
    let raw = std::env::var(name).ok()?;
    let label = raw.trim().to_ascii_lowercase();
    let found = InteractionMode::ALL
        .into_iter()
        .find(|mode| mode.as_str() == label);
    if found.is_none() {
        warn!(name, value = %raw, "unknown mode, using default");
    }
    found
}

fn visitor_id(index: usize) -> ParticipantId {
    ParticipantId::new(format!("visitor-{}", index + 1))
}

/// Demo registration archive. The first entries carry full names (one
/// native-script only, one with audio); ids past the list still join, they
/// just render placeholder glyphs.
fn seed_directory() -> InMemoryDirectory {
    let names: [NameParts; 8] = [
        named("Mira", "", "Osei", ""),
        named("Jonas", "", "Petrov", ""),
        named("Amara", "", "Diallo", ""),
        named("Kenji", "", "Watanabe", ""),
        named("Leila", "Noor", "Haddad", ""),
        named("", "", "", "서연"),
        named("Ingrid", "", "Bergström", ""),
        named("Priya", "", "Nair", ""),
    ];
    let directory = InMemoryDirectory::new();
    for (index, name) in names.into_iter().enumerate() {
        let audio = (index % 3 == 0).then(|| AudioMeasure::new(1.5 + index as f32 * 0.4, 0.3));
        directory.insert(ParticipantRecord {
            id: visitor_id(index),
            timestamp: 1_700_000_000_000 + index as u64,
            data: RegistrationData {
                name,
                audio,
                metrics: None,
            },
        });
    }
    directory
}

fn named(first: &str, middle: &str, last: &str, native: &str) -> NameParts {
    NameParts {
        first: first.to_owned(),
        middle: middle.to_owned(),
        last: last.to_owned(),
        native: native.to_owned(),
    }
}

/// Replay the registration page's live stream for one visitor: a half-typed
/// first name, then the completed parts with derived metrics.
fn publish_typing(mirror: &InMemoryMirror, record: &ParticipantRecord, received_at: u64) {
    let full = &record.data.name;
    let half = NameParts {
        first: full.first.chars().take(2).collect(),
        ..NameParts::default()
    };
    mirror.publish(LiveSnapshot {
        id: record.id.clone(),
        progress: reveal_progress(&half, None),
        parts: half,
        metrics: None,
        received_at,
    });
    mirror.publish(LiveSnapshot {
        id: record.id.clone(),
        parts: full.clone(),
        metrics: Some(FeatureVector::derive(full, record.data.audio)),
        progress: reveal_progress(full, record.data.audio),
        received_at,
    });
}

/// Deterministic controller script: each mode gets the channels its real
/// controller page would send.
fn scripted_update(mode: InteractionMode, index: usize, step: u64) -> Option<ControlUpdate> {
    let phase = step as f32 / 24.0 + index as f32 * 0.7;
    let update = match mode {
        InteractionMode::Transitory => ControlUpdate {
            tilt_x: Some(phase.sin() * 1.4),
            tilt_y: Some((phase * 0.8).cos() * 1.1),
            ..ControlUpdate::default()
        },
        InteractionMode::Interoperable => ControlUpdate {
            intensity: Some(phase.sin() * 0.5 + 0.5),
            pitch_hz: Some(200.0 + index as f32 * 90.0 + phase.cos() * 40.0),
            ..ControlUpdate::default()
        },
        InteractionMode::Misaligned => {
            // Swipes are sparse kicks, not a continuous stream.
            if (step / 4 + index as u64) % 6 != 0 {
                return None;
            }
            ControlUpdate {
                tilt_x: Some(if index % 2 == 0 { 3.2 } else { -2.6 }),
                tilt_y: Some(phase.sin() * 1.8),
                ..ControlUpdate::default()
            }
        }
        InteractionMode::Relational => ControlUpdate {
            gaze: Some(phase.sin() * 0.5 + 0.5),
            proximity: Some((phase * 0.6).cos() * 0.5 + 0.5),
            ..ControlUpdate::default()
        },
        InteractionMode::Multiple | InteractionMode::Legible => ControlUpdate {
            intensity: Some((phase.sin() * 0.3 + 0.4).max(0.0)),
            ..ControlUpdate::default()
        },
    };
    Some(update)
}
