//! End-to-end scenarios driving the field engine through its public API.

use std::collections::HashMap;

use glyphfield_core::{
    ControlUpdate, EngineTuning, FieldState, GlyphFieldConfig, InteractionMode, ParticipantId,
    ParticipantRecord, ParticipantSource, RegistrationData, RemnantKey, RenderFrame, SourceError,
};
use glyphfield_glyph::{AudioMeasure, NameParts, name_seed};

fn pid(id: &str) -> ParticipantId {
    ParticipantId::new(id)
}

fn config(mode: InteractionMode) -> GlyphFieldConfig {
    GlyphFieldConfig {
        display_width: 1_024.0,
        display_height: 768.0,
        mode,
        rng_seed: Some(7),
        ..GlyphFieldConfig::default()
    }
}

struct ArchiveSource {
    records: HashMap<String, ParticipantRecord>,
}

impl ArchiveSource {
    fn new(entries: &[(&str, &str, &str, Option<AudioMeasure>)]) -> Self {
        let records = entries
            .iter()
            .map(|(id, first, last, audio)| {
                let record = ParticipantRecord {
                    id: pid(id),
                    timestamp: 1_700_000_000,
                    data: RegistrationData {
                        name: NameParts {
                            first: (*first).to_owned(),
                            last: (*last).to_owned(),
                            ..NameParts::default()
                        },
                        audio: *audio,
                        metrics: None,
                    },
                };
                ((*id).to_owned(), record)
            })
            .collect();
        Self { records }
    }
}

impl ParticipantSource for ArchiveSource {
    fn fetch(&self, id: &ParticipantId) -> Result<Option<ParticipantRecord>, SourceError> {
        Ok(self.records.get(id.as_str()).cloned())
    }
}

/// Script a session end to end and require byte-identical output from a
/// second engine built from the same configuration.
#[test]
fn scripted_sessions_replay_byte_identically() {
    let run = || {
        let source = ArchiveSource::new(&[
            ("p1", "Ada", "Lovelace", Some(AudioMeasure::new(2.1, 0.04))),
            ("p2", "Emmy", "Noether", None),
        ]);
        let mut field = FieldState::with_source(
            GlyphFieldConfig {
                roster_capacity: Some(3),
                ..config(InteractionMode::Transitory)
            },
            Box::new(source),
        )
        .expect("valid config");

        let mut frames: Vec<String> = Vec::new();
        for step in 0..60u64 {
            match step {
                0 => {
                    field.join(pid("p1"));
                    field.join(pid("p2"));
                }
                5 => {
                    field.join(pid("drifter"));
                }
                8 => {
                    field.apply_control(
                        &pid("p1"),
                        ControlUpdate {
                            tilt_x: Some(3.0),
                            intensity: Some(0.9),
                            ..ControlUpdate::default()
                        },
                    );
                }
                // Fourth join exceeds the roster; p1 is evicted.
                20 => {
                    field.join(pid("latecomer"));
                }
                30 => {
                    field.leave(&pid("p2"));
                }
                40 => {
                    field.add_role(&pid("drifter"), "archivist");
                }
                _ => {}
            }
            let output = field.step();
            frames.push(serde_json::to_string(&output.frame).expect("frame serializes"));
        }
        let history: Vec<_> = field.history().copied().collect();
        (frames, history)
    };

    let (frames_a, history_a) = run();
    let (frames_b, history_b) = run();
    assert_eq!(frames_a, frames_b);
    assert_eq!(history_a, history_b);
}

#[test]
fn archived_identity_survives_leave_and_rejoin() {
    let source = ArchiveSource::new(&[("p1", "Ada", "Lovelace", Some(AudioMeasure::new(2.1, 0.04)))]);
    let mut field = FieldState::with_source(config(InteractionMode::Transitory), Box::new(source))
        .expect("valid config");

    let id = field.join(pid("p1"));
    let before = field.agent(id).expect("agent").profile;
    assert_eq!(before.display_name, "Ada");
    assert_eq!(before.feature.seed, name_seed("Ada  Lovelace"));
    assert!(before.feature.audio_energy > 0.0);
    assert!(!before.placeholder);

    assert!(field.leave(&pid("p1")));
    assert!(field.agent(id).is_none());

    // The record still resolves, so the regenerated glyph is identical.
    let rejoined = field.join(pid("p1"));
    assert_ne!(rejoined, id, "handles are generational");
    let after = field.agent(rejoined).expect("agent").profile;
    assert_eq!(after.feature, before.feature);
    assert_eq!(
        after.glyph.expect("glyph").nodes,
        before.glyph.expect("glyph").nodes
    );
}

#[test]
fn evicting_a_merged_member_frees_the_partner_without_credit() {
    let mut tuning = EngineTuning::preset(InteractionMode::Transitory);
    if let Some(merge) = tuning.merge.as_mut() {
        merge.duration_ms = 100_000;
    }
    let mut field = FieldState::new(GlyphFieldConfig {
        roster_capacity: Some(2),
        tuning: Some(tuning),
        ..config(InteractionMode::Transitory)
    })
    .expect("valid config");

    let a = pid("a");
    let b = pid("b");
    field.join(a.clone());
    field.join(b.clone());
    for (participant, x) in [(&a, 300.0), (&b, 340.0)] {
        field.apply_control(
            participant,
            ControlUpdate {
                position: Some((x, 300.0)),
                ..ControlUpdate::default()
            },
        );
    }
    let output = field.step();
    assert_eq!(output.summary.merges_formed, 1);

    // The third join evicts the oldest member while it is mid-merge.
    field.join(pid("c"));
    field.apply_control(
        &pid("c"),
        ControlUpdate {
            position: Some((900.0, 700.0)),
            ..ControlUpdate::default()
        },
    );
    let output = field.step();
    assert_eq!(output.summary.evictions, 1);
    assert_eq!(output.summary.merges_active, 0);
    assert_eq!(output.summary.merges_dissolved, 0);

    let survivor = field
        .agent(field.agent_id_of(&b).expect("b present"))
        .expect("agent");
    assert!(survivor.interaction.partner.is_none());
    assert_eq!(
        survivor.interaction.merge_count, 0,
        "an interrupted merge earns no ring"
    );
}

#[test]
fn remnants_outlive_their_participants() {
    let mut tuning = EngineTuning::preset(InteractionMode::Transitory);
    if let Some(merge) = tuning.merge.as_mut() {
        merge.duration_ms = 64;
    }
    tuning.remnants.lifetime_ms = 400;
    tuning.remnants.prune_factor = 1.5;
    let mut field = FieldState::new(GlyphFieldConfig {
        tuning: Some(tuning),
        ..config(InteractionMode::Transitory)
    })
    .expect("valid config");

    let a = pid("a");
    let b = pid("b");
    field.join(a.clone());
    field.join(b.clone());
    for (participant, x) in [(&a, 300.0), (&b, 340.0)] {
        field.apply_control(
            participant,
            ControlUpdate {
                position: Some((x, 300.0)),
                ..ControlUpdate::default()
            },
        );
    }

    // Merge, wait out the dissolution, then drop both members.
    let mut dissolved = false;
    for _ in 0..10 {
        if field.step().summary.merges_dissolved == 1 {
            dissolved = true;
            break;
        }
    }
    assert!(dissolved);
    let pair = RemnantKey::pair(a.clone(), b.clone());
    assert!(field.remnants().get(&pair).is_some());

    field.leave(&a);
    field.leave(&b);
    let output = field.step();
    assert_eq!(output.summary.agent_count, 0);
    assert_eq!(output.frame.remnants.len(), 1, "the trace persists");

    // Decay floors the intensity, then the prune horizon clears it.
    let mut cleared_at = None;
    for _ in 0..60 {
        let output = field.step();
        if output.frame.remnants.is_empty() {
            cleared_at = Some(output.summary.clock_ms);
            break;
        }
    }
    let cleared_at = cleared_at.expect("remnant pruned");
    // Bumped at dissolution (80 ms); the horizon is 400 * 1.5 ms past that.
    assert!(cleared_at > 80 + 600);
    assert!(field.remnants().is_empty());
}

#[test]
fn controls_before_join_are_dropped() {
    let mut field = FieldState::new(config(InteractionMode::Misaligned)).expect("valid config");
    let p = pid("early");
    assert!(!field.apply_control(
        &p,
        ControlUpdate {
            tilt_x: Some(2.0),
            ..ControlUpdate::default()
        }
    ));
    field.join(p.clone());
    assert!(field.apply_control(
        &p,
        ControlUpdate {
            tilt_x: Some(2.0),
            ..ControlUpdate::default()
        }
    ));
}

/// Every mode must keep agents inside the display and emit frames that
/// survive a serialization round trip.
#[test]
fn all_modes_stay_in_bounds_and_round_trip() {
    for mode in InteractionMode::ALL {
        let mut field = FieldState::new(config(mode)).expect("valid config");
        for n in 0..6 {
            let participant = pid(&format!("p{n}"));
            field.join(participant.clone());
            field.apply_control(
                &participant,
                ControlUpdate {
                    tilt_x: Some(n as f32 - 3.0),
                    tilt_y: Some(3.0 - n as f32),
                    intensity: Some(0.2 + n as f32 / 10.0),
                    pitch_hz: Some(200.0 + n as f32 * 150.0),
                    gaze: Some(n as f32 / 6.0),
                    proximity: Some(0.5),
                    ..ControlUpdate::default()
                },
            );
        }
        let mut last = None;
        for _ in 0..50 {
            last = Some(field.step());
        }
        let output = last.expect("stepped");
        assert_eq!(output.frame.agents.len(), 6, "mode {mode}");
        for agent in &output.frame.agents {
            assert!(
                (0.0..=1_024.0).contains(&agent.position.x),
                "mode {mode}: x {} out of bounds",
                agent.position.x
            );
            assert!(
                (0.0..=768.0).contains(&agent.position.y),
                "mode {mode}: y {} out of bounds",
                agent.position.y
            );
            assert!((0.0..=1.0).contains(&agent.opacity), "mode {mode}");
            assert!(agent.scale.is_finite() && agent.scale > 0.0, "mode {mode}");
        }

        let json = serde_json::to_string(&output.frame).expect("serialize");
        let decoded: RenderFrame = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, output.frame, "mode {mode}");
    }
}
