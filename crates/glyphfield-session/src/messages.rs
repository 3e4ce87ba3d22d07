//! Typed boundary between controller wire traffic and the field engine.
//!
//! Controllers publish JSON on mode-prefixed topics (`relational:update`,
//! `multiple:add-role`, ...). Everything is decoded and clamped here, so the
//! engine only ever sees well-formed values.

use glyphfield_core::{ControlUpdate, InteractionMode, ParticipantId};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A controller message after decoding and sanitization.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Join {
        participant: ParticipantId,
    },
    Leave {
        participant: ParticipantId,
    },
    Control {
        participant: ParticipantId,
        update: ControlUpdate,
        /// Controller-side send time. Advisory only; the engine stamps
        /// arrival with its own clock.
        ts: Option<u64>,
    },
    AddRole {
        participant: ParticipantId,
        role: String,
    },
}

impl InboundMessage {
    #[must_use]
    pub fn participant(&self) -> &ParticipantId {
        match self {
            Self::Join { participant }
            | Self::Leave { participant }
            | Self::Control { participant, .. }
            | Self::AddRole { participant, .. } => participant,
        }
    }
}

/// Reasons a wire message never reaches the engine. All of these are
/// drop-and-log conditions, never tick failures.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("unrecognized topic: {0}")]
    UnknownTopic(String),
    #[error("topic {topic} does not belong to the {expected} session")]
    ModeMismatch {
        topic: String,
        expected: InteractionMode,
    },
    #[error("missing participant id on {0}")]
    MissingParticipant(String),
    #[error("malformed payload on {topic}: {detail}")]
    MalformedPayload { topic: String, detail: String },
}

/// Decode one wire message for a session running `mode`.
///
/// Topic grammar is `<mode>:<action>` with actions `join`,
/// `participant-left`, `update`, and `add-role`. Payload field names are
/// the controllers' camelCase.
pub fn decode_message(
    mode: InteractionMode,
    topic: &str,
    payload: &str,
) -> Result<InboundMessage, MessageError> {
    let Some((prefix, action)) = topic.split_once(':') else {
        return Err(MessageError::UnknownTopic(topic.to_owned()));
    };
    if prefix != mode.as_str() {
        return Err(MessageError::ModeMismatch {
            topic: topic.to_owned(),
            expected: mode,
        });
    }
    match action {
        "join" => {
            let dto: PresenceDto = decode_payload(topic, payload)?;
            Ok(InboundMessage::Join {
                participant: dto.participant(topic)?,
            })
        }
        "participant-left" => {
            let dto: PresenceDto = decode_payload(topic, payload)?;
            Ok(InboundMessage::Leave {
                participant: dto.participant(topic)?,
            })
        }
        "update" => {
            let dto: ControlDto = decode_payload(topic, payload)?;
            let participant = require_participant(&dto.participant_id, topic)?;
            let ts = dto.ts;
            Ok(InboundMessage::Control {
                participant,
                update: dto.into_update(),
                ts,
            })
        }
        "add-role" => {
            let dto: RoleDto = decode_payload(topic, payload)?;
            let participant = require_participant(&dto.participant_id, topic)?;
            Ok(InboundMessage::AddRole {
                participant,
                role: dto.role,
            })
        }
        _ => Err(MessageError::UnknownTopic(topic.to_owned())),
    }
}

fn decode_payload<T: DeserializeOwned>(topic: &str, payload: &str) -> Result<T, MessageError> {
    let mut de = serde_json::Deserializer::from_str(payload);
    serde_path_to_error::deserialize(&mut de).map_err(
        |err: serde_path_to_error::Error<serde_json::Error>| MessageError::MalformedPayload {
            topic: topic.to_owned(),
            detail: format!("{} at {}", err, err.path()),
        },
    )
}

fn require_participant(raw: &str, topic: &str) -> Result<ParticipantId, MessageError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MessageError::MissingParticipant(topic.to_owned()));
    }
    Ok(ParticipantId::new(trimmed))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PresenceDto {
    participant_id: String,
}

impl PresenceDto {
    fn participant(&self, topic: &str) -> Result<ParticipantId, MessageError> {
        require_participant(&self.participant_id, topic)
    }
}

/// Control packet as the controllers send it. Modes use different subsets:
/// tilt pages send `tiltX`/`tiltY`, voice pages `intensity`/`pitch`, swipe
/// pages `vx`/`vy` with occasional `x`/`y` position hints, camera pages
/// `gaze`/`proximity`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ControlDto {
    participant_id: String,
    tilt_x: Option<f32>,
    tilt_y: Option<f32>,
    intensity: Option<f32>,
    pitch: Option<f32>,
    gaze: Option<f32>,
    proximity: Option<f32>,
    vx: Option<f32>,
    vy: Option<f32>,
    x: Option<f32>,
    y: Option<f32>,
    ts: Option<u64>,
}

impl ControlDto {
    /// Collapse to the engine's update shape, clamped to documented ranges.
    /// Swipe velocities ride the tilt channels when no tilt is present.
    fn into_update(self) -> ControlUpdate {
        ControlUpdate {
            tilt_x: self.tilt_x.or(self.vx),
            tilt_y: self.tilt_y.or(self.vy),
            intensity: self.intensity,
            pitch_hz: self.pitch,
            gaze: self.gaze,
            proximity: self.proximity,
            position: match (self.x, self.y) {
                (Some(x), Some(y)) => Some((x, y)),
                _ => None,
            },
        }
        .clamped()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RoleDto {
    participant_id: String,
    role: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_topics_decode_for_the_running_mode() {
        let message = decode_message(
            InteractionMode::Transitory,
            "transitory:join",
            r#"{"participantId":"p1"}"#,
        )
        .expect("decodes");
        assert_eq!(
            message,
            InboundMessage::Join {
                participant: ParticipantId::new("p1")
            }
        );
        assert_eq!(message.participant().as_str(), "p1");
    }

    #[test]
    fn foreign_mode_topics_are_rejected() {
        let err = decode_message(
            InteractionMode::Transitory,
            "relational:update",
            r#"{"participantId":"p1"}"#,
        )
        .expect_err("wrong mode");
        assert!(matches!(err, MessageError::ModeMismatch { .. }));
    }

    #[test]
    fn unknown_actions_and_bare_topics_are_rejected() {
        assert!(matches!(
            decode_message(InteractionMode::Legible, "legible:poke", "{}"),
            Err(MessageError::UnknownTopic(_))
        ));
        assert!(matches!(
            decode_message(InteractionMode::Legible, "legible", "{}"),
            Err(MessageError::UnknownTopic(_))
        ));
    }

    #[test]
    fn blank_participant_ids_are_dropped() {
        let err = decode_message(
            InteractionMode::Multiple,
            "multiple:join",
            r#"{"participantId":"   "}"#,
        )
        .expect_err("blank id");
        assert!(matches!(err, MessageError::MissingParticipant(_)));

        let err = decode_message(InteractionMode::Multiple, "multiple:join", "{}")
            .expect_err("absent id");
        assert!(matches!(err, MessageError::MissingParticipant(_)));
    }

    #[test]
    fn control_payloads_clamp_and_merge_channels() {
        let message = decode_message(
            InteractionMode::Transitory,
            "transitory:update",
            r#"{"participantId":"p1","tiltX":99.0,"tiltY":-0.5,"intensity":0.4,"ts":1755}"#,
        )
        .expect("decodes");
        let InboundMessage::Control { update, ts, .. } = message else {
            panic!("expected control");
        };
        assert_eq!(update.tilt_x, Some(6.0), "clamped at the boundary");
        assert_eq!(update.tilt_y, Some(-0.5));
        assert_eq!(update.intensity, Some(0.4));
        assert_eq!(update.gaze, None);
        assert_eq!(ts, Some(1755));
    }

    #[test]
    fn swipe_velocities_ride_the_tilt_channels() {
        let message = decode_message(
            InteractionMode::Misaligned,
            "misaligned:update",
            r#"{"participantId":"p1","vx":0.8,"vy":-0.3,"x":120.0,"y":340.0}"#,
        )
        .expect("decodes");
        let InboundMessage::Control { update, .. } = message else {
            panic!("expected control");
        };
        assert_eq!(update.tilt_x, Some(0.8));
        assert_eq!(update.tilt_y, Some(-0.3));
        assert_eq!(update.position, Some((120.0, 340.0)));
    }

    #[test]
    fn position_hints_require_both_coordinates() {
        let message = decode_message(
            InteractionMode::Misaligned,
            "misaligned:update",
            r#"{"participantId":"p1","x":120.0}"#,
        )
        .expect("decodes");
        let InboundMessage::Control { update, .. } = message else {
            panic!("expected control");
        };
        assert_eq!(update.position, None);
    }

    #[test]
    fn malformed_payloads_name_the_failing_field() {
        let err = decode_message(
            InteractionMode::Transitory,
            "transitory:update",
            r#"{"participantId":"p1","tiltX":"sideways"}"#,
        )
        .expect_err("bad type");
        let MessageError::MalformedPayload { detail, .. } = err else {
            panic!("expected malformed payload");
        };
        assert!(detail.contains("tiltX"), "path missing from: {detail}");
    }

    #[test]
    fn role_messages_carry_the_raw_label() {
        let message = decode_message(
            InteractionMode::Multiple,
            "multiple:add-role",
            r#"{"participantId":"p1","role":" Nurse "}"#,
        )
        .expect("decodes");
        assert_eq!(
            message,
            InboundMessage::AddRole {
                participant: ParticipantId::new("p1"),
                role: " Nurse ".to_owned(),
            }
        );
    }
}
