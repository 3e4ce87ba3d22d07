//! Message bus between controller transports and the tick loop.
//!
//! Transports run on async executors and push decoded [`InboundMessage`]s
//! through a bounded crossfire channel. The tick loop drains the channel
//! between steps on its own thread, so the engine itself never blocks on
//! network traffic. A full channel sheds load by dropping the message and
//! logging, which keeps a burst of controller packets from stalling a tick.

use std::sync::Arc;

use crossfire::mpmc;
use crossfire::{MAsyncTx, MRx, TryRecvError, TrySendError, detect_backoff_cfg};
use glyphfield_core::FieldState;
use tracing::{debug, warn};

use crate::messages::InboundMessage;

/// Async-sender half handed to transports.
pub type MessageSender = MAsyncTx<InboundMessage>;
/// Blocking-receiver half owned by the tick loop.
pub type MessageReceiver = MRx<InboundMessage>;

/// Create the message channel. Capacity bounds how many controller packets
/// can queue between two ticks before shedding starts.
pub fn create_message_bus(capacity: usize) -> (MessageSender, MessageReceiver) {
    detect_backoff_cfg();
    mpmc::bounded_tx_async_rx_blocking(capacity)
}

/// Drain every queued message into the field. Returns how many were
/// accepted by the engine. Called once per tick, before `step`.
pub fn drain_pending_messages(field: &mut FieldState, receiver: &MessageReceiver) -> usize {
    let mut applied = 0;
    loop {
        match receiver.try_recv() {
            Ok(message) => {
                if apply_message(field, message) {
                    applied += 1;
                }
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                debug!("message bus disconnected; no more controller traffic");
                break;
            }
        }
    }
    applied
}

/// Apply one decoded message to the field. Returns false when the engine
/// rejected it (unknown participant, duplicate role, and so on).
pub fn apply_message(field: &mut FieldState, message: InboundMessage) -> bool {
    match message {
        InboundMessage::Join { participant } => {
            let id = field.join(participant.clone());
            debug!(%participant, ?id, "participant joined");
            true
        }
        InboundMessage::Leave { participant } => {
            if field.leave(&participant) {
                debug!(%participant, "participant left");
                true
            } else {
                debug!(%participant, "leave for unknown participant ignored");
                false
            }
        }
        InboundMessage::Control {
            participant,
            update,
            ts,
        } => {
            if field.apply_control(&participant, update) {
                if let Some(ts) = ts {
                    debug!(%participant, controller_ts = ts, "control applied");
                }
                true
            } else {
                warn!(%participant, "control for unknown participant dropped");
                false
            }
        }
        InboundMessage::AddRole { participant, role } => {
            if field.add_role(&participant, &role) {
                debug!(%participant, role, "role recorded");
                true
            } else {
                debug!(%participant, role, "role rejected (blank or duplicate)");
                false
            }
        }
    }
}

/// Build the submit callback transports use to enqueue messages.
/// Returns true when the message was queued.
pub fn make_message_submit(
    sender: MessageSender,
) -> Arc<dyn Fn(InboundMessage) -> bool + Send + Sync> {
    Arc::new(move |message: InboundMessage| match sender.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            warn!(
                participant = %message.participant(),
                "message bus full; dropping controller message"
            );
            false
        }
        Err(TrySendError::Disconnected(message)) => {
            warn!(
                participant = %message.participant(),
                "message bus disconnected; dropping controller message"
            );
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glyphfield_core::{ControlUpdate, GlyphFieldConfig, InteractionMode, ParticipantId};

    fn test_field() -> FieldState {
        let config = GlyphFieldConfig {
            mode: InteractionMode::Transitory,
            rng_seed: Some(7),
            ..GlyphFieldConfig::default()
        };
        FieldState::new(config).expect("valid config")
    }

    #[test]
    fn drained_messages_are_applied_in_arrival_order() {
        let mut field = test_field();
        let (tx, rx) = create_message_bus(16);
        let submit = make_message_submit(tx);

        assert!(submit(InboundMessage::Join {
            participant: ParticipantId::new("p1"),
        }));
        assert!(submit(InboundMessage::Control {
            participant: ParticipantId::new("p1"),
            update: ControlUpdate {
                tilt_x: Some(1.0),
                ..ControlUpdate::default()
            },
            ts: None,
        }));

        let applied = drain_pending_messages(&mut field, &rx);
        assert_eq!(applied, 2);
        assert_eq!(field.agent_count(), 1);
    }

    #[test]
    fn rejected_messages_are_not_counted() {
        let mut field = test_field();
        let (tx, rx) = create_message_bus(16);
        let submit = make_message_submit(tx);

        // Control before join: decoded fine, rejected by the engine.
        assert!(submit(InboundMessage::Control {
            participant: ParticipantId::new("ghost"),
            update: ControlUpdate::default(),
            ts: None,
        }));
        assert!(submit(InboundMessage::Leave {
            participant: ParticipantId::new("ghost"),
        }));

        assert_eq!(drain_pending_messages(&mut field, &rx), 0);
        assert_eq!(field.agent_count(), 0);
    }

    #[test]
    fn full_bus_sheds_instead_of_blocking() {
        let (tx, rx) = create_message_bus(1);
        let submit = make_message_submit(tx);

        assert!(submit(InboundMessage::Join {
            participant: ParticipantId::new("p1"),
        }));
        assert!(!submit(InboundMessage::Join {
            participant: ParticipantId::new("p2"),
        }));

        let mut field = test_field();
        assert_eq!(drain_pending_messages(&mut field, &rx), 1);
        assert_eq!(field.agent_count(), 1);
    }
}
