//! Session shell around the field engine: wire message decoding, the
//! controller message bus, and the participant directory services.
//!
//! The engine in `glyphfield-core` is synchronous and single-owner. This
//! crate supplies everything around it that a running installation needs:
//! decoding controller JSON into typed messages, queueing those messages
//! onto a bounded bus, draining the bus into the field once per tick, and
//! resolving joins against a registration directory.

pub mod bus;
pub mod directory;
pub mod messages;

use std::sync::{Arc, Mutex};

use glyphfield_core::FieldState;

pub use bus::{
    MessageReceiver, MessageSender, apply_message, create_message_bus, drain_pending_messages,
    make_message_submit,
};
pub use directory::{InMemoryDirectory, InMemoryMirror, LiveMirror, LiveSnapshot};
pub use messages::{InboundMessage, MessageError, decode_message};

/// Field handle shared between the tick loop and observers.
///
/// The tick loop holds the lock for the duration of one `step`; everyone
/// else takes it briefly to read summaries or the latest frame.
pub type SharedField = Arc<Mutex<FieldState>>;

/// Wrap a field for sharing.
#[must_use]
pub fn share_field(field: FieldState) -> SharedField {
    Arc::new(Mutex::new(field))
}
