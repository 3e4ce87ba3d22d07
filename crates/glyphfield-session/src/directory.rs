//! Participant directory and live-registration mirror.
//!
//! The directory is the archive of completed registrations that the field
//! resolves joins against. The mirror is a different animal: registration
//! pages stream partial name state while a visitor is still typing, and the
//! lobby display renders whatever arrived last. Both are in-memory here; a
//! persistent backend only has to implement the same two traits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use glyphfield_core::{ParticipantId, ParticipantRecord, ParticipantSource, SourceError};
use glyphfield_glyph::{FeatureVector, NameParts};
use tracing::debug;

/// Shared in-memory registration archive.
///
/// Clones share the same map, so the tick loop and a registration intake
/// thread can hold the directory at once.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    inner: Arc<Mutex<DirectoryInner>>,
}

#[derive(Debug, Default)]
struct DirectoryInner {
    records: HashMap<ParticipantId, ParticipantRecord>,
    order: Vec<ParticipantId>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record. Re-registration keeps the original
    /// position in listing order.
    pub fn insert(&self, record: ParticipantRecord) {
        let Ok(mut inner) = self.inner.lock() else {
            debug!("directory lock poisoned; dropping insert");
            return;
        };
        let id = record.id.clone();
        if inner.records.insert(id.clone(), record).is_none() {
            inner.order.push(id);
        }
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<ParticipantRecord> {
        let inner = self.inner.lock().ok()?;
        inner.records.get(id).cloned()
    }

    /// All records in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<ParticipantRecord> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.order.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ParticipantSource for InMemoryDirectory {
    fn fetch(&self, id: &ParticipantId) -> Result<Option<ParticipantRecord>, SourceError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| SourceError::Unavailable("directory lock poisoned".into()))?;
        Ok(inner.records.get(id).cloned())
    }
}

/// Partial registration state as streamed by an in-progress signup page.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSnapshot {
    pub id: ParticipantId,
    pub parts: NameParts,
    /// Derived metrics, once the page has enough input to compute them.
    pub metrics: Option<FeatureVector>,
    /// Reveal progress in `[0, 1]` for the lobby's partial rendering.
    pub progress: f32,
    /// Engine clock at arrival, in simulated milliseconds.
    pub received_at: u64,
}

/// Sink for live registration state. Publishing is fire-and-forget with
/// last-write-wins per participant; a failed publish must never stall the
/// caller.
pub trait LiveMirror: Send + Sync {
    fn publish(&self, snapshot: LiveSnapshot);
}

/// Mirror that retains the latest snapshot per participant.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMirror {
    inner: Arc<Mutex<HashMap<ParticipantId, LiveSnapshot>>>,
}

impl InMemoryMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn latest(&self, id: &ParticipantId) -> Option<LiveSnapshot> {
        let inner = self.inner.lock().ok()?;
        inner.get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LiveMirror for InMemoryMirror {
    fn publish(&self, snapshot: LiveSnapshot) {
        let Ok(mut inner) = self.inner.lock() else {
            debug!(participant = %snapshot.id, "mirror lock poisoned; snapshot dropped");
            return;
        };
        inner.insert(snapshot.id.clone(), snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glyphfield_core::RegistrationData;

    fn record(id: &str, first: &str, timestamp: u64) -> ParticipantRecord {
        ParticipantRecord {
            id: ParticipantId::new(id),
            timestamp,
            data: RegistrationData {
                name: NameParts::first_only(first),
                ..RegistrationData::default()
            },
        }
    }

    #[test]
    fn listing_preserves_insertion_order_across_updates() {
        let directory = InMemoryDirectory::new();
        directory.insert(record("a", "Ada", 1));
        directory.insert(record("b", "Grace", 2));
        directory.insert(record("a", "Adelaide", 3));

        let listed = directory.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id.as_str(), "a");
        assert_eq!(listed[0].data.name.first, "Adelaide");
        assert_eq!(listed[1].id.as_str(), "b");
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn fetch_resolves_known_ids_and_misses_cleanly() {
        let directory = InMemoryDirectory::new();
        directory.insert(record("a", "Ada", 1));

        let hit = directory
            .fetch(&ParticipantId::new("a"))
            .expect("lookup works");
        assert_eq!(hit.map(|r| r.data.name.first), Some("Ada".to_owned()));

        let miss = directory
            .fetch(&ParticipantId::new("nobody"))
            .expect("lookup works");
        assert!(miss.is_none());
    }

    #[test]
    fn mirror_keeps_only_the_latest_snapshot() {
        let mirror = InMemoryMirror::new();
        let id = ParticipantId::new("a");

        mirror.publish(LiveSnapshot {
            id: id.clone(),
            parts: NameParts::first_only("A"),
            metrics: None,
            progress: 0.25,
            received_at: 16,
        });
        mirror.publish(LiveSnapshot {
            id: id.clone(),
            parts: NameParts::first_only("Ad"),
            metrics: None,
            progress: 0.25,
            received_at: 32,
        });

        let latest = mirror.latest(&id).expect("snapshot retained");
        assert_eq!(latest.parts.first, "Ad");
        assert_eq!(latest.received_at, 32);
        assert_eq!(mirror.len(), 1);
    }
}
