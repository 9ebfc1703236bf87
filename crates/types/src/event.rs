//! Change notifications consumed by the event ingress.

use serde::{Deserialize, Serialize};

use crate::record::RecordKind;

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Created,
    Modified,
}

/// A change notification identifying an entity by id and event kind.
///
/// The payload carries no entity body; consumers re-read the current record
/// through the store so stale notifications are harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    entity_id: String,
    entity_kind: RecordKind,
    event_kind: EventKind,
}

impl ChangeEvent {
    pub fn new(entity_id: impl Into<String>, entity_kind: RecordKind, event_kind: EventKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_kind,
            event_kind,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn entity_kind(&self) -> RecordKind {
        self.entity_kind
    }

    pub fn event_kind(&self) -> EventKind {
        self.event_kind
    }
}
