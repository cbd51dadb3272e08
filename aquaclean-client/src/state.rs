//! Device state store.

use aquaclean_core::{DataPointId, DataPointValue};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::debug;

/// A data point whose observed value changed.
///
/// `value` is `None` when the device reported no usable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub id: DataPointId,
    pub value: Option<DataPointValue>,
}

/// Immutable copy of the store at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub values: BTreeMap<DataPointId, Option<DataPointValue>>,
    /// Raw payloads of data points missing from the registry.
    pub unrecognized: BTreeMap<DataPointId, Bytes>,
}

impl StateSnapshot {
    /// Returns the last known value, if any.
    pub fn get(&self, id: DataPointId) -> Option<&DataPointValue> {
        self.values.get(&id).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.unrecognized.is_empty()
    }
}

/// Most recently observed data point values.
///
/// Updates are serialized by a write lock and change events are published
/// while it is held, so subscribers see changes in application order.
pub struct DeviceStateStore {
    state: RwLock<StateSnapshot>,
    changes: broadcast::Sender<StateChange>,
}

impl DeviceStateStore {
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            state: RwLock::new(StateSnapshot::default()),
            changes,
        }
    }

    /// Records a value. Returns whether it differed from the previous one.
    pub fn apply(&self, id: DataPointId, value: Option<DataPointValue>) -> bool {
        let mut state = self.state.write();
        if state.values.get(&id) == Some(&value) {
            return false;
        }

        debug!(
            "Data point {} = {}",
            id,
            value.as_ref().map_or_else(|| "unavailable".to_string(), ToString::to_string)
        );
        state.values.insert(id, value.clone());
        // No subscribers is fine.
        let _ = self.changes.send(StateChange { id, value });
        true
    }

    /// Keeps the raw payload of a data point the registry does not describe.
    pub fn apply_unrecognized(&self, id: DataPointId, payload: Bytes) {
        debug!("Unrecognized data point {} ({} bytes)", id, payload.len());
        self.state.write().unrecognized.insert(id, payload);
    }

    /// Returns the last known value of a data point.
    pub fn get(&self, id: DataPointId) -> Option<DataPointValue> {
        self.state.read().values.get(&id).cloned().flatten()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.read().clone()
    }

    /// Subscribes to value changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Forgets all values.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.values.clear();
        state.unrecognized.clear();
    }
}
