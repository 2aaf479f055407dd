//! Point-in-time captures of plain state.
//!
//! A [`Snapshot`] owns a deep copy of the value it was taken from, so later
//! edits to the live value never leak into it. Snapshots back both cache
//! rollback and form undo/redo.

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::CoreError;
use crate::ids::SnapshotId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    id: SnapshotId,
    state: T,
    taken_at_ms: u64,
    description: Option<String>,
}

impl<T: Clone> Snapshot<T> {
    /// Capture `state` using the system clock.
    pub fn capture(state: &T, description: Option<&str>) -> Self {
        Self::capture_at(state, description, &SystemClock)
    }

    pub fn capture_at(state: &T, description: Option<&str>, clock: &impl Clock) -> Self {
        Self {
            id: SnapshotId::new(),
            state: state.clone(),
            taken_at_ms: clock.now_ms(),
            description: description.map(str::to_string),
        }
    }

    /// A fresh copy of the captured state.
    pub fn restore(&self) -> T {
        self.state.clone()
    }
}

impl<T> Snapshot<T> {
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn into_state(self) -> T {
        self.state
    }

    pub fn taken_at_ms(&self) -> u64 {
        self.taken_at_ms
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl<T: Serialize> Snapshot<T> {
    /// BLAKE3 digest of the MessagePack encoding of the state.
    pub fn checksum(&self) -> Result<[u8; 32], CoreError> {
        let bytes = rmp_serde::to_vec(&self.state)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(*blake3::hash(&bytes).as_bytes())
    }
}

/// Structural equality. Used to suppress dirty signals for edits that end
/// where they started.
pub fn equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}
