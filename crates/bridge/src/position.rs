use std::sync::{Mutex, MutexGuard, PoisonError};

use shared::domain::{PositionVector, AXIS_COUNT};

#[derive(Debug, Default)]
struct Inner {
    positions: PositionVector,
    reverse: [bool; AXIS_COUNT],
}

/// Single source of truth for the rig's last-known physical position and the
/// per-axis reverse flags. Mutations are synchronous and immediately visible
/// to subsequent reads.
///
/// The stored values are always unreversed physical positions; reversal only
/// affects the display transform at the UI boundary.
#[derive(Debug, Default)]
pub struct PositionStore {
    inner: Mutex<Inner>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> PositionVector {
        self.lock().positions
    }

    pub fn set_axis(&self, ordinal: usize, physical: i64) {
        if let Some(slot) = self.lock().positions.get_mut(ordinal) {
            *slot = physical;
        }
    }

    pub fn set_all(&self, positions: PositionVector) {
        self.lock().positions = positions;
    }

    pub fn apply_relative(&self, ordinal: usize, delta: i64) {
        if let Some(slot) = self.lock().positions.get_mut(ordinal) {
            *slot += delta;
        }
    }

    pub fn apply_relative_all(&self, deltas: PositionVector) {
        let mut inner = self.lock();
        for (slot, delta) in inner.positions.iter_mut().zip(deltas) {
            *slot += delta;
        }
    }

    /// Used on Home; the controller zeros its counters, so does the store.
    pub fn reset(&self) {
        self.lock().positions = PositionVector::default();
    }

    pub fn set_reverse(&self, ordinal: usize, reversed: bool) {
        if let Some(slot) = self.lock().reverse.get_mut(ordinal) {
            *slot = reversed;
        }
    }

    pub fn set_reverse_flags(&self, flags: [bool; AXIS_COUNT]) {
        self.lock().reverse = flags;
    }

    pub fn reverse_flags(&self) -> [bool; AXIS_COUNT] {
        self.lock().reverse
    }

    /// Value shown in the UI: sign-inverted when the axis is reversed.
    pub fn display_value(&self, ordinal: usize) -> i64 {
        let inner = self.lock();
        let physical = inner.positions.get(ordinal).copied().unwrap_or(0);
        if inner.reverse.get(ordinal).copied().unwrap_or(false) {
            -physical
        } else {
            physical
        }
    }

    pub fn display_values(&self) -> PositionVector {
        let inner = self.lock();
        let mut values = inner.positions;
        for (value, reversed) in values.iter_mut().zip(inner.reverse) {
            if reversed {
                *value = -*value;
            }
        }
        values
    }

    /// Inverse of the display transform, applied to UI-originated targets
    /// before they are encoded for the controller.
    pub fn to_physical(&self, ordinal: usize, display: i64) -> i64 {
        if self.lock().reverse.get(ordinal).copied().unwrap_or(false) {
            -display
        } else {
            display
        }
    }
}
