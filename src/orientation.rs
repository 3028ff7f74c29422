//! Shared orientation state between the listener and the consumer.
//!
//! The listener thread is the only writer; the consumer (typically a render
//! loop) reads the latest value once per frame. The slot holds exactly one
//! value with last-write-wins semantics: a newer decode silently supersedes
//! an unread older one. The mutex guarantees a reader never observes a
//! partially written vector.

use std::sync::{Arc, Mutex};

/// Per-axis orientation angles decoded from a telemetry message.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrientationVector {
    /// X-axis angle
    pub x: f32,
    /// Y-axis angle
    pub y: f32,
    /// Z-axis angle
    pub z: f32,
}

impl OrientationVector {
    /// Create a new orientation vector.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Components as an array in (x, y, z) order.
    #[inline]
    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Handle type for the shared orientation slot.
pub type OrientationHandle = Arc<Mutex<OrientationVector>>;

/// Create a new orientation slot, zero-initialized.
pub fn create_orientation_handle() -> OrientationHandle {
    Arc::new(Mutex::new(OrientationVector::default()))
}

/// Read the current orientation value.
///
/// A poisoned lock still yields the last stored value: the writer only ever
/// assigns a `Copy` struct under the lock, so the slot cannot be left
/// half-written.
pub fn current(handle: &OrientationHandle) -> OrientationVector {
    *handle.lock().unwrap_or_else(|e| e.into_inner())
}
