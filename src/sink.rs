//! System volume sink
//!
//! The OS endpoint-volume binding lives behind this trait; the link's
//! dispatch loop only ever sees normalized levels.

use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tracing::info;

/// Volume set/get failed at the OS boundary.
///
/// Logged by the caller; it never affects the device connection, which
/// is a separate resource.
#[derive(Debug, Clone, Error)]
#[error("volume sink error: {reason}")]
pub struct SinkError {
    pub reason: String,
}

/// Normalized master-volume access.
///
/// Implementations must be fast and callable from the polling thread.
pub trait VolumeSink: Send + Sync {
    /// Current level in [0.0, 1.0]
    fn get_level(&self) -> f32;

    /// Set the level; the value is clamped to [0.0, 1.0]
    fn set_level(&self, level: f32) -> Result<(), SinkError>;
}

/// Clamp a level into the valid range
pub fn clamp_level(level: f32) -> f32 {
    level.clamp(0.0, 1.0)
}

/// In-process sink that keeps the level in an atomic and logs changes.
///
/// Stands in for the platform endpoint-volume binding, which is a
/// drop-in replacement behind [`VolumeSink`].
pub struct LoggingSink {
    /// f32 bits, so reads need no lock
    level_bits: AtomicU32,
}

impl LoggingSink {
    pub fn new(initial: f32) -> Self {
        Self {
            level_bits: AtomicU32::new(clamp_level(initial).to_bits()),
        }
    }
}

impl VolumeSink for LoggingSink {
    fn get_level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    fn set_level(&self, level: f32) -> Result<(), SinkError> {
        let level = clamp_level(level);
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
        info!("Volume set to {:.0}%", level * 100.0);
        Ok(())
    }
}
