//! Device driver seam for the controller link
//!
//! `PortDriver` abstracts port enumeration and opening; `DeviceHandle`
//! is one open input stream. The link only ever holds a single handle.

use std::fmt;

use thiserror::Error;

use crate::midi::ControlEvent;

/// Alternate driver stack used to open a port.
///
/// The link walks the driver's fallback order when an open attempt is
/// rejected. The platform driver usually supports only `Default`;
/// test drivers advertise several.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendHint {
    /// Whatever the platform driver picks on its own
    Default,
    /// RtMidi-style native stack
    RtMidi,
    /// PortMidi-style compatibility stack
    PortMidi,
}

impl fmt::Display for BackendHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendHint::Default => write!(f, "default"),
            BackendHint::RtMidi => write!(f, "rtmidi"),
            BackendHint::PortMidi => write!(f, "portmidi"),
        }
    }
}

/// A specific backend rejected the open call
#[derive(Debug, Clone, Error)]
#[error("open '{port}' via {backend} backend failed: {reason}")]
pub struct OpenError {
    pub port: String,
    pub backend: BackendHint,
    pub reason: String,
}

/// Transient failure draining a connected device
#[derive(Debug, Clone, Error)]
#[error("reading from device failed: {reason}")]
pub struct PollReadError {
    pub reason: String,
}

/// Closing the device handle failed; the handle is unusable either way
#[derive(Debug, Clone, Error)]
#[error("closing device failed: {reason}")]
pub struct CloseError {
    pub reason: String,
}

/// One open MIDI input stream.
///
/// Exclusively owned by the link for its open lifetime; dropped or
/// closed on disconnect and shutdown.
pub trait DeviceHandle: Send {
    /// Name of the port this handle was opened on
    fn port_name(&self) -> &str;

    /// Drain all currently pending control events without blocking
    fn drain_pending(&mut self) -> Result<Vec<ControlEvent>, PollReadError>;

    /// Close the stream, consuming the handle
    fn close(self: Box<Self>) -> Result<(), CloseError>;
}

/// Enumerates and opens MIDI input ports
pub trait PortDriver: Send + Sync {
    /// Names of the currently available input ports
    fn list_ports(&self) -> Vec<String>;

    /// Ordered backend fallback list tried by `connect`
    fn backends(&self) -> &[BackendHint];

    /// Open the named port with the given backend
    fn open(&self, port: &str, hint: BackendHint) -> Result<Box<dyn DeviceHandle>, OpenError>;
}
