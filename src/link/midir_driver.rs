//! midir-backed implementation of the device driver seam
//!
//! The midir input callback runs on the driver's own thread; it parses
//! incoming bytes and pushes control events into a bounded channel that
//! the polling loop drains without blocking.

use crossbeam::channel::{bounded, Receiver};
use midir::{MidiInput, MidiInputConnection};
use tracing::{debug, trace};

use super::driver::{BackendHint, CloseError, DeviceHandle, OpenError, PollReadError, PortDriver};
use crate::midi::{format_hex, ControlEvent, MidiMessage};

/// Capacity of the callback-to-loop event buffer.
///
/// A slider sweep produces well under a hundred events per second;
/// overflow means the consumer stalled and dropping is the right call.
const EVENT_BUFFER: usize = 1024;

/// Client name reported to the OS MIDI stack
const CLIENT_NAME: &str = "xtouch-volume";

/// Production driver over the platform MIDI stack.
///
/// midir selects the native backend itself, so only
/// [`BackendHint::Default`] is advertised.
pub struct MidirDriver;

impl MidirDriver {
    pub fn new() -> Self {
        Self
    }

    fn new_client(&self, purpose: &str) -> Result<MidiInput, String> {
        MidiInput::new(&format!("{CLIENT_NAME}-{purpose}")).map_err(|e| e.to_string())
    }
}

impl Default for MidirDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PortDriver for MidirDriver {
    fn list_ports(&self) -> Vec<String> {
        let midi_in = match self.new_client("scanner") {
            Ok(client) => client,
            Err(e) => {
                debug!("Failed to create MIDI scanner client: {}", e);
                return Vec::new();
            }
        };

        let mut port_names = Vec::new();
        for port in midi_in.ports() {
            if let Ok(name) = midi_in.port_name(&port) {
                port_names.push(name);
            }
        }

        port_names
    }

    fn backends(&self) -> &[BackendHint] {
        &[BackendHint::Default]
    }

    fn open(&self, port: &str, hint: BackendHint) -> Result<Box<dyn DeviceHandle>, OpenError> {
        if hint != BackendHint::Default {
            return Err(OpenError {
                port: port.to_string(),
                backend: hint,
                reason: "backend not supported by the platform driver".to_string(),
            });
        }

        let midi_in = self.new_client("input").map_err(|reason| OpenError {
            port: port.to_string(),
            backend: hint,
            reason,
        })?;

        // Ports are keyed by name; the enumeration may have gone stale
        // if the device was unplugged between list and open.
        let in_port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).as_deref() == Ok(port))
            .ok_or_else(|| OpenError {
                port: port.to_string(),
                backend: hint,
                reason: "port no longer present".to_string(),
            })?;

        let (event_tx, event_rx) = bounded(EVENT_BUFFER);

        let conn = midi_in
            .connect(
                &in_port,
                CLIENT_NAME,
                move |_timestamp, data, _| {
                    match MidiMessage::parse(data) {
                        Some(message) => {
                            trace!("MIDI in: {}", message);
                            if let Some(event) = message.as_control_event() {
                                // Never block or panic inside the driver callback
                                let _ = event_tx.try_send(event);
                            }
                        }
                        None => {
                            trace!("Unparsed MIDI bytes: {}", format_hex(data));
                        }
                    }
                },
                (),
            )
            .map_err(|e| OpenError {
                port: port.to_string(),
                backend: hint,
                reason: e.to_string(),
            })?;

        Ok(Box::new(MidirHandle {
            port_name: port.to_string(),
            conn,
            event_rx,
        }))
    }
}

/// Open midir input stream plus the buffered event queue
struct MidirHandle {
    port_name: String,
    conn: MidiInputConnection<()>,
    event_rx: Receiver<ControlEvent>,
}

impl DeviceHandle for MidirHandle {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn drain_pending(&mut self) -> Result<Vec<ControlEvent>, PollReadError> {
        Ok(self.event_rx.try_iter().collect())
    }

    fn close(self: Box<Self>) -> Result<(), CloseError> {
        // close() hands the client back; dropping it tears the
        // OS connection down.
        let _ = self.conn.close();
        Ok(())
    }
}
