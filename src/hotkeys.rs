//! Global keyboard chords
//!
//! Ctrl+PageDown releases the controller, Ctrl+PageUp reconnects it.
//! Registration must happen on a thread that pumps platform messages
//! (the tray thread), and events fire on key release so the chord
//! cannot retrigger while held.

use anyhow::{Context, Result};
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tracing::debug;

use crate::tray::TrayCommand;

/// Registered chords mapped to tray commands
pub struct Hotkeys {
    release_id: u32,
    reconnect_id: u32,
    /// Keeps the OS registrations alive
    _manager: GlobalHotKeyManager,
}

impl Hotkeys {
    /// Register both chords with the OS
    pub fn register() -> Result<Self> {
        let manager = GlobalHotKeyManager::new().context("Failed to create hotkey manager")?;

        let release = HotKey::new(Some(Modifiers::CONTROL), Code::PageDown);
        let reconnect = HotKey::new(Some(Modifiers::CONTROL), Code::PageUp);

        manager
            .register(release)
            .context("Failed to register Ctrl+PageDown")?;
        manager
            .register(reconnect)
            .context("Failed to register Ctrl+PageUp")?;

        debug!("Registered chords: Ctrl+PageDown (release), Ctrl+PageUp (reconnect)");

        Ok(Self {
            release_id: release.id(),
            reconnect_id: reconnect.id(),
            _manager: manager,
        })
    }

    /// Drain one pending hotkey event into a command, if any
    pub fn poll(&self) -> Option<TrayCommand> {
        while let Ok(event) = GlobalHotKeyEvent::receiver().try_recv() {
            if event.state != HotKeyState::Released {
                continue;
            }
            if event.id == self.release_id {
                return Some(TrayCommand::Disconnect);
            }
            if event.id == self.reconnect_id {
                return Some(TrayCommand::Connect);
            }
        }
        None
    }
}
