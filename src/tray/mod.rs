//! System tray UI module
//!
//! A native tray icon shows the controller connection state and exposes
//! Connect / Disconnect / Quit. Runs on a dedicated OS thread that also
//! pumps platform messages and polls the global hotkey events.

pub mod icons;
pub mod manager;

pub use manager::TrayManager;

use crate::link::ConnectionState;

/// Commands sent from the tray UI (menu or hotkey) to the main runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayCommand {
    /// Reconnect the controller
    Connect,
    /// Release the controller
    Disconnect,
    /// Shut the application down
    Quit,
}

/// Updates sent from the main runtime to the tray UI
#[derive(Debug, Clone, Copy)]
pub enum TrayUpdate {
    /// Controller connection state changed
    Status(ConnectionState),
    /// Tear the tray down (app is exiting without a menu Quit)
    Shutdown,
}
