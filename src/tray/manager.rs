//! Tray manager - native system tray integration
//!
//! Runs on a dedicated OS thread to handle the platform message loop.
//! The same loop polls menu events, global hotkey events, and status
//! updates from the runtime.

use std::time::Duration;

use tracing::{debug, warn};

use super::icons::{icon_rgba, ICON_SIZE};
use super::{TrayCommand, TrayUpdate};
use crate::hotkeys::Hotkeys;
use crate::link::ConnectionState;

/// Tray manager running on a dedicated OS thread
pub struct TrayManager {
    /// Receive status updates from the runtime
    update_rx: crossbeam::channel::Receiver<TrayUpdate>,
    /// Send commands to the runtime (non-blocking from this thread)
    command_tx: tokio::sync::mpsc::Sender<TrayCommand>,
    /// How long to block waiting for an update per iteration
    poll_interval: Duration,
    /// Register global keyboard chords on this thread
    hotkeys_enabled: bool,
    /// Last known connection state
    state: ConnectionState,
}

impl TrayManager {
    pub fn new(
        update_rx: crossbeam::channel::Receiver<TrayUpdate>,
        command_tx: tokio::sync::mpsc::Sender<TrayCommand>,
        poll_interval: Duration,
        hotkeys_enabled: bool,
    ) -> Self {
        Self {
            update_rx,
            command_tx,
            poll_interval,
            hotkeys_enabled,
            state: ConnectionState::Disconnected,
        }
    }

    /// Run the tray manager (blocks until quit or channel teardown).
    ///
    /// Creates the icon, menu, and hotkey registrations on this thread,
    /// then alternates between pumping platform messages and draining
    /// the event sources.
    pub fn run(mut self) -> anyhow::Result<()> {
        debug!("Starting system tray manager (poll interval {:?})", self.poll_interval);

        let icon = tray_icon::Icon::from_rgba(icon_rgba(self.state), ICON_SIZE, ICON_SIZE)
            .map_err(|e| anyhow::anyhow!("Failed to create icon: {}", e))?;

        let tray_icon = tray_icon::TrayIconBuilder::new()
            .with_icon(icon)
            .with_tooltip(&self.tooltip())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create tray icon: {}", e))?;

        tray_icon.set_menu(Some(Box::new(self.build_menu()?)));
        debug!("System tray icon created");

        // Chord registration needs a thread with an event pump; this is
        // the only one we have. Failure is logged, not fatal.
        let hotkeys = if self.hotkeys_enabled {
            match Hotkeys::register() {
                Ok(hotkeys) => Some(hotkeys),
                Err(e) => {
                    warn!("Global hotkeys unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let menu_channel = muda::MenuEvent::receiver();

        loop {
            // Required for tray/menu/hotkey events on Windows
            self.pump_platform_messages();

            // Menu events (non-blocking)
            while let Ok(event) = menu_channel.try_recv() {
                debug!("Menu event: {:?}", event.id);
                match event.id.as_ref() {
                    "connect" => self.send_command(TrayCommand::Connect),
                    "disconnect" => self.send_command(TrayCommand::Disconnect),
                    "quit" => {
                        debug!("Quit selected from tray menu");
                        self.send_command(TrayCommand::Quit);
                        self.remove_icon(tray_icon);
                        return Ok(());
                    }
                    other => debug!("Unknown menu item: {:?}", other),
                }
            }

            // Keyboard chords (non-blocking)
            if let Some(hotkeys) = &hotkeys {
                while let Some(command) = hotkeys.poll() {
                    debug!("Hotkey chord -> {:?}", command);
                    self.send_command(command);
                }
            }

            // Status updates, with a timeout so the pump keeps turning
            match self.update_rx.recv_timeout(self.poll_interval) {
                Ok(TrayUpdate::Status(state)) => {
                    if state != self.state {
                        self.state = state;
                        debug!("Tray status -> {}", state);

                        if let Ok(new_icon) =
                            tray_icon::Icon::from_rgba(icon_rgba(state), ICON_SIZE, ICON_SIZE)
                        {
                            let _ = tray_icon.set_icon(Some(new_icon));
                        }
                        let _ = tray_icon.set_tooltip(Some(&self.tooltip()));

                        match self.build_menu() {
                            Ok(menu) => tray_icon.set_menu(Some(Box::new(menu))),
                            Err(e) => warn!("Menu rebuild failed: {}", e),
                        }
                    }
                }
                Ok(TrayUpdate::Shutdown) => break,
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
            }
        }

        self.remove_icon(tray_icon);
        Ok(())
    }

    fn send_command(&self, command: TrayCommand) {
        if let Err(e) = self.command_tx.try_send(command) {
            warn!("Dropped tray command {:?}: {}", command, e);
        }
    }

    fn tooltip(&self) -> String {
        format!("X-Touch Volume - {}", self.state)
    }

    /// Build the menu for the current state
    fn build_menu(&self) -> anyhow::Result<muda::Menu> {
        let menu = muda::Menu::new();

        let status = muda::MenuItem::new(format!("Controller: {}", self.state), false, None);
        menu.append(&status)
            .map_err(|e| anyhow::anyhow!("Failed to append status: {}", e))?;

        menu.append(&muda::PredefinedMenuItem::separator())
            .map_err(|e| anyhow::anyhow!("Failed to append separator: {}", e))?;

        let connect = muda::MenuItem::with_id("connect", "Connect X-Touch", true, None);
        menu.append(&connect)
            .map_err(|e| anyhow::anyhow!("Failed to append connect: {}", e))?;

        let disconnect = muda::MenuItem::with_id("disconnect", "Disconnect X-Touch", true, None);
        menu.append(&disconnect)
            .map_err(|e| anyhow::anyhow!("Failed to append disconnect: {}", e))?;

        menu.append(&muda::PredefinedMenuItem::separator())
            .map_err(|e| anyhow::anyhow!("Failed to append separator: {}", e))?;

        let quit = muda::MenuItem::with_id("quit", "Exit", true, None);
        menu.append(&quit)
            .map_err(|e| anyhow::anyhow!("Failed to append quit: {}", e))?;

        Ok(menu)
    }

    /// Explicitly remove the tray icon to prevent ghost icons
    fn remove_icon(&self, tray_icon: tray_icon::TrayIcon) {
        debug!("Tray manager shutting down, removing icon...");
        if let Err(e) = tray_icon.set_visible(false) {
            warn!("Failed to hide tray icon: {}", e);
        }
        drop(tray_icon);
    }

    /// Pump platform messages to process tray/menu/hotkey events
    #[cfg(target_os = "windows")]
    fn pump_platform_messages(&self) {
        use windows::Win32::UI::WindowsAndMessaging::*;

        unsafe {
            let mut msg = std::mem::zeroed();
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
    }

    /// No-op on non-Windows platforms
    #[cfg(not(target_os = "windows"))]
    fn pump_platform_messages(&self) {
        // No-op on non-Windows
    }
}
