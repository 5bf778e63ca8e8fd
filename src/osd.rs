//! On-screen volume display coordination
//!
//! A dedicated thread owns the OSD surface and drains a FIFO command
//! queue, so producers (the polling loop, the app) never block on
//! rendering. Repeated volume updates extend a single hide deadline:
//! the indicator stays up while changes keep arriving and disappears
//! one display duration after the last one.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::link::ConnectionState;
use crate::tray::TrayUpdate;

/// Marshaling a display command failed; always swallowed after logging
#[derive(Debug, Clone, Error)]
#[error("display command failed: {reason}")]
pub struct RenderCommandError {
    pub reason: String,
}

/// Commands applied on the thread that owns the visual surface
enum OsdCommand {
    Show(f32),
    Shutdown,
}

/// The visual resource behind the OSD.
///
/// Owned by the coordinator's thread; all calls stay on that thread.
pub trait OsdSurface: Send {
    fn show(&mut self, level: f32) -> Result<(), RenderCommandError>;
    fn hide(&mut self) -> Result<(), RenderCommandError>;
    fn destroy(&mut self);
}

/// Surface that renders the percentage and bar through the log output.
///
/// The windowed overlay is an external collaborator; this keeps the
/// indicator useful when running headless or from a terminal.
pub struct TextOsd {
    bar_width: usize,
}

impl TextOsd {
    pub fn new(bar_width: usize) -> Self {
        Self { bar_width: bar_width.max(1) }
    }
}

impl OsdSurface for TextOsd {
    fn show(&mut self, level: f32) -> Result<(), RenderCommandError> {
        let percent = (level * 100.0).round() as u32;
        let filled = ((level * self.bar_width as f32).round() as usize).min(self.bar_width);
        let bar: String = "#".repeat(filled) + &"-".repeat(self.bar_width - filled);
        info!("Volume: {:>3}% [{}]", percent, bar);
        Ok(())
    }

    fn hide(&mut self) -> Result<(), RenderCommandError> {
        debug!("Volume indicator hidden");
        Ok(())
    }

    fn destroy(&mut self) {
        debug!("Volume indicator destroyed");
    }
}

/// Cheap clone handed to producers; both calls are fire-and-forget
#[derive(Clone)]
pub struct DisplayHandle {
    osd_tx: Sender<OsdCommand>,
    tray_tx: Sender<TrayUpdate>,
}

impl DisplayHandle {
    /// Schedule the transient volume indicator for `level`
    pub fn show_volume(&self, level: f32) {
        if let Err(e) = self.osd_tx.try_send(OsdCommand::Show(level)) {
            debug!("OSD command dropped: {}", e);
        }
    }

    /// Push the connection state to the persistent status surface
    pub fn update_status(&self, state: ConnectionState) {
        if let Err(e) = self.tray_tx.try_send(TrayUpdate::Status(state)) {
            debug!("Status update dropped: {}", e);
        }
    }
}

/// Owns the OSD thread and the tray-update producer side
pub struct DisplayCoordinator {
    handle: DisplayHandle,
    osd_thread: Option<JoinHandle<()>>,
}

impl DisplayCoordinator {
    /// Spawn the surface-owning thread.
    ///
    /// `duration` is how long the indicator stays visible after the
    /// most recent update.
    pub fn new(
        surface: Box<dyn OsdSurface>,
        duration: Duration,
        tray_tx: Sender<TrayUpdate>,
    ) -> Self {
        let (osd_tx, osd_rx) = unbounded();

        let osd_thread = std::thread::Builder::new()
            .name("osd".to_string())
            .spawn(move || run_osd_loop(surface, duration, osd_rx))
            .expect("failed to spawn OSD thread");

        Self {
            handle: DisplayHandle { osd_tx, tray_tx },
            osd_thread: Some(osd_thread),
        }
    }

    /// Producer handle for other threads
    pub fn handle(&self) -> DisplayHandle {
        self.handle.clone()
    }

    pub fn show_volume(&self, level: f32) {
        self.handle.show_volume(level);
    }

    pub fn update_status(&self, state: ConnectionState) {
        self.handle.update_status(state);
    }

    /// Destroy the surface and join the thread.
    ///
    /// Safe to call more than once; also runs on drop so the display
    /// resource is released on every exit path.
    pub fn shutdown(&mut self) {
        if let Some(thread) = self.osd_thread.take() {
            let _ = self.handle.osd_tx.send(OsdCommand::Shutdown);
            if thread.join().is_err() {
                warn!("OSD thread panicked during shutdown");
            }
        }
    }
}

impl Drop for DisplayCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_osd_loop(mut surface: Box<dyn OsdSurface>, duration: Duration, rx: Receiver<OsdCommand>) {
    debug!("OSD loop started (display duration {:?})", duration);
    let mut hide_at: Option<Instant> = None;

    loop {
        // Wake exactly at the hide deadline, or idle-poll when hidden
        let timeout = match hide_at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::from_millis(250),
        };

        match rx.recv_timeout(timeout) {
            Ok(OsdCommand::Show(level)) => {
                if let Err(e) = surface.show(level) {
                    warn!("OSD show failed: {}", e);
                }
                hide_at = Some(Instant::now() + duration);
            }
            Ok(OsdCommand::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => {
                if hide_at.is_some_and(|at| Instant::now() >= at) {
                    if let Err(e) = surface.hide() {
                        warn!("OSD hide failed: {}", e);
                    }
                    hide_at = None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    surface.destroy();
    debug!("OSD loop exited");
}
