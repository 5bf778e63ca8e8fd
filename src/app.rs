//! Application wiring and lifecycle
//!
//! Connects the controller link to the volume sink and display layer,
//! owns the shutdown protocol, and services the external triggers
//! (tray menu, keyboard chords, Ctrl+C).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::link::{ConnectionState, ControllerLink, MidirDriver, PortDriver};
use crate::osd::{DisplayCoordinator, TextOsd};
use crate::sink::{LoggingSink, VolumeSink};
use crate::tray::{TrayCommand, TrayManager, TrayUpdate};

/// Longest we wait for a worker thread during shutdown; a stuck device
/// call must not hang process exit.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the application until shutdown is signalled
pub async fn run(config: AppConfig) -> Result<()> {
    let sink: Arc<dyn VolumeSink> = Arc::new(LoggingSink::new(0.5));
    info!("Current volume: {:.0}%", sink.get_level() * 100.0);

    let (tray_update_tx, tray_update_rx) = crossbeam::channel::unbounded::<TrayUpdate>();
    let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<TrayCommand>(16);

    let mut coordinator = DisplayCoordinator::new(
        Box::new(TextOsd::new(config.osd.bar_width)),
        config.osd_duration(),
        tray_update_tx.clone(),
    );

    let driver: Arc<dyn PortDriver> = Arc::new(MidirDriver::new());
    let link = Arc::new(ControllerLink::new(
        driver,
        config.filter(),
        config.poll_timing(),
    ));

    // Every state transition lands on the tray, wherever it came from
    let status_handle = coordinator.handle();
    link.subscribe_status(Arc::new(move |state| status_handle.update_status(state)));

    let tray_thread = if config.tray.enabled {
        let manager = TrayManager::new(
            tray_update_rx,
            command_tx.clone(),
            config.tray_poll_interval(),
            config.hotkeys.enabled,
        );
        let thread = std::thread::Builder::new()
            .name("tray".to_string())
            .spawn(move || {
                if let Err(e) = manager.run() {
                    warn!("Tray manager failed: {}", e);
                }
            })
            .context("Failed to spawn tray thread")?;
        Some(thread)
    } else {
        info!("Tray disabled by configuration");
        None
    };

    // Initial connect is best-effort; the tray and chords can retry
    if let Err(e) = link.connect() {
        warn!("Initial connect failed: {}", e);
        warn!("Use the tray menu or Ctrl+PageUp to retry");
    }
    coordinator.update_status(link.status());

    let cancel = Arc::new(AtomicBool::new(false));
    let poll_thread = {
        let link = Arc::clone(&link);
        let cancel = Arc::clone(&cancel);
        let sink = Arc::clone(&sink);
        let display = coordinator.handle();
        std::thread::Builder::new()
            .name("midi-poll".to_string())
            .spawn(move || {
                link.run_polling_loop(&cancel, |level| {
                    // Sink first, then the indicator; both in device order
                    if let Err(e) = sink.set_level(level) {
                        warn!("Volume set failed: {}", e);
                    }
                    display.show_volume(level);
                });
            })
            .context("Failed to spawn polling thread")?
    };

    info!("X-Touch volume controller is active");
    info!("- Ctrl+PageDown releases the controller");
    info!("- Ctrl+PageUp reconnects it");
    info!("- Right-click the tray icon for the menu");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            Some(command) = command_rx.recv() => {
                match command {
                    TrayCommand::Connect => {
                        // Guard: reconnect only makes sense when released
                        if link.status() != ConnectionState::Connected {
                            if let Err(e) = link.connect() {
                                warn!("Connect failed: {}", e);
                            }
                            coordinator.update_status(link.status());
                        }
                    }
                    TrayCommand::Disconnect => {
                        if link.status() == ConnectionState::Connected {
                            if let Err(e) = link.disconnect() {
                                warn!("Disconnect reported: {}", e);
                            }
                            coordinator.update_status(link.status());
                        }
                    }
                    TrayCommand::Quit => {
                        info!("Quit requested from tray");
                        break;
                    }
                }
            }

            _ = &mut ctrl_c => {
                info!("Ctrl+C received");
                break;
            }
        }
    }

    // Shutdown protocol: stop the loop, release the device, tear the
    // display down, then bound every join so exit cannot hang.
    info!("Shutting down...");
    cancel.store(true, Ordering::Relaxed);
    join_with_timeout(poll_thread, JOIN_TIMEOUT, "midi-poll");

    if let Err(e) = link.disconnect() {
        warn!("Disconnect during shutdown: {}", e);
    }

    coordinator.shutdown();

    if let Some(thread) = tray_thread {
        let _ = tray_update_tx.send(TrayUpdate::Shutdown);
        join_with_timeout(thread, JOIN_TIMEOUT, "tray");
    }

    info!("Cleanup complete. Goodbye!");
    Ok(())
}

/// Join a worker with a deadline; a thread that will not stop is
/// detached and reported rather than allowed to block exit.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    if handle.is_finished() {
        if handle.join().is_err() {
            warn!("{} thread panicked", name);
        }
    } else {
        warn!("{} thread did not stop within {:?}, detaching", name, timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_with_timeout_joins_a_finished_thread() {
        let worker = std::thread::spawn(|| {});
        let start = Instant::now();
        join_with_timeout(worker, Duration::from_secs(1), "worker");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_join_with_timeout_detaches_a_stuck_thread() {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
        };

        let start = Instant::now();
        join_with_timeout(worker, Duration::from_millis(50), "worker");
        assert!(start.elapsed() >= Duration::from_millis(50));

        stop.store(true, Ordering::Relaxed);
    }
}
