//! Controller link - MIDI connection lifecycle and dispatch loop
//!
//! Owns the single device handle, the connection state machine
//! (discover, connect, disconnect, failure), and the blocking polling
//! loop that turns slider messages into volume intents.

pub mod driver;
pub mod midir_driver;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::midi::ControlEvent;

pub use driver::{BackendHint, CloseError, DeviceHandle, OpenError, PollReadError, PortDriver};
pub use midir_driver::MidirDriver;

/// Connection state of the controller link.
///
/// Owned exclusively by [`ControllerLink`]; everyone else reads
/// snapshots. `Connecting` only shows up while a `connect` call is in
/// flight on another thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last connect attempt exhausted every backend. Not sticky:
    /// the next connect re-runs discovery from scratch.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Callback invoked on every connection state transition
pub type StatusCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// The (channel, controller) pair designating the volume slider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFilter {
    /// MIDI channel, 0-15 (wire numbering)
    pub channel: u8,
    /// Controller number, 0-127
    pub control: u8,
}

impl ControlFilter {
    pub fn accepts(&self, event: &ControlEvent) -> bool {
        event.channel == self.channel && event.control == self.control
    }
}

/// Polling loop intervals and retry policy.
///
/// Config values rather than literals so tests can shrink them.
#[derive(Debug, Clone, Copy)]
pub struct PollTiming {
    /// Sleep while not connected
    pub idle_backoff: Duration,
    /// Sleep after draining, bounds CPU without hurting latency
    pub drain_pause: Duration,
    /// Sleep after a recoverable read error
    pub error_cooldown: Duration,
    /// Consecutive read errors before the device is presumed unplugged
    pub max_consecutive_errors: u32,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_millis(100),
            drain_pause: Duration::from_millis(1),
            error_cooldown: Duration::from_secs(1),
            max_consecutive_errors: 3,
        }
    }
}

/// Connect failed; surfaced to the caller and via tray status
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no MIDI input ports detected")]
    NoDeviceFound,

    #[error("could not open '{port}' with any backend")]
    AllBackendsFailed {
        port: String,
        #[source]
        last: OpenError,
    },
}

/// State plus handle under one lock so transitions stay atomic:
/// `Connected` holds exactly when a handle is stored.
struct Inner {
    state: ConnectionState,
    handle: Option<Box<dyn DeviceHandle>>,
}

/// MIDI connection state machine and message dispatch loop
pub struct ControllerLink {
    driver: Arc<dyn PortDriver>,
    inner: Mutex<Inner>,
    callbacks: RwLock<Vec<StatusCallback>>,
    filter: ControlFilter,
    timing: PollTiming,
}

impl ControllerLink {
    pub fn new(driver: Arc<dyn PortDriver>, filter: ControlFilter, timing: PollTiming) -> Self {
        Self {
            driver,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                handle: None,
            }),
            callbacks: RwLock::new(Vec::new()),
            filter,
            timing,
        }
    }

    /// Non-blocking snapshot of the connection state
    pub fn status(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Register a callback fired on every state transition
    pub fn subscribe_status(&self, callback: StatusCallback) {
        self.callbacks.write().push(callback);
    }

    fn emit(&self, state: ConnectionState) {
        for callback in self.callbacks.read().iter() {
            callback(state);
        }
    }

    /// Connect to the controller.
    ///
    /// Idempotent: already connected returns success without reopening.
    /// Otherwise enumerates ports, takes the first one (single-device
    /// policy, no user choice) and walks the driver's backend fallback
    /// order until an open succeeds.
    pub fn connect(&self) -> Result<(), ConnectError> {
        let mut inner = self.inner.lock();

        if inner.state == ConnectionState::Connected {
            debug!("Already connected");
            return Ok(());
        }

        inner.state = ConnectionState::Connecting;
        self.emit_locked(ConnectionState::Connecting);

        let ports = self.driver.list_ports();
        if ports.is_empty() {
            warn!("No controller detected; is the device plugged in?");
            inner.state = ConnectionState::Disconnected;
            self.emit_locked(ConnectionState::Disconnected);
            return Err(ConnectError::NoDeviceFound);
        }

        debug!("Available MIDI input ports: {:?}", ports);
        let port = ports[0].clone();
        info!("Connecting to controller: {}", port);

        let mut last_err: Option<OpenError> = None;
        for &hint in self.driver.backends() {
            match self.driver.open(&port, hint) {
                Ok(handle) => {
                    info!("Connected to {} ({} backend)", handle.port_name(), hint);
                    inner.handle = Some(handle);
                    inner.state = ConnectionState::Connected;
                    self.emit_locked(ConnectionState::Connected);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Backend {} failed: {}", hint, e);
                    last_err = Some(e);
                }
            }
        }

        warn!("Could not open '{}' with any available backend", port);
        inner.state = ConnectionState::Failed;
        self.emit_locked(ConnectionState::Failed);

        let last = last_err.unwrap_or_else(|| OpenError {
            port: port.clone(),
            backend: BackendHint::Default,
            reason: "driver advertises no backends".to_string(),
        });
        Err(ConnectError::AllBackendsFailed { port, last })
    }

    /// Disconnect from the controller.
    ///
    /// Idempotent no-op without a handle. A close failure is returned
    /// for diagnostics but the state transitions to `Disconnected`
    /// regardless: the handle is unusable either way.
    pub fn disconnect(&self) -> Result<(), CloseError> {
        let handle = {
            let mut inner = self.inner.lock();
            let handle = inner.handle.take();
            if handle.is_none() && inner.state == ConnectionState::Disconnected {
                debug!("Already disconnected");
                return Ok(());
            }
            inner.state = ConnectionState::Disconnected;
            self.emit_locked(ConnectionState::Disconnected);
            handle
        };

        if let Some(handle) = handle {
            info!("Disconnecting from {}", handle.port_name());
            if let Err(e) = handle.close() {
                warn!("Close failed (continuing): {}", e);
                return Err(e);
            }
            info!("Controller disconnected");
        }

        Ok(())
    }

    // Callbacks only post to channels; they are invoked while the
    // inner lock is held, so they must never call back into the link.
    fn emit_locked(&self, state: ConnectionState) {
        self.emit(state);
    }

    /// Run the blocking dispatch loop until `cancel` is raised.
    ///
    /// The loop never reconnects by itself; reconnection is driven
    /// externally through [`ControllerLink::connect`]. Each accepted
    /// slider event becomes one `on_volume` call, in device order.
    pub fn run_polling_loop<F>(&self, cancel: &AtomicBool, mut on_volume: F)
    where
        F: FnMut(f32),
    {
        debug!("Polling loop started");
        let mut consecutive_errors = 0u32;

        while !cancel.load(Ordering::Relaxed) {
            if self.status() != ConnectionState::Connected {
                std::thread::sleep(self.timing.idle_backoff);
                continue;
            }

            // Drain under the lock (non-blocking), process outside it
            let drained = {
                let mut inner = self.inner.lock();
                inner.handle.as_mut().map(|h| h.drain_pending())
            };

            match drained {
                None => {
                    // Raced with a disconnect; back to idle waiting
                    std::thread::sleep(self.timing.idle_backoff);
                }
                Some(Ok(events)) => {
                    consecutive_errors = 0;
                    for event in events {
                        if self.filter.accepts(&event) {
                            debug!("Accepted {}", event);
                            on_volume(event.level());
                        } else {
                            trace!("Ignored {}", event);
                        }
                    }
                    std::thread::sleep(self.timing.drain_pause);
                }
                Some(Err(e)) => {
                    consecutive_errors += 1;
                    warn!(
                        "Device read error ({} consecutive): {}",
                        consecutive_errors, e
                    );

                    if consecutive_errors >= self.timing.max_consecutive_errors {
                        warn!("Device presumed unplugged; dropping the connection");
                        if let Err(close_err) = self.disconnect() {
                            debug!("Close after read errors failed: {}", close_err);
                        }
                        consecutive_errors = 0;
                    } else {
                        std::thread::sleep(self.timing.error_cooldown);
                    }
                }
            }
        }

        debug!("Polling loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    type DrainScript = Arc<PlMutex<VecDeque<Result<Vec<ControlEvent>, PollReadError>>>>;

    struct FakeHandle {
        script: DrainScript,
        closes: Arc<AtomicUsize>,
    }

    impl DeviceHandle for FakeHandle {
        fn port_name(&self) -> &str {
            "Fake X-Touch Mini"
        }

        fn drain_pending(&mut self) -> Result<Vec<ControlEvent>, PollReadError> {
            self.script.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn close(self: Box<Self>) -> Result<(), CloseError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeDriver {
        ports: PlMutex<Vec<String>>,
        backends: Vec<BackendHint>,
        good: PlMutex<Option<BackendHint>>,
        script: DrainScript,
        opens: AtomicUsize,
        closes: Arc<AtomicUsize>,
        list_calls: AtomicUsize,
    }

    impl FakeDriver {
        fn new(ports: Vec<&str>, backends: Vec<BackendHint>, good: Option<BackendHint>) -> Self {
            Self {
                ports: PlMutex::new(ports.into_iter().map(String::from).collect()),
                backends,
                good: PlMutex::new(good),
                script: Arc::new(PlMutex::new(VecDeque::new())),
                opens: AtomicUsize::new(0),
                closes: Arc::new(AtomicUsize::new(0)),
                list_calls: AtomicUsize::new(0),
            }
        }

        fn push_drain(&self, result: Result<Vec<ControlEvent>, PollReadError>) {
            self.script.lock().push_back(result);
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }
    }

    impl PortDriver for FakeDriver {
        fn list_ports(&self) -> Vec<String> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.ports.lock().clone()
        }

        fn backends(&self) -> &[BackendHint] {
            &self.backends
        }

        fn open(&self, port: &str, hint: BackendHint) -> Result<Box<dyn DeviceHandle>, OpenError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if *self.good.lock() == Some(hint) {
                Ok(Box::new(FakeHandle {
                    script: Arc::clone(&self.script),
                    closes: Arc::clone(&self.closes),
                }))
            } else {
                Err(OpenError {
                    port: port.to_string(),
                    backend: hint,
                    reason: "rejected by fake".to_string(),
                })
            }
        }
    }

    fn fast_timing() -> PollTiming {
        PollTiming {
            idle_backoff: Duration::from_millis(1),
            drain_pause: Duration::from_millis(1),
            error_cooldown: Duration::from_millis(1),
            max_consecutive_errors: 3,
        }
    }

    fn slider_filter() -> ControlFilter {
        ControlFilter { channel: 10, control: 9 }
    }

    fn link_with(driver: &Arc<FakeDriver>) -> Arc<ControllerLink> {
        Arc::new(ControllerLink::new(
            Arc::clone(driver) as Arc<dyn PortDriver>,
            slider_filter(),
            fast_timing(),
        ))
    }

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        check()
    }

    #[test]
    fn test_connect_is_idempotent() {
        let driver = Arc::new(FakeDriver::new(
            vec!["Fake X-Touch Mini"],
            vec![BackendHint::Default],
            Some(BackendHint::Default),
        ));
        let link = link_with(&driver);

        assert!(link.connect().is_ok());
        assert_eq!(link.status(), ConnectionState::Connected);

        // Second call must not reopen the device
        assert!(link.connect().is_ok());
        assert_eq!(driver.opens(), 1);
    }

    #[test]
    fn test_empty_ports_is_no_device_found() {
        let driver = Arc::new(FakeDriver::new(
            vec![],
            vec![BackendHint::Default],
            Some(BackendHint::Default),
        ));
        let link = link_with(&driver);

        let err = link.connect().unwrap_err();
        assert!(matches!(err, ConnectError::NoDeviceFound));
        assert_eq!(link.status(), ConnectionState::Disconnected);
        assert_eq!(driver.opens(), 0);
    }

    #[test]
    fn test_all_backends_failed_then_fresh_retry() {
        let driver = Arc::new(FakeDriver::new(
            vec!["Fake X-Touch Mini"],
            vec![BackendHint::Default, BackendHint::RtMidi, BackendHint::PortMidi],
            None,
        ));
        let link = link_with(&driver);

        let err = link.connect().unwrap_err();
        match err {
            ConnectError::AllBackendsFailed { port, last } => {
                assert_eq!(port, "Fake X-Touch Mini");
                assert_eq!(last.backend, BackendHint::PortMidi);
            }
            other => panic!("expected AllBackendsFailed, got {:?}", other),
        }
        assert_eq!(link.status(), ConnectionState::Failed);
        assert_eq!(driver.opens(), 3);

        // Failed is not sticky: the next connect re-runs discovery
        *driver.good.lock() = Some(BackendHint::RtMidi);
        assert!(link.connect().is_ok());
        assert_eq!(link.status(), ConnectionState::Connected);
        assert_eq!(driver.list_calls(), 2);
    }

    #[test]
    fn test_disconnect_then_connect_rediscovers() {
        let driver = Arc::new(FakeDriver::new(
            vec!["Fake X-Touch Mini"],
            vec![BackendHint::Default],
            Some(BackendHint::Default),
        ));
        let link = link_with(&driver);

        link.connect().unwrap();
        link.disconnect().unwrap();
        assert_eq!(link.status(), ConnectionState::Disconnected);
        assert_eq!(driver.closes(), 1);

        link.connect().unwrap();
        assert_eq!(driver.opens(), 2);
        assert_eq!(driver.list_calls(), 2);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let driver = Arc::new(FakeDriver::new(
            vec!["Fake X-Touch Mini"],
            vec![BackendHint::Default],
            Some(BackendHint::Default),
        ));
        let link = link_with(&driver);

        assert!(link.disconnect().is_ok());
        assert!(link.disconnect().is_ok());
        assert_eq!(driver.closes(), 0);
    }

    #[test]
    fn test_status_transitions_are_published() {
        let driver = Arc::new(FakeDriver::new(
            vec!["Fake X-Touch Mini"],
            vec![BackendHint::Default],
            Some(BackendHint::Default),
        ));
        let link = link_with(&driver);

        let seen: Arc<PlMutex<Vec<ConnectionState>>> = Arc::new(PlMutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        link.subscribe_status(Arc::new(move |state| seen_cb.lock().push(state)));

        link.connect().unwrap();
        link.disconnect().unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[test]
    fn test_filter_and_ordering() {
        let driver = Arc::new(FakeDriver::new(
            vec!["Fake X-Touch Mini"],
            vec![BackendHint::Default],
            Some(BackendHint::Default),
        ));
        let link = link_with(&driver);
        link.connect().unwrap();

        driver.push_drain(Ok(vec![
            ControlEvent { channel: 10, control: 9, value: 64 },
            ControlEvent { channel: 3, control: 9, value: 10 },  // wrong channel
            ControlEvent { channel: 10, control: 7, value: 10 }, // wrong controller
            ControlEvent { channel: 10, control: 9, value: 127 },
        ]));

        let levels: Arc<PlMutex<Vec<f32>>> = Arc::new(PlMutex::new(Vec::new()));
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = {
            let link = Arc::clone(&link);
            let cancel = Arc::clone(&cancel);
            let levels = Arc::clone(&levels);
            std::thread::spawn(move || {
                link.run_polling_loop(&cancel, |level| levels.lock().push(level));
            })
        };

        assert!(wait_until(2000, || levels.lock().len() == 2));
        cancel.store(true, Ordering::Relaxed);
        worker.join().unwrap();

        let levels = levels.lock();
        assert!((levels[0] - 0.504).abs() < 0.001);
        assert_eq!(levels[1], 1.0);
    }

    #[test]
    fn test_single_read_error_recovers() {
        let driver = Arc::new(FakeDriver::new(
            vec!["Fake X-Touch Mini"],
            vec![BackendHint::Default],
            Some(BackendHint::Default),
        ));
        let link = link_with(&driver);
        link.connect().unwrap();

        driver.push_drain(Err(PollReadError { reason: "transient".to_string() }));
        driver.push_drain(Ok(vec![ControlEvent { channel: 10, control: 9, value: 127 }]));

        let levels: Arc<PlMutex<Vec<f32>>> = Arc::new(PlMutex::new(Vec::new()));
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = {
            let link = Arc::clone(&link);
            let cancel = Arc::clone(&cancel);
            let levels = Arc::clone(&levels);
            std::thread::spawn(move || {
                link.run_polling_loop(&cancel, |level| levels.lock().push(level));
            })
        };

        assert!(wait_until(2000, || !levels.lock().is_empty()));
        cancel.store(true, Ordering::Relaxed);
        worker.join().unwrap();

        // One error does not drop the connection
        assert_eq!(link.status(), ConnectionState::Connected);
    }

    #[test]
    fn test_consecutive_read_errors_drop_connection() {
        let driver = Arc::new(FakeDriver::new(
            vec!["Fake X-Touch Mini"],
            vec![BackendHint::Default],
            Some(BackendHint::Default),
        ));
        let link = link_with(&driver);
        link.connect().unwrap();

        for _ in 0..3 {
            driver.push_drain(Err(PollReadError { reason: "unplugged".to_string() }));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let worker = {
            let link = Arc::clone(&link);
            let cancel = Arc::clone(&cancel);
            std::thread::spawn(move || {
                link.run_polling_loop(&cancel, |_| {});
            })
        };

        assert!(wait_until(2000, || link.status() == ConnectionState::Disconnected));
        cancel.store(true, Ordering::Relaxed);
        worker.join().unwrap();

        // The dead handle was closed, and the loop did not reconnect
        assert_eq!(driver.closes(), 1);
        assert_eq!(driver.opens(), 1);
    }

    #[test]
    fn test_cancel_stops_the_loop() {
        let driver = Arc::new(FakeDriver::new(
            vec![],
            vec![BackendHint::Default],
            None,
        ));
        let link = link_with(&driver);

        let cancel = Arc::new(AtomicBool::new(false));
        let worker = {
            let link = Arc::clone(&link);
            let cancel = Arc::clone(&cancel);
            std::thread::spawn(move || {
                link.run_polling_loop(&cancel, |_| {});
            })
        };

        cancel.store(true, Ordering::Relaxed);
        assert!(wait_until(2000, || worker.is_finished()));
        worker.join().unwrap();
    }
}
