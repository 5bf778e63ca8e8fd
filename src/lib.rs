//! X-Touch volume controller
//!
//! Maps the Behringer X-Touch Mini slider to the system master volume,
//! with a tray icon, an on-screen volume indicator and global hotkeys
//! for releasing and reclaiming the device.

pub mod app;
pub mod config;
pub mod hotkeys;
pub mod link;
pub mod midi;
pub mod osd;
pub mod sink;
pub mod tray;

pub use config::AppConfig;
pub use link::{ConnectionState, ControllerLink};
