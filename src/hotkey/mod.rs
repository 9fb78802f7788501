//! Hotkey detection module
//!
//! Kernel-level key event detection using evdev. This works on all
//! Wayland compositors because it operates at the Linux input subsystem
//! level, below the display server.
//!
//! Requires the invoking user to be in the 'input' group (the daemon has
//! already dropped its elevated privileges by the time the listener opens
//! any device).

#[cfg(target_os = "linux")]
pub mod evdev_listener;

use crate::config::HotkeyConfig;
use crate::error::HotkeyError;
use tokio::sync::mpsc;

/// Events emitted by the hotkey listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// The activation key was pressed
    Pressed,
    /// The activation key was released
    Released,
    /// The distinct stop key was pressed (two-pedal mode)
    StopPressed,
}

/// Trait for hotkey detection implementations
#[async_trait::async_trait]
pub trait HotkeyListener: Send + Sync {
    /// Start listening for hotkey events.
    /// Returns a channel receiver for events.
    async fn start(&mut self) -> Result<mpsc::Receiver<HotkeyEvent>, HotkeyError>;

    /// Stop listening and clean up
    async fn stop(&mut self) -> Result<(), HotkeyError>;
}

/// Factory function to create the hotkey listener for this platform
#[cfg(target_os = "linux")]
pub fn create_listener(config: &HotkeyConfig) -> Result<Box<dyn HotkeyListener>, HotkeyError> {
    Ok(Box::new(evdev_listener::EvdevListener::new(config)?))
}

#[cfg(not(target_os = "linux"))]
pub fn create_listener(_config: &HotkeyConfig) -> Result<Box<dyn HotkeyListener>, HotkeyError> {
    Err(HotkeyError::Evdev(
        "hotkey detection requires the Linux input subsystem".to_string(),
    ))
}
