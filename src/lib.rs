//! voxkey - hands-free dictation for Wayland
//!
//! A push-to-talk dictation daemon: a global hotkey starts microphone
//! capture, audio streams to a cloud speech-to-text backend over a
//! websocket, and recognized text is typed into the focused window
//! through a uinput virtual keyboard. Because both hotkey detection and
//! injection happen at the kernel input layer, it works on any Wayland
//! compositor (and on X11) without compositor-specific protocols.
//!
//! The process starts elevated, creates the virtual keyboard, drops to
//! the invoking user, and only then touches audio or the network.

pub mod audio;
pub mod config;
pub mod daemon;
pub mod error;
pub mod hotkey;
pub mod inject;
#[cfg(target_os = "linux")]
pub mod privilege;
pub mod session;
pub mod stt;

pub use config::Config;
pub use error::{Result, VoxkeyError};
