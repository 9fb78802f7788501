//! Error types for voxkey
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues. Fatal startup errors
//! carry distinct exit codes so wrapper tooling can tell causes apart.

use thiserror::Error;

/// Exit code for a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Exit code for an unhandled pipeline error.
pub const EXIT_PIPELINE: i32 = 1;
/// Exit code when the process was started without elevation.
pub const EXIT_NO_ELEVATION: i32 = 10;
/// Exit code when the uinput virtual keyboard could not be created.
pub const EXIT_DEVICE_CREATE: i32 = 11;
/// Exit code when the privilege drop failed.
pub const EXIT_PRIV_DROP: i32 = 12;

/// Top-level error type for the voxkey application
#[derive(Error, Debug)]
pub enum VoxkeyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Privilege error: {0}")]
    Privilege(#[from] PrivilegeError),

    #[error("Hotkey error: {0}")]
    Hotkey(#[from] HotkeyError),

    #[error("Audio capture error: {0}")]
    Audio(#[from] AudioError),

    #[error("Speech-to-text stream error: {0}")]
    Stt(#[from] SttError),

    #[error("Text injection error: {0}")]
    Inject(#[from] InjectError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoxkeyError {
    /// Map this error to a process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            VoxkeyError::Privilege(e) => e.exit_code(),
            _ => EXIT_PIPELINE,
        }
    }
}

/// Errors from the elevated bootstrap and privilege drop
#[derive(Error, Debug)]
pub enum PrivilegeError {
    #[error("voxkey must be started with elevated privileges to create the virtual keyboard.\n  Run: sudo -E voxkey\n  (the uinput device can only be created by root)")]
    NotElevated,

    #[error("Failed to create uinput virtual keyboard: {0}\n  Is the uinput kernel module loaded? Try: sudo modprobe uinput")]
    DeviceCreate(String),

    #[error("Cannot determine the invoking user: {0}\n  Start voxkey via sudo so SUDO_UID/SUDO_GID are set.")]
    NoInvokingUser(String),

    #[error("Privilege drop failed: {0}")]
    DropFailed(String),

    #[error("Privilege drop could not be verified; refusing to continue elevated")]
    DropNotVerified,
}

impl PrivilegeError {
    /// Distinct exit codes per fatal-startup cause.
    pub fn exit_code(&self) -> i32 {
        match self {
            PrivilegeError::NotElevated => EXIT_NO_ELEVATION,
            PrivilegeError::DeviceCreate(_) => EXIT_DEVICE_CREATE,
            PrivilegeError::NoInvokingUser(_)
            | PrivilegeError::DropFailed(_)
            | PrivilegeError::DropNotVerified => EXIT_PRIV_DROP,
        }
    }
}

/// Errors related to hotkey detection
#[derive(Error, Debug)]
pub enum HotkeyError {
    #[error("Cannot open input device '{0}'. Is the user in the 'input' group?\n  Run: sudo usermod -aG input $USER\n  Then log out and back in.")]
    DeviceAccess(String),

    #[error("Unknown key name: '{0}'. Use evtest or wev to find valid key names.")]
    UnknownKey(String),

    #[error("No keyboard device found in /dev/input/")]
    NoKeyboard,

    #[error("Two-pedal mode requires a stop_key in the [hotkey] config section")]
    MissingStopKey,

    #[error("evdev error: {0}")]
    Evdev(String),
}

/// Errors related to audio capture
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio connection failed: {0}")]
    Connection(String),

    #[error("Audio device not found: '{0}'. List devices with: pactl list sources short")]
    DeviceNotFound(String),

    #[error("Audio device not found: '{requested}'\n{available}")]
    DeviceNotFoundWithList { requested: String, available: String },

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Audio capture did not stop within {0} seconds")]
    StopTimeout(u64),
}

/// Errors related to the streaming speech-to-text connection
#[derive(Error, Debug)]
pub enum SttError {
    #[error("Invalid STT endpoint '{0}': {1}")]
    BadEndpoint(String, String),

    #[error("API credential missing: set the {0} environment variable")]
    MissingCredential(String),

    #[error("STT backend rejected the credential: {0}")]
    AuthRejected(String),

    #[error("STT backend reported an error ({code}): {message}")]
    Backend { code: String, message: String },

    #[error("Connection to STT backend lost and {attempts} reconnect attempts failed: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("STT protocol violation: {0}")]
    Protocol(String),

    #[error("Timed out waiting for the backend to flush final transcripts")]
    FlushTimeout,

    #[error("Websocket error: {0}")]
    Websocket(String),
}

/// Errors related to text injection
#[derive(Error, Debug)]
pub enum InjectError {
    #[error("Virtual keyboard write failed: {0}")]
    DeviceWrite(String),
}

/// Result type alias using VoxkeyError
pub type Result<T> = std::result::Result<T, VoxkeyError>;

#[cfg(target_os = "linux")]
impl From<evdev::Error> for HotkeyError {
    fn from(e: evdev::Error) -> Self {
        HotkeyError::Evdev(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_startup_exit_codes_are_distinct() {
        let codes = [
            PrivilegeError::NotElevated.exit_code(),
            PrivilegeError::DeviceCreate("x".into()).exit_code(),
            PrivilegeError::DropFailed("x".into()).exit_code(),
        ];
        assert_eq!(codes[0], EXIT_NO_ELEVATION);
        assert_eq!(codes[1], EXIT_DEVICE_CREATE);
        assert_eq!(codes[2], EXIT_PRIV_DROP);
        assert!(codes.iter().all(|&c| c != 0));
    }

    #[test]
    fn test_pipeline_errors_use_generic_code() {
        let err = VoxkeyError::Audio(AudioError::DeviceNotFound("mic".into()));
        assert_eq!(err.exit_code(), EXIT_PIPELINE);
    }
}
