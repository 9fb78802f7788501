//! uinput virtual keyboard sink
//!
//! The device node under /dev/uinput is only writable by root, so the
//! keyboard is created during the elevated bootstrap and the open file
//! descriptor is carried across the privilege drop. After the drop the
//! process keeps emitting through it without any further privilege.

use super::keymap;
use super::KeySink;
use crate::error::{InjectError, PrivilegeError};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key};
use std::time::Duration;

const DEVICE_NAME: &str = "voxkey virtual keyboard";

/// Virtual keyboard backed by a uinput device.
pub struct UinputKeyboard {
    device: VirtualDevice,
    key_delay: Duration,
}

impl UinputKeyboard {
    /// Create the device. Must be called while still elevated.
    pub fn create() -> Result<Self, PrivilegeError> {
        let mut keys = AttributeSet::<Key>::new();
        for key in keymap::registered_keys() {
            keys.insert(key);
        }

        let device = VirtualDeviceBuilder::new()
            .and_then(|b| b.name(DEVICE_NAME).with_keys(&keys))
            .and_then(|b| b.build())
            .map_err(|e| PrivilegeError::DeviceCreate(e.to_string()))?;

        tracing::info!("Created uinput virtual keyboard '{}'", DEVICE_NAME);

        Ok(Self {
            device,
            key_delay: Duration::ZERO,
        })
    }

    /// Pace keystroke emission. Set once config is available; the device
    /// itself is created before the config is loaded.
    pub fn set_key_delay(&mut self, delay: Duration) {
        self.key_delay = delay;
    }

    /// Press and release a key, holding shift around it if needed.
    fn tap(&mut self, key: Key, shifted: bool) -> Result<(), InjectError> {
        let mut events = Vec::with_capacity(4);
        if shifted {
            events.push(key_event(Key::KEY_LEFTSHIFT, 1));
        }
        events.push(key_event(key, 1));
        events.push(key_event(key, 0));
        if shifted {
            events.push(key_event(Key::KEY_LEFTSHIFT, 0));
        }

        self.device
            .emit(&events)
            .map_err(|e| InjectError::DeviceWrite(e.to_string()))?;

        if !self.key_delay.is_zero() {
            std::thread::sleep(self.key_delay);
        }
        Ok(())
    }
}

fn key_event(key: Key, value: i32) -> InputEvent {
    InputEvent::new(EventType::KEY, key.code(), value)
}

impl KeySink for UinputKeyboard {
    fn type_char(&mut self, c: char) -> Result<bool, InjectError> {
        match keymap::key_for_char(c) {
            Some((key, shifted)) => {
                self.tap(key, shifted)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn backspace(&mut self, count: usize) -> Result<(), InjectError> {
        for _ in 0..count {
            self.tap(Key::KEY_BACKSPACE, false)?;
        }
        Ok(())
    }
}
