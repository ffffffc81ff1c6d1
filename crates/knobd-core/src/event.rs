use std::time::SystemTime;

use thiserror::Error;

/// Griffin PowerMate USB identifiers.
pub const VENDOR_ID: u16 = 0x077d;
pub const PRODUCT_ID: u16 = 0x0410;

/// Linux input event types (`linux/input-event-codes.h`).
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_MSC: u16 = 0x04;

/// The knob's push button.
pub const BTN_0: u16 = 0x100;
/// The knob's rotation axis.
pub const REL_DIAL: u16 = 0x07;
/// LED control on the PowerMate.
pub const MSC_PULSELED: u16 = 0x01;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("input device I/O error: {0}")]
    Io(String),
    #[error("input device not found (VID={vendor:#06x}, PID={product:#06x})")]
    NotFound { vendor: u16, product: u16 },
    #[error("input device closed")]
    Closed,
}

/// What a raw kernel event means to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Button,
    Rotation,
    /// Synchronization reports, LED echoes, and anything else the knob emits.
    Ignored,
}

/// Button values reported by the kernel on `EV_KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Released,
    Pressed,
    Repeat,
}

impl ButtonState {
    #[must_use]
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(ButtonState::Released),
            1 => Some(ButtonState::Pressed),
            2 => Some(ButtonState::Repeat),
            _ => None,
        }
    }
}

/// A single event as read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: EventKind,
    pub code: u16,
    pub value: i32,
    pub timestamp: SystemTime,
}

impl RawEvent {
    /// Classify a kernel `(type, code, value)` triple.
    ///
    /// Only `EV_KEY/BTN_0` and `EV_REL/REL_DIAL` are meaningful; every other
    /// combination is kept as [`EventKind::Ignored`] so the caller can still
    /// log it.
    #[must_use]
    pub fn from_kernel(event_type: u16, code: u16, value: i32, timestamp: SystemTime) -> Self {
        let kind = match (event_type, code) {
            (EV_KEY, BTN_0) => EventKind::Button,
            (EV_REL, REL_DIAL) => EventKind::Rotation,
            _ => EventKind::Ignored,
        };
        RawEvent {
            kind,
            code,
            value,
            timestamp,
        }
    }

    #[must_use]
    pub fn button(pressed: bool, timestamp: SystemTime) -> Self {
        RawEvent {
            kind: EventKind::Button,
            code: BTN_0,
            value: i32::from(pressed),
            timestamp,
        }
    }

    #[must_use]
    pub fn rotation(delta: i32, timestamp: SystemTime) -> Self {
        RawEvent {
            kind: EventKind::Rotation,
            code: REL_DIAL,
            value: delta,
            timestamp,
        }
    }

    /// Returns true for events the classifier acts on.
    #[must_use]
    pub fn is_relevant(&self) -> bool {
        self.kind != EventKind::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_button_maps_to_button() {
        let ev = RawEvent::from_kernel(EV_KEY, BTN_0, 1, SystemTime::UNIX_EPOCH);
        assert_eq!(ev.kind, EventKind::Button);
        assert_eq!(ButtonState::from_value(ev.value), Some(ButtonState::Pressed));
    }

    #[test]
    fn kernel_dial_maps_to_rotation() {
        let ev = RawEvent::from_kernel(EV_REL, REL_DIAL, -2, SystemTime::UNIX_EPOCH);
        assert_eq!(ev.kind, EventKind::Rotation);
        assert_eq!(ev.value, -2);
    }

    #[test]
    fn sync_and_other_codes_are_ignored() {
        let now = SystemTime::UNIX_EPOCH;
        assert_eq!(RawEvent::from_kernel(EV_SYN, 0, 0, now).kind, EventKind::Ignored);
        assert_eq!(
            RawEvent::from_kernel(EV_MSC, MSC_PULSELED, 255, now).kind,
            EventKind::Ignored
        );
        // Other relative axes and keys are not part of the knob
        assert_eq!(RawEvent::from_kernel(EV_REL, 0x00, 1, now).kind, EventKind::Ignored);
        assert_eq!(RawEvent::from_kernel(EV_KEY, 0x101, 1, now).kind, EventKind::Ignored);
        assert!(!RawEvent::from_kernel(EV_SYN, 0, 0, now).is_relevant());
    }

    #[test]
    fn button_state_values() {
        assert_eq!(ButtonState::from_value(0), Some(ButtonState::Released));
        assert_eq!(ButtonState::from_value(2), Some(ButtonState::Repeat));
        assert_eq!(ButtonState::from_value(7), None);
    }
}
