//! Controller command payloads.
//!
//! ```json
//! {
//!   "connected": true,
//!   "buttons": {"a": true, "start": false},
//!   "mainStick": {"x": 255, "y": 128},
//!   "cStick": {"x": 128, "y": 128},
//!   "triggers": {"l": 0, "r": 255},
//!   "frames": 10
//! }
//! ```
//!
//! Only `buttons` is required. Buttons left out are released, sticks left
//! out are centred and triggers left out are zero.

use emu_core::pad::STICK_CENTER;
use emu_core::{PadButton, PadStatus};
use serde::Deserialize;

use crate::input::TimedOverlay;

/// Button flags, keyed by their lower-case names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ButtonSet {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub z: bool,
    pub start: bool,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub l: bool,
    pub r: bool,
}

impl ButtonSet {
    #[must_use]
    pub fn is_set(&self, button: PadButton) -> bool {
        match button {
            PadButton::A => self.a,
            PadButton::B => self.b,
            PadButton::X => self.x,
            PadButton::Y => self.y,
            PadButton::Z => self.z,
            PadButton::Start => self.start,
            PadButton::Up => self.up,
            PadButton::Down => self.down,
            PadButton::Left => self.left,
            PadButton::Right => self.right,
            PadButton::L => self.l,
            PadButton::R => self.r,
        }
    }

    /// Pad button word.
    #[must_use]
    pub fn mask(&self) -> u16 {
        PadButton::ALL
            .iter()
            .filter(|&&b| self.is_set(b))
            .fold(0, |acc, b| acc | b.mask())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StickPosition {
    pub x: u8,
    pub y: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TriggerValues {
    pub l: u8,
    pub r: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnalogValues {
    pub a: u8,
    pub b: u8,
}

fn connected_default() -> bool {
    true
}

/// A full controller command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerCommand {
    #[serde(default = "connected_default")]
    pub connected: bool,
    pub buttons: ButtonSet,
    #[serde(default)]
    pub main_stick: Option<StickPosition>,
    #[serde(default)]
    pub c_stick: Option<StickPosition>,
    #[serde(default)]
    pub triggers: TriggerValues,
    #[serde(default)]
    pub analog: AnalogValues,
    /// Zero latches the state; anything else holds it for that many frames.
    #[serde(default)]
    pub frames: u32,
}

impl ControllerCommand {
    /// Pad state described by this command.
    #[must_use]
    pub fn to_pad(&self) -> PadStatus {
        let main = self.main_stick.unwrap_or(StickPosition {
            x: STICK_CENTER,
            y: STICK_CENTER,
        });
        let sub = self.c_stick.unwrap_or(StickPosition {
            x: STICK_CENTER,
            y: STICK_CENTER,
        });
        PadStatus {
            buttons: self.buttons.mask(),
            stick_x: main.x,
            stick_y: main.y,
            substick_x: sub.x,
            substick_y: sub.y,
            trigger_left: self.triggers.l,
            trigger_right: self.triggers.r,
            analog_a: self.analog.a,
            analog_b: self.analog.b,
            connected: self.connected,
        }
    }

    /// Timed overlay for this command, if `frames` is non-zero.
    ///
    /// Only sticks the command actually names are carried, so an overlay
    /// that presses A for ten frames leaves the latched stick alone.
    #[must_use]
    pub fn overlay(&self) -> Option<TimedOverlay> {
        if self.frames == 0 {
            return None;
        }
        let mut overlay = TimedOverlay::new(self.buttons.mask(), self.frames);
        if let Some(s) = self.main_stick {
            overlay = overlay.with_stick(s.x, s.y);
        }
        if let Some(s) = self.c_stick {
            overlay = overlay.with_substick(s.x, s.y);
        }
        Some(overlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::pad::button;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<ControllerCommand, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn minimal_command() {
        let cmd = parse(json!({"buttons": {"a": true, "start": true}})).expect("parse");
        assert!(cmd.connected);
        assert_eq!(cmd.frames, 0);
        let pad = cmd.to_pad();
        assert_eq!(pad.buttons, button::A | button::START);
        assert_eq!(pad.stick_x, STICK_CENTER);
        assert_eq!(pad.trigger_left, 0);
        assert!(cmd.overlay().is_none());
    }

    #[test]
    fn full_command() {
        let cmd = parse(json!({
            "connected": false,
            "buttons": {"l": true, "r": true, "left": true},
            "mainStick": {"x": 0, "y": 255},
            "cStick": {"x": 10, "y": 20},
            "triggers": {"l": 30, "r": 40},
            "analog": {"a": 50},
        }))
        .expect("parse");
        let pad = cmd.to_pad();
        assert_eq!(pad.buttons, button::L | button::R | button::LEFT);
        assert_eq!((pad.stick_x, pad.stick_y), (0, 255));
        assert_eq!((pad.substick_x, pad.substick_y), (10, 20));
        assert_eq!((pad.trigger_left, pad.trigger_right), (30, 40));
        assert_eq!((pad.analog_a, pad.analog_b), (50, 0));
        assert!(!pad.connected);
    }

    #[test]
    fn buttons_are_required() {
        assert!(parse(json!({"frames": 3})).is_err());
    }

    #[test]
    fn out_of_range_axis_is_rejected() {
        assert!(parse(json!({"buttons": {}, "mainStick": {"x": 256, "y": 0}})).is_err());
        assert!(parse(json!({"buttons": {"a": "yes"}})).is_err());
    }

    #[test]
    fn overlay_only_carries_named_sticks() {
        let cmd = parse(json!({"buttons": {"b": true}, "cStick": {"x": 0, "y": 0}, "frames": 5}))
            .expect("parse");
        let overlay = cmd.overlay().expect("overlay");
        assert_eq!(overlay, TimedOverlay::new(button::B, 5).with_substick(0, 0));
    }
}
