//! Controller pad state.
//!
//! The layout follows the GameCube pad: a 16-bit button word, two analog
//! sticks centred at 128, two analog triggers, and analog A/B pressure.

/// Button bit masks in the pad button word.
pub mod button {
    pub const LEFT: u16 = 0x0001;
    pub const RIGHT: u16 = 0x0002;
    pub const DOWN: u16 = 0x0004;
    pub const UP: u16 = 0x0008;
    pub const Z: u16 = 0x0010;
    pub const R: u16 = 0x0020;
    pub const L: u16 = 0x0040;
    pub const A: u16 = 0x0100;
    pub const B: u16 = 0x0200;
    pub const X: u16 = 0x0400;
    pub const Y: u16 = 0x0800;
    pub const START: u16 = 0x1000;
}

/// Neutral stick axis value.
pub const STICK_CENTER: u8 = 128;

/// Logical button on the pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadButton {
    A,
    B,
    X,
    Y,
    Z,
    Start,
    Up,
    Down,
    Left,
    Right,
    L,
    R,
}

impl PadButton {
    /// Every button, in wire order.
    pub const ALL: [Self; 12] = [
        Self::A,
        Self::B,
        Self::X,
        Self::Y,
        Self::Z,
        Self::Start,
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::L,
        Self::R,
    ];

    /// Return the mask for this button.
    #[must_use]
    pub const fn mask(self) -> u16 {
        match self {
            Self::A => button::A,
            Self::B => button::B,
            Self::X => button::X,
            Self::Y => button::Y,
            Self::Z => button::Z,
            Self::Start => button::START,
            Self::Up => button::UP,
            Self::Down => button::DOWN,
            Self::Left => button::LEFT,
            Self::Right => button::RIGHT,
            Self::L => button::L,
            Self::R => button::R,
        }
    }
}

/// Full state of one pad for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PadStatus {
    /// Pressed buttons, see [`button`].
    pub buttons: u16,
    pub stick_x: u8,
    pub stick_y: u8,
    pub substick_x: u8,
    pub substick_y: u8,
    pub trigger_left: u8,
    pub trigger_right: u8,
    pub analog_a: u8,
    pub analog_b: u8,
    pub connected: bool,
}

impl PadStatus {
    /// Centred sticks, nothing pressed, connected.
    pub const NEUTRAL: Self = Self {
        buttons: 0,
        stick_x: STICK_CENTER,
        stick_y: STICK_CENTER,
        substick_x: STICK_CENTER,
        substick_y: STICK_CENTER,
        trigger_left: 0,
        trigger_right: 0,
        analog_a: 0,
        analog_b: 0,
        connected: true,
    };

    /// Whether `button` is held.
    #[must_use]
    pub const fn is_pressed(&self, button: PadButton) -> bool {
        self.buttons & button.mask() != 0
    }

    /// Set a button state (true = pressed).
    pub fn set_button(&mut self, button: PadButton, pressed: bool) {
        if pressed {
            self.buttons |= button.mask();
        } else {
            self.buttons &= !button.mask();
        }
    }
}

impl Default for PadStatus {
    fn default() -> Self {
        Self::NEUTRAL
    }
}
