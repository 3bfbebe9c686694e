//! Synthetic controller input.
//!
//! Each port carries three layers:
//! 1. A persistent latch, replaced wholesale by `controller` requests.
//! 2. Timed overlays, each active for a fixed number of frame advances.
//! 3. Live hardware input, merged last.
//!
//! The simulation loop calls [`InputEngine::advance_frame`] once per frame
//! for each port and only then [`InputEngine::status`]. The host does both
//! under one lock through [`InputEngine::next_frame`], so an overlay queued
//! with `frames: n` is seen on exactly `n - 1` emulated frames.

use std::collections::VecDeque;

use emu_core::pad::STICK_CENTER;
use emu_core::{PORT_COUNT, PadStatus};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// A button/axis override active for a fixed number of frames.
///
/// Triggers and analog pressure are never carried by overlays; only the
/// persistent latch sets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOverlay {
    pub buttons: u16,
    pub stick: Option<(u8, u8)>,
    pub substick: Option<(u8, u8)>,
    pub remaining_frames: u32,
}

impl TimedOverlay {
    /// Buttons only, for `frames` frames.
    #[must_use]
    pub fn new(buttons: u16, frames: u32) -> Self {
        Self {
            buttons,
            stick: None,
            substick: None,
            remaining_frames: frames,
        }
    }

    /// Override the main stick.
    #[must_use]
    pub fn with_stick(mut self, x: u8, y: u8) -> Self {
        self.stick = Some((x, y));
        self
    }

    /// Override the C-stick.
    #[must_use]
    pub fn with_substick(mut self, x: u8, y: u8) -> Self {
        self.substick = Some((x, y));
        self
    }

}

/// Synthetic state of one port.
#[derive(Debug, Clone)]
struct PortInput {
    enabled: bool,
    persistent: PadStatus,
    /// Only entries with `remaining_frames > 0`.
    timed: VecDeque<TimedOverlay>,
}

impl PortInput {
    fn new() -> Self {
        Self {
            enabled: true,
            persistent: PadStatus::NEUTRAL,
            timed: VecDeque::new(),
        }
    }

    /// Persistent latch with every active overlay applied in queue order.
    fn synthetic(&self) -> PadStatus {
        let mut pad = self.persistent;
        for overlay in &self.timed {
            pad.buttons |= overlay.buttons;
            // Most recently queued overlay wins per stick.
            if let Some((x, y)) = overlay.stick {
                pad.stick_x = x;
                pad.stick_y = y;
            }
            if let Some((x, y)) = overlay.substick {
                pad.substick_x = x;
                pad.substick_y = y;
            }
        }
        pad
    }

    fn advance(&mut self) {
        for overlay in &mut self.timed {
            overlay.remaining_frames = overlay.remaining_frames.saturating_sub(1);
        }
        self.timed.retain(|o| o.remaining_frames > 0);
    }

    fn status(&self, live: PadStatus) -> PadStatus {
        if self.enabled {
            merge(&self.synthetic(), &live)
        } else {
            live
        }
    }
}

/// Per-port synthetic input, shared between request threads and the
/// simulation thread. Each port has its own lock.
pub struct InputEngine {
    ports: [Mutex<PortInput>; PORT_COUNT],
}

impl InputEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ports: std::array::from_fn(|_| Mutex::new(PortInput::new())),
        }
    }

    fn port(&self, port: usize) -> Option<&Mutex<PortInput>> {
        let slot = self.ports.get(port);
        if slot.is_none() {
            warn!(port, "ignoring input for nonexistent port");
        }
        slot
    }

    /// Replace the persistent latch. Returns false for an invalid port.
    pub fn set_persistent(&self, port: usize, pad: PadStatus) -> bool {
        let Some(slot) = self.port(port) else {
            return false;
        };
        slot.lock().persistent = pad;
        debug!(port, buttons = format_args!("{:#06X}", pad.buttons), "persistent input set");
        true
    }

    /// Enable or disable synthetic input. Re-enabling a disabled port resets
    /// its latch to neutral so no stale press resumes.
    pub fn set_enabled(&self, port: usize, enabled: bool) -> bool {
        let Some(slot) = self.port(port) else {
            return false;
        };
        let mut state = slot.lock();
        if enabled && !state.enabled {
            state.persistent = PadStatus::NEUTRAL;
        }
        state.enabled = enabled;
        debug!(port, enabled, "synthetic input toggled");
        true
    }

    /// Queue a timed overlay. Overlays for zero frames are dropped.
    /// Returns true if the overlay was queued.
    pub fn queue_timed(&self, port: usize, overlay: TimedOverlay) -> bool {
        if overlay.remaining_frames == 0 {
            return false;
        }
        let Some(slot) = self.port(port) else {
            return false;
        };
        let mut state = slot.lock();
        state.timed.push_back(overlay);
        debug!(
            port,
            frames = overlay.remaining_frames,
            queued = state.timed.len(),
            "timed input queued"
        );
        true
    }

    /// Count one frame against every overlay on `port` and evict the
    /// expired ones.
    pub fn advance_frame(&self, port: usize) {
        let Some(slot) = self.port(port) else {
            return;
        };
        slot.lock().advance();
    }

    /// Pad state to feed the machine for `port` this frame.
    ///
    /// Disabled ports (and invalid ones) pass `live` through untouched.
    #[must_use]
    pub fn status(&self, port: usize, live: PadStatus) -> PadStatus {
        let Some(slot) = self.ports.get(port) else {
            return live;
        };
        slot.lock().status(live)
    }

    /// [`advance_frame`](Self::advance_frame) followed by
    /// [`status`](Self::status) under a single lock, so a request thread
    /// cannot queue an overlay between the two.
    #[must_use]
    pub fn next_frame(&self, port: usize, live: PadStatus) -> PadStatus {
        let Some(slot) = self.port(port) else {
            return live;
        };
        let mut state = slot.lock();
        state.advance();
        state.status(live)
    }

    /// Synthetic state for `port` before merging with live input.
    #[must_use]
    pub fn synthetic(&self, port: usize) -> Option<PadStatus> {
        self.ports.get(port).map(|slot| slot.lock().synthetic())
    }

    /// Whether synthetic input is enabled on `port`.
    #[must_use]
    pub fn is_enabled(&self, port: usize) -> bool {
        self.ports.get(port).is_some_and(|slot| slot.lock().enabled)
    }

    /// Number of active timed overlays on `port`.
    #[must_use]
    pub fn timed_len(&self, port: usize) -> usize {
        self.ports.get(port).map_or(0, |slot| slot.lock().timed.len())
    }
}

impl Default for InputEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Squared distance of a stick position from centre.
fn stick_distance(x: u8, y: u8) -> i32 {
    let dx = i32::from(x) - i32::from(STICK_CENTER);
    let dy = i32::from(y) - i32::from(STICK_CENTER);
    dx * dx + dy * dy
}

/// Pick the stick position farther from centre. Ties keep `a`.
fn farther(a: (u8, u8), b: (u8, u8)) -> (u8, u8) {
    if stick_distance(b.0, b.1) > stick_distance(a.0, a.1) {
        b
    } else {
        a
    }
}

/// Merge synthetic and live pad state.
///
/// Buttons and connection are OR'd, triggers and analog pressure take the
/// maximum, and each stick takes whichever position is farther from centre
/// with X and Y kept together.
#[must_use]
pub fn merge(synthetic: &PadStatus, live: &PadStatus) -> PadStatus {
    let (stick_x, stick_y) = farther(
        (synthetic.stick_x, synthetic.stick_y),
        (live.stick_x, live.stick_y),
    );
    let (substick_x, substick_y) = farther(
        (synthetic.substick_x, synthetic.substick_y),
        (live.substick_x, live.substick_y),
    );

    PadStatus {
        buttons: synthetic.buttons | live.buttons,
        stick_x,
        stick_y,
        substick_x,
        substick_y,
        trigger_left: synthetic.trigger_left.max(live.trigger_left),
        trigger_right: synthetic.trigger_right.max(live.trigger_right),
        analog_a: synthetic.analog_a.max(live.analog_a),
        analog_b: synthetic.analog_b.max(live.analog_b),
        connected: synthetic.connected || live.connected,
    }
}
