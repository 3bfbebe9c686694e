//! The machine under control.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{Framebuffer, GuestMemory, PORT_COUNT, PadStatus};

/// Highest numbered save-state slot.
pub const MAX_STATE_SLOT: u8 = 99;

/// Whether the machine advances frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RunState {
    #[default]
    Running,
    Paused,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Where a save state is written to or read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTarget {
    /// Numbered slot, `0..=MAX_STATE_SLOT`.
    Slot(u8),
    /// Explicit file path.
    Path(PathBuf),
}

impl StateTarget {
    /// Slot target, or `None` if the number is out of range.
    #[must_use]
    pub fn slot(number: u64) -> Option<Self> {
        u8::try_from(number)
            .ok()
            .filter(|&n| n <= MAX_STATE_SLOT)
            .map(Self::Slot)
    }
}

impl fmt::Display for StateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot(n) => write!(f, "slot {n}"),
            Self::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Summary of a stored save state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    /// Frames emulated since boot when the state was written.
    pub frame: u64,
    /// Image that was running, if any.
    pub game: Option<PathBuf>,
}

/// Errors reported by a machine.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no save state in slot {0}")]
    EmptySlot(u8),

    #[error("invalid save state: {0}")]
    InvalidState(String),

    #[error("boot failed: {0}")]
    Boot(String),
}

/// A frame-stepped machine.
///
/// Every method runs on the machine's own thread. Other threads reach the
/// machine only through jobs queued to that thread.
pub trait Machine: GuestMemory {
    /// Current run state.
    fn run_state(&self) -> RunState;

    /// Transition to `state`. Transitioning to the current state is a no-op.
    fn set_run_state(&mut self, state: RunState);

    /// Write a save state.
    fn save_state(&mut self, target: &StateTarget) -> Result<(), MachineError>;

    /// Restore a save state.
    fn load_state(&mut self, target: &StateTarget) -> Result<(), MachineError>;

    /// Describe the save state at `target` without loading it.
    /// Returns `None` if nothing has been saved there.
    fn state_info(&self, target: &StateTarget) -> Result<Option<StateInfo>, MachineError>;

    /// Load a game image and start it from reset.
    fn boot(&mut self, path: &Path) -> Result<(), MachineError>;

    /// Pad state reported by the physical controller on `port`.
    fn live_pad(&self, port: usize) -> PadStatus;

    /// Emulate one frame with the given pad states latched for every port.
    fn run_frame(&mut self, pads: &[PadStatus; PORT_COUNT]);

    /// Snapshot of the last completed frame, if video is available.
    fn framebuffer(&self) -> Option<Framebuffer>;
}
