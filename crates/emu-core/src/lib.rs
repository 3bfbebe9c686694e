//! Core traits and types for a frame-stepped machine under remote control.
//!
//! The machine owns its memory and run state. Everything that touches them
//! runs on the machine's own thread; these traits are the only surface the
//! control plane sees.

mod frame;
mod machine;
mod memory;
pub mod pad;

pub use frame::Framebuffer;
pub use machine::{Machine, MachineError, RunState, StateInfo, StateTarget, MAX_STATE_SLOT};
pub use memory::GuestMemory;
pub use pad::{PadButton, PadStatus};

/// Number of controller ports on the machine.
pub const PORT_COUNT: usize = 4;
