//! Remote control plane for a frame-stepped emulator.
//!
//! External clients drive the machine over JSON-RPC: they inject controller
//! input, define named memory watches, save and load state, and block until
//! a number of frames have run. The machine itself lives on one simulation
//! thread ([`host::Host`]); request threads only talk to it through the job
//! queue in [`dispatch`] and the shared [`Engines`].
//!
//! ```no_run
//! use emu_remote::headless::HeadlessMachine;
//! use emu_remote::router::RouterOptions;
//!
//! let (mut host, router) = emu_remote::connect(
//!     HeadlessMachine::new("states"),
//!     RouterOptions::default(),
//! );
//! ```

pub mod barrier;
pub mod capture;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod headless;
pub mod host;
pub mod input;
pub mod memwatch;
pub mod router;
pub mod rpc;
pub mod server;

use std::sync::Arc;

use emu_core::Machine;

use crate::barrier::FrameBarrier;
use crate::host::Host;
use crate::input::InputEngine;
use crate::memwatch::WatchRegistry;
use crate::router::{Router, RouterOptions};

pub use crate::error::RemoteError;

/// State shared between the simulation thread and request threads.
pub struct Engines {
    pub input: InputEngine,
    pub watches: WatchRegistry,
    pub barrier: FrameBarrier,
}

impl Engines {
    #[must_use]
    pub fn new() -> Self {
        Self {
            input: InputEngine::new(),
            watches: WatchRegistry::new(),
            barrier: FrameBarrier::new(),
        }
    }
}

impl Default for Engines {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire a machine to a fresh set of engines.
///
/// Run the returned [`Host`] on the simulation thread and share the
/// [`Router`] with every transport.
pub fn connect<M: Machine + 'static>(machine: M, options: RouterOptions) -> (Host<M>, Router<M>) {
    let engines = Arc::new(Engines::new());
    let (jobs, queue) = dispatch::job_channel();
    let host = Host::new(machine, queue, Arc::clone(&engines));
    let router = Router::new(engines, jobs, options);
    (host, router)
}
