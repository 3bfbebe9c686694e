//! Frame barrier.
//!
//! A monotonic frame counter that any thread can block on. The simulation
//! thread calls [`FrameBarrier::advance_one_frame`] once per emulated frame;
//! request threads call [`FrameBarrier::wait_frames`] to hold a response
//! until the simulation has caught up.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// Errors from waiting on the barrier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("frame wait must cover at least one frame")]
    ZeroFrames,

    #[error("timed out waiting for frame {target}")]
    Timeout { target: u64 },

    #[error("simulation stopped before frame {target}")]
    Closed { target: u64 },
}

struct Waiter {
    target: u64,
    signal: Sender<u64>,
}

struct BarrierState {
    frame_count: u64,
    waiters: Vec<Waiter>,
    closed: bool,
}

/// Frame counter plus the set of threads waiting for it.
pub struct FrameBarrier {
    state: Mutex<BarrierState>,
}

impl FrameBarrier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BarrierState {
                frame_count: 0,
                waiters: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Frames completed so far.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.state.lock().frame_count
    }

    /// Number of registered waiters not yet released.
    #[must_use]
    pub fn pending_waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Count one completed frame and release every waiter whose target has
    /// been reached. Returns the new frame count.
    pub fn advance_one_frame(&self) -> u64 {
        let mut state = self.state.lock();
        state.frame_count += 1;
        let now = state.frame_count;

        let mut released = 0usize;
        state.waiters.retain(|w| {
            if w.target <= now {
                // The receiver may have given up after a timeout.
                let _ = w.signal.send(now);
                released += 1;
                false
            } else {
                true
            }
        });

        if released > 0 {
            debug!(frame = now, released, "frame barrier released waiters");
        }
        now
    }

    /// Register interest in the frame `frames` frames from now without
    /// blocking. `frames` must be at least 1.
    pub fn register(&self, frames: u64) -> Result<FrameTicket, WaitError> {
        if frames == 0 {
            return Err(WaitError::ZeroFrames);
        }

        let mut state = self.state.lock();
        let target = state.frame_count.saturating_add(frames);
        if state.closed {
            return Err(WaitError::Closed { target });
        }

        let (signal, receiver) = crossbeam_channel::bounded(1);
        state.waiters.push(Waiter { target, signal });
        Ok(FrameTicket { target, receiver })
    }

    /// Block until `frames` more frames have completed.
    ///
    /// With `timeout == None` this blocks for as long as the simulation
    /// takes, forever if it never advances again.
    pub fn wait_frames(&self, frames: u64, timeout: Option<Duration>) -> Result<u64, WaitError> {
        self.register(frames)?.wait(timeout)
    }

    /// Release every waiter with [`WaitError::Closed`] and refuse new ones.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.waiters.clear();
    }
}

impl Default for FrameBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered wait on the barrier.
pub struct FrameTicket {
    target: u64,
    receiver: Receiver<u64>,
}

impl FrameTicket {
    /// Frame count at which this ticket is released.
    #[must_use]
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Block until released. Returns the frame count at release.
    pub fn wait(self, timeout: Option<Duration>) -> Result<u64, WaitError> {
        let target = self.target;
        match timeout {
            None => self
                .receiver
                .recv()
                .map_err(|_| WaitError::Closed { target }),
            Some(limit) => self.receiver.recv_timeout(limit).map_err(|e| match e {
                RecvTimeoutError::Timeout => WaitError::Timeout { target },
                RecvTimeoutError::Disconnected => WaitError::Closed { target },
            }),
        }
    }

    /// Non-blocking check. `Ok(None)` while the target is still ahead.
    pub fn try_wait(&self) -> Result<Option<u64>, WaitError> {
        match self.receiver.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WaitError::Closed {
                target: self.target,
            }),
        }
    }
}
