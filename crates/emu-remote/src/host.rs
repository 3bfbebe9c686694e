//! The simulation loop.
//!
//! `Host` owns the machine and is the only thing that touches it. Each
//! step drains the job queue, then (if running) performs the per-frame
//! hook sequence: advance timed input, latch merged pad state, emulate the
//! frame, refresh memory watches, and count the frame on the barrier.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use emu_core::{Machine, PORT_COUNT, PadStatus, RunState};
use tracing::info;

use crate::Engines;
use crate::dispatch::JobQueue;

/// How long the loop sleeps between job polls while paused.
const PAUSED_POLL: Duration = Duration::from_millis(2);

/// Owner of the machine, running on the simulation thread.
pub struct Host<M> {
    machine: M,
    jobs: JobQueue<M>,
    engines: Arc<Engines>,
}

impl<M: Machine> Host<M> {
    #[must_use]
    pub fn new(machine: M, jobs: JobQueue<M>, engines: Arc<Engines>) -> Self {
        Self {
            machine,
            jobs,
            engines,
        }
    }

    #[must_use]
    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    #[must_use]
    pub fn engines(&self) -> &Arc<Engines> {
        &self.engines
    }

    /// Run pending jobs without advancing a frame.
    pub fn run_jobs(&mut self) -> usize {
        self.jobs.run_pending(&mut self.machine)
    }

    /// Run pending jobs, then emulate one frame if the machine is running.
    /// Returns true if a frame was emulated.
    pub fn step(&mut self) -> bool {
        self.run_jobs();
        if self.machine.run_state() != RunState::Running {
            return false;
        }

        let input = &self.engines.input;
        let mut pads = [PadStatus::NEUTRAL; PORT_COUNT];
        for (port, pad) in pads.iter_mut().enumerate() {
            *pad = input.next_frame(port, self.machine.live_pad(port));
        }

        self.machine.run_frame(&pads);
        self.engines.watches.update_all(&self.machine);
        self.engines.barrier.advance_one_frame();
        true
    }

    /// Step until `shutdown` is set, pacing frames to `frame_duration`.
    ///
    /// A zero `frame_duration` runs unthrottled. The barrier is closed on
    /// exit so no request thread stays parked on a frame that never comes.
    pub fn run(&mut self, shutdown: &AtomicBool, frame_duration: Duration) {
        info!(
            frame_us = frame_duration.as_micros() as u64,
            "simulation loop started"
        );
        let mut deadline = Instant::now();

        while !shutdown.load(Ordering::Relaxed) {
            if self.step() {
                deadline += frame_duration;
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                } else {
                    deadline = now;
                }
            } else {
                thread::sleep(PAUSED_POLL);
                deadline = Instant::now();
            }
        }

        // Jobs queued during shutdown still get their answer.
        self.run_jobs();
        self.engines.barrier.close();
        info!(
            frames = self.engines.barrier.frame_count(),
            "simulation loop stopped"
        );
    }
}
