//! Control-plane request routing.
//!
//! Every method validates its parameters here, on the request thread.
//! Anything that reads or changes machine state is handed to the
//! simulation thread as a job; pure engine updates (input latches, watch
//! definitions, frame waits) happen directly on the shared engines.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use emu_core::{Framebuffer, Machine, PORT_COUNT, RunState, StateTarget};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info};

use crate::Engines;
use crate::capture;
use crate::config::Mode;
use crate::controller::ControllerCommand;
use crate::dispatch::{JobError, JobSender};
use crate::error::RemoteError;
use crate::memwatch::{WatchDescriptor, WatchSpec};
use crate::rpc::Handler;

/// Request-side behaviour switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterOptions {
    pub mode: Mode,
    /// Upper bound on how long a request may block. `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

/// Answers control-plane requests. Shared by every transport thread.
pub struct Router<M> {
    engines: Arc<Engines>,
    jobs: JobSender<M>,
    options: RouterOptions,
}

fn parse_port(params: &JsonValue) -> Result<usize, RemoteError> {
    let invalid = || RemoteError::invalid("Invalid controller port. Must be 0-3");
    let port = match params.get("port") {
        Some(JsonValue::Number(n)) => n.as_u64().ok_or_else(invalid)?,
        Some(JsonValue::String(s)) => s.trim().parse::<u64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    usize::try_from(port)
        .ok()
        .filter(|&p| p < PORT_COUNT)
        .ok_or_else(invalid)
}

fn required_str<'a>(params: &'a JsonValue, key: &str) -> Result<&'a str, RemoteError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RemoteError::invalid(format!("Missing required field '{key}'")))
}

fn machine_failure(e: impl ToString) -> JobError {
    JobError::Failed(e.to_string())
}

fn parse_state_target(value: Option<&JsonValue>) -> Result<StateTarget, RemoteError> {
    match value {
        Some(JsonValue::Number(n)) => n
            .as_u64()
            .and_then(StateTarget::slot)
            .ok_or_else(|| RemoteError::invalid("Slot must be 0-99")),
        Some(JsonValue::String(s)) if !s.trim().is_empty() => {
            Ok(StateTarget::Path(PathBuf::from(s)))
        }
        Some(_) => Err(RemoteError::invalid(
            "'to' must be a slot number or a file path",
        )),
        None => Err(RemoteError::invalid("Missing required field 'to'")),
    }
}

impl<M: Machine + 'static> Router<M> {
    #[must_use]
    pub fn new(engines: Arc<Engines>, jobs: JobSender<M>, options: RouterOptions) -> Self {
        Self {
            engines,
            jobs,
            options,
        }
    }

    #[must_use]
    pub fn engines(&self) -> &Arc<Engines> {
        &self.engines
    }

    #[must_use]
    pub fn options(&self) -> RouterOptions {
        self.options
    }

    /// Route one method call.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::UnknownMethod`] for unrecognised methods and
    /// whatever the method handler reports otherwise.
    pub fn dispatch(&self, method: &str, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        match method {
            "controller" => self.controller(params),
            "controller_enable" => self.controller_enable(params),
            "memwatch" => self.memwatch(params),
            "memwatch_values" => self.memwatch_values(params),
            "save_state" => self.save_state(params),
            "emulation" => self.emulation(params),
            "boot" => self.boot(params),
            "screenshot" => self.screenshot(params),
            "wait_frames" => self.wait_frames(params),
            "status" => self.status(),
            other => Err(RemoteError::UnknownMethod(other.to_string())),
        }
    }

    fn run<T, F>(&self, job: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&mut M) -> Result<T, JobError> + Send + 'static,
    {
        Ok(self.jobs.submit_blocking(job, self.options.wait_timeout)?)
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    /// Latch (`frames: 0`) or queue a timed overlay (`frames: n`).
    ///
    /// Each frame counts the overlay down before the pad state is sampled,
    /// so a `frames: n` press reaches the machine on `n - 1` frames and a
    /// `frames: 1` press is never seen by it.
    fn controller(&self, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        let port = parse_port(params)?;
        if params.get("buttons").is_none() {
            return Err(RemoteError::invalid("Missing required field 'buttons'"));
        }
        let command: ControllerCommand = serde_json::from_value(params.clone())
            .map_err(|e| RemoteError::invalid(format!("Invalid controller payload: {e}")))?;

        let input = &self.engines.input;
        let Some(overlay) = command.overlay() else {
            input.set_persistent(port, command.to_pad());
            debug!(port, buttons = command.buttons.mask(), "controller latched");
            return Ok(json!({"status": "ok", "port": port, "queued": false}));
        };

        // Register before queueing so the wait covers exactly the overlay's
        // frames even if the simulation thread advances in between.
        let ticket = match self.options.mode {
            Mode::TurnBased => Some(self.engines.barrier.register(u64::from(command.frames))?),
            Mode::RealTime => None,
        };
        input.queue_timed(port, overlay);
        debug!(port, frames = command.frames, "controller overlay queued");

        match ticket {
            Some(ticket) => {
                let frame_count = ticket.wait(self.options.wait_timeout)?;
                Ok(json!({"status": "ok", "port": port, "queued": true, "frame_count": frame_count}))
            }
            None => Ok(json!({"status": "ok", "port": port, "queued": true})),
        }
    }

    fn controller_enable(&self, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        let port = parse_port(params)?;
        let enabled = params
            .get("enabled")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| RemoteError::invalid("Missing required field 'enabled'"))?;
        self.engines.input.set_enabled(port, enabled);
        info!(port, enabled, "synthetic input toggled");
        Ok(json!({"status": "ok", "port": port, "enabled": enabled}))
    }

    // -----------------------------------------------------------------------
    // Memory watches
    // -----------------------------------------------------------------------

    /// Validate and store watch definitions without resolving them.
    ///
    /// Either every definition is stored or none is.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid definition.
    pub fn define_watches(
        &self,
        specs: &BTreeMap<String, WatchSpec>,
    ) -> Result<Vec<String>, RemoteError> {
        let mut parsed = Vec::with_capacity(specs.len());
        for (name, spec) in specs {
            // Lookups split on ',' and trim, so such names could never be fetched.
            if name.is_empty() || name.contains(',') || name.trim() != name {
                return Err(RemoteError::invalid(format!(
                    "Invalid watch name '{name}'"
                )));
            }
            let descriptor = WatchDescriptor::try_from(spec).map_err(|e| {
                RemoteError::invalid(format!("Invalid memory watch '{name}': {e}"))
            })?;
            parsed.push((name.clone(), descriptor));
        }
        let names = parsed.iter().map(|(n, _)| n.clone()).collect();
        for (name, descriptor) in parsed {
            debug!(name = %name, address = %format!("{:08X}", descriptor.address), "watch defined");
            self.engines.watches.register(name, descriptor);
        }
        Ok(names)
    }

    /// Define watches, then resolve them once on the simulation thread so
    /// they have a value even while the machine is paused.
    ///
    /// # Errors
    ///
    /// Returns an error if a definition is invalid or the simulation
    /// thread does not run the resolution job.
    pub fn register_watches(
        &self,
        specs: &BTreeMap<String, WatchSpec>,
    ) -> Result<Vec<String>, RemoteError> {
        let names = self.define_watches(specs)?;
        let engines = Arc::clone(&self.engines);
        let to_resolve = names.clone();
        self.run(move |machine: &mut M| {
            for name in &to_resolve {
                engines.watches.resolve_one(name, &*machine);
            }
            Ok(())
        })?;
        info!(count = names.len(), "memory watches registered");
        Ok(names)
    }

    fn memwatch(&self, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        let map = params.get("watches").unwrap_or(params);
        let Some(entries) = map.as_object() else {
            return Err(RemoteError::invalid("Expected an object of memory watches"));
        };
        if entries.is_empty() {
            return Err(RemoteError::invalid("No memory watches given"));
        }

        let mut specs = BTreeMap::new();
        for (name, value) in entries {
            for key in ["address", "size"] {
                if value.get(key).is_none() {
                    return Err(RemoteError::invalid(format!(
                        "Missing '{key}' for memory watch '{name}'"
                    )));
                }
            }
            let spec: WatchSpec = serde_json::from_value(value.clone()).map_err(|e| {
                RemoteError::invalid(format!("Invalid memory watch '{name}': {e}"))
            })?;
            specs.insert(name.clone(), spec);
        }

        let names = self.register_watches(&specs)?;
        Ok(json!({"registered": names}))
    }

    fn memwatch_values(&self, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        let names: Vec<&str> = required_str(params, "names")?
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Err(RemoteError::invalid("No watch names given"));
        }

        let watches = &self.engines.watches;
        let mut values = serde_json::Map::new();
        let mut missing = Vec::new();
        for name in names {
            match watches.fetch(name) {
                Some(value) => {
                    values.insert(name.to_string(), JsonValue::String(value));
                }
                None => missing.push(name),
            }
        }
        if !missing.is_empty() {
            return Err(RemoteError::invalid(format!(
                "Unknown or unresolved memory watch: {}",
                missing.join(", ")
            )));
        }
        Ok(json!({"values": values}))
    }

    // -----------------------------------------------------------------------
    // Machine control
    // -----------------------------------------------------------------------

    fn save_state(&self, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        let action = required_str(params, "action")?;
        let target = parse_state_target(params.get("to"))?;
        let label = target.to_string();
        match action {
            "save" => self.run(move |m: &mut M| m.save_state(&target).map_err(machine_failure))?,
            "load" => self.run(move |m: &mut M| m.load_state(&target).map_err(machine_failure))?,
            "info" => {
                let info =
                    self.run(move |m: &mut M| m.state_info(&target).map_err(machine_failure))?;
                let mut result = json!({"status": "ok", "action": action, "to": label});
                result["exists"] = json!(info.is_some());
                if let Some(info) = info {
                    result["frame"] = json!(info.frame);
                    result["game"] = json!(info.game.map(|p| p.display().to_string()));
                }
                return Ok(result);
            }
            _ => {
                return Err(RemoteError::invalid(
                    "Invalid action. Must be 'save', 'load' or 'info'",
                ));
            }
        }
        Ok(json!({"status": "ok", "action": action, "to": label}))
    }

    fn emulation(&self, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        let state = match required_str(params, "action")? {
            "pause" => RunState::Paused,
            "play" => RunState::Running,
            _ => {
                return Err(RemoteError::invalid(
                    "Invalid action. Must be 'pause' or 'play'",
                ));
            }
        };
        self.run(move |m: &mut M| {
            m.set_run_state(state);
            Ok(())
        })?;
        Ok(json!({"status": "ok", "state": state.to_string()}))
    }

    fn boot(&self, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        let path = PathBuf::from(required_str(params, "game_path")?);
        let shown = path.display().to_string();
        self.run(move |m: &mut M| m.boot(&path).map_err(machine_failure))?;
        Ok(json!({"status": "ok", "game_path": shown}))
    }

    fn screenshot(&self, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        let frame: Option<Framebuffer> = self.run(|m: &mut M| Ok(m.framebuffer()))?;
        let Some(frame) = frame else {
            return Err(RemoteError::Unavailable(
                "No video output available".to_string(),
            ));
        };

        if let Some(path) = params.get("path").and_then(|v| v.as_str()) {
            let path = PathBuf::from(path);
            capture::save_png(&frame, &path)?;
            return Ok(json!({
                "path": path.display().to_string(),
                "width": frame.width,
                "height": frame.height,
            }));
        }

        Ok(json!({
            "format": "png",
            "width": frame.width,
            "height": frame.height,
            "data": capture::encode_png_base64(&frame)?,
        }))
    }

    fn wait_frames(&self, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        let frames = params
            .get("frames")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RemoteError::invalid("Missing required field 'frames'"))?;
        let frame_count = self
            .engines
            .barrier
            .wait_frames(frames, self.options.wait_timeout)?;
        Ok(json!({"frame_count": frame_count}))
    }

    fn status(&self) -> Result<JsonValue, RemoteError> {
        let run_state = self.run(|m: &mut M| Ok(m.run_state()))?;
        let input = &self.engines.input;
        let ports: Vec<JsonValue> = (0..PORT_COUNT)
            .map(|port| {
                json!({
                    "port": port,
                    "enabled": input.is_enabled(port),
                    "timed": input.timed_len(port),
                })
            })
            .collect();
        Ok(json!({
            "frame_count": self.engines.barrier.frame_count(),
            "run_state": run_state.to_string(),
            "mode": self.options.mode.to_string(),
            "ports": ports,
            "watches": self.engines.watches.names(),
        }))
    }
}

impl<M: Machine + 'static> Handler for Router<M> {
    fn dispatch(&self, method: &str, params: &JsonValue) -> Result<JsonValue, RemoteError> {
        Router::dispatch(self, method, params)
    }
}
