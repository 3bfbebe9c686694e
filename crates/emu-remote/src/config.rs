//! Server configuration.
//!
//! Defaults, overridden by environment variables, overridden by
//! command-line flags.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::memwatch::WatchSpec;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:58111";
pub const DEFAULT_STATE_DIR: &str = "states";
pub const DEFAULT_FPS: u32 = 60;

pub const ENV_MODE: &str = "MODE";
pub const ENV_MEMWATCHES: &str = "MEMWATCHES";
pub const ENV_LISTEN: &str = "EMU_REMOTE_LISTEN";
pub const ENV_STATE_DIR: &str = "EMU_REMOTE_STATE_DIR";
pub const ENV_WAIT_TIMEOUT_MS: &str = "EMU_REMOTE_WAIT_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid mode '{0}' (expected real-time or turn-based)")]
    InvalidMode(String),

    #[error("invalid value '{value}' for {name}")]
    InvalidNumber { name: String, value: String },

    #[error("invalid {ENV_MEMWATCHES}: {0}")]
    MemWatches(String),

    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// Whether controller commands wait for their frames to elapse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Timed controller commands return immediately.
    #[default]
    RealTime,
    /// Timed controller commands block until their frames have run.
    TurnBased,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "real-time" | "realtime" | "real_time" => Ok(Self::RealTime),
            "turn-based" | "turnbased" | "turn_based" => Ok(Self::TurnBased),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RealTime => "real-time",
            Self::TurnBased => "turn-based",
        })
    }
}

/// What `main` should do after parsing arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliAction {
    Run,
    Help,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// TCP listen address.
    pub listen: String,
    /// Serve on stdin/stdout instead of TCP.
    pub stdio: bool,
    /// Image to boot before serving.
    pub game: Option<PathBuf>,
    /// Where numbered save slots live.
    pub state_dir: PathBuf,
    pub start_paused: bool,
    pub mode: Mode,
    /// Watches registered at startup.
    pub memwatches: BTreeMap<String, WatchSpec>,
    /// Upper bound on blocking request waits. `None` waits forever.
    pub wait_timeout: Option<Duration>,
    pub fps: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            stdio: false,
            game: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            start_paused: false,
            mode: Mode::RealTime,
            memwatches: BTreeMap::new(),
            wait_timeout: None,
            fps: DEFAULT_FPS,
        }
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Parse the `MEMWATCHES` JSON object.
///
/// # Errors
///
/// Returns an error if the text is not a JSON object of watch definitions.
pub fn parse_memwatches(text: &str) -> Result<BTreeMap<String, WatchSpec>, ConfigError> {
    serde_json::from_str(text).map_err(|e| ConfigError::MemWatches(e.to_string()))
}

impl RemoteConfig {
    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to something unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is set to something unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(mode) = lookup(ENV_MODE) {
            config.mode = mode.parse()?;
        }
        if let Some(text) = lookup(ENV_MEMWATCHES).filter(|t| !t.trim().is_empty()) {
            config.memwatches = parse_memwatches(&text)?;
        }
        if let Some(listen) = lookup(ENV_LISTEN) {
            config.listen = listen;
        }
        if let Some(dir) = lookup(ENV_STATE_DIR) {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(ENV_WAIT_TIMEOUT_MS) {
            config.wait_timeout = Some(Duration::from_millis(parse_number(ENV_WAIT_TIMEOUT_MS, &ms)?));
        }
        Ok(config)
    }

    /// Apply command-line flags (without the program name).
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown flag or a bad value.
    pub fn apply_args(&mut self, args: &[String]) -> Result<CliAction, ConfigError> {
        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i)
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
            };
            match flag {
                "--listen" => self.listen = value()?,
                "--stdio" => self.stdio = true,
                "--game" => self.game = Some(PathBuf::from(value()?)),
                "--state-dir" => self.state_dir = PathBuf::from(value()?),
                "--paused" => self.start_paused = true,
                "--mode" => self.mode = value()?.parse()?,
                "--wait-timeout-ms" => {
                    let ms = parse_number(flag, &value()?)?;
                    self.wait_timeout = Some(Duration::from_millis(ms));
                }
                "--fps" => self.fps = parse_number(flag, &value()?)?,
                "--help" | "-h" => return Ok(CliAction::Help),
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            }
            i += 1;
        }
        Ok(CliAction::Run)
    }

    /// Wall-clock time per frame. Zero fps runs unthrottled.
    #[must_use]
    pub fn frame_duration(&self) -> Duration {
        if self.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / self.fps
        }
    }
}

/// Print usage to stderr.
pub fn print_usage() {
    eprintln!("Usage: emu-remote [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --listen <addr>          TCP listen address [default: {DEFAULT_LISTEN}]");
    eprintln!("  --stdio                  Serve JSON-RPC on stdin/stdout instead of TCP");
    eprintln!("  --game <file>            Boot this image before serving");
    eprintln!("  --state-dir <dir>        Directory for numbered save slots [default: {DEFAULT_STATE_DIR}]");
    eprintln!("  --paused                 Start paused");
    eprintln!("  --mode <mode>            real-time or turn-based [default: real-time]");
    eprintln!("  --wait-timeout-ms <ms>   Give up on blocking waits after this long");
    eprintln!("  --fps <n>                Frame rate, 0 for unthrottled [default: {DEFAULT_FPS}]");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  {ENV_MODE}                     Same as --mode");
    eprintln!("  {ENV_MEMWATCHES}               JSON object of watches to register at startup");
    eprintln!("  {ENV_LISTEN}        Same as --listen");
    eprintln!("  {ENV_STATE_DIR}     Same as --state-dir");
    eprintln!("  {ENV_WAIT_TIMEOUT_MS} Same as --wait-timeout-ms");
    eprintln!("  RUST_LOG                 Log filter [default: info]");
}
