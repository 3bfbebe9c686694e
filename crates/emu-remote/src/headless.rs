//! Headless reference machine.
//!
//! A flat big-endian RAM with no CPU attached. Each frame it publishes the
//! frame counter and the latched pad state into low memory and redraws a
//! test pattern, which is enough to drive the control plane end to end
//! without a real emulator core.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use emu_core::{
    Framebuffer, GuestMemory, Machine, MachineError, PORT_COUNT, PadStatus, RunState, StateInfo,
    StateTarget,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// First RAM address.
pub const RAM_BASE: u32 = 0x8000_0000;
/// Default RAM size (24 MiB).
pub const RAM_SIZE: usize = 0x0180_0000;
/// Big-endian u32 frame counter, written after every frame.
pub const FRAME_COUNTER_ADDR: u32 = RAM_BASE + 0xF0;
/// Per-port pad mailbox: buttons (u16 BE), stick x, stick y. 4 bytes per port.
pub const PAD_MAILBOX_ADDR: u32 = RAM_BASE + 0x100;

pub const FB_WIDTH: u32 = 320;
pub const FB_HEIGHT: u32 = 240;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    frame: u64,
    game: Option<PathBuf>,
    ram: Vec<u8>,
}

/// Flat-RAM machine for tests and for running the server standalone.
pub struct HeadlessMachine {
    ram: Vec<u8>,
    run_state: RunState,
    frame: u64,
    state_dir: PathBuf,
    game: Option<PathBuf>,
    live: [PadStatus; PORT_COUNT],
    last_pads: [PadStatus; PORT_COUNT],
    framebuffer: Vec<u32>,
}

impl HeadlessMachine {
    /// Machine with the default RAM size, writing save slots under `state_dir`.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self::with_ram_size(state_dir, RAM_SIZE)
    }

    /// Machine with `ram_size` bytes of RAM starting at [`RAM_BASE`].
    #[must_use]
    pub fn with_ram_size(state_dir: impl Into<PathBuf>, ram_size: usize) -> Self {
        // No hardware pads attached.
        let unplugged = PadStatus {
            connected: false,
            ..PadStatus::NEUTRAL
        };
        Self {
            ram: vec![0; ram_size],
            run_state: RunState::Running,
            frame: 0,
            state_dir: state_dir.into(),
            game: None,
            live: [unplugged; PORT_COUNT],
            last_pads: [PadStatus::NEUTRAL; PORT_COUNT],
            framebuffer: vec![0; (FB_WIDTH * FB_HEIGHT) as usize],
        }
    }

    /// Image booted last, if any.
    #[must_use]
    pub fn game(&self) -> Option<&Path> {
        self.game.as_deref()
    }

    /// Pad state latched for the last emulated frame.
    #[must_use]
    pub fn last_pads(&self) -> &[PadStatus; PORT_COUNT] {
        &self.last_pads
    }

    /// Set what the physical controller on `port` reports.
    pub fn set_live_pad(&mut self, port: usize, pad: PadStatus) {
        if let Some(slot) = self.live.get_mut(port) {
            *slot = pad;
        }
    }

    /// Write bytes into RAM. Out-of-range bytes are dropped.
    pub fn poke(&mut self, address: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            if let Some(off) = self.offset(address.wrapping_add(i as u32)) {
                self.ram[off] = b;
            }
        }
    }

    fn offset(&self, address: u32) -> Option<usize> {
        let off = address.checked_sub(RAM_BASE)? as usize;
        (off < self.ram.len()).then_some(off)
    }

    fn slot_path(&self, target: &StateTarget) -> PathBuf {
        match target {
            StateTarget::Slot(n) => self.state_dir.join(format!("slot_{n:02}.state")),
            StateTarget::Path(p) => p.clone(),
        }
    }

    /// Read the snapshot at `target`, or `None` if the file does not exist.
    fn read_snapshot(&self, target: &StateTarget) -> Result<Option<Snapshot>, MachineError> {
        let path = self.slot_path(target);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        rmp_serde::from_slice(&bytes)
            .map(Some)
            .map_err(|e| MachineError::InvalidState(e.to_string()))
    }

    fn publish_frame(&mut self) {
        let frame = self.frame as u32;
        self.poke(FRAME_COUNTER_ADDR, &frame.to_be_bytes());
        let pads = self.last_pads;
        for (port, pad) in pads.iter().enumerate() {
            let [hi, lo] = pad.buttons.to_be_bytes();
            let address = PAD_MAILBOX_ADDR + (port as u32) * 4;
            self.poke(address, &[hi, lo, pad.stick_x, pad.stick_y]);
        }
    }

    fn draw_test_pattern(&mut self) {
        let shade = (self.frame & 0xFF) as u32;
        let buttons = u32::from(self.last_pads[0].buttons);
        for y in 0..FB_HEIGHT {
            for x in 0..FB_WIDTH {
                let r = (x * 255 / FB_WIDTH) & 0xFF;
                let g = (y * 255 / FB_HEIGHT) & 0xFF;
                let b = shade ^ (buttons & 0xFF);
                self.framebuffer[(y * FB_WIDTH + x) as usize] = (r << 16) | (g << 8) | b;
            }
        }
    }
}

impl GuestMemory for HeadlessMachine {
    fn read_u8(&self, address: u32) -> u8 {
        self.offset(address).map_or(0, |off| self.ram[off])
    }

    fn is_valid_address(&self, address: u32) -> bool {
        self.offset(address).is_some()
    }
}

impl Machine for HeadlessMachine {
    fn run_state(&self) -> RunState {
        self.run_state
    }

    fn set_run_state(&mut self, state: RunState) {
        if self.run_state != state {
            info!(from = %self.run_state, to = %state, "run state changed");
            self.run_state = state;
        }
    }

    fn save_state(&mut self, target: &StateTarget) -> Result<(), MachineError> {
        let path = self.slot_path(target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let snapshot = Snapshot {
            frame: self.frame,
            game: self.game.clone(),
            ram: self.ram.clone(),
        };
        let bytes =
            rmp_serde::to_vec(&snapshot).map_err(|e| MachineError::InvalidState(e.to_string()))?;
        fs::write(&path, bytes)?;
        info!(to = %target, path = %path.display(), "state saved");
        Ok(())
    }

    fn load_state(&mut self, target: &StateTarget) -> Result<(), MachineError> {
        let Some(snapshot) = self.read_snapshot(target)? else {
            return Err(match target {
                StateTarget::Slot(n) => MachineError::EmptySlot(*n),
                StateTarget::Path(p) => MachineError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found", p.display()),
                )),
            });
        };
        if snapshot.ram.len() != self.ram.len() {
            return Err(MachineError::InvalidState(format!(
                "RAM size {} does not match machine RAM size {}",
                snapshot.ram.len(),
                self.ram.len()
            )));
        }
        self.ram = snapshot.ram;
        self.frame = snapshot.frame;
        self.game = snapshot.game;
        info!(from = %target, frame = self.frame, "state loaded");
        Ok(())
    }

    fn state_info(&self, target: &StateTarget) -> Result<Option<StateInfo>, MachineError> {
        Ok(self.read_snapshot(target)?.map(|snapshot| StateInfo {
            frame: snapshot.frame,
            game: snapshot.game,
        }))
    }

    fn boot(&mut self, path: &Path) -> Result<(), MachineError> {
        let image = fs::read(path)?;
        if image.is_empty() {
            return Err(MachineError::Boot(format!("{} is empty", path.display())));
        }
        self.ram.fill(0);
        let len = image.len().min(self.ram.len());
        self.ram[..len].copy_from_slice(&image[..len]);
        self.frame = 0;
        self.game = Some(path.to_path_buf());
        self.run_state = RunState::Running;
        info!(path = %path.display(), bytes = image.len(), "booted");
        Ok(())
    }

    fn live_pad(&self, port: usize) -> PadStatus {
        self.live.get(port).copied().unwrap_or(PadStatus {
            connected: false,
            ..PadStatus::NEUTRAL
        })
    }

    fn run_frame(&mut self, pads: &[PadStatus; PORT_COUNT]) {
        self.frame += 1;
        self.last_pads = *pads;
        self.publish_frame();
        self.draw_test_pattern();
    }

    fn framebuffer(&self) -> Option<Framebuffer> {
        Some(Framebuffer {
            width: FB_WIDTH,
            height: FB_HEIGHT,
            pixels: self.framebuffer.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::pad::button;

    #[test]
    fn frame_counter_and_mailbox_are_published() {
        let mut m = HeadlessMachine::with_ram_size("unused", 0x1000);
        let mut pads = [PadStatus::NEUTRAL; PORT_COUNT];
        pads[1].buttons = button::A | button::START;
        pads[1].stick_x = 255;
        m.run_frame(&pads);
        m.run_frame(&pads);

        assert_eq!(m.read_u32(FRAME_COUNTER_ADDR), 2);
        let mut mailbox = [0u8; 4];
        m.read_bytes(PAD_MAILBOX_ADDR + 4, &mut mailbox);
        assert_eq!(mailbox, [0x11, 0x00, 255, 128]);
    }

    #[test]
    fn memory_bounds() {
        let m = HeadlessMachine::with_ram_size("unused", 0x100);
        assert!(m.is_valid_address(RAM_BASE));
        assert!(m.is_valid_address(RAM_BASE + 0xFF));
        assert!(!m.is_valid_address(RAM_BASE + 0x100));
        assert!(!m.is_valid_address(0x7FFF_FFFF));
        assert_eq!(m.read_u8(0), 0);
    }

    #[test]
    fn save_and_load_slot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut m = HeadlessMachine::with_ram_size(dir.path(), 0x100);
        m.poke(RAM_BASE + 0x40, &[0xAA]);
        m.save_state(&StateTarget::Slot(3)).expect("save");
        assert!(dir.path().join("slot_03.state").exists());

        m.poke(RAM_BASE + 0x40, &[0x55]);
        m.load_state(&StateTarget::Slot(3)).expect("load");
        assert_eq!(m.read_u8(RAM_BASE + 0x40), 0xAA);
    }

    #[test]
    fn load_empty_slot_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut m = HeadlessMachine::with_ram_size(dir.path(), 0x100);
        assert!(matches!(
            m.load_state(&StateTarget::Slot(42)),
            Err(MachineError::EmptySlot(42))
        ));
    }

    #[test]
    fn state_info_describes_saved_slot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("game.iso");
        fs::write(&image, [9]).expect("write");

        let mut m = HeadlessMachine::with_ram_size(dir.path(), 0x100);
        assert_eq!(m.state_info(&StateTarget::Slot(7)).expect("info"), None);

        m.boot(&image).expect("boot");
        m.run_frame(&[PadStatus::NEUTRAL; PORT_COUNT]);
        m.run_frame(&[PadStatus::NEUTRAL; PORT_COUNT]);
        m.save_state(&StateTarget::Slot(7)).expect("save");
        m.run_frame(&[PadStatus::NEUTRAL; PORT_COUNT]);

        let info = m.state_info(&StateTarget::Slot(7)).expect("info");
        assert_eq!(
            info,
            Some(StateInfo {
                frame: 2,
                game: Some(image),
            })
        );
    }

    #[test]
    fn state_info_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("slot_05.state"), b"not a snapshot").expect("write");
        let m = HeadlessMachine::with_ram_size(dir.path(), 0x100);
        assert!(matches!(
            m.state_info(&StateTarget::Slot(5)),
            Err(MachineError::InvalidState(_))
        ));
    }

    #[test]
    fn boot_loads_image_at_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("game.iso");
        fs::write(&image, [1, 2, 3, 4]).expect("write");

        let mut m = HeadlessMachine::with_ram_size(dir.path(), 0x100);
        m.set_run_state(RunState::Paused);
        m.boot(&image).expect("boot");
        assert_eq!(m.read_u32(RAM_BASE), 0x0102_0304);
        assert_eq!(m.run_state(), RunState::Running);
        assert_eq!(m.game(), Some(image.as_path()));
    }
}
