//! End-to-end control plane tests against the headless machine.
//!
//! The simulation loop runs on its own thread exactly as in the server
//! binary; the test thread plays the part of a request thread.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use emu_core::{Machine, PadButton, RunState};
use emu_remote::RemoteError;
use emu_remote::config::Mode;
use emu_remote::error::code;
use emu_remote::headless::{FRAME_COUNTER_ADDR, HeadlessMachine, PAD_MAILBOX_ADDR, RAM_BASE};
use emu_remote::host::Host;
use emu_remote::router::{Router, RouterOptions};
use serde_json::{Value as JsonValue, json};

const FRAME: Duration = Duration::from_millis(1);

struct Harness {
    router: Router<HeadlessMachine>,
    shutdown: Arc<AtomicBool>,
    sim: Option<JoinHandle<Host<HeadlessMachine>>>,
}

impl Harness {
    fn start(machine: HeadlessMachine, options: RouterOptions) -> Self {
        let (mut host, router) = emu_remote::connect(machine, options);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let sim = thread::spawn(move || {
            host.run(&flag, FRAME);
            host
        });
        Self {
            router,
            shutdown,
            sim: Some(sim),
        }
    }

    fn call(&self, method: &str, params: JsonValue) -> Result<JsonValue, RemoteError> {
        self.router.dispatch(method, &params)
    }

    fn ok(&self, method: &str, params: JsonValue) -> JsonValue {
        self.call(method, params)
            .unwrap_or_else(|e| panic!("{method} failed: {e}"))
    }

    fn value(&self, name: &str) -> String {
        let resp = self.ok("memwatch_values", json!({ "names": name }));
        resp["values"][name]
            .as_str()
            .expect("string value")
            .to_string()
    }

    fn stop(mut self) -> Host<HeadlessMachine> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.sim
            .take()
            .expect("running")
            .join()
            .expect("simulation thread")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(sim) = self.sim.take() {
            let _ = sim.join();
        }
    }
}

fn small_machine(dir: &std::path::Path) -> HeadlessMachine {
    HeadlessMachine::with_ram_size(dir, 0x4000)
}

#[test]
fn memwatch_reports_hex_and_fault_sentinel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut machine = small_machine(dir.path());
    machine.poke(0x8000_1000, &[0x12, 0x34]);
    let h = Harness::start(machine, RouterOptions::default());

    let resp = h.ok(
        "memwatch",
        json!({"watches": {
            "hp": {"address": "80001000", "size": 2},
            "nowhere": {"address": "10", "size": 4},
        }}),
    );
    assert_eq!(resp, json!({"registered": ["hp", "nowhere"]}));
    assert_eq!(h.value("hp"), "1234");
    assert_eq!(h.value("nowhere"), "0");

    let both = h.ok("memwatch_values", json!({"names": "hp, nowhere"}));
    assert_eq!(both["values"], json!({"hp": "1234", "nowhere": "0"}));
}

#[test]
fn pointer_chase_through_router() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut machine = small_machine(dir.path());
    machine.poke(0x8000_0200, &0x8000_0300u32.to_be_bytes());
    machine.poke(0x8000_0310, &[0xCA, 0xFE]);
    machine.poke(0x8000_0400, &0x0000_1000u32.to_be_bytes());
    let h = Harness::start(machine, RouterOptions::default());

    h.ok(
        "memwatch",
        json!({"watches": {
            "chased": {"address": "0x80000200", "offset": "10", "size": 2},
            "listed": {"address": "80000200", "offset": ["20", "-10"], "size": 2},
            "broken": {"address": "80000400", "offset": "0", "size": 2},
        }}),
    );
    assert_eq!(h.value("chased"), "CAFE");
    // 0x80000300 + 0x20 holds zero, so the second hop lands outside RAM.
    assert_eq!(h.value("listed"), "0");
    assert_eq!(h.value("broken"), "0");
}

#[test]
fn unknown_watch_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = Harness::start(small_machine(dir.path()), RouterOptions::default());
    h.ok(
        "memwatch",
        json!({"watches": {"hp": {"address": "80001000", "size": 2}}}),
    );
    let err = h
        .call("memwatch_values", json!({"names": "hp,mp"}))
        .expect_err("mp is unknown");
    assert_eq!(err.code(), code::INVALID_PARAMS);
    assert!(err.to_string().contains("mp"));
}

#[test]
fn watches_follow_the_frame_counter() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = Harness::start(small_machine(dir.path()), RouterOptions::default());
    h.ok(
        "memwatch",
        json!({"watches": {"frame": {"address": format!("{FRAME_COUNTER_ADDR:X}"), "size": 4}}}),
    );

    let reached = h.ok("wait_frames", json!({"frames": 5}))["frame_count"]
        .as_u64()
        .expect("frame_count");
    let seen = u64::from_str_radix(&h.value("frame"), 16).expect("hex");
    assert!(seen >= reached, "watch {seen} behind barrier {reached}");
}

#[test]
fn latched_input_reaches_the_machine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = Harness::start(small_machine(dir.path()), RouterOptions::default());
    h.ok(
        "memwatch",
        json!({"watches": {"pad0": {"address": format!("{PAD_MAILBOX_ADDR:X}"), "size": 4}}}),
    );

    h.ok("controller", json!({"port": 0, "buttons": {"a": true}}));
    h.ok("wait_frames", json!({"frames": 2}));
    assert_eq!(h.value("pad0"), "01008080");

    h.ok(
        "controller",
        json!({"port": 0, "buttons": {"start": true}, "mainStick": {"x": 255, "y": 0}}),
    );
    h.ok("wait_frames", json!({"frames": 2}));
    assert_eq!(h.value("pad0"), "1000FF00");
}

#[test]
fn disabled_port_passes_live_input_through() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = Harness::start(small_machine(dir.path()), RouterOptions::default());
    h.ok(
        "memwatch",
        json!({"watches": {"pad2": {"address": format!("{:X}", PAD_MAILBOX_ADDR + 8), "size": 2}}}),
    );

    h.ok("controller", json!({"port": 2, "buttons": {"b": true}}));
    h.ok("wait_frames", json!({"frames": 2}));
    assert_eq!(h.value("pad2"), "0200");

    h.ok("controller_enable", json!({"port": 2, "enabled": false}));
    h.ok("wait_frames", json!({"frames": 2}));
    assert_eq!(h.value("pad2"), "0000");

    // Re-enabling starts from a neutral latch.
    h.ok("controller_enable", json!({"port": 2, "enabled": true}));
    h.ok("wait_frames", json!({"frames": 2}));
    assert_eq!(h.value("pad2"), "0000");

    let status = h.ok("status", json!({}));
    assert_eq!(status["ports"][2]["enabled"], json!(true));
}

#[test]
fn turn_based_controller_blocks_until_frames_pass() {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = RouterOptions {
        mode: Mode::TurnBased,
        wait_timeout: Some(Duration::from_secs(10)),
    };
    let h = Harness::start(small_machine(dir.path()), options);

    let before = h.ok("status", json!({}))["frame_count"]
        .as_u64()
        .expect("frame_count");
    let resp = h.ok(
        "controller",
        json!({"port": 1, "buttons": {"z": true}, "frames": 10}),
    );
    assert_eq!(resp["queued"], json!(true));
    let after = resp["frame_count"].as_u64().expect("frame_count");
    assert!(after >= before + 10, "{after} < {before} + 10");
}

#[test]
fn real_time_controller_returns_immediately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut machine = small_machine(dir.path());
    machine.set_run_state(RunState::Paused);
    let h = Harness::start(machine, RouterOptions::default());

    // Paused, so a blocking implementation would never return.
    let resp = h.ok(
        "controller",
        json!({"port": 1, "buttons": {"z": true}, "frames": 10}),
    );
    assert!(resp.get("frame_count").is_none());
    assert_eq!(h.router.engines().input.timed_len(1), 1);
}

#[test]
fn pause_stops_frames_and_play_resumes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = RouterOptions {
        mode: Mode::RealTime,
        wait_timeout: Some(Duration::from_millis(50)),
    };
    let h = Harness::start(small_machine(dir.path()), options);

    let resp = h.ok("emulation", json!({"action": "pause"}));
    assert_eq!(resp["state"], json!("paused"));
    let frozen = h.router.engines().barrier.frame_count();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(h.router.engines().barrier.frame_count(), frozen);

    let err = h
        .call("wait_frames", json!({"frames": 1}))
        .expect_err("paused machine cannot advance");
    assert_eq!(err.code(), code::SERVER_ERROR);

    h.ok("emulation", json!({"action": "play"}));
    h.ok("wait_frames", json!({"frames": 1}));
    assert_eq!(h.ok("status", json!({}))["run_state"], json!("running"));
}

#[test]
fn save_and_load_slots() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut machine = small_machine(dir.path());
    machine.poke(RAM_BASE + 0x2000, &[0x11]);
    let h = Harness::start(machine, RouterOptions::default());
    h.ok(
        "memwatch",
        json!({"watches": {"marker": {"address": format!("{:X}", RAM_BASE + 0x2000), "size": 1}}}),
    );

    h.ok("save_state", json!({"action": "save", "to": 7}));
    assert!(dir.path().join("slot_07.state").exists());

    let file = dir.path().join("named").join("snap.state");
    h.ok(
        "save_state",
        json!({"action": "save", "to": file.display().to_string()}),
    );
    assert!(file.exists());

    // Booting clears RAM, loading the slot brings the marker back.
    let image = dir.path().join("blank.bin");
    fs::write(&image, [0u8; 4]).expect("write image");
    h.ok("boot", json!({"game_path": image.display().to_string()}));
    h.ok("wait_frames", json!({"frames": 1}));
    assert_eq!(h.value("marker"), "00");

    h.ok("save_state", json!({"action": "load", "to": 7}));
    h.ok("wait_frames", json!({"frames": 1}));
    assert_eq!(h.value("marker"), "11");

    let err = h
        .call("save_state", json!({"action": "load", "to": 8}))
        .expect_err("slot 8 is empty");
    assert_eq!(err.code(), code::SERVER_ERROR);

    let err = h
        .call("save_state", json!({"action": "save", "to": 100}))
        .expect_err("slot out of range");
    assert_eq!(err.code(), code::INVALID_PARAMS);
}

#[test]
fn boot_loads_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("game.bin");
    fs::write(&image, [0xDE, 0xAD, 0xBE, 0xEF]).expect("write image");
    let h = Harness::start(small_machine(dir.path()), RouterOptions::default());

    h.ok("boot", json!({"game_path": image.display().to_string()}));
    h.ok(
        "memwatch",
        json!({"watches": {"head": {"address": format!("{RAM_BASE:X}"), "size": 4}}}),
    );
    assert_eq!(h.value("head"), "DEADBEEF");

    let err = h
        .call("boot", json!({"game_path": dir.path().join("missing.bin").display().to_string()}))
        .expect_err("missing image");
    assert_eq!(err.code(), code::SERVER_ERROR);

    let host = h.stop();
    assert_eq!(host.machine().game(), Some(image.as_path()));
}

#[test]
fn screenshot_inline_and_to_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = Harness::start(small_machine(dir.path()), RouterOptions::default());
    h.ok("wait_frames", json!({"frames": 1}));

    let inline = h.ok("screenshot", json!({}));
    assert_eq!(inline["format"], json!("png"));
    assert_eq!(inline["width"], json!(320));
    assert_eq!(inline["height"], json!(240));
    assert!(inline["data"].as_str().is_some_and(|d| d.starts_with("iVBOR")));

    let path = dir.path().join("shot.png");
    h.ok("screenshot", json!({"path": path.display().to_string()}));
    let bytes = fs::read(&path).expect("png written");
    assert_eq!(&bytes[1..4], b"PNG");
}

#[test]
fn shutdown_releases_parked_waiters() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut machine = small_machine(dir.path());
    machine.set_run_state(RunState::Paused);
    let h = Harness::start(machine, RouterOptions::default());
    let ticket = h.router.engines().barrier.register(1_000).expect("register");

    let _host = h.stop();
    assert!(ticket.wait(Some(Duration::from_secs(5))).is_err());
}

#[test]
fn timed_press_reaches_the_machine_for_one_frame_less_than_requested() {
    for frames in [1u32, 2, 3, 10] {
        let (mut host, router) = emu_remote::connect(
            HeadlessMachine::with_ram_size("unused", 0x1000),
            RouterOptions::default(),
        );
        router
            .dispatch(
                "controller",
                &json!({"port": 0, "buttons": {"a": true}, "frames": frames}),
            )
            .expect("controller");

        let mut pressed = 0;
        for _ in 0..frames + 3 {
            assert!(host.step());
            if host.machine().last_pads()[0].is_pressed(PadButton::A) {
                pressed += 1;
            }
        }
        assert_eq!(pressed, frames - 1, "frames = {frames}");
        assert_eq!(host.engines().input.timed_len(0), 0);
    }
}

#[test]
fn slot_info_describes_saved_states() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("game.bin");
    fs::write(&image, [0xAB; 4]).expect("write image");
    let h = Harness::start(small_machine(dir.path()), RouterOptions::default());

    let empty = h.ok("save_state", json!({"action": "info", "to": 4}));
    assert_eq!(empty["exists"], json!(false));
    assert!(empty.get("frame").is_none());

    h.ok(
        "memwatch",
        json!({"watches": {"frame": {"address": format!("{FRAME_COUNTER_ADDR:X}"), "size": 4}}}),
    );
    h.ok("boot", json!({"game_path": image.display().to_string()}));
    h.ok("wait_frames", json!({"frames": 2}));
    h.ok("emulation", json!({"action": "pause"}));
    h.ok("save_state", json!({"action": "save", "to": 4}));
    let frame = u64::from_str_radix(&h.value("frame"), 16).expect("hex frame");
    assert!(frame >= 2);

    let info = h.ok("save_state", json!({"action": "info", "to": 4}));
    assert_eq!(info["status"], json!("ok"));
    assert_eq!(info["exists"], json!(true));
    assert_eq!(info["frame"], json!(frame));
    assert_eq!(info["game"], json!(image.display().to_string()));

    let err = h
        .call("save_state", json!({"action": "info", "to": 100}))
        .expect_err("slot out of range");
    assert_eq!(err.code(), code::INVALID_PARAMS);
}
