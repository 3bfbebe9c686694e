//! Remote control server binary.
//!
//! Runs the headless reference machine on the main thread and serves
//! JSON-RPC over TCP (or stdio) on background threads.

use std::process;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;

use emu_core::{Machine, RunState};
use emu_remote::config::{self, CliAction, RemoteConfig};
use emu_remote::headless::HeadlessMachine;
use emu_remote::router::RouterOptions;
use emu_remote::rpc::Handler;
use emu_remote::server::{self, TcpServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> RemoteConfig {
    let mut config = match RemoteConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    };
    let args: Vec<String> = std::env::args().skip(1).collect();
    match config.apply_args(&args) {
        Ok(CliAction::Run) => config,
        Ok(CliAction::Help) => {
            config::print_usage();
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Try --help");
            process::exit(1);
        }
    }
}

fn main() {
    init_tracing();
    let config = load_config();
    info!(mode = %config.mode, state_dir = %config.state_dir.display(), "starting");

    let options = RouterOptions {
        mode: config.mode,
        wait_timeout: config.wait_timeout,
    };
    let (mut host, router) = emu_remote::connect(HeadlessMachine::new(&config.state_dir), options);

    if let Some(game) = &config.game {
        if let Err(e) = host.machine_mut().boot(game) {
            error!(path = %game.display(), error = %e, "boot failed");
            process::exit(1);
        }
    }
    if config.start_paused {
        host.machine_mut().set_run_state(RunState::Paused);
    }

    // The host is not running yet, so resolve startup watches here rather
    // than through the job queue.
    if !config.memwatches.is_empty() {
        match router.define_watches(&config.memwatches) {
            Ok(names) => {
                for name in &names {
                    host.engines().watches.resolve_one(name, host.machine());
                }
                info!(count = names.len(), "startup memory watches registered");
            }
            Err(e) => {
                error!(error = %e, "invalid MEMWATCHES");
                process::exit(1);
            }
        }
    }

    let handler: Arc<dyn Handler> = Arc::new(router);
    let shutdown = Arc::new(AtomicBool::new(false));

    let transport = if config.stdio {
        let handler = Arc::clone(&handler);
        let shutdown = Arc::clone(&shutdown);
        thread::spawn(move || server::serve_stdio(&*handler, &shutdown))
    } else {
        match TcpServer::bind(&config.listen) {
            Ok(listener) => listener.spawn(Arc::clone(&handler), Arc::clone(&shutdown)),
            Err(e) => {
                error!(listen = %config.listen, error = %e, "bind failed");
                process::exit(1);
            }
        }
    };

    host.run(&shutdown, config.frame_duration());

    if transport.join().is_err() {
        error!("transport thread panicked");
    }
}
