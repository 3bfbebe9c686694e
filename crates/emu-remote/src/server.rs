//! Transports: newline-delimited JSON-RPC over TCP or stdio.
//!
//! Each TCP connection gets its own thread, so a request blocked on a frame
//! wait never holds up another client.

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::rpc::{Handler, handle_line};

/// How often the accept loop checks for shutdown.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Answer requests from `input` on `output` until end of input.
///
/// # Errors
///
/// Returns an error if a response cannot be written.
pub fn serve_lines<R: BufRead, W: Write>(
    handler: &dyn Handler,
    input: R,
    mut output: W,
) -> io::Result<()> {
    for line in input.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                debug!(error = %e, "input closed");
                break;
            }
        };
        if let Some(response) = handle_line(handler, &line) {
            writeln!(output, "{response}")?;
            output.flush()?;
        }
    }
    Ok(())
}

/// Serve on stdin/stdout, then raise `shutdown` when stdin closes.
pub fn serve_stdio(handler: &dyn Handler, shutdown: &AtomicBool) {
    info!("serving JSON-RPC on stdio");
    let stdin = io::stdin();
    let stdout = io::stdout();
    if let Err(e) = serve_lines(handler, stdin.lock(), stdout.lock()) {
        error!(error = %e, "stdio transport failed");
    }
    info!("stdin closed, shutting down");
    shutdown.store(true, Ordering::Relaxed);
}

/// TCP listener accepting one thread per connection.
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    /// Bind to `addr`, e.g. `127.0.0.1:58111`. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    /// Address actually bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections on a background thread until `shutdown` is set.
    #[must_use]
    pub fn spawn(
        self,
        handler: Arc<dyn Handler>,
        shutdown: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        thread::spawn(move || self.accept_loop(&handler, &shutdown))
    }

    fn accept_loop(&self, handler: &Arc<dyn Handler>, shutdown: &AtomicBool) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "listening for JSON-RPC over TCP");
        }
        while !shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let handler = Arc::clone(handler);
                    thread::spawn(move || serve_connection(&*handler, stream, peer));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        info!("TCP listener stopped");
    }
}

fn serve_connection(handler: &dyn Handler, stream: TcpStream, peer: SocketAddr) {
    info!(%peer, "client connected");
    // The listener is non-blocking; connections must not be.
    let result = stream
        .set_nonblocking(false)
        .and_then(|()| stream.try_clone())
        .and_then(|read_half| {
            serve_lines(handler, BufReader::new(read_half), BufWriter::new(&stream))
        });
    match result {
        Ok(()) => info!(%peer, "client disconnected"),
        Err(e) => warn!(%peer, error = %e, "connection closed with error"),
    }
}
