//! Shutdown requests from signals or the terminal.

use anyhow::Result;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

const SHUTDOWN_SIGNALS: [i32; 2] = [SIGINT, SIGTERM];
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM
    Signal(i32),
    /// A line or end-of-file on stdin
    Input,
}

/// Start listening for shutdown requests.
///
/// Signals are always watched, so the receiver stays open for the life of
/// the process even without stdin. Every source sends at most one reason.
pub fn listen(watch_stdin: bool) -> Result<Receiver<ShutdownReason>> {
    let (tx, rx) = mpsc::channel();

    spawn_signal_listener(tx.clone())?;

    if watch_stdin {
        spawn_input_listener(io::BufReader::new(io::stdin()), tx);
    }

    Ok(rx)
}

fn spawn_signal_listener(tx: Sender<ShutdownReason>) -> Result<()> {
    let received = Arc::new(AtomicUsize::new(0));
    for signal in SHUTDOWN_SIGNALS {
        flag::register_usize(signal, Arc::clone(&received), signal as usize)?;
    }
    spawn_signal_watcher(received, tx);
    Ok(())
}

/// Poll the flag set by the signal handler; 0 means no signal yet
fn spawn_signal_watcher(received: Arc<AtomicUsize>, tx: Sender<ShutdownReason>) {
    thread::spawn(move || loop {
        let signal = received.load(Ordering::SeqCst);
        if signal != 0 {
            debug!("Received signal {}", signal);
            let _ = tx.send(ShutdownReason::Signal(signal as i32));
            return;
        }
        thread::sleep(SIGNAL_POLL_INTERVAL);
    });
}

fn spawn_input_listener<R: BufRead + Send + 'static>(mut reader: R, tx: Sender<ShutdownReason>) {
    thread::spawn(move || {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => trace!("stdin closed"),
            Ok(_) => trace!("Read line from stdin"),
            Err(e) => debug!("Failed to read stdin: {}", e),
        }
        let _ = tx.send(ShutdownReason::Input);
    });
}
