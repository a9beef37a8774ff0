//! SIGINT/SIGTERM handling for long-running commands.

use std::thread;

use anyhow::{Context, Result};
use nix::sys::signal::{SigSet, Signal};
use ticketlink_core::lifecycle::ShutdownToken;
use tracing::{info, warn};

/// Block SIGINT and SIGTERM and cancel `token` when either arrives.
///
/// Must run before any other thread is spawned: the blocked mask is inherited,
/// so only the listener thread ever receives the signal.
pub fn cancel_on_signal(token: ShutdownToken) -> Result<()> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set.thread_block()
        .context("Failed to block shutdown signals")?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || match set.wait() {
            Ok(signal) => {
                info!(signal = signal.as_str(), "shutdown signal received");
                token.cancel();
            }
            Err(err) => warn!(error = %err, "waiting for signals failed"),
        })
        .context("Failed to spawn signal listener")?;
    Ok(())
}
