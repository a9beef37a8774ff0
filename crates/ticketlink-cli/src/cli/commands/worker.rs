//! Implementation of `ticketlink worker`.
//!
//! Runs the sync queue in the foreground. Each stdin line is a repository ID,
//! or `all` to queue every non-empty repository. End of input drains the queue
//! and exits; SIGINT/SIGTERM exit immediately and roll back in-flight syncs.

use std::io::{self, BufRead};
use std::thread;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{select, Receiver};
use serde::Serialize;
use tracing::warn;

use crate::cli::commands::helpers::{core_context, ensure_initialized, wait_until_idle};
use crate::output::{Formatter, OutputFormat};
use crate::signals::cancel_on_signal;
use ticketlink_core::config::Settings;
use ticketlink_core::core::queue::{EnqueueCounts, Enqueued, SyncQueue};
use ticketlink_core::lifecycle::Lifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    All,
    Repo(i64),
}

fn parse_request(line: &str) -> Result<Option<Request>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if line.eq_ignore_ascii_case("all") {
        return Ok(Some(Request::All));
    }
    match line.parse::<i64>() {
        Ok(id) if id > 0 => Ok(Some(Request::Repo(id))),
        _ => bail!("Expected a repository ID or 'all', got '{line}'"),
    }
}

#[derive(Debug, Default, Serialize)]
struct WorkerSummary {
    scheduled: usize,
    absorbed: usize,
    rejected: usize,
    drained: bool,
}

impl WorkerSummary {
    fn record(&mut self, outcome: Enqueued) {
        match outcome {
            Enqueued::Scheduled => self.scheduled += 1,
            Enqueued::Absorbed | Enqueued::Rerun => self.absorbed += 1,
            Enqueued::Closed => self.rejected += 1,
        }
    }

    fn record_all(&mut self, counts: &EnqueueCounts) {
        self.scheduled += counts.scheduled;
        self.absorbed += counts.absorbed + counts.rerun;
        self.rejected += counts.closed;
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if sender.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to read stdin");
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(receiver)
}

/// Serve sync requests from stdin until end of input or a shutdown signal.
#[tracing::instrument(skip(settings, format))]
pub fn run_worker(settings: &Settings, format: OutputFormat) -> Result<()> {
    ensure_initialized(settings)?;

    let lifecycle = Lifecycle::new();
    cancel_on_signal(lifecycle.token().clone())?;
    let token = lifecycle.token().clone();

    let ctx = core_context(settings).with_token(token.clone());
    ctx.open_db()?;
    let queue = SyncQueue::start(&ctx, settings.workers, &lifecycle)?;
    let lines = spawn_stdin_reader()?;

    let mut summary = WorkerSummary::default();
    loop {
        select! {
            recv(lines) -> line => {
                let Ok(line) = line else { break };
                match parse_request(&line) {
                    Ok(None) => {}
                    Ok(Some(Request::Repo(repo_id))) => summary.record(queue.enqueue_sync(repo_id)),
                    Ok(Some(Request::All)) => match queue.enqueue_sync_all(0) {
                        Ok(counts) => summary.record_all(&counts),
                        Err(err) => warn!(error = %err, "failed to queue all repositories"),
                    },
                    Err(err) => warn!(error = %err, "ignoring request"),
                }
            },
            recv(token.cancelled()) -> _ => break,
        }
    }

    summary.drained = !token.is_cancelled() && wait_until_idle(&queue, &token);
    lifecycle.shutdown();
    Formatter::new(format).print(&summary)
}
