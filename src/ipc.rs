//! Stdio transport for the out-of-process worker.
//!
//! The worker process speaks newline-delimited JSON: commands arrive on
//! stdin, events leave on stdout. Both directions get a dedicated pump
//! thread feeding/draining plain channels, so the dispatcher itself stays
//! single-threaded and blocking-free at its suspension points. All logging
//! in the worker goes to stderr; stdout belongs to the event stream.

use std::io::{self, BufRead, Write};
use std::sync::mpsc::channel;
use std::thread;

use anyhow::{Context, Result};
use log::{error, warn};

use crate::config::EngineConfig;
use crate::dispatcher;
use crate::messages::{Command, EngineEvent, EventSink};

/// Hidden argv flag selecting the worker personality of the binary.
pub const WORKER_FLAG: &str = "--engine-worker";

/// Run the worker over the process's own stdio until `join` or EOF.
pub fn run_worker_stdio(config: EngineConfig) -> Result<()> {
    let (cmd_tx, cmd_rx) = channel::<Command>();
    // Reader thread: EOF or an unreadable stdin drops the sender, which the
    // dispatcher observes as a closed command pipe and exits on. The handle
    // is dropped because the thread may stay parked on a blocking read
    // until the process exits.
    let _reader = thread::Builder::new()
        .name("engine-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!("command pipe read failed: {err}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Command>(&line) {
                    Ok(command) => {
                        if cmd_tx.send(command).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("ignoring malformed command: {err}"),
                }
            }
        })
        .context("failed to spawn stdin reader")?;

    let (ev_tx, ev_rx) = channel::<EngineEvent>();
    let writer = thread::Builder::new()
        .name("engine-stdout".to_string())
        .spawn(move || {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            while let Ok(event) = ev_rx.recv() {
                let line = match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(err) => {
                        error!("unserializable event dropped: {err}");
                        continue;
                    }
                };
                if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
                    // Client went away; the dispatcher will notice via the
                    // command side and wind down.
                    break;
                }
            }
        })
        .context("failed to spawn stdout writer")?;

    dispatcher::run(cmd_rx, EventSink::new(ev_tx), config);

    // Every sink clone died with the dispatcher, so the writer drains what
    // is left and exits; the stdin thread is parked on a blocking read and
    // is reaped with the process.
    let _ = writer.join();
    Ok(())
}
