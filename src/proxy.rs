//! Client façade over the worker engine.
//!
//! All operations are non-blocking sends except `join`, which unwinds
//! in-flight work and waits for the worker to exit. `poll` drains the next
//! available event without blocking; events arrive in the exact order the
//! worker published them.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command as ProcessCommand, Stdio};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{debug, warn};

use crate::config::EngineConfig;
use crate::dispatcher;
use crate::ipc::WORKER_FLAG;
use crate::media::Framerate;
use crate::messages::{Command, EngineEvent, EventSink};

enum Link {
    /// Worker re-execed as a child process, duplex JSON-lines pipe.
    Process { child: Child, stdin: ChildStdin },
    /// Worker hosted on a thread in this process; used by tests and
    /// embedders that do not want a second process.
    Thread {
        commands: Sender<Command>,
        worker: Option<JoinHandle<()>>,
    },
}

pub struct EngineProxy {
    link: Link,
    events: Receiver<EngineEvent>,
}

impl EngineProxy {
    /// Spawn the worker as a child process of the current executable.
    ///
    /// `config_path` is forwarded so both sides read the same file; `None`
    /// lets the worker pick up the default `config.ini` from its cwd.
    pub fn launch(config_path: Option<PathBuf>) -> Result<EngineProxy> {
        let exe = std::env::current_exe().context("failed to resolve current executable")?;
        let mut command = ProcessCommand::new(exe);
        command.arg(WORKER_FLAG);
        if let Some(ref path) = config_path {
            command.arg("--config").arg(path);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn engine worker process")?;

        let stdin = child
            .stdin
            .take()
            .context("worker child has no stdin handle")?;
        let stdout = child
            .stdout
            .take()
            .context("worker child has no stdout handle")?;

        let (tx, rx) = channel();
        thread::Builder::new()
            .name("engine-events".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(err) => {
                            warn!("event pipe read failed: {err}");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<EngineEvent>(&line) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!("ignoring malformed event: {err}"),
                    }
                }
                debug!("event pipe closed");
            })
            .context("failed to spawn event reader")?;

        Ok(EngineProxy {
            link: Link::Process { child, stdin },
            events: rx,
        })
    }

    /// Host the worker on a named thread inside this process.
    pub fn launch_in_process(config: EngineConfig) -> Result<EngineProxy> {
        let (cmd_tx, cmd_rx) = channel();
        let (ev_tx, ev_rx) = channel();
        let worker = thread::Builder::new()
            .name("engine-worker".to_string())
            .spawn(move || dispatcher::run(cmd_rx, EventSink::new(ev_tx), config))
            .context("failed to spawn engine worker thread")?;

        Ok(EngineProxy {
            link: Link::Thread {
                commands: cmd_tx,
                worker: Some(worker),
            },
            events: ev_rx,
        })
    }

    pub fn scan_paths(&mut self, paths: Vec<String>, sequence_framerate: Framerate) -> Result<()> {
        self.send(Command::ScanPaths {
            paths,
            sequence_framerate,
        })
    }

    pub fn cancel_scan(&mut self) -> Result<()> {
        self.send(Command::CancelScan {})
    }

    pub fn encode_items(
        &mut self,
        ids: Vec<String>,
        profile: &str,
        framerate: &str,
    ) -> Result<()> {
        self.send(Command::EncodeItems {
            ids,
            profile: profile.to_string(),
            framerate: framerate.to_string(),
        })
    }

    pub fn cancel_encode(&mut self) -> Result<()> {
        self.send(Command::CancelEncode {})
    }

    pub fn remove_items(&mut self, ids: Vec<String>) -> Result<()> {
        self.send(Command::RemoveItems { ids })
    }

    pub fn preview_item(&mut self, id: &str, framerate: &str) -> Result<()> {
        self.send(Command::PreviewItem {
            id: id.to_string(),
            framerate: framerate.to_string(),
        })
    }

    /// Next event if one is already available.
    pub fn poll(&mut self) -> Option<EngineEvent> {
        self.events.try_recv().ok()
    }

    /// Next event, waiting up to `timeout` for one to arrive.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Option<EngineEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Cancel any in-flight work, ask the worker to exit, and wait for it.
    pub fn join(mut self) -> Result<()> {
        if let Err(err) = self.send(Command::Join {}) {
            // The worker may already be gone; joining below reports how.
            debug!("join command not delivered: {err:#}");
        }
        match self.link {
            Link::Process { ref mut child, .. } => {
                let status = child.wait().context("failed to wait for engine worker")?;
                if !status.success() {
                    bail!("engine worker exited with {status}");
                }
                Ok(())
            }
            Link::Thread { ref mut worker, .. } => {
                if let Some(handle) = worker.take() {
                    if handle.join().is_err() {
                        bail!("engine worker thread panicked");
                    }
                }
                Ok(())
            }
        }
    }

    fn send(&mut self, command: Command) -> Result<()> {
        match self.link {
            Link::Process { ref mut stdin, .. } => {
                let line = serde_json::to_string(&command).context("unserializable command")?;
                writeln!(stdin, "{line}")
                    .and_then(|()| stdin.flush())
                    .context("engine worker pipe is closed")
            }
            Link::Thread { ref commands, .. } => commands
                .send(command)
                .map_err(|_| anyhow::anyhow!("engine worker thread is gone")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL: Duration = Duration::from_secs(5);

    #[test]
    fn scan_and_join_round_trip_in_process() {
        let mut proxy =
            EngineProxy::launch_in_process(EngineConfig::default()).expect("launch worker");
        proxy
            .scan_paths(vec!["/does/not/exist".to_string()], Framerate(25, 1))
            .expect("send scan");

        assert_eq!(
            proxy.poll_timeout(POLL),
            Some(EngineEvent::ScanComplete),
            "a scan over nothing still terminates"
        );
        proxy.join().expect("join worker");
    }

    #[test]
    fn encode_with_nothing_ready_completes_immediately() {
        let mut proxy =
            EngineProxy::launch_in_process(EngineConfig::default()).expect("launch worker");
        proxy
            .encode_items(vec![], "prores_422_hq", "")
            .expect("send encode");

        assert_eq!(proxy.poll_timeout(POLL), Some(EngineEvent::EncodeComplete));
        proxy.join().expect("join worker");
    }

    #[test]
    fn poll_is_non_blocking_when_no_event_is_pending() {
        let mut proxy =
            EngineProxy::launch_in_process(EngineConfig::default()).expect("launch worker");
        assert!(proxy.poll().is_none());
        proxy.join().expect("join worker");
    }
}
