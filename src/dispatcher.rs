//! The worker's single-threaded cooperative command loop.
//!
//! One command is read and fully handled before the next; the long-running
//! scan and encode handlers re-enter the command reader in non-blocking mode
//! at their suspension points (`pump`) so cancellation, appended scan paths
//! and shutdown are observed mid-stage. There is no concurrency inside the
//! worker beyond the children it supervises.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Child;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::catalogue::Catalogue;
use crate::config::EngineConfig;
use crate::error::StageError;
use crate::media::{Framerate, MediaKind, MediaState};
use crate::messages::{Command, EventSink};
use crate::procrun::{self, Tools};
use crate::profiles;
use crate::sequence::Sequence;

/// Which long-running stage is currently re-entering the command reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Scan,
    Encode,
}

pub(crate) struct Worker {
    pub(crate) commands: Receiver<Command>,
    pub(crate) events: EventSink,
    pub(crate) catalogue: Catalogue,
    pub(crate) config: EngineConfig,
    pub(crate) tools: Tools,
    pub(crate) scan_cancel: bool,
    pub(crate) encode_cancel: bool,
    pub(crate) shutdown: bool,
    /// Commands that arrived at a suspension point but belong to the other
    /// stage; replayed in order once the current stage unwinds.
    pub(crate) deferred: VecDeque<Command>,
    /// Paths of the in-flight scan generation; `scan_paths` received during
    /// a scan appends here instead of opening a second generation.
    pub(crate) scan_queue: VecDeque<(PathBuf, Framerate)>,
    /// Fire-and-forget preview players, reaped opportunistically.
    pub(crate) previews: Vec<Child>,
}

/// Run the worker loop until `join` or a closed command pipe.
pub fn run(commands: Receiver<Command>, events: EventSink, config: EngineConfig) {
    Worker::new(commands, events, config).run_loop();
}

impl Worker {
    pub(crate) fn new(commands: Receiver<Command>, events: EventSink, config: EngineConfig) -> Self {
        let tools = Tools::resolve(&config);
        let catalogue = Catalogue::new(events.clone());
        Worker {
            commands,
            events,
            catalogue,
            config,
            tools,
            scan_cancel: false,
            encode_cancel: false,
            shutdown: false,
            deferred: VecDeque::new(),
            scan_queue: VecDeque::new(),
            previews: Vec::new(),
        }
    }

    pub(crate) fn run_loop(&mut self) {
        info!("engine worker started");
        loop {
            self.reap_previews();
            if self.shutdown {
                break;
            }

            let command = if let Some(replayed) = self.deferred.pop_front() {
                replayed
            } else {
                match self.commands.recv_timeout(Duration::from_millis(200)) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        warn!("worker exiting: {}", StageError::Ipc);
                        break;
                    }
                }
            };
            self.handle(command);
        }
        info!("engine worker exiting");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::ScanPaths {
                paths,
                sequence_framerate,
            } => self.run_scan(paths, sequence_framerate),
            Command::EncodeItems {
                ids,
                profile,
                framerate,
            } => self.run_encode(ids, profile, framerate),
            Command::CancelScan {} => debug!("cancel_scan with no scan in flight"),
            Command::CancelEncode {} => debug!("cancel_encode with no encode in flight"),
            Command::RemoveItems { ids } => self.remove_items(&ids),
            Command::PreviewItem { id, framerate } => self.preview_item(&id, &framerate),
            Command::Join {} => {
                debug!("join received while idle");
                self.shutdown = true;
            }
        }
    }

    /// Suspension point: drain the command channel without blocking and
    /// absorb what can be handled mid-stage. Cancel flags are set here;
    /// commands belonging to the other stage are deferred in arrival order.
    pub(crate) fn pump(&mut self, stage: Stage) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.absorb(command, stage),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("command pipe closed mid-stage: {}", StageError::Ipc);
                    self.scan_cancel = true;
                    self.encode_cancel = true;
                    self.shutdown = true;
                    break;
                }
            }
        }
    }

    fn absorb(&mut self, command: Command, stage: Stage) {
        match command {
            Command::CancelScan {} => {
                info!("scan cancellation requested");
                self.scan_cancel = true;
            }
            Command::CancelEncode {} => {
                info!("encode cancellation requested");
                self.encode_cancel = true;
            }
            Command::Join {} => {
                info!("join requested; unwinding in-flight work");
                self.scan_cancel = true;
                self.encode_cancel = true;
                self.shutdown = true;
            }
            Command::ScanPaths {
                paths,
                sequence_framerate,
            } => {
                if stage == Stage::Scan {
                    debug!("appending {} path(s) to the running scan", paths.len());
                    for path in paths {
                        self.scan_queue
                            .push_back((PathBuf::from(path), sequence_framerate));
                    }
                } else {
                    self.deferred.push_back(Command::ScanPaths {
                        paths,
                        sequence_framerate,
                    });
                }
            }
            Command::EncodeItems { .. } => {
                if stage == Stage::Encode {
                    // One encode generation at a time; a second request does
                    // not append.
                    warn!("encode_items ignored: encode already in flight");
                } else {
                    self.deferred.push_back(command);
                }
            }
            Command::RemoveItems { ids } => {
                if stage == Stage::Scan {
                    self.remove_items(&ids);
                } else {
                    self.deferred.push_back(Command::RemoveItems { ids });
                }
            }
            Command::PreviewItem { id, framerate } => self.preview_item(&id, &framerate),
        }
    }

    /// Drop items that are in a removable state; `new` items belong to the
    /// scanner and `queued`/`encoding` items to the encode queue, so those
    /// requests are ignored.
    pub(crate) fn remove_items(&mut self, ids: &[String]) {
        for id in ids {
            match self.catalogue.lookup(id).map(|item| item.state) {
                Some(MediaState::Ready) | Some(MediaState::Done) | Some(MediaState::Error) => {
                    self.catalogue.delete(id);
                }
                Some(state) => debug!("remove_items ignored for {id} in state {state:?}"),
                None => debug!("remove_items: unknown id {id}"),
            }
        }
    }

    /// Spawn the external player on the item's source, or on the encoded
    /// output once the item is done. No events, no supervision.
    pub(crate) fn preview_item(&mut self, id: &str, framerate_key: &str) {
        let Some(item) = self.catalogue.lookup(id).cloned() else {
            warn!("preview_item: unknown id {id}");
            return;
        };

        let args = if item.state == MediaState::Done {
            match item.outpath {
                Some(ref outpath) => vec![outpath.clone()],
                None => vec![item.path.clone()],
            }
        } else {
            match preview_args(&item, profiles::framerate(framerate_key)) {
                Ok(args) => args,
                Err(err) => {
                    warn!("preview_item: cannot build player arguments for {id}: {err:#}");
                    return;
                }
            }
        };

        match procrun::spawn_detached(&self.tools.ffplay, &args) {
            Ok(child) => self.previews.push(child),
            Err(err) => warn!("preview_item: {err:#}"),
        }
    }

    fn reap_previews(&mut self) {
        self.previews
            .retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
    }
}

/// Player argument block. The player takes its input positionally, so this
/// is not the shared `-i` input spec.
fn preview_args(
    item: &crate::media::MediaItem,
    rate_override: Option<Framerate>,
) -> anyhow::Result<Vec<String>> {
    match item.kind {
        MediaKind::Video => Ok(vec![item.path.clone()]),
        MediaKind::Sequence => {
            let seq = Sequence::parse(&item.path)?;
            let rate = rate_override.unwrap_or(item.framerate);
            Ok(vec![
                "-framerate".to_string(),
                rate.ratio(),
                "-start_number".to_string(),
                seq.first().to_string(),
                seq.pattern_path(),
            ])
        }
    }
}
