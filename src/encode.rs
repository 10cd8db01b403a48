//! The encode queue: one supervised encoder child at a time.
//!
//! Items are promoted to `queued` up front so the client reflects pending
//! work immediately, then processed FIFO. The child's stderr is consumed
//! byte by byte (ffmpeg rewrites its progress line with bare carriage
//! returns) and every parsed progress line is a suspension point.

use std::collections::VecDeque;
use std::io::Read;
use std::path::Path;

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::dispatcher::{Stage, Worker};
use crate::error::StageError;
use crate::media::{Framerate, MediaDelta, MediaItem, MediaKind, MediaState};
use crate::messages::EngineEvent;
use crate::procrun::{self, LineAssembler};
use crate::profiles::{self, EncodingProfile};
use crate::sequence::Sequence;

static RE_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.(\d{2})").unwrap());
static RE_PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time=(\d{2}):(\d{2}):(\d{2})\.(\d{2})").unwrap());

/// Kept stderr lines per child, for post-mortem logging.
const STDERR_TAIL_LINES: usize = 20;

enum Outcome {
    Finished,
    Failed,
    Cancelled,
}

impl Worker {
    pub(crate) fn run_encode(&mut self, ids: Vec<String>, profile_key: String, framerate_key: String) {
        self.encode_cancel = false;

        let Some(profile) = profiles::profile(&profile_key) else {
            warn!("encode_items: unknown profile '{profile_key}'");
            self.events.emit(EngineEvent::EncodeComplete);
            return;
        };
        let rate_override = profiles::framerate(&framerate_key);
        if !framerate_key.is_empty() && rate_override.is_none() {
            warn!("encode_items: unknown framerate preset '{framerate_key}'; using item rates");
        }

        // An empty selection means everything currently ready.
        let ids = if ids.is_empty() {
            self.catalogue.ids_in_state(MediaState::Ready)
        } else {
            ids
        };

        let mut queue: VecDeque<String> = ids
            .into_iter()
            .filter(|id| match self.catalogue.lookup(id).map(|item| item.state) {
                Some(MediaState::Ready) => true,
                Some(state) => {
                    debug!("encode_items: skipping {id} in state {state:?}");
                    false
                }
                None => {
                    warn!("encode_items: unknown id {id}");
                    false
                }
            })
            .collect();

        info!("encode started: {} item(s), profile {profile_key}", queue.len());
        for id in &queue {
            self.catalogue
                .upsert(id, MediaDelta::state(MediaState::Queued));
        }

        let mut cancelled = false;
        while let Some(id) = queue.pop_front() {
            self.pump(Stage::Encode);
            if self.encode_cancel {
                self.refund(&id);
                cancelled = true;
                break;
            }
            match self.encode_one(&id, profile, rate_override) {
                Outcome::Finished | Outcome::Failed => {}
                Outcome::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
        }

        if cancelled {
            // Drain what never started back to ready.
            for id in queue.drain(..) {
                self.refund(&id);
            }
            info!("encode cancelled");
            self.events.emit(EngineEvent::EncodeCancelled);
        } else {
            info!("encode complete");
            self.events.emit(EngineEvent::EncodeComplete);
        }
    }

    /// Return a queued or encoding item to `ready` with zeroed progress.
    fn refund(&mut self, id: &str) {
        match self.catalogue.lookup(id).map(|item| item.state) {
            Some(MediaState::Queued) | Some(MediaState::Encoding) => {
                self.catalogue.upsert(
                    id,
                    MediaDelta {
                        state: Some(MediaState::Ready),
                        progress: Some(0.0),
                        ..MediaDelta::default()
                    },
                );
            }
            _ => {}
        }
    }

    fn encode_one(
        &mut self,
        id: &str,
        profile: &EncodingProfile,
        rate_override: Option<Framerate>,
    ) -> Outcome {
        let Some(item) = self.catalogue.lookup(id).cloned() else {
            warn!("encode: item {id} vanished before its turn");
            return Outcome::Failed;
        };

        let outpath = derive_outpath(&item, &self.config.output_suffix);
        let args = match encode_args(&item, profile, rate_override, &outpath) {
            Ok(args) => args,
            Err(err) => {
                error!("encode: cannot build arguments for {id}: {err:#}");
                self.mark_failed(id);
                return Outcome::Failed;
            }
        };

        info!(
            "encode: {id} {}",
            procrun::format_command_line(&self.tools.ffmpeg, &args)
        );
        self.catalogue
            .upsert(id, MediaDelta::state(MediaState::Encoding));

        let mut child = match procrun::spawn_supervised(&self.tools.ffmpeg, &args) {
            Ok(child) => child,
            Err(err) => {
                error!("encode: {err:#}");
                self.mark_failed(id);
                return Outcome::Failed;
            }
        };

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let supervised = match child.stderr.take() {
            Some(stderr) => self.watch_child(id, stderr, &mut tail),
            None => {
                error!("encode: child for {id} has no stderr to supervise");
                false
            }
        };

        if !supervised || self.encode_cancel {
            // Cancelled mid-stream (or unsupervisable): kill and refund.
            let _ = child.kill();
            let _ = child.wait();
            if self.encode_cancel {
                self.refund(id);
                return Outcome::Cancelled;
            }
            self.mark_failed(id);
            return Outcome::Failed;
        }

        let status = match child.wait() {
            Ok(status) => status,
            Err(err) => {
                error!("encode: failed to reap child for {id}: {err}");
                self.mark_failed(id);
                return Outcome::Failed;
            }
        };

        // A cancel may have landed between the last progress line and exit.
        self.pump(Stage::Encode);
        if self.encode_cancel {
            self.refund(id);
            return Outcome::Cancelled;
        }

        if status.success() {
            self.catalogue.upsert(
                id,
                MediaDelta {
                    progress: Some(1.0),
                    state: Some(MediaState::Done),
                    outpath: Some(outpath),
                    ..MediaDelta::default()
                },
            );
            Outcome::Finished
        } else {
            let failure = StageError::Encode {
                status,
                stderr_tail: tail.back().cloned().unwrap_or_default(),
            };
            error!("encode: {id}: {failure}");
            self.mark_failed(id);
            Outcome::Failed
        }
    }

    /// Byte loop over the child's stderr. Returns false when cancellation
    /// interrupted supervision (the caller kills the child).
    fn watch_child(
        &mut self,
        id: &str,
        mut stderr: impl Read,
        tail: &mut VecDeque<String>,
    ) -> bool {
        let mut assembler = LineAssembler::new();
        let mut parser = ProgressParser::new();
        let mut byte = [0u8; 1];

        loop {
            match stderr.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    let Some(line) = assembler.push(byte[0]) else {
                        continue;
                    };
                    push_tail(tail, line.clone());
                    if let Some(fraction) = parser.feed(&line) {
                        self.catalogue.upsert(id, MediaDelta::progress(fraction));
                        self.pump(Stage::Encode);
                        if self.encode_cancel {
                            return false;
                        }
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("encode: stderr read ended for {id}: {err}");
                    break;
                }
            }
        }
        if let Some(line) = assembler.flush() {
            push_tail(tail, line);
        }
        true
    }

    fn mark_failed(&mut self, id: &str) {
        self.catalogue.upsert(
            id,
            MediaDelta {
                state: Some(MediaState::Error),
                progress: Some(0.0),
                ..MediaDelta::default()
            },
        );
    }
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

/// Full encoder argv for one item.
fn encode_args(
    item: &MediaItem,
    profile: &EncodingProfile,
    rate_override: Option<Framerate>,
    outpath: &str,
) -> anyhow::Result<Vec<String>> {
    let mut args = procrun::input_args(item, rate_override)?;
    args.extend(profile.codec_args());
    if item.kind == MediaKind::Video {
        if let Some(rate) = rate_override {
            args.push("-r".to_string());
            args.push(rate.ratio());
        }
    }
    args.push("-an".to_string());
    args.push("-y".to_string());
    args.push(outpath.to_string());
    Ok(args)
}

/// Default output path: source base name with the configured suffix. For
/// sequences the placeholder collapses to its zero form first, so siblings
/// with the same head land on the same derived name (last write wins, as
/// the original tool behaves).
pub(crate) fn derive_outpath(item: &MediaItem, suffix: &str) -> String {
    let base = match item.kind {
        MediaKind::Video => item.path.clone(),
        MediaKind::Sequence => match Sequence::parse(&item.path) {
            Ok(seq) => seq.zero_path(),
            Err(_) => item.path.clone(),
        },
    };
    format!("{}{}", strip_extension(&base), suffix)
}

fn strip_extension(path: &str) -> String {
    let p = Path::new(path);
    match (p.parent(), p.file_stem()) {
        (Some(parent), Some(stem)) if p.extension().is_some() => parent
            .join(stem)
            .to_string_lossy()
            .into_owned(),
        _ => path.to_string(),
    }
}

/// Stateful parser over encoder stderr lines.
///
/// `Duration:` header lines set the total; `time=` lines advance progress.
/// Published fractions are monotone and coalesced on whole percent so a
/// chatty child does not flood the event stream; with an unknown or zero
/// total no fraction is ever computed.
struct ProgressParser {
    total_secs: f64,
    best_fraction: f64,
    last_percent: i64,
}

impl ProgressParser {
    fn new() -> Self {
        ProgressParser {
            total_secs: 0.0,
            best_fraction: 0.0,
            last_percent: -1,
        }
    }

    fn feed(&mut self, line: &str) -> Option<f64> {
        if let Some(caps) = RE_DURATION.captures(line) {
            self.total_secs = timestamp_seconds(&caps);
            return None;
        }

        let caps = RE_PROGRESS.captures(line)?;
        if self.total_secs <= 0.0 {
            return None;
        }
        let elapsed = timestamp_seconds(&caps);
        let fraction = (elapsed / self.total_secs).clamp(0.0, 1.0);
        if fraction < self.best_fraction {
            return None;
        }
        self.best_fraction = fraction;

        let percent = (fraction * 100.0).round() as i64;
        if percent == self.last_percent {
            return None;
        }
        self.last_percent = percent;
        Some(fraction)
    }
}

fn timestamp_seconds(caps: &regex::Captures) -> f64 {
    let part = |i: usize| caps[i].parse::<f64>().unwrap_or(0.0);
    part(1) * 3600.0 + part(2) * 60.0 + part(3) + part(4) * 0.01
}
