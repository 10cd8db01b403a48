//! Discovery stage: walk input paths, classify media, assemble sequences,
//! and run the per-item probe/thumbnail pipeline.
//!
//! A scan generation owns the worker's path queue: `scan_paths` received at
//! a suspension point appends to the running generation instead of starting
//! a second one, and exactly one `scan_complete`/`scan_cancelled` terminal
//! is emitted per generation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::dispatcher::{Stage, Worker};
use crate::error::StageError;
use crate::media::{self, Framerate, MediaDelta, MediaKind, MediaState};
use crate::messages::EngineEvent;
use crate::probe;
use crate::procrun;
use crate::sequence::{self, Sequence};

const VIDEO_EXTS: &[&str] = &["avi", "mov", "mp4", "m4v", "mkv", "webm"];
const IMAGE_EXTS: &[&str] = &["png", "tif", "tiff", "jpg", "jpeg", "dpx", "exr"];

/// Throttle for `scan_update` emission during a walk.
const SCAN_UPDATE_INTERVAL: Duration = Duration::from_millis(300);

pub(crate) fn is_video_path(path: &Path) -> bool {
    has_extension_in(path, VIDEO_EXTS)
}

pub(crate) fn is_image_path(path: &Path) -> bool {
    has_extension_in(path, IMAGE_EXTS)
}

fn has_extension_in(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|known| *known == ext)
        })
        .unwrap_or(false)
}

/// Engine outputs are recognizable by their filename tail; skipping them on
/// ingest keeps a rescan of an output directory from re-encoding results.
pub(crate) fn matches_output_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(suffix))
        .unwrap_or(false)
}

#[derive(Debug, Default)]
struct ScanProgress {
    dirs: u64,
    files: u64,
    last_emit: Option<Instant>,
}

impl Worker {
    pub(crate) fn run_scan(&mut self, paths: Vec<String>, framerate: Framerate) {
        self.scan_cancel = false;
        self.scan_queue.clear();
        for path in paths {
            self.scan_queue.push_back((PathBuf::from(path), framerate));
        }
        info!("scan started with {} path(s)", self.scan_queue.len());

        let mut progress = ScanProgress::default();
        while let Some((root, rate)) = self.scan_queue.pop_front() {
            if self.scan_cancel {
                break;
            }
            self.scan_root(&root, rate, &mut progress);
        }
        self.finish_scan(&progress);
    }

    fn finish_scan(&mut self, progress: &ScanProgress) {
        if self.scan_cancel {
            info!(
                "scan cancelled after {} dir(s), {} file(s)",
                progress.dirs, progress.files
            );
            self.scan_queue.clear();
            self.events.emit(EngineEvent::ScanCancelled);
            // Half-ingested entries are the scanner's to clean up.
            self.catalogue.sweep_new();
        } else {
            info!(
                "scan complete: {} dir(s), {} file(s)",
                progress.dirs, progress.files
            );
            self.events.emit(EngineEvent::ScanComplete);
        }
    }

    fn scan_root(&mut self, root: &Path, rate: Framerate, progress: &mut ScanProgress) {
        self.pump(Stage::Scan);
        if self.scan_cancel {
            return;
        }

        let root = media::canonical_path(root);
        let mut videos: Vec<PathBuf> = Vec::new();
        let mut images: Vec<PathBuf> = Vec::new();

        let meta = match fs::metadata(&root) {
            Ok(meta) => meta,
            Err(err) => {
                debug!("scan: ignoring unreadable path {}: {err}", root.display());
                return;
            }
        };

        if meta.is_file() {
            progress.files += 1;
            self.classify(&root, &mut videos, &mut images);
        } else if meta.is_dir() {
            for entry in WalkDir::new(&root).follow_links(true) {
                if self.scan_cancel {
                    return;
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        debug!("scan: skipping unreadable entry under {}: {err}", root.display());
                        continue;
                    }
                };
                if entry.file_type().is_dir() {
                    progress.dirs += 1;
                } else if entry.file_type().is_file() {
                    progress.files += 1;
                    self.classify(entry.path(), &mut videos, &mut images);
                }
                self.tick(progress, &mut videos);
            }
        } else {
            debug!("scan: ignoring non-regular path {}", root.display());
            return;
        }

        if self.scan_cancel {
            return;
        }

        // End-of-walk drain: remaining videos first, then the sequences
        // assembled from this walk's images.
        self.drain_videos(&mut videos);
        for seq in sequence::assemble(&images, self.config.minimum_items, self.config.contiguous_only)
        {
            if self.scan_cancel {
                return;
            }
            self.ingest_sequence(seq, rate);
        }
    }

    fn classify(&self, path: &Path, videos: &mut Vec<PathBuf>, images: &mut Vec<PathBuf>) {
        if is_video_path(path) {
            if matches_output_suffix(path, &self.config.output_suffix) {
                info!("scan ignoring: {}", path.display());
                return;
            }
            videos.push(path.to_path_buf());
        } else if is_image_path(path) {
            images.push(path.to_path_buf());
        }
    }

    /// Throttled mid-walk checkpoint: publish counters, make what has been
    /// discovered so far visible by running its pipeline, and observe any
    /// commands that arrived meanwhile.
    fn tick(&mut self, progress: &mut ScanProgress, videos: &mut Vec<PathBuf>) {
        let due = progress
            .last_emit
            .is_none_or(|last| last.elapsed() >= SCAN_UPDATE_INTERVAL);
        if !due {
            return;
        }
        progress.last_emit = Some(Instant::now());
        self.events.emit(EngineEvent::ScanUpdate {
            dirs: progress.dirs,
            files: progress.files,
        });
        self.drain_videos(videos);
        self.pump(Stage::Scan);
    }

    fn drain_videos(&mut self, videos: &mut Vec<PathBuf>) {
        for path in std::mem::take(videos) {
            if self.scan_cancel {
                return;
            }
            self.ingest_video(&path);
        }
    }

    fn ingest_video(&mut self, path: &Path) {
        let canonical = media::canonical_path(path);
        let path_str = canonical.to_string_lossy().into_owned();
        let id = media::media_id(&path_str);

        let filename = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dirpath = canonical
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.catalogue.upsert(
            &id,
            MediaDelta {
                kind: Some(MediaKind::Video),
                path: Some(path_str),
                dirpath: Some(dirpath),
                displayname: Some(filename.clone()),
                filename: Some(filename),
                state: Some(MediaState::New),
                progress: Some(0.0),
                ..MediaDelta::default()
            },
        );
        self.finish_item(&id);
    }

    fn ingest_sequence(&mut self, seq: Sequence, rate: Framerate) {
        let spec = seq.spec_string();
        let id = media::media_id(&spec);

        let zero_path = seq.zero_path();
        let dirpath = Path::new(&zero_path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let filename = Path::new(&spec)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| spec.clone());

        self.catalogue.upsert(
            &id,
            MediaDelta {
                kind: Some(MediaKind::Sequence),
                path: Some(spec),
                dirpath: Some(dirpath),
                filename: Some(filename),
                displayname: Some(seq.display_name()),
                framerate: Some(rate),
                state: Some(MediaState::New),
                progress: Some(0.0),
                ..MediaDelta::default()
            },
        );
        self.finish_item(&id);
    }

    /// Complete a freshly upserted item: probe, thumbnail, then `ready`.
    /// Failure of either sub-step removes the item; cancellation leaves it
    /// in `new` for the terminal sweep.
    fn finish_item(&mut self, id: &str) {
        self.pump(Stage::Scan);
        if self.scan_cancel {
            return;
        }
        match self.probe_and_thumbnail(id) {
            Ok(()) => self
                .catalogue
                .upsert(id, MediaDelta::state(MediaState::Ready)),
            Err(StageError::Cancelled) => {}
            Err(err) => {
                warn!("scan: dropping {id}: {err}");
                self.catalogue.delete(id);
            }
        }
    }

    fn probe_and_thumbnail(&mut self, id: &str) -> Result<(), StageError> {
        let Some(item) = self.catalogue.lookup(id).cloned() else {
            return Ok(());
        };

        let facts = probe::probe_item(&self.tools, &item).map_err(StageError::Probe)?;
        let mut delta = MediaDelta {
            codec: Some(facts.codec),
            resolution: Some(facts.resolution),
            pixfmt: Some(facts.pixfmt),
            duration: Some(facts.duration),
            colorspace: facts.colorspace,
            ..MediaDelta::default()
        };
        match item.kind {
            MediaKind::Video => {
                delta.framerate = Some(facts.framerate);
                delta.filesize = Some(fs::metadata(&item.path).map(|m| m.len()).unwrap_or(0));
            }
            MediaKind::Sequence => {
                // The demuxer reports a nominal rate for image input; the
                // scan-supplied rate on the item stays authoritative.
                delta.filesize = Some(
                    sequence_filesize(&item.path).map_err(StageError::Probe)?,
                );
            }
        }
        self.catalogue.upsert(id, delta);

        self.pump(Stage::Scan);
        if self.scan_cancel {
            return Err(StageError::Cancelled);
        }

        let Some(item) = self.catalogue.lookup(id).cloned() else {
            return Ok(());
        };
        let jpeg = self
            .extract_thumbnail(&item)
            .map_err(StageError::Thumbnail)?;
        self.catalogue.upsert(
            id,
            MediaDelta {
                thumbnail: Some(jpeg),
                ..MediaDelta::default()
            },
        );

        self.pump(Stage::Scan);
        if self.scan_cancel {
            return Err(StageError::Cancelled);
        }
        Ok(())
    }

    /// One JPEG frame from the head of the item, height 256, aspect kept.
    fn extract_thumbnail(&self, item: &crate::media::MediaItem) -> Result<Vec<u8>> {
        let mut args: Vec<String> = ["-v", "error"].map(String::from).to_vec();
        args.extend(procrun::input_args(item, None)?);
        args.extend(
            ["-frames:v", "1", "-vf", "scale=-1:256", "-f", "singlejpeg", "-y", "-"]
                .map(String::from),
        );

        let jpeg = procrun::run(&self.tools.ffmpeg, &args)?;
        if jpeg.is_empty() {
            bail!("encoder produced no thumbnail data for {}", item.path);
        }
        Ok(jpeg)
    }
}

fn sequence_filesize(spec: &str) -> Result<u64> {
    let seq = Sequence::parse(spec).context("bad sequence template in catalogue")?;
    let mut total = 0u64;
    for frame in seq.frame_paths() {
        match fs::metadata(&frame) {
            Ok(meta) => total += meta.len(),
            Err(err) => debug!("sequence member missing {}: {err}", frame.display()),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::test_worker;
    use crate::messages::EngineEvent;
    use std::sync::mpsc::Receiver;

    fn drain(rx: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn classification_is_case_insensitive_and_dot_gated() {
        assert!(is_video_path(Path::new("/a/Clip.MOV")));
        assert!(is_video_path(Path::new("/a/clip.webm")));
        assert!(!is_video_path(Path::new("/a/clip.txt")));
        assert!(!is_video_path(Path::new("/a/mov")));
        assert!(is_image_path(Path::new("/a/frame_0001.DPX")));
        assert!(is_image_path(Path::new("/a/frame.jpeg")));
        assert!(!is_image_path(Path::new("/a/frame")));
    }

    #[test]
    fn output_suffix_guard_matches_only_the_filename_tail() {
        assert!(matches_output_suffix(
            Path::new("/a/clip_prores.mov"),
            "_prores.mov"
        ));
        assert!(!matches_output_suffix(Path::new("/a/clip.mov"), "_prores.mov"));
        assert!(!matches_output_suffix(
            Path::new("/a_prores.mov/clip.mov"),
            "_prores.mov"
        ));
    }

    #[test]
    fn scan_of_missing_paths_still_terminates_with_scan_complete() {
        let (mut worker, _cmd_tx, ev_rx) = test_worker();
        worker.run_scan(vec!["/does/not/exist".to_string()], Framerate(30, 1));

        let events = drain(&ev_rx);
        assert_eq!(events, vec![EngineEvent::ScanComplete]);
    }

    #[test]
    fn scan_of_non_media_files_emits_counts_but_no_items() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("notes.txt"), b"hello").expect("write");

        let (mut worker, _cmd_tx, ev_rx) = test_worker();
        worker.run_scan(
            vec![dir.path().to_string_lossy().into_owned()],
            Framerate(30, 1),
        );

        let events = drain(&ev_rx);
        assert!(
            events
                .iter()
                .all(|e| !matches!(e, EngineEvent::MediaUpdate { .. })),
            "no media items expected: {events:?}"
        );
        assert!(
            events
                .iter()
                .any(|e| matches!(e, EngineEvent::ScanUpdate { .. })),
            "walking a directory should publish at least one scan_update"
        );
        assert_eq!(events.last(), Some(&EngineEvent::ScanComplete));
        assert!(worker.catalogue.is_empty());
    }

    #[test]
    fn unprobeable_video_is_ingested_then_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("broken.mov"), b"not a movie").expect("write");

        let (mut worker, _cmd_tx, ev_rx) = test_worker();
        worker.run_scan(
            vec![dir.path().to_string_lossy().into_owned()],
            Framerate(30, 1),
        );

        let events = drain(&ev_rx);
        let saw_new = events.iter().any(|e| matches!(
            e,
            EngineEvent::MediaUpdate { fields, .. } if fields.state == Some(MediaState::New)
        ));
        let saw_delete = events
            .iter()
            .any(|e| matches!(e, EngineEvent::MediaDelete { .. }));
        assert!(saw_new, "item must become visible before probing: {events:?}");
        assert!(saw_delete, "probe failure must remove the item: {events:?}");
        assert_eq!(events.last(), Some(&EngineEvent::ScanComplete));
        assert!(worker.catalogue.is_empty(), "failed items never stay catalogued");
    }

    #[test]
    fn cancelled_generation_sweeps_new_items_after_the_terminal() {
        let (mut worker, _cmd_tx, ev_rx) = test_worker();
        worker
            .catalogue
            .upsert("aa", crate::media::MediaDelta::state(MediaState::New));
        worker
            .catalogue
            .upsert("bb", crate::media::MediaDelta::state(MediaState::Ready));
        let _ = drain(&ev_rx);

        worker.scan_cancel = true;
        worker.finish_scan(&super::ScanProgress::default());

        let events = drain(&ev_rx);
        assert_eq!(
            events,
            vec![
                EngineEvent::ScanCancelled,
                EngineEvent::MediaDelete { id: "aa".to_string() },
            ],
            "terminal precedes the sweep and ready items survive"
        );
        assert!(worker.catalogue.lookup("bb").is_some());
    }

    #[test]
    fn already_suffixed_outputs_are_never_ingested() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("clip_prores.mov"), b"previous output").expect("write");

        let (mut worker, _cmd_tx, ev_rx) = test_worker();
        worker.run_scan(
            vec![dir.path().to_string_lossy().into_owned()],
            Framerate(30, 1),
        );

        let events = drain(&ev_rx);
        assert!(
            events
                .iter()
                .all(|e| !matches!(e, EngineEvent::MediaUpdate { .. })),
            "default outputs must be filtered: {events:?}"
        );
        assert_eq!(events.last(), Some(&EngineEvent::ScanComplete));
    }
}
