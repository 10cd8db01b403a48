//! Thin wrapper around the external encoder binaries.
//!
//! Owns binary resolution, argv construction for both media kinds, captured
//! one-shot runs, and supervised spawns with piped stderr. Nothing here
//! interprets encoder output beyond splitting it into lines; progress
//! parsing lives with the encode queue.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result, bail};
use log::debug;

use crate::config::EngineConfig;
use crate::media::{Framerate, MediaItem, MediaKind};
use crate::sequence::Sequence;

/// Resolved paths of the three encoder binaries.
#[derive(Debug, Clone)]
pub struct Tools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ffplay: PathBuf,
}

impl Tools {
    /// Resolution order: an explicitly configured ffmpeg path (its siblings
    /// supply ffprobe/ffplay), then a `bin/` directory next to the current
    /// executable on Windows, then the bare names via the process PATH.
    pub fn resolve(config: &EngineConfig) -> Tools {
        if let Some(ref ffmpeg) = config.ffmpeg_path {
            let dir = ffmpeg.parent();
            return Tools {
                ffmpeg: ffmpeg.clone(),
                ffprobe: sibling_or_bare(dir, "ffprobe"),
                ffplay: sibling_or_bare(dir, "ffplay"),
            };
        }

        if cfg!(windows) {
            if let Some(bin) = executable_bin_dir() {
                return Tools {
                    ffmpeg: bin.join(binary_name("ffmpeg")),
                    ffprobe: bin.join(binary_name("ffprobe")),
                    ffplay: bin.join(binary_name("ffplay")),
                };
            }
        }

        Tools {
            ffmpeg: PathBuf::from(binary_name("ffmpeg")),
            ffprobe: PathBuf::from(binary_name("ffprobe")),
            ffplay: PathBuf::from(binary_name("ffplay")),
        }
    }
}

fn binary_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

fn sibling_or_bare(dir: Option<&Path>, base: &str) -> PathBuf {
    if let Some(dir) = dir {
        let candidate = dir.join(binary_name(base));
        if candidate.exists() {
            return candidate;
        }
    }
    PathBuf::from(binary_name(base))
}

fn executable_bin_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let bin = exe.parent()?.join("bin");
    if bin.is_dir() { Some(bin) } else { None }
}

/// Run to completion and capture stdout. A non-zero exit code is an error
/// carrying the last stderr line for diagnostics.
pub fn run(program: &Path, args: &[String]) -> Result<Vec<u8>> {
    debug!("run: {}", format_command_line(program, args));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to run {}", program.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().last().unwrap_or("").trim();
        bail!(
            "{} exited with {}: {tail}",
            program.display(),
            output.status
        );
    }

    Ok(output.stdout)
}

/// Spawn with stderr piped for supervision. Stdout is discarded; the encode
/// queue reads stderr exclusively.
pub fn spawn_supervised(program: &Path, args: &[String]) -> Result<Child> {
    debug!("spawn: {}", format_command_line(program, args));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {}", program.display()))
}

/// Fire-and-forget spawn with all stdio detached (preview playback).
pub fn spawn_detached(program: &Path, args: &[String]) -> Result<Child> {
    debug!("spawn detached: {}", format_command_line(program, args));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn {}", program.display()))
}

/// ffmpeg-style input argument block for an item.
///
/// Videos are a plain `-i path`. Sequences prepend the demuxer frame rate
/// and start number around the printf-style pattern path; when the probe
/// recorded no colour space, a BT.709 colour spec is injected so untagged
/// frames encode with known-good primaries.
pub fn input_args(item: &MediaItem, rate_override: Option<Framerate>) -> Result<Vec<String>> {
    match item.kind {
        MediaKind::Video => Ok(vec!["-i".to_string(), item.path.clone()]),
        MediaKind::Sequence => {
            let seq = Sequence::parse(&item.path)?;
            let rate = rate_override.unwrap_or(item.framerate);

            let mut args = vec!["-framerate".to_string(), rate.ratio()];
            if item.colorspace.is_none() {
                args.extend(
                    [
                        "-color_primaries",
                        "bt709",
                        "-color_trc",
                        "bt709",
                        "-colorspace",
                        "bt709",
                    ]
                    .map(String::from),
                );
            }
            args.push("-start_number".to_string());
            args.push(seq.first().to_string());
            args.push("-i".to_string());
            args.push(seq.pattern_path());
            Ok(args)
        }
    }
}

/// Copy/paste-friendly rendering of an argv, quoting arguments with spaces.
pub fn format_command_line(program: &Path, args: &[String]) -> String {
    let mut parts = vec![quote_arg(&program.to_string_lossy())];
    parts.extend(args.iter().map(|a| quote_arg(a)));
    parts.join(" ")
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(char::is_whitespace) {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}

/// Assembles stderr bytes into lines.
///
/// ffmpeg rewrites its progress line in place with bare carriage returns, so
/// `\r` and `\n` are both line terminators; blank lines (e.g. from `\r\n`
/// pairs) are swallowed.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        LineAssembler::default()
    }

    /// Feed one byte; returns a completed line when `byte` terminates one.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == b'\r' || byte == b'\n' {
            return self.flush();
        }
        self.buf.push(byte);
        None
    }

    /// Terminate the current partial line, if any.
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        if line.is_empty() { None } else { Some(line) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaState;

    fn video_item(path: &str) -> MediaItem {
        let mut item = MediaItem::empty("00c0ffee");
        item.kind = MediaKind::Video;
        item.path = path.to_string();
        item.state = MediaState::Ready;
        item
    }

    fn sequence_item(spec: &str, framerate: Framerate) -> MediaItem {
        let mut item = MediaItem::empty("00c0ffee");
        item.kind = MediaKind::Sequence;
        item.path = spec.to_string();
        item.framerate = framerate;
        item
    }

    #[test]
    fn video_input_is_a_plain_dash_i() {
        let args = input_args(&video_item("/footage/clip.mov"), None).expect("args");
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        assert_eq!(args, ["-i", "/footage/clip.mov"]);
    }

    #[test]
    fn sequence_input_carries_rate_start_number_and_bt709_fallback() {
        let item = sequence_item("/shots/frame_%04d.png [7-12]", Framerate(24000, 1001));
        let args = input_args(&item, None).expect("args");
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        assert_eq!(
            args,
            [
                "-framerate", "24000:1001",
                "-color_primaries", "bt709",
                "-color_trc", "bt709",
                "-colorspace", "bt709",
                "-start_number", "7",
                "-i", "/shots/frame_%04d.png",
            ]
        );
    }

    #[test]
    fn tagged_sequences_skip_the_colour_spec() {
        let mut item = sequence_item("/shots/frame_%04d.png [1-3]", Framerate(25, 1));
        item.colorspace = Some("bt709".to_string());
        let args = input_args(&item, None).expect("args");
        assert!(!args.iter().any(|a| a == "-color_primaries"));
    }

    #[test]
    fn rate_override_replaces_the_item_rate() {
        let item = sequence_item("/shots/frame_%04d.png [1-3]", Framerate(30, 1));
        let args = input_args(&item, Some(Framerate(60, 1))).expect("args");
        assert!(args.windows(2).any(|w| w[0] == "-framerate" && w[1] == "60:1"));
    }

    #[test]
    fn command_line_quotes_arguments_with_spaces() {
        let line = format_command_line(
            Path::new("ffmpeg"),
            &["-i".to_string(), "/my footage/clip.mov".to_string()],
        );
        assert_eq!(line, "ffmpeg -i \"/my footage/clip.mov\"");
    }

    #[test]
    fn line_assembler_flushes_on_both_terminators() {
        let mut assembler = LineAssembler::new();
        let mut lines = Vec::new();
        for byte in b"Duration: 00:00:10.00\ntime=00:00:05.00\rtime=00:00:06.00\r" {
            if let Some(line) = assembler.push(*byte) {
                lines.push(line);
            }
        }
        assert_eq!(
            lines,
            vec![
                "Duration: 00:00:10.00",
                "time=00:00:05.00",
                "time=00:00:06.00",
            ]
        );
    }

    #[test]
    fn line_assembler_swallows_blank_lines_and_flushes_partials() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b'\r').is_none());
        assert!(assembler.push(b'\n').is_none(), "CRLF must not produce an empty line");
        for byte in b"tail without newline" {
            assert!(assembler.push(*byte).is_none());
        }
        assert_eq!(assembler.flush().as_deref(), Some("tail without newline"));
        assert!(assembler.flush().is_none());
    }
}
