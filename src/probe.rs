//! Media metadata extraction via ffprobe.

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::media::{Framerate, MediaItem};
use crate::procrun::{self, Tools};

/// Facts distilled from a probe run, ready to merge into the catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeFacts {
    pub codec: String,
    pub resolution: (u32, u32),
    pub framerate: Framerate,
    pub pixfmt: String,
    pub duration: f64,
    pub colorspace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    color_space: Option<String>,
}

/// Probe the item's first stream.
pub fn probe_item(tools: &Tools, item: &MediaItem) -> Result<ProbeFacts> {
    let mut args: Vec<String> = [
        "-loglevel",
        "error",
        "-print_format",
        "json",
        "-show_streams",
    ]
    .map(String::from)
    .to_vec();
    args.extend(procrun::input_args(item, None)?);

    let stdout = procrun::run(&tools.ffprobe, &args)?;
    parse_probe_output(&stdout).with_context(|| format!("unusable probe output for {}", item.path))
}

fn parse_probe_output(stdout: &[u8]) -> Result<ProbeFacts> {
    let output: ProbeOutput = serde_json::from_slice(stdout).context("probe emitted bad JSON")?;
    let Some(stream) = output.streams.into_iter().next() else {
        bail!("probe reported no streams");
    };

    let codec = match stream.codec_name {
        Some(codec) => codec,
        None => bail!("probe stream has no codec name"),
    };

    Ok(ProbeFacts {
        codec,
        resolution: (stream.width.unwrap_or(0), stream.height.unwrap_or(0)),
        framerate: parse_rational(stream.r_frame_rate.as_deref().unwrap_or("")),
        pixfmt: stream.pix_fmt.unwrap_or_else(|| "unknown".to_string()),
        duration: stream
            .duration
            .and_then(|d| d.trim().parse::<f64>().ok())
            .unwrap_or(0.0),
        colorspace: stream.color_space,
    })
}

/// Parse ffprobe's `num/den` rational. A zero denominator (the `0/0` an
/// image sequence probe reports) yields the unknown rate `(0, 0)` rather
/// than an error.
fn parse_rational(text: &str) -> Framerate {
    let (num, den) = match text.split_once('/') {
        Some((num, den)) => (num.trim(), den.trim()),
        None => (text.trim(), "1"),
    };
    let num: u32 = match num.parse() {
        Ok(n) => n,
        Err(_) => return Framerate(0, 0),
    };
    let den: u32 = match den.parse() {
        Ok(d) => d,
        Err(_) => return Framerate(0, 0),
    };
    if den == 0 {
        return Framerate(0, 0);
    }
    Framerate(num, den)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_typical_video_stream() {
        let stdout = br#"{
            "streams": [
                {
                    "codec_name": "prores",
                    "width": 1920,
                    "height": 1080,
                    "pix_fmt": "yuv422p10le",
                    "r_frame_rate": "24000/1001",
                    "duration": "12.512500",
                    "color_space": "bt709"
                }
            ]
        }"#;
        let facts = parse_probe_output(stdout).expect("parse");
        assert_eq!(facts.codec, "prores");
        assert_eq!(facts.resolution, (1920, 1080));
        assert_eq!(facts.framerate, Framerate(24000, 1001));
        assert_eq!(facts.pixfmt, "yuv422p10le");
        assert!((facts.duration - 12.5125).abs() < 1e-9);
        assert_eq!(facts.colorspace.as_deref(), Some("bt709"));
    }

    #[test]
    fn zero_denominator_rate_is_unknown_not_an_error() {
        let stdout = br#"{
            "streams": [
                {"codec_name": "png", "width": 2048, "height": 858, "r_frame_rate": "0/0"}
            ]
        }"#;
        let facts = parse_probe_output(stdout).expect("parse");
        assert_eq!(facts.framerate, Framerate(0, 0));
        assert_eq!(facts.duration, 0.0);
        assert_eq!(facts.pixfmt, "unknown");
        assert!(facts.colorspace.is_none());
    }

    #[test]
    fn missing_streams_or_codec_fail_the_probe() {
        assert!(parse_probe_output(br#"{"streams": []}"#).is_err());
        assert!(parse_probe_output(br#"{"streams": [{"width": 10}]}"#).is_err());
        assert!(parse_probe_output(b"not json").is_err());
    }

    #[test]
    fn rationals_accept_bare_integers() {
        assert_eq!(parse_rational("25"), Framerate(25, 1));
        assert_eq!(parse_rational("30000/1001"), Framerate(30000, 1001));
        assert_eq!(parse_rational("garbage"), Framerate(0, 0));
    }
}
