use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Kind of catalogued media: a single container file or a numbered frame set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Sequence,
}

/// Lifecycle state of a catalogue entry.
///
/// Allowed transitions: `new -> ready -> queued -> encoding -> done`, with
/// `queued`/`encoding -> ready` on encode cancellation and
/// `encoding -> error` on a failed child exit. Items that fail probing or
/// thumbnailing never leave `new`; they are deleted instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    New,
    Ready,
    Queued,
    Encoding,
    Done,
    Error,
}

/// Rational frame rate, serialized as a `[num, den]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framerate(pub u32, pub u32);

impl Framerate {
    /// A zero denominator (or numerator) marks an unknown rate, as produced
    /// by probing a stream reporting `r_frame_rate = "0/0"`.
    pub fn is_valid(&self) -> bool {
        self.0 > 0 && self.1 > 0
    }

    /// `N:D` form accepted by ffmpeg's `-framerate` option.
    pub fn ratio(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Framerate(30, 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub kind: MediaKind,
    /// Absolute path; for sequences a template spec string (see `sequence`).
    pub path: String,
    pub dirpath: String,
    pub filename: String,
    pub displayname: String,
    pub framerate: Framerate,
    pub resolution: (u32, u32),
    pub codec: String,
    pub pixfmt: String,
    pub colorspace: Option<String>,
    pub duration: f64,
    pub filesize: u64,
    pub thumbnail: Option<Vec<u8>>,
    pub progress: f64,
    pub state: MediaState,
    pub outpath: Option<String>,
}

impl MediaItem {
    /// Fresh entry with template defaults; the scanner fills it in through
    /// successive deltas.
    pub fn empty(id: &str) -> Self {
        MediaItem {
            id: id.to_string(),
            kind: MediaKind::Video,
            path: String::new(),
            dirpath: String::new(),
            filename: String::new(),
            displayname: String::new(),
            framerate: Framerate::default(),
            resolution: (0, 0),
            codec: String::new(),
            pixfmt: String::new(),
            colorspace: None,
            duration: 0.0,
            filesize: 0,
            thumbnail: None,
            progress: 0.0,
            state: MediaState::New,
            outpath: None,
        }
    }

    /// Shallow merge: fields absent from the delta keep their current value.
    pub fn apply(&mut self, delta: &MediaDelta) {
        if let Some(kind) = delta.kind {
            self.kind = kind;
        }
        if let Some(ref path) = delta.path {
            self.path = path.clone();
        }
        if let Some(ref dirpath) = delta.dirpath {
            self.dirpath = dirpath.clone();
        }
        if let Some(ref filename) = delta.filename {
            self.filename = filename.clone();
        }
        if let Some(ref displayname) = delta.displayname {
            self.displayname = displayname.clone();
        }
        if let Some(framerate) = delta.framerate {
            self.framerate = framerate;
        }
        if let Some(resolution) = delta.resolution {
            self.resolution = resolution;
        }
        if let Some(ref codec) = delta.codec {
            self.codec = codec.clone();
        }
        if let Some(ref pixfmt) = delta.pixfmt {
            self.pixfmt = pixfmt.clone();
        }
        if let Some(ref colorspace) = delta.colorspace {
            self.colorspace = Some(colorspace.clone());
        }
        if let Some(duration) = delta.duration {
            self.duration = duration;
        }
        if let Some(filesize) = delta.filesize {
            self.filesize = filesize;
        }
        if let Some(ref thumbnail) = delta.thumbnail {
            self.thumbnail = Some(thumbnail.clone());
        }
        if let Some(progress) = delta.progress {
            self.progress = progress;
        }
        if let Some(state) = delta.state {
            self.state = state;
        }
        if let Some(ref outpath) = delta.outpath {
            self.outpath = Some(outpath.clone());
        }
    }
}

/// Partial update for a catalogue entry. Exactly the fields that changed are
/// set; everything else stays `None` and is skipped on the wire, so a
/// `media_update` event never re-sends full item state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaDelta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<MediaKind>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dirpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub displayname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub framerate: Option<Framerate>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resolution: Option<(u32, u32)>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pixfmt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub colorspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filesize: Option<u64>,
    /// JPEG bytes, base64-encoded on the wire.
    #[serde(
        with = "b64_blob",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub thumbnail: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<MediaState>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub outpath: Option<String>,
}

impl MediaDelta {
    pub fn state(state: MediaState) -> Self {
        MediaDelta {
            state: Some(state),
            ..MediaDelta::default()
        }
    }

    pub fn progress(progress: f64) -> Self {
        MediaDelta {
            progress: Some(progress),
            ..MediaDelta::default()
        }
    }
}

mod b64_blob {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => ser.serialize_some(&STANDARD.encode(bytes)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(de)?;
        match text {
            Some(text) => STANDARD
                .decode(text.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Stable 8-hex-digit identifier: the leading bytes of SHA-1 over the
/// canonical absolute path string. Deterministic across runs so re-scanning
/// the same path updates the existing row instead of inserting a duplicate.
pub fn media_id(canonical_path: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(canonical_path.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

/// Lexically absolute form of a user-supplied path. Equivalent relative and
/// absolute spellings of the same file must hash to the same id, so inputs
/// are absolutized before hashing; symlinks are intentionally not resolved,
/// matching how the paths are later handed to the encoder.
pub fn canonical_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_id_is_deterministic_and_eight_hex_chars() {
        let a = media_id("/footage/clip.mov");
        let b = media_id("/footage/clip.mov");
        assert_eq!(a, b, "same canonical path must yield the same id");
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let other = media_id("/footage/other.mov");
        assert_ne!(a, other, "different paths should not share an id");
    }

    #[test]
    fn canonical_path_absolutizes_relative_inputs() {
        let rel = canonical_path(Path::new("clip.mov"));
        assert!(rel.is_absolute());
        let abs = canonical_path(Path::new("/footage/clip.mov"));
        assert_eq!(abs, PathBuf::from("/footage/clip.mov"));
    }

    #[test]
    fn delta_merge_preserves_fields_absent_from_the_update() {
        let mut item = MediaItem::empty("00c0ffee");
        item.codec = "prores".to_string();
        item.duration = 12.5;

        let delta = MediaDelta {
            resolution: Some((1920, 1080)),
            state: Some(MediaState::Ready),
            ..MediaDelta::default()
        };
        item.apply(&delta);

        assert_eq!(item.resolution, (1920, 1080));
        assert_eq!(item.state, MediaState::Ready);
        assert_eq!(item.codec, "prores", "untouched fields must survive a merge");
        assert_eq!(item.duration, 12.5);
    }

    #[test]
    fn delta_serializes_only_changed_fields() {
        let delta = MediaDelta {
            progress: Some(0.25),
            ..MediaDelta::default()
        };
        let value = serde_json::to_value(&delta).expect("serialize delta");
        let map = value.as_object().expect("delta is an object");
        assert_eq!(map.len(), 1, "only the changed field may appear: {map:?}");
        assert_eq!(map.get("progress").and_then(|v| v.as_f64()), Some(0.25));
    }

    #[test]
    fn thumbnail_round_trips_through_base64() {
        let delta = MediaDelta {
            thumbnail: Some(vec![0xff, 0xd8, 0xff, 0xe0]),
            ..MediaDelta::default()
        };
        let text = serde_json::to_string(&delta).expect("serialize thumbnail");
        assert!(text.contains("/9j/"), "JPEG magic should be base64-encoded: {text}");

        let back: MediaDelta = serde_json::from_str(&text).expect("deserialize thumbnail");
        assert_eq!(back.thumbnail.as_deref(), Some(&[0xff, 0xd8, 0xff, 0xe0][..]));
    }

    #[test]
    fn framerate_ratio_matches_ffmpeg_syntax() {
        assert_eq!(Framerate(24000, 1001).ratio(), "24000:1001");
        assert!(!Framerate(0, 0).is_valid());
        assert!(Framerate(25, 1).is_valid());
    }
}
