//! Numbered image-sequence assembly.
//!
//! Frame sets are addressed by a `{head}{digits}{tail}` template. Inside the
//! catalogue a sequence's `path` is the printf-style spec string
//! `head%04dtail [ranges]`, which survives a parse/format round trip; the
//! zero-padded and hash forms are derived views used for output paths and
//! display names respectively.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use once_cell::sync::Lazy;
use regex::Regex;

// Lazy head so the capture binds the *last* digit run in a filename, which
// is where frame numbers conventionally live ("v2_frame_0010.png").
static RE_FRAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<head>.*?)(?P<index>\d+)(?P<tail>\D*)$").unwrap());

static RE_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<head>.*?)%(?:0(?P<pad>\d+))?d(?P<tail>[^\[]*) \[(?P<ranges>[0-9, \-]*)\]$")
        .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// Everything before the frame number, directory part included.
    pub head: String,
    /// Everything after the frame number, extension included.
    pub tail: String,
    /// Fixed digit width, or 0 for unpadded numbering.
    pub padding: usize,
    pub indexes: BTreeSet<u64>,
}

impl Sequence {
    /// Parse the canonical spec string (`head%04dtail [1-10, 12]`).
    pub fn parse(spec: &str) -> Result<Sequence> {
        let caps = RE_SPEC
            .captures(spec)
            .with_context(|| format!("not a sequence template: {spec}"))?;

        let padding = match caps.name("pad") {
            Some(m) => m.as_str().parse::<usize>()?,
            None => 0,
        };

        let indexes = parse_ranges(&caps["ranges"])
            .with_context(|| format!("bad index ranges in template: {spec}"))?;
        if indexes.is_empty() {
            bail!("sequence template has no indexes: {spec}");
        }

        Ok(Sequence {
            head: caps["head"].to_string(),
            tail: caps["tail"].to_string(),
            padding,
            indexes,
        })
    }

    /// Canonical spec string; `parse` of this value reproduces `self`.
    pub fn spec_string(&self) -> String {
        format!(
            "{}{}{} [{}]",
            self.head,
            self.placeholder(),
            self.tail,
            self.ranges()
        )
    }

    fn placeholder(&self) -> String {
        if self.padding > 0 {
            format!("%0{}d", self.padding)
        } else {
            "%d".to_string()
        }
    }

    /// printf-style pattern path handed to the encoder (`-i`).
    pub fn pattern_path(&self) -> String {
        format!("{}{}{}", self.head, self.placeholder(), self.tail)
    }

    /// Placeholder filled with zeros; filesystem-safe base for output paths.
    pub fn zero_path(&self) -> String {
        format!("{}{}{}", self.head, "0".repeat(self.padding), self.tail)
    }

    /// Human-facing name: `head####tail (ranges)`, directory stripped.
    pub fn display_name(&self) -> String {
        let display = format!(
            "{}{}{} ({})",
            self.head,
            "#".repeat(self.padding),
            self.tail,
            self.ranges()
        );
        Path::new(&display)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(display)
    }

    /// Comma-separated contiguous index spans, e.g. `1-100, 102-120`.
    pub fn ranges(&self) -> String {
        let mut spans: Vec<String> = Vec::new();
        let mut iter = self.indexes.iter().copied();
        let Some(mut start) = iter.next() else {
            return String::new();
        };
        let mut end = start;
        for index in iter {
            if index == end + 1 {
                end = index;
            } else {
                spans.push(span_text(start, end));
                start = index;
                end = index;
            }
        }
        spans.push(span_text(start, end));
        spans.join(", ")
    }

    pub fn first(&self) -> u64 {
        *self.indexes.iter().next().unwrap_or(&0)
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn is_contiguous(&self) -> bool {
        match (self.indexes.iter().next(), self.indexes.iter().next_back()) {
            (Some(first), Some(last)) => last - first + 1 == self.indexes.len() as u64,
            _ => true,
        }
    }

    /// Path of one member frame.
    pub fn frame_path(&self, index: u64) -> PathBuf {
        let number = if self.padding > 0 {
            format!("{index:0width$}", width = self.padding)
        } else {
            index.to_string()
        };
        PathBuf::from(format!("{}{}{}", self.head, number, self.tail))
    }

    /// All member frame paths, in index order.
    pub fn frame_paths(&self) -> Vec<PathBuf> {
        self.indexes.iter().map(|&i| self.frame_path(i)).collect()
    }
}

fn span_text(start: u64, end: u64) -> String {
    if start == end {
        format!("{start}")
    } else {
        format!("{start}-{end}")
    }
}

fn parse_ranges(text: &str) -> Result<BTreeSet<u64>> {
    let mut indexes = BTreeSet::new();
    for span in text.split(',') {
        let span = span.trim();
        if span.is_empty() {
            continue;
        }
        match span.split_once('-') {
            Some((start, end)) => {
                let start: u64 = start.trim().parse()?;
                let end: u64 = end.trim().parse()?;
                if end < start {
                    bail!("descending span {span}");
                }
                indexes.extend(start..=end);
            }
            None => {
                indexes.insert(span.parse()?);
            }
        }
    }
    Ok(indexes)
}

/// Cluster image paths into numbered sequences.
///
/// Files group by `(head, tail, padding)` where padding is the digit width
/// when the frame number carries leading zeros and 0 (unpadded) otherwise.
/// Groups smaller than `minimum_items` are dropped, as are non-contiguous
/// groups when `contiguous_only` is set. Files whose names carry no digits
/// at all are ignored.
pub fn assemble(paths: &[PathBuf], minimum_items: usize, contiguous_only: bool) -> Vec<Sequence> {
    let mut groups: HashMap<(String, String, usize), BTreeSet<u64>> = HashMap::new();

    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(caps) = RE_FRAME.captures(name) else {
            continue;
        };
        let digits = &caps["index"];
        let Ok(index) = digits.parse::<u64>() else {
            continue;
        };
        let padding = if digits.len() > 1 && digits.starts_with('0') {
            digits.len()
        } else {
            0
        };

        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let head = dir
            .join(&caps["head"])
            .to_string_lossy()
            .into_owned();
        let tail = caps["tail"].to_string();

        groups.entry((head, tail, padding)).or_default().insert(index);
    }

    let mut sequences: Vec<Sequence> = groups
        .into_iter()
        .map(|((head, tail, padding), indexes)| Sequence {
            head,
            tail,
            padding,
            indexes,
        })
        .filter(|seq| seq.len() >= minimum_items)
        .filter(|seq| !contiguous_only || seq.is_contiguous())
        .collect();

    // Group ordering out of the hash map is arbitrary; give callers a
    // stable result.
    sequences.sort_by(|a, b| a.head.cmp(&b.head).then(a.tail.cmp(&b.tail)));
    sequences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_files(dir: &str, stem: &str, width: usize, range: std::ops::RangeInclusive<u64>) -> Vec<PathBuf> {
        range
            .map(|i| PathBuf::from(format!("{dir}/{stem}{i:0w$}.png", w = width)))
            .collect()
    }

    #[test]
    fn assembles_padded_frames_into_one_sequence() {
        let paths = frame_files("/shots", "frame_", 4, 1..=300);
        let sequences = assemble(&paths, 2, true);
        assert_eq!(sequences.len(), 1);

        let seq = &sequences[0];
        assert_eq!(seq.head, "/shots/frame_");
        assert_eq!(seq.tail, ".png");
        assert_eq!(seq.padding, 4);
        assert_eq!(seq.len(), 300);
        assert_eq!(seq.display_name(), "frame_####.png (1-300)");
        assert_eq!(seq.pattern_path(), "/shots/frame_%04d.png");
        assert_eq!(seq.first(), 1);
    }

    #[test]
    fn ranges_describe_gaps() {
        let mut paths = frame_files("/shots", "sh010_", 4, 1..=100);
        paths.extend(frame_files("/shots", "sh010_", 4, 102..=120));
        let sequences = assemble(&paths, 2, false);
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].ranges(), "1-100, 102-120");
        assert!(!sequences[0].is_contiguous());
    }

    #[test]
    fn contiguous_only_discards_gapped_sequences() {
        let mut paths = frame_files("/shots", "sh010_", 4, 1..=10);
        paths.extend(frame_files("/shots", "sh010_", 4, 20..=30));
        assert!(assemble(&paths, 2, true).is_empty());
    }

    #[test]
    fn minimum_items_filters_singletons() {
        let paths = vec![PathBuf::from("/shots/lonely_0001.png")];
        assert!(assemble(&paths, 2, true).is_empty());
        assert_eq!(assemble(&paths, 1, true).len(), 1);
    }

    #[test]
    fn distinct_stems_yield_distinct_sequences() {
        let mut paths = frame_files("/shots", "a_", 4, 1..=5);
        paths.extend(frame_files("/shots", "b_", 4, 1..=5));
        let sequences = assemble(&paths, 2, true);
        assert_eq!(sequences.len(), 2);
    }

    #[test]
    fn digitless_names_are_ignored() {
        let paths = vec![
            PathBuf::from("/shots/readme.png"),
            PathBuf::from("/shots/readme2.png"),
        ];
        // A single file with one digit is not enough for a sequence.
        assert!(assemble(&paths, 2, true).is_empty());
    }

    #[test]
    fn spec_string_round_trips_through_parse() {
        let paths = frame_files("/shots", "frame_", 4, 7..=12);
        let seq = assemble(&paths, 2, true).remove(0);

        let spec = seq.spec_string();
        assert_eq!(spec, "/shots/frame_%04d.png [7-12]");

        let reparsed = Sequence::parse(&spec).expect("round trip parse");
        assert_eq!(reparsed, seq);
        assert_eq!(reparsed.display_name(), seq.display_name());
    }

    #[test]
    fn unpadded_frames_use_plain_placeholder() {
        let paths: Vec<PathBuf> = (8..=11)
            .map(|i| PathBuf::from(format!("/shots/take{i}.dpx")))
            .collect();
        let seq = assemble(&paths, 2, true).remove(0);
        assert_eq!(seq.padding, 0);
        assert_eq!(seq.pattern_path(), "/shots/take%d.dpx");
        assert_eq!(seq.frame_path(9), PathBuf::from("/shots/take9.dpx"));

        let reparsed = Sequence::parse(&seq.spec_string()).expect("unpadded round trip");
        assert_eq!(reparsed, seq);
    }

    #[test]
    fn frame_paths_resolve_padded_members() {
        let seq = Sequence::parse("/shots/frame_%03d.tif [5-7]").expect("parse");
        assert_eq!(
            seq.frame_paths(),
            vec![
                PathBuf::from("/shots/frame_005.tif"),
                PathBuf::from("/shots/frame_006.tif"),
                PathBuf::from("/shots/frame_007.tif"),
            ]
        );
    }

    #[test]
    fn zero_path_fills_placeholder_with_zeros() {
        let seq = Sequence::parse("/shots/frame_%04d.png [1-3]").expect("parse");
        assert_eq!(seq.zero_path(), "/shots/frame_0000.png");
    }
}
