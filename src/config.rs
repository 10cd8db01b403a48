use std::path::{Path, PathBuf};

use ini::Ini;
use log::warn;

pub const DEFAULT_OUTPUT_SUFFIX: &str = "_prores.mov";
pub const DEFAULT_CONFIG_FILE: &str = "config.ini";

/// Engine configuration, read from an INI file.
///
/// Every key is optional; missing keys (or a missing file entirely) fall
/// back to the built-in defaults below, so a bare checkout runs without any
/// configuration in place.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Filename tail appended to encode outputs. Scans skip files already
    /// carrying it so the engine never re-ingests its own results.
    pub output_suffix: String,
    /// Explicit ffmpeg binary; its siblings are used for ffprobe/ffplay.
    pub ffmpeg_path: Option<PathBuf>,
    /// Minimum member count before clustered frames count as a sequence.
    pub minimum_items: usize,
    /// Drop assembled sequences whose index set has gaps.
    pub contiguous_only: bool,
    /// Suggested client poll cadence in milliseconds.
    pub engine_poll_interval: u64,
    pub details_style: String,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            ffmpeg_path: None,
            minimum_items: 2,
            contiguous_only: true,
            engine_poll_interval: 200,
            details_style: "long".to_string(),
            log_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`; an unreadable or absent file yields the defaults.
    pub fn load(path: &Path) -> EngineConfig {
        match Ini::load_from_file(path) {
            Ok(ini) => EngineConfig::from_ini(&ini),
            Err(err) => {
                if path.exists() {
                    warn!("ignoring unreadable config {}: {err}", path.display());
                }
                EngineConfig::default()
            }
        }
    }

    fn from_ini(ini: &Ini) -> EngineConfig {
        let mut config = EngineConfig::default();

        if let Some(engine) = ini.section(Some("engine")) {
            if let Some(suffix) = engine.get("output_suffix") {
                config.output_suffix = suffix.to_string();
            }
            if let Some(path) = engine.get("ffmpeg_path") {
                if !path.trim().is_empty() {
                    config.ffmpeg_path = Some(PathBuf::from(path.trim()));
                }
            }
        }

        if let Some(clique) = ini.section(Some("clique")) {
            if let Some(minimum) = clique.get("minimum_items") {
                match minimum.trim().parse::<usize>() {
                    Ok(value) if value > 0 => config.minimum_items = value,
                    _ => warn!("ignoring bad clique.minimum_items: {minimum}"),
                }
            }
            if let Some(contiguous) = clique.get("contiguous_only") {
                config.contiguous_only = parse_bool(contiguous, config.contiguous_only);
            }
        }

        if let Some(ui) = ini.section(Some("ui")) {
            if let Some(interval) = ui.get("engine_poll_interval") {
                match interval.trim().parse::<u64>() {
                    Ok(value) => config.engine_poll_interval = value,
                    Err(_) => warn!("ignoring bad ui.engine_poll_interval: {interval}"),
                }
            }
            if let Some(style) = ui.get("details_style") {
                config.details_style = style.to_string();
            }
        }

        if let Some(log) = ini.section(Some("log")) {
            if let Some(file) = log.get("file") {
                if !file.trim().is_empty() {
                    config.log_file = Some(PathBuf::from(file.trim()));
                }
            }
            if let Some(level) = log.get("level") {
                config.log_level = level.to_string();
            }
        }

        config
    }
}

fn parse_bool(text: &str, fallback: bool) -> bool {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => {
            warn!("ignoring bad boolean config value: {other}");
            fallback
        }
    }
}
