//! Batch ProRes transcoding engine.
//!
//! The engine discovers video files and numbered image sequences, probes
//! their metadata and extracts thumbnails through ffprobe/ffmpeg, and
//! transcodes catalogued items to ProRes by supervising ffmpeg children.
//! It runs as a worker - its own process speaking JSON lines over stdio,
//! or a thread for embedders - driven by a small command set and observed
//! through an ordered event stream; see [`proxy::EngineProxy`] for the
//! client surface.

pub mod catalogue;
pub mod config;
pub mod dispatcher;
pub mod encode;
pub mod error;
pub mod format;
pub mod ipc;
pub mod media;
pub mod messages;
pub mod probe;
pub mod procrun;
pub mod profiles;
pub mod proxy;
pub mod scan;
pub mod sequence;

pub use config::EngineConfig;
pub use media::{Framerate, MediaItem, MediaKind, MediaState};
pub use messages::{Command, EngineEvent};
pub use proxy::EngineProxy;
