//! Wire protocol between the client façade and the worker engine.
//!
//! Commands travel client→worker as `{"command": name, "kwargs": {...}}`
//! objects; events travel worker→client as positional tuples whose first
//! element is the event kind, e.g. `["media_update", id, {fields}]`. Both
//! directions are newline-delimited JSON on the pipe.

use std::fmt;
use std::sync::mpsc::Sender;

use log::warn;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::media::{Framerate, MediaDelta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "kwargs", rename_all = "snake_case")]
pub enum Command {
    ScanPaths {
        paths: Vec<String>,
        sequence_framerate: Framerate,
    },
    CancelScan {},
    EncodeItems {
        ids: Vec<String>,
        profile: String,
        /// Frame-rate preset key; empty means each item's own rate.
        framerate: String,
    },
    CancelEncode {},
    RemoveItems {
        ids: Vec<String>,
    },
    PreviewItem {
        id: String,
        framerate: String,
    },
    Join {},
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    MediaUpdate { id: String, fields: MediaDelta },
    MediaDelete { id: String },
    ScanUpdate { dirs: u64, files: u64 },
    ScanComplete,
    ScanCancelled,
    EncodeComplete,
    EncodeCancelled,
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::MediaUpdate { .. } => "media_update",
            EngineEvent::MediaDelete { .. } => "media_delete",
            EngineEvent::ScanUpdate { .. } => "scan_update",
            EngineEvent::ScanComplete => "scan_complete",
            EngineEvent::ScanCancelled => "scan_cancelled",
            EngineEvent::EncodeComplete => "encode_complete",
            EngineEvent::EncodeCancelled => "encode_cancelled",
        }
    }
}

impl Serialize for EngineEvent {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        match self {
            EngineEvent::MediaUpdate { id, fields } => {
                let mut seq = ser.serialize_seq(Some(3))?;
                seq.serialize_element(self.kind())?;
                seq.serialize_element(id)?;
                seq.serialize_element(fields)?;
                seq.end()
            }
            EngineEvent::MediaDelete { id } => {
                let mut seq = ser.serialize_seq(Some(2))?;
                seq.serialize_element(self.kind())?;
                seq.serialize_element(id)?;
                seq.end()
            }
            EngineEvent::ScanUpdate { dirs, files } => {
                let mut seq = ser.serialize_seq(Some(3))?;
                seq.serialize_element(self.kind())?;
                seq.serialize_element(dirs)?;
                seq.serialize_element(files)?;
                seq.end()
            }
            EngineEvent::ScanComplete
            | EngineEvent::ScanCancelled
            | EngineEvent::EncodeComplete
            | EngineEvent::EncodeCancelled => {
                let mut seq = ser.serialize_seq(Some(1))?;
                seq.serialize_element(self.kind())?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for EngineEvent {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        struct EventVisitor;

        impl<'de> Visitor<'de> for EventVisitor {
            type Value = EngineEvent;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an engine event tuple")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let kind: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;

                match kind.as_str() {
                    "media_update" => {
                        let id = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        let fields = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        Ok(EngineEvent::MediaUpdate { id, fields })
                    }
                    "media_delete" => {
                        let id = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        Ok(EngineEvent::MediaDelete { id })
                    }
                    "scan_update" => {
                        let dirs = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                        let files = seq
                            .next_element()?
                            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                        Ok(EngineEvent::ScanUpdate { dirs, files })
                    }
                    "scan_complete" => Ok(EngineEvent::ScanComplete),
                    "scan_cancelled" => Ok(EngineEvent::ScanCancelled),
                    "encode_complete" => Ok(EngineEvent::EncodeComplete),
                    "encode_cancelled" => Ok(EngineEvent::EncodeCancelled),
                    other => Err(de::Error::unknown_variant(
                        other,
                        &[
                            "media_update",
                            "media_delete",
                            "scan_update",
                            "scan_complete",
                            "scan_cancelled",
                            "encode_complete",
                            "encode_cancelled",
                        ],
                    )),
                }
            }
        }

        de.deserialize_seq(EventVisitor)
    }
}

/// Worker-side handle for publishing events.
///
/// A single sender feeding a single channel keeps the stream strictly FIFO;
/// every catalogue mutation and stage terminal goes through here. A closed
/// receiver (client went away) is logged and otherwise ignored - the worker
/// winds down through its command channel, not through event backpressure.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<EngineEvent>,
}

impl EventSink {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        EventSink { tx }
    }

    pub fn emit(&self, event: EngineEvent) {
        log::debug!("event: {}", event.kind());
        if self.tx.send(event).is_err() {
            warn!("event receiver is gone; dropping event");
        }
    }
}
