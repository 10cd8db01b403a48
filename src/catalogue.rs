//! The authoritative media catalogue.
//!
//! Owned exclusively by the worker loop; every mutation flows through
//! `upsert`/`delete` and publishes exactly one event, so the client's
//! projection can be rebuilt from the event stream alone and per-item event
//! order matches mutation order.

use std::collections::HashMap;

use log::debug;

use crate::media::{MediaDelta, MediaItem, MediaState};
use crate::messages::{EngineEvent, EventSink};

pub struct Catalogue {
    items: HashMap<String, MediaItem>,
    events: EventSink,
}

impl Catalogue {
    pub fn new(events: EventSink) -> Self {
        Catalogue {
            items: HashMap::new(),
            events,
        }
    }

    /// Merge `fields` into the entry for `id`, creating it if absent, and
    /// publish a `media_update` carrying exactly those fields.
    pub fn upsert(&mut self, id: &str, fields: MediaDelta) {
        let item = self
            .items
            .entry(id.to_string())
            .or_insert_with(|| MediaItem::empty(id));
        item.apply(&fields);
        debug!("catalogue upsert {id} (state {:?})", item.state);
        self.events.emit(EngineEvent::MediaUpdate {
            id: id.to_string(),
            fields,
        });
    }

    /// Remove the entry and publish `media_delete`. Unknown ids are a no-op.
    pub fn delete(&mut self, id: &str) {
        if self.items.remove(id).is_some() {
            debug!("catalogue delete {id}");
            self.events.emit(EngineEvent::MediaDelete { id: id.to_string() });
        }
    }

    pub fn lookup(&self, id: &str) -> Option<&MediaItem> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids of every item currently in `state`, ascending by path so callers
    /// get a deterministic order out of the hash map.
    pub fn ids_in_state(&self, state: MediaState) -> Vec<String> {
        let mut entries: Vec<(&String, &String)> = self
            .items
            .values()
            .filter(|item| item.state == state)
            .map(|item| (&item.path, &item.id))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Delete every item still in `new`; used when a scan generation is
    /// cancelled so half-ingested entries never linger.
    pub fn sweep_new(&mut self) {
        let doomed: Vec<String> = self
            .items
            .values()
            .filter(|item| item.state == MediaState::New)
            .map(|item| item.id.clone())
            .collect();
        for id in doomed {
            self.delete(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{Receiver, channel};

    fn catalogue() -> (Catalogue, Receiver<EngineEvent>) {
        let (tx, rx) = channel();
        (Catalogue::new(EventSink::new(tx)), rx)
    }

    #[test]
    fn upsert_creates_then_updates_in_place() {
        let (mut cat, rx) = catalogue();

        cat.upsert(
            "00c0ffee",
            MediaDelta {
                path: Some("/footage/clip.mov".to_string()),
                state: Some(MediaState::New),
                ..MediaDelta::default()
            },
        );
        cat.upsert("00c0ffee", MediaDelta::state(MediaState::Ready));

        assert_eq!(cat.len(), 1, "re-upserting the same id must not duplicate");
        assert_eq!(cat.lookup("00c0ffee").unwrap().state, MediaState::Ready);
        assert_eq!(
            cat.lookup("00c0ffee").unwrap().path,
            "/footage/clip.mov",
            "fields absent from the second delta must be preserved"
        );

        let first = rx.try_recv().expect("creation event");
        match first {
            EngineEvent::MediaUpdate { id, fields } => {
                assert_eq!(id, "00c0ffee");
                assert_eq!(fields.state, Some(MediaState::New));
            }
            other => panic!("expected media_update, got {other:?}"),
        }
        let second = rx.try_recv().expect("update event");
        match second {
            EngineEvent::MediaUpdate { fields, .. } => {
                assert_eq!(fields.state, Some(MediaState::Ready));
                assert!(fields.path.is_none(), "unchanged fields must not be re-sent");
            }
            other => panic!("expected media_update, got {other:?}"),
        }
    }

    #[test]
    fn delete_publishes_once_and_ignores_unknown_ids() {
        let (mut cat, rx) = catalogue();
        cat.upsert("00c0ffee", MediaDelta::state(MediaState::New));
        cat.delete("00c0ffee");
        cat.delete("00c0ffee");
        cat.delete("deadbeef");

        let _create = rx.try_recv().expect("creation event");
        assert_eq!(
            rx.try_recv().expect("delete event"),
            EngineEvent::MediaDelete { id: "00c0ffee".to_string() }
        );
        assert!(rx.try_recv().is_err(), "no events for unknown or repeated deletes");
        assert!(cat.is_empty());
    }

    #[test]
    fn ids_in_state_orders_by_path() {
        let (mut cat, _rx) = catalogue();
        for (id, path) in [("b1", "/z/clip.mov"), ("a1", "/a/clip.mov"), ("c1", "/m/clip.mov")] {
            cat.upsert(
                id,
                MediaDelta {
                    path: Some(path.to_string()),
                    state: Some(MediaState::Ready),
                    ..MediaDelta::default()
                },
            );
        }
        cat.upsert("d1", MediaDelta::state(MediaState::New));

        assert_eq!(cat.ids_in_state(MediaState::Ready), vec!["a1", "c1", "b1"]);
    }

    #[test]
    fn sweep_new_removes_only_new_items() {
        let (mut cat, rx) = catalogue();
        cat.upsert("aa", MediaDelta::state(MediaState::New));
        cat.upsert("bb", MediaDelta::state(MediaState::Ready));
        cat.sweep_new();

        assert!(cat.lookup("aa").is_none());
        assert!(cat.lookup("bb").is_some(), "ready items survive a sweep");

        let kinds: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| match e {
                EngineEvent::MediaUpdate { .. } => "update",
                EngineEvent::MediaDelete { .. } => "delete",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["update", "update", "delete"]);
    }
}
