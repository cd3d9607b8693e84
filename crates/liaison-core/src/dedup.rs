//! Bounded recency caches that absorb the bridge's own echoes.
//!
//! Every mirrored message comes back from the remote network at least once
//! (and once per additional logged-in account). Each portal remembers the
//! fingerprints of the last [`DEDUP_CAPACITY`] events it handled so that
//! those echoes are recognised instead of mirrored a second time.

use std::collections::{HashMap, VecDeque};

use liaison_shared::constants::DEDUP_CAPACITY;
use liaison_shared::events::{GeoPoint, RemoteAction, RemoteMedia, RemoteMessage};
use liaison_shared::{IdSpace, LocalMessageId, RemoteMessageId};

/// Identity of an event for duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// Remote id, usable when the conversation numbers messages globally.
    Native(RemoteMessageId),
    /// Digest over the event's content.
    Content(blake3::Hash),
}

/// Outcome of [`DedupCache::check_and_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// Not seen before; the fingerprint is now recorded.
    Fresh,
    /// Seen before, with the value recorded at the time.
    Duplicate(V),
}

/// The local mirror the bridge produced for a remote event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRef {
    pub local_id: LocalMessageId,
    pub space: IdSpace,
}

/// Message stream cache. `None` marks an echo with no known mirror.
pub type MessageDedup = DedupCache<Option<MirrorRef>>;

/// Service-action stream cache.
pub type ActionDedup = DedupCache<()>;

/// FIFO-bounded map from fingerprint to value.
#[derive(Debug)]
pub struct DedupCache<V> {
    order: VecDeque<Fingerprint>,
    values: HashMap<Fingerprint, V>,
    capacity: usize,
}

impl<V> Default for DedupCache<V> {
    fn default() -> Self {
        Self::with_capacity(DEDUP_CAPACITY)
    }
}

impl<V> DedupCache<V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            values: HashMap::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&V> {
        self.values.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Rewrite stored values in place.
    pub fn rebind_values<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut V),
    {
        self.values.values_mut().for_each(|value| f(value));
    }
}

impl<V: Clone> DedupCache<V> {
    /// Return the stored value if `fingerprint` was already recorded,
    /// otherwise record it with `value`.
    ///
    /// A hit does not refresh the entry's position.
    pub fn check_and_record(&mut self, fingerprint: Fingerprint, value: V) -> Lookup<V> {
        if let Some(existing) = self.values.get(&fingerprint) {
            return Lookup::Duplicate(existing.clone());
        }

        self.order.push_back(fingerprint);
        self.values.insert(fingerprint, value);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.values.remove(&oldest);
            }
        }
        Lookup::Fresh
    }
}

impl MessageDedup {
    /// Point every value holding `old` at `new` instead.
    pub fn rebind_local_id(&mut self, old: &LocalMessageId, new: &LocalMessageId) {
        self.rebind_values(|value| {
            if let Some(mirror) = value {
                if mirror.local_id == *old {
                    mirror.local_id = new.clone();
                }
            }
        });
    }

    /// Forget the mirror of a send that never produced a local event.
    pub fn clear_local_id(&mut self, old: &LocalMessageId) {
        self.rebind_values(|value| {
            if value.as_ref().is_some_and(|mirror| mirror.local_id == *old) {
                *value = None;
            }
        });
    }
}

/// Fingerprint of a new message.
pub fn message_fingerprint(message: &RemoteMessage, global_ids: bool) -> Fingerprint {
    if global_ids {
        Fingerprint::Native(message.id)
    } else {
        content_fingerprint(message)
    }
}

/// Fingerprint of an edit. Edits reuse the id of the message they change,
/// so they are always keyed on content.
pub fn edit_fingerprint(message: &RemoteMessage) -> Fingerprint {
    content_fingerprint(message)
}

/// Fingerprint of a service action.
pub fn action_fingerprint(action: &RemoteAction, global_ids: bool) -> Fingerprint {
    if global_ids {
        return Fingerprint::Native(action.id);
    }
    digest(&[
        action.date.timestamp().to_string(),
        action.originator.to_string(),
        action.action.kind().to_string(),
    ])
}

fn content_fingerprint(message: &RemoteMessage) -> Fingerprint {
    let mut parts = vec![message.date.timestamp().to_string(), message.text.clone()];

    if let Some(forward) = &message.forward {
        parts.push(optional_id(forward.from_user.map(|u| u.0)));
        parts.push(optional_id(forward.from_chat.map(|c| c.0)));
    } else if let Some(media) = &message.media {
        match media {
            RemoteMedia::Contact { user_id } => parts.push(user_id.to_string()),
            RemoteMedia::Document(document) => parts.push(document.id.to_string()),
            RemoteMedia::Photo(photo) => parts.push(photo.id.to_string()),
            RemoteMedia::Geo(point) => {
                parts.push(GeoPoint::round(point.long).to_string());
                parts.push(GeoPoint::round(point.lat).to_string());
            }
            RemoteMedia::Unsupported(_) => {}
        }
    }

    digest(&parts)
}

fn optional_id(id: Option<i64>) -> String {
    id.map_or_else(|| "none".to_string(), |id| id.to_string())
}

fn digest(parts: &[String]) -> Fingerprint {
    Fingerprint::Content(blake3::hash(parts.join("-").as_bytes()))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use liaison_shared::events::ServiceAction;
    use liaison_shared::RemoteUserId;

    use super::*;

    fn message(id: i64, secs: i64, text: &str) -> RemoteMessage {
        RemoteMessage {
            id: RemoteMessageId(id),
            date: Utc.timestamp_opt(secs, 0).unwrap(),
            sender: Some(RemoteUserId(1)),
            text: text.to_string(),
            html: None,
            forward: None,
            media: None,
            reply_to: None,
        }
    }

    #[test]
    fn test_bound_evicts_oldest() {
        let mut cache: DedupCache<i64> = DedupCache::default();
        for n in 0..21 {
            let fp = Fingerprint::Native(RemoteMessageId(n));
            assert_eq!(cache.check_and_record(fp, n), Lookup::Fresh);
        }
        assert_eq!(cache.len(), 20);

        for n in 1..21 {
            let fp = Fingerprint::Native(RemoteMessageId(n));
            assert_eq!(cache.check_and_record(fp, -1), Lookup::Duplicate(n));
        }
        // The first entry was evicted, so it is fresh again.
        let first = Fingerprint::Native(RemoteMessageId(0));
        assert_eq!(cache.check_and_record(first, 0), Lookup::Fresh);
    }

    #[test]
    fn test_duplicate_returns_recorded_value_without_mutation() {
        let mut cache = MessageDedup::default();
        let fp = Fingerprint::Native(RemoteMessageId(9));
        let mirror = MirrorRef {
            local_id: LocalMessageId::new("$v1"),
            space: IdSpace(1),
        };

        assert_eq!(cache.check_and_record(fp, Some(mirror.clone())), Lookup::Fresh);
        assert_eq!(
            cache.check_and_record(fp, None),
            Lookup::Duplicate(Some(mirror.clone()))
        );
        assert_eq!(cache.get(&fp), Some(&Some(mirror)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_rebind_and_clear_placeholder() {
        let mut cache = MessageDedup::default();
        let placeholder = LocalMessageId::placeholder();
        let fp = Fingerprint::Native(RemoteMessageId(1));
        cache.check_and_record(
            fp,
            Some(MirrorRef {
                local_id: placeholder.clone(),
                space: IdSpace(5),
            }),
        );

        let real = LocalMessageId::new("$real");
        cache.rebind_local_id(&placeholder, &real);
        assert_eq!(cache.get(&fp).unwrap().as_ref().unwrap().local_id, real);

        cache.clear_local_id(&real);
        assert_eq!(cache.get(&fp), Some(&None));
    }

    #[test]
    fn test_content_fingerprint_ignores_remote_id() {
        // The same message seen by two accounts has two different ids.
        let a = message(10, 1_700_000_000, "hello");
        let b = message(77, 1_700_000_000, "hello");
        assert_eq!(message_fingerprint(&a, false), message_fingerprint(&b, false));
        assert_ne!(message_fingerprint(&a, true), message_fingerprint(&b, true));

        let later = message(10, 1_700_000_001, "hello");
        assert_ne!(message_fingerprint(&a, false), message_fingerprint(&later, false));
    }

    #[test]
    fn test_media_changes_fingerprint() {
        let plain = message(1, 1_700_000_000, "");
        let mut here = plain.clone();
        here.media = Some(RemoteMedia::Geo(GeoPoint {
            lat: 60.169_900_001,
            long: 24.938_4,
        }));
        let mut almost_here = plain.clone();
        almost_here.media = Some(RemoteMedia::Geo(GeoPoint {
            lat: 60.169_9,
            long: 24.938_4,
        }));

        assert_ne!(message_fingerprint(&plain, false), message_fingerprint(&here, false));
        // Coordinates are rounded before hashing.
        assert_eq!(
            message_fingerprint(&here, false),
            message_fingerprint(&almost_here, false)
        );
    }

    #[test]
    fn test_edits_always_use_content() {
        let edit = message(5, 1_700_000_000, "fixed typo");
        assert!(matches!(edit_fingerprint(&edit), Fingerprint::Content(_)));
    }

    #[test]
    fn test_action_fingerprint() {
        let action = RemoteAction {
            id: RemoteMessageId(3),
            date: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            originator: RemoteUserId(8),
            action: ServiceAction::TitleChanged {
                title: "New".into(),
            },
        };
        let mut echo = action.clone();
        echo.id = RemoteMessageId(99);

        assert_eq!(action_fingerprint(&action, false), action_fingerprint(&echo, false));
        assert_eq!(
            action_fingerprint(&action, true),
            Fingerprint::Native(RemoteMessageId(3))
        );
    }
}
