//! Process-wide lookup of live portals.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use liaison_shared::{PortalKey, RoomId};

use crate::error::{BridgeError, Result};
use crate::portal::Portal;

#[derive(Default)]
struct Maps {
    by_key: HashMap<PortalKey, Arc<Portal>>,
    by_room: HashMap<RoomId, Arc<Portal>>,
}

/// Both lookup maps behind one lock, so every mutation is a single
/// critical section and readers never see a half-moved portal.
#[derive(Default)]
pub struct Registry {
    maps: RwLock<Maps>,
}

impl Registry {
    pub fn get(&self, key: &PortalKey) -> Option<Arc<Portal>> {
        self.read().by_key.get(key).cloned()
    }

    pub fn get_by_room(&self, room: &RoomId) -> Option<Arc<Portal>> {
        self.read().by_room.get(room).cloned()
    }

    /// First live portal matching `predicate`.
    pub fn find<P>(&self, predicate: P) -> Option<Arc<Portal>>
    where
        P: Fn(&Portal) -> bool,
    {
        self.read()
            .by_key
            .values()
            .find(|portal| predicate(portal))
            .cloned()
    }

    /// Return the live portal for `key`, or build one with `load` and
    /// register it. `load` runs inside the critical section so two callers
    /// can never construct the same portal twice.
    pub fn get_or_load<F>(&self, key: PortalKey, load: F) -> Result<Option<Arc<Portal>>>
    where
        F: FnOnce() -> Result<Option<Portal>>,
    {
        if let Some(portal) = self.get(&key) {
            return Ok(Some(portal));
        }

        let mut maps = self.write();
        if let Some(portal) = maps.by_key.get(&key) {
            return Ok(Some(portal.clone()));
        }

        let Some(portal) = load()? else {
            return Ok(None);
        };
        let portal = Arc::new(portal);
        if let Some(room) = portal.room_id() {
            maps.by_room.insert(room, portal.clone());
        }
        maps.by_key.insert(key, portal.clone());
        Ok(Some(portal))
    }

    /// Make a freshly created room resolvable.
    pub fn publish_room(&self, room: &RoomId, portal: &Arc<Portal>) {
        self.write().by_room.insert(room.clone(), portal.clone());
    }

    /// Move `portal` to `new_key`.
    ///
    /// `commit` persists the move and updates the portal's own identity. It
    /// runs inside the critical section; if it fails the maps are left
    /// untouched.
    pub fn relocate<F>(&self, portal: &Arc<Portal>, new_key: PortalKey, commit: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut maps = self.write();
        let old_key = portal.key();

        if let Some(existing) = maps.by_key.get(&new_key) {
            if !Arc::ptr_eq(existing, portal) {
                if existing.room_id().is_some() {
                    return Err(BridgeError::InvalidOperation(format!(
                        "portal {new_key} is already bridged"
                    )));
                }
                tracing::debug!(portal = %new_key, "replacing unbridged portal during relocation");
            }
        }

        commit()?;

        if maps
            .by_key
            .get(&old_key)
            .is_some_and(|existing| Arc::ptr_eq(existing, portal))
        {
            maps.by_key.remove(&old_key);
        }
        maps.by_key.insert(new_key, portal.clone());
        if let Some(room) = portal.room_id() {
            maps.by_room.insert(room, portal.clone());
        }
        Ok(())
    }

    /// Drop a portal from both maps. Entries owned by another portal are
    /// left alone.
    pub fn remove(&self, portal: &Arc<Portal>) {
        let mut maps = self.write();
        let key = portal.key();
        if maps
            .by_key
            .get(&key)
            .is_some_and(|existing| Arc::ptr_eq(existing, portal))
        {
            maps.by_key.remove(&key);
        }
        if let Some(room) = portal.room_id() {
            if maps
                .by_room
                .get(&room)
                .is_some_and(|existing| Arc::ptr_eq(existing, portal))
            {
                maps.by_room.remove(&room);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Maps> {
        self.maps.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Maps> {
        self.maps.write().unwrap_or_else(PoisonError::into_inner)
    }
}
