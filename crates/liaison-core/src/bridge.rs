//! Process-wide bridge context and the entry points for inbound events.

use std::sync::Arc;

use liaison_shared::events::{LocalEvent, RemoteEvent};
use liaison_shared::{ConversationKind, PortalKey, RemotePeer, RemoteUserId, RoomId};
use liaison_store::Database;

use crate::config::BridgeConfig;
use crate::db::SharedDatabase;
use crate::directory::Directory;
use crate::error::{BridgeError, Result, StoreResultExt};
use crate::message_index::MessageIndex;
use crate::portal::{LocalSender, Portal};
use crate::registry::Registry;
use crate::relay_bot::RelayBot;
use crate::remote::RemoteClient;
use crate::room_api::RoomApi;

/// Everything a portal needs besides its own state.
///
/// Portals never hold a reference to the bridge; operations receive it as
/// an argument instead.
pub struct Bridge {
    pub(crate) config: BridgeConfig,
    pub(crate) rooms: Arc<dyn RoomApi>,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) db: SharedDatabase,
    pub(crate) index: MessageIndex,
    pub(crate) registry: Registry,
    pub(crate) relay: Option<RelayBot>,
}

impl Bridge {
    /// Open the database named by the config (or the platform default) and
    /// build the bridge around it.
    pub fn open(
        config: BridgeConfig,
        rooms: Arc<dyn RoomApi>,
        directory: Arc<dyn Directory>,
        relay_client: Option<Arc<dyn RemoteClient>>,
    ) -> Result<Arc<Self>> {
        let db = match &config.database_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        Self::new(config, db, rooms, directory, relay_client)
    }

    pub fn new(
        config: BridgeConfig,
        db: Database,
        rooms: Arc<dyn RoomApi>,
        directory: Arc<dyn Directory>,
        relay_client: Option<Arc<dyn RemoteClient>>,
    ) -> Result<Arc<Self>> {
        let db = SharedDatabase::new(db);
        let relay = relay_client
            .map(|client| RelayBot::load(client, db.clone()))
            .transpose()?;

        tracing::info!(
            domain = %config.homeserver_domain,
            relay_bot = relay.is_some(),
            "bridge initialised"
        );

        Ok(Arc::new(Self {
            index: MessageIndex::new(db.clone()),
            registry: Registry::default(),
            config,
            rooms,
            directory,
            db,
            relay,
        }))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn index(&self) -> &MessageIndex {
        &self.index
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn relay_bot(&self) -> Option<&RelayBot> {
        self.relay.as_ref()
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Live or stored portal for `key`.
    pub fn portal(&self, key: PortalKey) -> Result<Option<Arc<Portal>>> {
        self.registry.get_or_load(key, || {
            let record = self.db.lock().get_portal(key).optional()?;
            Ok(record.map(Portal::from_record))
        })
    }

    /// Like [`portal`](Self::portal), but constructs an unbridged portal if
    /// none exists. It is persisted once it gets a room.
    pub fn portal_or_create(&self, key: PortalKey, kind: ConversationKind) -> Result<Arc<Portal>> {
        let portal = self.registry.get_or_load(key, || {
            let record = self.db.lock().get_portal(key).optional()?;
            Ok(Some(match record {
                Some(record) => Portal::from_record(record),
                None => {
                    tracing::debug!(portal = %key, kind = %kind, "new portal");
                    Portal::new(key, kind)
                }
            }))
        })?;
        portal.ok_or_else(|| BridgeError::InvalidOperation(format!("portal {key} could not be loaded")))
    }

    /// Portal of a remote conversation as seen by `account`.
    pub fn portal_for_peer(
        &self,
        peer: RemotePeer,
        account: RemoteUserId,
        create: bool,
    ) -> Result<Option<Arc<Portal>>> {
        let key = PortalKey::for_peer(peer, account);
        if create {
            self.portal_or_create(key, peer.kind()).map(Some)
        } else {
            self.portal(key)
        }
    }

    pub fn portal_by_room(&self, room: &RoomId) -> Result<Option<Arc<Portal>>> {
        if let Some(portal) = self.registry.get_by_room(room) {
            return Ok(Some(portal));
        }

        let Some(record) = self.db.lock().get_portal_by_room(room).optional()? else {
            return Ok(None);
        };
        let key = record.key;
        let portal = self
            .registry
            .get_or_load(key, || Ok(Some(Portal::from_record(record))))?;
        Ok(portal.filter(|portal| portal.room_id().as_ref() == Some(room)))
    }

    /// Portal of a broadcast conversation by its public handle,
    /// case-insensitively.
    pub fn portal_by_username(&self, username: &str) -> Result<Option<Arc<Portal>>> {
        let live = self.registry.find(|portal| {
            portal
                .username()
                .is_some_and(|name| name.eq_ignore_ascii_case(username))
        });
        if live.is_some() {
            return Ok(live);
        }

        let Some(record) = self.db.lock().find_portal_by_username(username).optional()? else {
            return Ok(None);
        };
        let key = record.key;
        self.registry
            .get_or_load(key, || Ok(Some(Portal::from_record(record))))
    }

    /// Portal owning a room alias created by the bridge.
    pub fn portal_by_alias(&self, alias: &str) -> Result<Option<Arc<Portal>>> {
        match self.config.username_from_alias(alias) {
            Some(username) => self.portal_by_username(&username),
            None => Ok(None),
        }
    }

    /// Every stored portal that has a room.
    pub fn bridged_portals(&self) -> Result<Vec<Arc<Portal>>> {
        let records = self.db.lock().list_bridged_portals()?;
        let mut portals = Vec::with_capacity(records.len());
        for record in records {
            let key = record.key;
            if let Some(portal) = self
                .registry
                .get_or_load(key, || Ok(Some(Portal::from_record(record))))?
            {
                portals.push(portal);
            }
        }
        Ok(portals)
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    /// Route an event a remote client received for `peer`.
    ///
    /// Messages and service actions may bring a portal into existence; other
    /// events for unknown conversations are dropped.
    pub async fn handle_remote_event(
        self: &Arc<Self>,
        source: &Arc<dyn RemoteClient>,
        peer: RemotePeer,
        event: RemoteEvent,
    ) -> Result<()> {
        let account = source.account_id();
        let create = matches!(event, RemoteEvent::Message(_) | RemoteEvent::Action(_));
        let Some(portal) = self.portal_for_peer(peer, account, create)? else {
            tracing::debug!(?peer, "dropping event for unknown conversation");
            return Ok(());
        };
        portal.handle_remote_event(self, source, event).await
    }

    /// Route an event from a local room.
    pub async fn handle_local_event(
        self: &Arc<Self>,
        room: &RoomId,
        sender: &LocalSender,
        event: LocalEvent,
    ) -> Result<()> {
        let Some(portal) = self.portal_by_room(room)? else {
            tracing::debug!(room = %room, "dropping event for room without portal");
            return Ok(());
        };
        portal.handle_local_event(self, sender, event).await
    }
}
