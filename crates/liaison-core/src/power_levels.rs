//! Translation between remote admin roles and local numeric power levels.

use std::collections::BTreeMap;

use liaison_shared::constants::{
    LEVEL_ADMINS_DISABLED, LEVEL_BAN, LEVEL_BROADCAST_ADMIN, LEVEL_CREATOR, LEVEL_MEMBER,
    LEVEL_MODERATOR, LEVEL_OWNER,
};
use liaison_shared::{ConversationKind, LocalUserId};
use serde::{Deserialize, Serialize};

use crate::remote::{AdminRights, ParticipantRole};

pub const EVENT_ROOM_NAME: &str = "m.room.name";
pub const EVENT_ROOM_AVATAR: &str = "m.room.avatar";
pub const EVENT_ROOM_TOPIC: &str = "m.room.topic";
pub const EVENT_POWER_LEVELS: &str = "m.room.power_levels";
pub const EVENT_HISTORY_VISIBILITY: &str = "m.room.history_visibility";

/// Content of a room's power-levels state event.
///
/// Absent thresholds take the protocol defaults. Keys this type does not
/// model are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerLevels {
    #[serde(default)]
    pub users: BTreeMap<LocalUserId, i64>,
    #[serde(default)]
    pub users_default: i64,
    #[serde(default)]
    pub events: BTreeMap<String, i64>,
    #[serde(default)]
    pub events_default: i64,
    #[serde(default = "moderator_level")]
    pub state_default: i64,
    #[serde(default = "moderator_level")]
    pub ban: i64,
    #[serde(default = "moderator_level")]
    pub kick: i64,
    #[serde(default = "moderator_level")]
    pub redact: i64,
    #[serde(default)]
    pub invite: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn moderator_level() -> i64 {
    LEVEL_MODERATOR
}

impl Default for PowerLevels {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            users_default: LEVEL_MEMBER,
            events: BTreeMap::new(),
            events_default: LEVEL_MEMBER,
            state_default: LEVEL_MODERATOR,
            ban: LEVEL_MODERATOR,
            kick: LEVEL_MODERATOR,
            redact: LEVEL_MODERATOR,
            invite: LEVEL_MEMBER,
            extra: serde_json::Map::new(),
        }
    }
}

/// Result of [`PowerLevels::reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub levels: PowerLevels,
    pub changed: bool,
    /// User entries that were written, with their new level.
    pub diff: Vec<(LocalUserId, i64)>,
}

impl PowerLevels {
    /// Level of a user, absent entries counting as a plain member.
    pub fn user_level(&self, user: &LocalUserId) -> i64 {
        self.users.get(user).copied().unwrap_or(LEVEL_MEMBER)
    }

    /// Apply the thresholds a freshly bridged room starts with.
    ///
    /// `owner` gets full power if the map has no users yet.
    pub fn apply_base(
        &mut self,
        kind: ConversationKind,
        owner: &LocalUserId,
        admins_enabled: bool,
        megagroup: bool,
    ) {
        let requirement = if kind == ConversationKind::BasicGroup && !admins_enabled {
            LEVEL_MEMBER
        } else {
            LEVEL_MODERATOR
        };

        self.ban = LEVEL_BAN;
        self.invite = if kind == ConversationKind::BasicGroup {
            requirement
        } else {
            LEVEL_BROADCAST_ADMIN
        };
        self.events.insert(EVENT_ROOM_NAME.into(), requirement);
        self.events.insert(EVENT_ROOM_AVATAR.into(), requirement);
        self.events.insert(
            EVENT_ROOM_TOPIC.into(),
            if kind == ConversationKind::BroadcastGroup {
                LEVEL_MODERATOR
            } else {
                LEVEL_BAN
            },
        );
        self.events.insert(EVENT_POWER_LEVELS.into(), LEVEL_BROADCAST_ADMIN);
        self.events
            .insert(EVENT_HISTORY_VISIBILITY.into(), LEVEL_BROADCAST_ADMIN);
        self.state_default = LEVEL_MODERATOR;
        self.users_default = LEVEL_MEMBER;
        self.events_default = if kind == ConversationKind::BroadcastGroup && !megagroup {
            LEVEL_MODERATOR
        } else {
            LEVEL_MEMBER
        };

        if self.users.is_empty() {
            self.users.insert(owner.clone(), LEVEL_OWNER);
        }
    }

    /// Bring user levels in line with `targets`, touching only entries that
    /// differ. The threshold for editing power levels is recomputed for
    /// `kind` and counts as a change when it moves.
    pub fn reconcile<I>(&self, kind: ConversationKind, targets: I) -> Reconciled
    where
        I: IntoIterator<Item = (LocalUserId, i64)>,
    {
        let mut levels = self.clone();
        let mut changed = false;
        let mut diff = Vec::new();

        let admin_level = admin_level(kind);
        if levels.events.get(EVENT_POWER_LEVELS) != Some(&admin_level) {
            levels.events.insert(EVENT_POWER_LEVELS.into(), admin_level);
            changed = true;
        }

        for (user, target) in targets {
            if levels.user_level(&user) != target {
                levels.users.insert(user.clone(), target);
                diff.push((user, target));
                changed = true;
            }
        }

        Reconciled {
            levels,
            changed,
            diff,
        }
    }

    /// Mirror the remote "only admins may edit" toggle. Returns whether any
    /// threshold moved.
    pub fn set_admins_enabled(&mut self, enabled: bool) -> bool {
        let level = if enabled {
            LEVEL_MODERATOR
        } else {
            LEVEL_ADMINS_DISABLED
        };

        let before = (
            self.invite,
            self.events.get(EVENT_ROOM_NAME).copied(),
            self.events.get(EVENT_ROOM_AVATAR).copied(),
        );
        self.invite = level;
        self.events.insert(EVENT_ROOM_NAME.into(), level);
        self.events.insert(EVENT_ROOM_AVATAR.into(), level);

        before != (level, Some(level), Some(level))
    }
}

/// Level granted to admins of a conversation of `kind`.
pub fn admin_level(kind: ConversationKind) -> i64 {
    if kind == ConversationKind::BroadcastGroup {
        LEVEL_BROADCAST_ADMIN
    } else {
        LEVEL_MODERATOR
    }
}

pub fn role_level(role: ParticipantRole, kind: ConversationKind) -> i64 {
    match role {
        ParticipantRole::Member => LEVEL_MEMBER,
        ParticipantRole::Admin => admin_level(kind),
        ParticipantRole::Creator => LEVEL_CREATOR,
    }
}

/// User entries of `new` that differ from `old`.
pub fn changed_levels(
    old: &BTreeMap<LocalUserId, i64>,
    new: &BTreeMap<LocalUserId, i64>,
) -> Vec<(LocalUserId, i64)> {
    new.iter()
        .filter(|(user, level)| old.get(*user) != Some(*level))
        .map(|(user, level)| (user.clone(), *level))
        .collect()
}

impl AdminRights {
    /// Remote rights matching a local level. Direct chats have no admins.
    pub fn for_level(kind: ConversationKind, level: i64) -> Option<Self> {
        match kind {
            ConversationKind::Direct => None,
            ConversationKind::BasicGroup => Some(Self {
                moderator: level >= LEVEL_MODERATOR,
                add_admins: level >= LEVEL_MODERATOR,
            }),
            ConversationKind::BroadcastGroup => Some(Self {
                moderator: level >= LEVEL_MODERATOR,
                add_admins: level >= LEVEL_BROADCAST_ADMIN,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> LocalUserId {
        LocalUserId::new(format!("@{name}:localhost"))
    }

    fn base(kind: ConversationKind) -> PowerLevels {
        let mut levels = PowerLevels::default();
        levels.apply_base(kind, &user("bot"), true, false);
        levels
    }

    #[test]
    fn test_reconcile_is_minimal() {
        let kind = ConversationKind::BasicGroup;
        let roles = [
            (user("creator"), ParticipantRole::Creator),
            (user("admin"), ParticipantRole::Admin),
            (user("a"), ParticipantRole::Member),
            (user("b"), ParticipantRole::Member),
        ];
        let targets = |roles: &[(LocalUserId, ParticipantRole)]| {
            roles
                .iter()
                .map(|(u, r)| (u.clone(), role_level(*r, kind)))
                .collect::<Vec<_>>()
        };

        let initial = base(kind).reconcile(kind, targets(&roles[..]));
        assert!(initial.changed);
        let levels = initial.levels;
        assert_eq!(levels.user_level(&user("creator")), 95);
        assert_eq!(levels.user_level(&user("admin")), 50);
        // Members stay absent; absent counts as 0.
        assert!(!levels.users.contains_key(&user("a")));

        let mut demoted = roles.clone();
        demoted[1].1 = ParticipantRole::Member;
        let after = levels.reconcile(kind, targets(&demoted[..]));
        assert!(after.changed);
        assert_eq!(after.diff, vec![(user("admin"), 0)]);
        assert_eq!(after.levels.user_level(&user("creator")), 95);
        assert_eq!(after.levels.user_level(&user("admin")), 0);

        let again = after.levels.reconcile(kind, targets(&demoted[..]));
        assert!(!again.changed);
        assert!(again.diff.is_empty());
    }

    #[test]
    fn test_admin_threshold_follows_kind() {
        let levels = base(ConversationKind::BasicGroup);
        assert_eq!(levels.events[EVENT_POWER_LEVELS], 75);

        let chat = levels.reconcile(ConversationKind::BasicGroup, Vec::new());
        assert!(chat.changed);
        assert_eq!(chat.levels.events[EVENT_POWER_LEVELS], 50);

        let broadcast = chat
            .levels
            .reconcile(ConversationKind::BroadcastGroup, Vec::new());
        assert!(broadcast.changed);
        assert_eq!(broadcast.levels.events[EVENT_POWER_LEVELS], 75);
    }

    #[test]
    fn test_base_levels() {
        let mut chat = PowerLevels::default();
        chat.apply_base(ConversationKind::BasicGroup, &user("bot"), false, false);
        assert_eq!(chat.invite, 0);
        assert_eq!(chat.events[EVENT_ROOM_NAME], 0);
        assert_eq!(chat.events[EVENT_ROOM_TOPIC], 99);
        assert_eq!(chat.user_level(&user("bot")), 100);

        let channel = base(ConversationKind::BroadcastGroup);
        assert_eq!(channel.invite, 75);
        assert_eq!(channel.events_default, 50);
        assert_eq!(channel.events[EVENT_ROOM_TOPIC], 50);

        let mut megagroup = PowerLevels::default();
        megagroup.apply_base(ConversationKind::BroadcastGroup, &user("bot"), true, true);
        assert_eq!(megagroup.events_default, 0);
    }

    #[test]
    fn test_existing_owner_is_kept() {
        let mut levels = PowerLevels::default();
        levels.users.insert(user("someone"), 100);
        levels.apply_base(ConversationKind::BasicGroup, &user("bot"), true, false);
        assert!(!levels.users.contains_key(&user("bot")));
    }

    #[test]
    fn test_admins_toggle() {
        let mut levels = base(ConversationKind::BasicGroup);
        assert!(!levels.set_admins_enabled(true));
        assert!(levels.set_admins_enabled(false));
        assert_eq!(levels.invite, 10);
        assert_eq!(levels.events[EVENT_ROOM_AVATAR], 10);
    }

    #[test]
    fn test_changed_levels_and_rights() {
        let old = BTreeMap::from([(user("a"), 0), (user("b"), 50)]);
        let new = BTreeMap::from([(user("a"), 50), (user("b"), 50), (user("c"), 75)]);
        assert_eq!(
            changed_levels(&old, &new),
            vec![(user("a"), 50), (user("c"), 75)]
        );

        let moderator = AdminRights::for_level(ConversationKind::BroadcastGroup, 50).unwrap();
        assert!(moderator.moderator && !moderator.add_admins);
        let admin = AdminRights::for_level(ConversationKind::BasicGroup, 50).unwrap();
        assert!(admin.moderator && admin.add_admins);
        assert!(AdminRights::for_level(ConversationKind::Direct, 100).is_none());
    }

    #[test]
    fn test_serializes_as_state_content() {
        let levels = base(ConversationKind::BasicGroup);
        let json = serde_json::to_value(&levels).unwrap();
        assert_eq!(json["users"]["@bot:localhost"], 100);
        assert_eq!(json["ban"], 99);
        let back: PowerLevels = serde_json::from_value(json).unwrap();
        assert_eq!(back, levels);
    }

    #[test]
    fn test_round_trip_keeps_unmodelled_keys() {
        let current = serde_json::json!({
            "users": {"@owner:localhost": 100},
            "kick": 75,
            "redact": 75,
            "notifications": {"room": 75},
            "events": {},
        });
        let mut levels: PowerLevels = serde_json::from_value(current).unwrap();
        assert_eq!(levels.ban, 50);
        assert_eq!(levels.state_default, 50);

        let reconciled = levels.reconcile(
            ConversationKind::BasicGroup,
            vec![(user("admin"), LEVEL_MODERATOR)],
        );
        levels = reconciled.levels;
        let json = serde_json::to_value(&levels).unwrap();

        assert_eq!(json["kick"], 75);
        assert_eq!(json["redact"], 75);
        assert_eq!(json["notifications"]["room"], 75);
        assert_eq!(json["ban"], 50);
        assert_eq!(json["state_default"], 50);
        assert_eq!(json["users"]["@admin:localhost"], 50);
        assert_eq!(json["users"]["@owner:localhost"], 100);
    }
}
