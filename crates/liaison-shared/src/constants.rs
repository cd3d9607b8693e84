/// Number of fingerprints each dedup cache remembers.
pub const DEDUP_CAPACITY: usize = 20;

/// Page size used when fetching participants of broadcast conversations.
pub const PARTICIPANT_PAGE_SIZE: usize = 100;

/// Suffix that marks a local message id as a placeholder.
pub const PLACEHOLDER_SUFFIX: &str = ":liaison.placeholder";

/// Power level of a plain member.
pub const LEVEL_MEMBER: i64 = 0;

/// Power level of a remote admin/moderator in basic groups and direct chats.
pub const LEVEL_MODERATOR: i64 = 50;

/// Power level of a remote admin in broadcast conversations, and the
/// threshold for editing power levels there.
pub const LEVEL_BROADCAST_ADMIN: i64 = 75;

/// Power level of the remote creator/owner.
pub const LEVEL_CREATOR: i64 = 95;

/// Ban threshold, identical for every conversation kind.
pub const LEVEL_BAN: i64 = 99;

/// Level granted to the room owner (bridge bot or direct-chat puppet).
pub const LEVEL_OWNER: i64 = 100;

/// Name/avatar/invite threshold when the remote side lets everyone edit.
pub const LEVEL_ADMINS_DISABLED: i64 = 10;

/// Geographic coordinates are rounded to this many decimals, both for
/// fingerprints and for rendered location bodies.
pub const GEO_PRECISION: i32 = 5;
