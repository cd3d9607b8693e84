use liaison_shared::{LocalUserId, RemoteUserId};

/// Lookup of logged-in accounts and display names.
///
/// Puppet ids are derived from [`BridgeConfig`](crate::BridgeConfig) and
/// never go through the directory.
pub trait Directory: Send + Sync {
    /// Local account logged in to the remote network as `remote`.
    fn account_for_remote(&self, remote: RemoteUserId) -> Option<LocalUserId>;

    /// Remote account of a logged-in local user.
    fn remote_for_account(&self, user: &LocalUserId) -> Option<RemoteUserId>;

    /// Display name of a remote user, if known.
    fn remote_display_name(&self, remote: RemoteUserId) -> Option<String>;

    /// Display name of a local user, if known.
    fn local_display_name(&self, user: &LocalUserId) -> Option<String>;
}
