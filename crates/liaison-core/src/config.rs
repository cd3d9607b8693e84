//! Bridge configuration loaded from environment variables.
//!
//! Every setting has a default so the bridge can start with zero
//! configuration for local development.

use std::path::PathBuf;

use liaison_shared::{LocalUserId, RemoteUserId};

const USERID_PLACEHOLDER: &str = "{userid}";
const GROUPNAME_PLACEHOLDER: &str = "{groupname}";

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Server name of the local network.
    /// Env: `HOMESERVER_DOMAIN`
    /// Default: `localhost`
    pub homeserver_domain: String,

    /// Localpart of the bridge bot that owns group rooms.
    /// Env: `BOT_LOCALPART`
    /// Default: `liaisonbot`
    pub bot_localpart: String,

    /// Localpart template for puppets, must contain `{userid}`.
    /// Env: `USERNAME_TEMPLATE`
    /// Default: `remote_{userid}`
    pub username_template: String,

    /// Alias localpart template for public rooms, must contain `{groupname}`.
    /// Env: `ALIAS_TEMPLATE`
    /// Default: `remote_{groupname}`
    pub alias_template: String,

    /// Whether local notices are sent to the remote network.
    /// Env: `BRIDGE_NOTICES` (true/false)
    /// Default: `false`
    pub bridge_notices: bool,

    /// Whether remote edits are mirrored as replies to the edited message.
    /// Env: `EDITS_AS_REPLIES` (true/false)
    /// Default: `true`
    pub edits_as_replies: bool,

    /// Database file. `None` uses the platform data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            homeserver_domain: "localhost".to_string(),
            bot_localpart: "liaisonbot".to_string(),
            username_template: format!("remote_{USERID_PLACEHOLDER}"),
            alias_template: format!("remote_{GROUPNAME_PLACEHOLDER}"),
            bridge_notices: false,
            edits_as_replies: true,
            database_path: None,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(domain) = lookup("HOMESERVER_DOMAIN") {
            config.homeserver_domain = domain;
        }

        if let Some(localpart) = lookup("BOT_LOCALPART") {
            config.bot_localpart = localpart;
        }

        if let Some(template) = lookup("USERNAME_TEMPLATE") {
            if template.contains(USERID_PLACEHOLDER) {
                config.username_template = template;
            } else {
                tracing::warn!(
                    value = %template,
                    "USERNAME_TEMPLATE lacks {{userid}}, using default"
                );
            }
        }

        if let Some(template) = lookup("ALIAS_TEMPLATE") {
            if template.contains(GROUPNAME_PLACEHOLDER) {
                config.alias_template = template;
            } else {
                tracing::warn!(
                    value = %template,
                    "ALIAS_TEMPLATE lacks {{groupname}}, using default"
                );
            }
        }

        if let Some(val) = lookup("BRIDGE_NOTICES") {
            config.bridge_notices = val != "false" && val != "0";
        }

        if let Some(val) = lookup("EDITS_AS_REPLIES") {
            config.edits_as_replies = val != "false" && val != "0";
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        config
    }

    pub fn bot_user(&self) -> LocalUserId {
        LocalUserId(format!("@{}:{}", self.bot_localpart, self.homeserver_domain))
    }

    /// Local user id of the puppet mirroring a remote user.
    pub fn puppet_user(&self, user: RemoteUserId) -> LocalUserId {
        let localpart = self
            .username_template
            .replace(USERID_PLACEHOLDER, &user.to_string());
        LocalUserId(format!("@{localpart}:{}", self.homeserver_domain))
    }

    /// Reverse of [`puppet_user`](Self::puppet_user).
    pub fn puppet_remote_id(&self, user: &LocalUserId) -> Option<RemoteUserId> {
        let localpart = self.localpart(&user.0, '@')?;
        match_template(&self.username_template, USERID_PLACEHOLDER, localpart)?
            .parse()
            .ok()
            .map(RemoteUserId)
    }

    pub fn alias_localpart(&self, username: &str) -> String {
        self.alias_template.replace(GROUPNAME_PLACEHOLDER, username)
    }

    pub fn alias(&self, username: &str) -> String {
        format!("#{}:{}", self.alias_localpart(username), self.homeserver_domain)
    }

    /// Extract the public handle from a room alias created by the bridge.
    pub fn username_from_alias(&self, alias: &str) -> Option<String> {
        let localpart = self.localpart(alias, '#')?;
        match_template(&self.alias_template, GROUPNAME_PLACEHOLDER, localpart)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    fn localpart<'a>(&self, id: &'a str, sigil: char) -> Option<&'a str> {
        id.strip_prefix(sigil)?
            .strip_suffix(self.homeserver_domain.as_str())?
            .strip_suffix(':')
    }
}

/// Return the part of `value` standing in for `placeholder` in `template`.
fn match_template<'a>(template: &str, placeholder: &str, value: &'a str) -> Option<&'a str> {
    let (prefix, suffix) = template.split_once(placeholder)?;
    value.strip_prefix(prefix)?.strip_suffix(suffix)
}
