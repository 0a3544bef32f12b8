//! Repeatable configuration blocks: listeners, server links, opers,
//! classes, aliases, and seed bans.

use serde::Deserialize;

use super::defaults::*;

/// A listening socket.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenBlock {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Hand accepted sockets to an ssld helper before use.
    #[serde(default)]
    pub ssl: bool,
    /// Accept server links rather than clients on this listener.
    #[serde(default)]
    pub server: bool,
}

/// A server-link block.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectBlock {
    /// Remote server name.
    pub name: String,
    /// Host to dial.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Password we send in PASS.
    pub send_password: String,
    /// Password we require in their PASS.
    pub accept_password: String,
    /// Dial automatically and on retry timers.
    #[serde(default)]
    pub autoconn: bool,
    /// Expected remote SID, validated during handshake when set.
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default = "default_class")]
    pub class: String,
}

/// Operator privilege set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OperPrivs {
    pub kline: bool,
    pub unkline: bool,
    pub xline: bool,
    pub resv: bool,
    /// CONNECT/SQUIT on remote servers.
    pub routing: bool,
    pub kill_remote: bool,
    pub die: bool,
    pub rehash: bool,
    pub admin: bool,
    /// Operspy: see through secret channels/modes, logged per use.
    pub operspy: bool,
    /// OMODE/OKICK/CLEARCHAN channel surgery.
    pub chan_force: bool,
    pub mass_notice: bool,
}

/// An operator block.
#[derive(Debug, Clone, Deserialize)]
pub struct OperBlock {
    pub name: String,
    /// user@host the oper must connect from.
    pub user_mask: String,
    /// bcrypt digest of the oper password.
    pub password: String,
    #[serde(default)]
    pub privs: OperPrivs,
    /// Default snomask letters applied on oper-up.
    #[serde(default)]
    pub snomask: String,
    /// Require the connection to be TLS (via ssld).
    #[serde(default)]
    pub need_ssl: bool,
    /// Require this TLS client-cert fingerprint.
    #[serde(default)]
    pub certfp: Option<String>,
}

/// A connection class.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassBlock {
    pub name: String,
    #[serde(default = "default_sendq_max")]
    pub sendq_max: usize,
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,
}

/// A command alias: `ALIAS` becomes `PRIVMSG target :args`.
#[derive(Debug, Clone, Deserialize)]
pub struct AliasBlock {
    pub name: String,
    /// `NickServ` or `NickServ@services.example.net`.
    pub target: String,
}

/// Ban lists seeded from the config file; runtime additions replay
/// through the external ban database instead.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedBans {
    /// K-lines as (user@host mask, reason).
    pub klines: Vec<(String, String)>,
    /// D-lines as (ip mask, reason).
    pub dlines: Vec<(String, String)>,
    /// X-lines as (gecos mask, reason).
    pub xlines: Vec<(String, String)>,
    /// Reserved nicks/channels as (mask, reason).
    pub resvs: Vec<(String, String)>,
}

/// The join throttle shape `joins:seconds` used by channel mode +j.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinThrottle {
    pub joins: u32,
    pub seconds: i64,
}

impl Default for JoinThrottle {
    fn default() -> Self {
        JoinThrottle {
            joins: default_join_num(),
            seconds: default_join_time(),
        }
    }
}
