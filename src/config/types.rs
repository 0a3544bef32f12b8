//! Configuration snapshot struct definitions.

use serde::Deserialize;

use super::blocks::{AliasBlock, ClassBlock, ConnectBlock, ListenBlock, OperBlock, SeedBans};
use super::defaults::*;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// The full configuration snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub serverinfo: ServerInfo,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default, rename = "listen")]
    pub listeners: Vec<ListenBlock>,
    #[serde(default, rename = "connect")]
    pub connects: Vec<ConnectBlock>,
    #[serde(default, rename = "oper")]
    pub opers: Vec<OperBlock>,
    #[serde(default, rename = "class")]
    pub classes: Vec<ClassBlock>,
    #[serde(default, rename = "alias")]
    pub aliases: Vec<AliasBlock>,
    #[serde(default)]
    pub bans: SeedBans,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Identity of this server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    /// Server name (e.g. "irc.example.net").
    pub name: String,
    /// TS6 server id: digit + two idchars.
    pub sid: String,
    /// Free-form description shown in LINKS/WHOIS.
    pub description: String,
    /// Network name advertised in ISUPPORT.
    pub network_name: String,
    /// Hide the introducing server on remote bursts.
    #[serde(default)]
    pub flatten_links: bool,
    /// Number of ssld helper processes to spawn.
    #[serde(default = "default_ssld_count")]
    pub ssld_count: u32,
    /// Path to the helper binaries directory; helpers are disabled when unset.
    #[serde(default)]
    pub helper_dir: Option<String>,
    /// Log format selection.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Administrative contact, for ADMIN.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub email: String,
}

/// General tunables. Everything here has a sane default so a minimal
/// config file stays minimal.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Seconds of silence before a PING probe; the same again before exit.
    pub ping_time: u32,
    /// Seconds an unregistered socket may linger.
    pub registration_timeout: u32,
    /// Hard cap on local connections.
    pub max_clients: u32,
    /// Channel-message flood threshold per recompute window.
    pub floodcount: u32,
    /// Recv-queue cap in lines while registered.
    pub client_flood: u32,
    /// Send-queue cap in queued lines; overflow is a dead-link exit.
    pub sendq_max: usize,
    /// Clock skew against a new peer that only warns.
    pub ts_warn_delta: i64,
    /// Clock skew against a new peer that drops the link.
    pub ts_max_delta: i64,
    /// Target-change ring size for non-opers.
    pub target_change: bool,
    pub target_change_max: usize,
    /// Seconds between caller-id (+g) notify lines per sender.
    pub caller_id_wait: i64,
    /// Seconds between paced replies (AWAY, LIST, ...) for non-opers.
    pub pace_wait: i64,
    /// Anti-nick-flood: changes allowed per window.
    pub max_nick_changes: u32,
    pub nick_flood_time: i64,
    /// "Possible spambot" join/part thresholds.
    pub spam_num: u32,
    pub spam_time: i64,
    /// Split-mode thresholds.
    pub split_servers: usize,
    pub split_users: usize,
    /// Whether split-mode starts engaged until first evaluation.
    pub split_mode_auto: bool,
    /// Require a PONG cookie before registration completes.
    pub ping_cookie: bool,
    /// Exempt opers from per-command flood pacing.
    pub no_oper_flood: bool,
    /// Seconds of credit in the expensive-command token bucket.
    pub max_ratelimit_tokens: u32,
    /// MONITOR list cap per client.
    pub monitor_max: usize,
    /// ACCEPT list cap per client.
    pub accept_max: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            ping_time: default_ping_time(),
            registration_timeout: default_registration_timeout(),
            max_clients: default_max_clients(),
            floodcount: default_floodcount(),
            client_flood: default_client_flood(),
            sendq_max: default_sendq_max(),
            ts_warn_delta: default_ts_warn_delta(),
            ts_max_delta: default_ts_max_delta(),
            target_change: true,
            target_change_max: default_target_change_max(),
            caller_id_wait: default_caller_id_wait(),
            pace_wait: default_pace_wait(),
            max_nick_changes: default_max_nick_changes(),
            nick_flood_time: default_nick_flood_time(),
            spam_num: default_spam_num(),
            spam_time: default_spam_time(),
            split_servers: default_split_servers(),
            split_users: default_split_users(),
            split_mode_auto: true,
            ping_cookie: false,
            no_oper_flood: true,
            max_ratelimit_tokens: default_max_ratelimit_tokens(),
            monitor_max: default_monitor_max(),
            accept_max: default_accept_max(),
        }
    }
}

/// Channel-subsystem knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Honor +e ban exceptions.
    pub use_except: bool,
    /// Honor +I invite exceptions.
    pub use_invex: bool,
    /// Honor +f / $forward forwarding.
    pub use_forward: bool,
    /// Kick local members when a lower-TS SJOIN arrives +i or rekeyed.
    pub kick_on_split_riding: bool,
    /// Channels a user may occupy (opers get three times this).
    pub max_chans_per_user: usize,
    /// Combined b/e/I/q cap per channel.
    pub max_bans: usize,
    /// The same cap for +L channels.
    pub max_bans_large: usize,
    /// PRIVMSG/NOTICE targets per command.
    pub max_targets: usize,
    /// Refuse JOIN to nonexistent channels during split-mode.
    pub no_create_on_split: bool,
    /// Refuse all JOIN during split-mode (manual setting).
    pub no_join_on_split: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            use_except: true,
            use_invex: true,
            use_forward: true,
            kick_on_split_riding: false,
            max_chans_per_user: default_max_chans_per_user(),
            max_bans: default_max_bans(),
            max_bans_large: default_max_bans_large(),
            max_targets: default_max_targets(),
            no_create_on_split: true,
            no_join_on_split: false,
        }
    }
}
