//! Client entities: every socket-bearing or remotely-known participant.

use std::collections::{HashSet, VecDeque};

/// Identifier of a local connection, assigned at accept time and never
/// reused within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection state discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Outbound server dial in progress.
    Connecting,
    /// Outbound dial connected, handshake sent, burst not yet consumed.
    Handshake,
    /// This server itself.
    Me,
    /// Accepted socket, registration incomplete.
    Unknown,
    /// Refused during registration, draining before close.
    Rejected,
    /// A linked server.
    Server,
    /// A registered user.
    Client,
}

/// User modes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserModes {
    pub invisible: bool,    // +i
    pub oper: bool,         // +o
    pub admin: bool,        // +a
    pub wallops: bool,      // +w
    pub callerid: bool,     // +g
    pub deaf: bool,         // +D
    pub no_forward: bool,   // +Q
    pub service: bool,      // +S
    pub secure: bool,       // +Z
    pub regonly_msg: bool,  // +R
    /// Server-notice mask letters; non-empty renders as +s.
    pub snomask: HashSet<char>,
}

impl UserModes {
    /// Render as "+..." for UID bursts and MODE replies.
    pub fn to_string_public(&self) -> String {
        let mut s = String::from("+");
        for (on, c) in [
            (self.invisible, 'i'),
            (self.oper, 'o'),
            (self.admin, 'a'),
            (self.wallops, 'w'),
            (self.callerid, 'g'),
            (self.deaf, 'D'),
            (self.no_forward, 'Q'),
            (self.service, 'S'),
            (self.secure, 'Z'),
            (self.regonly_msg, 'R'),
            (!self.snomask.is_empty(), 's'),
        ] {
            if on {
                s.push(c);
            }
        }
        s
    }

    /// Apply a "+ow-i" style delta from a server link. Unknown letters are
    /// ignored; local permission checks happen before this is called.
    pub fn apply_delta(&mut self, delta: &str) {
        let mut adding = true;
        for c in delta.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                'i' => self.invisible = adding,
                'o' => self.oper = adding,
                'a' => self.admin = adding,
                'w' => self.wallops = adding,
                'g' => self.callerid = adding,
                'D' => self.deaf = adding,
                'Q' => self.no_forward = adding,
                'S' => self.service = adding,
                'Z' => self.secure = adding,
                'R' => self.regonly_msg = adding,
                's' if !adding => self.snomask.clear(),
                _ => {}
            }
        }
    }
}

/// Lifecycle and exemption flags.
#[derive(Debug, Default, Clone)]
pub struct ClientFlags {
    /// Scheduled for reclamation on the next tick; ignore all input.
    pub dead: bool,
    /// Exit in progress; suppress further error emission.
    pub closing: bool,
    /// Grace window over (the client has proven interactive).
    pub flooddone: bool,
    /// Class- or config-granted flood exemption.
    pub exempt_flood: bool,
    /// Exempt from k-lines/d-lines.
    pub exempt_kline: bool,
    /// Exempt from reserved-name matching.
    pub exempt_resv: bool,
    /// Server link has sent its end-of-burst.
    pub eob: bool,
    /// IP shown to users is not the real one.
    pub ip_spoof: bool,
}

/// Resolved operator state after a successful OPER.
#[derive(Debug, Clone)]
pub struct OperInfo {
    pub name: String,
    pub privs: crate::config::OperPrivs,
}

/// Per-connection state that exists only for locally-attached clients.
#[derive(Debug, Default)]
pub struct LocalClient {
    /// The connection this client owns. `Client::route()` of a local
    /// client is always this connection.
    pub conn: Option<ConnId>,
    /// Negotiated IRCv3 client capabilities.
    pub caps: HashSet<String>,
    /// CAP negotiation in progress (suspends registration).
    pub cap_negotiating: bool,

    // --- read-side flood state, recomputed by the one-second tick ---
    /// Commands the dispatcher may still parse this second.
    pub allow_read: u32,
    /// Lines parsed this second.
    pub sent_parsed: u32,
    /// Deferred inbound lines awaiting budget.
    pub recvq: VecDeque<String>,

    // --- registration scratch (the "pre-client" block) ---
    pub pre_nick: Option<String>,
    pub pre_user: Option<String>,
    pub pre_gecos: Option<String>,
    pub pre_pass: Option<String>,
    /// Outstanding PING cookie; registration waits for the matching PONG.
    pub ping_cookie: Option<u32>,
    pub cookie_received: bool,
    /// Authd verdict outstanding; registration waits for it.
    pub authd_pending: bool,

    // --- server handshake scratch ---
    pub pre_server_name: Option<String>,
    pub pre_sid: Option<String>,
    pub pre_capab: ferric_proto::Capab,

    // --- anti-abuse bookkeeping ---
    pub last_nick_change: i64,
    pub nick_changes: u32,
    pub join_leave_count: u32,
    pub last_join_time: i64,
    pub last_leave_time: i64,
    /// Recent message-target fingerprints; None slots are free.
    pub targets: Vec<Option<u64>>,
    pub target_last: i64,
    /// Free WHO passes granted by channel joins.
    pub who_credits: u32,
    pub last_caller_id_time: i64,
    pub last_away_time: i64,
    /// Inbound message-flood accounting (decaying window).
    pub received_number_of_privmsgs: u32,
    pub first_received_message_time: i64,
    pub flood_noticed: bool,

    /// MONITOR targets (folded nicks).
    pub monitor: HashSet<String>,
    /// ACCEPT list for caller-id, by UID.
    pub accept: HashSet<String>,

    /// Operator state; `None` for non-opers.
    pub oper: Option<OperInfo>,

    /// The listener accepted on required TLS offload.
    pub tls: bool,
    /// ssld helper connection id when TLS/zip is active.
    pub helper_id: Option<u32>,
    pub class: String,
}

/// Any participant in the network: a user, a server, or one of our own
/// not-yet-registered sockets.
#[derive(Debug)]
pub struct Client {
    pub status: Status,
    /// Network name: nick for users, server name for servers.
    pub name: String,
    /// Stable identifier: 9-char UID for users, 3-char SID for servers.
    pub id: String,
    pub username: String,
    /// Hostname shown to other users.
    pub host: String,
    /// Hostname before spoofing/cloaking.
    pub orig_host: String,
    /// Textual socket address.
    pub sockhost: String,
    /// GECOS / server description.
    pub info: String,
    pub umodes: UserModes,
    pub flags: ClientFlags,
    /// Nick TS for users; link-establishment time for servers.
    pub ts: i64,
    pub hopcount: u32,
    /// Direct upstream in the spanning tree (`None` for Me and locals'
    /// parent lookups go through `Network::me`).
    pub servptr: Option<String>,
    /// Connection through which traffic for this client is routed: the
    /// client's own connection when local, the nearest link otherwise.
    pub from_conn: Option<ConnId>,
    pub away: Option<String>,
    /// Services account name, if identified.
    pub account: Option<String>,
    pub certfp: Option<String>,
    /// Channels this client is on (folded names).
    pub channels: HashSet<String>,
    /// Present iff locally connected.
    pub local: Option<LocalClient>,
}

impl Client {
    pub fn is_local(&self) -> bool {
        self.local.is_some()
    }

    pub fn is_user(&self) -> bool {
        self.status == Status::Client
    }

    pub fn is_server(&self) -> bool {
        matches!(self.status, Status::Server | Status::Me)
    }

    pub fn is_oper(&self) -> bool {
        self.umodes.oper
    }

    /// `nick!user@host` as seen by other users.
    pub fn mask(&self) -> String {
        format!("{}!{}@{}", self.name, self.username, self.host)
    }

    /// Source prefix for client-facing emissions.
    pub fn prefix(&self) -> String {
        if self.is_server() {
            self.name.clone()
        } else {
            self.mask()
        }
    }

    /// Operator privilege check helper; false for non-opers.
    pub fn has_priv<F: Fn(&crate::config::OperPrivs) -> bool>(&self, f: F) -> bool {
        self.local
            .as_ref()
            .and_then(|l| l.oper.as_ref())
            .map(|o| f(&o.privs))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_umode_render_and_delta() {
        let mut modes = UserModes::default();
        modes.apply_delta("+iw");
        assert_eq!(modes.to_string_public(), "+iw");
        modes.apply_delta("-i+o");
        assert!(modes.oper);
        assert!(!modes.invisible);
        assert_eq!(modes.to_string_public(), "+ow");
    }

    #[test]
    fn test_umode_snomask_renders_s() {
        let mut modes = UserModes::default();
        modes.snomask.insert('c');
        assert!(modes.to_string_public().contains('s'));
        modes.apply_delta("-s");
        assert!(modes.snomask.is_empty());
    }
}
