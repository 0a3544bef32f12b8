//! Channel entities: channels, memberships, and list-mode entries.

use std::collections::{HashMap, HashSet};

/// Which list mode a list entry lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Ban,    // +b
    Except, // +e
    Invex,  // +I
    Quiet,  // +q
}

impl ListKind {
    pub fn letter(self) -> char {
        match self {
            ListKind::Ban => 'b',
            ListKind::Except => 'e',
            ListKind::Invex => 'I',
            ListKind::Quiet => 'q',
        }
    }

    pub fn from_letter(c: char) -> Option<ListKind> {
        match c {
            'b' => Some(ListKind::Ban),
            'e' => Some(ListKind::Except),
            'I' => Some(ListKind::Invex),
            'q' => Some(ListKind::Quiet),
            _ => None,
        }
    }
}

/// One entry on a b/e/I/q list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Canonical mask, `$extban`, possibly negated with `$~`.
    pub mask: String,
    /// Who set it, as `nick!user@host` or a server name.
    pub set_by: String,
    pub set_at: i64,
    /// Redirect target; only ever populated on the ban list.
    pub forward: Option<String>,
}

/// Channel mode bitset plus parametered modes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChannelModes {
    pub invite_only: bool,   // +i
    pub moderated: bool,     // +m
    pub no_external: bool,   // +n
    pub private: bool,       // +p
    pub secret: bool,        // +s
    pub topic_limit: bool,   // +t
    pub no_colour: bool,     // +c
    pub no_ctcp: bool,       // +C
    pub reg_only: bool,      // +r
    pub op_moderate: bool,   // +z
    pub no_forward_to: bool, // +Q
    pub free_forward: bool,  // +F
    pub large_banlist: bool, // +L
    pub permanent: bool,     // +P
    pub key: Option<String>,         // +k
    pub limit: Option<u32>,          // +l
    pub forward: Option<String>,     // +f
    pub throttle: Option<(u32, i64)>, // +j joins:seconds
}

impl ChannelModes {
    /// Render as `+modes [args...]` the way MODE and SJOIN want it.
    /// Secret-ish knobs are not filtered here; callers decide visibility.
    pub fn to_wire(&self, with_args: bool) -> String {
        let mut letters = String::from("+");
        let mut args: Vec<String> = Vec::new();
        for (on, c) in [
            (self.invite_only, 'i'),
            (self.moderated, 'm'),
            (self.no_external, 'n'),
            (self.private, 'p'),
            (self.secret, 's'),
            (self.topic_limit, 't'),
            (self.no_colour, 'c'),
            (self.no_ctcp, 'C'),
            (self.reg_only, 'r'),
            (self.op_moderate, 'z'),
            (self.no_forward_to, 'Q'),
            (self.free_forward, 'F'),
            (self.large_banlist, 'L'),
            (self.permanent, 'P'),
        ] {
            if on {
                letters.push(c);
            }
        }
        if let Some(limit) = self.limit {
            letters.push('l');
            args.push(limit.to_string());
        }
        if let Some((joins, secs)) = self.throttle {
            letters.push('j');
            args.push(format!("{joins}:{secs}"));
        }
        if let Some(key) = &self.key {
            letters.push('k');
            args.push(key.clone());
        }
        if let Some(fwd) = &self.forward {
            letters.push('f');
            args.push(fwd.clone());
        }
        if with_args && !args.is_empty() {
            format!("{} {}", letters, args.join(" "))
        } else {
            letters
        }
    }
}

/// Channel topic with attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

/// The (channel, client) association.
#[derive(Debug, Default, Clone)]
pub struct Membership {
    pub op: bool,
    pub voice: bool,
    /// Channel `bants` at the time the cached verdicts were computed.
    pub bants: u64,
    pub cached_banned: Option<bool>,
    pub cached_quieted: Option<bool>,
}

impl Membership {
    pub fn prefix(&self) -> &'static str {
        match (self.op, self.voice) {
            (true, true) => "@+",
            (true, false) => "@",
            (false, true) => "+",
            (false, false) => "",
        }
    }

    /// Drop cached ban verdicts; the next check re-evaluates.
    pub fn invalidate(&mut self) {
        self.cached_banned = None;
        self.cached_quieted = None;
    }
}

/// A chat room.
#[derive(Debug)]
pub struct Channel {
    /// Display name (original casing).
    pub name: String,
    pub ts: i64,
    pub modes: ChannelModes,
    pub topic: Option<Topic>,
    /// Letters local users may not change, set by MLOCK.
    pub mlock: Option<String>,
    /// Monotonic version, bumped whenever any list changes or membership
    /// flags change; memberships compare against it for cache staleness.
    pub bants: u64,
    pub bans: Vec<ListEntry>,
    pub excepts: Vec<ListEntry>,
    pub invex: Vec<ListEntry>,
    pub quiets: Vec<ListEntry>,
    /// All members by UID.
    pub members: HashMap<String, Membership>,
    /// The locally-connected subset, for fast broadcast.
    pub local_members: HashSet<String>,
    /// Soft invitations by UID.
    pub invites: HashSet<String>,
    /// Join-throttle accounting for +j.
    pub join_count: u32,
    pub join_delta_start: i64,
    /// Per-channel message-flood accounting.
    pub received_number_of_privmsgs: u32,
    pub first_received_message_time: i64,
    pub flood_noticed: bool,
}

impl Channel {
    pub fn new(name: &str, ts: i64) -> Self {
        Channel {
            name: name.to_string(),
            ts,
            modes: ChannelModes::default(),
            topic: None,
            mlock: None,
            bants: 0,
            bans: Vec::new(),
            excepts: Vec::new(),
            invex: Vec::new(),
            quiets: Vec::new(),
            members: HashMap::new(),
            local_members: HashSet::new(),
            invites: HashSet::new(),
            join_count: 0,
            join_delta_start: 0,
            received_number_of_privmsgs: 0,
            first_received_message_time: 0,
            flood_noticed: false,
        }
    }

    pub fn list(&self, kind: ListKind) -> &Vec<ListEntry> {
        match kind {
            ListKind::Ban => &self.bans,
            ListKind::Except => &self.excepts,
            ListKind::Invex => &self.invex,
            ListKind::Quiet => &self.quiets,
        }
    }

    pub fn list_mut(&mut self, kind: ListKind) -> &mut Vec<ListEntry> {
        match kind {
            ListKind::Ban => &mut self.bans,
            ListKind::Except => &mut self.excepts,
            ListKind::Invex => &mut self.invex,
            ListKind::Quiet => &mut self.quiets,
        }
    }

    /// Total entries across the four lists, for the max_bans caps.
    pub fn list_total(&self) -> usize {
        self.bans.len() + self.excepts.len() + self.invex.len() + self.quiets.len()
    }

    /// Bump the list version so cached membership verdicts go stale.
    pub fn bump_bants(&mut self) {
        self.bants = self.bants.wrapping_add(1);
    }

    /// Channel is eligible for destruction: empty and not permanent.
    pub fn can_destroy(&self) -> bool {
        self.members.is_empty() && !self.modes.permanent
    }

    /// Join-throttle check for +j; counts the join when allowed.
    pub fn throttle_admit(&mut self, now: i64) -> bool {
        let Some((joins, seconds)) = self.modes.throttle else {
            return true;
        };
        if now - self.join_delta_start >= seconds {
            self.join_delta_start = now;
            self.join_count = 0;
        }
        if self.join_count >= joins {
            return false;
        }
        self.join_count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes_to_wire() {
        let mut modes = ChannelModes {
            no_external: true,
            topic_limit: true,
            ..Default::default()
        };
        assert_eq!(modes.to_wire(true), "+nt");
        modes.limit = Some(25);
        modes.key = Some("sesame".into());
        assert_eq!(modes.to_wire(true), "+ntlk 25 sesame");
        assert_eq!(modes.to_wire(false), "+ntlk");
    }

    #[test]
    fn test_membership_prefixes() {
        let mut m = Membership::default();
        assert_eq!(m.prefix(), "");
        m.voice = true;
        assert_eq!(m.prefix(), "+");
        m.op = true;
        assert_eq!(m.prefix(), "@+");
    }

    #[test]
    fn test_throttle_window() {
        let mut ch = Channel::new("#t", 1000);
        ch.modes.throttle = Some((2, 10));
        assert!(ch.throttle_admit(1000));
        assert!(ch.throttle_admit(1001));
        assert!(!ch.throttle_admit(1002));
        // window rollover resets the counter
        assert!(ch.throttle_admit(1011));
    }

    #[test]
    fn test_can_destroy_respects_permanent() {
        let mut ch = Channel::new("#t", 1000);
        assert!(ch.can_destroy());
        ch.modes.permanent = true;
        assert!(!ch.can_destroy());
    }
}
