//! Extended bans.
//!
//! A mask beginning with `$` selects a matcher by its second character
//! (after an optional `~` negation): `$a:account`, `$c:#chan`, `$o`,
//! `$r:gecos`, `$s:server`, `$z`. Matchers live in a 256-slot table
//! indexed by letter, mirroring the mode-letter table; registering a new
//! extban is a table assignment.

use ferric_proto::{match_mask, irc_lower_char};

use crate::state::{Channel, Client, Network};

/// Matcher verdict against a (client, channel) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtbanResult {
    Match,
    NoMatch,
    /// The mask is malformed for this matcher; rejected at set time.
    Invalid,
}

/// One extban matcher. `data` is the text after `$X:`, when present.
pub type ExtbanFn = fn(&Network, &Client, &Channel, Option<&str>) -> ExtbanResult;

/// The extban dispatch table.
pub struct ExtbanTable {
    slots: [Option<ExtbanFn>; 256],
}

impl Default for ExtbanTable {
    fn default() -> Self {
        let mut table = ExtbanTable { slots: [None; 256] };
        table.set('a', extb_account);
        table.set('c', extb_channel);
        table.set('o', extb_oper);
        table.set('r', extb_realname);
        table.set('s', extb_server);
        table.set('z', extb_ssl);
        table
    }
}

impl ExtbanTable {
    pub fn set(&mut self, letter: char, f: ExtbanFn) {
        self.slots[letter as u8 as usize] = Some(f);
    }

    fn get(&self, letter: char) -> Option<ExtbanFn> {
        if letter.is_ascii() {
            self.slots[letter as u8 as usize]
        } else {
            None
        }
    }

    /// Letters with a registered matcher, for ISUPPORT EXTBAN=.
    pub fn supported(&self) -> String {
        let mut s: Vec<char> = (0..=255u8)
            .filter(|&b| self.slots[b as usize].is_some())
            .map(|b| b as char)
            .collect();
        s.sort_unstable();
        s.into_iter().collect()
    }

    /// Evaluate `mask` (starting with `$`) against a client. Handles the
    /// `~` negation; `Invalid` never negates into a match.
    pub fn matches(
        &self,
        net: &Network,
        client: &Client,
        channel: &Channel,
        mask: &str,
    ) -> ExtbanResult {
        let Some(body) = mask.strip_prefix('$') else {
            return ExtbanResult::Invalid;
        };
        let (negate, body) = match body.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, body),
        };
        let mut chars = body.chars();
        let Some(letter) = chars.next() else {
            return ExtbanResult::Invalid;
        };
        let data = body[letter.len_utf8()..].strip_prefix(':');

        let Some(matcher) = self.get(irc_lower_char(letter)) else {
            return ExtbanResult::Invalid;
        };
        match matcher(net, client, channel, data) {
            ExtbanResult::Invalid => ExtbanResult::Invalid,
            ExtbanResult::Match if negate => ExtbanResult::NoMatch,
            ExtbanResult::NoMatch if negate => ExtbanResult::Match,
            other => other,
        }
    }

    /// Set-time validation: the matcher must exist and accept the shape.
    pub fn valid_for_set(&self, net: &Network, channel: &Channel, mask: &str) -> bool {
        // probe with a throwaway client-independent evaluation: matchers
        // only return Invalid on shape problems, never on client state
        let probe = Client {
            status: crate::state::Status::Client,
            name: "*".into(),
            id: String::new(),
            username: "*".into(),
            host: "*".into(),
            orig_host: "*".into(),
            sockhost: "*".into(),
            info: String::new(),
            umodes: Default::default(),
            flags: Default::default(),
            ts: 0,
            hopcount: 0,
            servptr: None,
            from_conn: None,
            away: None,
            account: None,
            certfp: None,
            channels: Default::default(),
            local: None,
        };
        self.matches(net, &probe, channel, mask) != ExtbanResult::Invalid
    }
}

/// `$a` / `$a:account` - identified users / a specific account.
fn extb_account(_net: &Network, client: &Client, _ch: &Channel, data: Option<&str>) -> ExtbanResult {
    match (data, &client.account) {
        (Some(pattern), Some(account)) if match_mask(pattern, account) => ExtbanResult::Match,
        (Some(_), _) => ExtbanResult::NoMatch,
        (None, Some(_)) => ExtbanResult::Match,
        (None, None) => ExtbanResult::NoMatch,
    }
}

/// `$c:#chan` - members of another channel.
fn extb_channel(net: &Network, client: &Client, _ch: &Channel, data: Option<&str>) -> ExtbanResult {
    let Some(name) = data else {
        return ExtbanResult::Invalid;
    };
    if !ferric_proto::valid_channel_name(name) {
        return ExtbanResult::Invalid;
    }
    match net.get_channel(name) {
        Some(other) if other.members.contains_key(&client.id) => ExtbanResult::Match,
        _ => ExtbanResult::NoMatch,
    }
}

/// `$o` - IRC operators.
fn extb_oper(_net: &Network, client: &Client, _ch: &Channel, data: Option<&str>) -> ExtbanResult {
    if data.is_some() {
        return ExtbanResult::Invalid;
    }
    if client.umodes.oper {
        ExtbanResult::Match
    } else {
        ExtbanResult::NoMatch
    }
}

/// `$r:mask` - GECOS matching.
fn extb_realname(_net: &Network, client: &Client, _ch: &Channel, data: Option<&str>) -> ExtbanResult {
    let Some(pattern) = data else {
        return ExtbanResult::Invalid;
    };
    if match_mask(pattern, &client.info) {
        ExtbanResult::Match
    } else {
        ExtbanResult::NoMatch
    }
}

/// `$s:mask` - users on matching servers.
fn extb_server(net: &Network, client: &Client, _ch: &Channel, data: Option<&str>) -> ExtbanResult {
    let Some(pattern) = data else {
        return ExtbanResult::Invalid;
    };
    let server_name = client
        .servptr
        .as_ref()
        .and_then(|sid| net.find_id(sid))
        .map(|s| s.name.clone())
        .unwrap_or_default();
    if match_mask(pattern, &server_name) {
        ExtbanResult::Match
    } else {
        ExtbanResult::NoMatch
    }
}

/// `$z` - TLS-connected users.
fn extb_ssl(_net: &Network, client: &Client, _ch: &Channel, data: Option<&str>) -> ExtbanResult {
    if data.is_some() {
        return ExtbanResult::Invalid;
    }
    if client.umodes.secure {
        ExtbanResult::Match
    } else {
        ExtbanResult::NoMatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Status;

    fn fixture() -> (Network, Channel, Client) {
        let net = Network::new("42X", "irc.example.net", "t", 1_700_000_000);
        let channel = Channel::new("#vip", 1000);
        let client = Client {
            status: Status::Client,
            name: "joe".into(),
            id: "42XAAAAAB".into(),
            username: "u".into(),
            host: "h".into(),
            orig_host: "h".into(),
            sockhost: "::1".into(),
            info: "just a guy".into(),
            umodes: Default::default(),
            flags: Default::default(),
            ts: 0,
            hopcount: 0,
            servptr: Some("42X".into()),
            from_conn: None,
            away: None,
            account: None,
            certfp: None,
            channels: Default::default(),
            local: None,
        };
        (net, channel, client)
    }

    #[test]
    fn test_account_extban() {
        let (net, ch, mut client) = fixture();
        let table = ExtbanTable::default();
        // unidentified: $a does not match, $~a does
        assert_eq!(table.matches(&net, &client, &ch, "$a"), ExtbanResult::NoMatch);
        assert_eq!(table.matches(&net, &client, &ch, "$~a"), ExtbanResult::Match);
        client.account = Some("joe".into());
        assert_eq!(table.matches(&net, &client, &ch, "$a"), ExtbanResult::Match);
        assert_eq!(
            table.matches(&net, &client, &ch, "$a:jo*"),
            ExtbanResult::Match
        );
        assert_eq!(
            table.matches(&net, &client, &ch, "$a:other"),
            ExtbanResult::NoMatch
        );
    }

    #[test]
    fn test_realname_extban() {
        let (net, ch, client) = fixture();
        let table = ExtbanTable::default();
        assert_eq!(
            table.matches(&net, &client, &ch, "$r:*guy*"),
            ExtbanResult::Match
        );
        assert_eq!(
            table.matches(&net, &client, &ch, "$r"),
            ExtbanResult::Invalid
        );
    }

    #[test]
    fn test_unknown_letter_invalid_even_negated() {
        let (net, ch, client) = fixture();
        let table = ExtbanTable::default();
        assert_eq!(
            table.matches(&net, &client, &ch, "$~Y:x"),
            ExtbanResult::Invalid
        );
    }

    #[test]
    fn test_server_extban() {
        let (net, ch, client) = fixture();
        let table = ExtbanTable::default();
        assert_eq!(
            table.matches(&net, &client, &ch, "$s:irc.example.net"),
            ExtbanResult::Match
        );
        assert_eq!(
            table.matches(&net, &client, &ch, "$s:elsewhere.*"),
            ExtbanResult::NoMatch
        );
    }

    #[test]
    fn test_supported_letters() {
        let table = ExtbanTable::default();
        assert_eq!(table.supported(), "acorsz");
    }
}
