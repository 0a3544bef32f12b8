//! Ban mask canonicalization and matching.
//!
//! A list-mode parameter becomes a canonical `nick!user@host` with `*`
//! defaults, or passes through as a `$extban`. A trailing `$target`
//! suffix names a forward channel and is only meaningful on the ban
//! list; on other lists the suffix is part of the mask text.

use ferric_proto::{irc_to_lower, match_mask, valid_channel_name};

use crate::state::{Client, ListKind};

const NICKLEN: usize = 30;
const USERLEN: usize = 10;
const HOSTLEN: usize = 63;

/// A canonicalized list-mode parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrettyMask {
    pub mask: String,
    pub forward: Option<String>,
}

fn truncate(s: &str, cap: usize) -> &str {
    if s.len() > cap { &s[..cap] } else { s }
}

/// Canonicalize a raw parameter for list `kind`.
///
/// Returns `None` when the parameter is unusable (an empty field after a
/// forward split, or a forward on a non-ban list when forwards are off).
pub fn pretty_mask(raw: &str, kind: ListKind, use_forward: bool) -> Option<PrettyMask> {
    let mut mask = raw;
    let mut forward = None;

    // split a "$#chan" forward suffix off a non-extban mask; for extbans
    // a second '$' delimits the forward ("$a:acct$#chan")
    let dollar_split = if let Some(rest) = mask.strip_prefix('$') {
        rest.find('$').map(|i| i + 1)
    } else {
        mask.find('$')
    };
    if let Some(at) = dollar_split {
        let (head, tail) = (&mask[..at], &mask[at + 1..]);
        if kind == ListKind::Ban && use_forward && valid_channel_name(tail) {
            mask = head;
            forward = Some(tail.to_string());
        }
    }

    if mask.is_empty() {
        return None;
    }

    if mask.starts_with('$') {
        // extbans keep their own shape; validity is the extban table's call
        return Some(PrettyMask {
            mask: mask.to_string(),
            forward,
        });
    }

    let (nick, user, host) = ferric_proto::mask_fields(mask);
    let nick = if nick.is_empty() { "*" } else { truncate(nick, NICKLEN) };
    let user = if user.is_empty() { "*" } else { truncate(user, USERLEN) };
    let host = if host.is_empty() { "*" } else { truncate(host, HOSTLEN) };

    Some(PrettyMask {
        mask: format!("{nick}!{user}@{host}"),
        forward,
    })
}

/// Does a canonical (non-extban) mask match this client? Checked against
/// the visible host, the pre-spoof host, and the socket address, the way
/// bans must keep biting through cloaks.
pub fn mask_matches_client(mask: &str, client: &Client) -> bool {
    let (mn, mu, mh) = ferric_proto::mask_fields(mask);
    if !match_mask(mn, &client.name) || !match_mask(mu, &client.username) {
        return false;
    }
    match_mask(mh, &client.host)
        || match_mask(mh, &client.orig_host)
        || match_mask(mh, &client.sockhost)
}

/// Case-folded equality for duplicate checks on list entries.
pub fn same_mask(a: &str, b: &str) -> bool {
    irc_to_lower(a) == irc_to_lower(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(nick: &str, user: &str, host: &str, sockhost: &str) -> Client {
        Client {
            status: crate::state::Status::Client,
            name: nick.into(),
            id: "42XAAAAAA".into(),
            username: user.into(),
            host: host.into(),
            orig_host: host.into(),
            sockhost: sockhost.into(),
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
        }
    }

    #[test]
    fn test_pretty_mask_defaults() {
        assert_eq!(
            pretty_mask("joe", ListKind::Ban, true).unwrap().mask,
            "joe!*@*"
        );
        assert_eq!(
            pretty_mask("u@h.example", ListKind::Ban, true).unwrap().mask,
            "*!u@h.example"
        );
        assert_eq!(
            pretty_mask("a!b", ListKind::Ban, true).unwrap().mask,
            "a!b@*"
        );
    }

    #[test]
    fn test_pretty_mask_forward_on_bans_only() {
        let pm = pretty_mask("*!*@evil.example$#jail", ListKind::Ban, true).unwrap();
        assert_eq!(pm.mask, "*!*@evil.example");
        assert_eq!(pm.forward.as_deref(), Some("#jail"));

        // on +q the suffix stays literal
        let pm = pretty_mask("*!*@evil.example$#jail", ListKind::Quiet, true).unwrap();
        assert!(pm.forward.is_none());
    }

    #[test]
    fn test_pretty_mask_extban_forward() {
        let pm = pretty_mask("$a:badguy$#jail", ListKind::Ban, true).unwrap();
        assert_eq!(pm.mask, "$a:badguy");
        assert_eq!(pm.forward.as_deref(), Some("#jail"));
    }

    #[test]
    fn test_pretty_mask_forward_disabled() {
        let pm = pretty_mask("*!*@h$#jail", ListKind::Ban, false).unwrap();
        // suffix kept verbatim in the host field when forwards are off
        assert!(pm.forward.is_none());
        assert!(pm.mask.contains("$#jail"));
    }

    #[test]
    fn test_mask_matches_sockhost() {
        let c = client("joe", "u", "cloak.example", "192.0.2.7");
        assert!(mask_matches_client("*!*@192.0.2.*", &c));
        assert!(mask_matches_client("*!*@cloak.example", &c));
        assert!(!mask_matches_client("*!*@other.example", &c));
    }

    #[test]
    fn test_same_mask_folds() {
        assert!(same_mask("NICK[1]!*@*", "nick{1}!*@*"));
    }
}
