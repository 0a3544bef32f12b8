//! Identifier validation.
//!
//! The clean-* rules gate registration; the TS6 shape checks gate what a
//! server link may introduce. A link presenting identifiers that fail these
//! checks is either ignored per-message or dropped, depending on the caller.

/// Maximum nickname length accepted from local clients.
pub const NICKLEN: usize = 30;

/// Maximum username length.
pub const USERLEN: usize = 10;

/// Maximum hostname length.
pub const HOSTLEN: usize = 63;

/// Maximum channel name length.
pub const CHANNELLEN: usize = 50;

#[inline]
fn nick_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '[' | ']' | '\\' | '`' | '_' | '^' | '{' | '|' | '}' | '-')
}

/// Clean-nick rule: 1-30 chars, no leading digit or `-`, nick charset.
pub fn clean_nick(nick: &str) -> bool {
    if nick.is_empty() || nick.len() > NICKLEN {
        return false;
    }
    let first = nick.chars().next().unwrap();
    if first.is_ascii_digit() || first == '-' {
        return false;
    }
    nick.chars().all(nick_char)
}

/// Clean-username rule: 1-10 chars from a permissive set. A leading `~`
/// (no-ident marker) is allowed; `@`, `!`, spaces, and controls are not.
pub fn clean_username(user: &str) -> bool {
    if user.is_empty() || user.len() > USERLEN {
        return false;
    }
    user.chars()
        .all(|c| c.is_ascii_graphic() && !matches!(c, '@' | '!' | '*' | ',' | '"'))
}

/// Clean-host rule: 1-63 chars of hostname-ish characters.
pub fn clean_host(host: &str) -> bool {
    if host.is_empty() || host.len() > HOSTLEN {
        return false;
    }
    host.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '/'))
}

/// A SID is a digit followed by two ID characters (`A-Z0-9`), three total.
pub fn valid_sid(sid: &str) -> bool {
    let b = sid.as_bytes();
    b.len() == 3
        && b[0].is_ascii_digit()
        && b[1..].iter().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// A UID is a valid SID followed by six ID characters, nine total, with the
/// first of the six being a letter.
pub fn valid_uid(uid: &str) -> bool {
    let b = uid.as_bytes();
    b.len() == 9
        && valid_sid(&uid[..3])
        && b[3].is_ascii_uppercase()
        && b[4..].iter().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Channel names begin with `#` or `&`, are at most 50 chars, and carry no
/// spaces, commas, or control characters.
pub fn valid_channel_name(name: &str) -> bool {
    if name.len() < 2 || name.len() > CHANNELLEN {
        return false;
    }
    let mut chars = name.chars();
    if !matches!(chars.next(), Some('#') | Some('&')) {
        return false;
    }
    chars.all(|c| !matches!(c, ' ' | ',' | '\x07') && c as u32 > 0x1f)
}

/// Clean a channel key: strip `:`, `,`, spaces, and bytes >= 0x7f, and
/// truncate to the key limit.
pub fn clean_key(key: &str) -> String {
    key.chars()
        .filter(|&c| !matches!(c, ':' | ',' | ' ') && (c as u32) < 0x7f && (c as u32) > 0x1f)
        .take(23)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_nick() {
        assert!(clean_nick("alice"));
        assert!(clean_nick("[w]`ird^{|}-"));
        assert!(!clean_nick("1digitfirst"));
        assert!(!clean_nick("-dash"));
        assert!(!clean_nick(""));
        assert!(!clean_nick(&"n".repeat(31)));
        assert!(!clean_nick("has space"));
        assert!(!clean_nick("til~de"));
    }

    #[test]
    fn test_clean_username() {
        assert!(clean_username("~ident"));
        assert!(clean_username("user1"));
        assert!(!clean_username("u@h"));
        assert!(!clean_username(&"u".repeat(11)));
    }

    #[test]
    fn test_clean_host() {
        assert!(clean_host("shell.example.com"));
        assert!(clean_host("2001:db8::1"));
        assert!(!clean_host("bad host"));
        assert!(!clean_host(&"h".repeat(64)));
    }

    #[test]
    fn test_valid_sid() {
        assert!(valid_sid("0AB"));
        assert!(valid_sid("999"));
        assert!(!valid_sid("A12"));
        assert!(!valid_sid("0ABC"));
        assert!(!valid_sid("0ab"));
    }

    #[test]
    fn test_valid_uid() {
        assert!(valid_uid("42XAAAAAB"));
        assert!(valid_uid("0ABZ99999"));
        assert!(!valid_uid("42X1AAAAB")); // 4th char must be a letter
        assert!(!valid_uid("42XAAAAA"));
        assert!(!valid_uid("A2XAAAAAB"));
    }

    #[test]
    fn test_valid_channel_name() {
        assert!(valid_channel_name("#lobby"));
        assert!(valid_channel_name("&local"));
        assert!(!valid_channel_name("#"));
        assert!(!valid_channel_name("lobby"));
        assert!(!valid_channel_name("#a,b"));
        assert!(!valid_channel_name(&format!("#{}", "c".repeat(50))));
    }

    #[test]
    fn test_clean_key() {
        assert_eq!(clean_key("se:cr,et key"), "secretkey");
        assert_eq!(clean_key(&"k".repeat(40)).len(), 23);
    }
}
