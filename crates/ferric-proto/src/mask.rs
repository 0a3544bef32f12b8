//! Hostmask matching.
//!
//! Wildcard matching with `*` (any run) and `?` (any one char), folded
//! through the RFC 1459 case map. This is the comparison used for bans,
//! K/D/X-lines, resvs, and `$$server`/`$#host` mask targets.

use crate::casemap::irc_lower_char;

/// Match `text` against the wildcard `mask`.
///
/// Iterative backtracking over `*`; no recursion, no allocation.
pub fn match_mask(mask: &str, text: &str) -> bool {
    let m: Vec<char> = mask.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut mi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if mi < m.len() && (m[mi] == '?' || irc_lower_char(m[mi]) == irc_lower_char(t[ti])) {
            mi += 1;
            ti += 1;
        } else if mi < m.len() && m[mi] == '*' {
            star = Some((mi, ti));
            mi += 1;
        } else if let Some((smi, sti)) = star {
            mi = smi + 1;
            ti = sti + 1;
            star = Some((smi, sti + 1));
        } else {
            return false;
        }
    }
    while mi < m.len() && m[mi] == '*' {
        mi += 1;
    }
    mi == m.len()
}

/// Split a `nick!user@host` mask into its three fields.
///
/// Missing separators yield `*` for the absent fields, mirroring how
/// canonicalization fills defaults.
pub fn mask_fields(mask: &str) -> (&str, &str, &str) {
    match mask.find('!') {
        Some(bang) => {
            let nick = &mask[..bang];
            let rest = &mask[bang + 1..];
            match rest.find('@') {
                Some(at) => (nick, &rest[..at], &rest[at + 1..]),
                None => (nick, rest, "*"),
            }
        }
        None => match mask.find('@') {
            Some(at) => ("*", &mask[..at], &mask[at + 1..]),
            None => (mask, "*", "*"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_literal() {
        assert!(match_mask("nick!user@host", "nick!user@host"));
        assert!(match_mask("NICK!user@HOST", "nick!USER@host"));
        assert!(!match_mask("nick!user@host", "nick!user@other"));
    }

    #[test]
    fn test_match_wildcards() {
        assert!(match_mask("*!*@*.example.com", "joe!u@shell.example.com"));
        assert!(match_mask("a?c", "abc"));
        assert!(!match_mask("a?c", "abbc"));
        assert!(match_mask("*", ""));
        assert!(match_mask("**", "anything"));
    }

    #[test]
    fn test_match_rfc1459_folding() {
        // [ matches {, ~ matches ^ under RFC 1459
        assert!(match_mask("nick[1]!*@*", "nick{1}!u@h"));
        assert!(match_mask("til~de!*@*", "til^de!u@h"));
    }

    #[test]
    fn test_match_star_backtracking() {
        assert!(match_mask("*aba", "abababa"));
        assert!(!match_mask("*abc", "ababab"));
    }

    #[test]
    fn test_mask_fields() {
        assert_eq!(mask_fields("n!u@h"), ("n", "u", "h"));
        assert_eq!(mask_fields("u@h"), ("*", "u", "h"));
        assert_eq!(mask_fields("n"), ("n", "*", "*"));
        assert_eq!(mask_fields("n!u"), ("n", "u", "*"));
    }
}
