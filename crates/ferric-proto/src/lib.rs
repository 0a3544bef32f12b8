//! ferric-proto - TS6 wire protocol primitives.
//!
//! This crate holds the protocol-level pieces of ferricd that are useful on
//! their own: RFC 1459 line parsing and serialization, the RFC 1459 case
//! mapping, hostmask matching, identifier validation (nicks, SIDs, UIDs),
//! the numeric reply table, and the line codec used on every socket.
//!
//! Everything here is pure: no I/O except the [`codec`] module, no global
//! state, no allocation beyond what the caller asks for.

pub mod caps;
pub mod casemap;
pub mod codec;
pub mod error;
pub mod line;
pub mod mask;
pub mod numeric;
pub mod valid;

pub use caps::Capab;
pub use casemap::{irc_eq, irc_lower_char, irc_to_lower};
pub use codec::LineCodec;
pub use error::ParseError;
pub use line::{Line, MAX_ARGS, MAX_LINE_LEN};
pub use mask::{match_mask, mask_fields};
pub use numeric::Numeric;
pub use valid::{
    clean_host, clean_nick, clean_username, valid_channel_name, valid_sid, valid_uid,
};

/// Strip mIRC color/formatting codes from a message body.
///
/// Used by channel mode `+c`: the stripped text is what actually gets
/// delivered. Control codes stripped: color (0x03 with optional fg[,bg]
/// digits), bold, underline, italic, reverse, reset.
pub fn strip_colour(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x02' | '\x1f' | '\x1d' | '\x16' | '\x0f' => {}
            '\x03' => {
                // up to two fg digits, optionally ",NN" background
                let mut digits = 0;
                while digits < 2 && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                    chars.next();
                    digits += 1;
                }
                if digits > 0 && chars.peek() == Some(&',') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek().is_some_and(|c| c.is_ascii_digit()) {
                        chars.next();
                        let mut bg = 0;
                        while bg < 2 && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                            chars.next();
                            bg += 1;
                        }
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_colour_codes() {
        assert_eq!(strip_colour("\x034,5hello\x03 there"), "hello there");
        assert_eq!(strip_colour("\x02bold\x02"), "bold");
        assert_eq!(strip_colour("plain"), "plain");
    }

    #[test]
    fn test_strip_colour_bare_comma() {
        // a comma not followed by digits is text, not a background marker
        assert_eq!(strip_colour("\x034,x"), ",x");
    }
}
