//! Wire-line parsing and serialization.
//!
//! An IRC line is `[:source] <command> [args...] [:trailing]`, ASCII,
//! CRLF-terminated, at most 512 bytes including the CRLF. At most 15
//! positional arguments are split out; anything beyond the 15th is folded
//! into the last argument verbatim.
//!
//! Parsing is zero-copy: [`Line`] borrows from the input buffer.

use crate::error::ParseError;
use nom::{
    bytes::complete::take_while1,
    character::complete::char,
    combinator::opt,
    sequence::preceded,
    IResult,
};
use smallvec::SmallVec;

/// Maximum line length in bytes, including the trailing CRLF.
pub const MAX_LINE_LEN: usize = 512;

/// Maximum number of split-out arguments.
pub const MAX_ARGS: usize = 15;

/// A parsed wire line borrowing from its input.
#[derive(Debug, Clone, PartialEq)]
pub struct Line<'a> {
    /// The `:source` prefix without the leading colon, if present.
    pub source: Option<&'a str>,
    /// The command token, as received (case-insensitive).
    pub command: &'a str,
    /// Positional arguments; a trailing `:arg` keeps embedded spaces.
    pub args: SmallVec<[&'a str; MAX_ARGS]>,
}

fn parse_source(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_while1(|c| c != ' '))(input)
}

fn parse_command(input: &str) -> IResult<&str, &str> {
    let (rest, cmd) = take_while1(|c: char| c.is_ascii_alphanumeric())(input)?;
    let all_letters = cmd.chars().all(|c| c.is_ascii_alphabetic());
    let three_digits = cmd.len() == 3 && cmd.chars().all(|c| c.is_ascii_digit());
    if all_letters || three_digits {
        Ok((rest, cmd))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::AlphaNumeric,
        )))
    }
}

/// Split arguments off the remainder of a line.
///
/// Runs of spaces collapse; a `:`-led argument takes the rest of the line.
/// Once [`MAX_ARGS`] - 1 arguments have been split, the remainder (minus a
/// leading `:`) becomes the final argument.
fn parse_args(mut rest: &str) -> SmallVec<[&str; MAX_ARGS]> {
    let mut args: SmallVec<[&str; MAX_ARGS]> = SmallVec::new();

    loop {
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }
        if rest.is_empty() {
            break;
        }
        if let Some(stripped) = rest.strip_prefix(':') {
            args.push(stripped);
            break;
        }
        if args.len() == MAX_ARGS - 1 {
            // fold everything that remains into the last slot
            args.push(rest.strip_prefix(':').unwrap_or(rest));
            break;
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        args.push(&rest[..end]);
        rest = &rest[end..];
    }

    args
}

impl<'a> Line<'a> {
    /// Parse one line. The input must already be stripped of CRLF.
    pub fn parse(input: &'a str) -> Result<Self, ParseError> {
        if input.len() > MAX_LINE_LEN {
            return Err(ParseError::LineTooLong(input.len()));
        }

        let mut rest = input;
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }

        let (rest, source) = opt(parse_source)(rest).map_err(|_: nom::Err<nom::error::Error<&str>>| ParseError::Empty)?;
        let mut rest = rest;
        while rest.as_bytes().first() == Some(&b' ') {
            rest = &rest[1..];
        }

        let (rest, command) = parse_command(rest).map_err(|_| ParseError::BadCommand)?;
        // the command token must be followed by a space or end of line
        if !rest.is_empty() && rest.as_bytes()[0] != b' ' {
            return Err(ParseError::BadCommand);
        }
        let args = parse_args(rest);

        Ok(Line {
            source,
            command,
            args,
        })
    }

    /// Argument accessor; `None` when absent.
    #[inline]
    pub fn arg(&self, idx: usize) -> Option<&'a str> {
        self.args.get(idx).copied()
    }

    /// Is the command a three-digit numeric reply?
    #[inline]
    pub fn is_numeric(&self) -> bool {
        self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Serialize a line from parts, appending CRLF, truncating to the protocol
/// maximum. The final argument always gets a `:` so embedded spaces and
/// empty values survive the round trip.
pub fn format_line(source: Option<&str>, command: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(64);
    if let Some(src) = source {
        out.push(':');
        out.push_str(src);
        out.push(' ');
    }
    out.push_str(command);
    for (i, arg) in args.iter().enumerate() {
        out.push(' ');
        if i == args.len() - 1 {
            out.push(':');
        }
        out.push_str(arg);
    }
    if out.len() > MAX_LINE_LEN - 2 {
        // truncate on a char boundary below the cap
        let mut cut = MAX_LINE_LEN - 2;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out.push_str("\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let line = Line::parse("PRIVMSG #chan :hello world").unwrap();
        assert_eq!(line.source, None);
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.args.as_slice(), ["#chan", "hello world"]);
    }

    #[test]
    fn test_parse_with_source() {
        let line = Line::parse(":42XAAAAAB NICK newnick :1234").unwrap();
        assert_eq!(line.source, Some("42XAAAAAB"));
        assert_eq!(line.command, "NICK");
        assert_eq!(line.args.as_slice(), ["newnick", "1234"]);
    }

    #[test]
    fn test_parse_numeric_command() {
        let line = Line::parse(":irc.example 001 nick :Welcome").unwrap();
        assert!(line.is_numeric());
        assert_eq!(line.command, "001");
    }

    #[test]
    fn test_parse_collapses_spaces() {
        let line = Line::parse("MODE   #a  +o   bob").unwrap();
        assert_eq!(line.args.as_slice(), ["#a", "+o", "bob"]);
    }

    #[test]
    fn test_parse_excess_args_fold_into_last() {
        let raw = format!("CMD {}", (0..20).map(|i| i.to_string()).collect::<Vec<_>>().join(" "));
        let line = Line::parse(&raw).unwrap();
        assert_eq!(line.args.len(), MAX_ARGS);
        assert_eq!(line.args[MAX_ARGS - 1], "14 15 16 17 18 19");
    }

    #[test]
    fn test_parse_rejects_overlong() {
        let raw = format!("PRIVMSG #c :{}", "x".repeat(600));
        assert!(matches!(
            Line::parse(&raw),
            Err(ParseError::LineTooLong(_))
        ));
    }

    #[test]
    fn test_parse_rejects_two_digit_numeric() {
        assert!(Line::parse("12 foo").is_err());
    }

    #[test]
    fn test_parse_empty_trailing() {
        let line = Line::parse("TOPIC #chan :").unwrap();
        assert_eq!(line.args.as_slice(), ["#chan", ""]);
    }

    #[test]
    fn test_format_round_trip() {
        let s = format_line(Some("me.example"), "MODE", &["#c", "+nt"]);
        assert_eq!(s, ":me.example MODE #c :+nt\r\n");
        let parsed = Line::parse(s.trim_end()).unwrap();
        assert_eq!(parsed.command, "MODE");
        assert_eq!(parsed.args.as_slice(), ["#c", "+nt"]);
    }

    #[test]
    fn test_format_truncates_at_cap() {
        let body = "y".repeat(700);
        let s = format_line(None, "PRIVMSG", &["#c", &body]);
        assert!(s.len() <= MAX_LINE_LEN);
        assert!(s.ends_with("\r\n"));
    }
}
