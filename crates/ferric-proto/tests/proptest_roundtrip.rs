//! Property-based tests for the wire-line layer.
//!
//! Uses proptest to generate random protocol components and verify that:
//! 1. Parsing never panics, whatever arrives
//! 2. Formatted lines re-parse to the same parts (roundtrip)
//! 3. Case folding and mask matching invariants hold across random input

use proptest::prelude::*;

use bytes::BytesMut;
use ferric_proto::line::format_line;
use ferric_proto::{Line, LineCodec, irc_eq, irc_to_lower, match_mask};
use tokio_util::codec::{Decoder, Encoder};

// =============================================================================
// STRATEGIES - Generators for valid wire components
// =============================================================================

/// A command token: letters only (numerics are covered separately).
fn command_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z]{1,10}").expect("valid regex")
}

/// A source prefix: server-name-ish or UID-ish, no spaces.
fn source_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9][a-zA-Z0-9.\\-]{0,29}").expect("valid regex")
}

/// A middle argument: non-empty, no spaces, no leading colon.
fn middle_arg_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[^ :\r\n\0][^ \r\n\0]{0,19}").expect("valid regex")
}

/// A trailing argument: may be empty and may contain spaces.
fn trailing_arg_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[^\r\n\0]{0,200}").expect("valid regex")
}

/// Text with no wildcard characters, for literal-mask properties.
fn literal_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9\\[\\]{}|^_.\\-]{1,30}").expect("valid regex")
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    /// The parser must never panic, no matter what a peer sends.
    #[test]
    fn parse_never_panics(raw in prop::string::string_regex("[^\r\n\0]{0,520}").unwrap()) {
        let _ = Line::parse(&raw);
    }

    /// format_line output always re-parses to the same source, command,
    /// and argument vector.
    #[test]
    fn format_then_parse_roundtrip(
        source in prop::option::of(source_strategy()),
        command in command_strategy(),
        middles in prop::collection::vec(middle_arg_strategy(), 0..5),
        trailing in prop::option::of(trailing_arg_strategy()),
    ) {
        let mut args: Vec<&str> = middles.iter().map(String::as_str).collect();
        if let Some(trailing) = &trailing {
            args.push(trailing);
        }

        let wire = format_line(source.as_deref(), &command, &args);
        prop_assert!(wire.ends_with("\r\n"));
        prop_assert!(wire.len() <= 512);

        let parsed = Line::parse(wire.trim_end_matches("\r\n")).expect("formatted lines parse");
        prop_assert_eq!(parsed.source, source.as_deref());
        prop_assert_eq!(parsed.command, command.as_str());
        prop_assert_eq!(parsed.args.as_slice(), args.as_slice());
    }

    /// One trip through the codec hands back exactly the line that was
    /// written, minus its CRLF.
    #[test]
    fn codec_roundtrip(
        command in command_strategy(),
        trailing in trailing_arg_strategy(),
    ) {
        let wire = format_line(None, &command, &[&trailing]);
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(wire.clone(), &mut buf).expect("encode");
        let decoded = codec.decode(&mut buf).expect("decode");
        prop_assert_eq!(decoded.as_deref(), Some(wire.trim_end_matches("\r\n")));
        prop_assert_eq!(codec.decode(&mut buf).expect("decode rest"), None);
    }

    /// Folding is idempotent, and every string equals its own fold.
    #[test]
    fn casefold_idempotent(s in prop::string::string_regex("[ -~]{0,40}").unwrap()) {
        let once = irc_to_lower(&s);
        let twice = irc_to_lower(&once);
        prop_assert_eq!(&once, &twice);
        prop_assert!(irc_eq(&s, &once));
    }

    /// A wildcard-free mask matches exactly itself (under folding), and
    /// `*` matches everything.
    #[test]
    fn literal_mask_matches_itself(text in literal_text_strategy()) {
        prop_assert!(match_mask(&text, &text));
        prop_assert!(match_mask(&text, &irc_to_lower(&text)));
        prop_assert!(match_mask("*", &text));
    }

    /// Folding two strings and comparing bytes agrees with irc_eq.
    #[test]
    fn irc_eq_agrees_with_folding(
        a in prop::string::string_regex("[ -~]{0,30}").unwrap(),
        b in prop::string::string_regex("[ -~]{0,30}").unwrap(),
    ) {
        prop_assert_eq!(irc_eq(&a, &b), irc_to_lower(&a) == irc_to_lower(&b));
    }
}
