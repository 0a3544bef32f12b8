//! Protocol-level error types.

use thiserror::Error;

/// Errors produced while parsing a wire line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The line (including CRLF) exceeded the 512-byte protocol limit.
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    /// The line contained no command token.
    #[error("empty line")]
    Empty,

    /// The command token was neither letters nor a three-digit numeric.
    #[error("malformed command token")]
    BadCommand,

    /// The line contained bytes that did not decode as UTF-8.
    #[error("invalid utf-8 in line")]
    InvalidUtf8,
}
