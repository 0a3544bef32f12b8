//! The outbox: buffered emissions from one event.
//!
//! Handlers never touch sockets. They push lines here, keyed by
//! connection; the engine drains the buffer into the per-connection send
//! queues after the handler returns. Tests read the buffer directly.

use ferric_proto::{Numeric, line::format_line};

use crate::state::ConnId;

/// How a connection should be terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseKind {
    /// Send ERROR with this text, then close.
    Error(String),
    /// Close without further emission (peer already dead).
    Kill,
}

/// Buffered output of one handler invocation.
#[derive(Debug, Default)]
pub struct Outbox {
    pub lines: Vec<(ConnId, String)>,
    pub closes: Vec<(ConnId, CloseKind)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pre-formatted wire line (CRLF already appended).
    pub fn send_raw(&mut self, conn: ConnId, line: String) {
        self.lines.push((conn, line));
    }

    /// Queue a line built from parts.
    pub fn send(&mut self, conn: ConnId, source: Option<&str>, command: &str, args: &[&str]) {
        self.send_raw(conn, format_line(source, command, args));
    }

    /// Queue a numeric reply: `:<server> <num> <target> <args...>`.
    pub fn numeric(
        &mut self,
        conn: ConnId,
        server_name: &str,
        num: Numeric,
        target: &str,
        args: &[&str],
    ) {
        let mut all: Vec<&str> = Vec::with_capacity(args.len() + 1);
        all.push(target);
        all.extend_from_slice(args);
        self.send_raw(conn, format_line(Some(server_name), &num.token(), &all));
    }

    /// Schedule a graceful close: ERROR then disconnect.
    pub fn close_error(&mut self, conn: ConnId, reason: &str) {
        self.closes.push((conn, CloseKind::Error(reason.to_string())));
    }

    /// Schedule an immediate close with no further emission.
    pub fn close_kill(&mut self, conn: ConnId) {
        self.closes.push((conn, CloseKind::Kill));
    }

    /// Drain everything, for the engine flush.
    pub fn drain(&mut self) -> (Vec<(ConnId, String)>, Vec<(ConnId, CloseKind)>) {
        (
            std::mem::take(&mut self.lines),
            std::mem::take(&mut self.closes),
        )
    }

    /// Test helper: all lines queued for one connection.
    #[cfg(test)]
    pub fn lines_for(&self, conn: ConnId) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, l)| l.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_shape() {
        let mut out = Outbox::new();
        out.numeric(
            ConnId(1),
            "irc.example.net",
            Numeric::ERR_NEEDMOREPARAMS,
            "alice",
            &["JOIN", "Not enough parameters"],
        );
        assert_eq!(
            out.lines[0].1,
            ":irc.example.net 461 alice JOIN :Not enough parameters\r\n"
        );
    }

    #[test]
    fn test_drain_empties() {
        let mut out = Outbox::new();
        out.send(ConnId(1), None, "PING", &["x"]);
        out.close_kill(ConnId(2));
        let (lines, closes) = out.drain();
        assert_eq!(lines.len(), 1);
        assert_eq!(closes.len(), 1);
        assert!(out.lines.is_empty());
    }
}
