//! Ban-database client.
//!
//! The durable store is an external collaborator speaking a line-oriented
//! add/del protocol. The core only writes: one line per operation,
//! buffered here and drained by the engine to the store's socket or
//! file. On startup the loader replays the stored bans back into the
//! runtime cache through the normal handler paths.

/// Ban classes the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanKind {
    Kline,
    Dline,
    Xline,
    Resv,
}

impl BanKind {
    fn letter(self) -> char {
        match self {
            BanKind::Kline => 'K',
            BanKind::Dline => 'D',
            BanKind::Xline => 'X',
            BanKind::Resv => 'R',
        }
    }
}

/// Buffered write-only operations toward the ban store.
#[derive(Debug, Default)]
pub struct BandbLog {
    pending: Vec<String>,
}

impl BandbLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<letter> <mask1> <mask2> <setter> <ts> :<reason>`
    pub fn add(
        &mut self,
        kind: BanKind,
        mask1: &str,
        mask2: &str,
        setter: &str,
        ts: i64,
        reason: &str,
    ) {
        self.pending.push(format!(
            "{} {} {} {} {} :{}\n",
            kind.letter(),
            mask1,
            if mask2.is_empty() { "*" } else { mask2 },
            setter,
            ts,
            reason
        ));
    }

    /// `-<letter> <mask1> <mask2>`
    pub fn del(&mut self, kind: BanKind, mask1: &str, mask2: &str) {
        self.pending.push(format!(
            "-{} {} {}\n",
            kind.letter(),
            mask1,
            if mask2.is_empty() { "*" } else { mask2 },
        ));
    }

    /// Drain buffered lines for the engine to flush.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_shapes() {
        let mut log = BandbLog::new();
        log.add(BanKind::Kline, "*spam*", "*.example.net", "oper", 1_700_000_000, "spam");
        log.del(BanKind::Resv, "#bad*", "");
        let lines = log.drain();
        assert_eq!(
            lines[0],
            "K *spam* *.example.net oper 1700000000 :spam\n"
        );
        assert_eq!(lines[1], "-R #bad* *\n");
        assert!(log.drain().is_empty());
    }
}
