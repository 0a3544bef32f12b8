//! Server-to-server CAPAB negotiation tokens.
//!
//! Capabilities are negotiated once per link during handshake and consulted
//! on every propagation decision (SAVE vs KILL rewriting, EUID vs UID,
//! BMASK suppression for peers without EX/IE, ...).

use std::fmt;

/// A negotiated capability set for one server link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capab(u32);

impl Capab {
    pub const QS: Capab = Capab(0x0001);
    pub const EX: Capab = Capab(0x0002);
    pub const IE: Capab = Capab(0x0004);
    pub const CHW: Capab = Capab(0x0008);
    pub const KLN: Capab = Capab(0x0010);
    pub const CLUSTER: Capab = Capab(0x0020);
    pub const TB: Capab = Capab(0x0040);
    pub const ENCAP: Capab = Capab(0x0080);
    pub const SERVICES: Capab = Capab(0x0100);
    pub const SAVE: Capab = Capab(0x0200);
    pub const RSFNC: Capab = Capab(0x0400);
    pub const EUID: Capab = Capab(0x0800);
    pub const EOB: Capab = Capab(0x1000);
    pub const TS6: Capab = Capab(0x2000);
    pub const UNKLN: Capab = Capab(0x4000);
    pub const ZIP: Capab = Capab(0x8000);
    pub const BAN: Capab = Capab(0x1_0000);
    pub const MLOCK: Capab = Capab(0x2_0000);
    pub const HOPS: Capab = Capab(0x4_0000);

    const TABLE: &'static [(&'static str, Capab)] = &[
        ("QS", Capab::QS),
        ("EX", Capab::EX),
        ("IE", Capab::IE),
        ("CHW", Capab::CHW),
        ("KLN", Capab::KLN),
        ("CLUSTER", Capab::CLUSTER),
        ("TB", Capab::TB),
        ("ENCAP", Capab::ENCAP),
        ("SERVICES", Capab::SERVICES),
        ("SAVE", Capab::SAVE),
        ("RSFNC", Capab::RSFNC),
        ("EUID", Capab::EUID),
        ("EOB", Capab::EOB),
        ("TS6", Capab::TS6),
        ("UNKLN", Capab::UNKLN),
        ("ZIP", Capab::ZIP),
        ("BAN", Capab::BAN),
        ("MLOCK", Capab::MLOCK),
        ("HOPS", Capab::HOPS),
    ];

    /// The empty set.
    pub const fn none() -> Capab {
        Capab(0)
    }

    /// Everything this implementation itself offers in its CAPAB line.
    pub fn ours() -> Capab {
        Capab::QS
            | Capab::EX
            | Capab::IE
            | Capab::CHW
            | Capab::KLN
            | Capab::CLUSTER
            | Capab::TB
            | Capab::ENCAP
            | Capab::SERVICES
            | Capab::SAVE
            | Capab::RSFNC
            | Capab::EUID
            | Capab::EOB
            | Capab::TS6
            | Capab::UNKLN
            | Capab::BAN
            | Capab::MLOCK
    }

    /// Parse one space-separated CAPAB token list.
    pub fn parse(tokens: &str) -> Capab {
        let mut set = Capab::none();
        for tok in tokens.split_ascii_whitespace() {
            if let Some(&(_, cap)) = Self::TABLE.iter().find(|(name, _)| *name == tok) {
                set = set | cap;
            }
        }
        set
    }

    #[inline]
    pub fn has(self, cap: Capab) -> bool {
        self.0 & cap.0 == cap.0
    }
}

impl std::ops::BitOr for Capab {
    type Output = Capab;
    fn bitor(self, rhs: Capab) -> Capab {
        Capab(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Capab {
    fn bitor_assign(&mut self, rhs: Capab) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Capab {
    /// Render as the wire token list.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for &(name, cap) in Self::TABLE {
            if self.has(cap) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let caps = Capab::parse("TS6 EUID SAVE BOGUS EX");
        assert!(caps.has(Capab::TS6));
        assert!(caps.has(Capab::EUID));
        assert!(caps.has(Capab::SAVE));
        assert!(caps.has(Capab::EX));
        assert!(!caps.has(Capab::IE));
        assert_eq!(caps.to_string(), "EX SAVE EUID TS6");
    }

    #[test]
    fn test_ours_includes_required() {
        let ours = Capab::ours();
        for cap in [Capab::TS6, Capab::ENCAP, Capab::QS, Capab::SAVE, Capab::EUID] {
            assert!(ours.has(cap));
        }
    }
}
