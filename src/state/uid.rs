//! TS6 UID generation.

/// Generates the 9-character TS6 user identifiers: the local SID followed
/// by a six-character counter. The first counter position cycles `A-Z`
/// only; the remaining five cycle `A-Z0-9`, incrementing rightmost-first
/// with carry.
#[derive(Debug)]
pub struct UidGenerator {
    sid: String,
    counter: [u8; 6],
    primed: bool,
}

impl UidGenerator {
    pub fn new(sid: &str) -> Self {
        Self {
            sid: sid.to_string(),
            counter: *b"AAAAAA",
            primed: false,
        }
    }

    /// Produce the next UID. Wraps around after exhausting the space;
    /// the store treats a duplicate as a programming bug.
    pub fn next_uid(&mut self) -> String {
        if self.primed {
            self.increment();
        }
        self.primed = true;
        let suffix = std::str::from_utf8(&self.counter).unwrap_or("AAAAAA");
        format!("{}{}", self.sid, suffix)
    }

    fn increment(&mut self) {
        for i in (0..6).rev() {
            match self.counter[i] {
                b'Z' if i == 0 => {
                    // full wrap of the leading letter
                    self.counter[i] = b'A';
                }
                b'Z' => {
                    self.counter[i] = b'0';
                    return;
                }
                b'9' => {
                    self.counter[i] = b'A';
                    // carry into the next position leftward
                }
                _ => {
                    self.counter[i] += 1;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_start() {
        let mut g = UidGenerator::new("42X");
        assert_eq!(g.next_uid(), "42XAAAAAA");
        assert_eq!(g.next_uid(), "42XAAAAAB");
        assert_eq!(g.next_uid(), "42XAAAAAC");
    }

    #[test]
    fn test_letter_to_digit_rollover() {
        let mut g = UidGenerator::new("42X");
        g.counter = *b"AAAAAZ";
        g.primed = true;
        assert_eq!(g.next_uid(), "42XAAAAA0");
        assert_eq!(g.next_uid(), "42XAAAAA1");
    }

    #[test]
    fn test_carry() {
        let mut g = UidGenerator::new("42X");
        g.counter = *b"AAAAA9";
        g.primed = true;
        assert_eq!(g.next_uid(), "42XAAAABA");
    }

    #[test]
    fn test_deep_carry() {
        let mut g = UidGenerator::new("42X");
        g.counter = *b"AZ9999";
        g.primed = true;
        assert_eq!(g.next_uid(), "42XA0AAAA");
    }
}
