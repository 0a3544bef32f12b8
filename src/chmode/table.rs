//! The channel mode letter table.
//!
//! 256 slots indexed by mode letter. Adding a mode is a table assignment;
//! the advertised CHANMODES/ISUPPORT strings are regenerated from the
//! table so they can never drift from dispatch.

use crate::state::{ChannelModes, ListKind};

/// How a mode letter renders to other users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    All,
    /// Hidden server-side knobs: changes shown to channel ops only.
    OpsOnly,
}

/// The boolean channel flags a Simple mode can toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleFlag {
    InviteOnly,
    Moderated,
    NoExternal,
    Private,
    Secret,
    TopicLimit,
    NoColour,
    NoCtcp,
    RegOnly,
    OpModerate,
    NoForwardTo,
    FreeForward,
    LargeBanlist,
    Permanent,
}

impl SimpleFlag {
    pub fn letter(self) -> char {
        match self {
            SimpleFlag::InviteOnly => 'i',
            SimpleFlag::Moderated => 'm',
            SimpleFlag::NoExternal => 'n',
            SimpleFlag::Private => 'p',
            SimpleFlag::Secret => 's',
            SimpleFlag::TopicLimit => 't',
            SimpleFlag::NoColour => 'c',
            SimpleFlag::NoCtcp => 'C',
            SimpleFlag::RegOnly => 'r',
            SimpleFlag::OpModerate => 'z',
            SimpleFlag::NoForwardTo => 'Q',
            SimpleFlag::FreeForward => 'F',
            SimpleFlag::LargeBanlist => 'L',
            SimpleFlag::Permanent => 'P',
        }
    }

    pub fn get(self, modes: &ChannelModes) -> bool {
        match self {
            SimpleFlag::InviteOnly => modes.invite_only,
            SimpleFlag::Moderated => modes.moderated,
            SimpleFlag::NoExternal => modes.no_external,
            SimpleFlag::Private => modes.private,
            SimpleFlag::Secret => modes.secret,
            SimpleFlag::TopicLimit => modes.topic_limit,
            SimpleFlag::NoColour => modes.no_colour,
            SimpleFlag::NoCtcp => modes.no_ctcp,
            SimpleFlag::RegOnly => modes.reg_only,
            SimpleFlag::OpModerate => modes.op_moderate,
            SimpleFlag::NoForwardTo => modes.no_forward_to,
            SimpleFlag::FreeForward => modes.free_forward,
            SimpleFlag::LargeBanlist => modes.large_banlist,
            SimpleFlag::Permanent => modes.permanent,
        }
    }

    pub fn set(self, modes: &mut ChannelModes, value: bool) {
        match self {
            SimpleFlag::InviteOnly => modes.invite_only = value,
            SimpleFlag::Moderated => modes.moderated = value,
            SimpleFlag::NoExternal => modes.no_external = value,
            SimpleFlag::Private => modes.private = value,
            SimpleFlag::Secret => modes.secret = value,
            SimpleFlag::TopicLimit => modes.topic_limit = value,
            SimpleFlag::NoColour => modes.no_colour = value,
            SimpleFlag::NoCtcp => modes.no_ctcp = value,
            SimpleFlag::RegOnly => modes.reg_only = value,
            SimpleFlag::OpModerate => modes.op_moderate = value,
            SimpleFlag::NoForwardTo => modes.no_forward_to = value,
            SimpleFlag::FreeForward => modes.free_forward = value,
            SimpleFlag::LargeBanlist => modes.large_banlist = value,
            SimpleFlag::Permanent => modes.permanent = value,
        }
    }
}

/// One mode letter's behavior class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Simple {
        flag: SimpleFlag,
        visibility: Visibility,
        /// Requires oper resv/admin privilege on top of chan-op.
        staff: bool,
    },
    Limit,
    Key,
    Throttle,
    Forward,
    Op,
    Voice,
    List(ListKind),
}

impl ModeKind {
    /// Does this mode consume a parameter in the given direction?
    pub fn takes_param(self, adding: bool) -> bool {
        match self {
            ModeKind::Simple { .. } => false,
            ModeKind::Limit | ModeKind::Throttle | ModeKind::Forward => adding,
            ModeKind::Key | ModeKind::Op | ModeKind::Voice => true,
            // a bare list mode is a query, not a change
            ModeKind::List(_) => false,
        }
    }
}

/// The 256-slot dispatch table.
pub struct ModeTable {
    slots: [Option<ModeKind>; 256],
}

impl Default for ModeTable {
    fn default() -> Self {
        let mut t = ModeTable { slots: [None; 256] };
        let simple = |flag| ModeKind::Simple {
            flag,
            visibility: Visibility::All,
            staff: false,
        };
        t.set('i', simple(SimpleFlag::InviteOnly));
        t.set('m', simple(SimpleFlag::Moderated));
        t.set('n', simple(SimpleFlag::NoExternal));
        t.set('p', simple(SimpleFlag::Private));
        t.set('s', simple(SimpleFlag::Secret));
        t.set('t', simple(SimpleFlag::TopicLimit));
        t.set('c', simple(SimpleFlag::NoColour));
        t.set('C', simple(SimpleFlag::NoCtcp));
        t.set('r', simple(SimpleFlag::RegOnly));
        t.set('z', simple(SimpleFlag::OpModerate));
        t.set('Q', simple(SimpleFlag::NoForwardTo));
        t.set('F', simple(SimpleFlag::FreeForward));
        t.set(
            'L',
            ModeKind::Simple {
                flag: SimpleFlag::LargeBanlist,
                visibility: Visibility::All,
                staff: true,
            },
        );
        t.set(
            'P',
            ModeKind::Simple {
                flag: SimpleFlag::Permanent,
                visibility: Visibility::All,
                staff: true,
            },
        );
        t.set('l', ModeKind::Limit);
        t.set('k', ModeKind::Key);
        t.set('j', ModeKind::Throttle);
        t.set('f', ModeKind::Forward);
        t.set('o', ModeKind::Op);
        t.set('v', ModeKind::Voice);
        t.set('b', ModeKind::List(ListKind::Ban));
        t.set('e', ModeKind::List(ListKind::Except));
        t.set('I', ModeKind::List(ListKind::Invex));
        t.set('q', ModeKind::List(ListKind::Quiet));
        t
    }
}

impl ModeTable {
    pub fn set(&mut self, letter: char, kind: ModeKind) {
        self.slots[letter as u8 as usize] = Some(kind);
    }

    pub fn get(&self, letter: char) -> Option<ModeKind> {
        if letter.is_ascii() {
            self.slots[letter as u8 as usize]
        } else {
            None
        }
    }

    /// The four CHANMODES groups for ISUPPORT, regenerated from the table.
    pub fn isupport_chanmodes(&self) -> String {
        let mut lists = String::new();
        let mut always_param = String::new();
        let mut set_param = String::new();
        let mut flags = String::new();
        for b in 0..=255u8 {
            let c = b as char;
            match self.slots[b as usize] {
                Some(ModeKind::List(_)) => lists.push(c),
                Some(ModeKind::Key) => always_param.push(c),
                Some(ModeKind::Limit) | Some(ModeKind::Throttle) | Some(ModeKind::Forward) => {
                    set_param.push(c)
                }
                Some(ModeKind::Simple { .. }) => flags.push(c),
                Some(ModeKind::Op) | Some(ModeKind::Voice) | None => {}
            }
        }
        format!("{lists},{always_param},{set_param},{flags}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup() {
        let t = ModeTable::default();
        assert_eq!(t.get('b'), Some(ModeKind::List(ListKind::Ban)));
        assert_eq!(t.get('o'), Some(ModeKind::Op));
        assert!(t.get('X').is_none());
        assert!(t.get('é').is_none());
    }

    #[test]
    fn test_param_consumption() {
        let t = ModeTable::default();
        assert!(t.get('k').unwrap().takes_param(true));
        assert!(t.get('k').unwrap().takes_param(false));
        assert!(t.get('l').unwrap().takes_param(true));
        assert!(!t.get('l').unwrap().takes_param(false));
        assert!(!t.get('i').unwrap().takes_param(true));
    }

    #[test]
    fn test_isupport_groups() {
        let t = ModeTable::default();
        let s = t.isupport_chanmodes();
        let groups: Vec<&str> = s.split(',').collect();
        assert_eq!(groups.len(), 4);
        assert!(groups[0].contains('b') && groups[0].contains('q'));
        assert!(groups[1].contains('k'));
        assert!(groups[2].contains('l') && groups[2].contains('f'));
        assert!(groups[3].contains('i') && groups[3].contains('t'));
    }
}
