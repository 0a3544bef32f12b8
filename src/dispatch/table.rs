//! The command table.
//!
//! Built once at startup; the six slots per command are the whole
//! authorization story for who may invoke what. Extensions append with
//! [`Registry::insert`].

use std::collections::HashMap;

use super::{CmdFlags, CommandDef, Slot};
use crate::handlers::{bans, cap, channel, encap, exit, messaging, mode, nick, oper, queries,
    registration, server_link, sjoin, uid};

use Slot::{AlreadyRegistered as A, Ignore as I, NotOper as N, Unregistered as U};

macro_rules! def {
    ($name:literal, $min:expr, [$a:expr, $b:expr, $c:expr, $d:expr, $e:expr, $f:expr]) => {
        CommandDef {
            name: $name,
            min_args: $min,
            flags: CmdFlags::default(),
            handlers: [$a, $b, $c, $d, $e, $f],
        }
    };
    ($name:literal, $min:expr, ratelimited, [$a:expr, $b:expr, $c:expr, $d:expr, $e:expr, $f:expr]) => {
        CommandDef {
            name: $name,
            min_args: $min,
            flags: CmdFlags { ratelimited: true },
            handlers: [$a, $b, $c, $d, $e, $f],
        }
    };
}

/// The command registry plus the alias table.
pub struct Registry {
    commands: HashMap<&'static str, CommandDef>,
    aliases: HashMap<String, String>,
}

impl Registry {
    pub fn new(alias_blocks: &[crate::config::AliasBlock]) -> Self {
        use Slot::Do as D;

        let defs: Vec<CommandDef> = vec![
            // registration & liveness
            def!("NICK", 0, [D(registration::mr_nick), D(nick::m_nick), D(nick::mc_nick), D(nick::ms_nick), I, D(nick::m_nick)]),
            def!("USER", 4, [D(registration::mr_user), A, I, I, I, A]),
            def!("PASS", 1, [D(registration::mr_pass), A, I, I, I, A]),
            def!("CAP", 1, [D(cap::m_cap), D(cap::m_cap), I, I, I, D(cap::m_cap)]),
            def!("CAPAB", 1, [D(server_link::mr_capab), I, I, I, I, I]),
            def!("SERVER", 3, [D(server_link::mr_server), A, I, I, I, A]),
            def!("SID", 4, [I, I, I, D(server_link::ms_sid), I, I]),
            def!("SVINFO", 4, [I, I, I, D(server_link::ms_svinfo), I, I]),
            def!("PING", 1, [I, D(server_link::m_ping), D(server_link::m_ping), D(server_link::ms_ping), I, D(server_link::m_ping)]),
            def!("PONG", 1, [D(registration::mr_pong), D(server_link::m_pong), I, D(server_link::ms_pong), I, D(server_link::m_pong)]),
            def!("QUIT", 0, [D(registration::mr_quit), D(exit::m_quit), D(exit::mc_quit), I, I, D(exit::m_quit)]),
            def!("ERROR", 0, [D(server_link::mr_error), I, I, D(server_link::ms_error), I, I]),
            def!("STARTTLS", 0, [D(registration::mr_starttls), I, I, I, I, I]),

            // messaging
            def!("PRIVMSG", 2, [U, D(messaging::m_privmsg), D(messaging::m_privmsg), D(messaging::m_privmsg), I, D(messaging::m_privmsg)]),
            def!("NOTICE", 2, [I, D(messaging::m_notice), D(messaging::m_notice), D(messaging::m_notice), I, D(messaging::m_notice)]),
            def!("CPRIVMSG", 3, [U, D(messaging::m_cprivmsg), I, I, I, D(messaging::m_cprivmsg)]),
            def!("CNOTICE", 3, [U, D(messaging::m_cnotice), I, I, I, D(messaging::m_cnotice)]),

            // channels
            def!("JOIN", 1, [U, D(channel::m_join), D(channel::mc_join), I, I, D(channel::m_join)]),
            def!("SJOIN", 4, [I, I, I, D(sjoin::ms_sjoin), I, I]),
            def!("PART", 1, [U, D(channel::m_part), D(channel::m_part), I, I, D(channel::m_part)]),
            def!("KICK", 2, [U, D(channel::m_kick), D(channel::m_kick), D(channel::m_kick), I, D(channel::m_kick)]),
            def!("TOPIC", 1, [U, D(channel::m_topic), D(channel::m_topic), D(channel::m_topic), I, D(channel::m_topic)]),
            def!("TB", 3, [I, I, I, D(sjoin::ms_tb), I, I]),
            def!("INVITE", 2, [U, D(channel::m_invite), D(channel::m_invite), I, I, D(channel::m_invite)]),
            def!("NAMES", 0, [U, D(channel::m_names), I, I, I, D(channel::m_names)]),
            def!("MODE", 1, [U, D(mode::m_mode), D(mode::m_mode), D(mode::m_mode), I, D(mode::m_mode)]),
            def!("TMODE", 3, [I, I, D(mode::ms_tmode), D(mode::ms_tmode), I, I]),
            def!("BMASK", 4, [I, I, I, D(sjoin::ms_bmask), I, I]),
            def!("MLOCK", 2, [I, I, I, D(sjoin::ms_mlock), I, I]),

            // TS6 introductions & collision machinery
            def!("UID", 9, [I, I, I, D(uid::ms_uid), I, I]),
            def!("EUID", 11, [I, I, I, D(uid::ms_euid), I, I]),
            def!("SAVE", 2, [I, I, I, D(nick::ms_save), I, I]),
            def!("KILL", 1, [U, N, D(oper::ms_kill), D(oper::ms_kill), I, D(oper::mo_kill)]),
            def!("SQUIT", 1, [U, N, D(oper::ms_squit), D(oper::ms_squit), I, D(oper::mo_squit)]),
            def!("CONNECT", 1, [U, N, I, I, I, D(oper::mo_connect)]),
            def!("ENCAP", 2, [I, I, D(encap::ms_encap), D(encap::ms_encap), I, I]),

            // user state & queries
            def!("AWAY", 0, [U, D(queries::m_away), D(queries::m_away), I, I, D(queries::m_away)]),
            def!("WHO", 1, ratelimited, [U, D(queries::m_who), I, I, I, D(queries::m_who)]),
            def!("WHOIS", 1, [U, D(queries::m_whois), I, I, I, D(queries::m_whois)]),
            def!("ISON", 1, [U, D(queries::m_ison), I, I, I, D(queries::m_ison)]),
            def!("USERHOST", 1, [U, D(queries::m_userhost), I, I, I, D(queries::m_userhost)]),
            def!("LIST", 0, ratelimited, [U, D(queries::m_list), I, I, I, D(queries::m_list)]),
            def!("ADMIN", 0, [U, D(queries::m_admin), I, I, I, D(queries::m_admin)]),
            def!("VERSION", 0, [U, D(queries::m_version), I, I, I, D(queries::m_version)]),
            def!("TIME", 0, [U, D(queries::m_time), I, I, I, D(queries::m_time)]),
            def!("STATS", 1, [U, D(queries::m_stats), I, I, I, D(queries::m_stats)]),
            def!("LUSERS", 0, [U, D(queries::m_lusers), I, I, I, D(queries::m_lusers)]),
            def!("MOTD", 0, [U, D(queries::m_motd), I, I, I, D(queries::m_motd)]),
            def!("MONITOR", 1, [U, D(queries::m_monitor), I, I, I, D(queries::m_monitor)]),
            def!("ACCEPT", 1, [U, D(queries::m_accept), I, I, I, D(queries::m_accept)]),

            // operator surface
            def!("OPER", 2, [U, D(oper::m_oper), I, I, I, D(oper::m_oper)]),
            def!("WALLOPS", 1, [U, N, D(oper::ms_wallops), D(oper::ms_wallops), I, D(oper::mo_wallops)]),
            def!("OPERWALL", 1, [U, N, D(oper::ms_operwall), D(oper::ms_operwall), I, D(oper::mo_operwall)]),
            def!("REHASH", 0, [U, N, I, I, I, D(oper::mo_rehash)]),
            def!("DIE", 0, [U, N, I, I, I, D(oper::mo_die)]),
            def!("RESTART", 0, [U, N, I, I, I, D(oper::mo_restart)]),
            def!("SET", 0, [U, N, I, I, I, D(oper::mo_set)]),
            def!("TRACE", 0, [U, N, I, I, I, D(oper::mo_trace)]),
            def!("TESTMASK", 1, [U, N, I, I, I, D(oper::mo_testmask)]),
            def!("TESTLINE", 1, [U, N, I, I, I, D(oper::mo_testline)]),
            def!("OMODE", 2, [U, N, I, I, I, D(oper::mo_omode)]),
            def!("OKICK", 2, [U, N, I, I, I, D(oper::mo_okick)]),
            def!("CLEARCHAN", 1, [U, N, I, I, I, D(oper::mo_clearchan)]),
            def!("OLIST", 1, [U, N, I, I, I, D(oper::mo_olist)]),
            def!("SENDBANS", 0, [U, N, I, I, I, D(oper::mo_sendbans)]),

            // bans: oper locally, ENCAP for cluster propagation
            def!("KLINE", 2, [U, N, I, I, D(bans::me_kline), D(bans::mo_kline)]),
            def!("UNKLINE", 1, [U, N, I, I, D(bans::me_unkline), D(bans::mo_unkline)]),
            def!("DLINE", 2, [U, N, I, I, D(bans::me_dline), D(bans::mo_dline)]),
            def!("UNDLINE", 1, [U, N, I, I, D(bans::me_undline), D(bans::mo_undline)]),
            def!("XLINE", 2, [U, N, I, I, D(bans::me_xline), D(bans::mo_xline)]),
            def!("UNXLINE", 1, [U, N, I, I, D(bans::me_unxline), D(bans::mo_unxline)]),
            def!("RESV", 2, [U, N, I, I, D(bans::me_resv), D(bans::mo_resv)]),
            def!("UNRESV", 1, [U, N, I, I, D(bans::me_unresv), D(bans::mo_unresv)]),

            // ENCAP-only verbs
            def!("LOGIN", 1, [I, I, I, I, D(encap::me_login), I]),
            def!("CERTFP", 1, [I, I, I, I, D(encap::me_certfp), I]),
            def!("REALHOST", 1, [I, I, I, I, D(encap::me_realhost), I]),
            def!("TGINFO", 1, [I, I, I, I, D(encap::me_tginfo), I]),
        ];

        let mut commands = HashMap::new();
        for def in defs {
            commands.insert(def.name, def);
        }

        let aliases = alias_blocks
            .iter()
            .map(|a| (a.name.to_ascii_uppercase(), a.target.clone()))
            .collect();

        Registry { commands, aliases }
    }

    /// Append or replace a command at runtime (extension point).
    pub fn insert(&mut self, def: CommandDef) {
        self.commands.insert(def.name, def);
    }

    pub fn get(&self, name: &str) -> Option<&CommandDef> {
        self.commands.get(name)
    }

    pub fn alias_target(&self, name: &str) -> Option<String> {
        self.aliases.get(name).cloned()
    }

    /// Commands known, for STATS output.
    pub fn command_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Alias config sanity check: a real command may not be shadowed.
    pub fn alias_would_shadow(&self, name: &str) -> bool {
        self.commands.contains_key(name.to_ascii_uppercase().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_contains_core_commands() {
        let registry = Registry::new(&[]);
        for name in ["NICK", "SJOIN", "PRIVMSG", "EUID", "KLINE", "ENCAP"] {
            assert!(registry.get(name).is_some(), "{name} missing");
        }
        assert!(registry.get("BOGUS").is_none());
    }

    #[test]
    fn test_min_args() {
        let registry = Registry::new(&[]);
        assert_eq!(registry.get("EUID").unwrap().min_args, 11);
        assert_eq!(registry.get("UID").unwrap().min_args, 9);
        assert_eq!(registry.get("USER").unwrap().min_args, 4);
    }

    #[test]
    fn test_aliases() {
        let blocks = vec![crate::config::AliasBlock {
            name: "NS".into(),
            target: "NickServ@services.example.net".into(),
        }];
        let registry = Registry::new(&blocks);
        assert_eq!(
            registry.alias_target("NS").as_deref(),
            Some("NickServ@services.example.net")
        );
        assert!(registry.alias_target("CS").is_none());
    }

    #[test]
    fn test_ratelimited_flags() {
        let registry = Registry::new(&[]);
        assert!(registry.get("WHO").unwrap().flags.ratelimited);
        assert!(registry.get("LIST").unwrap().flags.ratelimited);
        assert!(!registry.get("PRIVMSG").unwrap().flags.ratelimited);
    }
}
