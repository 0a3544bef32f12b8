//! End-to-end state-machine tests: wire lines in, entity-store state and
//! wire lines out, no sockets anywhere.

use std::sync::Arc;

use ferric_proto::{Capab, Line};

use crate::bancache::BanCache;
use crate::bandb::BandbLog;
use crate::chmode::{ExtbanTable, ModeTable};
use crate::config::Config;
use crate::dispatch::{Ctx, EngineAction, Registry};
use crate::hooks::Hooks;
use crate::ratelimit::RateLimitManager;
use crate::route::Outbox;
use crate::state::{Client, ConnId, ListEntry, LocalClient, Membership, Network, SAVE_TS, Server, Status};

const PEER_CONN: ConnId = ConnId(100);
const PEER_SID: &str = "1AA";

struct Harness {
    net: Network,
    registry: Registry,
    modes: ModeTable,
    extbans: ExtbanTable,
    hooks: Hooks,
    bans: BanCache,
    ratelimit: RateLimitManager,
    bandb: BandbLog,
    cfg: Arc<Config>,
    now: i64,
}

impl Harness {
    fn new() -> Self {
        let cfg: Config = toml::from_str(
            r#"
            [serverinfo]
            name = "irc.example.net"
            sid = "42X"
            description = "test server"
            network_name = "TestNet"

            [[listen]]
            host = "127.0.0.1"
            "#,
        )
        .unwrap();
        Harness {
            net: Network::new("42X", "irc.example.net", "test server", 1_700_000_000),
            registry: Registry::new(&[]),
            modes: ModeTable::default(),
            extbans: ExtbanTable::default(),
            hooks: Hooks::new(),
            bans: BanCache::new(),
            ratelimit: RateLimitManager::new(30),
            bandb: BandbLog::new(),
            cfg: Arc::new(cfg),
            now: 1_700_000_100,
        }
    }

    /// Dispatch one wire line arriving on `conn`; returns the emissions.
    fn line(&mut self, conn: ConnId, raw: &str) -> Outbox {
        let parsed = Line::parse(raw).expect("test line parses");
        let mut out = Outbox::new();
        let mut actions: Vec<EngineAction> = Vec::new();
        let mut ctx = Ctx {
            net: &mut self.net,
            out: &mut out,
            cfg: &self.cfg,
            modes: &self.modes,
            extbans: &self.extbans,
            hooks: &self.hooks,
            bans: &mut self.bans,
            ratelimit: &self.ratelimit,
            bandb: &mut self.bandb,
            registry: &self.registry,
            actions: &mut actions,
            now: self.now,
        };
        self.registry.dispatch(&mut ctx, conn, &parsed);
        out
    }

    fn add_local_user(&mut self, nick: &str, conn: ConnId) -> String {
        let uid = self.net.uid_gen.next_uid();
        self.net.add_user(Client {
            status: Status::Client,
            name: nick.to_string(),
            id: uid.clone(),
            username: format!("~{nick}"),
            host: "users.example".into(),
            orig_host: "users.example".into(),
            sockhost: "192.0.2.10".into(),
            info: format!("{nick} gecos"),
            umodes: Default::default(),
            flags: Default::default(),
            ts: 1_000,
            hopcount: 0,
            servptr: Some("42X".into()),
            from_conn: Some(conn),
            away: None,
            account: None,
            certfp: None,
            channels: Default::default(),
            local: Some(LocalClient {
                conn: Some(conn),
                ..Default::default()
            }),
        });
        self.net.bind_conn(conn, &uid);
        uid
    }

    fn link_server(&mut self) {
        self.net.add_server(
            Client {
                status: Status::Server,
                name: "hub.example.net".into(),
                id: PEER_SID.into(),
                username: String::new(),
                host: "hub.example.net".into(),
                orig_host: "hub.example.net".into(),
                sockhost: String::new(),
                info: "hub".into(),
                umodes: Default::default(),
                flags: Default::default(),
                ts: 1_700_000_000,
                hopcount: 1,
                servptr: Some("42X".into()),
                from_conn: Some(PEER_CONN),
                away: None,
                account: None,
                certfp: None,
                channels: Default::default(),
                local: Some(LocalClient {
                    conn: Some(PEER_CONN),
                    ..Default::default()
                }),
            },
            Server::new(Capab::ours(), Capab::ours().to_string()),
        );
        self.net.bind_conn(PEER_CONN, PEER_SID);
    }

    fn join_local(&mut self, uid: &str, chname: &str, op: bool) {
        if let Some(client) = self.net.find_id_mut(uid) {
            client
                .channels
                .insert(ferric_proto::irc_to_lower(chname));
        }
        let channel = self
            .net
            .get_channel_mut(chname)
            .expect("channel exists for join_local");
        channel.members.insert(
            uid.to_string(),
            Membership {
                op,
                ..Default::default()
            },
        );
        channel.local_members.insert(uid.to_string());
    }

    fn lines_on(&self, out: &Outbox, conn: ConnId) -> Vec<String> {
        out.lines
            .iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, l)| l.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------
// Scenario: nick collision on introduction, differing TS, SAVE capable
// ---------------------------------------------------------------------

#[test]
fn test_collision_newer_wins_with_save() {
    let mut h = Harness::new();
    h.link_server();
    let our_alice = h.add_local_user("alice", ConnId(1));
    h.net.find_id_mut(&our_alice).unwrap().ts = 1000;

    // different user@host, newer TS: the incoming claim takes the nick,
    // ours is saved to its UID
    let out = h.line(
        PEER_CONN,
        &format!(
            ":{PEER_SID} EUID alice 1 1200 +i u2 h2.example 203.0.113.5 {PEER_SID}AAAAAB * * :other alice"
        ),
    );

    let saved = h.net.find_id(&our_alice).unwrap();
    assert_eq!(saved.name, our_alice, "loser renamed to its UID");
    assert_eq!(saved.ts, SAVE_TS);

    let winner = h.net.find_name("alice").unwrap();
    assert_eq!(winner.id, format!("{PEER_SID}AAAAAB"));

    // a SAVE for our user went to the SAVE-capable peer
    let peer_lines = h.lines_on(&out, PEER_CONN);
    assert!(
        peer_lines.iter().any(|l| l.contains("SAVE") && l.contains(&our_alice)),
        "peer lines: {peer_lines:?}"
    );
    // our saved local user was told via RPL_SAVENICK (43)
    let user_lines = h.lines_on(&out, ConnId(1));
    assert!(user_lines.iter().any(|l| l.contains(" 043 ") || l.contains(" 43 ")),
        "user lines: {user_lines:?}");
}

#[test]
fn test_collision_equal_ts_saves_both() {
    let mut h = Harness::new();
    h.link_server();
    let our_alice = h.add_local_user("alice", ConnId(1));
    h.net.find_id_mut(&our_alice).unwrap().ts = 1000;

    let incoming_uid = format!("{PEER_SID}AAAAAB");
    let out = h.line(
        PEER_CONN,
        &format!(
            ":{PEER_SID} EUID alice 1 1000 +i u2 h2.example 203.0.113.5 {incoming_uid} * * :other alice"
        ),
    );

    // ours saved
    let ours = h.net.find_id(&our_alice).unwrap();
    assert_eq!(ours.name, our_alice);
    assert_eq!(ours.ts, SAVE_TS);
    // theirs registered under its own UID with the sentinel TS
    let theirs = h.net.find_id(&incoming_uid).unwrap();
    assert_eq!(theirs.name, incoming_uid);
    assert_eq!(theirs.ts, SAVE_TS);
    // the contested nick is free
    assert!(h.net.find_name("alice").is_none());
    // and the introducing link was told to SAVE its user
    let peer_lines = h.lines_on(&out, PEER_CONN);
    assert!(peer_lines.iter().any(|l| l.contains("SAVE") && l.contains(&incoming_uid)));
}

// ---------------------------------------------------------------------
// Scenario: channel TS takeover
// ---------------------------------------------------------------------

#[test]
fn test_sjoin_lower_ts_takeover() {
    let mut h = Harness::new();
    h.link_server();
    let bob = h.add_local_user("bob", ConnId(1));
    let carol = h.add_local_user("carol", ConnId(2));
    {
        let channel = h.net.create_channel("#c", 2000);
        channel.modes.no_external = true;
        channel.modes.topic_limit = true;
        channel.mlock = Some("nt".into());
        channel.bans.push(ListEntry {
            mask: "old!*@*".into(),
            set_by: "x".into(),
            set_at: 1,
            forward: None,
        });
    }
    h.join_local(&bob, "#c", true);
    h.join_local(&carol, "#c", false);

    let dave_uid = format!("{PEER_SID}AAAAAC");
    h.line(
        PEER_CONN,
        &format!(":{PEER_SID} EUID dave 1 900 +i ud hd.example 203.0.113.9 {dave_uid} * * :dave"),
    );
    let out = h.line(
        PEER_CONN,
        &format!(":{PEER_SID} SJOIN 1500 #c +i :@{dave_uid}"),
    );

    let channel = h.net.get_channel("#c").unwrap();
    assert_eq!(channel.ts, 1500);
    assert!(channel.modes.invite_only);
    assert!(!channel.modes.no_external, "local modes dropped");
    assert!(!channel.modes.topic_limit);
    assert!(channel.bans.is_empty(), "list modes emptied");
    assert!(channel.mlock.is_none(), "mlock cleared");
    assert!(!channel.members[&bob].op, "bob deopped");
    assert!(channel.members[&dave_uid].op, "dave keeps op");

    let bob_lines = h.lines_on(&out, ConnId(1));
    assert!(
        bob_lines.iter().any(|l| l.contains("TS for #c changed from 2000 to 1500")),
        "bob lines: {bob_lines:?}"
    );
    assert!(bob_lines.iter().any(|l| l.contains("MODE #c") && l.contains("-nt")));
    assert!(bob_lines.iter().any(|l| l.contains("-o") && l.contains("bob")));
}

#[test]
fn test_sjoin_higher_ts_strips_their_prefixes() {
    let mut h = Harness::new();
    h.link_server();
    let bob = h.add_local_user("bob", ConnId(1));
    {
        let channel = h.net.create_channel("#c", 1500);
        channel.modes.no_external = true;
    }
    h.join_local(&bob, "#c", true);

    let dave_uid = format!("{PEER_SID}AAAAAC");
    h.line(
        PEER_CONN,
        &format!(":{PEER_SID} EUID dave 1 900 +i ud hd.example 203.0.113.9 {dave_uid} * * :dave"),
    );
    h.line(
        PEER_CONN,
        &format!(":{PEER_SID} SJOIN 2000 #c +k :@{dave_uid}"),
    );

    let channel = h.net.get_channel("#c").unwrap();
    assert_eq!(channel.ts, 1500, "our TS stands");
    assert!(channel.modes.no_external, "our modes stand");
    assert!(channel.modes.key.is_none(), "their modes ignored");
    assert!(channel.members[&bob].op, "our statuses stand");
    assert!(!channel.members[&dave_uid].op, "their prefixes stripped");
}

// ---------------------------------------------------------------------
// Scenario: SJOIN burst idempotence
// ---------------------------------------------------------------------

#[test]
fn test_sjoin_identical_replay_is_silent() {
    let mut h = Harness::new();
    h.link_server();
    let bob_uid = format!("{PEER_SID}AAAAAB");
    let carol_uid = format!("{PEER_SID}AAAAAC");
    h.line(
        PEER_CONN,
        &format!(":{PEER_SID} EUID rbob 1 900 +i ub hb.example 203.0.113.7 {bob_uid} * * :bob"),
    );
    h.line(
        PEER_CONN,
        &format!(":{PEER_SID} EUID rcarol 1 901 +i uc hc.example 203.0.113.8 {carol_uid} * * :carol"),
    );

    let sjoin = format!(":{PEER_SID} SJOIN 1500 #c +nt :@{bob_uid} +{carol_uid}");
    h.line(PEER_CONN, &sjoin);
    let channel = h.net.get_channel("#c").unwrap();
    let members_before = channel.members.len();
    let bants_before = channel.bants;
    let ts_before = channel.ts;

    let out = h.line(PEER_CONN, &sjoin);
    let channel = h.net.get_channel("#c").unwrap();
    assert_eq!(channel.members.len(), members_before);
    assert_eq!(channel.bants, bants_before);
    assert_eq!(channel.ts, ts_before);
    assert!(out.lines.is_empty(), "no broadcast at all: {:?}", out.lines);
}

// ---------------------------------------------------------------------
// Scenario: target-change enforcement
// ---------------------------------------------------------------------

#[test]
fn test_target_change_budget() {
    let mut h = Harness::new();
    h.link_server();
    let sender = h.add_local_user("sender", ConnId(1));

    // ten remote strangers are fine
    for i in 0..10 {
        let uid = format!("{PEER_SID}AAAAB{}", (b'A' + i as u8) as char);
        h.line(
            PEER_CONN,
            &format!(":{PEER_SID} EUID target{i} 1 900 +i ut h.example 203.0.113.2 {uid} * * :t"),
        );
        let nick = format!("target{i}");
        let out = h.line(ConnId(1), &format!("PRIVMSG {nick} :hello"));
        assert!(
            h.lines_on(&out, ConnId(1)).iter().all(|l| !l.contains(" 707 ")),
            "target {i} unexpectedly rejected"
        );
        assert!(
            !h.lines_on(&out, PEER_CONN).is_empty(),
            "target {i} not delivered"
        );
    }

    // the eleventh is over budget
    let uid11 = format!("{PEER_SID}AAAABZ");
    h.line(
        PEER_CONN,
        &format!(":{PEER_SID} EUID target10 1 900 +i ut h.example 203.0.113.2 {uid11} * * :t"),
    );
    let out = h.line(ConnId(1), "PRIVMSG target10 :hello");
    assert!(
        h.lines_on(&out, ConnId(1)).iter().any(|l| l.contains(" 707 ")),
        "lines: {:?}",
        out.lines
    );

    // a minute later one slot is free again
    if let Some(local) = h.net.find_id_mut(&sender).and_then(|c| c.local.as_mut()) {
        local.target_last -= 61;
    }
    let out = h.line(ConnId(1), "PRIVMSG target10 :hello again");
    assert!(h.lines_on(&out, ConnId(1)).iter().all(|l| !l.contains(" 707 ")));
}

// ---------------------------------------------------------------------
// Scenario: extban with forward
// ---------------------------------------------------------------------

#[test]
fn test_extban_forward_join() {
    let mut h = Harness::new();
    let joiner = h.add_local_user("joe", ConnId(1));
    {
        let vip = h.net.create_channel("#vip", 1000);
        vip.bans.push(ListEntry {
            mask: "$~a".into(),
            set_by: "op!o@h".into(),
            set_at: 1,
            forward: Some("#lobby".into()),
        });
        // someone must hold #vip open
        vip.members.insert("42XZZZZZZ".into(), Membership::default());
        h.net.create_channel("#lobby", 1000);
        let lobby = h.net.get_channel_mut("#lobby").unwrap();
        lobby.members.insert("42XZZZZZZ".into(), Membership::default());
    }

    let out = h.line(ConnId(1), "JOIN #vip");

    // denied with ERR_LINKCHANNEL, landed in #lobby
    let lines = h.lines_on(&out, ConnId(1));
    assert!(lines.iter().any(|l| l.contains(" 470 ")), "lines: {lines:?}");
    let joined = h.net.find_id(&joiner).unwrap();
    assert!(!joined.channels.contains("#vip"));
    assert!(joined.channels.contains("#lobby"));
}

// ---------------------------------------------------------------------
// Mode idempotence law
// ---------------------------------------------------------------------

#[test]
fn test_mode_op_round_trip_restores_flags() {
    let mut h = Harness::new();
    let op = h.add_local_user("op", ConnId(1));
    let peon = h.add_local_user("peon", ConnId(2));
    h.net.create_channel("#c", 1000);
    h.join_local(&op, "#c", true);
    h.join_local(&peon, "#c", false);

    let before = h.net.get_channel("#c").unwrap().members[&peon].clone();
    h.line(ConnId(1), "MODE #c +o peon");
    assert!(h.net.get_channel("#c").unwrap().members[&peon].op);
    h.line(ConnId(1), "MODE #c -o peon");
    let after = h.net.get_channel("#c").unwrap().members[&peon].clone();
    assert_eq!(before.op, after.op);
    assert_eq!(before.voice, after.voice);
}

// ---------------------------------------------------------------------
// Registration flow
// ---------------------------------------------------------------------

#[test]
fn test_registration_and_introduction() {
    let mut h = Harness::new();
    h.link_server();

    // a fresh unregistered socket
    let conn = ConnId(5);
    h.net.pending.insert(
        conn,
        Client {
            status: Status::Unknown,
            name: String::new(),
            id: String::new(),
            username: String::new(),
            host: "192.0.2.77".into(),
            orig_host: "192.0.2.77".into(),
            sockhost: "192.0.2.77".into(),
            info: String::new(),
            umodes: Default::default(),
            flags: Default::default(),
            ts: 0,
            hopcount: 0,
            servptr: None,
            from_conn: Some(conn),
            away: None,
            account: None,
            certfp: None,
            channels: Default::default(),
            local: Some(LocalClient {
                conn: Some(conn),
                ..Default::default()
            }),
        },
    );

    let out = h.line(conn, "NICK newbie");
    assert!(out.lines.is_empty(), "no welcome before USER");
    let out = h.line(conn, "USER ident 0 * :A new user");

    // welcome burst reached the client
    let lines = h.lines_on(&out, conn);
    assert!(lines.iter().any(|l| l.contains(" 001 ")), "lines: {lines:?}");
    assert!(lines.iter().any(|l| l.contains(" 005 ")));

    // the user exists and was introduced to the peer as EUID
    let user = h.net.find_name("newbie").expect("registered");
    assert_eq!(user.status, Status::Client);
    let peer_lines = h.lines_on(&out, PEER_CONN);
    assert!(
        peer_lines.iter().any(|l| l.contains("EUID newbie")),
        "peer lines: {peer_lines:?}"
    );
}

#[test]
fn test_unknown_command_numeric() {
    let mut h = Harness::new();
    h.add_local_user("joe", ConnId(1));
    let out = h.line(ConnId(1), "FLUMMOX a b c");
    assert!(h.lines_on(&out, ConnId(1)).iter().any(|l| l.contains(" 421 ")));
}

#[test]
fn test_needmoreparams_on_client_and_drop_on_server() {
    let mut h = Harness::new();
    h.link_server();
    h.add_local_user("joe", ConnId(1));

    let out = h.line(ConnId(1), "KICK #c");
    assert!(h.lines_on(&out, ConnId(1)).iter().any(|l| l.contains(" 461 ")));

    // a short SJOIN from a server costs the link
    let out = h.line(PEER_CONN, &format!(":{PEER_SID} SJOIN 12"));
    assert!(!out.closes.is_empty());
}

// ---------------------------------------------------------------------
// KILL/SAVE capability rewriting
// ---------------------------------------------------------------------

#[test]
fn test_save_rewritten_to_kill_for_incapable_peer() {
    let mut h = Harness::new();
    h.link_server();

    // second peer without SAVE
    let dumb_conn = ConnId(101);
    h.net.add_server(
        Client {
            status: Status::Server,
            name: "old.example.net".into(),
            id: "9ZZ".into(),
            username: String::new(),
            host: "old.example.net".into(),
            orig_host: "old.example.net".into(),
            sockhost: String::new(),
            info: "old".into(),
            umodes: Default::default(),
            flags: Default::default(),
            ts: 1_700_000_000,
            hopcount: 1,
            servptr: Some("42X".into()),
            from_conn: Some(dumb_conn),
            away: None,
            account: None,
            certfp: None,
            channels: Default::default(),
            local: Some(LocalClient {
                conn: Some(dumb_conn),
                ..Default::default()
            }),
        },
        Server::new(
            Capab::TS6 | Capab::QS | Capab::ENCAP,
            "TS6 QS ENCAP".to_string(),
        ),
    );
    h.net.bind_conn(dumb_conn, "9ZZ");

    let ours = h.add_local_user("alice", ConnId(1));
    h.net.find_id_mut(&ours).unwrap().ts = 1000;

    let out = h.line(
        PEER_CONN,
        &format!(
            ":{PEER_SID} EUID alice 1 1000 +i u2 h2.example 203.0.113.5 {PEER_SID}AAAAAB * * :dup"
        ),
    );

    let save_peer = h.lines_on(&out, PEER_CONN);
    let kill_peer = h.lines_on(&out, dumb_conn);
    assert!(save_peer.iter().any(|l| l.contains("SAVE")));
    assert!(kill_peer.iter().all(|l| !l.contains("SAVE")));
    assert!(kill_peer.iter().any(|l| l.contains("KILL")));
}
