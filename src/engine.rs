//! The engine: the single mutator of network state.
//!
//! Every socket task, timer, and helper funnels into one event channel;
//! the engine drains it, runs each event to completion against the
//! entity store, and flushes the resulting outbox into the per-connection
//! send queues. Nothing else ever touches the store, which is the whole
//! concurrency story.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ferric_proto::Line;

use crate::bancache::BanCache;
use crate::bandb::BandbLog;
use crate::chmode::{ExtbanTable, ModeTable};
use crate::config::Config;
use crate::dispatch::{Ctx, EngineAction, Registry};
use crate::flood;
use crate::helper::{HelperReply, HelperSupervisor};
use crate::hooks::Hooks;
use crate::net::ConnHandle;
use crate::ratelimit::RateLimitManager;
use crate::route::{CloseKind, Outbox};
use crate::state::{Client, ConnId, LocalClient, Network, Status};

/// Everything that can wake the engine.
#[derive(Debug)]
pub enum Event {
    Accepted { conn: ConnId, handle: ConnHandle },
    Line { conn: ConnId, line: String },
    Closed { conn: ConnId, reason: String },
    Dialed { conn: ConnId, block_name: String },
    DialFailed { block_name: String },
    Helper { helper_id: u32, reply: HelperReply },
    HelperDied { helper_id: u32 },
}

/// How the process should end, decided by DIE/RESTART.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Die,
    Restart,
}

pub struct Engine {
    net: Network,
    registry: Registry,
    modes: ModeTable,
    extbans: ExtbanTable,
    hooks: Hooks,
    bans: BanCache,
    ratelimit: RateLimitManager,
    bandb: BandbLog,
    config: Arc<Config>,
    config_path: String,

    conns: HashMap<ConnId, ConnHandle>,
    last_read: HashMap<ConnId, i64>,
    pinged: HashSet<ConnId>,
    conn_started: HashMap<ConnId, i64>,
    /// Outbound dials awaiting their SERVER reply, by expected block.
    dialing: HashMap<ConnId, String>,
    autoconn_disabled: HashSet<String>,
    supervisor: Option<HelperSupervisor>,

    events_tx: mpsc::Sender<Event>,
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Engine {
    pub fn new(config: Arc<Config>, config_path: String, events_tx: mpsc::Sender<Event>) -> Self {
        let now = unix_now();
        let mut net = Network::new(
            &config.serverinfo.sid,
            &config.serverinfo.name,
            &config.serverinfo.description,
            now,
        );
        net.tunables.floodcount = config.general.floodcount;
        net.tunables.max_clients = config.general.max_clients;
        net.tunables.spam_num = config.general.spam_num;
        net.tunables.spam_time = config.general.spam_time;
        net.tunables.split_servers = config.general.split_servers;
        net.tunables.split_users = config.general.split_users;
        net.split_active = config.general.split_mode_auto;

        let mut bans = BanCache::new();
        for (mask, reason) in &config.bans.klines {
            let (user, host) = mask.split_once('@').unwrap_or(("*", mask.as_str()));
            bans.add_kline(user, host, reason, now, None);
        }
        for (mask, reason) in &config.bans.dlines {
            bans.add_dline(mask, reason, now, None);
        }
        for (mask, reason) in &config.bans.xlines {
            bans.add_xline(mask, reason, now);
        }
        for (mask, reason) in &config.bans.resvs {
            net.add_resv(mask, reason, "config");
        }

        let supervisor = config.serverinfo.helper_dir.as_deref().map(HelperSupervisor::new);

        Engine {
            net,
            registry: Registry::new(&config.aliases),
            modes: ModeTable::default(),
            extbans: ExtbanTable::default(),
            hooks: Hooks::new(),
            bans,
            ratelimit: RateLimitManager::new(config.general.max_ratelimit_tokens),
            bandb: BandbLog::new(),
            config,
            config_path,
            conns: HashMap::new(),
            last_read: HashMap::new(),
            pinged: HashSet::new(),
            conn_started: HashMap::new(),
            dialing: HashMap::new(),
            autoconn_disabled: HashSet::new(),
            supervisor,
            events_tx,
        }
    }

    /// Spawn configured helper children and their reply readers.
    pub fn start_helpers(&mut self) {
        let Some(supervisor) = self.supervisor.as_mut() else {
            return;
        };
        let mut spawned = Vec::new();
        for _ in 0..self.config.serverinfo.ssld_count {
            if let Ok(id) = supervisor.spawn(crate::helper::HelperRole::Ssld) {
                spawned.push(id);
            }
        }
        if let Ok(id) = supervisor.spawn(crate::helper::HelperRole::Authd) {
            spawned.push(id);
        }
        for id in spawned {
            self.watch_helper(id);
        }
    }

    fn watch_helper(&mut self, helper_id: u32) {
        let Some(supervisor) = self.supervisor.as_ref() else {
            return;
        };
        let Some(helper) = supervisor.helpers.iter().find(|h| h.id == helper_id) else {
            return;
        };
        let Ok(std_sock) = helper.control.try_clone() else {
            return;
        };
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let Ok(sock) = tokio::net::UnixDatagram::from_std(std_sock) else {
                return;
            };
            let mut buf = vec![0u8; 4096];
            loop {
                match sock.recv(&mut buf).await {
                    Ok(0) | Err(_) => {
                        let _ = events.send(Event::HelperDied { helper_id }).await;
                        return;
                    }
                    Ok(n) => {
                        if let Some(frame) = crate::helper::parse_frame(&buf[..n]) {
                            if let Some(reply) = crate::helper::classify_reply(&frame) {
                                let _ = events.send(Event::Helper { helper_id, reply }).await;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Run until DIE/RESTART.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) -> Shutdown {
        let mut second = tokio::time::interval(std::time::Duration::from_secs(1));
        second.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut slow = tokio::time::interval(std::time::Duration::from_secs(60));
        slow.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let actions = tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => return Shutdown::Die,
                    }
                }
                _ = second.tick() => self.tick_second(),
                _ = slow.tick() => self.tick_slow(),
            };
            for action in actions {
                match action {
                    EngineAction::ConnectServer(name) => self.dial(&name),
                    EngineAction::Rehash => self.rehash(),
                    EngineAction::Die => return Shutdown::Die,
                    EngineAction::Restart => return Shutdown::Restart,
                    EngineAction::StartTls(conn) => self.start_tls(conn),
                    EngineAction::DisableAutoconn(name) => {
                        self.autoconn_disabled.insert(name);
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) -> Vec<EngineAction> {
        let now = unix_now();
        match event {
            Event::Accepted { conn, handle } => {
                self.accept_conn(conn, handle, now);
                if let Some(block_name) = self.dialing.get(&conn).cloned() {
                    self.start_outbound_handshake(conn, &block_name);
                }
                Vec::new()
            }
            Event::Line { conn, line } => self.inbound_line(conn, line, now),
            Event::Closed { conn, reason } => {
                self.teardown_conn(conn, &reason, false);
                Vec::new()
            }
            Event::Dialed { conn, block_name } => {
                self.dialing.insert(conn, block_name.clone());
                if self.conns.contains_key(&conn) {
                    self.start_outbound_handshake(conn, &block_name);
                }
                Vec::new()
            }
            Event::DialFailed { block_name } => {
                debug!(server = %block_name, "dial failed, retried on the next timer");
                Vec::new()
            }
            Event::Helper { helper_id, reply } => self.helper_reply(helper_id, reply),
            Event::HelperDied { helper_id } => {
                if let Some(supervisor) = self.supervisor.as_mut() {
                    supervisor.note_death(helper_id, now);
                    // re-watch whatever replaced it
                    let ids: Vec<u32> =
                        supervisor.helpers.iter().map(|h| h.id).collect();
                    for id in ids {
                        if id > helper_id {
                            self.watch_helper(id);
                        }
                    }
                }
                Vec::new()
            }
        }
    }

    fn accept_conn(&mut self, conn: ConnId, handle: ConnHandle, now: i64) {
        let sockhost = handle.addr.ip().to_string();

        // D-lines bite before anything is allocated
        if let Some(dline) = self.bans.check_ip(&sockhost) {
            let reason = dline.reason.clone();
            let _ = handle.tx.try_send(format!("ERROR :Banned: {reason}\r\n"));
            return;
        }

        let tls = handle.tls;
        self.conns.insert(conn, handle);
        self.last_read.insert(conn, now);
        self.conn_started.insert(conn, now);

        let client = Client {
            status: Status::Unknown,
            name: String::new(),
            id: String::new(),
            username: String::new(),
            host: sockhost.clone(),
            orig_host: sockhost.clone(),
            sockhost,
            info: String::new(),
            umodes: Default::default(),
            flags: Default::default(),
            ts: now,
            hopcount: 0,
            servptr: None,
            from_conn: Some(conn),
            away: None,
            account: None,
            certfp: None,
            channels: Default::default(),
            local: Some(LocalClient {
                conn: Some(conn),
                tls,
                ..Default::default()
            }),
        };
        self.net.pending.insert(conn, client);
        self.net.counts.unknown += 1;
    }

    fn inbound_line(&mut self, conn: ConnId, line: String, now: i64) -> Vec<EngineAction> {
        self.last_read.insert(conn, now);
        self.pinged.remove(&conn);

        // read-side budget for registered local users; excess is parked
        let owner_uid = self
            .net
            .conn_owner(conn)
            .map(str::to_string)
            .filter(|id| self.net.find_id(id).map(|c| c.is_user()).unwrap_or(false));
        if let Some(uid) = owner_uid {
            let allowed = self
                .net
                .find_id_mut(&uid)
                .map(flood::try_consume)
                .unwrap_or(true);
            if !allowed {
                let overflow = {
                    let limit = flood::recvq_limit(self.config.general.client_flood);
                    self.net
                        .find_id_mut(&uid)
                        .and_then(|c| c.local.as_mut())
                        .map(|l| {
                            l.recvq.push_back(line);
                            l.recvq.len() > limit
                        })
                        .unwrap_or(false)
                };
                if overflow {
                    self.exit_uid(&uid, "Excess Flood");
                }
                return Vec::new();
            }
        }
        self.process_line(conn, &line, now)
    }

    fn process_line(&mut self, conn: ConnId, line: &str, now: i64) -> Vec<EngineAction> {
        let parsed = match Line::parse(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(conn = %conn, error = %e, "unparseable line");
                return Vec::new();
            }
        };

        let mut out = Outbox::new();
        let mut actions = Vec::new();
        let cfg = Arc::clone(&self.config);
        {
            let mut ctx = Ctx {
                net: &mut self.net,
                out: &mut out,
                cfg: &cfg,
                modes: &self.modes,
                extbans: &self.extbans,
                hooks: &self.hooks,
                bans: &mut self.bans,
                ratelimit: &self.ratelimit,
                bandb: &mut self.bandb,
                registry: &self.registry,
                actions: &mut actions,
                now,
            };
            self.registry.dispatch(&mut ctx, conn, &parsed);
        }
        self.flush(out);
        actions
    }

    /// Push buffered emissions into the per-connection send queues.
    /// A full queue is a dead link.
    fn flush(&mut self, mut out: Outbox) {
        let (lines, closes) = out.drain();
        let mut dead: Vec<ConnId> = Vec::new();

        for (conn, line) in lines {
            if let Some(handle) = self.conns.get(&conn) {
                match handle.tx.try_send(line) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        if !dead.contains(&conn) {
                            dead.push(conn);
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }
        for conn in dead {
            self.teardown_conn(conn, "Max SendQ exceeded", true);
        }

        for (conn, kind) in closes {
            match kind {
                CloseKind::Error(reason) => {
                    if let Some(handle) = self.conns.get(&conn) {
                        let _ = handle.tx.try_send(format!("ERROR :{reason}\r\n"));
                    }
                    self.drop_conn(conn);
                }
                CloseKind::Kill => {
                    self.drop_conn(conn);
                }
            }
        }
    }

    /// Forget a connection's plumbing. State cleanup must already have
    /// happened (or never existed).
    fn drop_conn(&mut self, conn: ConnId) {
        if self.net.pending.remove(&conn).is_some() {
            self.net.counts.unknown = self.net.counts.unknown.saturating_sub(1);
        }
        self.conns.remove(&conn);
        self.last_read.remove(&conn);
        self.pinged.remove(&conn);
        self.conn_started.remove(&conn);
        self.dialing.remove(&conn);
    }

    /// A socket died (or must die) with entity state possibly attached.
    fn teardown_conn(&mut self, conn: ConnId, reason: &str, emit_error: bool) {
        if emit_error {
            if let Some(handle) = self.conns.get(&conn) {
                let _ = handle.tx.try_send(format!("ERROR :Closing Link: ({reason})\r\n"));
            }
        }

        if let Some(owner) = self.net.conn_owner(conn).map(str::to_string) {
            let is_server = self
                .net
                .find_id(&owner)
                .map(|c| c.is_server())
                .unwrap_or(false);
            let mut out = Outbox::new();
            let mut actions = Vec::new();
            let cfg = Arc::clone(&self.config);
            {
                let mut ctx = Ctx {
                    net: &mut self.net,
                    out: &mut out,
                    cfg: &cfg,
                    modes: &self.modes,
                    extbans: &self.extbans,
                    hooks: &self.hooks,
                    bans: &mut self.bans,
                    ratelimit: &self.ratelimit,
                    bandb: &mut self.bandb,
                    registry: &self.registry,
                    actions: &mut actions,
                    now: unix_now(),
                };
                if is_server {
                    crate::handlers::exit::exit_server(&mut ctx, &owner, reason, Some(conn));
                } else {
                    crate::handlers::exit::exit_user(
                        &mut ctx,
                        &owner,
                        reason,
                        crate::handlers::exit::Propagate::Quit,
                        Some(conn),
                    );
                }
            }
            self.flush(out);
        }
        self.drop_conn(conn);
    }

    fn exit_uid(&mut self, uid: &str, reason: &str) {
        let conn = self.net.find_id(uid).and_then(|c| c.from_conn);
        let mut out = Outbox::new();
        let mut actions = Vec::new();
        let cfg = Arc::clone(&self.config);
        {
            let mut ctx = Ctx {
                net: &mut self.net,
                out: &mut out,
                cfg: &cfg,
                modes: &self.modes,
                extbans: &self.extbans,
                hooks: &self.hooks,
                bans: &mut self.bans,
                ratelimit: &self.ratelimit,
                bandb: &mut self.bandb,
                registry: &self.registry,
                actions: &mut actions,
                now: unix_now(),
            };
            crate::handlers::exit::exit_user(
                &mut ctx,
                uid,
                reason,
                crate::handlers::exit::Propagate::Quit,
                None,
            );
        }
        self.flush(out);
        if let Some(conn) = conn {
            self.drop_conn(conn);
        }
    }

    /// The one-second housekeeping pass: flood budgets, parked lines,
    /// ping probes, registration timeouts.
    fn tick_second(&mut self) -> Vec<EngineAction> {
        let now = unix_now();
        let mut actions = Vec::new();

        // flood recompute, then drain whatever the new budget covers
        let local_users: Vec<String> = self
            .net
            .clients()
            .filter(|c| c.is_user() && c.is_local())
            .map(|c| c.id.clone())
            .collect();
        for uid in &local_users {
            if let Some(client) = self.net.find_id_mut(uid) {
                flood::recompute(client);
            }
        }
        for uid in &local_users {
            loop {
                let next = {
                    let Some(client) = self.net.find_id_mut(uid) else { break };
                    if !flood::try_consume(client) {
                        break;
                    }
                    client.local.as_mut().and_then(|l| l.recvq.pop_front())
                };
                let Some(line) = next else {
                    // hand the unused budget back
                    if let Some(local) =
                        self.net.find_id_mut(uid).and_then(|c| c.local.as_mut())
                    {
                        local.allow_read += 1;
                        local.sent_parsed = local.sent_parsed.saturating_sub(1);
                    }
                    break;
                };
                let conn = self.net.find_id(uid).and_then(|c| c.from_conn);
                if let Some(conn) = conn {
                    actions.extend(self.process_line(conn, &line, now));
                }
            }
        }

        // liveness probes
        let ping_time = self.config.general.ping_time as i64;
        let conns: Vec<ConnId> = self.conns.keys().copied().collect();
        let mut out = Outbox::new();
        let mut dead: Vec<(ConnId, String)> = Vec::new();
        for conn in conns {
            let idle = now - self.last_read.get(&conn).copied().unwrap_or(now);
            let registered = self.net.conn_owner(conn).is_some();
            if !registered {
                // unregistered sockets are culled on their own clock
                let age = now - self.conn_started.get(&conn).copied().unwrap_or(now);
                if age > self.config.general.registration_timeout as i64 {
                    dead.push((conn, "Registration timeout".to_string()));
                }
                continue;
            }
            if idle > 2 * ping_time && self.pinged.contains(&conn) {
                dead.push((conn, format!("Ping timeout: {idle} seconds")));
            } else if idle > ping_time && !self.pinged.contains(&conn) {
                self.pinged.insert(conn);
                let me = self.net.me_name.clone();
                out.send_raw(conn, format!("PING :{me}\r\n"));
            }
        }
        self.flush(out);
        for (conn, reason) in dead {
            self.teardown_conn(conn, &reason, true);
        }

        crate::splitmode::evaluate(&mut self.net);
        actions
    }

    /// Minute-scale housekeeping: ban expiry, autoconnect, rate-limiter
    /// hygiene, bandb flush.
    fn tick_slow(&mut self) -> Vec<EngineAction> {
        let now = unix_now();
        let expired = self.bans.expire(now);
        if expired > 0 {
            info!(expired, "temporary bans expired");
        }

        let live: HashSet<String> = self.net.client_ids().into_iter().collect();
        self.ratelimit.prune(|uid| live.contains(uid));

        for line in self.bandb.drain() {
            // the external store is line-oriented; absent one, the log
            // records what would have been written
            debug!(line = %line.trim_end(), "bandb");
        }

        if self.net.tunables.autoconn {
            let wanted: Vec<crate::config::ConnectBlock> = self
                .config
                .connects
                .iter()
                .filter(|b| b.autoconn)
                .filter(|b| !self.autoconn_disabled.contains(&b.name))
                .filter(|b| self.net.find_name(&b.name).is_none())
                .filter(|b| !self.dialing.values().any(|n| n == &b.name))
                .cloned()
                .collect();
            for block in wanted {
                crate::net::dial_server(
                    block,
                    self.events_tx.clone(),
                    self.config.general.sendq_max,
                );
            }
        }
        Vec::new()
    }

    fn dial(&mut self, name: &str) {
        let Some(block) = self
            .config
            .connects
            .iter()
            .find(|b| b.name.eq_ignore_ascii_case(name))
            .cloned()
        else {
            return;
        };
        crate::net::dial_server(block, self.events_tx.clone(), self.config.general.sendq_max);
    }

    /// Outbound handshake: we dialed, the socket is up, introduce
    /// ourselves and wait for their SERVER.
    fn start_outbound_handshake(&mut self, conn: ConnId, block_name: &str) {
        let Some(block) = self
            .config
            .connects
            .iter()
            .find(|b| b.name == block_name)
            .cloned()
        else {
            return;
        };
        match self.net.pending.get_mut(&conn) {
            Some(client) if client.status != Status::Handshake => {
                client.status = Status::Handshake;
            }
            _ => return, // not accepted yet, or handshake already sent
        }
        let mut out = Outbox::new();
        out.send_raw(
            conn,
            format!("PASS {} TS 6 :{}\r\n", block.send_password, self.net.me),
        );
        out.send_raw(conn, format!("CAPAB :{}\r\n", ferric_proto::Capab::ours()));
        out.send_raw(
            conn,
            format!("SERVER {} 1 :{}\r\n", self.net.me_name, self.net.me_info),
        );
        self.flush(out);
    }

    fn start_tls(&mut self, conn: ConnId) {
        // without a live ssld pool the handoff cannot happen; the
        // STARTTLS handler already refused in that case
        if let Some(supervisor) = self.supervisor.as_ref() {
            if let Some(helper) = supervisor.pick(crate::helper::HelperRole::Ssld) {
                let frame = crate::helper::ssld_accept(conn.0 as u32);
                if let Err(e) = frame.send_on(helper.control_fd()) {
                    warn!(error = %e, "ssld handoff failed");
                }
                if let Some(local) = self
                    .net
                    .pending
                    .get_mut(&conn)
                    .and_then(|c| c.local.as_mut())
                {
                    local.tls = true;
                    local.helper_id = Some(helper.id);
                }
            }
        }
    }

    fn helper_reply(&mut self, _helper_id: u32, reply: HelperReply) -> Vec<EngineAction> {
        match reply {
            HelperReply::Dead { conn_id, reason } => {
                self.teardown_conn(ConnId(conn_id as u64), &reason, false);
            }
            HelperReply::CertFp { conn_id, fingerprint } => {
                let conn = ConnId(conn_id as u64);
                if let Some(client) = self.net.pending.get_mut(&conn) {
                    client.certfp = Some(fingerprint);
                } else if let Some(owner) = self.net.conn_owner(conn).map(str::to_string) {
                    if let Some(client) = self.net.find_id_mut(&owner) {
                        client.certfp = Some(fingerprint);
                    }
                }
            }
            HelperReply::AuthVerdict { conn_id, accepted, text } => {
                let conn = ConnId(conn_id as u64);
                if !accepted {
                    self.teardown_conn(conn, &text, true);
                } else {
                    if let Some(local) = self
                        .net
                        .pending
                        .get_mut(&conn)
                        .and_then(|c| c.local.as_mut())
                    {
                        local.authd_pending = false;
                    }
                    let mut out = Outbox::new();
                    let mut actions = Vec::new();
                    let cfg = Arc::clone(&self.config);
                    {
                        let mut ctx = Ctx {
                            net: &mut self.net,
                            out: &mut out,
                            cfg: &cfg,
                            modes: &self.modes,
                            extbans: &self.extbans,
                            hooks: &self.hooks,
                            bans: &mut self.bans,
                            ratelimit: &self.ratelimit,
                            bandb: &mut self.bandb,
                            registry: &self.registry,
                            actions: &mut actions,
                            now: unix_now(),
                        };
                        let _ = crate::handlers::registration::try_register(&mut ctx, conn);
                    }
                    self.flush(out);
                    return actions;
                }
            }
            HelperReply::Notice { conn_id, text } => {
                let conn = ConnId(conn_id as u64);
                if let Some(handle) = self.conns.get(&conn) {
                    let _ = handle.tx.try_send(format!("NOTICE * :{text}\r\n"));
                }
            }
            HelperReply::ZipStats { conn_id, bytes_in, wire_in, bytes_out, wire_out } => {
                debug!(conn_id, bytes_in, wire_in, bytes_out, wire_out, "zipstats");
            }
            HelperReply::Status(_) => {}
        }
        Vec::new()
    }

    /// Swap in a freshly-parsed config snapshot between events.
    fn rehash(&mut self) {
        match Config::load(&self.config_path) {
            Ok(new_config) => {
                if let Err(errors) = crate::config::validate(&new_config) {
                    for err in &errors {
                        warn!(error = %err, "rehash rejected");
                    }
                    return;
                }
                self.registry = Registry::new(&new_config.aliases);
                self.config = Arc::new(new_config);
                info!("configuration rehashed");
            }
            Err(e) => warn!(error = %e, "rehash failed"),
        }
    }
}
