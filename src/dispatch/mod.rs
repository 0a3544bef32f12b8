//! Command dispatch.
//!
//! Each command is a [`CommandDef`]: name, minimum argument count, flags,
//! and six handler slots selected by the resolved origin (unregistered
//! socket, local user, remote user, server, ENCAP tunnel, oper). The
//! dispatcher strips the `:source` prefix, resolves it against the store,
//! routes stray numerics by target, consults the alias table, enforces
//! argument minimums, and invokes the slot.

mod table;

pub use table::Registry;

use ferric_proto::{Line, Numeric, valid_sid, valid_uid, line::format_line};
use tracing::debug;

use crate::bancache::BanCache;
use crate::bandb::BandbLog;
use crate::chmode::{ExtbanTable, ModeTable};
use crate::config::Config;
use crate::error::{HandlerError, HandlerResult};
use crate::hooks::Hooks;
use crate::ratelimit::RateLimitManager;
use crate::route::Outbox;
use crate::state::{ConnId, Network, Status};

/// Engine-level actions a handler can request but not perform itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Dial the named connect block.
    ConnectServer(String),
    /// Reload the configuration snapshot.
    Rehash,
    /// Clean shutdown.
    Die,
    /// Shutdown with restart exit code.
    Restart,
    /// Hand an unregistered socket to an ssld helper (STARTTLS).
    StartTls(ConnId),
    /// Clock skew tripped: stop auto-dialing this connect block.
    DisableAutoconn(String),
}

/// Everything a handler may touch, for exactly one event.
pub struct Ctx<'a> {
    pub net: &'a mut Network,
    pub out: &'a mut Outbox,
    pub cfg: &'a Config,
    pub modes: &'a ModeTable,
    pub extbans: &'a ExtbanTable,
    pub hooks: &'a Hooks,
    pub bans: &'a mut BanCache,
    pub ratelimit: &'a RateLimitManager,
    pub bandb: &'a mut BandbLog,
    pub registry: &'a Registry,
    pub actions: &'a mut Vec<EngineAction>,
    pub now: i64,
}

impl Ctx<'_> {
    /// Numeric reply to a local user by uid.
    pub fn reply(&mut self, uid: &str, num: Numeric, args: &[&str]) {
        let Some(client) = self.net.find_id(uid) else {
            return;
        };
        let Some(conn) = client.from_conn else { return };
        let nick = client.name.clone();
        let me = self.net.me_name.clone();
        self.out.numeric(conn, &me, num, &nick, args);
    }

    /// Numeric reply to an unregistered connection (target `*`).
    pub fn reply_unreg(&mut self, conn: ConnId, num: Numeric, args: &[&str]) {
        let me = self.net.me_name.clone();
        let nick = self
            .net
            .pending
            .get(&conn)
            .and_then(|c| c.local.as_ref())
            .and_then(|l| l.pre_nick.clone())
            .unwrap_or_else(|| "*".to_string());
        self.out.numeric(conn, &me, num, &nick, args);
    }
}

/// The resolved origin of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// An unregistered local socket.
    Pending(ConnId),
    /// A user, by UID.
    User(String),
    /// A server, by SID.
    Server(String),
}

impl Source {
    pub fn id(&self) -> Option<&str> {
        match self {
            Source::User(id) | Source::Server(id) => Some(id),
            Source::Pending(_) => None,
        }
    }

    pub fn user_uid(&self) -> Option<&str> {
        match self {
            Source::User(id) => Some(id),
            _ => None,
        }
    }
}

/// One dispatched message.
pub struct Request<'a> {
    /// The physical connection the line arrived on.
    pub conn: ConnId,
    pub source: Source,
    pub command: &'a str,
    pub args: &'a [&'a str],
}

impl<'a> Request<'a> {
    pub fn arg(&self, idx: usize) -> Option<&'a str> {
        self.args.get(idx).copied()
    }
}

pub type HandlerFn = fn(&mut Ctx<'_>, &Request<'_>) -> HandlerResult;

/// A handler slot: a function, or one of the canned policies.
#[derive(Clone, Copy)]
pub enum Slot {
    Do(HandlerFn),
    /// ERR_NOTREGISTERED to clients, silence to others.
    Unregistered,
    /// ERR_ALREADYREGISTRED.
    AlreadyRegistered,
    /// ERR_NOPRIVILEGES.
    NotOper,
    /// Silently drop.
    Ignore,
}

/// Per-command flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmdFlags {
    /// Debit the expensive-command token bucket before running.
    pub ratelimited: bool,
}

/// One command table entry.
pub struct CommandDef {
    pub name: &'static str,
    pub min_args: usize,
    pub flags: CmdFlags,
    /// Slots: [unregistered, local client, remote client, server, encap, oper].
    pub handlers: [Slot; 6],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerIndex {
    Unregistered = 0,
    Client = 1,
    RemoteClient = 2,
    Server = 3,
    Encap = 4,
    Oper = 5,
}

impl Registry {
    /// Dispatch one inbound line from `conn`.
    pub fn dispatch(&self, ctx: &mut Ctx<'_>, conn: ConnId, line: &Line<'_>) {
        // classify the connection
        let owner = ctx.net.conn_owner(conn).map(str::to_string);
        let is_server_link = owner
            .as_deref()
            .and_then(|id| ctx.net.find_id(id))
            .map(|c| c.is_server())
            .unwrap_or(false);

        // resolve the source prefix
        let source = match &owner {
            None => Source::Pending(conn),
            Some(id) if !is_server_link => Source::User(id.clone()),
            Some(peer_sid) => match self.resolve_server_prefix(ctx, conn, peer_sid, line) {
                Some(source) => source,
                None => return, // handled (killed/squit/dropped)
            },
        };

        // numerics from peers are routed, not dispatched
        if is_server_link && line.is_numeric() {
            self.route_numeric(ctx, conn, &source, line);
            return;
        }

        let command = line.command.to_ascii_uppercase();
        let Some(def) = self.get(&command) else {
            self.unknown_command(ctx, conn, &source, &command, line);
            return;
        };

        let index = self.handler_index(ctx, &source);
        let slot = def.handlers[index as usize];

        if line.args.len() < def.min_args {
            match index {
                HandlerIndex::Server | HandlerIndex::RemoteClient => {
                    ctx.out.close_error(
                        conn,
                        &format!("Not enough arguments to {command}"),
                    );
                }
                HandlerIndex::Unregistered => {
                    ctx.reply_unreg(
                        conn,
                        Numeric::ERR_NEEDMOREPARAMS,
                        &[&command, "Not enough parameters"],
                    );
                }
                _ => {
                    if let Some(uid) = source.user_uid() {
                        let uid = uid.to_string();
                        ctx.reply(
                            &uid,
                            Numeric::ERR_NEEDMOREPARAMS,
                            &[&command, "Not enough parameters"],
                        );
                    }
                }
            }
            return;
        }

        // expensive commands debit the pacing bucket
        if def.flags.ratelimited && index == HandlerIndex::Client {
            if let Some(uid) = source.user_uid() {
                let exempt = ctx.cfg.general.no_oper_flood
                    && ctx.net.find_id(uid).map(|c| c.is_oper()).unwrap_or(false);
                let has_credit = ctx
                    .net
                    .find_id_mut(uid)
                    .and_then(|c| c.local.as_mut())
                    .map(|l| {
                        if l.who_credits > 0 {
                            l.who_credits -= 1;
                            true
                        } else {
                            false
                        }
                    })
                    .unwrap_or(false);
                if !has_credit && !ctx.ratelimit.check(uid, exempt) {
                    let uid = uid.to_string();
                    ctx.reply(
                        &uid,
                        Numeric::RPL_LOAD2HI,
                        &[&command, "This command has been administratively disabled temporarily"],
                    );
                    return;
                }
            }
        }

        let req = Request {
            conn,
            source,
            command: &command,
            args: &line.args,
        };

        let result = match slot {
            Slot::Do(f) => f(ctx, &req),
            Slot::Ignore => Ok(()),
            Slot::Unregistered => Err(HandlerError::NotRegistered),
            Slot::AlreadyRegistered => Err(HandlerError::AlreadyRegistered),
            Slot::NotOper => Err(HandlerError::NoPrivileges),
        };

        if let Err(err) = result {
            self.report_error(ctx, &req, index, err);
        }
    }

    fn handler_index(&self, ctx: &Ctx<'_>, source: &Source) -> HandlerIndex {
        match source {
            Source::Pending(_) => HandlerIndex::Unregistered,
            Source::Server(_) => HandlerIndex::Server,
            Source::User(uid) => match ctx.net.find_id(uid) {
                Some(c) if !c.is_local() => HandlerIndex::RemoteClient,
                Some(c) if c.is_oper() => HandlerIndex::Oper,
                _ => HandlerIndex::Client,
            },
        }
    }

    /// Resolve `:prefix` on a server link. `None` means the message was
    /// consumed (unknown ghost killed, or hopeless).
    fn resolve_server_prefix(
        &self,
        ctx: &mut Ctx<'_>,
        conn: ConnId,
        peer_sid: &str,
        line: &Line<'_>,
    ) -> Option<Source> {
        let Some(prefix) = line.source else {
            return Some(Source::Server(peer_sid.to_string()));
        };

        if let Some(client) = ctx.net.resolve(prefix) {
            return Some(if client.is_server() {
                Source::Server(client.id.clone())
            } else {
                Source::User(client.id.clone())
            });
        }

        // Unknown source: kill it back toward the sender so both sides
        // converge on its absence. The link survives.
        debug!(prefix = %prefix, command = %line.command, "unknown source on server link");
        let me = ctx.net.me.clone();
        if valid_uid(prefix) {
            ctx.out.send_raw(
                conn,
                format_line(Some(&me), "KILL", &[prefix, "Ghosted client"]),
            );
        } else if valid_sid(prefix) || prefix.contains('.') {
            ctx.out.send_raw(
                conn,
                format_line(Some(&me), "SQUIT", &[prefix, "Unknown server"]),
            );
        }
        None
    }

    /// Route a numeric from a peer toward its target.
    fn route_numeric(&self, ctx: &mut Ctx<'_>, conn: ConnId, source: &Source, line: &Line<'_>) {
        let Some(target_name) = line.arg(0) else { return };
        let Some(target) = ctx.net.resolve(target_name) else {
            return;
        };

        if target.status == Status::Me {
            // tolerated during collision aftermath, dropped either way
            if !matches!(line.command, "401" | "402") {
                debug!(numeric = %line.command, "numeric for me dropped");
            }
            return;
        }

        let target_id = target.id.clone();
        let is_local = target.is_local();
        let route = target.from_conn;
        if route == Some(conn) {
            return; // wrong direction, never bounce back
        }

        let source_name = match source {
            Source::Server(sid) => ctx
                .net
                .find_id(sid)
                .map(|c| if is_local { c.name.clone() } else { c.id.clone() }),
            Source::User(uid) => ctx
                .net
                .find_id(uid)
                .map(|c| if is_local { c.name.clone() } else { c.id.clone() }),
            Source::Pending(_) => None,
        };
        let Some(source_name) = source_name else { return };

        let target_render = if is_local {
            ctx.net.find_id(&target_id).map(|c| c.name.clone())
        } else {
            Some(target_id.clone())
        };
        let Some(target_render) = target_render else {
            return;
        };

        let mut args: Vec<&str> = vec![&target_render];
        args.extend(line.args.iter().skip(1));
        if let Some(route) = route {
            ctx.out
                .send_raw(route, format_line(Some(&source_name), line.command, &args));
        }
    }

    /// No such command: alias expansion for registered local users,
    /// ERR_UNKNOWNCOMMAND otherwise, silence for the rest.
    fn unknown_command(
        &self,
        ctx: &mut Ctx<'_>,
        _conn: ConnId,
        source: &Source,
        command: &str,
        line: &Line<'_>,
    ) {
        match source {
            Source::User(uid) if ctx.net.find_id(uid).is_some_and(|c| c.is_local()) => {
                let uid = uid.clone();
                if let Some(target) = self.alias_target(command) {
                    let text = line.args.join(" ");
                    crate::handlers::messaging::deliver_alias(ctx, &uid, &target, &text);
                    return;
                }
                ctx.reply(
                    &uid,
                    Numeric::ERR_UNKNOWNCOMMAND,
                    &[command, "Unknown command"],
                );
            }
            _ => {
                debug!(command = %command, "unknown command dropped");
            }
        }
    }

    fn report_error(
        &self,
        ctx: &mut Ctx<'_>,
        req: &Request<'_>,
        index: HandlerIndex,
        err: HandlerError,
    ) {
        match index {
            HandlerIndex::Server | HandlerIndex::RemoteClient | HandlerIndex::Encap => {
                match err {
                    HandlerError::Protocol(reason) | HandlerError::Drop(reason) => {
                        ctx.out.close_error(req.conn, &reason);
                    }
                    other => {
                        debug!(command = %req.command, error = %other, "server-link handler error");
                    }
                }
            }
            HandlerIndex::Unregistered => {
                if let HandlerError::Drop(reason) = &err {
                    ctx.out.close_error(req.conn, reason);
                } else if let Some((num, args)) = err.to_numeric(req.command) {
                    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
                    ctx.reply_unreg(req.conn, num, &refs);
                }
            }
            _ => {
                if let HandlerError::Drop(reason) = &err {
                    ctx.out.close_error(req.conn, reason);
                } else if let Some(uid) = req.source.user_uid() {
                    if let Some((num, args)) = err.to_numeric(req.command) {
                        let uid = uid.to_string();
                        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
                        ctx.reply(&uid, num, &refs);
                    }
                }
            }
        }
    }
}
