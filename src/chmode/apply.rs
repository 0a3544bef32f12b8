//! The compound mode engine.
//!
//! Parses a `+ovb-k`-style mode string with parameters, authorizes each
//! piece against the source, applies the surviving changes to the channel,
//! and emits batched MODE lines to local members plus a TS-carrying TMODE
//! to peers. Parsing and application are separate passes so a half-valid
//! command applies exactly its valid half.

use ferric_proto::{Numeric, line::format_line, valid_channel_name};

use super::extban::ExtbanTable;
use super::mask::{pretty_mask, same_mask};
use super::table::{ModeKind, ModeTable, SimpleFlag, Visibility};
use crate::config::ChannelConfig;
use crate::error::{HandlerError, HandlerResult};
use crate::route::{Outbox, sendto_server};
use crate::state::{ConnId, ListEntry, ListKind, Network};

/// Parameter-taking changes allowed per command from a local client.
pub const MAXMODEPARAMS: usize = 4;

/// The larger allowance on server links.
pub const MAXMODEPARAMS_SERV: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Add,
    Del,
    Query,
}

/// Who is changing modes. Remote users and servers carry network
/// authority: their changes are never permission-checked.
#[derive(Debug, Clone)]
pub enum ModeSource {
    LocalUser { uid: String },
    RemoteUser { uid: String },
    Server { id: String },
}

impl ModeSource {
    pub fn id(&self) -> &str {
        match self {
            ModeSource::LocalUser { uid } | ModeSource::RemoteUser { uid } => uid,
            ModeSource::Server { id } => id,
        }
    }

    pub fn is_local_user(&self) -> bool {
        matches!(self, ModeSource::LocalUser { .. })
    }

    /// (client-facing prefix, wire prefix).
    fn prefixes(&self, net: &Network) -> (String, String) {
        match self {
            ModeSource::LocalUser { uid } | ModeSource::RemoteUser { uid } => net
                .find_id(uid)
                .map(|c| (c.mask(), c.id.clone()))
                .unwrap_or_else(|| (uid.clone(), uid.clone())),
            ModeSource::Server { id } => net
                .find_id(id)
                .map(|c| (c.name.clone(), c.id.clone()))
                .unwrap_or_else(|| (id.clone(), id.clone())),
        }
    }

    fn conn(&self, net: &Network) -> Option<ConnId> {
        match self {
            ModeSource::LocalUser { uid } => net.find_id(uid).and_then(|c| c.from_conn),
            _ => None,
        }
    }

    fn nick(&self, net: &Network) -> String {
        net.find_id(self.id())
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "*".to_string())
    }
}

/// What one validated change does when applied.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChangeOp {
    Flag(SimpleFlag, bool),
    SetLimit(Option<u32>),
    SetKey(Option<String>),
    SetThrottle(Option<(u32, i64)>),
    SetForward(Option<String>),
    MemberOp { uid: String, value: bool },
    MemberVoice { uid: String, value: bool },
    ListAdd { kind: ListKind, entry: ListEntry },
    ListDel { kind: ListKind, mask: String },
}

#[derive(Debug, Clone)]
struct Change {
    dir: Dir,
    letter: char,
    arg_local: Option<String>,
    arg_wire: Option<String>,
    visibility: Visibility,
    op: ChangeOp,
}

/// Is a letter locked against local changes?
pub fn mlock_forbids(mlock: Option<&str>, letter: char) -> bool {
    mlock.is_some_and(|locked| locked.contains(letter))
}

/// Parse and apply one MODE/TMODE invocation against a channel.
///
/// `args[0]` is the mode string, the rest are parameters. Local-source
/// errors become numerics; remote garbage is dropped silently.
#[allow(clippy::too_many_arguments)]
pub fn channel_mode(
    net: &mut Network,
    out: &mut Outbox,
    extbans: &ExtbanTable,
    table: &ModeTable,
    cfg: &ChannelConfig,
    source: &ModeSource,
    chname: &str,
    args: &[&str],
    now: i64,
) -> HandlerResult {
    let Some(channel) = net.get_channel(chname) else {
        return if source.is_local_user() {
            Err(HandlerError::no_such_channel(chname))
        } else {
            Ok(())
        };
    };
    let chname_display = channel.name.clone();
    let channel_ts = channel.ts;
    let mlock = channel.mlock.clone();

    let is_op = channel
        .members
        .get(source.id())
        .map(|m| m.op)
        .unwrap_or(false);
    let is_service = net
        .find_id(source.id())
        .map(|c| c.umodes.service)
        .unwrap_or(false);
    let has_authority = !source.is_local_user() || is_op || is_service;

    let source_conn = source.conn(net);
    let source_nick = source.nick(net);
    let me_name = net.me_name.clone();

    let mode_str = args.first().copied().unwrap_or("");
    let mut params = args.iter().skip(1).copied();

    let mut dir = Dir::Add;
    let mut changes: Vec<Change> = Vec::new();
    let mut param_changes = 0usize;
    let max_params = if source.is_local_user() {
        MAXMODEPARAMS
    } else {
        MAXMODEPARAMS_SERV
    };
    let mut errors: Vec<(Numeric, Vec<String>)> = Vec::new();
    let mut unknown_seen: Vec<char> = Vec::new();
    let mut opped_denied = false;

    for letter in mode_str.chars() {
        match letter {
            '+' => {
                dir = Dir::Add;
                continue;
            }
            '-' => {
                dir = Dir::Del;
                continue;
            }
            '=' => {
                dir = Dir::Query;
                continue;
            }
            _ => {}
        }

        let Some(kind) = table.get(letter) else {
            if source.is_local_user() && !unknown_seen.contains(&letter) {
                unknown_seen.push(letter);
                errors.push((
                    Numeric::ERR_UNKNOWNMODE,
                    vec![
                        letter.to_string(),
                        format!("is unknown mode char to me for {chname_display}"),
                    ],
                ));
            }
            continue;
        };

        // a bare list mode is a query regardless of direction
        let querying = dir == Dir::Query
            || (matches!(kind, ModeKind::List(_))
                && !kind.takes_param(dir == Dir::Add)
                && peek_no_param(&mut params, kind, dir));

        if querying {
            if let ModeKind::List(list_kind) = kind {
                query_list(
                    net, out, source, &chname_display, list_kind, is_op, &me_name,
                );
            }
            continue;
        }

        // authorization for any actual change
        if !has_authority {
            if source.is_local_user() && !opped_denied {
                opped_denied = true;
                errors.push((
                    Numeric::ERR_CHANOPRIVSNEEDED,
                    vec![
                        chname_display.clone(),
                        "You're not a channel operator".to_string(),
                    ],
                ));
            }
            // consume the parameter the letter would have eaten
            if kind.takes_param(dir == Dir::Add) {
                let _ = params.next();
            }
            continue;
        }

        if source.is_local_user() && mlock_forbids(mlock.as_deref(), letter) {
            errors.push((
                Numeric::ERR_MLOCKRESTRICTED,
                vec![
                    chname_display.clone(),
                    letter.to_string(),
                    mlock.clone().unwrap_or_default(),
                    "MODE cannot be set due to channel having an active MLOCK restriction policy"
                        .to_string(),
                ],
            ));
            if kind.takes_param(dir == Dir::Add) {
                let _ = params.next();
            }
            continue;
        }

        let adding = dir == Dir::Add;
        let needs_param = kind.takes_param(adding) || matches!(kind, ModeKind::List(_));
        if needs_param && param_changes >= max_params {
            break;
        }

        let parsed = parse_one(
            net, extbans, cfg, table, source, &chname_display, kind, letter, adding,
            &mut params, now, &mut errors,
        );
        let Some(change) = parsed else { continue };
        if change.arg_local.is_some() || change.arg_wire.is_some() {
            param_changes += 1;
        }
        changes.push(change);
    }

    // surface accumulated errors to a local source
    if let Some(conn) = source_conn {
        for (num, eargs) in &errors {
            let refs: Vec<&str> = eargs.iter().map(String::as_str).collect();
            out.numeric(conn, &me_name, *num, &source_nick, &refs);
        }
    }

    // second pass: apply, dropping no-ops
    let applied = apply_changes(net, cfg, chname, changes);
    if applied.is_empty() {
        return Ok(());
    }

    emit_changes(
        net,
        out,
        source,
        &chname_display,
        channel_ts,
        &applied,
        source.is_local_user(),
    );
    Ok(())
}

/// True when the next parameter should NOT be consumed for this list mode
/// (i.e. there is none): that makes a bare `+b` a query.
fn peek_no_param<'a, I: Iterator<Item = &'a str> + Clone>(
    params: &mut I,
    kind: ModeKind,
    _dir: Dir,
) -> bool {
    matches!(kind, ModeKind::List(_)) && params.clone().next().is_none()
}

fn query_list(
    net: &Network,
    out: &mut Outbox,
    source: &ModeSource,
    chname: &str,
    kind: ListKind,
    is_op: bool,
    me_name: &str,
) {
    let Some(conn) = source.conn(net) else { return };
    let nick = source.nick(net);
    let Some(channel) = net.get_channel(chname) else {
        return;
    };

    // except/invex lists are op-only views
    if matches!(kind, ListKind::Except | ListKind::Invex) && !is_op {
        out.numeric(
            conn,
            me_name,
            Numeric::ERR_CHANOPRIVSNEEDED,
            &nick,
            &[chname, "You're not a channel operator"],
        );
        return;
    }

    let (item, end, end_text): (Numeric, Numeric, &str) = match kind {
        ListKind::Ban => (
            Numeric::RPL_BANLIST,
            Numeric::RPL_ENDOFBANLIST,
            "End of Channel Ban List",
        ),
        ListKind::Except => (
            Numeric::RPL_EXCEPTLIST,
            Numeric::RPL_ENDOFEXCEPTLIST,
            "End of Channel Exception List",
        ),
        ListKind::Invex => (
            Numeric::RPL_INVEXLIST,
            Numeric::RPL_ENDOFINVEXLIST,
            "End of Channel Invite Exception List",
        ),
        ListKind::Quiet => (
            Numeric::RPL_QUIETLIST,
            Numeric::RPL_ENDOFQUIETLIST,
            "End of Channel Quiet List",
        ),
    };

    for entry in channel.list(kind) {
        let shown = match &entry.forward {
            Some(f) => format!("{}${}", entry.mask, f),
            None => entry.mask.clone(),
        };
        let ts = entry.set_at.to_string();
        if kind == ListKind::Quiet {
            out.numeric(
                conn, me_name, item, &nick,
                &[chname, "q", &shown, &entry.set_by, &ts],
            );
        } else {
            out.numeric(conn, me_name, item, &nick, &[chname, &shown, &entry.set_by, &ts]);
        }
    }
    if kind == ListKind::Quiet {
        out.numeric(conn, me_name, end, &nick, &[chname, "q", end_text]);
    } else {
        out.numeric(conn, me_name, end, &nick, &[chname, end_text]);
    }
}

#[allow(clippy::too_many_arguments)]
fn parse_one<'a, I: Iterator<Item = &'a str>>(
    net: &Network,
    extbans: &ExtbanTable,
    cfg: &ChannelConfig,
    _table: &ModeTable,
    source: &ModeSource,
    chname: &str,
    kind: ModeKind,
    letter: char,
    adding: bool,
    params: &mut I,
    now: i64,
    errors: &mut Vec<(Numeric, Vec<String>)>,
) -> Option<Change> {
    let dir = if adding { Dir::Add } else { Dir::Del };
    match kind {
        ModeKind::Simple { flag, visibility, staff } => {
            if staff
                && source.is_local_user()
                && !net
                    .find_id(source.id())
                    .is_some_and(|c| c.has_priv(|p| p.resv || p.admin))
            {
                errors.push((
                    Numeric::ERR_NOPRIVILEGES,
                    vec!["Permission Denied - You're not an IRC operator".to_string()],
                ));
                return None;
            }
            Some(Change {
                dir,
                letter,
                arg_local: None,
                arg_wire: None,
                visibility,
                op: ChangeOp::Flag(flag, adding),
            })
        }
        ModeKind::Limit => {
            if adding {
                let raw = params.next()?;
                let limit: u32 = raw.parse().ok().filter(|&v| v > 0)?;
                Some(Change {
                    dir,
                    letter,
                    arg_local: Some(limit.to_string()),
                    arg_wire: Some(limit.to_string()),
                    visibility: Visibility::All,
                    op: ChangeOp::SetLimit(Some(limit)),
                })
            } else {
                Some(Change {
                    dir,
                    letter,
                    arg_local: None,
                    arg_wire: None,
                    visibility: Visibility::All,
                    op: ChangeOp::SetLimit(None),
                })
            }
        }
        ModeKind::Key => {
            if adding {
                let raw = params.next()?;
                let key = ferric_proto::valid::clean_key(raw);
                if key.is_empty() {
                    return None;
                }
                Some(Change {
                    dir,
                    letter,
                    arg_local: Some(key.clone()),
                    arg_wire: Some(key.clone()),
                    visibility: Visibility::All,
                    op: ChangeOp::SetKey(Some(key)),
                })
            } else {
                // `-k key` consumes its parameter but always renders `*`
                let _ = params.next();
                Some(Change {
                    dir,
                    letter,
                    arg_local: Some("*".to_string()),
                    arg_wire: Some("*".to_string()),
                    visibility: Visibility::All,
                    op: ChangeOp::SetKey(None),
                })
            }
        }
        ModeKind::Throttle => {
            if adding {
                let raw = params.next()?;
                let (joins, seconds) = raw.split_once(':')?;
                let joins: u32 = joins.parse().ok().filter(|&v| v > 0)?;
                let seconds: i64 = seconds.parse().ok().filter(|&v| v > 0)?;
                Some(Change {
                    dir,
                    letter,
                    arg_local: Some(format!("{joins}:{seconds}")),
                    arg_wire: Some(format!("{joins}:{seconds}")),
                    visibility: Visibility::All,
                    op: ChangeOp::SetThrottle(Some((joins, seconds))),
                })
            } else {
                Some(Change {
                    dir,
                    letter,
                    arg_local: None,
                    arg_wire: None,
                    visibility: Visibility::All,
                    op: ChangeOp::SetThrottle(None),
                })
            }
        }
        ModeKind::Forward => {
            if adding {
                let target = params.next()?;
                if !valid_channel_name(target) {
                    return None;
                }
                if source.is_local_user() {
                    if !cfg.use_forward {
                        return None;
                    }
                    match net.get_channel(target) {
                        None => {
                            errors.push((
                                Numeric::ERR_NOSUCHCHANNEL,
                                vec![target.to_string(), "No such channel".to_string()],
                            ));
                            return None;
                        }
                        Some(tch) => {
                            let opped_there = tch
                                .members
                                .get(source.id())
                                .map(|m| m.op)
                                .unwrap_or(false);
                            if !tch.modes.free_forward && !opped_there {
                                errors.push((
                                    Numeric::ERR_CHANOPRIVSNEEDED,
                                    vec![
                                        tch.name.clone(),
                                        "You're not a channel operator".to_string(),
                                    ],
                                ));
                                return None;
                            }
                        }
                    }
                }
                Some(Change {
                    dir,
                    letter,
                    arg_local: Some(target.to_string()),
                    arg_wire: Some(target.to_string()),
                    visibility: Visibility::All,
                    op: ChangeOp::SetForward(Some(target.to_string())),
                })
            } else {
                Some(Change {
                    dir,
                    letter,
                    arg_local: None,
                    arg_wire: None,
                    visibility: Visibility::All,
                    op: ChangeOp::SetForward(None),
                })
            }
        }
        ModeKind::Op | ModeKind::Voice => {
            let target = params.next()?;
            let Some(client) = net.resolve(target) else {
                if source.is_local_user() {
                    errors.push((
                        Numeric::ERR_NOSUCHNICK,
                        vec![target.to_string(), "No such nick/channel".to_string()],
                    ));
                }
                return None;
            };
            let uid = client.id.clone();
            let nick = client.name.clone();
            let is_member = net
                .get_channel(chname)
                .map(|ch| ch.members.contains_key(&uid))
                .unwrap_or(false);
            if !is_member {
                if source.is_local_user() {
                    errors.push((
                        Numeric::ERR_USERNOTINCHANNEL,
                        vec![
                            nick.clone(),
                            chname.to_string(),
                            "They aren't on that channel".to_string(),
                        ],
                    ));
                }
                return None;
            }
            let op = if kind == ModeKind::Op {
                ChangeOp::MemberOp { uid: uid.clone(), value: adding }
            } else {
                ChangeOp::MemberVoice { uid: uid.clone(), value: adding }
            };
            Some(Change {
                dir,
                letter,
                arg_local: Some(nick),
                arg_wire: Some(uid),
                visibility: Visibility::All,
                op,
            })
        }
        ModeKind::List(list_kind) => {
            let raw = params.next()?;
            let pm = pretty_mask(raw, list_kind, cfg.use_forward)?;
            if pm.mask.starts_with('$') && source.is_local_user() {
                let valid = net
                    .get_channel(chname)
                    .map(|ch| extbans.valid_for_set(net, ch, &pm.mask))
                    .unwrap_or(false);
                if !valid {
                    return None;
                }
            }
            if adding {
                let cap = net
                    .get_channel(chname)
                    .map(|ch| {
                        if ch.modes.large_banlist {
                            cfg.max_bans_large
                        } else {
                            cfg.max_bans
                        }
                    })
                    .unwrap_or(cfg.max_bans);
                let (full, dup) = net
                    .get_channel(chname)
                    .map(|ch| {
                        (
                            ch.list_total() >= cap,
                            ch.list(list_kind)
                                .iter()
                                .any(|e| same_mask(&e.mask, &pm.mask)),
                        )
                    })
                    .unwrap_or((false, false));
                if dup {
                    return None;
                }
                if full && source.is_local_user() {
                    errors.push((
                        Numeric::ERR_BANLISTFULL,
                        vec![
                            chname.to_string(),
                            pm.mask.clone(),
                            "Channel ban list is full".to_string(),
                        ],
                    ));
                    return None;
                }
                let set_by = source
                    .prefixes(net)
                    .0;
                let shown = match &pm.forward {
                    Some(f) => format!("{}${}", pm.mask, f),
                    None => pm.mask.clone(),
                };
                Some(Change {
                    dir,
                    letter,
                    arg_local: Some(shown.clone()),
                    arg_wire: Some(shown),
                    visibility: Visibility::All,
                    op: ChangeOp::ListAdd {
                        kind: list_kind,
                        entry: ListEntry {
                            mask: pm.mask,
                            set_by,
                            set_at: now,
                            forward: pm.forward,
                        },
                    },
                })
            } else {
                // deletion matches on the mask half, forward suffix and all
                let shown = match &pm.forward {
                    Some(f) => format!("{}${}", pm.mask, f),
                    None => pm.mask.clone(),
                };
                Some(Change {
                    dir,
                    letter,
                    arg_local: Some(shown.clone()),
                    arg_wire: Some(shown),
                    visibility: Visibility::All,
                    op: ChangeOp::ListDel {
                        kind: list_kind,
                        mask: pm.mask,
                    },
                })
            }
        }
    }
}

/// Apply validated changes, returning only those that really changed state.
fn apply_changes(
    net: &mut Network,
    _cfg: &ChannelConfig,
    chname: &str,
    changes: Vec<Change>,
) -> Vec<Change> {
    let Some(channel) = net.get_channel_mut(chname) else {
        return Vec::new();
    };
    let mut applied = Vec::new();

    for change in changes {
        let effective = match &change.op {
            ChangeOp::Flag(flag, value) => {
                if flag.get(&channel.modes) == *value {
                    false
                } else {
                    flag.set(&mut channel.modes, *value);
                    true
                }
            }
            ChangeOp::SetLimit(limit) => {
                if channel.modes.limit == *limit {
                    false
                } else {
                    channel.modes.limit = *limit;
                    true
                }
            }
            ChangeOp::SetKey(key) => {
                // key changes always emit, per the +k/-k batching rule
                channel.modes.key = key.clone();
                true
            }
            ChangeOp::SetThrottle(throttle) => {
                let changed = channel.modes.throttle != *throttle;
                channel.modes.throttle = *throttle;
                if throttle.is_none() {
                    channel.join_count = 0;
                    channel.join_delta_start = 0;
                }
                changed
            }
            ChangeOp::SetForward(forward) => {
                if channel.modes.forward == *forward {
                    false
                } else {
                    channel.modes.forward = forward.clone();
                    true
                }
            }
            ChangeOp::MemberOp { uid, value } => match channel.members.get_mut(uid) {
                Some(member) if member.op != *value => {
                    member.op = *value;
                    member.invalidate();
                    channel.bump_bants();
                    true
                }
                _ => false,
            },
            ChangeOp::MemberVoice { uid, value } => match channel.members.get_mut(uid) {
                Some(member) if member.voice != *value => {
                    member.voice = *value;
                    member.invalidate();
                    channel.bump_bants();
                    true
                }
                _ => false,
            },
            ChangeOp::ListAdd { kind, entry } => {
                channel.list_mut(*kind).push(entry.clone());
                channel.bump_bants();
                true
            }
            ChangeOp::ListDel { kind, mask } => {
                let list = channel.list_mut(*kind);
                let before = list.len();
                list.retain(|e| !same_mask(&e.mask, mask));
                if list.len() != before {
                    channel.bump_bants();
                    true
                } else {
                    false
                }
            }
        };
        if effective {
            applied.push(change);
        }
    }
    applied
}

/// Emit batched MODE to local members and TMODE to peers.
fn emit_changes(
    net: &Network,
    out: &mut Outbox,
    source: &ModeSource,
    chname: &str,
    channel_ts: i64,
    changes: &[Change],
    _from_local: bool,
) {
    let (local_prefix, wire_prefix) = source.prefixes(net);

    for ops_only in [false, true] {
        let subset: Vec<&Change> = changes
            .iter()
            .filter(|c| (c.visibility == Visibility::OpsOnly) == ops_only)
            .collect();
        if subset.is_empty() {
            continue;
        }

        for chunk in build_chunks(&subset, MAXMODEPARAMS) {
            let mut args: Vec<&str> = vec![chname, &chunk.modes];
            args.extend(chunk.local_args.iter().map(String::as_str));
            let line = format_line(Some(&local_prefix), "MODE", &args);
            crate::route::sendto_channel_local(net, out, chname, None, ops_only, &line);
        }

        // wire side can pack more parameters per line
        for chunk in build_chunks(&subset, MAXMODEPARAMS_SERV) {
            let ts = channel_ts.to_string();
            let mut args: Vec<&str> = vec![&ts, chname, &chunk.modes];
            args.extend(chunk.wire_args.iter().map(String::as_str));
            let line = format_line(Some(&wire_prefix), "TMODE", &args);
            sendto_server(net, out, source_link(net, source), ferric_proto::Capab::none(),
                ferric_proto::Capab::none(), &line);
        }
    }
}

/// The link a change arrived on, which must not have it echoed back.
fn source_link(net: &Network, source: &ModeSource) -> Option<ConnId> {
    match source {
        ModeSource::LocalUser { .. } => None,
        ModeSource::RemoteUser { uid } => net.find_id(uid).and_then(|c| c.from_conn),
        ModeSource::Server { id } => net.find_id(id).and_then(|c| c.from_conn),
    }
}

struct Chunk {
    modes: String,
    local_args: Vec<String>,
    wire_args: Vec<String>,
}

fn build_chunks(changes: &[&Change], max_params: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut modes = String::new();
    let mut local_args = Vec::new();
    let mut wire_args = Vec::new();
    let mut dir: Option<Dir> = None;
    let mut params = 0usize;

    for change in changes {
        if params >= max_params && change.arg_local.is_some() {
            chunks.push(Chunk {
                modes: std::mem::take(&mut modes),
                local_args: std::mem::take(&mut local_args),
                wire_args: std::mem::take(&mut wire_args),
            });
            dir = None;
            params = 0;
        }
        if dir != Some(change.dir) {
            modes.push(if change.dir == Dir::Add { '+' } else { '-' });
            dir = Some(change.dir);
        }
        modes.push(change.letter);
        if let Some(arg) = &change.arg_local {
            local_args.push(arg.clone());
            params += 1;
        }
        if let Some(arg) = &change.arg_wire {
            wire_args.push(arg.clone());
        }
    }
    if !modes.is_empty() {
        chunks.push(Chunk {
            modes,
            local_args,
            wire_args,
        });
    }
    chunks
}

/// Strip every mode from a channel, returning the `-...` diff that makes
/// local clients observe the wipe. Used when a lower-TS SJOIN takes over.
pub fn strip_all_modes(net: &mut Network, chname: &str) -> Option<String> {
    let channel = net.get_channel_mut(chname)?;
    let mut removed = String::new();
    let mut args: Vec<String> = Vec::new();

    for (on, letter) in [
        (channel.modes.invite_only, 'i'),
        (channel.modes.moderated, 'm'),
        (channel.modes.no_external, 'n'),
        (channel.modes.private, 'p'),
        (channel.modes.secret, 's'),
        (channel.modes.topic_limit, 't'),
        (channel.modes.no_colour, 'c'),
        (channel.modes.no_ctcp, 'C'),
        (channel.modes.reg_only, 'r'),
        (channel.modes.op_moderate, 'z'),
        (channel.modes.no_forward_to, 'Q'),
        (channel.modes.free_forward, 'F'),
        (channel.modes.large_banlist, 'L'),
        (channel.modes.permanent, 'P'),
    ] {
        if on {
            removed.push(letter);
        }
    }
    if channel.modes.limit.is_some() {
        removed.push('l');
    }
    if channel.modes.key.is_some() {
        removed.push('k');
        args.push("*".to_string());
    }
    if channel.modes.throttle.is_some() {
        removed.push('j');
    }
    if channel.modes.forward.is_some() {
        removed.push('f');
    }

    channel.modes = Default::default();
    channel.mlock = None;
    channel.bans.clear();
    channel.excepts.clear();
    channel.invex.clear();
    channel.quiets.clear();
    channel.bump_bants();

    if removed.is_empty() {
        None
    } else if args.is_empty() {
        Some(format!("-{removed}"))
    } else {
        Some(format!("-{removed} {}", args.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Client, LocalClient, Membership, Status};

    fn fixture() -> (Network, Outbox, ExtbanTable, ModeTable, ChannelConfig, String) {
        let mut net = Network::new("42X", "irc.example.net", "t", 1_700_000_000);
        let uid = net.uid_gen.next_uid();
        net.add_user(Client {
            status: Status::Client,
            name: "op".into(),
            id: uid.clone(),
            username: "u".into(),
            host: "h".into(),
            orig_host: "h".into(),
            sockhost: "::1".into(),
            info: String::new(),
            umodes: Default::default(),
            flags: Default::default(),
            ts: 1,
            hopcount: 0,
            servptr: Some("42X".into()),
            from_conn: Some(ConnId(1)),
            away: None,
            account: None,
            certfp: None,
            channels: ["#c".to_string()].into_iter().collect(),
            local: Some(LocalClient { conn: Some(ConnId(1)), ..Default::default() }),
        });
        let channel = net.create_channel("#c", 1000);
        channel
            .members
            .insert(uid.clone(), Membership { op: true, ..Default::default() });
        channel.local_members.insert(uid.clone());
        (
            net,
            Outbox::new(),
            ExtbanTable::default(),
            ModeTable::default(),
            ChannelConfig::default(),
            uid,
        )
    }

    fn run(
        net: &mut Network,
        out: &mut Outbox,
        extbans: &ExtbanTable,
        table: &ModeTable,
        cfg: &ChannelConfig,
        uid: &str,
        args: &[&str],
    ) {
        let source = ModeSource::LocalUser { uid: uid.to_string() };
        channel_mode(net, out, extbans, table, cfg, &source, "#c", args, 2000).unwrap();
    }

    #[test]
    fn test_simple_toggle_and_noop() {
        let (mut net, mut out, eb, t, cfg, uid) = fixture();
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+nt"]);
        assert!(net.get_channel("#c").unwrap().modes.no_external);
        assert!(net.get_channel("#c").unwrap().modes.topic_limit);
        let line = &out.lines[0].1;
        assert!(line.contains("MODE #c :+nt"), "line: {line}");

        // setting again is a no-op: nothing further emitted
        let before = out.lines.len();
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+n"]);
        assert_eq!(out.lines.len(), before);
    }

    #[test]
    fn test_op_voice_round_trip() {
        let (mut net, mut out, eb, t, cfg, uid) = fixture();
        let before = net.get_channel("#c").unwrap().members[&uid].clone();
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+v", "op"]);
        assert!(net.get_channel("#c").unwrap().members[&uid].voice);
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["-v", "op"]);
        let after = net.get_channel("#c").unwrap().members[&uid].clone();
        assert_eq!(before.op, after.op);
        assert_eq!(before.voice, after.voice);
    }

    #[test]
    fn test_key_set_then_unset_same_batch_emits_both() {
        let (mut net, mut out, eb, t, cfg, uid) = fixture();
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+k-k", "sesame", "sesame"]);
        let mode_lines: Vec<&String> = out
            .lines
            .iter()
            .map(|(_, l)| l)
            .filter(|l| l.contains(" MODE "))
            .collect();
        assert_eq!(mode_lines.len(), 1);
        assert!(mode_lines[0].contains("+k-k"), "line: {}", mode_lines[0]);
        assert!(mode_lines[0].contains("sesame"));
        assert!(mode_lines[0].contains('*'));
        assert!(net.get_channel("#c").unwrap().modes.key.is_none());
    }

    #[test]
    fn test_ban_add_canonicalizes_and_dedupes() {
        let (mut net, mut out, eb, t, cfg, uid) = fixture();
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+b", "troll"]);
        let channel = net.get_channel("#c").unwrap();
        assert_eq!(channel.bans[0].mask, "troll!*@*");
        let bants = channel.bants;

        // duplicate is dropped without state or version change
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+b", "troll!*@*"]);
        let channel = net.get_channel("#c").unwrap();
        assert_eq!(channel.bans.len(), 1);
        assert_eq!(channel.bants, bants);
    }

    #[test]
    fn test_ban_with_forward() {
        let (mut net, mut out, eb, t, cfg, uid) = fixture();
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+b", "$~a$#lobby"]);
        let channel = net.get_channel("#c").unwrap();
        assert_eq!(channel.bans[0].mask, "$~a");
        assert_eq!(channel.bans[0].forward.as_deref(), Some("#lobby"));
    }

    #[test]
    fn test_non_op_denied_once() {
        let (mut net, mut out, eb, t, cfg, uid) = fixture();
        net.get_channel_mut("#c").unwrap().members.get_mut(&uid).unwrap().op = false;
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+nt"]);
        let denials: Vec<_> = out
            .lines
            .iter()
            .filter(|(_, l)| l.contains(" 482 "))
            .collect();
        assert_eq!(denials.len(), 1);
        assert!(!net.get_channel("#c").unwrap().modes.no_external);
    }

    #[test]
    fn test_mlock_blocks_local() {
        let (mut net, mut out, eb, t, cfg, uid) = fixture();
        net.get_channel_mut("#c").unwrap().mlock = Some("n".into());
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+n"]);
        assert!(!net.get_channel("#c").unwrap().modes.no_external);
        assert!(out.lines.iter().any(|(_, l)| l.contains(" 742 ")));

        // a server source sails through the lock
        let source = ModeSource::Server { id: "42X".into() };
        channel_mode(&mut net, &mut out, &eb, &t, &cfg, &source, "#c", &["+n"], 2000).unwrap();
        assert!(net.get_channel("#c").unwrap().modes.no_external);
    }

    #[test]
    fn test_unknown_mode_single_error() {
        let (mut net, mut out, eb, t, cfg, uid) = fixture();
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+XX"]);
        let unknown: Vec<_> = out
            .lines
            .iter()
            .filter(|(_, l)| l.contains(" 472 "))
            .collect();
        assert_eq!(unknown.len(), 1);
    }

    #[test]
    fn test_throttle_clear_resets_counter() {
        let (mut net, mut out, eb, t, cfg, uid) = fixture();
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["+j", "3:10"]);
        {
            let channel = net.get_channel_mut("#c").unwrap();
            assert_eq!(channel.modes.throttle, Some((3, 10)));
            channel.join_count = 2;
        }
        run(&mut net, &mut out, &eb, &t, &cfg, &uid, &["-j"]);
        let channel = net.get_channel("#c").unwrap();
        assert!(channel.modes.throttle.is_none());
        assert_eq!(channel.join_count, 0);
    }

    #[test]
    fn test_strip_all_modes_diff() {
        let (mut net, _out, _eb, _t, _cfg, _uid) = fixture();
        {
            let channel = net.get_channel_mut("#c").unwrap();
            channel.modes.no_external = true;
            channel.modes.topic_limit = true;
            channel.modes.key = Some("sesame".into());
            channel.bans.push(ListEntry {
                mask: "a!*@*".into(),
                set_by: "x".into(),
                set_at: 0,
                forward: None,
            });
            channel.mlock = Some("nt".into());
        }
        let diff = strip_all_modes(&mut net, "#c").unwrap();
        assert_eq!(diff, "-ntk *");
        let channel = net.get_channel("#c").unwrap();
        assert_eq!(channel.modes, Default::default());
        assert!(channel.bans.is_empty());
        assert!(channel.mlock.is_none());
    }

    #[test]
    fn test_param_budget_enforced_for_clients() {
        let (mut net, mut out, eb, t, cfg, uid) = fixture();
        // five voice targets; only four may apply
        for nick in ["a", "b", "c", "d", "e"] {
            let vuid = net.uid_gen.next_uid();
            net.add_user(Client {
                status: Status::Client,
                name: nick.into(),
                id: vuid.clone(),
                username: "u".into(),
                host: "h".into(),
                orig_host: "h".into(),
                sockhost: "::1".into(),
                info: String::new(),
                umodes: Default::default(),
                flags: Default::default(),
                ts: 1,
                hopcount: 0,
                servptr: Some("42X".into()),
                from_conn: None,
                away: None,
                account: None,
                certfp: None,
                channels: ["#c".to_string()].into_iter().collect(),
                local: None,
            });
            net.get_channel_mut("#c")
                .unwrap()
                .members
                .insert(vuid, Membership::default());
        }
        run(
            &mut net, &mut out, &eb, &t, &cfg, &uid,
            &["+vvvvv", "a", "b", "c", "d", "e"],
        );
        let channel = net.get_channel("#c").unwrap();
        let voiced = channel.members.values().filter(|m| m.voice).count();
        assert_eq!(voiced, 4);
    }
}
