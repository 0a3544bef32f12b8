//! PRIVMSG/NOTICE delivery: target parsing, channel and user delivery
//! rules, target-change enforcement, caller-id, and recipient flood
//! accounting.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use ferric_proto::{Capab, Numeric, irc_to_lower, line::format_line, strip_colour,
    valid_channel_name};

use crate::chmode::{CanSend, can_send};
use crate::dispatch::{Ctx, Request, Source};
use crate::error::{HandlerError, HandlerResult};
use crate::route::{sendto_channel_local, sendto_match_local, sendto_realops, sendto_server};

pub fn m_privmsg(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    m_message(ctx, req, false)
}

pub fn m_notice(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    m_message(ctx, req, true)
}

fn m_message(ctx: &mut Ctx<'_>, req: &Request<'_>, notice: bool) -> HandlerResult {
    let command = if notice { "NOTICE" } else { "PRIVMSG" };
    let targets = req.arg(0).unwrap_or("");
    let text = req.arg(1).unwrap_or("");

    if text.is_empty() && !notice {
        return Err(HandlerError::Numeric(
            Numeric::ERR_NOTEXTTOSEND,
            vec!["No text to send".to_string()],
        ));
    }

    // the grace window ends at the first message beyond oneself
    if let Source::User(uid) = &req.source {
        let uid = uid.clone();
        let to_self = ctx
            .net
            .find_id(&uid)
            .map(|c| ferric_proto::irc_eq(&c.name, targets))
            .unwrap_or(false);
        if !to_self {
            crate::flood::flood_done(ctx.net, &uid);
        }
    }

    let max_targets = ctx.cfg.channel.max_targets;
    for (i, target) in targets.split(',').enumerate() {
        if i >= max_targets {
            if !notice {
                if let Some(uid) = req.source.user_uid().map(str::to_string) {
                    ctx.reply(
                        &uid,
                        Numeric::ERR_TOOMANYTARGETS,
                        &[target, "Too many targets"],
                    );
                }
            }
            break;
        }
        deliver_one(ctx, req, command, target, text, notice)?;
    }
    Ok(())
}

fn deliver_one(
    ctx: &mut Ctx<'_>,
    req: &Request<'_>,
    command: &str,
    target: &str,
    text: &str,
    notice: bool,
) -> HandlerResult {
    // prefix-filtered and op-moderated channel targets
    let (min_status, opmod, chname) = match target.chars().next() {
        Some('@') if valid_channel_name(&target[1..]) => (Some('o'), false, &target[1..]),
        Some('+') if valid_channel_name(&target[1..]) => (Some('v'), false, &target[1..]),
        Some('=') if valid_channel_name(&target[1..]) => (None, true, &target[1..]),
        _ => (None, false, target),
    };

    if valid_channel_name(chname) {
        return deliver_channel(ctx, req, command, chname, text, notice, min_status, opmod);
    }

    // oper mass targets
    if let Some(mask) = target.strip_prefix("$$") {
        return deliver_mass(ctx, req, command, mask, false, text, notice);
    }
    if let Some(mask) = target.strip_prefix("$#") {
        return deliver_mass(ctx, req, command, mask, true, text, notice);
    }

    // user@server
    if let Some((nick, server)) = target.split_once('@') {
        let found = ctx
            .net
            .find_name(nick)
            .filter(|c| c.is_user())
            .filter(|c| {
                c.servptr
                    .as_ref()
                    .and_then(|sid| ctx.net.find_id(sid))
                    .map(|s| s.name.eq_ignore_ascii_case(server))
                    .unwrap_or(false)
            })
            .map(|c| c.id.clone());
        return match found {
            Some(uid) => deliver_user(ctx, req, command, &uid, text, notice, true),
            None if !notice => Err(HandlerError::no_such_nick(target)),
            None => Ok(()),
        };
    }

    match ctx.net.resolve(target).filter(|c| c.is_user()).map(|c| c.id.clone()) {
        Some(uid) => deliver_user(ctx, req, command, &uid, text, notice, false),
        None if !notice => Err(HandlerError::no_such_nick(target)),
        None => Ok(()),
    }
}

#[allow(clippy::too_many_arguments)]
fn deliver_channel(
    ctx: &mut Ctx<'_>,
    req: &Request<'_>,
    command: &str,
    chname: &str,
    text: &str,
    notice: bool,
    min_status: Option<char>,
    opmod: bool,
) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        // server-sourced notices go out unchecked
        if let Source::Server(sid) = &req.source {
            let name = ctx
                .net
                .find_id(sid)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| sid.clone());
            let line = format_line(Some(&name), command, &[chname, text]);
            sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);
            let wire = format_line(Some(sid), command, &[chname, text]);
            sendto_server(ctx.net, ctx.out, Some(req.conn), Capab::none(), Capab::none(), &wire);
        }
        return Ok(());
    };

    let is_local = ctx.net.find_id(&uid).map(|c| c.is_local()).unwrap_or(false);
    let Some(channel) = ctx.net.get_channel(chname) else {
        return if notice || !is_local {
            Ok(())
        } else {
            Err(HandlerError::no_such_nick(chname))
        };
    };
    let display = channel.name.clone();

    // local policy; the network is authoritative for remote sources
    let mut deliver_ops_only = opmod;
    if is_local {
        let is_member = channel.members.contains_key(&uid);
        let has_status = channel
            .members
            .get(&uid)
            .map(|m| m.op || m.voice)
            .unwrap_or(false);

        if opmod && !channel.members.get(&uid).map(|m| m.op).unwrap_or(false) {
            return Err(HandlerError::chanop_needed(chname));
        }

        let is_oper = ctx.net.find_id(&uid).map(|c| c.is_oper()).unwrap_or(false);
        if !is_member && !is_oper && !add_target(ctx, &uid, chname) {
            return Err(target_change_err(chname));
        }

        if !opmod {
            // members go through the bants-versioned membership cache;
            // outsiders are evaluated directly
            let verdict = if is_member && !has_status {
                let (banned, quieted) =
                    crate::chmode::check_banned_cached(ctx.net, ctx.extbans, &ctx.cfg.channel, chname, &uid);
                let moderated = ctx
                    .net
                    .get_channel(chname)
                    .map(|c| c.modes.moderated)
                    .unwrap_or(false);
                let op_moderate = ctx
                    .net
                    .get_channel(chname)
                    .map(|c| c.modes.op_moderate)
                    .unwrap_or(false);
                if moderated || banned || quieted {
                    if op_moderate {
                        CanSend::OpModerated
                    } else {
                        CanSend::No
                    }
                } else {
                    CanSend::Ok
                }
            } else {
                let client = ctx.net.find_id(&uid).unwrap();
                let channel = ctx.net.get_channel(chname).unwrap();
                can_send(ctx.net, ctx.extbans, &ctx.cfg.channel, channel, client)
            };
            match verdict {
                CanSend::Ok => {}
                CanSend::OpModerated => deliver_ops_only = true,
                CanSend::No => {
                    return if notice {
                        Ok(())
                    } else {
                        Err(HandlerError::Numeric(
                            Numeric::ERR_CANNOTSENDTOCHAN,
                            vec![display, "Cannot send to channel".to_string()],
                        ))
                    };
                }
            }
        }
    }

    // +C blocks CTCP except ACTION
    let is_ctcp = text.starts_with('\u{1}');
    let is_action = text.starts_with("\u{1}ACTION ");
    let (no_ctcp, no_colour) = ctx
        .net
        .get_channel(chname)
        .map(|c| (c.modes.no_ctcp, c.modes.no_colour))
        .unwrap_or((false, false));
    if no_ctcp && is_ctcp && !is_action {
        return if notice || !is_local {
            Ok(())
        } else {
            Err(HandlerError::Numeric(
                Numeric::ERR_CANNOTSENDTOCHAN,
                vec![display, "Cannot send to channel".to_string()],
            ))
        };
    }
    let body = if no_colour {
        strip_colour(text)
    } else {
        text.to_string()
    };

    // recipient flood accounting
    if channel_flooded(ctx, chname) {
        let mask = ctx.net.find_id(&uid).map(|c| c.mask()).unwrap_or_default();
        sendto_realops(
            ctx.net,
            ctx.out,
            'b',
            &format!("Possible flooder {mask} target: {display}"),
        );
    }

    let sender_mask = ctx
        .net
        .find_id(&uid)
        .map(|c| c.mask())
        .unwrap_or_else(|| uid.clone());

    let wire_target = match (min_status, deliver_ops_only) {
        (Some('o'), _) => format!("@{display}"),
        (Some('v'), _) => format!("+{display}"),
        (_, true) if opmod => format!("={display}"),
        _ => display.clone(),
    };

    // local fanout
    let local_line = format_line(Some(&sender_mask), command, &[&wire_target, &body]);
    let ops_only = deliver_ops_only || min_status == Some('o');
    if min_status == Some('v') {
        // voice-or-better filter
        let recipients: Vec<String> = ctx
            .net
            .get_channel(chname)
            .map(|c| {
                c.local_members
                    .iter()
                    .filter(|m| {
                        c.members
                            .get(*m)
                            .map(|mm| mm.op || mm.voice)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for member in recipients {
            if member == uid {
                continue;
            }
            let deaf = ctx
                .net
                .find_id(&member)
                .map(|c| c.umodes.deaf)
                .unwrap_or(false);
            if deaf {
                continue;
            }
            if let Some(conn) = crate::route::client_route(ctx.net, &member) {
                ctx.out.send_raw(conn, local_line.clone());
            }
        }
    } else {
        // deaf users drop channel traffic
        let recipients: Vec<String> = ctx
            .net
            .get_channel(chname)
            .map(|c| c.local_members.iter().cloned().collect())
            .unwrap_or_default();
        for member in recipients {
            if member == uid {
                continue;
            }
            if ops_only
                && !ctx
                    .net
                    .get_channel(chname)
                    .and_then(|c| c.members.get(&member))
                    .map(|m| m.op)
                    .unwrap_or(false)
            {
                continue;
            }
            let deaf = ctx
                .net
                .find_id(&member)
                .map(|c| c.umodes.deaf)
                .unwrap_or(false);
            if deaf {
                continue;
            }
            if let Some(conn) = crate::route::client_route(ctx.net, &member) {
                ctx.out.send_raw(conn, local_line.clone());
            }
        }
    }

    // wire fanout
    let skip = if is_local { None } else { Some(req.conn) };
    let wire = format_line(Some(&uid), command, &[&wire_target, &body]);
    sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::none(), &wire);
    Ok(())
}

fn deliver_user(
    ctx: &mut Ctx<'_>,
    req: &Request<'_>,
    command: &str,
    target_uid: &str,
    text: &str,
    notice: bool,
    _via_server_form: bool,
) -> HandlerResult {
    let sender_uid = req.source.user_uid().map(str::to_string);
    let sender_is_local = sender_uid
        .as_deref()
        .and_then(|u| ctx.net.find_id(u))
        .map(|c| c.is_local())
        .unwrap_or(false);

    if let Some(uid) = &sender_uid {
        if sender_is_local && uid != target_uid {
            // target-change applies unless oper or shared channel
            let shares = shares_channel(ctx, uid, target_uid);
            let is_oper = ctx.net.find_id(uid).map(|c| c.is_oper()).unwrap_or(false);
            let target_nick = ctx
                .net
                .find_id(target_uid)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            if !is_oper && !shares && !add_target(ctx, uid, &target_nick) {
                return Err(target_change_err(&target_nick));
            }
        }
    }

    let (target_local, target_conn, target_nick, callerid, regonly, target_account_needed_ok) = {
        let Some(target) = ctx.net.find_id(target_uid) else {
            return Ok(());
        };
        let sender_has_account = sender_uid
            .as_deref()
            .and_then(|u| ctx.net.find_id(u))
            .map(|c| c.account.is_some())
            .unwrap_or(true);
        (
            target.is_local(),
            target.from_conn,
            target.name.clone(),
            target.umodes.callerid,
            target.umodes.regonly_msg,
            sender_has_account,
        )
    };

    if let Some(uid) = &sender_uid {
        let sender_is_oper = ctx.net.find_id(uid).map(|c| c.is_oper()).unwrap_or(false);
        let sender_is_service = ctx
            .net
            .find_id(uid)
            .map(|c| c.umodes.service)
            .unwrap_or(false);

        if target_local && regonly && !target_account_needed_ok && !sender_is_oper {
            return if notice {
                Ok(())
            } else {
                Err(HandlerError::Numeric(
                    Numeric::ERR_NONONREG,
                    vec![
                        target_nick.clone(),
                        "You must identify to a registered nick to message this user"
                            .to_string(),
                    ],
                ))
            };
        }

        if target_local && callerid && !sender_is_oper && !sender_is_service {
            let accepted = ctx
                .net
                .find_id(target_uid)
                .and_then(|c| c.local.as_ref())
                .map(|l| l.accept.contains(uid.as_str()))
                .unwrap_or(false);
            if !accepted {
                // throttled knock on the door
                let notify_due = ctx
                    .net
                    .find_id_mut(uid)
                    .and_then(|c| c.local.as_mut())
                    .map(|l| {
                        let due = ctx.now - l.last_caller_id_time
                            >= ctx.cfg.general.caller_id_wait;
                        if due {
                            l.last_caller_id_time = ctx.now;
                        }
                        due
                    })
                    .unwrap_or(false);
                if notify_due && target_local {
                    if let Some(conn) = target_conn {
                        let me = ctx.net.me_name.clone();
                        let sender_mask = ctx
                            .net
                            .find_id(uid)
                            .map(|c| c.mask())
                            .unwrap_or_default();
                        ctx.out.numeric(
                            conn,
                            &me,
                            Numeric::RPL_UMODEGMSG,
                            &target_nick,
                            &[&sender_mask, "is messaging you, and you have umode +g"],
                        );
                    }
                }
                return if notice {
                    Ok(())
                } else {
                    Err(HandlerError::Numeric(
                        Numeric::RPL_TARGUMODEG,
                        vec![
                            target_nick.clone(),
                            "is in +g mode (server-side ignore)".to_string(),
                        ],
                    ))
                };
            }
        }

        // away notification rides back on PRIVMSG
        if !notice {
            let away = ctx.net.find_id(target_uid).and_then(|c| c.away.clone());
            if let Some(away) = away {
                ctx.reply(uid, Numeric::RPL_AWAY, &[&target_nick, &away]);
            }
        }
    }

    // recipient flood accounting for local targets
    if target_local {
        user_flood_note(ctx, target_uid);
    }

    let sender_local_prefix = match &req.source {
        Source::User(uid) => ctx
            .net
            .find_id(uid)
            .map(|c| c.mask())
            .unwrap_or_else(|| uid.clone()),
        Source::Server(sid) => ctx
            .net
            .find_id(sid)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| sid.clone()),
        Source::Pending(_) => return Ok(()),
    };
    let sender_wire = req.source.id().unwrap_or(&ctx.net.me).to_string();

    if target_local {
        if let Some(conn) = target_conn {
            ctx.out.send_raw(
                conn,
                format_line(Some(&sender_local_prefix), command, &[&target_nick, text]),
            );
        }
    } else if let Some(route) = target_conn {
        ctx.out.send_raw(
            route,
            format_line(Some(&sender_wire), command, &[target_uid, text]),
        );
    }
    Ok(())
}

fn deliver_mass(
    ctx: &mut Ctx<'_>,
    req: &Request<'_>,
    command: &str,
    mask: &str,
    by_host: bool,
    text: &str,
    notice: bool,
) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let allowed = ctx
        .net
        .find_id(&uid)
        .map(|c| !c.is_local() || c.has_priv(|p| p.mass_notice))
        .unwrap_or(false);
    if !allowed {
        return Err(HandlerError::NoPrivileges);
    }
    let sender_prefix = ctx
        .net
        .find_id(&uid)
        .map(|c| c.mask())
        .unwrap_or_else(|| uid.clone());
    let target = format!("{}{mask}", if by_host { "$#" } else { "$$" });
    let line = format_line(Some(&sender_prefix), command, &[&target, text]);
    sendto_match_local(ctx.net, ctx.out, mask, by_host, &line);

    let skip = if ctx.net.find_id(&uid).map(|c| c.is_local()).unwrap_or(false) {
        None
    } else {
        Some(req.conn)
    };
    let wire = format_line(Some(&uid), command, &[&target, text]);
    sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::none(), &wire);
    let _ = notice;
    Ok(())
}

/// CPRIVMSG <nick> <channel> :<text> - target-change bypass for op/voice.
pub fn m_cprivmsg(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    m_cmessage(ctx, req, false)
}

pub fn m_cnotice(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    m_cmessage(ctx, req, true)
}

fn m_cmessage(ctx: &mut Ctx<'_>, req: &Request<'_>, notice: bool) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let target_name = req.arg(0).unwrap_or("");
    let chname = req.arg(1).unwrap_or("");
    let text = req.arg(2).unwrap_or("");

    let privileged = ctx
        .net
        .get_channel(chname)
        .and_then(|c| c.members.get(&uid))
        .map(|m| m.op || m.voice)
        .unwrap_or(false);
    if !privileged {
        return Err(HandlerError::chanop_needed(chname));
    }
    let Some(target) = ctx.net.resolve(target_name).filter(|c| c.is_user()) else {
        return Err(HandlerError::no_such_nick(target_name));
    };
    let target_uid = target.id.clone();
    let target_in_channel = ctx
        .net
        .get_channel(chname)
        .map(|c| c.members.contains_key(&target_uid))
        .unwrap_or(false);
    if !target_in_channel {
        return Err(HandlerError::Numeric(
            Numeric::ERR_USERNOTINCHANNEL,
            vec![
                target_name.to_string(),
                chname.to_string(),
                "They aren't on that channel".to_string(),
            ],
        ));
    }

    // shared channel established: ordinary delivery, which skips tgchange
    let command = if notice { "NOTICE" } else { "PRIVMSG" };
    deliver_user(ctx, req, command, &target_uid, text, notice, false)
}

/// Alias expansion: `NS text` becomes a PRIVMSG to the configured
/// service. A bare-nick alias requires the target to be a service (+S);
/// a user@server alias is routed without that check.
pub fn deliver_alias(ctx: &mut Ctx<'_>, uid: &str, target: &str, text: &str) {
    let (nick, server) = match target.split_once('@') {
        Some((n, s)) => (n, Some(s)),
        None => (target, None),
    };

    let found = ctx.net.find_name(nick).map(|c| {
        (
            c.id.clone(),
            c.umodes.service,
            c.servptr
                .as_ref()
                .and_then(|sid| ctx.net.find_id(sid))
                .map(|s| s.name.clone()),
        )
    });

    let uid = uid.to_string();
    match found {
        Some((target_uid, is_service, server_name)) => {
            let server_ok = match server {
                None => is_service,
                Some(expected) => server_name
                    .map(|n| n.eq_ignore_ascii_case(expected))
                    .unwrap_or(false),
            };
            if !server_ok {
                ctx.reply(
                    &uid,
                    Numeric::ERR_SERVICESDOWN,
                    &[target, "Service is currently unavailable"],
                );
                return;
            }
            let req = Request {
                conn: crate::state::ConnId(0),
                source: Source::User(uid.clone()),
                command: "PRIVMSG",
                args: &[],
            };
            let _ = deliver_user(ctx, &req, "PRIVMSG", &target_uid, text, false, false);
        }
        None => {
            ctx.reply(
                &uid,
                Numeric::ERR_SERVICESDOWN,
                &[target, "Service is currently unavailable"],
            );
        }
    }
}

fn target_change_err(target: &str) -> HandlerError {
    HandlerError::Numeric(
        Numeric::ERR_TARGCHANGE,
        vec![
            target.to_string(),
            "Targets changing too fast, message dropped".to_string(),
        ],
    )
}

/// Record a message target in the sender's fingerprint ring. One slot
/// replenishes per minute of quiet.
pub fn add_target(ctx: &mut Ctx<'_>, uid: &str, target: &str) -> bool {
    if !ctx.cfg.general.target_change {
        return true;
    }
    let cap = ctx.cfg.general.target_change_max;
    let now = ctx.now;

    let mut hasher = DefaultHasher::new();
    irc_to_lower(target).hash(&mut hasher);
    let fingerprint = hasher.finish();

    let Some(local) = ctx.net.find_id_mut(uid).and_then(|c| c.local.as_mut()) else {
        return true;
    };
    if local.targets.iter().flatten().any(|&t| t == fingerprint) {
        return true;
    }

    // replenish one slot per elapsed minute
    if local.target_last > 0 {
        let freed = ((now - local.target_last) / 60).max(0) as usize;
        if freed > 0 {
            let mut remaining = freed;
            for slot in local.targets.iter_mut() {
                if remaining == 0 {
                    break;
                }
                if slot.is_some() {
                    *slot = None;
                    remaining -= 1;
                }
            }
            local.target_last = now;
        }
    }

    if local.targets.len() < cap {
        local.targets.push(Some(fingerprint));
        if local.target_last == 0 {
            local.target_last = now;
        }
        return true;
    }
    if let Some(slot) = local.targets.iter_mut().find(|s| s.is_none()) {
        *slot = Some(fingerprint);
        return true;
    }
    false
}

fn shares_channel(ctx: &Ctx<'_>, a: &str, b: &str) -> bool {
    let Some(ca) = ctx.net.find_id(a) else {
        return false;
    };
    let Some(cb) = ctx.net.find_id(b) else {
        return false;
    };
    ca.channels.intersection(&cb.channels).next().is_some()
}

/// Decaying per-channel flood counter. True when the threshold has just
/// been crossed (one notice per window).
fn channel_flooded(ctx: &mut Ctx<'_>, chname: &str) -> bool {
    let floodcount = ctx.net.tunables.floodcount;
    let now = ctx.now;
    let Some(channel) = ctx.net.get_channel_mut(chname) else {
        return false;
    };
    if now - channel.first_received_message_time >= 8 {
        channel.first_received_message_time = now;
        channel.received_number_of_privmsgs = 0;
        channel.flood_noticed = false;
    }
    channel.received_number_of_privmsgs += 1;
    if channel.received_number_of_privmsgs > floodcount && !channel.flood_noticed {
        channel.flood_noticed = true;
        return true;
    }
    false
}

/// The same decaying counter for a local user recipient.
fn user_flood_note(ctx: &mut Ctx<'_>, uid: &str) {
    let floodcount = ctx.net.tunables.floodcount;
    let now = ctx.now;
    let (flooded, nick) = {
        let Some(client) = ctx.net.find_id_mut(uid) else {
            return;
        };
        let nick = client.name.clone();
        let Some(local) = client.local.as_mut() else {
            return;
        };
        if now - local.first_received_message_time >= 8 {
            local.first_received_message_time = now;
            local.received_number_of_privmsgs = 0;
            local.flood_noticed = false;
        }
        local.received_number_of_privmsgs += 1;
        let crossed =
            local.received_number_of_privmsgs > floodcount && !local.flood_noticed;
        if crossed {
            local.flood_noticed = true;
        }
        (crossed, nick)
    };
    if flooded {
        sendto_realops(
            ctx.net,
            ctx.out,
            'b',
            &format!("Possible flood target: {nick}"),
        );
    }
}
