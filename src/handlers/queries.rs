//! User state and informational queries.

use ferric_proto::{Capab, Numeric, irc_to_lower, line::format_line, match_mask};

use crate::dispatch::{Ctx, Request};
use crate::error::HandlerResult;
use crate::route::sendto_server;

fn local_requester(ctx: &Ctx<'_>, req: &Request<'_>) -> Option<(String, crate::state::ConnId, String)> {
    let uid = req.source.user_uid()?;
    let client = ctx.net.find_id(uid)?;
    let conn = client.from_conn?;
    Some((uid.to_string(), conn, client.name.clone()))
}

/// AWAY: set or clear, paced for non-opers, propagated to peers.
pub fn m_away(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let is_local = ctx.net.find_id(&uid).map(|c| c.is_local()).unwrap_or(false);
    let message = req.arg(0).filter(|m| !m.is_empty()).map(str::to_string);

    if is_local && message.is_some() {
        // pace AWAY toggling for non-opers
        let is_oper = ctx.net.find_id(&uid).map(|c| c.is_oper()).unwrap_or(false);
        if !is_oper {
            let paced = ctx
                .net
                .find_id_mut(&uid)
                .and_then(|c| c.local.as_mut())
                .map(|l| {
                    if ctx.now - l.last_away_time < ctx.cfg.general.pace_wait {
                        true
                    } else {
                        l.last_away_time = ctx.now;
                        false
                    }
                })
                .unwrap_or(false);
            if paced {
                return Ok(()); // silently dropped, the client can retry
            }
        }
    }

    let changed = ctx
        .net
        .find_id(&uid)
        .map(|c| c.away != message)
        .unwrap_or(false);
    if let Some(client) = ctx.net.find_id_mut(&uid) {
        client.away = message.clone();
    }

    if is_local {
        let num = if message.is_some() {
            (Numeric::RPL_NOWAWAY, "You have been marked as being away")
        } else {
            (Numeric::RPL_UNAWAY, "You are no longer marked as being away")
        };
        ctx.reply(&uid, num.0, &[num.1]);
    }

    if changed {
        let skip = if is_local { None } else { Some(req.conn) };
        let wire = match &message {
            Some(text) => format_line(Some(&uid), "AWAY", &[text]),
            None => format_line(Some(&uid), "AWAY", &[]),
        };
        sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::none(), &wire);
    }
    Ok(())
}

/// WHO <channel|mask>.
pub fn m_who(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((uid, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let mask = req.arg(0).unwrap_or("*");
    let me = ctx.net.me_name.clone();
    let me_name = me.clone();

    let is_oper = ctx.net.find_id(&uid).map(|c| c.is_oper()).unwrap_or(false);
    let operspy = is_oper
        && ctx
            .net
            .find_id(&uid)
            .map(|c| c.has_priv(|p| p.operspy))
            .unwrap_or(false);

    if let Some(channel) = ctx.net.get_channel(mask) {
        let display = channel.name.clone();
        let visible = channel.members.contains_key(&uid) || !channel.modes.secret || operspy;
        if visible {
            let rows: Vec<(String, String, String, String, String, String)> = channel
                .members
                .iter()
                .filter_map(|(member_uid, m)| {
                    let c = ctx.net.find_id(member_uid)?;
                    let server = c
                        .servptr
                        .as_ref()
                        .and_then(|sid| ctx.net.find_id(sid))
                        .map(|s| s.name.clone())
                        .unwrap_or_else(|| me_name.clone());
                    let mut status = String::from(if c.away.is_some() { "G" } else { "H" });
                    if c.is_oper() {
                        status.push('*');
                    }
                    status.push_str(m.prefix());
                    Some((
                        c.username.clone(),
                        c.host.clone(),
                        server,
                        c.name.clone(),
                        status,
                        format!("{} {}", c.hopcount, c.info),
                    ))
                })
                .collect();
            for (user, host, server, mnick, status, hop_gecos) in rows {
                ctx.out.numeric(
                    conn,
                    &me,
                    Numeric::RPL_WHOREPLY,
                    &nick,
                    &[&display, &user, &host, &server, &mnick, &status, &hop_gecos],
                );
            }
        }
    } else {
        // mask form over visible users
        let rows: Vec<(String, String, String, String, String, String)> = ctx
            .net
            .clients()
            .filter(|c| c.is_user())
            .filter(|c| operspy || !c.umodes.invisible || c.id == uid)
            .filter(|c| {
                match_mask(mask, &c.name)
                    || match_mask(mask, &c.host)
                    || match_mask(mask, &c.info)
            })
            .take(250)
            .map(|c| {
                let server = c
                    .servptr
                    .as_ref()
                    .and_then(|sid| ctx.net.find_id(sid))
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| me_name.clone());
                let mut status = String::from(if c.away.is_some() { "G" } else { "H" });
                if c.is_oper() {
                    status.push('*');
                }
                (
                    c.username.clone(),
                    c.host.clone(),
                    server,
                    c.name.clone(),
                    status,
                    format!("{} {}", c.hopcount, c.info),
                )
            })
            .collect();
        for (user, host, server, mnick, status, hop_gecos) in rows {
            ctx.out.numeric(
                conn,
                &me,
                Numeric::RPL_WHOREPLY,
                &nick,
                &["*", &user, &host, &server, &mnick, &status, &hop_gecos],
            );
        }
    }

    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_ENDOFWHO,
        &nick,
        &[mask, "End of /WHO list"],
    );
    Ok(())
}

/// WHOIS <nick>.
pub fn m_whois(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((uid, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let target_name = req.arg(0).unwrap_or("");
    let me = ctx.net.me_name.clone();

    let Some(target) = ctx.net.resolve(target_name).filter(|c| c.is_user()) else {
        ctx.out.numeric(
            conn,
            &me,
            Numeric::ERR_NOSUCHNICK,
            &nick,
            &[target_name, "No such nick/channel"],
        );
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_ENDOFWHOIS,
            &nick,
            &[target_name, "End of /WHOIS list"],
        );
        return Ok(());
    };

    let t_uid = target.id.clone();
    let t_nick = target.name.clone();
    let t_user = target.username.clone();
    let t_host = target.host.clone();
    let t_gecos = target.info.clone();
    let t_away = target.away.clone();
    let t_oper = target.is_oper();
    let t_account = target.account.clone();
    let t_channels: Vec<String> = target.channels.iter().cloned().collect();
    let t_server = target
        .servptr
        .as_ref()
        .and_then(|sid| ctx.net.find_id(sid))
        .map(|s| (s.name.clone(), s.info.clone()))
        .unwrap_or((me.clone(), String::new()));
    let requester_is_oper = ctx.net.find_id(&uid).map(|c| c.is_oper()).unwrap_or(false);

    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_WHOISUSER,
        &nick,
        &[&t_nick, &t_user, &t_host, "*", &t_gecos],
    );

    // channel list, secret ones only for members and opers
    let mut shown = Vec::new();
    for chname in &t_channels {
        if let Some(channel) = ctx.net.get_channel(chname) {
            let visible = !channel.modes.secret
                || channel.members.contains_key(&uid)
                || requester_is_oper;
            if visible {
                let prefix = channel
                    .members
                    .get(&t_uid)
                    .map(|m| m.prefix())
                    .unwrap_or("");
                shown.push(format!("{prefix}{}", channel.name));
            }
        }
    }
    if !shown.is_empty() {
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_WHOISCHANNELS,
            &nick,
            &[&t_nick, &shown.join(" ")],
        );
    }

    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_WHOISSERVER,
        &nick,
        &[&t_nick, &t_server.0, &t_server.1],
    );
    if let Some(away) = t_away {
        ctx.out
            .numeric(conn, &me, Numeric::RPL_AWAY, &nick, &[&t_nick, &away]);
    }
    if t_oper {
        let operstring = ctx.net.tunables.operstring.clone();
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_WHOISOPERATOR,
            &nick,
            &[&t_nick, &operstring],
        );
    }
    if let Some(account) = t_account {
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_WHOISLOGGEDIN,
            &nick,
            &[&t_nick, &account, "is logged in as"],
        );
    }
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_ENDOFWHOIS,
        &nick,
        &[&t_nick, "End of /WHOIS list"],
    );
    Ok(())
}

/// ISON: which of these nicks are online.
pub fn m_ison(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((_, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let me = ctx.net.me_name.clone();
    let online: Vec<String> = req
        .args
        .iter()
        .flat_map(|a| a.split_ascii_whitespace())
        .filter_map(|name| ctx.net.find_name(name).filter(|c| c.is_user()))
        .map(|c| c.name.clone())
        .collect();
    ctx.out
        .numeric(conn, &me, Numeric::RPL_ISON, &nick, &[&online.join(" ")]);
    Ok(())
}

/// USERHOST.
pub fn m_userhost(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((_, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let me = ctx.net.me_name.clone();
    let replies: Vec<String> = req
        .args
        .iter()
        .take(5)
        .filter_map(|name| ctx.net.find_name(name).filter(|c| c.is_user()))
        .map(|c| {
            format!(
                "{}{}={}{}@{}",
                c.name,
                if c.is_oper() { "*" } else { "" },
                if c.away.is_some() { "-" } else { "+" },
                c.username,
                c.host
            )
        })
        .collect();
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_USERHOST,
        &nick,
        &[&replies.join(" ")],
    );
    Ok(())
}

/// LIST, with the >N,<N user-count conditions.
pub fn m_list(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((uid, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let me = ctx.net.me_name.clone();
    let is_oper = ctx.net.find_id(&uid).map(|c| c.is_oper()).unwrap_or(false);

    let mut min_users = 0usize;
    let mut max_users = usize::MAX;
    let mut names: Option<Vec<String>> = None;
    if let Some(arg) = req.arg(0) {
        for cond in arg.split(',') {
            if let Some(n) = cond.strip_prefix('>') {
                min_users = n.parse().unwrap_or(0);
            } else if let Some(n) = cond.strip_prefix('<') {
                max_users = n.parse().unwrap_or(usize::MAX);
            } else if !cond.is_empty() {
                names.get_or_insert_with(Vec::new).push(cond.to_string());
            }
        }
    }

    ctx.out
        .numeric(conn, &me, Numeric::RPL_LISTSTART, &nick, &["Channel", "Users  Name"]);

    let rows: Vec<(String, usize, String)> = ctx
        .net
        .channels()
        .filter(|c| {
            names
                .as_ref()
                .map(|ns| ns.iter().any(|n| irc_to_lower(n) == irc_to_lower(&c.name)))
                .unwrap_or(true)
        })
        .filter(|c| c.members.len() > min_users && c.members.len() < max_users)
        .filter(|c| !(c.modes.secret || c.modes.private) || c.members.contains_key(&uid) || is_oper)
        .map(|c| {
            (
                c.name.clone(),
                c.members.len(),
                c.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default(),
            )
        })
        .collect();
    for (name, count, topic) in rows {
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_LIST,
            &nick,
            &[&name, &count.to_string(), &topic],
        );
    }
    ctx.out
        .numeric(conn, &me, Numeric::RPL_LISTEND, &nick, &["End of /LIST"]);
    Ok(())
}

/// ADMIN.
pub fn m_admin(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((_, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let me = ctx.net.me_name.clone();
    let admin = ctx.cfg.admin.clone();
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_ADMINME,
        &nick,
        &[&me, "Administrative info"],
    );
    ctx.out
        .numeric(conn, &me, Numeric::RPL_ADMINLOC1, &nick, &[&admin.name]);
    ctx.out
        .numeric(conn, &me, Numeric::RPL_ADMINLOC2, &nick, &[&admin.description]);
    ctx.out
        .numeric(conn, &me, Numeric::RPL_ADMINEMAIL, &nick, &[&admin.email]);
    Ok(())
}

/// VERSION.
pub fn m_version(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((_, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let me = ctx.net.me_name.clone();
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_VERSION,
        &nick,
        &["ferricd-0.4", &me, "TS6ow"],
    );
    Ok(())
}

/// TIME.
pub fn m_time(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((_, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let me = ctx.net.me_name.clone();
    let when = chrono::DateTime::from_timestamp(ctx.now, 0)
        .map(|t| t.format("%A %B %-d %Y -- %H:%M:%S %z").to_string())
        .unwrap_or_default();
    ctx.out
        .numeric(conn, &me, Numeric::RPL_TIME, &nick, &[&me, &when]);
    Ok(())
}

/// STATS <letter>: a deliberately small subset.
pub fn m_stats(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((uid, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let letter = req.arg(0).and_then(|a| a.chars().next()).unwrap_or('*');
    let me = ctx.net.me_name.clone();
    let is_oper = ctx.net.find_id(&uid).map(|c| c.is_oper()).unwrap_or(false);

    match letter {
        'u' => {
            let uptime = ctx.now - ctx.net.start_time;
            let (d, rem) = (uptime / 86400, uptime % 86400);
            let (h, rem) = (rem / 3600, rem % 3600);
            let (m, s) = (rem / 60, rem % 60);
            ctx.out.numeric(
                conn,
                &me,
                Numeric::RPL_STATSUPTIME,
                &nick,
                &[&format!("Server Up {d} days, {h}:{m:02}:{s:02}")],
            );
        }
        'o' if is_oper => {
            let rows: Vec<(String, String)> = ctx
                .cfg
                .opers
                .iter()
                .map(|o| (o.user_mask.clone(), o.name.clone()))
                .collect();
            for (mask, name) in rows {
                ctx.out.numeric(
                    conn,
                    &me,
                    Numeric::RPL_STATSOLINE,
                    &nick,
                    &["O", &mask, "*", &name, "-1", "-1"],
                );
            }
        }
        'k' if is_oper => {
            let rows: Vec<(String, String, String)> = ctx
                .bans
                .klines
                .iter()
                .map(|k| (k.host.clone(), k.user.clone(), k.reason.clone()))
                .collect();
            for (host, user, reason) in rows {
                ctx.out.numeric(
                    conn,
                    &me,
                    Numeric::RPL_STATSCOMMANDS,
                    &nick,
                    &["K", &host, "*", &user, &reason],
                );
            }
        }
        _ => {}
    }
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_ENDOFSTATS,
        &nick,
        &[&letter.to_string(), "End of /STATS report"],
    );
    Ok(())
}

/// LUSERS.
pub fn m_lusers(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((_, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    super::registration::lusers_reply(ctx, conn, &nick);
    Ok(())
}

/// MOTD: the content cache is external, so there is none.
pub fn m_motd(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((_, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let me = ctx.net.me_name.clone();
    ctx.out.numeric(
        conn,
        &me,
        Numeric::ERR_NOMOTD,
        &nick,
        &["MOTD File is missing"],
    );
    Ok(())
}

/// MONITOR +/-/C/L/S.
pub fn m_monitor(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((uid, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let me = ctx.net.me_name.clone();
    let sub = req.arg(0).unwrap_or("");
    let arg = req.arg(1).unwrap_or("");
    let cap = ctx.cfg.general.monitor_max;

    match sub {
        "+" => {
            let mut over = false;
            if let Some(local) = ctx.net.find_id_mut(&uid).and_then(|c| c.local.as_mut()) {
                for target in arg.split(',').filter(|t| !t.is_empty()) {
                    if local.monitor.len() >= cap {
                        over = true;
                        break;
                    }
                    local.monitor.insert(irc_to_lower(target));
                }
            }
            if over {
                ctx.out.numeric(
                    conn,
                    &me,
                    Numeric::ERR_MONLISTFULL,
                    &nick,
                    &[&cap.to_string(), arg, "Monitor list is full"],
                );
                return Ok(());
            }
            // immediate online/offline report for the new entries
            let (online, offline): (Vec<_>, Vec<_>) = arg
                .split(',')
                .filter(|t| !t.is_empty())
                .map(|t| {
                    ctx.net
                        .find_name(t)
                        .filter(|c| c.is_user())
                        .map(|c| c.mask())
                        .ok_or_else(|| t.to_string())
                })
                .partition(|r: &Result<String, String>| r.is_ok());
            let online: Vec<String> = online.into_iter().flatten().collect();
            let offline: Vec<String> =
                offline.into_iter().filter_map(|r| r.err()).collect();
            if !online.is_empty() {
                ctx.out.numeric(
                    conn,
                    &me,
                    Numeric::RPL_MONONLINE,
                    &nick,
                    &[&online.join(",")],
                );
            }
            if !offline.is_empty() {
                ctx.out.numeric(
                    conn,
                    &me,
                    Numeric::RPL_MONOFFLINE,
                    &nick,
                    &[&offline.join(",")],
                );
            }
        }
        "-" => {
            if let Some(local) = ctx.net.find_id_mut(&uid).and_then(|c| c.local.as_mut()) {
                for target in arg.split(',') {
                    local.monitor.remove(&irc_to_lower(target));
                }
            }
        }
        "C" => {
            if let Some(local) = ctx.net.find_id_mut(&uid).and_then(|c| c.local.as_mut()) {
                local.monitor.clear();
            }
        }
        "L" => {
            let entries: Vec<String> = ctx
                .net
                .find_id(&uid)
                .and_then(|c| c.local.as_ref())
                .map(|l| l.monitor.iter().cloned().collect())
                .unwrap_or_default();
            for chunk in entries.chunks(10) {
                ctx.out.numeric(
                    conn,
                    &me,
                    Numeric::RPL_MONLIST,
                    &nick,
                    &[&chunk.join(",")],
                );
            }
            ctx.out.numeric(
                conn,
                &me,
                Numeric::RPL_ENDOFMONLIST,
                &nick,
                &["End of MONITOR list"],
            );
        }
        "S" => {
            let entries: Vec<String> = ctx
                .net
                .find_id(&uid)
                .and_then(|c| c.local.as_ref())
                .map(|l| l.monitor.iter().cloned().collect())
                .unwrap_or_default();
            let (online, offline): (Vec<_>, Vec<_>) = entries
                .iter()
                .map(|t| {
                    ctx.net
                        .find_name(t)
                        .filter(|c| c.is_user())
                        .map(|c| c.mask())
                        .ok_or_else(|| t.clone())
                })
                .partition(|r: &Result<String, String>| r.is_ok());
            let online: Vec<String> = online.into_iter().flatten().collect();
            let offline: Vec<String> =
                offline.into_iter().filter_map(|r| r.err()).collect();
            if !online.is_empty() {
                ctx.out
                    .numeric(conn, &me, Numeric::RPL_MONONLINE, &nick, &[&online.join(",")]);
            }
            if !offline.is_empty() {
                ctx.out
                    .numeric(conn, &me, Numeric::RPL_MONOFFLINE, &nick, &[&offline.join(",")]);
            }
        }
        _ => {}
    }
    Ok(())
}

/// ACCEPT: the caller-id allow list.
pub fn m_accept(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some((uid, conn, nick)) = local_requester(ctx, req) else {
        return Ok(());
    };
    let me = ctx.net.me_name.clone();
    let arg = req.arg(0).unwrap_or("");

    if arg == "*" {
        let entries: Vec<String> = ctx
            .net
            .find_id(&uid)
            .and_then(|c| c.local.as_ref())
            .map(|l| l.accept.iter().cloned().collect())
            .unwrap_or_default();
        let names: Vec<String> = entries
            .iter()
            .filter_map(|id| ctx.net.find_id(id))
            .map(|c| c.name.clone())
            .collect();
        for name in names {
            ctx.out
                .numeric(conn, &me, Numeric::RPL_ACCEPTLIST, &nick, &[&name]);
        }
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_ENDOFACCEPT,
            &nick,
            &["End of /ACCEPT list"],
        );
        return Ok(());
    }

    let cap = ctx.cfg.general.accept_max;
    for token in arg.split(',').filter(|t| !t.is_empty()) {
        if let Some(removed) = token.strip_prefix('-') {
            let target = ctx.net.find_name(removed).map(|c| c.id.clone());
            match target {
                Some(target_uid) => {
                    if let Some(local) =
                        ctx.net.find_id_mut(&uid).and_then(|c| c.local.as_mut())
                    {
                        if !local.accept.remove(&target_uid) {
                            ctx.out.numeric(
                                conn,
                                &me,
                                Numeric::ERR_ACCEPTNOT,
                                &nick,
                                &[removed, "is not on your accept list"],
                            );
                        }
                    }
                }
                None => {
                    ctx.out.numeric(
                        conn,
                        &me,
                        Numeric::ERR_ACCEPTNOT,
                        &nick,
                        &[removed, "is not on your accept list"],
                    );
                }
            }
            continue;
        }

        let Some(target_uid) = ctx.net.find_name(token).filter(|c| c.is_user()).map(|c| c.id.clone())
        else {
            ctx.out.numeric(
                conn,
                &me,
                Numeric::ERR_NOSUCHNICK,
                &nick,
                &[token, "No such nick/channel"],
            );
            continue;
        };
        let (full, exists) = ctx
            .net
            .find_id(&uid)
            .and_then(|c| c.local.as_ref())
            .map(|l| (l.accept.len() >= cap, l.accept.contains(&target_uid)))
            .unwrap_or((false, false));
        if exists {
            ctx.out.numeric(
                conn,
                &me,
                Numeric::ERR_ACCEPTEXIST,
                &nick,
                &[token, "is already on your accept list"],
            );
        } else if full {
            ctx.out.numeric(
                conn,
                &me,
                Numeric::ERR_ACCEPTFULL,
                &nick,
                &["Accept list is full"],
            );
        } else if let Some(local) = ctx.net.find_id_mut(&uid).and_then(|c| c.local.as_mut()) {
            local.accept.insert(target_uid);
        }
    }
    Ok(())
}
