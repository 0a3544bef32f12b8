//! Operator commands: authentication, routing surgery, wall messages,
//! runtime tunables, and the operspy channel tools.

use ferric_proto::{Capab, Numeric, line::format_line, match_mask};
use tracing::{info, warn};

use crate::chmode::ModeSource;
use crate::dispatch::{Ctx, EngineAction, Request, Source};
use crate::error::{HandlerError, HandlerResult};
use crate::route::{sendto_channel_local, sendto_realops, sendto_server, sendto_wallops_local};
use crate::state::{OperInfo, SplitSetting};

use super::exit::{apply_kill, exit_server};

/// OPER <name> <password>.
pub fn m_oper(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let name = req.arg(0).unwrap_or("");
    let password = req.arg(1).unwrap_or("");

    let (mask_user, mask_host, is_secure, certfp, nick) = {
        let Some(client) = ctx.net.find_id(&uid) else {
            return Ok(());
        };
        if client.is_oper() {
            ctx.reply(&uid, Numeric::RPL_YOUREOPER, &["You are already an IRC operator"]);
            return Ok(());
        }
        (
            client.username.clone(),
            client.orig_host.clone(),
            client.umodes.secure,
            client.certfp.clone(),
            client.name.clone(),
        )
    };

    let Some(block) = ctx
        .cfg
        .opers
        .iter()
        .find(|o| o.name.eq_ignore_ascii_case(name))
        .cloned()
    else {
        failed_oper(ctx, &uid, &nick, name, "no such oper block");
        return Err(HandlerError::Numeric(
            Numeric::ERR_NOOPERHOST,
            vec!["No appropriate operator block for your host".to_string()],
        ));
    };

    let (want_user, want_host) = block
        .user_mask
        .split_once('@')
        .unwrap_or((block.user_mask.as_str(), "*"));
    if !match_mask(want_user, &mask_user) || !match_mask(want_host, &mask_host) {
        failed_oper(ctx, &uid, &nick, name, "host mismatch");
        return Err(HandlerError::Numeric(
            Numeric::ERR_NOOPERHOST,
            vec!["No appropriate operator block for your host".to_string()],
        ));
    }
    if block.need_ssl && !is_secure {
        failed_oper(ctx, &uid, &nick, name, "missing TLS");
        return Err(HandlerError::Numeric(
            Numeric::ERR_NOOPERHOST,
            vec!["This operator block requires a TLS connection".to_string()],
        ));
    }
    if let Some(wanted_fp) = &block.certfp {
        if certfp.as_deref() != Some(wanted_fp.as_str()) {
            failed_oper(ctx, &uid, &nick, name, "certificate fingerprint mismatch");
            return Err(HandlerError::Numeric(
                Numeric::ERR_NOOPERHOST,
                vec!["Client certificate fingerprint mismatch".to_string()],
            ));
        }
    }
    if !bcrypt::verify(password, &block.password).unwrap_or(false) {
        failed_oper(ctx, &uid, &nick, name, "bad password");
        return Err(HandlerError::Numeric(
            Numeric::ERR_PASSWDMISMATCH,
            vec!["Password incorrect".to_string()],
        ));
    }

    // success: flip the switch
    let snomask: Vec<char> = if block.snomask.is_empty() {
        vec!['s', 'k', 'x', 'b', 'o']
    } else {
        block.snomask.chars().collect()
    };
    let is_admin = block.privs.admin;
    if let Some(client) = ctx.net.find_id_mut(&uid) {
        client.umodes.oper = true;
        client.umodes.admin = is_admin;
        client.umodes.wallops = true;
        client.flags.exempt_flood = true;
        for c in &snomask {
            client.umodes.snomask.insert(*c);
        }
        if let Some(local) = client.local.as_mut() {
            local.oper = Some(OperInfo {
                name: block.name.clone(),
                privs: block.privs.clone(),
            });
        }
    }
    ctx.net.counts.opers += 1;

    ctx.reply(&uid, Numeric::RPL_YOUREOPER, &["You have entered... the Twilight Zone!"]);
    let sno: String = snomask.iter().collect();
    ctx.reply(&uid, Numeric::RPL_SNOMASK, &[&format!("+{sno}"), "Server notice mask"]);
    sendto_realops(
        ctx.net,
        ctx.out,
        'o',
        &format!("{nick} ({mask_user}@{mask_host}) is now an operator"),
    );
    info!(nick = %nick, oper = %block.name, "oper up");

    let delta = if is_admin { "+oaw" } else { "+ow" };
    let wire = format_line(Some(&uid), "MODE", &[&uid, delta]);
    sendto_server(ctx.net, ctx.out, None, Capab::none(), Capab::none(), &wire);
    Ok(())
}

fn failed_oper(ctx: &mut Ctx<'_>, _uid: &str, nick: &str, name: &str, why: &str) {
    warn!(nick = %nick, oper = %name, why, "failed OPER attempt");
    sendto_realops(
        ctx.net,
        ctx.out,
        'o',
        &format!("Failed OPER attempt by {nick} ({why})"),
    );
}

/// KILL from a local oper.
pub fn mo_kill(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let target_name = req.arg(0).unwrap_or("");
    let reason = req.arg(1).unwrap_or("No reason given").to_string();

    let Some(target) = ctx.net.resolve(target_name).filter(|c| c.is_user()) else {
        return Err(HandlerError::no_such_nick(target_name));
    };
    let target_uid = target.id.clone();
    let target_nick = target.name.clone();
    let target_local = target.is_local();

    if !target_local
        && !ctx
            .net
            .find_id(&uid)
            .map(|c| c.has_priv(|p| p.kill_remote))
            .unwrap_or(false)
    {
        return Err(HandlerError::NoPrivileges);
    }

    let (oper_nick, oper_mask) = ctx
        .net
        .find_id(&uid)
        .map(|c| (c.name.clone(), c.mask()))
        .unwrap_or_default();
    let path = format!("{}!{}", ctx.net.me_name, oper_nick);

    sendto_realops(
        ctx.net,
        ctx.out,
        'k',
        &format!("Received KILL message for {target_nick}. From {oper_mask} ({reason})"),
    );
    apply_kill(ctx, &target_uid, &uid, &path, &reason, None);
    Ok(())
}

/// KILL relayed over the network.
pub fn ms_kill(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let target_name = req.arg(0).unwrap_or("");
    let path_reason = req.arg(1).unwrap_or("No reason given");

    let Some(target) = ctx.net.resolve(target_name) else {
        return Ok(()); // collision aftermath
    };
    let target_uid = target.id.clone();
    let target_nick = target.name.clone();

    let (path, reason) = match path_reason.split_once(" (") {
        Some((p, r)) => (p.to_string(), r.trim_end_matches(')').to_string()),
        None => (path_reason.to_string(), "No reason given".to_string()),
    };

    sendto_realops(
        ctx.net,
        ctx.out,
        'k',
        &format!("Received KILL message for {target_nick}. Path: {path} ({reason})"),
    );
    let killer = req.source.id().unwrap_or(&ctx.net.me).to_string();
    apply_kill(ctx, &target_uid, &killer, &path, &reason, Some(req.conn));
    Ok(())
}

/// SQUIT from a local oper.
pub fn mo_squit(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let mask = req.arg(0).unwrap_or("");
    let reason = req
        .arg(1)
        .map(str::to_string)
        .unwrap_or_else(|| "No reason given".to_string());

    let Some(target) = ctx.net.find_server_mask(mask).filter(|c| !matches!(c.status, crate::state::Status::Me)) else {
        return Err(HandlerError::no_such_server(mask));
    };
    let sid = target.id.clone();
    let direct = target.is_local();
    let route = target.from_conn;

    if !direct
        && !ctx
            .net
            .find_id(&uid)
            .map(|c| c.has_priv(|p| p.routing))
            .unwrap_or(false)
    {
        return Err(HandlerError::NoPrivileges);
    }

    if direct {
        exit_server(ctx, &sid, &reason, None);
    } else if let Some(route) = route {
        ctx.out
            .send_raw(route, format_line(Some(&uid), "SQUIT", &[&sid, &reason]));
    }
    Ok(())
}

/// SQUIT from the network.
pub fn ms_squit(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let target_name = req.arg(0).unwrap_or("");
    let reason = req.arg(1).unwrap_or("Remote SQUIT").to_string();

    let Some(target) = ctx.net.resolve(target_name) else {
        return Ok(());
    };
    let sid = target.id.clone();

    if sid == ctx.net.me {
        // someone is squitting us off through this link: drop the link
        return Err(HandlerError::Drop(reason));
    }

    if target.from_conn == Some(req.conn) || target.is_local() {
        exit_server(ctx, &sid, &reason, Some(req.conn));
    } else if let Some(route) = target.from_conn {
        // pass it along toward the target
        let source = req.source.id().unwrap_or(&ctx.net.me).to_string();
        ctx.out
            .send_raw(route, format_line(Some(&source), "SQUIT", &[&sid, &reason]));
    }
    Ok(())
}

/// CONNECT <name>: dial a configured link.
pub fn mo_connect(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    if !ctx
        .net
        .find_id(&uid)
        .map(|c| c.has_priv(|p| p.routing))
        .unwrap_or(false)
    {
        return Err(HandlerError::NoPrivileges);
    }
    let name = req.arg(0).unwrap_or("");
    let Some(block) = ctx
        .cfg
        .connects
        .iter()
        .find(|b| b.name.eq_ignore_ascii_case(name))
    else {
        return Err(HandlerError::no_such_server(name));
    };
    let block_name = block.name.clone();
    let oper_nick = ctx.net.find_id(&uid).map(|c| c.name.clone()).unwrap_or_default();
    sendto_realops(
        ctx.net,
        ctx.out,
        'x',
        &format!("{oper_nick} is issuing CONNECT to {block_name}"),
    );
    ctx.actions.push(EngineAction::ConnectServer(block_name));
    Ok(())
}

/// WALLOPS from an oper.
pub fn mo_wallops(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    if !ctx
        .net
        .find_id(&uid)
        .map(|c| c.has_priv(|p| p.mass_notice))
        .unwrap_or(false)
    {
        return Err(HandlerError::NoPrivileges);
    }
    let text = req.arg(0).unwrap_or("");
    let mask = ctx.net.find_id(&uid).map(|c| c.mask()).unwrap_or_default();
    sendto_wallops_local(ctx.net, ctx.out, &mask, text);
    let wire = format_line(Some(&uid), "WALLOPS", &[text]);
    sendto_server(ctx.net, ctx.out, None, Capab::none(), Capab::none(), &wire);
    Ok(())
}

/// WALLOPS relayed from the network.
pub fn ms_wallops(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let text = req.arg(0).unwrap_or("");
    let prefix = match &req.source {
        Source::User(uid) => ctx.net.find_id(uid).map(|c| c.mask()),
        Source::Server(sid) => ctx.net.find_id(sid).map(|c| c.name.clone()),
        Source::Pending(_) => None,
    }
    .unwrap_or_else(|| ctx.net.me_name.clone());
    sendto_wallops_local(ctx.net, ctx.out, &prefix, text);
    let source = req.source.id().unwrap_or(&ctx.net.me).to_string();
    let wire = format_line(Some(&source), "WALLOPS", &[text]);
    sendto_server(ctx.net, ctx.out, Some(req.conn), Capab::none(), Capab::none(), &wire);
    Ok(())
}

/// OPERWALL: like WALLOPS but only opers see it.
pub fn mo_operwall(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    if !ctx
        .net
        .find_id(&uid)
        .map(|c| c.has_priv(|p| p.mass_notice))
        .unwrap_or(false)
    {
        return Err(HandlerError::NoPrivileges);
    }
    let text = req.arg(0).unwrap_or("");
    let mask = ctx.net.find_id(&uid).map(|c| c.mask()).unwrap_or_default();
    operwall_local(ctx, &mask, text);
    let wire = format_line(Some(&uid), "OPERWALL", &[text]);
    sendto_server(ctx.net, ctx.out, None, Capab::none(), Capab::none(), &wire);
    Ok(())
}

pub fn ms_operwall(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let text = req.arg(0).unwrap_or("");
    let prefix = match &req.source {
        Source::User(uid) => ctx.net.find_id(uid).map(|c| c.mask()),
        Source::Server(sid) => ctx.net.find_id(sid).map(|c| c.name.clone()),
        Source::Pending(_) => None,
    }
    .unwrap_or_else(|| ctx.net.me_name.clone());
    operwall_local(ctx, &prefix, text);
    let source = req.source.id().unwrap_or(&ctx.net.me).to_string();
    let wire = format_line(Some(&source), "OPERWALL", &[text]);
    sendto_server(ctx.net, ctx.out, Some(req.conn), Capab::none(), Capab::none(), &wire);
    Ok(())
}

fn operwall_local(ctx: &mut Ctx<'_>, prefix: &str, text: &str) {
    let conns: Vec<crate::state::ConnId> = ctx
        .net
        .clients()
        .filter(|c| c.is_local() && c.is_oper())
        .filter_map(|c| c.from_conn)
        .collect();
    for conn in conns {
        ctx.out
            .send_raw(conn, format_line(Some(prefix), "WALLOPS", &[text]));
    }
}

/// REHASH: swap the config snapshot at the next event boundary.
pub fn mo_rehash(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    priv_gate(ctx, req, |p| p.rehash)?;
    let nick = oper_nick(ctx, req);
    sendto_realops(
        ctx.net,
        ctx.out,
        'x',
        &format!("{nick} is rehashing server config file"),
    );
    ctx.actions.push(EngineAction::Rehash);
    Ok(())
}

/// DIE: clean shutdown.
pub fn mo_die(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    priv_gate(ctx, req, |p| p.die)?;
    let nick = oper_nick(ctx, req);
    warn!(oper = %nick, "DIE received");
    ctx.actions.push(EngineAction::Die);
    Ok(())
}

/// RESTART.
pub fn mo_restart(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    priv_gate(ctx, req, |p| p.die)?;
    let nick = oper_nick(ctx, req);
    warn!(oper = %nick, "RESTART received");
    ctx.actions.push(EngineAction::Restart);
    Ok(())
}

/// SET <tunable> [value]: runtime knobs.
pub fn mo_set(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    priv_gate(ctx, req, |p| p.admin)?;
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let which = req.arg(0).unwrap_or("").to_ascii_uppercase();
    let value = req.arg(1).unwrap_or("");

    let notice = |ctx: &mut Ctx<'_>, text: String| {
        let me = ctx.net.me_name.clone();
        if let Some(conn) = ctx.net.find_id(&uid).and_then(|c| c.from_conn) {
            let nick = ctx.net.find_id(&uid).map(|c| c.name.clone()).unwrap_or_default();
            ctx.out
                .send_raw(conn, format_line(Some(&me), "NOTICE", &[&nick, &text]));
        }
    };

    match which.as_str() {
        "FLOODCOUNT" => {
            if let Ok(n) = value.parse() {
                ctx.net.tunables.floodcount = n;
            }
            let n = ctx.net.tunables.floodcount;
            notice(ctx, format!("FLOODCOUNT is now {n}"));
        }
        "MAXCLIENTS" => {
            if let Ok(n) = value.parse() {
                ctx.net.tunables.max_clients = n;
            }
            let n = ctx.net.tunables.max_clients;
            notice(ctx, format!("MAXCLIENTS is now {n}"));
        }
        "SPAMNUM" => {
            if let Ok(n) = value.parse() {
                ctx.net.tunables.spam_num = n;
            }
            let n = ctx.net.tunables.spam_num;
            notice(ctx, format!("SPAMNUM is now {n}"));
        }
        "SPAMTIME" => {
            if let Ok(n) = value.parse() {
                ctx.net.tunables.spam_time = n;
            }
            let n = ctx.net.tunables.spam_time;
            notice(ctx, format!("SPAMTIME is now {n}"));
        }
        "SPLITMODE" => {
            ctx.net.split_setting = match value.to_ascii_uppercase().as_str() {
                "ON" => SplitSetting::On,
                "OFF" => SplitSetting::Off,
                _ => SplitSetting::Auto,
            };
            crate::splitmode::evaluate(ctx.net);
            let active = ctx.net.split_active;
            let setting = ctx.net.split_setting;
            notice(ctx, format!("SPLITMODE is now {setting:?} (active: {active})"));
        }
        "SPLITNUM" => {
            if let Ok(n) = value.parse() {
                ctx.net.tunables.split_servers = n;
            }
            crate::splitmode::evaluate(ctx.net);
            let n = ctx.net.tunables.split_servers;
            notice(ctx, format!("SPLITNUM is now {n}"));
        }
        "SPLITUSERS" => {
            if let Ok(n) = value.parse() {
                ctx.net.tunables.split_users = n;
            }
            crate::splitmode::evaluate(ctx.net);
            let n = ctx.net.tunables.split_users;
            notice(ctx, format!("SPLITUSERS is now {n}"));
        }
        "AUTOCONN" | "AUTOCONNALL" => {
            ctx.net.tunables.autoconn = matches!(value, "1" | "on" | "ON" | "yes");
            let on = ctx.net.tunables.autoconn;
            notice(ctx, format!("AUTOCONN is now {on}"));
        }
        "OPERSTRING" => {
            ctx.net.tunables.operstring = value.to_string();
            notice(ctx, "OPERSTRING updated".to_string());
        }
        "ADMINSTRING" => {
            ctx.net.tunables.adminstring = value.to_string();
            notice(ctx, "ADMINSTRING updated".to_string());
        }
        _ => {
            notice(
                ctx,
                "Available: FLOODCOUNT MAXCLIENTS SPAMNUM SPAMTIME SPLITMODE SPLITNUM SPLITUSERS AUTOCONN OPERSTRING ADMINSTRING".to_string(),
            );
        }
    }
    Ok(())
}

/// TRACE: the local connection table.
pub fn mo_trace(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let Some(conn) = ctx.net.find_id(&uid).and_then(|c| c.from_conn) else {
        return Ok(());
    };
    let nick = ctx.net.find_id(&uid).map(|c| c.name.clone()).unwrap_or_default();
    let me = ctx.net.me_name.clone();

    let rows: Vec<(bool, String, String)> = ctx
        .net
        .clients()
        .filter(|c| c.is_local())
        .map(|c| (c.is_server(), c.name.clone(), c.mask()))
        .collect();
    for (is_server, name, mask) in rows {
        if is_server {
            ctx.out.numeric(
                conn,
                &me,
                Numeric::RPL_TRACESERVER,
                &nick,
                &["Serv", "default", "0S", "0C", &name, "*!*@*", "0"],
            );
        } else {
            ctx.out.numeric(
                conn,
                &me,
                Numeric::RPL_TRACEUSER,
                &nick,
                &["User", "default", &mask],
            );
        }
    }
    let unknown = ctx.net.pending.len();
    if unknown > 0 {
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_TRACEUNKNOWN,
            &nick,
            &["????", "default", &unknown.to_string()],
        );
    }
    Ok(())
}

/// TESTMASK <user@host>: count matching clients.
pub fn mo_testmask(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let mask = req.arg(0).unwrap_or("");
    let (user, host) = mask.split_once('@').unwrap_or(("*", mask));

    let (mut local, mut remote) = (0u32, 0u32);
    for client in ctx.net.clients().filter(|c| c.is_user()) {
        if match_mask(user, &client.username)
            && (match_mask(host, &client.orig_host) || match_mask(host, &client.sockhost))
        {
            if client.is_local() {
                local += 1;
            } else {
                remote += 1;
            }
        }
    }
    ctx.reply(
        &uid,
        Numeric::RPL_TESTMASKGECOS,
        &[
            &local.to_string(),
            &remote.to_string(),
            mask,
            "*",
            "Local/remote clients match",
        ],
    );
    Ok(())
}

/// TESTLINE <mask>: what would hit this mask?
pub fn mo_testline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let mask = req.arg(0).unwrap_or("");
    let (user, host) = mask.split_once('@').unwrap_or(("*", mask));

    if let Some(kline) = ctx.bans.test_mask(user, host) {
        let (user, host, reason) = (kline.user.clone(), kline.host.clone(), kline.reason.clone());
        ctx.reply(
            &uid,
            Numeric::RPL_TESTLINE,
            &["K", "0", &format!("{user}@{host}"), &reason],
        );
        return Ok(());
    }
    if let Some(resv) = ctx.net.find_resv(mask) {
        let (rmask, reason) = (resv.mask.clone(), resv.reason.clone());
        ctx.reply(&uid, Numeric::RPL_TESTLINE, &["Q", "0", &rmask, &reason]);
        return Ok(());
    }
    ctx.reply(&uid, Numeric::RPL_NOTESTLINE, &[mask, "No matches"]);
    Ok(())
}

/// OMODE: forced channel mode change, bypassing chanop checks. Logged.
pub fn mo_omode(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    priv_gate(ctx, req, |p| p.chan_force)?;
    let chname = req.arg(0).unwrap_or("");
    let nick = oper_nick(ctx, req);
    sendto_realops(
        ctx.net,
        ctx.out,
        'Z',
        &format!("OMODE called for {chname} by {nick}"),
    );
    let source = ModeSource::Server {
        id: ctx.net.me.clone(),
    };
    crate::chmode::channel_mode(
        ctx.net,
        ctx.out,
        ctx.extbans,
        ctx.modes,
        &ctx.cfg.channel,
        &source,
        chname,
        &req.args[1..],
        ctx.now,
    )
}

/// OKICK: forced kick.
pub fn mo_okick(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    priv_gate(ctx, req, |p| p.chan_force)?;
    let chname = req.arg(0).unwrap_or("");
    let target_name = req.arg(1).unwrap_or("");
    let reason = req.arg(2).unwrap_or("Kicked");
    let nick = oper_nick(ctx, req);

    let Some(target) = ctx.net.resolve(target_name).filter(|c| c.is_user()) else {
        return Err(HandlerError::no_such_nick(target_name));
    };
    let target_uid = target.id.clone();
    let target_nick = target.name.clone();
    if !ctx
        .net
        .get_channel(chname)
        .map(|c| c.members.contains_key(&target_uid))
        .unwrap_or(false)
    {
        return Err(HandlerError::Numeric(
            Numeric::ERR_USERNOTINCHANNEL,
            vec![
                target_nick.clone(),
                chname.to_string(),
                "They aren't on that channel".to_string(),
            ],
        ));
    }

    sendto_realops(
        ctx.net,
        ctx.out,
        'Z',
        &format!("OKICK called for {chname} {target_nick} by {nick}"),
    );
    let me_name = ctx.net.me_name.clone();
    let line = format_line(Some(&me_name), "KICK", &[chname, &target_nick, reason]);
    sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);
    super::sjoin::remove_member(ctx, chname, &target_uid);
    let wire = format_line(Some(&ctx.net.me.clone()), "KICK", &[chname, &target_uid, reason]);
    sendto_server(ctx.net, ctx.out, None, Capab::none(), Capab::none(), &wire);
    Ok(())
}

/// CLEARCHAN: kick every member out.
pub fn mo_clearchan(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    priv_gate(ctx, req, |p| p.chan_force)?;
    let chname = req.arg(0).unwrap_or("");
    let nick = oper_nick(ctx, req);

    let members: Vec<String> = ctx
        .net
        .get_channel(chname)
        .map(|c| c.members.keys().cloned().collect())
        .unwrap_or_default();
    if members.is_empty() {
        return Err(HandlerError::no_such_channel(chname));
    }

    sendto_realops(
        ctx.net,
        ctx.out,
        'Z',
        &format!("CLEARCHAN called for {chname} by {nick}"),
    );
    let me_name = ctx.net.me_name.clone();
    let me_sid = ctx.net.me.clone();
    for uid in members {
        let member_nick = ctx
            .net
            .find_id(&uid)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| uid.clone());
        let line = format_line(Some(&me_name), "KICK", &[chname, &member_nick, "CLEARCHAN"]);
        sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);
        super::sjoin::remove_member(ctx, chname, &uid);
        let wire = format_line(Some(&me_sid), "KICK", &[chname, &uid, "CLEARCHAN"]);
        sendto_server(ctx.net, ctx.out, None, Capab::none(), Capab::none(), &wire);
    }
    Ok(())
}

/// OLIST: LIST through secret channels. Logged operspy.
pub fn mo_olist(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    priv_gate(ctx, req, |p| p.operspy)?;
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let Some(conn) = ctx.net.find_id(&uid).and_then(|c| c.from_conn) else {
        return Ok(());
    };
    let nick = oper_nick(ctx, req);
    let mask = req.arg(0).unwrap_or("*");
    sendto_realops(
        ctx.net,
        ctx.out,
        'Z',
        &format!("OLIST {mask} by {nick}"),
    );
    let me = ctx.net.me_name.clone();
    let rows: Vec<(String, usize, String)> = ctx
        .net
        .channels()
        .filter(|c| match_mask(mask, &c.name))
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
        .numeric(conn, &me, Numeric::RPL_LISTEND, &nick, &["End of /OLIST"]);
    Ok(())
}

/// SENDBANS: replay resvs and xlines to the network.
pub fn mo_sendbans(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    priv_gate(ctx, req, |p| p.resv && p.xline)?;
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let nick = oper_nick(ctx, req);
    sendto_realops(
        ctx.net,
        ctx.out,
        'x',
        &format!("{nick} is resynchronizing bans to the network"),
    );

    let resvs: Vec<(String, String)> = ctx
        .net
        .resvs
        .iter()
        .map(|r| (r.mask.clone(), r.reason.clone()))
        .collect();
    for (mask, reason) in resvs {
        let wire = format_line(Some(&uid), "ENCAP", &["*", "RESV", "0", &mask, "0", &reason]);
        sendto_server(ctx.net, ctx.out, None, Capab::ENCAP, Capab::none(), &wire);
    }
    let xlines: Vec<(String, String)> = ctx
        .bans
        .xlines
        .iter()
        .map(|x| (x.mask.clone(), x.reason.clone()))
        .collect();
    for (mask, reason) in xlines {
        let wire = format_line(Some(&uid), "ENCAP", &["*", "XLINE", "0", &mask, "2", &reason]);
        sendto_server(ctx.net, ctx.out, None, Capab::ENCAP, Capab::none(), &wire);
    }
    Ok(())
}

fn priv_gate<F: Fn(&crate::config::OperPrivs) -> bool>(
    ctx: &Ctx<'_>,
    req: &Request<'_>,
    f: F,
) -> HandlerResult {
    let allowed = req
        .source
        .user_uid()
        .and_then(|uid| ctx.net.find_id(uid))
        .map(|c| c.has_priv(f))
        .unwrap_or(false);
    if allowed {
        Ok(())
    } else {
        Err(HandlerError::NoPrivileges)
    }
}

fn oper_nick(ctx: &Ctx<'_>, req: &Request<'_>) -> String {
    req.source
        .user_uid()
        .and_then(|uid| ctx.net.find_id(uid))
        .map(|c| c.name.clone())
        .unwrap_or_default()
}
