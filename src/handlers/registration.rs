//! Client registration: the unregistered-socket command set and the
//! transition to a registered user.

use ferric_proto::{Numeric, valid::clean_nick, valid::clean_username};
use rand::Rng;
use tracing::info;

use crate::dispatch::{Ctx, EngineAction, Request, Source};
use crate::error::{HandlerError, HandlerResult};
use crate::hooks::{H_NEW_LOCAL_USER, HookPayload};
use crate::state::{ConnId, Status};

fn pending_conn(req: &Request<'_>) -> ConnId {
    match req.source {
        Source::Pending(conn) => conn,
        _ => req.conn,
    }
}

/// NICK from an unregistered socket.
pub fn mr_nick(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let conn = pending_conn(req);
    let Some(nick) = req.arg(0) else {
        return Err(HandlerError::Numeric(
            Numeric::ERR_NONICKNAMEGIVEN,
            vec!["No nickname given".to_string()],
        ));
    };

    if !clean_nick(nick) {
        return Err(HandlerError::Numeric(
            Numeric::ERR_ERRONEUSNICKNAME,
            vec![nick.to_string(), "Erroneous nickname".to_string()],
        ));
    }

    if let Some(resv) = ctx.net.find_resv(nick) {
        return Err(HandlerError::Numeric(
            Numeric::ERR_UNAVAILRESOURCE,
            vec![
                nick.to_string(),
                format!("Nick/channel is temporarily unavailable ({})", resv.reason),
            ],
        ));
    }

    if ctx.net.find_name(nick).is_some() {
        return Err(HandlerError::Numeric(
            Numeric::ERR_NICKNAMEINUSE,
            vec![nick.to_string(), "Nickname is already in use".to_string()],
        ));
    }

    if let Some(local) = ctx
        .net
        .pending
        .get_mut(&conn)
        .and_then(|c| c.local.as_mut())
    {
        local.pre_nick = Some(nick.to_string());
    }
    try_register(ctx, conn)
}

/// USER from an unregistered socket.
pub fn mr_user(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let conn = pending_conn(req);
    let username = req.arg(0).unwrap_or("");
    let gecos = req.arg(3).unwrap_or("");

    if let Some(local) = ctx
        .net
        .pending
        .get_mut(&conn)
        .and_then(|c| c.local.as_mut())
    {
        // the ident helper's answer, when it lands, overrides this
        let mut user = username.chars().take(10).collect::<String>();
        if !clean_username(&user) {
            user = "~unknown".to_string();
        } else if !user.starts_with('~') {
            user = format!("~{}", user.chars().take(9).collect::<String>());
        }
        local.pre_user = Some(user);
        local.pre_gecos = Some(gecos.chars().take(50).collect());
    }
    try_register(ctx, conn)
}

/// PASS from an unregistered socket. Either a client password or the TS6
/// server handshake `PASS <pw> TS 6 :<sid>`.
pub fn mr_pass(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let conn = pending_conn(req);
    let Some(local) = ctx
        .net
        .pending
        .get_mut(&conn)
        .and_then(|c| c.local.as_mut())
    else {
        return Ok(());
    };

    local.pre_pass = Some(req.arg(0).unwrap_or("").to_string());
    if req.arg(1).map(str::to_ascii_uppercase).as_deref() == Some("TS")
        && req.arg(2) == Some("6")
    {
        let sid = req.arg(3).unwrap_or("");
        if !ferric_proto::valid_sid(sid) {
            return Err(HandlerError::Drop(format!("Invalid SID {sid}")));
        }
        local.pre_sid = Some(sid.to_string());
    }
    Ok(())
}

/// PONG from an unregistered socket: the ping-cookie reply.
pub fn mr_pong(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let conn = pending_conn(req);
    let answer = req.arg(0).unwrap_or("");

    let matched = ctx
        .net
        .pending
        .get(&conn)
        .and_then(|c| c.local.as_ref())
        .and_then(|l| l.ping_cookie)
        .map(|cookie| answer == cookie.to_string())
        .unwrap_or(false);

    if !matched {
        return Err(HandlerError::Numeric(
            Numeric::ERR_WRONGPONG,
            vec![
                answer.to_string(),
                "To connect type /QUOTE PONG <cookie>".to_string(),
            ],
        ));
    }

    if let Some(local) = ctx
        .net
        .pending
        .get_mut(&conn)
        .and_then(|c| c.local.as_mut())
    {
        local.cookie_received = true;
    }
    try_register(ctx, conn)
}

/// QUIT before registration: just close.
pub fn mr_quit(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let conn = pending_conn(req);
    if ctx.net.pending.remove(&conn).is_some() {
        ctx.net.counts.unknown = ctx.net.counts.unknown.saturating_sub(1);
    }
    ctx.out.close_error(conn, "Client Quit");
    Ok(())
}

/// STARTTLS before registration.
pub fn mr_starttls(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let conn = pending_conn(req);
    if ctx.cfg.serverinfo.helper_dir.is_none() {
        return Err(HandlerError::Numeric(
            Numeric::ERR_STARTTLS,
            vec!["TLS is not configured".to_string()],
        ));
    }
    ctx.reply_unreg(
        conn,
        Numeric::RPL_STARTTLS,
        &["STARTTLS successful, proceed with TLS handshake"],
    );
    // the engine drains the plaintext queue and hands the socket to ssld
    ctx.actions.push(EngineAction::StartTls(conn));
    Ok(())
}

/// Attempt to finish registration. Every precondition must hold at once:
/// NICK and USER seen, CAP negotiation finished, the authd verdict in,
/// and the ping cookie answered when enabled. Order is immaterial.
pub fn try_register(ctx: &mut Ctx<'_>, conn: ConnId) -> HandlerResult {
    let ready = {
        let Some(client) = ctx.net.pending.get(&conn) else {
            return Ok(());
        };
        let Some(local) = client.local.as_ref() else {
            return Ok(());
        };
        local.pre_nick.is_some()
            && local.pre_user.is_some()
            && !local.cap_negotiating
            && !local.authd_pending
    };
    if !ready {
        return Ok(());
    }

    // ping cookie round trip, once NICK+USER are in
    if ctx.cfg.general.ping_cookie {
        let state = ctx
            .net
            .pending
            .get_mut(&conn)
            .and_then(|c| c.local.as_mut());
        if let Some(local) = state {
            match (local.ping_cookie, local.cookie_received) {
                (None, _) => {
                    let cookie: u32 = rand::thread_rng().r#gen();
                    local.ping_cookie = Some(cookie);
                    ctx.out
                        .send_raw(conn, format!("PING :{cookie}\r\n"));
                    return Ok(());
                }
                (Some(_), false) => return Ok(()),
                (Some(_), true) => {}
            }
        }
    }

    // nick may have been taken while we waited
    let nick = ctx
        .net
        .pending
        .get(&conn)
        .and_then(|c| c.local.as_ref())
        .and_then(|l| l.pre_nick.clone())
        .unwrap_or_default();
    if ctx.net.find_name(&nick).is_some() {
        ctx.reply_unreg(
            conn,
            Numeric::ERR_NICKNAMEINUSE,
            &[&nick, "Nickname is already in use"],
        );
        if let Some(local) = ctx
            .net
            .pending
            .get_mut(&conn)
            .and_then(|c| c.local.as_mut())
        {
            local.pre_nick = None;
        }
        return Ok(());
    }

    if ctx.net.counts.local_users as u32 >= ctx.net.tunables.max_clients {
        ctx.net.pending.remove(&conn);
        ctx.out
            .close_error(conn, "Sorry, server is full - try later");
        return Ok(());
    }

    let Some(mut client) = ctx.net.pending.remove(&conn) else {
        return Ok(());
    };
    ctx.net.counts.unknown = ctx.net.counts.unknown.saturating_sub(1);

    // materialize the user from the scratch block
    let uid = ctx.net.uid_gen.next_uid();
    {
        let local = client.local.as_mut().expect("pending clients are local");
        client.name = local.pre_nick.take().unwrap_or_default();
        client.username = local.pre_user.take().unwrap_or_default();
        client.info = local.pre_gecos.take().unwrap_or_default();
        local.pre_pass = None;
    }
    client.status = Status::Client;
    client.id = uid.clone();
    client.ts = ctx.now;
    client.servptr = Some(ctx.net.me.clone());
    client.hopcount = 0;

    // bans bite before the welcome
    if let Some(verdict) = ctx.bans.check_client(&client) {
        let reason = verdict.reason().to_string();
        ctx.out.numeric(
            conn,
            &ctx.net.me_name.clone(),
            Numeric::ERR_YOUREBANNEDCREEP,
            &client.name.clone(),
            &[&format!("You are banned from this server- {reason}")],
        );
        ctx.out.close_error(conn, &format!("Banned: {reason}"));
        return Ok(());
    }

    let nick = client.name.clone();
    ctx.net.add_user(client);
    ctx.net.bind_conn(conn, &uid);

    info!(nick = %nick, uid = %uid, "local user registered");
    welcome_burst(ctx, conn, &uid);
    super::introduce_to_peers(ctx, &uid, None);

    let mut payload = HookPayload::new().with_client(&uid);
    ctx.hooks.call(H_NEW_LOCAL_USER, &mut payload);
    Ok(())
}

/// The 001-005 welcome, LUSERS, and the no-MOTD marker.
pub fn welcome_burst(ctx: &mut Ctx<'_>, conn: ConnId, uid: &str) {
    let Some(client) = ctx.net.find_id(uid) else {
        return;
    };
    let nick = client.name.clone();
    let mask = client.mask();
    let me = ctx.net.me_name.clone();
    let network = ctx.cfg.serverinfo.network_name.clone();

    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_WELCOME,
        &nick,
        &[&format!("Welcome to the {network} Internet Relay Chat Network {mask}")],
    );
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_YOURHOST,
        &nick,
        &[&format!("Your host is {me}, running version ferricd-0.4")],
    );
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_CREATED,
        &nick,
        &["This server was created at an unremarkable time"],
    );
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_MYINFO,
        &nick,
        &[&me, "ferricd-0.4", "DQRSZagiowz", "CFILPQbcefgijklmnopqrstvz", "bkloveqjfI"],
    );

    let chanmodes = ctx.modes.isupport_chanmodes();
    let extbans = ctx.extbans.supported();
    for tokens in [
        format!(
            "CHANTYPES=#& EXCEPTS INVEX CHANMODES={chanmodes} CHANLIMIT=#&:{} PREFIX=(ov)@+ MAXLIST=bqeI:{}",
            ctx.cfg.channel.max_chans_per_user, ctx.cfg.channel.max_bans
        ),
        format!(
            "NETWORK={network} NICKLEN=30 CHANNELLEN=50 TOPICLEN=390 CASEMAPPING=rfc1459 MAXTARGETS={} EXTBAN=$,{extbans}",
            ctx.cfg.channel.max_targets
        ),
    ] {
        let mut args: Vec<&str> = tokens.split(' ').collect();
        args.push("are supported by this server");
        ctx.out.numeric(conn, &me, Numeric::RPL_ISUPPORT, &nick, &args);
    }

    ctx.out
        .numeric(conn, &me, Numeric::RPL_YOURID, &nick, &[uid, "your unique ID"]);

    lusers_reply(ctx, conn, &nick);

    ctx.out.numeric(
        conn,
        &me,
        Numeric::ERR_NOMOTD,
        &nick,
        &["MOTD File is missing"],
    );
}

/// The LUSERS block, shared by the welcome burst and the LUSERS command.
pub fn lusers_reply(ctx: &mut Ctx<'_>, conn: ConnId, nick: &str) {
    let me = ctx.net.me_name.clone();
    let counts = ctx.net.counts.clone();
    let visible = counts.global_users.saturating_sub(counts.invisible);

    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_LUSERCLIENT,
        nick,
        &[&format!(
            "There are {} users and {} invisible on {} servers",
            visible, counts.invisible, counts.global_servers
        )],
    );
    if counts.opers > 0 {
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_LUSEROP,
            nick,
            &[&counts.opers.to_string(), "IRC Operators online"],
        );
    }
    if counts.unknown > 0 {
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_LUSERUNKNOWN,
            nick,
            &[&counts.unknown.to_string(), "unknown connection(s)"],
        );
    }
    let channels = ctx.net.channel_count();
    if channels > 0 {
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_LUSERCHANNELS,
            nick,
            &[&channels.to_string(), "channels formed"],
        );
    }
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_LUSERME,
        nick,
        &[&format!(
            "I have {} clients and {} servers",
            counts.local_users, counts.local_servers
        )],
    );
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_LOCALUSERS,
        nick,
        &[
            &counts.local_users.to_string(),
            &counts.max_local.to_string(),
            &format!(
                "Current local users {}, max {}",
                counts.local_users, counts.max_local
            ),
        ],
    );
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_GLOBALUSERS,
        nick,
        &[
            &counts.global_users.to_string(),
            &counts.max_global.to_string(),
            &format!(
                "Current global users {}, max {}",
                counts.global_users, counts.max_global
            ),
        ],
    );
}
