//! Nick changes and nick-collision resolution.
//!
//! Local changes are policy-checked; remote changes that land on an
//! occupied nick go through the TS arbitration in [`crate::ts6`], with
//! SAVE preferred over KILL whenever both sides can honor it.

use ferric_proto::{Capab, Numeric, irc_eq, line::format_line, valid::clean_nick};

use crate::dispatch::{Ctx, Request};
use crate::error::{HandlerError, HandlerResult};
use crate::flood;
use crate::route::{sendto_common_channels_local, sendto_realops, sendto_server};
use crate::state::{ConnId, SAVE_TS};
use crate::ts6::{NickWinner, resolve_nick_collision};

use super::exit::{Propagate, exit_user};

/// NICK from a registered local user.
pub fn m_nick(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let Some(new_nick) = req.arg(0) else {
        return Err(HandlerError::Numeric(
            Numeric::ERR_NONICKNAMEGIVEN,
            vec!["No nickname given".to_string()],
        ));
    };

    if !clean_nick(new_nick) {
        return Err(HandlerError::Numeric(
            Numeric::ERR_ERRONEUSNICKNAME,
            vec![new_nick.to_string(), "Erroneous nickname".to_string()],
        ));
    }

    let (current, is_oper, exempt_resv) = {
        let client = ctx.net.find_id(&uid).ok_or(HandlerError::NotRegistered)?;
        (
            client.name.clone(),
            client.is_oper(),
            client.flags.exempt_resv,
        )
    };

    if !is_oper && !exempt_resv {
        if let Some(resv) = ctx.net.find_resv(new_nick) {
            return Err(HandlerError::Numeric(
                Numeric::ERR_UNAVAILRESOURCE,
                vec![
                    new_nick.to_string(),
                    format!("Nick/channel is temporarily unavailable ({})", resv.reason),
                ],
            ));
        }
    }

    let case_change = irc_eq(&current, new_nick);
    if !case_change {
        if let Some(holder) = ctx.net.find_name(new_nick) {
            if holder.id != uid {
                return Err(HandlerError::Numeric(
                    Numeric::ERR_NICKNAMEINUSE,
                    vec![new_nick.to_string(), "Nickname is already in use".to_string()],
                ));
            }
        }

        let allowed = {
            let client = ctx.net.find_id_mut(&uid).ok_or(HandlerError::NotRegistered)?;
            flood::nick_change_allowed(
                client,
                ctx.cfg.general.max_nick_changes,
                ctx.cfg.general.nick_flood_time,
                ctx.now,
            )
        };
        if !allowed {
            return Err(HandlerError::Numeric(
                Numeric::ERR_NICKTOOFAST,
                vec![
                    new_nick.to_string(),
                    format!(
                        "Nick change too fast. Please wait {} seconds",
                        ctx.cfg.general.nick_flood_time
                    ),
                ],
            ));
        }
    }

    if current == new_nick {
        return Ok(());
    }
    change_nick(ctx, &uid, new_nick, case_change, None);
    Ok(())
}

/// NICK for a remote user: a nick change relayed by its server.
pub fn mc_nick(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let new_nick = req.arg(0).unwrap_or("");
    let new_ts: i64 = req.arg(1).and_then(|t| t.parse().ok()).unwrap_or(0);

    if !clean_nick(new_nick) {
        // bad nicks from the network get killed back, not argued with
        kill_one_way(ctx, &uid, req.conn, "Bad nickname");
        return Ok(());
    }

    // collision with an existing holder?
    let holder = ctx
        .net
        .find_name(new_nick)
        .filter(|c| c.id != uid)
        .map(|c| {
            (
                c.id.clone(),
                c.ts,
                c.username.clone(),
                c.host.clone(),
            )
        });

    if let Some((holder_uid, holder_ts, holder_user, holder_host)) = holder {
        let (changer_user, changer_host) = ctx
            .net
            .find_id(&uid)
            .map(|c| (c.username.clone(), c.host.clone()))
            .unwrap_or_default();
        let same_userhost =
            irc_eq(&holder_user, &changer_user) && irc_eq(&holder_host, &changer_host);

        match resolve_nick_collision(holder_ts, new_ts, same_userhost) {
            NickWinner::Neither => {
                collide(ctx, &holder_uid, None);
                // the origin must replay this one too, so no skip
                collide(ctx, &uid, None);
                return Ok(());
            }
            NickWinner::Ours => {
                // the holder keeps the nick; the changer is collided,
                // origin included, so both sides converge
                collide(ctx, &uid, None);
                return Ok(());
            }
            NickWinner::Theirs => {
                collide(ctx, &holder_uid, None);
                // fall through and apply the change
            }
        }
    }

    let case_change = ctx
        .net
        .find_id(&uid)
        .map(|c| irc_eq(&c.name, new_nick))
        .unwrap_or(false);
    if let Some(client) = ctx.net.find_id_mut(&uid) {
        if !case_change {
            client.ts = if new_ts > 0 { new_ts } else { ctx.now };
        }
    }
    change_nick_applied(ctx, &uid, new_nick, Some(req.conn));
    Ok(())
}

/// NICK used as a server-to-server user introduction is TS5; those links
/// are not welcome here.
pub fn ms_nick(_ctx: &mut Ctx<'_>, _req: &Request<'_>) -> HandlerResult {
    Err(HandlerError::Protocol(
        "TS5 NICK introduction not supported".to_string(),
    ))
}

/// SAVE from the network: rename the named user to its UID.
pub fn ms_save(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let target = req.arg(0).unwrap_or("");
    let ts: i64 = req.arg(1).and_then(|t| t.parse().ok()).unwrap_or(0);

    let Some(client) = ctx.net.find_id(target) else {
        return Ok(()); // already gone, collision aftermath
    };
    if client.ts != ts {
        return Ok(()); // stale SAVE for an earlier incarnation
    }
    if client.name == client.id {
        return Ok(());
    }
    do_save(ctx, target, Some(req.conn));
    Ok(())
}

/// Can SAVE be used against this client? True when every hop that must
/// replay the rename understands it: the client's own link (or us, for
/// locals, who always do).
pub fn can_save(ctx: &Ctx<'_>, uid: &str) -> bool {
    let Some(client) = ctx.net.find_id(uid) else {
        return false;
    };
    if client.is_local() {
        return true;
    }
    let Some(sid) = client.servptr.as_ref() else {
        return false;
    };
    // the link we route through decides
    let route_sid = ctx
        .net
        .find_id(sid)
        .and_then(|s| s.from_conn)
        .and_then(|conn| ctx.net.conn_owner(conn))
        .unwrap_or(sid);
    ctx.net
        .servers
        .get(route_sid)
        .map(|s| s.capab.has(Capab::SAVE))
        .unwrap_or(false)
}

/// Resolve one collision loser: SAVE when possible, KILL otherwise.
pub fn collide(ctx: &mut Ctx<'_>, uid: &str, skip: Option<ConnId>) {
    let nick = ctx
        .net
        .find_id(uid)
        .map(|c| c.name.clone())
        .unwrap_or_default();
    sendto_realops(
        ctx.net,
        ctx.out,
        'k',
        &format!("Nick collision on {nick}"),
    );
    if can_save(ctx, uid) {
        do_save(ctx, uid, skip);
    } else {
        let me = ctx.net.me.clone();
        super::exit::apply_kill(
            ctx,
            uid,
            &me,
            &ctx.net.me_name.clone(),
            "Nick collision",
            skip,
        );
    }
}

/// Kill toward one link only (for entities we never admitted).
fn kill_one_way(ctx: &mut Ctx<'_>, uid: &str, conn: ConnId, reason: &str) {
    let me = ctx.net.me.clone();
    ctx.out.send_raw(
        conn,
        format_line(Some(&me), "KILL", &[uid, &format!("{} ({reason})", ctx.net.me_name)]),
    );
}

/// Apply a SAVE: rename to UID, sentinel TS, SAVE to capable peers and
/// KILL-rewrite to the rest.
pub fn do_save(ctx: &mut Ctx<'_>, uid: &str, skip: Option<ConnId>) {
    let Some(client) = ctx.net.find_id(uid) else {
        return;
    };
    let old_ts = client.ts;
    let is_local = client.is_local();
    let conn = client.from_conn;
    let nick = client.name.clone();

    // peers that understand SAVE replay the rename themselves
    let save_line = format_line(
        Some(&ctx.net.me.clone()),
        "SAVE",
        &[uid, &old_ts.to_string()],
    );
    sendto_server(ctx.net, ctx.out, skip, Capab::SAVE, Capab::none(), &save_line);
    let kill_line = format_line(
        Some(&ctx.net.me.clone()),
        "KILL",
        &[uid, &format!("{} (Nick collision)", ctx.net.me_name)],
    );
    sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::SAVE, &kill_line);

    if is_local {
        if let Some(conn) = conn {
            let me = ctx.net.me_name.clone();
            ctx.out.numeric(
                conn,
                &me,
                Numeric::RPL_SAVENICK,
                &nick,
                &[uid, "Nick collision, forcing nick change to your unique ID"],
            );
        }
    }

    broadcast_rename_local(ctx, uid, &uid.to_string());
    if let Some(client) = ctx.net.find_id_mut(uid) {
        client.ts = SAVE_TS;
    }
}

/// A policy-approved local nick change: broadcast, rename, propagate.
fn change_nick(
    ctx: &mut Ctx<'_>,
    uid: &str,
    new_nick: &str,
    case_change: bool,
    skip: Option<ConnId>,
) {
    if !case_change {
        if let Some(client) = ctx.net.find_id_mut(uid) {
            client.ts = ctx.now;
        }
    }
    change_nick_applied(ctx, uid, new_nick, skip);
}

/// The mechanics shared by every rename path: local broadcast, index
/// rename, and the wire NICK. TS handling is the caller's business.
fn change_nick_applied(ctx: &mut Ctx<'_>, uid: &str, new_nick: &str, skip: Option<ConnId>) {
    let ts = match ctx.net.find_id(uid) {
        Some(client) => client.ts,
        None => return,
    };
    broadcast_rename_local(ctx, uid, new_nick);
    let wire = format_line(Some(uid), "NICK", &[new_nick, &ts.to_string()]);
    sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::none(), &wire);
}

/// Show a rename to every local user sharing a channel (and the user
/// itself), then move the name index. No peer traffic.
fn broadcast_rename_local(ctx: &mut Ctx<'_>, uid: &str, new_nick: &str) {
    let Some(client) = ctx.net.find_id(uid) else {
        return;
    };
    let old_mask = client.mask();
    let local_line = format_line(Some(&old_mask), "NICK", &[new_nick]);
    sendto_common_channels_local(ctx.net, ctx.out, uid, true, &local_line);
    ctx.net.rename_user(uid, new_nick);
}
