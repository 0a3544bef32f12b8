//! MODE and TMODE: user modes here, channel modes via the mode engine.

use ferric_proto::{Numeric, line::format_line, valid_channel_name};

use crate::chmode::{ModeSource, channel_mode};
use crate::dispatch::{Ctx, Request, Source};
use crate::error::{HandlerError, HandlerResult};
use crate::hooks::{H_UMODE_CHANGED, HookPayload};
use crate::route::sendto_server;

/// MODE from a user (local or remote) or a server.
pub fn m_mode(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let target = req.arg(0).unwrap_or("");

    if valid_channel_name(target) {
        return channel_mode_entry(ctx, req, target, &req.args[1..], None);
    }
    user_mode(ctx, req, target)
}

/// TMODE: TS-guarded channel mode from the network.
pub fn ms_tmode(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let ts: i64 = req
        .arg(0)
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| HandlerError::Protocol("bad TS in TMODE".to_string()))?;
    let chname = req.arg(1).unwrap_or("");
    channel_mode_entry(ctx, req, chname, &req.args[2..], Some(ts))
}

fn channel_mode_entry(
    ctx: &mut Ctx<'_>,
    req: &Request<'_>,
    chname: &str,
    mode_args: &[&str],
    ts_guard: Option<i64>,
) -> HandlerResult {
    let Some(channel) = ctx.net.get_channel(chname) else {
        return match &req.source {
            Source::User(uid) if ctx.net.find_id(uid).map(|c| c.is_local()).unwrap_or(false) => {
                Err(HandlerError::no_such_channel(chname))
            }
            _ => Ok(()),
        };
    };

    if let Some(ts) = ts_guard {
        if ts > channel.ts {
            return Ok(()); // stale TMODE from a link that lost the channel
        }
    }

    // bare MODE #chan is a query
    if mode_args.is_empty() {
        if let Source::User(uid) = &req.source {
            let uid = uid.clone();
            let is_member = channel.members.contains_key(&uid);
            let modes = if is_member {
                channel.modes.to_wire(true)
            } else {
                channel.modes.to_wire(false)
            };
            let display = channel.name.clone();
            let ts = channel.ts.to_string();
            let mut args: Vec<&str> = vec![&display];
            args.extend(modes.split(' '));
            ctx.reply(&uid, Numeric::RPL_CHANNELMODEIS, &args);
            ctx.reply(&uid, Numeric::RPL_CREATIONTIME, &[&display, &ts]);
        }
        return Ok(());
    }

    let source = match &req.source {
        Source::User(uid) => {
            if ctx.net.find_id(uid).map(|c| c.is_local()).unwrap_or(false) {
                ModeSource::LocalUser { uid: uid.clone() }
            } else {
                ModeSource::RemoteUser { uid: uid.clone() }
            }
        }
        Source::Server(sid) => ModeSource::Server { id: sid.clone() },
        Source::Pending(_) => return Ok(()),
    };

    channel_mode(
        ctx.net,
        ctx.out,
        ctx.extbans,
        ctx.modes,
        &ctx.cfg.channel,
        &source,
        chname,
        mode_args,
        ctx.now,
    )
}

/// User mode query and change.
fn user_mode(ctx: &mut Ctx<'_>, req: &Request<'_>, target: &str) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };

    // users may only touch themselves
    let target_is_self = ctx
        .net
        .resolve(target)
        .map(|c| c.id == uid)
        .unwrap_or(false);
    if !target_is_self {
        let is_local = ctx.net.find_id(&uid).map(|c| c.is_local()).unwrap_or(false);
        return if is_local {
            Err(HandlerError::Numeric(
                Numeric::ERR_USERSDONTMATCH,
                vec!["Can't change mode for other users".to_string()],
            ))
        } else {
            Ok(())
        };
    }

    let Some(delta) = req.arg(1) else {
        let modes = ctx
            .net
            .find_id(&uid)
            .map(|c| c.umodes.to_string_public())
            .unwrap_or_default();
        ctx.reply(&uid, Numeric::RPL_UMODEIS, &[&modes]);
        return Ok(());
    };

    let (is_local, was_oper, before) = {
        let Some(client) = ctx.net.find_id(&uid) else {
            return Ok(());
        };
        (
            client.is_local(),
            client.umodes.oper,
            client.umodes.clone(),
        )
    };

    // apply with local policy: no self-granting of oper/admin/service
    let mut proposed = before.clone();
    proposed.apply_delta(delta);
    if is_local {
        if proposed.oper && !before.oper {
            proposed.oper = false;
        }
        if proposed.admin && !before.admin {
            proposed.admin = false;
        }
        if proposed.service && !before.service {
            proposed.service = false;
        }
        if delta.chars().any(|c| !"+-iowagDQSZRs".contains(c)) {
            ctx.reply(
                &uid,
                Numeric::ERR_UMODEUNKNOWNFLAG,
                &["Unknown MODE flag"],
            );
        }
    }
    if proposed == before {
        return Ok(());
    }

    if was_oper && !proposed.oper {
        ctx.net.counts.opers = ctx.net.counts.opers.saturating_sub(1);
        if let Some(client) = ctx.net.find_id_mut(&uid) {
            if let Some(local) = client.local.as_mut() {
                local.oper = None;
            }
        }
    }
    if proposed.invisible != before.invisible {
        if proposed.invisible {
            ctx.net.counts.invisible += 1;
        } else {
            ctx.net.counts.invisible = ctx.net.counts.invisible.saturating_sub(1);
        }
    }

    let rendered_delta = delta.to_string();
    if let Some(client) = ctx.net.find_id_mut(&uid) {
        client.umodes = proposed;
    }

    // echo to the user, propagate to the network
    let (mask, nick, conn) = {
        let Some(client) = ctx.net.find_id(&uid) else {
            return Ok(());
        };
        (client.mask(), client.name.clone(), client.from_conn)
    };
    if is_local {
        if let Some(conn) = conn {
            ctx.out.send_raw(
                conn,
                format_line(Some(&mask), "MODE", &[&nick, &rendered_delta]),
            );
        }
    }
    let skip = if is_local { None } else { Some(req.conn) };
    let wire = format_line(Some(&uid), "MODE", &[&uid, &rendered_delta]);
    sendto_server(ctx.net, ctx.out, skip, ferric_proto::Capab::none(), ferric_proto::Capab::none(), &wire);

    let mut payload = HookPayload::new().with_client(&uid).with_data(&rendered_delta);
    ctx.hooks.call(H_UMODE_CHANGED, &mut payload);
    Ok(())
}
