//! Server link handshake and liveness.
//!
//! Inbound links present PASS/CAPAB/SERVER; we answer with our own
//! handshake, SVINFO, and a full netburst. SVINFO polices clock skew.
//! PING doubles as the end-of-burst marker.

use ferric_proto::{Capab, line::format_line, valid_sid};
use tracing::{info, warn};

use crate::dispatch::{Ctx, EngineAction, Request, Source};
use crate::error::{HandlerError, HandlerResult};
use crate::hooks::{H_SERVER_EOB, H_SERVER_INTRODUCED, HookPayload};
use crate::route::{sendto_realops, sendto_server};
use crate::state::{Client, ConnId, Server, Status};

fn pending_conn(req: &Request<'_>) -> ConnId {
    match req.source {
        Source::Pending(conn) => conn,
        _ => req.conn,
    }
}

/// CAPAB from a handshaking link.
pub fn mr_capab(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let conn = pending_conn(req);
    let tokens = req.args.join(" ");
    if let Some(local) = ctx
        .net
        .pending
        .get_mut(&conn)
        .and_then(|c| c.local.as_mut())
    {
        local.pre_capab = Capab::parse(&tokens);
    }
    Ok(())
}

/// SERVER from a handshaking link: the last step before establishment.
pub fn mr_server(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let conn = pending_conn(req);
    let name = req.arg(0).unwrap_or("");
    let description = req.arg(2).unwrap_or("");

    let (pass, sid, capab) = {
        let Some(local) = ctx.net.pending.get(&conn).and_then(|c| c.local.as_ref()) else {
            return Ok(());
        };
        (
            local.pre_pass.clone().unwrap_or_default(),
            local.pre_sid.clone(),
            local.pre_capab,
        )
    };

    let Some(sid) = sid else {
        return Err(HandlerError::Drop(
            "Non-TS6 server handshake (no SID)".to_string(),
        ));
    };
    for required in [Capab::TS6, Capab::QS, Capab::ENCAP] {
        if !capab.has(required) {
            return Err(HandlerError::Drop(format!(
                "Missing required CAPAB ({})",
                required
            )));
        }
    }

    let Some(block) = ctx
        .cfg
        .connects
        .iter()
        .find(|b| b.name.eq_ignore_ascii_case(name))
        .cloned()
    else {
        sendto_realops(
            ctx.net,
            ctx.out,
            'x',
            &format!("Unauthorized server connection attempt from {name}"),
        );
        return Err(HandlerError::Drop("No connect block".to_string()));
    };
    if block.accept_password != pass {
        sendto_realops(
            ctx.net,
            ctx.out,
            'x',
            &format!("Bad password for {name}"),
        );
        return Err(HandlerError::Drop("Bad password".to_string()));
    }
    if let Some(expected) = &block.sid {
        if expected != &sid {
            return Err(HandlerError::Drop(format!(
                "SID mismatch: expected {expected}, got {sid}"
            )));
        }
    }
    if ctx.net.find_id(&sid).is_some() || ctx.net.find_name(name).is_some() {
        return Err(HandlerError::Drop("Server already exists".to_string()));
    }

    server_estab(ctx, conn, name, &sid, description, capab, &block);
    Ok(())
}

/// Promote a handshaking link to an established server and burst.
#[allow(clippy::too_many_arguments)]
fn server_estab(
    ctx: &mut Ctx<'_>,
    conn: ConnId,
    name: &str,
    sid: &str,
    description: &str,
    capab: Capab,
    block: &crate::config::ConnectBlock,
) {
    let was_dialed = ctx
        .net
        .pending
        .get(&conn)
        .map(|c| c.status == Status::Handshake)
        .unwrap_or(false);
    if ctx.net.pending.remove(&conn).is_some() {
        ctx.net.counts.unknown = ctx.net.counts.unknown.saturating_sub(1);
    }

    // our half of the handshake; a dialed-out link sent it already
    if !was_dialed {
        ctx.out.send_raw(
            conn,
            format!("PASS {} TS 6 :{}\r\n", block.send_password, ctx.net.me),
        );
        ctx.out
            .send_raw(conn, format!("CAPAB :{}\r\n", Capab::ours()));
        ctx.out.send_raw(
            conn,
            format!("SERVER {} 1 :{}\r\n", ctx.net.me_name, ctx.net.me_info),
        );
    }
    ctx.out
        .send_raw(conn, format!("SVINFO 6 6 0 :{}\r\n", ctx.now));

    let client = Client {
        status: Status::Server,
        name: name.to_string(),
        id: sid.to_string(),
        username: String::new(),
        host: name.to_string(),
        orig_host: name.to_string(),
        sockhost: String::new(),
        info: description.to_string(),
        umodes: Default::default(),
        flags: Default::default(),
        ts: ctx.now,
        hopcount: 1,
        servptr: Some(ctx.net.me.clone()),
        from_conn: Some(conn),
        away: None,
        account: None,
        certfp: None,
        channels: Default::default(),
        local: Some(crate::state::LocalClient {
            conn: Some(conn),
            ..Default::default()
        }),
    };
    ctx.net
        .add_server(client, Server::new(capab, capab.to_string()));
    ctx.net.bind_conn(conn, sid);

    // tell the rest of the network
    let intro = format_line(
        Some(&ctx.net.me.clone()),
        "SID",
        &[name, "2", sid, description],
    );
    sendto_server(ctx.net, ctx.out, Some(conn), Capab::none(), Capab::none(), &intro);

    sendto_realops(
        ctx.net,
        ctx.out,
        'x',
        &format!("Link with {name}[{sid}] established: ({capab})"),
    );
    info!(server = %name, sid = %sid, "server link established");

    crate::burst::send_netburst(ctx, conn);
    crate::splitmode::evaluate(ctx.net);

    let mut payload = HookPayload::new().with_target(sid);
    ctx.hooks.call(H_SERVER_INTRODUCED, &mut payload);
}

/// SID: a downstream server introduced behind an established link.
pub fn ms_sid(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Source::Server(parent_sid) = &req.source else {
        return Err(HandlerError::Protocol("SID from non-server".to_string()));
    };
    let parent_sid = parent_sid.clone();
    let name = req.arg(0).unwrap_or("");
    let hopcount: u32 = req.arg(1).and_then(|h| h.parse().ok()).unwrap_or(2);
    let sid = req.arg(2).unwrap_or("");
    let description = req.arg(3).unwrap_or("");

    if !valid_sid(sid) {
        return Err(HandlerError::Protocol(format!("Invalid SID {sid}")));
    }
    if ctx.net.find_id(sid).is_some() || ctx.net.find_name(name).is_some() {
        return Err(HandlerError::Protocol(format!(
            "SID/name collision on {name}[{sid}]"
        )));
    }

    let client = Client {
        status: Status::Server,
        name: name.to_string(),
        id: sid.to_string(),
        username: String::new(),
        host: name.to_string(),
        orig_host: name.to_string(),
        sockhost: String::new(),
        info: description.to_string(),
        umodes: Default::default(),
        flags: Default::default(),
        ts: ctx.now,
        hopcount,
        servptr: Some(parent_sid.clone()),
        from_conn: Some(req.conn),
        away: None,
        account: None,
        certfp: None,
        channels: Default::default(),
        local: None,
    };
    ctx.net.add_server(client, Server::default());

    let hop = (hopcount + 1).to_string();
    let source = if ctx.cfg.serverinfo.flatten_links {
        ctx.net.me.clone()
    } else {
        parent_sid.clone()
    };
    let wire = format_line(Some(&source), "SID", &[name, &hop, sid, description]);
    sendto_server(ctx.net, ctx.out, Some(req.conn), Capab::none(), Capab::none(), &wire);

    sendto_realops(
        ctx.net,
        ctx.out,
        'x',
        &format!("Server {name} being introduced by {parent_sid}"),
    );
    crate::splitmode::evaluate(ctx.net);

    let mut payload = HookPayload::new().with_target(sid);
    ctx.hooks.call(H_SERVER_INTRODUCED, &mut payload);
    Ok(())
}

/// SVINFO: TS version and wall-clock comparison.
pub fn ms_svinfo(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Source::Server(sid) = &req.source else {
        return Ok(());
    };
    let sid = sid.clone();
    let ts_current: i32 = req.arg(0).and_then(|v| v.parse().ok()).unwrap_or(0);
    let their_clock: i64 = req.arg(3).and_then(|v| v.parse().ok()).unwrap_or(0);

    if ts_current < 6 {
        return Err(HandlerError::Protocol(format!(
            "Incompatible TS version {ts_current}"
        )));
    }

    let delta = (ctx.now - their_clock).abs();
    let name = ctx
        .net
        .find_id(&sid)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| sid.clone());
    if delta > ctx.cfg.general.ts_max_delta {
        sendto_realops(
            ctx.net,
            ctx.out,
            'x',
            &format!(
                "Link {name} dropped, excessive TS delta ({delta}s); autoconnect disabled"
            ),
        );
        ctx.actions.push(EngineAction::DisableAutoconn(name));
        return Err(HandlerError::Drop(format!("Excessive TS delta ({delta}s)")));
    }
    if delta > ctx.cfg.general.ts_warn_delta {
        warn!(server = %name, delta, "clock skew against peer");
        sendto_realops(
            ctx.net,
            ctx.out,
            'x',
            &format!("Link {name} notable TS delta ({delta}s)"),
        );
    }
    Ok(())
}

/// PING from a local client.
pub fn m_ping(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let token = req.arg(0).unwrap_or("");
    let me = ctx.net.me_name.clone();
    let Some(conn) = req
        .source
        .user_uid()
        .and_then(|uid| ctx.net.find_id(uid))
        .and_then(|c| c.from_conn)
    else {
        return Ok(());
    };
    ctx.out
        .send_raw(conn, format_line(Some(&me), "PONG", &[&me, token]));
    Ok(())
}

/// PING on a server link: answer, or forward toward its destination.
pub fn ms_ping(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let origin = req.arg(0).unwrap_or("");
    let destination = req.arg(1);

    match destination {
        Some(dest) if dest != ctx.net.me && dest != ctx.net.me_name => {
            if let Some(route) = ctx.net.resolve(dest).and_then(|c| c.from_conn) {
                let wire = format_line(
                    req.source.id(),
                    "PING",
                    &[origin, dest],
                );
                ctx.out.send_raw(route, wire);
            }
            Ok(())
        }
        _ => {
            let me = ctx.net.me.clone();
            let reply_to = req.source.id().unwrap_or(origin).to_string();
            ctx.out.send_raw(
                req.conn,
                format_line(Some(&me), "PONG", &[&ctx.net.me_name.clone(), &reply_to]),
            );
            Ok(())
        }
    }
}

/// PONG from a local client: liveness only, the engine tracks activity.
pub fn m_pong(_ctx: &mut Ctx<'_>, _req: &Request<'_>) -> HandlerResult {
    Ok(())
}

/// PONG on a server link: the end-of-burst signal for peers without an
/// explicit EOB capability.
pub fn ms_pong(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Source::Server(sid) = &req.source else {
        return Ok(());
    };
    let sid = sid.clone();

    let newly_finished = {
        match ctx.net.find_id_mut(&sid) {
            Some(server) if !server.flags.eob => {
                server.flags.eob = true;
                true
            }
            _ => false,
        }
    };
    if newly_finished {
        let name = ctx
            .net
            .find_id(&sid)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        sendto_realops(
            ctx.net,
            ctx.out,
            'x',
            &format!("End of burst from {name}"),
        );
        let mut payload = HookPayload::new().with_target(&sid);
        ctx.hooks.call(H_SERVER_EOB, &mut payload);
    }
    Ok(())
}

/// ERROR from an unregistered link.
pub fn mr_error(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let conn = pending_conn(req);
    let text = req.arg(0).unwrap_or("");
    warn!(conn = %conn, error = %text, "ERROR from handshaking link");
    if ctx.net.pending.remove(&conn).is_some() {
        ctx.net.counts.unknown = ctx.net.counts.unknown.saturating_sub(1);
    }
    ctx.out.close_kill(conn);
    Ok(())
}

/// ERROR from an established server link: it is going away.
pub fn ms_error(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let text = req.arg(0).unwrap_or("");
    if let Source::Server(sid) = &req.source {
        let sid = sid.clone();
        sendto_realops(
            ctx.net,
            ctx.out,
            'x',
            &format!("ERROR from server: {text}"),
        );
        super::exit::exit_server(ctx, &sid, &format!("ERROR: {text}"), Some(req.conn));
    }
    Ok(())
}
