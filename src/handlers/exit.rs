//! Client and server teardown.
//!
//! Every exit runs through here so the bookkeeping is identical no matter
//! who initiated it: hook, channel QUIT broadcast, membership teardown,
//! peer propagation, index removal, and (for locals) the link close.

use ferric_proto::{Capab, line::format_line};
use tracing::info;

use crate::dispatch::{Ctx, Request};
use crate::error::HandlerResult;
use crate::hooks::{H_CLIENT_EXIT, HookPayload};
use crate::route::{sendto_common_channels_local, sendto_realops, sendto_server};
use crate::state::ConnId;

/// QUIT from a local user.
pub fn m_quit(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let reason = req
        .arg(0)
        .map(|r| format!("Quit: {r}"))
        .unwrap_or_else(|| "Client Quit".to_string());
    exit_user(ctx, &uid, &reason, Propagate::Quit, None);
    Ok(())
}

/// QUIT for a remote user, relayed by its server.
pub fn mc_quit(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let reason = req.arg(0).unwrap_or("Client Quit").to_string();
    exit_user(ctx, &uid, &reason, Propagate::Quit, Some(req.conn));
    Ok(())
}

/// How an exit reaches the rest of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagate {
    /// Send `:uid QUIT :reason` to peers.
    Quit,
    /// Peers learn some other way (KILL, SAVE-kill, SQUIT cascade).
    Nothing,
}

/// Remove a user everywhere. The single exit path.
pub fn exit_user(
    ctx: &mut Ctx<'_>,
    uid: &str,
    reason: &str,
    propagate: Propagate,
    skip: Option<ConnId>,
) {
    let Some(client) = ctx.net.find_id(uid) else {
        return;
    };
    if client.flags.dead {
        return;
    }
    let mask = client.mask();
    let is_local = client.is_local();
    let conn = client.from_conn;
    let channels: Vec<String> = client.channels.iter().cloned().collect();

    let mut payload = HookPayload::new().with_client(uid).with_data(reason);
    ctx.hooks.call(H_CLIENT_EXIT, &mut payload);

    // visible QUIT for everyone sharing a channel locally
    let quit_line = format_line(Some(&mask), "QUIT", &[reason]);
    sendto_common_channels_local(ctx.net, ctx.out, uid, false, &quit_line);

    // membership teardown; empty channels die unless +P
    for chname in &channels {
        if let Some(channel) = ctx.net.get_channel_mut(chname) {
            channel.members.remove(uid);
            channel.local_members.remove(uid);
            channel.invites.remove(uid);
        }
        let destroy = ctx
            .net
            .get_channel(chname)
            .map(|c| c.can_destroy())
            .unwrap_or(false);
        if destroy {
            ctx.net.destroy_channel(chname);
        }
    }

    // invitations and accept-list references elsewhere
    let channel_names = ctx.net.channel_names();
    for chname in channel_names {
        if let Some(channel) = ctx.net.get_channel_mut(&chname) {
            channel.invites.remove(uid);
        }
    }
    let ids = ctx.net.client_ids();
    for id in ids {
        if let Some(local) = ctx.net.find_id_mut(&id).and_then(|c| c.local.as_mut()) {
            local.accept.remove(uid);
        }
    }

    if propagate == Propagate::Quit {
        let wire = format_line(Some(uid), "QUIT", &[reason]);
        sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::none(), &wire);
    }

    ctx.net.remove_user(uid);
    ctx.ratelimit.forget(uid);

    if is_local {
        if let Some(conn) = conn {
            ctx.out.close_error(conn, &format!("Closing Link: ({reason})"));
        }
    }
    info!(uid = %uid, reason = %reason, "client exited");
}

/// Apply a KILL to `target`: propagate to peers, then exit the victim
/// locally with the assembled kill reason.
pub fn apply_kill(
    ctx: &mut Ctx<'_>,
    target_uid: &str,
    killer_wire: &str,
    path: &str,
    reason: &str,
    skip: Option<ConnId>,
) {
    let Some(target) = ctx.net.find_id(target_uid) else {
        return;
    };
    let target_is_local = target.is_local();
    let target_conn = target.from_conn;
    let target_nick = target.name.clone();

    let wire = format_line(
        Some(killer_wire),
        "KILL",
        &[target_uid, &format!("{path} ({reason})")],
    );
    sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::none(), &wire);

    if target_is_local {
        if let Some(conn) = target_conn {
            ctx.out.send_raw(
                conn,
                format_line(
                    Some(&ctx.net.me_name.clone()),
                    "KILL",
                    &[&target_nick, &format!("{path} ({reason})")],
                ),
            );
        }
    }

    exit_user(
        ctx,
        target_uid,
        &format!("Killed ({reason})"),
        Propagate::Nothing,
        skip,
    );
}

/// Remove a server subtree. `skip` is the link the SQUIT arrived on;
/// peers on every other link get the SQUIT relayed.
pub fn exit_server(ctx: &mut Ctx<'_>, sid: &str, reason: &str, skip: Option<ConnId>) {
    let Some(server) = ctx.net.find_id(sid) else {
        return;
    };
    let server_name = server.name.clone();
    let parent_name = server
        .servptr
        .as_ref()
        .and_then(|p| ctx.net.find_id(p))
        .map(|p| p.name.clone())
        .unwrap_or_else(|| ctx.net.me_name.clone());
    let was_local = server.is_local();
    let conn = server.from_conn;

    // netsplit QUIT reason all downstream users share
    let split_reason = format!("{parent_name} {server_name}");

    let subtree = ctx.net.subtree_of(sid);
    let victims: Vec<String> = ctx
        .net
        .clients()
        .filter(|c| {
            c.is_user()
                && c.servptr
                    .as_ref()
                    .map(|p| subtree.contains(p))
                    .unwrap_or(false)
        })
        .map(|c| c.id.clone())
        .collect();

    for uid in &victims {
        exit_user(ctx, uid, &split_reason, Propagate::Nothing, skip);
    }
    for dead_sid in &subtree {
        ctx.net.remove_server(dead_sid);
    }

    let wire = format_line(Some(&ctx.net.me.clone()), "SQUIT", &[sid, reason]);
    sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::none(), &wire);

    sendto_realops(
        ctx.net,
        ctx.out,
        'x',
        &format!("Server {server_name} split from {parent_name} ({reason})"),
    );

    if was_local {
        if let Some(conn) = conn {
            ctx.out.close_error(conn, reason);
        }
    }
    crate::splitmode::evaluate(ctx.net);
    info!(server = %server_name, users = victims.len(), reason = %reason, "server exited");
}
