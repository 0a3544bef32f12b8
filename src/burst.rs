//! Netburst emission.
//!
//! On link establishment every known server, user, and channel is
//! replayed to the new peer, capability-aware: EUID vs UID+ENCAP,
//! BMASK lists gated on EX/IE, TB and MLOCK gated on their tokens.
//! The burst ends with PING, which doubles as our end-of-burst marker.

use ferric_proto::{Capab, line::format_line};
use tracing::debug;

use crate::dispatch::Ctx;
use crate::handlers::format_introduction;
use crate::state::{ConnId, ListKind, Status};

/// Members packed per SJOIN line.
const SJOIN_CHUNK: usize = 12;

/// Masks packed per BMASK line.
const BMASK_CHUNK: usize = 10;

/// Send the complete netburst to a freshly-established peer.
pub fn send_netburst(ctx: &mut Ctx<'_>, conn: ConnId) {
    let peer_capab = ctx
        .net
        .conn_owner(conn)
        .and_then(|sid| ctx.net.servers.get(sid))
        .map(|s| s.capab)
        .unwrap_or_default();
    let me_sid = ctx.net.me.clone();
    let flatten = ctx.cfg.serverinfo.flatten_links;

    // --- servers, ours excluded, the new peer excluded ---
    let servers: Vec<(String, String, u32, String, String)> = ctx
        .net
        .clients()
        .filter(|c| c.status == Status::Server)
        .filter(|c| c.from_conn != Some(conn))
        .map(|c| {
            (
                c.name.clone(),
                c.id.clone(),
                c.hopcount,
                c.info.clone(),
                c.servptr.clone().unwrap_or_else(|| me_sid.clone()),
            )
        })
        .collect();
    for (name, sid, hopcount, info, parent) in servers {
        let source = if flatten { me_sid.clone() } else { parent };
        let hop = (hopcount + 1).to_string();
        ctx.out.send_raw(
            conn,
            format_line(Some(&source), "SID", &[&name, &hop, &sid, &info]),
        );
    }

    // --- users ---
    let uids: Vec<String> = ctx
        .net
        .clients()
        .filter(|c| c.is_user() && c.from_conn != Some(conn))
        .map(|c| c.id.clone())
        .collect();
    let has_euid = peer_capab.has(Capab::EUID);
    for uid in &uids {
        if let Some(client) = ctx.net.find_id(uid) {
            for line in format_introduction(client, &me_sid, has_euid) {
                ctx.out.send_raw(conn, line);
            }
        }
        // away states ride behind the introduction
        let away = ctx.net.find_id(uid).and_then(|c| c.away.clone());
        if let Some(away) = away {
            ctx.out
                .send_raw(conn, format_line(Some(uid), "AWAY", &[&away]));
        }
    }

    // --- channels ---
    let channels = ctx.net.channel_names();
    for chname in channels {
        burst_channel(ctx, conn, &chname, peer_capab);
    }

    // end of burst
    ctx.out
        .send_raw(conn, format_line(Some(&me_sid), "PING", &[&me_sid]));
    debug!(users = uids.len(), "netburst sent");
}

fn burst_channel(ctx: &mut Ctx<'_>, conn: ConnId, chname: &str, peer_capab: Capab) {
    let me_sid = ctx.net.me.clone();
    let Some(channel) = ctx.net.get_channel(chname) else {
        return;
    };
    let ts = channel.ts.to_string();
    let name = channel.name.clone();
    let modes = channel.modes.to_wire(true);

    let mut members: Vec<String> = channel
        .members
        .iter()
        .map(|(uid, m)| format!("{}{}", m.prefix(), uid))
        .collect();
    members.sort_unstable();

    let mode_parts: Vec<&str> = modes.split(' ').collect();
    for chunk in members.chunks(SJOIN_CHUNK) {
        let member_list = chunk.join(" ");
        let mut args: Vec<&str> = vec![&ts, &name];
        args.extend(&mode_parts);
        args.push(&member_list);
        ctx.out
            .send_raw(conn, format_line(Some(&me_sid), "SJOIN", &args));
    }

    for (kind, needed) in [
        (ListKind::Ban, Capab::none()),
        (ListKind::Except, Capab::EX),
        (ListKind::Invex, Capab::IE),
        (ListKind::Quiet, Capab::none()),
    ] {
        if needed != Capab::none() && !peer_capab.has(needed) {
            continue;
        }
        let masks: Vec<String> = channel
            .list(kind)
            .iter()
            .map(|e| match &e.forward {
                Some(f) => format!("{}${}", e.mask, f),
                None => e.mask.clone(),
            })
            .collect();
        let letter = kind.letter().to_string();
        for chunk in masks.chunks(BMASK_CHUNK) {
            let mask_list = chunk.join(" ");
            ctx.out.send_raw(
                conn,
                format_line(Some(&me_sid), "BMASK", &[&ts, &name, &letter, &mask_list]),
            );
        }
    }

    if peer_capab.has(Capab::TB) {
        if let Some(topic) = &channel.topic {
            ctx.out.send_raw(
                conn,
                format_line(
                    Some(&me_sid),
                    "TB",
                    &[&name, &topic.set_at.to_string(), &topic.set_by, &topic.text],
                ),
            );
        }
    }

    if peer_capab.has(Capab::MLOCK) {
        if let Some(mlock) = &channel.mlock {
            ctx.out.send_raw(
                conn,
                format_line(Some(&me_sid), "MLOCK", &[&ts, &name, mlock]),
            );
        }
    }
}
