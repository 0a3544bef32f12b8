//! Channel membership commands.

use ferric_proto::{Capab, Numeric, irc_to_lower, line::format_line, valid_channel_name};

use crate::chmode::{JoinDenial, can_join};
use crate::dispatch::{Ctx, Request, Source};
use crate::error::{HandlerError, HandlerResult};
use crate::flood;
use crate::hooks::{H_CAN_CREATE_CHANNEL, H_CAN_KICK, H_CLIENT_JOIN, HookPayload};
use crate::route::{sendto_channel_local, sendto_realops, sendto_server};
use crate::state::{Membership, Topic};
use crate::ts6::{TsVerdict, resolve_channel_ts};

/// Longest forward chain a single JOIN will follow.
const FORWARD_DEPTH: usize = 4;

/// JOIN from a local user.
pub fn m_join(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let targets = req.arg(0).unwrap_or("");
    let keys: Vec<&str> = req.arg(1).map(|k| k.split(',').collect()).unwrap_or_default();

    if targets == "0" {
        let channels: Vec<String> = ctx
            .net
            .find_id(&uid)
            .map(|c| c.channels.iter().cloned().collect())
            .unwrap_or_default();
        for chname in channels {
            part_channel(ctx, &uid, &chname, "Left all channels");
        }
        return Ok(());
    }

    for (i, chname) in targets.split(',').enumerate() {
        let key = keys.get(i).copied();
        join_one(ctx, &uid, chname, key, 0)?;
    }
    Ok(())
}

fn join_one(
    ctx: &mut Ctx<'_>,
    uid: &str,
    chname: &str,
    key: Option<&str>,
    depth: usize,
) -> HandlerResult {
    if depth > FORWARD_DEPTH {
        return Ok(());
    }
    if !valid_channel_name(chname) {
        return Err(HandlerError::Numeric(
            Numeric::ERR_BADCHANNAME,
            vec![chname.to_string(), "Illegal channel name".to_string()],
        ));
    }

    let (is_oper, exempt_resv, nchannels) = {
        let Some(client) = ctx.net.find_id(uid) else {
            return Ok(());
        };
        if client.channels.contains(&irc_to_lower(chname)) {
            return Ok(());
        }
        (
            client.is_oper(),
            client.flags.exempt_resv,
            client.channels.len(),
        )
    };

    if !is_oper && !exempt_resv {
        if let Some(resv) = ctx.net.find_resv(chname) {
            let reason = resv.reason.clone();
            sendto_realops(
                ctx.net,
                ctx.out,
                'S',
                &format!("User attempting to join reserved channel {chname} ({reason})"),
            );
            return Err(HandlerError::Numeric(
                Numeric::ERR_BADCHANNAME,
                vec![chname.to_string(), format!("Channel is reserved ({reason})")],
            ));
        }
    }

    let limit = ctx.cfg.channel.max_chans_per_user * if is_oper { 3 } else { 1 };
    if nchannels >= limit {
        return Err(HandlerError::Numeric(
            Numeric::ERR_TOOMANYCHANNELS,
            vec![
                chname.to_string(),
                "You have joined too many channels".to_string(),
            ],
        ));
    }

    let exists = ctx.net.get_channel(chname).is_some();
    if exists {
        if crate::splitmode::refuse_join(ctx.net, ctx.cfg.channel.no_join_on_split) && !is_oper {
            return Err(split_unavailable(chname));
        }
        let verdict = {
            let channel = ctx.net.get_channel(chname).unwrap();
            let client = ctx.net.find_id(uid).unwrap();
            can_join(
                ctx.net,
                ctx.extbans,
                &ctx.cfg.channel,
                channel,
                client,
                key,
                ctx.now,
            )
        };
        match verdict {
            Ok(()) => {}
            Err(JoinDenial::Forward(target)) => {
                let nick = ctx
                    .net
                    .find_id(uid)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                let conn = ctx.net.find_id(uid).and_then(|c| c.from_conn);
                if let Some(conn) = conn {
                    let me = ctx.net.me_name.clone();
                    ctx.out.numeric(
                        conn,
                        &me,
                        Numeric::ERR_LINKCHANNEL,
                        &nick,
                        &[chname, &target, "Forwarding to another channel"],
                    );
                }
                return join_one(ctx, uid, &target, None, depth + 1);
            }
            Err(denial) => {
                return Err(HandlerError::Numeric(
                    denial.numeric(),
                    vec![chname.to_string(), denial.text().to_string()],
                ));
            }
        }
        if let Some(channel) = ctx.net.get_channel_mut(chname) {
            channel.throttle_admit(ctx.now);
        }
        add_local_member(ctx, uid, chname, false);
    } else {
        if crate::splitmode::refuse_create(ctx.net, ctx.cfg.channel.no_create_on_split) && !is_oper
        {
            return Err(split_unavailable(chname));
        }
        let mut payload = HookPayload::new().with_client(uid).with_target(chname);
        if !ctx.hooks.approves(H_CAN_CREATE_CHANNEL, &mut payload) {
            return Err(split_unavailable(chname));
        }
        let channel = ctx.net.create_channel(chname, ctx.now);
        channel.modes.no_external = true;
        channel.modes.topic_limit = true;
        add_local_member(ctx, uid, chname, true);
    }
    Ok(())
}

fn split_unavailable(chname: &str) -> HandlerError {
    HandlerError::Numeric(
        Numeric::ERR_UNAVAILRESOURCE,
        vec![
            chname.to_string(),
            "Channel is temporarily unavailable (network split)".to_string(),
        ],
    )
}

/// Insert a local member, emit JOIN/topic/names, propagate.
fn add_local_member(ctx: &mut Ctx<'_>, uid: &str, chname: &str, creator: bool) {
    let (mask, nick, conn) = {
        let Some(client) = ctx.net.find_id_mut(uid) else {
            return;
        };
        client.channels.insert(irc_to_lower(chname));
        (client.mask(), client.name.clone(), client.from_conn)
    };

    let (display, ts) = {
        let Some(channel) = ctx.net.get_channel_mut(chname) else {
            return;
        };
        channel.members.insert(
            uid.to_string(),
            Membership {
                op: creator,
                ..Default::default()
            },
        );
        channel.local_members.insert(uid.to_string());
        channel.invites.remove(uid);
        (channel.name.clone(), channel.ts)
    };

    if let Some(local) = ctx.net.find_id_mut(uid).and_then(|c| c.local.as_mut()) {
        local.who_credits = local.who_credits.saturating_add(1);
    }

    let join_line = format_line(Some(&mask), "JOIN", &[&display]);
    sendto_channel_local(ctx.net, ctx.out, chname, None, false, &join_line);

    // topic and names for the newcomer
    if let Some(conn) = conn {
        let me = ctx.net.me_name.clone();
        let topic = ctx.net.get_channel(chname).and_then(|c| c.topic.clone());
        if let Some(topic) = topic {
            ctx.out
                .numeric(conn, &me, Numeric::RPL_TOPIC, &nick, &[&display, &topic.text]);
            ctx.out.numeric(
                conn,
                &me,
                Numeric::RPL_TOPICWHOTIME,
                &nick,
                &[&display, &topic.set_by, &topic.set_at.to_string()],
            );
        }
        names_reply(ctx, conn, &nick, chname);
    }

    // wire: creators SJOIN (so the TS travels with the op), others JOIN
    let ts = ts.to_string();
    let wire = if creator {
        format_line(
            Some(&ctx.net.me.clone()),
            "SJOIN",
            &[&ts, &display, "+nt", &format!("@{uid}")],
        )
    } else {
        format_line(Some(uid), "JOIN", &[&ts, &display, "+"])
    };
    sendto_server(ctx.net, ctx.out, None, Capab::none(), Capab::none(), &wire);

    let mut payload = HookPayload::new().with_client(uid).with_target(chname);
    ctx.hooks.call(H_CLIENT_JOIN, &mut payload);
}

/// JOIN from a remote user: `JOIN <ts> <chan> +`.
pub fn mc_join(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    if req.arg(0) == Some("0") {
        let channels: Vec<String> = ctx
            .net
            .find_id(&uid)
            .map(|c| c.channels.iter().cloned().collect())
            .unwrap_or_default();
        for chname in channels {
            part_channel(ctx, &uid, &chname, "Left all channels");
        }
        return Ok(());
    }

    let their_ts: i64 = req.arg(0).and_then(|t| t.parse().ok()).unwrap_or(0);
    let chname = req.arg(1).unwrap_or("");
    if !valid_channel_name(chname) {
        return Ok(());
    }

    match ctx.net.get_channel(chname).map(|c| c.ts) {
        None => {
            ctx.net.create_channel(chname, their_ts);
        }
        Some(ours) => {
            if let (TsVerdict::Adopt, _) = resolve_channel_ts(ours, their_ts) {
                if ours != their_ts {
                    // a plain JOIN with a lower TS still wins arbitration
                    super::sjoin::join_takeover(ctx, chname, their_ts);
                }
            }
        }
    }

    let already = ctx
        .net
        .find_id(&uid)
        .map(|c| c.channels.contains(&irc_to_lower(chname)))
        .unwrap_or(true);
    if !already {
        let (mask, is_local) = ctx
            .net
            .find_id_mut(&uid)
            .map(|c| {
                c.channels.insert(irc_to_lower(chname));
                (c.mask(), c.is_local())
            })
            .unwrap_or_default();
        if let Some(channel) = ctx.net.get_channel_mut(chname) {
            channel.members.insert(uid.clone(), Membership::default());
            if is_local {
                channel.local_members.insert(uid.clone());
            }
        }
        let join_line = format_line(Some(&mask), "JOIN", &[chname]);
        sendto_channel_local(ctx.net, ctx.out, chname, Some(&uid), false, &join_line);
    }

    let ts = ctx
        .net
        .get_channel(chname)
        .map(|c| c.ts)
        .unwrap_or(their_ts)
        .to_string();
    let wire = format_line(Some(&uid), "JOIN", &[&ts, chname, "+"]);
    sendto_server(ctx.net, ctx.out, Some(req.conn), Capab::none(), Capab::none(), &wire);
    Ok(())
}

/// PART, local or remote.
pub fn m_part(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let reason = req.arg(1).unwrap_or("").to_string();
    for chname in req.arg(0).unwrap_or("").split(',') {
        let member = ctx
            .net
            .find_id(&uid)
            .map(|c| c.channels.contains(&irc_to_lower(chname)))
            .unwrap_or(false);
        if !member {
            let is_local = ctx.net.find_id(&uid).map(|c| c.is_local()).unwrap_or(false);
            if is_local {
                return Err(HandlerError::not_on_channel(chname));
            }
            continue;
        }
        // spambot accounting on local part
        let spam_hit = {
            let spam_num = ctx.net.tunables.spam_num;
            let spam_time = ctx.net.tunables.spam_time;
            ctx.net
                .find_id_mut(&uid)
                .map(|c| flood::note_join_leave(c, spam_num, spam_time, ctx.now))
                .unwrap_or(false)
        };
        if spam_hit {
            let mask = ctx.net.find_id(&uid).map(|c| c.mask()).unwrap_or_default();
            sendto_realops(
                ctx.net,
                ctx.out,
                'b',
                &format!("Possible spambot {mask} (rapid join/parts)"),
            );
        }
        part_channel(ctx, &uid, chname, &reason);
    }
    Ok(())
}

/// The mechanics of leaving one channel, with broadcasts.
pub fn part_channel(ctx: &mut Ctx<'_>, uid: &str, chname: &str, reason: &str) {
    let Some(client) = ctx.net.find_id(uid) else {
        return;
    };
    let mask = client.mask();
    let display = ctx
        .net
        .get_channel(chname)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| chname.to_string());

    let line = if reason.is_empty() {
        format_line(Some(&mask), "PART", &[&display])
    } else {
        format_line(Some(&mask), "PART", &[&display, reason])
    };
    sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);

    super::sjoin::remove_member(ctx, chname, uid);

    let wire = if reason.is_empty() {
        format_line(Some(uid), "PART", &[&display])
    } else {
        format_line(Some(uid), "PART", &[&display, reason])
    };
    let skip = ctx.net.find_id(uid).and_then(|c| {
        if c.is_local() { None } else { c.from_conn }
    });
    sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::none(), &wire);
}

/// KICK, any origin. Local kickers must hold ops; the network is
/// authoritative for the rest.
pub fn m_kick(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let chname = req.arg(0).unwrap_or("");
    let target_name = req.arg(1).unwrap_or("");

    let kicker_uid = req.source.user_uid().map(str::to_string);
    let is_local_user = kicker_uid
        .as_deref()
        .and_then(|uid| ctx.net.find_id(uid))
        .map(|c| c.is_local())
        .unwrap_or(false);

    let Some(channel) = ctx.net.get_channel(chname) else {
        return if is_local_user {
            Err(HandlerError::no_such_channel(chname))
        } else {
            Ok(())
        };
    };
    let display = channel.name.clone();

    if is_local_user {
        let uid = kicker_uid.as_deref().unwrap_or_default();
        let Some(membership) = channel.members.get(uid) else {
            return Err(HandlerError::not_on_channel(chname));
        };
        if !membership.op {
            return Err(HandlerError::chanop_needed(chname));
        }
    }

    let Some(target) = ctx.net.resolve(target_name) else {
        return if is_local_user {
            Err(HandlerError::no_such_nick(target_name))
        } else {
            Ok(())
        };
    };
    let target_uid = target.id.clone();
    let target_nick = target.name.clone();
    let target_member = ctx
        .net
        .get_channel(chname)
        .map(|c| c.members.contains_key(&target_uid))
        .unwrap_or(false);
    if !target_member {
        return if is_local_user {
            Err(HandlerError::Numeric(
                Numeric::ERR_USERNOTINCHANNEL,
                vec![
                    target_nick,
                    chname.to_string(),
                    "They aren't on that channel".to_string(),
                ],
            ))
        } else {
            Ok(())
        };
    }

    let reason = req.arg(2).unwrap_or(&target_nick).to_string();

    if is_local_user {
        let mut payload = HookPayload::new()
            .with_client(kicker_uid.as_deref().unwrap_or_default())
            .with_target(&target_uid)
            .with_data(chname);
        if !ctx.hooks.approves(H_CAN_KICK, &mut payload) {
            return Ok(());
        }
        // services are not kickable by mortals
        if ctx
            .net
            .find_id(&target_uid)
            .map(|c| c.umodes.service)
            .unwrap_or(false)
        {
            return Err(HandlerError::Numeric(
                Numeric::ERR_ISCHANSERVICE,
                vec![
                    target_nick,
                    chname.to_string(),
                    "Cannot kick or deop a network service".to_string(),
                ],
            ));
        }
    }

    let kicker_prefix = match &req.source {
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
    let kicker_wire = req.source.id().unwrap_or(&ctx.net.me).to_string();

    let line = format_line(
        Some(&kicker_prefix),
        "KICK",
        &[&display, &target_nick, &reason],
    );
    sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);

    super::sjoin::remove_member(ctx, chname, &target_uid);

    let wire = format_line(
        Some(&kicker_wire),
        "KICK",
        &[&display, &target_uid, &reason],
    );
    let skip = if is_local_user { None } else { Some(req.conn) };
    sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::none(), &wire);
    Ok(())
}

/// TOPIC query or set.
pub fn m_topic(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let chname = req.arg(0).unwrap_or("");
    let is_local = ctx.net.find_id(&uid).map(|c| c.is_local()).unwrap_or(false);

    let Some(channel) = ctx.net.get_channel(chname) else {
        return if is_local {
            Err(HandlerError::no_such_channel(chname))
        } else {
            Ok(())
        };
    };
    let display = channel.name.clone();

    let Some(new_text) = req.arg(1) else {
        // query
        if let Some(conn) = ctx.net.find_id(&uid).and_then(|c| c.from_conn) {
            let nick = ctx.net.find_id(&uid).map(|c| c.name.clone()).unwrap_or_default();
            let me = ctx.net.me_name.clone();
            match ctx.net.get_channel(chname).and_then(|c| c.topic.clone()) {
                Some(topic) => {
                    ctx.out
                        .numeric(conn, &me, Numeric::RPL_TOPIC, &nick, &[&display, &topic.text]);
                    ctx.out.numeric(
                        conn,
                        &me,
                        Numeric::RPL_TOPICWHOTIME,
                        &nick,
                        &[&display, &topic.set_by, &topic.set_at.to_string()],
                    );
                }
                None => {
                    ctx.out.numeric(
                        conn,
                        &me,
                        Numeric::RPL_NOTOPIC,
                        &nick,
                        &[&display, "No topic is set"],
                    );
                }
            }
        }
        return Ok(());
    };

    // set
    if is_local {
        let member = channel.members.get(&uid).cloned();
        let Some(member) = member else {
            return Err(HandlerError::not_on_channel(chname));
        };
        if channel.modes.topic_limit && !member.op {
            return Err(HandlerError::chanop_needed(chname));
        }
    }

    let setter = ctx
        .net
        .find_id(&uid)
        .map(|c| c.mask())
        .unwrap_or_else(|| uid.clone());
    let text: String = new_text.chars().take(390).collect();

    if let Some(channel) = ctx.net.get_channel_mut(chname) {
        channel.topic = if text.is_empty() {
            None
        } else {
            Some(Topic {
                text: text.clone(),
                set_by: setter.clone(),
                set_at: ctx.now,
            })
        };
    }

    let line = format_line(Some(&setter), "TOPIC", &[&display, &text]);
    sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);

    let wire = format_line(Some(&uid), "TOPIC", &[&display, &text]);
    let skip = if is_local { None } else { Some(req.conn) };
    sendto_server(ctx.net, ctx.out, skip, Capab::none(), Capab::none(), &wire);
    Ok(())
}

/// INVITE.
pub fn m_invite(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let target_name = req.arg(0).unwrap_or("");
    let chname = req.arg(1).unwrap_or("");
    let is_local = ctx.net.find_id(&uid).map(|c| c.is_local()).unwrap_or(false);

    let Some(target) = ctx.net.resolve(target_name) else {
        return if is_local {
            Err(HandlerError::no_such_nick(target_name))
        } else {
            Ok(())
        };
    };
    let target_uid = target.id.clone();
    let target_nick = target.name.clone();
    let target_local = target.is_local();
    let target_conn = target.from_conn;

    let Some(channel) = ctx.net.get_channel(chname) else {
        return if is_local {
            Err(HandlerError::no_such_channel(chname))
        } else {
            Ok(())
        };
    };
    let display = channel.name.clone();

    if is_local {
        let Some(member) = channel.members.get(&uid) else {
            return Err(HandlerError::not_on_channel(chname));
        };
        if channel.members.contains_key(&target_uid) {
            return Err(HandlerError::Numeric(
                Numeric::ERR_USERONCHANNEL,
                vec![
                    target_nick.clone(),
                    display.clone(),
                    "is already on channel".to_string(),
                ],
            ));
        }
        if channel.modes.invite_only && !member.op {
            return Err(HandlerError::chanop_needed(chname));
        }
    }

    if let Some(channel) = ctx.net.get_channel_mut(chname) {
        channel.invites.insert(target_uid.clone());
    }

    let inviter_mask = ctx
        .net
        .find_id(&uid)
        .map(|c| c.mask())
        .unwrap_or_else(|| uid.clone());

    if target_local {
        if let Some(conn) = target_conn {
            ctx.out.send_raw(
                conn,
                format_line(Some(&inviter_mask), "INVITE", &[&target_nick, &display]),
            );
        }
    } else if let Some(route) = target_conn {
        let ts = ctx
            .net
            .get_channel(chname)
            .map(|c| c.ts)
            .unwrap_or(ctx.now)
            .to_string();
        ctx.out.send_raw(
            route,
            format_line(Some(&uid), "INVITE", &[&target_uid, &display, &ts]),
        );
    }

    if is_local {
        ctx.reply(
            &uid,
            Numeric::RPL_INVITING,
            &[&target_nick, &display],
        );
    }
    Ok(())
}

/// NAMES.
pub fn m_names(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let Some(conn) = ctx.net.find_id(&uid).and_then(|c| c.from_conn) else {
        return Ok(());
    };
    let nick = ctx.net.find_id(&uid).map(|c| c.name.clone()).unwrap_or_default();

    if let Some(chname) = req.arg(0) {
        names_reply(ctx, conn, &nick, chname.split(',').next().unwrap_or(chname));
    } else {
        let me = ctx.net.me_name.clone();
        ctx.out
            .numeric(conn, &me, Numeric::RPL_ENDOFNAMES, &nick, &["*", "End of /NAMES list"]);
    }
    Ok(())
}

/// The 353/366 pair for one channel.
pub fn names_reply(ctx: &mut Ctx<'_>, conn: crate::state::ConnId, nick: &str, chname: &str) {
    let me = ctx.net.me_name.clone();
    let Some(channel) = ctx.net.get_channel(chname) else {
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_ENDOFNAMES,
            nick,
            &[chname, "End of /NAMES list"],
        );
        return;
    };
    let display = channel.name.clone();
    let flag = if channel.modes.secret { "@" } else { "=" };

    let mut names: Vec<String> = channel
        .members
        .iter()
        .filter_map(|(uid, m)| {
            ctx.net
                .find_id(uid)
                .map(|c| format!("{}{}", if m.op { "@" } else if m.voice { "+" } else { "" }, c.name))
        })
        .collect();
    names.sort_unstable();

    for chunk in names.chunks(12) {
        let list = chunk.join(" ");
        ctx.out.numeric(
            conn,
            &me,
            Numeric::RPL_NAMREPLY,
            nick,
            &[flag, &display, &list],
        );
    }
    ctx.out.numeric(
        conn,
        &me,
        Numeric::RPL_ENDOFNAMES,
        nick,
        &[&display, "End of /NAMES list"],
    );
}
