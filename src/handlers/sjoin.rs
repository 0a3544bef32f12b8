//! SJOIN and friends: channel state reconciliation on server links.
//!
//! SJOIN carries `(ts, channel, modes, members)` and is where channel TS
//! arbitration happens: lower TS wins wholesale, equal TS merges, higher
//! TS arrives stripped. BMASK syncs list modes in bulk, TB topics, MLOCK
//! the mode lock.

use ferric_proto::{Capab, line::format_line};
use tracing::debug;

use crate::chmode::strip_all_modes;
use crate::dispatch::{Ctx, Request, Source};
use crate::error::{HandlerError, HandlerResult};
use crate::route::{sendto_channel_local, sendto_server};
use crate::state::{ListKind, Membership};
use crate::ts6::{TsVerdict, merge_key, merge_limit, resolve_channel_ts};

/// SJOIN from a peer.
pub fn ms_sjoin(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Source::Server(source_sid) = &req.source else {
        return Err(HandlerError::Protocol("SJOIN from non-server".to_string()));
    };
    let source_sid = source_sid.clone();

    let their_ts: i64 = req
        .arg(0)
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| HandlerError::Protocol("bad TS in SJOIN".to_string()))?;
    let chname = req.arg(1).unwrap_or("");
    let mode_str = req.arg(2).unwrap_or("+");
    let member_arg = req.args.last().copied().unwrap_or("");
    let mode_args: Vec<&str> = req.args[3..req.args.len().saturating_sub(1)].to_vec();

    if !ferric_proto::valid_channel_name(chname) {
        return Ok(());
    }

    let existing_ts = ctx.net.get_channel(chname).map(|c| c.ts);
    let (verdict, bogus) = match existing_ts {
        None => (TsVerdict::Adopt, false),
        Some(ours) => resolve_channel_ts(ours, their_ts),
    };
    if bogus {
        debug!(channel = %chname, their_ts, "bogus TS on SJOIN, sane side preferred");
    }

    let keep_their_modes = matches!(verdict, TsVerdict::Adopt | TsVerdict::Merge);
    let me_name = ctx.net.me_name.clone();

    // lower TS wipes us first
    let mut state_changed = false;
    if existing_ts.is_some() && verdict == TsVerdict::Adopt && existing_ts != Some(their_ts) {
        let old_ts = existing_ts.unwrap_or_default();
        takeover(ctx, chname, &source_sid, their_ts, mode_str, &mode_args);
        state_changed = true;
        let notice = format_line(
            Some(&me_name),
            "NOTICE",
            &[chname, &format!("*** Notice -- TS for {chname} changed from {old_ts} to {their_ts}")],
        );
        sendto_channel_local(ctx.net, ctx.out, chname, None, false, &notice);
    } else if existing_ts.is_none() {
        let channel = ctx.net.create_channel(chname, their_ts);
        channel.ts = their_ts;
        apply_sjoin_modes(ctx, chname, mode_str, &mode_args);
        state_changed = true;
    } else if verdict == TsVerdict::Merge {
        state_changed = merge_modes(ctx, chname, mode_str, &mode_args);
    }

    // membership
    let mut new_members: Vec<(String, bool, bool)> = Vec::new();
    for token in member_arg.split_ascii_whitespace() {
        let (op, voice, uid) = parse_member_token(token);
        let Some(client) = ctx.net.find_id(uid) else {
            continue; // ghost in the member list; its QUIT/KILL is in flight
        };
        if client.channels.contains(&ferric_proto::irc_to_lower(chname)) {
            continue;
        }
        let (op, voice) = if keep_their_modes { (op, voice) } else { (false, false) };
        new_members.push((uid.to_string(), op, voice));
    }

    if new_members.is_empty() && !state_changed {
        // idempotent replay: nothing to do, nothing to say
        return Ok(());
    }

    for (uid, op, voice) in &new_members {
        join_remote_member(ctx, chname, uid, *op, *voice);
    }

    // rebuild and relay
    let settled_ts = ctx.net.get_channel(chname).map(|c| c.ts).unwrap_or(their_ts);
    let settled_modes = if keep_their_modes {
        ctx.net
            .get_channel(chname)
            .map(|c| c.modes.to_wire(true))
            .unwrap_or_else(|| "+".to_string())
    } else {
        "+".to_string()
    };
    let members_out: Vec<String> = member_arg
        .split_ascii_whitespace()
        .map(|token| {
            if keep_their_modes {
                token.to_string()
            } else {
                let (_, _, uid) = parse_member_token(token);
                uid.to_string()
            }
        })
        .collect();
    let ts_str = settled_ts.to_string();
    let member_list = members_out.join(" ");
    let mode_parts: Vec<&str> = settled_modes.split(' ').collect();
    let mut args: Vec<&str> = vec![&ts_str, chname];
    args.extend(&mode_parts);
    args.push(&member_list);
    let wire = format_line(Some(&source_sid), "SJOIN", &args);
    sendto_server(ctx.net, ctx.out, Some(req.conn), Capab::none(), Capab::none(), &wire);
    Ok(())
}

/// A plain TS-carrying JOIN with a lower TS triggers the same wipe an
/// SJOIN would, with no arriving modes.
pub fn join_takeover(ctx: &mut Ctx<'_>, chname: &str, their_ts: i64) {
    let old_ts = ctx.net.get_channel(chname).map(|c| c.ts).unwrap_or_default();
    let me = ctx.net.me.clone();
    takeover(ctx, chname, &me, their_ts, "+", &[]);
    let me_name = ctx.net.me_name.clone();
    let notice = format_line(
        Some(&me_name),
        "NOTICE",
        &[chname, &format!("*** Notice -- TS for {chname} changed from {old_ts} to {their_ts}")],
    );
    sendto_channel_local(ctx.net, ctx.out, chname, None, false, &notice);
}

/// A lower-TS SJOIN arrived: wipe modes, lists, mlock, statuses; adopt
/// the arriving TS and modes; optionally kick everyone off for
/// split-ride protection.
fn takeover(
    ctx: &mut Ctx<'_>,
    chname: &str,
    source_sid: &str,
    their_ts: i64,
    mode_str: &str,
    mode_args: &[&str],
) {
    let source_name = ctx
        .net
        .find_id(source_sid)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| source_sid.to_string());

    // list entries go away too; show the removals before the wipe
    let list_removals: Vec<(char, String)> = ctx
        .net
        .get_channel(chname)
        .map(|channel| {
            [
                crate::state::ListKind::Ban,
                crate::state::ListKind::Except,
                crate::state::ListKind::Invex,
                crate::state::ListKind::Quiet,
            ]
            .into_iter()
            .flat_map(|kind| {
                channel
                    .list(kind)
                    .iter()
                    .map(move |e| (kind.letter(), e.mask.clone()))
            })
            .collect()
        })
        .unwrap_or_default();
    for chunk in list_removals.chunks(crate::chmode::MAXMODEPARAMS) {
        let mut letters = String::from("-");
        let mut masks: Vec<&str> = Vec::new();
        for (letter, mask) in chunk {
            letters.push(*letter);
            masks.push(mask.as_str());
        }
        let mut args = vec![chname, letters.as_str()];
        args.extend(masks);
        let line = format_line(Some(&source_name), "MODE", &args);
        sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);
    }

    // visible diff for the wiped channel modes
    if let Some(diff) = strip_all_modes(ctx.net, chname) {
        let parts: Vec<&str> = diff.split(' ').collect();
        let mut args = vec![chname];
        args.extend(parts);
        let line = format_line(Some(&source_name), "MODE", &args);
        sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);
    }

    // deop/devoice the surviving members, visibly
    let demotions: Vec<(String, String, bool, bool)> = ctx
        .net
        .get_channel(chname)
        .map(|channel| {
            channel
                .members
                .iter()
                .filter(|(_, m)| m.op || m.voice)
                .filter_map(|(uid, m)| {
                    ctx.net
                        .find_id(uid)
                        .map(|c| (uid.clone(), c.name.clone(), m.op, m.voice))
                })
                .collect()
        })
        .unwrap_or_default();

    if let Some(channel) = ctx.net.get_channel_mut(chname) {
        for member in channel.members.values_mut() {
            member.op = false;
            member.voice = false;
            member.invalidate();
        }
        channel.bump_bants();
        channel.ts = their_ts;
    }

    for chunk in demotions.chunks(crate::chmode::MAXMODEPARAMS) {
        let mut letters = String::from("-");
        let mut names: Vec<&str> = Vec::new();
        for (_, nick, op, voice) in chunk {
            if *op {
                letters.push('o');
                names.push(nick.as_str());
            }
            if *voice {
                letters.push('v');
                names.push(nick.as_str());
            }
        }
        if letters.len() > 1 {
            let mut args = vec![chname, letters.as_str()];
            args.extend(names);
            let line = format_line(Some(&source_name), "MODE", &args);
            sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);
        }
    }

    // split-ride defense: a rekeyed or newly-invite-only takeover may
    // evict the local membership outright
    let arriving_locks = mode_str.contains('i') || mode_str.contains('k');
    if ctx.cfg.channel.kick_on_split_riding && arriving_locks {
        let victims: Vec<(String, String)> = ctx
            .net
            .get_channel(chname)
            .map(|channel| {
                channel
                    .local_members
                    .iter()
                    .filter_map(|uid| {
                        ctx.net.find_id(uid).map(|c| (uid.clone(), c.mask()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        for (uid, mask) in victims {
            let kick = format_line(
                Some(&ctx.net.me_name.clone()),
                "KICK",
                &[chname, &mask, "Net Rider"],
            );
            sendto_channel_local(ctx.net, ctx.out, chname, None, false, &kick);
            remove_member(ctx, chname, &uid);
            let wire = format_line(
                Some(&ctx.net.me.clone()),
                "KICK",
                &[chname, &uid, "Net Rider"],
            );
            sendto_server(ctx.net, ctx.out, None, Capab::none(), Capab::none(), &wire);
        }
        // if that emptied the channel it is re-created at the lower TS
        if let Some(channel) = ctx.net.get_channel_mut(chname) {
            channel.ts = their_ts;
        }
    }

    apply_sjoin_modes(ctx, chname, mode_str, mode_args);
}

/// Set arriving SJOIN modes directly (no authorization, no emission to
/// peers; local MODE diffs are the caller's concern on takeovers).
fn apply_sjoin_modes(ctx: &mut Ctx<'_>, chname: &str, mode_str: &str, mode_args: &[&str]) {
    let Some(channel) = ctx.net.get_channel_mut(chname) else {
        return;
    };
    let mut args = mode_args.iter();
    for c in mode_str.chars() {
        match c {
            '+' => {}
            'i' => channel.modes.invite_only = true,
            'm' => channel.modes.moderated = true,
            'n' => channel.modes.no_external = true,
            'p' => channel.modes.private = true,
            's' => channel.modes.secret = true,
            't' => channel.modes.topic_limit = true,
            'c' => channel.modes.no_colour = true,
            'C' => channel.modes.no_ctcp = true,
            'r' => channel.modes.reg_only = true,
            'z' => channel.modes.op_moderate = true,
            'Q' => channel.modes.no_forward_to = true,
            'F' => channel.modes.free_forward = true,
            'L' => channel.modes.large_banlist = true,
            'P' => channel.modes.permanent = true,
            'l' => {
                channel.modes.limit = args.next().and_then(|a| a.parse().ok());
            }
            'j' => {
                channel.modes.throttle = args.next().and_then(|a| {
                    let (j, s) = a.split_once(':')?;
                    Some((j.parse().ok()?, s.parse().ok()?))
                });
            }
            'k' => {
                channel.modes.key = args.next().map(|s| s.to_string());
            }
            'f' => {
                channel.modes.forward = args.next().map(|s| s.to_string());
            }
            _ => {}
        }
    }
}

/// Equal-TS merge: union of flags (SJOIN modes are set-only), lexical
/// minimum for key and forward, maximum for limit and throttle.
/// Returns whether anything actually changed.
fn merge_modes(ctx: &mut Ctx<'_>, chname: &str, mode_str: &str, mode_args: &[&str]) -> bool {
    let Some(ours) = ctx.net.get_channel(chname).map(|c| c.modes.clone()) else {
        return false;
    };
    apply_sjoin_modes(ctx, chname, mode_str, mode_args);
    let Some(channel) = ctx.net.get_channel_mut(chname) else {
        return false;
    };
    // apply overwrote parametered modes with theirs; arbitrate each
    let theirs = channel.modes.clone();
    channel.modes.key = merge_key(ours.key.as_deref(), theirs.key.as_deref());
    channel.modes.forward = merge_key(ours.forward.as_deref(), theirs.forward.as_deref());
    channel.modes.limit = merge_limit(ours.limit, theirs.limit);
    channel.modes.throttle = match (ours.throttle, theirs.throttle) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    channel.modes != ours
}

fn parse_member_token(token: &str) -> (bool, bool, &str) {
    let mut op = false;
    let mut voice = false;
    let mut rest = token;
    loop {
        if let Some(r) = rest.strip_prefix('@') {
            op = true;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('+') {
            voice = true;
            rest = r;
        } else {
            break;
        }
    }
    (op, voice, rest)
}

/// Insert a remote member and show the JOIN (and any status) locally.
fn join_remote_member(ctx: &mut Ctx<'_>, chname: &str, uid: &str, op: bool, voice: bool) {
    let Some(client) = ctx.net.find_id_mut(uid) else {
        return;
    };
    client.channels.insert(ferric_proto::irc_to_lower(chname));
    let mask = client.mask();
    let nick = client.name.clone();
    let is_local = client.is_local();

    if let Some(channel) = ctx.net.get_channel_mut(chname) {
        channel.members.insert(
            uid.to_string(),
            Membership {
                op,
                voice,
                ..Default::default()
            },
        );
        if is_local {
            channel.local_members.insert(uid.to_string());
        }
    }

    let join = format_line(Some(&mask), "JOIN", &[chname]);
    sendto_channel_local(ctx.net, ctx.out, chname, Some(uid), false, &join);

    if op || voice {
        let source = ctx.net.me_name.clone();
        let mut letters = String::from("+");
        let mut names: Vec<&str> = Vec::new();
        if op {
            letters.push('o');
            names.push(&nick);
        }
        if voice {
            letters.push('v');
            names.push(&nick);
        }
        let mut args = vec![chname, letters.as_str()];
        args.extend(names);
        let line = format_line(Some(&source), "MODE", &args);
        sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);
    }
}

/// Drop one membership with no emission (callers emit).
pub fn remove_member(ctx: &mut Ctx<'_>, chname: &str, uid: &str) {
    if let Some(channel) = ctx.net.get_channel_mut(chname) {
        channel.members.remove(uid);
        channel.local_members.remove(uid);
    }
    if let Some(client) = ctx.net.find_id_mut(uid) {
        client.channels.remove(&ferric_proto::irc_to_lower(chname));
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

/// BMASK: bulk list-mode sync. Only accepted at matching TS.
pub fn ms_bmask(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let ts: i64 = req.arg(0).and_then(|t| t.parse().ok()).unwrap_or(0);
    let chname = req.arg(1).unwrap_or("");
    let letter = req.arg(2).and_then(|s| s.chars().next()).unwrap_or('b');
    let masks = req.arg(3).unwrap_or("");

    let Some(kind) = ListKind::from_letter(letter) else {
        return Ok(());
    };
    let setter = ctx
        .net
        .find_id(req.source.id().unwrap_or(""))
        .map(|c| c.name.clone())
        .unwrap_or_else(|| ctx.net.me_name.clone());
    let now = ctx.now;

    let Some(channel) = ctx.net.get_channel_mut(chname) else {
        return Ok(());
    };
    if channel.ts != ts {
        return Ok(()); // stale burst from a link that lost arbitration
    }

    let mut changed = false;
    for raw in masks.split_ascii_whitespace() {
        let (mask, forward) = match raw.rsplit_once('$') {
            Some((m, f)) if kind == ListKind::Ban && ferric_proto::valid_channel_name(f) => {
                (m.to_string(), Some(f.to_string()))
            }
            _ => (raw.to_string(), None),
        };
        let list = channel.list_mut(kind);
        if list.iter().any(|e| crate::chmode::same_mask(&e.mask, &mask)) {
            continue;
        }
        list.push(crate::state::ListEntry {
            mask,
            set_by: setter.clone(),
            set_at: now,
            forward,
        });
        changed = true;
    }
    if changed {
        channel.bump_bants();
        // relay onward, capability-gated the same way the burst is
        let (cap_yes, cap_no) = match kind {
            ListKind::Except => (Capab::EX, Capab::none()),
            ListKind::Invex => (Capab::IE, Capab::none()),
            _ => (Capab::none(), Capab::none()),
        };
        let source = req.source.id().unwrap_or(&ctx.net.me).to_string();
        let letter = letter.to_string();
        let wire = format_line(
            Some(&source),
            "BMASK",
            &[&ts.to_string(), chname, &letter, masks],
        );
        sendto_server(ctx.net, ctx.out, Some(req.conn), cap_yes, cap_no, &wire);
    }
    Ok(())
}

/// TB: burst topic. The older topic-TS wins; an unset topic always loses.
pub fn ms_tb(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let chname = req.arg(0).unwrap_or("");
    let topic_ts: i64 = req.arg(1).and_then(|t| t.parse().ok()).unwrap_or(0);
    let (set_by, text) = match req.args.len() {
        0..=2 => return Ok(()),
        3 => (ctx.net.me_name.clone(), req.arg(2).unwrap_or("").to_string()),
        _ => (
            req.arg(2).unwrap_or("").to_string(),
            req.arg(3).unwrap_or("").to_string(),
        ),
    };

    let accept = ctx
        .net
        .get_channel(chname)
        .map(|c| match &c.topic {
            None => true,
            Some(t) => topic_ts < t.set_at,
        })
        .unwrap_or(false);
    if !accept {
        return Ok(());
    }

    let changed = ctx
        .net
        .get_channel(chname)
        .map(|c| c.topic.as_ref().map(|t| t.text.as_str()) != Some(text.as_str()))
        .unwrap_or(true);

    if let Some(channel) = ctx.net.get_channel_mut(chname) {
        channel.topic = Some(crate::state::Topic {
            text: text.clone(),
            set_by: set_by.clone(),
            set_at: topic_ts,
        });
    }

    if changed {
        let source_name = ctx
            .net
            .find_id(req.source.id().unwrap_or(""))
            .map(|c| c.name.clone())
            .unwrap_or_else(|| ctx.net.me_name.clone());
        let line = format_line(Some(&source_name), "TOPIC", &[chname, &text]);
        sendto_channel_local(ctx.net, ctx.out, chname, None, false, &line);
    }

    let source = req.source.id().unwrap_or(&ctx.net.me).to_string();
    let wire = format_line(
        Some(&source),
        "TB",
        &[chname, &topic_ts.to_string(), &set_by, &text],
    );
    sendto_server(ctx.net, ctx.out, Some(req.conn), Capab::TB, Capab::none(), &wire);
    Ok(())
}

/// MLOCK from an authoritative server.
pub fn ms_mlock(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let ts: i64 = req.arg(0).and_then(|t| t.parse().ok()).unwrap_or(0);
    let chname = req.arg(1).unwrap_or("");
    let letters = req.arg(2).unwrap_or("");

    let Some(channel) = ctx.net.get_channel_mut(chname) else {
        return Ok(());
    };
    if ts > channel.ts {
        return Ok(()); // the setter lost a TS battle it has not seen yet
    }
    channel.mlock = if letters.is_empty() {
        None
    } else {
        Some(letters.to_string())
    };

    let source = req.source.id().unwrap_or(&ctx.net.me).to_string();
    let wire = format_line(
        Some(&source),
        "MLOCK",
        &[&ts.to_string(), chname, letters],
    );
    sendto_server(ctx.net, ctx.out, Some(req.conn), Capab::MLOCK, Capab::none(), &wire);
    Ok(())
}
