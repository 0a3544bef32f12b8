//! K/D/X-lines and reserved names: local oper commands plus their
//! cluster-propagated ENCAP twins.
//!
//! Adding a ban sweeps the live population immediately; removal only
//! stops future matches. Every mutation is mirrored to the external ban
//! store through the write-only line protocol.

use ferric_proto::{Capab, line::format_line};

use crate::bandb::BanKind;
use crate::dispatch::{Ctx, Request};
use crate::error::{HandlerError, HandlerResult};
use crate::route::{sendto_realops, sendto_server};

use super::exit::{Propagate, exit_user};

/// Sweep after a ban lands: exit every local user it now matches.
fn sweep(ctx: &mut Ctx<'_>) {
    let victims = ctx.bans.revalidate(ctx.net);
    for (uid, reason) in victims {
        let nick = ctx
            .net
            .find_id(&uid)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        sendto_realops(ctx.net, ctx.out, 'k', &format!("KLINE active for {nick}"));
        exit_user(ctx, &uid, &format!("Banned: {reason}"), Propagate::Quit, None);
    }
}

fn oper_setter(ctx: &Ctx<'_>, req: &Request<'_>) -> (String, String) {
    req.source
        .user_uid()
        .and_then(|uid| ctx.net.find_id(uid))
        .map(|c| (c.id.clone(), c.mask()))
        .unwrap_or_default()
}

/// Cluster fan-out: `:uid ENCAP * <VERB> <args...>`.
fn cluster(ctx: &mut Ctx<'_>, source_uid: &str, verb: &str, args: &[&str]) {
    let mut all = vec!["*", verb];
    all.extend_from_slice(args);
    let wire = format_line(Some(source_uid), "ENCAP", &all);
    sendto_server(ctx.net, ctx.out, None, Capab::ENCAP, Capab::none(), &wire);
}

/// Split a `[duration] mask reason` argument form.
fn parse_timed<'a>(req: &Request<'a>) -> (Option<i64>, &'a str, &'a str) {
    match req.arg(0).and_then(|a| a.parse::<i64>().ok()) {
        Some(minutes) => (
            Some(minutes * 60),
            req.arg(1).unwrap_or(""),
            req.arg(2).unwrap_or("No reason"),
        ),
        None => (None, req.arg(0).unwrap_or(""), req.arg(1).unwrap_or("No reason")),
    }
}

/// KLINE [time] <user@host> :<reason>
pub fn mo_kline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    require(ctx, req, |p| p.kline)?;
    let (duration, mask, reason) = parse_timed(req);
    let Some((user, host)) = mask.split_once('@') else {
        return Err(HandlerError::Numeric(
            ferric_proto::Numeric::ERR_NOSUCHNICK,
            vec![mask.to_string(), "Invalid user@host".to_string()],
        ));
    };

    let (setter_uid, setter_mask) = oper_setter(ctx, req);
    let expires = duration.map(|d| ctx.now + d);
    ctx.bans.add_kline(user, host, reason, ctx.now, expires);
    ctx.bandb
        .add(BanKind::Kline, user, host, &setter_mask, ctx.now, reason);
    sendto_realops(
        ctx.net,
        ctx.out,
        'k',
        &format!("{setter_mask} added K-Line for [{user}@{host}] [{reason}]"),
    );
    sweep(ctx);

    let time = duration.unwrap_or(0).to_string();
    cluster(ctx, &setter_uid, "KLINE", &[&time, user, host, reason]);
    Ok(())
}

/// ENCAP-carried KLINE: `<time> <user> <host> :<reason>`.
pub fn me_kline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let duration: i64 = req.arg(0).and_then(|a| a.parse().ok()).unwrap_or(0);
    let user = req.arg(1).unwrap_or("*");
    let host = req.arg(2).unwrap_or("");
    let reason = req.arg(3).unwrap_or("No reason");
    if host.is_empty() {
        return Ok(());
    }
    let expires = (duration > 0).then(|| ctx.now + duration);
    ctx.bans.add_kline(user, host, reason, ctx.now, expires);
    let setter = req.source.id().unwrap_or("remote").to_string();
    ctx.bandb.add(BanKind::Kline, user, host, &setter, ctx.now, reason);
    sendto_realops(
        ctx.net,
        ctx.out,
        'k',
        &format!("Remote K-Line for [{user}@{host}] [{reason}]"),
    );
    sweep(ctx);
    Ok(())
}

/// UNKLINE <user@host>
pub fn mo_unkline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    require(ctx, req, |p| p.unkline)?;
    let mask = req.arg(0).unwrap_or("");
    let Some((user, host)) = mask.split_once('@') else {
        return Ok(());
    };
    let (setter_uid, setter_mask) = oper_setter(ctx, req);
    if ctx.bans.remove_kline(user, host) {
        ctx.bandb.del(BanKind::Kline, user, host);
        sendto_realops(
            ctx.net,
            ctx.out,
            'k',
            &format!("{setter_mask} removed K-Line for [{user}@{host}]"),
        );
    }
    cluster(ctx, &setter_uid, "UNKLINE", &[user, host]);
    Ok(())
}

pub fn me_unkline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let user = req.arg(0).unwrap_or("*");
    let host = req.arg(1).unwrap_or("");
    if ctx.bans.remove_kline(user, host) {
        ctx.bandb.del(BanKind::Kline, user, host);
    }
    Ok(())
}

/// DLINE [time] <ip> :<reason>
pub fn mo_dline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    require(ctx, req, |p| p.kline)?;
    let (duration, mask, reason) = parse_timed(req);
    let (setter_uid, setter_mask) = oper_setter(ctx, req);
    let expires = duration.map(|d| ctx.now + d);
    ctx.bans.add_dline(mask, reason, ctx.now, expires);
    ctx.bandb
        .add(BanKind::Dline, mask, "", &setter_mask, ctx.now, reason);
    sendto_realops(
        ctx.net,
        ctx.out,
        'k',
        &format!("{setter_mask} added D-Line for [{mask}] [{reason}]"),
    );
    sweep(ctx);
    let time = duration.unwrap_or(0).to_string();
    cluster(ctx, &setter_uid, "DLINE", &[&time, mask, reason]);
    Ok(())
}

pub fn me_dline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let duration: i64 = req.arg(0).and_then(|a| a.parse().ok()).unwrap_or(0);
    let mask = req.arg(1).unwrap_or("");
    let reason = req.arg(2).unwrap_or("No reason");
    if mask.is_empty() {
        return Ok(());
    }
    let expires = (duration > 0).then(|| ctx.now + duration);
    ctx.bans.add_dline(mask, reason, ctx.now, expires);
    sweep(ctx);
    Ok(())
}

/// UNDLINE <ip>
pub fn mo_undline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    require(ctx, req, |p| p.unkline)?;
    let mask = req.arg(0).unwrap_or("");
    let (setter_uid, setter_mask) = oper_setter(ctx, req);
    if ctx.bans.remove_dline(mask) {
        ctx.bandb.del(BanKind::Dline, mask, "");
        sendto_realops(
            ctx.net,
            ctx.out,
            'k',
            &format!("{setter_mask} removed D-Line for [{mask}]"),
        );
    }
    cluster(ctx, &setter_uid, "UNDLINE", &[mask]);
    Ok(())
}

pub fn me_undline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let mask = req.arg(0).unwrap_or("");
    if ctx.bans.remove_dline(mask) {
        ctx.bandb.del(BanKind::Dline, mask, "");
    }
    Ok(())
}

/// XLINE <gecos-mask> :<reason>
pub fn mo_xline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    require(ctx, req, |p| p.xline)?;
    let mask = req.arg(0).unwrap_or("");
    let reason = req.arg(1).unwrap_or("No reason");
    let (setter_uid, setter_mask) = oper_setter(ctx, req);
    ctx.bans.add_xline(mask, reason, ctx.now);
    ctx.bandb
        .add(BanKind::Xline, mask, "", &setter_mask, ctx.now, reason);
    sendto_realops(
        ctx.net,
        ctx.out,
        'k',
        &format!("{setter_mask} added X-Line for [{mask}] [{reason}]"),
    );
    sweep(ctx);
    cluster(ctx, &setter_uid, "XLINE", &["0", mask, "2", reason]);
    Ok(())
}

pub fn me_xline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let mask = req.arg(1).unwrap_or("");
    let reason = req.arg(3).unwrap_or("No reason");
    if mask.is_empty() {
        return Ok(());
    }
    ctx.bans.add_xline(mask, reason, ctx.now);
    sweep(ctx);
    Ok(())
}

/// UNXLINE <gecos-mask>
pub fn mo_unxline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    require(ctx, req, |p| p.xline)?;
    let mask = req.arg(0).unwrap_or("");
    let (setter_uid, setter_mask) = oper_setter(ctx, req);
    if ctx.bans.remove_xline(mask) {
        ctx.bandb.del(BanKind::Xline, mask, "");
        sendto_realops(
            ctx.net,
            ctx.out,
            'k',
            &format!("{setter_mask} removed X-Line for [{mask}]"),
        );
    }
    cluster(ctx, &setter_uid, "UNXLINE", &[mask]);
    Ok(())
}

pub fn me_unxline(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let mask = req.arg(0).unwrap_or("");
    if ctx.bans.remove_xline(mask) {
        ctx.bandb.del(BanKind::Xline, mask, "");
    }
    Ok(())
}

/// RESV <mask> :<reason> - reserve a nick or channel mask.
pub fn mo_resv(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    require(ctx, req, |p| p.resv)?;
    let mask = req.arg(0).unwrap_or("");
    let reason = req.arg(1).unwrap_or("No reason");
    let (setter_uid, setter_mask) = oper_setter(ctx, req);
    if ctx.net.add_resv(mask, reason, &setter_mask) {
        ctx.bandb
            .add(BanKind::Resv, mask, "", &setter_mask, ctx.now, reason);
        sendto_realops(
            ctx.net,
            ctx.out,
            'k',
            &format!("{setter_mask} added RESV for [{mask}] [{reason}]"),
        );
    }
    cluster(ctx, &setter_uid, "RESV", &["0", mask, "0", reason]);
    Ok(())
}

pub fn me_resv(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let mask = req.arg(1).unwrap_or("");
    let reason = req.arg(3).unwrap_or("No reason");
    if mask.is_empty() {
        return Ok(());
    }
    let setter = req.source.id().unwrap_or("remote").to_string();
    if ctx.net.add_resv(mask, reason, &setter) {
        ctx.bandb.add(BanKind::Resv, mask, "", &setter, ctx.now, reason);
    }
    Ok(())
}

/// UNRESV <mask>
pub fn mo_unresv(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    require(ctx, req, |p| p.resv)?;
    let mask = req.arg(0).unwrap_or("");
    let (setter_uid, setter_mask) = oper_setter(ctx, req);
    if ctx.net.remove_resv(mask) {
        ctx.bandb.del(BanKind::Resv, mask, "");
        sendto_realops(
            ctx.net,
            ctx.out,
            'k',
            &format!("{setter_mask} removed RESV for [{mask}]"),
        );
    }
    cluster(ctx, &setter_uid, "UNRESV", &[mask]);
    Ok(())
}

pub fn me_unresv(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let mask = req.arg(0).unwrap_or("");
    if ctx.net.remove_resv(mask) {
        ctx.bandb.del(BanKind::Resv, mask, "");
    }
    Ok(())
}

fn require<F: Fn(&crate::config::OperPrivs) -> bool>(
    ctx: &Ctx<'_>,
    req: &Request<'_>,
    f: F,
) -> HandlerResult {
    let allowed = req
        .source
        .user_uid()
        .and_then(|uid| ctx.net.find_id(uid))
        .map(|c| !c.is_local() || c.has_priv(f))
        .unwrap_or(false);
    if allowed {
        Ok(())
    } else {
        Err(HandlerError::NoPrivileges)
    }
}
