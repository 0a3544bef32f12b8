//! ENCAP: the extension tunnel.
//!
//! `ENCAP <mask> <verb> ...` rides the spanning tree to every server
//! matching the mask; servers that do not know the inner verb drop it
//! harmlessly. Locally, the verb is re-dispatched through its command's
//! ENCAP handler slot with the envelope stripped.

use ferric_proto::{Capab, line::format_line, match_mask};
use tracing::debug;

use crate::dispatch::{Ctx, HandlerIndex, Request, Slot};
use crate::error::HandlerResult;
use crate::route::sendto_server;

/// ENCAP from the network.
pub fn ms_encap(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let mask = req.arg(0).unwrap_or("*");
    let verb = req.arg(1).unwrap_or("").to_ascii_uppercase();

    // relay the envelope onward first, untouched
    let source = req.source.id().unwrap_or(&ctx.net.me).to_string();
    let mut args: Vec<&str> = vec![mask, &verb];
    args.extend(&req.args[2..]);
    let wire = format_line(Some(&source), "ENCAP", &args);
    sendto_server(ctx.net, ctx.out, Some(req.conn), Capab::ENCAP, Capab::none(), &wire);

    // process locally when the mask covers us
    if mask != "*" && !match_mask(mask, &ctx.net.me_name) {
        return Ok(());
    }
    let Some(def) = ctx.registry.get(&verb) else {
        debug!(verb = %verb, "unknown ENCAP verb dropped");
        return Ok(());
    };
    let Slot::Do(handler) = def.handlers[HandlerIndex::Encap as usize] else {
        debug!(verb = %verb, "ENCAP verb without tunnel handler dropped");
        return Ok(());
    };

    let inner = Request {
        conn: req.conn,
        source: req.source.clone(),
        command: &verb,
        args: &req.args[2..],
    };
    handler(ctx, &inner)
}

/// ENCAP LOGIN <account>: services account attach for the source user.
pub fn me_login(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let account = req.arg(0).unwrap_or("");
    if let Some(client) = ctx.net.find_id_mut(&uid) {
        client.account = if account.is_empty() || account == "*" || account == "0" {
            None
        } else {
            Some(account.to_string())
        };
    }
    Ok(())
}

/// ENCAP CERTFP <fingerprint>.
pub fn me_certfp(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let fp = req.arg(0).unwrap_or("");
    if let Some(client) = ctx.net.find_id_mut(&uid) {
        client.certfp = (!fp.is_empty()).then(|| fp.to_ascii_lowercase());
    }
    Ok(())
}

/// ENCAP REALHOST <host>: the pre-spoof hostname for a UID-introduced
/// user (EUID carries it inline instead).
pub fn me_realhost(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let host = req.arg(0).unwrap_or("");
    if !host.is_empty() {
        if let Some(client) = ctx.net.find_id_mut(&uid) {
            client.orig_host = host.to_string();
        }
    }
    Ok(())
}

/// ENCAP TGINFO <free>: replenish the source's target-change budget
/// after a netjoin (0 means a clean slate).
pub fn me_tginfo(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let Some(uid) = req.source.user_uid().map(str::to_string) else {
        return Ok(());
    };
    let used: usize = req.arg(0).and_then(|a| a.parse().ok()).unwrap_or(0);
    if let Some(local) = ctx.net.find_id_mut(&uid).and_then(|c| c.local.as_mut()) {
        local.targets.clear();
        for _ in 0..used.min(ctx.cfg.general.target_change_max) {
            local.targets.push(Some(0));
        }
    }
    Ok(())
}
