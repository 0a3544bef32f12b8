//! Client capability negotiation (CAP).
//!
//! Registration is suspended while a CAP session is open and resumes at
//! CAP END. The capability set offered is deliberately small; each token
//! here changes concrete daemon behavior somewhere.

use crate::dispatch::{Ctx, Request, Source};
use crate::error::{HandlerError, HandlerResult};
use crate::state::ConnId;

/// Capabilities this server offers clients.
const OFFERED: &[&str] = &[
    "multi-prefix",
    "invite-notify",
    "account-notify",
    "extended-join",
    "tls",
];

fn cap_target(ctx: &Ctx<'_>, req: &Request<'_>) -> (ConnId, String, bool) {
    match &req.source {
        Source::Pending(conn) => {
            let nick = ctx
                .net
                .pending
                .get(conn)
                .and_then(|c| c.local.as_ref())
                .and_then(|l| l.pre_nick.clone())
                .unwrap_or_else(|| "*".to_string());
            (*conn, nick, false)
        }
        Source::User(uid) => {
            let client = ctx.net.find_id(uid);
            (
                client.and_then(|c| c.from_conn).unwrap_or(req.conn),
                client.map(|c| c.name.clone()).unwrap_or_else(|| "*".into()),
                true,
            )
        }
        Source::Server(_) => (req.conn, "*".to_string(), true),
    }
}

fn with_local_caps<F: FnOnce(&mut crate::state::LocalClient)>(
    ctx: &mut Ctx<'_>,
    req: &Request<'_>,
    f: F,
) {
    match &req.source {
        Source::Pending(conn) => {
            if let Some(local) = ctx
                .net
                .pending
                .get_mut(conn)
                .and_then(|c| c.local.as_mut())
            {
                f(local);
            }
        }
        Source::User(uid) => {
            if let Some(local) = ctx.net.find_id_mut(uid).and_then(|c| c.local.as_mut()) {
                f(local);
            }
        }
        Source::Server(_) => {}
    }
}

/// CAP, in any pre- or post-registration state.
pub fn m_cap(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let sub = req.arg(0).unwrap_or("").to_ascii_uppercase();
    let (conn, nick, registered) = cap_target(ctx, req);
    let me = ctx.net.me_name.clone();

    match sub.as_str() {
        "LS" => {
            if !registered {
                with_local_caps(ctx, req, |l| l.cap_negotiating = true);
            }
            let offered = OFFERED.join(" ");
            ctx.out
                .send(conn, Some(&me), "CAP", &[&nick, "LS", &offered]);
        }
        "LIST" => {
            let mut active = String::new();
            match &req.source {
                Source::Pending(c) => {
                    if let Some(local) = ctx.net.pending.get(c).and_then(|c| c.local.as_ref()) {
                        active = local.caps.iter().cloned().collect::<Vec<_>>().join(" ");
                    }
                }
                Source::User(uid) => {
                    if let Some(local) = ctx.net.find_id(uid).and_then(|c| c.local.as_ref()) {
                        active = local.caps.iter().cloned().collect::<Vec<_>>().join(" ");
                    }
                }
                Source::Server(_) => {}
            }
            ctx.out
                .send(conn, Some(&me), "CAP", &[&nick, "LIST", &active]);
        }
        "REQ" => {
            if !registered {
                with_local_caps(ctx, req, |l| l.cap_negotiating = true);
            }
            let wanted = req.arg(1).unwrap_or("");
            let all_known = wanted
                .split_ascii_whitespace()
                .all(|c| OFFERED.contains(&c.trim_start_matches('-')));
            if all_known {
                with_local_caps(ctx, req, |l| {
                    for cap in wanted.split_ascii_whitespace() {
                        if let Some(removed) = cap.strip_prefix('-') {
                            l.caps.remove(removed);
                        } else {
                            l.caps.insert(cap.to_string());
                        }
                    }
                });
                ctx.out
                    .send(conn, Some(&me), "CAP", &[&nick, "ACK", wanted]);
            } else {
                ctx.out
                    .send(conn, Some(&me), "CAP", &[&nick, "NAK", wanted]);
            }
        }
        "CLEAR" => {
            let mut cleared = String::new();
            with_local_caps(ctx, req, |l| {
                cleared = l
                    .caps
                    .drain()
                    .map(|c| format!("-{c}"))
                    .collect::<Vec<_>>()
                    .join(" ");
            });
            ctx.out
                .send(conn, Some(&me), "CAP", &[&nick, "ACK", &cleared]);
        }
        "END" => {
            if !registered {
                with_local_caps(ctx, req, |l| l.cap_negotiating = false);
                return super::registration::try_register(ctx, conn);
            }
        }
        _ => {
            return Err(HandlerError::Numeric(
                ferric_proto::Numeric::ERR_INVALIDCAPCMD,
                vec![sub, "Invalid CAP subcommand".to_string()],
            ));
        }
    }
    Ok(())
}
