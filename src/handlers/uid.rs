//! Remote user introduction (UID/EUID) with collision arbitration.

use ferric_proto::{irc_eq, line::format_line, valid::clean_nick, valid_uid};
use tracing::debug;

use crate::dispatch::{Ctx, Request, Source};
use crate::error::{HandlerError, HandlerResult};
use crate::hooks::{H_NEW_REMOTE_USER, HookPayload};
use crate::state::{Client, SAVE_TS, Status};
use crate::ts6::{NickWinner, resolve_nick_collision};

use super::nick::{can_save, collide};

/// Fields common to UID and EUID, in introduction order.
struct Intro {
    nick: String,
    hopcount: u32,
    ts: i64,
    umodes: String,
    username: String,
    vhost: String,
    ip: String,
    uid: String,
    realhost: Option<String>,
    account: Option<String>,
    gecos: String,
}

fn parse_intro(req: &Request<'_>, extended: bool) -> Result<Intro, HandlerError> {
    let get = |i: usize| {
        req.arg(i)
            .map(str::to_string)
            .ok_or(HandlerError::NeedMoreParams)
    };
    let hopcount = req
        .arg(1)
        .and_then(|h| h.parse().ok())
        .ok_or_else(|| HandlerError::Protocol("bad hopcount in UID".to_string()))?;
    let ts = req
        .arg(2)
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| HandlerError::Protocol("bad TS in UID".to_string()))?;

    let (realhost, account, gecos) = if extended {
        (
            Some(get(8)?).filter(|h| h != "*"),
            Some(get(9)?).filter(|a| a != "*" && a != "0"),
            get(10)?,
        )
    } else {
        (None, None, get(8)?)
    };

    Ok(Intro {
        nick: get(0)?,
        hopcount,
        ts,
        umodes: get(3)?,
        username: get(4)?,
        vhost: get(5)?,
        ip: get(6)?,
        uid: get(7)?,
        realhost,
        account,
        gecos,
    })
}

/// UID: the pre-EUID user introduction.
pub fn ms_uid(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let intro = parse_intro(req, false)?;
    introduce(ctx, req, intro)
}

/// EUID: introduction carrying real host and services account inline.
pub fn ms_euid(ctx: &mut Ctx<'_>, req: &Request<'_>) -> HandlerResult {
    let intro = parse_intro(req, true)?;
    introduce(ctx, req, intro)
}

fn introduce(ctx: &mut Ctx<'_>, req: &Request<'_>, intro: Intro) -> HandlerResult {
    let Source::Server(source_sid) = &req.source else {
        return Err(HandlerError::Protocol(
            "UID from non-server source".to_string(),
        ));
    };
    let source_sid = source_sid.clone();

    if !valid_uid(&intro.uid) || !intro.uid.starts_with(source_sid.as_str()) {
        return Err(HandlerError::Protocol(format!(
            "UID {} does not belong to {}",
            intro.uid, source_sid
        )));
    }
    if ctx.net.find_id(&intro.uid).is_some() {
        return Err(HandlerError::Protocol(format!(
            "duplicate UID {}",
            intro.uid
        )));
    }
    if !clean_nick(&intro.nick) {
        debug!(nick = %intro.nick, uid = %intro.uid, "bad remote nick, killing");
        let me = ctx.net.me.clone();
        ctx.out.send_raw(
            req.conn,
            format_line(
                Some(&me),
                "KILL",
                &[&intro.uid, &format!("{} (Bad nickname)", ctx.net.me_name)],
            ),
        );
        return Ok(());
    }

    // nickname collision on introduction
    let holder = ctx
        .net
        .find_name(&intro.nick)
        .map(|c| (c.id.clone(), c.ts, c.username.clone(), c.host.clone()));

    let mut register_as_uid = false;
    if let Some((holder_uid, holder_ts, holder_user, holder_host)) = holder {
        let same_userhost =
            irc_eq(&holder_user, &intro.username) && irc_eq(&holder_host, &intro.vhost);
        let incoming_savable = ctx
            .net
            .conn_owner(req.conn)
            .and_then(|sid| ctx.net.servers.get(sid))
            .map(|s| s.capab.has(ferric_proto::Capab::SAVE))
            .unwrap_or(false);

        match resolve_nick_collision(holder_ts, intro.ts, same_userhost) {
            NickWinner::Neither => {
                if incoming_savable && can_save(ctx, &holder_uid) {
                    collide(ctx, &holder_uid, None);
                    let me = ctx.net.me.clone();
                    ctx.out.send_raw(
                        req.conn,
                        format_line(
                            Some(&me),
                            "SAVE",
                            &[&intro.uid, &intro.ts.to_string()],
                        ),
                    );
                    register_as_uid = true;
                } else {
                    collide(ctx, &holder_uid, None);
                    let me = ctx.net.me.clone();
                    ctx.out.send_raw(
                        req.conn,
                        format_line(
                            Some(&me),
                            "KILL",
                            &[
                                &intro.uid,
                                &format!("{} (Nick collision (new))", ctx.net.me_name),
                            ],
                        ),
                    );
                    return Ok(());
                }
            }
            NickWinner::Ours => {
                // incoming loses; existing holder untouched
                let me = ctx.net.me.clone();
                if incoming_savable {
                    ctx.out.send_raw(
                        req.conn,
                        format_line(Some(&me), "SAVE", &[&intro.uid, &intro.ts.to_string()]),
                    );
                    register_as_uid = true;
                } else {
                    ctx.out.send_raw(
                        req.conn,
                        format_line(
                            Some(&me),
                            "KILL",
                            &[
                                &intro.uid,
                                &format!("{} (Nick collision (new))", ctx.net.me_name),
                            ],
                        ),
                    );
                    return Ok(());
                }
            }
            NickWinner::Theirs => {
                collide(ctx, &holder_uid, None);
            }
        }
    }

    let (nick, ts) = if register_as_uid {
        (intro.uid.clone(), SAVE_TS)
    } else {
        (intro.nick.clone(), intro.ts)
    };

    let mut umodes = crate::state::UserModes::default();
    umodes.apply_delta(&intro.umodes);

    let client = Client {
        status: Status::Client,
        name: nick,
        id: intro.uid.clone(),
        username: intro.username,
        host: intro.vhost.clone(),
        orig_host: intro.realhost.unwrap_or(intro.vhost),
        sockhost: intro.ip,
        info: intro.gecos,
        umodes,
        flags: Default::default(),
        ts,
        hopcount: intro.hopcount,
        servptr: Some(source_sid),
        from_conn: Some(req.conn),
        away: None,
        account: intro.account,
        certfp: None,
        channels: Default::default(),
        local: None,
    };
    let oper = client.umodes.oper;
    ctx.net.add_user(client);
    if oper {
        ctx.net.counts.opers += 1;
    }

    super::introduce_to_peers(ctx, &intro.uid, Some(req.conn));

    let mut payload = HookPayload::new().with_client(&intro.uid);
    ctx.hooks.call(H_NEW_REMOTE_USER, &mut payload);
    Ok(())
}
