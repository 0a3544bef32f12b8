//! Command handlers.
//!
//! One module per command family. Handler naming follows the slot that
//! invokes them: `mr_*` unregistered, `m_*` local client, `mc_*` remote
//! client, `ms_*` server, `me_*` ENCAP, `mo_*` oper.

pub mod bans;
pub mod cap;
pub mod channel;
pub mod encap;
pub mod exit;
pub mod messaging;
pub mod mode;
pub mod nick;
pub mod oper;
pub mod queries;
pub mod registration;
pub mod server_link;
pub mod sjoin;
pub mod uid;

use crate::dispatch::Ctx;
use crate::state::ConnId;

/// The wire-format user introduction for one peer, honoring its EUID
/// capability: either a single EUID, or UID plus the ENCAP REALHOST and
/// LOGIN fallbacks the older format needs.
pub fn format_introduction(
    client: &crate::state::Client,
    me_sid: &str,
    peer_has_euid: bool,
) -> Vec<String> {
    use ferric_proto::line::format_line;

    let hop = (client.hopcount + 1).to_string();
    let ts = client.ts.to_string();
    let umodes = client.umodes.to_string_public();
    let ip = if client.flags.ip_spoof {
        "0"
    } else {
        client.sockhost.as_str()
    };
    let source = client.servptr.as_deref().unwrap_or(me_sid);

    if peer_has_euid {
        let account = client.account.as_deref().unwrap_or("*");
        let realhost = if client.orig_host == client.host {
            "*"
        } else {
            &client.orig_host
        };
        vec![format_line(
            Some(source),
            "EUID",
            &[
                &client.name, &hop, &ts, &umodes, &client.username, &client.host, ip,
                &client.id, realhost, account, &client.info,
            ],
        )]
    } else {
        let mut lines = vec![format_line(
            Some(source),
            "UID",
            &[
                &client.name, &hop, &ts, &umodes, &client.username, &client.host, ip,
                &client.id, &client.info,
            ],
        )];
        if client.orig_host != client.host {
            lines.push(format_line(
                Some(source),
                "ENCAP",
                &["*", "REALHOST", &client.orig_host],
            ));
        }
        if let Some(account) = &client.account {
            lines.push(format_line(Some(source), "ENCAP", &["*", "LOGIN", account]));
        }
        lines
    }
}

/// Send a freshly-registered or remotely-introduced user to every peer
/// except `skip`, formatting per peer capability.
pub fn introduce_to_peers(ctx: &mut Ctx<'_>, uid: &str, skip: Option<ConnId>) {
    let Some(client) = ctx.net.find_id(uid) else {
        return;
    };
    let me_sid = ctx.net.me.clone();

    let peers: Vec<(ConnId, bool)> = ctx
        .net
        .clients()
        .filter(|c| c.status == crate::state::Status::Server && c.is_local())
        .filter_map(|c| {
            let conn = c.from_conn?;
            if Some(conn) == skip {
                return None;
            }
            let has_euid = ctx
                .net
                .servers
                .get(&c.id)
                .map(|s| s.capab.has(ferric_proto::Capab::EUID))
                .unwrap_or(false);
            Some((conn, has_euid))
        })
        .collect();

    for (conn, has_euid) in peers {
        for line in format_introduction(client, &me_sid, has_euid) {
            ctx.out.send_raw(conn, line);
        }
    }
}
