//! Propagation: formatting and fanning events out to peers.
//!
//! Local clients are addressed by name (`:nick!user@host`), server links
//! by TS6 ids. Every helper here takes both renderings where the
//! destination set can contain both kinds of audience, and routes remote
//! deliveries through the target's nearest link.

mod outbox;

pub use outbox::{CloseKind, Outbox};

use ferric_proto::{Capab, line::format_line};

use crate::state::{ConnId, Network};

/// The connection carrying traffic toward a client, if any.
pub fn client_route(net: &Network, id: &str) -> Option<ConnId> {
    net.find_id(id).and_then(|c| c.from_conn)
}

/// Send one line to a single client, formatting per audience: the local
/// rendering when the target is ours, the id rendering otherwise.
pub fn sendto_one(
    net: &Network,
    out: &mut Outbox,
    target_id: &str,
    local_prefix: &str,
    remote_prefix: &str,
    command: &str,
    args: &[&str],
) {
    let Some(target) = net.find_id(target_id) else {
        return;
    };
    let Some(conn) = target.from_conn else {
        return;
    };
    let prefix = if target.is_local() {
        local_prefix
    } else {
        remote_prefix
    };
    out.send_raw(conn, format_line(Some(prefix), command, args));
}

/// Broadcast a pre-formatted line to every local member of a channel.
pub fn sendto_channel_local(
    net: &Network,
    out: &mut Outbox,
    chname: &str,
    skip_uid: Option<&str>,
    ops_only: bool,
    line: &str,
) {
    let Some(channel) = net.get_channel(chname) else {
        return;
    };
    for uid in &channel.local_members {
        if Some(uid.as_str()) == skip_uid {
            continue;
        }
        if ops_only && !channel.members.get(uid).map(|m| m.op).unwrap_or(false) {
            continue;
        }
        if let Some(conn) = client_route(net, uid) {
            out.send_raw(conn, line.to_string());
        }
    }
}

/// Broadcast a pre-formatted line to every directly-linked server except
/// `skip`, honoring capability requirements: peers must have all of
/// `cap_yes` and none of `cap_no`.
pub fn sendto_server(
    net: &Network,
    out: &mut Outbox,
    skip: Option<ConnId>,
    cap_yes: Capab,
    cap_no: Capab,
    line: &str,
) {
    for client in net.clients() {
        if client.status != crate::state::Status::Server || !client.is_local() {
            continue;
        }
        let Some(conn) = client.from_conn else {
            continue;
        };
        if Some(conn) == skip {
            continue;
        }
        let Some(server) = net.servers.get(&client.id) else {
            continue;
        };
        if !server.capab.has(cap_yes) {
            continue;
        }
        if cap_no != Capab::none() && server.capab.has(cap_no) {
            continue;
        }
        out.send_raw(conn, line.to_string());
    }
}

/// Notice every local user that shares at least one channel with `uid`
/// (for NICK and QUIT visibility), each at most once. The client itself
/// is included when `include_self` is set (nick changes echo back).
pub fn sendto_common_channels_local(
    net: &Network,
    out: &mut Outbox,
    uid: &str,
    include_self: bool,
    line: &str,
) {
    let Some(client) = net.find_id(uid) else {
        return;
    };
    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for chname in &client.channels {
        let Some(channel) = net.get_channel(chname) else {
            continue;
        };
        for member in &channel.local_members {
            if member == uid {
                continue;
            }
            if seen.insert(member.as_str()) {
                if let Some(conn) = client_route(net, member) {
                    out.send_raw(conn, line.to_string());
                }
            }
        }
    }
    if include_self && client.is_local() {
        if let Some(conn) = client.from_conn {
            out.send_raw(conn, line.to_string());
        }
    }
}

/// Server notice to local opers holding a snomask letter.
pub fn sendto_realops(net: &Network, out: &mut Outbox, sno: char, text: &str) {
    for client in net.clients() {
        if !client.is_local() || !client.is_oper() {
            continue;
        }
        if !client.umodes.snomask.contains(&sno) {
            continue;
        }
        if let Some(conn) = client.from_conn {
            out.send_raw(
                conn,
                format_line(
                    Some(&net.me_name),
                    "NOTICE",
                    &[&client.name, &format!("*** Notice -- {text}")],
                ),
            );
        }
    }
}

/// WALLOPS to local +w users.
pub fn sendto_wallops_local(net: &Network, out: &mut Outbox, from_prefix: &str, text: &str) {
    for client in net.clients() {
        if !client.is_local() || !client.umodes.wallops {
            continue;
        }
        if let Some(conn) = client.from_conn {
            out.send_raw(conn, format_line(Some(from_prefix), "WALLOPS", &[text]));
        }
    }
}

/// Deliver to local users matched by a `$$servermask` or `$#hostmask`
/// target. `by_host` selects the hostmask variant.
pub fn sendto_match_local(
    net: &Network,
    out: &mut Outbox,
    mask: &str,
    by_host: bool,
    line: &str,
) {
    for client in net.clients() {
        if !client.is_local() || !client.is_user() {
            continue;
        }
        let subject = if by_host {
            client.host.as_str()
        } else {
            net.me_name.as_str()
        };
        if ferric_proto::match_mask(mask, subject) {
            if let Some(conn) = client.from_conn {
                out.send_raw(conn, line.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Client, LocalClient, Membership, Status};

    fn net_with_channel() -> (Network, ConnId, ConnId) {
        let mut net = Network::new("42X", "irc.example.net", "test", 1_700_000_000);
        let mut add = |nick: &str, conn: u64| -> String {
            let uid = net.uid_gen.next_uid();
            net.add_user(Client {
                status: Status::Client,
                name: nick.into(),
                id: uid.clone(),
                username: "u".into(),
                host: "h".into(),
                orig_host: "h".into(),
                sockhost: "::1".into(),
                info: String::new(),
                umodes: Default::default(),
                flags: Default::default(),
                ts: 1,
                hopcount: 0,
                servptr: Some("42X".into()),
                from_conn: Some(ConnId(conn)),
                away: None,
                account: None,
                certfp: None,
                channels: ["#c".to_string()].into_iter().collect(),
                local: Some(LocalClient {
                    conn: Some(ConnId(conn)),
                    ..Default::default()
                }),
            });
            uid
        };
        let a = add("alice", 1);
        let b = add("bob", 2);
        let channel = net.create_channel("#c", 1000);
        channel.members.insert(a.clone(), Membership { op: true, ..Default::default() });
        channel.members.insert(b.clone(), Membership::default());
        channel.local_members.insert(a);
        channel.local_members.insert(b);
        (net, ConnId(1), ConnId(2))
    }

    #[test]
    fn test_channel_broadcast_skips_source() {
        let (net, c1, c2) = net_with_channel();
        let mut out = Outbox::new();
        let skip = net.find_name("alice").unwrap().id.clone();
        sendto_channel_local(&net, &mut out, "#c", Some(&skip), false, "X\r\n");
        assert!(out.lines_for(c1).is_empty());
        assert_eq!(out.lines_for(c2), vec!["X\r\n"]);
    }

    #[test]
    fn test_channel_broadcast_ops_only() {
        let (net, c1, c2) = net_with_channel();
        let mut out = Outbox::new();
        sendto_channel_local(&net, &mut out, "#c", None, true, "X\r\n");
        assert_eq!(out.lines_for(c1), vec!["X\r\n"]);
        assert!(out.lines_for(c2).is_empty());
    }

    #[test]
    fn test_common_channels_dedup() {
        let (mut net, _c1, c2) = net_with_channel();
        // put both users into a second channel too
        let (a, b) = (
            net.find_name("alice").unwrap().id.clone(),
            net.find_name("bob").unwrap().id.clone(),
        );
        let channel = net.create_channel("#d", 1000);
        channel.members.insert(a.clone(), Membership::default());
        channel.members.insert(b.clone(), Membership::default());
        channel.local_members.insert(a.clone());
        channel.local_members.insert(b);
        net.find_id_mut(&a).unwrap().channels.insert("#d".into());

        let mut out = Outbox::new();
        sendto_common_channels_local(&net, &mut out, &a, false, "X\r\n");
        assert_eq!(out.lines_for(c2).len(), 1);
    }
}
