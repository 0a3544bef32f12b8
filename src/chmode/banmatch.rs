//! List-mode evaluation: bans, quiets, exceptions, invex, and the
//! join/speak verdicts built on top of them.

use ferric_proto::Numeric;

use super::extban::{ExtbanResult, ExtbanTable};
use super::mask::mask_matches_client;
use crate::config::ChannelConfig;
use crate::state::{Channel, Client, ListEntry, ListKind, Network};

fn entry_matches(
    net: &Network,
    extbans: &ExtbanTable,
    channel: &Channel,
    client: &Client,
    entry: &ListEntry,
) -> bool {
    if entry.mask.starts_with('$') {
        extbans.matches(net, client, channel, &entry.mask) == ExtbanResult::Match
    } else {
        mask_matches_client(&entry.mask, client)
    }
}

/// First matching entry on a list.
pub fn find_list_match<'a>(
    net: &Network,
    extbans: &ExtbanTable,
    channel: &'a Channel,
    client: &Client,
    kind: ListKind,
) -> Option<&'a ListEntry> {
    channel
        .list(kind)
        .iter()
        .find(|entry| entry_matches(net, extbans, channel, client, entry))
}

/// Banned, and not excepted. `Some(forward)` carries the matching ban's
/// forward target when it has one.
pub fn is_banned(
    net: &Network,
    extbans: &ExtbanTable,
    cfg: &ChannelConfig,
    channel: &Channel,
    client: &Client,
) -> Option<Option<String>> {
    let ban = find_list_match(net, extbans, channel, client, ListKind::Ban)?;
    if cfg.use_except
        && find_list_match(net, extbans, channel, client, ListKind::Except).is_some()
    {
        return None;
    }
    Some(ban.forward.clone())
}

/// Quieted, and not excepted.
pub fn is_quieted(
    net: &Network,
    extbans: &ExtbanTable,
    cfg: &ChannelConfig,
    channel: &Channel,
    client: &Client,
) -> bool {
    if find_list_match(net, extbans, channel, client, ListKind::Quiet).is_none() {
        return false;
    }
    !(cfg.use_except
        && find_list_match(net, extbans, channel, client, ListKind::Except).is_some())
}

/// Ban/quiet verdict through the per-membership cache. The cache is keyed
/// by the channel's `bants` version: any list change bumps the version and
/// the next call here re-evaluates.
pub fn check_banned_cached(
    net: &mut Network,
    extbans: &ExtbanTable,
    cfg: &ChannelConfig,
    chname: &str,
    uid: &str,
) -> (bool, bool) {
    let (fresh, banned, quieted) = {
        let Some(channel) = net.get_channel(chname) else {
            return (false, false);
        };
        let Some(member) = channel.members.get(uid) else {
            return (false, false);
        };
        if member.bants == channel.bants
            && member.cached_banned.is_some()
            && member.cached_quieted.is_some()
        {
            return (
                member.cached_banned.unwrap_or(false),
                member.cached_quieted.unwrap_or(false),
            );
        }
        let Some(client) = net.find_id(uid) else {
            return (false, false);
        };
        (
            channel.bants,
            is_banned(net, extbans, cfg, channel, client).is_some(),
            is_quieted(net, extbans, cfg, channel, client),
        )
    };

    if let Some(channel) = net.get_channel_mut(chname) {
        if let Some(member) = channel.members.get_mut(uid) {
            member.bants = fresh;
            member.cached_banned = Some(banned);
            member.cached_quieted = Some(quieted);
        }
    }
    (banned, quieted)
}

/// Verdict for speaking to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanSend {
    Ok,
    /// Blocked normally, but the channel is +z: deliver to ops.
    OpModerated,
    No,
}

/// May `client` speak on `channel`?
pub fn can_send(
    net: &Network,
    extbans: &ExtbanTable,
    cfg: &ChannelConfig,
    channel: &Channel,
    client: &Client,
) -> CanSend {
    let member = channel.members.get(&client.id);

    if let Some(member) = member {
        if member.op || member.voice {
            return CanSend::Ok;
        }
    } else if channel.modes.no_external {
        return CanSend::No;
    }

    let blocked = channel.modes.moderated
        || is_banned(net, extbans, cfg, channel, client).is_some()
        || is_quieted(net, extbans, cfg, channel, client);

    if blocked {
        if channel.modes.op_moderate {
            CanSend::OpModerated
        } else {
            CanSend::No
        }
    } else {
        CanSend::Ok
    }
}

/// Why a join was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDenial {
    Banned,
    InviteOnly,
    Full,
    BadKey,
    Throttled,
    /// Denied here, but the channel (or the matching ban) forwards.
    Forward(String),
}

impl JoinDenial {
    pub fn numeric(&self) -> Numeric {
        match self {
            JoinDenial::Banned => Numeric::ERR_BANNEDFROMCHAN,
            JoinDenial::InviteOnly => Numeric::ERR_INVITEONLYCHAN,
            JoinDenial::Full => Numeric::ERR_CHANNELISFULL,
            JoinDenial::BadKey => Numeric::ERR_BADCHANNELKEY,
            JoinDenial::Throttled => Numeric::ERR_THROTTLE,
            JoinDenial::Forward(_) => Numeric::ERR_LINKCHANNEL,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            JoinDenial::Banned => "Cannot join channel (+b)",
            JoinDenial::InviteOnly => "Cannot join channel (+i)",
            JoinDenial::Full => "Cannot join channel (+l)",
            JoinDenial::BadKey => "Cannot join channel (+k)",
            JoinDenial::Throttled => "Cannot join channel (+j)",
            JoinDenial::Forward(_) => "Forwarding to another channel",
        }
    }
}

/// May `client` join `channel`? Invitations override +i, +j, +l, and +b.
/// The throttle counter is not consumed here; the join path does that
/// after the verdict stands.
pub fn can_join(
    net: &Network,
    extbans: &ExtbanTable,
    cfg: &ChannelConfig,
    channel: &Channel,
    client: &Client,
    key: Option<&str>,
    now: i64,
) -> Result<(), JoinDenial> {
    let invited = channel.invites.contains(&client.id);

    let invex_ok = cfg.use_invex
        && find_list_match(net, extbans, channel, client, ListKind::Invex).is_some();

    if let Some(forward) = is_banned(net, extbans, cfg, channel, client) {
        if !invited {
            return match (cfg.use_forward, forward) {
                (true, Some(target)) => Err(JoinDenial::Forward(target)),
                _ => Err(JoinDenial::Banned),
            };
        }
    }

    if channel.modes.invite_only && !invited && !invex_ok {
        return Err(deny_or_forward(cfg, channel, JoinDenial::InviteOnly));
    }

    if let Some(required) = &channel.modes.key {
        if key != Some(required.as_str()) {
            return Err(deny_or_forward(cfg, channel, JoinDenial::BadKey));
        }
    }

    if let Some(limit) = channel.modes.limit {
        if channel.members.len() >= limit as usize && !invited {
            return Err(deny_or_forward(cfg, channel, JoinDenial::Full));
        }
    }

    if let Some((joins, seconds)) = channel.modes.throttle {
        if !invited {
            let in_window = now - channel.join_delta_start < seconds;
            if in_window && channel.join_count >= joins {
                return Err(deny_or_forward(cfg, channel, JoinDenial::Throttled));
            }
        }
    }

    if channel.modes.reg_only && client.account.is_none() && !invited {
        return Err(deny_or_forward(cfg, channel, JoinDenial::Banned));
    }

    Ok(())
}

/// Swap a denial for the channel's +f forward target when configured.
fn deny_or_forward(cfg: &ChannelConfig, channel: &Channel, denial: JoinDenial) -> JoinDenial {
    if cfg.use_forward {
        if let Some(target) = &channel.modes.forward {
            return JoinDenial::Forward(target.clone());
        }
    }
    denial
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Membership, Status};

    fn fixture() -> (Network, ChannelConfig, ExtbanTable, Client) {
        let net = Network::new("42X", "irc.example.net", "t", 1_700_000_000);
        let client = Client {
            status: Status::Client,
            name: "joe".into(),
            id: "42XAAAAAB".into(),
            username: "u".into(),
            host: "joes.example".into(),
            orig_host: "joes.example".into(),
            sockhost: "192.0.2.9".into(),
            info: "gecos".into(),
            umodes: Default::default(),
            flags: Default::default(),
            ts: 0,
            hopcount: 0,
            servptr: Some("42X".into()),
            from_conn: None,
            away: None,
            account: None,
            certfp: None,
            channels: Default::default(),
            local: None,
        };
        (net, ChannelConfig::default(), ExtbanTable::default(), client)
    }

    fn entry(mask: &str, forward: Option<&str>) -> ListEntry {
        ListEntry {
            mask: mask.to_string(),
            set_by: "op!o@h".to_string(),
            set_at: 1,
            forward: forward.map(String::from),
        }
    }

    #[test]
    fn test_ban_minus_except() {
        let (net, cfg, extbans, client) = fixture();
        let mut channel = Channel::new("#c", 1000);
        channel.bans.push(entry("*!*@joes.example", None));
        assert!(is_banned(&net, &extbans, &cfg, &channel, &client).is_some());

        channel.excepts.push(entry("joe!*@*", None));
        assert!(is_banned(&net, &extbans, &cfg, &channel, &client).is_none());
    }

    #[test]
    fn test_ban_forward_surfaces() {
        let (net, cfg, extbans, client) = fixture();
        let mut channel = Channel::new("#vip", 1000);
        channel.bans.push(entry("$~a", Some("#lobby")));
        // unidentified -> $~a matches, with its forward
        let verdict = can_join(&net, &extbans, &cfg, &channel, &client, None, 1000);
        assert_eq!(verdict, Err(JoinDenial::Forward("#lobby".into())));
    }

    #[test]
    fn test_invite_overrides_ban_and_limit() {
        let (net, cfg, extbans, client) = fixture();
        let mut channel = Channel::new("#c", 1000);
        channel.bans.push(entry("joe!*@*", None));
        channel.modes.limit = Some(0);
        channel.invites.insert(client.id.clone());
        assert!(can_join(&net, &extbans, &cfg, &channel, &client, None, 1000).is_ok());
    }

    #[test]
    fn test_key_check() {
        let (net, cfg, extbans, client) = fixture();
        let mut channel = Channel::new("#c", 1000);
        channel.modes.key = Some("sesame".into());
        assert_eq!(
            can_join(&net, &extbans, &cfg, &channel, &client, None, 1000),
            Err(JoinDenial::BadKey)
        );
        assert!(can_join(&net, &extbans, &cfg, &channel, &client, Some("sesame"), 1000).is_ok());
    }

    #[test]
    fn test_denial_uses_channel_forward() {
        let (net, cfg, extbans, client) = fixture();
        let mut channel = Channel::new("#c", 1000);
        channel.modes.invite_only = true;
        channel.modes.forward = Some("#overflow".into());
        assert_eq!(
            can_join(&net, &extbans, &cfg, &channel, &client, None, 1000),
            Err(JoinDenial::Forward("#overflow".into()))
        );
    }

    #[test]
    fn test_can_send_verdicts() {
        let (net, cfg, extbans, client) = fixture();
        let mut channel = Channel::new("#c", 1000);

        // non-member against +n
        channel.modes.no_external = true;
        assert_eq!(can_send(&net, &extbans, &cfg, &channel, &client), CanSend::No);

        // member, moderated, no voice
        channel.members.insert(client.id.clone(), Membership::default());
        channel.modes.moderated = true;
        assert_eq!(can_send(&net, &extbans, &cfg, &channel, &client), CanSend::No);

        // +z flips the verdict to op-moderated delivery
        channel.modes.op_moderate = true;
        assert_eq!(
            can_send(&net, &extbans, &cfg, &channel, &client),
            CanSend::OpModerated
        );

        // voice wins over everything
        channel.members.get_mut(&client.id).unwrap().voice = true;
        assert_eq!(can_send(&net, &extbans, &cfg, &channel, &client), CanSend::Ok);
    }

    #[test]
    fn test_cached_verdict_staleness() {
        let (mut net, cfg, extbans, client) = fixture();
        let uid = client.id.clone();
        net.add_user(client);
        let channel = net.create_channel("#c", 1000);
        channel.members.insert(uid.clone(), Membership::default());

        let (banned, _) = check_banned_cached(&mut net, &extbans, &cfg, "#c", &uid);
        assert!(!banned);

        // add a ban and bump the version: cache must re-evaluate
        let channel = net.get_channel_mut("#c").unwrap();
        channel.bans.push(entry("*!*@192.0.2.*", None));
        channel.bump_bants();
        let (banned, _) = check_banned_cached(&mut net, &extbans, &cfg, "#c", &uid);
        assert!(banned);
    }
}
