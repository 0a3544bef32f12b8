//! Read-side flood control.
//!
//! Every local client carries a per-second read budget. During the grace
//! window (connect until the client proves interactive) the budget is
//! generous so bursts of autojoin traffic get through; afterwards it
//! drops to a trickle plus a one-shot burst allowance. The engine's
//! one-second tick calls [`recompute`]; the dispatcher consumes budget
//! through [`try_consume`] and parks excess lines on the recv queue.

use crate::state::{Client, Network};

/// Steady-state commands per second once grace ends.
pub const ALLOW_READ: u32 = 5;

/// One-shot burst allowance on top of the steady rate.
pub const ALLOW_READ_BURST: u32 = 40;

/// Budget while the grace window is still open.
pub const GRACE_ALLOW: u32 = ALLOW_READ_BURST;

/// Recv-queue lines beyond which the client is exited for flooding.
pub fn recvq_limit(client_flood: u32) -> usize {
    client_flood as usize
}

/// Reset one client's per-second counters. Called for every local client
/// by the engine tick.
pub fn recompute(client: &mut Client) {
    let allow = allow_per_second(client_grace(client));
    if let Some(local) = client.local.as_mut() {
        local.sent_parsed = local.sent_parsed.saturating_sub(allow);
        local.allow_read = allow;
    }
}

fn client_grace(client: &Client) -> bool {
    !client.flags.flooddone && !client.flags.exempt_flood
}

fn allow_per_second(grace: bool) -> u32 {
    if grace { GRACE_ALLOW } else { ALLOW_READ }
}

/// May this client have another line parsed right now? Exempt clients
/// always pass; others debit the budget. While grace is in effect the
/// parsed count is also capped by the burst allowance.
pub fn try_consume(client: &mut Client) -> bool {
    if client.flags.exempt_flood {
        return true;
    }
    let grace = client_grace(client);
    let Some(local) = client.local.as_mut() else {
        return true;
    };
    let cap = if grace {
        ALLOW_READ + ALLOW_READ_BURST
    } else {
        4 * ALLOW_READ
    };
    if local.allow_read == 0 || local.sent_parsed >= cap {
        return false;
    }
    local.allow_read -= 1;
    local.sent_parsed += 1;
    true
}

/// Mark the grace window over: the client has sent a message beyond
/// itself (or otherwise proven interactive).
pub fn flood_done(net: &mut Network, uid: &str) {
    if let Some(client) = net.find_id_mut(uid) {
        client.flags.flooddone = true;
    }
}

/// Anti-nick-flood check. Records the change when allowed.
pub fn nick_change_allowed(
    client: &mut Client,
    max_changes: u32,
    window: i64,
    now: i64,
) -> bool {
    let oper = client.umodes.oper;
    let Some(local) = client.local.as_mut() else {
        return true;
    };
    if oper {
        local.last_nick_change = now;
        return true;
    }
    if now - local.last_nick_change > window {
        local.nick_changes = 0;
    }
    if local.nick_changes >= max_changes {
        return false;
    }
    local.last_nick_change = now;
    local.nick_changes += 1;
    true
}

/// Join/part spam tracking. Returns true when the "Possible spambot"
/// notice threshold has just been crossed.
pub fn note_join_leave(client: &mut Client, spam_num: u32, spam_time: i64, now: i64) -> bool {
    let Some(local) = client.local.as_mut() else {
        return false;
    };
    if now - local.last_leave_time > spam_time {
        local.join_leave_count = local.join_leave_count.saturating_sub(1);
    } else {
        local.join_leave_count += 1;
    }
    local.last_join_time = now;
    local.last_leave_time = now;
    local.join_leave_count == spam_num
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ConnId, LocalClient, Status};

    fn local_client() -> Client {
        Client {
            status: Status::Client,
            name: "joe".into(),
            id: "42XAAAAAA".into(),
            username: "u".into(),
            host: "h".into(),
            orig_host: "h".into(),
            sockhost: "::1".into(),
            info: String::new(),
            umodes: Default::default(),
            flags: Default::default(),
            ts: 0,
            hopcount: 0,
            servptr: Some("42X".into()),
            from_conn: Some(ConnId(1)),
            away: None,
            account: None,
            certfp: None,
            channels: Default::default(),
            local: Some(LocalClient::default()),
        }
    }

    #[test]
    fn test_grace_budget_larger() {
        let mut c = local_client();
        recompute(&mut c);
        assert_eq!(c.local.as_ref().unwrap().allow_read, GRACE_ALLOW);
        c.flags.flooddone = true;
        recompute(&mut c);
        assert_eq!(c.local.as_ref().unwrap().allow_read, ALLOW_READ);
    }

    #[test]
    fn test_consume_exhausts() {
        let mut c = local_client();
        c.flags.flooddone = true;
        recompute(&mut c);
        for _ in 0..ALLOW_READ {
            assert!(try_consume(&mut c));
        }
        assert!(!try_consume(&mut c));
    }

    #[test]
    fn test_exempt_never_blocked() {
        let mut c = local_client();
        c.flags.exempt_flood = true;
        for _ in 0..1000 {
            assert!(try_consume(&mut c));
        }
    }

    #[test]
    fn test_sent_parsed_cap_invariant() {
        // while grace holds, sent_parsed stays within allow + burst
        let mut c = local_client();
        recompute(&mut c);
        while try_consume(&mut c) {}
        let local = c.local.as_ref().unwrap();
        assert!(local.sent_parsed <= ALLOW_READ + ALLOW_READ_BURST);
    }

    #[test]
    fn test_nick_flood_window() {
        let mut c = local_client();
        for i in 0..5 {
            assert!(nick_change_allowed(&mut c, 5, 20, 100 + i));
        }
        assert!(!nick_change_allowed(&mut c, 5, 20, 106));
        // outside the window the counter resets
        assert!(nick_change_allowed(&mut c, 5, 20, 200));
    }

    #[test]
    fn test_spambot_threshold_fires_once() {
        let mut c = local_client();
        let mut fired = 0;
        for i in 0..10 {
            if note_join_leave(&mut c, 5, 60, 100 + i) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }
}
