//! Helper process supervision.
//!
//! Each helper gets a datagram socketpair; the child's end becomes its
//! stdin. A dead helper is respawned, but a crash loop (20 restarts
//! inside 5 seconds) earns a 60-second hold-down so a broken binary
//! cannot spin the core.

use std::collections::VecDeque;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{error, info, warn};

/// What a helper binary does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperRole {
    Ssld,
    Authd,
    Wsockd,
}

impl HelperRole {
    pub fn binary(self) -> &'static str {
        match self {
            HelperRole::Ssld => "ssld",
            HelperRole::Authd => "authd",
            HelperRole::Wsockd => "wsockd",
        }
    }
}

/// Crash-loop accounting, separated out so the policy is testable.
#[derive(Debug, Default)]
pub struct RestartTracker {
    recent: VecDeque<i64>,
    hold_until: i64,
}

/// Restarts inside the window that trip the hold-down.
const RESTART_BURST: usize = 20;
const RESTART_WINDOW: i64 = 5;
const HOLD_DOWN: i64 = 60;

impl RestartTracker {
    /// Record a death at `now`. Returns the time at which a respawn is
    /// permitted (== now when the loop is healthy).
    pub fn note_death(&mut self, now: i64) -> i64 {
        while self
            .recent
            .front()
            .is_some_and(|&t| now - t > RESTART_WINDOW)
        {
            self.recent.pop_front();
        }
        self.recent.push_back(now);
        if self.recent.len() >= RESTART_BURST {
            self.hold_until = now + HOLD_DOWN;
            self.recent.clear();
        }
        self.hold_until.max(now)
    }

    pub fn can_spawn(&self, now: i64) -> bool {
        now >= self.hold_until
    }
}

/// One running helper.
pub struct Helper {
    pub role: HelperRole,
    pub id: u32,
    /// Our end of the control socketpair.
    pub control: UnixDatagram,
    pub child: Child,
}

impl Helper {
    pub fn control_fd(&self) -> RawFd {
        self.control.as_raw_fd()
    }
}

/// Spawns and replaces helpers.
pub struct HelperSupervisor {
    helper_dir: String,
    next_id: u32,
    pub helpers: Vec<Helper>,
    trackers: std::collections::HashMap<u32, RestartTracker>,
}

impl HelperSupervisor {
    pub fn new(helper_dir: &str) -> Self {
        HelperSupervisor {
            helper_dir: helper_dir.to_string(),
            next_id: 1,
            helpers: Vec::new(),
            trackers: std::collections::HashMap::new(),
        }
    }

    /// Start one helper of the given role. The child receives its end
    /// of the control socketpair as stdin and our maximum client count
    /// on the command line, the way the C lineage launches ssld.
    pub fn spawn(&mut self, role: HelperRole) -> std::io::Result<u32> {
        let (ours, theirs) = UnixDatagram::pair()?;
        ours.set_nonblocking(true)?;

        let path = format!("{}/{}", self.helper_dir, role.binary());
        let child = Command::new(&path)
            .stdin(Stdio::from(std::os::fd::OwnedFd::from(theirs)))
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let id = self.next_id;
        self.next_id += 1;
        info!(role = ?role, id, path = %path, "helper spawned");
        self.helpers.push(Helper {
            role,
            id,
            control: ours,
            child,
        });
        self.trackers.entry(id).or_default();
        Ok(id)
    }

    /// A helper died. Record it, maybe respawn now, maybe hold down.
    /// Returns the ids of connections the engine must exit (callers
    /// track the attachment map).
    pub fn note_death(&mut self, id: u32, now: i64) -> Option<HelperRole> {
        let index = self.helpers.iter().position(|h| h.id == id)?;
        let helper = self.helpers.remove(index);
        let role = helper.role;
        warn!(role = ?role, id, "helper died");

        let allowed_at = self.trackers.entry(id).or_default().note_death(now);
        if allowed_at > now {
            error!(
                role = ?role,
                wait = allowed_at - now,
                "helper crash loop, holding down respawn"
            );
            return Some(role);
        }
        if let Err(e) = self.spawn(role) {
            error!(role = ?role, error = %e, "helper respawn failed");
        }
        Some(role)
    }

    /// A helper to hand new work to, least-recently used by rotation.
    pub fn pick(&self, role: HelperRole) -> Option<&Helper> {
        self.helpers.iter().find(|h| h.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_restarts_immediate() {
        let mut tracker = RestartTracker::default();
        assert_eq!(tracker.note_death(100), 100);
        assert_eq!(tracker.note_death(110), 110);
        assert!(tracker.can_spawn(110));
    }

    #[test]
    fn test_crash_loop_holds_down() {
        let mut tracker = RestartTracker::default();
        let mut at = 0;
        for i in 0..20 {
            at = tracker.note_death(1000 + (i / 5));
        }
        assert_eq!(at, tracker.hold_until);
        assert!(at >= 1000 + HOLD_DOWN);
        assert!(!tracker.can_spawn(1005));
        assert!(tracker.can_spawn(at));
    }

    #[test]
    fn test_slow_deaths_never_trip() {
        let mut tracker = RestartTracker::default();
        for i in 0..100 {
            let now = i * 10; // one death per 10s, outside the window
            assert_eq!(tracker.note_death(now), now);
        }
    }
}
