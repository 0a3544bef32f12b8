//! Split-mode: degraded behavior during netsplits.
//!
//! When the visible network shrinks below the configured server or user
//! thresholds, channel creation is refused (and optionally joins, in the
//! manual setting) so split-riders cannot seize ops on empty channels.
//! A periodic evaluator exits split-mode once the network recovers past
//! a hysteresis band.

use crate::state::{Network, SplitSetting};

/// Fractional headroom required above the thresholds before auto split
/// mode disengages.
const HYSTERESIS_NUM: usize = 11;
const HYSTERESIS_DEN: usize = 10;

/// Re-evaluate split-mode. Returns `Some(active)` when the state flipped.
pub fn evaluate(net: &mut Network) -> Option<bool> {
    let active = match net.split_setting {
        SplitSetting::On => true,
        SplitSetting::Off => false,
        SplitSetting::Auto => {
            let servers = net.counts.global_servers;
            let users = net.counts.global_users;
            let split_servers = net.tunables.split_servers;
            let split_users = net.tunables.split_users;
            if net.split_active {
                // leave only after clearing the hysteresis band
                !(servers * HYSTERESIS_DEN >= split_servers * HYSTERESIS_NUM
                    && users * HYSTERESIS_DEN >= split_users * HYSTERESIS_NUM)
            } else {
                servers < split_servers || users < split_users
            }
        }
    };
    if active != net.split_active {
        net.split_active = active;
        Some(active)
    } else {
        None
    }
}

/// Should a JOIN creating `channel` be refused right now?
pub fn refuse_create(net: &Network, no_create_on_split: bool) -> bool {
    net.split_active && no_create_on_split
}

/// Should any JOIN be refused right now (manual mode option)?
pub fn refuse_join(net: &Network, no_join_on_split: bool) -> bool {
    net.split_active && no_join_on_split
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net() -> Network {
        let mut net = Network::new("42X", "irc.example.net", "t", 1_700_000_000);
        net.tunables.split_servers = 4;
        net.tunables.split_users = 100;
        net
    }

    #[test]
    fn test_auto_engages_below_threshold() {
        let mut net = net();
        net.counts.global_servers = 2;
        net.counts.global_users = 500;
        assert_eq!(evaluate(&mut net), Some(true));
        assert!(net.split_active);
        // no flip on re-evaluation
        assert_eq!(evaluate(&mut net), None);
    }

    #[test]
    fn test_auto_exits_with_hysteresis() {
        let mut net = net();
        net.split_active = true;
        // exactly at threshold: still split (needs the band)
        net.counts.global_servers = 4;
        net.counts.global_users = 100;
        assert_eq!(evaluate(&mut net), None);
        // comfortably above: leaves split-mode
        net.counts.global_servers = 5;
        net.counts.global_users = 120;
        assert_eq!(evaluate(&mut net), Some(false));
    }

    #[test]
    fn test_forced_on_off() {
        let mut net = net();
        net.counts.global_servers = 50;
        net.counts.global_users = 5000;
        net.split_setting = SplitSetting::On;
        assert_eq!(evaluate(&mut net), Some(true));
        net.split_setting = SplitSetting::Off;
        assert_eq!(evaluate(&mut net), Some(false));
    }

    #[test]
    fn test_refusals_gate_on_active() {
        let mut net = net();
        assert!(!refuse_create(&net, true));
        net.split_active = true;
        assert!(refuse_create(&net, true));
        assert!(!refuse_create(&net, false));
        assert!(refuse_join(&net, true));
    }
}
