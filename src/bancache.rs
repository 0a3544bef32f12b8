//! Server ban tables and re-evaluation.
//!
//! K-lines (user@host), D-lines (IP), and X-lines (gecos) live here as
//! the runtime cache of the external ban store. Adding a ban re-evaluates
//! the live client population so existing connections are swept, not just
//! future ones. Reserved names are in the entity store; this module only
//! covers bans that terminate connections.

use ferric_proto::match_mask;

use crate::state::{Client, Network};

/// One banned user@host.
#[derive(Debug, Clone)]
pub struct KlineEntry {
    pub user: String,
    pub host: String,
    pub reason: String,
    pub set_at: i64,
    /// Expiry time for temporary bans.
    pub expires: Option<i64>,
}

/// One banned IP mask.
#[derive(Debug, Clone)]
pub struct DlineEntry {
    pub mask: String,
    pub reason: String,
    pub set_at: i64,
    pub expires: Option<i64>,
}

/// One banned gecos mask.
#[derive(Debug, Clone)]
pub struct XlineEntry {
    pub mask: String,
    pub reason: String,
    pub set_at: i64,
}

/// Why a client is being refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanVerdict {
    Kline(String),
    Dline(String),
    Xline(String),
}

impl BanVerdict {
    pub fn reason(&self) -> &str {
        match self {
            BanVerdict::Kline(r) | BanVerdict::Dline(r) | BanVerdict::Xline(r) => r,
        }
    }
}

/// The runtime ban cache.
#[derive(Debug, Default)]
pub struct BanCache {
    pub klines: Vec<KlineEntry>,
    pub dlines: Vec<DlineEntry>,
    pub xlines: Vec<XlineEntry>,
}

impl BanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_kline(&mut self, user: &str, host: &str, reason: &str, set_at: i64, expires: Option<i64>) {
        self.klines.push(KlineEntry {
            user: user.to_string(),
            host: host.to_string(),
            reason: reason.to_string(),
            set_at,
            expires,
        });
    }

    /// Remove by exact user/host pair. True when something went away.
    pub fn remove_kline(&mut self, user: &str, host: &str) -> bool {
        let before = self.klines.len();
        self.klines
            .retain(|k| !(k.user.eq_ignore_ascii_case(user) && k.host.eq_ignore_ascii_case(host)));
        self.klines.len() != before
    }

    pub fn add_dline(&mut self, mask: &str, reason: &str, set_at: i64, expires: Option<i64>) {
        self.dlines.push(DlineEntry {
            mask: mask.to_string(),
            reason: reason.to_string(),
            set_at,
            expires,
        });
    }

    pub fn remove_dline(&mut self, mask: &str) -> bool {
        let before = self.dlines.len();
        self.dlines.retain(|d| !d.mask.eq_ignore_ascii_case(mask));
        self.dlines.len() != before
    }

    pub fn add_xline(&mut self, mask: &str, reason: &str, set_at: i64) {
        self.xlines.push(XlineEntry {
            mask: mask.to_string(),
            reason: reason.to_string(),
            set_at,
        });
    }

    pub fn remove_xline(&mut self, mask: &str) -> bool {
        let before = self.xlines.len();
        self.xlines.retain(|x| !x.mask.eq_ignore_ascii_case(mask));
        self.xlines.len() != before
    }

    /// Evaluate one client against every table. Exemption flags win.
    pub fn check_client(&self, client: &Client) -> Option<BanVerdict> {
        if client.flags.exempt_kline {
            return None;
        }
        if let Some(d) = self
            .dlines
            .iter()
            .find(|d| match_mask(&d.mask, &client.sockhost))
        {
            return Some(BanVerdict::Dline(d.reason.clone()));
        }
        if let Some(k) = self.klines.iter().find(|k| {
            match_mask(&k.user, &client.username)
                && (match_mask(&k.host, &client.orig_host)
                    || match_mask(&k.host, &client.sockhost))
        }) {
            return Some(BanVerdict::Kline(k.reason.clone()));
        }
        if let Some(x) = self.xlines.iter().find(|x| match_mask(&x.mask, &client.info)) {
            return Some(BanVerdict::Xline(x.reason.clone()));
        }
        None
    }

    /// Probe an IP without a client, for pre-registration checks.
    pub fn check_ip(&self, sockhost: &str) -> Option<&DlineEntry> {
        self.dlines.iter().find(|d| match_mask(&d.mask, sockhost))
    }

    /// Sweep the live population after a ban lands. Returns the local
    /// users that now match, with the reason each should exit with.
    pub fn revalidate(&self, net: &Network) -> Vec<(String, String)> {
        net.clients()
            .filter(|c| c.is_user() && c.is_local())
            .filter_map(|c| {
                self.check_client(c)
                    .map(|v| (c.id.clone(), v.reason().to_string()))
            })
            .collect()
    }

    /// Drop expired temporary bans. Returns how many went away.
    pub fn expire(&mut self, now: i64) -> usize {
        let before = self.klines.len() + self.dlines.len();
        self.klines
            .retain(|k| k.expires.is_none_or(|e| e > now));
        self.dlines
            .retain(|d| d.expires.is_none_or(|e| e > now));
        before - (self.klines.len() + self.dlines.len())
    }

    /// TESTLINE probe: what would hit this user@host / gecos?
    pub fn test_mask(&self, user: &str, host: &str) -> Option<&KlineEntry> {
        self.klines
            .iter()
            .find(|k| match_mask(&k.user, user) && match_mask(&k.host, host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ConnId, LocalClient, Status};

    fn client(user: &str, host: &str, gecos: &str) -> Client {
        Client {
            status: Status::Client,
            name: "joe".into(),
            id: "42XAAAAAA".into(),
            username: user.into(),
            host: host.into(),
            orig_host: host.into(),
            sockhost: "192.0.2.5".into(),
            info: gecos.into(),
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
    fn test_kline_matches_real_host_and_ip() {
        let mut cache = BanCache::new();
        cache.add_kline("*", "192.0.2.*", "bad subnet", 1, None);
        let c = client("u", "cloak.example", "gecos");
        assert!(matches!(cache.check_client(&c), Some(BanVerdict::Kline(_))));
    }

    #[test]
    fn test_exempt_wins() {
        let mut cache = BanCache::new();
        cache.add_kline("*", "*", "everyone", 1, None);
        let mut c = client("u", "h", "g");
        c.flags.exempt_kline = true;
        assert!(cache.check_client(&c).is_none());
    }

    #[test]
    fn test_xline_on_gecos() {
        let mut cache = BanCache::new();
        cache.add_xline("*flood bot*", "drones", 1);
        let c = client("u", "h", "super flood bot 9000");
        assert!(matches!(cache.check_client(&c), Some(BanVerdict::Xline(_))));
    }

    #[test]
    fn test_expiry() {
        let mut cache = BanCache::new();
        cache.add_kline("*", "a.example", "temp", 1, Some(100));
        cache.add_kline("*", "b.example", "perm", 1, None);
        assert_eq!(cache.expire(200), 1);
        assert_eq!(cache.klines.len(), 1);
    }

    #[test]
    fn test_remove_kline_exact() {
        let mut cache = BanCache::new();
        cache.add_kline("u", "h.example", "r", 1, None);
        assert!(!cache.remove_kline("u", "other.example"));
        assert!(cache.remove_kline("U", "H.EXAMPLE"));
        assert!(cache.klines.is_empty());
    }
}
