//! The entity store.
//!
//! Canonical maps for every entity plus the name/UID/host indexes over
//! them. All name keys are RFC 1459 folded. The store enforces the index
//! agreement invariants: an entity reachable through one index is
//! reachable through all of them, and removal clears every index at once.

use std::collections::HashMap;

use ferric_proto::{irc_to_lower, match_mask};
use tracing::error;

use super::channel::Channel;
use super::client::{Client, ConnId, Status};
use super::server::Server;
use super::uid::UidGenerator;

/// Network-wide population counters.
#[derive(Debug, Default, Clone)]
pub struct Counts {
    pub local_users: usize,
    pub global_users: usize,
    pub invisible: usize,
    pub opers: usize,
    pub unknown: usize,
    pub local_servers: usize,
    pub global_servers: usize,
    pub max_local: usize,
    pub max_global: usize,
}

/// A reserved nick or channel mask.
#[derive(Debug, Clone)]
pub struct ResvEntry {
    pub mask: String,
    pub reason: String,
    pub set_by: String,
}

/// Operator-settable split-mode behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitSetting {
    Auto,
    On,
    Off,
}

/// Runtime tunables adjustable with SET; initialized from the config
/// snapshot and surviving REHASH.
#[derive(Debug, Clone)]
pub struct Tunables {
    pub floodcount: u32,
    pub max_clients: u32,
    pub spam_num: u32,
    pub spam_time: i64,
    pub split_servers: usize,
    pub split_users: usize,
    pub autoconn: bool,
    pub operstring: String,
    pub adminstring: String,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            floodcount: 8,
            max_clients: 1024,
            spam_num: 5,
            spam_time: 60,
            split_servers: 4,
            split_users: 100,
            autoconn: true,
            operstring: "is an IRC Operator".to_string(),
            adminstring: "is a Server Administrator".to_string(),
        }
    }
}

/// The authoritative in-memory replica of the network.
#[derive(Debug)]
pub struct Network {
    /// Our SID.
    pub me: String,
    pub me_name: String,
    pub me_info: String,
    pub start_time: i64,

    /// Registered entities by stable id (9-char UID or 3-char SID).
    clients: HashMap<String, Client>,
    /// Folded network name -> stable id.
    names: HashMap<String, String>,
    /// Visible hostname -> ids (multi-valued).
    hosts: HashMap<String, Vec<String>>,
    /// Server auxiliary blocks by SID.
    pub servers: HashMap<String, Server>,
    /// Channels by folded name.
    channels: HashMap<String, Channel>,
    /// Accepted sockets that have not registered yet.
    pub pending: HashMap<ConnId, Client>,
    /// ConnId -> registered stable id, for dispatch on registered links.
    conn_owner: HashMap<ConnId, String>,

    pub uid_gen: UidGenerator,
    pub resvs: Vec<ResvEntry>,
    pub counts: Counts,
    pub tunables: Tunables,
    pub split_setting: SplitSetting,
    pub split_active: bool,
}

impl Network {
    pub fn new(sid: &str, name: &str, info: &str, now: i64) -> Self {
        let mut net = Network {
            me: sid.to_string(),
            me_name: name.to_string(),
            me_info: info.to_string(),
            start_time: now,
            clients: HashMap::new(),
            names: HashMap::new(),
            hosts: HashMap::new(),
            servers: HashMap::new(),
            channels: HashMap::new(),
            pending: HashMap::new(),
            conn_owner: HashMap::new(),
            uid_gen: UidGenerator::new(sid),
            resvs: Vec::new(),
            counts: Counts::default(),
            tunables: Tunables::default(),
            split_setting: SplitSetting::Auto,
            split_active: false,
        };

        // ourselves, as the root of the tree
        let me = Client {
            status: Status::Me,
            name: name.to_string(),
            id: sid.to_string(),
            username: String::new(),
            host: name.to_string(),
            orig_host: name.to_string(),
            sockhost: String::new(),
            info: info.to_string(),
            umodes: Default::default(),
            flags: Default::default(),
            ts: now,
            hopcount: 0,
            servptr: None,
            from_conn: None,
            away: None,
            account: None,
            certfp: None,
            channels: Default::default(),
            local: None,
        };
        net.insert_indexed(me);
        net.servers.insert(sid.to_string(), Server::default());
        net.counts.global_servers = 1;
        net
    }

    // ------------------------------------------------------------------
    // index maintenance
    // ------------------------------------------------------------------

    fn insert_indexed(&mut self, client: Client) {
        let id = client.id.clone();
        let folded = irc_to_lower(&client.name);

        debug_assert!(
            !self.clients.contains_key(&id),
            "duplicate id insertion: {id}"
        );
        if let Some(old) = self.names.insert(folded, id.clone()) {
            if old != id {
                // Documented hazard: later insertion wins, earlier orphaned.
                error!(old = %old, new = %id, name = %client.name, "name index collision");
            }
        }
        if client.is_user() {
            self.hosts.entry(client.host.clone()).or_default().push(id.clone());
        }
        self.clients.insert(id, client);
    }

    fn unindex(&mut self, id: &str) -> Option<Client> {
        let client = self.clients.remove(id)?;
        let folded = irc_to_lower(&client.name);
        if self.names.get(&folded).map(String::as_str) == Some(id) {
            self.names.remove(&folded);
        }
        if let Some(ids) = self.hosts.get_mut(&client.host) {
            ids.retain(|h| h != id);
            if ids.is_empty() {
                self.hosts.remove(&client.host);
            }
        }
        Some(client)
    }

    // ------------------------------------------------------------------
    // lookups
    // ------------------------------------------------------------------

    pub fn find_id(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn find_id_mut(&mut self, id: &str) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    /// Look up a client (user or server) by network name.
    pub fn find_name(&self, name: &str) -> Option<&Client> {
        self.clients.get(self.names.get(&irc_to_lower(name))?)
    }

    pub fn find_name_mut(&mut self, name: &str) -> Option<&mut Client> {
        let id = self.names.get(&irc_to_lower(name))?.clone();
        self.clients.get_mut(&id)
    }

    /// Resolve a name or id to a stable id.
    pub fn resolve(&self, name_or_id: &str) -> Option<&Client> {
        self.clients
            .get(name_or_id)
            .or_else(|| self.find_name(name_or_id))
    }

    /// All users on a visible hostname.
    pub fn find_host(&self, host: &str) -> impl Iterator<Item = &Client> {
        self.hosts
            .get(host)
            .into_iter()
            .flatten()
            .filter_map(|id| self.clients.get(id))
    }

    /// Iterate all registered clients.
    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Find the server a mask refers to, matching wildcards against names.
    pub fn find_server_mask(&self, mask: &str) -> Option<&Client> {
        self.clients
            .values()
            .find(|c| c.is_server() && match_mask(mask, &c.name))
    }

    // ------------------------------------------------------------------
    // users
    // ------------------------------------------------------------------

    /// Insert a registered user and maintain counters.
    pub fn add_user(&mut self, client: Client) {
        debug_assert!(client.status == Status::Client);
        let local = client.is_local();
        let invisible = client.umodes.invisible;
        let servptr = client.servptr.clone();
        let id = client.id.clone();

        self.insert_indexed(client);
        if let Some(sid) = servptr {
            if let Some(server) = self.servers.get_mut(&sid) {
                server.users.push(id);
            }
        }

        self.counts.global_users += 1;
        self.counts.max_global = self.counts.max_global.max(self.counts.global_users);
        if invisible {
            self.counts.invisible += 1;
        }
        if local {
            self.counts.local_users += 1;
            self.counts.max_local = self.counts.max_local.max(self.counts.local_users);
        }
    }

    /// Remove a user from every index. Membership teardown is the
    /// caller's job (it needs to emit channel messages first).
    pub fn remove_user(&mut self, uid: &str) -> Option<Client> {
        let client = self.unindex(uid)?;
        debug_assert!(client.status == Status::Client || client.status == Status::Rejected);

        if let Some(sid) = &client.servptr {
            if let Some(server) = self.servers.get_mut(sid) {
                server.users.retain(|u| u != uid);
            }
        }
        if let Some(conn) = client.local.as_ref().and_then(|l| l.conn) {
            self.conn_owner.remove(&conn);
        }

        self.counts.global_users = self.counts.global_users.saturating_sub(1);
        if client.umodes.invisible {
            self.counts.invisible = self.counts.invisible.saturating_sub(1);
        }
        if client.umodes.oper {
            self.counts.opers = self.counts.opers.saturating_sub(1);
        }
        if client.is_local() {
            self.counts.local_users = self.counts.local_users.saturating_sub(1);
        }
        Some(client)
    }

    /// Change a user's nick, keeping the name index coherent. A pure case
    /// change updates the display form without touching the index slot.
    pub fn rename_user(&mut self, uid: &str, new_nick: &str) {
        let Some(client) = self.clients.get_mut(uid) else {
            return;
        };
        let old_folded = irc_to_lower(&client.name);
        let new_folded = irc_to_lower(new_nick);
        client.name = new_nick.to_string();
        if old_folded != new_folded {
            if self.names.get(&old_folded).map(String::as_str) == Some(uid) {
                self.names.remove(&old_folded);
            }
            self.names.insert(new_folded, uid.to_string());
        }
    }

    // ------------------------------------------------------------------
    // servers
    // ------------------------------------------------------------------

    /// Insert a registered server (directly linked or introduced by SID).
    pub fn add_server(&mut self, client: Client, aux: Server) {
        debug_assert!(client.status == Status::Server);
        let sid = client.id.clone();
        let local = client.is_local();
        let parent = client.servptr.clone();

        self.insert_indexed(client);
        self.servers.insert(sid.clone(), aux);
        if let Some(parent) = parent {
            if let Some(server) = self.servers.get_mut(&parent) {
                server.downstream.push(sid);
            }
        }
        self.counts.global_servers += 1;
        if local {
            self.counts.local_servers += 1;
        }
    }

    /// Remove one server entity. Cascade removal of the subtree is driven
    /// by the SQUIT handling above the store.
    pub fn remove_server(&mut self, sid: &str) -> Option<Client> {
        let client = self.unindex(sid)?;
        self.servers.remove(sid);
        if let Some(parent) = &client.servptr {
            if let Some(server) = self.servers.get_mut(parent) {
                server.downstream.retain(|s| s != sid);
            }
        }
        if let Some(conn) = client.local.as_ref().and_then(|l| l.conn) {
            self.conn_owner.remove(&conn);
        }
        self.counts.global_servers = self.counts.global_servers.saturating_sub(1);
        if client.is_local() {
            self.counts.local_servers = self.counts.local_servers.saturating_sub(1);
        }
        Some(client)
    }

    /// All SIDs in the subtree rooted at `sid`, including itself,
    /// children-first so removal can proceed leaf-upward.
    pub fn subtree_of(&self, sid: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(server) = self.servers.get(sid) {
            for child in &server.downstream {
                out.extend(self.subtree_of(child));
            }
        }
        out.push(sid.to_string());
        out
    }

    // ------------------------------------------------------------------
    // connections
    // ------------------------------------------------------------------

    pub fn bind_conn(&mut self, conn: ConnId, id: &str) {
        self.conn_owner.insert(conn, id.to_string());
    }

    pub fn conn_owner(&self, conn: ConnId) -> Option<&str> {
        self.conn_owner.get(&conn).map(String::as_str)
    }

    // ------------------------------------------------------------------
    // channels
    // ------------------------------------------------------------------

    pub fn get_channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&irc_to_lower(name))
    }

    pub fn get_channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&irc_to_lower(name))
    }

    pub fn create_channel(&mut self, name: &str, ts: i64) -> &mut Channel {
        self.channels
            .entry(irc_to_lower(name))
            .or_insert_with(|| Channel::new(name, ts))
    }

    pub fn destroy_channel(&mut self, name: &str) -> Option<Channel> {
        self.channels.remove(&irc_to_lower(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.values().map(|c| c.name.clone()).collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    // ------------------------------------------------------------------
    // resvs
    // ------------------------------------------------------------------

    pub fn find_resv(&self, name: &str) -> Option<&ResvEntry> {
        self.resvs.iter().find(|r| match_mask(&r.mask, name))
    }

    pub fn add_resv(&mut self, mask: &str, reason: &str, set_by: &str) -> bool {
        if self.resvs.iter().any(|r| irc_to_lower(&r.mask) == irc_to_lower(mask)) {
            return false;
        }
        self.resvs.push(ResvEntry {
            mask: mask.to_string(),
            reason: reason.to_string(),
            set_by: set_by.to_string(),
        });
        true
    }

    pub fn remove_resv(&mut self, mask: &str) -> bool {
        let before = self.resvs.len();
        self.resvs
            .retain(|r| irc_to_lower(&r.mask) != irc_to_lower(mask));
        self.resvs.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::client::LocalClient;

    fn test_net() -> Network {
        Network::new("42X", "irc.example.net", "test server", 1_700_000_000)
    }

    fn test_user(net: &mut Network, nick: &str, local: bool) -> String {
        let uid = net.uid_gen.next_uid();
        let client = Client {
            status: Status::Client,
            name: nick.to_string(),
            id: uid.clone(),
            username: "u".into(),
            host: "host.example".into(),
            orig_host: "host.example".into(),
            sockhost: "127.0.0.1".into(),
            info: "gecos".into(),
            umodes: Default::default(),
            flags: Default::default(),
            ts: 1_700_000_000,
            hopcount: if local { 0 } else { 1 },
            servptr: Some("42X".into()),
            from_conn: None,
            away: None,
            account: None,
            certfp: None,
            channels: Default::default(),
            local: local.then(LocalClient::default),
        };
        net.add_user(client);
        uid
    }

    #[test]
    fn test_indexes_agree() {
        let mut net = test_net();
        let uid = test_user(&mut net, "Alice", true);
        assert_eq!(net.find_name("alice").unwrap().id, uid);
        assert_eq!(net.find_id(&uid).unwrap().name, "Alice");
        assert_eq!(net.find_host("host.example").count(), 1);
    }

    #[test]
    fn test_removal_clears_all_indexes() {
        let mut net = test_net();
        let uid = test_user(&mut net, "Alice", true);
        net.remove_user(&uid);
        assert!(net.find_name("alice").is_none());
        assert!(net.find_id(&uid).is_none());
        assert_eq!(net.find_host("host.example").count(), 0);
        assert_eq!(net.counts.global_users, 0);
    }

    #[test]
    fn test_rename_case_only_keeps_index() {
        let mut net = test_net();
        let uid = test_user(&mut net, "alice", true);
        net.rename_user(&uid, "Alice");
        assert_eq!(net.find_name("ALICE").unwrap().id, uid);
        assert_eq!(net.find_id(&uid).unwrap().name, "Alice");
    }

    #[test]
    fn test_rename_moves_index() {
        let mut net = test_net();
        let uid = test_user(&mut net, "alice", true);
        net.rename_user(&uid, "bob");
        assert!(net.find_name("alice").is_none());
        assert_eq!(net.find_name("bob").unwrap().id, uid);
    }

    #[test]
    fn test_subtree_enumeration() {
        let mut net = test_net();
        for (sid, parent) in [("1AA", "42X"), ("2BB", "1AA"), ("3CC", "1AA")] {
            let client = Client {
                status: Status::Server,
                name: format!("srv{sid}.example"),
                id: sid.to_string(),
                username: String::new(),
                host: format!("srv{sid}.example"),
                orig_host: String::new(),
                sockhost: String::new(),
                info: "leaf".into(),
                umodes: Default::default(),
                flags: Default::default(),
                ts: 0,
                hopcount: 1,
                servptr: Some(parent.to_string()),
                from_conn: None,
                away: None,
                account: None,
                certfp: None,
                channels: Default::default(),
                local: None,
            };
            net.add_server(client, Server::default());
        }
        let subtree = net.subtree_of("1AA");
        assert_eq!(subtree.last().map(String::as_str), Some("1AA"));
        assert!(subtree.contains(&"2BB".to_string()));
        assert!(subtree.contains(&"3CC".to_string()));
        assert_eq!(net.counts.global_servers, 4);
    }

    #[test]
    fn test_counts_track_max() {
        let mut net = test_net();
        test_user(&mut net, "a", true);
        let b = test_user(&mut net, "b", true);
        net.remove_user(&b);
        assert_eq!(net.counts.local_users, 1);
        assert_eq!(net.counts.max_local, 2);
    }

    #[test]
    fn test_resv_match() {
        let mut net = test_net();
        assert!(net.add_resv("#bad*", "reserved", "config"));
        assert!(!net.add_resv("#BAD*", "dup", "config"));
        assert!(net.find_resv("#badchan").is_some());
        assert!(net.find_resv("#good").is_none());
        assert!(net.remove_resv("#bad*"));
    }
}
