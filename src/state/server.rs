//! Server auxiliary state.

use ferric_proto::Capab;

/// Extra bookkeeping attached to a server client, keyed by SID in the
/// store. The `Client` half carries the name/description; this half
/// carries tree structure and link capabilities.
#[derive(Debug, Default)]
pub struct Server {
    /// SIDs introduced through this server (direct children only).
    pub downstream: Vec<String>,
    /// UIDs of users whose `servptr` is this server.
    pub users: Vec<String>,
    /// Negotiated capability set (meaningful on directly-linked servers;
    /// remote servers inherit their route's link behavior).
    pub capab: Capab,
    /// The verbatim CAPAB string, kept for STATS output.
    pub capab_string: String,
}

impl Server {
    pub fn new(capab: Capab, capab_string: String) -> Self {
        Server {
            downstream: Vec::new(),
            users: Vec::new(),
            capab,
            capab_string,
        }
    }
}
