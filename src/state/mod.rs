//! Network state: the entity store and everything it owns.
//!
//! One [`Network`] instance holds the authoritative replica of the whole
//! network: clients (local and remote, users and servers), channels,
//! memberships, list-mode entries, reserved names, and the runtime
//! tunables. It is owned exclusively by the engine task; handlers receive
//! `&mut Network` and run to completion, so no entity can change under a
//! handler's feet.

mod channel;
mod client;
mod server;
mod store;
mod uid;

pub use channel::{Channel, ChannelModes, ListEntry, ListKind, Membership, Topic};
pub use client::{Client, ClientFlags, ConnId, LocalClient, OperInfo, Status, UserModes};
pub use server::Server;
pub use store::{Counts, Network, ResvEntry, SplitSetting, Tunables};
pub use uid::UidGenerator;

/// Sentinel TS assigned by SAVE.
pub const SAVE_TS: i64 = 100;

/// TS values below this are treated as bogus during arbitration.
pub const BOGUS_TS_FLOOR: i64 = 800_000_000;
