//! The channel mode engine.
//!
//! A 256-slot table maps each mode letter to a handler class; a parallel
//! table does the same for `$` extban letters. The engine parses compound
//! `+ov-b`-style strings, authorizes per source, applies, and emits
//! batched MODE/TMODE. Ban evaluation (with the per-membership cache
//! keyed on the channel's `bants` version) lives in [`banmatch`].

mod apply;
mod banmatch;
mod extban;
mod mask;
mod table;

pub use apply::{
    MAXMODEPARAMS, MAXMODEPARAMS_SERV, ModeSource, channel_mode, mlock_forbids, strip_all_modes,
};
pub use banmatch::{
    CanSend, JoinDenial, can_join, can_send, check_banned_cached, find_list_match, is_banned,
    is_quieted,
};
pub use extban::{ExtbanResult, ExtbanTable};
pub use mask::{pretty_mask, mask_matches_client, same_mask, PrettyMask};
pub use table::{ModeKind, ModeTable, SimpleFlag, Visibility};
