//! Serde default functions for the configuration snapshot.

pub fn default_ping_time() -> u32 {
    120
}

pub fn default_registration_timeout() -> u32 {
    30
}

pub fn default_max_clients() -> u32 {
    1024
}

pub fn default_floodcount() -> u32 {
    8
}

pub fn default_client_flood() -> u32 {
    20
}

pub fn default_sendq_max() -> usize {
    400
}

pub fn default_ts_warn_delta() -> i64 {
    30
}

pub fn default_ts_max_delta() -> i64 {
    300
}

pub fn default_target_change_max() -> usize {
    10
}

pub fn default_caller_id_wait() -> i64 {
    60
}

pub fn default_pace_wait() -> i64 {
    10
}

pub fn default_max_nick_changes() -> u32 {
    5
}

pub fn default_nick_flood_time() -> i64 {
    20
}

pub fn default_spam_num() -> u32 {
    5
}

pub fn default_spam_time() -> i64 {
    60
}

pub fn default_split_servers() -> usize {
    4
}

pub fn default_split_users() -> usize {
    100
}

pub fn default_max_chans_per_user() -> usize {
    15
}

pub fn default_max_bans() -> usize {
    100
}

pub fn default_max_bans_large() -> usize {
    500
}

pub fn default_max_targets() -> usize {
    4
}

pub fn default_max_ratelimit_tokens() -> u32 {
    30
}

pub fn default_ssld_count() -> u32 {
    1
}

pub fn default_monitor_max() -> usize {
    100
}

pub fn default_accept_max() -> usize {
    20
}

pub fn default_class() -> String {
    "default".to_string()
}

pub fn default_port() -> u16 {
    6667
}

pub fn default_join_num() -> u32 {
    8
}

pub fn default_join_time() -> i64 {
    10
}
