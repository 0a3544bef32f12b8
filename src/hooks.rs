//! The in-process hook/event bus.
//!
//! A string-keyed registry of ordered handler lists. Handlers run
//! synchronously in registration order and may mutate the payload;
//! the registry is append-only at runtime.

use std::collections::HashMap;

/// Payload passed through a hook invocation. Events that want a decision
/// back set it in `approved`; free-form context rides in the fields.
#[derive(Debug, Clone)]
pub struct HookPayload {
    /// Acting client id, when one exists.
    pub client: Option<String>,
    /// Target client id or channel name, when one exists.
    pub target: Option<String>,
    /// Event-specific text (mode delta, exit reason, ...).
    pub data: Option<String>,
    /// Decision slot for can_* events; handlers veto by clearing it.
    pub approved: bool,
}

impl HookPayload {
    pub fn new() -> Self {
        HookPayload {
            client: None,
            target: None,
            data: None,
            approved: true,
        }
    }

    pub fn with_client(mut self, id: &str) -> Self {
        self.client = Some(id.to_string());
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_data(mut self, data: &str) -> Self {
        self.data = Some(data.to_string());
        self
    }
}

impl Default for HookPayload {
    fn default() -> Self {
        Self::new()
    }
}

pub type HookFn = fn(&mut HookPayload);

/// The registry. Well-known event names are the `pub const` strings;
/// extensions may register under new names freely.
#[derive(Default)]
pub struct Hooks {
    table: HashMap<String, Vec<HookFn>>,
}

pub const H_CLIENT_EXIT: &str = "client_exit";
pub const H_NEW_LOCAL_USER: &str = "new_local_user";
pub const H_NEW_REMOTE_USER: &str = "new_remote_user";
pub const H_UMODE_CHANGED: &str = "umode_changed";
pub const H_SERVER_INTRODUCED: &str = "server_introduced";
pub const H_SERVER_EOB: &str = "server_eob";
pub const H_BURST_FINISHED: &str = "burst_finished";
pub const H_CLIENT_JOIN: &str = "client_join";
pub const H_CAN_KICK: &str = "can_kick";
pub const H_CAN_CREATE_CHANNEL: &str = "can_create_channel";
pub const H_GET_CHANNEL_ACCESS: &str = "get_channel_access";

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to an event's list, creating the event if new.
    pub fn add(&mut self, event: &str, f: HookFn) {
        self.table.entry(event.to_string()).or_default().push(f);
    }

    /// Run an event's handlers in registration order over the payload.
    pub fn call(&self, event: &str, payload: &mut HookPayload) {
        if let Some(handlers) = self.table.get(event) {
            for f in handlers {
                f(payload);
            }
        }
    }

    /// Convenience: run a can_* event and return the surviving decision.
    pub fn approves(&self, event: &str, payload: &mut HookPayload) -> bool {
        self.call(event, payload);
        payload.approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn veto(p: &mut HookPayload) {
        p.approved = false;
    }

    fn tag(p: &mut HookPayload) {
        p.data = Some(format!("{}+", p.data.as_deref().unwrap_or("")));
    }

    #[test]
    fn test_handlers_run_in_order() {
        let mut hooks = Hooks::new();
        hooks.add("x", tag);
        hooks.add("x", tag);
        let mut p = HookPayload::new();
        hooks.call("x", &mut p);
        assert_eq!(p.data.as_deref(), Some("++"));
    }

    #[test]
    fn test_veto() {
        let mut hooks = Hooks::new();
        let mut p = HookPayload::new().with_client("42XAAAAAA");
        assert!(hooks.approves(H_CAN_KICK, &mut p));
        hooks.add(H_CAN_KICK, veto);
        let mut p = HookPayload::new();
        assert!(!hooks.approves(H_CAN_KICK, &mut p));
    }

    #[test]
    fn test_unknown_event_is_noop() {
        let hooks = Hooks::new();
        let mut p = HookPayload::new();
        hooks.call("nothing_registered", &mut p);
        assert!(p.approved);
    }
}
