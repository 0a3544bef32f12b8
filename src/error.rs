//! Unified error handling for ferricd.
//!
//! Handlers report failures as [`HandlerError`]; the dispatcher translates
//! them into numeric replies for clients or link drops for servers, per the
//! failure taxonomy: protocol errors from clients get numerics, protocol
//! errors from servers drop the link, policy errors never touch link state.

use ferric_proto::Numeric;
use thiserror::Error;

/// Errors that can occur during command handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("not enough parameters")]
    NeedMoreParams,

    #[error("not registered")]
    NotRegistered,

    #[error("already registered")]
    AlreadyRegistered,

    #[error("no privileges")]
    NoPrivileges,

    /// A fully-formed numeric reply: code plus the args after the target.
    #[error("numeric {0:?}")]
    Numeric(Numeric, Vec<String>),

    /// Malformed traffic on a server link. The link is dropped with this
    /// text as the SQUIT reason.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The connection should be closed (reason already delivered or implied).
    #[error("drop link: {0}")]
    Drop(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Static code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NeedMoreParams => "need_more_params",
            Self::NotRegistered => "not_registered",
            Self::AlreadyRegistered => "already_registered",
            Self::NoPrivileges => "no_privileges",
            Self::Numeric(..) => "numeric",
            Self::Protocol(_) => "protocol_violation",
            Self::Drop(_) => "drop",
            Self::Internal(_) => "internal_error",
        }
    }

    /// The numeric reply for errors that warrant one, as `(code, args)`
    /// where args follow the target nick. `None` means no client-visible
    /// reply (link drops, internal errors).
    pub fn to_numeric(&self, cmd_name: &str) -> Option<(Numeric, Vec<String>)> {
        match self {
            Self::NeedMoreParams => Some((
                Numeric::ERR_NEEDMOREPARAMS,
                vec![cmd_name.to_string(), "Not enough parameters".to_string()],
            )),
            Self::NotRegistered => Some((
                Numeric::ERR_NOTREGISTERED,
                vec!["You have not registered".to_string()],
            )),
            Self::AlreadyRegistered => Some((
                Numeric::ERR_ALREADYREGISTRED,
                vec!["You may not reregister".to_string()],
            )),
            Self::NoPrivileges => Some((
                Numeric::ERR_NOPRIVILEGES,
                vec!["Permission Denied - You're not an IRC operator".to_string()],
            )),
            Self::Numeric(num, args) => Some((*num, args.clone())),
            Self::Protocol(_) | Self::Drop(_) | Self::Internal(_) => None,
        }
    }
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Convenience constructors for the common policy numerics.
impl HandlerError {
    pub fn no_such_nick(name: &str) -> Self {
        Self::Numeric(
            Numeric::ERR_NOSUCHNICK,
            vec![name.to_string(), "No such nick/channel".to_string()],
        )
    }

    pub fn no_such_channel(name: &str) -> Self {
        Self::Numeric(
            Numeric::ERR_NOSUCHCHANNEL,
            vec![name.to_string(), "No such channel".to_string()],
        )
    }

    pub fn no_such_server(name: &str) -> Self {
        Self::Numeric(
            Numeric::ERR_NOSUCHSERVER,
            vec![name.to_string(), "No such server".to_string()],
        )
    }

    pub fn not_on_channel(chan: &str) -> Self {
        Self::Numeric(
            Numeric::ERR_NOTONCHANNEL,
            vec![chan.to_string(), "You're not on that channel".to_string()],
        )
    }

    pub fn chanop_needed(chan: &str) -> Self {
        Self::Numeric(
            Numeric::ERR_CHANOPRIVSNEEDED,
            vec![chan.to_string(), "You're not a channel operator".to_string()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(HandlerError::NeedMoreParams.error_code(), "need_more_params");
        assert_eq!(
            HandlerError::Internal("x".into()).error_code(),
            "internal_error"
        );
    }

    #[test]
    fn test_to_numeric() {
        let (num, args) = HandlerError::NeedMoreParams.to_numeric("JOIN").unwrap();
        assert_eq!(num, Numeric::ERR_NEEDMOREPARAMS);
        assert_eq!(args[0], "JOIN");

        assert!(HandlerError::Protocol("x".into()).to_numeric("JOIN").is_none());
    }

    #[test]
    fn test_policy_constructors() {
        match HandlerError::chanop_needed("#c") {
            HandlerError::Numeric(Numeric::ERR_CHANOPRIVSNEEDED, args) => {
                assert_eq!(args[0], "#c");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
