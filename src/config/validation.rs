//! Configuration validation.
//!
//! Collects every problem instead of stopping at the first, so an operator
//! fixes a broken file in one pass.

use ferric_proto::valid_sid;

use super::types::Config;

/// Validate a snapshot. `Err` carries every discovered problem.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.serverinfo.name.is_empty() || !config.serverinfo.name.contains('.') {
        errors.push(format!(
            "serverinfo.name {:?} must be a dotted server name",
            config.serverinfo.name
        ));
    }

    if !valid_sid(&config.serverinfo.sid) {
        errors.push(format!(
            "serverinfo.sid {:?} must be a digit followed by two uppercase id characters",
            config.serverinfo.sid
        ));
    }

    if config.listeners.is_empty() {
        errors.push("at least one [[listen]] block is required".to_string());
    }

    for connect in &config.connects {
        if connect.send_password.is_empty() || connect.accept_password.is_empty() {
            errors.push(format!("connect {:?}: empty password", connect.name));
        }
        if let Some(sid) = &connect.sid {
            if !valid_sid(sid) {
                errors.push(format!("connect {:?}: bad sid {:?}", connect.name, sid));
            }
        }
    }

    for oper in &config.opers {
        if !oper.user_mask.contains('@') {
            errors.push(format!(
                "oper {:?}: user_mask {:?} must be user@host",
                oper.name, oper.user_mask
            ));
        }
        if oper.password.is_empty() {
            errors.push(format!("oper {:?}: empty password digest", oper.name));
        }
    }

    if config.general.ts_max_delta < config.general.ts_warn_delta {
        errors.push("general.ts_max_delta must be >= ts_warn_delta".to_string());
    }

    if config.channel.max_bans_large < config.channel.max_bans {
        errors.push("channel.max_bans_large must be >= max_bans".to_string());
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ListenBlock, OperBlock, OperPrivs};

    fn minimal() -> Config {
        toml::from_str(
            r#"
            [serverinfo]
            name = "irc.example.net"
            sid = "42X"
            description = "test"
            network_name = "TestNet"

            [[listen]]
            host = "::"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_minimal_valid() {
        assert!(validate(&minimal()).is_ok());
    }

    #[test]
    fn test_bad_sid_rejected() {
        let mut config = minimal();
        config.serverinfo.sid = "ABC".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("sid")));
    }

    #[test]
    fn test_no_listeners_rejected() {
        let mut config = minimal();
        config.listeners.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_oper_mask_shape() {
        let mut config = minimal();
        config.opers.push(OperBlock {
            name: "god".into(),
            user_mask: "nohost".into(),
            password: "$2b$12$abcdefghijklmnopqrstuv".into(),
            privs: OperPrivs::default(),
            snomask: String::new(),
            need_ssl: false,
            certfp: None,
        });
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("user_mask")));
    }

    #[test]
    fn test_listen_defaults() {
        let block: ListenBlock = toml::from_str(r#"host = "0.0.0.0""#).unwrap();
        assert_eq!(block.port, 6667);
        assert!(!block.ssl);
        assert!(!block.server);
    }
}
