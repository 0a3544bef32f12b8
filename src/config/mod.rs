//! Configuration loading and management.
//!
//! The daemon reads one TOML file into an immutable [`Config`] snapshot.
//! REHASH re-reads the file and swaps the snapshot atomically between
//! events; nothing holds a reference across the swap boundary.
//!
//! Submodules:
//! - [`types`]: the snapshot structs (server info, general tunables, channel knobs)
//! - [`blocks`]: repeatable blocks (listeners, connects, opers, classes, aliases, seed bans)
//! - [`defaults`]: serde default functions
//! - [`validation`]: the all-errors validation pass

mod blocks;
mod defaults;
mod types;
mod validation;

pub use blocks::{
    AliasBlock, ClassBlock, ConnectBlock, ListenBlock, OperBlock, OperPrivs, SeedBans,
};
pub use types::{ChannelConfig, Config, GeneralConfig, LogFormat, ServerInfo};
pub use validation::validate;

use thiserror::Error;

/// Errors raised while loading the snapshot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load and parse the snapshot from a TOML file.
    pub fn load(path: &str) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [serverinfo]
        name = "irc.example.net"
        sid = "42X"
        description = "test server"
        network_name = "ExampleNet"

        [[listen]]
        host = "127.0.0.1"
        port = 6667
    "#;

    #[test]
    fn test_load_minimal() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(f.path().to_str().unwrap()).unwrap();
        assert_eq!(config.serverinfo.name, "irc.example.net");
        assert_eq!(config.serverinfo.sid, "42X");
        assert_eq!(config.general.ping_time, 120);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/ferricd.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_toml() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"[serverinfo\nname = ").unwrap();
        assert!(matches!(
            Config::load(f.path().to_str().unwrap()),
            Err(ConfigError::Parse(_))
        ));
    }
}
