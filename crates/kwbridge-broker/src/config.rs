use std::path::PathBuf;

use kwbridge_frame::FrameConfig;
use kwbridge_transport::naming::{socket_name_for_current_user, validate_socket_name, Platform};

use crate::error::Result;
use crate::origins::{dev_extension_ids_from_env, OriginTable};

/// Environment variable overriding the socket location.
pub const SOCKET_ENV: &str = "KWBRIDGE_SOCKET";

/// Environment variable with the Apple team id used on macOS.
pub const APPLE_TEAM_ID_ENV: &str = "KWBRIDGE_APPLE_TEAM_ID";

/// Broker configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Socket path or pipe name. Defaults to the per-user name.
    pub socket_name: Option<PathBuf>,
    /// Frame and buffer limits.
    pub frame: FrameConfig,
    /// Extra Chromium extension ids accepted as the first protocol family.
    pub dev_extension_ids: Vec<String>,
    /// Team id for the macOS group container.
    pub apple_team_id: Option<String>,
}

impl BrokerConfig {
    /// Defaults overlaid with `KWBRIDGE_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            socket_name: std::env::var_os(SOCKET_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
            frame: FrameConfig::default(),
            dev_extension_ids: dev_extension_ids_from_env(),
            apple_team_id: std::env::var(APPLE_TEAM_ID_ENV)
                .ok()
                .filter(|value| !value.is_empty()),
        }
    }

    pub fn with_socket_name(mut self, name: impl Into<PathBuf>) -> Self {
        self.socket_name = Some(name.into());
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.frame = FrameConfig::with_max_message_size(max_message_size);
        self
    }

    /// The socket name to bind, checked against the platform length limit.
    pub fn resolve_socket_name(&self) -> Result<PathBuf> {
        let name = match &self.socket_name {
            Some(name) => name.clone(),
            None => socket_name_for_current_user(self.apple_team_id.as_deref())?,
        };
        validate_socket_name(Platform::current(), &name)?;
        Ok(name)
    }

    pub fn origin_table(&self) -> OriginTable {
        OriginTable::new(&self.dev_extension_ids)
    }
}

#[cfg(test)]
mod tests {
    use kwbridge_transport::TransportError;

    use super::*;
    use crate::error::BrokerError;
    use crate::settings::ExtensionFamily;

    #[test]
    fn explicit_socket_name_wins() {
        let config = BrokerConfig::default().with_socket_name("/tmp/kwbridge-test.sock");
        assert_eq!(
            config.resolve_socket_name().unwrap(),
            PathBuf::from("/tmp/kwbridge-test.sock")
        );
    }

    #[test]
    fn overlong_socket_name_is_rejected() {
        let long = format!("/tmp/{}.sock", "x".repeat(400));
        let err = BrokerConfig::default()
            .with_socket_name(long)
            .resolve_socket_name()
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Transport(TransportError::PathTooLong { .. })
        ));
    }

    #[test]
    fn max_message_size_sets_buffer_limit() {
        let config = BrokerConfig::default().with_max_message_size(500);
        assert_eq!(config.frame.max_message_size, 500);
        assert_eq!(config.frame.max_buffered_size, 504);
    }

    #[test]
    fn dev_ids_extend_origin_table() {
        let config = BrokerConfig {
            dev_extension_ids: vec!["devid".to_string()],
            ..BrokerConfig::default()
        };
        assert_eq!(
            config.origin_table().family("chrome-extension://devid/"),
            Some(ExtensionFamily::KeeWebConnect)
        );
    }
}
