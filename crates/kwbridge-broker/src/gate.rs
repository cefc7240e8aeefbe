//! Handshake validation.
//!
//! The first message on a socket connection names the extension origin and
//! the browser process the native messaging host was launched from. The
//! origin only selects a display name; the process ancestry is what gets
//! shown to the user when a request needs approval.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::connection::ConnectionIdentity;
use crate::error::{BrokerError, Result};
use crate::origins::{display_app_name, OriginTable};
use crate::process::{ProcessEntry, ProcessInfo};

/// App name used for the trusted desktop-embedded extension.
pub const SAFARI_APP_NAME: &str = "Safari";

/// Label used when the parent process cannot be resolved.
pub const UNIDENTIFIED_BROWSER: &str = "Unidentified browser";

/// Shell that may sit between the browser and the native messaging host.
pub const INTERMEDIATE_SHELL: &str = "cmd";

/// Browsers only launch the host through [`INTERMEDIATE_SHELL`] on Windows.
const SHELL_HOP_DEFAULT: bool = cfg!(windows);

/// Validates handshakes and resolves the calling application.
#[derive(Clone)]
pub struct IdentityGate {
    origins: Arc<OriginTable>,
    process_info: Arc<dyn ProcessInfo>,
    shell_hop: bool,
}

impl IdentityGate {
    pub fn new(origins: Arc<OriginTable>, process_info: Arc<dyn ProcessInfo>) -> Self {
        Self {
            origins,
            process_info,
            shell_hop: SHELL_HOP_DEFAULT,
        }
    }

    /// Whether a parent named [`INTERMEDIATE_SHELL`] is skipped in favour of
    /// its own parent. On by default only on Windows.
    pub fn with_shell_hop(mut self, enabled: bool) -> Self {
        self.shell_hop = enabled;
        self
    }

    /// Establish the identity claimed by a handshake message.
    ///
    /// Missing `origin`, `pid`, or (for browser-hosted extensions) `ppid` is a
    /// handshake violation. A failed process lookup is not: the connection
    /// is accepted as [`UNIDENTIFIED_BROWSER`].
    pub async fn identify(&self, handshake: &Value) -> Result<ConnectionIdentity> {
        let origin = handshake
            .get("origin")
            .and_then(Value::as_str)
            .filter(|origin| !origin.is_empty())
            .ok_or_else(|| BrokerError::Handshake("empty origin".to_string()))?;

        let pid = handshake
            .get("pid")
            .and_then(parse_pid)
            .ok_or_else(|| BrokerError::Handshake("empty pid".to_string()))?;

        let extension_name = self.origins.extension_name(origin).to_string();

        if self.origins.is_trusted_embedded(origin) {
            return Ok(ConnectionIdentity {
                app_name: SAFARI_APP_NAME.to_string(),
                extension_name,
                pid,
                ppid: handshake.get("ppid").and_then(parse_pid),
                supports_notifications: false,
            });
        }

        let ppid = handshake
            .get("ppid")
            .and_then(parse_pid)
            .ok_or_else(|| BrokerError::Handshake("empty ppid".to_string()))?;

        let app_name = match self.resolve_parent(ppid).await {
            Some(parent) => display_app_name(&parent.app_name),
            None => {
                warn!(ppid, "cannot get process info, assuming the connection is not identified");
                UNIDENTIFIED_BROWSER.to_string()
            }
        };

        debug!(origin, pid, ppid, app_name = %app_name, "handshake identified");

        Ok(ConnectionIdentity {
            app_name,
            extension_name,
            pid,
            ppid: Some(ppid),
            supports_notifications: true,
        })
    }

    /// Look up `ppid`, climbing one extra level past an intermediate shell
    /// when the shell hop is enabled.
    async fn resolve_parent(&self, ppid: u32) -> Option<ProcessEntry> {
        let parent = match self.process_info.lookup(ppid).await {
            Ok(parent) => parent,
            Err(err) => {
                error!(pid = ppid, error = %err, "cannot get process info");
                return None;
            }
        };

        if !self.shell_hop || parent.app_name != INTERMEDIATE_SHELL {
            return Some(parent);
        }

        match self.process_info.lookup(parent.ppid).await {
            Ok(launcher) => Some(launcher),
            Err(err) => {
                error!(
                    pid = parent.ppid,
                    error = %err,
                    "cannot get process info, assuming {INTERMEDIATE_SHELL} is the launcher"
                );
                Some(parent)
            }
        }
    }
}

/// Accept a positive pid as a JSON number or a numeric string.
fn parse_pid(value: &Value) -> Option<u32> {
    let pid = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }?;
    (pid != 0).then_some(pid)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::origins::KEEWEB_CONNECT_SAFARI;
    use crate::process::ProcessLookupError;

    struct FakeProcesses(HashMap<u32, ProcessEntry>);

    impl FakeProcesses {
        fn new(entries: &[(u32, &str, u32)]) -> Arc<Self> {
            Arc::new(Self(
                entries
                    .iter()
                    .map(|(pid, name, ppid)| {
                        (
                            *pid,
                            ProcessEntry {
                                app_name: (*name).to_string(),
                                ppid: *ppid,
                            },
                        )
                    })
                    .collect(),
            ))
        }
    }

    #[async_trait]
    impl ProcessInfo for FakeProcesses {
        async fn lookup(&self, pid: u32) -> std::result::Result<ProcessEntry, ProcessLookupError> {
            self.0
                .get(&pid)
                .cloned()
                .ok_or(ProcessLookupError::NotFound(pid))
        }
    }

    fn gate(entries: &[(u32, &str, u32)]) -> IdentityGate {
        IdentityGate::new(Arc::new(OriginTable::default()), FakeProcesses::new(entries))
    }

    #[tokio::test]
    async fn chrome_parent_is_mapped() {
        let gate = gate(&[(50, "chrome", 1)]);
        let identity = gate
            .identify(&json!({
                "origin": "chrome-extension://pikpfmjfkekaeinceagbebpfkmkdlcjk/",
                "pid": 100,
                "ppid": 50
            }))
            .await
            .unwrap();

        assert_eq!(
            identity,
            ConnectionIdentity {
                app_name: "Google Chrome".to_string(),
                extension_name: "KeeWeb Connect".to_string(),
                pid: 100,
                ppid: Some(50),
                supports_notifications: true,
            }
        );
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let gate = gate(&[]);
        for handshake in [
            json!({"pid": 1, "ppid": 2}),
            json!({"origin": "", "pid": 1, "ppid": 2}),
            json!({"origin": "keeweb-connect@keeweb.info", "ppid": 2}),
            json!({"origin": "keeweb-connect@keeweb.info", "pid": 0, "ppid": 2}),
            json!({"origin": "keeweb-connect@keeweb.info", "pid": 1}),
        ] {
            let err = gate.identify(&handshake).await.unwrap_err();
            assert!(matches!(err, BrokerError::Handshake(_)), "{handshake}");
        }
    }

    #[tokio::test]
    async fn safari_needs_no_parent() {
        let gate = gate(&[]);
        let identity = gate
            .identify(&json!({"origin": KEEWEB_CONNECT_SAFARI, "pid": "321"}))
            .await
            .unwrap();
        assert_eq!(identity.app_name, "Safari");
        assert_eq!(identity.pid, 321);
        assert!(!identity.supports_notifications);
    }

    #[tokio::test]
    async fn failed_lookup_is_unidentified() {
        let gate = gate(&[]);
        let identity = gate
            .identify(&json!({"origin": "moz-extension://x", "pid": 10, "ppid": 11}))
            .await
            .unwrap();
        assert_eq!(identity.app_name, UNIDENTIFIED_BROWSER);
        assert_eq!(identity.extension_name, "unknown");
    }

    #[tokio::test]
    async fn shell_parent_climbs_one_level() {
        let gate =
            gate(&[(50, "cmd", 40), (40, "msedge", 30), (30, "cmd", 1)]).with_shell_hop(true);
        let identity = gate
            .identify(&json!({"origin": "keepassxc-browser@keepassxc.org", "pid": 60, "ppid": 50}))
            .await
            .unwrap();
        assert_eq!(identity.app_name, "Microsoft Edge");
        assert_eq!(identity.extension_name, "KeePassXC-Browser");
    }

    #[tokio::test]
    async fn shell_is_kept_when_its_parent_is_gone() {
        let gate = gate(&[(50, "cmd", 40)]).with_shell_hop(true);
        let identity = gate
            .identify(&json!({"origin": "keeweb-connect@keeweb.info", "pid": 60, "ppid": 50}))
            .await
            .unwrap();
        assert_eq!(identity.app_name, "Cmd");
    }

    #[tokio::test]
    async fn shell_is_the_browser_without_hop() {
        let gate = gate(&[(50, "cmd", 40), (40, "msedge", 30)]).with_shell_hop(false);
        let identity = gate
            .identify(&json!({"origin": "keeweb-connect@keeweb.info", "pid": 60, "ppid": 50}))
            .await
            .unwrap();
        assert_eq!(identity.app_name, "Cmd");
    }

    #[tokio::test]
    #[cfg(not(windows))]
    async fn shell_hop_is_off_outside_windows() {
        let gate = gate(&[(50, "cmd", 40), (40, "chrome", 30)]);
        let identity = gate
            .identify(&json!({"origin": "keeweb-connect@keeweb.info", "pid": 60, "ppid": 50}))
            .await
            .unwrap();
        assert_eq!(identity.app_name, "Cmd");
    }

    #[test]
    fn pid_parsing() {
        assert_eq!(parse_pid(&json!(12)), Some(12));
        assert_eq!(parse_pid(&json!("12")), Some(12));
        assert_eq!(parse_pid(&json!(-1)), None);
        assert_eq!(parse_pid(&json!(true)), None);
        assert_eq!(parse_pid(&json!(0)), None);
    }
}
