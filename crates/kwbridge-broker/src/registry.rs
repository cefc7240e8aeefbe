//! Application-wide table of live connections and notification fan-out.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::{ConnectionId, ConnectionInfo};
use crate::inpage::PagePort;

/// Where messages for a connection are written.
#[derive(Clone)]
pub enum Outbound {
    /// Queue drained by the socket's writer task.
    Socket(mpsc::UnboundedSender<Value>),
    /// The page the in-page transport is attached to.
    Page {
        port: Arc<dyn PagePort>,
        origin: String,
    },
}

impl Outbound {
    /// Hand `message` to the transport. Never waits.
    ///
    /// Returns false if the transport is already gone.
    pub fn deliver(&self, message: Value) -> bool {
        match self {
            Outbound::Socket(tx) => tx.send(message).is_ok(),
            Outbound::Page { port, origin } => {
                port.post_message(crate::inpage::wrap_response(message), origin);
                true
            }
        }
    }
}

#[derive(Clone)]
struct Entry {
    info: Option<ConnectionInfo>,
    outbound: Outbound,
    cancel: CancellationToken,
}

/// Shared map from connection id to its outbound path and identity.
///
/// Entries are inserted on accept, gain an identity on handshake, and are
/// removed when the owning task closes the connection.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<ConnectionId, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection.
    pub fn insert(&self, id: ConnectionId, outbound: Outbound, cancel: CancellationToken) {
        self.write().insert(
            id,
            Entry {
                info: None,
                outbound,
                cancel,
            },
        );
    }

    /// Record the handshake identity. Returns false if the entry is gone.
    pub fn activate(&self, info: ConnectionInfo) -> bool {
        match self.write().get_mut(&info.connection_id) {
            Some(entry) => {
                entry.info = Some(info);
                true
            }
            None => false,
        }
    }

    /// Drop the entry. Returns whether it existed.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.write().remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().contains_key(&id)
    }

    /// Identity of an active connection.
    pub fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.read().get(&id).and_then(|entry| entry.info.clone())
    }

    /// Send `event` to every active connection that accepts notifications.
    ///
    /// Targets are snapshotted under the read lock; delivery happens after
    /// it is released, so a concurrent removal only makes a send fail.
    pub fn broadcast(&self, event: &Value) -> usize {
        let targets: Vec<(ConnectionId, Outbound)> = self
            .read()
            .iter()
            .filter(|(_, entry)| {
                entry
                    .info
                    .as_ref()
                    .is_some_and(|info| info.identity.supports_notifications)
            })
            .map(|(id, entry)| (*id, entry.outbound.clone()))
            .collect();

        let mut delivered = 0;
        for (id, outbound) in targets {
            if outbound.deliver(event.clone()) {
                delivered += 1;
            } else {
                debug!(connection_id = id, "event dropped, connection closing");
            }
        }
        delivered
    }

    /// Ask the owner of `id` to close it. Returns whether it was found.
    pub fn terminate(&self, id: ConnectionId) -> bool {
        match self.read().get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Identified connections, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .read()
            .values()
            .filter_map(|entry| entry.info.clone())
            .collect();
        infos.sort_by_key(|info| info.connection_id);
        infos
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ConnectionId, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ConnectionId, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::connection::ConnectionIdentity;

    fn info(id: ConnectionId, notifications: bool) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: id,
            identity: ConnectionIdentity {
                app_name: "Firefox".to_string(),
                extension_name: "KeeWeb Connect".to_string(),
                pid: 10,
                ppid: Some(9),
                supports_notifications: notifications,
            },
        }
    }

    fn socket(registry: &Registry, id: ConnectionId) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.insert(id, Outbound::Socket(tx), CancellationToken::new());
        rx
    }

    #[test]
    fn broadcast_reaches_only_active_notifiable() {
        let registry = Registry::new();
        let mut pending = socket(&registry, 2);
        let mut quiet = socket(&registry, 3);
        let mut loud = socket(&registry, 4);
        registry.activate(info(3, false));
        registry.activate(info(4, true));

        assert_eq!(registry.broadcast(&json!({"event": "locked"})), 1);
        assert_eq!(loud.try_recv().unwrap()["event"], "locked");
        assert!(quiet.try_recv().is_err());
        assert!(pending.try_recv().is_err());
    }

    #[test]
    fn broadcast_tolerates_closed_receiver() {
        let registry = Registry::new();
        let rx = socket(&registry, 2);
        registry.activate(info(2, true));
        drop(rx);

        assert_eq!(registry.broadcast(&json!({})), 0);
    }

    #[test]
    fn terminate_cancels_owner() {
        let registry = Registry::new();
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.insert(5, Outbound::Socket(tx), cancel.clone());

        assert!(registry.terminate(5));
        assert!(cancel.is_cancelled());
        assert!(!registry.terminate(6));
    }

    #[test]
    fn connections_lists_identified_in_order() {
        let registry = Registry::new();
        let _a = socket(&registry, 9);
        let _b = socket(&registry, 4);
        let _c = socket(&registry, 6);
        registry.activate(info(9, true));
        registry.activate(info(4, false));

        let ids: Vec<_> = registry
            .connections()
            .iter()
            .map(|info| info.connection_id)
            .collect();
        assert_eq!(ids, vec![4, 9]);
        assert_eq!(registry.len(), 3);

        assert!(registry.remove(9));
        assert!(!registry.remove(9));
        assert!(registry.get(9).is_none());
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn activate_after_remove_is_ignored() {
        let registry = Registry::new();
        let _rx = socket(&registry, 2);
        registry.remove(2);
        assert!(!registry.activate(info(2, true)));
        assert!(registry.is_empty());
    }
}
