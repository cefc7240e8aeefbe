//! Per-connection state owned by the task that drives the connection.

use bytes::BytesMut;
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::Decoder;

use kwbridge_frame::{check_buffered, BridgeCodec, Frame};

use crate::error::{BrokerError, Result};

/// Connection identifier, unique for the lifetime of the process.
pub type ConnectionId = u64;

/// Reserved id of the single in-page virtual connection.
pub const IN_PAGE_CONNECTION_ID: ConnectionId = 1;

/// First id handed out to socket connections.
pub const FIRST_SOCKET_CONNECTION_ID: ConnectionId = IN_PAGE_CONNECTION_ID + 1;

/// Request field carrying the client id.
pub const CLIENT_ID_FIELD: &str = "clientID";

/// Action exempt from client id checks.
pub const PING_ACTION: &str = "ping";

/// Who is on the other end, as established by the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionIdentity {
    pub app_name: String,
    pub extension_name: String,
    pub pid: u32,
    pub ppid: Option<u32>,
    pub supports_notifications: bool,
}

/// What the request handler is told about the connection a request came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    #[serde(flatten)]
    pub identity: ConnectionIdentity,
}

/// Request sub-state of an active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    InFlight,
}

/// Connection lifecycle.
///
/// `Connecting` is left only through a successful handshake or an abort.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active(Activity),
    Closed,
}

/// One logical channel to one extension instance.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    client_id: Option<Value>,
    identity: Option<ConnectionIdentity>,
    state: ConnectionState,
    recv_buffer: BytesMut,
}

impl Connection {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            client_id: None,
            identity: None,
            state: ConnectionState::Connecting,
            recv_buffer: BytesMut::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> Option<&ConnectionIdentity> {
        self.identity.as_ref()
    }

    pub fn client_id(&self) -> Option<&Value> {
        self.client_id.as_ref()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ConnectionState::Active(_))
    }

    pub fn is_in_flight(&self) -> bool {
        self.state == ConnectionState::Active(Activity::InFlight)
    }

    /// Handler-facing view; `None` before the handshake.
    pub fn info(&self) -> Option<ConnectionInfo> {
        self.identity.clone().map(|identity| ConnectionInfo {
            connection_id: self.id,
            identity,
        })
    }

    /// Store the handshake identity. Only valid once, from `Connecting`.
    pub fn activate(&mut self, identity: ConnectionIdentity) -> Result<ConnectionInfo> {
        if self.state != ConnectionState::Connecting {
            return Err(BrokerError::Protocol(format!(
                "connection {} is not awaiting a handshake",
                self.id
            )));
        }
        self.identity = Some(identity.clone());
        self.state = ConnectionState::Active(Activity::Idle);
        Ok(ConnectionInfo {
            connection_id: self.id,
            identity,
        })
    }

    /// Mark a request as dispatched. At most one may be outstanding.
    pub fn begin_request(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Active(Activity::Idle) => {
                self.state = ConnectionState::Active(Activity::InFlight);
                Ok(())
            }
            ConnectionState::Active(Activity::InFlight) => Err(BrokerError::Protocol(format!(
                "connection {} already has a request in flight",
                self.id
            ))),
            _ => Err(BrokerError::Protocol(format!(
                "connection {} is not active",
                self.id
            ))),
        }
    }

    /// Clear the in-flight flag so buffered frames can be drained.
    pub fn finish_request(&mut self) {
        if self.is_in_flight() {
            self.state = ConnectionState::Active(Activity::Idle);
        }
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.recv_buffer.clear();
    }

    /// Enforce client id discipline for one post-handshake request.
    ///
    /// The first non-empty `clientID` is recorded; a different one later is
    /// fatal. Only `ping` may omit it.
    pub fn check_client_id(&mut self, request: &Value) -> Result<()> {
        let Some(fields) = request.as_object() else {
            return Err(BrokerError::Protocol(format!(
                "empty request on connection {}",
                self.id
            )));
        };

        match fields.get(CLIENT_ID_FIELD).filter(|id| is_present(id)) {
            Some(client_id) => match &self.client_id {
                None => {
                    self.client_id = Some(client_id.clone());
                    Ok(())
                }
                Some(stored) if stored == client_id => Ok(()),
                Some(stored) => Err(BrokerError::Protocol(format!(
                    "changing client id on connection {} is not allowed: {stored} => {client_id}",
                    self.id
                ))),
            },
            None if fields.get("action").and_then(Value::as_str) == Some(PING_ACTION) => Ok(()),
            None => Err(BrokerError::Protocol(format!(
                "empty client id in request on connection {}",
                self.id
            ))),
        }
    }

    /// Bytes received but not yet forming a complete frame.
    pub fn recv_buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.recv_buffer
    }

    pub fn buffered_len(&self) -> usize {
        self.recv_buffer.len()
    }

    /// Fail if unprocessed bytes exceed `max_buffered_size`.
    pub fn check_buffer_limit(&self, max_buffered_size: usize) -> Result<()> {
        Ok(check_buffered(&self.recv_buffer, max_buffered_size)?)
    }

    /// Pull the next complete frame out of the receive buffer.
    ///
    /// Fails on an oversized declared length or when the unprocessed bytes
    /// exceed the buffer limit.
    pub fn next_frame(&mut self, codec: &mut BridgeCodec) -> Result<Option<Frame>> {
        Ok(codec.decode(&mut self.recv_buffer)?)
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.is_empty(),
        Value::Number(_) => true,
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use kwbridge_frame::{encode_frame, FrameConfig, FrameError};
    use serde_json::json;

    use super::*;

    fn identity() -> ConnectionIdentity {
        ConnectionIdentity {
            app_name: "Firefox".to_string(),
            extension_name: "KeeWeb Connect".to_string(),
            pid: 100,
            ppid: Some(50),
            supports_notifications: true,
        }
    }

    fn active() -> Connection {
        let mut conn = Connection::new(7);
        conn.activate(identity()).unwrap();
        conn
    }

    #[test]
    fn activates_once() {
        let mut conn = Connection::new(7);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.info().is_none());

        let info = conn.activate(identity()).unwrap();
        assert_eq!(info.connection_id, 7);
        assert_eq!(conn.state(), ConnectionState::Active(Activity::Idle));

        let err = conn.activate(identity()).unwrap_err();
        assert!(err.is_violation());
    }

    #[test]
    fn one_request_in_flight() {
        let mut conn = active();
        conn.begin_request().unwrap();
        assert!(conn.is_in_flight());
        assert!(conn.begin_request().is_err());

        conn.finish_request();
        assert!(!conn.is_in_flight());
        conn.begin_request().unwrap();
    }

    #[test]
    fn requests_rejected_before_handshake() {
        let mut conn = Connection::new(3);
        assert!(conn.begin_request().is_err());
    }

    #[test]
    fn client_id_is_recorded_then_enforced() {
        let mut conn = active();
        conn.check_client_id(&json!({"action": "get-logins", "clientID": "A"}))
            .unwrap();
        conn.check_client_id(&json!({"action": "get-logins", "clientID": "A"}))
            .unwrap();
        assert_eq!(conn.client_id(), Some(&json!("A")));

        let err = conn
            .check_client_id(&json!({"action": "get-logins", "clientID": "B"}))
            .unwrap_err();
        assert!(matches!(err, BrokerError::Protocol(_)));
    }

    #[test]
    fn ping_may_omit_client_id() {
        let mut conn = active();
        conn.check_client_id(&json!({"action": "ping"})).unwrap();
        conn.check_client_id(&json!({"action": "ping", "clientID": ""}))
            .unwrap();
        assert!(conn.client_id().is_none());

        assert!(conn.check_client_id(&json!({"action": "associate"})).is_err());
    }

    #[test]
    fn numeric_client_id_is_accepted() {
        let mut conn = active();
        conn.check_client_id(&json!({"action": "x", "clientID": 42}))
            .unwrap();
        assert!(conn
            .check_client_id(&json!({"action": "x", "clientID": "42"}))
            .is_err());
    }

    #[test]
    fn empty_request_is_fatal() {
        let mut conn = active();
        assert!(conn.check_client_id(&Value::Null).unwrap_err().is_violation());
    }

    #[test]
    fn frames_drain_in_order_from_buffer() {
        let mut conn = active();
        let mut codec = BridgeCodec::default();
        encode_frame(br#"{"n":1}"#, conn.recv_buffer_mut()).unwrap();
        encode_frame(br#"{"n":2}"#, conn.recv_buffer_mut()).unwrap();
        conn.recv_buffer_mut().extend_from_slice(&[9, 0]);

        let first = conn.next_frame(&mut codec).unwrap().unwrap();
        let second = conn.next_frame(&mut codec).unwrap().unwrap();
        assert_eq!(first.json().unwrap()["n"], 1);
        assert_eq!(second.json().unwrap()["n"], 2);
        assert!(conn.next_frame(&mut codec).unwrap().is_none());
        assert_eq!(conn.buffered_len(), 2);
    }

    #[test]
    fn oversized_declared_length_is_a_violation() {
        let mut conn = Connection::new(9);
        let mut codec = BridgeCodec::new(FrameConfig::with_max_message_size(10_000));
        conn.recv_buffer_mut()
            .extend_from_slice(&20_000u32.to_le_bytes());

        let err = conn.next_frame(&mut codec).unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Frame(FrameError::PayloadTooLarge { size: 20_000, .. })
        ));
        assert!(err.is_violation());
    }

    #[test]
    fn identity_serializes_camel_case() {
        let info = active().info().unwrap();
        let value = serde_json::to_value(info).unwrap();
        assert_eq!(value["connectionId"], 7);
        assert_eq!(value["appName"], "Firefox");
        assert_eq!(value["supportsNotifications"], true);
    }
}
