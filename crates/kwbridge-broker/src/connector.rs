//! Blocking extension-side client, used by tooling and tests.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};

use kwbridge_frame::{FrameConfig, FrameReader, FrameWriter};
#[cfg(unix)]
use kwbridge_transport::UnixDomainSocket;

use crate::error::Result;

/// Largest response the client accepts. The broker does not cap what it
/// sends; this is the ceiling browsers put on host-to-extension messages.
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// The first message a native messaging host sends after connecting.
pub fn handshake_message(origin: &str, pid: u32, ppid: Option<u32>) -> Value {
    let mut message = json!({ "origin": origin, "pid": pid });
    if let Some(ppid) = ppid {
        message["ppid"] = json!(ppid);
    }
    message
}

/// A connection to the broker as an extension would open it.
#[cfg(unix)]
pub struct BridgeClient {
    reader: FrameReader<std::os::unix::net::UnixStream>,
    writer: FrameWriter<std::os::unix::net::UnixStream>,
}

#[cfg(unix)]
impl BridgeClient {
    /// Connect and send `handshake`.
    pub fn connect(path: impl AsRef<Path>, handshake: &Value) -> Result<Self> {
        Self::connect_with_config(path, handshake, FrameConfig::default())
    }

    /// Connect with explicit request limits. Responses are bounded by
    /// [`MAX_RESPONSE_SIZE`] instead.
    pub fn connect_with_config(
        path: impl AsRef<Path>,
        handshake: &Value,
        config: FrameConfig,
    ) -> Result<Self> {
        let stream = UnixDomainSocket::connect(path)?;
        let reader_stream = stream.try_clone()?;

        let mut client = Self {
            reader: FrameReader::with_config(
                reader_stream,
                FrameConfig::with_max_message_size(MAX_RESPONSE_SIZE),
            ),
            writer: FrameWriter::with_config(stream, config),
        };
        client.send(handshake)?;
        Ok(client)
    }

    /// Bound how long [`BridgeClient::recv`] waits. `None` waits forever.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn send(&mut self, message: &Value) -> Result<()> {
        self.writer.send_json(message)?;
        Ok(())
    }

    /// Write bytes without framing.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.send_raw(bytes)?;
        Ok(())
    }

    /// Next message from the broker: a response or an event.
    pub fn recv(&mut self) -> Result<Value> {
        Ok(self.reader.read_json()?)
    }

    /// Send `request` and wait for the next message.
    pub fn request(&mut self, request: &Value) -> Result<Value> {
        self.send(request)?;
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn response_larger_than_request_limit_is_accepted() {
        use std::os::unix::net::UnixListener;

        use kwbridge_frame::DEFAULT_MAX_MESSAGE_SIZE;

        let dir = std::env::temp_dir().join(format!("kwb-client-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("conn.sock");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let big = "x".repeat(DEFAULT_MAX_MESSAGE_SIZE * 2);
        let expected = big.clone();
        let broker = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = FrameReader::new(stream.try_clone().unwrap());
            let mut writer = FrameWriter::with_config(
                stream,
                FrameConfig::with_max_message_size(MAX_RESPONSE_SIZE),
            );
            reader.read_json().unwrap();
            let request = reader.read_json().unwrap();
            writer
                .send_json(&json!({"action": request["action"], "data": big}))
                .unwrap();
        });

        let handshake = handshake_message("keeweb-connect@keeweb.info", 2, Some(1));
        let mut client = BridgeClient::connect(&path, &handshake).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let response = client.request(&json!({"action": "get-logins"})).unwrap();
        assert_eq!(response["data"], expected);

        let oversized = json!({"action": "x", "data": "y".repeat(DEFAULT_MAX_MESSAGE_SIZE)});
        assert!(client.send(&oversized).is_err());

        broker.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn handshake_includes_ppid_when_given() {
        assert_eq!(
            handshake_message("keeweb-connect@keeweb.info", 10, Some(9)),
            json!({"origin": "keeweb-connect@keeweb.info", "pid": 10, "ppid": 9})
        );
        assert!(handshake_message("x", 10, None).get("ppid").is_none());
    }
}
