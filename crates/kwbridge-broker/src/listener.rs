use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kwbridge_frame::{BridgeCodec, Frame, FrameConfig};
use kwbridge_transport::IpcListener;

use crate::connection::{Connection, ConnectionId, FIRST_SOCKET_CONNECTION_ID};
use crate::error::{BrokerError, Result};
use crate::gate::IdentityGate;
use crate::handler::{HandlerError, RequestHandler};
use crate::registry::{Outbound, Registry};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// State shared by the accept loop and every connection task.
struct Shared {
    registry: Arc<Registry>,
    handler: Arc<dyn RequestHandler>,
    gate: IdentityGate,
    frame_config: FrameConfig,
    next_id: AtomicU64,
}

/// Accepts extension connections on the local socket and drives each one
/// on its own task.
pub struct SocketListener {
    listener: IpcListener,
    registry: Arc<Registry>,
    handler: Arc<dyn RequestHandler>,
    gate: IdentityGate,
    frame_config: FrameConfig,
}

impl SocketListener {
    /// Bind the platform transport at `name`.
    pub fn bind(
        name: impl AsRef<Path>,
        registry: Arc<Registry>,
        handler: Arc<dyn RequestHandler>,
        gate: IdentityGate,
    ) -> Result<Self> {
        let listener = IpcListener::bind(name)?;
        Ok(Self {
            listener,
            registry,
            handler,
            gate,
            frame_config: FrameConfig::default(),
        })
    }

    /// Override frame limits.
    pub fn with_frame_config(mut self, config: FrameConfig) -> Self {
        self.frame_config = config;
        self
    }

    /// Bound socket name.
    pub fn name(&self) -> &Path {
        self.listener.name()
    }

    /// Accept connections until `shutdown` fires, then close every live
    /// connection and wait for its task to finish.
    ///
    /// The socket is unbound when this returns.
    pub async fn run(self, shutdown: CancellationToken) {
        let Self {
            mut listener,
            registry,
            handler,
            gate,
            frame_config,
        } = self;
        let shared = Arc::new(Shared {
            registry,
            handler,
            gate,
            frame_config,
            next_id: AtomicU64::new(FIRST_SOCKET_CONNECTION_ID),
        });
        let mut connections = JoinSet::new();
        info!(socket = %listener.name().display(), "listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(stream) => {
                        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                        info!(
                            connection_id = id,
                            transport = stream.transport_name(),
                            peer_pid = ?stream.peer_pid(),
                            "new connection"
                        );
                        connections.spawn(serve_connection(
                            Arc::clone(&shared),
                            id,
                            stream,
                            shutdown.child_token(),
                        ));
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "connection task failed");
                    }
                }
            }
        }

        while connections.join_next().await.is_some() {}
        info!(socket = %listener.name().display(), "stopped listening");
    }
}

/// Drive one connection from accept to close.
///
/// Whatever ends the connection, the registry entry is removed and the
/// request handler is told to release the connection's sessions.
async fn serve_connection<S>(
    shared: Arc<Shared>,
    id: ConnectionId,
    stream: S,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (outbound, queue) = mpsc::unbounded_channel();
    shared
        .registry
        .insert(id, Outbound::Socket(outbound.clone()), cancel.clone());

    let writer_task = tokio::spawn(write_outbound(
        id,
        writer,
        queue,
        shared.frame_config,
        cancel.clone(),
    ));

    let result = drive_connection(&shared, id, &mut reader, &outbound, &cancel).await;

    shared.registry.remove(id);
    shared.handler.release_connection(id);
    drop(outbound);

    match result {
        Ok(()) => info!(connection_id = id, "connection closed"),
        Err(BrokerError::Terminated(_)) => info!(connection_id = id, "connection terminated"),
        Err(err) if err.is_violation() => {
            warn!(connection_id = id, error = %err, "connection aborted");
            cancel.cancel();
        }
        Err(err) => info!(connection_id = id, error = %err, "connection lost"),
    }

    if writer_task.await.is_err() {
        error!(connection_id = id, "writer task failed");
    }
    cancel.cancel();
}

/// A request handed to the request handler and not answered yet.
struct InFlight {
    handle: JoinHandle<Option<Value>>,
    request: Value,
}

async fn drive_connection<R>(
    shared: &Arc<Shared>,
    id: ConnectionId,
    reader: &mut R,
    outbound: &mpsc::UnboundedSender<Value>,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut conn = Connection::new(id);
    let mut codec = BridgeCodec::new(shared.frame_config);
    let mut in_flight: Option<InFlight> = None;

    let result = loop {
        if let Err(err) = drain_frames(shared, &mut conn, &mut codec, &mut in_flight, cancel).await
        {
            break Err(err);
        }

        tokio::select! {
            _ = cancel.cancelled() => break Err(BrokerError::Terminated(id)),
            read = reader.read_buf(conn.recv_buffer_mut()) => match read {
                Ok(0) => break Ok(()),
                Ok(len) => {
                    debug!(connection_id = id, len, buffered = conn.buffered_len(), "received");
                    if conn.is_in_flight() {
                        if let Err(err) = conn.check_buffer_limit(shared.frame_config.max_buffered_size) {
                            break Err(err);
                        }
                    }
                }
                Err(err) => break Err(err.into()),
            },
            outcome = wait_in_flight(&mut in_flight) => {
                let (outcome, request) = outcome;
                conn.finish_request();
                let response = match outcome {
                    Ok(response) => response,
                    Err(err) => {
                        error!(connection_id = id, error = %err, "request handler failed");
                        let err = HandlerError::new(format!("Request failed: {err}"));
                        Some(shared.handler.error_to_response(&err, &request))
                    }
                };
                if let Some(response) = response {
                    debug!(connection_id = id, response = %response, "app -> extension");
                    if outbound.send(response).is_err() {
                        break Ok(());
                    }
                }
            }
        }
    };

    conn.close();
    result
}

/// Process complete frames until the buffer is empty or a request is
/// in flight. Frames left behind stay buffered in arrival order.
async fn drain_frames(
    shared: &Arc<Shared>,
    conn: &mut Connection,
    codec: &mut BridgeCodec,
    in_flight: &mut Option<InFlight>,
    cancel: &CancellationToken,
) -> Result<()> {
    let id = conn.id();
    while !conn.is_in_flight() {
        let Some(frame) = conn.next_frame(codec)? else {
            return Ok(());
        };
        let message = frame.json()?;

        if !conn.is_active() {
            debug!(connection_id = id, handshake = %message, "init connection");
            let identity = tokio::select! {
                _ = cancel.cancelled() => return Err(BrokerError::Terminated(id)),
                identity = shared.gate.identify(&message) => identity?,
            };
            let info = conn.activate(identity)?;
            info!(
                connection_id = id,
                app = %info.identity.app_name,
                extension = %info.identity.extension_name,
                pid = info.identity.pid,
                ppid = ?info.identity.ppid,
                "connection activated"
            );
            shared.registry.activate(info);
            continue;
        }

        debug!(connection_id = id, request = %message, "extension -> app");
        conn.check_client_id(&message)?;
        conn.begin_request()?;

        let handle = tokio::spawn(dispatch(
            Arc::clone(shared),
            id,
            message.clone(),
            cancel.clone(),
        ));
        *in_flight = Some(InFlight {
            handle,
            request: message,
        });
    }
    Ok(())
}

/// Resolves when the in-flight request finishes; pending forever if none.
async fn wait_in_flight(
    slot: &mut Option<InFlight>,
) -> (std::result::Result<Option<Value>, JoinError>, Value) {
    let Some(in_flight) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let outcome = (&mut in_flight.handle).await;
    let request = slot
        .take()
        .map(|in_flight| in_flight.request)
        .unwrap_or(Value::Null);
    (outcome, request)
}

/// Run one request through the handler.
///
/// If the connection closed in the meantime the response is dropped.
async fn dispatch(
    shared: Arc<Shared>,
    id: ConnectionId,
    request: Value,
    cancel: CancellationToken,
) -> Option<Value> {
    let response = match shared.registry.get(id) {
        Some(info) => match shared.handler.handle(request.clone(), &info).await {
            Ok(response) => response,
            Err(err) => {
                debug!(connection_id = id, error = %err, "request handler returned an error");
                Some(shared.handler.error_to_response(&err, &request))
            }
        },
        None => {
            let err = HandlerError::new(format!("Connection not found: {id}"));
            Some(shared.handler.error_to_response(&err, &request))
        }
    };

    if cancel.is_cancelled() {
        debug!(connection_id = id, "late response discarded");
        return None;
    }
    response
}

/// Frame and write queued messages until the queue closes or the
/// connection is cancelled. A write failure closes the connection.
async fn write_outbound<W>(
    id: ConnectionId,
    writer: W,
    mut queue: mpsc::UnboundedReceiver<Value>,
    config: FrameConfig,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, BridgeCodec::new(config));
    loop {
        let message = tokio::select! {
            biased;
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let frame = match Frame::from_json(&message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(connection_id = id, error = %err, "cannot encode message");
                continue;
            }
        };
        if let Err(err) = sink.send(frame).await {
            debug!(connection_id = id, error = %err, "write failed");
            cancel.cancel();
            break;
        }
    }
}
