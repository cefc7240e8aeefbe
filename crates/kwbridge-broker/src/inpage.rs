//! In-page transport: one virtual connection carried by page-level messages.
//!
//! The extension talks to the application by posting messages into the same
//! page. Several requests may be posted before the first is answered; they
//! are queued and handed to the request handler strictly one at a time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::connection::{ConnectionIdentity, ConnectionInfo, IN_PAGE_CONNECTION_ID};
use crate::handler::{HandlerError, RequestHandler};
use crate::registry::{Outbound, Registry};
use crate::settings::ExtensionFamily;

/// Marker field identifying in-page traffic.
pub const MARKER_FIELD: &str = "kwConnect";
/// Marker value on messages from the extension.
pub const MARKER_REQUEST: &str = "request";
/// Marker value on messages to the extension.
pub const MARKER_RESPONSE: &str = "response";

/// A message event observed on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMessage {
    /// Origin of the sender.
    pub origin: String,
    /// Whether the sender is the page itself rather than a frame or popup.
    pub from_self: bool,
    pub data: Value,
}

/// Posts messages back into the page.
pub trait PagePort: Send + Sync + 'static {
    fn post_message(&self, message: Value, target_origin: &str);
}

/// Tag an outgoing message with the response marker.
pub fn wrap_response(mut message: Value) -> Value {
    if let Value::Object(fields) = &mut message {
        fields.insert(
            MARKER_FIELD.to_string(),
            Value::String(MARKER_RESPONSE.to_string()),
        );
    }
    message
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Value>,
    processing: bool,
}

/// Pending-queue serializer for the in-page connection.
pub struct InPageTransport {
    page_origin: String,
    port: Arc<dyn PagePort>,
    registry: Arc<Registry>,
    handler: Arc<dyn RequestHandler>,
    queue: Mutex<Queue>,
    shutdown: CancellationToken,
}

impl InPageTransport {
    pub fn new(
        page_origin: impl Into<String>,
        port: Arc<dyn PagePort>,
        registry: Arc<Registry>,
        handler: Arc<dyn RequestHandler>,
    ) -> Arc<Self> {
        let transport = Arc::new(Self {
            page_origin: page_origin.into(),
            port,
            registry,
            handler,
            queue: Mutex::new(Queue::default()),
            shutdown: CancellationToken::new(),
        });
        info!(origin = %transport.page_origin, "in-page transport started");
        transport
    }

    /// The fixed identity of the virtual connection.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: IN_PAGE_CONNECTION_ID,
            identity: ConnectionIdentity {
                app_name: self.page_origin.clone(),
                extension_name: ExtensionFamily::KeeWebConnect.display_name().to_string(),
                pid: 0,
                ppid: None,
                supports_notifications: true,
            },
        }
    }

    /// Accept a page message. Returns false if it was ignored.
    ///
    /// Only same-origin messages posted by the page itself and carrying the
    /// request marker are queued.
    pub fn submit(self: &Arc<Self>, message: PageMessage) -> bool {
        if self.shutdown.is_cancelled()
            || message.origin != self.page_origin
            || !message.from_self
            || message.data.get(MARKER_FIELD).and_then(Value::as_str) != Some(MARKER_REQUEST)
        {
            return false;
        }

        debug!(request = %message.data, "extension -> app");

        let start_drain = {
            let mut queue = self.lock_queue();
            queue.pending.push_back(message.data);
            !std::mem::replace(&mut queue.processing, true)
        };

        if start_drain {
            let transport = Arc::clone(self);
            tokio::spawn(async move { transport.drain().await });
        }
        true
    }

    /// Number of requests waiting behind the one in flight.
    pub fn pending_len(&self) -> usize {
        self.lock_queue().pending.len()
    }

    /// Stop accepting messages. A response still in flight is discarded.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let mut queue = self.lock_queue();
        queue.pending.clear();
        info!("in-page transport stopped");
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut queue = self.lock_queue();
                match queue.pending.pop_front() {
                    Some(request) if !self.shutdown.is_cancelled() => Some(request),
                    _ => {
                        queue.processing = false;
                        None
                    }
                }
            };
            let Some(request) = next else {
                return;
            };

            let info = self.ensure_registered();
            let handler = Arc::clone(&self.handler);
            let call = request.clone();
            let outcome = tokio::spawn(async move { handler.handle(call, &info).await }).await;
            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => Some(self.handler.error_to_response(&err, &request)),
                Err(err) => {
                    error!(error = %err, "in-page request handler failed");
                    let err = HandlerError::new(format!("Request failed: {err}"));
                    Some(self.handler.error_to_response(&err, &request))
                }
            };

            if self.shutdown.is_cancelled() {
                debug!("late in-page response discarded");
                continue;
            }
            if let Some(response) = response {
                self.send(response);
            }
        }
    }

    /// Post a message to the page with the response marker.
    pub fn send(&self, message: Value) {
        debug!(response = %message, "app -> extension");
        self.port
            .post_message(wrap_response(message), &self.page_origin);
    }

    fn ensure_registered(&self) -> ConnectionInfo {
        let info = self.connection_info();
        if self.registry.get(IN_PAGE_CONNECTION_ID).is_none() {
            self.registry.insert(
                IN_PAGE_CONNECTION_ID,
                Outbound::Page {
                    port: Arc::clone(&self.port),
                    origin: self.page_origin.clone(),
                },
                self.shutdown.child_token(),
            );
            self.registry.activate(info.clone());
        }
        info
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
