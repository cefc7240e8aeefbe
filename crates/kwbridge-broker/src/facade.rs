//! One start/stop/send surface over both transports.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::BrokerConfig;
use crate::connection::{ConnectionId, ConnectionInfo};
use crate::error::Result;
use crate::gate::IdentityGate;
use crate::handler::{ExtensionInstaller, RequestHandler};
use crate::inpage::{InPageTransport, PageMessage, PagePort};
use crate::listener::SocketListener;
use crate::process::ProcessInfo;
use crate::registry::Registry;
use crate::settings::{any_enabled, Browser, ExtensionFamily, Settings};

/// Which transport [`ExtensionBridge::start`] brings up.
#[derive(Clone)]
pub enum TransportMode {
    /// OS socket: a named pipe on Windows, a Unix domain socket elsewhere.
    Socket,
    /// Page-level messaging with a single virtual connection.
    InPage {
        origin: String,
        port: Arc<dyn PagePort>,
    },
}

enum ActiveTransport {
    Socket {
        name: PathBuf,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    },
    InPage(Arc<InPageTransport>),
}

/// The bridge between browser extensions and the application.
///
/// Owns the connection registry and exactly one running transport at a
/// time. Starting a started bridge or stopping a stopped one does nothing.
pub struct ExtensionBridge {
    config: BrokerConfig,
    mode: TransportMode,
    registry: Arc<Registry>,
    handler: Arc<dyn RequestHandler>,
    process_info: Arc<dyn ProcessInfo>,
    settings: Arc<dyn Settings>,
    installer: Option<Arc<dyn ExtensionInstaller>>,
    active: Mutex<Option<ActiveTransport>>,
}

impl ExtensionBridge {
    /// A socket-mode bridge.
    pub fn new(
        config: BrokerConfig,
        handler: Arc<dyn RequestHandler>,
        process_info: Arc<dyn ProcessInfo>,
        settings: Arc<dyn Settings>,
    ) -> Self {
        Self {
            config,
            mode: TransportMode::Socket,
            registry: Arc::new(Registry::new()),
            handler,
            process_info,
            settings,
            installer: None,
            active: Mutex::new(None),
        }
    }

    /// Serve the page at `origin` instead of an OS socket.
    pub fn with_in_page(mut self, origin: impl Into<String>, port: Arc<dyn PagePort>) -> Self {
        self.mode = TransportMode::InPage {
            origin: origin.into(),
            port,
        };
        self
    }

    /// Install or remove native messaging manifests on [`ExtensionBridge::enable`].
    pub fn with_installer(mut self, installer: Arc<dyn ExtensionInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Bring up the transport for the configured mode.
    ///
    /// A socket name over the platform limit is logged and returned as an
    /// error; the bridge stays stopped.
    pub async fn start(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        self.start_locked(&mut active)
    }

    /// Close every connection, clear the registry and drop all sessions.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        self.stop_locked(&mut active).await;
    }

    pub async fn is_started(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Bound socket name while running in socket mode.
    pub async fn socket_name(&self) -> Option<PathBuf> {
        match &*self.active.lock().await {
            Some(ActiveTransport::Socket { name, .. }) => Some(name.clone()),
            _ => None,
        }
    }

    /// The in-page transport is always on; the socket transport is on when
    /// any (browser, extension) toggle is.
    pub fn is_enabled(&self) -> bool {
        match self.mode {
            TransportMode::InPage { .. } => true,
            TransportMode::Socket => any_enabled(self.settings.as_ref()),
        }
    }

    /// Start or stop to match [`ExtensionBridge::is_enabled`].
    pub async fn settings_changed(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        match (self.is_enabled(), active.is_some()) {
            (true, false) => self.start_locked(&mut active),
            (false, true) => {
                self.stop_locked(&mut active).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Re-evaluate enablement on every settings change.
    ///
    /// The task ends when the settings store is dropped.
    pub fn watch_settings(self: &Arc<Self>) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        let mut changes = self.settings.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                if let Err(err) = bridge.settings_changed().await {
                    error!(error = %err, "cannot apply settings change");
                }
            }
        })
    }

    /// Persist a toggle and update the browser's native messaging manifest.
    ///
    /// Installer failures are logged, not returned.
    pub async fn enable(
        &self,
        browser: Browser,
        extension: ExtensionFamily,
        enabled: bool,
    ) -> Result<()> {
        info!(
            %browser,
            %extension,
            "{}",
            if enabled { "enable" } else { "disable" }
        );
        self.settings
            .set_feature_enabled(browser, extension, enabled);

        if let Some(installer) = &self.installer {
            let outcome = if enabled {
                installer.install(browser, extension).await
            } else {
                installer.uninstall(browser, extension).await
            };
            if let Err(err) = outcome {
                error!(%browser, %extension, error = %err, "error installing extension");
            }
        }

        self.settings_changed().await
    }

    /// Push an unsolicited event to every eligible connection.
    ///
    /// Returns how many connections it was queued for.
    pub fn send_event(&self, event: &Value) -> usize {
        if !self.is_enabled() || self.registry.is_empty() {
            return 0;
        }
        self.registry.broadcast(event)
    }

    /// Close one connection as if it had disconnected.
    pub async fn terminate_connection(&self, connection_id: ConnectionId) -> bool {
        match &*self.active.lock().await {
            Some(ActiveTransport::Socket { .. }) => self.registry.terminate(connection_id),
            Some(ActiveTransport::InPage(_)) => {
                let removed = self.registry.remove(connection_id);
                self.handler.release_connection(connection_id);
                removed
            }
            None => false,
        }
    }

    /// Route a page message to the in-page transport.
    pub async fn on_page_message(&self, message: PageMessage) -> bool {
        match &*self.active.lock().await {
            Some(ActiveTransport::InPage(transport)) => transport.submit(message),
            _ => false,
        }
    }

    pub fn client_permissions(&self, client_id: &str) -> Option<Value> {
        self.handler.client_permissions(client_id)
    }

    pub fn set_client_permissions(&self, client_id: &str, permissions: Value) {
        self.handler.set_client_permissions(client_id, permissions);
    }

    pub fn sessions(&self) -> Value {
        self.handler.sessions()
    }

    /// Identified connections, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry.connections()
    }

    fn start_locked(&self, active: &mut Option<ActiveTransport>) -> Result<()> {
        if active.is_some() {
            return Ok(());
        }

        let transport = match &self.mode {
            TransportMode::InPage { origin, port } => ActiveTransport::InPage(InPageTransport::new(
                origin.clone(),
                Arc::clone(port),
                Arc::clone(&self.registry),
                Arc::clone(&self.handler),
            )),
            TransportMode::Socket => self.start_socket()?,
        };

        *active = Some(transport);
        info!("started");
        Ok(())
    }

    fn start_socket(&self) -> Result<ActiveTransport> {
        let name = self.config.resolve_socket_name().inspect_err(|err| {
            error!(
                error = %err,
                "cannot use socket name, browser connection won't be possible"
            );
        })?;

        let gate = IdentityGate::new(
            Arc::new(self.config.origin_table()),
            Arc::clone(&self.process_info),
        );
        let listener = SocketListener::bind(
            &name,
            Arc::clone(&self.registry),
            Arc::clone(&self.handler),
            gate,
        )?
        .with_frame_config(self.config.frame);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(listener.run(shutdown.clone()));
        Ok(ActiveTransport::Socket {
            name,
            shutdown,
            task,
        })
    }

    async fn stop_locked(&self, active: &mut Option<ActiveTransport>) {
        let Some(transport) = active.take() else {
            return;
        };

        match transport {
            ActiveTransport::Socket { shutdown, task, .. } => {
                shutdown.cancel();
                if let Err(err) = task.await {
                    warn!(error = %err, "listener task failed");
                }
            }
            ActiveTransport::InPage(transport) => transport.stop(),
        }

        self.registry.clear();
        self.handler.cleanup();
        info!("stopped");
    }
}
