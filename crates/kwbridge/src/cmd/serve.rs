use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use kwbridge_broker::{
    Browser, BrokerConfig, ConnectionId, ConnectionInfo, ExtensionBridge, ExtensionFamily,
    HandlerError, ProcfsProcessInfo, RequestHandler, ToggleSettings,
};

use crate::cmd::ServeArgs;
use crate::exit::{broker_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_record, OutputFormat};

/// Answers every request by echoing it back.
///
/// `ping` gets a bare acknowledgement; a request without an `action` is
/// reported as a handler error.
struct EchoHandler;

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(
        &self,
        request: Value,
        connection: &ConnectionInfo,
    ) -> Result<Option<Value>, HandlerError> {
        let action = request
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::new("Empty request action"))?;

        debug!(
            connection_id = connection.connection_id,
            app = %connection.identity.app_name,
            action,
            "request"
        );

        if action == "ping" {
            return Ok(Some(json!({ "action": "ping", "data": "pong" })));
        }

        Ok(Some(json!({
            "action": action,
            "echo": request,
            "app": connection.identity.app_name,
            "extension": connection.identity.extension_name,
        })))
    }

    fn error_to_response(&self, error: &HandlerError, request: &Value) -> Value {
        let mut response = json!({ "error": error.message });
        if let Some(action) = request.get("action") {
            response["action"] = action.clone();
        }
        response
    }

    fn release_connection(&self, connection_id: ConnectionId) {
        debug!(connection_id, "connection released");
    }
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let toggles = args
        .enable
        .iter()
        .map(|pair| parse_toggle(pair))
        .collect::<CliResult<Vec<_>>>()?;

    let mut config = BrokerConfig::from_env().with_max_message_size(args.max_message_size);
    if let Some(socket) = args.socket {
        config = config.with_socket_name(socket);
    }
    config.apple_team_id = args.apple_team_id;
    if !args.dev_extension_ids.is_empty() {
        config.dev_extension_ids = args.dev_extension_ids;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("cannot start runtime", err))?;

    runtime.block_on(async move {
        let bridge = Arc::new(ExtensionBridge::new(
            config,
            Arc::new(EchoHandler),
            Arc::new(ProcfsProcessInfo),
            Arc::new(ToggleSettings::with_enabled(&toggles)),
        ));

        if !bridge.is_enabled() {
            return Err(CliError::new(
                USAGE,
                "no supported browser/extension pair is enabled",
            ));
        }

        bridge
            .settings_changed()
            .await
            .map_err(|err| broker_error("cannot start bridge", err))?;

        let socket = bridge
            .socket_name()
            .await
            .map(|name| name.display().to_string())
            .unwrap_or_default();
        let enabled = toggles
            .iter()
            .map(|(browser, extension)| format!("{browser}:{extension}"))
            .collect::<Vec<_>>()
            .join(",");
        print_record(
            &[
                ("socket", socket),
                ("enabled", enabled),
                ("pid", std::process::id().to_string()),
            ],
            format,
        );

        tokio::signal::ctrl_c()
            .await
            .map_err(|err| io_error("cannot wait for interrupt", err))?;

        info!("interrupted, stopping");
        bridge.stop().await;
        Ok(SUCCESS)
    })
}

/// Parse `browser:extension`, e.g. `chrome:KWC`.
fn parse_toggle(pair: &str) -> CliResult<(Browser, ExtensionFamily)> {
    let (browser, extension) = pair.split_once(':').ok_or_else(|| {
        CliError::new(
            USAGE,
            format!("invalid --enable value '{pair}', expected BROWSER:EXTENSION"),
        )
    })?;
    let browser = browser
        .parse::<Browser>()
        .map_err(|err| CliError::new(USAGE, err))?;
    let extension = extension
        .parse::<ExtensionFamily>()
        .map_err(|err| CliError::new(USAGE, err))?;
    Ok((browser, extension))
}
