use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod path;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broker on the local socket with a built-in echo handler.
    Serve(ServeArgs),
    /// Connect as an extension, send one request and print the response.
    Send(SendArgs),
    /// Print the per-user socket name and whether it fits the platform limit.
    Path(PathArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Path(args) => path::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path or pipe name. Default: the per-user name.
    #[arg(long, env = "KWBRIDGE_SOCKET")]
    pub socket: Option<PathBuf>,
    /// Enable a browser/extension pair, e.g. `chrome:KWC` (repeatable).
    #[arg(long = "enable", value_name = "BROWSER:EXT", default_value = "other:KWC")]
    pub enable: Vec<String>,
    /// Maximum accepted message size in bytes.
    #[arg(long, default_value_t = kwbridge_frame::DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,
    /// Extra Chromium extension ids accepted as KeeWeb Connect (comma-separated).
    #[arg(long, env = "KWBRIDGE_DEV_EXTENSION_IDS", value_delimiter = ',')]
    pub dev_extension_ids: Vec<String>,
    /// Apple team id for the macOS group container.
    #[arg(long, env = "KWBRIDGE_APPLE_TEAM_ID")]
    pub apple_team_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Socket path. Default: the per-user name.
    #[arg(long, env = "KWBRIDGE_SOCKET")]
    pub socket: Option<PathBuf>,
    /// Extension origin sent in the handshake.
    #[arg(long, default_value = "keeweb-connect@keeweb.info")]
    pub origin: String,
    /// Host pid sent in the handshake. Default: this process.
    #[arg(long)]
    pub pid: Option<u32>,
    /// Browser pid sent in the handshake. Default: this process's parent.
    #[arg(long)]
    pub ppid: Option<u32>,
    /// Omit `ppid` from the handshake.
    #[arg(long, conflicts_with = "ppid")]
    pub no_ppid: bool,
    /// Full JSON request.
    #[arg(long, conflicts_with_all = ["action", "client_id"])]
    pub json: Option<String>,
    /// Request action, used when --json is not given.
    #[arg(long, default_value = "ping")]
    pub action: String,
    /// Client id added to the request.
    #[arg(long)]
    pub client_id: Option<String>,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct PathArgs {
    /// Apple team id for the macOS group container.
    #[arg(long, env = "KWBRIDGE_APPLE_TEAM_ID")]
    pub apple_team_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
