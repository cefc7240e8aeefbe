//! Known extension origins and calling-application names.

use std::collections::HashMap;

use crate::settings::ExtensionFamily;

/// Environment variable with extra development extension ids (comma-separated).
pub const DEV_EXTENSION_IDS_ENV: &str = "KWBRIDGE_DEV_EXTENSION_IDS";

/// Extension name reported for origins not in the table.
pub const UNKNOWN_EXTENSION: &str = "unknown";

/// Safari extension origin. Safari embeds the extension in the signed app
/// bundle, so it is trusted without a parent process lookup.
pub const KEEWEB_CONNECT_SAFARI: &str = "net.antelle.keeweb.keeweb-connect.extension";

const KNOWN_ORIGINS: &[(&str, ExtensionFamily)] = &[
    (KEEWEB_CONNECT_SAFARI, ExtensionFamily::KeeWebConnect),
    ("keeweb-connect@keeweb.info", ExtensionFamily::KeeWebConnect),
    (
        "chrome-extension://pikpfmjfkekaeinceagbebpfkmkdlcjk/",
        ExtensionFamily::KeeWebConnect,
    ),
    (
        "chrome-extension://nmggpehkjmeaeocmaijenpejbepckinm/",
        ExtensionFamily::KeeWebConnect,
    ),
    (
        "keepassxc-browser@keepassxc.org",
        ExtensionFamily::KeePassXcBrowser,
    ),
    (
        "chrome-extension://oboonakemofpalcgghocfoadofidjkkk/",
        ExtensionFamily::KeePassXcBrowser,
    ),
    (
        "chrome-extension://pdffhmdngciaglkoonimfcmckehcpafo/",
        ExtensionFamily::KeePassXcBrowser,
    ),
];

const APP_NAMES: &[(&str, &str)] = &[("msedge", "Microsoft Edge"), ("chrome", "Google Chrome")];

/// Maps literal handshake origins to extension families.
#[derive(Debug, Clone)]
pub struct OriginTable {
    origins: HashMap<String, ExtensionFamily>,
}

impl OriginTable {
    /// Built-in origins plus `chrome-extension://<id>/` for each development id.
    pub fn new<I, S>(dev_extension_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut origins: HashMap<String, ExtensionFamily> = KNOWN_ORIGINS
            .iter()
            .map(|(origin, family)| ((*origin).to_string(), *family))
            .collect();

        for id in dev_extension_ids {
            let id = id.as_ref().trim();
            if !id.is_empty() {
                origins.insert(
                    format!("chrome-extension://{id}/"),
                    ExtensionFamily::KeeWebConnect,
                );
            }
        }

        Self { origins }
    }

    /// Family for `origin`, if known.
    pub fn family(&self, origin: &str) -> Option<ExtensionFamily> {
        self.origins.get(origin).copied()
    }

    /// Extension display name for `origin`, or [`UNKNOWN_EXTENSION`].
    pub fn extension_name(&self, origin: &str) -> &'static str {
        self.family(origin)
            .map(ExtensionFamily::display_name)
            .unwrap_or(UNKNOWN_EXTENSION)
    }

    /// Whether `origin` is the trusted desktop-embedded extension.
    pub fn is_trusted_embedded(&self, origin: &str) -> bool {
        origin == KEEWEB_CONNECT_SAFARI
    }
}

impl Default for OriginTable {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

/// Parse the development id list from [`DEV_EXTENSION_IDS_ENV`].
pub fn dev_extension_ids_from_env() -> Vec<String> {
    std::env::var(DEV_EXTENSION_IDS_ENV)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Human-readable application name for a process name.
///
/// Well-known browser executables get their product name; anything else is
/// used as-is with the first letter upper-cased.
pub fn display_app_name(process_name: &str) -> String {
    let name = APP_NAMES
        .iter()
        .find(|(exe, _)| *exe == process_name)
        .map(|(_, display)| *display)
        .unwrap_or(process_name);

    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
