use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

/// Browsers an extension can be enabled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Browser {
    Safari,
    Chrome,
    Firefox,
    Edge,
    Other,
}

impl Browser {
    /// Browsers offered on the current platform. Safari only exists on macOS.
    pub fn supported() -> Vec<Browser> {
        let mut browsers = Vec::with_capacity(5);
        if cfg!(target_os = "macos") {
            browsers.push(Browser::Safari);
        }
        browsers.extend([
            Browser::Chrome,
            Browser::Firefox,
            Browser::Edge,
            Browser::Other,
        ]);
        browsers
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Browser::Safari => "Safari",
            Browser::Chrome => "Chrome",
            Browser::Firefox => "Firefox",
            Browser::Edge => "Edge",
            Browser::Other => "Other",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "safari" => Ok(Browser::Safari),
            "chrome" => Ok(Browser::Chrome),
            "firefox" => Ok(Browser::Firefox),
            "edge" => Ok(Browser::Edge),
            "other" => Ok(Browser::Other),
            _ => Err(format!("unknown browser '{s}'")),
        }
    }
}

/// The two supported extension protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionFamily {
    KeeWebConnect,
    KeePassXcBrowser,
}

impl ExtensionFamily {
    pub const ALL: [ExtensionFamily; 2] = [
        ExtensionFamily::KeeWebConnect,
        ExtensionFamily::KeePassXcBrowser,
    ];

    /// Short alias used in settings keys.
    pub fn alias(self) -> &'static str {
        match self {
            ExtensionFamily::KeeWebConnect => "KWC",
            ExtensionFamily::KeePassXcBrowser => "KPXC",
        }
    }

    /// Human-readable extension name.
    pub fn display_name(self) -> &'static str {
        match self {
            ExtensionFamily::KeeWebConnect => "KeeWeb Connect",
            ExtensionFamily::KeePassXcBrowser => "KeePassXC-Browser",
        }
    }
}

impl fmt::Display for ExtensionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alias())
    }
}

impl FromStr for ExtensionFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "KWC" => Ok(ExtensionFamily::KeeWebConnect),
            "KPXC" => Ok(ExtensionFamily::KeePassXcBrowser),
            _ => Err(format!("unknown extension '{s}' (expected KWC or KPXC)")),
        }
    }
}

/// Application settings consulted for enablement.
///
/// Implementations publish a new value on [`Settings::subscribe`] after
/// every change.
pub trait Settings: Send + Sync + 'static {
    /// Whether `extension` is enabled for `browser`.
    fn is_feature_enabled(&self, browser: Browser, extension: ExtensionFamily) -> bool;

    /// Persist a toggle.
    fn set_feature_enabled(&self, browser: Browser, extension: ExtensionFamily, enabled: bool);

    /// Change notifications; the value is a change counter.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// In-memory toggle store.
pub struct ToggleSettings {
    toggles: Mutex<HashMap<(Browser, ExtensionFamily), bool>>,
    changes: watch::Sender<u64>,
}

impl ToggleSettings {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            toggles: Mutex::new(HashMap::new()),
            changes,
        }
    }

    /// Start with the given toggles switched on.
    pub fn with_enabled(enabled: &[(Browser, ExtensionFamily)]) -> Self {
        let settings = Self::new();
        {
            let mut toggles = settings
                .toggles
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for key in enabled {
                toggles.insert(*key, true);
            }
        }
        settings
    }
}

impl Default for ToggleSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings for ToggleSettings {
    fn is_feature_enabled(&self, browser: Browser, extension: ExtensionFamily) -> bool {
        self.toggles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(browser, extension))
            .copied()
            .unwrap_or(false)
    }

    fn set_feature_enabled(&self, browser: Browser, extension: ExtensionFamily, enabled: bool) {
        let changed = {
            let mut toggles = self.toggles.lock().unwrap_or_else(PoisonError::into_inner);
            toggles.insert((browser, extension), enabled) != Some(enabled)
        };
        if changed {
            self.changes.send_modify(|counter| *counter += 1);
        }
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

/// Whether any supported (browser, extension) pair is enabled.
pub fn any_enabled(settings: &dyn Settings) -> bool {
    Browser::supported().into_iter().any(|browser| {
        ExtensionFamily::ALL
            .iter()
            .any(|extension| settings.is_feature_enabled(browser, *extension))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_enabled_by_default() {
        let settings = ToggleSettings::new();
        assert!(!any_enabled(&settings));
    }

    #[test]
    fn one_toggle_enables_everything() {
        let settings = ToggleSettings::with_enabled(&[(Browser::Firefox, ExtensionFamily::KeePassXcBrowser)]);
        assert!(any_enabled(&settings));
        assert!(!settings.is_feature_enabled(Browser::Chrome, ExtensionFamily::KeeWebConnect));
    }

    #[test]
    fn set_publishes_change_only_when_value_changes() {
        let settings = ToggleSettings::new();
        let rx = settings.subscribe();

        settings.set_feature_enabled(Browser::Chrome, ExtensionFamily::KeeWebConnect, true);
        assert_eq!(*rx.borrow(), 1);

        settings.set_feature_enabled(Browser::Chrome, ExtensionFamily::KeeWebConnect, true);
        assert_eq!(*rx.borrow(), 1);

        settings.set_feature_enabled(Browser::Chrome, ExtensionFamily::KeeWebConnect, false);
        assert_eq!(*rx.borrow(), 2);
        assert!(!any_enabled(&settings));
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("chrome".parse::<Browser>().unwrap(), Browser::Chrome);
        assert_eq!("kpxc".parse::<ExtensionFamily>().unwrap(), ExtensionFamily::KeePassXcBrowser);
        assert!("opera".parse::<Browser>().is_err());
    }
}
