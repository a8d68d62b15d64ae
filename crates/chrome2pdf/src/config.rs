//! Browser configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the browser executable.
pub const CHROME_PATH_ENV: &str = "CHROME_PATH";

/// How the debugging endpoint of a freshly launched browser is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointDiscovery {
    /// Parse the `DevTools listening on ws://...` line from stderr
    #[default]
    Stderr,
    /// Poll `<user-data-dir>/DevToolsActivePort`
    ActivePortFile,
}

/// Launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Path or bare program name. `None` searches the usual install locations.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// `false` adds `--no-sandbox` (needed as root inside most containers)
    pub sandbox: bool,
    pub extra_args: Vec<String>,
    pub discovery: EndpointDiscovery,
    /// Profile directory. `None` uses a temporary one removed on close.
    pub user_data_dir: Option<PathBuf>,
    /// How long a closing browser gets to exit on its own before it is killed
    pub close_grace_ms: u64,
    /// Budget for teardown steps, independent of the render deadline
    pub teardown_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            sandbox: true,
            extra_args: Vec::new(),
            discovery: EndpointDiscovery::default(),
            user_data_dir: None,
            close_grace_ms: 2_000,
            teardown_timeout_ms: 5_000,
        }
    }
}

impl BrowserConfig {
    /// Defaults, with the executable taken from `CHROME_PATH` if set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(path) = std::env::var_os(CHROME_PATH_ENV).filter(|p| !p.is_empty()) {
            config.executable = Some(PathBuf::from(path));
        }
        config
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: BrowserConfig = serde_json::from_value(serde_json::json!({
            "executable": "/usr/bin/chromium",
            "sandbox": false,
            "discovery": "active_port_file",
        }))
        .unwrap();
        assert_eq!(config.executable, Some(PathBuf::from("/usr/bin/chromium")));
        assert!(!config.sandbox);
        assert!(config.headless);
        assert_eq!(config.discovery, EndpointDiscovery::ActivePortFile);
        assert_eq!(config.close_grace(), Duration::from_secs(2));
    }
}
