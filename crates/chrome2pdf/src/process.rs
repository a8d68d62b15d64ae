//! Process Supervisor - launches the browser and owns its lifecycle
//!
//! A `ProcessHandle` never outlives its OS process unnoticed: the child is
//! spawned with `kill_on_drop`, and `close` waits a grace period, kills, then
//! reaps.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use crate::config::{BrowserConfig, EndpointDiscovery, CHROME_PATH_ENV};
use crate::deadline::Deadline;
use crate::error::{Error, Result};

/// Prefix of the stderr line announcing the debugging endpoint
const LISTENING_PREFIX: &str = "DevTools listening on ";

const ACTIVE_PORT_FILE: &str = "DevToolsActivePort";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Program names tried on PATH when no executable is configured
const CANDIDATES: [&str; 5] = [
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Where Chrome's Linux packages install the binary
const DEFAULT_INSTALL_PATH: &str = "/opt/google/chrome/chrome";

/// Starts browsers. Swappable so callers can attach to an existing
/// browser or wrap the launch in their own sandboxing.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, deadline: &Deadline) -> Result<ProcessHandle>;
}

/// Default launcher: spawns Chrome/Chromium from a `BrowserConfig`
pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch(&self, deadline: &Deadline) -> Result<ProcessHandle> {
        ProcessHandle::launch(&self.config, deadline).await
    }
}

/// An OS browser process plus its debugging endpoint.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Option<Child>,
    pid: Option<u32>,
    endpoint: String,
    /// Temporary profile; removed after the process is gone
    profile: Option<TempDir>,
    stderr_drain: Option<JoinHandle<()>>,
    closed: bool,
}

impl ProcessHandle {
    /// Start the browser and wait (bounded by `deadline`) for its endpoint.
    pub async fn launch(config: &BrowserConfig, deadline: &Deadline) -> Result<Self> {
        let executable = resolve_executable(config.executable.as_deref())?;

        let (profile, user_data_dir) = match &config.user_data_dir {
            Some(dir) => (None, dir.clone()),
            None => {
                let dir = tempfile::Builder::new().prefix("chrome2pdf-").tempdir()?;
                let path = dir.path().to_path_buf();
                (Some(dir), path)
            }
        };

        if config.discovery == EndpointDiscovery::ActivePortFile {
            // A stale file from an earlier run would point at a dead port
            let _ = tokio::fs::remove_file(user_data_dir.join(ACTIVE_PORT_FILE)).await;
        }

        let args = launch_args(config, &user_data_dir);
        tracing::debug!(executable = %executable.display(), ?args, "Launching browser");

        let mut child = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    Error::ExecutableNotFound(format!("{}: {}", executable.display(), e))
                }
                _ => Error::Io(e),
            })?;
        let pid = child.id();

        let stderr = child
            .stderr
            .take()
            .map(|stderr| BufReader::new(stderr).lines());

        let discovered = match config.discovery {
            EndpointDiscovery::Stderr => {
                deadline
                    .bound(discover_from_stderr(&mut child, stderr), || Error::LaunchTimeout)
                    .await
            }
            EndpointDiscovery::ActivePortFile => {
                let drain = stderr.map(|lines| tokio::spawn(drain_stderr(lines)));
                deadline
                    .bound(discover_from_port_file(&mut child, &user_data_dir), || {
                        Error::LaunchTimeout
                    })
                    .await
                    .map(|found| found.map(|endpoint| (endpoint, drain)))
            }
        };

        match discovered {
            Ok(Ok((endpoint, stderr_drain))) => {
                tracing::info!(?pid, %endpoint, "Browser launched");
                Ok(Self {
                    child: Some(child),
                    pid,
                    endpoint,
                    profile,
                    stderr_drain,
                    closed: false,
                })
            }
            Ok(Err(e)) | Err(e) => {
                tracing::warn!(?pid, "Browser launch failed: {}", e);
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(e)
            }
        }
    }

    /// A browser started by someone else. Closing it never kills anything.
    pub fn external(endpoint: impl Into<String>) -> Self {
        Self {
            child: None,
            pid: None,
            endpoint: endpoint.into(),
            profile: None,
            stderr_drain: None,
            closed: false,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether this handle launched (and therefore owns) the process.
    pub fn is_owned(&self) -> bool {
        self.child.is_some()
    }

    /// Health check. For external browsers: until closed.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => !self.closed,
        }
    }

    /// Wait up to `grace` for the process to exit, then kill and reap it.
    /// Closing twice is a no-op.
    pub async fn close(&mut self, grace: Duration) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut result = Ok(());
        if let Some(child) = self.child.as_mut() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(pid = ?self.pid, %status, "Browser exited"),
                Ok(Err(e)) => result = Err(Error::Io(e)),
                Err(_) => {
                    tracing::debug!(
                        pid = ?self.pid,
                        "Browser still running after grace period, killing"
                    );
                    if let Err(e) = child.kill().await {
                        result = Err(Error::Io(e));
                    }
                }
            }
        }

        if let Some(drain) = self.stderr_drain.take() {
            drain.abort();
        }
        if let Some(profile) = self.profile.take() {
            if let Err(e) = profile.close() {
                tracing::warn!("Failed to remove browser profile: {}", e);
            }
        }

        tracing::info!(pid = ?self.pid, "Browser closed");
        result
    }
}

/// Explicit path (or program name) first, then `CHROME_PATH`, PATH
/// candidates and the default install location.
pub fn resolve_executable(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        return resolve_one(path)
            .ok_or_else(|| Error::ExecutableNotFound(path.display().to_string()));
    }

    if let Some(path) = std::env::var_os(CHROME_PATH_ENV).filter(|p| !p.is_empty()) {
        if let Some(found) = resolve_one(Path::new(&path)) {
            return Ok(found);
        }
        tracing::warn!("{} points at a missing executable: {:?}", CHROME_PATH_ENV, path);
    }

    for name in CANDIDATES {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    let fallback = Path::new(DEFAULT_INSTALL_PATH);
    if fallback.is_file() {
        return Ok(fallback.to_path_buf());
    }

    Err(Error::ExecutableNotFound(
        "no Chrome/Chromium executable found".into(),
    ))
}

fn resolve_one(path: &Path) -> Option<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        path.is_file().then(|| path.to_path_buf())
    } else {
        which::which(path).ok()
    }
}

fn launch_args(config: &BrowserConfig, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--remote-debugging-port=0".to_string(),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-gpu".to_string(),
        "--hide-scrollbars".to_string(),
        "--mute-audio".to_string(),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    if !config.sandbox {
        args.push("--no-sandbox".to_string());
    }
    args.extend(
        config
            .extra_args
            .iter()
            .filter(|a| !a.trim().is_empty())
            .cloned(),
    );
    args.push("about:blank".to_string());
    args
}

type StderrLines = Lines<BufReader<ChildStderr>>;

/// Read stderr until the endpoint line shows up. The rest of stderr keeps
/// being drained in the background so the pipe never fills up.
async fn discover_from_stderr(
    child: &mut Child,
    stderr: Option<StderrLines>,
) -> Result<(String, Option<JoinHandle<()>>)> {
    let Some(mut lines) = stderr else {
        return Err(Error::ProcessExitedEarly("stderr not captured".into()));
    };

    while let Some(line) = lines.next_line().await? {
        if let Some(endpoint) = line.trim().strip_prefix(LISTENING_PREFIX) {
            let endpoint = endpoint.trim().to_string();
            return Ok((endpoint, Some(tokio::spawn(drain_stderr(lines)))));
        }
        tracing::trace!(target: "chrome2pdf::browser_stderr", "{}", line);
    }

    // stderr closed: the process is gone or about to be
    let status = child.wait().await?;
    Err(Error::ProcessExitedEarly(status.to_string()))
}

async fn discover_from_port_file(child: &mut Child, user_data_dir: &Path) -> Result<String> {
    let path = user_data_dir.join(ACTIVE_PORT_FILE);
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(Error::ProcessExitedEarly(status.to_string()));
        }
        if let Ok(contents) = tokio::fs::read_to_string(&path).await {
            if let Some(endpoint) = parse_active_port(&contents) {
                return Ok(endpoint);
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// `DevToolsActivePort` holds the port on line one and the browser target
/// path on line two. A half-written file yields `None`.
fn parse_active_port(contents: &str) -> Option<String> {
    let mut lines = contents.lines();
    let port: u16 = lines.next()?.trim().parse().ok()?;
    let path = lines.next()?.trim();
    if !path.starts_with('/') {
        return None;
    }
    Some(format!("ws://127.0.0.1:{}{}", port, path))
}

async fn drain_stderr(mut lines: StderrLines) {
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::trace!(target: "chrome2pdf::browser_stderr", "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_active_port() {
        assert_eq!(
            parse_active_port("41235\n/devtools/browser/abc-123\n").as_deref(),
            Some("ws://127.0.0.1:41235/devtools/browser/abc-123")
        );
        assert_eq!(parse_active_port("41235\n"), None);
        assert_eq!(parse_active_port("nope\n/devtools/browser/x"), None);
        assert_eq!(parse_active_port(""), None);
    }

    #[test]
    fn test_launch_args() {
        let config = BrowserConfig {
            sandbox: false,
            extra_args: vec!["--lang=de".into(), " ".into()],
            ..Default::default()
        };
        let args = launch_args(&config, Path::new("/tmp/profile"));
        assert!(args.contains(&"--remote-debugging-port=0".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--lang=de".to_string()));
        assert!(!args.iter().any(|a| a.trim().is_empty()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn test_missing_explicit_executable() {
        let err = resolve_executable(Some(Path::new("/definitely/not/here/chrome"))).unwrap_err();
        assert!(matches!(err, Error::ExecutableNotFound(_)));

        let err = resolve_executable(Some(Path::new("no-such-browser-binary-xyz"))).unwrap_err();
        assert!(matches!(err, Error::ExecutableNotFound(_)));
    }

    #[tokio::test]
    async fn test_external_handle_lifecycle() {
        let mut handle = ProcessHandle::external("ws://127.0.0.1:9222/devtools/browser/x");
        assert!(!handle.is_owned());
        assert!(handle.is_running());

        handle.close(Duration::from_millis(10)).await.unwrap();
        assert!(!handle.is_running());
        handle.close(Duration::from_millis(10)).await.unwrap();
    }
}
