//! Browser - one browser process and the single connection to it
//!
//! Any number of sessions (tabs) can share a `Browser` concurrently.
//! Teardown order is connection before process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::cdp::protocol::BrowserClose;
use crate::cdp::{CDPClient, CDPSession};
use crate::config::BrowserConfig;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::events::{EventBus, RenderEvent};
use crate::process::{ChromeLauncher, Launcher, ProcessHandle};

pub struct Browser {
    client: Arc<CDPClient>,
    process: Mutex<ProcessHandle>,
    pid: Option<u32>,
    owned: bool,
    close_grace: Duration,
    teardown_timeout: Duration,
    events: EventBus,
    closed: AtomicBool,
}

impl Browser {
    /// Launch a browser per `config` and connect to it.
    pub async fn launch(config: &BrowserConfig, deadline: &Deadline) -> Result<Self> {
        let launcher = ChromeLauncher::new(config.clone());
        Self::start(&launcher, config, EventBus::new(), deadline).await
    }

    /// Launch through `launcher`, connect, and report on `events`.
    /// The process is closed again if the connection cannot be made.
    pub async fn start(
        launcher: &dyn Launcher,
        config: &BrowserConfig,
        events: EventBus,
        deadline: &Deadline,
    ) -> Result<Self> {
        let mut process = launcher.launch(deadline).await?;

        let client = match CDPClient::connect(process.endpoint(), deadline).await {
            Ok(client) => client,
            Err(e) => {
                if let Err(close_err) = process.close(config.close_grace()).await {
                    tracing::warn!("Failed to close browser after connect error: {}", close_err);
                }
                return Err(e);
            }
        };

        let pid = process.pid();
        events.publish(RenderEvent::BrowserLaunched {
            pid,
            endpoint: process.endpoint().to_string(),
        });

        Ok(Self {
            client,
            owned: process.is_owned(),
            process: Mutex::new(process),
            pid,
            close_grace: config.close_grace(),
            teardown_timeout: config.teardown_timeout(),
            events,
            closed: AtomicBool::new(false),
        })
    }

    pub fn client(&self) -> &Arc<CDPClient> {
        &self.client
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Open a new blank target with its own session.
    pub async fn new_session(&self, deadline: &Deadline) -> Result<CDPSession> {
        CDPSession::open(self.client.clone(), deadline).await
    }

    /// Fresh budget for cleanup work; independent of any render deadline.
    pub fn teardown_deadline(&self) -> Deadline {
        Deadline::after(self.teardown_timeout)
    }

    pub async fn is_running(&self) -> bool {
        self.process.lock().await.is_running()
    }

    /// Ask the browser to exit, close the connection, then make sure the
    /// process is gone. Closing twice is a no-op. Every step runs even if
    /// an earlier one failed; the first error is returned.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut first_error = None;

        if self.owned && !self.client.is_closed() {
            let deadline = self.teardown_deadline();
            if let Err(e) = self.client.execute(&BrowserClose {}, None, &deadline).await {
                // The browser often drops the socket before answering
                tracing::debug!("Browser.close: {}", e);
            }
        }

        if let Err(e) = self.client.close().await {
            tracing::warn!("Failed to close connection: {}", e);
            first_error.get_or_insert(e);
        }

        if let Err(e) = self.process.lock().await.close(self.close_grace).await {
            tracing::warn!(pid = ?self.pid, "Failed to close browser process: {}", e);
            first_error.get_or_insert(e);
        }

        self.events
            .publish(RenderEvent::BrowserClosed { pid: self.pid });

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
