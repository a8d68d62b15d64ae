//! One tab: a target plus the flat session attached to it
//!
//! Commands carry the session id and travel over the browser's single
//! connection, so opening a tab never opens a socket.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::client::{CDPClient, EventWaiter};
use super::protocol::*;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::pdf::PrintOptions;

const ORPHAN_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A tab opened by `open` and torn down by `close`
pub struct CDPSession {
    client: Arc<CDPClient>,

    pub target_id: TargetId,

    /// Assigned by the browser on attach
    pub session_id: SessionId,

    closed: AtomicBool,
}

impl CDPSession {
    /// Create a new blank target and attach a flat session to it.
    pub async fn open(client: Arc<CDPClient>, deadline: &Deadline) -> Result<Self> {
        let created = client
            .execute(
                &CreateTarget {
                    url: "about:blank".into(),
                },
                None,
                deadline,
            )
            .await?;
        let target_id = created.target_id;

        let attached = client
            .execute(
                &AttachToTarget {
                    target_id: target_id.clone(),
                    flatten: true,
                },
                None,
                deadline,
            )
            .await;

        let session_id = match attached {
            Ok(result) => result.session_id,
            Err(e) => {
                // Don't leave an orphan tab behind, even if `deadline` is spent
                let cleanup = Deadline::after(ORPHAN_CLOSE_TIMEOUT);
                let _ = client
                    .execute(&CloseTarget { target_id }, None, &cleanup)
                    .await;
                return Err(e);
            }
        };

        tracing::debug!(%target_id, %session_id, "Session opened");

        Ok(Self {
            client,
            target_id,
            session_id,
            closed: AtomicBool::new(false),
        })
    }

    /// Typed command within this session's context
    pub async fn execute<C: Command>(
        &self,
        command: &C,
        deadline: &Deadline,
    ) -> Result<C::Response> {
        self.client
            .execute(command, Some(&self.session_id), deadline)
            .await
    }

    /// Bring the target to the foreground
    pub async fn activate(&self, deadline: &Deadline) -> Result<()> {
        self.client
            .execute(
                &ActivateTarget {
                    target_id: self.target_id.clone(),
                },
                None,
                deadline,
            )
            .await?;
        Ok(())
    }

    /// Enable Page domain notifications (needed for lifecycle events)
    pub async fn enable_page(&self, deadline: &Deadline) -> Result<()> {
        self.execute(&PageEnable {}, deadline).await?;
        Ok(())
    }

    /// Navigate to URL. Returns once navigation has started, not finished.
    pub async fn navigate(
        &self,
        url: impl Into<String>,
        deadline: &Deadline,
    ) -> Result<NavigateResult> {
        let result = self.execute(&Navigate { url: url.into() }, deadline).await?;
        if let Some(error_text) = &result.error_text {
            return Err(Error::NavigationFailed(error_text.clone()));
        }
        Ok(result)
    }

    /// Register for the next `method` event on this session.
    pub fn expect_event(&self, method: &str) -> Result<EventWaiter> {
        self.client.expect_event(Some(&self.session_id), method)
    }

    /// Wait for the next `method` event on this session.
    pub async fn await_event(&self, method: &str, deadline: &Deadline) -> Result<Value> {
        self.client
            .await_event(Some(&self.session_id), method, deadline)
            .await
    }

    /// Print the current page. Returns the raw PDF bytes.
    pub async fn print_to_pdf(
        &self,
        options: &PrintOptions,
        deadline: &Deadline,
    ) -> Result<Vec<u8>> {
        let result = self.execute(&options.to_params(), deadline).await?;
        result.into_pdf()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the target. Closing twice is a no-op.
    pub async fn close(&self, deadline: &Deadline) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client
            .execute(
                &CloseTarget {
                    target_id: self.target_id.clone(),
                },
                None,
                deadline,
            )
            .await?;
        tracing::debug!(target_id = %self.target_id, "Session closed");
        Ok(())
    }
}
