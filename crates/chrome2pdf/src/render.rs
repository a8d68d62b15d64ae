//! Render Orchestrator
//!
//! Drives one render through
//! `Idle -> Launching -> TargetOpening -> Navigating -> AwaitingLoad -> Printing -> Done`,
//! with `Failed` reachable from any non-terminal state. Whatever the
//! outcome, the session is closed before the connection, and the
//! connection before the process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::browser::Browser;
use crate::cdp::protocol::{decode, LoadEventFired, LOAD_EVENT_FIRED};
use crate::cdp::CDPSession;
use crate::config::BrowserConfig;
use crate::deadline::Deadline;
use crate::error::Error;
use crate::events::{EventBus, RenderEvent};
use crate::pdf::RenderRequest;
use crate::process::{ChromeLauncher, Launcher};

/// Budget a render gets when the caller has no opinion
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderState {
    Idle,
    Launching,
    TargetOpening,
    Navigating,
    AwaitingLoad,
    Printing,
    Done,
    Failed,
}

impl RenderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RenderState::Done | RenderState::Failed)
    }

    /// Renders on an already running browser start at `TargetOpening`.
    pub fn can_transition_to(self, next: RenderState) -> bool {
        use RenderState::*;
        match (self, next) {
            (Idle, Launching)
            | (Idle, TargetOpening)
            | (Launching, TargetOpening)
            | (TargetOpening, Navigating)
            | (Navigating, AwaitingLoad)
            | (AwaitingLoad, Printing)
            | (Printing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderState::Idle => "idle",
            RenderState::Launching => "launching",
            RenderState::TargetOpening => "opening target",
            RenderState::Navigating => "navigating",
            RenderState::AwaitingLoad => "awaiting load",
            RenderState::Printing => "printing",
            RenderState::Done => "done",
            RenderState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A failed render: the underlying error and the state it happened in.
#[derive(Debug, Error)]
#[error("Render failed while {state}: {error}")]
pub struct RenderError {
    pub state: RenderState,
    #[source]
    pub error: Error,
}

impl RenderError {
    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn into_error(self) -> Error {
        self.error
    }
}

pub type RenderResult = std::result::Result<Vec<u8>, RenderError>;

/// Turns render requests into PDF bytes.
pub struct Renderer {
    config: BrowserConfig,
    launcher: Arc<dyn Launcher>,
    events: EventBus,
}

impl Renderer {
    pub fn new(config: BrowserConfig) -> Self {
        let launcher = Arc::new(ChromeLauncher::new(config.clone()));
        Self::with_launcher(config, launcher)
    }

    pub fn with_launcher(config: BrowserConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config,
            launcher,
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Launch a browser that several renders can share via `render_with`.
    /// The caller closes it.
    pub async fn launch(&self, deadline: &Deadline) -> crate::Result<Browser> {
        Browser::start(
            self.launcher.as_ref(),
            &self.config,
            self.events.clone(),
            deadline,
        )
        .await
    }

    /// Render on a browser of its own, launched and torn down by this call.
    pub async fn render(&self, request: &RenderRequest, deadline: &Deadline) -> RenderResult {
        let mut run = RenderRun::new(self.events.clone());
        tracing::info!(render_id = %run.id, locator = %request.locator(), "Render started");

        run.advance(RenderState::Launching, deadline)?;
        let browser = self.launch(deadline).await.map_err(|e| run.fail(e))?;

        let result = run.print(&browser, request, deadline).await;

        if let Err(e) = browser.close().await {
            tracing::warn!(render_id = %run.id, "Browser teardown failed: {}", e);
        }
        run.finish(&result);
        result
    }

    /// Render in a new tab of an already running browser.
    pub async fn render_with(
        &self,
        browser: &Browser,
        request: &RenderRequest,
        deadline: &Deadline,
    ) -> RenderResult {
        let mut run = RenderRun::new(self.events.clone());
        tracing::info!(render_id = %run.id, locator = %request.locator(), "Render started");

        let result = run.print(browser, request, deadline).await;
        run.finish(&result);
        result
    }
}

/// State of one render in flight.
struct RenderRun {
    id: Uuid,
    state: RenderState,
    events: EventBus,
}

impl RenderRun {
    fn new(events: EventBus) -> Self {
        Self {
            id: Uuid::now_v7(),
            state: RenderState::Idle,
            events,
        }
    }

    /// Move to `next` unless the render was cancelled or ran out of time.
    fn advance(&mut self, next: RenderState, deadline: &Deadline) -> Result<(), RenderError> {
        if deadline.is_cancelled() {
            return Err(self.fail(Error::Cancelled));
        }
        if deadline.is_expired() {
            return Err(self.fail(Error::OverallDeadlineExceeded));
        }
        self.transition(next);
        Ok(())
    }

    fn fail(&mut self, error: Error) -> RenderError {
        let state = self.state;
        self.transition(RenderState::Failed);
        RenderError { state, error }
    }

    fn transition(&mut self, next: RenderState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(render_id = %self.id, from = %self.state, to = %next, "Render state");
        self.events.publish(RenderEvent::StateChanged {
            render_id: self.id,
            from: self.state,
            to: next,
        });
        self.state = next;
    }

    fn finish(&self, result: &RenderResult) {
        match result {
            Ok(pdf) => tracing::info!(render_id = %self.id, bytes = pdf.len(), "Render done"),
            Err(e) => tracing::info!(render_id = %self.id, "{}", e),
        }
    }

    /// Open a session, drive it, and close it again no matter what.
    async fn print(
        &mut self,
        browser: &Browser,
        request: &RenderRequest,
        deadline: &Deadline,
    ) -> RenderResult {
        self.advance(RenderState::TargetOpening, deadline)?;
        let session = browser
            .new_session(deadline)
            .await
            .map_err(|e| self.fail(e))?;
        self.events.publish(RenderEvent::SessionOpened {
            render_id: self.id,
            session_id: session.session_id.clone(),
        });

        let result = self.drive(&session, request, deadline).await;

        match session.close(&browser.teardown_deadline()).await {
            Ok(()) => self.events.publish(RenderEvent::SessionClosed {
                render_id: self.id,
                session_id: session.session_id.clone(),
            }),
            Err(e) => tracing::warn!(render_id = %self.id, "Failed to close session: {}", e),
        }
        result
    }

    async fn drive(
        &mut self,
        session: &CDPSession,
        request: &RenderRequest,
        deadline: &Deadline,
    ) -> RenderResult {
        session.activate(deadline).await.map_err(|e| self.fail(e))?;
        session.enable_page(deadline).await.map_err(|e| self.fail(e))?;

        self.advance(RenderState::Navigating, deadline)?;
        // Registered before navigating so a fast load cannot be missed
        let load = session
            .expect_event(LOAD_EVENT_FIRED)
            .map_err(|e| self.fail(e))?;
        session
            .navigate(request.locator().as_str(), deadline)
            .await
            .map_err(|e| self.fail(e))?;

        self.advance(RenderState::AwaitingLoad, deadline)?;
        let params = load.wait(deadline).await.map_err(|e| self.fail(e))?;
        let loaded: LoadEventFired =
            decode(LOAD_EVENT_FIRED, params).map_err(|e| self.fail(e))?;
        tracing::debug!(render_id = %self.id, timestamp = loaded.timestamp, "Page loaded");

        self.advance(RenderState::Printing, deadline)?;
        let pdf = session
            .print_to_pdf(request.options(), deadline)
            .await
            .map_err(|e| self.fail(e))?;

        self.transition(RenderState::Done);
        Ok(pdf)
    }
}
