//! HTML to PDF through headless Chrome
//!
//! This crate drives a Chrome/Chromium process over the DevTools protocol:
//! it launches the browser, opens a tab, navigates it to a resource, waits
//! for the load event and prints the page to PDF.
//!
//! # Layers
//!
//! ```text
//! Renderer (render) -> CDPSession -> CDPClient (multiplexer) -> transport
//!        \-> Browser -> ProcessHandle (process supervisor)
//! ```
//!
//! Every blocking step is bounded by one `Deadline`, which also carries the
//! cancellation token. Teardown (tab, connection, process) runs on every
//! exit path.
//!
//! Producing the HTML and cleaning up any temporary file holding it is up
//! to the caller: hand in a `file://` URL or path and delete the file once
//! `render` returns, successful or not.

pub mod browser;
pub mod cdp;
pub mod config;
pub mod deadline;
pub mod error;
pub mod events;
pub mod pdf;
pub mod process;
pub mod render;

pub use browser::Browser;
pub use cdp::{CDPClient, CDPSession};
pub use config::{BrowserConfig, EndpointDiscovery};
pub use deadline::Deadline;
pub use error::{Error, Result};
pub use events::{EventBus, RenderEvent};
pub use pdf::{Margins, Orientation, PrintOptions, PrintSettings, RenderRequest, Unit};
pub use process::{ChromeLauncher, Launcher, ProcessHandle};
pub use render::{RenderError, RenderState, Renderer, DEFAULT_RENDER_TIMEOUT};
