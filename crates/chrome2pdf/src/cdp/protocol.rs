//! CDP Protocol Types
//!
//! Envelope types for CDP communication, plus the typed commands this crate
//! needs from the Browser, Target and Page domains. Pure encode/decode, no
//! state. Unknown fields are ignored; missing required fields fail decoding.

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Request ID - monotonically increasing
pub type RequestId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

/// Page lifecycle event the renderer waits for before printing.
pub const LOAD_EVENT_FIRED: &str = "Page.loadEventFired";

/// Magic bytes every PDF document starts with.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// CDP Request sent to browser
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// CDP Response from browser
#[derive(Debug, Clone, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

/// Error object carried by a failed response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, Deserialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

/// Unified CDP Message (response or event)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CDPMessage {
    Response(CDPResponse),
    Event(CDPEvent),
}

impl CDPResponse {
    /// Result payload, or the browser's error. An absent result is an empty object.
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(Error::Remote {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self.result.unwrap_or_else(|| Value::Object(Default::default())))
    }
}

/// A typed command: its wire method name and the shape of its result.
pub trait Command: Serialize {
    const METHOD: &'static str;
    type Response: DeserializeOwned;
}

/// Decode a command result into its typed response.
pub fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::DecodeError(format!("{}: {}", method, e)))
}

/// Result for commands that return nothing useful
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Empty {}

// ---------------------------------------------------------------------------
// Browser domain

#[derive(Debug, Clone, Serialize)]
pub struct BrowserClose {}

impl Command for BrowserClose {
    const METHOD: &'static str = "Browser.close";
    type Response = Empty;
}

// ---------------------------------------------------------------------------
// Target domain

#[derive(Debug, Clone, Serialize)]
pub struct CreateTarget {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTargetResult {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
}

impl Command for CreateTarget {
    const METHOD: &'static str = "Target.createTarget";
    type Response = CreateTargetResult;
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachToTarget {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
    pub flatten: bool,
}

/// Result of Target.attachToTarget
#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

impl Command for AttachToTarget {
    const METHOD: &'static str = "Target.attachToTarget";
    type Response = AttachToTargetResult;
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivateTarget {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
}

impl Command for ActivateTarget {
    const METHOD: &'static str = "Target.activateTarget";
    type Response = Empty;
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseTarget {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloseTargetResult {
    // Deprecated upstream; newer browsers omit it
    #[serde(default)]
    pub success: Option<bool>,
}

impl Command for CloseTarget {
    const METHOD: &'static str = "Target.closeTarget";
    type Response = CloseTargetResult;
}

// ---------------------------------------------------------------------------
// Page domain

#[derive(Debug, Clone, Serialize)]
pub struct PageEnable {}

impl Command for PageEnable {
    const METHOD: &'static str = "Page.enable";
    type Response = Empty;
}

#[derive(Debug, Clone, Serialize)]
pub struct Navigate {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
    pub frame_id: String,
    #[serde(default)]
    pub loader_id: Option<String>,
    #[serde(default)]
    pub error_text: Option<String>,
}

impl Command for Navigate {
    const METHOD: &'static str = "Page.navigate";
    type Response = NavigateResult;
}

/// Params of Page.loadEventFired
#[derive(Debug, Clone, Deserialize)]
pub struct LoadEventFired {
    pub timestamp: f64,
}

/// Wire params of Page.printToPDF. Built from `PrintOptions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintToPdf {
    pub landscape: bool,
    pub print_background: bool,
    #[serde(rename = "preferCSSPageSize")]
    pub prefer_css_page_size: bool,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_height: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub display_header_footer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer_template: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrintToPdfResult {
    /// Base64-encoded PDF document
    pub data: String,
}

impl Command for PrintToPdf {
    const METHOD: &'static str = "Page.printToPDF";
    type Response = PrintToPdfResult;
}

impl PrintToPdfResult {
    /// Decode the payload and check it really is a PDF document.
    pub fn into_pdf(self) -> Result<Vec<u8>> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| Error::DecodeError(format!("{}: {}", PrintToPdf::METHOD, e)))?;
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(Error::DecodeError(format!(
                "{}: payload is not a PDF document ({} bytes)",
                PrintToPdf::METHOD,
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}
