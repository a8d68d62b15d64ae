//! In-process stand-in for a browser's DevTools endpoint, plus helpers
//! for fake browser executables.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use chrome2pdf::{Deadline, Launcher, ProcessHandle};

/// How the mock deviates from a well-behaved browser.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Send `Page.loadEventFired` after a navigation
    pub fire_load: bool,
    pub load_delay: Duration,
    /// Delay before answering any command
    pub response_delay: Duration,
    /// Commands that are recorded but never answered
    pub silent: Vec<String>,
    /// Commands answered with an error object that lacks its message
    pub undecodable: Vec<String>,
    /// `errorText` reported by `Page.navigate`
    pub navigate_error: Option<String>,
    /// Send a frame that is not JSON right after answering `Page.navigate`
    pub garbage_after_navigate: bool,
    /// Send `Page.loadEventFired` without its timestamp
    pub load_without_timestamp: bool,
    /// Answer every command twice
    pub duplicate_responses: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            fire_load: true,
            load_delay: Duration::from_millis(20),
            response_delay: Duration::ZERO,
            silent: Vec::new(),
            undecodable: Vec::new(),
            navigate_error: None,
            garbage_after_navigate: false,
            load_without_timestamp: false,
            duplicate_responses: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub session_id: Option<String>,
    pub params: Value,
}

#[derive(Default)]
struct State {
    calls: Mutex<Vec<Call>>,
    connections: AtomicUsize,
    next_target: AtomicUsize,
}

pub struct MockBrowser {
    port: u16,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl MockBrowser {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State::default());

        let task = tokio::spawn({
            let state = state.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, state.clone(), behavior.clone()));
                }
            }
        });

        Self { port, state, task }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> String {
        format!("ws://127.0.0.1:{}/devtools/browser/mock", self.port)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| c.method == method).count()
    }

    pub fn launcher(&self) -> Arc<MockLauncher> {
        Arc::new(MockLauncher {
            endpoint: self.endpoint(),
            launches: AtomicUsize::new(0),
        })
    }
}

impl Drop for MockBrowser {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Hands out the mock's endpoint as an externally managed browser.
pub struct MockLauncher {
    endpoint: String,
    pub launches: AtomicUsize,
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, _deadline: &Deadline) -> chrome2pdf::Result<ProcessHandle> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessHandle::external(self.endpoint.clone()))
    }
}

/// The bytes the mock prints for `session_id`.
pub fn pdf_for(session_id: &str) -> Vec<u8> {
    format!("%PDF-1.7\n% rendered by {}\n%%EOF\n", session_id).into_bytes()
}

async fn serve(stream: TcpStream, state: Arc<State>, behavior: Behavior) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let request: Value = serde_json::from_str(&text).unwrap();
        let call = Call {
            method: request["method"].as_str().unwrap_or_default().to_string(),
            session_id: request["sessionId"].as_str().map(str::to_string),
            params: request.get("params").cloned().unwrap_or(Value::Null),
        };
        state.calls.lock().unwrap().push(call.clone());

        if behavior.silent.contains(&call.method) {
            continue;
        }

        let id = request["id"].clone();
        let tx = tx.clone();
        let state = state.clone();
        let behavior = behavior.clone();
        tokio::spawn(async move {
            if !behavior.response_delay.is_zero() {
                tokio::time::sleep(behavior.response_delay).await;
            }
            respond(&tx, &state, &behavior, id, call).await;
        });
    }

    drop(tx);
    let _ = writer.await;
}

async fn respond(
    tx: &mpsc::UnboundedSender<Message>,
    state: &State,
    behavior: &Behavior,
    id: Value,
    call: Call,
) {
    let send = |value: Value| {
        let _ = tx.send(Message::Text(value.to_string()));
    };
    let reply = |result: Value| {
        let frame = json!({ "id": id, "result": result });
        send(frame.clone());
        if behavior.duplicate_responses {
            send(frame);
        }
    };

    if behavior.undecodable.contains(&call.method) {
        send(json!({ "id": id, "error": { "code": -32000 } }));
        return;
    }

    match call.method.as_str() {
        "Target.createTarget" => {
            let n = state.next_target.fetch_add(1, Ordering::SeqCst) + 1;
            reply(json!({ "targetId": format!("target-{}", n) }));
        }
        "Target.attachToTarget" => {
            let target = call.params["targetId"].as_str().unwrap_or("unknown");
            reply(json!({ "sessionId": format!("session-{}", target) }));
        }
        "Target.activateTarget" | "Page.enable" => reply(json!({})),
        "Target.closeTarget" => reply(json!({ "success": true })),
        "Page.navigate" => {
            let mut result = json!({ "frameId": "frame-1", "loaderId": "loader-1" });
            if let Some(error_text) = &behavior.navigate_error {
                result["errorText"] = json!(error_text);
            }
            reply(result);

            if behavior.garbage_after_navigate {
                let _ = tx.send(Message::Text("this is not json".into()));
                return;
            }
            if behavior.fire_load && behavior.navigate_error.is_none() {
                tokio::time::sleep(behavior.load_delay).await;
                send(json!({
                    "method": "Page.loadEventFired",
                    "params": if behavior.load_without_timestamp {
                        json!({})
                    } else {
                        json!({ "timestamp": 1234.5 })
                    },
                    "sessionId": call.session_id,
                }));
            }
        }
        "Page.printToPDF" => {
            let session = call.session_id.as_deref().unwrap_or("browser");
            let data = base64::engine::general_purpose::STANDARD.encode(pdf_for(session));
            reply(json!({ "data": data }));
        }
        "Browser.close" => {
            reply(json!({}));
            let _ = tx.send(Message::Close(None));
        }
        other => send(json!({
            "id": id,
            "error": { "code": -32601, "message": format!("'{}' wasn't found", other) },
        })),
    }
}

/// Write an executable shell script that behaves like a browser binary.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A "browser" that announces `endpoint` on stderr and then idles.
#[cfg(unix)]
pub fn fake_chrome(dir: &Path, endpoint: &str) -> PathBuf {
    write_script(
        dir,
        "fake-chrome",
        &format!(
            "echo 'some startup noise' >&2\necho 'DevTools listening on {}' >&2\nexec sleep 30",
            endpoint
        ),
    )
}

/// A "browser" that writes `DevToolsActivePort` into its profile directory.
#[cfg(unix)]
pub fn fake_chrome_port_file(dir: &Path, port: u16) -> PathBuf {
    write_script(
        dir,
        "fake-chrome-port-file",
        &format!(
            r#"for arg in "$@"; do
  case "$arg" in
    --user-data-dir=*) profile="${{arg#--user-data-dir=}}" ;;
  esac
done
printf '%s\n%s\n' {} /devtools/browser/mock > "$profile/DevToolsActivePort"
exec sleep 30"#,
            port
        ),
    )
}

/// Whether a process with this pid still exists.
#[cfg(target_os = "linux")]
pub fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}
