//! CDP Client - The Core Communication Layer
//!
//! Design decisions:
//! 1. Single WebSocket per browser connection (no per-session WS overhead)
//! 2. Request/response matching via ID, events routed to one waiter per
//!    (session, method) pair
//! 3. One dispatch task per connection; callers never block it
//! 4. Fail fast - no retries, no queuing. Let the caller decide.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::*;
use super::transport::{self, FrameSink, FrameStream};
use crate::deadline::Deadline;
use crate::error::{Error, Result};

/// Routing key for event waiters. `None` session = browser-level events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventKey {
    session_id: Option<SessionId>,
    method: String,
}

/// Routing tables shared between callers and the dispatch loop.
struct Routes {
    /// Key: request_id, Value: oneshot sender for the response, or for
    /// the error if the response could not be decoded
    pending: DashMap<RequestId, oneshot::Sender<Result<CDPResponse>>>,

    /// Key: (session, event method), Value: the single waiter
    waiters: DashMap<EventKey, Waiter>,

    /// Tells registrations for the same key apart
    next_token: AtomicU64,

    /// Set once the connection is gone; checked after every registration
    closed: AtomicBool,
}

impl Routes {
    /// Mark closed, then drop every sender so waiting callers observe
    /// `ConnectionClosed`. The flag is set first so a registration racing
    /// with this either lands before the clear or sees the flag.
    fn shut(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending.clear();
        self.waiters.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct Waiter {
    token: u64,
    tx: oneshot::Sender<Value>,
}

/// Removes a pending request on every exit path, including cancellation by drop.
struct PendingGuard<'a> {
    routes: &'a Routes,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.routes.pending.remove(&self.id);
    }
}

/// CDP Client - manages single WebSocket connection to browser
pub struct CDPClient {
    /// Monotonic request ID counter
    next_id: AtomicU64,

    routes: Arc<Routes>,

    /// WebSocket write half (serialized for concurrent senders)
    sink: Mutex<FrameSink>,

    /// Stops the dispatch loop on explicit close
    shutdown: CancellationToken,

    reader: StdMutex<Option<JoinHandle<()>>>,

    endpoint: String,
}

impl CDPClient {
    /// Connect to a Chrome DevTools Protocol endpoint and start dispatching.
    pub async fn connect(ws_url: &str, deadline: &Deadline) -> Result<Arc<Self>> {
        let (sink, stream) = deadline
            .bound(transport::connect(ws_url), || {
                Error::CommandTimeout(format!("connection to {}", ws_url))
            })
            .await??;

        let routes = Arc::new(Routes {
            pending: DashMap::new(),
            waiters: DashMap::new(),
            next_token: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        let shutdown = CancellationToken::new();

        let reader = tokio::spawn(dispatch_loop(stream, routes.clone(), shutdown.clone()));

        Ok(Arc::new(Self {
            next_id: AtomicU64::new(1),
            routes,
            sink: Mutex::new(sink),
            shutdown,
            reader: StdMutex::new(Some(reader)),
            endpoint: ws_url.to_string(),
        }))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send CDP request and wait for its response.
    ///
    /// Exactly one of: the response arrives, the deadline passes
    /// (`CommandTimeout`), or the connection closes (`ConnectionClosed`).
    /// The pending entry is gone afterwards in all three cases.
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<&SessionId>,
        deadline: &Deadline,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CDPRequest {
            id,
            method: method.into(),
            params,
            session_id: session_id.cloned(),
        };
        let json = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.routes.pending.insert(id, tx);
        let _guard = PendingGuard {
            routes: &self.routes,
            id,
        };
        if self.routes.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        tracing::debug!(
            id,
            method = %request.method,
            session_id = ?request.session_id,
            "Sending command"
        );

        let timeout = || Error::CommandTimeout(request.method.clone());
        deadline
            .bound(
                async {
                    let mut sink = self.sink.lock().await;
                    sink.send(json).await
                },
                timeout,
            )
            .await??;

        let response = deadline
            .bound(rx, timeout)
            .await?
            .map_err(|_| Error::ConnectionClosed)??;

        response.into_result()
    }

    /// Send a typed command and decode its typed response.
    pub async fn execute<C: Command>(
        &self,
        command: &C,
        session_id: Option<&SessionId>,
        deadline: &Deadline,
    ) -> Result<C::Response> {
        let params = serde_json::to_value(command)?;
        let result = self
            .send_request(C::METHOD, Some(params), session_id, deadline)
            .await?;
        decode(C::METHOD, result)
    }

    /// Register interest in the next `method` event for `session_id`.
    ///
    /// Registering before triggering the action (e.g. before navigating)
    /// means the event cannot slip past unobserved.
    pub fn expect_event(
        &self,
        session_id: Option<&SessionId>,
        method: impl Into<String>,
    ) -> Result<EventWaiter> {
        let key = EventKey {
            session_id: session_id.cloned(),
            method: method.into(),
        };

        let token = self.routes.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.routes.waiters.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::SubscriptionConflict {
                    session: key.session_id.unwrap_or_else(|| "<browser>".into()),
                    method: key.method,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Waiter { token, tx });
            }
        }

        let waiter = EventWaiter {
            routes: self.routes.clone(),
            key,
            token,
            rx: Some(rx),
        };
        if self.routes.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        Ok(waiter)
    }

    /// Register and wait for one event in a single call.
    pub async fn await_event(
        &self,
        session_id: Option<&SessionId>,
        method: impl Into<String>,
        deadline: &Deadline,
    ) -> Result<Value> {
        self.expect_event(session_id, method)?.wait(deadline).await
    }

    /// Number of requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.routes.pending.len()
    }

    /// Number of registered event waiters.
    pub fn pending_waiters(&self) -> usize {
        self.routes.waiters.len()
    }

    pub fn is_closed(&self) -> bool {
        self.routes.is_closed()
    }

    /// Close connection. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        self.routes.shut();

        let reader = self.reader.lock().ok().and_then(|mut slot| slot.take());
        let Some(reader) = reader else {
            return Ok(());
        };

        let result = self.sink.lock().await.close().await;
        let _ = reader.await;
        tracing::debug!(endpoint = %self.endpoint, "Connection closed");
        result
    }
}

impl Drop for CDPClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A registered wait for one event occurrence.
///
/// Dropping it (or any exit from `wait`) removes the registration.
pub struct EventWaiter {
    routes: Arc<Routes>,
    key: EventKey,
    token: u64,
    rx: Option<oneshot::Receiver<Value>>,
}

impl EventWaiter {
    pub fn method(&self) -> &str {
        &self.key.method
    }

    /// Wait for the event's params, the deadline (`CommandTimeout`), or the
    /// connection closing (`ConnectionClosed`).
    pub async fn wait(mut self, deadline: &Deadline) -> Result<Value> {
        let rx = self.rx.take().ok_or(Error::ConnectionClosed)?;
        let method = self.key.method.clone();
        deadline
            .bound(rx, || Error::CommandTimeout(method))
            .await?
            .map_err(|_| Error::ConnectionClosed)
    }
}

impl fmt::Debug for EventWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventWaiter")
            .field("session_id", &self.key.session_id)
            .field("method", &self.key.method)
            .finish()
    }
}

impl Drop for EventWaiter {
    fn drop(&mut self) {
        // The dispatch loop may already have taken ours and a new waiter
        // may hold the key by now.
        let token = self.token;
        self.routes
            .waiters
            .remove_if(&self.key, |_, waiter| waiter.token == token);
    }
}

/// Read frames and route them until the peer closes, a frame is malformed,
/// or the client shuts down.
async fn dispatch_loop(mut stream: FrameStream, routes: Arc<Routes>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            frame = stream.next_frame() => {
                match frame {
                    Ok(Some(text)) => {
                        if let Err(e) = route_frame(&routes, &text) {
                            tracing::error!("Closing connection: {}", e);
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("Shutdown signal received");
                break;
            }
        }
    }

    // Fail everything still waiting
    routes.shut();
}

/// Route one frame. Only a frame that is not JSON at all is fatal.
///
/// A JSON message that does not fit the envelope fails the request it
/// names with `DecodeError`; without a pending id it is dropped.
fn route_frame(routes: &Routes, text: &str) -> Result<()> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::ProtocolError(e.to_string()))?;
    let id = value.get("id").and_then(Value::as_u64);

    let msg: CDPMessage = match serde_json::from_value(value) {
        Ok(msg) => msg,
        Err(e) => {
            match id.and_then(|id| routes.pending.remove(&id)) {
                Some((id, tx)) => {
                    tracing::warn!(id, "Undecodable response: {}", e);
                    let _ = tx.send(Err(Error::DecodeError(format!("response {}: {}", id, e))));
                }
                None => tracing::warn!("Dropping undecodable message: {}", e),
            }
            return Ok(());
        }
    };

    match msg {
        CDPMessage::Response(response) => {
            if let Some((_, tx)) = routes.pending.remove(&response.id) {
                // Receiver may have just timed out
                let _ = tx.send(Ok(response));
            } else {
                tracing::debug!("Discarding late or unknown response: {}", response.id);
            }
        }
        CDPMessage::Event(event) => {
            let key = EventKey {
                session_id: event.session_id,
                method: event.method,
            };
            if let Some((_, waiter)) = routes.waiters.remove(&key) {
                let _ = waiter.tx.send(event.params.unwrap_or(Value::Null));
            } else {
                tracing::trace!(
                    method = %key.method,
                    session_id = ?key.session_id,
                    "No waiter for event"
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routes() -> Routes {
        Routes {
            pending: DashMap::new(),
            waiters: DashMap::new(),
            next_token: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    #[test]
    fn test_route_response_to_matching_request() {
        let routes = routes();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        routes.pending.insert(1, tx1);
        routes.pending.insert(2, tx2);

        route_frame(&routes, r#"{"id":2,"result":{"ok":true}}"#).unwrap();

        assert!(rx1.try_recv().is_err());
        let response = rx2.try_recv().unwrap().unwrap();
        assert_eq!(response.result, Some(json!({"ok": true})));
        assert_eq!(routes.pending.len(), 1);
    }

    #[test]
    fn test_duplicate_response_is_discarded() {
        let routes = routes();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        routes.pending.insert(1, tx1);
        routes.pending.insert(2, tx2);

        route_frame(&routes, r#"{"id":1,"result":{}}"#).unwrap();
        route_frame(&routes, r#"{"id":1,"result":{"again":true}}"#).unwrap();
        route_frame(&routes, r#"{"id":77,"result":{}}"#).unwrap();

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
        assert!(routes.pending.contains_key(&2));
    }

    #[test]
    fn test_event_routed_by_session() {
        let routes = routes();
        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        let key = |s: &str| EventKey {
            session_id: Some(s.to_string()),
            method: LOAD_EVENT_FIRED.to_string(),
        };
        routes.waiters.insert(key("A"), Waiter { token: 1, tx: tx_a });
        routes.waiters.insert(key("B"), Waiter { token: 2, tx: tx_b });

        route_frame(
            &routes,
            r#"{"method":"Page.loadEventFired","params":{"timestamp":2.0},"sessionId":"B"}"#,
        )
        .unwrap();

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), json!({"timestamp": 2.0}));
        assert_eq!(routes.waiters.len(), 1);
    }

    #[test]
    fn test_unwaited_event_dropped() {
        let routes = routes();
        route_frame(&routes, r#"{"method":"Page.frameNavigated","params":{}}"#).unwrap();
        assert!(routes.waiters.is_empty());
    }

    #[test]
    fn test_malformed_frame_is_fatal() {
        let routes = routes();
        let err = route_frame(&routes, "{not json").unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }

    #[test]
    fn test_schema_mismatch_is_not_fatal() {
        let routes = routes();
        assert!(route_frame(&routes, r#"{"hello":"world"}"#).is_ok());
    }

    #[test]
    fn test_undecodable_response_fails_its_request() {
        let routes = routes();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        routes.pending.insert(1, tx1);
        routes.pending.insert(2, tx2);

        // `error` without a message does not fit the envelope
        route_frame(&routes, r#"{"id":1,"error":{"code":-32000}}"#).unwrap();

        assert!(matches!(rx1.try_recv(), Ok(Err(Error::DecodeError(_)))));
        assert!(!routes.pending.contains_key(&1));
        assert!(rx2.try_recv().is_err());
        assert!(routes.pending.contains_key(&2));

        // Same shape for an id nobody waits for is just dropped
        route_frame(&routes, r#"{"id":9,"error":{"code":-32000}}"#).unwrap();
        assert_eq!(routes.pending.len(), 1);
    }

    #[test]
    fn test_shut_fails_waiters() {
        let routes = routes();
        let (tx, mut rx) = oneshot::channel::<Result<CDPResponse>>();
        routes.pending.insert(5, tx);

        routes.shut();

        assert!(routes.is_closed());
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }
}
