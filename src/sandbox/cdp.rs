use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{PageletError, Result};

/// One DevTools event, delivered in the exact order the browser emitted it.
#[derive(Debug)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// A DevTools protocol session over one page's WebSocket.
///
/// Method calls multiplex over sequential ids with oneshot responders; a
/// single reader task routes responses to callers and forwards events, in
/// arrival order, onto one channel. The event channel having exactly one
/// consumer is what gives the control channel its FIFO guarantee.
pub struct CdpSession {
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingCalls,
}

impl CdpSession {
    pub async fn connect(ws_url: &str) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<CdpEvent>)> {
        let (stream, _) = connect_async(ws_url).await?;
        let (mut sink, mut source) = stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));

        let pending_for_reader = pending.clone();
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(error = %e, "DevTools socket closed");
                        break;
                    }
                };
                let Message::Text(text) = message else {
                    continue;
                };
                let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                    warn!("Undecodable DevTools frame");
                    continue;
                };

                if let Some(id) = value.get("id").and_then(Value::as_u64) {
                    let responder = pending_for_reader
                        .lock()
                        .expect("pending call table poisoned")
                        .remove(&id);
                    if let Some(responder) = responder {
                        let outcome = match value.get("error") {
                            Some(error) => Err(PageletError::DevTools(error.to_string())),
                            None => Ok(value
                                .get("result")
                                .cloned()
                                .unwrap_or(Value::Null)),
                        };
                        let _ = responder.send(outcome);
                    }
                } else if let Some(method) = value.get("method").and_then(Value::as_str) {
                    trace!(method = method, "DevTools event");
                    let event = CdpEvent {
                        method: method.to_string(),
                        params: value.get("params").cloned().unwrap_or(Value::Null),
                    };
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
            }

            // Connection gone: fail every caller still waiting on a response.
            let mut pending = pending_for_reader
                .lock()
                .expect("pending call table poisoned");
            for (_, responder) in pending.drain() {
                let _ = responder.send(Err(PageletError::SandboxClosed));
            }
        });

        Ok((
            Arc::new(Self {
                next_id: AtomicU64::new(0),
                outgoing: outgoing_tx,
                pending,
            }),
            event_rx,
        ))
    }

    /// Issue one protocol method call and await its response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (responder_tx, responder_rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending call table poisoned")
            .insert(id, responder_tx);

        let payload = json!({ "id": id, "method": method, "params": params }).to_string();
        trace!(id = id, method = method, "DevTools call");

        if self.outgoing.send(Message::Text(payload.into())).is_err() {
            self.pending
                .lock()
                .expect("pending call table poisoned")
                .remove(&id);
            return Err(PageletError::SandboxClosed);
        }

        responder_rx
            .await
            .map_err(|_| PageletError::SandboxClosed)?
    }

    /// Ask the peer to close the socket. Safe to call more than once.
    pub fn disconnect(&self) {
        let _ = self.outgoing.send(Message::Close(None));
    }
}
