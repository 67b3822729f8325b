use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

/// Marker token identifying a console call as a control message. The
/// sandbox has no IPC channel back to the host other than its observable
/// console stream, so control traffic is tagged with this token as the
/// first log argument and strict positional decoding does the rest.
pub const MAGIC_LOG_MARKER: &str = "$$$PAGELET_MAGIC_LOG$$$";

/// A decoded, typed event sent from sandbox to host over the log-based
/// channel. Immutable once emitted; delivery preserves emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Exit(i32),
    Custom { name: String, args: Vec<Value> },
}

/// Decode the arguments of one console call into a control message.
///
/// Returns `None` for ordinary application output: anything with fewer than
/// two arguments, or whose first argument is not exactly the marker token.
pub fn decode_console_args(args: &[Value]) -> Option<ControlMessage> {
    if args.len() < 2 {
        return None;
    }
    if args[0].as_str() != Some(MAGIC_LOG_MARKER) {
        return None;
    }

    let message_type = args[1].as_str()?;
    match message_type {
        "exit" => {
            let code = args
                .get(2)
                .and_then(Value::as_i64)
                .unwrap_or(0);
            Some(ControlMessage::Exit(code as i32))
        }
        custom => Some(ControlMessage::Custom {
            name: custom.to_string(),
            args: args[2..].to_vec(),
        }),
    }
}

type Subscriber = Arc<dyn Fn(&ControlMessage) + Send + Sync>;

/// Subscription handle returned by [`MessageBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Host-side half of the one-directional control channel.
///
/// Multi-consumer: the core's completion listener and any plugin-attached
/// subscribers receive every message, in subscription order, in the exact
/// order messages were logged. Subscribing and unsubscribing are safe while
/// a dispatch is in progress; unsubscription is idempotent.
#[derive(Default)]
pub struct MessageBus {
    inner: Mutex<BusState>,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&ControlMessage) + Send + Sync + 'static,
    {
        let mut state = self.inner.lock().expect("message bus poisoned");
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        state.subscribers.push((id, Arc::new(subscriber)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.inner.lock().expect("message bus poisoned");
        state.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Deliver one message to every subscriber. Subscribers are invoked
    /// outside the lock, on a snapshot, so they may subscribe/unsubscribe
    /// freely from within the callback.
    pub fn dispatch(&self, message: &ControlMessage) {
        let snapshot: Vec<Subscriber> = {
            let state = self.inner.lock().expect("message bus poisoned");
            state.subscribers.iter().map(|(_, sub)| sub.clone()).collect()
        };
        debug!(?message, subscribers = snapshot.len(), "Dispatching control message");
        for subscriber in snapshot {
            subscriber(message);
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}
