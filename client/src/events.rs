//! Event bus for discrete server events.
//!
//! Subscribers register a callback and get an explicit handle back;
//! dropping a session calls `clear`, so no handler can leak into the next
//! session. Handles are ids, not closures over the bus, which keeps
//! unsubscription deterministic and order-independent.

use delve_shared::ServerMessage;

/// Cancellation handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

type Handler = Box<dyn FnMut(&ServerMessage)>;

/// Registry of event handlers
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<(u64, Handler)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; the returned handle cancels it
    pub fn subscribe<F>(&mut self, handler: F) -> Subscription
    where
        F: FnMut(&ServerMessage) + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, Box::new(handler)));
        Subscription(id)
    }

    /// Cancel one subscription. Unknown handles are a no-op, so double
    /// unsubscription is safe.
    pub fn unsubscribe(&mut self, subscription: Subscription) {
        self.subscribers.retain(|(id, _)| *id != subscription.0);
    }

    /// Deliver a message to every live subscriber in registration order
    pub fn publish(&mut self, message: &ServerMessage) {
        for (_, handler) in &mut self.subscribers {
            handler(message);
        }
    }

    /// Release every subscriber (session teardown)
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
