//! Fan-out registry for inbound payloads.
//!
//! Handlers are kept in registration order and addressed by a stable
//! [`SubscriptionId`]. Dispatch snapshots the handler list under the lock,
//! then releases it before invoking anything, so a handler may subscribe or
//! unsubscribe without deadlocking.

use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Callback receiving every inbound raw payload.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Stable identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionId(u64);

#[derive(Default)]
struct SubscriberList {
    next_id: u64,
    handlers: Vec<(SubscriptionId, MessageHandler)>,
}

/// Shared, ordered collection of handlers.
#[derive(Clone, Default)]
pub(crate) struct Subscribers {
    inner: Arc<Mutex<SubscriberList>>,
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.len())
            .finish()
    }
}

impl Subscribers {
    /// Register `handler` and return a guard that removes it.
    pub(crate) fn subscribe(&self, handler: MessageHandler) -> Subscription {
        let mut list = self.lock();
        let id = SubscriptionId(list.next_id);
        list.next_id += 1;
        list.handlers.push((id, handler));
        Subscription {
            id,
            list: Some(Arc::downgrade(&self.inner)),
        }
    }

    /// Deliver `payload` to every handler registered at call time.
    pub(crate) fn dispatch(&self, payload: &str) {
        let snapshot: Vec<MessageHandler> = self
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(payload);
        }
    }

    /// Number of registered handlers.
    pub(crate) fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SubscriberList> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration guard returned by
/// [`ConnectionManager::on_message`](super::ConnectionManager::on_message).
///
/// Dropping the guard unsubscribes; [`Subscription::unsubscribe`] does the
/// same explicitly.
#[must_use = "dropping a Subscription immediately unsubscribes the handler"]
pub struct Subscription {
    id: SubscriptionId,
    list: Option<Weak<Mutex<SubscriberList>>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.list.is_some())
            .finish()
    }
}

impl Subscription {
    /// Remove exactly this handler. Returns `false` if it was already gone.
    pub fn unsubscribe(mut self) -> bool {
        self.remove()
    }

    fn remove(&mut self) -> bool {
        let Some(list) = self.list.take().and_then(|weak| weak.upgrade()) else {
            return false;
        };
        let mut list = list.lock().unwrap_or_else(PoisonError::into_inner);
        let before = list.handlers.len();
        list.handlers.retain(|(id, _)| *id != self.id);
        list.handlers.len() != before
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (MessageHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |payload: &str| {
            sink.lock().unwrap().push(payload.to_string());
        });
        (handler, seen)
    }

    #[test]
    fn test_every_subscriber_sees_every_payload_in_order() {
        let subscribers = Subscribers::default();
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        let _sub_a = subscribers.subscribe(a);
        let _sub_b = subscribers.subscribe(b);

        subscribers.dispatch("1");
        subscribers.dispatch("2");

        assert_eq!(*seen_a.lock().unwrap(), vec!["1", "2"]);
        assert_eq!(*seen_b.lock().unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_handler() {
        let subscribers = Subscribers::default();
        let (a, seen_a) = recorder();
        let (b, seen_b) = recorder();
        let sub_a = subscribers.subscribe(a);
        let _sub_b = subscribers.subscribe(b);

        assert!(sub_a.unsubscribe());
        subscribers.dispatch("after");

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(*seen_b.lock().unwrap(), vec!["after"]);
        assert_eq!(subscribers.len(), 1);
    }

    #[test]
    fn test_same_closure_registered_twice_is_two_subscriptions() {
        let subscribers = Subscribers::default();
        let (handler, seen) = recorder();
        let first = subscribers.subscribe(Arc::clone(&handler));
        let _second = subscribers.subscribe(handler);

        drop(first);
        subscribers.dispatch("x");

        assert_eq!(*seen.lock().unwrap(), vec!["x"]);
    }

    #[test]
    fn test_handler_may_unsubscribe_during_dispatch() {
        let subscribers = Subscribers::default();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in_handler = Arc::clone(&slot);
        let sub = subscribers.subscribe(Arc::new(move |_: &str| {
            slot_in_handler.lock().unwrap().take();
        }));
        *slot.lock().unwrap() = Some(sub);

        subscribers.dispatch("x");

        assert_eq!(subscribers.len(), 0);
    }

    #[test]
    fn test_subscription_outliving_registry_is_harmless() {
        let subscribers = Subscribers::default();
        let (handler, _) = recorder();
        let sub = subscribers.subscribe(handler);
        drop(subscribers);

        assert!(!sub.unsubscribe());
    }
}
