//! Single-topic publish-subscribe with synchronous FIFO delivery.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::DatastoreError;

/// A registered listener. A returned error is logged and isolated, it never
/// reaches sibling listeners nor the dispatcher caller.
pub type EventListenerFn<E> = Arc<dyn Fn(&E) -> Result<(), DatastoreError> + Send + Sync>;

pub struct EventDispatcher<E> {
	topic: &'static str,
	listeners: RwLock<Vec<EventListenerFn<E>>>,
}

impl<E> EventDispatcher<E> {
	pub fn new(topic: &'static str) -> Self {
		Self {
			topic,
			listeners: RwLock::new(Vec::new()),
		}
	}

	pub fn add_listener(&self, listener: EventListenerFn<E>) {
		self.listeners.write().push(listener);
	}

	/// Deliver `event` to every listener in registration order.
	///
	/// The listener list is snapshotted at dispatch entry, so registrations
	/// racing with a dispatch take effect from the next event on.
	pub fn dispatch(&self, event: &E) {
		let listeners = self.listeners.read().clone();

		for listener in listeners {
			if let Err(e) = listener(event) {
				warn!(topic = self.topic, "event listener failed: {e}");
			}
		}
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.read().len()
	}
}
