//! Single-shot gate over one tier's initial committed snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use super::{apply_sync_docs, replicator::ReplicatingListener, sync_docs_from_event};
use crate::{
	datastore::{Datastore, ErrorSink, SnapshotHandle, SnapshotListener},
	error::DatastoreError,
	events::DocMetaSnapshotEvent,
	types::{SyncDocMap, Tier},
};

#[derive(Default)]
struct LatchState {
	docs: SyncDocMap,
	done: bool,
}

/// Accumulates one tier's snapshot rows until the first committed,
/// terminated batch arrives, then releases.
///
/// The latch owns its map and completion signal outright and forwards every
/// event, released or not, to the shared replicating listener tagged with
/// its tier.
pub(crate) struct InitialSnapshotLatch {
	tier: Tier,
	replicator: Arc<ReplicatingListener>,
	errors: ErrorSink,
	state: Mutex<LatchState>,
	released: watch::Sender<bool>,
}

impl InitialSnapshotLatch {
	pub(crate) fn new(
		tier: Tier,
		replicator: Arc<ReplicatingListener>,
		errors: ErrorSink,
	) -> Arc<Self> {
		Arc::new(Self {
			tier,
			replicator,
			errors,
			state: Mutex::new(LatchState::default()),
			released: watch::Sender::new(false),
		})
	}

	/// Open a snapshot on `store` with this latch as listener.
	pub(crate) async fn attach(
		self: &Arc<Self>,
		store: &Arc<dyn Datastore>,
	) -> Result<SnapshotHandle, DatastoreError> {
		store
			.snapshot(self.clone() as Arc<dyn SnapshotListener>, self.errors.clone())
			.await
	}

	/// Wait until the first committed, terminated batch has been observed.
	pub(crate) async fn released(&self) {
		let mut rx = self.released.subscribe();
		// Err only if the sender dropped, which `self` prevents
		let _ = rx.wait_for(|released| *released).await;
	}

	/// Move the frozen map out for reconciliation.
	pub(crate) fn take_docs(&self) -> SyncDocMap {
		std::mem::take(&mut self.lock_state().docs)
	}

	fn lock_state(&self) -> MutexGuard<'_, LatchState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[async_trait]
impl SnapshotListener for InitialSnapshotLatch {
	async fn on_event(&self, event: DocMetaSnapshotEvent) -> Result<(), DatastoreError> {
		// `written` events contribute rows but never release; events after
		// release only forward
		if !self.lock_state().done {
			let rows = sync_docs_from_event(&event, &self.errors).await;

			let release = {
				let mut state = self.lock_state();
				if state.done {
					false
				} else {
					apply_sync_docs(&mut state.docs, rows);
					if event.is_terminal_marker() {
						state.done = true;
						true
					} else {
						false
					}
				}
			};

			if release {
				debug!(tier = %self.tier, "initial snapshot batch terminated");
				self.released.send_replace(true);
			}
		}

		self.replicator.on_source_event(self.tier, event)
	}
}
