//! Continuous replication of committed cloud mutations into the local tier.

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::{
	datastore::{Datastore, ErrorSink, SnapshotListener},
	error::DatastoreError,
	events::{
		dispatcher::EventDispatcher, Consistency, DocMetaSnapshotEvent, SynchronizationEvent,
	},
	index::ComparisonIndex,
	mutation::DatastoreMutation,
	types::{MutationType, Tier},
};

struct QueuedEvent {
	/// Captured at enqueue time so events observed before reconciliation
	/// completed never replicate, however long they sit in the queue.
	replicate: bool,
	event: DocMetaSnapshotEvent,
}

/// Receives every event both latches observe plus the reconciler's synthetic
/// events, serializes their handling on a single worker, mirrors committed
/// cloud mutations into the local tier once initial sync completed, and
/// forwards each event to the downstream (dedup-wrapped) caller listener.
///
/// The worker is the only task that ever invokes the downstream listener,
/// so callers see at most one mutation handler running at a time.
pub(crate) struct ReplicatingListener {
	tx: mpsc::Sender<QueuedEvent>,
	queue_capacity: usize,
	initial_sync_done: AtomicBool,
}

impl ReplicatingListener {
	pub(crate) fn spawn(
		local: Arc<dyn Datastore>,
		index: Arc<ComparisonIndex>,
		downstream: Arc<dyn SnapshotListener>,
		sync_events: Arc<EventDispatcher<SynchronizationEvent>>,
		errors: ErrorSink,
		queue_capacity: usize,
	) -> Arc<Self> {
		let queue_capacity = queue_capacity.max(1);
		let (tx, mut rx) = mpsc::channel(queue_capacity);

		let worker = ReplicationWorker {
			local,
			index,
			downstream,
			sync_events,
			errors,
		};

		tokio::spawn(async move {
			while let Some(queued) = rx.recv().await {
				worker.process(queued).await;
			}
			trace!("replication queue closed");
		});

		Arc::new(Self {
			tx,
			queue_capacity,
			initial_sync_done: AtomicBool::new(false),
		})
	}

	pub(crate) fn mark_initial_sync_complete(&self) {
		self.initial_sync_done.store(true, Ordering::Release);
		debug!("initial sync complete, replication active");
	}

	/// Enqueue one source event. A full queue drops the event and reports it
	/// rather than blocking the source, which may be this worker itself
	/// observing its own local writes.
	pub(crate) fn on_source_event(
		&self,
		tier: Tier,
		event: DocMetaSnapshotEvent,
	) -> Result<(), DatastoreError> {
		let replicate = self.initial_sync_done.load(Ordering::Acquire)
			&& tier == Tier::Cloud
			&& event.consistency == Consistency::Committed;

		self.enqueue(QueuedEvent { replicate, event })
	}

	/// Enqueue a reconciler-synthesized event. Never replicates (the
	/// reconciler already applied the copy); it only flows to the downstream
	/// listener from the worker, like every other event.
	pub(crate) fn on_reconciler_event(
		&self,
		event: DocMetaSnapshotEvent,
	) -> Result<(), DatastoreError> {
		self.enqueue(QueuedEvent {
			replicate: false,
			event,
		})
	}

	fn enqueue(&self, queued: QueuedEvent) -> Result<(), DatastoreError> {
		self.tx.try_send(queued).map_err(|e| match e {
			mpsc::error::TrySendError::Full(_) => {
				DatastoreError::ReplicationQueueFull(self.queue_capacity)
			}
			mpsc::error::TrySendError::Closed(_) => DatastoreError::Stopped,
		})
	}
}

struct ReplicationWorker {
	local: Arc<dyn Datastore>,
	index: Arc<ComparisonIndex>,
	downstream: Arc<dyn SnapshotListener>,
	sync_events: Arc<EventDispatcher<SynchronizationEvent>>,
	errors: ErrorSink,
}

impl ReplicationWorker {
	async fn process(&self, queued: QueuedEvent) {
		if queued.event.consistency == Consistency::Committed {
			self.observe(&queued).await;
		}

		// the caller sees the event after its replication effects
		if let Err(e) = self.downstream.on_event(queued.event).await {
			warn!("snapshot listener failed: {e}");
		}
	}

	/// Maintain the comparison index from the observed mutations and, when
	/// replication is active for this event, mirror them into the local tier.
	async fn observe(&self, queued: &QueuedEvent) {
		for mutation in &queued.event.mutations {
			match mutation.mutation_type {
				MutationType::Created | MutationType::Updated => {
					let info = match mutation.doc_info().await {
						Ok(info) => info,
						Err(e) => {
							warn!(
								fingerprint = %mutation.fingerprint,
								"doc info provider failed during replication: {e}"
							);
							self.errors.report(&e);
							continue;
						}
					};

					// replaying an already-applied revision is a no-op
					if !self.index.is_newer(&info.fingerprint, info.uuid) {
						trace!(
							fingerprint = %info.fingerprint,
							"revision not newer than index, skipping"
						);
						continue;
					}

					if queued.replicate {
						match mutation.doc_meta().await {
							Ok(Some(doc_meta)) => {
								if let Err(e) = self.local.write_doc_meta(doc_meta).await {
									warn!(
										fingerprint = %info.fingerprint,
										"failed to apply cloud mutation locally: {e}"
									);
									self.errors.report(&e);
									continue;
								}
							}
							Ok(None) => {
								let e = DatastoreError::DocNotFound(info.fingerprint.clone());
								warn!("cloud mutation carried no metadata: {e}");
								self.errors.report(&e);
								continue;
							}
							Err(e) => {
								warn!(
									fingerprint = %info.fingerprint,
									"doc meta provider failed during replication: {e}"
								);
								self.errors.report(&e);
								continue;
							}
						}
					}

					self.index.put(&info);
				}
				MutationType::Deleted => {
					if queued.replicate {
						let doc_ref = match mutation.doc_info().await {
							Ok(info) => info.file_ref(),
							Err(e) => {
								warn!(
									fingerprint = %mutation.fingerprint,
									"doc info provider failed during replication: {e}"
								);
								self.errors.report(&e);
								continue;
							}
						};

						if let Err(e) =
							self.local.delete(doc_ref, DatastoreMutation::new()).await
						{
							warn!(
								fingerprint = %mutation.fingerprint,
								"failed to apply cloud deletion locally: {e}"
							);
							self.errors.report(&e);
							continue;
						}
					}

					self.index.remove(&mutation.fingerprint);
				}
			}
		}

		if queued.replicate {
			self.sync_events.dispatch(&SynchronizationEvent {
				dest: Tier::Local,
				event: queued.event.clone(),
			});
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use uuid::Uuid;

	use super::*;
	use crate::{
		datastore::NoopListener,
		testing::{doc_meta, MemoryDatastore},
		types::{DocInfo, Fingerprint},
	};

	fn committed(mutations: Vec<crate::events::DocMetaMutation>) -> DocMetaSnapshotEvent {
		DocMetaSnapshotEvent {
			consistency: Consistency::Committed,
			batch: None,
			mutations,
		}
	}

	async fn drain() {
		// let the worker task catch up
		tokio::time::sleep(Duration::from_millis(20)).await;
	}

	#[tokio::test]
	async fn committed_cloud_mutations_apply_after_initial_sync() {
		let local = MemoryDatastore::new(Tier::Local);
		let index = Arc::new(ComparisonIndex::new());
		let replicator = ReplicatingListener::spawn(
			local.clone(),
			index.clone(),
			Arc::new(NoopListener),
			Arc::new(EventDispatcher::new("synchronization")),
			ErrorSink::none(),
			16,
		);

		let meta = doc_meta("0x01", 1);
		let mutation = crate::events::DocMetaMutation::resolved(
			meta.doc_info.clone(),
			Some(meta),
			MutationType::Created,
		);

		// before initial sync: observed for the index, never applied
		replicator
			.on_source_event(Tier::Cloud, committed(vec![mutation.clone()]))
			.expect("enqueue");
		drain().await;
		assert!(!local
			.contains(&Fingerprint::from("0x01"))
			.await
			.expect("contains"));
		assert!(index.contains(&Fingerprint::from("0x01")));

		replicator.mark_initial_sync_complete();

		// same revision again: idempotent no-op
		replicator
			.on_source_event(Tier::Cloud, committed(vec![mutation]))
			.expect("enqueue");
		drain().await;
		assert!(!local
			.contains(&Fingerprint::from("0x01"))
			.await
			.expect("contains"));

		// a newer revision replicates
		let newer = doc_meta("0x01", 2);
		replicator
			.on_source_event(
				Tier::Cloud,
				committed(vec![crate::events::DocMetaMutation::resolved(
					newer.doc_info.clone(),
					Some(newer),
					MutationType::Updated,
				)]),
			)
			.expect("enqueue");
		drain().await;
		assert!(local
			.contains(&Fingerprint::from("0x01"))
			.await
			.expect("contains"));
		assert_eq!(
			index
				.get(&Fingerprint::from("0x01"))
				.expect("entry")
				.uuid,
			Some(Uuid::from_u128(2))
		);
	}

	#[tokio::test]
	async fn local_events_never_replicate() {
		let local = MemoryDatastore::new(Tier::Local);
		let replicator = ReplicatingListener::spawn(
			local.clone(),
			Arc::new(ComparisonIndex::new()),
			Arc::new(NoopListener),
			Arc::new(EventDispatcher::new("synchronization")),
			ErrorSink::none(),
			16,
		);
		replicator.mark_initial_sync_complete();

		let meta = doc_meta("0x05", 1);
		replicator
			.on_source_event(
				Tier::Local,
				committed(vec![crate::events::DocMetaMutation::resolved(
					DocInfo::new("0x05", Some(Uuid::from_u128(1))),
					Some(meta),
					MutationType::Created,
				)]),
			)
			.expect("enqueue");
		drain().await;

		assert!(!local
			.contains(&Fingerprint::from("0x05"))
			.await
			.expect("contains"));
	}
}
