//! The federated datastore facade.
//!
//! Reads are served by the local tier for latency; writes fan out to both
//! tiers with coordinated acknowledgement; the first snapshot reconciles the
//! two sides and from then on committed cloud changes replicate into the
//! local mirror.

use std::sync::{
	atomic::{AtomicBool, AtomicU64, Ordering},
	Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::{
	config::FederationConfig,
	datastore::{
		Datastore, DatastoreFile, DeleteResult, DocMetaRef, ErrorSink, InitResult,
		NoopListener, SnapshotHandle, SnapshotListener,
	},
	error::DatastoreError,
	events::{
		dedup::DedupListener,
		dispatcher::{EventDispatcher, EventListenerFn},
		FileSynchronizationEvent, SynchronizationEvent,
	},
	index::ComparisonIndex,
	mutation::{coordinate_batched, run_settling, CommittedHook, DatastoreMutation},
	snapshot::{
		latch::InitialSnapshotLatch,
		reconciler::{self, ReconcileSide},
		replicator::ReplicatingListener,
	},
	types::{
		DocInfo, DocMeta, DocMetaFileRef, FileBackend, FileMeta, FileRef, Fingerprint, Tier,
	},
};

pub struct FederatedDatastore {
	local: Arc<dyn Datastore>,
	cloud: Arc<dyn Datastore>,
	config: FederationConfig,

	/// Newest observed revision per fingerprint, shared by the write path
	/// and every snapshot's replication worker.
	index: Arc<ComparisonIndex>,

	sync_events: Arc<EventDispatcher<SynchronizationEvent>>,
	file_events: Arc<EventDispatcher<FileSynchronizationEvent>>,

	/// First snapshot caller becomes the primary, exactly once.
	primary_claimed: AtomicBool,
	primary: Mutex<Option<SnapshotHandle>>,

	/// Observability aid only; has no correctness role.
	snapshot_ids: AtomicU64,
}

impl FederatedDatastore {
	pub fn new(local: Arc<dyn Datastore>, cloud: Arc<dyn Datastore>) -> Self {
		Self::with_config(local, cloud, FederationConfig::default())
	}

	pub fn with_config(
		local: Arc<dyn Datastore>,
		cloud: Arc<dyn Datastore>,
		config: FederationConfig,
	) -> Self {
		Self {
			local,
			cloud,
			config,
			index: Arc::new(ComparisonIndex::new()),
			sync_events: Arc::new(EventDispatcher::new("synchronization")),
			file_events: Arc::new(EventDispatcher::new("file_synchronization")),
			primary_claimed: AtomicBool::new(false),
			primary: Mutex::new(None),
			snapshot_ids: AtomicU64::new(0),
		}
	}

	pub fn comparison_index(&self) -> &Arc<ComparisonIndex> {
		&self.index
	}

	pub fn add_synchronization_event_listener(
		&self,
		listener: EventListenerFn<SynchronizationEvent>,
	) {
		self.sync_events.add_listener(listener);
	}

	pub fn add_file_synchronization_event_listener(
		&self,
		listener: EventListenerFn<FileSynchronizationEvent>,
	) {
		self.file_events.add_listener(listener);
	}

	/// Surface file transfer activity from an underlying tier to registered
	/// observers.
	pub fn emit_file_synchronization_event(&self, event: &FileSynchronizationEvent) {
		self.file_events.dispatch(event);
	}

	fn index_put_hook(&self, doc_info: DocInfo) -> CommittedHook {
		let index = self.index.clone();
		// runs on success and failure alike
		Box::new(move |_result| index.put(&doc_info))
	}

	fn index_remove_hook(&self, fingerprint: Fingerprint) -> CommittedHook {
		let index = self.index.clone();
		Box::new(move |_result| index.remove(&fingerprint))
	}
}

#[async_trait]
impl Datastore for FederatedDatastore {
	#[instrument(skip(self, errors))]
	async fn init(&self, errors: ErrorSink) -> Result<InitResult, DatastoreError> {
		info!("initializing federated datastore");

		let (local_init, cloud_init) =
			tokio::join!(self.local.init(errors.clone()), self.cloud.init(errors.clone()));
		let local_init = local_init?;
		cloud_init?;

		let handle = self.snapshot(Arc::new(NoopListener), errors).await?;
		*self.primary.lock().await = Some(handle);

		Ok(local_init)
	}

	async fn stop(&self) -> Result<(), DatastoreError> {
		if let Some(handle) = self.primary.lock().await.take() {
			debug!(snapshot_id = handle.id(), "revoking primary snapshot");
			handle.unsubscribe();
		}

		let (local_stop, cloud_stop) = tokio::join!(self.local.stop(), self.cloud.stop());
		local_stop?;
		cloud_stop
	}

	async fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, DatastoreError> {
		self.local.contains(fingerprint).await
	}

	async fn get_doc_meta(
		&self,
		fingerprint: &Fingerprint,
	) -> Result<Option<String>, DatastoreError> {
		self.local.get_doc_meta(fingerprint).await
	}

	async fn write_doc_meta(&self, doc_meta: DocMeta) -> Result<(), DatastoreError> {
		self.local.write_doc_meta(doc_meta).await
	}

	async fn write(
		&self,
		fingerprint: Fingerprint,
		data: String,
		doc_info: DocInfo,
		mutation: DatastoreMutation,
	) -> Result<(), DatastoreError> {
		let cloud_mutation = DatastoreMutation::new();
		let local_mutation = DatastoreMutation::new();

		// hook registered before either write starts, so it runs on all paths
		coordinate_batched(
			&mutation,
			&cloud_mutation,
			&local_mutation,
			Some(self.index_put_hook(doc_info.clone())),
		);

		let (cloud_result, local_result) = tokio::join!(
			run_settling(
				&cloud_mutation,
				self.cloud.write(
					fingerprint.clone(),
					data.clone(),
					doc_info.clone(),
					cloud_mutation.clone(),
				),
			),
			run_settling(
				&local_mutation,
				self.local
					.write(fingerprint, data, doc_info, local_mutation.clone()),
			),
		);

		cloud_result?;
		local_result
	}

	async fn delete(
		&self,
		doc_ref: DocMetaFileRef,
		mutation: DatastoreMutation,
	) -> Result<DeleteResult, DatastoreError> {
		let cloud_mutation = DatastoreMutation::new();
		let local_mutation = DatastoreMutation::new();

		coordinate_batched(
			&mutation,
			&cloud_mutation,
			&local_mutation,
			Some(self.index_remove_hook(doc_ref.fingerprint.clone())),
		);

		let (cloud_result, local_result) = tokio::join!(
			run_settling(
				&cloud_mutation,
				self.cloud.delete(doc_ref.clone(), cloud_mutation.clone()),
			),
			run_settling(
				&local_mutation,
				self.local.delete(doc_ref, local_mutation.clone()),
			),
		);

		cloud_result?;
		local_result
	}

	async fn write_file(
		&self,
		backend: FileBackend,
		file_ref: FileRef,
		data: Vec<u8>,
		meta: FileMeta,
	) -> Result<DatastoreFile, DatastoreError> {
		self.cloud
			.write_file(backend, file_ref.clone(), data.clone(), meta.clone())
			.await?;
		self.local.write_file(backend, file_ref, data, meta).await
	}

	async fn get_file(
		&self,
		backend: FileBackend,
		file_ref: &FileRef,
	) -> Result<Option<DatastoreFile>, DatastoreError> {
		self.local.get_file(backend, file_ref).await
	}

	async fn contains_file(
		&self,
		backend: FileBackend,
		file_ref: &FileRef,
	) -> Result<bool, DatastoreError> {
		self.local.contains_file(backend, file_ref).await
	}

	/// Cloud first, then local: a transient cloud failure must not leave a
	/// local orphan behind.
	async fn delete_file(
		&self,
		backend: FileBackend,
		file_ref: &FileRef,
	) -> Result<(), DatastoreError> {
		self.cloud.delete_file(backend, file_ref).await?;
		self.local.delete_file(backend, file_ref).await
	}

	async fn doc_meta_refs(&self) -> Result<Vec<DocMetaRef>, DatastoreError> {
		self.local.doc_meta_refs().await
	}

	#[instrument(skip(self, listener, errors))]
	async fn snapshot(
		&self,
		listener: Arc<dyn SnapshotListener>,
		errors: ErrorSink,
	) -> Result<SnapshotHandle, DatastoreError> {
		let snapshot_id = self.snapshot_ids.fetch_add(1, Ordering::Relaxed);
		let is_primary = self
			.primary_claimed
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_ok();

		debug!(snapshot_id, is_primary, "opening snapshot");

		// the dedup-wrapped caller listener is only ever invoked by the
		// replication worker, one event at a time
		let downstream: Arc<dyn SnapshotListener> = DedupListener::wrap(listener);
		let replicator = ReplicatingListener::spawn(
			self.local.clone(),
			self.index.clone(),
			downstream,
			self.sync_events.clone(),
			errors.clone(),
			self.config.replication_queue_capacity,
		);

		let local_latch =
			InitialSnapshotLatch::new(Tier::Local, replicator.clone(), errors.clone());
		let cloud_latch =
			InitialSnapshotLatch::new(Tier::Cloud, replicator.clone(), errors.clone());

		let local_handle = local_latch.attach(&self.local).await?;
		let cloud_handle = cloud_latch.attach(&self.cloud).await?;

		tokio::join!(local_latch.released(), cloud_latch.released());

		// only the primary snapshot reconciles; secondaries observe
		if is_primary {
			let local_side = ReconcileSide {
				tier: Tier::Local,
				store: self.local.clone(),
				docs: local_latch.take_docs(),
			};
			let cloud_side = ReconcileSide {
				tier: Tier::Cloud,
				store: self.cloud.clone(),
				docs: cloud_latch.take_docs(),
			};

			reconciler::synchronize(
				snapshot_id,
				&local_side,
				&cloud_side,
				&replicator,
				&self.sync_events,
				&errors,
			)
			.await;
			reconciler::synchronize(
				snapshot_id,
				&cloud_side,
				&local_side,
				&replicator,
				&self.sync_events,
				&errors,
			)
			.await;

			info!(snapshot_id, "initial reconciliation complete");
		}

		replicator.mark_initial_sync_complete();

		Ok(SnapshotHandle::new(snapshot_id, move || {
			cloud_handle.unsubscribe();
			// the local-side subscription is tracked but deliberately kept;
			// it is torn down when the local tier stops
			drop(local_handle);
		}))
	}
}
