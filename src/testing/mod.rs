//! In-memory reference tier and helpers used by unit and integration tests.

use std::{
	collections::{BTreeMap, HashMap},
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::{
	datastore::{
		Datastore, DatastoreFile, DeleteResult, DocMetaRef, ErrorSink, InitResult,
		SnapshotHandle, SnapshotListener,
	},
	error::DatastoreError,
	events::{Consistency, DocMetaMutation, DocMetaSnapshotEvent, SnapshotBatch},
	mutation::DatastoreMutation,
	types::{
		DocInfo, DocMeta, DocMetaFileRef, FileBackend, FileMeta, FileRef, Fingerprint,
		MutationType, Tier,
	},
};

pub fn revision(n: u128) -> Uuid {
	Uuid::from_u128(n)
}

pub fn doc_info(fingerprint: &str, revision_number: u128) -> DocInfo {
	DocInfo::new(fingerprint, Some(revision(revision_number)))
}

pub fn doc_meta(fingerprint: &str, revision_number: u128) -> DocMeta {
	DocMeta::new(
		doc_info(fingerprint, revision_number),
		serde_json::json!({
			"fingerprint": fingerprint,
			"revision": revision_number,
		}),
	)
}

struct StoredDoc {
	data: String,
	doc_info: DocInfo,
}

#[derive(Clone)]
struct Subscriber {
	id: u64,
	listener: Arc<dyn SnapshotListener>,
	errors: ErrorSink,
}

#[derive(Default)]
struct MemoryState {
	initialized: bool,
	docs: BTreeMap<Fingerprint, StoredDoc>,
	files: HashMap<(FileBackend, String), DatastoreFile>,
	subscribers: Vec<Subscriber>,
}

/// Fully functional in-memory [`Datastore`] tier.
///
/// A snapshot emits the current contents as one committed, terminated batch
/// and then streams every subsequent write and delete as committed events.
/// Failure injection (`fail_next_write`) and direct event emission (`emit`)
/// exist to drive the federation's error and edge paths from tests.
pub struct MemoryDatastore {
	tier: Tier,
	state: Arc<Mutex<MemoryState>>,
	batch_ids: AtomicU64,
	subscriber_ids: AtomicU64,
	write_ops: AtomicU64,
	fail_next_write: AtomicBool,
}

impl MemoryDatastore {
	pub fn new(tier: Tier) -> Arc<Self> {
		Arc::new(Self {
			tier,
			state: Arc::new(Mutex::new(MemoryState::default())),
			batch_ids: AtomicU64::new(0),
			subscriber_ids: AtomicU64::new(0),
			write_ops: AtomicU64::new(0),
			fail_next_write: AtomicBool::new(false),
		})
	}

	/// Make the next `write` call fail after rejecting its stages.
	pub fn fail_next_write(&self) {
		self.fail_next_write.store(true, Ordering::Release);
	}

	/// Push an arbitrary event to every live subscriber.
	pub async fn emit(&self, event: DocMetaSnapshotEvent) {
		self.deliver(event).await;
	}

	pub fn doc_count(&self) -> usize {
		self.state.lock().docs.len()
	}

	pub fn subscriber_count(&self) -> usize {
		self.state.lock().subscribers.len()
	}

	/// Total number of document writes this tier has absorbed.
	pub fn write_count(&self) -> u64 {
		self.write_ops.load(Ordering::Acquire)
	}

	async fn deliver(&self, event: DocMetaSnapshotEvent) {
		let subscribers: Vec<Subscriber> = self.state.lock().subscribers.clone();

		for subscriber in subscribers {
			if let Err(e) = subscriber.listener.on_event(event.clone()).await {
				warn!(tier = %self.tier, "snapshot listener failed: {e}");
				subscriber
					.errors
					.report(&DatastoreError::SnapshotSource(e.to_string()));
			}
		}
	}

	fn change_event(
		doc_info: DocInfo,
		doc_meta: Option<DocMeta>,
		mutation_type: MutationType,
	) -> DocMetaSnapshotEvent {
		DocMetaSnapshotEvent {
			consistency: Consistency::Committed,
			batch: None,
			mutations: vec![DocMetaMutation::resolved(doc_info, doc_meta, mutation_type)],
		}
	}
}

#[async_trait]
impl Datastore for MemoryDatastore {
	async fn init(&self, _errors: ErrorSink) -> Result<InitResult, DatastoreError> {
		let mut state = self.state.lock();
		let fresh = !state.initialized;
		state.initialized = true;
		Ok(InitResult { fresh })
	}

	async fn stop(&self) -> Result<(), DatastoreError> {
		let mut state = self.state.lock();
		state.subscribers.clear();
		state.initialized = false;
		Ok(())
	}

	async fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, DatastoreError> {
		Ok(self.state.lock().docs.contains_key(fingerprint))
	}

	async fn get_doc_meta(
		&self,
		fingerprint: &Fingerprint,
	) -> Result<Option<String>, DatastoreError> {
		Ok(self
			.state
			.lock()
			.docs
			.get(fingerprint)
			.map(|stored| stored.data.clone()))
	}

	async fn write_doc_meta(&self, doc_meta: DocMeta) -> Result<(), DatastoreError> {
		let data = doc_meta.to_json()?;
		let doc_info = doc_meta.doc_info.clone();
		self.write_ops.fetch_add(1, Ordering::AcqRel);

		let existed = {
			let mut state = self.state.lock();
			state
				.docs
				.insert(
					doc_info.fingerprint.clone(),
					StoredDoc {
						data,
						doc_info: doc_info.clone(),
					},
				)
				.is_some()
		};

		let mutation_type = if existed {
			MutationType::Updated
		} else {
			MutationType::Created
		};
		self.deliver(Self::change_event(doc_info, Some(doc_meta), mutation_type))
			.await;

		Ok(())
	}

	async fn write(
		&self,
		fingerprint: Fingerprint,
		data: String,
		doc_info: DocInfo,
		mutation: DatastoreMutation,
	) -> Result<(), DatastoreError> {
		if self.fail_next_write.swap(false, Ordering::AcqRel) {
			let error = DatastoreError::WriteFailed {
				tier: self.tier,
				fingerprint,
				reason: "injected failure".into(),
			};
			mutation.written.reject(error.clone());
			mutation.committed.reject(error.clone());
			return Err(error);
		}

		let parsed = DocMeta::from_json(&data).ok();
		self.write_ops.fetch_add(1, Ordering::AcqRel);

		let existed = {
			let mut state = self.state.lock();
			state
				.docs
				.insert(
					fingerprint,
					StoredDoc {
						data,
						doc_info: doc_info.clone(),
					},
				)
				.is_some()
		};

		mutation.written.resolve();
		mutation.committed.resolve();

		let mutation_type = if existed {
			MutationType::Updated
		} else {
			MutationType::Created
		};
		self.deliver(Self::change_event(doc_info, parsed, mutation_type))
			.await;

		Ok(())
	}

	async fn delete(
		&self,
		doc_ref: DocMetaFileRef,
		mutation: DatastoreMutation,
	) -> Result<DeleteResult, DatastoreError> {
		let removed = self.state.lock().docs.remove(&doc_ref.fingerprint);

		mutation.written.resolve();
		mutation.committed.resolve();

		let existed = removed.is_some();
		if let Some(stored) = removed {
			self.deliver(Self::change_event(
				stored.doc_info,
				None,
				MutationType::Deleted,
			))
			.await;
		}

		Ok(DeleteResult { existed })
	}

	async fn write_file(
		&self,
		backend: FileBackend,
		file_ref: FileRef,
		data: Vec<u8>,
		meta: FileMeta,
	) -> Result<DatastoreFile, DatastoreError> {
		let file = DatastoreFile {
			backend,
			file_ref: file_ref.clone(),
			data,
			meta,
		};
		self.state
			.lock()
			.files
			.insert((backend, file_ref.name), file.clone());
		Ok(file)
	}

	async fn get_file(
		&self,
		backend: FileBackend,
		file_ref: &FileRef,
	) -> Result<Option<DatastoreFile>, DatastoreError> {
		Ok(self
			.state
			.lock()
			.files
			.get(&(backend, file_ref.name.clone()))
			.cloned())
	}

	async fn contains_file(
		&self,
		backend: FileBackend,
		file_ref: &FileRef,
	) -> Result<bool, DatastoreError> {
		Ok(self
			.state
			.lock()
			.files
			.contains_key(&(backend, file_ref.name.clone())))
	}

	async fn delete_file(
		&self,
		backend: FileBackend,
		file_ref: &FileRef,
	) -> Result<(), DatastoreError> {
		self.state
			.lock()
			.files
			.remove(&(backend, file_ref.name.clone()));
		Ok(())
	}

	async fn doc_meta_refs(&self) -> Result<Vec<DocMetaRef>, DatastoreError> {
		Ok(self
			.state
			.lock()
			.docs
			.keys()
			.map(|fingerprint| DocMetaRef {
				fingerprint: fingerprint.clone(),
			})
			.collect())
	}

	async fn snapshot(
		&self,
		listener: Arc<dyn SnapshotListener>,
		errors: ErrorSink,
	) -> Result<SnapshotHandle, DatastoreError> {
		let id = self.subscriber_ids.fetch_add(1, Ordering::Relaxed);
		let batch_id = self.batch_ids.fetch_add(1, Ordering::Relaxed);

		let initial = {
			let mut state = self.state.lock();
			state.subscribers.push(Subscriber {
				id,
				listener: listener.clone(),
				errors: errors.clone(),
			});

			DocMetaSnapshotEvent {
				consistency: Consistency::Committed,
				batch: Some(SnapshotBatch {
					id: batch_id,
					terminated: true,
				}),
				mutations: state
					.docs
					.values()
					.map(|stored| {
						DocMetaMutation::resolved(
							stored.doc_info.clone(),
							DocMeta::from_json(&stored.data).ok(),
							MutationType::Created,
						)
					})
					.collect(),
			}
		};

		if let Err(e) = listener.on_event(initial).await {
			warn!(tier = %self.tier, "snapshot listener failed on initial batch: {e}");
			errors.report(&DatastoreError::SnapshotSource(e.to_string()));
		}

		let state = self.state.clone();
		Ok(SnapshotHandle::new(id, move || {
			state.lock().subscribers.retain(|s| s.id != id);
		}))
	}
}

/// [`SnapshotListener`] adapter that forwards every event into an unbounded
/// channel for test assertions.
pub struct ChannelListener {
	tx: mpsc::UnboundedSender<DocMetaSnapshotEvent>,
}

impl ChannelListener {
	pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<DocMetaSnapshotEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Arc::new(Self { tx }), rx)
	}
}

#[async_trait]
impl SnapshotListener for ChannelListener {
	async fn on_event(&self, event: DocMetaSnapshotEvent) -> Result<(), DatastoreError> {
		// a dropped receiver just means the test stopped listening
		let _ = self.tx.send(event);
		Ok(())
	}
}
