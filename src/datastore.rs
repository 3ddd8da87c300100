//! The datastore contract consumed from each tier and satisfied by the
//! federation facade itself.

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
	error::DatastoreError,
	events::DocMetaSnapshotEvent,
	mutation::DatastoreMutation,
	types::{
		DocInfo, DocMeta, DocMetaFileRef, FileBackend, FileMeta, FileRef, Fingerprint,
	},
};

/// Callback invoked for errors a datastore recovers from internally.
pub type ErrorListener = Arc<dyn Fn(&DatastoreError) + Send + Sync>;

/// Cloneable wrapper around the optional user error listener.
#[derive(Clone, Default)]
pub struct ErrorSink {
	listener: Option<ErrorListener>,
}

impl ErrorSink {
	pub fn new(listener: ErrorListener) -> Self {
		Self {
			listener: Some(listener),
		}
	}

	pub fn none() -> Self {
		Self::default()
	}

	pub fn report(&self, error: &DatastoreError) {
		if let Some(listener) = &self.listener {
			listener(error);
		}
	}
}

impl fmt::Debug for ErrorSink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ErrorSink")
			.field("registered", &self.listener.is_some())
			.finish()
	}
}

/// Receives snapshot events from a datastore.
#[async_trait]
pub trait SnapshotListener: Send + Sync + 'static {
	async fn on_event(&self, event: DocMetaSnapshotEvent) -> Result<(), DatastoreError>;
}

/// Listener that discards everything; used for the primary snapshot the
/// facade opens on `init`.
pub struct NoopListener;

#[async_trait]
impl SnapshotListener for NoopListener {
	async fn on_event(&self, _event: DocMetaSnapshotEvent) -> Result<(), DatastoreError> {
		Ok(())
	}
}

/// Handle to an open snapshot subscription.
pub struct SnapshotHandle {
	id: u64,
	unsubscribe: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl SnapshotHandle {
	pub fn new(id: u64, unsubscribe: impl FnOnce() + Send + 'static) -> Self {
		Self {
			id,
			unsubscribe: Some(Box::new(unsubscribe)),
		}
	}

	/// Handle without a teardown action.
	pub fn detached(id: u64) -> Self {
		Self {
			id,
			unsubscribe: None,
		}
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn unsubscribe(mut self) {
		if let Some(unsubscribe) = self.unsubscribe.take() {
			unsubscribe();
		}
	}
}

impl fmt::Debug for SnapshotHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SnapshotHandle")
			.field("id", &self.id)
			.field("has_unsubscribe", &self.unsubscribe.is_some())
			.finish()
	}
}

/// Outcome of initializing a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitResult {
	/// Whether the tier had to create its backing storage.
	pub fresh: bool,
}

/// Outcome of a document delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
	pub existed: bool,
}

/// Reference to a stored document metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocMetaRef {
	pub fingerprint: Fingerprint,
}

/// A file as held by a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatastoreFile {
	pub backend: FileBackend,
	pub file_ref: FileRef,
	pub data: Vec<u8>,
	pub meta: FileMeta,
}

/// Contract every tier implements; [`crate::FederatedDatastore`] implements
/// it too, so a federation can stand wherever a single tier can.
///
/// Writes expose two progress stages through the passed-in
/// [`DatastoreMutation`]: `written` (durable on the tier) and `committed`
/// (visible to all readers of the tier). A tier that returns from
/// `write`/`delete` without settling its stages gets them settled by the
/// caller from the returned result.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
	async fn init(&self, errors: ErrorSink) -> Result<InitResult, DatastoreError>;

	async fn stop(&self) -> Result<(), DatastoreError>;

	async fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, DatastoreError>;

	/// Serialized [`DocMeta`] for `fingerprint`, if present.
	async fn get_doc_meta(
		&self,
		fingerprint: &Fingerprint,
	) -> Result<Option<String>, DatastoreError>;

	/// Apply a full metadata record, replacing any previous revision.
	async fn write_doc_meta(&self, doc_meta: DocMeta) -> Result<(), DatastoreError>;

	async fn write(
		&self,
		fingerprint: Fingerprint,
		data: String,
		doc_info: DocInfo,
		mutation: DatastoreMutation,
	) -> Result<(), DatastoreError>;

	async fn delete(
		&self,
		doc_ref: DocMetaFileRef,
		mutation: DatastoreMutation,
	) -> Result<DeleteResult, DatastoreError>;

	async fn write_file(
		&self,
		backend: FileBackend,
		file_ref: FileRef,
		data: Vec<u8>,
		meta: FileMeta,
	) -> Result<DatastoreFile, DatastoreError>;

	async fn get_file(
		&self,
		backend: FileBackend,
		file_ref: &FileRef,
	) -> Result<Option<DatastoreFile>, DatastoreError>;

	async fn contains_file(
		&self,
		backend: FileBackend,
		file_ref: &FileRef,
	) -> Result<bool, DatastoreError>;

	async fn delete_file(
		&self,
		backend: FileBackend,
		file_ref: &FileRef,
	) -> Result<(), DatastoreError>;

	async fn doc_meta_refs(&self) -> Result<Vec<DocMetaRef>, DatastoreError>;

	/// Open a snapshot: the current contents are emitted as a committed,
	/// terminated batch, then further changes stream to `listener` until the
	/// returned handle is unsubscribed.
	async fn snapshot(
		&self,
		listener: Arc<dyn SnapshotListener>,
		errors: ErrorSink,
	) -> Result<SnapshotHandle, DatastoreError>;
}
