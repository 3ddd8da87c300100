//! Event wire types flowing between tiers, the federation layer and
//! subscribers.

pub mod dedup;
pub mod dispatcher;

use std::{fmt, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::{
	error::DatastoreError,
	types::{DocInfo, DocMeta, FileBackend, FileRef, Fingerprint, MutationType, Tier},
};

/// Durability stage a snapshot event describes on its source tier.
///
/// `Written` is local-only durability on the source and may still be rolled
/// back; only `Committed` events drive replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
	Written,
	Committed,
}

/// Batch marker attached to snapshot events that belong to a batched emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBatch {
	pub id: u64,
	pub terminated: bool,
}

/// Lazily resolves the [`DocInfo`] header of a mutation.
pub type DocInfoProvider =
	Arc<dyn Fn() -> BoxFuture<'static, Result<DocInfo, DatastoreError>> + Send + Sync>;

/// Lazily resolves the full [`DocMeta`] of a mutation, `None` for deletions.
pub type DocMetaProvider =
	Arc<dyn Fn() -> BoxFuture<'static, Result<Option<DocMeta>, DatastoreError>> + Send + Sync>;

/// One document change carried by a snapshot event.
///
/// The header and payload are fetched lazily through the providers; each
/// consumer calls a provider at most once.
#[derive(Clone)]
pub struct DocMetaMutation {
	pub fingerprint: Fingerprint,
	pub mutation_type: MutationType,
	doc_info: DocInfoProvider,
	doc_meta: DocMetaProvider,
}

impl DocMetaMutation {
	pub fn new(
		fingerprint: Fingerprint,
		mutation_type: MutationType,
		doc_info: DocInfoProvider,
		doc_meta: DocMetaProvider,
	) -> Self {
		Self {
			fingerprint,
			mutation_type,
			doc_info,
			doc_meta,
		}
	}

	/// Build a mutation whose providers resolve to already-known values.
	pub fn resolved(
		doc_info: DocInfo,
		doc_meta: Option<DocMeta>,
		mutation_type: MutationType,
	) -> Self {
		let fingerprint = doc_info.fingerprint.clone();

		Self {
			fingerprint,
			mutation_type,
			doc_info: Arc::new(move || {
				let doc_info = doc_info.clone();
				async move { Ok(doc_info) }.boxed()
			}),
			doc_meta: Arc::new(move || {
				let doc_meta = doc_meta.clone();
				async move { Ok(doc_meta) }.boxed()
			}),
		}
	}

	pub async fn doc_info(&self) -> Result<DocInfo, DatastoreError> {
		(self.doc_info)().await
	}

	pub async fn doc_meta(&self) -> Result<Option<DocMeta>, DatastoreError> {
		(self.doc_meta)().await
	}
}

impl fmt::Debug for DocMetaMutation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DocMetaMutation")
			.field("fingerprint", &self.fingerprint)
			.field("mutation_type", &self.mutation_type)
			.finish_non_exhaustive()
	}
}

/// Batch of document changes observed on one tier at one durability stage.
#[derive(Debug, Clone)]
pub struct DocMetaSnapshotEvent {
	pub consistency: Consistency,
	pub batch: Option<SnapshotBatch>,
	pub mutations: Vec<DocMetaMutation>,
}

impl DocMetaSnapshotEvent {
	/// Whether this event closes the initial committed batch of its source.
	pub fn is_terminal_marker(&self) -> bool {
		self.consistency == Consistency::Committed
			&& self.batch.is_some_and(|batch| batch.terminated)
	}
}

/// Snapshot event that was applied across tiers, annotated with the side it
/// was applied to.
#[derive(Debug, Clone)]
pub struct SynchronizationEvent {
	pub dest: Tier,
	pub event: DocMetaSnapshotEvent,
}

/// File transfer activity surfaced by an underlying tier.
#[derive(Debug, Clone)]
pub struct FileSynchronizationEvent {
	pub dest: Tier,
	pub backend: FileBackend,
	pub file_ref: FileRef,
	pub mutation_type: MutationType,
}
