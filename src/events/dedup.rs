//! Suppression of redelivered `(fingerprint, revision)` pairs.
//!
//! The same committed row is often observed both through a source snapshot
//! and again through the reconciliation-emitted synthetic event; wrapping the
//! downstream listener here guarantees it sees each row once.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::{
	datastore::SnapshotListener,
	error::DatastoreError,
	events::{DocMetaMutation, DocMetaSnapshotEvent},
	types::Fingerprint,
};

pub struct DedupListener {
	downstream: Arc<dyn SnapshotListener>,
	seen: Mutex<HashSet<(Fingerprint, Option<Uuid>)>>,
}

impl DedupListener {
	pub fn wrap(downstream: Arc<dyn SnapshotListener>) -> Arc<Self> {
		Arc::new(Self {
			downstream,
			seen: Mutex::new(HashSet::new()),
		})
	}
}

#[async_trait]
impl SnapshotListener for DedupListener {
	async fn on_event(&self, event: DocMetaSnapshotEvent) -> Result<(), DatastoreError> {
		// bare batch markers always pass so terminated batches reach the
		// downstream listener even when every store started out empty
		if event.mutations.is_empty() {
			return self.downstream.on_event(event).await;
		}

		let mut fresh: Vec<DocMetaMutation> = Vec::with_capacity(event.mutations.len());
		let mut seen = self.seen.lock().await;

		for mutation in &event.mutations {
			match mutation.doc_info().await {
				Ok(info) => {
					if seen.insert((mutation.fingerprint.clone(), info.uuid)) {
						fresh.push(mutation.clone());
					}
				}
				Err(e) => {
					// cannot resolve a revision, fail open and forward
					warn!(
						fingerprint = %mutation.fingerprint,
						"doc info provider failed during dedup: {e}"
					);
					fresh.push(mutation.clone());
				}
			}
		}

		drop(seen);

		if fresh.is_empty() {
			trace!("all mutations already delivered, dropping event");
			return Ok(());
		}

		self.downstream
			.on_event(DocMetaSnapshotEvent {
				consistency: event.consistency,
				batch: event.batch,
				mutations: fresh,
			})
			.await
	}
}
