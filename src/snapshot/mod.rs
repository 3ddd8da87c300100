//! Snapshot machinery: initial-capture latches, the two-way reconciler and
//! the continuous replication worker.

pub(crate) mod latch;
pub(crate) mod reconciler;
pub(crate) mod replicator;

use tracing::warn;

use crate::{
	datastore::ErrorSink,
	events::DocMetaSnapshotEvent,
	types::{MutationType, SyncDoc, SyncDocMap},
};

/// Resolve the event's mutations into compact [`SyncDoc`] rows.
///
/// Provider failures are reported and skipped; a partially resolved event
/// still contributes what it can.
pub(crate) async fn sync_docs_from_event(
	event: &DocMetaSnapshotEvent,
	errors: &ErrorSink,
) -> Vec<SyncDoc> {
	let mut rows = Vec::with_capacity(event.mutations.len());

	for mutation in &event.mutations {
		match mutation.doc_info().await {
			Ok(info) => rows.push(SyncDoc {
				fingerprint: info.fingerprint.clone(),
				uuid: info.uuid,
				mutation_type: mutation.mutation_type,
				file_ref: info.file_ref(),
			}),
			Err(e) => {
				warn!(
					fingerprint = %mutation.fingerprint,
					"doc info provider failed while capturing snapshot: {e}"
				);
				errors.report(&e);
			}
		}
	}

	rows
}

/// Fold resolved rows into a [`SyncDocMap`]: created/updated rows insert,
/// deleted rows remove, so a document deleted during the initial batch is
/// not resurrected by reconciliation.
pub(crate) fn apply_sync_docs(docs: &mut SyncDocMap, rows: Vec<SyncDoc>) {
	for row in rows {
		match row.mutation_type {
			MutationType::Deleted => {
				docs.remove(&row.fingerprint);
			}
			MutationType::Created | MutationType::Updated => {
				docs.insert(row.fingerprint.clone(), row);
			}
		}
	}
}
