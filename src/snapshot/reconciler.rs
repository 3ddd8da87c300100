//! One-direction diff and copy between the two tiers' initial snapshots.
//!
//! The facade runs this twice with the sides swapped, which is what makes
//! the reconciliation two-way. Only document metadata moves here; file bytes
//! stay where the remote's own snapshot stream puts them.

use std::{cmp::Ordering, sync::Arc};

use tracing::{debug, error, info, warn};

use super::replicator::ReplicatingListener;
use crate::{
	datastore::{Datastore, ErrorSink},
	error::DatastoreError,
	events::{
		dispatcher::EventDispatcher, Consistency, DocMetaMutation, DocMetaSnapshotEvent,
		SynchronizationEvent,
	},
	types::{compare_revisions, DocMeta, Fingerprint, MutationType, SyncDocMap, Tier},
};

/// One side of a reconciliation run.
pub(crate) struct ReconcileSide {
	pub tier: Tier,
	pub store: Arc<dyn Datastore>,
	pub docs: SyncDocMap,
}

/// Copy every document the source holds at a strictly newer revision than
/// the target (or that the target lacks entirely) into the target.
///
/// Synthetic committed events for each copy are enqueued on the replicating
/// listener, whose single worker is the only task that invokes the shared
/// dedup-wrapped caller listener, so delivery stays serialized and the
/// caller never sees a row twice across the two directions. A
/// [`SynchronizationEvent`] tagged with the target tier is dispatched per
/// copy. A failed copy is logged and reported, then the run continues; the
/// next snapshot retries.
pub(crate) async fn synchronize(
	snapshot_id: u64,
	source: &ReconcileSide,
	target: &ReconcileSide,
	replicator: &Arc<ReplicatingListener>,
	sync_events: &Arc<EventDispatcher<SynchronizationEvent>>,
	errors: &ErrorSink,
) {
	let mut copied = 0_usize;

	for (fingerprint, source_doc) in &source.docs {
		let target_doc = target.docs.get(fingerprint);

		let newer = match target_doc {
			None => true,
			Some(target_doc) => {
				compare_revisions(source_doc.uuid, target_doc.uuid) == Ordering::Greater
			}
		};
		if !newer {
			continue;
		}

		let mutation_type = if target_doc.is_none() {
			MutationType::Created
		} else {
			MutationType::Updated
		};

		match copy_doc(
			source,
			target,
			fingerprint,
			mutation_type,
			replicator,
			sync_events,
		)
		.await
		{
			Ok(()) => copied += 1,
			Err(e) => {
				error!(
					snapshot_id,
					fingerprint = %fingerprint,
					"reconcile copy {} -> {} failed: {e}",
					source.tier,
					target.tier
				);
				errors.report(&e);
			}
		}
	}

	info!(
		snapshot_id,
		"reconciled {} -> {}: {copied} of {} documents copied",
		source.tier,
		target.tier,
		source.docs.len()
	);
}

async fn copy_doc(
	source: &ReconcileSide,
	target: &ReconcileSide,
	fingerprint: &Fingerprint,
	mutation_type: MutationType,
	replicator: &Arc<ReplicatingListener>,
	sync_events: &Arc<EventDispatcher<SynchronizationEvent>>,
) -> Result<(), DatastoreError> {
	let data = source
		.store
		.get_doc_meta(fingerprint)
		.await?
		.ok_or_else(|| DatastoreError::DocNotFound(fingerprint.clone()))?;
	let doc_meta = DocMeta::from_json(&data)?;
	let doc_info = doc_meta.doc_info.clone();

	target.store.write_doc_meta(doc_meta.clone()).await?;

	debug!(
		fingerprint = %fingerprint,
		"copied {} -> {} at revision {:?}",
		source.tier,
		target.tier,
		doc_info.uuid
	);

	let event = DocMetaSnapshotEvent {
		consistency: Consistency::Committed,
		batch: None,
		mutations: vec![DocMetaMutation::resolved(
			doc_info,
			Some(doc_meta),
			mutation_type,
		)],
	};

	// delivery trouble must not fail the copy itself
	if let Err(e) = replicator.on_reconciler_event(event.clone()) {
		warn!(fingerprint = %fingerprint, "failed to queue synthetic event: {e}");
	}

	sync_events.dispatch(&SynchronizationEvent {
		dest: target.tier,
		event,
	});

	Ok(())
}
