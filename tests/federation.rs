//! End-to-end scenarios over two in-memory tiers.

use std::{
	sync::{Arc, Mutex},
	time::Duration,
};

use tokio::sync::mpsc::UnboundedReceiver;

use cloudmirror::{
	testing::{doc_info, doc_meta, revision, ChannelListener, MemoryDatastore},
	Consistency, Datastore, DatastoreMutation, DocMeta, DocMetaMutation,
	DocMetaSnapshotEvent, ErrorSink, FederatedDatastore, FileBackend, FileMeta, FileRef,
	Fingerprint, MutationType, SynchronizationEvent, Tier,
};
use uuid::Uuid;

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
		)
		.try_init();
}

fn federation() -> (
	Arc<FederatedDatastore>,
	Arc<MemoryDatastore>,
	Arc<MemoryDatastore>,
) {
	let local = MemoryDatastore::new(Tier::Local);
	let cloud = MemoryDatastore::new(Tier::Cloud);
	let store = Arc::new(FederatedDatastore::new(local.clone(), cloud.clone()));
	(store, local, cloud)
}

fn record_sync_events(store: &FederatedDatastore) -> Arc<Mutex<Vec<SynchronizationEvent>>> {
	let events = Arc::new(Mutex::new(Vec::new()));
	let sink = events.clone();
	store.add_synchronization_event_listener(Arc::new(move |event: &SynchronizationEvent| {
		sink.lock().unwrap().push(event.clone());
		Ok(())
	}));
	events
}

/// Poll `condition` until it holds or the test times out.
async fn eventually(mut condition: impl FnMut() -> bool, what: &str) {
	for _ in 0..200 {
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("timed out waiting for {what}");
}

/// Collect every event the listener receives until the stream goes quiet.
async fn drain_events(rx: &mut UnboundedReceiver<DocMetaSnapshotEvent>) -> Vec<DocMetaSnapshotEvent> {
	let mut events = Vec::new();
	while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
	{
		events.push(event);
	}
	events
}

async fn delivered_rows(
	rx: &mut UnboundedReceiver<DocMetaSnapshotEvent>,
	fingerprint: &Fingerprint,
) -> Vec<Option<Uuid>> {
	let mut rows = Vec::new();
	for event in drain_events(rx).await {
		for mutation in &event.mutations {
			if &mutation.fingerprint == fingerprint {
				rows.push(mutation.doc_info().await.expect("doc info").uuid);
			}
		}
	}
	rows
}

// scenario: both sides empty at init

#[tokio::test]
async fn empty_tiers_exchange_only_markers() {
	init_tracing();
	let (store, local, cloud) = federation();

	local.init(ErrorSink::none()).await.expect("local init");
	cloud.init(ErrorSink::none()).await.expect("cloud init");

	let sync_events = record_sync_events(&store);

	let (listener, mut rx) = ChannelListener::channel();
	let handle = store
		.snapshot(listener, ErrorSink::none())
		.await
		.expect("snapshot");

	let first = rx.recv().await.expect("first marker");
	assert!(first.is_terminal_marker());
	assert!(first.mutations.is_empty());

	let second = rx.recv().await.expect("second marker");
	assert!(second.is_terminal_marker());
	assert!(second.mutations.is_empty());

	assert_eq!(local.doc_count(), 0);
	assert_eq!(cloud.doc_count(), 0);
	assert!(store.comparison_index().is_empty());
	assert!(sync_events.lock().unwrap().is_empty());

	handle.unsubscribe();
}

// scenario: local holds a document the cloud lacks

#[tokio::test]
async fn missing_cloud_document_is_copied_up() {
	init_tracing();
	let (store, local, cloud) = federation();
	let fingerprint = Fingerprint::from("0xf2");

	local
		.write_doc_meta(doc_meta("0xf2", 1))
		.await
		.expect("seed local");

	local.init(ErrorSink::none()).await.expect("local init");
	cloud.init(ErrorSink::none()).await.expect("cloud init");

	let sync_events = record_sync_events(&store);

	let (listener, mut rx) = ChannelListener::channel();
	let _handle = store
		.snapshot(listener, ErrorSink::none())
		.await
		.expect("snapshot");

	// the copy happened before snapshot() returned
	assert!(cloud.contains(&fingerprint).await.expect("cloud contains"));

	// exactly one row for the document reaches the caller
	let rows = delivered_rows(&mut rx, &fingerprint).await;
	assert_eq!(rows, vec![Some(revision(1))]);

	// the copy direction was local -> cloud, and only that
	let events = sync_events.lock().unwrap();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].dest, Tier::Cloud);
	assert_eq!(events[0].event.mutations[0].fingerprint, fingerprint);
	drop(events);

	eventually(
		|| {
			store
				.comparison_index()
				.get(&fingerprint)
				.is_some_and(|entry| entry.uuid == Some(revision(1)))
		},
		"index to reflect the observed revision",
	)
	.await;
}

// scenario: both sides hold the document, cloud revision is newer

#[tokio::test]
async fn newer_cloud_revision_overwrites_local() {
	init_tracing();
	let (store, local, cloud) = federation();
	let fingerprint = Fingerprint::from("0xf3");

	local
		.write_doc_meta(doc_meta("0xf3", 1))
		.await
		.expect("seed local");
	cloud
		.write_doc_meta(doc_meta("0xf3", 2))
		.await
		.expect("seed cloud");

	local.init(ErrorSink::none()).await.expect("local init");
	cloud.init(ErrorSink::none()).await.expect("cloud init");

	let sync_events = record_sync_events(&store);

	let (listener, mut rx) = ChannelListener::channel();
	let _handle = store
		.snapshot(listener, ErrorSink::none())
		.await
		.expect("snapshot");

	let data = local
		.get_doc_meta(&fingerprint)
		.await
		.expect("get")
		.expect("present");
	let meta = DocMeta::from_json(&data).expect("decode");
	assert_eq!(meta.doc_info.uuid, Some(revision(2)));

	// one cloud -> local copy, no reverse copy
	let events = sync_events.lock().unwrap();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].dest, Tier::Local);
	drop(events);

	// the newer revision reached the caller exactly once
	let rows = delivered_rows(&mut rx, &fingerprint).await;
	assert_eq!(
		rows.iter()
			.filter(|uuid| **uuid == Some(revision(2)))
			.count(),
		1
	);
}

// scenario: a federated write reaches both tiers with staged acknowledgement

#[tokio::test]
async fn federated_write_reaches_both_tiers() {
	init_tracing();
	let (store, local, cloud) = federation();
	store.init(ErrorSink::none()).await.expect("init");

	let fingerprint = Fingerprint::from("0xf4");
	let meta = doc_meta("0xf4", 3);
	let mutation = DatastoreMutation::new();

	store
		.write(
			fingerprint.clone(),
			meta.to_json().expect("encode"),
			meta.doc_info.clone(),
			mutation.clone(),
		)
		.await
		.expect("write");

	mutation.written.wait().await.expect("written");
	mutation.committed.wait().await.expect("committed");

	assert!(local.contains(&fingerprint).await.expect("local contains"));
	assert!(cloud.contains(&fingerprint).await.expect("cloud contains"));

	// the committed signal implies the index hook already ran
	let entry = store
		.comparison_index()
		.get(&fingerprint)
		.expect("index entry");
	assert_eq!(entry.uuid, Some(revision(3)));

	store.stop().await.expect("stop");
}

#[tokio::test]
async fn failing_cloud_write_rejects_but_local_completes() {
	init_tracing();
	let (store, local, cloud) = federation();
	store.init(ErrorSink::none()).await.expect("init");

	cloud.fail_next_write();

	let meta = doc_meta("0xf9", 1);
	let mutation = DatastoreMutation::new();
	let result = store
		.write(
			Fingerprint::from("0xf9"),
			meta.to_json().expect("encode"),
			meta.doc_info.clone(),
			mutation.clone(),
		)
		.await;

	assert!(result.is_err());
	assert!(mutation.written.wait().await.is_err());
	assert!(mutation.committed.wait().await.is_err());

	// the healthy side ran to completion
	assert!(local
		.contains(&Fingerprint::from("0xf9"))
		.await
		.expect("local contains"));

	// the post-condition hook runs on failure paths too
	assert!(store.comparison_index().contains(&Fingerprint::from("0xf9")));
}

// scenario: a cloud-side delete after init replicates into the local mirror

#[tokio::test]
async fn cloud_delete_replicates_to_local() {
	init_tracing();
	let (store, local, cloud) = federation();
	let fingerprint = Fingerprint::from("0xf5");

	local
		.write_doc_meta(doc_meta("0xf5", 1))
		.await
		.expect("seed local");
	cloud
		.write_doc_meta(doc_meta("0xf5", 1))
		.await
		.expect("seed cloud");

	store.init(ErrorSink::none()).await.expect("init");

	let sync_events = record_sync_events(&store);

	cloud
		.delete(doc_info("0xf5", 1).file_ref(), DatastoreMutation::new())
		.await
		.expect("cloud delete");

	eventually(
		|| local.doc_count() == 0,
		"local mirror to drop the document",
	)
	.await;
	assert!(!local.contains(&fingerprint).await.expect("local contains"));

	eventually(
		|| {
			sync_events.lock().unwrap().iter().any(|event| {
				event.dest == Tier::Local
					&& event
						.event
						.mutations
						.first()
						.is_some_and(|m| m.mutation_type == MutationType::Deleted)
			})
		},
		"a deleted synchronization event",
	)
	.await;

	assert!(!store.comparison_index().contains(&fingerprint));
}

// scenario: a cloud redelivery of a revision the local side already has

#[tokio::test]
async fn redelivered_cloud_revision_is_inert() {
	init_tracing();
	let (store, local, cloud) = federation();
	let fingerprint = Fingerprint::from("0xf6");

	local
		.write_doc_meta(doc_meta("0xf6", 1))
		.await
		.expect("seed local");
	cloud
		.write_doc_meta(doc_meta("0xf6", 1))
		.await
		.expect("seed cloud");

	local.init(ErrorSink::none()).await.expect("local init");
	cloud.init(ErrorSink::none()).await.expect("cloud init");

	let (listener, mut rx) = ChannelListener::channel();
	let _handle = store
		.snapshot(listener, ErrorSink::none())
		.await
		.expect("snapshot");

	// the initial exchange delivers the row exactly once
	let rows = delivered_rows(&mut rx, &fingerprint).await;
	assert_eq!(rows.len(), 1);

	let writes_before = local.write_count();

	// cloud re-announces the same revision after initial sync
	let meta = doc_meta("0xf6", 1);
	cloud
		.emit(DocMetaSnapshotEvent {
			consistency: Consistency::Committed,
			batch: None,
			mutations: vec![DocMetaMutation::resolved(
				meta.doc_info.clone(),
				Some(meta),
				MutationType::Updated,
			)],
		})
		.await;

	// nothing new reaches the caller and no local write happens
	let rows = delivered_rows(&mut rx, &fingerprint).await;
	assert!(rows.is_empty(), "redelivery must be suppressed");
	assert_eq!(local.write_count(), writes_before);
}

// secondary snapshots observe but do not reconcile

#[tokio::test]
async fn secondary_snapshot_skips_reconciliation() {
	init_tracing();
	let (store, local, cloud) = federation();
	store.init(ErrorSink::none()).await.expect("init");

	// diverge the tiers behind the facade's back
	local
		.write_doc_meta(doc_meta("0xf7", 1))
		.await
		.expect("seed local");

	let (listener, mut rx) = ChannelListener::channel();
	let handle = store
		.snapshot(listener, ErrorSink::none())
		.await
		.expect("secondary snapshot");

	// the secondary snapshot saw the document but did not copy it
	let rows = delivered_rows(&mut rx, &Fingerprint::from("0xf7")).await;
	assert_eq!(rows.len(), 1);
	assert!(!cloud
		.contains(&Fingerprint::from("0xf7"))
		.await
		.expect("cloud contains"));

	handle.unsubscribe();
	store.stop().await.expect("stop");
}

// files: cloud-first writes and deletes, reads from local

#[tokio::test]
async fn file_operations_touch_both_tiers() {
	init_tracing();
	let (store, local, cloud) = federation();
	store.init(ErrorSink::none()).await.expect("init");

	let file_ref = FileRef::new("0xf8.bin");
	let written = store
		.write_file(
			FileBackend::Stash,
			file_ref.clone(),
			b"bytes".to_vec(),
			FileMeta::default(),
		)
		.await
		.expect("write file");
	assert_eq!(written.data, b"bytes".to_vec());

	assert!(local
		.contains_file(FileBackend::Stash, &file_ref)
		.await
		.expect("local file"));
	assert!(cloud
		.contains_file(FileBackend::Stash, &file_ref)
		.await
		.expect("cloud file"));

	store
		.delete_file(FileBackend::Stash, &file_ref)
		.await
		.expect("delete file");
	assert!(!local
		.contains_file(FileBackend::Stash, &file_ref)
		.await
		.expect("local file gone"));
	assert!(!cloud
		.contains_file(FileBackend::Stash, &file_ref)
		.await
		.expect("cloud file gone"));
}

#[tokio::test]
async fn stop_revokes_snapshots() {
	init_tracing();
	let (store, local, cloud) = federation();
	store.init(ErrorSink::none()).await.expect("init");

	assert_eq!(local.subscriber_count(), 1);
	assert_eq!(cloud.subscriber_count(), 1);

	store.stop().await.expect("stop");

	assert_eq!(local.subscriber_count(), 0);
	assert_eq!(cloud.subscriber_count(), 0);
}
