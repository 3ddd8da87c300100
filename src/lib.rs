//!
//! # Cloudmirror
//!
//! A cloud-aware document datastore that federates a *local* tier and a
//! *cloud* tier behind the single [`Datastore`] contract. Reads are served
//! locally for latency; writes fan out to both tiers with coordinated
//! acknowledgement; the first snapshot reconciles the two sides in both
//! directions, and from then on committed cloud changes are replicated into
//! the local mirror and surfaced to subscribers through the snapshot event
//! stream.
//!
//! ## Basic example
//!
//! ```no_run
//! use cloudmirror::{
//!     testing::MemoryDatastore, Datastore, ErrorSink, FederatedDatastore, Tier,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cloudmirror::DatastoreError> {
//!     let local = MemoryDatastore::new(Tier::Local);
//!     let cloud = MemoryDatastore::new(Tier::Cloud);
//!
//!     let store = FederatedDatastore::new(local, cloud);
//!     store.init(ErrorSink::none()).await?;
//!
//!     // reads hit the local mirror, writes reach both tiers
//!     store.stop().await
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod config;
pub mod datastore;
pub mod error;
pub mod events;
pub mod federated;
pub mod index;
pub mod mutation;
mod snapshot;
pub mod testing;
pub mod types;

pub use config::FederationConfig;
pub use datastore::{
	Datastore, DatastoreFile, DeleteResult, DocMetaRef, ErrorListener, ErrorSink, InitResult,
	NoopListener, SnapshotHandle, SnapshotListener,
};
pub use error::DatastoreError;
pub use events::{
	dedup::DedupListener,
	dispatcher::{EventDispatcher, EventListenerFn},
	Consistency, DocMetaMutation, DocMetaSnapshotEvent, FileSynchronizationEvent,
	SnapshotBatch, SynchronizationEvent,
};
pub use federated::FederatedDatastore;
pub use index::{ComparisonIndex, IndexEntry};
pub use mutation::{Completion, DatastoreMutation};
pub use types::{
	compare_revisions, DocInfo, DocMeta, DocMetaFileRef, FileBackend, FileMeta, FileRef,
	Fingerprint, MutationType, SyncDoc, SyncDocMap, Tier,
};
