//! Mutation progress signals and the two-sided write coordinator.
//!
//! Every write exposes two stages, `written` and `committed`, each a
//! settle-once cell that any number of parties can await. A federated write
//! runs against both tiers at once; the coordinator folds the four per-side
//! stage signals back into the single pair the caller holds.

use std::{fmt, future::Future, sync::Arc};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::DatastoreError;

/// Settle-once, await-many completion cell.
#[derive(Clone)]
pub struct Completion {
	tx: Arc<watch::Sender<Option<Result<(), DatastoreError>>>>,
}

impl Completion {
	pub fn new() -> Self {
		Self {
			tx: Arc::new(watch::Sender::new(None)),
		}
	}

	/// Settle with success. A no-op if already settled.
	pub fn resolve(&self) {
		self.settle(Ok(()));
	}

	/// Settle with a failure. A no-op if already settled.
	pub fn reject(&self, error: DatastoreError) {
		self.settle(Err(error));
	}

	/// First settle wins; later calls are ignored.
	pub fn settle(&self, result: Result<(), DatastoreError>) {
		self.tx.send_if_modified(|state| {
			if state.is_some() {
				return false;
			}
			*state = Some(result.clone());
			true
		});
	}

	/// Wait until the cell settles and return its outcome.
	pub async fn wait(&self) -> Result<(), DatastoreError> {
		let mut rx = self.tx.subscribe();

		let result = match rx.wait_for(Option::is_some).await {
			Ok(state) => state.clone().unwrap_or(Ok(())),
			// unreachable while `self` holds the sender, kept for safety
			Err(_) => Err(DatastoreError::Other("completion signal dropped".into())),
		};
		result
	}

	pub fn is_settled(&self) -> bool {
		self.tx.borrow().is_some()
	}
}

impl Default for Completion {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for Completion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Completion")
			.field("settled", &self.is_settled())
			.finish()
	}
}

/// Progress handle of one write or delete.
///
/// `written` settles no later than `committed`.
#[derive(Debug, Clone, Default)]
pub struct DatastoreMutation {
	pub written: Completion,
	pub committed: Completion,
}

impl DatastoreMutation {
	pub fn new() -> Self {
		Self::default()
	}
}

/// Drive one tier's call and settle any stage it left unresolved from the
/// call's own result, so waiters can never hang on a tier that errored (or
/// returned) before signalling.
pub(crate) async fn run_settling<T, F>(
	mutation: &DatastoreMutation,
	fut: F,
) -> Result<T, DatastoreError>
where
	F: Future<Output = Result<T, DatastoreError>>,
{
	match fut.await {
		Ok(value) => {
			mutation.written.resolve();
			mutation.committed.resolve();
			Ok(value)
		}
		Err(error) => {
			mutation.written.reject(error.clone());
			mutation.committed.reject(error.clone());
			Err(error)
		}
	}
}

/// Hook run after both sides' `committed` stages settle and before the user
/// `committed` signal does, so its effect is visible to anyone awaiting it.
pub(crate) type CommittedHook = Box<dyn FnOnce(&Result<(), DatastoreError>) + Send>;

/// Wire a batched two-sided write: the user `written` signal settles once
/// both side `written` stages have, `committed` likewise. A failing side
/// rejects the user signal with its failure; the other side still runs to
/// completion and its outcome is logged.
pub(crate) fn coordinate_batched(
	user: &DatastoreMutation,
	cloud: &DatastoreMutation,
	local: &DatastoreMutation,
	on_committed: Option<CommittedHook>,
) {
	let user = user.clone();
	let cloud = cloud.clone();
	let local = local.clone();

	tokio::spawn(async move {
		let (cloud_written, local_written) =
			tokio::join!(cloud.written.wait(), local.written.wait());
		user.written
			.settle(merge_stage("written", cloud_written, local_written));

		let (cloud_committed, local_committed) =
			tokio::join!(cloud.committed.wait(), local.committed.wait());
		let combined = merge_stage("committed", cloud_committed, local_committed);

		if let Some(hook) = on_committed {
			hook(&combined);
		}

		user.committed.settle(combined);
	});
}

fn merge_stage(
	stage: &str,
	cloud: Result<(), DatastoreError>,
	local: Result<(), DatastoreError>,
) -> Result<(), DatastoreError> {
	match (cloud, local) {
		(Ok(()), Ok(())) => Ok(()),
		(Err(cloud_err), Ok(())) => {
			debug!("local {stage} stage completed while cloud side failed");
			Err(cloud_err)
		}
		(Ok(()), Err(local_err)) => {
			debug!("cloud {stage} stage completed while local side failed");
			Err(local_err)
		}
		(Err(cloud_err), Err(local_err)) => {
			warn!("local {stage} stage also failed: {local_err}");
			Err(cloud_err)
		}
	}
}
