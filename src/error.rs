use crate::types::{Fingerprint, Tier};

/// Unified error type for the federated datastore.
///
/// The error is cheap to clone on purpose: a single tier failure has to fan
/// out to every waiter of a write's `written`/`committed` signals, so foreign
/// errors are captured as strings rather than held as sources.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatastoreError {
	#[error("failed to initialize {tier} datastore: {reason}")]
	Init { tier: Tier, reason: String },

	#[error("document not found <fingerprint='{0}'>")]
	DocNotFound(Fingerprint),

	#[error("write on {tier} datastore failed <fingerprint='{fingerprint}'>: {reason}")]
	WriteFailed {
		tier: Tier,
		fingerprint: Fingerprint,
		reason: String,
	},

	#[error("delete on {tier} datastore failed <fingerprint='{fingerprint}'>: {reason}")]
	DeleteFailed {
		tier: Tier,
		fingerprint: Fingerprint,
		reason: String,
	},

	#[error("file operation on {tier} datastore failed <name='{name}'>: {reason}")]
	FileOperation {
		tier: Tier,
		name: String,
		reason: String,
	},

	#[error("invalid document metadata <fingerprint='{fingerprint}'>: {reason}")]
	InvalidDocMeta {
		fingerprint: Fingerprint,
		reason: String,
	},

	#[error("snapshot source failed: {0}")]
	SnapshotSource(String),

	#[error("replication queue full <capacity={0}>, event dropped")]
	ReplicationQueueFull(usize),

	#[error("datastore is stopped")]
	Stopped,

	#[error("{0}")]
	Other(String),
}
