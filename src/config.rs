use serde::{Deserialize, Serialize};

/// Tunables for a federated datastore instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
	/// How many snapshot events may queue between the snapshot sources and
	/// the replication worker before new events are dropped and reported to
	/// the error listener.
	pub replication_queue_capacity: usize,
}

impl Default for FederationConfig {
	fn default() -> Self {
		Self {
			replication_queue_capacity: 256,
		}
	}
}
