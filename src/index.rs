//! Comparison index: the in-memory record of the newest revision observed
//! per fingerprint, used to decide whether an incoming mutation is newer
//! than what the local side holds.

use std::{
	cmp::Ordering,
	collections::HashMap,
	sync::{Mutex, MutexGuard, PoisonError},
};

use uuid::Uuid;

use crate::types::{compare_revisions, DocInfo, Fingerprint};

/// Revision record kept per fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
	pub uuid: Option<Uuid>,
	pub nonce: i64,
}

/// Fingerprint → `{uuid, nonce}` map behind a single exclusive lock.
///
/// `put` overwrites unconditionally; callers that want newer-wins semantics
/// consult [`ComparisonIndex::is_newer`] first.
#[derive(Debug, Default)]
pub struct ComparisonIndex {
	entries: Mutex<HashMap<Fingerprint, IndexEntry>>,
}

impl ComparisonIndex {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, IndexEntry>> {
		self.entries.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn put(&self, doc_info: &DocInfo) {
		self.lock().insert(
			doc_info.fingerprint.clone(),
			IndexEntry {
				uuid: doc_info.uuid,
				nonce: doc_info.nonce,
			},
		);
	}

	pub fn remove(&self, fingerprint: &Fingerprint) {
		self.lock().remove(fingerprint);
	}

	pub fn get(&self, fingerprint: &Fingerprint) -> Option<IndexEntry> {
		self.lock().get(fingerprint).cloned()
	}

	pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
		self.lock().contains_key(fingerprint)
	}

	/// Whether `uuid` is strictly newer than the currently indexed revision
	/// for `fingerprint`. An unindexed fingerprint is always newer.
	pub fn is_newer(&self, fingerprint: &Fingerprint, uuid: Option<Uuid>) -> bool {
		match self.get(fingerprint) {
			None => true,
			Some(entry) => compare_revisions(uuid, entry.uuid) == Ordering::Greater,
		}
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}
}
