//! Core data model shared by both tiers and the federation layer.

use std::{cmp::Ordering, collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatastoreError;

/// Stable cross-tier identity of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for Fingerprint {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for Fingerprint {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Which side of the federation an event, destination or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
	Local,
	Cloud,
}

impl fmt::Display for Tier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Local => f.write_str("local"),
			Self::Cloud => f.write_str("cloud"),
		}
	}
}

/// Storage backend a file belongs to on a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileBackend {
	Stash,
	Image,
}

impl fmt::Display for FileBackend {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Stash => f.write_str("stash"),
			Self::Image => f.write_str("image"),
		}
	}
}

/// Reference to a file held by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
	pub name: String,
}

impl FileRef {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into() }
	}
}

/// Ancillary file attributes carried alongside the bytes on write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
	pub content_type: Option<String>,
}

/// Compare two revision tokens.
///
/// Revisions form a total order; an absent revision sorts before any present
/// one, so a document that has never been versioned loses against any
/// versioned copy.
pub fn compare_revisions(a: Option<Uuid>, b: Option<Uuid>) -> Ordering {
	match (a, b) {
		(None, None) => Ordering::Equal,
		(None, Some(_)) => Ordering::Less,
		(Some(_), None) => Ordering::Greater,
		(Some(a), Some(b)) => a.cmp(&b),
	}
}

/// Identifies a document and its optional associated file, as needed by
/// delete operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMetaFileRef {
	pub fingerprint: Fingerprint,
	pub uuid: Option<Uuid>,
	pub doc_file: Option<FileRef>,
}

/// Small document header; everything a tier needs to identify and order a
/// revision without fetching the full metadata payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocInfo {
	pub fingerprint: Fingerprint,

	/// Revision token. Absent for documents that were never versioned.
	pub uuid: Option<Uuid>,

	/// Write counter used to distinguish rewrites of the same revision.
	pub nonce: i64,

	/// The file attached to this document, if any.
	pub doc_file: Option<FileRef>,
}

impl DocInfo {
	pub fn new(fingerprint: impl Into<Fingerprint>, uuid: Option<Uuid>) -> Self {
		Self {
			fingerprint: fingerprint.into(),
			uuid,
			nonce: 0,
			doc_file: None,
		}
	}

	/// Build the deletion reference for this document.
	pub fn file_ref(&self) -> DocMetaFileRef {
		DocMetaFileRef {
			fingerprint: self.fingerprint.clone(),
			uuid: self.uuid,
			doc_file: self.doc_file.clone(),
		}
	}
}

/// Full document metadata: the header plus an opaque payload.
///
/// The contract moves this around in serialized form (`get_doc_meta` returns
/// the JSON string); the federation layer only ever inspects the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMeta {
	pub doc_info: DocInfo,
	pub payload: serde_json::Value,
}

impl DocMeta {
	pub fn new(doc_info: DocInfo, payload: serde_json::Value) -> Self {
		Self { doc_info, payload }
	}

	pub fn fingerprint(&self) -> &Fingerprint {
		&self.doc_info.fingerprint
	}

	pub fn to_json(&self) -> Result<String, DatastoreError> {
		serde_json::to_string(self).map_err(|e| DatastoreError::InvalidDocMeta {
			fingerprint: self.doc_info.fingerprint.clone(),
			reason: e.to_string(),
		})
	}

	pub fn from_json(data: &str) -> Result<Self, DatastoreError> {
		serde_json::from_str(data).map_err(|e| DatastoreError::InvalidDocMeta {
			fingerprint: Fingerprint::new("?"),
			reason: e.to_string(),
		})
	}
}

/// Kind of change a mutation describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationType {
	Created,
	Updated,
	Deleted,
}

/// Compact snapshot row describing one document as of a given observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDoc {
	pub fingerprint: Fingerprint,
	pub uuid: Option<Uuid>,
	pub mutation_type: MutationType,
	pub file_ref: DocMetaFileRef,
}

/// Fingerprint-keyed collection of [`SyncDoc`] rows. Keys are unique,
/// insertion order is irrelevant.
pub type SyncDocMap = HashMap<Fingerprint, SyncDoc>;
