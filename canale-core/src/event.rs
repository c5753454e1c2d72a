//! Change Stream Operation Taxonomy and Published Messages
//!
//! The bridge treats change events as opaque JSON; the only parts it reads are
//! the operation type and the cursor token. This module defines the operation
//! taxonomy and the triple that is handed to the sink for every publishable
//! event.
//!
//! # Examples
//!
//! ```rust
//! use canale_core::event::{ChangeMessage, OperationType};
//!
//! let op = OperationType::parse("update");
//! assert!(op.is_publishable());
//!
//! let msg = ChangeMessage::new(
//!     OperationType::Update.subject("ORDERS"),
//!     "8264BEB9F3000000012B0229296E04",
//!     br#"{"operationType":"update"}"#.to_vec(),
//! );
//! assert_eq!(msg.subject, "ORDERS.update");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// MongoDB change stream operation types.
///
/// Only insert, update, replace and delete are republished; `Invalidate` is a
/// terminal signal that the watched collection was dropped or renamed. The
/// `Unknown` variant preserves operation types from newer server versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum OperationType {
    /// Insert; republished on `<stream>.insert`
    Insert,

    /// In-place update; republished on `<stream>.update` with the
    /// looked-up post-image when the source provides one
    Update,

    /// Whole-document replacement; republished on `<stream>.replace`
    Replace,

    /// Deletion; republished on `<stream>.delete`, the payload carries only
    /// the document key (and the pre-image when capture is enabled)
    Delete,

    /// Terminal signal: the watched collection is gone and the stream will
    /// deliver nothing further; never republished
    Invalidate,

    /// Collection drop notification; skipped (the `Invalidate` that follows
    /// ends the watcher)
    Drop,

    /// Database drop notification; skipped
    #[serde(rename = "dropdatabase")]
    DropDatabase,

    /// Collection rename notification; skipped
    Rename,

    /// An operation type this crate does not know about; skipped, with the
    /// raw string kept for logging
    #[serde(untagged)]
    Unknown(String),
}

impl OperationType {
    /// Parses the `operationType` string of a raw change event.
    ///
    /// Unrecognised values are preserved as [`OperationType::Unknown`] so
    /// they can be logged and skipped rather than rejected.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "replace" => Self::Replace,
            "delete" => Self::Delete,
            "invalidate" => Self::Invalidate,
            "drop" => Self::Drop,
            "dropDatabase" => Self::DropDatabase,
            "rename" => Self::Rename,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns the operation as it appears in subjects and metric labels.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Invalidate => "invalidate",
            Self::Drop => "drop",
            Self::DropDatabase => "dropDatabase",
            Self::Rename => "rename",
            Self::Unknown(raw) => raw,
        }
    }

    /// Returns true if events of this operation are republished to the sink.
    #[inline]
    #[must_use]
    pub fn is_publishable(&self) -> bool {
        matches!(
            self,
            Self::Insert | Self::Update | Self::Replace | Self::Delete
        )
    }

    /// Returns true if this operation terminates the change stream.
    #[inline]
    #[must_use]
    pub fn is_invalidate(&self) -> bool {
        matches!(self, Self::Invalidate)
    }

    /// Builds the destination subject for this operation on `stream`.
    #[must_use]
    pub fn subject(&self, stream: &str) -> String {
        format!("{}.{}", stream, self.as_str())
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change event ready for publication.
///
/// The message id is the event's cursor token; a consumer that deduplicates
/// by message id will suppress the duplicates an at-least-once redelivery can
/// produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMessage {
    /// Destination subject, `<stream>.<operation>`
    pub subject: String,

    /// Message identifier, equal to the event's cursor token
    pub id: String,

    /// The whole change event in relaxed extended JSON
    pub payload: Vec<u8>,
}

impl ChangeMessage {
    /// Creates a new message from its parts.
    pub fn new(subject: impl Into<String>, id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            id: id.into(),
            payload,
        }
    }
}
