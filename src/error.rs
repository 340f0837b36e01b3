//! Error and warning types for the library.
//!
//! Every fallible operation returns [`Result`]. Recoveries that the default
//! (lenient) mode applies silently are recorded as [`Warning`]s on the
//! document; strict mode promotes each of them to the matching [`Error`]
//! variant at the point of recovery.

use crate::object::ObjectRef;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading, resolving, or writing a document.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No `%PDF-x.y` header within the first 1024 bytes
    #[error("no PDF header found in the first 1024 bytes")]
    MalformedHeader,

    /// A required token could not be recognized
    #[error("malformed token at byte {offset}: expected {expected}")]
    MalformedToken {
        /// Byte offset of the unrecognized input
        offset: usize,
        /// What the tokenizer was looking for
        expected: &'static str,
    },

    /// Dictionary syntax error (missing value, non-name key, unterminated)
    #[error("malformed dictionary at byte {offset}: {reason}")]
    MalformedDictionary {
        /// Byte offset where the dictionary broke
        offset: usize,
        /// What went wrong
        reason: String,
    },

    /// Stream syntax error (bad Length, missing endstream, bad EOL)
    #[error("malformed stream at byte {offset}: {reason}")]
    MalformedStream {
        /// Byte offset of the stream keyword or payload
        offset: usize,
        /// What went wrong
        reason: String,
    },

    /// Cross-reference table or stream could not be parsed
    #[error("malformed xref at byte {offset}: {reason}")]
    MalformedXref {
        /// Byte offset of the offending section
        offset: u64,
        /// What went wrong
        reason: String,
    },

    /// Reference has no entry in the effective xref
    #[error("object not found: {0}")]
    UnknownObject(ObjectRef),

    /// The `N G obj` header at an xref offset names a different object
    #[error("wrong object header at byte {offset}: expected {expected}, found {found}")]
    WrongObjectHeader {
        /// Byte offset of the header
        offset: u64,
        /// Reference the xref promised
        expected: ObjectRef,
        /// Reference actually present
        found: ObjectRef,
    },

    /// Resolution re-entered itself through a stream Length or object stream
    #[error("circular reference through {0}")]
    CircularReference(ObjectRef),

    /// A stream filter failed on its input
    #[error("filter {filter} failed: {reason}")]
    Filter {
        /// Filter name as written in the stream dictionary
        filter: String,
        /// What went wrong
        reason: String,
    },

    /// Filter name not present in the registry
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// The document is encrypted and no password has been applied yet
    #[error("document is encrypted; apply a password first")]
    EncryptionRequired,

    /// Password authentication failed
    #[error("password does not match the document")]
    BadPassword,

    /// Encryption scheme outside revisions 2-4 of the standard handler
    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    /// Decryption was requested but no crypt provider is attached
    #[error("no crypt provider attached to the document")]
    CryptProviderMissing,

    /// Output could not be produced
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Category of a recovery warning. Mirrors the error taxonomy so that strict
/// mode can map a warning to its error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Header anomalies (leading junk, odd version digits)
    MalformedHeader,
    /// Token-level anomalies the lexer skipped over
    MalformedToken,
    /// Dictionary anomalies (duplicate keys)
    MalformedDictionary,
    /// Stream anomalies (Length mismatch, endstream scan)
    MalformedStream,
    /// Xref anomalies (bad startxref, short entry lines, rebuild)
    MalformedXref,
    /// Filter anomalies recovered with partial output
    FilterError,
}

/// A recovery applied while reading a document in lenient mode.
#[derive(Debug, Clone)]
pub struct Warning {
    /// Byte offset the recovery applies to
    pub offset: u64,
    /// Category of the recovery
    pub kind: WarningKind,
    /// Human-readable description
    pub detail: String,
}

impl Warning {
    pub(crate) fn new(offset: u64, kind: WarningKind, detail: impl Into<String>) -> Self {
        Self {
            offset,
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "recovery at byte {}: {}", self.offset, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_object_message() {
        let err = Error::UnknownObject(ObjectRef::new(10, 0));
        let msg = format!("{}", err);
        assert!(msg.contains("10 0 R"));
    }

    #[test]
    fn test_wrong_header_message() {
        let err = Error::WrongObjectHeader {
            offset: 42,
            expected: ObjectRef::new(3, 0),
            found: ObjectRef::new(7, 1),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 0 R"));
        assert!(msg.contains("7 1 R"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_filter_message() {
        let err = Error::Filter {
            filter: "ASCII85Decode".to_string(),
            reason: "invalid character".to_string(),
        };
        assert!(format!("{}", err).contains("ASCII85Decode"));
    }

    #[test]
    fn test_warning_display() {
        let w = Warning::new(128, WarningKind::MalformedXref, "startxref off by 10");
        assert!(format!("{}", w).contains("byte 128"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
