//! Error types for signing and verification.
//!
//! Structural and cryptographic failures during signing abort the operation.
//! During verification most of these are caught and folded into the
//! [`VerificationResult`](crate::signatures::VerificationResult) instead.

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while signing or verifying a PDF.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// ByteRange out of bounds, overlapping, or empty
    #[error("Malformed byte range: {0}")]
    MalformedRange(String),

    /// Requested page does not exist
    #[error("Invalid page index {index}: document has {count} page(s)")]
    InvalidPage {
        /// Requested zero-based page index
        index: usize,
        /// Number of pages in the document
        count: usize,
    },

    /// The new revision could not be written
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Encoded signature does not fit the reserved /Contents placeholder
    #[error("Signature placeholder overflow: need {needed} hex digits, reserved {available}")]
    PlaceholderOverflow {
        /// Hex digits required by the encoded signature
        needed: usize,
        /// Hex digits reserved in the placeholder
        available: usize,
    },

    /// CMS structure could not be decoded
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// Digest algorithm in the signature differs from the ByteRange digest
    #[error("Digest algorithm mismatch: expected {expected}, found {found}")]
    AlgorithmMismatch {
        /// Algorithm used for the ByteRange digest
        expected: String,
        /// Algorithm declared in the signature
        found: String,
    },

    /// No chain from the signer to a trust anchor
    #[error("Certificate chain could not be built: {0}")]
    ChainBuild(String),

    /// Revocation status could not be determined
    #[error("Revocation status unknown: {0}")]
    RevocationUnknown(String),

    /// Operation requires a non-empty document
    #[error("Document is empty")]
    EmptyDocument,

    /// Private key or certificate could not be loaded
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Signature primitive failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Referenced object not present in any revision
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Unsupported feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Circular reference detected in object graph
    #[error("Circular reference detected: object {0}")]
    CircularReference(crate::object::ObjectRef),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::MalformedSignature(err.to_string())
    }
}

impl From<rsa::Error> for Error {
    fn from(err: rsa::Error) -> Self {
        Error::Crypto(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_range_error() {
        let err = Error::MalformedRange("spans overlap".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("Malformed byte range"));
        assert!(msg.contains("spans overlap"));
    }

    #[test]
    fn test_invalid_page_error() {
        let err = Error::InvalidPage { index: 7, count: 3 };
        let msg = format!("{}", err);
        assert!(msg.contains("7"));
        assert!(msg.contains("3 page(s)"));
    }

    #[test]
    fn test_placeholder_overflow_error() {
        let err = Error::PlaceholderOverflow {
            needed: 9000,
            available: 8192,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("9000"));
        assert!(msg.contains("8192"));
    }

    #[test]
    fn test_algorithm_mismatch_error() {
        let err = Error::AlgorithmMismatch {
            expected: "SHA-256".to_string(),
            found: "1.3.14.3.2.26".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("SHA-256"));
        assert!(msg.contains("1.3.14.3.2.26"));
    }

    #[test]
    fn test_object_not_found_error() {
        let err = Error::ObjectNotFound(10, 0);
        assert!(format!("{}", err).contains("10 0 R"));
    }

    #[test]
    fn test_der_error_becomes_malformed_signature() {
        let err: Error = der::Error::from(der::ErrorKind::Failed).into();
        assert!(matches!(err, Error::MalformedSignature(_)));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
