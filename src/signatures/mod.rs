//! PDF digital signatures.
//!
//! Creating and verifying detached PKCS#7 (`adbe.pkcs7.detached`)
//! signatures over incremental revisions.
//!
//! ## Signing
//!
//! [`PdfSigner`] appends a revision with a signature field and a signature
//! dictionary, then fills the reserved `/ByteRange` and `/Contents` slots in
//! place. The first `n` bytes of the output are the `n` input bytes.
//!
//! ## Verification
//!
//! [`SignatureVerifier`] recomputes the ByteRange digest, decodes the CMS
//! message, evaluates the signer's chain against the configured anchors and
//! classifies whatever was appended after the signed revision. Each of
//! these is reported separately in the [`VerificationResult`].
//!
//! ## Example
//!
//! ```ignore
//! use pdf_seal::signatures::{PdfSigner, SignOptions, SignatureFieldSpec, SignatureVerifier, SigningIdentity};
//!
//! let identity = SigningIdentity::from_pem(&key_pem, &cert_pem)?;
//! let signer = PdfSigner::new(identity.clone(), SignOptions::new().with_reason("Approved"));
//! let signed = signer.sign(&document, &SignatureFieldSpec::footer(0))?;
//!
//! let verifier = SignatureVerifier::new(vec![identity.certificate().clone()]);
//! assert!(verifier.verify(&signed).status.is_valid());
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - RFC 5652 - Cryptographic Message Syntax

mod byterange;
mod certificate;
mod container;
mod modification;
mod revocation;
mod signer;
mod tamper;
mod trust;
mod types;
mod verifier;

pub use byterange::{digest, ByteRange, DIGEST_ALGORITHM, DIGEST_LEN};
pub use certificate::{Certificate, CertificateSummary, Validity};
pub use container::SignedMessage;
pub use modification::{classify, ModificationLevel, ModificationReport};
pub use revocation::{query_with_timeout, FallbackOracle, RevocationList, RevocationOracle, RevocationStatus};
pub use signer::{sign, PdfSigner};
pub use tamper::{append_trailer, flip_byte, flip_byte_at, FLIP_INCREMENT};
pub use trust::{TrustEvaluator, TrustFailure, TrustVerdict};
pub use types::{
    format_pdf_date, parse_pdf_date, SignOptions, SignatureFieldSpec, SignatureInfo, SigningIdentity,
    VerificationStatus, DEFAULT_FIELD_NAME, DEFAULT_RECT, SUB_FILTER,
};
pub use verifier::{find_signatures, verify, SignatureLocation, SignatureVerifier, VerificationResult};
