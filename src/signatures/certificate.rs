//! X.509 certificates as seen by the signer and the trust evaluator.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::pem::Pem;
use x509_parser::parse_x509_certificate;

/// Printable facts about a certificate.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CertificateSummary {
    /// Subject distinguished name
    pub subject: String,
    /// Issuer distinguished name
    pub issuer: String,
    /// Serial number, colon-separated hex
    pub serial: String,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
    /// SHA-1 fingerprint of the DER encoding
    pub sha1_fingerprint: String,
    /// SHA-256 fingerprint of the DER encoding
    pub sha256_fingerprint: String,
}

/// Where a time falls relative to a certificate's validity period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// `not_before <= t <= not_after`
    Valid,
    /// `t > not_after`
    Expired,
    /// `t < not_before`
    NotYetValid,
}

/// An owned DER certificate with its summary pre-computed.
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
    serial: Vec<u8>,
    summary: CertificateSummary,
    constraints: IssuerConstraints,
}

/// What the basicConstraints and keyUsage extensions allow as an issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IssuerConstraints {
    ca: bool,
    path_len: Option<u32>,
    key_cert_sign: bool,
}

impl Certificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self> {
        let der = der.into();
        let (subject_raw, issuer_raw, serial, summary, constraints) = {
            let cert = parse(&der)?;
            let basic = cert
                .basic_constraints()
                .map_err(|e| Error::Credentials(format!("invalid basicConstraints: {}", e)))?;
            let key_usage = cert
                .key_usage()
                .map_err(|e| Error::Credentials(format!("invalid keyUsage: {}", e)))?;
            let constraints = IssuerConstraints {
                ca: basic.as_ref().is_some_and(|b| b.value.ca),
                path_len: basic.as_ref().and_then(|b| b.value.path_len_constraint),
                // No keyUsage extension means no restriction
                key_cert_sign: key_usage.map_or(true, |k| k.value.key_cert_sign()),
            };
            let not_before = to_datetime(cert.validity().not_before.timestamp())?;
            let not_after = to_datetime(cert.validity().not_after.timestamp())?;
            (
                cert.subject().as_raw().to_vec(),
                cert.issuer().as_raw().to_vec(),
                cert.tbs_certificate.raw_serial().to_vec(),
                CertificateSummary {
                    subject: cert.subject().to_string(),
                    issuer: cert.issuer().to_string(),
                    serial: cert.raw_serial_as_string(),
                    not_before,
                    not_after,
                    sha1_fingerprint: fingerprint(&sha1::Sha1::digest(&der)),
                    sha256_fingerprint: fingerprint(&Sha256::digest(&der)),
                },
                constraints,
            )
        };

        Ok(Self {
            der,
            subject_raw,
            issuer_raw,
            serial,
            summary,
            constraints,
        })
    }

    /// Every `CERTIFICATE` block in a PEM buffer, in order.
    pub fn from_pem(pem: &[u8]) -> Result<Vec<Self>> {
        let certs = pem_blocks(pem)?
            .into_iter()
            .filter(|block| block.label == "CERTIFICATE")
            .map(|block| Self::from_der(block.contents))
            .collect::<Result<Vec<_>>>()?;
        if certs.is_empty() {
            return Err(Error::Credentials("no CERTIFICATE block in PEM input".to_string()));
        }
        Ok(certs)
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject, issuer, validity and fingerprints.
    pub fn summary(&self) -> &CertificateSummary {
        &self.summary
    }

    /// Subject distinguished name.
    pub fn subject(&self) -> &str {
        &self.summary.subject
    }

    pub(crate) fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    pub(crate) fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Subject and issuer names are identical.
    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// `issuer`'s subject matches this certificate's issuer and its key
    /// verifies this certificate's signature.
    ///
    /// This is only the signature link; whether `issuer` may act as a CA is
    /// [`may_issue`](Self::may_issue).
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        if self.issuer_raw != issuer.subject_raw {
            return false;
        }
        match (parse(&self.der), parse(&issuer.der)) {
            (Ok(cert), Ok(issuer_cert)) => cert.verify_signature(Some(issuer_cert.public_key())).is_ok(),
            _ => false,
        }
    }

    /// Whether this certificate may sign a certificate that has
    /// `ca_below` CA certificates between it and the end entity.
    ///
    /// Requires basicConstraints `cA=TRUE`, `keyCertSign` when keyUsage is
    /// present, and a pathLenConstraint of at least `ca_below`.
    pub fn may_issue(&self, ca_below: usize) -> bool {
        let c = &self.constraints;
        c.ca && c.key_cert_sign && c.path_len.map_or(true, |max| ca_below <= max as usize)
    }

    /// Position of `at` relative to the validity period.
    pub fn validity_at(&self, at: DateTime<Utc>) -> Validity {
        if at < self.summary.not_before {
            Validity::NotYetValid
        } else if at > self.summary.not_after {
            Validity::Expired
        } else {
            Validity::Valid
        }
    }

    /// RSA public key from the SubjectPublicKeyInfo.
    pub fn rsa_public_key(&self) -> Result<RsaPublicKey> {
        let cert = parse(&self.der)?;
        RsaPublicKey::from_public_key_der(cert.public_key().raw)
            .map_err(|e| Error::Unsupported(format!("non-RSA signer key ({})", e)))
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.summary.subject)
            .field("serial", &self.summary.serial)
            .finish()
    }
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>> {
    parse_x509_certificate(der)
        .map(|(_, cert)| cert)
        .map_err(|e| Error::Credentials(format!("invalid certificate: {}", e)))
}

fn to_datetime(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| Error::Credentials(format!("certificate time {} out of range", timestamp)))
}

/// Decode all PEM blocks of a buffer.
pub(crate) fn pem_blocks(pem: &[u8]) -> Result<Vec<Pem>> {
    Pem::iter_from_buffer(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Credentials(format!("invalid PEM: {}", e)))
}

/// Colon-separated uppercase hex.
fn fingerprint(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
