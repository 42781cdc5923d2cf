//! Digital signature types and data structures.
//!
//! Signing inputs ([`SigningIdentity`], [`SignOptions`], [`SignatureFieldSpec`])
//! and the signature dictionary facts reported by the verifier.

use super::certificate::{pem_blocks, Certificate};
use crate::error::{Error, Result};
use crate::object::Dictionary;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;

/// PDF name of the only signature format produced.
pub const SUB_FILTER: &str = "adbe.pkcs7.detached";

/// Signature handler name written to `/Filter`.
pub const FILTER: &str = "Adobe.PPKLite";

/// Field name used when the caller does not pick one.
pub const DEFAULT_FIELD_NAME: &str = "FooterSig";

/// Widget rectangle used when the caller does not pick one.
pub const DEFAULT_RECT: [f64; 4] = [50.0, 30.0, 550.0, 100.0];

/// CMS bytes beyond the certificates and the signature value.
const CMS_OVERHEAD: usize = 1024;

/// A private key and the certificate it belongs to.
#[derive(Clone)]
pub struct SigningIdentity {
    key: RsaPrivateKey,
    certificate: Certificate,
    chain: Vec<Certificate>,
}

impl SigningIdentity {
    /// Pair `key` with `certificate`, failing if they do not match.
    pub fn new(key: RsaPrivateKey, certificate: Certificate) -> Result<Self> {
        if key.to_public_key() != certificate.rsa_public_key()? {
            return Err(Error::Credentials(format!(
                "private key does not match certificate {}",
                certificate.subject()
            )));
        }
        Ok(Self {
            key,
            certificate,
            chain: Vec::new(),
        })
    }

    /// Load a PEM private key (PKCS#8 or PKCS#1) and a PEM certificate.
    ///
    /// The first certificate in `cert_pem` is the signer; any further ones
    /// are embedded as the chain.
    pub fn from_pem(key_pem: &[u8], cert_pem: &[u8]) -> Result<Self> {
        let key = parse_private_key(key_pem)?;
        let mut certs = Certificate::from_pem(cert_pem)?;
        let certificate = certs.remove(0);
        Ok(Self::new(key, certificate)?.with_chain(certs))
    }

    /// Extra certificates to embed in the signature.
    pub fn with_chain(mut self, chain: Vec<Certificate>) -> Self {
        self.chain = chain;
        self
    }

    /// Signer certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Embedded chain certificates.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    /// Conservative size in bytes of the encoded signature.
    pub fn estimated_signature_size(&self) -> usize {
        let certs: usize = std::iter::once(&self.certificate)
            .chain(&self.chain)
            .map(|c| c.der().len())
            .sum();
        certs + self.key.size() + CMS_OVERHEAD
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("certificate", &self.certificate)
            .field("private_key", &"[REDACTED]")
            .field("chain", &format!("{} certificates", self.chain.len()))
            .finish()
    }
}

fn parse_private_key(pem: &[u8]) -> Result<RsaPrivateKey> {
    for block in pem_blocks(pem)? {
        match block.label.as_str() {
            "PRIVATE KEY" => {
                return RsaPrivateKey::from_pkcs8_der(&block.contents)
                    .map_err(|e| Error::Credentials(format!("invalid PKCS#8 key: {}", e)));
            },
            "RSA PRIVATE KEY" => {
                return RsaPrivateKey::from_pkcs1_der(&block.contents)
                    .map_err(|e| Error::Credentials(format!("invalid PKCS#1 key: {}", e)));
            },
            "ENCRYPTED PRIVATE KEY" => {
                return Err(Error::Unsupported("encrypted private keys".to_string()));
            },
            _ => {},
        }
    }
    Err(Error::Credentials("no private key block in PEM input".to_string()))
}

/// Options for signing a PDF.
#[derive(Debug, Clone, Default)]
pub struct SignOptions {
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Name of the signer (if different from certificate CN)
    pub signer_name: Option<String>,
    /// Signing time; now when unset
    pub signing_time: Option<DateTime<Utc>>,
    /// Reserved signature size in bytes; estimated from the identity when unset
    pub estimated_size: Option<usize>,
}

impl SignOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set contact information.
    pub fn with_contact_info(mut self, contact_info: impl Into<String>) -> Self {
        self.contact_info = Some(contact_info.into());
        self
    }

    /// Set the signer name.
    pub fn with_signer_name(mut self, name: impl Into<String>) -> Self {
        self.signer_name = Some(name.into());
        self
    }

    /// Fix the signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }

    /// Override the reserved signature size.
    pub fn with_estimated_size(mut self, bytes: usize) -> Self {
        self.estimated_size = Some(bytes);
        self
    }
}

/// Where the signature field goes.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureFieldSpec {
    /// Fully qualified field name (`/T`)
    pub name: String,
    /// Page index (0-based)
    pub page_index: usize,
    /// Widget rectangle `[x1 y1 x2 y2]`
    pub rect: [f64; 4],
}

impl SignatureFieldSpec {
    /// Field `name` on page `page_index` covering `rect`.
    pub fn new(name: impl Into<String>, page_index: usize, rect: [f64; 4]) -> Self {
        Self {
            name: name.into(),
            page_index,
            rect,
        }
    }

    /// Default footer field on `page_index`.
    pub fn footer(page_index: usize) -> Self {
        Self::new(DEFAULT_FIELD_NAME, page_index, DEFAULT_RECT)
    }
}

/// Descriptive entries of a signature dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SignatureInfo {
    /// Field name (`/T` of the field whose `/V` is this signature)
    pub field_name: Option<String>,
    /// Name of the signer
    pub signer_name: Option<String>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// `/M` signing time
    pub signing_time: Option<DateTime<Utc>>,
    /// `/SubFilter` name
    pub sub_filter: Option<String>,
}

impl SignatureInfo {
    /// Read the descriptive entries of a signature dictionary.
    pub fn from_dict(dict: &Dictionary) -> Self {
        let text = |key: &str| dict.get(key).and_then(|v| v.as_text());
        Self {
            field_name: None,
            signer_name: text("Name"),
            reason: text("Reason"),
            location: text("Location"),
            contact_info: text("ContactInfo"),
            signing_time: text("M").and_then(|m| parse_pdf_date(&m)),
            sub_filter: dict
                .get("SubFilter")
                .and_then(|v| v.as_name())
                .map(str::to_string),
        }
    }
}

/// Format a time as a PDF date string (`D:YYYYMMDDHHmmSS+00'00'`).
pub fn format_pdf_date(time: DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

/// Parse a PDF date string. Missing trailing fields default to their
/// minimum; a missing offset means UTC.
pub fn parse_pdf_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let text = text.strip_prefix("D:").unwrap_or(text);
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    let field = |start: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + 2) {
            Some(s) => s.parse().ok(),
            None => Some(default),
        }
    };
    let year: i32 = digits[..4].parse().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, field(4, 1)?, field(6, 1)?)?.and_hms_opt(
        field(8, 0)?,
        field(10, 0)?,
        field(12, 0)?,
    )?;

    let rest = &text[digits.len()..];
    let offset_secs = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let tz: String = rest[1..].chars().filter(|c| c.is_ascii_digit()).collect();
            let hours: i32 = tz.get(..2).and_then(|s| s.parse().ok()).unwrap_or(0);
            let minutes: i32 = tz.get(2..4).and_then(|s| s.parse().ok()).unwrap_or(0);
            let secs = hours * 3600 + minutes * 60;
            if sign == '-' {
                -secs
            } else {
                secs
            }
        },
        _ => 0,
    };
    let offset = FixedOffset::east_opt(offset_secs)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

/// Verification status of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Digest matches, chain trusted, nothing appended after signing
    Valid,
    /// Valid, but revocation is unknown or form filling/annotations followed
    ValidWithWarnings,
    /// Digest mismatch, untrusted chain, or other changes after signing
    Invalid,
}

impl VerificationStatus {
    /// Check if the status indicates a valid signature.
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationStatus::Valid)
    }

    /// Check if the status indicates any form of validity (including warnings).
    pub fn is_ok(&self) -> bool {
        matches!(self, VerificationStatus::Valid | VerificationStatus::ValidWithWarnings)
    }

    /// Process exit code: 0, 1 or 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            VerificationStatus::Valid => 0,
            VerificationStatus::ValidWithWarnings => 1,
            VerificationStatus::Invalid => 2,
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            VerificationStatus::Valid => "VALID",
            VerificationStatus::ValidWithWarnings => "VALID_WITH_WARNINGS",
            VerificationStatus::Invalid => "INVALID",
        })
    }
}
