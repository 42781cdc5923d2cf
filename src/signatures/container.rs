//! Detached CMS `SignedData` carried in a signature's `/Contents`.
//!
//! The message signs a set of attributes (content type, signing time and the
//! ByteRange digest) with RSA PKCS#1 v1.5 over SHA-256 and embeds the signer
//! certificate plus any chain certificates.

use super::byterange::DIGEST_ALGORITHM;
use super::certificate::Certificate;
use super::types::SigningIdentity;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{GeneralizedTime, Null, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, Encode};
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::time::Time;

const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
const ID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const ID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const ID_SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// A parsed (or freshly built) detached signature.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedMessage {
    message_digest: Option<Vec<u8>>,
    signing_time: Option<DateTime<Utc>>,
    signer: Certificate,
    certificates: Vec<Certificate>,
    signature: Vec<u8>,
    signed_attrs_der: Option<Vec<u8>>,
    encoded: Vec<u8>,
}

impl SignedMessage {
    /// Sign `digest` with the identity's key.
    pub fn build(digest: &[u8], identity: &SigningIdentity, signing_time: DateTime<Utc>) -> Result<Self> {
        let signer_cert = x509_cert::Certificate::from_der(identity.certificate().der())?;

        let signed_attrs = SetOfVec::try_from(vec![
            attribute(ID_CONTENT_TYPE, Any::encode_from(&ID_DATA)?)?,
            attribute(ID_SIGNING_TIME, encode_time(signing_time)?)?,
            attribute(ID_MESSAGE_DIGEST, Any::encode_from(&OctetString::new(digest.to_vec())?)?)?,
        ])?;
        let hashed = Sha256::digest(signed_attrs.to_der()?);
        let signature = identity
            .private_key()
            .sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)?;

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: signer_cert.tbs_certificate.issuer.clone(),
                serial_number: signer_cert.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: sha256_algorithm(),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: ID_RSA_ENCRYPTION,
                parameters: Some(Any::encode_from(&Null)?),
            },
            signature: OctetString::new(signature)?,
            unsigned_attrs: None,
        };

        let mut certificates = vec![CertificateChoices::Certificate(signer_cert)];
        for cert in identity.chain() {
            if cert != identity.certificate() {
                certificates.push(CertificateChoices::Certificate(x509_cert::Certificate::from_der(
                    cert.der(),
                )?));
            }
        }

        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::try_from(vec![sha256_algorithm()])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ID_DATA,
                econtent: None,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(certificates)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
        };
        let content_info = ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        };

        let encoded = content_info.to_der()?;
        log::debug!("Built CMS SignedData of {} bytes", encoded.len());
        Self::parse(&encoded)
    }

    /// Decode a `/Contents` value. Zero padding after the DER structure is
    /// accepted; anything else is not.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let der = der_prefix(bytes)?;
        let content_info = ContentInfo::from_der(der)?;
        if content_info.content_type != ID_SIGNED_DATA {
            return Err(Error::MalformedSignature(format!(
                "content type {} is not signedData",
                content_info.content_type
            )));
        }
        let signed_data = SignedData::from_der(&content_info.content.to_der()?)?;
        let signer_info = signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| Error::MalformedSignature("no SignerInfo".to_string()))?;

        if signer_info.digest_alg.oid != ID_SHA256 {
            return Err(Error::AlgorithmMismatch {
                expected: DIGEST_ALGORITHM.to_string(),
                found: signer_info.digest_alg.oid.to_string(),
            });
        }
        let sig_oid = signer_info.signature_algorithm.oid;
        if sig_oid != ID_RSA_ENCRYPTION && sig_oid != ID_SHA256_WITH_RSA {
            return Err(Error::Unsupported(format!("signature algorithm {}", sig_oid)));
        }

        let mut certificates = Vec::new();
        if let Some(set) = &signed_data.certificates {
            for choice in set.0.iter() {
                if let CertificateChoices::Certificate(cert) = choice {
                    certificates.push(Certificate::from_der(cert.to_der()?)?);
                }
            }
        }
        let signer = find_signer(&signer_info.sid, &certificates)?
            .ok_or_else(|| Error::MalformedSignature("no signer certificate embedded".to_string()))?;

        let mut message_digest = None;
        let mut signing_time = None;
        let mut signed_attrs_der = None;
        if let Some(attrs) = &signer_info.signed_attrs {
            for attr in attrs.iter() {
                let Some(value) = attr.values.iter().next() else {
                    continue;
                };
                if attr.oid == ID_MESSAGE_DIGEST {
                    message_digest = Some(OctetString::from_der(&value.to_der()?)?.as_bytes().to_vec());
                } else if attr.oid == ID_SIGNING_TIME {
                    let time = Time::from_der(&value.to_der()?)?;
                    signing_time = DateTime::from_timestamp(time.to_unix_duration().as_secs() as i64, 0);
                }
            }
            if message_digest.is_none() {
                return Err(Error::MalformedSignature(
                    "signed attributes lack a message digest".to_string(),
                ));
            }
            signed_attrs_der = Some(attrs.to_der()?);
        }

        Ok(Self {
            message_digest,
            signing_time,
            signer,
            certificates,
            signature: signer_info.signature.as_bytes().to_vec(),
            signed_attrs_der,
            encoded: der.to_vec(),
        })
    }

    /// DER encoding, without padding.
    pub fn to_der(&self) -> &[u8] {
        &self.encoded
    }

    /// The message-digest attribute, if signed attributes are present.
    pub fn message_digest(&self) -> Option<&[u8]> {
        self.message_digest.as_deref()
    }

    /// The signing-time attribute.
    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        self.signing_time
    }

    /// Certificate whose key produced the signature.
    pub fn signer(&self) -> &Certificate {
        &self.signer
    }

    /// Every embedded certificate, signer included.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// Embedded certificates other than the signer's.
    pub fn intermediates(&self) -> Vec<Certificate> {
        self.certificates
            .iter()
            .filter(|c| **c != self.signer)
            .cloned()
            .collect()
    }

    /// Raw signature value.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Whether the message attests to `content_digest`.
    pub fn digest_matches(&self, content_digest: &[u8]) -> bool {
        match &self.message_digest {
            Some(md) => md.as_slice() == content_digest,
            // Without signed attributes the signature is over the digest itself
            None => self.verify_signature(content_digest).unwrap_or(false),
        }
    }

    /// Check the RSA signature with the signer's public key.
    pub fn verify_signature(&self, content_digest: &[u8]) -> Result<bool> {
        let public = self.signer.rsa_public_key()?;
        let hashed = match &self.signed_attrs_der {
            Some(attrs) => Sha256::digest(attrs).to_vec(),
            None => content_digest.to_vec(),
        };
        Ok(public
            .verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, &self.signature)
            .is_ok())
    }
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

fn sha256_algorithm() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: ID_SHA256,
        parameters: None,
    }
}

/// UTCTime up to 2049, GeneralizedTime after.
fn encode_time(time: DateTime<Utc>) -> Result<Any> {
    let secs = u64::try_from(time.timestamp())
        .map_err(|_| Error::Serialization(format!("signing time {} before 1970", time)))?;
    let duration = std::time::Duration::from_secs(secs);
    match UtcTime::from_unix_duration(duration) {
        Ok(utc) => Ok(Any::encode_from(&utc)?),
        Err(_) => Ok(Any::encode_from(&GeneralizedTime::from_unix_duration(duration)?)?),
    }
}

fn find_signer(sid: &SignerIdentifier, certificates: &[Certificate]) -> Result<Option<Certificate>> {
    if let SignerIdentifier::IssuerAndSerialNumber(isn) = sid {
        let issuer = isn.issuer.to_der()?;
        if let Some(cert) = certificates
            .iter()
            .find(|c| c.issuer_raw() == issuer.as_slice() && c.serial() == isn.serial_number.as_bytes())
        {
            return Ok(Some(cert.clone()));
        }
    }
    Ok(certificates.first().cloned())
}

/// The outer DER TLV of `bytes`, requiring only zeros after it.
fn der_prefix(bytes: &[u8]) -> Result<&[u8]> {
    let malformed = |msg: &str| Error::MalformedSignature(msg.to_string());
    if bytes.first() != Some(&0x30) {
        return Err(malformed("signature is not a DER SEQUENCE"));
    }
    let (length, header) = match bytes.get(1) {
        Some(&b) if b < 0x80 => (b as usize, 2),
        Some(&b) if (0x81..=0x84).contains(&b) => {
            let n = (b & 0x7f) as usize;
            let len_bytes = bytes
                .get(2..2 + n)
                .ok_or_else(|| malformed("truncated DER length"))?;
            let length = len_bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
            (length, 2 + n)
        },
        _ => return Err(malformed("unsupported DER length form")),
    };
    let total = header
        .checked_add(length)
        .filter(|&t| t <= bytes.len())
        .ok_or_else(|| malformed("DER length exceeds /Contents"))?;
    if bytes[total..].iter().any(|&b| b != 0) {
        return Err(malformed("non-zero bytes after the DER structure"));
    }
    Ok(&bytes[..total])
}
