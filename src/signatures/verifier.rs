//! PDF signature verification.
//!
//! Verification never fails: every problem found along the way (missing
//! ByteRange, undecodable `/Contents`, untrusted chain, trailing changes) is
//! recorded in the [`VerificationResult`] and reflected in its status.

use super::byterange::{digest, find_contents_span, ByteRange};
use super::certificate::{Certificate, CertificateSummary};
use super::container::SignedMessage;
use super::modification::{classify, ModificationLevel, ModificationReport};
use super::revocation::{RevocationOracle, RevocationStatus};
use super::trust::{TrustEvaluator, TrustVerdict};
use super::types::{SignatureInfo, VerificationStatus};
use crate::config::VerifyConfig;
use crate::error::{Error, Result};
use crate::object::ObjectRef;
use crate::parser::decode_hex;
use crate::structure::ObjectIndex;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::Write;
use std::ops::Range;
use std::sync::Arc;

/// A signature dictionary and where its parts sit in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureLocation {
    /// Signature dictionary object
    pub reference: ObjectRef,
    /// Offset of the dictionary's `N G obj` header
    pub offset: usize,
    /// `/ByteRange`, when present and well-formed
    pub byte_range: Option<ByteRange>,
    /// Span of the `/Contents` hex string, delimiters included
    pub contents_span: Option<Range<usize>>,
    /// Descriptive entries, with the field name filled in
    pub info: SignatureInfo,
}

/// Every signature dictionary in file order, earliest definition of each.
pub fn find_signatures(data: &[u8]) -> Result<Vec<SignatureLocation>> {
    if data.is_empty() {
        return Err(Error::EmptyDocument);
    }
    let index = ObjectIndex::build(data)?;

    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for entry in index.entries() {
        let Some(dict) = entry.object.as_dict() else {
            continue;
        };
        let is_signature = matches!(entry.object.dict_type(), Some("Sig") | Some("DocTimeStamp"))
            || (dict.contains_key("ByteRange") && dict.contains_key("Contents"));
        if !is_signature || !seen.insert(entry.reference.id) {
            continue;
        }

        let contents_span = match entry.container {
            None => find_contents_span(data, entry.offset..entry.end),
            Some(_) => None,
        };
        let mut info = SignatureInfo::from_dict(dict);
        info.field_name = field_name(&index, entry.reference);
        found.push(SignatureLocation {
            reference: entry.reference,
            offset: entry.offset,
            byte_range: dict.get("ByteRange").and_then(|r| ByteRange::from_object(r).ok()),
            contents_span,
            info,
        });
    }

    log::debug!("Found {} signature dictionar(y/ies)", found.len());
    Ok(found)
}

/// `/T` of the field whose `/V` is `signature`.
fn field_name(index: &ObjectIndex, signature: ObjectRef) -> Option<String> {
    index
        .entries()
        .iter()
        .filter_map(|e| e.object.as_dict())
        .find(|d| d.get("V").and_then(|v| v.as_reference()) == Some(signature))
        .and_then(|d| d.get("T"))
        .and_then(|t| t.as_text())
}

/// Result of signature verification.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct VerificationResult {
    /// Overall verdict
    pub status: VerificationStatus,
    /// A signature dictionary was found
    pub signature_present: bool,
    /// Signature dictionary object
    pub signature_ref: Option<ObjectRef>,
    /// Signed byte spans
    pub byte_range: Option<ByteRange>,
    /// The ByteRange reaches the end of the file
    pub covers_whole_file: bool,
    /// The recomputed ByteRange digest equals the signed message digest
    pub digest_matches: bool,
    /// The signature value verifies with the signer's key
    pub signature_valid: bool,
    /// Decoded signature
    #[serde(skip)]
    pub message: Option<SignedMessage>,
    /// Signer certificate
    pub signer: Option<CertificateSummary>,
    /// Signing time from the signature, else from `/M`
    pub signing_time: Option<DateTime<Utc>>,
    /// Chain evaluation
    pub trust: Option<TrustVerdict>,
    /// Revocation answer for the chain
    pub revocation: RevocationStatus,
    /// Changes after the signed revision
    pub modification: ModificationLevel,
    /// Details behind `modification`
    pub modification_report: Option<ModificationReport>,
    /// Signature dictionary entries
    pub info: Option<SignatureInfo>,
    /// Everything that lowered the verdict
    pub problems: Vec<String>,
}

impl VerificationResult {
    fn unsigned(problem: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Invalid,
            signature_present: false,
            signature_ref: None,
            byte_range: None,
            covers_whole_file: false,
            digest_matches: false,
            signature_valid: false,
            message: None,
            signer: None,
            signing_time: None,
            trust: None,
            revocation: RevocationStatus::NotChecked,
            modification: ModificationLevel::None,
            modification_report: None,
            info: None,
            problems: vec![problem.into()],
        }
    }

    /// The signer chains to an anchor and is valid at the validation time.
    pub fn chain_trusted(&self) -> bool {
        self.trust.as_ref().is_some_and(|t| t.chain_trusted)
    }

    fn derive_status(&self) -> VerificationStatus {
        if !self.signature_present
            || !self.digest_matches
            || !self.signature_valid
            || !self.chain_trusted()
            || self.revocation == RevocationStatus::Revoked
            || self.modification == ModificationLevel::Other
        {
            VerificationStatus::Invalid
        } else if self.revocation == RevocationStatus::Unknown
            || matches!(
                self.modification,
                ModificationLevel::FormFilling | ModificationLevel::Annotations
            )
        {
            VerificationStatus::ValidWithWarnings
        } else {
            VerificationStatus::Valid
        }
    }

    /// Write a human-readable report to `sink`.
    pub fn write_report(&self, sink: &mut dyn Write) -> Result<()> {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(sink, "Signature verification: {}", self.status)?;
        if !self.signature_present {
            writeln!(sink, "No signature present")?;
        }
        if let Some(reference) = self.signature_ref {
            let field = self
                .info
                .as_ref()
                .and_then(|i| i.field_name.as_deref())
                .unwrap_or("-");
            writeln!(sink, "Signature object: {} (field {})", reference, field)?;
        }
        if let Some(range) = &self.byte_range {
            writeln!(
                sink,
                "ByteRange: {} (covers whole file: {})",
                range,
                yes_no(self.covers_whole_file)
            )?;
        }
        if self.signature_present {
            writeln!(sink, "Digest match: {}", yes_no(self.digest_matches))?;
            writeln!(sink, "Signature value valid: {}", yes_no(self.signature_valid))?;
        }
        if let Some(signer) = &self.signer {
            writeln!(sink, "Signer: {}", signer.subject)?;
            writeln!(sink, "  Issuer: {}", signer.issuer)?;
            writeln!(sink, "  Serial: {}", signer.serial)?;
            writeln!(sink, "  Valid: {} to {}", signer.not_before, signer.not_after)?;
            writeln!(sink, "  SHA-1: {}", signer.sha1_fingerprint)?;
            writeln!(sink, "  SHA-256: {}", signer.sha256_fingerprint)?;
        }
        if let Some(time) = &self.signing_time {
            writeln!(sink, "Signing time (claimed): {}", time)?;
        }
        if let Some(info) = &self.info {
            for (label, value) in [
                ("Reason", &info.reason),
                ("Location", &info.location),
                ("Contact", &info.contact_info),
                ("Name", &info.signer_name),
            ] {
                if let Some(value) = value {
                    writeln!(sink, "{}: {}", label, value)?;
                }
            }
        }
        if let Some(trust) = &self.trust {
            writeln!(
                sink,
                "Chain: built {}, trusted {} ({} certificate(s), validated at {})",
                yes_no(trust.chain_built),
                yes_no(trust.chain_trusted),
                trust.chain.len(),
                trust.validated_at
            )?;
            if let Some(reason) = trust.reason {
                writeln!(sink, "  Reason: {}", reason)?;
            }
        }
        writeln!(sink, "Revocation: {}", self.revocation)?;
        match &self.modification_report {
            Some(report) => writeln!(
                sink,
                "Modification after signing: {} ({} trailing byte(s))",
                report.level, report.trailing_bytes
            )?,
            None => writeln!(sink, "Modification after signing: {}", self.modification)?,
        }
        if let Some(report) = &self.modification_report {
            for note in &report.notes {
                writeln!(sink, "  - {}", note)?;
            }
        }
        if !self.problems.is_empty() {
            writeln!(sink, "Problems:")?;
            for problem in &self.problems {
                writeln!(sink, "  - {}", problem)?;
            }
        }
        sink.flush()?;
        Ok(())
    }
}

/// PDF signature verifier.
#[derive(Debug)]
pub struct SignatureVerifier {
    evaluator: TrustEvaluator,
    config: VerifyConfig,
}

impl SignatureVerifier {
    /// Verifier trusting exactly `anchors`.
    pub fn new(anchors: Vec<Certificate>) -> Self {
        Self {
            evaluator: TrustEvaluator::new(anchors),
            config: VerifyConfig::default(),
        }
    }

    /// Check revocation with `oracle`.
    pub fn with_oracle(mut self, oracle: Arc<dyn RevocationOracle>) -> Self {
        self.evaluator = self.evaluator.with_oracle(oracle);
        self
    }

    /// Use `config` for validation time, chain depth and revocation.
    pub fn with_config(mut self, config: VerifyConfig) -> Self {
        self.evaluator = self.evaluator.with_config(config.clone());
        self.config = config;
        self
    }

    /// Verify the first signature in `data`.
    pub fn verify(&self, data: &[u8]) -> VerificationResult {
        match find_signatures(data) {
            Ok(signatures) => match signatures.first() {
                Some(location) => self.verify_location(data, location),
                None => VerificationResult::unsigned("no signature dictionary found"),
            },
            Err(e) => VerificationResult::unsigned(e.to_string()),
        }
    }

    /// Verify every signature in `data`, in file order. Empty when the
    /// document has no signature.
    pub fn verify_all(&self, data: &[u8]) -> Vec<VerificationResult> {
        match find_signatures(data) {
            Ok(signatures) => signatures
                .iter()
                .map(|location| self.verify_location(data, location))
                .collect(),
            Err(e) => {
                log::warn!("Cannot enumerate signatures: {}", e);
                Vec::new()
            },
        }
    }

    /// Verify the first signature and write its report to `sink`.
    pub fn verify_with_report(&self, data: &[u8], sink: &mut dyn Write) -> Result<VerificationResult> {
        let result = self.verify(data);
        result.write_report(sink)?;
        Ok(result)
    }

    fn verify_location(&self, data: &[u8], location: &SignatureLocation) -> VerificationResult {
        let mut result = VerificationResult::unsigned("");
        result.problems.clear();
        result.signature_present = true;
        result.signature_ref = Some(location.reference);
        result.info = Some(location.info.clone());
        result.signing_time = location.info.signing_time;

        if let Err(e) = self.check_signature(data, location, &mut result) {
            log::info!("Signature {} rejected: {}", location.reference, e);
            result.problems.push(e.to_string());
        }
        result.status = result.derive_status();
        log::info!("Signature {} verified: {}", location.reference, result.status);
        result
    }

    /// Fill `result`; an error stops the checks that depend on it.
    fn check_signature(&self, data: &[u8], location: &SignatureLocation, result: &mut VerificationResult) -> Result<()> {
        let range = location
            .byte_range
            .ok_or_else(|| Error::MalformedRange("missing or malformed /ByteRange".to_string()))?;
        range.validate(data.len())?;
        result.byte_range = Some(range);
        result.covers_whole_file = range.offset1 == 0 && range.end() == data.len();

        let span = location
            .contents_span
            .clone()
            .ok_or_else(|| Error::MalformedSignature("/Contents hex string not found".to_string()))?;
        let contents = decode_hex(&data[span.start + 1..span.end - 1])?;

        match classify(data, &range) {
            Ok(report) => {
                result.modification = report.level;
                result.modification_report = Some(report);
            },
            Err(e) => {
                result.modification = ModificationLevel::Other;
                result.problems.push(format!("cannot classify trailing bytes: {}", e));
            },
        }

        let message = SignedMessage::parse(&contents)?;
        let computed = digest(data, &range)?;
        result.digest_matches = span == range.excluded() && message.digest_matches(&computed);
        if span != range.excluded() {
            result
                .problems
                .push("ByteRange does not exclude exactly the /Contents value".to_string());
        } else if !result.digest_matches {
            result.problems.push("digest mismatch: signed bytes were modified".to_string());
        }
        result.signature_valid = message.verify_signature(&computed)?;
        if !result.signature_valid {
            result.problems.push("signature value does not verify".to_string());
        }

        result.signer = Some(message.signer().summary().clone());
        result.signing_time = message.signing_time().or(result.signing_time);
        let at = self.config.validation_time.unwrap_or_else(Utc::now);
        let verdict = self.evaluator.evaluate(message.signer(), &message.intermediates(), at);
        if let Some(detail) = &verdict.detail {
            result.problems.push(detail.clone());
        }
        if verdict.revocation_status == RevocationStatus::Unknown {
            result.problems.push("revocation status unknown".to_string());
        }
        result.revocation = verdict.revocation_status;
        result.trust = Some(verdict);
        result.message = Some(message);

        if result.modification > ModificationLevel::None {
            result
                .problems
                .push(format!("document changed after signing ({})", result.modification));
        }
        Ok(())
    }
}

/// Verify the first signature against `anchors` with default settings.
pub fn verify(data: &[u8], anchors: &[Certificate]) -> VerificationResult {
    SignatureVerifier::new(anchors.to_vec()).verify(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::signer::PdfSigner;
    use crate::signatures::trust::TrustFailure;
    use crate::signatures::types::{SignOptions, SignatureFieldSpec, SigningIdentity};
    use chrono::TimeZone;

    const KEY: &[u8] = include_bytes!("../../tests/fixtures/selfsigned-key.pem");
    const CERT: &[u8] = include_bytes!("../../tests/fixtures/selfsigned-cert.pem");
    const EXPIRED_KEY: &[u8] = include_bytes!("../../tests/fixtures/expired-key.pem");
    const EXPIRED_CERT: &[u8] = include_bytes!("../../tests/fixtures/expired-cert.pem");

    const DOC: &[u8] = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\n\
trailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n0\n%%EOF\n";

    fn signed() -> (Vec<u8>, Certificate) {
        let identity = SigningIdentity::from_pem(KEY, CERT).unwrap();
        let cert = identity.certificate().clone();
        let time = cert.summary().not_before + chrono::Duration::days(1);
        let signer = PdfSigner::new(identity, SignOptions::new().with_location("Lab").with_signing_time(time));
        (signer.sign(DOC, &SignatureFieldSpec::footer(0)).unwrap(), cert)
    }

    #[test]
    fn test_find_signatures() {
        let (data, _) = signed();
        let found = find_signatures(&data).unwrap();
        assert_eq!(found.len(), 1);
        let location = &found[0];
        assert_eq!(location.info.field_name.as_deref(), Some("FooterSig"));
        assert_eq!(location.info.location.as_deref(), Some("Lab"));
        assert_eq!(location.contents_span.clone(), location.byte_range.map(|r| r.excluded()));
        assert!(find_signatures(DOC).unwrap().is_empty());
        assert!(matches!(find_signatures(b""), Err(Error::EmptyDocument)));
    }

    #[test]
    fn test_verify_trusted() {
        let (data, cert) = signed();
        let result = verify(&data, &[cert]);
        assert_eq!(result.status, VerificationStatus::Valid, "{:?}", result.problems);
        assert!(result.digest_matches);
        assert!(result.signature_valid);
        assert!(result.chain_trusted());
        assert!(result.covers_whole_file);
        assert_eq!(result.revocation, RevocationStatus::NotChecked);
        assert_eq!(result.modification, ModificationLevel::None);
        assert!(result.problems.is_empty());
    }

    #[test]
    fn test_verify_unsigned() {
        let result = verify(DOC, &[]);
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert!(!result.signature_present);
        assert!(SignatureVerifier::new(Vec::new()).verify_all(DOC).is_empty());
    }

    #[test]
    fn test_verify_without_anchor() {
        let (data, _) = signed();
        let result = verify(&data, &[]);
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert!(result.digest_matches);
        assert!(!result.chain_trusted());
    }

    #[test]
    fn test_corrupt_contents() {
        let (mut data, cert) = signed();
        let range = find_signatures(&data).unwrap()[0].byte_range.unwrap();
        // first hex digit of the DER SEQUENCE tag
        data[range.length1 + 1] = b'F';
        let result = verify(&data, &[cert]);
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert!(result.signature_present);
        assert!(result.message.is_none());
        assert!(!result.problems.is_empty());
    }

    #[test]
    fn test_validation_time_override() {
        let (data, cert) = signed();
        let late = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        let verifier = SignatureVerifier::new(vec![cert]).with_config(VerifyConfig::new().with_validation_time(late));
        let result = verifier.verify(&data);
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert!(result.digest_matches);
        assert_eq!(result.trust.unwrap().validated_at, late);
    }

    #[test]
    fn test_backdated_signature_with_expired_certificate() {
        let identity = SigningIdentity::from_pem(EXPIRED_KEY, EXPIRED_CERT).unwrap();
        let cert = identity.certificate().clone();
        let claimed = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        let signed = PdfSigner::new(identity, SignOptions::new().with_signing_time(claimed))
            .sign(DOC, &SignatureFieldSpec::footer(0))
            .unwrap();

        let result = verify(&signed, &[cert.clone()]);
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert!(result.digest_matches);
        assert!(result.signature_valid);
        assert_eq!(result.signing_time, Some(claimed));
        let trust = result.trust.unwrap();
        assert_eq!(trust.reason, Some(TrustFailure::Expired));
        assert!(trust.validated_at > cert.summary().not_after);

        // Validating at a chosen time is an explicit opt-in
        let verifier = SignatureVerifier::new(vec![cert]).with_config(VerifyConfig::new().with_validation_time(claimed));
        assert_eq!(verifier.verify(&signed).status, VerificationStatus::Valid);
    }

    #[test]
    fn test_report() {
        let (data, cert) = signed();
        let mut sink = Vec::new();
        let result = SignatureVerifier::new(vec![cert])
            .verify_with_report(&data, &mut sink)
            .unwrap();
        let report = String::from_utf8(sink).unwrap();
        assert!(report.starts_with("Signature verification: VALID\n"));
        assert!(report.contains("Self Signed Signer"));
        assert!(report.contains("Location: Lab"));
        assert!(report.contains("Modification after signing: NONE"));
        assert_eq!(result.status, VerificationStatus::Valid);
    }
}
