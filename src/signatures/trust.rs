//! Certificate chain evaluation.
//!
//! Builds a chain from the signer to one of the configured anchors, checks
//! every link's validity period and, when an oracle is configured, asks it
//! about each certificate. Failures are reported in the [`TrustVerdict`];
//! evaluation itself never fails.

use super::certificate::{Certificate, CertificateSummary, Validity};
use super::revocation::{query_with_timeout, RevocationOracle, RevocationStatus};
use crate::config::VerifyConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Why a chain is not trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustFailure {
    /// No path from the signer to an anchor
    ChainNotBuilt,
    /// Only paths longer than the configured depth exist
    DepthExceeded,
    /// A certificate expired before the validation time
    Expired,
    /// A certificate was not yet valid at the validation time
    NotYetValid,
    /// A certificate was revoked
    Revoked,
}

impl std::fmt::Display for TrustFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TrustFailure::ChainNotBuilt => "CHAIN_NOT_BUILT",
            TrustFailure::DepthExceeded => "DEPTH_EXCEEDED",
            TrustFailure::Expired => "EXPIRED",
            TrustFailure::NotYetValid => "NOT_YET_VALID",
            TrustFailure::Revoked => "REVOKED",
        })
    }
}

/// Outcome of chain evaluation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TrustVerdict {
    /// A path to an anchor was found
    pub chain_built: bool,
    /// The path is valid at the validation time and nothing on it is revoked
    pub chain_trusted: bool,
    /// Aggregated revocation answer for the chain
    pub revocation_status: RevocationStatus,
    /// Signer first, anchor last
    pub chain: Vec<CertificateSummary>,
    /// First failed check
    pub reason: Option<TrustFailure>,
    /// Human-readable detail for `reason`
    pub detail: Option<String>,
    /// Time the chain was validated at
    pub validated_at: DateTime<Utc>,
}

/// Validates signer certificates against a fixed set of anchors.
pub struct TrustEvaluator {
    anchors: Vec<Certificate>,
    oracle: Option<Arc<dyn RevocationOracle>>,
    config: VerifyConfig,
}

impl TrustEvaluator {
    /// Trust exactly `anchors`. An empty list trusts nothing.
    pub fn new(anchors: Vec<Certificate>) -> Self {
        Self {
            anchors,
            oracle: None,
            config: VerifyConfig::default(),
        }
    }

    /// Query `oracle` for each certificate on the chain.
    pub fn with_oracle(mut self, oracle: Arc<dyn RevocationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Use `config` for depth, timeout and revocation settings.
    pub fn with_config(mut self, config: VerifyConfig) -> Self {
        self.config = config;
        self
    }

    /// Configured anchors.
    pub fn anchors(&self) -> &[Certificate] {
        &self.anchors
    }

    /// Evaluate `signer`, using `intermediates` to bridge to an anchor.
    pub fn evaluate(&self, signer: &Certificate, intermediates: &[Certificate], at: DateTime<Utc>) -> TrustVerdict {
        let mut verdict = TrustVerdict {
            chain_built: false,
            chain_trusted: false,
            revocation_status: RevocationStatus::NotChecked,
            chain: Vec::new(),
            reason: None,
            detail: None,
            validated_at: at,
        };

        let chain = match self.build_chain(signer, intermediates) {
            Ok(chain) => chain,
            Err((failure, e)) => {
                log::info!("No trusted chain for {}: {}", signer.subject(), e);
                verdict.reason = Some(failure);
                verdict.detail = Some(e.to_string());
                return verdict;
            },
        };
        verdict.chain_built = true;
        verdict.chain = chain.iter().map(|c| c.summary().clone()).collect();

        verdict.chain_trusted = true;
        for cert in &chain {
            let failure = match cert.validity_at(at) {
                Validity::Valid => continue,
                Validity::Expired => TrustFailure::Expired,
                Validity::NotYetValid => TrustFailure::NotYetValid,
            };
            verdict.chain_trusted = false;
            verdict.reason = Some(failure);
            verdict.detail = Some(format!("{} is {} at {}", cert.subject(), failure, at));
            break;
        }

        verdict.revocation_status = self.check_revocation(&chain, at);
        if verdict.revocation_status == RevocationStatus::Revoked {
            verdict.chain_trusted = false;
            if verdict.reason.is_none() {
                verdict.reason = Some(TrustFailure::Revoked);
                verdict.detail = Some("a certificate on the chain is revoked".to_string());
            }
        }

        log::info!(
            "Chain for {} built with {} certificate(s), trusted: {}, revocation: {}",
            signer.subject(),
            chain.len(),
            verdict.chain_trusted,
            verdict.revocation_status
        );
        verdict
    }

    /// Signer first, anchor last.
    fn build_chain(
        &self,
        signer: &Certificate,
        intermediates: &[Certificate],
    ) -> std::result::Result<Vec<Certificate>, (TrustFailure, Error)> {
        if self.anchors.contains(signer) {
            return Ok(vec![signer.clone()]);
        }

        let mut search = ChainSearch::new(&self.anchors, intermediates, self.config.max_chain_depth);
        let mut chain = vec![signer.clone()];
        if search.extend(&mut chain) {
            return Ok(chain);
        }
        if search.depth_hit {
            Err((
                TrustFailure::DepthExceeded,
                Error::ChainBuild(format!("no chain within {} issuer(s)", self.config.max_chain_depth)),
            ))
        } else {
            Err((
                TrustFailure::ChainNotBuilt,
                Error::ChainBuild(format!("no issuer path from {} to a trust anchor", signer.subject())),
            ))
        }
    }

    fn check_revocation(&self, chain: &[Certificate], at: DateTime<Utc>) -> RevocationStatus {
        let oracle = match (&self.oracle, self.config.check_revocation) {
            (Some(oracle), true) => oracle,
            _ => return RevocationStatus::NotChecked,
        };

        let mut statuses = Vec::with_capacity(chain.len());
        for (i, cert) in chain.iter().enumerate() {
            let issuer = chain.get(i + 1).unwrap_or(cert);
            if i + 1 == chain.len() && i > 0 {
                // anchors are trusted by configuration
                break;
            }
            statuses.push(self.query(oracle, cert, issuer, at));
        }
        RevocationStatus::aggregate(statuses)
    }

    fn query(
        &self,
        oracle: &Arc<dyn RevocationOracle>,
        cert: &Certificate,
        issuer: &Certificate,
        at: DateTime<Utc>,
    ) -> RevocationStatus {
        let answer: Result<RevocationStatus> =
            query_with_timeout(oracle.clone(), cert, issuer, at, self.config.revocation_timeout);
        match answer {
            Ok(status) => status,
            Err(e) => {
                log::warn!("Revocation status of {} unknown: {}", cert.subject(), e);
                RevocationStatus::Unknown
            },
        }
    }
}

/// Depth-first path search from a signer to an anchor.
struct ChainSearch<'a> {
    anchors: &'a [Certificate],
    pool: &'a [Certificate],
    max_depth: usize,
    /// Pool certificates, by DER and chain position, from which no anchor is reachable
    dead: HashSet<(Vec<u8>, usize)>,
    depth_hit: bool,
}

impl<'a> ChainSearch<'a> {
    fn new(anchors: &'a [Certificate], pool: &'a [Certificate], max_depth: usize) -> Self {
        Self {
            anchors,
            pool,
            max_depth,
            dead: HashSet::new(),
            depth_hit: false,
        }
    }

    /// `issuer` signed `current` and may act as a CA at position `chain.len()`.
    fn links(chain: &[Certificate], current: &Certificate, issuer: &Certificate) -> bool {
        // CA certificates between the issuer and the signer
        let ca_below = chain.len().saturating_sub(1);
        issuer.may_issue(ca_below) && current.is_issued_by(issuer)
    }

    fn extend(&mut self, chain: &mut Vec<Certificate>) -> bool {
        if chain.len() > self.max_depth {
            self.depth_hit = true;
            return false;
        }
        let Some(current) = chain.last().cloned() else {
            return false;
        };

        if let Some(anchor) = self.anchors.iter().find(|a| Self::links(chain, &current, a)) {
            chain.push(anchor.clone());
            return true;
        }
        let position = chain.len();
        for candidate in self.pool {
            let key = (candidate.der().to_vec(), position);
            if chain.contains(candidate) || self.dead.contains(&key) || !Self::links(chain, &current, candidate) {
                continue;
            }
            chain.push(candidate.clone());
            let depth_hit_before = std::mem::replace(&mut self.depth_hit, false);
            if self.extend(chain) {
                return true;
            }
            chain.pop();
            // A dead end reached without the depth cap stays dead
            if !self.depth_hit {
                self.dead.insert(key);
            }
            self.depth_hit |= depth_hit_before;
        }
        false
    }
}

impl std::fmt::Debug for TrustEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustEvaluator")
            .field("anchors", &self.anchors)
            .field("oracle", &self.oracle.is_some())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::revocation::RevocationList;
    use chrono::Duration;

    const ROOT: &[u8] = include_bytes!("../../tests/fixtures/root-cert.pem");
    const INTERMEDIATE: &[u8] = include_bytes!("../../tests/fixtures/intermediate-cert.pem");
    const SIGNER: &[u8] = include_bytes!("../../tests/fixtures/signer-cert.pem");
    const SELF_SIGNED: &[u8] = include_bytes!("../../tests/fixtures/selfsigned-cert.pem");
    const FORGED: &[u8] = include_bytes!("../../tests/fixtures/forged-cert.pem");
    const CONSTRAINED: &[u8] = include_bytes!("../../tests/fixtures/constrained-chain.pem");

    fn load(pem: &[u8]) -> Certificate {
        Certificate::from_pem(pem).unwrap().remove(0)
    }

    fn valid_time(cert: &Certificate) -> DateTime<Utc> {
        cert.summary().not_before + Duration::days(30)
    }

    #[test]
    fn test_chain_through_intermediate() {
        let signer = load(SIGNER);
        let evaluator = TrustEvaluator::new(vec![load(ROOT)]);
        let verdict = evaluator.evaluate(&signer, &[load(INTERMEDIATE)], valid_time(&signer));
        assert!(verdict.chain_built);
        assert!(verdict.chain_trusted);
        assert_eq!(verdict.chain.len(), 3);
        assert_eq!(verdict.revocation_status, RevocationStatus::NotChecked);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn test_missing_intermediate() {
        let signer = load(SIGNER);
        let verdict = TrustEvaluator::new(vec![load(ROOT)]).evaluate(&signer, &[], valid_time(&signer));
        assert!(!verdict.chain_built);
        assert!(!verdict.chain_trusted);
        assert_eq!(verdict.reason, Some(TrustFailure::ChainNotBuilt));
    }

    #[test]
    fn test_empty_anchor_list_trusts_nothing() {
        let cert = load(SELF_SIGNED);
        let verdict = TrustEvaluator::new(Vec::new()).evaluate(&cert, &[cert.clone()], valid_time(&cert));
        assert!(!verdict.chain_built);
        assert!(!verdict.chain_trusted);
    }

    #[test]
    fn test_self_signed_anchor() {
        let cert = load(SELF_SIGNED);
        let verdict = TrustEvaluator::new(vec![cert.clone()]).evaluate(&cert, &[], valid_time(&cert));
        assert!(verdict.chain_trusted);
        assert_eq!(verdict.chain.len(), 1);
    }

    #[test]
    fn test_depth_cap() {
        let signer = load(SIGNER);
        let evaluator = TrustEvaluator::new(vec![load(ROOT)])
            .with_config(VerifyConfig::new().with_max_chain_depth(1));
        let verdict = evaluator.evaluate(&signer, &[load(INTERMEDIATE)], valid_time(&signer));
        assert!(!verdict.chain_built);
        assert_eq!(verdict.reason, Some(TrustFailure::DepthExceeded));
    }

    #[test]
    fn test_end_entity_cannot_issue() {
        let signer = load(SIGNER);
        let forged = load(FORGED);
        // The forged certificate's signature verifies under the signer's key
        assert!(forged.is_issued_by(&signer));

        let evaluator = TrustEvaluator::new(vec![load(ROOT)]);
        let verdict = evaluator.evaluate(&forged, &[signer.clone(), load(INTERMEDIATE)], valid_time(&signer));
        assert!(!verdict.chain_built);
        assert!(!verdict.chain_trusted);
        assert_eq!(verdict.reason, Some(TrustFailure::ChainNotBuilt));

        // Nor as an anchor
        let verdict = TrustEvaluator::new(vec![signer.clone()]).evaluate(&forged, &[], valid_time(&signer));
        assert!(!verdict.chain_built);
    }

    #[test]
    fn test_path_length_and_key_usage() {
        let certs = Certificate::from_pem(CONSTRAINED).unwrap();
        let (root, path_len_zero, sub, too_deep, no_cert_sign, under_no_cert_sign) =
            (&certs[0], &certs[1], &certs[2], &certs[3], &certs[4], &certs[5]);
        let evaluator = TrustEvaluator::new(vec![root.clone()]);
        let at = valid_time(sub);

        // One CA below a pathLen 0 CA is allowed only for the signer itself
        let verdict = evaluator.evaluate(sub, &[path_len_zero.clone()], at);
        assert!(verdict.chain_trusted, "{:?}", verdict.detail);
        assert_eq!(verdict.chain.len(), 3);

        let verdict = evaluator.evaluate(too_deep, &[sub.clone(), path_len_zero.clone()], at);
        assert!(!verdict.chain_built);
        assert_eq!(verdict.reason, Some(TrustFailure::ChainNotBuilt));

        let verdict = evaluator.evaluate(under_no_cert_sign, &[no_cert_sign.clone()], at);
        assert!(!verdict.chain_built);
    }

    #[test]
    fn test_dead_ends_are_remembered() {
        let signer = load(SIGNER);
        let intermediate = load(INTERMEDIATE);
        let unrelated = vec![load(SELF_SIGNED)];
        let pool = [intermediate.clone()];

        // The intermediate leads nowhere without the root
        let mut search = ChainSearch::new(&unrelated, &pool, 10);
        assert!(!search.extend(&mut vec![signer.clone()]));
        assert!(search.dead.contains(&(intermediate.der().to_vec(), 1)));
        assert!(!search.dead.contains(&(intermediate.der().to_vec(), 2)));

        // A remembered dead end is not explored again
        let anchors = vec![load(ROOT)];
        let mut search = ChainSearch::new(&anchors, &pool, 10);
        search.dead.insert((intermediate.der().to_vec(), 1));
        assert!(!search.extend(&mut vec![signer.clone()]));

        let mut search = ChainSearch::new(&anchors, &pool, 10);
        let mut chain = vec![signer];
        assert!(search.extend(&mut chain));
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_expired_and_not_yet_valid() {
        let signer = load(SIGNER);
        let evaluator = TrustEvaluator::new(vec![load(ROOT)]);
        let late = signer.summary().not_after + Duration::days(1);
        let verdict = evaluator.evaluate(&signer, &[load(INTERMEDIATE)], late);
        assert!(verdict.chain_built);
        assert!(!verdict.chain_trusted);
        assert_eq!(verdict.reason, Some(TrustFailure::Expired));

        let early = signer.summary().not_before - Duration::days(1);
        let verdict = evaluator.evaluate(&signer, &[load(INTERMEDIATE)], early);
        assert_eq!(verdict.reason, Some(TrustFailure::NotYetValid));
    }

    #[test]
    fn test_revoked_signer() {
        let signer = load(SIGNER);
        let at = valid_time(&signer);
        let list = RevocationList::new().with_revoked(&signer, at - Duration::days(1));
        let evaluator = TrustEvaluator::new(vec![load(ROOT)]).with_oracle(Arc::new(list));
        let verdict = evaluator.evaluate(&signer, &[load(INTERMEDIATE)], at);
        assert!(verdict.chain_built);
        assert!(!verdict.chain_trusted);
        assert_eq!(verdict.revocation_status, RevocationStatus::Revoked);
        assert_eq!(verdict.reason, Some(TrustFailure::Revoked));
    }

    #[test]
    fn test_revocation_good_and_disabled() {
        let signer = load(SIGNER);
        let at = valid_time(&signer);
        let evaluator = TrustEvaluator::new(vec![load(ROOT)]).with_oracle(Arc::new(RevocationList::new()));
        let verdict = evaluator.evaluate(&signer, &[load(INTERMEDIATE)], at);
        assert_eq!(verdict.revocation_status, RevocationStatus::Good);
        assert!(verdict.chain_trusted);

        let evaluator = evaluator.with_config(VerifyConfig::new().with_revocation_check(false));
        let verdict = evaluator.evaluate(&signer, &[load(INTERMEDIATE)], at);
        assert_eq!(verdict.revocation_status, RevocationStatus::NotChecked);
    }
}
