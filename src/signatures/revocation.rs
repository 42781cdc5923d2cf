//! Revocation oracles.
//!
//! The transport behind an oracle (OCSP responder, CRL distribution point)
//! is the caller's business; the evaluator only sees [`RevocationOracle`].
//! Queries run on a worker thread bounded by a timeout so an unreachable
//! responder degrades to [`RevocationStatus::Unknown`].

use super::certificate::Certificate;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Revocation state of a certificate (or an aggregated chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevocationStatus {
    /// Not revoked at the queried time
    Good,
    /// Revoked at or before the queried time
    Revoked,
    /// Oracle unreachable, timed out, or has no information
    Unknown,
    /// No oracle was configured
    NotChecked,
}

impl RevocationStatus {
    /// Combine per-certificate answers: any `Revoked` wins, then any `Unknown`.
    pub fn aggregate(statuses: impl IntoIterator<Item = RevocationStatus>) -> Self {
        let mut result = RevocationStatus::NotChecked;
        for status in statuses {
            result = match (result, status) {
                (RevocationStatus::Revoked, _) | (_, RevocationStatus::Revoked) => RevocationStatus::Revoked,
                (RevocationStatus::Unknown, _) | (_, RevocationStatus::Unknown) => RevocationStatus::Unknown,
                (_, RevocationStatus::Good) => RevocationStatus::Good,
                (current, RevocationStatus::NotChecked) => current,
            };
        }
        result
    }
}

impl std::fmt::Display for RevocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RevocationStatus::Good => "GOOD",
            RevocationStatus::Revoked => "REVOKED",
            RevocationStatus::Unknown => "UNKNOWN",
            RevocationStatus::NotChecked => "NOT_CHECKED",
        })
    }
}

/// Source of revocation answers.
pub trait RevocationOracle: Send + Sync {
    /// Status of `cert`, issued by `issuer`, at `at_time`.
    fn check(&self, cert: &Certificate, issuer: &Certificate, at_time: DateTime<Utc>) -> Result<RevocationStatus>;
}

/// Ask `oracle` about `cert`, waiting at most `timeout`.
///
/// A query that times out returns [`Error::RevocationUnknown`]; the worker
/// thread is left to finish on its own.
pub fn query_with_timeout(
    oracle: Arc<dyn RevocationOracle>,
    cert: &Certificate,
    issuer: &Certificate,
    at_time: DateTime<Utc>,
    timeout: Duration,
) -> Result<RevocationStatus> {
    let (tx, rx) = mpsc::channel();
    let cert_owned = cert.clone();
    let issuer_owned = issuer.clone();
    std::thread::Builder::new()
        .name("revocation-query".to_string())
        .spawn(move || {
            let _ = tx.send(oracle.check(&cert_owned, &issuer_owned, at_time));
        })?;

    match rx.recv_timeout(timeout) {
        Ok(answer) => answer,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::RevocationUnknown(format!(
            "no answer for {} within {:?}",
            cert.subject(),
            timeout
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::RevocationUnknown(format!(
            "revocation query for {} aborted",
            cert.subject()
        ))),
    }
}

#[derive(Debug, Clone)]
struct RevokedEntry {
    issuer: Vec<u8>,
    serial: Vec<u8>,
    revoked_at: DateTime<Utc>,
}

/// In-memory list of revoked certificates, CRL style.
#[derive(Debug, Clone, Default)]
pub struct RevocationList {
    entries: Vec<RevokedEntry>,
}

impl RevocationList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `cert` revoked from `at` onwards.
    pub fn revoke(&mut self, cert: &Certificate, at: DateTime<Utc>) {
        self.entries.push(RevokedEntry {
            issuer: cert.issuer_raw().to_vec(),
            serial: cert.serial().to_vec(),
            revoked_at: at,
        });
    }

    /// Builder form of [`revoke`](Self::revoke).
    pub fn with_revoked(mut self, cert: &Certificate, at: DateTime<Utc>) -> Self {
        self.revoke(cert, at);
        self
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RevocationOracle for RevocationList {
    fn check(&self, cert: &Certificate, _issuer: &Certificate, at_time: DateTime<Utc>) -> Result<RevocationStatus> {
        let revoked = self.entries.iter().any(|e| {
            e.issuer == cert.issuer_raw() && e.serial == cert.serial() && e.revoked_at <= at_time
        });
        Ok(if revoked {
            RevocationStatus::Revoked
        } else {
            RevocationStatus::Good
        })
    }
}

/// Preferred oracle with a fallback, e.g. OCSP then CRL.
pub struct FallbackOracle {
    primary: Arc<dyn RevocationOracle>,
    fallback: Arc<dyn RevocationOracle>,
}

impl FallbackOracle {
    /// Ask `primary` first and `fallback` when it cannot answer.
    pub fn new(primary: Arc<dyn RevocationOracle>, fallback: Arc<dyn RevocationOracle>) -> Self {
        Self { primary, fallback }
    }
}

impl RevocationOracle for FallbackOracle {
    fn check(&self, cert: &Certificate, issuer: &Certificate, at_time: DateTime<Utc>) -> Result<RevocationStatus> {
        match self.primary.check(cert, issuer, at_time) {
            Ok(status @ (RevocationStatus::Good | RevocationStatus::Revoked)) => Ok(status),
            Ok(_) => self.fallback.check(cert, issuer, at_time),
            Err(e) => {
                log::debug!("Primary revocation oracle failed ({}), trying fallback", e);
                self.fallback.check(cert, issuer, at_time)
            },
        }
    }
}

impl std::fmt::Debug for FallbackOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackOracle").finish_non_exhaustive()
    }
}
