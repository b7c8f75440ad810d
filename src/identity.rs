//! Finding fingerprints.
//!
//! A finding's identity is derived from its file and the first 100
//! characters of its description, ignoring severity and category. Two
//! findings that restate the same complaint therefore collide to the same
//! identity across independent reviewer invocations, which is what lets the
//! history tracker recognize them. Coincidentally-similar findings collide
//! too; that approximation is accepted.

use sha2::{Digest, Sha256};

/// Number of description characters that participate in the fingerprint.
const DESCRIPTION_PREFIX_CHARS: usize = 100;

/// Truncated hex length of the final fingerprint.
const IDENTITY_LEN: usize = 12;

/// Compute the stable identity for a finding.
///
/// Deterministic and total: the same `file`/`description` pair always yields
/// the same 12-hex-character fingerprint.
pub fn finding_identity(file: &str, description: &str) -> String {
    let prefix: String = description.chars().take(DESCRIPTION_PREFIX_CHARS).collect();

    let mut hasher = Sha256::new();
    hasher.update(file.as_bytes());
    hasher.update(b":");
    hasher.update(prefix.as_bytes());

    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(IDENTITY_LEN);
    digest
}
