//! Playbook admission gate.
//!
//! Every playbook must clear three checks, in order, before any other part
//! of the engine may look at it:
//!
//! 1. SHA-256 hash of the raw content matches the expected digest
//! 2. Ed25519 signature over the raw digest bytes verifies under the
//!    pinned signing key
//! 3. Approval status is `approved` (or `test`, which the control plane
//!    authorizes out-of-band and the signature still binds)
//!
//! There are no exceptions and no debug bypasses. A failure at any step is
//! terminal: the caller must not execute, parse beyond the envelope, or
//! expose the content.

use chrono::Utc;
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::SecurityError;
use crate::types::{PlaybookStatus, SignedPlaybook, VerificationRecord};

/// Length of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Cryptographic verifier for signed playbooks.
///
/// Holds only the pinned signing key, obtained once at enrollment; it is
/// immutable and safe to share across concurrent executions.
#[derive(Debug, Clone)]
pub struct Verifier {
    signing_key: VerifyingKey,
}

impl Verifier {
    /// Create a verifier from the control plane's raw public key bytes.
    ///
    /// The key is pinned at enrollment and must NOT be fetched from the
    /// network at verification time.
    pub fn new(public_key: &[u8]) -> Result<Self, SecurityError> {
        let bytes: [u8; PUBLIC_KEY_LEN] =
            public_key
                .try_into()
                .map_err(|_| SecurityError::InvalidPublicKey {
                    expected: PUBLIC_KEY_LEN,
                    actual: public_key.len(),
                })?;
        let signing_key =
            VerifyingKey::from_bytes(&bytes).map_err(|_| SecurityError::InvalidPublicKey {
                expected: PUBLIC_KEY_LEN,
                actual: public_key.len(),
            })?;
        Ok(Verifier { signing_key })
    }

    /// Run the full verification chain on a signed playbook.
    ///
    /// Returns the audit record alongside the outcome. The record is
    /// populated even on failure, with `all_checks_pass` false and a
    /// specific `failure_reason`; it must accompany every execution report.
    pub fn verify(&self, sp: &SignedPlaybook) -> (VerificationRecord, Result<(), SecurityError>) {
        let mut record = VerificationRecord {
            expected_hash: sp.sha256_hash.clone(),
            approval_status: sp.status,
            verified_at: Utc::now(),
            ..Default::default()
        };

        // Step 1: presence. Nothing is computed from empty inputs.
        if sp.content.is_empty() {
            record.failure_reason = "empty playbook content".into();
            return (record, Err(SecurityError::EmptyContent));
        }
        if sp.sha256_hash.is_empty() {
            record.failure_reason = "missing playbook hash".into();
            return (record, Err(SecurityError::MissingHash));
        }
        if sp.signature.is_empty() {
            record.failure_reason = "missing playbook signature".into();
            return (record, Err(SecurityError::MissingSignature));
        }

        // Step 2: digest over the exact received bytes. Any transformation
        // of the content, including YAML re-serialization, invalidates it.
        let digest: [u8; 32] = Sha256::digest(sp.content.as_bytes()).into();
        let calculated = hex::encode(digest);
        record.calculated_hash = calculated.clone();

        if calculated != sp.sha256_hash {
            record.hash_verified = false;
            record.failure_reason =
                format!("hash mismatch: expected {}, got {}", sp.sha256_hash, calculated);
            return (
                record,
                Err(SecurityError::HashMismatch {
                    expected: sp.sha256_hash.clone(),
                    calculated,
                }),
            );
        }
        record.hash_verified = true;

        // Step 3: signature over the raw digest bytes, not the hex string.
        let signature = match Signature::from_slice(&sp.signature) {
            Ok(sig) => sig,
            Err(_) => {
                record.signature_verified = false;
                record.failure_reason = "signature verification failed".into();
                return (record, Err(SecurityError::InvalidSignature));
            }
        };
        if self.signing_key.verify(&digest, &signature).is_err() {
            record.signature_verified = false;
            record.failure_reason = "signature verification failed".into();
            return (record, Err(SecurityError::InvalidSignature));
        }
        record.signature_verified = true;

        // Step 4: approval status.
        if sp.status != PlaybookStatus::Approved && sp.status != PlaybookStatus::Test {
            record.approval_verified = false;
            record.failure_reason = format!(
                "playbook status is '{}', expected 'approved' or 'test'",
                sp.status
            );
            return (record, Err(SecurityError::NotApproved(sp.status.to_string())));
        }
        record.approval_verified = true;

        record.all_checks_pass = true;
        (record, Ok(()))
    }
}

/// Hex-encoded SHA-256 of playbook content, as the control plane computes it.
pub fn calculate_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Hash-only comparison for diagnostics. Never a substitute for [`Verifier::verify`].
pub fn verify_hash_only(content: &str, expected_hash: &str) -> (bool, String) {
    let calculated = calculate_hash(content);
    (calculated == expected_hash, calculated)
}
