//! Idempotency keys for side-effecting calls.
//!
//! A key is derived only from the inputs that identify the effect, so a job
//! that is re-run for the same week presents the same key to the provider.

use sha2::{Digest, Sha256};

/// Generates an idempotency key from components.
#[must_use]
pub fn idempotency_key(components: &[&str]) -> String {
    let combined = components.join(":");
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    let result = hasher.finalize();
    format!("idem:{}", hex::encode(&result[..16]))
}
