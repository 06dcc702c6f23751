//! Cache and storage key derivation.
//!
//! Both keys are pure functions of the normalized URL so the read, write,
//! and delete paths always agree on the location without coordination.

use crate::NormalizedUrl;
use sha2::{Digest, Sha256};

/// Namespace + format version prefix for fast-tier keys.
///
/// Bump the version when the cached value format changes; old entries then
/// simply miss instead of being misread.
const CACHE_KEY_PREFIX: &str = "render:v1:";

/// Object-store prefix for rendered pages.
const STORAGE_PREFIX: &str = "rendered/";

/// Hex characters of the SHA-256 digest kept in storage keys. Bounds key
/// length while keeping collisions out of practical reach.
const STORAGE_DIGEST_LEN: usize = 16;

/// Fast-tier key for a normalized URL, e.g. `render:v1:https://a.com/x`.
pub fn cache_key(url: &NormalizedUrl) -> String {
    format!("{CACHE_KEY_PREFIX}{url}")
}

/// Object-store key for a normalized URL, e.g. `rendered/1f3870be274f6c49.html`.
pub fn storage_key(url: &NormalizedUrl) -> String {
    let digest = hex::encode(Sha256::digest(url.as_str().as_bytes()));
    format!("{STORAGE_PREFIX}{}.html", &digest[..STORAGE_DIGEST_LEN])
}
