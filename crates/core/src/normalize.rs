//! URL canonicalization.
//!
//! Every cache key, storage key, and render-job identity in the system is
//! derived from the normalized form produced here, so normalization must be
//! deterministic and idempotent: `normalize(normalize(u)) == normalize(u)`.

use crate::Error;

/// Query parameters stripped during normalization.
///
/// Tracking/analytics identifiers that never affect page content. Matched
/// case-insensitively against the full parameter name. Maintained constant,
/// not user-configurable.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "gclid",
    "gclsrc",
    "dclid",
    "fbclid",
    "msclkid",
    "twclid",
    "igshid",
    "mc_cid",
    "mc_eid",
    "yclid",
    "s_kwcid",
    "sscid",
    "vero_id",
    "_ga",
    "_gl",
];

/// Canonical string form of a URL.
///
/// The identity used for cache lookups, storage keys, and render-job
/// dedup. Only obtainable through [`normalize`] (or a trusted read back
/// from the database), so two equal `NormalizedUrl`s always refer to the
/// same content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    /// Reconstruct from a value previously produced by [`normalize`] and
    /// persisted verbatim.
    pub(crate) fn from_stored(s: String) -> Self {
        NormalizedUrl(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalize a URL string.
///
/// Steps, applied in order:
/// 1. Force the scheme to `https`
/// 2. Lower-case the host (the parser already does this for domains)
/// 3. Strip a single trailing `/` from the path unless the path is `/`
/// 4. Drop query parameters on the tracking denylist (case-insensitive)
/// 5. Stable-sort remaining query parameters by name
/// 6. Drop the fragment
///
/// Fails with [`Error::InvalidUrl`] when the input is not an absolute URL.
pub fn normalize(raw: &str) -> Result<NormalizedUrl, Error> {
    let trimmed = raw.trim();
    let mut parsed = url::Url::parse(trimmed).map_err(|e| Error::InvalidUrl(format!("{trimmed}: {e}")))?;

    if parsed.scheme() != "https" {
        parsed
            .set_scheme("https")
            .map_err(|_| Error::InvalidUrl(format!("{trimmed}: cannot canonicalize scheme to https")))?;
    }

    let path = parsed.path().to_string();
    if path != "/" && path.ends_with('/') {
        parsed.set_path(&path[..path.len() - 1]);
    }

    let mut kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            !TRACKING_PARAMS.contains(&lower.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        // sort_by is stable, so equal names keep their original order
        kept.sort_by(|a, b| a.0.cmp(&b.0));
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        drop(pairs);
    }

    parsed.set_fragment(None);

    Ok(NormalizedUrl(parsed.to_string()))
}
