//! Small helpers shared by discovery and the Record Store

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a raw playback URL
///
/// This is the discovery-time dedup key stored in `hash_raw_url`.
///
/// # Examples
///
/// ```
/// use memento_gather::utils::url_hash;
///
/// let hash = url_hash("https://web.archive.org/web/2019id_/http://example.com/");
/// assert_eq!(hash.len(), 64);
/// ```
pub fn url_hash(raw_url: &str) -> String {
    let digest = Sha256::digest(raw_url.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
