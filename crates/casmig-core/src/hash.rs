//! Content hashing and the sharded hash-to-path layout.
//!
//! Files are stored under `ab/cd/ef/abcdef...`: three directory levels taken
//! from the first six hex characters, then the full hash as the file name.
//! Any backend that shares a store with the content-addressed writer must use
//! exactly this layout.

use sha2::{Digest, Sha256};

use crate::error::{MigrationError, Result};

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Compute the SHA-256 hex digest of `content`.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Map a content hash to its sharded storage path.
pub fn storage_path(hash: &str) -> Result<String> {
    if hash.len() < 6 || !hash.is_ascii() {
        return Err(MigrationError::InvalidConfig(format!(
            "hash must be at least 6 ascii characters long: {hash:?}"
        )));
    }
    Ok(format!("{}/{}/{}/{}", &hash[0..2], &hash[2..4], &hash[4..6], hash))
}

/// True if `s` looks like a full lowercase SHA-256 hex digest.
pub fn is_content_hash(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Extract a hash from a database location field, which may hold either a
/// bare hash or a path whose last segment is the hash.
pub fn hash_from_location(location: &str) -> Option<&str> {
    if is_content_hash(location) {
        return Some(location);
    }
    let file_name = location.rsplit('/').next()?;
    is_content_hash(file_name).then_some(file_name)
}

/// Reverse of [`storage_path`]: the hash is the last of at least four segments.
pub fn hash_from_storage_path(path: &str) -> Option<&str> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() < 4 {
        return None;
    }
    let file_name = parts[parts.len() - 1];
    is_content_hash(file_name).then_some(file_name)
}

// Inline hex encoding, same as the object hashing it replaces.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes
            .as_ref()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: &str = "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789";

    #[test]
    fn test_storage_path_sharding() {
        assert_eq!(storage_path(H).unwrap(), format!("ab/cd/ef/{H}"));
    }

    #[test]
    fn test_storage_path_rejects_short_hash() {
        assert!(storage_path("abc").is_err());
    }

    #[test]
    fn test_content_hash_known_value() {
        // sha256("hello world")
        assert_eq!(
            content_hash(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_hash_from_location() {
        assert_eq!(hash_from_location(H), Some(H));
        let path = format!("uploads/images/{H}");
        assert_eq!(hash_from_location(&path), Some(H));
        assert_eq!(hash_from_location("uploads/images/picture.png"), None);
        assert_eq!(hash_from_location(&H.to_uppercase()), None);
    }

    #[test]
    fn test_hash_from_storage_path() {
        let path = storage_path(H).unwrap();
        assert_eq!(hash_from_storage_path(&path), Some(H));
        assert_eq!(hash_from_storage_path(H), None);
        assert_eq!(hash_from_storage_path("ab/cd/ef/readme.txt"), None);
    }
}
