//! Disk cache path construction.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// File name for a data cache key: the lowercase hex SHA-256 of the key.
///
/// # Example
///
/// ```
/// use imagepipe::cache::cache_file_name;
///
/// let name = cache_file_name("https://example.com/a.png");
/// assert_eq!(name.len(), 64);
/// assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
pub fn cache_file_name(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{:x}", digest)
}

/// Full path of a cache entry.
///
/// Entries are fanned out into 256 subdirectories by the first two hex
/// digits of their name:
///
/// ```text
/// <cache_dir>/<name[0..2]>/<name>
/// ```
pub(super) fn cache_path(cache_dir: &Path, file_name: &str) -> PathBuf {
    let prefix = file_name.get(..2).unwrap_or("00");
    cache_dir.join(prefix).join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_stable() {
        assert_eq!(cache_file_name("a"), cache_file_name("a"));
        assert_ne!(cache_file_name("a"), cache_file_name("b"));
        assert_eq!(
            cache_file_name(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_path_fans_out_by_prefix() {
        let name = cache_file_name("a");
        let path = cache_path(Path::new("/cache"), &name);
        assert_eq!(path, PathBuf::from(format!("/cache/{}/{}", &name[..2], name)));
    }
}
