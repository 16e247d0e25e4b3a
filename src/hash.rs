//! Content hashing for change detection and identifier derivation
//!
//! All identifiers in the store are BLAKE3 digests rendered as lowercase
//! hex (64 chars for the full 32-byte digest). Hashes are stable across
//! runs and platforms for identical byte content.

/// Hex BLAKE3 digest of a byte buffer.
///
/// This is the content hash recorded in `file-hashes.json` and compared
/// by the change detector.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Derive a chunk id from its identity tuple.
///
/// The id binds the chunk to the repository alias, the file's relative
/// path, the chunk ordinal within the file, and the file content hash.
/// Re-chunking unchanged content therefore reproduces identical ids,
/// while any content change rotates every id for that file.
pub fn chunk_id(alias: &str, relative_path: &str, ordinal: u32, file_hash: &str) -> String {
    let identity = format!("{alias}|{relative_path}|{ordinal}|{file_hash}");
    blake3::hash(identity.as_bytes()).to_hex().to_string()
}

/// Content-addressable repository id from a canonicalized root path.
pub fn repo_id(canonical_root: &std::path::Path) -> String {
    let normalized = canonical_root.to_string_lossy().replace('\\', "/");
    blake3::hash(normalized.as_bytes()).to_hex().to_string()
}

/// Decode a 64-char hex chunk id into its 32 raw bytes.
///
/// Vector segment records store the raw form; JSON artifacts store hex.
pub fn decode_id(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(out)
}

/// Encode 32 raw id bytes back to the hex form used in JSON artifacts.
pub fn encode_id(raw: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in raw {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        let a = content_hash(b"alpha\nbeta\n");
        let b = content_hash(b"alpha\nbeta\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_content_hash_differs() {
        assert_ne!(content_hash(b"alpha"), content_hash(b"beta"));
    }

    #[test]
    fn test_chunk_id_sensitive_to_every_component() {
        let base = chunk_id("repo", "src/a.rs", 0, "deadbeef");
        assert_ne!(base, chunk_id("other", "src/a.rs", 0, "deadbeef"));
        assert_ne!(base, chunk_id("repo", "src/b.rs", 0, "deadbeef"));
        assert_ne!(base, chunk_id("repo", "src/a.rs", 1, "deadbeef"));
        assert_ne!(base, chunk_id("repo", "src/a.rs", 0, "cafebabe"));
    }

    #[test]
    fn test_id_roundtrip() {
        let id = content_hash(b"roundtrip");
        let raw = decode_id(&id).unwrap();
        assert_eq!(encode_id(&raw), id);
    }

    #[test]
    fn test_decode_id_rejects_bad_input() {
        assert!(decode_id("abc").is_none());
        assert!(decode_id(&"z".repeat(64)).is_none());
    }

    #[test]
    fn test_repo_id_normalizes_separators() {
        let a = repo_id(std::path::Path::new("/home/user/project"));
        assert_eq!(a.len(), 64);
    }
}
