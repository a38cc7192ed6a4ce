/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Incremental content hasher used for `[hash]` placeholders in output names.
#[derive(Default)]
pub struct ContentHasher {
    inner: blake3::Hasher,
}

impl ContentHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a length-prefixed part, so `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn part(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(&(bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    /// First `len` characters of the hex digest, upper-cased (max 64).
    #[must_use]
    pub fn finish_prefix(&self, len: usize) -> String {
        let hex = self.inner.finalize().to_hex();
        hex[..len.min(hex.len())].to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_bytes() {
        let hash = blake3_bytes(b"hello world");
        assert_eq!(
            hash,
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn test_content_hasher_is_boundary_sensitive() {
        let mut a = ContentHasher::new();
        a.part(b"ab").part(b"c");
        let mut b = ContentHasher::new();
        b.part(b"a").part(b"bc");

        assert_eq!(a.finish_prefix(8).len(), 8);
        assert_ne!(a.finish_prefix(8), b.finish_prefix(8));
    }

    #[test]
    fn test_content_hasher_is_stable() {
        let mut a = ContentHasher::new();
        a.part(b"entry.js");
        let mut b = ContentHasher::new();
        b.part(b"entry.js");
        assert_eq!(a.finish_prefix(8), b.finish_prefix(8));
    }
}
