use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::AppError;

/// Default read/hash granularity.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Incremental SHA256 over fixed-size chunks.
pub struct ContentHasher {
    hasher: Sha256,
    bytes_seen: u64,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            bytes_seen: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes_seen = self.bytes_seen.saturating_add(byte_len(chunk.len()));
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Lower-case hex digest.
    pub fn finalize(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

/// Computes the content hash of an in-memory buffer.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    for chunk in bytes.chunks(DEFAULT_CHUNK_SIZE) {
        hasher.update(chunk);
    }
    hasher.finalize()
}

/// Payload read from an upload stream together with its identity.
#[derive(Debug, Clone)]
pub struct HashedContent {
    pub bytes: Bytes,
    pub content_hash: String,
    /// Set when the stream had more than `limit` bytes; reading stops at `limit + 1`.
    pub exceeded_limit: bool,
}

impl HashedContent {
    pub fn byte_count(&self) -> u64 {
        byte_len(self.bytes.len())
    }
}

fn byte_len(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

/// Reads `reader` in `chunk_size` pieces, hashing as it goes, and stops as soon as
/// more than `limit` bytes were seen.
pub async fn read_and_hash<R>(
    reader: R,
    limit: u64,
    chunk_size: usize,
) -> Result<HashedContent, AppError>
where
    R: AsyncRead + Unpin,
{
    let mut limited = reader.take(limit.saturating_add(1));
    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut collected = BytesMut::new();

    loop {
        let n = limited.read(&mut buffer).await?;
        let Some(chunk) = buffer.get(..n).filter(|chunk| !chunk.is_empty()) else {
            break;
        };
        hasher.update(chunk);
        collected.extend_from_slice(chunk);
    }

    let exceeded_limit = hasher.bytes_seen() > limit;
    Ok(HashedContent {
        bytes: collected.freeze(),
        content_hash: hasher.finalize(),
        exceeded_limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_across_chunking() {
        let payload = vec![7u8; DEFAULT_CHUNK_SIZE * 3 + 11];
        let mut hasher = ContentHasher::new();
        for chunk in payload.chunks(100) {
            hasher.update(chunk);
        }
        assert_eq!(hasher.finalize(), content_hash(&payload));
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn read_and_hash_matches_in_memory_hash() {
        let payload = b"The quick brown fox jumps over the lazy dog".repeat(500);
        let hashed = read_and_hash(payload.as_slice(), 1 << 20, 64)
            .await
            .expect("read succeeds");
        assert!(!hashed.exceeded_limit);
        assert_eq!(hashed.byte_count(), payload.len() as u64);
        assert_eq!(hashed.content_hash, content_hash(&payload));
    }

    #[tokio::test]
    async fn read_and_hash_stops_past_limit() {
        let payload = vec![1u8; 10_000];
        let hashed = read_and_hash(payload.as_slice(), 1_000, 256)
            .await
            .expect("read succeeds");
        assert!(hashed.exceeded_limit);
        assert_eq!(hashed.byte_count(), 1_001);
    }
}
