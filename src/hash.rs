use std::io;
use std::io::Read;

use sha2::{Digest, Sha256, Sha512};

use crate::chain::{Role, SinkLink};
use crate::error::ArchiveError;
use crate::meta::ArchiveMeta;

/// Streaming digest selected by algorithm name at construction.
///
/// An unknown name is rejected up front; after that the hasher cannot fail.
/// `hexdigest` may be called at any point and reflects the bytes fed so far
/// (the digest of the empty input before anything was processed).
#[derive(Clone)]
pub enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    pub fn new(algorithm: &str) -> Result<Self, ArchiveError> {
        match algorithm.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Hasher::Sha256(Sha256::new())),
            "sha512" => Ok(Hasher::Sha512(Sha512::new())),
            "blake3" => Ok(Hasher::Blake3(Box::new(blake3::Hasher::new()))),
            other => Err(ArchiveError::UnsupportedHash(other.to_string())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Lowercase hex of the running digest.
    pub fn hexdigest(&self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.clone().finalize()),
            Hasher::Sha512(h) => hex::encode(h.clone().finalize()),
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Write-direction hashing link.
pub struct HashLink {
    algorithm: String,
    hasher: Hasher,
}

impl HashLink {
    pub fn new(algorithm: &str) -> Result<Self, ArchiveError> {
        Ok(HashLink {
            algorithm: algorithm.to_ascii_lowercase(),
            hasher: Hasher::new(algorithm)?,
        })
    }

    pub fn hexdigest(&self) -> String {
        self.hasher.hexdigest()
    }
}

impl SinkLink for HashLink {
    fn role(&self) -> Role {
        Role::Hash
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.hasher.update(buf);
        Ok(())
    }

    fn annotate(&self, meta: &mut ArchiveMeta) {
        meta.hash_algorithm = Some(self.algorithm.clone());
        meta.hash_value = Some(self.hasher.hexdigest());
    }

    fn status(&self) -> Option<String> {
        Some(format!("{} {}", self.algorithm, self.hasher.hexdigest()))
    }
}

/// Read-direction hashing wrapper; every byte read passes through the digest.
pub struct HashRead<R: Read> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> HashRead<R> {
    pub fn new(inner: R, hasher: Hasher) -> Self {
        HashRead { inner, hasher }
    }

    pub fn hexdigest(&self) -> String {
        self.hasher.hexdigest()
    }
}

impl<R: Read> Read for HashRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.inner.read(buf)?;
        self.hasher.update(&buf[..len]);
        Ok(len)
    }
}

#[cfg(test)]
mod test_hasher {
    use super::*;
    use std::io::Cursor;

    const EMPTY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const HELLO_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(matches!(
            Hasher::new("md5-classic"),
            Err(ArchiveError::UnsupportedHash(_))
        ));
    }

    #[test]
    fn names_are_case_insensitive() {
        assert!(Hasher::new("SHA256").is_ok());
        assert!(Hasher::new("Blake3").is_ok());
    }

    #[test]
    fn empty_input_digest() {
        let hasher = Hasher::new("sha256").unwrap();
        assert_eq!(hasher.hexdigest(), EMPTY_SHA256);
    }

    #[test]
    fn hello_world_digest() {
        let mut hasher = Hasher::new("sha256").unwrap();
        hasher.update(b"hello world");
        assert_eq!(hasher.hexdigest(), HELLO_SHA256);
    }

    #[test]
    fn hexdigest_is_queryable_mid_stream() {
        let mut hasher = Hasher::new("sha256").unwrap();
        hasher.update(b"hello ");
        let partial = hasher.hexdigest();
        hasher.update(b"world");
        assert_ne!(partial, hasher.hexdigest());
        assert_eq!(hasher.hexdigest(), HELLO_SHA256);
    }

    #[test]
    fn sha512_and_blake3_digest_lengths() {
        let mut long = Hasher::new("sha512").unwrap();
        long.update(b"x");
        assert_eq!(long.hexdigest().len(), 128);

        let mut short = Hasher::new("blake3").unwrap();
        short.update(b"x");
        assert_eq!(short.hexdigest().len(), 64);
    }

    #[test]
    fn hash_read_sees_every_byte() {
        let mut reader = HashRead::new(
            Cursor::new(b"hello world".to_vec()),
            Hasher::new("sha256").unwrap(),
        );
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(reader.hexdigest(), HELLO_SHA256);
    }
}
