use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::digest::DynDigest;

use crate::error::{Error, IoResultExt, Result};
use crate::pipeline::Cancel;

/// digest algorithms an inventory may declare
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "sha256")]
    Sha256,
    #[serde(rename = "sha512")]
    Sha512,
    #[serde(rename = "sha1")]
    Sha1,
    #[serde(rename = "md5")]
    Md5,
    #[serde(rename = "blake2b-512")]
    Blake2b512,
}

/// all supported algorithms
pub const DIGEST_ALGORITHMS: [DigestAlgorithm; 5] = [
    DigestAlgorithm::Sha256,
    DigestAlgorithm::Sha512,
    DigestAlgorithm::Sha1,
    DigestAlgorithm::Md5,
    DigestAlgorithm::Blake2b512,
];

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Blake2b512 => "blake2b-512",
        }
    }

    /// fresh hasher for this algorithm
    pub fn hasher(&self) -> Box<dyn DynDigest> {
        match self {
            DigestAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
            DigestAlgorithm::Sha512 => Box::new(sha2::Sha512::default()),
            DigestAlgorithm::Sha1 => Box::new(sha1::Sha1::default()),
            DigestAlgorithm::Md5 => Box::new(md5::Md5::default()),
            DigestAlgorithm::Blake2b512 => Box::new(blake2::Blake2b512::default()),
        }
    }

    /// digest of a byte slice
    pub fn digest(&self, data: &[u8]) -> Digest {
        let mut hasher = self.hasher();
        hasher.update(data);
        Digest(hex::encode(hasher.finalize()))
    }
}

impl Default for DigestAlgorithm {
    /// sha512 is the recommended default
    fn default() -> Self {
        DigestAlgorithm::Sha512
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "md5" => Ok(DigestAlgorithm::Md5),
            "blake2b-512" => Ok(DigestAlgorithm::Blake2b512),
            _ => Err(Error::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// hex-encoded content digest, case-insensitive
///
/// two digests are equal iff their lowercase hex forms are equal; the
/// lowercase form is fixed at construction so comparisons stay byte-wise.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(String);

impl Digest {
    pub fn new(hex: impl Into<String>) -> Self {
        let hex = hex.into();
        if hex.bytes().any(|b| b.is_ascii_uppercase()) {
            Digest(hex.to_ascii_lowercase())
        } else {
            Digest(hex)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = if self.0.len() > 12 { &self.0[..12] } else { &self.0 };
        write!(f, "Digest({})", short)
    }
}

impl From<&str> for Digest {
    fn from(s: &str) -> Self {
        Digest::new(s)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Digest::new(s))
    }
}

/// compute the digest of the file at path, streaming in 64KB chunks
pub fn checksum(algorithm: DigestAlgorithm, path: &Path) -> Result<Digest> {
    checksum_cancelable(algorithm, path, &Cancel::new())
}

/// checksum that abandons the file at the next read boundary once canceled
pub(crate) fn checksum_cancelable(
    algorithm: DigestAlgorithm,
    path: &Path,
    cancel: &Cancel,
) -> Result<Digest> {
    let mut file = File::open(path).with_path(path)?;
    let mut hasher = algorithm.hasher();
    let mut buf = [0u8; 64 * 1024];
    loop {
        if cancel.is_canceled() {
            return Err(Error::Canceled);
        }
        let n = file.read(&mut buf).with_path(path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Digest(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_digest_case_insensitive() {
        let lower = Digest::new("abc123");
        let upper = Digest::new("ABC123");
        assert_eq!(lower, upper);
        assert_eq!(upper.as_str(), "abc123");
    }

    #[test]
    fn test_algorithm_roundtrip() {
        for alg in DIGEST_ALGORITHMS {
            let parsed: DigestAlgorithm = alg.as_str().parse().unwrap();
            assert_eq!(alg, parsed);
        }
        assert!("sha3-512".parse::<DigestAlgorithm>().is_err());
    }

    #[test]
    fn test_algorithm_serde_names() {
        let json = serde_json::to_string(&DigestAlgorithm::Blake2b512).unwrap();
        assert_eq!(json, "\"blake2b-512\"");
        let alg: DigestAlgorithm = serde_json::from_str("\"sha512\"").unwrap();
        assert_eq!(alg, DigestAlgorithm::Sha512);
    }

    #[test]
    fn test_checksum_empty_file_vectors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();

        let cases = [
            (
                DigestAlgorithm::Sha256,
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            ),
            (
                DigestAlgorithm::Sha512,
                "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce\
                 47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e",
            ),
            (DigestAlgorithm::Sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709"),
            (DigestAlgorithm::Md5, "d41d8cd98f00b204e9800998ecf8427e"),
        ];
        for (alg, expected) in cases {
            let sum = checksum(alg, &path).unwrap();
            assert_eq!(sum.as_str(), expected);
        }
    }

    #[test]
    fn test_checksum_matches_in_memory_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, b"hello world").unwrap();

        for alg in DIGEST_ALGORITHMS {
            let streamed = checksum(alg, &path).unwrap();
            let direct = alg.digest(b"hello world");
            assert_eq!(streamed, direct);
        }
    }

    #[test]
    fn test_checksum_missing_file() {
        let dir = tempdir().unwrap();
        let result = checksum(DigestAlgorithm::Sha512, &dir.path().join("absent"));
        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn test_checksum_canceled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, b"bytes").unwrap();

        let cancel = Cancel::new();
        cancel.cancel();
        let result = checksum_cancelable(DigestAlgorithm::Sha512, &path, &cancel);
        assert!(matches!(result, Err(Error::Canceled)));
    }
}
