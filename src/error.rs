use std::path::PathBuf;

use crate::digest::Digest;

/// error type for ocfl operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("E003: object declaration not found")]
    MissingDeclaration,

    #[error("E007: object declaration malformed")]
    MalformedDeclaration,

    #[error("E034: inventory not found")]
    MissingInventory,

    #[error("object already exists at {0}")]
    ObjectExists(PathBuf),

    #[error("inventory id is empty")]
    InventoryIdMissing,

    #[error("inventory type is not {expected}: {found}")]
    InventoryTypeMismatch { expected: String, found: String },

    #[error("malformed version sequence: {0}")]
    VersionFormat(String),

    #[error("version not found: {0}")]
    VersionNotFound(String),

    #[error("version sequence exhausted at {0}")]
    VersionOverflow(String),

    #[error("head is {head}, expected {expected}")]
    HeadMismatch { head: String, expected: String },

    #[error("state digest not in manifest: {0}")]
    StateDigestNotInManifest(Digest),

    #[error("fixity path not in manifest: {0}")]
    FixityPathNotInManifest(String),

    #[error("content file not in manifest: {0}")]
    ContentNotInManifest(String),

    #[error("checksum mismatch at {path}: expected {expected}, got {computed}")]
    ChecksumMismatch {
        path: String,
        expected: Digest,
        computed: Digest,
    },

    #[error("validation canceled")]
    Canceled,

    #[error("validation failed with {0} error(s)")]
    ValidationFailed(usize),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("path already bound to a different digest: {0}")]
    PathCollision(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("no manifest entry for digest: {0}")]
    NoManifestEntry(Digest),

    #[error("unsupported digest algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("object is locked by another writer")]
    LockContention,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("inventory serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
