//! ocfl - versioned, content-addressed object storage
//!
//! an implementation of the OCFL (Oxford Common File Layout) object layout
//! for digital preservation: each object is a directory recording an
//! append-only sequence of logical versions, with every file stored exactly
//! once under a path keyed by its cryptographic digest.
//!
//! # Core concepts
//!
//! - **Inventory**: the canonical manifest relating digests to on-disk
//!   content paths and to per-version logical file trees
//! - **Stage**: a mutable working area that becomes the next version on
//!   commit, with content deduplicated against prior versions
//! - **Validator**: a streaming, cancellable checker that an object on disk
//!   matches its inventory bit-for-bit
//!
//! # Example usage
//!
//! ```no_run
//! use ocfl::{Config, Object, ObjectReader, User};
//! use std::io::Write;
//! use std::path::Path;
//!
//! // create an object and commit its first version
//! let mut object = Object::init(Path::new("/data/obj-1"), "urn:example:1", Config::default()).unwrap();
//! let mut stage = object.stage().unwrap();
//! stage.open_file("readme.txt").unwrap().write_all(b"hello").unwrap();
//! stage.commit(User::new("Alice", "mailto:a@example.org"), "initial version").unwrap();
//!
//! // read a logical file back from the head version
//! let reader = ObjectReader::open_path("/data/obj-1").unwrap();
//! let bytes = reader.head_fs().unwrap().read("readme.txt").unwrap();
//! ```

mod content_map;
mod digest;
mod error;
mod inventory;
mod object;
mod pipeline;
mod reader;
mod stage;
mod validate;

pub use content_map::{validate_path, ContentMap};
pub use digest::{checksum, Digest, DigestAlgorithm, DIGEST_ALGORITHMS};
pub use error::{Error, IoResultExt, Result};
pub use inventory::{
    version_name, version_number, Inventory, User, Version, CONTENT_DIR, INVENTORY_FILE,
    INVENTORY_TYPE,
};
pub use object::{
    Config, Object, ObjectLock, OBJECT_DECLARATION, OBJECT_DECLARATION_FILE,
};
pub use pipeline::{Cancel, ChecksumJob, ChecksumResult, Digester};
pub use reader::{DirFs, ObjectReader, ReadFs, VersionFs};
pub use stage::Stage;
pub use validate::validate_object;
