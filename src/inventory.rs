use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content_map::ContentMap;
use crate::digest::DigestAlgorithm;
use crate::error::{Error, IoResultExt, Result};

/// inventory `type` field required by the layout
pub const INVENTORY_TYPE: &str = "https://ocfl.io/1.0/spec/#inventory";

/// inventory file name, at the object root and in each version directory
pub const INVENTORY_FILE: &str = "inventory.json";

/// default content directory name inside a version directory
pub const CONTENT_DIR: &str = "content";

/// who made a version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub address: String,
}

impl User {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// one immutable logical version of an object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub created: DateTime<Utc>,
    pub message: String,
    /// logical path -> content digest
    pub state: ContentMap,
    pub user: User,
}

fn default_content_directory() -> String {
    CONTENT_DIR.to_string()
}

/// parsed form of an object's inventory.json
///
/// field order matters: serialization follows declaration order so emitted
/// documents diff deterministically. unknown top-level fields survive a
/// parse/emit round-trip through `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub digest_algorithm: DigestAlgorithm,
    /// most recent version name; empty until the first version is committed
    pub head: String,
    #[serde(default = "default_content_directory")]
    pub content_directory: String,
    /// secondary digests per algorithm, paths a subset of the manifest's
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fixity: BTreeMap<DigestAlgorithm, ContentMap>,
    /// content digest -> content paths relative to the object root
    pub manifest: ContentMap,
    pub versions: BTreeMap<String, Version>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// parse `v<n>` (or zero-padded `v000<n>`), returning the number and the
/// padding width (0 for unpadded names)
pub fn version_number(name: &str) -> Option<(u64, usize)> {
    let digits = name.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    if n == 0 {
        return None;
    }
    let padding = if digits.starts_with('0') { digits.len() } else { 0 };
    Some((n, padding))
}

/// format a version name using the given padding width
pub fn version_name(n: u64, padding: usize) -> String {
    if padding == 0 {
        format!("v{}", n)
    } else {
        format!("v{:0>width$}", n, width = padding)
    }
}

impl Inventory {
    /// empty inventory for a new object: no versions, head unset
    pub fn new(id: impl Into<String>, algorithm: DigestAlgorithm) -> Self {
        Inventory {
            id: id.into(),
            type_: INVENTORY_TYPE.to_string(),
            digest_algorithm: algorithm,
            head: String::new(),
            content_directory: CONTENT_DIR.to_string(),
            fixity: BTreeMap::new(),
            manifest: ContentMap::new(),
            versions: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn version(&self, name: &str) -> Result<&Version> {
        self.versions
            .get(name)
            .ok_or_else(|| Error::VersionNotFound(name.to_string()))
    }

    /// state of the head version, if any versions exist
    pub fn head_version(&self) -> Option<&Version> {
        self.versions.get(&self.head)
    }

    /// version names in numeric order
    pub fn version_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.versions.keys().map(String::as_str).collect();
        names.sort_by_key(|name| version_number(name).map(|(n, _)| n).unwrap_or(u64::MAX));
        names
    }

    /// validate the version key sequence: parseable names, consistent
    /// padding, dense `1..N`; returns the names in order
    fn version_sequence(&self) -> Result<Vec<&str>> {
        let mut parsed = Vec::with_capacity(self.versions.len());
        for name in self.versions.keys() {
            let (n, _) = version_number(name).ok_or_else(|| Error::VersionFormat(name.clone()))?;
            parsed.push((n, name.as_str()));
        }
        parsed.sort();
        let padding = parsed
            .first()
            .and_then(|(_, name)| version_number(name))
            .map(|(_, p)| p)
            .unwrap_or(0);
        for (i, (n, name)) in parsed.iter().enumerate() {
            let expected = version_name(i as u64 + 1, padding);
            if *n != i as u64 + 1 || *name != expected {
                return Err(Error::VersionFormat(name.to_string()));
            }
        }
        Ok(parsed.into_iter().map(|(_, name)| name).collect())
    }

    /// next version name: `v1` for an empty object, otherwise head + 1
    /// keeping the established padding
    pub fn next_version(&self) -> Result<String> {
        if self.versions.is_empty() {
            return Ok(version_name(1, 0));
        }
        let (n, head_padding) =
            version_number(&self.head).ok_or_else(|| Error::VersionFormat(self.head.clone()))?;
        // a padded head at its full width (v9999) parses as unpadded, so
        // fall back to the padding established by the first version
        let padding = if head_padding > 0 {
            head_padding
        } else {
            self.version_names()
                .first()
                .and_then(|name| version_number(name))
                .map(|(_, p)| p)
                .unwrap_or(0)
        };
        let next = n + 1;
        if padding > 0 && next.to_string().len() > padding {
            return Err(Error::VersionOverflow(self.head.clone()));
        }
        Ok(version_name(next, padding))
    }

    /// every structural violation, in check order
    pub fn structure_errors(&self) -> Vec<Error> {
        let mut errs = Vec::new();
        if self.id.is_empty() {
            errs.push(Error::InventoryIdMissing);
        }
        if self.type_ != INVENTORY_TYPE {
            errs.push(Error::InventoryTypeMismatch {
                expected: INVENTORY_TYPE.to_string(),
                found: self.type_.clone(),
            });
        }
        match self.version_sequence() {
            Ok(names) => {
                let expected = names.last().copied().unwrap_or("");
                if self.head != expected {
                    errs.push(Error::HeadMismatch {
                        head: self.head.clone(),
                        expected: expected.to_string(),
                    });
                }
            }
            Err(err) => errs.push(err),
        }
        for version in self.versions.values() {
            for digest in version.state.digests() {
                if self.manifest.len_digest(digest) == 0 {
                    errs.push(Error::StateDigestNotInManifest(digest.clone()));
                }
            }
        }
        for fixity_map in self.fixity.values() {
            for (_, path) in fixity_map.iter() {
                if self.manifest.digest_for(path).is_none() {
                    errs.push(Error::FixityPathNotInManifest(path.to_string()));
                }
            }
        }
        errs
    }

    /// first structural violation, if any
    pub fn consistency(&self) -> Result<()> {
        match self.structure_errors().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// parse an inventory document
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// persist `inventory.json` and its digest sidecar into dir
    ///
    /// both files are written to a sibling temp file first and renamed into
    /// place, so readers never observe a torn document.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        write_atomic(dir, INVENTORY_FILE, &bytes)?;

        let digest = self.digest_algorithm.digest(&bytes);
        let sidecar_name = format!("{}.{}", INVENTORY_FILE, self.digest_algorithm);
        let sidecar = format!("{}  {}\n", digest, INVENTORY_FILE);
        write_atomic(dir, &sidecar_name, sidecar.as_bytes())
    }
}

/// write bytes to `dir/name` via temp file + rename + directory fsync
fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let tmp_path = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
    {
        let mut tmp = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp.write_all(bytes).with_path(&tmp_path)?;
        tmp.sync_all().with_path(&tmp_path)?;
    }
    let target = dir.join(name);
    std::fs::rename(&tmp_path, &target).with_path(&target)?;

    let dir_file = File::open(dir).with_path(dir)?;
    dir_file.sync_all().with_path(dir)?;
    Ok(())
}
