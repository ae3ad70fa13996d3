use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread;

use walkdir::WalkDir;

use crate::content_map::ContentMap;
use crate::error::{Error, Result};
use crate::inventory::{Inventory, INVENTORY_FILE};
use crate::object::{OBJECT_DECLARATION, OBJECT_DECLARATION_FILE};
use crate::pipeline::{Cancel, ChecksumJob, Digester};

/// minimal read-only filesystem an object reader runs over
///
/// `open` reports an absent file with `io::ErrorKind::NotFound`.
pub trait ReadFs {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>>;
}

/// [`ReadFs`] rooted at a directory
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirFs { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ReadFs for DirFs {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.root.join(name))?))
    }
}

/// read-only view of an object with a loaded inventory
pub struct ObjectReader<F: ReadFs> {
    fs: F,
    inventory: Inventory,
}

impl<F: ReadFs> ObjectReader<F> {
    /// load an object: verify the declaration, then parse the root inventory
    pub fn new(fs: F) -> Result<Self> {
        let mut decl = String::new();
        match fs.open(OBJECT_DECLARATION_FILE) {
            Ok(mut file) => {
                file.read_to_string(&mut decl).map_err(|source| Error::Io {
                    path: OBJECT_DECLARATION_FILE.into(),
                    source,
                })?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::MissingDeclaration)
            }
            Err(source) => {
                return Err(Error::Io {
                    path: OBJECT_DECLARATION_FILE.into(),
                    source,
                })
            }
        }
        if decl != OBJECT_DECLARATION {
            return Err(Error::MalformedDeclaration);
        }

        let inventory = match fs.open(INVENTORY_FILE) {
            Ok(file) => Inventory::from_reader(file)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::MissingInventory),
            Err(source) => {
                return Err(Error::Io {
                    path: INVENTORY_FILE.into(),
                    source,
                })
            }
        };

        Ok(ObjectReader { fs, inventory })
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// logical filesystem of one version
    pub fn version_fs(&self, name: &str) -> Result<VersionFs<'_, F>> {
        let version = self.inventory.version(name)?;
        Ok(VersionFs {
            fs: &self.fs,
            manifest: &self.inventory.manifest,
            state: &version.state,
        })
    }

    /// logical filesystem of the head version
    pub fn head_fs(&self) -> Result<VersionFs<'_, F>> {
        self.version_fs(self.inventory.head.as_str())
    }
}

/// read-only logical state of a single version: logical path in, content
/// bytes out
pub struct VersionFs<'a, F: ReadFs> {
    fs: &'a F,
    manifest: &'a ContentMap,
    state: &'a ContentMap,
}

impl<'a, F: ReadFs> VersionFs<'a, F> {
    /// open the content behind a logical path
    pub fn open(&self, logical: &str) -> Result<Box<dyn Read + Send>> {
        let digest = self
            .state
            .digest_for(logical)
            .ok_or_else(|| Error::PathNotFound(logical.to_string()))?;
        let content_path = self
            .manifest
            .paths_for(digest)
            .next()
            .ok_or_else(|| Error::NoManifestEntry(digest.clone()))?;
        self.fs.open(content_path).map_err(|source| Error::Io {
            path: content_path.into(),
            source,
        })
    }

    /// read a logical path fully into memory
    pub fn read(&self, logical: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open(logical)?
            .read_to_end(&mut buf)
            .map_err(|source| Error::Io {
                path: logical.into(),
                source,
            })?;
        Ok(buf)
    }

    /// logical paths of this version, ascending
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.state.paths().map(|(p, _)| p)
    }
}

impl ObjectReader<DirFs> {
    /// open a reader over a directory on the local filesystem
    pub fn open_path(root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(DirFs::new(root))
    }

    /// digest every file under every version's content directory
    ///
    /// versions without a content directory are skipped. files stream
    /// through the digester pool; the first failed job aborts the walk.
    /// a clean object satisfies `content() == manifest`.
    pub fn content(&self, cancel: &Cancel) -> Result<ContentMap> {
        let root = self.fs.root().to_path_buf();
        let algorithm = self.inventory.digest_algorithm;

        let mut files = Vec::new();
        for vname in self.inventory.versions.keys() {
            let content_dir = root.join(vname).join(&self.inventory.content_directory);
            if !content_dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&content_dir) {
                let entry = entry.map_err(|e| walk_error(&content_dir, e))?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        }

        let digester = Digester::spawn_default(cancel);
        let jobs = digester.sender();
        let results = digester.finish();

        let feeder = thread::spawn(move || {
            for path in files {
                let job = ChecksumJob {
                    path,
                    algorithm,
                    expected: None,
                };
                if jobs.send(job).is_err() {
                    break;
                }
            }
        });

        let mut content = ContentMap::new();
        let mut first_err = None;
        for result in results {
            if first_err.is_some() {
                continue;
            }
            match result.computed {
                Ok(digest) => {
                    if let Ok(rel) = result.path.strip_prefix(&root) {
                        if let Err(err) = content.add(digest, rel.to_string_lossy()) {
                            first_err = Some(err);
                        }
                    }
                }
                Err(err) => first_err = Some(err),
            }
        }
        let _ = feeder.join();

        if let Some(err) = first_err {
            return Err(err);
        }
        if cancel.is_canceled() {
            return Err(Error::Canceled);
        }
        Ok(content)
    }
}

fn walk_error(dir: &Path, err: walkdir::Error) -> Error {
    Error::Io {
        path: dir.to_path_buf(),
        source: err.into_io_error().unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "walk error")
        }),
    }
}
