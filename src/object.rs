use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::digest::DigestAlgorithm;
use crate::error::{Error, IoResultExt, Result};
use crate::inventory::{version_number, Inventory, CONTENT_DIR, INVENTORY_FILE};

/// name of the object declaration file
pub const OBJECT_DECLARATION_FILE: &str = "0=ocfl_object_1.0";

/// required content of the declaration file
pub const OBJECT_DECLARATION: &str = "ocfl_object_1.0\n";

/// immutable defaults applied when creating objects and versions
#[derive(Clone, Debug)]
pub struct Config {
    /// algorithm for new objects; existing objects keep their inventory's
    pub digest_algorithm: DigestAlgorithm,
    /// content directory name for new objects
    pub content_directory: String,
    pub file_mode: u32,
    pub dir_mode: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            digest_algorithm: DigestAlgorithm::default(),
            content_directory: CONTENT_DIR.to_string(),
            file_mode: 0o644,
            dir_mode: 0o755,
        }
    }
}

/// a writable OCFL object rooted at a directory
pub struct Object {
    path: PathBuf,
    inventory: Inventory,
    config: Config,
}

impl Object {
    /// create a new object: declaration file plus an empty inventory
    pub fn init(path: &Path, id: &str, config: Config) -> Result<Object> {
        let decl_path = path.join(OBJECT_DECLARATION_FILE);
        if decl_path.exists() {
            return Err(Error::ObjectExists(path.to_path_buf()));
        }
        fs::create_dir_all(path).with_path(path)?;
        fs::write(&decl_path, OBJECT_DECLARATION).with_path(&decl_path)?;

        let mut inventory = Inventory::new(id, config.digest_algorithm);
        inventory.content_directory = config.content_directory.clone();
        inventory.write_to(path)?;

        Ok(Object {
            path: path.to_path_buf(),
            inventory,
            config,
        })
    }

    /// open an existing object, checking its declaration and inventory
    pub fn open(path: &Path) -> Result<Object> {
        Self::open_with_config(path, Config::default())
    }

    pub fn open_with_config(path: &Path, config: Config) -> Result<Object> {
        read_declaration(path)?;
        let inventory = read_inventory(path)?;
        Ok(Object {
            path: path.to_path_buf(),
            inventory,
            config,
        })
    }

    /// object root directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub(crate) fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.inventory
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// acquire the exclusive writer lock
    ///
    /// the declaration file doubles as the lock target so the object root
    /// holds nothing beyond the layout. the lock releases on drop.
    pub fn lock(&self) -> Result<ObjectLock> {
        let decl_path = self.path.join(OBJECT_DECLARATION_FILE);
        let file = File::open(&decl_path).with_path(&decl_path)?;
        let flock =
            Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|_| Error::LockContention)?;
        Ok(ObjectLock { _flock: flock })
    }

    /// version directories present on disk, in numeric order
    pub fn version_dirs(&self) -> Result<Vec<String>> {
        list_version_dirs(&self.path)
    }

    /// publish the root inventory
    pub(crate) fn write_inventory(&self) -> Result<()> {
        self.inventory.write_to(&self.path)
    }

    /// publish the inventory snapshot inside a version directory
    pub(crate) fn write_version_inventory(&self, version: &str) -> Result<()> {
        self.inventory.write_to(&self.path.join(version))
    }
}

/// guard holding the writer lock until dropped
pub struct ObjectLock {
    _flock: Flock<File>,
}

/// check the declaration file at the object root
pub(crate) fn read_declaration(root: &Path) -> Result<()> {
    let decl_path = root.join(OBJECT_DECLARATION_FILE);
    let decl = match fs::read_to_string(&decl_path) {
        Ok(decl) => decl,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingDeclaration)
        }
        Err(source) => {
            return Err(Error::Io {
                path: decl_path,
                source,
            })
        }
    };
    if decl != OBJECT_DECLARATION {
        return Err(Error::MalformedDeclaration);
    }
    Ok(())
}

/// directories under root whose names parse as version ids, numeric order
pub(crate) fn list_version_dirs(root: &Path) -> Result<Vec<String>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).with_path(root)? {
        let entry = entry.with_path(root)?;
        if !entry.file_type().with_path(root)?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if version_number(&name).is_some() {
            dirs.push(name);
        }
    }
    dirs.sort_by_key(|name| version_number(name).map(|(n, _)| n).unwrap_or(u64::MAX));
    Ok(dirs)
}

/// read and parse `<dir>/inventory.json`
pub(crate) fn read_inventory(dir: &Path) -> Result<Inventory> {
    let path = dir.join(INVENTORY_FILE);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingInventory)
        }
        Err(source) => return Err(Error::Io { path, source }),
    };
    Inventory::from_reader(BufReader::new(file))
}
