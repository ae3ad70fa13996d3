use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use chrono::Utc;
use walkdir::WalkDir;

use crate::content_map::ContentMap;
use crate::digest::checksum;
use crate::error::{Error, IoResultExt, Result};
use crate::inventory::{User, Version};
use crate::object::{Object, ObjectLock};

/// mutable working area for building the next version of an object
///
/// the stage starts from the head version's logical state. new and modified
/// files live in a private scratch directory inside the object root until
/// [`Stage::commit`] moves them into place; a dropped stage removes its
/// scratch directory. the stage holds the object's writer lock for its whole
/// lifetime.
pub struct Stage<'a> {
    object: &'a mut Object,
    state: ContentMap,
    scratch: Option<PathBuf>,
    _lock: ObjectLock,
}

impl Object {
    /// open a stage seeded from the head version's state
    ///
    /// the mutable borrow means at most one stage per object; the flock
    /// extends that guarantee across processes.
    pub fn stage(&mut self) -> Result<Stage<'_>> {
        let lock = self.lock()?;
        let state = self
            .inventory()
            .head_version()
            .map(|v| v.state.clone())
            .unwrap_or_default();
        Ok(Stage {
            object: self,
            state,
            scratch: None,
            _lock: lock,
        })
    }
}

impl<'a> Stage<'a> {
    /// logical state the next version will record
    pub fn state(&self) -> &ContentMap {
        &self.state
    }

    /// open a staged file for reading and writing, creating it and any
    /// parent directories as needed
    ///
    /// the caller must drop the handle before committing. reading committed
    /// files goes through [`crate::ObjectReader`] instead.
    pub fn open_file(&mut self, logical: &str) -> Result<File> {
        crate::content_map::validate_path(logical)?;
        let file_mode = self.object.config().file_mode;
        let dir_mode = self.object.config().dir_mode;
        let full = self.scratch_dir()?.join(logical);
        if let Some(parent) = full.parent() {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(dir_mode)
                .create(parent)
                .with_path(parent)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(file_mode)
            .open(&full)
            .with_path(&full)
    }

    /// rename a staged or inherited file
    ///
    /// the scratch directory is authoritative: when the file is staged the
    /// filesystem rename must succeed, and a logical-state failure is then
    /// ignored because commit re-walks the scratch tree under final names.
    /// for purely inherited files only the logical rename applies.
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        let mut renamed_staged = false;
        if self.is_staged(src) {
            let from = self.full_path(src);
            let to = self.full_path(dst);
            fs::rename(&from, &to).with_path(&from)?;
            renamed_staged = true;
        }
        match self.state.rename(src, dst) {
            Ok(()) => Ok(()),
            Err(_) if renamed_staged => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// remove a staged or inherited file; same policy as [`Stage::rename`]
    pub fn remove(&mut self, logical: &str) -> Result<()> {
        let mut removed_staged = false;
        if self.is_staged(logical) {
            let full = self.full_path(logical);
            fs::remove_file(&full).with_path(&full)?;
            removed_staged = true;
        }
        match self.state.remove(logical) {
            Ok(_) => Ok(()),
            Err(_) if removed_staged => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// turn the stage into the object's next version
    ///
    /// moves the scratch directory to `<ver>/content`, digests every staged
    /// file into the manifest and the new state, appends the version, and
    /// publishes the version inventory followed by the root inventory (both
    /// atomically). identical content introduced under several logical names
    /// shares a single manifest digest. a failure part-way leaves any
    /// partial `<ver>/` directory for the caller to clean up.
    pub fn commit(mut self, user: User, message: &str) -> Result<String> {
        let next = self.object.inventory().next_version()?;
        let object_root = self.object.path().to_path_buf();
        let ver_dir = object_root.join(&next);
        fs::DirBuilder::new()
            .mode(self.object.config().dir_mode)
            .create(&ver_dir)
            .with_path(&ver_dir)?;

        if let Some(scratch) = self.scratch.clone() {
            let staged = fs::read_dir(&scratch).with_path(&scratch)?.next().is_some();
            if staged {
                let content_dir = ver_dir.join(&self.object.inventory().content_directory);
                fs::rename(&scratch, &content_dir).with_path(&content_dir)?;
                // the scratch tree now lives under the version directory;
                // drop must not remove it
                self.scratch = None;
                self.record_content(&object_root, &content_dir)?;
            } else {
                fs::remove_dir(&scratch).with_path(&scratch)?;
                self.scratch = None;
            }
        }

        let version = Version {
            created: Utc::now(),
            message: message.to_string(),
            state: self.state.clone(),
            user,
        };
        let inventory = self.object.inventory_mut();
        inventory.versions.insert(next.clone(), version);
        inventory.head = next.clone();

        self.object.write_version_inventory(&next)?;
        self.object.write_inventory()?;
        Ok(next)
    }

    /// digest every regular file under the new content directory into the
    /// stage state and the manifest
    ///
    /// identical digests share one content path: the logical name is always
    /// rebound in the state, but a digest already bound in the manifest
    /// keeps its existing content path and gains no new entry.
    fn record_content(&mut self, object_root: &Path, content_dir: &Path) -> Result<()> {
        let algorithm = self.object.inventory().digest_algorithm;
        // sorted walk so the retained content path for a repeated digest is
        // deterministic
        for entry in WalkDir::new(content_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| walk_error(content_dir, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let digest = checksum(algorithm, entry.path())?;
            let manifest_path = relative_slash(object_root, entry.path())?;
            let logical = relative_slash(content_dir, entry.path())?;
            self.state.add_replace(digest.clone(), logical)?;
            if self.object.inventory().manifest.len_digest(&digest) == 0 {
                self.object.inventory_mut().manifest.add(digest, manifest_path)?;
            } else {
                // the bytes already live under the digest's recorded content
                // path; an unmanifested copy must not stay on disk
                fs::remove_file(entry.path()).with_path(entry.path())?;
            }
        }
        Ok(())
    }

    /// discard the stage and its scratch directory
    pub fn abort(self) {}

    /// lazily create the scratch directory; the `stage-` prefix keeps it
    /// clear of version directory names
    fn scratch_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.scratch {
            return Ok(dir.clone());
        }
        let dir = self
            .object
            .path()
            .join(format!("stage-{}", uuid::Uuid::new_v4()));
        fs::DirBuilder::new()
            .mode(self.object.config().dir_mode)
            .create(&dir)
            .with_path(&dir)?;
        self.scratch = Some(dir.clone());
        Ok(dir)
    }

    fn full_path(&self, logical: &str) -> PathBuf {
        match &self.scratch {
            Some(scratch) => scratch.join(logical),
            None => PathBuf::new(),
        }
    }

    fn is_staged(&self, logical: &str) -> bool {
        match &self.scratch {
            Some(scratch) => scratch.join(logical).exists(),
            None => false,
        }
    }
}

impl Drop for Stage<'_> {
    fn drop(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            let _ = fs::remove_dir_all(scratch);
        }
    }
}

fn walk_error(dir: &Path, err: walkdir::Error) -> Error {
    Error::Io {
        path: dir.to_path_buf(),
        source: err.into_io_error().unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "walk error")
        }),
    }
}

/// path of `target` relative to `base`, forward-slash separated
fn relative_slash(base: &Path, target: &Path) -> Result<String> {
    let rel = target.strip_prefix(base).map_err(|_| Error::Io {
        path: target.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not under {}", base.display()),
        ),
    })?;
    Ok(rel.to_string_lossy().into_owned())
}
