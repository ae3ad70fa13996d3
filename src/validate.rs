//! streaming object validation
//!
//! [`Object::validate`] runs every check on a background thread and streams
//! errors over a bounded channel: declaration, inventory structure, version
//! directories, manifest checksums, fixity checksums. the stream closes when
//! validation finishes or the cancellation token fires; a cancellation that
//! interrupts the stream is marked with one terminal [`Error::Canceled`].

use std::path::Path;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use walkdir::WalkDir;

use crate::content_map::ContentMap;
use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::object::{list_version_dirs, read_declaration, read_inventory, Object};
use crate::pipeline::{Cancel, ChecksumJob, Digester};

/// small capacity so emission backpressures on a slow consumer
const ERROR_STREAM_CAPACITY: usize = 1;

impl Object {
    /// stream validation errors against the loaded inventory
    ///
    /// the returned channel yields every error found until the stream ends
    /// or `cancel` fires. errors are unordered across files.
    pub fn validate(&self, cancel: &Cancel) -> Receiver<Error> {
        let (tx, rx) = bounded(ERROR_STREAM_CAPACITY);
        let root = self.path().to_path_buf();
        let inventory = self.inventory().clone();
        let emitter = Emitter {
            tx,
            cancel: cancel.clone(),
        };
        thread::spawn(move || {
            run(&root, &inventory, &emitter);
            emitter.finish();
        });
        rx
    }
}

/// validate the object at path, returning only the first error found
pub fn validate_object(path: &Path) -> Result<()> {
    let object = Object::open(path)?;
    let cancel = Cancel::new();
    let errors = object.validate(&cancel);

    let first = errors.recv().ok();
    cancel.cancel();
    // drain so the validation thread is never left blocked on a send
    for _ in errors {}

    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct Emitter {
    tx: Sender<Error>,
    cancel: Cancel,
}

impl Emitter {
    /// deliver one error; false once canceled or the consumer is gone
    fn emit(&self, err: Error) -> bool {
        if self.cancel.is_canceled() {
            return false;
        }
        self.tx.send(err).is_ok()
    }

    fn canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    /// terminal marker for a stream cut short by cancellation; best effort
    /// because the consumer may already be gone
    fn finish(self) {
        if self.cancel.is_canceled() {
            let _ = self.tx.try_send(Error::Canceled);
        }
    }
}

fn run(root: &Path, inventory: &Inventory, emitter: &Emitter) {
    // declaration
    if let Err(err) = read_declaration(root) {
        if !emitter.emit(err) {
            return;
        }
    }

    // root inventory structure; checksum phases can't be trusted past a
    // structurally broken inventory
    let structure = inventory.structure_errors();
    let broken = !structure.is_empty();
    for err in structure {
        if !emitter.emit(err) {
            return;
        }
    }
    if broken {
        return;
    }

    // version directories
    let dirs = match list_version_dirs(root) {
        Ok(dirs) => dirs,
        Err(err) => {
            emitter.emit(err);
            return;
        }
    };
    for dir in dirs {
        if !validate_version_dir(root, inventory, &dir, emitter) {
            return;
        }
    }

    // manifest checksums
    if !validate_checksums(root, &inventory.manifest, inventory.digest_algorithm, emitter) {
        return;
    }

    // fixity checksums
    for (algorithm, map) in &inventory.fixity {
        if !validate_checksums(root, map, *algorithm, emitter) {
            return;
        }
    }
}

/// check one version directory: inventory snapshot consistency and content
/// membership in the root manifest
fn validate_version_dir(
    root: &Path,
    inventory: &Inventory,
    version: &str,
    emitter: &Emitter,
) -> bool {
    match read_inventory(&root.join(version)) {
        Err(Error::MissingInventory) => {
            tracing::warn!(version, "version has no inventory snapshot");
        }
        Err(err) => {
            if !emitter.emit(err) {
                return false;
            }
        }
        Ok(snapshot) => {
            for err in snapshot.structure_errors() {
                if !emitter.emit(err) {
                    return false;
                }
            }
        }
    }

    let content_dir = root.join(version).join(&inventory.content_directory);
    if !content_dir.is_dir() {
        // a version need not add content
        return true;
    }
    for entry in WalkDir::new(&content_dir) {
        if emitter.canceled() {
            return false;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if !emitter.emit(walk_error(&content_dir, err)) {
                    return false;
                }
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy();
        if inventory.manifest.digest_for(&rel).is_none()
            && !emitter.emit(Error::ContentNotInManifest(rel.into_owned()))
        {
            return false;
        }
    }
    true
}

/// stream every (digest, path) entry through the digester pool and emit
/// mismatches and read failures
fn validate_checksums(
    root: &Path,
    map: &ContentMap,
    algorithm: DigestAlgorithm,
    emitter: &Emitter,
) -> bool {
    let digester = Digester::spawn_default(&emitter.cancel);
    let jobs = digester.sender();
    let results = digester.finish();

    let entries: Vec<ChecksumJob> = map
        .iter()
        .map(|(digest, path)| ChecksumJob {
            path: root.join(path),
            algorithm,
            expected: Some(digest.clone()),
        })
        .collect();
    let feeder = thread::spawn(move || {
        for job in entries {
            if jobs.send(job).is_err() {
                break;
            }
        }
    });

    let mut alive = true;
    for result in results {
        if !alive {
            // keep draining so workers can exit
            continue;
        }
        let err = match result.computed {
            Err(Error::Canceled) => continue,
            Err(err) => Some(err),
            Ok(computed) => match result.expected {
                Some(expected) if computed != expected => {
                    let path = result
                        .path
                        .strip_prefix(root)
                        .unwrap_or(&result.path)
                        .to_string_lossy()
                        .into_owned();
                    Some(Error::ChecksumMismatch {
                        path,
                        expected,
                        computed,
                    })
                }
                _ => None,
            },
        };
        if let Some(err) = err {
            alive = emitter.emit(err);
        }
    }
    let _ = feeder.join();

    alive && !emitter.canceled()
}

fn walk_error(dir: &Path, err: walkdir::Error) -> Error {
    Error::Io {
        path: dir.to_path_buf(),
        source: err.into_io_error().unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "walk error")
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;
    use crate::inventory::User;
    use crate::object::{Config, OBJECT_DECLARATION_FILE};
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn committed_object(files: &[(&str, &[u8])]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let root = dir.path().join("obj");
        let mut object = Object::init(&root, "urn:example:obj", Config::default()).unwrap();

        let mut stage = object.stage().unwrap();
        for (name, content) in files {
            stage.open_file(name).unwrap().write_all(content).unwrap();
        }
        stage
            .commit(User::new("Alice", "mailto:alice@example.org"), "init")
            .unwrap();
        (dir, root)
    }

    fn collect_errors(root: &Path) -> Vec<Error> {
        let object = Object::open(root).unwrap();
        let cancel = Cancel::new();
        object.validate(&cancel).into_iter().collect()
    }

    #[test]
    fn test_clean_object_validates() {
        let (_dir, root) = committed_object(&[("a.txt", b"hello"), ("b.txt", b"world")]);
        validate_object(&root).unwrap();
        assert!(collect_errors(&root).is_empty());
    }

    #[test]
    fn test_tampered_content_fails_checksum() {
        let (_dir, root) = committed_object(&[("a.txt", b"hello")]);
        fs::write(root.join("v1/content/a.txt"), b"HELLO").unwrap();

        let errors = collect_errors(&root);
        assert!(errors
            .iter()
            .any(|e| matches!(e, Error::ChecksumMismatch { path, .. } if path == "v1/content/a.txt")));

        assert!(matches!(
            validate_object(&root),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_deleted_declaration_detected() {
        let (_dir, root) = committed_object(&[("a.txt", b"hello")]);
        let object = Object::open(&root).unwrap();
        fs::remove_file(root.join(OBJECT_DECLARATION_FILE)).unwrap();

        let cancel = Cancel::new();
        let errors: Vec<Error> = object.validate(&cancel).into_iter().collect();
        assert!(errors
            .iter()
            .any(|e| matches!(e, Error::MissingDeclaration)));
    }

    #[test]
    fn test_unmanifested_content_flagged() {
        let (_dir, root) = committed_object(&[("a.txt", b"hello")]);
        fs::write(root.join("v1/content/sneaky.txt"), b"planted").unwrap();

        let errors = collect_errors(&root);
        assert!(errors.iter().any(
            |e| matches!(e, Error::ContentNotInManifest(p) if p == "v1/content/sneaky.txt")
        ));
    }

    #[test]
    fn test_structural_error_stops_stream() {
        let (_dir, root) = committed_object(&[("a.txt", b"hello")]);

        // republish the root inventory with a head pointing past the end
        let object = Object::open(&root).unwrap();
        let mut inventory = object.inventory().clone();
        inventory.head = "v2".to_string();
        inventory.write_to(&root).unwrap();

        let errors = collect_errors(&root);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::HeadMismatch { .. }));
    }

    #[test]
    fn test_missing_snapshot_inventory_is_only_a_warning() {
        let (_dir, root) = committed_object(&[("a.txt", b"hello")]);
        fs::remove_file(root.join("v1/inventory.json")).unwrap();
        validate_object(&root).unwrap();
    }

    #[test]
    fn test_inconsistent_snapshot_inventory_is_an_error() {
        let (_dir, root) = committed_object(&[("a.txt", b"hello")]);

        let object = Object::open(&root).unwrap();
        let mut snapshot = object.inventory().clone();
        snapshot.id = String::new();
        snapshot.write_to(&root.join("v1")).unwrap();

        let errors = collect_errors(&root);
        assert!(errors
            .iter()
            .any(|e| matches!(e, Error::InventoryIdMissing)));
    }

    #[test]
    fn test_bad_fixity_digest_flagged() {
        let (_dir, root) = committed_object(&[("a.txt", b"hello")]);

        let object = Object::open(&root).unwrap();
        let mut inventory = object.inventory().clone();
        let content_path = "v1/content/a.txt".to_string();
        let mut fixity = ContentMap::new();
        fixity
            .add(Digest::new("00ff00ff00ff00ff00ff00ff00ff00ff"), &content_path)
            .unwrap();
        inventory.fixity.insert(DigestAlgorithm::Md5, fixity);
        inventory.write_to(&root).unwrap();
        inventory.write_to(&root.join("v1")).unwrap();

        let errors = collect_errors(&root);
        assert!(errors
            .iter()
            .any(|e| matches!(e, Error::ChecksumMismatch { path, .. } if path == &content_path)));
    }

    #[test]
    fn test_cancellation_closes_stream() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("obj");
        let mut object = Object::init(&root, "urn:example:obj", Config::default()).unwrap();

        let mut stage = object.stage().unwrap();
        for i in 0..64 {
            stage
                .open_file(&format!("f{}.txt", i))
                .unwrap()
                .write_all(format!("content {}", i).as_bytes())
                .unwrap();
        }
        stage
            .commit(User::new("Alice", "mailto:alice@example.org"), "bulk")
            .unwrap();

        // tamper with everything so errors keep flowing
        for i in 0..64 {
            fs::write(
                root.join(format!("v1/content/f{}.txt", i)),
                b"tampered",
            )
            .unwrap();
        }

        let object = Object::open(&root).unwrap();
        let cancel = Cancel::new();
        let errors = object.validate(&cancel);

        errors.recv().unwrap();
        cancel.cancel();

        // the stream must close; whatever is still in flight is bounded
        let rest: Vec<Error> = errors.into_iter().collect();
        assert!(rest.len() < 64);
    }

    #[test]
    fn test_validate_object_first_error_only() {
        let (_dir, root) = committed_object(&[("a.txt", b"hello"), ("b.txt", b"world")]);
        fs::write(root.join("v1/content/a.txt"), b"bad").unwrap();
        fs::write(root.join("v1/content/b.txt"), b"bad").unwrap();

        // exactly one error comes back even though two files are broken
        assert!(validate_object(&root).is_err());
    }
}
