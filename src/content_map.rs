use std::collections::{BTreeMap, BTreeSet};

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{Error, Result};

/// bidirectional mapping between digests and sets of relative paths
///
/// every path is bound under at most one digest. iteration order is stable:
/// digests ascending, paths within a digest ascending, so serialized forms
/// diff deterministically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentMap {
    digests: BTreeMap<Digest, BTreeSet<String>>,
    paths: BTreeMap<String, Digest>,
}

/// check a forward-slash relative path: non-empty, no leading slash,
/// no empty, `.`, or `..` components
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }
    for part in path.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return Err(Error::InvalidPath(path.to_string()));
        }
    }
    Ok(())
}

impl ContentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// bind path to digest
    ///
    /// adding an existing (digest, path) pair is a no-op; binding a path
    /// already held by a different digest fails with `PathCollision`.
    pub fn add(&mut self, digest: Digest, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        validate_path(&path)?;
        match self.paths.get(&path) {
            Some(existing) if *existing == digest => Ok(()),
            Some(_) => Err(Error::PathCollision(path)),
            None => {
                self.digests
                    .entry(digest.clone())
                    .or_default()
                    .insert(path.clone());
                self.paths.insert(path, digest);
                Ok(())
            }
        }
    }

    /// bind path to digest, replacing any prior binding
    pub fn add_replace(&mut self, digest: Digest, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        validate_path(&path)?;
        self.unbind(&path);
        self.digests
            .entry(digest.clone())
            .or_default()
            .insert(path.clone());
        self.paths.insert(path, digest);
        Ok(())
    }

    /// remove path, returning the digest it was bound to
    pub fn remove(&mut self, path: &str) -> Result<Digest> {
        self.unbind(path).ok_or_else(|| Error::PathNotFound(path.to_string()))
    }

    /// move the binding at src to dst
    ///
    /// fails if src is absent or dst is already bound; on failure nothing
    /// changes.
    pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
        validate_path(dst)?;
        if self.paths.contains_key(dst) {
            return Err(Error::PathCollision(dst.to_string()));
        }
        let digest = self.remove(src)?;
        self.add(digest, dst)
    }

    /// digest bound to path, if any
    pub fn digest_for(&self, path: &str) -> Option<&Digest> {
        self.paths.get(path)
    }

    /// paths bound to digest, ascending
    pub fn paths_for(&self, digest: &Digest) -> impl Iterator<Item = &str> {
        self.digests
            .get(digest)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// number of paths bound to digest
    pub fn len_digest(&self, digest: &Digest) -> usize {
        self.digests.get(digest).map_or(0, BTreeSet::len)
    }

    /// distinct digests, ascending
    pub fn digests(&self) -> impl Iterator<Item = &Digest> {
        self.digests.keys()
    }

    /// all (digest, path) pairs: digests ascending, paths within a digest
    /// ascending
    pub fn iter(&self) -> impl Iterator<Item = (&Digest, &str)> {
        self.digests
            .iter()
            .flat_map(|(digest, paths)| paths.iter().map(move |p| (digest, p.as_str())))
    }

    /// all (path, digest) pairs, paths ascending
    pub fn paths(&self) -> impl Iterator<Item = (&str, &Digest)> {
        self.paths.iter().map(|(p, d)| (p.as_str(), d))
    }

    /// number of bound paths
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn unbind(&mut self, path: &str) -> Option<Digest> {
        let digest = self.paths.remove(path)?;
        if let Some(set) = self.digests.get_mut(&digest) {
            set.remove(path);
            if set.is_empty() {
                self.digests.remove(&digest);
            }
        }
        Some(digest)
    }
}

impl Serialize for ContentMap {
    /// emitted as `{ "<digest>": ["path", ...], ... }`, both levels sorted
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.digests.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentMap {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = BTreeMap::<Digest, Vec<String>>::deserialize(deserializer)?;
        let mut map = ContentMap::new();
        for (digest, paths) in raw {
            for path in paths {
                map.add(digest.clone(), path).map_err(D::Error::custom)?;
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(s: &str) -> Digest {
        Digest::new(s)
    }

    #[test]
    fn test_add_and_lookup() {
        let mut map = ContentMap::new();
        map.add(digest("aa"), "v1/content/a.txt").unwrap();

        assert_eq!(map.digest_for("v1/content/a.txt"), Some(&digest("aa")));
        assert_eq!(map.len_digest(&digest("aa")), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_add_same_pair_is_noop() {
        let mut map = ContentMap::new();
        map.add(digest("aa"), "a.txt").unwrap();
        map.add(digest("aa"), "a.txt").unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_add_collision() {
        let mut map = ContentMap::new();
        map.add(digest("aa"), "a.txt").unwrap();
        let result = map.add(digest("bb"), "a.txt");
        assert!(matches!(result, Err(Error::PathCollision(_))));
        // original binding untouched
        assert_eq!(map.digest_for("a.txt"), Some(&digest("aa")));
    }

    #[test]
    fn test_add_replace_rebinds() {
        let mut map = ContentMap::new();
        map.add(digest("aa"), "a.txt").unwrap();
        map.add_replace(digest("bb"), "a.txt").unwrap();

        assert_eq!(map.digest_for("a.txt"), Some(&digest("bb")));
        // the emptied digest entry is dropped
        assert_eq!(map.len_digest(&digest("aa")), 0);
        assert_eq!(map.digests().count(), 1);
    }

    #[test]
    fn test_remove_returns_digest() {
        let mut map = ContentMap::new();
        map.add(digest("aa"), "a.txt").unwrap();

        assert_eq!(map.remove("a.txt").unwrap(), digest("aa"));
        assert!(map.is_empty());
        assert!(matches!(map.remove("a.txt"), Err(Error::PathNotFound(_))));
    }

    #[test]
    fn test_rename() {
        let mut map = ContentMap::new();
        map.add(digest("aa"), "a.txt").unwrap();
        map.add(digest("bb"), "b.txt").unwrap();

        map.rename("a.txt", "c.txt").unwrap();
        assert_eq!(map.digest_for("c.txt"), Some(&digest("aa")));
        assert!(map.digest_for("a.txt").is_none());

        // dst occupied
        assert!(matches!(
            map.rename("c.txt", "b.txt"),
            Err(Error::PathCollision(_))
        ));
        // src absent
        assert!(matches!(
            map.rename("missing", "d.txt"),
            Err(Error::PathNotFound(_))
        ));
        // failed renames leave the map unchanged
        assert_eq!(map.digest_for("c.txt"), Some(&digest("aa")));
    }

    #[test]
    fn test_path_validation() {
        let mut map = ContentMap::new();
        for bad in ["", "/abs", "a//b", "a/./b", "a/../b", "a/"] {
            assert!(
                matches!(map.add(digest("aa"), bad), Err(Error::InvalidPath(_))),
                "expected {:?} to be rejected",
                bad
            );
        }
        map.add(digest("aa"), "ok/nested/path.txt").unwrap();
    }

    #[test]
    fn test_iterate_stable_order() {
        let mut map = ContentMap::new();
        map.add(digest("bb"), "z.txt").unwrap();
        map.add(digest("bb"), "a.txt").unwrap();
        map.add(digest("aa"), "m.txt").unwrap();

        let pairs: Vec<_> = map
            .iter()
            .map(|(d, p)| (d.as_str().to_string(), p.to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("aa".to_string(), "m.txt".to_string()),
                ("bb".to_string(), "a.txt".to_string()),
                ("bb".to_string(), "z.txt".to_string()),
            ]
        );
    }

    #[test]
    fn test_copy_is_deep() {
        let mut map = ContentMap::new();
        map.add(digest("aa"), "a.txt").unwrap();

        let copy = map.clone();
        map.add_replace(digest("bb"), "a.txt").unwrap();

        assert_eq!(copy.digest_for("a.txt"), Some(&digest("aa")));
    }

    #[test]
    fn test_serde_shape_and_roundtrip() {
        let mut map = ContentMap::new();
        map.add(digest("aa"), "v1/content/b.txt").unwrap();
        map.add(digest("aa"), "v1/content/a.txt").unwrap();

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"aa":["v1/content/a.txt","v1/content/b.txt"]}"#);

        let parsed: ContentMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, parsed);
    }

    #[test]
    fn test_deserialize_rejects_colliding_paths() {
        let json = r#"{"aa":["x.txt"],"bb":["x.txt"]}"#;
        let result: std::result::Result<ContentMap, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
