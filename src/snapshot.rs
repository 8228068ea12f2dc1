//! Snapshots of artifact storage state
//!
//! A [`Snapshot`] captures everything a storage driver can see at one
//! instant. Snapshots are value types: once produced they are never
//! mutated, and the directed [`Snapshot::delta`] between two of them is
//! pure and deterministic.
//!
//! A [`SnapshotSet`] groups the snapshots of every configured store for
//! one watcher tick, preserving store declaration order. That order is
//! load-bearing: the persisted state is validated positionally against
//! the configured store list when it is loaded back.

use std::collections::{btree_map, BTreeMap};
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::run::Artifact;

/// Map from artifact identity (path or URI) to its observed state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot(BTreeMap<String, Artifact>);

impl Snapshot {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Record an artifact under its own path.
    pub fn insert(&mut self, artifact: Artifact) {
        self.0.insert(artifact.path.clone(), artifact);
    }

    pub fn get(&self, path: &str) -> Option<&Artifact> {
        self.0.get(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All artifacts in deterministic (path) order.
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.0.values().cloned().collect()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Artifact> {
        self.0.iter()
    }

    /// Directed delta between `self` (earlier) and `post` (later): the
    /// artifacts of `post` that were created or modified in between.
    ///
    /// An artifact is included when its path is unknown to `self`, when
    /// its modification time differs, or when a checksum algorithm
    /// present on both sides disagrees. Algorithms present only in
    /// `post` do not by themselves cause inclusion, and removed paths
    /// never appear.
    pub fn delta(&self, post: &Snapshot) -> Vec<Artifact> {
        let mut results = Vec::new();
        for (path, artifact) in &post.0 {
            let Some(pre) = self.0.get(path) else {
                results.push(artifact.clone());
                continue;
            };

            if pre.time != artifact.time {
                results.push(artifact.clone());
                continue;
            }

            for (algo, value) in &pre.checksum {
                if let Some(post_value) = artifact.checksum.get(algo) {
                    if post_value != value {
                        results.push(artifact.clone());
                        break;
                    }
                }
            }
        }
        results
    }
}

impl FromIterator<Artifact> for Snapshot {
    fn from_iter<T: IntoIterator<Item = Artifact>>(iter: T) -> Self {
        let mut snap = Snapshot::new();
        for artifact in iter {
            snap.insert(artifact);
        }
        snap
    }
}

/// The snapshots of every configured store at one tick, in store
/// declaration order.
///
/// Serializes as a JSON object whose key order is the insertion order.
/// A plain map would erase that order and break the positional
/// validation applied when state files are loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSet {
    entries: Vec<(String, Snapshot)>,
}

impl SnapshotSet {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a store's snapshot. Spec URLs are expected to be unique;
    /// a repeated URL replaces the earlier entry in place.
    pub fn insert(&mut self, spec_url: &str, snapshot: Snapshot) {
        if let Some(entry) = self.entries.iter_mut().find(|(url, _)| url == spec_url) {
            entry.1 = snapshot;
        } else {
            self.entries.push((spec_url.to_string(), snapshot));
        }
    }

    pub fn get(&self, spec_url: &str) -> Option<&Snapshot> {
        self.entries
            .iter()
            .find(|(url, _)| url == spec_url)
            .map(|(_, snap)| snap)
    }

    /// Store spec URLs in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(url, _)| url.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for SnapshotSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (url, snap) in &self.entries {
            map.serialize_entry(url, snap)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SnapshotSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SetVisitor;

        impl<'de> Visitor<'de> for SetVisitor {
            type Value = SnapshotSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of store spec URLs to snapshots")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut set = SnapshotSet::new();
                while let Some((url, snap)) = access.next_entry::<String, Snapshot>()? {
                    if set.get(&url).is_some() {
                        return Err(de::Error::custom(format!(
                            "duplicate store spec URL {url} in snapshot set"
                        )));
                    }
                    set.insert(&url, snap);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(SetVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::Artifact;

    fn artifact(path: &str, sha: &str, time: Option<&str>) -> Artifact {
        let mut a = Artifact::with_checksum(path, "SHA256", sha);
        a.time = time.map(|t| t.parse().unwrap());
        a
    }

    #[test]
    fn test_delta_of_empty_snapshots_is_empty() {
        let pre = Snapshot::new();
        let post = Snapshot::new();
        assert!(pre.delta(&post).is_empty());
    }

    #[test]
    fn test_delta_is_empty_against_self() {
        let snap: Snapshot = [
            artifact("a.txt", "aa", Some("2024-01-01T00:00:00Z")),
            artifact("b.txt", "bb", None),
        ]
        .into_iter()
        .collect();
        assert!(snap.delta(&snap).is_empty());
    }

    #[test]
    fn test_delta_includes_added_file() {
        let pre = Snapshot::new();
        let post: Snapshot = [artifact("test.txt", "c71d", Some("2024-01-01T00:00:00Z"))]
            .into_iter()
            .collect();
        let delta = pre.delta(&post);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].path, "test.txt");
    }

    #[test]
    fn test_delta_includes_time_only_change() {
        let pre: Snapshot = [artifact("test.txt", "c71d", Some("2024-01-01T00:00:00Z"))]
            .into_iter()
            .collect();
        let post: Snapshot = [artifact("test.txt", "c71d", Some("2024-01-01T00:00:05Z"))]
            .into_iter()
            .collect();
        assert_eq!(pre.delta(&post).len(), 1);
    }

    #[test]
    fn test_delta_includes_checksum_change_same_time() {
        let pre: Snapshot = [artifact("test.txt", "c71d", Some("2024-01-01T00:00:00Z"))]
            .into_iter()
            .collect();
        let post: Snapshot = [artifact("test.txt", "25b8", Some("2024-01-01T00:00:00Z"))]
            .into_iter()
            .collect();
        assert_eq!(pre.delta(&post).len(), 1);
    }

    #[test]
    fn test_delta_ignores_removed_files() {
        let pre: Snapshot = [
            artifact("keep.txt", "aa", None),
            artifact("gone.txt", "bb", None),
        ]
        .into_iter()
        .collect();
        let post: Snapshot = [artifact("keep.txt", "aa", None)].into_iter().collect();
        assert!(pre.delta(&post).is_empty());
    }

    #[test]
    fn test_delta_ignores_algorithms_only_in_post() {
        let pre: Snapshot = [artifact("f", "aa", None)].into_iter().collect();
        let mut changed = artifact("f", "aa", None);
        changed
            .checksum
            .insert("SHA512".to_string(), "ffff".to_string());
        let post: Snapshot = [changed].into_iter().collect();
        // SHA256 agrees; the extra SHA512 alone does not mark a change.
        assert!(pre.delta(&post).is_empty());
    }

    #[test]
    fn test_snapshot_set_preserves_insertion_order() {
        let mut set = SnapshotSet::new();
        set.insert("gs://zeta/", Snapshot::new());
        set.insert("file:///alpha", Snapshot::new());
        let keys: Vec<_> = set.keys().collect();
        assert_eq!(keys, vec!["gs://zeta/", "file:///alpha"]);
    }

    #[test]
    fn test_snapshot_set_round_trip_keeps_order() {
        let mut set = SnapshotSet::new();
        set.insert("gs://zeta/", [artifact("gs://zeta/x", "aa", None)].into_iter().collect());
        set.insert("file:///alpha", Snapshot::new());

        let json = serde_json::to_string_pretty(&set).unwrap();
        let back: SnapshotSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        let keys: Vec<_> = back.keys().collect();
        assert_eq!(keys, vec!["gs://zeta/", "file:///alpha"]);
    }
}
