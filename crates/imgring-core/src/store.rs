//! Bloom-filtered image store.
//!
//! The store is a cache of the image names this node is responsible for,
//! backed by a read-only image directory and a static manifest
//! (`FILELIST.txt`) listing every candidate name. A 64-bit bloom filter with
//! three bit positions per name fast-rejects queries before the record scan.
//!
//! The store is reloaded from the manifest whenever the node's purview
//! changes (a predecessor update or a REID), admitting only names whose
//! folded id falls in `(predecessor.id, self.id]`, up to [`MAX_RECORDS`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::id::{bloom_mask, in_range, name_id};

/// Record capacity of one node's store.
pub const MAX_RECORDS: usize = 1024;

/// Manifest file name, resolved inside the image directory.
pub const MANIFEST: &str = "FILELIST.txt";

/// Outcome of a membership query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// A record matches both id and name.
    Hit,
    /// All three filter bits are set but no record matches.
    FalsePositive,
    /// At least one filter bit is clear; the name was never admitted.
    Miss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageRecord {
    id: u8,
    name: String,
}

/// Local image cache with a bloom-filter front.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    range: (u8, u8),
    filter: u64,
    records: Vec<ImageRecord>,
}

impl ImageStore {
    /// Open a store over `dir` for a lone node (whole-ring purview).
    #[must_use]
    pub fn open(dir: impl Into<PathBuf>, self_id: u8) -> Self {
        let mut store =
            Self { dir: dir.into(), range: (self_id, self_id), filter: 0, records: Vec::new() };
        store.load(self_id, self_id);
        store
    }

    /// Clear and rescan the manifest for names whose id is in `(start, end]`.
    ///
    /// A missing or unreadable manifest leaves the store empty: a node
    /// without local content still routes. Returns the number of records
    /// admitted.
    pub fn load(&mut self, start: u8, end: u8) -> usize {
        self.range = (start, end);
        self.filter = 0;
        self.records.clear();

        let manifest = self.dir.join(MANIFEST);
        let listing = match fs::read_to_string(&manifest) {
            Ok(listing) => listing,
            Err(err) => {
                tracing::warn!(path = %manifest.display(), %err, "manifest unreadable, store empty");
                return 0;
            },
        };

        for name in listing.split_whitespace() {
            if self.records.len() == MAX_RECORDS {
                tracing::warn!("store full at {MAX_RECORDS} records, rest of manifest skipped");
                break;
            }
            let id = name_id(name);
            if in_range(id, start, end) {
                self.admit(id, name);
            }
        }

        tracing::debug!(
            start = self.range.0,
            end = self.range.1,
            records = self.records.len(),
            "store loaded"
        );
        self.records.len()
    }

    /// Query for a name: bloom filter first, then an id+name record match.
    #[must_use]
    pub fn query(&self, name: &str) -> Query {
        let mask = bloom_mask(name);
        if self.filter & mask != mask {
            return Query::Miss;
        }

        let id = name_id(name);
        if self.records.iter().any(|record| record.id == id && record.name == name) {
            Query::Hit
        } else {
            Query::FalsePositive
        }
    }

    /// Admit a name discovered through the ring so later queries hit
    /// locally. The file is expected to exist in the shared image directory;
    /// returns whether the record was stored.
    pub fn cache(&mut self, name: &str) -> bool {
        if self.records.len() == MAX_RECORDS {
            tracing::warn!(name, "store full, image not cached");
            return false;
        }
        self.admit(name_id(name), name)
    }

    /// Path of a named image inside the image directory.
    #[must_use]
    pub fn image_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Image directory this store serves from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of admitted records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no record is admitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn admit(&mut self, id: u8, name: &str) -> bool {
        // A manifest entry without a backing file is skipped, not fatal;
        // queries for it then miss, which is what the client would see anyway.
        if !self.image_path(name).is_file() {
            tracing::warn!(name, "image file missing, not admitted");
            return false;
        }

        self.filter |= bloom_mask(name);
        self.records.push(ImageRecord { id, name: name.to_owned() });
        tracing::debug!(id, name, "image admitted");
        true
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write as _;

    use tempfile::TempDir;

    use super::*;

    /// Image directory with a manifest and an empty file per name.
    fn image_dir(names: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = File::create(dir.path().join(MANIFEST)).unwrap();
        for name in names {
            writeln!(manifest, "{name}").unwrap();
            File::create(dir.path().join(name)).unwrap();
        }
        dir
    }

    /// First name of the form `img-N.tga` whose folded id satisfies `pred`.
    fn name_with_id(pred: impl Fn(u8) -> bool) -> String {
        (0u32..100_000)
            .map(|i| format!("img-{i}.tga"))
            .find(|name| pred(name_id(name)))
            .unwrap_or_else(|| unreachable!("id space exhausted"))
    }

    #[test]
    fn lone_range_admits_everything() {
        let inside = name_with_id(|_| true);
        let dir = image_dir(&[&inside]);

        let store = ImageStore::open(dir.path(), 100);
        assert_eq!(store.len(), 1);
        assert_eq!(store.query(&inside), Query::Hit);
    }

    #[test]
    fn load_respects_purview() {
        let inside = name_with_id(|id| in_range(id, 50, 100));
        let outside = name_with_id(|id| !in_range(id, 50, 100));
        let dir = image_dir(&[&inside, &outside]);

        let mut store = ImageStore::open(dir.path(), 100);
        let admitted = store.load(50, 100);

        assert_eq!(admitted, 1);
        assert_eq!(store.query(&inside), Query::Hit);
        assert_ne!(store.query(&outside), Query::Hit);
    }

    #[test]
    fn empty_filter_misses() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path(), 0);

        assert!(store.is_empty());
        assert_eq!(store.query("anything.tga"), Query::Miss);
    }

    #[test]
    fn cache_makes_later_queries_hit() {
        let name = name_with_id(|_| true);
        let dir = image_dir(&[]);
        File::create(dir.path().join(&name)).unwrap();

        let mut store = ImageStore::open(dir.path(), 0);
        assert_eq!(store.query(&name), Query::Miss);
        assert!(store.cache(&name));
        assert_eq!(store.query(&name), Query::Hit);
    }

    #[test]
    fn missing_file_is_not_admitted() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = File::create(dir.path().join(MANIFEST)).unwrap();
        writeln!(manifest, "ghost.tga").unwrap();

        let store = ImageStore::open(dir.path(), 0);
        assert!(store.is_empty());
        assert_eq!(store.query("ghost.tga"), Query::Miss);
    }

    #[test]
    fn dense_filter_reports_false_positive() {
        // Saturate the 64-bit filter with a few hundred names, then look for
        // an absent name whose three bits all collide. SHA-1 is fixed, so
        // the search is deterministic; with ~600 bits drawn the filter is
        // dense enough that some probe in the range must alias.
        let names: Vec<String> = (0u32..200).map(|i| format!("fill-{i}.tga")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let dir = image_dir(&refs);

        let store = ImageStore::open(dir.path(), 0);
        assert_eq!(store.len(), 200);

        let aliased = (0u32..10_000)
            .map(|i| format!("absent-{i}.tga"))
            .find(|name| store.query(name) == Query::FalsePositive);
        assert!(aliased.is_some(), "no aliasing probe found in 10k candidates");
    }
}
