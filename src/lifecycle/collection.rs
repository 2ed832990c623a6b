//! Provider/collection classification for the legacy status log.

use std::fmt;
use std::path::Path;

use dashmap::DashMap;

use super::store::{StoreResult, TaskLogStore};
use crate::models::Job;

/// `(provider, collection)` taken from the last two components of `rstar_dir`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    pub provider: String,
    pub collection: String,
}

impl CollectionKey {
    pub fn new(provider: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            collection: collection.into(),
        }
    }

    pub fn from_job(job: &Job) -> Option<Self> {
        job.provider_collection()
            .map(|(provider, collection)| Self::new(provider, collection))
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.collection)
    }
}

/// Content layout of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionType {
    Video,
    Book,
    Photo,
}

impl CollectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Book => "book",
            Self::Photo => "photo",
        }
    }

    /// Inspect `<rstar_dir>/wip/se/<wip_id>/data`: `*_d.mov` is video,
    /// `*_mods.xml` is a book, anything else (including a missing dir) is photo
    pub fn detect(rstar_dir: &Path, wip_id: &str) -> Self {
        let data_dir = rstar_dir.join("wip").join("se").join(wip_id).join("data");
        let names: Vec<String> = match std::fs::read_dir(&data_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                .collect(),
            Err(_) => return Self::Photo,
        };

        if names.iter().any(|name| name.ends_with("_d.mov")) {
            Self::Video
        } else if names.iter().any(|name| name.ends_with("_mods.xml")) {
            Self::Book
        } else {
            Self::Photo
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-process memo of collection ids; entries are never evicted
#[derive(Debug, Default)]
pub struct CollectionCache {
    ids: DashMap<CollectionKey, i64>,
}

impl CollectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached id, or look it up (creating the row on first encounter)
    pub async fn resolve<F>(
        &self,
        key: &CollectionKey,
        store: &dyn TaskLogStore,
        detect: F,
    ) -> StoreResult<i64>
    where
        F: FnOnce() -> CollectionType + Send,
    {
        if let Some(id) = self.ids.get(key) {
            return Ok(*id);
        }
        let id = store.find_or_create_collection(key, detect()).await?;
        self.ids.insert(key.clone(), id);
        tracing::debug!(collection = %key, collection_id = id, "Collection resolved");
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::store::InMemoryJobStore;

    fn layout(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("wip/se/obj1/data");
        std::fs::create_dir_all(&data).unwrap();
        for file in files {
            std::fs::write(data.join(file), b"").unwrap();
        }
        dir
    }

    #[test]
    fn test_detect_types() {
        let video = layout(&["obj1_d.mov", "obj1_mods.xml"]);
        assert_eq!(CollectionType::detect(video.path(), "obj1"), CollectionType::Video);

        let book = layout(&["obj1_mods.xml"]);
        assert_eq!(CollectionType::detect(book.path(), "obj1"), CollectionType::Book);

        let photo = layout(&["obj1_m.tif"]);
        assert_eq!(CollectionType::detect(photo.path(), "obj1"), CollectionType::Photo);

        assert_eq!(
            CollectionType::detect(Path::new("/no/such/rstar"), "obj1"),
            CollectionType::Photo
        );
    }

    #[tokio::test]
    async fn test_cache_memoizes_lookups() {
        let store = InMemoryJobStore::new();
        let cache = CollectionCache::new();
        let key = CollectionKey::new("nyu", "aco");

        let first = cache
            .resolve(&key, &store, || CollectionType::Book)
            .await
            .unwrap();

        store.set_failing(true);
        let second = cache
            .resolve(&key, &store, || panic!("detect should not run for a cached key"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(store.collection(&key), Some((first, CollectionType::Book)));
    }
}
