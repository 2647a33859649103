use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe in-memory cache mapping page slug -> page id.
///
/// Backed by a DashMap so reads are concurrent and lock-free for most cases.
/// The cache is warmed on startup by loading all page slugs from the
/// database, then kept in sync via explicit insert/remove calls from the
/// handlers after every write operation. Link rows themselves are always
/// read fresh so schedule and test state are never stale.
#[derive(Clone, Debug)]
pub struct PageCache {
    inner: Arc<DashMap<String, i64>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Insert or update a mapping.
    pub fn set(&self, slug: impl Into<String>, page_id: i64) {
        self.inner.insert(slug.into(), page_id);
    }

    /// Look up a slug. Returns the page id if present.
    pub fn get(&self, slug: &str) -> Option<i64> {
        self.inner.get(slug).map(|v| *v)
    }

    /// Remove a mapping (e.g. when a page is deleted).
    #[allow(dead_code)]
    pub fn remove(&self, slug: &str) {
        self.inner.remove(slug);
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}
