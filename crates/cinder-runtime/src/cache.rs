use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Compiled module held by the runtime host between hot updates.
#[derive(Debug, Clone)]
pub struct ModuleCacheEntry {
    pub code: String,
    pub deps: Vec<String>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, ModuleCacheEntry>,
    /// Reverse edges: module id -> ids of cached modules that import it.
    importers: HashMap<String, HashSet<String>>,
}

/// Module cache with transitive ancestor invalidation. A single mutex
/// guards entries and edges together, so an invalidation is atomic with
/// respect to concurrent dispatch cold paths: no reader ever observes a
/// half-evicted graph.
#[derive(Default)]
pub struct ModuleCache {
    inner: Mutex<CacheInner>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ModuleCacheEntry> {
        self.lock().entries.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Insert a module and record an importer edge for each of its deps.
    /// Re-inserting replaces the entry and its outgoing edges.
    pub fn insert(&self, id: &str, entry: ModuleCacheEntry) {
        let mut inner = self.lock();
        let old_deps = inner.entries.get(id).map(|old| old.deps.clone());
        if let Some(old_deps) = old_deps {
            for dep in old_deps {
                remove_edge(&mut inner.importers, &dep, id);
            }
        }
        for dep in &entry.deps {
            inner
                .importers
                .entry(dep.clone())
                .or_default()
                .insert(id.to_string());
        }
        inner.entries.insert(id.to_string(), entry);
    }

    /// Evict the changed modules and every transitive importer of them.
    /// Ancestors only: modules the changed ones import stay cached.
    /// Returns the number of entries actually removed.
    pub fn invalidate(&self, changed: &[String]) -> usize {
        let mut inner = self.lock();

        let mut affected: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for id in changed {
            if affected.insert(id.clone()) {
                queue.push_back(id.clone());
            }
        }
        while let Some(id) = queue.pop_front() {
            if let Some(importers) = inner.importers.get(&id) {
                for importer in importers {
                    if affected.insert(importer.clone()) {
                        queue.push_back(importer.clone());
                    }
                }
            }
        }

        let mut evicted = 0;
        for id in &affected {
            if let Some(entry) = inner.entries.remove(id) {
                evicted += 1;
                for dep in entry.deps {
                    remove_edge(&mut inner.importers, &dep, id);
                }
            }
            inner.importers.remove(id);
        }
        evicted
    }

    /// Drop everything (full-reload events and worker set replacement).
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let evicted = inner.entries.len();
        inner.entries.clear();
        inner.importers.clear();
        evicted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn remove_edge(importers: &mut HashMap<String, HashSet<String>>, dep: &str, importer: &str) {
    if let Some(set) = importers.get_mut(dep) {
        set.remove(importer);
        if set.is_empty() {
            importers.remove(dep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(code: &str, deps: &[&str]) -> ModuleCacheEntry {
        ModuleCacheEntry {
            code: code.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn ids(changed: &[&str]) -> Vec<String> {
        changed.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_invalidate_walks_importer_chain() {
        let cache = ModuleCache::new();
        // entry -> page -> leaf
        cache.insert("/entry.js", entry("e", &["/page.js"]));
        cache.insert("/page.js", entry("p", &["/leaf.js"]));
        cache.insert("/leaf.js", entry("l", &[]));

        let evicted = cache.invalidate(&ids(&["/leaf.js"]));
        assert_eq!(evicted, 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_leaves_descendants_cached() {
        let cache = ModuleCache::new();
        cache.insert("/entry.js", entry("e", &["/page.js"]));
        cache.insert("/page.js", entry("p", &["/leaf.js"]));
        cache.insert("/leaf.js", entry("l", &[]));

        let evicted = cache.invalidate(&ids(&["/page.js"]));
        assert_eq!(evicted, 2);
        assert!(!cache.contains("/entry.js"));
        assert!(!cache.contains("/page.js"));
        assert!(cache.contains("/leaf.js"));
    }

    #[test]
    fn test_diamond_dependency_evicted_once() {
        let cache = ModuleCache::new();
        // entry imports a and b, both import shared
        cache.insert("/entry.js", entry("e", &["/a.js", "/b.js"]));
        cache.insert("/a.js", entry("a", &["/shared.js"]));
        cache.insert("/b.js", entry("b", &["/shared.js"]));
        cache.insert("/shared.js", entry("s", &[]));

        let evicted = cache.invalidate(&ids(&["/shared.js"]));
        assert_eq!(evicted, 4);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unrelated_modules_untouched() {
        let cache = ModuleCache::new();
        cache.insert("/entry.js", entry("e", &["/page.js"]));
        cache.insert("/page.js", entry("p", &[]));
        cache.insert("/other.js", entry("o", &[]));

        let evicted = cache.invalidate(&ids(&["/page.js"]));
        assert_eq!(evicted, 2);
        assert!(cache.contains("/other.js"));
    }

    #[test]
    fn test_invalidate_uncached_id_is_noop() {
        let cache = ModuleCache::new();
        cache.insert("/entry.js", entry("e", &[]));
        let evicted = cache.invalidate(&ids(&["/ghost.js"]));
        assert_eq!(evicted, 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_reinsert_replaces_edges() {
        let cache = ModuleCache::new();
        cache.insert("/entry.js", entry("e", &["/old.js"]));
        cache.insert("/old.js", entry("o", &[]));
        cache.insert("/new.js", entry("n", &[]));

        // entry now imports new.js instead of old.js
        cache.insert("/entry.js", entry("e2", &["/new.js"]));

        // changing old.js no longer reaches entry
        let evicted = cache.invalidate(&ids(&["/old.js"]));
        assert_eq!(evicted, 1);
        assert!(cache.contains("/entry.js"));

        let evicted = cache.invalidate(&ids(&["/new.js"]));
        assert_eq!(evicted, 2);
        assert!(!cache.contains("/entry.js"));
    }

    #[test]
    fn test_clear_reports_count() {
        let cache = ModuleCache::new();
        cache.insert("/a.js", entry("a", &[]));
        cache.insert("/b.js", entry("b", &[]));
        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }
}
