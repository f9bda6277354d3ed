//! Scope-tagged storage for generated mesh data.
//!
//! This module keeps deformed instance meshes and the origin vertex arrays
//! they are generated from, so unchanged sources are not cloned on every
//! dispatch.
//!
//! # Features
//! - Strongly typed keys ([`ContainerKey`]: object + mesh + variant)
//! - Every entry tagged with the [`ScopeId`] that owns it
//! - Every entry stamped with the revision of the container it was built
//!   from, so a replaced source mesh is never served stale
//! - Cache hit/miss statistics for diagnostics
//! - Memory estimation for monitoring
//!
//! Entries are only evicted by [`ResourceCache::on_scope_teardown`] (or
//! explicitly when an object unregisters or drops a container); there is no
//! size cap. A miss regenerates the entry from the container's origin mesh.
//!
//! # Example
//! ```ignore
//! let mut cache = ResourceCache::default();
//! let origin = cache.origin_vertices(key, scope, revision, false, || mesh.points().collect());
//! let instance = cache.instance_mut_or_insert(key, scope, revision, &mesh);
//! assert_eq!(cache.on_scope_teardown(scope), 2);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geom::{GeomMesh, Point3};
use crate::object::{MeshId, ObjectId};

/// Host lifetime (level, document, ...) that owns cached buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ScopeId(pub u64);

/// Identity of one mesh container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerKey {
    pub object: ObjectId,
    pub mesh: MeshId,
    pub variant: u32,
}

impl ContainerKey {
    #[must_use]
    pub const fn new(object: ObjectId, mesh: MeshId, variant: u32) -> Self {
        Self {
            object,
            mesh,
            variant,
        }
    }
}

/// Shared buffer for origin vertices (avoids cloning on every access).
pub type SharedPoints = Arc<Vec<Point3>>;

#[derive(Debug, Clone)]
struct Tagged<T> {
    scope: ScopeId,
    /// Revision of the container the value was built from.
    revision: u64,
    value: T,
}

#[derive(Debug, Default)]
pub struct ResourceCache {
    instances: HashMap<ContainerKey, Tagged<GeomMesh>>,
    origins: HashMap<ContainerKey, Tagged<SharedPoints>>,

    // Hit/miss counters for diagnostics
    origin_hits: usize,
    origin_misses: usize,
    instance_hits: usize,
    instance_misses: usize,
}

/// Cache statistics for diagnostics and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub instance_entries: usize,
    pub origin_entries: usize,
    pub origin_hits: usize,
    pub origin_misses: usize,
    pub instance_hits: usize,
    pub instance_misses: usize,
    /// Estimated memory usage in bytes.
    pub estimated_memory_bytes: usize,
}

impl CacheStats {
    #[must_use]
    pub const fn total_entries(&self) -> usize {
        self.instance_entries + self.origin_entries
    }

    /// Returns the cache hit rate as a value between 0.0 and 1.0.
    /// Returns 0.0 if no cache accesses have been made.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.origin_hits + self.instance_hits;
        let total = hits + self.origin_misses + self.instance_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl ResourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            instance_entries: self.instances.len(),
            origin_entries: self.origins.len(),
            origin_hits: self.origin_hits,
            origin_misses: self.origin_misses,
            instance_hits: self.instance_hits,
            instance_misses: self.instance_misses,
            estimated_memory_bytes: self.estimate_memory_usage(),
        }
    }

    /// Estimates the memory usage of all cached data in bytes.
    #[must_use]
    pub fn estimate_memory_usage(&self) -> usize {
        let mut total = 0usize;

        for entry in self.instances.values() {
            let mesh = &entry.value;
            // Positions, normals and tangents are 3 × f64, uvs 2 × f64.
            total += mesh.positions.len() * 24;
            total += mesh.normals.as_ref().map_or(0, |n| n.len() * 24);
            total += mesh.tangents.as_ref().map_or(0, |t| t.len() * 24);
            total += mesh.uvs.as_ref().map_or(0, |uv| uv.len() * 16);
            total += mesh.indices.len() * 4;
        }

        for entry in self.origins.values() {
            total += entry.value.len() * std::mem::size_of::<Point3>();
        }

        // Approximate HashMap entry overhead.
        total += self.instances.len() * std::mem::size_of::<(ContainerKey, Tagged<GeomMesh>)>();
        total += self.origins.len() * std::mem::size_of::<(ContainerKey, Tagged<SharedPoints>)>();

        total
    }

    /// Origin vertices for `key`, computed by `make` on a miss.
    ///
    /// A cached entry is reused when it was built from the same container
    /// `revision`, unless `refresh` is set (interactive hosts may edit source
    /// meshes in place).
    pub fn origin_vertices(
        &mut self,
        key: ContainerKey,
        scope: ScopeId,
        revision: u64,
        refresh: bool,
        make: impl FnOnce() -> Vec<Point3>,
    ) -> SharedPoints {
        if !refresh {
            if let Some(entry) = self.origins.get(&key).filter(|e| e.revision == revision) {
                self.origin_hits += 1;
                return Arc::clone(&entry.value);
            }
        }
        self.origin_misses += 1;
        let value = Arc::new(make());
        self.origins.insert(
            key,
            Tagged {
                scope,
                revision,
                value: Arc::clone(&value),
            },
        );
        value
    }

    /// Read-only lookup that does not touch the statistics.
    #[must_use]
    pub fn peek_instance(&self, key: &ContainerKey) -> Option<&GeomMesh> {
        self.instances.get(key).map(|entry| &entry.value)
    }

    /// Whether an instance built from container `revision` is cached.
    #[must_use]
    pub fn has_instance(&self, key: &ContainerKey, revision: u64) -> bool {
        self.instances
            .get(key)
            .is_some_and(|entry| entry.revision == revision)
    }

    /// Mutable instance mesh, created from `origin` on a miss or when the
    /// cached one was built from another container revision.
    pub fn instance_mut_or_insert(
        &mut self,
        key: ContainerKey,
        scope: ScopeId,
        revision: u64,
        origin: &GeomMesh,
    ) -> &mut GeomMesh {
        let stale = !self.has_instance(&key, revision);
        if stale {
            self.instance_misses += 1;
        } else {
            self.instance_hits += 1;
        }
        let fresh = || Tagged {
            scope,
            revision,
            value: origin.clone(),
        };
        let entry = self.instances.entry(key).or_insert_with(fresh);
        if stale && entry.revision != revision {
            *entry = fresh();
        }
        &mut entry.value
    }

    /// Drops every entry tagged with `scope` and returns how many were removed.
    pub fn on_scope_teardown(&mut self, scope: ScopeId) -> usize {
        let before = self.instances.len() + self.origins.len();
        self.instances.retain(|_, entry| entry.scope != scope);
        self.origins.retain(|_, entry| entry.scope != scope);
        let removed = before - self.instances.len() - self.origins.len();
        log::debug!("cache: scope {scope:?} torn down, {removed} entries removed");
        removed
    }

    /// Drops the entries of one object (on unregistration).
    pub fn remove_object(&mut self, object: ObjectId) -> usize {
        self.prune_object(object, &[])
    }

    /// Drops the entries of `object` whose container is not in `live`.
    pub fn prune_object(&mut self, object: ObjectId, live: &[ContainerKey]) -> usize {
        let before = self.instances.len() + self.origins.len();
        let keep = |key: &ContainerKey| key.object != object || live.contains(key);
        self.instances.retain(|key, _| keep(key));
        self.origins.retain(|key, _| keep(key));
        before - self.instances.len() - self.origins.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(object: u64, mesh: u64) -> ContainerKey {
        ContainerKey::new(ObjectId(object), MeshId(mesh), 0)
    }

    fn triangle() -> GeomMesh {
        GeomMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
            vec![0, 2, 1],
        )
    }

    fn quad() -> GeomMesh {
        GeomMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 1.0]],
            vec![0, 2, 1, 1, 2, 3],
        )
    }

    #[test]
    fn origin_vertices_hit_after_first_miss() {
        let mut cache = ResourceCache::new();
        let mut calls = 0;
        let a = cache.origin_vertices(key(1, 1), ScopeId(0), 1, false, || {
            calls += 1;
            vec![Point3::ORIGIN]
        });
        let b = cache.origin_vertices(key(1, 1), ScopeId(0), 1, false, || {
            calls += 1;
            vec![Point3::ORIGIN]
        });
        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&a, &b));
        let stats = cache.stats();
        assert_eq!(stats.origin_hits, 1);
        assert_eq!(stats.origin_misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn refresh_rebuilds_origin() {
        let mut cache = ResourceCache::new();
        let _ = cache.origin_vertices(key(1, 1), ScopeId(0), 1, false, || vec![Point3::ORIGIN]);
        let fresh = cache.origin_vertices(key(1, 1), ScopeId(0), 1, true, || {
            vec![Point3::new(1.0, 0.0, 0.0)]
        });
        assert_eq!(fresh[0].x, 1.0);
    }

    #[test]
    fn new_container_revision_rebuilds_origin_and_instance() {
        let mut cache = ResourceCache::new();
        let old = cache.origin_vertices(key(1, 1), ScopeId(0), 1, false, || {
            triangle().points().collect()
        });
        assert_eq!(old.len(), 3);
        cache.instance_mut_or_insert(key(1, 1), ScopeId(0), 1, &triangle());

        let new = cache.origin_vertices(key(1, 1), ScopeId(0), 2, false, || {
            quad().points().collect()
        });
        assert_eq!(new.len(), 4);
        assert!(!cache.has_instance(&key(1, 1), 2));
        let instance = cache.instance_mut_or_insert(key(1, 1), ScopeId(0), 2, &quad());
        assert_eq!(instance.positions.len(), 4);
        assert!(cache.has_instance(&key(1, 1), 2));
        assert_eq!(cache.stats().total_entries(), 2);
    }

    #[test]
    fn scope_teardown_only_removes_that_scope() {
        let mut cache = ResourceCache::new();
        for i in 0..4 {
            cache.instance_mut_or_insert(key(i, 0), ScopeId(7), 1, &triangle());
            let _ = cache.origin_vertices(key(i, 0), ScopeId(7), 1, false, Vec::new);
        }
        cache.instance_mut_or_insert(key(99, 0), ScopeId(8), 1, &triangle());

        assert_eq!(cache.on_scope_teardown(ScopeId(7)), 8);
        assert_eq!(cache.stats().total_entries(), 1);
        assert!(cache.has_instance(&key(99, 0), 1));
    }

    #[test]
    fn missing_instance_is_created_from_origin() {
        let mut cache = ResourceCache::new();
        assert!(cache.peek_instance(&key(1, 1)).is_none());
        let mesh = cache.instance_mut_or_insert(key(1, 1), ScopeId(0), 1, &triangle());
        mesh.positions[0] = [5.0, 0.0, 0.0];
        assert_eq!(cache.peek_instance(&key(1, 1)).unwrap().positions[0][0], 5.0);
        cache.instance_mut_or_insert(key(1, 1), ScopeId(0), 1, &triangle());
        assert!(cache.estimate_memory_usage() > 0);
        let stats = cache.stats();
        assert_eq!((stats.instance_misses, stats.instance_hits), (1, 1));
    }

    #[test]
    fn prune_keeps_live_containers() {
        let mut cache = ResourceCache::new();
        cache.instance_mut_or_insert(key(1, 1), ScopeId(0), 1, &triangle());
        cache.instance_mut_or_insert(key(1, 2), ScopeId(0), 1, &triangle());
        cache.instance_mut_or_insert(key(2, 1), ScopeId(0), 1, &triangle());
        assert_eq!(cache.prune_object(ObjectId(1), &[key(1, 2)]), 1);
        assert_eq!(cache.remove_object(ObjectId(1)), 1);
        assert!(cache.has_instance(&key(2, 1), 1));
    }
}
