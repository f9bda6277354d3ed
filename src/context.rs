//! The registry and tick driver.
//!
//! A [`SplineContext`] owns every registered curve, object and connector,
//! their monitors, the deformation [`Scheduler`] and the [`ResourceCache`].
//! Hosts mutate entities through the context (or through `*_mut` accessors)
//! and call [`SplineContext::tick`] once per update. The tick:
//!
//! 1. carries connector motion onto linked anchors;
//! 2. refreshes the composed ancestor transform of parented objects;
//! 3. runs change detection on curves, rebuilding arc-length and frame tables
//!    only where a curve-shaping concern changed;
//! 4. runs change detection on objects and queues deformation for changed
//!    objects, for every object attached to a changed curve and for objects
//!    whose instance meshes are missing from the cache;
//! 5. dispatches one batch per curve through the kernel and writes results
//!    into instance meshes (followers receive a world pose instead).
//!
//! Nothing in a tick fails: objects that cannot be processed are reported in
//! [`TickReport::skipped`] and retried on the next tick.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheStats, ContainerKey, ResourceCache, ScopeId};
use crate::connector::{Connector, ConnectorError, ConnectorId};
use crate::deform::scheduler::DEFAULT_WORKER_WARN_THRESHOLD;
use crate::deform::{
    CurveView, DeformBatch, DeformKind, ObjectPlacement, Scheduler, SnapRemap, follow_pose,
    run_batches,
};
use crate::diagnostics::{SkipReason, TickReport};
use crate::environment::{Environment, Headless};
use crate::geom::{CurveFrame, GeomMesh, Point3, Pose, Transform, Vec3};
use crate::metrics::{EngineMetrics, TimingBucket};
use crate::monitor::{ConnectorMonitor, Monitor, ObjectConcern, ObjectMonitor, SplineMonitor};
use crate::object::{
    DEFAULT_MAX_HIERARCHY_DEPTH, ObjectDesc, ObjectError, ObjectId, SplineObject, resolve_chain,
};
use crate::spline::arc_length::{ArcLengthSettings, DEFAULT_RESOLUTION, DEFAULT_SAMPLING_STEP};
use crate::spline::{Segment, Spline, SplineDesc, SplineError, SplineId};

pub const DEFAULT_CHANGE_THRESHOLD: f64 = 1e-6;

/// Engine-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Distance map entries per curve.
    pub resolution: usize,
    /// Parameter step of the fine arc-length pass.
    pub sampling_step: f64,
    pub build_position_map: bool,
    /// Fingerprint values closer than this count as unchanged.
    pub change_threshold: f64,
    pub max_hierarchy_depth: usize,
    /// Worker pool size above which a warning is logged.
    pub worker_warn_threshold: usize,
    pub world_up: Vec3,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            sampling_step: DEFAULT_SAMPLING_STEP,
            build_position_map: true,
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            max_hierarchy_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
            worker_warn_threshold: DEFAULT_WORKER_WARN_THRESHOLD,
            world_up: Vec3::Y,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_resolution(mut self, resolution: usize) -> Self {
        self.resolution = resolution;
        self
    }

    #[must_use]
    pub fn with_sampling_step(mut self, step: f64) -> Self {
        self.sampling_step = step;
        self
    }

    #[must_use]
    pub fn with_position_map(mut self, build: bool) -> Self {
        self.build_position_map = build;
        self
    }

    #[must_use]
    pub fn with_change_threshold(mut self, threshold: f64) -> Self {
        self.change_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_max_hierarchy_depth(mut self, depth: usize) -> Self {
        self.max_hierarchy_depth = depth;
        self
    }

    #[must_use]
    pub fn with_worker_warn_threshold(mut self, threshold: usize) -> Self {
        self.worker_warn_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_world_up(mut self, up: Vec3) -> Self {
        self.world_up = up;
        self
    }

    /// Arc-length settings for curves that do not override them.
    #[must_use]
    pub fn arc_length_settings(&self) -> ArcLengthSettings {
        ArcLengthSettings {
            resolution: self.resolution,
            sampling_step: self.sampling_step,
            build_position_map: self.build_position_map,
        }
        .sanitized()
    }

    fn world_up(&self) -> Vec3 {
        self.world_up.normalized().unwrap_or(Vec3::Y)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContextError {
    #[error(transparent)]
    Spline(#[from] SplineError),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error("curve {0:?} is not registered")]
    UnknownCurve(SplineId),
    #[error("object {0:?} is not registered")]
    UnknownObject(ObjectId),
    #[error("connector {0:?} is not registered")]
    UnknownConnector(ConnectorId),
    #[error("curve {0:?} is already registered")]
    DuplicateCurve(SplineId),
    #[error("object {0:?} is already registered")]
    DuplicateObject(ObjectId),
    #[error("connector {0:?} is already registered")]
    DuplicateConnector(ConnectorId),
    #[error("curve {0:?} has no arc-length data yet")]
    CurveNotBuilt(SplineId),
    #[error("object {object:?} is not a {kind:?} object of curve {curve:?}")]
    RequestMismatch {
        object: ObjectId,
        curve: SplineId,
        kind: DeformKind,
    },
}

/// Position of a segment created through the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentHandle {
    pub spline: SplineId,
    pub index: usize,
}

#[derive(Debug)]
struct CurveEntry {
    spline: Spline,
    monitor: SplineMonitor,
}

#[derive(Debug)]
struct ObjectEntry {
    object: SplineObject,
    monitor: ObjectMonitor,
    follower_pose: Option<Pose>,
}

#[derive(Debug)]
struct ConnectorEntry {
    connector: Connector,
    monitor: ConnectorMonitor,
}

#[derive(Debug)]
pub struct SplineContext<E: Environment = Headless> {
    options: EngineOptions,
    environment: E,
    curves: BTreeMap<SplineId, CurveEntry>,
    objects: BTreeMap<ObjectId, ObjectEntry>,
    connectors: BTreeMap<ConnectorId, ConnectorEntry>,
    scheduler: Scheduler,
    cache: ResourceCache,
    metrics: EngineMetrics,
    /// Objects skipped last tick, queued again on the next one.
    retry: BTreeSet<ObjectId>,
    ticks: u64,
}

impl Default for SplineContext<Headless> {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl SplineContext<Headless> {
    #[must_use]
    pub fn new(options: EngineOptions) -> Self {
        Self::with_environment(options, Headless)
    }
}

impl<E: Environment> SplineContext<E> {
    #[must_use]
    pub fn with_environment(options: EngineOptions, environment: E) -> Self {
        Self {
            options,
            environment,
            curves: BTreeMap::new(),
            objects: BTreeMap::new(),
            connectors: BTreeMap::new(),
            scheduler: Scheduler::new(options.worker_warn_threshold),
            cache: ResourceCache::new(),
            metrics: EngineMetrics::default(),
            retry: BTreeSet::new(),
            ticks: 0,
        }
    }

    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    #[must_use]
    pub fn environment(&self) -> &E {
        &self.environment
    }

    pub fn environment_mut(&mut self) -> &mut E {
        &mut self.environment
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    // ── curves ──────────────────────────────────────────────────────────────

    /// Registers a curve and builds its arc-length data right away, so it can
    /// be evaluated before the first tick.
    pub fn register_curve(&mut self, id: SplineId, desc: SplineDesc) -> Result<(), ContextError> {
        if self.curves.contains_key(&id) {
            return Err(ContextError::DuplicateCurve(id));
        }
        let mut spline = Spline::from_desc(id, desc, self.options.arc_length_settings())?;
        spline.rebuild(self.options.world_up());
        let monitor = Monitor::capture(&spline, self.options.change_threshold);
        self.curves.insert(id, CurveEntry { spline, monitor });
        log::debug!("context: curve {id:?} registered");
        Ok(())
    }

    /// Removes a curve. Objects attached to it stay registered and are
    /// skipped until a curve with the same id is registered again.
    pub fn unregister_curve(&mut self, id: SplineId) -> Result<Spline, ContextError> {
        let entry = self
            .curves
            .remove(&id)
            .ok_or(ContextError::UnknownCurve(id))?;
        self.scheduler.forget_spline(id);
        for connector in self.connectors.values_mut() {
            connector.connector.unlink_spline(id);
        }
        log::debug!("context: curve {id:?} unregistered");
        Ok(entry.spline)
    }

    #[must_use]
    pub fn curve(&self, id: SplineId) -> Option<&Spline> {
        self.curves.get(&id).map(|entry| &entry.spline)
    }

    /// Mutable access for host edits; changes are picked up by the next tick.
    pub fn curve_mut(&mut self, id: SplineId) -> Result<&mut Spline, ContextError> {
        self.curves
            .get_mut(&id)
            .map(|entry| &mut entry.spline)
            .ok_or(ContextError::UnknownCurve(id))
    }

    pub fn curve_ids(&self) -> impl Iterator<Item = SplineId> + '_ {
        self.curves.keys().copied()
    }

    /// Appends a segment to `curve`.
    pub fn create_segment(
        &mut self,
        curve: SplineId,
        anchor: Point3,
        tangent_a: Point3,
        tangent_b: Point3,
    ) -> Result<SegmentHandle, ContextError> {
        let spline = self.curve_mut(curve)?;
        let index = spline.segment_count();
        spline.insert_segment(index, Segment::new(anchor, tangent_a, tangent_b))?;
        Ok(SegmentHandle {
            spline: curve,
            index,
        })
    }

    /// Inserts a fully specified segment at `index`.
    pub fn insert_segment(
        &mut self,
        curve: SplineId,
        index: usize,
        segment: Segment,
    ) -> Result<SegmentHandle, ContextError> {
        let index = self.curve_mut(curve)?.insert_segment(index, segment)?;
        for entry in self.connectors.values_mut() {
            entry.connector.segment_inserted(curve, index);
        }
        Ok(SegmentHandle {
            spline: curve,
            index,
        })
    }

    pub fn remove_segment(&mut self, curve: SplineId, index: usize) -> Result<Segment, ContextError> {
        let removed = self.curve_mut(curve)?.remove_segment(index)?;
        for entry in self.connectors.values_mut() {
            entry.connector.segment_removed(curve, index);
        }
        Ok(removed)
    }

    /// World-space frame at length fraction `t`.
    pub fn evaluate(&self, curve: SplineId, t: f64) -> Result<CurveFrame, ContextError> {
        let spline = self.curve(curve).ok_or(ContextError::UnknownCurve(curve))?;
        spline.evaluate(t).ok_or(ContextError::CurveNotBuilt(curve))
    }

    /// World-space frame at `distance` along the curve.
    pub fn evaluate_at_length(
        &self,
        curve: SplineId,
        distance: f64,
    ) -> Result<CurveFrame, ContextError> {
        let spline = self.curve(curve).ok_or(ContextError::UnknownCurve(curve))?;
        spline
            .evaluate_at_length(distance)
            .ok_or(ContextError::CurveNotBuilt(curve))
    }

    // ── objects ─────────────────────────────────────────────────────────────

    /// Registers an object, resolves its parent chain and queues its first
    /// deformation.
    pub fn register_object(&mut self, id: ObjectId, desc: ObjectDesc) -> Result<(), ContextError> {
        if self.objects.contains_key(&id) {
            return Err(ContextError::DuplicateObject(id));
        }
        if !self.curves.contains_key(&desc.spline) {
            return Err(ContextError::UnknownCurve(desc.spline));
        }
        let chain = self.resolve_chain_for(id, desc.parent)?;
        let mut object = SplineObject::from_desc(id, desc)?;
        object.set_chain(chain);
        let chain_transform = self.chain_transform(object.chain());
        object.set_chain_transform(chain_transform);

        if let Some(parent) = object.parent() {
            self.adjust_children(parent, 1);
        }
        self.scheduler
            .request(id, object.kind(), object.spline());
        let monitor = Monitor::capture(&object, self.options.change_threshold);
        self.objects.insert(
            id,
            ObjectEntry {
                object,
                monitor,
                follower_pose: None,
            },
        );
        log::debug!("context: object {id:?} registered");
        Ok(())
    }

    /// Removes an object and its cached meshes. Descendants keep the part of
    /// their chain below it.
    pub fn unregister_object(&mut self, id: ObjectId) -> Result<SplineObject, ContextError> {
        let entry = self
            .objects
            .remove(&id)
            .ok_or(ContextError::UnknownObject(id))?;
        let object = entry.object;

        if let Some(parent) = object.parent() {
            self.adjust_children(parent, -1);
        }
        for other in self.objects.values_mut() {
            let chain = other.object.chain();
            if let Some(position) = chain.iter().position(|&ancestor| ancestor == id) {
                let rest = chain[position + 1..].to_vec();
                if other.object.parent() == Some(id) {
                    other.object.set_parent(None);
                }
                other.object.set_chain(rest);
            }
        }
        self.scheduler.forget_object(id);
        self.retry.remove(&id);
        let removed = self.cache.remove_object(id);
        log::debug!("context: object {id:?} unregistered, {removed} cache entries dropped");
        Ok(object)
    }

    #[must_use]
    pub fn object(&self, id: ObjectId) -> Option<&SplineObject> {
        self.objects.get(&id).map(|entry| &entry.object)
    }

    /// Mutable access for host edits; changes are picked up by the next tick.
    pub fn object_mut(&mut self, id: ObjectId) -> Result<&mut SplineObject, ContextError> {
        self.objects
            .get_mut(&id)
            .map(|entry| &mut entry.object)
            .ok_or(ContextError::UnknownObject(id))
    }

    /// Re-parents an object, re-resolving the chains of it and its descendants.
    pub fn set_parent(
        &mut self,
        id: ObjectId,
        parent: Option<ObjectId>,
    ) -> Result<(), ContextError> {
        let old_parent = self
            .object(id)
            .ok_or(ContextError::UnknownObject(id))?
            .parent();
        let chain = self.resolve_chain_for(id, parent)?;

        let mut updates = Vec::new();
        for (&other, entry) in &self.objects {
            let existing = entry.object.chain();
            if let Some(position) = existing.iter().position(|&ancestor| ancestor == id) {
                let mut rebuilt = chain.clone();
                rebuilt.push(id);
                rebuilt.extend_from_slice(&existing[position + 1..]);
                if rebuilt.len() > self.options.max_hierarchy_depth {
                    return Err(ObjectError::HierarchyTooDeep {
                        object: other,
                        max: self.options.max_hierarchy_depth,
                    }
                    .into());
                }
                updates.push((other, rebuilt));
            }
        }

        if let Some(old) = old_parent {
            self.adjust_children(old, -1);
        }
        if let Some(new) = parent {
            self.adjust_children(new, 1);
        }
        if let Some(entry) = self.objects.get_mut(&id) {
            entry.object.set_parent(parent);
            entry.object.set_chain(chain);
        }
        for (other, rebuilt) in updates {
            if let Some(entry) = self.objects.get_mut(&other) {
                entry.object.set_chain(rebuilt);
            }
        }
        Ok(())
    }

    /// Queues `object` for deformation by `curve`. Idempotent within a tick.
    pub fn request_deformation(
        &mut self,
        object: ObjectId,
        curve: SplineId,
        kind: DeformKind,
    ) -> Result<bool, ContextError> {
        let entry = self
            .objects
            .get(&object)
            .ok_or(ContextError::UnknownObject(object))?;
        if !self.curves.contains_key(&curve) {
            return Err(ContextError::UnknownCurve(curve));
        }
        if entry.object.spline() != curve || entry.object.kind() != kind {
            return Err(ContextError::RequestMismatch {
                object,
                curve,
                kind,
            });
        }
        Ok(self.scheduler.request(object, kind, curve))
    }

    /// Instance mesh generated for a container.
    #[must_use]
    pub fn mesh(&self, key: &ContainerKey) -> Option<&GeomMesh> {
        self.cache.peek_instance(key)
    }

    /// Instance meshes of one object, in container order.
    #[must_use]
    pub fn object_meshes(&self, id: ObjectId) -> Vec<(ContainerKey, &GeomMesh)> {
        self.object(id)
            .map(|object| {
                object
                    .containers()
                    .iter()
                    .filter_map(|c| self.cache.peek_instance(&c.key).map(|mesh| (c.key, mesh)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Last world pose computed for a follower.
    #[must_use]
    pub fn follower_pose(&self, id: ObjectId) -> Option<Pose> {
        self.objects.get(&id).and_then(|entry| entry.follower_pose)
    }

    fn resolve_chain_for(
        &self,
        id: ObjectId,
        parent: Option<ObjectId>,
    ) -> Result<Vec<ObjectId>, ObjectError> {
        resolve_chain(id, parent, self.options.max_hierarchy_depth, |ancestor| {
            self.objects.get(&ancestor).map(|entry| entry.object.parent())
        })
    }

    fn chain_transform(&self, chain: &[ObjectId]) -> Transform {
        chain
            .iter()
            .filter_map(|ancestor| self.objects.get(ancestor))
            .fold(Transform::identity(), |acc, entry| {
                acc * entry.object.local_pose().to_transform()
            })
    }

    fn adjust_children(&mut self, parent: ObjectId, delta: isize) {
        if let Some(entry) = self.objects.get_mut(&parent) {
            let children = entry.object.children().saturating_add_signed(delta);
            entry.object.set_children(children);
        }
    }

    // ── connectors ──────────────────────────────────────────────────────────

    pub fn register_connector(&mut self, id: ConnectorId, pose: Pose) -> Result<(), ContextError> {
        if self.connectors.contains_key(&id) {
            return Err(ContextError::DuplicateConnector(id));
        }
        let connector = Connector::new(id, pose)?;
        let monitor = Monitor::capture(&connector, self.options.change_threshold);
        self.connectors
            .insert(id, ConnectorEntry { connector, monitor });
        Ok(())
    }

    pub fn unregister_connector(&mut self, id: ConnectorId) -> Result<Connector, ContextError> {
        self.connectors
            .remove(&id)
            .map(|entry| entry.connector)
            .ok_or(ContextError::UnknownConnector(id))
    }

    #[must_use]
    pub fn connector(&self, id: ConnectorId) -> Option<&Connector> {
        self.connectors.get(&id).map(|entry| &entry.connector)
    }

    pub fn connector_mut(&mut self, id: ConnectorId) -> Result<&mut Connector, ContextError> {
        self.connectors
            .get_mut(&id)
            .map(|entry| &mut entry.connector)
            .ok_or(ContextError::UnknownConnector(id))
    }

    /// Links a segment anchor to a connector and snaps it onto the connector.
    pub fn link_connector(
        &mut self,
        id: ConnectorId,
        curve: SplineId,
        segment: usize,
    ) -> Result<bool, ContextError> {
        let entry = self
            .connectors
            .get_mut(&id)
            .ok_or(ContextError::UnknownConnector(id))?;
        let spline = &mut self
            .curves
            .get_mut(&curve)
            .ok_or(ContextError::UnknownCurve(curve))?
            .spline;
        if segment >= spline.segment_count() {
            return Err(SplineError::IndexOutOfRange {
                index: segment,
                len: spline.segment_count(),
            }
            .into());
        }
        entry.connector.pin(spline, segment)?;
        Ok(entry.connector.link(curve, segment))
    }

    // ── lifecycle ───────────────────────────────────────────────────────────

    /// Drops every cached buffer tagged with `scope`.
    pub fn on_scope_teardown(&mut self, scope: ScopeId) -> usize {
        self.cache.on_scope_teardown(scope)
    }

    /// Runs one update.
    pub fn tick(&mut self) -> TickReport {
        let Self {
            options,
            environment,
            curves,
            objects,
            connectors,
            scheduler,
            cache,
            metrics,
            retry,
            ticks,
        } = self;
        let mut report = TickReport::new();
        metrics.begin();

        metrics.time(TimingBucket::ChangeDetection, || {
            carry_connectors(connectors, curves, &mut report);
        });
        metrics.time(TimingBucket::ChangeDetection, || {
            refresh_chains(objects);
        });

        let mut dirty_curves = BTreeSet::new();
        for (&id, entry) in curves.iter_mut() {
            let changed = metrics.time(TimingBucket::ChangeDetection, || {
                entry.monitor.changed_concerns(&entry.spline, true)
            });
            if changed.is_empty() && entry.spline.is_built() {
                continue;
            }
            if !changed.is_empty() {
                report.changed_curves += 1;
                dirty_curves.insert(id);
            }
            if !entry.spline.is_built() || changed.iter().any(|c| c.invalidates_curve()) {
                let up = options.world_up();
                metrics.time(TimingBucket::ArcLength, || entry.spline.rebuild(up));
                report.rebuilt_curves += 1;
                dirty_curves.insert(id);
            }
            log::debug!("tick {ticks}: curve {id:?} changed {changed:?}");
        }

        for (&id, entry) in objects.iter_mut() {
            let changed = metrics.time(TimingBucket::ChangeDetection, || {
                entry.monitor.changed_concerns(&entry.object, true)
            });
            if changed.iter().any(|c| matches!(c, ObjectConcern::Kind | ObjectConcern::Components)) {
                drop_unused_outputs(entry, cache);
            }
            let object = &entry.object;
            // Instances lost to a scope teardown or a replaced mesh are regenerated.
            let missing_instance = object.kind() == DeformKind::Deformation
                && object
                    .containers()
                    .iter()
                    .any(|c| !cache.has_instance(&c.key, c.revision));
            if !changed.is_empty()
                || missing_instance
                || dirty_curves.contains(&object.spline())
                || retry.contains(&id)
            {
                scheduler.request(id, object.kind(), object.spline());
            }
        }
        retry.clear();

        let interactive = environment.is_interactive_context();
        let started = scheduler.begin_dispatch();
        let mut work = Vec::new();
        let mut follower_poses = Vec::new();

        for (key, queue) in &started {
            let view = match curves.get(&key.spline) {
                None => {
                    skip_all(&mut report, retry, queue, SkipReason::MissingCurve(key.spline));
                    continue;
                }
                Some(entry) => match CurveView::new(&entry.spline) {
                    Some(view) => view,
                    None => {
                        skip_all(&mut report, retry, queue, SkipReason::CurveNotBuilt(key.spline));
                        continue;
                    }
                },
            };
            let anchors = view.spline().anchor_distances().unwrap_or_default();

            let mut batch = DeformBatch::new();
            for &id in queue {
                let Some(entry) = objects.get(&id) else {
                    continue;
                };
                let object = &entry.object;
                if object.spline() != key.spline || object.kind() != key.kind {
                    continue;
                }
                let placement = match ObjectPlacement::new(object.composed_transform(), object.mirror()) {
                    Some(placement) if object.has_valid_scale() => placement,
                    _ => {
                        report.skip(id, SkipReason::ZeroScale);
                        retry.insert(id);
                        continue;
                    }
                };

                match key.kind {
                    DeformKind::Follower => {
                        let own = object.local_pose();
                        let pose = metrics.time(TimingBucket::Frames, || {
                            follow_pose(&view, &placement, own.rotation, own.scale)
                        });
                        match pose {
                            Some(pose) => follower_poses.push((id, pose)),
                            None => {
                                report.skip(id, SkipReason::DegenerateFrame);
                                retry.insert(id);
                            }
                        }
                    }
                    DeformKind::Deformation => {
                        if object.containers().is_empty() {
                            report.skip(id, SkipReason::EmptyContainers);
                            retry.insert(id);
                            continue;
                        }
                        let origins: Vec<_> = metrics.time(TimingBucket::Cache, || {
                            object
                                .containers()
                                .iter()
                                .map(|container| {
                                    let origin = cache.origin_vertices(
                                        container.key,
                                        object.scope(),
                                        container.revision,
                                        interactive,
                                        || container.origin.points().collect(),
                                    );
                                    (container.key, origin)
                                })
                                .collect()
                        });
                        let placement = if object.snap().is_active() {
                            placement.with_snap(snap_remap(object, &placement, &origins, &anchors))
                        } else {
                            placement
                        };
                        for (container, origin) in &origins {
                            batch.push(*container, id, placement, origin);
                        }
                    }
                }
            }
            if !batch.is_empty() {
                report.batches += 1;
                report.vertex_count += batch.vertex_count();
                log::debug!(
                    "tick {ticks}: dispatching {} jobs / {} vertices on {:?}",
                    batch.jobs().len(),
                    batch.vertex_count(),
                    key.spline
                );
                work.push((view, batch));
            }
        }

        let outputs = metrics.time(TimingBucket::Dispatch, || run_batches(work));

        metrics.time(TimingBucket::WriteBack, || {
            let mut deformed = BTreeSet::new();
            for job in outputs.into_iter().flat_map(|output| output.jobs) {
                let Some(entry) = objects.get(&job.object) else {
                    continue;
                };
                let Some(container) = entry
                    .object
                    .containers()
                    .iter()
                    .find(|container| container.key == job.key)
                else {
                    continue;
                };
                let origin = &container.origin;
                let mesh = cache.instance_mut_or_insert(
                    job.key,
                    entry.object.scope(),
                    container.revision,
                    origin,
                );
                mesh.positions = job.positions;
                mesh.indices.clone_from(&origin.indices);
                mesh.uvs.clone_from(&origin.uvs);
                if job.mirror {
                    mesh.flip_winding();
                }
                mesh.recalculate_derived();
                environment.mesh_updated(job.key, mesh);
                report.meshes_written += 1;
                deformed.insert(job.object);
            }
            report.deformed_objects = deformed.len();
        });

        for (id, pose) in follower_poses {
            if let Some(entry) = objects.get_mut(&id) {
                entry.follower_pose = Some(pose);
                environment.follower_moved(id, pose);
                report.followed_objects += 1;
            }
        }

        for (key, _) in started {
            scheduler.complete(key);
        }

        *ticks += 1;
        report.timing = metrics.end();
        if !report.is_idle() {
            log::debug!("tick {}: {}", *ticks, report.summary());
        }
        report
    }
}

fn skip_all(
    report: &mut TickReport,
    retry: &mut BTreeSet<ObjectId>,
    queue: &[ObjectId],
    reason: SkipReason,
) {
    for &id in queue {
        report.skip(id, reason);
        retry.insert(id);
    }
}

/// Clears the outputs an object no longer produces after a kind or container
/// change: the follower pose of a non-follower and the instances of removed
/// (or all, for a follower) containers.
fn drop_unused_outputs(entry: &mut ObjectEntry, cache: &mut ResourceCache) {
    let object = &entry.object;
    if object.kind() != DeformKind::Follower {
        entry.follower_pose = None;
    }
    let live: Vec<ContainerKey> = match object.kind() {
        DeformKind::Deformation => object.containers().iter().map(|c| c.key).collect(),
        DeformKind::Follower => Vec::new(),
    };
    let dropped = cache.prune_object(object.id(), &live);
    if dropped > 0 {
        log::debug!("context: object {:?} dropped {dropped} stale cache entries", object.id());
    }
}

fn carry_connectors(
    connectors: &mut BTreeMap<ConnectorId, ConnectorEntry>,
    curves: &mut BTreeMap<SplineId, CurveEntry>,
    report: &mut TickReport,
) {
    for entry in connectors.values_mut() {
        entry.monitor.links_change(&entry.connector, true);
        entry.monitor.transform_change(&entry.connector, true);
        for spline in entry.connector.pending_splines() {
            let Some(curve) = curves.get_mut(&spline) else {
                continue;
            };
            match entry.connector.carry(&mut curve.spline) {
                Ok(count) => {
                    report.carried_anchors += count;
                    entry.connector.mark_applied(spline);
                }
                // Left pending; retried on the next tick.
                Err(err) => {
                    report.pending_connectors += 1;
                    report.add_warning(format!(
                        "connector {:?} could not carry {spline:?}: {err}",
                        entry.connector.id()
                    ));
                }
            }
        }
    }
}

/// Recomputes the composed ancestor transform of every parented object.
fn refresh_chains(objects: &mut BTreeMap<ObjectId, ObjectEntry>) {
    let transforms: Vec<(ObjectId, Transform)> = objects
        .iter()
        .filter(|(_, entry)| !entry.object.chain().is_empty())
        .map(|(&id, entry)| {
            let transform = entry
                .object
                .chain()
                .iter()
                .filter_map(|ancestor| objects.get(ancestor))
                .fold(Transform::identity(), |acc, ancestor| {
                    acc * ancestor.object.local_pose().to_transform()
                });
            (id, transform)
        })
        .collect();
    for (id, transform) in transforms {
        if let Some(entry) = objects.get_mut(&id) {
            entry.object.set_chain_transform(transform);
        }
    }
}

/// Snap remap for an object whose curve-space extent is measured over all of
/// its origin vertices.
fn snap_remap(
    object: &SplineObject,
    placement: &ObjectPlacement,
    origins: &[(ContainerKey, crate::cache::SharedPoints)],
    anchors: &[f64],
) -> Option<SnapRemap> {
    let (z_min, z_max) = origins
        .iter()
        .flat_map(|(_, points)| points.iter())
        .map(|&p| placement.curve_space(p).z)
        .fold(None, |acc: Option<(f64, f64)>, z| match acc {
            None => Some((z, z)),
            Some((lo, hi)) => Some((lo.min(z), hi.max(z))),
        })?;
    let snap = object.snap();
    let start = snap.start.and_then(|target| target.resolve(z_min, anchors));
    let end = snap.end.and_then(|target| target.resolve(z_max, anchors));
    (start.is_some() || end.is_some()).then_some(SnapRemap {
        z_min,
        z_max,
        start,
        end,
    })
}
