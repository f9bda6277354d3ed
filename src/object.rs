//! Objects placed along a spline.
//!
//! A [`SplineObject`] either bends its meshes into curve space
//! ([`DeformKind::Deformation`]) or has its own transform driven by the curve
//! ([`DeformKind::Follower`]). Its local pose is expressed in curve space:
//! `z` is distance along the curve, `x` lateral and `y` vertical.
//!
//! Objects may be parented to other objects. The ancestor chain is resolved
//! once when the object is attached (see [`resolve_chain`]) and kept as a flat
//! list; the composed ancestor transform is refreshed by the context before
//! change detection runs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{ContainerKey, ScopeId};
use crate::deform::DeformKind;
use crate::geom::{GeomMesh, Pose, Transform};
use crate::monitor::{Fingerprint, Monitored, ObjectConcern};
use crate::spline::SplineId;

pub const DEFAULT_MAX_HIERARCHY_DEPTH: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl From<u64> for ObjectId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MeshId(pub u64);

impl From<u64> for MeshId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ObjectError {
    #[error("object {0:?} is already part of its own parent chain")]
    HierarchyCycle(ObjectId),
    #[error("parent chain of {object:?} exceeds the maximum depth of {max}")]
    HierarchyTooDeep { object: ObjectId, max: usize },
    #[error("parent {0:?} is not registered")]
    UnknownParent(ObjectId),
    #[error("local pose of {0:?} is not finite")]
    NonFinitePose(ObjectId),
    #[error("mesh {mesh:?} is invalid: {reason}")]
    InvalidMesh { mesh: MeshId, reason: String },
    #[error("snap target is not finite")]
    NonFiniteSnap,
}

/// Where one end of an object is pinned along the curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SnapTarget {
    /// Fixed distance from the curve start.
    Length(f64),
    /// Closest anchor to the object's end, if within `max_distance` of it.
    NearestAnchor { max_distance: f64 },
}

impl SnapTarget {
    fn is_finite(self) -> bool {
        match self {
            Self::Length(d) => d.is_finite(),
            Self::NearestAnchor { max_distance } => max_distance.is_finite(),
        }
    }

    /// Resolves the pinned distance for an object end currently at `end`.
    #[must_use]
    pub fn resolve(self, end: f64, anchors: &[f64]) -> Option<f64> {
        match self {
            Self::Length(d) => Some(d),
            Self::NearestAnchor { max_distance } => anchors
                .iter()
                .copied()
                .filter(|anchor| (anchor - end).abs() <= max_distance)
                .min_by(|a, b| (a - end).abs().total_cmp(&(b - end).abs())),
        }
    }

    fn fingerprint(target: Option<Self>) -> (f64, f64) {
        match target {
            None => (-1.0, 0.0),
            Some(Self::Length(d)) => (0.0, d),
            Some(Self::NearestAnchor { max_distance }) => (1.0, max_distance),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapSettings {
    pub start: Option<SnapTarget>,
    pub end: Option<SnapTarget>,
}

impl SnapSettings {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}

/// Binds an immutable origin mesh to the instance mesh generated from it.
#[derive(Debug, Clone)]
pub struct MeshContainer {
    pub key: ContainerKey,
    pub origin: Arc<GeomMesh>,
    /// Components revision at which this geometry was added.
    pub revision: u64,
}

/// Host-facing description of an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDesc {
    pub spline: SplineId,
    pub kind: DeformKind,
    #[serde(default)]
    pub local: Pose,
    #[serde(default)]
    pub parent: Option<ObjectId>,
    #[serde(default = "default_lock")]
    pub lock_to_parent: bool,
    #[serde(default)]
    pub mirror: bool,
    #[serde(default)]
    pub snap: SnapSettings,
    #[serde(default)]
    pub meshes: Vec<(MeshId, GeomMesh)>,
    #[serde(default)]
    pub scope: ScopeId,
}

fn default_lock() -> bool {
    true
}

impl ObjectDesc {
    #[must_use]
    pub fn new(spline: SplineId, kind: DeformKind) -> Self {
        Self {
            spline,
            kind,
            local: Pose::IDENTITY,
            parent: None,
            lock_to_parent: true,
            mirror: false,
            snap: SnapSettings::default(),
            meshes: Vec::new(),
            scope: ScopeId::default(),
        }
    }

    #[must_use]
    pub fn with_local(mut self, local: Pose) -> Self {
        self.local = local;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: ObjectId) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_mesh(mut self, mesh: MeshId, geometry: GeomMesh) -> Self {
        self.meshes.push((mesh, geometry));
        self
    }

    #[must_use]
    pub fn with_snap(mut self, snap: SnapSettings) -> Self {
        self.snap = snap;
        self
    }

    #[must_use]
    pub fn mirrored(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    #[must_use]
    pub fn in_scope(mut self, scope: ScopeId) -> Self {
        self.scope = scope;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SplineObject {
    id: ObjectId,
    spline: SplineId,
    kind: DeformKind,
    local: Pose,
    parent: Option<ObjectId>,
    lock_to_parent: bool,
    mirror: bool,
    snap: SnapSettings,
    containers: Vec<MeshContainer>,
    scope: ScopeId,
    chain: Vec<ObjectId>,
    chain_transform: Transform,
    children: usize,
    components_revision: u64,
}

impl SplineObject {
    /// Builds an object from its description. The parent chain is left empty
    /// until [`set_chain`](Self::set_chain) is called with the resolved list.
    pub fn from_desc(id: ObjectId, desc: ObjectDesc) -> Result<Self, ObjectError> {
        if !desc.local.is_finite() {
            return Err(ObjectError::NonFinitePose(id));
        }
        if ![desc.snap.start, desc.snap.end]
            .into_iter()
            .flatten()
            .all(SnapTarget::is_finite)
        {
            return Err(ObjectError::NonFiniteSnap);
        }
        let mut object = Self {
            id,
            spline: desc.spline,
            kind: desc.kind,
            local: desc.local,
            parent: desc.parent,
            lock_to_parent: desc.lock_to_parent,
            mirror: desc.mirror,
            snap: desc.snap,
            containers: Vec::new(),
            scope: desc.scope,
            chain: Vec::new(),
            chain_transform: Transform::identity(),
            children: 0,
            components_revision: 0,
        };
        for (mesh, geometry) in desc.meshes {
            object.add_mesh(mesh, geometry)?;
        }
        Ok(object)
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[must_use]
    pub fn spline(&self) -> SplineId {
        self.spline
    }

    #[must_use]
    pub fn kind(&self) -> DeformKind {
        self.kind
    }

    #[must_use]
    pub fn local_pose(&self) -> Pose {
        self.local
    }

    #[must_use]
    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    #[must_use]
    pub fn lock_to_parent(&self) -> bool {
        self.lock_to_parent
    }

    #[must_use]
    pub fn mirror(&self) -> bool {
        self.mirror
    }

    #[must_use]
    pub fn snap(&self) -> SnapSettings {
        self.snap
    }

    #[must_use]
    pub fn containers(&self) -> &[MeshContainer] {
        &self.containers
    }

    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Ancestors from the root down to the direct parent.
    #[must_use]
    pub fn chain(&self) -> &[ObjectId] {
        &self.chain
    }

    #[must_use]
    pub fn children(&self) -> usize {
        self.children
    }

    pub fn set_local_pose(&mut self, pose: Pose) -> Result<(), ObjectError> {
        if !pose.is_finite() {
            return Err(ObjectError::NonFinitePose(self.id));
        }
        self.local = pose;
        Ok(())
    }

    pub fn set_kind(&mut self, kind: DeformKind) {
        self.kind = kind;
    }

    pub fn set_mirror(&mut self, mirror: bool) {
        self.mirror = mirror;
    }

    pub fn set_lock_to_parent(&mut self, lock: bool) {
        self.lock_to_parent = lock;
    }

    pub fn set_snap(&mut self, snap: SnapSettings) -> Result<(), ObjectError> {
        if ![snap.start, snap.end]
            .into_iter()
            .flatten()
            .all(SnapTarget::is_finite)
        {
            return Err(ObjectError::NonFiniteSnap);
        }
        self.snap = snap;
        Ok(())
    }

    /// Adds (or replaces) the container for `mesh`, variant 0.
    pub fn add_mesh(&mut self, mesh: MeshId, geometry: GeomMesh) -> Result<ContainerKey, ObjectError> {
        geometry
            .validate()
            .map_err(|reason| ObjectError::InvalidMesh { mesh, reason })?;
        let key = ContainerKey::new(self.id, mesh, 0);
        self.containers.retain(|c| c.key != key);
        self.components_revision += 1;
        self.containers.push(MeshContainer {
            key,
            origin: Arc::new(geometry),
            revision: self.components_revision,
        });
        Ok(key)
    }

    pub fn remove_mesh(&mut self, mesh: MeshId) -> Option<MeshContainer> {
        let index = self.containers.iter().position(|c| c.key.mesh == mesh)?;
        self.components_revision += 1;
        Some(self.containers.remove(index))
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ObjectId>) {
        self.parent = parent;
    }

    pub(crate) fn set_chain(&mut self, chain: Vec<ObjectId>) {
        self.chain = chain;
    }

    pub(crate) fn set_chain_transform(&mut self, transform: Transform) {
        self.chain_transform = transform;
    }

    pub(crate) fn set_children(&mut self, children: usize) {
        self.children = children;
    }

    /// Own local pose, composed under the ancestor chain when locked to it.
    #[must_use]
    pub fn composed_transform(&self) -> Transform {
        let own = self.local.to_transform();
        if self.lock_to_parent && !self.chain.is_empty() {
            self.chain_transform * own
        } else {
            own
        }
    }

    /// Returns `false` when any axis of the composed transform collapses.
    #[must_use]
    pub fn has_valid_scale(&self) -> bool {
        let scales = self.composed_transform().axis_scales();
        [scales.x, scales.y, scales.z]
            .iter()
            .all(|s| s.is_finite() && *s > crate::geom::Tolerance::ZERO_LENGTH.eps)
    }
}

impl Monitored for SplineObject {
    type Concern = ObjectConcern;

    fn fingerprint(&self, concern: ObjectConcern) -> Fingerprint {
        match concern {
            ObjectConcern::Transform => Fingerprint::new().pose(self.local),
            ObjectConcern::ParentChain => Fingerprint::new()
                .value(self.chain.len() as f64)
                .value(self.chain.iter().map(|id| id.0 as f64).sum())
                .value(self.parent.map_or(-1.0, |id| id.0 as f64))
                .transform(self.chain_transform),
            ObjectConcern::Kind => {
                let (start_kind, start) = SnapTarget::fingerprint(self.snap.start);
                let (end_kind, end) = SnapTarget::fingerprint(self.snap.end);
                Fingerprint::new()
                    .value(self.kind as u8 as f64)
                    .value(self.spline.0 as f64)
                    .value(start_kind)
                    .value(start)
                    .value(end_kind)
                    .value(end)
                    .flag(self.mirror)
                    .flag(self.lock_to_parent)
            }
            ObjectConcern::Components => Fingerprint::new()
                .value(self.containers.len() as f64)
                .value(self.children as f64)
                .value(
                    self.containers
                        .iter()
                        .map(|c| c.origin.vertex_count() as f64)
                        .sum(),
                )
                .with_revision(self.components_revision),
        }
    }
}

/// Resolves the ancestors of an object whose direct parent is `parent`.
///
/// `parent_of` returns the parent of a registered object (`Some(None)` for a
/// root) or `None` when the id is unknown. The result lists ancestors from the
/// root down to the direct parent.
pub fn resolve_chain(
    object: ObjectId,
    parent: Option<ObjectId>,
    max_depth: usize,
    parent_of: impl Fn(ObjectId) -> Option<Option<ObjectId>>,
) -> Result<Vec<ObjectId>, ObjectError> {
    let mut chain = Vec::new();
    let mut cursor = parent;
    while let Some(current) = cursor {
        if current == object || chain.contains(&current) {
            return Err(ObjectError::HierarchyCycle(object));
        }
        if chain.len() == max_depth {
            return Err(ObjectError::HierarchyTooDeep {
                object,
                max: max_depth,
            });
        }
        chain.push(current);
        cursor = parent_of(current).ok_or(ObjectError::UnknownParent(current))?;
    }
    chain.reverse();
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Vec3;
    use std::collections::HashMap;

    fn parents(pairs: &[(u64, Option<u64>)]) -> HashMap<ObjectId, Option<ObjectId>> {
        pairs
            .iter()
            .map(|&(id, parent)| (ObjectId(id), parent.map(ObjectId)))
            .collect()
    }

    #[test]
    fn chain_lists_root_first() {
        let map = parents(&[(1, None), (2, Some(1)), (3, Some(2))]);
        let chain = resolve_chain(ObjectId(4), Some(ObjectId(3)), 25, |id| map.get(&id).copied())
            .unwrap();
        assert_eq!(chain, vec![ObjectId(1), ObjectId(2), ObjectId(3)]);
    }

    #[test]
    fn chain_rejects_cycles_and_unknown_parents() {
        let map = parents(&[(1, Some(2)), (2, Some(1))]);
        assert_eq!(
            resolve_chain(ObjectId(3), Some(ObjectId(1)), 25, |id| map.get(&id).copied()),
            Err(ObjectError::HierarchyCycle(ObjectId(3)))
        );
        assert_eq!(
            resolve_chain(ObjectId(3), Some(ObjectId(9)), 25, |id| map.get(&id).copied()),
            Err(ObjectError::UnknownParent(ObjectId(9)))
        );
    }

    #[test]
    fn chain_depth_is_bounded() {
        let pairs: Vec<_> = (0..10u64)
            .map(|i| (i, if i == 0 { None } else { Some(i - 1) }))
            .collect();
        let map = parents(&pairs);
        let lookup = |id| map.get(&id).copied();
        assert!(resolve_chain(ObjectId(10), Some(ObjectId(9)), 10, lookup).is_ok());
        assert_eq!(
            resolve_chain(ObjectId(10), Some(ObjectId(9)), 9, lookup),
            Err(ObjectError::HierarchyTooDeep {
                object: ObjectId(10),
                max: 9
            })
        );
    }

    #[test]
    fn nearest_anchor_respects_max_distance() {
        let anchors = [0.0, 5.0, 10.0];
        let target = SnapTarget::NearestAnchor { max_distance: 1.0 };
        assert_eq!(target.resolve(4.4, &anchors), Some(5.0));
        assert_eq!(target.resolve(7.5, &anchors), None);
        assert_eq!(SnapTarget::Length(3.0).resolve(99.0, &anchors), Some(3.0));
    }

    #[test]
    fn zero_scale_is_detected() {
        let desc = ObjectDesc::new(SplineId(1), DeformKind::Deformation)
            .with_local(Pose::IDENTITY.with_scale(Vec3::new(1.0, 0.0, 1.0)));
        let object = SplineObject::from_desc(ObjectId(1), desc).unwrap();
        assert!(!object.has_valid_scale());
    }

    #[test]
    fn invalid_meshes_are_rejected() {
        let desc = ObjectDesc::new(SplineId(1), DeformKind::Deformation)
            .with_mesh(MeshId(7), GeomMesh::new(vec![[0.0; 3]], vec![0, 0, 4]));
        assert!(matches!(
            SplineObject::from_desc(ObjectId(1), desc),
            Err(ObjectError::InvalidMesh { mesh: MeshId(7), .. })
        ));
    }
}
