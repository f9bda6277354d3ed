//! Junctions that pin segment anchors of one or more splines.
//!
//! A [`Connector`] has a world pose. When it moves, every linked anchor is
//! carried along by the same rigid motion; the tangent handles keep their
//! offsets from the anchor, rotated by the connector's rotation delta.
//!
//! The pose each linked spline was last brought in line with is tracked per
//! spline, so a spline that could not be carried stays pending without the
//! others being moved twice.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geom::{Pose, Quat, Vec3};
use crate::monitor::{ConnectorConcern, Fingerprint, Monitored};
use crate::spline::{Segment, Spline, SplineError, SplineId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ConnectorId(pub u64);

impl From<u64> for ConnectorId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectorError {
    #[error("pose of connector {0:?} is not finite")]
    NonFinitePose(ConnectorId),
    #[error("pose of spline {0:?} cannot be inverted")]
    SingularSplinePose(SplineId),
    #[error(transparent)]
    Spline(#[from] SplineError),
}

/// One pinned anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentLink {
    pub spline: SplineId,
    pub segment: usize,
}

#[derive(Debug, Clone)]
pub struct Connector {
    id: ConnectorId,
    pose: Pose,
    /// Pose the anchors of each linked spline were last brought in line with.
    applied: BTreeMap<SplineId, Pose>,
    links: Vec<SegmentLink>,
    revision: u64,
}

impl Connector {
    pub fn new(id: ConnectorId, pose: Pose) -> Result<Self, ConnectorError> {
        if !pose.is_finite() {
            return Err(ConnectorError::NonFinitePose(id));
        }
        Ok(Self {
            id,
            pose,
            applied: BTreeMap::new(),
            links: Vec::new(),
            revision: 0,
        })
    }

    #[must_use]
    pub fn id(&self) -> ConnectorId {
        self.id
    }

    #[must_use]
    pub fn pose(&self) -> Pose {
        self.pose
    }

    #[must_use]
    pub fn links(&self) -> &[SegmentLink] {
        &self.links
    }

    pub fn set_pose(&mut self, pose: Pose) -> Result<(), ConnectorError> {
        if !pose.is_finite() {
            return Err(ConnectorError::NonFinitePose(self.id));
        }
        self.pose = pose;
        Ok(())
    }

    /// Adds a link; returns `false` if it already existed.
    ///
    /// The first link into a spline takes the current pose as the one its
    /// anchors are in line with.
    pub fn link(&mut self, spline: SplineId, segment: usize) -> bool {
        let link = SegmentLink { spline, segment };
        if self.links.contains(&link) {
            return false;
        }
        self.links.push(link);
        self.applied.entry(spline).or_insert(self.pose);
        self.revision += 1;
        true
    }

    pub fn unlink(&mut self, spline: SplineId, segment: usize) -> bool {
        let before = self.links.len();
        self.links
            .retain(|link| !(link.spline == spline && link.segment == segment));
        let removed = before != self.links.len();
        if removed {
            self.forget_unlinked();
            self.revision += 1;
        }
        removed
    }

    /// Drops every link into `spline` and returns how many were removed.
    pub fn unlink_spline(&mut self, spline: SplineId) -> usize {
        let before = self.links.len();
        self.links.retain(|link| link.spline != spline);
        let removed = before - self.links.len();
        if removed > 0 {
            self.forget_unlinked();
            self.revision += 1;
        }
        removed
    }

    fn forget_unlinked(&mut self) {
        let links = &self.links;
        self.applied
            .retain(|spline, _| links.iter().any(|link| link.spline == *spline));
    }

    /// Keeps links valid after `removed` was deleted from `spline`.
    pub(crate) fn segment_removed(&mut self, spline: SplineId, removed: usize) {
        let before = self.links.len();
        self.links
            .retain(|link| !(link.spline == spline && link.segment == removed));
        for link in &mut self.links {
            if link.spline == spline && link.segment > removed {
                link.segment -= 1;
            }
        }
        if before != self.links.len() {
            self.forget_unlinked();
            self.revision += 1;
        }
    }

    pub(crate) fn segment_inserted(&mut self, spline: SplineId, inserted: usize) {
        let mut shifted = false;
        for link in &mut self.links {
            if link.spline == spline && link.segment >= inserted {
                link.segment += 1;
                shifted = true;
            }
        }
        if shifted {
            self.revision += 1;
        }
    }

    /// Whether the pose moved since some linked spline was last updated.
    #[must_use]
    pub fn has_pending_motion(&self) -> bool {
        self.applied.values().any(|applied| *applied != self.pose)
    }

    /// Linked splines whose anchors still lag behind the current pose.
    #[must_use]
    pub fn pending_splines(&self) -> Vec<SplineId> {
        self.applied
            .iter()
            .filter(|(_, applied)| **applied != self.pose)
            .map(|(&spline, _)| spline)
            .collect()
    }

    /// Records that `spline` has been carried to the current pose.
    pub fn mark_applied(&mut self, spline: SplineId) {
        if let Some(applied) = self.applied.get_mut(&spline) {
            *applied = self.pose;
        }
    }

    /// Snaps a linked anchor onto the connector, handles included.
    pub fn pin(&self, spline: &mut Spline, segment: usize) -> Result<(), ConnectorError> {
        let inverse = spline
            .pose()
            .to_transform()
            .inverse()
            .ok_or(ConnectorError::SingularSplinePose(spline.id()))?;
        let local = inverse.apply_point(crate::geom::Point3::ORIGIN + self.pose.position);
        spline.set_anchor(segment, local)?;
        Ok(())
    }

    /// Moves the anchors of `spline` linked to this connector from the pose
    /// they were last applied at to the current one. Returns the number of
    /// anchors moved. Does not mark the spline applied.
    pub fn carry(&self, spline: &mut Spline) -> Result<usize, ConnectorError> {
        let spline_id = spline.id();
        let applied = match self.applied.get(&spline_id) {
            Some(applied) if *applied != self.pose => *applied,
            _ => return Ok(0),
        };
        let to_world = spline.pose().to_transform();
        let to_local = to_world
            .inverse()
            .ok_or(ConnectorError::SingularSplinePose(spline.id()))?;
        let from = applied.to_transform();
        let to = self.pose.to_transform();
        let from_inverse = from
            .inverse()
            .ok_or(ConnectorError::NonFinitePose(self.id))?;
        let motion = to * from_inverse;
        let spin: Quat = self.pose.rotation * applied.rotation.conjugate();

        let mut moved = 0;
        for link in self.links.iter().filter(|l| l.spline == spline_id) {
            let Some(&segment) = spline.segment(link.segment) else {
                log::warn!(
                    "connector {:?}: segment {} of {:?} no longer exists",
                    self.id,
                    link.segment,
                    link.spline
                );
                continue;
            };
            let anchor = to_local.apply_point(motion.apply_point(to_world.apply_point(segment.anchor)));
            let turn = |handle: Vec3| to_local.apply_vec(spin.rotate(to_world.apply_vec(handle)));
            let updated = Segment {
                anchor,
                tangent_a: anchor + turn(segment.tangent_a - segment.anchor),
                tangent_b: anchor + turn(segment.tangent_b - segment.anchor),
                ..segment
            };
            spline.replace_segment(link.segment, updated)?;
            moved += 1;
        }
        Ok(moved)
    }
}

impl Monitored for Connector {
    type Concern = ConnectorConcern;

    fn fingerprint(&self, concern: ConnectorConcern) -> Fingerprint {
        match concern {
            ConnectorConcern::Transform => Fingerprint::new().pose(self.pose),
            ConnectorConcern::Links => Fingerprint::new()
                .value(self.links.len() as f64)
                .value(self.links.iter().map(|l| l.spline.0 as f64).sum())
                .value(self.links.iter().map(|l| l.segment as f64).sum())
                .with_revision(self.revision),
        }
    }
}
