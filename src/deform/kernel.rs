//! Per-vertex deformation pipeline.
//!
//! Each vertex goes through, in order:
//!
//! 1. local to curve space via the object's composed transform (mirror
//!    negates the lateral axis);
//! 2. snapping: piecewise-linear remap of `z` on either side of the object's
//!    midpoint onto the snap targets;
//! 3. end extension: on open curves distances past either end extrapolate
//!    along the end tangent;
//! 4. frame lookup at the arc-length corrected parameter;
//! 5. saddle skew `y += skew.y * x^2`, `x += skew.x * y^2 * -sign(x)`;
//! 6. lateral scale;
//! 7. noise added to the vertical offset, sampled at world `(x, z)`;
//! 8. roll about the forward axis;
//! 9. reprojection `origin + x * right + y * up`, mapped back into mesh-local
//!    space through the inverse of the composed transform.
//!
//! Followers only run steps 1, 4 and 8 on their origin.
//!
//! Vertices are independent of each other: every function here takes shared
//! references only and can be mapped over a buffer in parallel.

use crate::geom::{NoiseStack, Point3, Pose, Quat, Tolerance, Transform, Vec3};
use crate::spline::Spline;

/// Read-only view of a built spline as seen by the kernel.
#[derive(Debug, Clone, Copy)]
pub struct CurveView<'a> {
    spline: &'a Spline,
    world: Transform,
    world_rotation: Quat,
}

impl<'a> CurveView<'a> {
    /// `None` when the spline has no arc-length data yet.
    #[must_use]
    pub fn new(spline: &'a Spline) -> Option<Self> {
        spline.is_built().then(|| Self {
            spline,
            world: spline.pose().to_transform(),
            world_rotation: spline.world_rotation(),
        })
    }

    #[must_use]
    pub fn spline(&self) -> &'a Spline {
        self.spline
    }
}

/// Snap remap of the curve-space `z` coordinate.
///
/// The object's extent `[z_min, z_max]` is split at its midpoint; the front
/// half is stretched onto `start` and the back half onto `end`. When both ends
/// are pinned the midpoint moves to halfway between the targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapRemap {
    pub z_min: f64,
    pub z_max: f64,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl SnapRemap {
    #[must_use]
    pub fn apply(&self, z: f64) -> f64 {
        let z_mid = (self.z_min + self.z_max) * 0.5;
        let mid = match (self.start, self.end) {
            (Some(start), Some(end)) => (start + end) * 0.5,
            _ => z_mid,
        };

        if z < z_mid {
            let Some(start) = self.start else {
                return z;
            };
            let half = z_mid - self.z_min;
            if half <= Tolerance::ZERO_LENGTH.eps {
                return start;
            }
            start + (z - self.z_min) / half * (mid - start)
        } else {
            let Some(end) = self.end else {
                return z;
            };
            let half = self.z_max - z_mid;
            if half <= Tolerance::ZERO_LENGTH.eps {
                return end;
            }
            mid + (z - z_mid) / half * (end - mid)
        }
    }
}

/// Per-object data shared by all of its vertices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectPlacement {
    local: Transform,
    inverse: Transform,
    mirror: bool,
    snap: Option<SnapRemap>,
}

impl ObjectPlacement {
    /// `None` when `local` is singular (a collapsed scale axis).
    #[must_use]
    pub fn new(local: Transform, mirror: bool) -> Option<Self> {
        Some(Self {
            local,
            inverse: local.inverse()?,
            mirror,
            snap: None,
        })
    }

    #[must_use]
    pub fn with_snap(mut self, snap: Option<SnapRemap>) -> Self {
        self.snap = snap;
        self
    }

    #[must_use]
    pub fn mirror(&self) -> bool {
        self.mirror
    }

    /// Step 1: mesh-local point to curve space.
    #[must_use]
    pub fn curve_space(&self, v: Point3) -> Point3 {
        let mut c = self.local.apply_point(v);
        if self.mirror {
            c.x = -c.x;
        }
        c
    }
}

fn rotate_lateral(x: f64, y: f64, roll: f64) -> (f64, f64) {
    if roll == 0.0 {
        return (x, y);
    }
    let (s, c) = roll.sin_cos();
    (x * c - y * s, x * s + y * c)
}

fn neg_sign(x: f64) -> f64 {
    if x > 0.0 {
        -1.0
    } else if x < 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Runs the full pipeline on one mesh-local vertex.
///
/// Returns the vertex unchanged if the curve cannot be sampled.
#[must_use]
pub fn deform_vertex(
    curve: &CurveView<'_>,
    noise: &NoiseStack,
    placement: &ObjectPlacement,
    v: Point3,
) -> Point3 {
    let c = placement.curve_space(v);
    let z = placement.snap.map_or(c.z, |snap| snap.apply(c.z));

    let Some(sample) = curve.spline.frame_at_distance(z) else {
        return v;
    };
    let frame = sample.frame;
    let shaping = curve.spline.shaping_at(sample.time);

    let (mut x, mut y) = (c.x, c.y);
    let skew = shaping.saddle_skew;
    if skew.x != 0.0 || skew.y != 0.0 {
        let (x0, y0) = (x, y);
        y += skew.y * x0 * x0;
        x += skew.x * y0 * y0 * neg_sign(x0);
    }

    x *= shaping.scale.x;
    y *= shaping.scale.y;

    if !noise.is_empty() && shaping.noise_weight != 0.0 {
        let world = curve.world.apply_point(frame.place(x, y));
        y += noise.sample(world.x, world.z) * shaping.noise_weight;
    }

    let (x, y) = rotate_lateral(x, y, shaping.roll);

    placement.inverse.apply_point(frame.place(x, y))
}

/// World pose of a follower whose curve-space placement is `placement`.
///
/// `local_rotation` and `scale` are the object's own rotation and scale,
/// carried on top of the curve frame.
#[must_use]
pub fn follow_pose(
    curve: &CurveView<'_>,
    placement: &ObjectPlacement,
    local_rotation: Quat,
    scale: Vec3,
) -> Option<Pose> {
    let c = placement.curve_space(Point3::ORIGIN);
    let sample = curve.spline.frame_at_distance(c.z)?;
    let frame = sample.frame;
    let roll = curve.spline.shaping_at(sample.time).roll;

    let (x, y) = rotate_lateral(c.x, c.y, roll);
    let position = curve.world.apply_point(frame.place(x, y));
    let rotation = curve.world_rotation
        * frame.rotation()
        * Quat::from_axis_angle(Vec3::Z, roll)
        * local_rotation.normalized();

    Some(Pose {
        position: position.to_vec3(),
        rotation: rotation.normalized(),
        scale,
    })
}
