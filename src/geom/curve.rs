use serde::Serialize;

use super::core::{Point3, Quat, Tolerance, Vec3};

pub trait Curve3 {
    fn point_at(&self, t: f64) -> Point3;

    #[must_use]
    fn domain(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    /// Central-difference derivative; curves with an analytic form override this.
    #[must_use]
    fn derivative_at(&self, t: f64) -> Vec3 {
        let (a, b) = self.domain();
        let span = b - a;
        if !span.is_finite() || span == 0.0 {
            return Vec3::ZERO;
        }

        let h = Tolerance::DERIVATIVE.eps * span.abs();
        let t0 = (t - h).max(a);
        let t1 = (t + h).min(b);
        if t1 == t0 {
            return Vec3::ZERO;
        }

        (self.point_at(t1) - self.point_at(t0)) * (1.0 / (t1 - t0))
    }

    /// Unit tangent at `t`, or `None` when the derivative vanishes.
    #[must_use]
    fn tangent_at(&self, t: f64) -> Option<Vec3> {
        self.derivative_at(t).normalized()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicBezier3 {
    pub p0: Point3,
    pub p1: Point3,
    pub p2: Point3,
    pub p3: Point3,
}

impl CubicBezier3 {
    #[must_use]
    pub const fn new(p0: Point3, p1: Point3, p2: Point3, p3: Point3) -> Self {
        Self { p0, p1, p2, p3 }
    }

    /// Tangent with fallbacks for spans whose control points coincide with
    /// their anchors (zero derivative at the ends).
    #[must_use]
    pub fn robust_tangent_at(&self, t: f64) -> Vec3 {
        if let Some(tangent) = self.tangent_at(t) {
            return tangent;
        }
        let h = 1e-3;
        let (a, b) = ((t - h).max(0.0), (t + h).min(1.0));
        (self.point_at(b) - self.point_at(a))
            .normalized()
            .or_else(|| (self.p3 - self.p0).normalized())
            .unwrap_or(Vec3::Z)
    }
}

impl Curve3 for CubicBezier3 {
    fn point_at(&self, t: f64) -> Point3 {
        let t = t.clamp(0.0, 1.0);
        let u = 1.0 - t;
        let (b0, b1, b2, b3) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
        Point3::new(
            self.p0.x * b0 + self.p1.x * b1 + self.p2.x * b2 + self.p3.x * b3,
            self.p0.y * b0 + self.p1.y * b1 + self.p2.y * b2 + self.p3.y * b3,
            self.p0.z * b0 + self.p1.z * b1 + self.p2.z * b2 + self.p3.z * b3,
        )
    }

    fn derivative_at(&self, t: f64) -> Vec3 {
        let t = t.clamp(0.0, 1.0);
        let u = 1.0 - t;
        let a = self.p1 - self.p0;
        let b = self.p2 - self.p1;
        let c = self.p3 - self.p2;
        a * (3.0 * u * u) + b * (6.0 * u * t) + c * (3.0 * t * t)
    }
}

/// Oriented frame on a curve.
///
/// Axis convention used throughout the engine: `x_axis` is the lateral
/// (right) direction, `y_axis` is up and `z_axis` is the forward tangent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurveFrame {
    pub origin: Point3,
    pub x_axis: Vec3,
    pub y_axis: Vec3,
    pub z_axis: Vec3,
}

impl CurveFrame {
    #[must_use]
    pub fn rotation(&self) -> Quat {
        Quat::from_basis(self.x_axis, self.y_axis, self.z_axis)
    }

    /// Maps lateral/vertical offsets into the frame.
    #[must_use]
    pub fn place(&self, lateral: f64, vertical: f64) -> Point3 {
        self.origin + self.x_axis * lateral + self.y_axis * vertical
    }

    /// Interpolates two frames and re-orthonormalizes the result.
    #[must_use]
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        let forward = self
            .z_axis
            .lerp(other.z_axis, t)
            .normalized()
            .unwrap_or(self.z_axis);
        let right = self.x_axis.lerp(other.x_axis, t);
        orthonormal_frame(self.origin.lerp(other.origin, t), forward, right)
    }
}

/// Frame whose right axis is derived from a fixed world up vector.
///
/// Cheap, but discontinuous where the tangent approaches `world_up`.
#[must_use]
pub fn static_frame_at(origin: Point3, forward: Vec3, world_up: Vec3) -> CurveFrame {
    let right = world_up
        .cross(forward)
        .normalized()
        .unwrap_or_else(|| forward.any_orthogonal());
    orthonormal_frame(origin, forward, right)
}

/// Propagates `previous` to the next sample with the double reflection method
/// (Wang et al. 2008, rotation minimizing frames).
#[must_use]
pub fn transport_frame(previous: &CurveFrame, origin: Point3, forward: Vec3) -> CurveFrame {
    let v1 = origin - previous.origin;
    let c1 = v1.dot(v1);
    if c1 < Tolerance::ZERO_LENGTH.eps {
        return orthonormal_frame(origin, forward, previous.x_axis);
    }

    let r_l = previous.x_axis - v1 * (2.0 / c1 * v1.dot(previous.x_axis));
    let t_l = previous.z_axis - v1 * (2.0 / c1 * v1.dot(previous.z_axis));

    let v2 = forward - t_l;
    let c2 = v2.dot(v2);
    let right = if c2 < Tolerance::ZERO_LENGTH.eps {
        r_l
    } else {
        r_l - v2 * (2.0 / c2 * v2.dot(r_l))
    };
    orthonormal_frame(origin, forward, right)
}

fn orthonormal_frame(origin: Point3, forward: Vec3, right_hint: Vec3) -> CurveFrame {
    let right = (right_hint - forward * forward.dot(right_hint))
        .normalized()
        .unwrap_or_else(|| forward.any_orthogonal());
    let up = forward.cross(right);
    CurveFrame {
        origin,
        x_axis: right,
        y_axis: up,
        z_axis: forward,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_bezier() -> CubicBezier3 {
        CubicBezier3::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.0, 0.0, 2.0),
            Point3::new(0.0, 0.0, 3.0),
        )
    }

    #[test]
    fn bezier_endpoints_and_midpoint() {
        let curve = straight_bezier();
        assert_eq!(curve.point_at(0.0), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(curve.point_at(1.0), Point3::new(0.0, 0.0, 3.0));
        assert!((curve.point_at(0.5).z - 1.5).abs() < 1e-12);
    }

    #[test]
    fn degenerate_handles_still_produce_tangent() {
        let curve = CubicBezier3::new(
            Point3::ORIGIN,
            Point3::ORIGIN,
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
        );
        assert!(curve.tangent_at(0.0).is_none());
        let tangent = curve.robust_tangent_at(0.0);
        assert!((tangent - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn static_frame_is_right_handed() {
        let frame = static_frame_at(Point3::ORIGIN, Vec3::Z, Vec3::Y);
        assert!((frame.x_axis - Vec3::X).length() < 1e-12);
        assert!((frame.y_axis - Vec3::Y).length() < 1e-12);
    }

    #[test]
    fn static_frame_handles_vertical_tangent() {
        let frame = static_frame_at(Point3::ORIGIN, Vec3::Y, Vec3::Y);
        assert!(frame.x_axis.dot(Vec3::Y).abs() < 1e-12);
        assert!((frame.x_axis.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn transport_keeps_frame_on_straight_line() {
        let start = static_frame_at(Point3::ORIGIN, Vec3::Z, Vec3::Y);
        let next = transport_frame(&start, Point3::new(0.0, 0.0, 1.0), Vec3::Z);
        assert!((next.x_axis - start.x_axis).length() < 1e-12);
        assert!((next.y_axis - start.y_axis).length() < 1e-12);
    }
}
