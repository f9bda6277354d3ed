use serde::{Deserialize, Serialize};

use crate::geom::{CurveFrame, Point3, Vec3, static_frame_at, transport_frame};

use super::arc_length::ArcLengthTable;

/// How the lateral axes of the curve are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NormalMode {
    /// World up crossed with the tangent at every query.
    #[default]
    Static,
    /// Rotation-minimizing frames precomputed along the curve.
    Dynamic,
}

/// Rotation-minimizing frames sampled at the distance-map fractions.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTable {
    frames: Vec<CurveFrame>,
}

impl FrameTable {
    /// Builds one frame per distance-map entry, starting from the static
    /// frame at the curve start and transporting it along the samples.
    ///
    /// `sample(t)` returns the curve point and unit tangent at parameter `t`.
    pub fn build(
        table: &ArcLengthTable,
        world_up: Vec3,
        sample: impl Fn(f64) -> (Point3, Vec3),
    ) -> Self {
        let mut frames = Vec::with_capacity(table.distance_map().len());
        for &t in table.distance_map() {
            let (origin, forward) = sample(t);
            let frame = match frames.last() {
                Some(previous) => transport_frame(previous, origin, forward),
                None => static_frame_at(origin, forward, world_up),
            };
            frames.push(frame);
        }
        Self { frames }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at a length fraction. Indices clamp to the table bounds.
    #[must_use]
    pub fn sample(&self, fraction: f64) -> Option<CurveFrame> {
        let last = self.frames.len().checked_sub(1)?;
        if last == 0 {
            return self.frames.first().copied();
        }
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let scaled = fraction * last as f64;
        let lo = (scaled.floor() as usize).min(last - 1);
        let hi = lo + 1;
        let alpha = scaled - lo as f64;
        Some(self.frames[lo].lerp(&self.frames[hi], alpha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{CubicBezier3, Curve3};
    use crate::spline::arc_length::ArcLengthSettings;

    fn quarter_turn() -> CubicBezier3 {
        // Rises while turning; a static frame would twist here.
        CubicBezier3::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 4.0),
            Point3::new(4.0, 6.0, 4.0),
            Point3::new(6.0, 6.0, 2.0),
        )
    }

    fn build(curve: CubicBezier3) -> FrameTable {
        let settings = ArcLengthSettings {
            resolution: 64,
            ..ArcLengthSettings::default()
        };
        let table =
            ArcLengthTable::build(1, settings, |_, t| curve.point_at(t), |t| curve.point_at(t));
        FrameTable::build(&table, Vec3::Y, |t| {
            (curve.point_at(t), curve.robust_tangent_at(t))
        })
    }

    #[test]
    fn frames_stay_orthonormal() {
        let frames = build(quarter_turn());
        assert_eq!(frames.len(), 65);
        for i in 0..=20 {
            let frame = frames.sample(i as f64 / 20.0).unwrap();
            assert!((frame.x_axis.length() - 1.0).abs() < 1e-9);
            assert!((frame.y_axis.length() - 1.0).abs() < 1e-9);
            assert!(frame.x_axis.dot(frame.z_axis).abs() < 1e-9);
            assert!(frame.y_axis.dot(frame.z_axis).abs() < 1e-9);
        }
    }

    #[test]
    fn neighbouring_frames_rotate_smoothly() {
        let frames = build(quarter_turn());
        let mut previous = frames.sample(0.0).unwrap();
        for i in 1..=100 {
            let frame = frames.sample(i as f64 / 100.0).unwrap();
            assert!(frame.x_axis.dot(previous.x_axis) > 0.95);
            previous = frame;
        }
    }

    #[test]
    fn lookups_outside_range_clamp() {
        let frames = build(quarter_turn());
        assert_eq!(frames.sample(-1.0), frames.sample(0.0));
        assert_eq!(frames.sample(7.0), frames.sample(1.0));
    }
}
