use serde::{Deserialize, Serialize};

use crate::geom::Vec2;

/// Per-segment cross-section shaping, blended across each span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentParams {
    /// Rotation about the forward axis, in radians.
    pub roll: f64,
    /// Exponent warping the blend toward one end of the span (1 = linear).
    pub contrast: f64,
    pub scale: Vec2,
    pub saddle_skew: Vec2,
    pub noise_weight: f64,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            roll: 0.0,
            contrast: 1.0,
            scale: Vec2::ONE,
            saddle_skew: Vec2::ZERO,
            noise_weight: 1.0,
        }
    }
}

impl SegmentParams {
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.roll.is_finite()
            && self.contrast.is_finite()
            && self.scale.is_finite()
            && self.saddle_skew.is_finite()
            && self.noise_weight.is_finite()
    }

    pub(crate) fn sum(&self) -> f64 {
        self.roll
            + self.contrast
            + self.scale.x
            + self.scale.y
            + self.saddle_skew.x
            + self.saddle_skew.y
            + self.noise_weight
    }
}

/// Interpolated shaping values at one point on the curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapingSample {
    pub roll: f64,
    pub scale: Vec2,
    pub saddle_skew: Vec2,
    pub noise_weight: f64,
}

impl ShapingSample {
    /// Blends the parameters of a span's start and end segments.
    ///
    /// The contrast exponent of `start` warps `u` before blending.
    #[must_use]
    pub fn blend(start: &SegmentParams, end: &SegmentParams, u: f64) -> Self {
        let w = contrast_warp(u, start.contrast);
        Self {
            roll: start.roll + (end.roll - start.roll) * w,
            scale: start.scale.lerp(end.scale, w),
            saddle_skew: start.saddle_skew.lerp(end.saddle_skew, w),
            noise_weight: start.noise_weight + (end.noise_weight - start.noise_weight) * w,
        }
    }
}

/// `u^c / (u^c + (1-u)^c)`: c > 1 holds the blend near the ends longer,
/// c < 1 pushes it toward the middle.
#[must_use]
pub fn contrast_warp(u: f64, contrast: f64) -> f64 {
    let u = u.clamp(0.0, 1.0);
    if !contrast.is_finite() || contrast <= 0.0 || contrast == 1.0 {
        return u;
    }
    let a = u.powf(contrast);
    let b = (1.0 - u).powf(contrast);
    if a + b > 0.0 { a / (a + b) } else { u }
}
