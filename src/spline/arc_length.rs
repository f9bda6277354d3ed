//! Arc-length parametrization of a spline.
//!
//! The cubic parameter `t` does not advance uniformly with distance, so the
//! table built here maps a normalized length fraction onto the parameter that
//! reaches that distance. It is built in two passes:
//!
//! 1. a coarse pass that splits `resolution` chord samples across the spans
//!    (at least [`MIN_COARSE_SAMPLES_PER_SPAN`] each) to estimate the length of
//!    every span;
//! 2. a fine pass that walks every span with its share of the
//!    `1 / sampling_step` sample budget, proportional to the coarse estimate
//!    and never below [`MIN_FINE_SAMPLES_PER_SPAN`], accumulating the refined
//!    span offsets, span lengths and total.
//!
//! `distance_map[k]` is then the parameter at which the accumulated fine
//! distance reaches `k / resolution` of the fine total, so every lookup and
//! the reported length come from the same pass.

use serde::{Deserialize, Serialize};

use crate::geom::Point3;

pub const DEFAULT_RESOLUTION: usize = 512;
pub const DEFAULT_SAMPLING_STEP: f64 = 0.0002;
/// Upper bound on distance-map buckets.
pub const MAX_RESOLUTION: usize = 1 << 16;
/// Smallest accepted fine-pass step.
pub const MIN_SAMPLING_STEP: f64 = 1e-6;
pub const MIN_COARSE_SAMPLES_PER_SPAN: usize = 4;
pub const MIN_FINE_SAMPLES_PER_SPAN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcLengthSettings {
    /// Number of distance-map buckets (and coarse chord samples).
    pub resolution: usize,
    /// Parameter increment of the fine pass.
    pub sampling_step: f64,
    pub build_position_map: bool,
}

impl Default for ArcLengthSettings {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            sampling_step: DEFAULT_SAMPLING_STEP,
            build_position_map: true,
        }
    }
}

impl ArcLengthSettings {
    /// Settings with out-of-range values replaced by usable ones.
    ///
    /// The resolution is clamped to `[2, MAX_RESOLUTION]` and the step to at
    /// most one bucket and at least [`MIN_SAMPLING_STEP`].
    #[must_use]
    pub fn sanitized(self) -> Self {
        let resolution = self.resolution.clamp(2, MAX_RESOLUTION);
        let step = if self.sampling_step.is_finite() && self.sampling_step > 0.0 {
            self.sampling_step
        } else {
            DEFAULT_SAMPLING_STEP
        };
        Self {
            resolution,
            sampling_step: step.min(1.0 / resolution as f64).max(MIN_SAMPLING_STEP),
            build_position_map: self.build_position_map,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArcLengthTable {
    total_length: f64,
    span_offsets: Vec<f64>,
    span_lengths: Vec<f64>,
    distance_map: Vec<f64>,
    position_map: Option<Vec<Point3>>,
}

impl ArcLengthTable {
    /// Builds the table for a curve made of `span_count` spans.
    ///
    /// `span_point(s, local_t)` evaluates span `s` (0-based) and
    /// `point_at(t)` evaluates the whole curve at global parameter `t`, where
    /// `t = (s + local_t) / span_count`.
    pub fn build(
        span_count: usize,
        settings: ArcLengthSettings,
        span_point: impl Fn(usize, f64) -> Point3,
        point_at: impl Fn(f64) -> Point3,
    ) -> Self {
        let settings = settings.sanitized();
        let resolution = settings.resolution;
        let span_count = span_count.max(1);

        // Coarse pass.
        let per_span = (resolution / span_count).max(MIN_COARSE_SAMPLES_PER_SPAN);
        let estimates: Vec<f64> = (0..span_count)
            .map(|span| {
                let mut length = 0.0;
                let mut prev = span_point(span, 0.0);
                for i in 1..=per_span {
                    let curr = span_point(span, i as f64 / per_span as f64);
                    length += curr.distance_to(prev);
                    prev = curr;
                }
                length
            })
            .collect();
        let coarse_total: f64 = estimates.iter().sum();

        // Fine pass: (global parameter, accumulated distance) samples.
        let budget = (1.0 / settings.sampling_step).ceil() as usize;
        let mut samples = Vec::with_capacity(budget + span_count * MIN_FINE_SAMPLES_PER_SPAN + 1);
        samples.push((0.0, 0.0));
        let mut span_offsets = Vec::with_capacity(span_count);
        let mut span_lengths = Vec::with_capacity(span_count);
        let mut travelled = 0.0;
        for (span, estimate) in estimates.iter().enumerate() {
            let share = if coarse_total > 0.0 {
                estimate / coarse_total
            } else {
                1.0 / span_count as f64
            };
            let steps = ((budget as f64 * share).ceil() as usize).max(MIN_FINE_SAMPLES_PER_SPAN);
            let start = travelled;
            let mut prev = span_point(span, 0.0);
            for i in 1..=steps {
                let local = i as f64 / steps as f64;
                let point = span_point(span, local);
                travelled += point.distance_to(prev);
                prev = point;
                samples.push(((span as f64 + local) / span_count as f64, travelled));
            }
            span_offsets.push(start);
            span_lengths.push(travelled - start);
        }

        let distance_map = bucket(&samples, resolution, travelled);
        let position_map = settings
            .build_position_map
            .then(|| distance_map.iter().map(|&t| point_at(t)).collect());

        log::debug!(
            "arc length table: {span_count} spans, coarse {coarse_total:.6}, fine {travelled:.6}, {resolution} buckets"
        );

        Self {
            total_length: travelled,
            span_offsets,
            span_lengths,
            distance_map,
            position_map,
        }
    }

    #[must_use]
    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    #[must_use]
    pub fn resolution(&self) -> usize {
        self.distance_map.len() - 1
    }

    #[must_use]
    pub fn span_offsets(&self) -> &[f64] {
        &self.span_offsets
    }

    #[must_use]
    pub fn span_lengths(&self) -> &[f64] {
        &self.span_lengths
    }

    #[must_use]
    pub fn distance_map(&self) -> &[f64] {
        &self.distance_map
    }

    #[must_use]
    pub fn position_map(&self) -> Option<&[Point3]> {
        self.position_map.as_deref()
    }

    /// Length fraction to the arc-length corrected curve parameter.
    ///
    /// The fraction is clamped to `[0, 1]`.
    #[must_use]
    pub fn time_to_fixed_time(&self, fraction: f64) -> f64 {
        let (lo, hi, alpha) = self.bracket(fraction);
        let (a, b) = (self.distance_map[lo], self.distance_map[hi]);
        a + (b - a) * alpha
    }

    /// Inverse of [`time_to_fixed_time`](Self::time_to_fixed_time): curve
    /// parameter to length fraction.
    #[must_use]
    pub fn fixed_time_to_time(&self, t: f64) -> f64 {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let map = &self.distance_map;
        let hi = map.partition_point(|&entry| entry < t).clamp(1, map.len() - 1);
        let lo = hi - 1;
        let (a, b) = (map[lo], map[hi]);
        let alpha = if b > a { ((t - a) / (b - a)).clamp(0.0, 1.0) } else { 0.0 };
        (lo as f64 + alpha) / self.resolution() as f64
    }

    /// Distance from the curve start to parameter `t`.
    #[must_use]
    pub fn length_at(&self, t: f64) -> f64 {
        self.fixed_time_to_time(t) * self.total_length
    }

    /// Interpolated position-map lookup, or `None` when the map was not built.
    #[must_use]
    pub fn position_at(&self, fraction: f64) -> Option<Point3> {
        let positions = self.position_map.as_ref()?;
        let (lo, hi, alpha) = self.bracket(fraction);
        Some(positions[lo].lerp(positions[hi], alpha))
    }

    fn bracket(&self, fraction: f64) -> (usize, usize, f64) {
        let resolution = self.resolution();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let scaled = fraction * resolution as f64;
        let lo = (scaled.floor() as usize).min(resolution - 1);
        (lo, lo + 1, scaled - lo as f64)
    }
}

/// Parameters at which the accumulated distance of `samples` crosses each
/// `k / resolution` of `total`. Endpoints are pinned to 0 and 1.
fn bucket(samples: &[(f64, f64)], resolution: usize, total: f64) -> Vec<f64> {
    let mut map = Vec::with_capacity(resolution + 1);
    map.push(0.0);
    let mut cursor = 1;
    for k in 1..resolution {
        let target = k as f64 / resolution as f64 * total;
        while cursor < samples.len() - 1 && samples[cursor].1 < target {
            cursor += 1;
        }
        let (t0, d0) = samples[cursor - 1];
        let (t1, d1) = samples[cursor];
        let alpha = if d1 > d0 {
            ((target - d0) / (d1 - d0)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        map.push(t0 + (t1 - t0) * alpha);
    }
    map.push(1.0);
    map
}
