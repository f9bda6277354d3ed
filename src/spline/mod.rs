//! Piecewise cubic curves built from connected segments.
//!
//! A [`Spline`] owns its segments and the data derived from them (arc-length
//! table and, for [`NormalMode::Dynamic`], a frame table). Segment edits go
//! through targeted mutators that bump revision counters, which the change
//! monitors fold into their fingerprints. Derived data is dropped by
//! [`Spline::invalidate`] and rebuilt by [`Spline::rebuild`]; the context
//! decides when based on change detection.

pub mod arc_length;
pub mod frames;
pub mod shaping;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geom::{
    CubicBezier3, Curve3, CurveFrame, NoiseLayer, Point3, Pose, Quat, Vec3, static_frame_at,
};
use crate::monitor::{Fingerprint, Monitored, SplineConcern};

pub use arc_length::{ArcLengthSettings, ArcLengthTable};
pub use frames::{FrameTable, NormalMode};
pub use shaping::{SegmentParams, ShapingSample, contrast_warp};

pub const MIN_SEGMENTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SplineId(pub u64);

impl SplineId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl From<u64> for SplineId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplineError {
    #[error("a spline needs at least 2 segments, got {0}")]
    TooFewSegments(usize),
    #[error("segment {0} has non-finite control points or parameters")]
    NonFiniteSegment(usize),
    #[error("segment index {index} out of range for {len} segments")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("spline pose is not finite")]
    NonFinitePose,
}

/// Constraint applied to the incoming handle when the outgoing one is edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TangentMode {
    #[default]
    Free,
    /// Incoming handle is the point reflection of the outgoing one.
    Mirrored,
    /// Incoming handle keeps its length but stays collinear.
    Aligned,
}

/// Anchor plus its two handles. Handles are absolute positions in curve space:
/// `tangent_a` leaves the anchor toward the next segment and `tangent_b`
/// arrives from the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub anchor: Point3,
    pub tangent_a: Point3,
    pub tangent_b: Point3,
    #[serde(default)]
    pub tangent_mode: TangentMode,
    #[serde(default)]
    pub params: SegmentParams,
}

impl Segment {
    #[must_use]
    pub fn new(anchor: Point3, tangent_a: Point3, tangent_b: Point3) -> Self {
        Self {
            anchor,
            tangent_a,
            tangent_b,
            tangent_mode: TangentMode::Free,
            params: SegmentParams::default(),
        }
    }

    /// Segment whose handles are symmetric around the anchor along `direction`.
    #[must_use]
    pub fn smooth(anchor: Point3, direction: Vec3) -> Self {
        Self {
            tangent_mode: TangentMode::Mirrored,
            ..Self::new(anchor, anchor + direction, anchor - direction)
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: SegmentParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.anchor.is_finite()
            && self.tangent_a.is_finite()
            && self.tangent_b.is_finite()
            && self.params.is_finite()
    }
}

/// Host-facing description of a spline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineDesc {
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub looped: bool,
    #[serde(default)]
    pub normal_mode: NormalMode,
    #[serde(default)]
    pub noise_layers: Vec<NoiseLayer>,
    #[serde(default)]
    pub pose: Pose,
    /// Overrides the engine-wide arc-length settings when present.
    #[serde(default)]
    pub arc_length: Option<ArcLengthSettings>,
}

impl SplineDesc {
    #[must_use]
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            looped: false,
            normal_mode: NormalMode::Static,
            noise_layers: Vec::new(),
            pose: Pose::IDENTITY,
            arc_length: None,
        }
    }
}

/// Frame plus the parameters it was sampled at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveSample {
    pub frame: CurveFrame,
    /// Raw cubic parameter, used for shaping lookups.
    pub time: f64,
    /// Length fraction, unclamped for extrapolated samples.
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct DerivedData {
    arc: ArcLengthTable,
    frames: Option<FrameTable>,
    /// World up expressed in curve space when the data was built.
    local_up: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SplineRevisions {
    pub control_points: u64,
    pub shaping: u64,
    pub settings: u64,
    pub noise: u64,
}

#[derive(Debug, Clone)]
pub struct Spline {
    id: SplineId,
    segments: Vec<Segment>,
    looped: bool,
    normal_mode: NormalMode,
    noise_layers: Vec<NoiseLayer>,
    pose: Pose,
    arc_settings: ArcLengthSettings,
    revisions: SplineRevisions,
    derived: Option<DerivedData>,
}

impl Spline {
    pub fn new(id: SplineId, segments: Vec<Segment>) -> Result<Self, SplineError> {
        Self::from_desc(id, SplineDesc::new(segments), ArcLengthSettings::default())
    }

    pub fn from_desc(
        id: SplineId,
        desc: SplineDesc,
        default_settings: ArcLengthSettings,
    ) -> Result<Self, SplineError> {
        if desc.segments.len() < MIN_SEGMENTS {
            return Err(SplineError::TooFewSegments(desc.segments.len()));
        }
        if let Some(index) = desc.segments.iter().position(|s| !s.is_finite()) {
            return Err(SplineError::NonFiniteSegment(index));
        }
        if !desc.pose.is_finite() {
            return Err(SplineError::NonFinitePose);
        }
        Ok(Self {
            id,
            segments: desc.segments,
            looped: desc.looped,
            normal_mode: desc.normal_mode,
            noise_layers: desc.noise_layers,
            pose: desc.pose,
            arc_settings: desc.arc_length.unwrap_or(default_settings).sanitized(),
            revisions: SplineRevisions::default(),
            derived: None,
        })
    }

    #[must_use]
    pub fn id(&self) -> SplineId {
        self.id
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// `N - 1` for open curves, `N` for looped ones (the closing span joins
    /// the last anchor back to the first).
    #[must_use]
    pub fn span_count(&self) -> usize {
        if self.looped {
            self.segments.len()
        } else {
            self.segments.len() - 1
        }
    }

    #[must_use]
    pub fn is_looped(&self) -> bool {
        self.looped
    }

    #[must_use]
    pub fn normal_mode(&self) -> NormalMode {
        self.normal_mode
    }

    #[must_use]
    pub fn noise_layers(&self) -> &[NoiseLayer] {
        &self.noise_layers
    }

    #[must_use]
    pub fn pose(&self) -> Pose {
        self.pose
    }

    #[must_use]
    pub fn arc_length_settings(&self) -> ArcLengthSettings {
        self.arc_settings
    }

    #[must_use]
    pub fn revisions(&self) -> SplineRevisions {
        self.revisions
    }

    // ── mutators ────────────────────────────────────────────────────────────

    pub fn set_looped(&mut self, looped: bool) {
        if self.looped != looped {
            self.looped = looped;
            self.revisions.settings += 1;
        }
    }

    pub fn set_normal_mode(&mut self, mode: NormalMode) {
        if self.normal_mode != mode {
            self.normal_mode = mode;
            self.revisions.settings += 1;
        }
    }

    pub fn set_pose(&mut self, pose: Pose) -> Result<(), SplineError> {
        if !pose.is_finite() {
            return Err(SplineError::NonFinitePose);
        }
        self.pose = pose;
        Ok(())
    }

    pub fn set_noise_layers(&mut self, layers: Vec<NoiseLayer>) {
        self.noise_layers = layers;
        self.revisions.noise += 1;
    }

    pub fn set_arc_length_settings(&mut self, settings: ArcLengthSettings) {
        self.arc_settings = settings.sanitized();
    }

    /// Moves an anchor; its handles travel with it.
    pub fn set_anchor(&mut self, index: usize, anchor: Point3) -> Result<(), SplineError> {
        if !anchor.is_finite() {
            return Err(SplineError::NonFiniteSegment(index));
        }
        let segment = self.segment_entry(index)?;
        let delta = anchor - segment.anchor;
        segment.anchor = anchor;
        segment.tangent_a = segment.tangent_a + delta;
        segment.tangent_b = segment.tangent_b + delta;
        self.revisions.control_points += 1;
        Ok(())
    }

    /// Sets the outgoing handle; the incoming one follows the segment's
    /// [`TangentMode`].
    pub fn set_tangent_a(&mut self, index: usize, tangent: Point3) -> Result<(), SplineError> {
        if !tangent.is_finite() {
            return Err(SplineError::NonFiniteSegment(index));
        }
        let segment = self.segment_entry(index)?;
        segment.tangent_a = tangent;
        let out = tangent - segment.anchor;
        match segment.tangent_mode {
            TangentMode::Free => {}
            TangentMode::Mirrored => segment.tangent_b = segment.anchor - out,
            TangentMode::Aligned => {
                let length = (segment.tangent_b - segment.anchor).length();
                if let Some(direction) = out.normalized() {
                    segment.tangent_b = segment.anchor - direction * length;
                }
            }
        }
        self.revisions.control_points += 1;
        Ok(())
    }

    /// Sets the incoming handle without constraining the outgoing one.
    pub fn set_tangent_b(&mut self, index: usize, tangent: Point3) -> Result<(), SplineError> {
        if !tangent.is_finite() {
            return Err(SplineError::NonFiniteSegment(index));
        }
        self.segment_entry(index)?.tangent_b = tangent;
        self.revisions.control_points += 1;
        Ok(())
    }

    pub fn set_tangent_mode(&mut self, index: usize, mode: TangentMode) -> Result<(), SplineError> {
        self.segment_entry(index)?.tangent_mode = mode;
        self.revisions.settings += 1;
        Ok(())
    }

    pub fn set_params(&mut self, index: usize, params: SegmentParams) -> Result<(), SplineError> {
        if !params.is_finite() {
            return Err(SplineError::NonFiniteSegment(index));
        }
        self.segment_entry(index)?.params = params;
        self.revisions.shaping += 1;
        Ok(())
    }

    /// Replaces a whole segment.
    pub fn replace_segment(&mut self, index: usize, segment: Segment) -> Result<(), SplineError> {
        if !segment.is_finite() {
            return Err(SplineError::NonFiniteSegment(index));
        }
        *self.segment_entry(index)? = segment;
        self.revisions.control_points += 1;
        self.revisions.shaping += 1;
        self.revisions.settings += 1;
        Ok(())
    }

    /// Inserts a segment at `index` (`index == len` appends). Returns the index.
    pub fn insert_segment(&mut self, index: usize, segment: Segment) -> Result<usize, SplineError> {
        let len = self.segments.len();
        if index > len {
            return Err(SplineError::IndexOutOfRange { index, len });
        }
        if !segment.is_finite() {
            return Err(SplineError::NonFiniteSegment(index));
        }
        self.segments.insert(index, segment);
        self.structure_changed();
        Ok(index)
    }

    pub fn remove_segment(&mut self, index: usize) -> Result<Segment, SplineError> {
        let len = self.segments.len();
        if index >= len {
            return Err(SplineError::IndexOutOfRange { index, len });
        }
        if len <= MIN_SEGMENTS {
            return Err(SplineError::TooFewSegments(len - 1));
        }
        let removed = self.segments.remove(index);
        self.structure_changed();
        Ok(removed)
    }

    fn segment_entry(&mut self, index: usize) -> Result<&mut Segment, SplineError> {
        let len = self.segments.len();
        self.segments
            .get_mut(index)
            .ok_or(SplineError::IndexOutOfRange { index, len })
    }

    fn structure_changed(&mut self) {
        self.revisions.control_points += 1;
        self.revisions.shaping += 1;
        self.invalidate();
    }

    // ── derived data ────────────────────────────────────────────────────────

    #[must_use]
    pub fn is_built(&self) -> bool {
        self.derived.is_some()
    }

    pub fn invalidate(&mut self) {
        self.derived = None;
    }

    /// Rebuilds the arc-length table and, in dynamic mode, the frame table.
    pub fn rebuild(&mut self, world_up: Vec3) {
        let local_up = self
            .pose
            .rotation
            .normalized()
            .conjugate()
            .rotate(world_up)
            .normalized()
            .unwrap_or(Vec3::Y);
        let arc = ArcLengthTable::build(
            self.span_count(),
            self.arc_settings,
            |span, t| self.span(span).point_at(t),
            |t| self.point_at_time(t),
        );
        let frames = match self.normal_mode {
            NormalMode::Static => None,
            NormalMode::Dynamic => Some(FrameTable::build(&arc, local_up, |t| {
                (self.point_at_time(t), self.tangent_at_time(t))
            })),
        };
        log::debug!(
            "spline {:?}: rebuilt, length {:.4}, {:?} frames",
            self.id,
            arc.total_length(),
            self.normal_mode
        );
        self.derived = Some(DerivedData {
            arc,
            frames,
            local_up,
        });
    }

    #[must_use]
    pub fn arc_length(&self) -> Option<&ArcLengthTable> {
        self.derived.as_ref().map(|d| &d.arc)
    }

    #[must_use]
    pub fn frame_table(&self) -> Option<&FrameTable> {
        self.derived.as_ref().and_then(|d| d.frames.as_ref())
    }

    #[must_use]
    pub fn total_length(&self) -> Option<f64> {
        self.arc_length().map(ArcLengthTable::total_length)
    }

    // ── evaluation ──────────────────────────────────────────────────────────

    /// Cubic for span `span` (0-based, clamped).
    #[must_use]
    pub fn span(&self, span: usize) -> CubicBezier3 {
        let n = self.segments.len();
        let s = span.min(self.span_count() - 1);
        let start = &self.segments[s];
        let end = &self.segments[(s + 1) % n];
        CubicBezier3::new(start.anchor, start.tangent_a, end.tangent_b, end.anchor)
    }

    /// Span index (0-based) and local parameter for a global parameter.
    ///
    /// Looped curves wrap `t` modulo 1, open curves clamp it.
    #[must_use]
    pub fn locate(&self, t: f64) -> (usize, f64) {
        let t = self.wrap_time(t);
        let spans = self.span_count();
        let scaled = t * spans as f64;
        let one_based = (scaled.ceil() as usize).clamp(1, spans);
        let s = one_based - 1;
        (s, (scaled - s as f64).clamp(0.0, 1.0))
    }

    fn wrap_time(&self, t: f64) -> f64 {
        if !t.is_finite() {
            return 0.0;
        }
        if self.looped {
            t.rem_euclid(1.0)
        } else {
            t.clamp(0.0, 1.0)
        }
    }

    #[must_use]
    pub fn point_at_time(&self, t: f64) -> Point3 {
        let (s, local) = self.locate(t);
        self.span(s).point_at(local)
    }

    #[must_use]
    pub fn tangent_at_time(&self, t: f64) -> Vec3 {
        let (s, local) = self.locate(t);
        self.span(s).robust_tangent_at(local)
    }

    /// Shaping parameters at raw parameter `t`, blended across its span.
    #[must_use]
    pub fn shaping_at(&self, t: f64) -> ShapingSample {
        let (s, local) = self.locate(t);
        let start = &self.segments[s].params;
        let end = &self.segments[(s + 1) % self.segments.len()].params;
        ShapingSample::blend(start, end, local)
    }

    /// Curve-space frame at a length fraction. Looped curves wrap the
    /// fraction, open curves clamp it. `None` until the spline is built.
    #[must_use]
    pub fn frame_at_fraction(&self, fraction: f64) -> Option<CurveSample> {
        let fraction = self.wrap_time(fraction);
        let derived = self.derived.as_ref()?;
        let time = derived.arc.time_to_fixed_time(fraction);
        let origin = derived
            .arc
            .position_at(fraction)
            .unwrap_or_else(|| self.point_at_time(time));
        let frame = match &derived.frames {
            Some(table) => {
                let mut frame = table.sample(fraction)?;
                frame.origin = origin;
                frame
            }
            None => static_frame_at(origin, self.tangent_at_time(time), derived.local_up),
        };
        Some(CurveSample {
            frame,
            time,
            fraction,
        })
    }

    /// Curve-space frame at a distance from the start. On open curves,
    /// distances past either end extrapolate along the end tangent.
    #[must_use]
    pub fn frame_at_distance(&self, distance: f64) -> Option<CurveSample> {
        let total = self.total_length()?;
        if total <= 0.0 {
            return self.frame_at_fraction(0.0);
        }
        let fraction = distance / total;
        if self.looped || (0.0..=1.0).contains(&fraction) {
            return self.frame_at_fraction(fraction);
        }
        let (end, overshoot) = if fraction < 0.0 {
            (0.0, distance)
        } else {
            (1.0, distance - total)
        };
        let mut sample = self.frame_at_fraction(end)?;
        sample.frame.origin = sample.frame.origin + sample.frame.z_axis * overshoot;
        sample.fraction = fraction;
        Some(sample)
    }

    /// World-space frame at a length fraction.
    #[must_use]
    pub fn evaluate(&self, fraction: f64) -> Option<CurveFrame> {
        self.frame_at_fraction(fraction)
            .map(|sample| self.to_world(&sample.frame))
    }

    /// World-space frame at a distance along the curve.
    #[must_use]
    pub fn evaluate_at_length(&self, distance: f64) -> Option<CurveFrame> {
        self.frame_at_distance(distance)
            .map(|sample| self.to_world(&sample.frame))
    }

    fn to_world(&self, frame: &CurveFrame) -> CurveFrame {
        let transform = self.pose.to_transform();
        let rotation = self.pose.rotation.normalized();
        CurveFrame {
            origin: transform.apply_point(frame.origin),
            x_axis: rotation.rotate(frame.x_axis),
            y_axis: rotation.rotate(frame.y_axis),
            z_axis: rotation.rotate(frame.z_axis),
        }
    }

    /// Distance of each anchor from the curve start.
    #[must_use]
    pub fn anchor_distances(&self) -> Option<Vec<f64>> {
        let arc = self.arc_length()?;
        let mut distances = arc.span_offsets().to_vec();
        if !self.looped {
            distances.push(arc.total_length());
        }
        Some(distances)
    }

    /// Rotation of the curve in world space.
    #[must_use]
    pub fn world_rotation(&self) -> Quat {
        self.pose.rotation.normalized()
    }
}

impl Monitored for Spline {
    type Concern = SplineConcern;

    fn fingerprint(&self, concern: SplineConcern) -> Fingerprint {
        let segments = &self.segments;
        match concern {
            SplineConcern::Transform => Fingerprint::new().pose(self.pose),
            SplineConcern::Settings => Fingerprint::new()
                .flag(self.looped)
                .value(self.normal_mode as u8 as f64)
                .value(
                    segments
                        .iter()
                        .map(|s| f64::from(s.tangent_mode as u8))
                        .sum(),
                )
                .with_revision(self.revisions.settings),
            SplineConcern::ControlPoints => {
                let mut sum = Vec3::ZERO;
                for s in segments {
                    sum += s.anchor.to_vec3() + s.tangent_a.to_vec3() + s.tangent_b.to_vec3();
                }
                Fingerprint::new()
                    .value(segments.len() as f64)
                    .vec3(sum)
                    .with_revision(self.revisions.control_points)
            }
            SplineConcern::Shaping => Fingerprint::new()
                .value(segments.iter().map(|s| s.params.sum()).sum())
                .with_revision(self.revisions.shaping),
            SplineConcern::Noise => Fingerprint::new()
                .value(self.noise_layers.len() as f64)
                .value(self.noise_layers.iter().map(NoiseLayer::fingerprint).sum())
                .with_revision(self.revisions.noise),
            SplineConcern::Resolution => Fingerprint::new()
                .value(self.arc_settings.resolution as f64)
                .value(self.arc_settings.sampling_step)
                .flag(self.arc_settings.build_position_map),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight(looped: bool) -> Spline {
        let segments = vec![
            Segment::smooth(Point3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
            Segment::smooth(Point3::new(0.0, 0.0, 3.0), Vec3::new(0.0, 0.0, 1.0)),
            Segment::smooth(Point3::new(0.0, 0.0, 6.0), Vec3::new(0.0, 0.0, 1.0)),
        ];
        let mut desc = SplineDesc::new(segments);
        desc.looped = looped;
        Spline::from_desc(SplineId(1), desc, ArcLengthSettings::default()).unwrap()
    }

    #[test]
    fn rejects_short_or_non_finite_curves() {
        let one = vec![Segment::smooth(Point3::ORIGIN, Vec3::Z)];
        assert_eq!(
            Spline::new(SplineId(1), one).unwrap_err(),
            SplineError::TooFewSegments(1)
        );
        let bad = vec![
            Segment::smooth(Point3::ORIGIN, Vec3::Z),
            Segment::smooth(Point3::new(f64::NAN, 0.0, 0.0), Vec3::Z),
        ];
        assert_eq!(
            Spline::new(SplineId(1), bad).unwrap_err(),
            SplineError::NonFiniteSegment(1)
        );
    }

    #[test]
    fn locate_selects_spans_by_ceiling() {
        let spline = straight(false);
        assert_eq!(spline.span_count(), 2);
        assert_eq!(spline.locate(0.0), (0, 0.0));
        assert_eq!(spline.locate(0.25), (0, 0.5));
        assert_eq!(spline.locate(0.5), (0, 1.0));
        assert_eq!(spline.locate(0.75), (1, 0.5));
        assert_eq!(spline.locate(1.0), (1, 1.0));
        assert_eq!(spline.locate(2.0), (1, 1.0));
    }

    #[test]
    fn looped_spline_closes_back_to_first_anchor() {
        let spline = straight(true);
        assert_eq!(spline.span_count(), 3);
        let closing = spline.span(2);
        assert_eq!(closing.p0, Point3::new(0.0, 0.0, 6.0));
        assert_eq!(closing.p3, Point3::ORIGIN);
        assert_eq!(spline.point_at_time(1.25), spline.point_at_time(0.25));
    }

    #[test]
    fn remove_segment_keeps_minimum() {
        let mut spline = straight(false);
        spline.rebuild(Vec3::Y);
        spline.remove_segment(1).unwrap();
        assert!(!spline.is_built());
        assert_eq!(
            spline.remove_segment(0).unwrap_err(),
            SplineError::TooFewSegments(1)
        );
        assert!(matches!(
            spline.remove_segment(9),
            Err(SplineError::IndexOutOfRange { index: 9, len: 2 })
        ));
    }

    #[test]
    fn mirrored_tangent_mode_reflects_incoming_handle() {
        let mut spline = straight(false);
        spline
            .set_tangent_a(1, Point3::new(1.0, 0.0, 4.0))
            .unwrap();
        let segment = spline.segment(1).unwrap();
        assert_eq!(segment.tangent_b, Point3::new(-1.0, 0.0, 2.0));
    }

    #[test]
    fn aligned_tangent_mode_keeps_incoming_length() {
        let mut spline = straight(false);
        spline.set_tangent_mode(1, TangentMode::Aligned).unwrap();
        spline
            .set_tangent_a(1, Point3::new(0.0, 2.0, 3.0))
            .unwrap();
        let segment = spline.segment(1).unwrap();
        assert!(segment.tangent_b.distance_to(Point3::new(0.0, -1.0, 3.0)) < 1e-12);
    }

    #[test]
    fn mutators_bump_revisions() {
        let mut spline = straight(false);
        let before = spline.revisions();
        spline.set_anchor(0, Point3::new(0.0, 1.0, 0.0)).unwrap();
        spline.set_params(0, SegmentParams::default()).unwrap();
        let after = spline.revisions();
        assert_eq!(after.control_points, before.control_points + 1);
        assert_eq!(after.shaping, before.shaping + 1);
        assert_eq!(spline.segment(0).unwrap().tangent_a, Point3::new(0.0, 1.0, 1.0));
    }

    #[test]
    fn straight_spline_frames_follow_world_axes() {
        let mut spline = straight(false);
        assert!(spline.frame_at_fraction(0.5).is_none());
        spline.rebuild(Vec3::Y);
        let sample = spline.frame_at_fraction(0.5).unwrap();
        assert!(sample.frame.origin.distance_to(Point3::new(0.0, 0.0, 3.0)) < 1e-6);
        assert!((sample.frame.x_axis - Vec3::X).length() < 1e-9);
        assert!((sample.frame.y_axis - Vec3::Y).length() < 1e-9);
        assert!((spline.total_length().unwrap() - 6.0).abs() < 1e-6);
    }

    #[test]
    fn open_curve_extrapolates_past_the_end() {
        let mut spline = straight(false);
        spline.rebuild(Vec3::Y);
        let before = spline.frame_at_distance(-2.0).unwrap();
        assert!(before.frame.origin.distance_to(Point3::new(0.0, 0.0, -2.0)) < 1e-6);
        let after = spline.frame_at_distance(8.0).unwrap();
        assert!(after.frame.origin.distance_to(Point3::new(0.0, 0.0, 8.0)) < 1e-6);
        assert!(after.fraction > 1.0);
    }

    #[test]
    fn pose_moves_world_evaluation() {
        let mut spline = straight(false);
        spline
            .set_pose(Pose::from_position(Vec3::new(10.0, 0.0, 0.0)))
            .unwrap();
        spline.rebuild(Vec3::Y);
        let frame = spline.evaluate(0.0).unwrap();
        assert!(frame.origin.distance_to(Point3::new(10.0, 0.0, 0.0)) < 1e-9);
        let frame = spline.evaluate_at_length(3.0).unwrap();
        assert!(frame.origin.distance_to(Point3::new(10.0, 0.0, 3.0)) < 1e-6);
    }

    #[test]
    fn anchor_distances_cover_each_anchor() {
        let mut spline = straight(false);
        spline.rebuild(Vec3::Y);
        let distances = spline.anchor_distances().unwrap();
        assert_eq!(distances.len(), 3);
        assert!((distances[1] - 3.0).abs() < 1e-6);
        assert!((distances[2] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn position_map_lookup_matches_direct_evaluation() {
        let segments = vec![
            Segment::smooth(Point3::ORIGIN, Vec3::new(2.0, 0.0, 1.0)),
            Segment::smooth(Point3::new(0.0, 1.0, 5.0), Vec3::new(-2.0, 0.0, 1.0)),
            Segment::smooth(Point3::new(0.0, 0.0, 10.0), Vec3::new(2.0, 0.0, 1.0)),
        ];
        let build = |position_map: bool| {
            let settings = ArcLengthSettings {
                build_position_map: position_map,
                ..ArcLengthSettings::default()
            };
            let mut spline =
                Spline::from_desc(SplineId(1), SplineDesc::new(segments.clone()), settings).unwrap();
            spline.rebuild(Vec3::Y);
            spline
        };
        let mapped = build(true);
        let direct = build(false);
        let positions = mapped.arc_length().unwrap().position_map().unwrap();
        let resolution = positions.len() - 1;

        // Bucket fractions land exactly on the stored positions.
        let sample = mapped.frame_at_fraction(0.25).unwrap();
        assert_eq!(sample.frame.origin, positions[resolution / 4]);

        for i in 0..=40 {
            let fraction = f64::from(i) / 40.0 + 0.003;
            let a = mapped.frame_at_fraction(fraction).unwrap();
            let b = direct.frame_at_fraction(fraction).unwrap();
            assert!(a.frame.origin.distance_to(b.frame.origin) < 1e-3, "fraction {fraction}");
            assert_eq!(a.time, b.time);
        }
    }
}
