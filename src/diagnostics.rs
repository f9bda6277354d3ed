//! Per-tick diagnostics.
//!
//! A [`TickReport`] is returned from every [`SplineContext::tick`] call. It
//! records what the tick did (rebuilds, dispatched objects, written vertices)
//! and which objects were skipped, so hosts can surface problems without the
//! tick ever failing.
//!
//! ```ignore
//! let report = context.tick();
//! if !report.is_clean() {
//!     for (object, reason) in &report.skipped {
//!         eprintln!("{object:?} skipped: {reason}");
//!     }
//! }
//! ```
//!
//! [`SplineContext::tick`]: crate::context::SplineContext::tick

use std::fmt;

use serde::Serialize;

use crate::metrics::EngineTimingReport;
use crate::object::ObjectId;
use crate::spline::SplineId;

/// Why an object was left untouched for a tick. Skipped objects are checked
/// again on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The object's curve is not registered.
    MissingCurve(SplineId),
    /// The curve has no derived data (its rebuild failed).
    CurveNotBuilt(SplineId),
    /// The composed local transform collapses an axis.
    ZeroScale,
    /// A deformation object without mesh containers.
    EmptyContainers,
    /// The follower pose could not be computed.
    DegenerateFrame,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCurve(id) => write!(f, "curve {} is not registered", id.0),
            Self::CurveNotBuilt(id) => write!(f, "curve {} has no arc-length data", id.0),
            Self::ZeroScale => f.write_str("combined scale is zero"),
            Self::EmptyContainers => f.write_str("no mesh containers"),
            Self::DegenerateFrame => f.write_str("degenerate curve frame"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TickReport {
    /// Curves whose change detection reported a change.
    pub changed_curves: usize,
    /// Arc-length/frame tables rebuilt.
    pub rebuilt_curves: usize,
    /// Anchors moved by connectors.
    pub carried_anchors: usize,
    /// Connector/spline pairs that could not be carried and stay pending.
    pub pending_connectors: usize,
    /// Deformation objects whose meshes were regenerated.
    pub deformed_objects: usize,
    /// Follower objects whose pose was recomputed.
    pub followed_objects: usize,
    /// Batches dispatched (one per curve with queued work).
    pub batches: usize,
    /// Vertices run through the kernel.
    pub vertex_count: usize,
    /// Instance meshes written back.
    pub meshes_written: usize,
    pub skipped: Vec<(ObjectId, SkipReason)>,
    pub warnings: Vec<String>,
    /// Only populated with the `engine_metrics` feature on native targets.
    pub timing: Option<EngineTimingReport>,
}

impl TickReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing was recomputed.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.rebuilt_curves == 0
            && self.deformed_objects == 0
            && self.followed_objects == 0
            && self.carried_anchors == 0
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.warnings.is_empty()
    }

    pub fn skip(&mut self, object: ObjectId, reason: SkipReason) {
        log::warn!("object {}: skipped ({reason})", object.0);
        self.skipped.push((object, reason));
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Format: `"curves:{rebuilt}/{changed} objects:{deformed}+{followed} V:{vertices} [issues...]"`
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("curves:{}/{}", self.rebuilt_curves, self.changed_curves),
            format!("objects:{}+{}", self.deformed_objects, self.followed_objects),
            format!("V:{}", self.vertex_count),
        ];
        if self.carried_anchors > 0 {
            parts.push(format!("carried:{}", self.carried_anchors));
        }
        if self.pending_connectors > 0 {
            parts.push(format!("pending:{}", self.pending_connectors));
        }
        if !self.skipped.is_empty() {
            parts.push(format!("skipped:{}", self.skipped.len()));
        }
        if !self.warnings.is_empty() {
            parts.push(format!("warnings:{}", self.warnings.len()));
        }
        parts.join(" ")
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tick: {}", self.summary())?;
        for (object, reason) in &self.skipped {
            writeln!(f, "  - object {}: {reason}", object.0)?;
        }
        for warning in &self.warnings {
            writeln!(f, "  - {warning}")?;
        }
        Ok(())
    }
}
