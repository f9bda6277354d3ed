//! Change detection for splines, objects and connectors.
//!
//! A [`Monitor`] keeps one [`Fingerprint`] per concern of its owner. A
//! fingerprint is a short list of aggregate values (sums of control points,
//! shaping parameters, pose components, ...) plus a structural revision
//! counter that the owner bumps on every mutation. Aggregates are compared
//! against a threshold; revisions must match exactly, so edits that cancel
//! out in the sums are still reported.
//!
//! Queries without `force_update` never touch the stored snapshot. With
//! `force_update` the current fingerprint is committed, and the dirty counter
//! advances once for each commit that carried a real change. A commit of all
//! concerns at once counts as one change.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::geom::{Point3, Pose, Quat, Transform, Vec3};

/// A group of fields that invalidates one piece of derived data.
pub trait Concern: Copy + Ord + Debug + 'static {
    const ALL: &'static [Self];
}

/// Something a [`Monitor`] can observe.
pub trait Monitored {
    type Concern: Concern;

    fn fingerprint(&self, concern: Self::Concern) -> Fingerprint;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fingerprint {
    values: Vec<f64>,
    revision: u64,
}

impl Fingerprint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    #[must_use]
    pub fn value(mut self, value: f64) -> Self {
        self.values.push(value);
        self
    }

    #[must_use]
    pub fn flag(self, value: bool) -> Self {
        self.value(if value { 1.0 } else { 0.0 })
    }

    #[must_use]
    pub fn vec3(self, v: Vec3) -> Self {
        self.value(v.x).value(v.y).value(v.z)
    }

    #[must_use]
    pub fn point(self, p: Point3) -> Self {
        self.value(p.x).value(p.y).value(p.z)
    }

    #[must_use]
    pub fn quat(self, q: Quat) -> Self {
        self.value(q.x).value(q.y).value(q.z).value(q.w)
    }

    #[must_use]
    pub fn pose(self, pose: Pose) -> Self {
        self.vec3(pose.position).quat(pose.rotation).vec3(pose.scale)
    }

    #[must_use]
    pub fn transform(mut self, transform: Transform) -> Self {
        self.values.extend(transform.to_cols_array());
        self
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True when any value moved by more than `threshold`, the value count
    /// changed, or the revision differs. NaN compares as changed.
    #[must_use]
    pub fn differs(&self, other: &Self, threshold: f64) -> bool {
        self.revision != other.revision
            || self.values.len() != other.values.len()
            || self
                .values
                .iter()
                .zip(&other.values)
                .any(|(a, b)| !((a - b).abs() <= threshold))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorState {
    #[default]
    Clean,
    DirtyPending,
}

#[derive(Debug, Clone)]
pub struct Monitor<C: Concern> {
    snapshots: BTreeMap<C, Fingerprint>,
    threshold: f64,
    dirty_counter: u64,
    state: MonitorState,
}

impl<C: Concern> Monitor<C> {
    /// Creates a monitor whose snapshot matches `entity` as it is now.
    pub fn capture<E: Monitored<Concern = C>>(entity: &E, threshold: f64) -> Self {
        let snapshots = C::ALL
            .iter()
            .map(|&concern| (concern, entity.fingerprint(concern)))
            .collect();
        Self {
            snapshots,
            threshold,
            dirty_counter: 0,
            state: MonitorState::Clean,
        }
    }

    /// Reports whether `concern` differs from the snapshot.
    ///
    /// With `force_update` the current fingerprint becomes the snapshot.
    pub fn changed<E: Monitored<Concern = C>>(
        &mut self,
        entity: &E,
        concern: C,
        force_update: bool,
    ) -> bool {
        let current = entity.fingerprint(concern);
        let changed = self.differs_from_snapshot(concern, &current);

        if force_update {
            if changed {
                self.dirty_counter += 1;
                self.snapshots.insert(concern, current);
            }
            self.state = if self.is_dirty(entity) {
                MonitorState::DirtyPending
            } else {
                MonitorState::Clean
            };
        } else if changed {
            self.state = MonitorState::DirtyPending;
        }
        changed
    }

    /// Concerns that differ from the snapshot, optionally committing them all.
    ///
    /// Every fingerprint is computed once. A committing check that finds any
    /// change advances the dirty counter by one.
    pub fn changed_concerns<E: Monitored<Concern = C>>(
        &mut self,
        entity: &E,
        force_update: bool,
    ) -> Vec<C> {
        let mut changed = Vec::new();
        for &concern in C::ALL {
            let current = entity.fingerprint(concern);
            if self.differs_from_snapshot(concern, &current) {
                changed.push(concern);
                if force_update {
                    self.snapshots.insert(concern, current);
                }
            }
        }

        if force_update {
            if !changed.is_empty() {
                self.dirty_counter += 1;
            }
            self.state = MonitorState::Clean;
        } else if !changed.is_empty() {
            self.state = MonitorState::DirtyPending;
        }
        changed
    }

    /// Whether any concern differs, without committing anything.
    #[must_use]
    pub fn is_dirty<E: Monitored<Concern = C>>(&self, entity: &E) -> bool {
        C::ALL
            .iter()
            .any(|&concern| self.differs_from_snapshot(concern, &entity.fingerprint(concern)))
    }

    fn differs_from_snapshot(&self, concern: C, current: &Fingerprint) -> bool {
        self.snapshots
            .get(&concern)
            .is_none_or(|snapshot| snapshot.differs(current, self.threshold))
    }

    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.state
    }

    #[must_use]
    pub fn dirty_counter(&self) -> u64 {
        self.dirty_counter
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[must_use]
    pub fn snapshot(&self, concern: C) -> Option<&Fingerprint> {
        self.snapshots.get(&concern)
    }
}

/// Edge-triggered observer of a monitor's dirty counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirtyListener {
    seen: u64,
}

impl DirtyListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts out in sync with `monitor`, so earlier changes are not reported.
    #[must_use]
    pub fn in_sync_with<C: Concern>(monitor: &Monitor<C>) -> Self {
        Self {
            seen: monitor.dirty_counter(),
        }
    }

    /// True once for every advance of the monitor's dirty counter.
    pub fn poll<C: Concern>(&mut self, monitor: &Monitor<C>) -> bool {
        let counter = monitor.dirty_counter();
        if counter > self.seen {
            self.seen = counter;
            true
        } else {
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Concerns
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SplineConcern {
    /// Host pose of the curve.
    Transform,
    /// Loop flag, normal mode and tangent modes.
    Settings,
    ControlPoints,
    Shaping,
    Noise,
    Resolution,
}

impl Concern for SplineConcern {
    const ALL: &'static [Self] = &[
        Self::Transform,
        Self::Settings,
        Self::ControlPoints,
        Self::Shaping,
        Self::Noise,
        Self::Resolution,
    ];
}

impl SplineConcern {
    /// Whether a change invalidates the arc-length and frame tables.
    #[must_use]
    pub const fn invalidates_curve(self) -> bool {
        matches!(
            self,
            Self::Transform | Self::Settings | Self::ControlPoints | Self::Resolution
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectConcern {
    Transform,
    ParentChain,
    /// Kind, snapping, mirror and lock flags.
    Kind,
    /// Mesh containers and child count.
    Components,
}

impl Concern for ObjectConcern {
    const ALL: &'static [Self] = &[
        Self::Transform,
        Self::ParentChain,
        Self::Kind,
        Self::Components,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectorConcern {
    Transform,
    Links,
}

impl Concern for ConnectorConcern {
    const ALL: &'static [Self] = &[Self::Transform, Self::Links];
}

pub type SplineMonitor = Monitor<SplineConcern>;
pub type ObjectMonitor = Monitor<ObjectConcern>;
pub type ConnectorMonitor = Monitor<ConnectorConcern>;

macro_rules! concern_queries {
    ($concern:ident for $owner:ty { $($name:ident => $variant:ident),* $(,)? }) => {
        impl Monitor<$concern> {
            $(
                pub fn $name(&mut self, owner: &$owner, force_update: bool) -> bool {
                    self.changed(owner, $concern::$variant, force_update)
                }
            )*
        }
    };
}

concern_queries!(SplineConcern for crate::spline::Spline {
    transform_change => Transform,
    settings_change => Settings,
    control_points_change => ControlPoints,
    shaping_change => Shaping,
    noise_change => Noise,
    resolution_change => Resolution,
});

concern_queries!(ObjectConcern for crate::object::SplineObject {
    transform_change => Transform,
    parent_chain_change => ParentChain,
    kind_change => Kind,
    components_change => Components,
});

concern_queries!(ConnectorConcern for crate::connector::Connector {
    transform_change => Transform,
    links_change => Links,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum Aspect {
        Position,
        Count,
    }

    impl Concern for Aspect {
        const ALL: &'static [Self] = &[Self::Position, Self::Count];
    }

    struct Thing {
        position: Vec3,
        count: usize,
        revision: u64,
    }

    impl Monitored for Thing {
        type Concern = Aspect;

        fn fingerprint(&self, concern: Aspect) -> Fingerprint {
            match concern {
                Aspect::Position => Fingerprint::new().vec3(self.position).with_revision(self.revision),
                Aspect::Count => Fingerprint::new().value(self.count as f64),
            }
        }
    }

    fn thing() -> Thing {
        Thing {
            position: Vec3::new(1.0, 2.0, 3.0),
            count: 2,
            revision: 0,
        }
    }

    #[test]
    fn untouched_entity_reports_no_change() {
        let entity = thing();
        let mut monitor = Monitor::capture(&entity, 1e-6);
        assert!(!monitor.changed(&entity, Aspect::Position, false));
        assert!(!monitor.changed(&entity, Aspect::Count, true));
        assert_eq!(monitor.state(), MonitorState::Clean);
        assert_eq!(monitor.dirty_counter(), 0);
    }

    #[test]
    fn query_without_force_is_idempotent() {
        let mut entity = thing();
        let mut monitor = Monitor::capture(&entity, 1e-6);
        entity.position.x += 0.5;
        assert!(monitor.changed(&entity, Aspect::Position, false));
        assert!(monitor.changed(&entity, Aspect::Position, false));
        assert_eq!(monitor.state(), MonitorState::DirtyPending);
        assert!(monitor.changed(&entity, Aspect::Position, true));
        assert!(!monitor.changed(&entity, Aspect::Position, false));
        assert_eq!(monitor.state(), MonitorState::Clean);
        assert_eq!(monitor.dirty_counter(), 1);
    }

    #[test]
    fn sub_threshold_jitter_is_ignored() {
        let mut entity = thing();
        let mut monitor = Monitor::capture(&entity, 1e-6);
        entity.position.y += 1e-9;
        assert!(!monitor.changed(&entity, Aspect::Position, false));
        entity.position.y += 1e-3;
        assert!(monitor.changed(&entity, Aspect::Position, false));
    }

    #[test]
    fn revision_catches_cancelling_edits() {
        let mut entity = thing();
        let mut monitor = Monitor::capture(&entity, 1e-6);
        // Net zero movement but a recorded mutation.
        entity.revision += 1;
        assert!(monitor.changed(&entity, Aspect::Position, false));
    }

    #[test]
    fn changed_concerns_commits_each_concern() {
        let mut entity = thing();
        let mut monitor = Monitor::capture(&entity, 1e-6);
        entity.count = 5;
        entity.position.z = 0.0;
        let changed = monitor.changed_concerns(&entity, true);
        assert_eq!(changed, vec![Aspect::Position, Aspect::Count]);
        assert!(monitor.changed_concerns(&entity, true).is_empty());
        assert_eq!(monitor.dirty_counter(), 1);
        assert_eq!(monitor.state(), MonitorState::Clean);
    }

    #[test]
    fn changed_concerns_fingerprints_each_concern_once() {
        use std::cell::Cell;

        struct Counting<'a> {
            inner: Thing,
            calls: &'a Cell<usize>,
        }

        impl Monitored for Counting<'_> {
            type Concern = Aspect;

            fn fingerprint(&self, concern: Aspect) -> Fingerprint {
                self.calls.set(self.calls.get() + 1);
                self.inner.fingerprint(concern)
            }
        }

        let calls = Cell::new(0);
        let mut entity = Counting { inner: thing(), calls: &calls };
        let mut monitor = Monitor::capture(&entity, 1e-6);
        entity.inner.count = 3;
        entity.inner.position.x = 7.0;
        calls.set(0);
        monitor.changed_concerns(&entity, true);
        assert_eq!(calls.get(), Aspect::ALL.len());
    }

    #[test]
    fn non_finite_values_count_as_changed() {
        let mut entity = thing();
        let mut monitor = Monitor::capture(&entity, 1e-6);
        entity.position.x = f64::NAN;
        assert!(monitor.changed(&entity, Aspect::Position, true));
        // NaN never equals its snapshot.
        assert!(monitor.changed(&entity, Aspect::Position, false));
    }

    #[test]
    fn listener_fires_once_per_counter_advance() {
        let mut entity = thing();
        let mut monitor = Monitor::capture(&entity, 1e-6);
        let mut listener = DirtyListener::in_sync_with(&monitor);
        assert!(!listener.poll(&monitor));
        entity.count = 9;
        monitor.changed(&entity, Aspect::Count, true);
        assert!(listener.poll(&monitor));
        assert!(!listener.poll(&monitor));
    }
}
