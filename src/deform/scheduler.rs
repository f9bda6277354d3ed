//! Batching of deformation requests.
//!
//! Requests are grouped into workers keyed by `(DeformKind, SplineId)`, so
//! every object bent by the same curve ends up in one dispatch. A dispatch
//! flattens the vertices of all queued objects into a [`DeformBatch`], maps
//! the kernel over them (in parallel with the `parallel` feature) and hands
//! the results back as a [`BatchOutput`]. Batches for different curves share
//! nothing and are dispatched concurrently by [`run_batches`].

use std::collections::HashMap;
use std::ops::Range;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cache::ContainerKey;
use crate::geom::{NoiseStack, Point3};
use crate::object::ObjectId;
use crate::spline::SplineId;

use super::DeformKind;
use super::kernel::{CurveView, ObjectPlacement, deform_vertex};

pub const DEFAULT_WORKER_WARN_THRESHOLD: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerKey {
    pub kind: DeformKind,
    pub spline: SplineId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Collecting,
    Running,
    Ready,
}

#[derive(Debug)]
struct Worker {
    key: WorkerKey,
    state: WorkerState,
    queue: Vec<ObjectId>,
}

#[derive(Debug)]
pub struct Scheduler {
    workers: Vec<Worker>,
    index: HashMap<WorkerKey, usize>,
    warn_threshold: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_WARN_THRESHOLD)
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(warn_threshold: usize) -> Self {
        Self {
            workers: Vec::new(),
            index: HashMap::new(),
            warn_threshold,
        }
    }

    /// Queues `object` on the worker for `(kind, spline)`.
    ///
    /// Returns `false` if the object was already queued there.
    pub fn request(&mut self, object: ObjectId, kind: DeformKind, spline: SplineId) -> bool {
        let key = WorkerKey { kind, spline };
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => self.spawn(key),
        };
        let worker = &mut self.workers[slot];
        match worker.state {
            WorkerState::Idle | WorkerState::Ready => {
                worker.queue.clear();
                worker.state = WorkerState::Collecting;
            }
            WorkerState::Collecting | WorkerState::Running => {}
        }
        if worker.queue.contains(&object) {
            return false;
        }
        worker.queue.push(object);
        true
    }

    fn spawn(&mut self, key: WorkerKey) -> usize {
        let slot = self.workers.len();
        self.workers.push(Worker {
            key,
            state: WorkerState::Idle,
            queue: Vec::new(),
        });
        self.index.insert(key, slot);
        if self.workers.len() > self.warn_threshold {
            log::warn!(
                "deformation worker pool grew to {} (threshold {}); workers are never dropped until their curve unregisters",
                self.workers.len(),
                self.warn_threshold
            );
        }
        slot
    }

    /// Moves every collecting worker to `Running` and returns its queue.
    pub fn begin_dispatch(&mut self) -> Vec<(WorkerKey, Vec<ObjectId>)> {
        let mut started: Vec<_> = self
            .workers
            .iter_mut()
            .filter(|worker| worker.state == WorkerState::Collecting)
            .map(|worker| {
                worker.state = WorkerState::Running;
                (worker.key, std::mem::take(&mut worker.queue))
            })
            .collect();
        started.sort_by_key(|(key, _)| *key);
        started
    }

    /// Marks a running worker as finished.
    pub fn complete(&mut self, key: WorkerKey) {
        if let Some(&slot) = self.index.get(&key) {
            let worker = &mut self.workers[slot];
            if worker.state == WorkerState::Running {
                worker.state = WorkerState::Ready;
            }
        }
    }

    #[must_use]
    pub fn state(&self, key: WorkerKey) -> Option<WorkerState> {
        self.index.get(&key).map(|&slot| self.workers[slot].state)
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of objects waiting for the next dispatch.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.state == WorkerState::Collecting)
            .map(|w| w.queue.len())
            .sum()
    }

    #[must_use]
    pub fn is_queued(&self, object: ObjectId) -> bool {
        self.workers
            .iter()
            .any(|w| w.state == WorkerState::Collecting && w.queue.contains(&object))
    }

    pub fn forget_object(&mut self, object: ObjectId) {
        for worker in &mut self.workers {
            worker.queue.retain(|&queued| queued != object);
        }
    }

    /// Drops the workers of an unregistered curve.
    pub fn forget_spline(&mut self, spline: SplineId) {
        self.workers.retain(|worker| worker.key.spline != spline);
        self.index = self
            .workers
            .iter()
            .enumerate()
            .map(|(slot, worker)| (worker.key, slot))
            .collect();
    }
}

/// One object container inside a batch.
#[derive(Debug, Clone)]
pub struct DeformJob {
    pub key: ContainerKey,
    pub object: ObjectId,
    pub placement: ObjectPlacement,
    range: Range<usize>,
}

/// Flattened vertices of every container bent by one curve.
///
/// The batch owns its buffers; they are released when it is consumed by
/// [`run_batch`] or dropped.
#[derive(Debug, Default)]
pub struct DeformBatch {
    jobs: Vec<DeformJob>,
    vertices: Vec<Point3>,
    owners: Vec<u32>,
}

impl DeformBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        key: ContainerKey,
        object: ObjectId,
        placement: ObjectPlacement,
        vertices: &[Point3],
    ) {
        let owner = self.jobs.len() as u32;
        let start = self.vertices.len();
        self.vertices.extend_from_slice(vertices);
        self.owners
            .extend(std::iter::repeat_n(owner, vertices.len()));
        self.jobs.push(DeformJob {
            key,
            object,
            placement,
            range: start..self.vertices.len(),
        });
    }

    #[must_use]
    pub fn jobs(&self) -> &[DeformJob] {
        &self.jobs
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Deformed positions of one container.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub key: ContainerKey,
    pub object: ObjectId,
    pub mirror: bool,
    pub positions: Vec<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    pub spline: SplineId,
    pub vertex_count: usize,
    pub jobs: Vec<JobOutput>,
}

#[cfg(feature = "parallel")]
fn deform_all(curve: &CurveView<'_>, batch: &DeformBatch) -> Vec<Point3> {
    let layers = curve.spline().noise_layers();
    batch
        .vertices
        .par_iter()
        .zip(batch.owners.par_iter())
        .map_init(
            || NoiseStack::build(layers),
            |noise, (&v, &owner)| {
                deform_vertex(curve, noise, &batch.jobs[owner as usize].placement, v)
            },
        )
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn deform_all(curve: &CurveView<'_>, batch: &DeformBatch) -> Vec<Point3> {
    let noise = NoiseStack::build(curve.spline().noise_layers());
    batch
        .vertices
        .iter()
        .zip(&batch.owners)
        .map(|(&v, &owner)| deform_vertex(curve, &noise, &batch.jobs[owner as usize].placement, v))
        .collect()
}

/// Runs the kernel over every vertex of `batch` and splits the result per job.
#[must_use]
pub fn run_batch(curve: &CurveView<'_>, batch: DeformBatch) -> BatchOutput {
    let deformed = deform_all(curve, &batch);
    let jobs = batch
        .jobs
        .into_iter()
        .map(|job| JobOutput {
            key: job.key,
            object: job.object,
            mirror: job.placement.mirror(),
            positions: deformed[job.range].iter().map(|p| p.to_array()).collect(),
        })
        .collect();
    BatchOutput {
        spline: curve.spline().id(),
        vertex_count: deformed.len(),
        jobs,
    }
}

/// Dispatches independent batches; each blocks until all of its vertices are done.
#[cfg(feature = "parallel")]
#[must_use]
pub fn run_batches(work: Vec<(CurveView<'_>, DeformBatch)>) -> Vec<BatchOutput> {
    work.into_par_iter()
        .map(|(curve, batch)| run_batch(&curve, batch))
        .collect()
}

#[cfg(not(feature = "parallel"))]
#[must_use]
pub fn run_batches(work: Vec<(CurveView<'_>, DeformBatch)>) -> Vec<BatchOutput> {
    work.into_iter()
        .map(|(curve, batch)| run_batch(&curve, batch))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Transform, Vec3};
    use crate::object::MeshId;
    use crate::spline::{Segment, Spline};

    fn key(object: u64) -> ContainerKey {
        ContainerKey::new(ObjectId(object), MeshId(0), 0)
    }

    #[test]
    fn requests_are_idempotent_per_worker() {
        let mut scheduler = Scheduler::default();
        assert!(scheduler.request(ObjectId(1), DeformKind::Deformation, SplineId(1)));
        assert!(!scheduler.request(ObjectId(1), DeformKind::Deformation, SplineId(1)));
        assert!(scheduler.request(ObjectId(2), DeformKind::Deformation, SplineId(1)));
        assert!(scheduler.request(ObjectId(1), DeformKind::Follower, SplineId(1)));
        assert_eq!(scheduler.worker_count(), 2);
        assert_eq!(scheduler.pending(), 3);
    }

    #[test]
    fn worker_lifecycle() {
        let mut scheduler = Scheduler::default();
        let key = WorkerKey {
            kind: DeformKind::Deformation,
            spline: SplineId(4),
        };
        scheduler.request(ObjectId(1), key.kind, key.spline);
        assert_eq!(scheduler.state(key), Some(WorkerState::Collecting));

        let started = scheduler.begin_dispatch();
        assert_eq!(started, vec![(key, vec![ObjectId(1)])]);
        assert_eq!(scheduler.state(key), Some(WorkerState::Running));
        assert!(scheduler.begin_dispatch().is_empty());

        scheduler.complete(key);
        assert_eq!(scheduler.state(key), Some(WorkerState::Ready));

        // Ready workers are reused for the next tick.
        scheduler.request(ObjectId(2), key.kind, key.spline);
        assert_eq!(scheduler.worker_count(), 1);
        assert_eq!(scheduler.begin_dispatch(), vec![(key, vec![ObjectId(2)])]);
    }

    #[test]
    fn forgetting_a_spline_drops_its_workers() {
        let mut scheduler = Scheduler::default();
        scheduler.request(ObjectId(1), DeformKind::Deformation, SplineId(1));
        scheduler.request(ObjectId(2), DeformKind::Deformation, SplineId(2));
        scheduler.forget_spline(SplineId(1));
        assert_eq!(scheduler.worker_count(), 1);
        let key = WorkerKey {
            kind: DeformKind::Deformation,
            spline: SplineId(2),
        };
        assert_eq!(scheduler.state(key), Some(WorkerState::Collecting));
        scheduler.forget_object(ObjectId(2));
        assert!(!scheduler.is_queued(ObjectId(2)));
    }

    #[test]
    fn batch_output_is_split_per_job() {
        let handle = Vec3::new(0.0, 0.0, 1.0);
        let mut spline = Spline::new(
            SplineId(3),
            vec![
                Segment::smooth(Point3::ORIGIN, handle),
                Segment::smooth(Point3::new(0.0, 0.0, 3.0), handle),
            ],
        )
        .unwrap();
        spline.rebuild(Vec3::Y);
        let curve = CurveView::new(&spline).unwrap();

        let placement = ObjectPlacement::new(Transform::identity(), false).unwrap();
        let mut batch = DeformBatch::new();
        batch.push(key(1), ObjectId(1), placement, &[Point3::new(0.1, 0.0, 1.0)]);
        batch.push(
            key(2),
            ObjectId(2),
            placement,
            &[Point3::new(0.2, 0.0, 1.0), Point3::new(0.3, 0.0, 2.0)],
        );
        assert_eq!(batch.vertex_count(), 3);

        let outputs = run_batches(vec![(curve, batch)]);
        assert_eq!(outputs.len(), 1);
        let output = &outputs[0];
        assert_eq!(output.spline, SplineId(3));
        assert_eq!(output.jobs.len(), 2);
        assert_eq!(output.jobs[0].positions.len(), 1);
        assert_eq!(output.jobs[1].positions.len(), 2);
        assert!((output.jobs[1].positions[1][2] - 2.0).abs() < 1e-6);
    }
}
