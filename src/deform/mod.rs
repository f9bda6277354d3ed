//! Vertex deformation: the per-vertex kernel and the batch scheduler that
//! feeds it.

pub mod kernel;
pub mod scheduler;

use serde::{Deserialize, Serialize};

pub use kernel::{CurveView, ObjectPlacement, SnapRemap, deform_vertex, follow_pose};
pub use scheduler::{
    BatchOutput, DeformBatch, DeformJob, JobOutput, Scheduler, WorkerKey, WorkerState, run_batch,
    run_batches,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeformKind {
    /// Mesh vertices are bent into curve space.
    Deformation,
    /// The object's transform follows the curve; meshes are untouched.
    Follower,
}
