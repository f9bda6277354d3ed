//! Host hooks injected into the [`SplineContext`](crate::context::SplineContext).
//!
//! The engine never reaches into a global editor/runtime flag; the host hands
//! it an [`Environment`] instead. Interactive contexts (an editor with
//! inspectors open) may edit source meshes in place, so origin buffers are
//! re-read from the container on every dispatch instead of being served from
//! the cache.

use crate::cache::ContainerKey;
use crate::geom::{GeomMesh, Pose};
use crate::object::ObjectId;

pub trait Environment {
    /// Whether the host is an interactive editing session.
    fn is_interactive_context(&self) -> bool {
        false
    }

    /// Called after an instance mesh has been regenerated.
    fn mesh_updated(&mut self, key: ContainerKey, mesh: &GeomMesh) {
        let _ = (key, mesh);
    }

    /// Called after a follower's world pose has been recomputed.
    fn follower_moved(&mut self, object: ObjectId, pose: Pose) {
        let _ = (object, pose);
    }
}

/// Non-interactive host without sinks; results are read back from the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct Headless;

impl Environment for Headless {}

/// Records every host callback. Useful for hosts that poll instead of
/// receiving callbacks, and in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingEnvironment {
    pub interactive: bool,
    pub meshes: Vec<ContainerKey>,
    pub followers: Vec<(ObjectId, Pose)>,
}

impl RecordingEnvironment {
    #[must_use]
    pub fn interactive() -> Self {
        Self {
            interactive: true,
            ..Self::default()
        }
    }

    /// Returns and clears the recorded callbacks.
    pub fn drain(&mut self) -> (Vec<ContainerKey>, Vec<(ObjectId, Pose)>) {
        (
            std::mem::take(&mut self.meshes),
            std::mem::take(&mut self.followers),
        )
    }
}

impl Environment for RecordingEnvironment {
    fn is_interactive_context(&self) -> bool {
        self.interactive
    }

    fn mesh_updated(&mut self, key: ContainerKey, _mesh: &GeomMesh) {
        self.meshes.push(key);
    }

    fn follower_moved(&mut self, object: ObjectId, pose: Pose) {
        self.followers.push((object, pose));
    }
}
