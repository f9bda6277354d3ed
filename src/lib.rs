#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Curve-driven mesh deformation.
//!
//! Meshes attached to a piecewise-cubic [`spline::Spline`] are bent into the
//! curve's frame, vertex by vertex, with per-segment shaping (roll, scale,
//! saddle skew, noise). A [`context::SplineContext`] owns the registered
//! curves and objects and redoes work only where change detection says it is
//! needed.
//!
//! ```ignore
//! let mut context = SplineContext::default();
//! context.register_curve(SplineId(1), SplineDesc::new(segments))?;
//! context.register_object(
//!     ObjectId(1),
//!     ObjectDesc::new(SplineId(1), DeformKind::Deformation).with_mesh(MeshId(1), mesh),
//! )?;
//! let report = context.tick();
//! ```

pub mod cache;
pub mod connector;
pub mod context;
pub mod deform;
pub mod diagnostics;
pub mod environment;
pub mod geom;
pub mod metrics;
pub mod monitor;
pub mod object;
pub mod spline;

#[cfg(test)]
mod tests;

use std::fmt;

use serde::de::DeserializeOwned;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::JsError;
use wasm_bindgen::prelude::*;

pub use cache::{ContainerKey, ScopeId};
pub use connector::ConnectorId;
pub use context::{ContextError, EngineOptions, SegmentHandle, SplineContext};
pub use deform::DeformKind;
pub use diagnostics::{SkipReason, TickReport};
pub use environment::{Environment, Headless};
pub use object::{MeshId, ObjectDesc, ObjectId};
pub use spline::{Segment, SplineDesc, SplineId};

use geom::{Point3, Pose};

cfg_if::cfg_if! {
    if #[cfg(all(feature = "console_error_panic_hook", target_arch = "wasm32"))] {
        #[wasm_bindgen(start)]
        pub fn initialize() {
            console_error_panic_hook::set_once();
            init_logger();
        }
    } else {
        #[wasm_bindgen(start)]
        pub fn initialize() {
            // no-op fallback when panic hook is disabled
            init_logger();
        }
    }
}

#[cfg(feature = "debug_logs")]
fn init_logger() {
    use log::LevelFilter;
    use wasm_bindgen_console_logger::DEFAULT_LOGGER;
    // A logger installed by the host wins.
    if log::set_logger(&DEFAULT_LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}

#[cfg(not(feature = "debug_logs"))]
fn init_logger() {
    // no-op fallback when debug logs are disabled
}

#[cfg(all(feature = "wasm_threads", target_arch = "wasm32"))]
#[wasm_bindgen]
pub async fn initialize_parallel(worker_count: Option<u32>) -> Result<(), JsError> {
    let threads = worker_count
        .map(|count| count.max(1) as usize)
        .or_else(|| {
            std::thread::available_parallelism()
                .map(|value| value.get())
                .ok()
        })
        .unwrap_or(1);

    wasm_bindgen_rayon::init_thread_pool(threads)
        .await
        .map_err(|err| JsError::new(&format!("could not start the rayon thread pool: {err}")))
}

/// JavaScript entry point over a headless [`SplineContext`].
#[wasm_bindgen]
pub struct Engine {
    context: SplineContext,
    last_report: Option<TickReport>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
impl Engine {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Engine {
        Engine {
            context: SplineContext::default(),
            last_report: None,
        }
    }

    /// Creates an engine from a (partial) `EngineOptions` object.
    pub fn with_options(options: JsValue) -> Result<Engine, JsValue> {
        let options: EngineOptions = from_js(options)?;
        Ok(Engine {
            context: SplineContext::new(options),
            last_report: None,
        })
    }

    pub fn add_spline(&mut self, id: u32, desc: JsValue) -> Result<(), JsValue> {
        let desc: SplineDesc = from_js(desc)?;
        self.context
            .register_curve(SplineId(u64::from(id)), desc)
            .map_err(to_js_error)
    }

    pub fn remove_spline(&mut self, id: u32) -> Result<(), JsValue> {
        self.context
            .unregister_curve(SplineId(u64::from(id)))
            .map(|_| ())
            .map_err(to_js_error)
    }

    /// Moves an anchor (in curve space); its handles move with it.
    pub fn set_anchor(&mut self, spline: u32, index: usize, x: f64, y: f64, z: f64) -> Result<(), JsValue> {
        self.context
            .curve_mut(SplineId(u64::from(spline)))
            .map_err(to_js_error)?
            .set_anchor(index, Point3::new(x, y, z))
            .map_err(to_js_error)
    }

    pub fn set_spline_pose(&mut self, spline: u32, pose: JsValue) -> Result<(), JsValue> {
        let pose: Pose = from_js(pose)?;
        self.context
            .curve_mut(SplineId(u64::from(spline)))
            .map_err(to_js_error)?
            .set_pose(pose)
            .map_err(to_js_error)
    }

    /// World frame at length fraction `t`.
    pub fn evaluate(&self, spline: u32, t: f64) -> Result<JsValue, JsValue> {
        let frame = self
            .context
            .evaluate(SplineId(u64::from(spline)), t)
            .map_err(to_js_error)?;
        to_js(&frame)
    }

    pub fn evaluate_at_length(&self, spline: u32, distance: f64) -> Result<JsValue, JsValue> {
        let frame = self
            .context
            .evaluate_at_length(SplineId(u64::from(spline)), distance)
            .map_err(to_js_error)?;
        to_js(&frame)
    }

    pub fn add_object(&mut self, id: u32, desc: JsValue) -> Result<(), JsValue> {
        let desc: ObjectDesc = from_js(desc)?;
        self.context
            .register_object(ObjectId(u64::from(id)), desc)
            .map_err(to_js_error)
    }

    pub fn remove_object(&mut self, id: u32) -> Result<(), JsValue> {
        self.context
            .unregister_object(ObjectId(u64::from(id)))
            .map(|_| ())
            .map_err(to_js_error)
    }

    pub fn set_object_pose(&mut self, id: u32, pose: JsValue) -> Result<(), JsValue> {
        let pose: Pose = from_js(pose)?;
        self.context
            .object_mut(ObjectId(u64::from(id)))
            .map_err(to_js_error)?
            .set_local_pose(pose)
            .map_err(to_js_error)
    }

    /// Runs one update and returns its [`TickReport`].
    pub fn tick(&mut self) -> Result<JsValue, JsValue> {
        let report = self.context.tick();
        let value = to_js(&report);
        self.last_report = Some(report);
        value
    }

    /// Summary line of the last tick, if any.
    pub fn last_summary(&self) -> Option<String> {
        self.last_report.as_ref().map(TickReport::summary)
    }

    /// Flat `[x, y, z, ...]` positions of a generated mesh.
    pub fn mesh_positions(&self, object: u32, mesh: u32) -> Option<Vec<f64>> {
        let key = ContainerKey::new(ObjectId(u64::from(object)), MeshId(u64::from(mesh)), 0);
        self.context
            .mesh(&key)
            .map(|mesh| mesh.positions.iter().flatten().copied().collect())
    }

    /// Whole generated mesh (positions, indices, normals, ...).
    pub fn mesh(&self, object: u32, mesh: u32) -> Result<JsValue, JsValue> {
        let key = ContainerKey::new(ObjectId(u64::from(object)), MeshId(u64::from(mesh)), 0);
        match self.context.mesh(&key) {
            Some(mesh) => to_js(mesh),
            None => Ok(JsValue::NULL),
        }
    }

    pub fn follower_pose(&self, id: u32) -> Result<JsValue, JsValue> {
        match self.context.follower_pose(ObjectId(u64::from(id))) {
            Some(pose) => to_js(&pose),
            None => Ok(JsValue::NULL),
        }
    }

    /// Releases cached buffers of a host scope; returns the number dropped.
    pub fn teardown_scope(&mut self, scope: u32) -> usize {
        self.context.on_scope_teardown(ScopeId(u64::from(scope)))
    }
}

impl Engine {
    #[must_use]
    pub fn context(&self) -> &SplineContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SplineContext {
        &mut self.context
    }
}

fn from_js<T: DeserializeOwned>(value: JsValue) -> Result<T, JsValue> {
    serde_wasm_bindgen::from_value(value).map_err(to_js_error)
}

fn to_js<T: serde::Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value).map_err(to_js_error)
}

fn to_js_error<E: fmt::Display>(error: E) -> JsValue {
    js_error(&error.to_string())
}

fn js_error(message: &str) -> JsValue {
    #[cfg(target_arch = "wasm32")]
    {
        JsError::new(message).into()
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        let _ = message;
        JsValue::NULL
    }
}
