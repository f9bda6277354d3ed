mod core;
mod curve;
mod mesh;
mod noise;

pub use core::{Point3, Pose, Quat, Tolerance, Transform, Vec2, Vec3};
pub use curve::{CubicBezier3, Curve3, CurveFrame, static_frame_at, transport_frame};
pub use mesh::{GeomMesh, MeshBounds};
pub use self::noise::{NoiseKind, NoiseLayer, NoiseStack};
