//! Recomputing an unchanged scene yields identical buffers.

use crate::cache::ContainerKey;
use crate::context::SplineContext;
use crate::deform::DeformKind;
use crate::geom::{GeomMesh, NoiseKind, NoiseLayer, Point3, Vec2, Vec3};
use crate::object::{MeshId, ObjectDesc, ObjectId};
use crate::spline::{NormalMode, Segment, SegmentParams, SplineDesc, SplineId};

fn scene() -> SplineContext {
    let params = SegmentParams {
        roll: 0.2,
        scale: Vec2::new(1.5, 0.8),
        saddle_skew: Vec2::new(0.05, 0.1),
        ..SegmentParams::default()
    };
    let mut desc = SplineDesc::new(vec![
        Segment::smooth(Point3::ORIGIN, Vec3::new(1.0, 0.0, 2.0)).with_params(params),
        Segment::smooth(Point3::new(3.0, 1.0, 8.0), Vec3::new(0.0, 0.5, 2.0)),
    ]);
    desc.normal_mode = NormalMode::Dynamic;
    desc.noise_layers = vec![NoiseLayer::new(NoiseKind::Fbm).with_seed(7).with_amplitude(0.3)];

    let mesh = GeomMesh::new(
        vec![
            [-1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [-1.0, 0.5, 3.0],
            [1.0, 0.5, 3.0],
            [0.0, 1.0, 6.0],
        ],
        vec![0, 2, 1, 1, 2, 3, 2, 4, 3],
    )
    .with_uvs(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 0.5], [1.0, 0.5], [0.5, 1.0]]);

    let mut context = SplineContext::default();
    context.register_curve(SplineId(1), desc).unwrap();
    context
        .register_object(
            ObjectId(1),
            ObjectDesc::new(SplineId(1), DeformKind::Deformation).with_mesh(MeshId(1), mesh),
        )
        .unwrap();
    context
}

#[test]
fn second_tick_without_edits_does_nothing() {
    let mut context = scene();
    let first = context.tick();
    assert_eq!(first.deformed_objects, 1);
    let second = context.tick();
    assert!(second.is_idle());
    assert_eq!(second.changed_curves, 0);
    assert_eq!(second.meshes_written, 0);
}

#[test]
fn forced_recompute_is_bit_identical() {
    let mut context = scene();
    context.tick();
    let key = ContainerKey::new(ObjectId(1), MeshId(1), 0);
    let before = context.mesh(&key).unwrap().clone();

    for _ in 0..3 {
        assert!(
            context
                .request_deformation(ObjectId(1), SplineId(1), DeformKind::Deformation)
                .unwrap()
        );
        let report = context.tick();
        assert_eq!(report.meshes_written, 1);
        let after = context.mesh(&key).unwrap();
        assert_eq!(after, &before);
    }
}

#[test]
fn request_is_idempotent_within_a_tick() {
    let mut context = scene();
    context.tick();
    assert!(
        context
            .request_deformation(ObjectId(1), SplineId(1), DeformKind::Deformation)
            .unwrap()
    );
    assert!(
        !context
            .request_deformation(ObjectId(1), SplineId(1), DeformKind::Deformation)
            .unwrap()
    );
    assert_eq!(context.scheduler().pending(), 1);
    let report = context.tick();
    assert_eq!(report.vertex_count, 5);
}
