use spline_mesh_engine::connector::ConnectorId;
use spline_mesh_engine::environment::RecordingEnvironment;
use spline_mesh_engine::geom::{GeomMesh, NoiseKind, NoiseLayer, Point3, Pose, Vec2, Vec3};
use spline_mesh_engine::object::{SnapSettings, SnapTarget};
use spline_mesh_engine::spline::{NormalMode, SegmentParams};
use spline_mesh_engine::{
    ContainerKey, DeformKind, Engine, EngineOptions, MeshId, ObjectDesc, ObjectId, ScopeId,
    Segment, SplineContext, SplineDesc, SplineId,
};

fn road(length: f64) -> SplineDesc {
    let handle = Vec3::new(0.0, 0.0, length / 6.0);
    SplineDesc::new(vec![
        Segment::smooth(Point3::ORIGIN, handle),
        Segment::smooth(Point3::new(0.0, 0.0, length / 2.0), handle),
        Segment::smooth(Point3::new(0.0, 0.0, length), handle),
    ])
}

fn plank() -> GeomMesh {
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    for row in 0..=4u32 {
        let z = f64::from(row) * 0.5;
        positions.push([-0.5, 0.0, z]);
        positions.push([0.5, 0.0, z]);
        if row > 0 {
            let base = (row - 1) * 2;
            indices.extend_from_slice(&[base, base + 2, base + 1, base + 1, base + 2, base + 3]);
        }
    }
    GeomMesh::new(positions, indices)
}

#[test]
fn engine_facade_reads_back_meshes() {
    let mut engine = Engine::new();
    {
        let context = engine.context_mut();
        context.register_curve(SplineId(1), road(12.0)).expect("curve");
        context
            .register_object(
                ObjectId(4),
                ObjectDesc::new(SplineId(1), DeformKind::Deformation)
                    .with_mesh(MeshId(2), plank())
                    .in_scope(ScopeId(9)),
            )
            .expect("object");
        context.tick();
    }
    let positions = engine.mesh_positions(4, 2).expect("mesh generated");
    assert_eq!(positions.len(), 10 * 3);
    assert!(engine.mesh_positions(4, 3).is_none());
    assert_eq!(engine.teardown_scope(9), 2);
    assert!(engine.mesh_positions(4, 2).is_none());
}

#[test]
fn bending_the_curve_bends_the_mesh() {
    let mut context = SplineContext::new(EngineOptions::default().with_resolution(256));
    context.register_curve(SplineId(1), road(12.0)).unwrap();
    context
        .register_object(
            ObjectId(1),
            ObjectDesc::new(SplineId(1), DeformKind::Deformation)
                .with_local(Pose::from_position(Vec3::new(0.0, 0.0, 5.0)))
                .with_mesh(MeshId(1), plank()),
        )
        .unwrap();
    context.tick();
    let key = ContainerKey::new(ObjectId(1), MeshId(1), 0);
    let straight = context.mesh(&key).unwrap().clone();

    context
        .curve_mut(SplineId(1))
        .unwrap()
        .set_anchor(1, Point3::new(3.0, 0.0, 6.0))
        .unwrap();
    let report = context.tick();
    assert_eq!(report.rebuilt_curves, 1);
    assert_eq!(report.deformed_objects, 1);

    let bent = context.mesh(&key).unwrap();
    assert_eq!(bent.indices, straight.indices);
    let moved = bent
        .positions
        .iter()
        .zip(&straight.positions)
        .filter(|(a, b)| (a[0] - b[0]).abs() > 0.1)
        .count();
    assert!(moved > 0);
    // The plank keeps its width across the bend.
    for pair in bent.positions.chunks(2) {
        let a = Point3::from_array(pair[0]);
        let b = Point3::from_array(pair[1]);
        assert!((a.distance_to(b) - 1.0).abs() < 1e-3);
    }
}

#[test]
fn shaping_and_noise_only_redeform() {
    let mut context = SplineContext::default();
    let mut desc = road(12.0);
    desc.normal_mode = NormalMode::Dynamic;
    context.register_curve(SplineId(1), desc).unwrap();
    context
        .register_object(
            ObjectId(1),
            ObjectDesc::new(SplineId(1), DeformKind::Deformation).with_mesh(MeshId(1), plank()),
        )
        .unwrap();
    context.tick();

    let spline = context.curve_mut(SplineId(1)).unwrap();
    spline
        .set_params(
            0,
            SegmentParams {
                scale: Vec2::new(2.0, 1.0),
                ..SegmentParams::default()
            },
        )
        .unwrap();
    spline.set_noise_layers(vec![NoiseLayer::new(NoiseKind::Ridged).with_amplitude(0.5)]);
    let report = context.tick();
    assert_eq!(report.changed_curves, 1);
    assert_eq!(report.rebuilt_curves, 0, "shaping does not touch the arc-length table");
    assert_eq!(report.deformed_objects, 1);
}

#[test]
fn followers_snap_and_connectors_compose() {
    let mut context =
        SplineContext::with_environment(EngineOptions::default(), RecordingEnvironment::default());
    context.register_curve(SplineId(1), road(12.0)).unwrap();
    context
        .register_connector(ConnectorId(1), Pose::from_position(Vec3::new(0.0, 0.0, 12.0)))
        .unwrap();
    context.link_connector(ConnectorId(1), SplineId(1), 2).unwrap();
    context
        .register_object(
            ObjectId(1),
            ObjectDesc::new(SplineId(1), DeformKind::Follower)
                .with_local(Pose::from_position(Vec3::new(0.0, 1.0, 3.0))),
        )
        .unwrap();
    context
        .register_object(
            ObjectId(2),
            ObjectDesc::new(SplineId(1), DeformKind::Deformation)
                .with_mesh(MeshId(1), plank())
                .with_snap(SnapSettings {
                    start: Some(SnapTarget::NearestAnchor { max_distance: 1.0 }),
                    end: None,
                }),
        )
        .unwrap();
    let report = context.tick();
    assert!(report.is_clean(), "{report}");
    assert_eq!(report.followed_objects, 1);
    assert_eq!(report.deformed_objects, 1);

    let pose = context.follower_pose(ObjectId(1)).unwrap();
    assert!((pose.position.y - 1.0).abs() < 1e-6);
    assert!((pose.position.z - 3.0).abs() < 1e-3);

    context
        .connector_mut(ConnectorId(1))
        .unwrap()
        .set_pose(Pose::from_position(Vec3::new(0.0, 0.0, 18.0)))
        .unwrap();
    let report = context.tick();
    assert_eq!(report.carried_anchors, 1);
    let total = context.curve(SplineId(1)).unwrap().total_length().unwrap();
    assert!((total - 18.0).abs() < 1e-2);

    let (meshes, followers) = context.environment_mut().drain();
    assert_eq!(meshes.len(), 2);
    assert_eq!(followers.len(), 2);
}
