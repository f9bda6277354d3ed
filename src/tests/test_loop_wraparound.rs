//! Looped curves: evaluation at `t` and `t + 1` agree.

use crate::geom::{Point3, Tolerance, Vec3};
use crate::spline::{NormalMode, Segment, Spline, SplineDesc, SplineId};

fn ring(mode: NormalMode) -> Spline {
    // Four anchors on a circle of radius 5, handles tangent to it.
    let k = 5.0 * 0.552_284_75;
    let segments = vec![
        Segment::smooth(Point3::new(5.0, 0.0, 0.0), Vec3::new(0.0, 0.0, k)),
        Segment::smooth(Point3::new(0.0, 0.0, 5.0), Vec3::new(-k, 0.0, 0.0)),
        Segment::smooth(Point3::new(-5.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -k)),
        Segment::smooth(Point3::new(0.0, 0.0, -5.0), Vec3::new(k, 0.0, 0.0)),
    ];
    let mut desc = SplineDesc::new(segments);
    desc.looped = true;
    desc.normal_mode = mode;
    let mut spline = Spline::from_desc(SplineId(3), desc, Default::default()).unwrap();
    spline.rebuild(Vec3::Y);
    spline
}

#[test]
fn evaluate_wraps_by_whole_turns() {
    for mode in [NormalMode::Static, NormalMode::Dynamic] {
        let spline = ring(mode);
        let tol = Tolerance::LOOSE;
        for i in 0..8 {
            let t = i as f64 / 8.0 + 0.03;
            let a = spline.evaluate(t).unwrap();
            let b = spline.evaluate(t + 1.0).unwrap();
            let c = spline.evaluate(t - 2.0).unwrap();
            assert!(tol.approx_eq_point3(a.origin, b.origin));
            assert!(tol.approx_eq_point3(a.origin, c.origin));
            assert!((a.z_axis - b.z_axis).length() < 1e-6);
            assert!((a.y_axis - b.y_axis).length() < 1e-6);
        }
    }
}

#[test]
fn ring_closes_and_has_circle_length() {
    let spline = ring(NormalMode::Static);
    let start = spline.evaluate(0.0).unwrap();
    let end = spline.evaluate(1.0).unwrap();
    assert!(Tolerance::LOOSE.approx_eq_point3(start.origin, end.origin));
    let total = spline.total_length().unwrap();
    let circumference = 2.0 * std::f64::consts::PI * 5.0;
    assert!((total - circumference).abs() / circumference < 1e-3);
}

#[test]
fn distance_past_the_end_wraps_on_loops() {
    let spline = ring(NormalMode::Static);
    let total = spline.total_length().unwrap();
    let a = spline.evaluate_at_length(2.0).unwrap();
    let b = spline.evaluate_at_length(2.0 + total).unwrap();
    assert!(Tolerance::new(1e-6).approx_eq_point3(a.origin, b.origin));
}
