use serde::{Deserialize, Serialize};

use super::{Point3, Vec3};

/// Axis-aligned bounds of a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshBounds {
    pub min: Point3,
    pub max: Point3,
}

impl MeshBounds {
    #[must_use]
    pub fn from_points(points: impl IntoIterator<Item = Point3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self {
            min: first,
            max: first,
        };
        for p in iter {
            bounds.min = Point3::new(bounds.min.x.min(p.x), bounds.min.y.min(p.y), bounds.min.z.min(p.z));
            bounds.max = Point3::new(bounds.max.x.max(p.x), bounds.max.y.max(p.y), bounds.max.z.max(p.z));
        }
        Some(bounds)
    }

    #[must_use]
    pub fn center(self) -> Point3 {
        self.min.lerp(self.max, 0.5)
    }

    #[must_use]
    pub fn size(self) -> Vec3 {
        self.max - self.min
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeomMesh {
    pub positions: Vec<[f64; 3]>,
    pub indices: Vec<u32>,
    pub uvs: Option<Vec<[f64; 2]>>,
    pub normals: Option<Vec<[f64; 3]>>,
    /// Unit tangents in the direction of increasing U (present when UVs are).
    pub tangents: Option<Vec<[f64; 3]>>,
    pub bounds: Option<MeshBounds>,
}

impl GeomMesh {
    /// Create a new mesh with positions and indices only.
    #[must_use]
    pub fn new(positions: Vec<[f64; 3]>, indices: Vec<u32>) -> Self {
        let bounds = MeshBounds::from_points(positions.iter().copied().map(Point3::from));
        Self {
            positions,
            indices,
            uvs: None,
            normals: None,
            tangents: None,
            bounds,
        }
    }

    #[must_use]
    pub fn with_uvs(mut self, uvs: Vec<[f64; 2]>) -> Self {
        self.uvs = Some(uvs);
        self
    }

    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = Point3> + '_ {
        self.positions.iter().copied().map(Point3::from)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.indices.len() % 3 != 0 {
            return Err("mesh indices are not a triangle list (len % 3 != 0)".to_string());
        }
        if self.positions.iter().any(|p| p.iter().any(|c| !c.is_finite())) {
            return Err("mesh has invalid vertex coordinates (NaN/Inf)".to_string());
        }
        let n = self.positions.len();
        if self.indices.iter().any(|&i| i as usize >= n) {
            return Err("mesh has out-of-bounds vertex indices".to_string());
        }
        if self.uvs.as_ref().is_some_and(|uvs| uvs.len() != n) {
            return Err("mesh uv buffer does not match vertex count".to_string());
        }
        Ok(())
    }

    /// Recomputes normals, tangents (when UVs exist) and bounds from positions.
    pub fn recalculate_derived(&mut self) {
        let normals = compute_smooth_normals(&self.positions, &self.indices);
        self.tangents = self
            .uvs
            .as_deref()
            .map(|uvs| compute_tangents(&self.positions, &self.indices, uvs, &normals));
        self.normals = Some(normals);
        self.bounds = MeshBounds::from_points(self.points());
    }

    /// Reverses triangle winding, used when a mirrored deformation flips handedness.
    pub fn flip_winding(&mut self) {
        for tri in self.indices.chunks_exact_mut(3) {
            tri.swap(1, 2);
        }
    }
}

fn compute_smooth_normals(positions: &[[f64; 3]], indices: &[u32]) -> Vec<[f64; 3]> {
    let mut normals = vec![Vec3::ZERO; positions.len()];

    for tri in indices.chunks_exact(3) {
        let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        let (Some(a), Some(b), Some(c)) = (positions.get(i0), positions.get(i1), positions.get(i2))
        else {
            continue;
        };
        let (a, b, c) = (Point3::from(*a), Point3::from(*b), Point3::from(*c));
        let face = (b - a).cross(c - a);
        normals[i0] += face;
        normals[i1] += face;
        normals[i2] += face;
    }

    normals
        .into_iter()
        .map(|n| n.normalized().unwrap_or(Vec3::Y).to_array())
        .collect()
}

fn compute_tangents(
    positions: &[[f64; 3]],
    indices: &[u32],
    uvs: &[[f64; 2]],
    normals: &[[f64; 3]],
) -> Vec<[f64; 3]> {
    let mut tangents = vec![Vec3::ZERO; positions.len()];

    for tri in indices.chunks_exact(3) {
        let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        let (Some(p0), Some(p1), Some(p2)) = (positions.get(i0), positions.get(i1), positions.get(i2))
        else {
            continue;
        };
        let (Some(uv0), Some(uv1), Some(uv2)) = (uvs.get(i0), uvs.get(i1), uvs.get(i2)) else {
            continue;
        };

        let p0 = Point3::from(*p0);
        let edge1 = Point3::from(*p1) - p0;
        let edge2 = Point3::from(*p2) - p0;
        let (du1, dv1) = (uv1[0] - uv0[0], uv1[1] - uv0[1]);
        let (du2, dv2) = (uv2[0] - uv0[0], uv2[1] - uv0[1]);

        let det = du1 * dv2 - du2 * dv1;
        // Zero-area triangle in UV space.
        if det.abs() < 1e-12 {
            continue;
        }

        let t = (edge1 * dv2 - edge2 * dv1) * (1.0 / det);
        tangents[i0] += t;
        tangents[i1] += t;
        tangents[i2] += t;
    }

    tangents
        .into_iter()
        .enumerate()
        .map(|(i, t)| {
            let n = normals.get(i).map_or(Vec3::Y, |n| Vec3::new(n[0], n[1], n[2]));
            (t - n * n.dot(t))
                .normalized()
                .unwrap_or_else(|| n.any_orthogonal())
                .to_array()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> GeomMesh {
        GeomMesh::new(
            vec![
                [-0.5, 0.0, -0.5],
                [0.5, 0.0, -0.5],
                [0.5, 0.0, 0.5],
                [-0.5, 0.0, 0.5],
            ],
            vec![0, 2, 1, 0, 3, 2],
        )
        .with_uvs(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]])
    }

    #[test]
    fn normals_point_up_for_ccw_quad() {
        let mut mesh = quad();
        mesh.recalculate_derived();
        for n in mesh.normals.as_ref().unwrap() {
            assert!((n[1] - 1.0).abs() < 1e-12, "normal {n:?}");
        }
        let tangents = mesh.tangents.as_ref().unwrap();
        assert!((tangents[0][0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn flip_winding_inverts_normals() {
        let mut mesh = quad();
        mesh.flip_winding();
        mesh.recalculate_derived();
        assert!(mesh.normals.as_ref().unwrap()[0][1] < 0.0);
    }

    #[test]
    fn bounds_cover_all_vertices() {
        let mesh = quad();
        let bounds = mesh.bounds.unwrap();
        assert_eq!(bounds.min, Point3::new(-0.5, 0.0, -0.5));
        assert_eq!(bounds.size(), Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn validate_rejects_out_of_range_indices() {
        let mesh = GeomMesh::new(vec![[0.0; 3]; 3], vec![0, 1, 3]);
        assert!(mesh.validate().is_err());
        assert!(quad().validate().is_ok());
    }
}
