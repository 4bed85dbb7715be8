use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{linalg, transforms};

/// A triangle mesh with optional per-vertex normals and colors.
///
/// Vertex normals and colors are either empty or hold one entry per vertex.
/// Colors are floating point RGB in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    vertices: Vec<[f64; 3]>,
    triangles: Vec<[usize; 3]>,
    vertex_normals: Vec<[f64; 3]>,
    vertex_colors: Vec<[f64; 3]>,
}

impl TriangleMesh {
    /// Create a new mesh from vertices and triangles.
    ///
    /// PRECONDITION: every triangle index is lower than `vertices.len()`.
    pub fn new(vertices: Vec<[f64; 3]>, triangles: Vec<[usize; 3]>) -> Self {
        debug_assert!(triangles.iter().flatten().all(|&i| i < vertices.len()));
        Self {
            vertices,
            triangles,
            vertex_normals: Vec::new(),
            vertex_colors: Vec::new(),
        }
    }

    /// Attach per-vertex normals.
    ///
    /// PRECONDITION: `normals` is empty or has one entry per vertex.
    pub fn with_vertex_normals(mut self, normals: Vec<[f64; 3]>) -> Self {
        debug_assert!(normals.is_empty() || normals.len() == self.vertices.len());
        self.vertex_normals = normals;
        self
    }

    /// Attach per-vertex colors.
    ///
    /// PRECONDITION: `colors` is empty or has one entry per vertex.
    pub fn with_vertex_colors(mut self, colors: Vec<[f64; 3]>) -> Self {
        debug_assert!(colors.is_empty() || colors.len() == self.vertices.len());
        self.vertex_colors = colors;
        self
    }

    /// The number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// The number of triangles.
    #[inline]
    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Check if the mesh has neither vertices nor triangles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.triangles.is_empty()
    }

    /// Get as reference the vertices of the mesh.
    pub fn vertices(&self) -> &[[f64; 3]] {
        &self.vertices
    }

    /// Get as reference the triangles of the mesh.
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Get as reference the vertex normals, empty if the mesh has none.
    pub fn vertex_normals(&self) -> &[[f64; 3]] {
        &self.vertex_normals
    }

    /// Get as reference the vertex colors, empty if the mesh has none.
    pub fn vertex_colors(&self) -> &[[f64; 3]] {
        &self.vertex_colors
    }

    /// Check if the mesh has one normal per vertex.
    pub fn has_vertex_normals(&self) -> bool {
        !self.vertices.is_empty() && self.vertex_normals.len() == self.vertices.len()
    }

    /// Check if the mesh has one color per vertex.
    pub fn has_vertex_colors(&self) -> bool {
        !self.vertices.is_empty() && self.vertex_colors.len() == self.vertices.len()
    }

    /// Rotate the mesh in place about a center.
    ///
    /// Vertex normals are rotated with the mesh.
    ///
    /// # Arguments
    ///
    /// * `rotation` - A row-major rotation matrix.
    /// * `center` - The pivot of the rotation.
    pub fn rotate(&mut self, rotation: &[[f64; 3]; 3], center: &[f64; 3]) {
        transforms::rotate_points(&mut self.vertices, rotation, center);
        transforms::rotate_directions(&mut self.vertex_normals, rotation);
    }

    /// Recompute the vertex normals from the faces.
    ///
    /// Each vertex normal is the normalized sum of the area-weighted normals of
    /// its adjacent triangles. Isolated vertices get a zero normal.
    pub fn compute_vertex_normals(&mut self) {
        let mut normals = vec![[0.0; 3]; self.vertices.len()];
        for &[a, b, c] in &self.triangles {
            let n = linalg::triangle_normal(&self.vertices[a], &self.vertices[b], &self.vertices[c]);
            for i in [a, b, c] {
                normals[i][0] += n[0];
                normals[i][1] += n[1];
                normals[i][2] += n[2];
            }
        }
        self.vertex_normals = normals.iter().map(linalg::normalize3).collect();
    }

    /// Remove triangles that collapse to a segment or a point.
    ///
    /// A triangle is degenerate if two of its corners share a position or its
    /// area is below `1e-12`.
    ///
    /// # Returns
    ///
    /// The number of removed triangles.
    pub fn remove_degenerate_triangles(&mut self) -> usize {
        let canonical = self.canonical_vertex_ids();
        let before = self.triangles.len();
        let vertices = &self.vertices;
        self.triangles.retain(|&[a, b, c]| {
            let (ca, cb, cc) = (canonical[a], canonical[b], canonical[c]);
            ca != cb
                && cb != cc
                && ca != cc
                && linalg::triangle_area(&vertices[a], &vertices[b], &vertices[c]) >= 1e-12
        });
        let removed = before - self.triangles.len();
        log::debug!("Removed {removed} degenerate triangles");
        removed
    }

    /// Remove triangles spanning the same corner positions as an earlier one.
    ///
    /// The winding is ignored, the first occurrence is kept.
    ///
    /// # Returns
    ///
    /// The number of removed triangles.
    pub fn remove_duplicated_triangles(&mut self) -> usize {
        let canonical = self.canonical_vertex_ids();
        let before = self.triangles.len();
        let mut seen = HashSet::with_capacity(self.triangles.len());
        self.triangles.retain(|t| {
            let mut key = t.map(|i| canonical[i]);
            key.sort_unstable();
            seen.insert(key)
        });
        let removed = before - self.triangles.len();
        log::debug!("Removed {removed} duplicated triangles");
        removed
    }

    /// Merge vertices sharing the same position.
    ///
    /// The first vertex of each position is kept together with its normal and
    /// color, triangle indices are remapped accordingly.
    ///
    /// # Returns
    ///
    /// The number of removed vertices.
    pub fn remove_duplicated_vertices(&mut self) -> usize {
        let canonical = self.canonical_vertex_ids();
        let before = self.vertices.len();

        // old index -> compacted index
        let mut remap = vec![0usize; before];
        let mut kept = Vec::with_capacity(before);
        for (i, &c) in canonical.iter().enumerate() {
            if c == i {
                remap[i] = kept.len();
                kept.push(i);
            } else {
                remap[i] = remap[c];
            }
        }

        if kept.len() == before {
            return 0;
        }

        self.vertices = kept.iter().map(|&i| self.vertices[i]).collect();
        if !self.vertex_normals.is_empty() {
            self.vertex_normals = kept.iter().map(|&i| self.vertex_normals[i]).collect();
        }
        if !self.vertex_colors.is_empty() {
            self.vertex_colors = kept.iter().map(|&i| self.vertex_colors[i]).collect();
        }
        for t in self.triangles.iter_mut() {
            *t = t.map(|i| remap[i]);
        }

        let removed = before - self.vertices.len();
        log::debug!("Removed {removed} duplicated vertices");
        removed
    }

    /// Remove triangles until no edge is shared by more than two of them.
    ///
    /// For each over-shared edge the triangles with the smallest area are
    /// dropped first.
    ///
    /// # Returns
    ///
    /// The number of removed triangles.
    pub fn remove_non_manifold_edges(&mut self) -> usize {
        let mut edges: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        for (t, &[a, b, c]) in self.triangles.iter().enumerate() {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                edges.entry((u.min(v), u.max(v))).or_default().push(t);
            }
        }

        let areas = self
            .triangles
            .iter()
            .map(|&[a, b, c]| {
                linalg::triangle_area(&self.vertices[a], &self.vertices[b], &self.vertices[c])
            })
            .collect::<Vec<_>>();

        let mut alive = vec![true; self.triangles.len()];
        for adjacent in edges.values() {
            let mut live = adjacent
                .iter()
                .copied()
                .filter(|&t| alive[t])
                .collect::<Vec<_>>();
            if live.len() <= 2 {
                continue;
            }
            live.sort_by(|&x, &y| areas[x].total_cmp(&areas[y]).then(x.cmp(&y)));
            for &t in &live[..live.len() - 2] {
                alive[t] = false;
            }
        }

        let before = self.triangles.len();
        let mut index = 0;
        self.triangles.retain(|_| {
            let keep = alive[index];
            index += 1;
            keep
        });
        let removed = before - self.triangles.len();
        log::debug!("Removed {removed} triangles on non-manifold edges");
        removed
    }

    /// Run the mesh hygiene steps in their fixed order.
    ///
    /// Removes degenerate triangles, duplicated triangles, duplicated vertices
    /// and non-manifold edges. Running it twice has the same effect as once.
    pub fn clean(&mut self) {
        self.remove_degenerate_triangles();
        self.remove_duplicated_triangles();
        self.remove_duplicated_vertices();
        self.remove_non_manifold_edges();
    }

    // for each vertex, the index of the first vertex with the same position
    fn canonical_vertex_ids(&self) -> Vec<usize> {
        let mut first: HashMap<[u64; 3], usize> = HashMap::with_capacity(self.vertices.len());
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, p)| {
                // adding zero folds -0.0 into 0.0
                let key = p.map(|v| (v + 0.0).to_bits());
                *first.entry(key).or_insert(i)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::rotation_matrix_from_xyz;
    use approx::assert_relative_eq;

    fn quad() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn test_mesh_accessors() {
        let mesh = quad().with_vertex_colors(vec![[0.5; 3]; 4]);
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_triangles(), 2);
        assert!(mesh.has_vertex_colors());
        assert!(!mesh.has_vertex_normals());
        assert!(!mesh.is_empty());
        assert!(TriangleMesh::default().is_empty());
    }

    #[test]
    fn test_compute_vertex_normals() {
        let mut mesh = quad();
        mesh.compute_vertex_normals();
        assert!(mesh.has_vertex_normals());
        for n in mesh.vertex_normals() {
            assert_eq!(n, &[0.0, 0.0, 1.0]);
        }

        // an unreferenced vertex keeps a zero normal
        let mut mesh = TriangleMesh::new(
            vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [5.0, 5.0, 5.0]],
            vec![[0, 1, 2]],
        );
        mesh.compute_vertex_normals();
        assert_eq!(mesh.vertex_normals()[3], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rotate_pi_about_x() {
        let mut mesh = quad();
        mesh.compute_vertex_normals();
        mesh.rotate(
            &rotation_matrix_from_xyz([std::f64::consts::PI, 0.0, 0.0]),
            &[0.0, 0.0, 0.0],
        );
        assert_relative_eq!(mesh.vertices()[2][1], -1.0, epsilon = 1e-12);
        assert_relative_eq!(mesh.vertex_normals()[0][2], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_remove_degenerate_triangles() {
        let mut mesh = TriangleMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [1.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
            ],
            vec![[0, 1, 2], [0, 0, 2], [0, 1, 3], [0, 1, 4]],
        );
        assert_eq!(mesh.remove_degenerate_triangles(), 3);
        assert_eq!(mesh.triangles(), &[[0, 1, 2]]);
    }

    #[test]
    fn test_remove_duplicated_triangles() {
        let mut mesh = TriangleMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            vec![[0, 1, 2], [2, 1, 0], [1, 2, 0], [0, 1, 3]],
        );
        assert_eq!(mesh.remove_duplicated_triangles(), 3);
        assert_eq!(mesh.triangles(), &[[0, 1, 2]]);
    }

    #[test]
    fn test_remove_duplicated_vertices() {
        let mut mesh = TriangleMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
            ],
            vec![[0, 1, 2], [3, 4, 2]],
        )
        .with_vertex_colors(vec![
            [0.1; 3],
            [0.2; 3],
            [0.3; 3],
            [0.4; 3],
            [0.5; 3],
        ]);

        assert_eq!(mesh.remove_duplicated_vertices(), 1);
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.triangles(), &[[0, 1, 2], [1, 3, 2]]);
        assert_eq!(mesh.vertex_colors()[1], [0.2; 3]);
        assert_eq!(mesh.vertex_colors()[3], [0.5; 3]);
    }

    #[test]
    fn test_remove_duplicated_vertices_signed_zero() {
        let mut mesh = TriangleMesh::new(vec![[0.0, 0.0, 0.0], [-0.0, 0.0, 0.0]], vec![]);
        assert_eq!(mesh.remove_duplicated_vertices(), 1);
    }

    #[test]
    fn test_remove_non_manifold_edges() {
        // three fins on the edge (0, 1), the smallest one goes
        let mut mesh = TriangleMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.5, 2.0, 0.0],
                [0.5, -3.0, 0.0],
                [0.5, 0.0, 0.5],
            ],
            vec![[0, 1, 2], [1, 0, 3], [0, 1, 4]],
        );
        assert_eq!(mesh.remove_non_manifold_edges(), 1);
        assert_eq!(mesh.triangles(), &[[0, 1, 2], [1, 0, 3]]);
    }

    #[test]
    fn test_clean_is_idempotent() {
        let mut mesh = TriangleMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.5, 0.5, 1.0],
                [0.5, 0.5, -1.0],
            ],
            vec![
                [0, 1, 2],
                [2, 1, 0],
                [3, 4, 2],
                [0, 0, 1],
                [1, 2, 5],
                [2, 1, 6],
            ],
        )
        .with_vertex_normals(vec![[0.0, 0.0, 1.0]; 7]);

        mesh.clean();
        let once = mesh.clone();
        assert!(once.num_triangles() <= 6);
        assert!(once.num_vertices() <= 7);
        assert_eq!(once.vertex_normals().len(), once.num_vertices());

        mesh.clean();
        assert_eq!(mesh, once);
    }

    #[test]
    fn test_clean_empty() {
        let mut mesh = TriangleMesh::default();
        mesh.clean();
        mesh.compute_vertex_normals();
        assert!(mesh.is_empty());
    }
}
