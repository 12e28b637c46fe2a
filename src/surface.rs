//! Immutable triangulated surfaces.

use crate::bounds::BoundingBox;
use crate::error::MeshValidationError;
use crate::triangle::{self, Tri};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Thresholds applied when a surface is constructed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    /// Triangles with an area below this value (mm²) are degenerate.
    pub degenerate_area_epsilon: f64,
    /// Largest tolerated fraction of degenerate triangles.
    pub max_degenerate_fraction: f64,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            degenerate_area_epsilon: 1e-10,
            max_degenerate_fraction: 0.05,
        }
    }
}

/// Non-fatal conditions found on a valid surface.
///
/// Intersection tests still run on such surfaces, but results involving
/// them are reported with reduced confidence, and viewers of the host
/// application may render them unpredictably.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshWarning {
    /// Edges used by only one triangle: the surface has holes.
    OpenSurface { boundary_edges: usize },
    /// Edges shared by more than two triangles.
    NonManifold { edges: usize },
    /// Zero-area triangles, below the rejection threshold. They are skipped
    /// by the collision tests.
    DegenerateTriangles { count: usize },
}

/// Topology summary computed at construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshReport {
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub edge_count: usize,
    pub boundary_edge_count: usize,
    pub non_manifold_edge_count: usize,
    pub degenerate_count: usize,
    /// Connected pieces of the surface.
    pub shell_count: usize,
}

impl MeshReport {
    /// Closed two-manifold: every edge is shared by exactly two triangles.
    pub fn is_closed(&self) -> bool {
        self.boundary_edge_count == 0 && self.non_manifold_edge_count == 0
    }
}

/// A triangulated surface in its component's local frame.
///
/// The isocenter sits at the local origin. Once built the model never
/// changes: placing it in the room produces a separate
/// [`TransformedSurface`](crate::TransformedSurface).
#[derive(Clone, Debug)]
pub struct SurfaceModel {
    vertices: Vec<[f64; 3]>,
    triangles: Vec<[u32; 3]>,
    degenerate: Vec<bool>,
    bounds: BoundingBox,
    centroid: [f64; 3],
    report: MeshReport,
    warnings: Vec<MeshWarning>,
    shell_seeds: Vec<usize>,
}

impl SurfaceModel {
    /// Validates and builds a surface with default [`ValidationOptions`].
    pub fn new(vertices: Vec<[f64; 3]>, triangles: Vec<[u32; 3]>) -> Result<Self, MeshValidationError> {
        Self::with_options(vertices, triangles, &ValidationOptions::default())
    }

    pub fn with_options(
        vertices: Vec<[f64; 3]>,
        triangles: Vec<[u32; 3]>,
        options: &ValidationOptions,
    ) -> Result<Self, MeshValidationError> {
        if vertices.is_empty() || triangles.is_empty() {
            return Err(MeshValidationError::Empty {
                vertices: vertices.len(),
                triangles: triangles.len(),
            });
        }
        if let Some(index) = vertices.iter().position(|v| !v.iter().all(|c| c.is_finite())) {
            return Err(MeshValidationError::NonFiniteVertex { index });
        }
        for (t, tri) in triangles.iter().enumerate() {
            if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertices.len()) {
                return Err(MeshValidationError::IndexOutOfRange {
                    triangle: t,
                    index,
                    vertex_count: vertices.len(),
                });
            }
        }

        let corners = |tri: &[u32; 3]| -> Tri {
            [
                vertices[tri[0] as usize],
                vertices[tri[1] as usize],
                vertices[tri[2] as usize],
            ]
        };

        let mut degenerate = Vec::with_capacity(triangles.len());
        let mut weighted = [0.0; 3];
        let mut total_area = 0.0;
        for tri in &triangles {
            let t = corners(tri);
            let area = triangle::area(&t);
            let repeated = tri[0] == tri[1] || tri[1] == tri[2] || tri[2] == tri[0];
            degenerate.push(repeated || area < options.degenerate_area_epsilon);
            for k in 0..3 {
                weighted[k] += area * (t[0][k] + t[1][k] + t[2][k]) / 3.0;
            }
            total_area += area;
        }

        let degenerate_count = degenerate.iter().filter(|&&d| d).count();
        let limit = options.max_degenerate_fraction;
        if degenerate_count as f64 > limit * triangles.len() as f64 {
            return Err(MeshValidationError::TooManyDegenerate {
                degenerate: degenerate_count,
                total: triangles.len(),
                limit,
            });
        }

        let bounds = BoundingBox::from_points(vertices.iter());
        let centroid = if total_area > 0.0 {
            [weighted[0] / total_area, weighted[1] / total_area, weighted[2] / total_area]
        } else {
            bounds.center()
        };

        let (edge_count, boundary_edge_count, non_manifold_edge_count) = edge_usage(&triangles);
        let (shell_count, shell_seeds) = shells(&vertices, &triangles, &degenerate);
        let report = MeshReport {
            vertex_count: vertices.len(),
            triangle_count: triangles.len(),
            edge_count,
            boundary_edge_count,
            non_manifold_edge_count,
            degenerate_count,
            shell_count,
        };

        let mut warnings = Vec::new();
        if boundary_edge_count > 0 {
            warnings.push(MeshWarning::OpenSurface { boundary_edges: boundary_edge_count });
        }
        if non_manifold_edge_count > 0 {
            warnings.push(MeshWarning::NonManifold { edges: non_manifold_edge_count });
        }
        if degenerate_count > 0 {
            warnings.push(MeshWarning::DegenerateTriangles { count: degenerate_count });
        }
        for w in &warnings {
            warn!(warning = ?w, triangles = triangles.len(), "surface accepted with warning");
        }

        Ok(SurfaceModel {
            vertices,
            triangles,
            degenerate,
            bounds,
            centroid,
            report,
            warnings,
            shell_seeds,
        })
    }

    /// Closed axis-aligned box centred at `center` with edge lengths `size`,
    /// wound with outward normals. A zero edge length leaves every face
    /// degenerate and is rejected like any other collapsed surface.
    pub fn from_box(center: [f64; 3], size: [f64; 3]) -> Result<Self, MeshValidationError> {
        let h = [size[0].abs() * 0.5, size[1].abs() * 0.5, size[2].abs() * 0.5];
        let mut vertices = Vec::with_capacity(8);
        for i in 0..8 {
            let sx = if i & 1 == 0 { -1.0 } else { 1.0 };
            let sy = if i & 2 == 0 { -1.0 } else { 1.0 };
            let sz = if i & 4 == 0 { -1.0 } else { 1.0 };
            vertices.push([center[0] + sx * h[0], center[1] + sy * h[1], center[2] + sz * h[2]]);
        }
        let triangles = vec![
            [0, 2, 1], [1, 2, 3], // -z
            [4, 5, 6], [5, 7, 6], // +z
            [0, 1, 4], [1, 5, 4], // -y
            [2, 6, 3], [3, 6, 7], // +y
            [0, 4, 2], [2, 4, 6], // -x
            [1, 3, 5], [3, 7, 5], // +x
        ];
        Self::new(vertices, triangles)
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn centroid(&self) -> [f64; 3] {
        self.centroid
    }

    pub fn vertices(&self) -> &[[f64; 3]] {
        &self.vertices
    }

    pub fn indices(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Corner positions of triangle `index`.
    pub fn triangle(&self, index: usize) -> Triangle {
        let tri = self.triangles[index];
        Triangle {
            index,
            corners: [
                self.vertices[tri[0] as usize],
                self.vertices[tri[1] as usize],
                self.vertices[tri[2] as usize],
            ],
            degenerate: self.degenerate[index],
        }
    }

    pub fn triangles(&self) -> impl ExactSizeIterator<Item = Triangle> + '_ {
        (0..self.triangles.len()).map(|i| self.triangle(i))
    }

    pub fn is_degenerate(&self, index: usize) -> bool {
        self.degenerate[index]
    }

    pub fn report(&self) -> &MeshReport {
        &self.report
    }

    pub fn warnings(&self) -> &[MeshWarning] {
        &self.warnings
    }

    pub fn is_closed(&self) -> bool {
        self.report.is_closed()
    }

    /// One non-degenerate triangle per connected shell, ascending. Shells
    /// made only of degenerate triangles have no seed.
    pub fn shell_seeds(&self) -> &[usize] {
        &self.shell_seeds
    }
}

/// One triangle of a [`SurfaceModel`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub index: usize,
    pub corners: Tri,
    pub degenerate: bool,
}

impl Triangle {
    pub fn area(&self) -> f64 {
        triangle::area(&self.corners)
    }
}

/// Returns (edges, boundary edges, non-manifold edges).
fn edge_usage(triangles: &[[u32; 3]]) -> (usize, usize, usize) {
    let mut uses: HashMap<(u32, u32), u32> = HashMap::with_capacity(triangles.len() * 3 / 2);
    for tri in triangles {
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            if a == b {
                continue;
            }
            *uses.entry((a.min(b), a.max(b))).or_insert(0) += 1;
        }
    }
    let boundary = uses.values().filter(|&&n| n == 1).count();
    let non_manifold = uses.values().filter(|&&n| n > 2).count();
    (uses.len(), boundary, non_manifold)
}

/// Groups triangles into connected shells. Vertices at the same position
/// count as shared, so unwelded triangle soups group by touching corners.
/// Returns the shell count and one seed triangle per shell.
fn shells(vertices: &[[f64; 3]], triangles: &[[u32; 3]], degenerate: &[bool]) -> (usize, Vec<usize>) {
    let mut first: HashMap<[u64; 3], u32> = HashMap::with_capacity(vertices.len());
    let mut parent: Vec<u32> = vertices
        .iter()
        .enumerate()
        .map(|(i, v)| {
            // Adding zero folds -0.0 into 0.0.
            let key = [(v[0] + 0.0).to_bits(), (v[1] + 0.0).to_bits(), (v[2] + 0.0).to_bits()];
            *first.entry(key).or_insert(i as u32)
        })
        .collect();

    fn find(parent: &mut [u32], mut x: u32) -> u32 {
        while parent[x as usize] != x {
            parent[x as usize] = parent[parent[x as usize] as usize];
            x = parent[x as usize];
        }
        x
    }

    for tri in triangles {
        let r0 = find(&mut parent, tri[0]);
        for &v in &tri[1..] {
            let r = find(&mut parent, v);
            if r != r0 {
                parent[r as usize] = r0;
            }
        }
    }

    let mut seeds: HashMap<u32, Option<usize>> = HashMap::new();
    for (t, tri) in triangles.iter().enumerate() {
        let slot = seeds.entry(find(&mut parent, tri[0])).or_insert(None);
        if slot.is_none() && !degenerate[t] {
            *slot = Some(t);
        }
    }
    let mut out: Vec<usize> = seeds.values().filter_map(|s| *s).collect();
    out.sort_unstable();
    (seeds.len(), out)
}
