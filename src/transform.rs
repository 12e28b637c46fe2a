use crate::bounds::BoundingBox;
use crate::error::GeometryComputationError;
use crate::kinematics::is_finite;
use crate::surface::SurfaceModel;
use crate::triangle::Tri;
use nalgebra::{Isometry3, Point3};

/// A [`SurfaceModel`] positioned in the room frame.
///
/// Shares topology with its source and owns only the moved vertices. Lives
/// for one pair test.
#[derive(Clone, Debug)]
pub struct TransformedSurface<'a> {
    source: &'a SurfaceModel,
    vertices: Vec<[f64; 3]>,
    bounds: BoundingBox,
    centroid: [f64; 3],
}

impl<'a> TransformedSurface<'a> {
    pub fn source(&self) -> &'a SurfaceModel {
        self.source
    }

    pub fn vertices(&self) -> &[[f64; 3]] {
        &self.vertices
    }

    pub fn indices(&self) -> &'a [[u32; 3]] {
        self.source.indices()
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn centroid(&self) -> [f64; 3] {
        self.centroid
    }

    pub fn triangle_count(&self) -> usize {
        self.source.triangle_count()
    }

    pub fn corners(&self, index: usize) -> Tri {
        let t = self.source.indices()[index];
        [
            self.vertices[t[0] as usize],
            self.vertices[t[1] as usize],
            self.vertices[t[2] as usize],
        ]
    }

    pub fn is_degenerate(&self, index: usize) -> bool {
        self.source.is_degenerate(index)
    }

    /// True when the source model carries open/non-manifold/degenerate
    /// warnings.
    pub fn has_warnings(&self) -> bool {
        !self.source.warnings().is_empty()
    }
}

/// Applies rigid transforms to surface models.
pub struct TransformPipeline;

impl TransformPipeline {
    /// Moves every vertex of `model` by `transform`. Topology is unchanged;
    /// bounds and centroid are recomputed from the moved geometry.
    pub fn place<'a>(
        model: &'a SurfaceModel,
        transform: &Isometry3<f64>,
    ) -> Result<TransformedSurface<'a>, GeometryComputationError> {
        if !is_finite(transform) {
            return Err(GeometryComputationError::NonFiniteTransform);
        }

        let mut vertices = Vec::with_capacity(model.vertex_count());
        for (index, v) in model.vertices().iter().enumerate() {
            let p = transform.transform_point(&Point3::new(v[0], v[1], v[2]));
            if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
                return Err(GeometryComputationError::NonFiniteVertex { index });
            }
            vertices.push([p.x, p.y, p.z]);
        }

        let c = model.centroid();
        let c = transform.transform_point(&Point3::new(c[0], c[1], c[2]));
        let bounds = BoundingBox::from_points(vertices.iter());

        Ok(TransformedSurface {
            source: model,
            vertices,
            bounds,
            centroid: [c.x, c.y, c.z],
        })
    }

    /// The model as supplied, in its own frame.
    pub fn identity(model: &SurfaceModel) -> TransformedSurface<'_> {
        TransformedSurface {
            source: model,
            vertices: model.vertices().to_vec(),
            bounds: *model.bounds(),
            centroid: model.centroid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};

    #[test]
    fn test_identity_transform_preserves_vertices() {
        let m = SurfaceModel::from_box([3.0, -2.0, 7.5], [1.0, 2.0, 3.0]).unwrap();
        let placed = TransformPipeline::place(&m, &Isometry3::identity()).unwrap();
        for (a, b) in placed.vertices().iter().zip(m.vertices()) {
            for k in 0..3 {
                assert_relative_eq!(a[k], b[k], epsilon = 1e-12);
            }
        }
        assert_eq!(placed.indices(), m.indices());
        assert_eq!(TransformPipeline::identity(&m).vertices(), m.vertices());
    }

    #[test]
    fn test_bounds_and_centroid_follow_transform() {
        let m = SurfaceModel::from_box([10.0, 0.0, 0.0], [2.0, 2.0, 2.0]).unwrap();
        let rot = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);
        let iso = Isometry3::from_parts(Translation3::new(0.0, 0.0, 5.0), rot);
        let placed = TransformPipeline::place(&m, &iso).unwrap();

        let c = placed.centroid();
        assert_relative_eq!(c[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(c[1], 10.0, epsilon = 1e-9);
        assert_relative_eq!(c[2], 5.0, epsilon = 1e-9);
        assert_relative_eq!(placed.bounds().min[1], 9.0, epsilon = 1e-9);
        assert_relative_eq!(placed.bounds().max[1], 11.0, epsilon = 1e-9);
        // The source is untouched.
        assert_eq!(m.centroid(), [10.0, 0.0, 0.0]);
    }

    #[test]
    fn test_non_finite_transform_is_rejected() {
        let m = SurfaceModel::from_box([0.0; 3], [1.0; 3]).unwrap();
        let iso = Isometry3::translation(f64::NAN, 0.0, 0.0);
        assert_eq!(
            TransformPipeline::place(&m, &iso).unwrap_err(),
            GeometryComputationError::NonFiniteTransform
        );
    }

    #[test]
    fn test_overflowing_vertex_is_rejected() {
        let m = SurfaceModel::new(
            vec![[f64::MAX, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            vec![[0, 1, 2]],
        )
        .unwrap();
        let iso = Isometry3::translation(f64::MAX, 0.0, 0.0);
        assert_eq!(
            TransformPipeline::place(&m, &iso).unwrap_err(),
            GeometryComputationError::NonFiniteVertex { index: 0 }
        );
    }
}
