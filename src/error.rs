//! Error taxonomy for mesh validation, kinematics and collision evaluation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used by single-configuration callers.
pub type Result<T> = std::result::Result<T, CollisionError>;

/// Structurally invalid surface data.
///
/// Open or non-manifold surfaces are *not* reported here; they produce a
/// [`MeshWarning`](crate::MeshWarning) on an otherwise valid model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeshValidationError {
    /// The surface has no vertices or no triangles.
    #[error("surface is empty: {vertices} vertices, {triangles} triangles")]
    Empty {
        /// Number of vertices supplied.
        vertices: usize,
        /// Number of triangles supplied.
        triangles: usize,
    },

    /// A triangle refers to a vertex that does not exist.
    #[error("triangle {triangle} references vertex {index}, but only {vertex_count} vertices exist")]
    IndexOutOfRange {
        /// Offending triangle.
        triangle: usize,
        /// The out-of-range vertex index.
        index: u32,
        /// Number of vertices in the surface.
        vertex_count: usize,
    },

    /// A vertex coordinate is NaN or infinite.
    #[error("vertex {index} has a non-finite coordinate")]
    NonFiniteVertex {
        /// Offending vertex.
        index: usize,
    },

    /// A flat coordinate or index array whose length is not a multiple of 3.
    #[error("{name} array has length {len}, not a multiple of 3")]
    RaggedArray {
        /// Which array.
        name: &'static str,
        /// Its length.
        len: usize,
    },

    /// Too many zero-area triangles for the surface to be trusted.
    #[error("{degenerate} of {total} triangles are degenerate (limit {limit:.3})")]
    TooManyDegenerate {
        /// Number of degenerate triangles.
        degenerate: usize,
        /// Total number of triangles.
        total: usize,
        /// Allowed degenerate fraction.
        limit: f64,
    },
}

/// A patient orientation that the kinematic model cannot place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported patient orientation `{code}`")]
pub struct UnsupportedOrientationError {
    /// The rejected orientation code.
    pub code: String,
}

impl UnsupportedOrientationError {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

/// Numerical failure while transforming or testing one pair.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeometryComputationError {
    /// The configuration produced a non-finite rigid transform.
    #[error("configuration produced a non-finite transform")]
    NonFiniteTransform,

    /// A vertex became non-finite after the transform was applied.
    #[error("vertex {index} is non-finite after transform")]
    NonFiniteVertex {
        /// Offending vertex.
        index: usize,
    },

    /// The clearance computation returned a non-finite value.
    #[error("separation distance is not finite")]
    NonFiniteDistance,
}

/// Invalid sweep grid description.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SweepSpecError {
    /// A range bound or step is NaN or infinite.
    #[error("{axis} range has a non-finite bound or step")]
    NonFinite {
        /// Which axis the range belongs to.
        axis: &'static str,
    },

    /// The step is zero or negative.
    #[error("{axis} range step must be positive, got {step}")]
    NonPositiveStep {
        /// Which axis the range belongs to.
        axis: &'static str,
        /// The rejected step.
        step: f64,
    },

    /// The stop angle is below the start angle.
    #[error("{axis} range stop {stop} is below start {start}")]
    Reversed {
        /// Which axis the range belongs to.
        axis: &'static str,
        /// Range start.
        start: f64,
        /// Range stop.
        stop: f64,
    },

    /// A range samples more angles than any sweep will hold.
    #[error("{axis} range samples more than {limit} angles")]
    TooManyAngles {
        /// Which axis the range belongs to.
        axis: &'static str,
        /// Largest accepted number of angles.
        limit: usize,
    },

    /// The grid has more cells than the configured cap.
    #[error("sweep grid of {gantry} x {couch} angles exceeds {limit} cells")]
    TooManyCells {
        /// Gantry angles in the grid.
        gantry: usize,
        /// Couch angles in the grid.
        couch: usize,
        /// Configured cell cap.
        limit: usize,
    },
}

/// Umbrella error for callers that evaluate one configuration at a time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollisionError {
    #[error(transparent)]
    Mesh(#[from] MeshValidationError),

    #[error(transparent)]
    Orientation(#[from] UnsupportedOrientationError),

    #[error(transparent)]
    Geometry(#[from] GeometryComputationError),

    #[error(transparent)]
    Sweep(#[from] SweepSpecError),
}

impl CollisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Mesh(_) => ErrorKind::MeshValidation,
            Self::Orientation(_) => ErrorKind::UnsupportedOrientation,
            Self::Geometry(_) => ErrorKind::GeometryComputation,
            Self::Sweep(_) => ErrorKind::SweepSpec,
        }
    }
}

/// Compact classification of a failure, stored in collision map cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MeshValidation,
    UnsupportedOrientation,
    GeometryComputation,
    SweepSpec,
}
