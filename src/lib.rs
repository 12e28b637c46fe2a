//! # radcollide
//!
//! `radcollide` checks a radiotherapy treatment room for collisions between the
//! rotating gantry, the patient couch and the patient, before a plan is
//! delivered. It can be used from Rust or compiled to WebAssembly (WASM).
//!
//! ## Features
//!
//! - **Explicit geometry**: validated triangulated surfaces, a separating-axis triangle test and a
//!   bounding-volume tree, with no dependency on a rendering library.
//! - **Room kinematics**: configurable gantry/couch zero references and rotation senses, couch
//!   translations, snout extension and DICOM patient orientations.
//! - **Parallel sweeps**: gantry × couch angle grids, beam lists and sampled gantry arcs evaluated
//!   with `rayon`, with cooperative cancellation and per-cell failure reporting.
//! - **WASM-first**: a `wasm-bindgen` facade taking flat vertex/index arrays.
//!
//! ## Example
//!
//! See `demos/sweep_report.rs` for a sweep printed as a text collision map.
//!
//! ## Main Interface
//!
//! Load the models into a [`Session`], then either evaluate a single [`Configuration`] with
//! [`Session::evaluate`], or a whole grid or list of configurations with [`SweepEvaluator`].

mod bounds;
mod detector;
mod error;
mod kinematics;
mod machine;
mod surface;
mod sweep;
mod transform;
mod tree;
pub mod triangle;
mod wasm;

pub use bounds::BoundingBox;
pub use detector::{CollisionDetector, CollisionResult, Confidence, DetectorConfig, PairId, PartRef};
pub use error::{
    CollisionError, ErrorKind, GeometryComputationError, MeshValidationError, Result, SweepSpecError,
    UnsupportedOrientationError,
};
pub use kinematics::{
    AxisMask, Component, ComponentTransforms, Configuration, KinematicFrame, OrientationOffsets,
    PatientOrientation, RoomConventions,
};
pub use machine::{ConfigurationVerdict, Machine, PATIENT_PART, Part, Session};
pub use surface::{MeshReport, MeshWarning, SurfaceModel, Triangle, ValidationOptions};
pub use sweep::{
    AngleRange, CancelToken, CellVerdict, CollisionMap, DEFAULT_MAX_CELLS, GantryArc, MAX_ANGLES, RotationDirection,
    SweepEvaluator, SweepSpec, SweepSummary,
};
pub use transform::{TransformPipeline, TransformedSurface};
pub use tree::TriangleTree;
pub use wasm::{CollisionSweep, surface_from_flat};
