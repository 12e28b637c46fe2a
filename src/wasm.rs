use crate::detector::{CollisionDetector, DetectorConfig};
use crate::error::{CollisionError, MeshValidationError};
use crate::kinematics::{AxisMask, Configuration, KinematicFrame, PatientOrientation, RoomConventions};
use crate::machine::{Machine, Part, Session};
use crate::surface::SurfaceModel;
use crate::sweep::{
    AngleRange, CancelToken, CellVerdict, CollisionMap, GantryArc, RotationDirection, SweepEvaluator, SweepSpec,
};
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen_rayon::init_thread_pool;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn init_threads(n: usize) -> js_sys::Promise {
    init_thread_pool(n)
}

#[wasm_bindgen(typescript_custom_section)]
const TS_CONSTANTS_CELLS: &'static str = r#"
export const CELL_CLEAR = 0;
export const CELL_COLLISION = 1;
export const CELL_UNEVALUATED = -1;
"#;

const CELL_CLEAR: i8 = 0;
const CELL_COLLISION: i8 = 1;
const CELL_UNEVALUATED: i8 = -1;

/// Builds a surface from flat `[x, y, z, ...]` and `[i, j, k, ...]` arrays.
pub fn surface_from_flat(vertices: &[f64], indices: &[u32]) -> Result<SurfaceModel, MeshValidationError> {
    if vertices.len() % 3 != 0 {
        return Err(MeshValidationError::RaggedArray { name: "vertex", len: vertices.len() });
    }
    if indices.len() % 3 != 0 {
        return Err(MeshValidationError::RaggedArray { name: "index", len: indices.len() });
    }
    let v = vertices.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
    let t = indices.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
    SurfaceModel::new(v, t)
}

/// Collision sweep over meshes handed in from JavaScript.
#[wasm_bindgen]
#[derive(Default)]
pub struct CollisionSweep {
    head: Vec<Part>,
    couch: Vec<Part>,
    patient: Option<SurfaceModel>,
    conventions: RoomConventions,
    detector: DetectorConfig,
}

#[wasm_bindgen]
impl CollisionSweep {
    #[wasm_bindgen(constructor)]
    pub fn new() -> CollisionSweep {
        CollisionSweep::default()
    }

    #[wasm_bindgen(js_name = addHeadPart)]
    pub fn add_head_part(&mut self, name: String, vertices: Vec<f64>, indices: Vec<u32>, retractable: bool) -> Result<(), JsError> {
        let mut part = Part::new(name, surface_from_flat(&vertices, &indices)?);
        part.retractable = retractable;
        self.head.push(part);
        Ok(())
    }

    #[wasm_bindgen(js_name = addCouchPart)]
    pub fn add_couch_part(
        &mut self,
        name: String,
        vertices: Vec<f64>,
        indices: Vec<u32>,
        follows_lateral: bool,
        follows_longitudinal: bool,
        follows_vertical: bool,
    ) -> Result<(), JsError> {
        let axes = AxisMask {
            lateral: follows_lateral,
            longitudinal: follows_longitudinal,
            vertical: follows_vertical,
        };
        self.couch.push(Part::new(name, surface_from_flat(&vertices, &indices)?).with_axes(axes));
        Ok(())
    }

    #[wasm_bindgen(js_name = setPatient)]
    pub fn set_patient(&mut self, vertices: Vec<f64>, indices: Vec<u32>) -> Result<(), JsError> {
        self.patient = Some(surface_from_flat(&vertices, &indices)?);
        Ok(())
    }

    #[wasm_bindgen(js_name = clearPatient)]
    pub fn clear_patient(&mut self) {
        self.patient = None;
    }

    #[wasm_bindgen(js_name = setClearanceThreshold)]
    pub fn set_clearance_threshold(&mut self, mm: f64) {
        self.detector.clearance_threshold = mm;
    }

    /// Adopts the zero references of a DICOM patient position code.
    #[wasm_bindgen(js_name = useDicomConventions)]
    pub fn use_dicom_conventions(&mut self, orientation: &str) -> Result<(), JsError> {
        let o: PatientOrientation = orientation.parse()?;
        self.conventions = RoomConventions::dicom_patient_frame(o)?;
        Ok(())
    }

    /// True if any required pair collides at the given placement.
    #[wasm_bindgen(js_name = testConfiguration)]
    pub fn test_configuration(
        &self,
        gantry_angle: f64,
        couch_angle: f64,
        couch_lateral: f64,
        couch_longitudinal: f64,
        couch_vertical: f64,
    ) -> Result<bool, JsError> {
        let c = Configuration {
            gantry_angle,
            couch_angle,
            couch_lateral,
            couch_longitudinal,
            couch_vertical,
            ..Configuration::default()
        };
        Ok(self.check(&c)?)
    }

    /// One code per grid cell, gantry-major: 0 clear, 1 collision,
    /// -1 unevaluated.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        gantry_start: f64,
        gantry_stop: f64,
        gantry_step: f64,
        couch_start: f64,
        couch_stop: f64,
        couch_step: f64,
        orientation: Option<String>,
    ) -> Result<Vec<i8>, JsError> {
        let mut spec = SweepSpec::new(
            AngleRange::new(gantry_start, gantry_stop, gantry_step),
            AngleRange::new(couch_start, couch_stop, couch_step),
        );
        if let Some(code) = orientation {
            spec.orientation = Some(code.parse()?);
        }
        Ok(self.sweep_codes(&spec)?)
    }

    /// One code per sampled gantry angle of an arc, in travel order.
    #[wasm_bindgen(js_name = runArc)]
    pub fn run_arc(
        &self,
        start: f64,
        stop: f64,
        clockwise: bool,
        step: f64,
        couch_angle: f64,
    ) -> Result<Vec<i8>, JsError> {
        let direction = if clockwise { RotationDirection::Clockwise } else { RotationDirection::CounterClockwise };
        let arc = GantryArc::new(start, stop, direction).with_step(step);
        Ok(self.arc_codes(&arc, couch_angle)?)
    }
}

impl CollisionSweep {
    fn session(&self) -> Session {
        Session::new(
            Machine::new("head", self.head.clone()),
            Machine::new("couch", self.couch.clone()),
            self.patient.clone(),
        )
    }

    fn check(&self, c: &Configuration) -> Result<bool, CollisionError> {
        let frame = KinematicFrame::new(self.conventions);
        let detector = CollisionDetector::new(self.detector);
        Ok(self.session().evaluate(&frame, &detector, c)?.collision)
    }

    fn sweep_codes(&self, spec: &SweepSpec) -> Result<Vec<i8>, CollisionError> {
        let evaluator = SweepEvaluator::new(KinematicFrame::new(self.conventions), CollisionDetector::new(self.detector));
        let map = evaluator.run(&self.session(), spec)?;
        Ok(cell_codes(&map))
    }

    fn arc_codes(&self, arc: &GantryArc, couch_angle: f64) -> Result<Vec<i8>, CollisionError> {
        arc.validate()?;
        let base = Configuration { couch_angle, ..Configuration::default() };
        let evaluator = SweepEvaluator::new(KinematicFrame::new(self.conventions), CollisionDetector::new(self.detector));
        let map = evaluator.run_configurations(&self.session(), &arc.configurations(&base), &CancelToken::new());
        Ok(cell_codes(&map))
    }
}

fn cell_codes(map: &CollisionMap) -> Vec<i8> {
    map.iter()
        .map(|cell| match cell {
            CellVerdict::Evaluated(v) if v.collision => CELL_COLLISION,
            CellVerdict::Evaluated(_) => CELL_CLEAR,
            _ => CELL_UNEVALUATED,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_box(center: [f64; 3], size: [f64; 3]) -> (Vec<f64>, Vec<u32>) {
        let m = SurfaceModel::from_box(center, size).unwrap();
        let v = m.vertices().iter().flatten().copied().collect();
        let i = m.indices().iter().flatten().copied().collect();
        (v, i)
    }

    #[test]
    fn test_flat_arrays() {
        let (v, i) = flat_box([0.0; 3], [1.0; 3]);
        let m = surface_from_flat(&v, &i).unwrap();
        assert_eq!(m.triangle_count(), 12);
        assert!(m.is_closed());

        assert_eq!(
            surface_from_flat(&v[..5], &i).unwrap_err(),
            MeshValidationError::RaggedArray { name: "vertex", len: 5 }
        );
    }

    #[test]
    fn test_sweep_codes() {
        let mut sweep = CollisionSweep::new();
        // An arm reaching 400 mm out along +x at gantry zero collides with a
        // post standing at x = 300 only around gantry zero.
        let (v, i) = flat_box([200.0, 0.0, 0.0], [400.0, 40.0, 40.0]);
        sweep.head.push(Part::new("arm", surface_from_flat(&v, &i).unwrap()));
        let (v, i) = flat_box([300.0, 0.0, 0.0], [20.0, 20.0, 20.0]);
        sweep.couch.push(Part::new("post", surface_from_flat(&v, &i).unwrap()));

        let spec = SweepSpec::new(AngleRange::new(0.0, 180.0, 90.0), AngleRange::single(0.0));
        assert_eq!(sweep.sweep_codes(&spec).unwrap(), vec![CELL_COLLISION, CELL_CLEAR, CELL_CLEAR]);
        assert!(sweep.check(&Configuration::identity()).unwrap());

        let arc = GantryArc::new(90.0, 270.0, RotationDirection::CounterClockwise).with_step(90.0);
        assert_eq!(sweep.arc_codes(&arc, 0.0).unwrap(), vec![CELL_CLEAR, CELL_COLLISION, CELL_CLEAR]);
        assert!(sweep.arc_codes(&arc.with_step(-1.0), 0.0).is_err());
    }
}
