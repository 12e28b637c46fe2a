//! Machines, their parts, and the session that holds the loaded models.

use crate::detector::{CollisionDetector, CollisionResult, Confidence, PairId, PartRef};
use crate::error::{CollisionError, Result};
use crate::kinematics::{AxisMask, Component, Configuration, KinematicFrame};
use crate::surface::SurfaceModel;
use crate::transform::{TransformPipeline, TransformedSurface};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Name given to the patient surface in pair identifiers.
pub const PATIENT_PART: &str = "body";

/// One rigid piece of a machine.
#[derive(Clone, Debug)]
pub struct Part {
    pub name: String,
    pub model: SurfaceModel,
    /// Inactive parts are never placed or tested.
    pub active: bool,
    /// Couch translations the part follows. Ignored for head parts.
    pub axes: AxisMask,
    /// Head part that travels with the snout extension.
    pub retractable: bool,
}

impl Part {
    pub fn new(name: impl Into<String>, model: SurfaceModel) -> Self {
        Self {
            name: name.into(),
            model,
            active: true,
            axes: AxisMask::ALL,
            retractable: false,
        }
    }

    pub fn with_axes(mut self, axes: AxisMask) -> Self {
        self.axes = axes;
        self
    }

    pub fn retractable(mut self) -> Self {
        self.retractable = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A treatment head or a couch.
#[derive(Clone, Debug)]
pub struct Machine {
    pub name: String,
    pub parts: Vec<Part>,
}

impl Machine {
    pub fn new(name: impl Into<String>, parts: Vec<Part>) -> Self {
        Self { name: name.into(), parts }
    }

    pub fn active_parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().filter(|p| p.active)
    }
}

/// Aggregate verdict of every required pair at one configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationVerdict {
    pub configuration: Configuration,
    pub pairs: Vec<CollisionResult>,
    /// Any pair collides.
    pub collision: bool,
    /// Smallest reported pair distance, infinite when nothing was measured.
    pub min_clearance: f64,
    pub near_miss: bool,
    pub confidence: Confidence,
    /// Required pairs with no active part on one side. Nothing stands
    /// behind their share of the verdict.
    pub untested: Vec<(Component, Component)>,
}

impl ConfigurationVerdict {
    pub fn from_results(configuration: Configuration, pairs: Vec<CollisionResult>) -> Self {
        let collision = pairs.iter().any(|r| r.collision);
        let min_clearance = pairs
            .iter()
            .filter(|r| r.valid)
            .map(|r| r.distance)
            .fold(f64::INFINITY, f64::min);
        let near_miss = !collision && pairs.iter().any(|r| r.near_miss);
        let confidence = if pairs.iter().all(|r| r.confidence == Confidence::Full) {
            Confidence::Full
        } else {
            Confidence::Reduced
        };
        Self {
            configuration,
            pairs,
            collision,
            min_clearance,
            near_miss,
            confidence,
            untested: Vec::new(),
        }
    }

    /// Records required pairs that had nothing to test. Any such pair
    /// lowers the confidence of the verdict.
    pub fn with_untested(mut self, untested: Vec<(Component, Component)>) -> Self {
        if !untested.is_empty() {
            self.confidence = Confidence::Reduced;
        }
        self.untested = untested;
        self
    }

    /// Results of the pairs that collide.
    pub fn colliding_pairs(&self) -> impl Iterator<Item = &CollisionResult> {
        self.pairs.iter().filter(|r| r.collision)
    }
}

/// Pair results of one configuration, with the first failure if any.
pub(crate) struct Evaluation {
    pub results: Vec<CollisionResult>,
    pub untested: Vec<(Component, Component)>,
    pub error: Option<CollisionError>,
}

impl Evaluation {
    pub fn into_verdict(self, configuration: Configuration) -> ConfigurationVerdict {
        ConfigurationVerdict::from_results(configuration, self.results).with_untested(self.untested)
    }
}

/// Parts of one component placed at a configuration, each placement on its
/// own so that one failed part leaves the others testable.
type Placed<'s> = Vec<(PartRef, Result<TransformedSurface<'s>>)>;

/// The loaded models of one planning session.
///
/// Models are shared read-only by every configuration evaluated against the
/// session.
#[derive(Clone, Debug)]
pub struct Session {
    head: Machine,
    couch: Machine,
    patient: Option<SurfaceModel>,
    pairs: Vec<(Component, Component)>,
}

impl Session {
    /// Gantry vs couch, gantry vs patient, patient vs couch.
    pub const DEFAULT_PAIRS: [(Component, Component); 3] = [
        (Component::Gantry, Component::Couch),
        (Component::Gantry, Component::Patient),
        (Component::Patient, Component::Couch),
    ];

    pub fn new(head: Machine, couch: Machine, patient: Option<SurfaceModel>) -> Self {
        let mut session = Self {
            head,
            couch,
            patient,
            pairs: Vec::new(),
        };
        session.set_pairs(Self::DEFAULT_PAIRS.to_vec());
        session
    }

    /// Replaces the required pairs. Pairs involving an absent patient, pairs
    /// of a component with itself, and repeated pairs in either order, are
    /// dropped.
    pub fn with_pairs(mut self, pairs: Vec<(Component, Component)>) -> Self {
        self.set_pairs(pairs);
        self
    }

    fn set_pairs(&mut self, pairs: Vec<(Component, Component)>) {
        let has_patient = self.patient.is_some();
        let mut kept: Vec<(Component, Component)> = Vec::with_capacity(pairs.len());
        for (a, b) in pairs {
            if !has_patient && (a == Component::Patient || b == Component::Patient) {
                continue;
            }
            if a == b {
                warn!(component = %a, "dropped pair of a component with itself");
                continue;
            }
            if kept.iter().any(|&(x, y)| (x, y) == (a, b) || (y, x) == (a, b)) {
                continue;
            }
            kept.push((a, b));
        }
        for &(a, b) in &kept {
            for component in [a, b] {
                if self.active_part_count(component) == 0 {
                    warn!(first = %a, second = %b, empty = %component, "required pair has no active parts");
                }
            }
        }
        self.pairs = kept;
    }

    fn active_part_count(&self, component: Component) -> usize {
        match component {
            Component::Gantry => self.head.active_parts().count(),
            Component::Couch => self.couch.active_parts().count(),
            Component::Patient => usize::from(self.patient.is_some()),
        }
    }

    pub fn head(&self) -> &Machine {
        &self.head
    }

    pub fn couch(&self) -> &Machine {
        &self.couch
    }

    pub fn patient(&self) -> Option<&SurfaceModel> {
        self.patient.as_ref()
    }

    pub fn pairs(&self) -> &[(Component, Component)] {
        &self.pairs
    }

    /// Evaluates every required pair at `configuration`. Any failure is
    /// returned as an error.
    pub fn evaluate(
        &self,
        frame: &KinematicFrame,
        detector: &CollisionDetector,
        configuration: &Configuration,
    ) -> Result<ConfigurationVerdict> {
        let mut eval = self.evaluate_pairs(frame, detector, configuration);
        match eval.error.take() {
            Some(err) => Err(err),
            None => Ok(eval.into_verdict(*configuration)),
        }
    }

    /// Tests every pair, keeping going after a failed pair or placement so
    /// the other results stay available. Failed pairs appear as invalid
    /// results.
    pub(crate) fn evaluate_pairs(
        &self,
        frame: &KinematicFrame,
        detector: &CollisionDetector,
        c: &Configuration,
    ) -> Evaluation {
        let mut placed: Vec<(Component, Placed<'_>)> = Vec::with_capacity(3);
        for &(a, b) in &self.pairs {
            for component in [a, b] {
                if !placed.iter().any(|(k, _)| *k == component) {
                    placed.push((component, self.place(component, frame, c)));
                }
            }
        }
        let parts_of = |component: Component| {
            placed
                .iter()
                .find(|(k, _)| *k == component)
                .map(|(_, parts)| parts.as_slice())
                .unwrap_or(&[])
        };

        let mut results = Vec::new();
        let mut untested = Vec::new();
        let mut error = None;
        for &(a, b) in &self.pairs {
            let (first, second) = (parts_of(a), parts_of(b));
            if first.is_empty() || second.is_empty() {
                debug!(first = %a, second = %b, "pair left untested");
                untested.push((a, b));
                continue;
            }
            for (ra, sa) in first {
                for (rb, sb) in second {
                    let pair = PairId::new(ra.clone(), rb.clone());
                    let outcome = match (sa, sb) {
                        (Ok(sa), Ok(sb)) => detector.test_pair(pair.clone(), *c, sa, sb).map_err(CollisionError::from),
                        (Err(e), _) | (_, Err(e)) => Err(e.clone()),
                    };
                    match outcome {
                        Ok(result) => results.push(result),
                        Err(e) => {
                            debug!(pair = %pair, error = %e, "pair test failed");
                            results.push(CollisionResult::failed(Some(pair), Some(*c)));
                            error.get_or_insert(e);
                        }
                    }
                }
            }
        }
        Evaluation { results, untested, error }
    }

    fn place<'s>(&'s self, component: Component, frame: &KinematicFrame, c: &Configuration) -> Placed<'s> {
        let part_ref = |name: &str| PartRef::new(component, name);
        match component {
            Component::Gantry => self
                .head
                .active_parts()
                .map(|p| {
                    let iso = if p.retractable { frame.retractable_head(c) } else { frame.gantry(c) };
                    (part_ref(&p.name), TransformPipeline::place(&p.model, &iso).map_err(CollisionError::from))
                })
                .collect(),
            Component::Couch => self
                .couch
                .active_parts()
                .map(|p| {
                    let iso = frame.couch_masked(c, p.axes);
                    (part_ref(&p.name), TransformPipeline::place(&p.model, &iso).map_err(CollisionError::from))
                })
                .collect(),
            Component::Patient => match &self.patient {
                Some(model) => {
                    let surface = frame
                        .patient(c)
                        .map_err(CollisionError::from)
                        .and_then(|iso| TransformPipeline::place(model, &iso).map_err(CollisionError::from));
                    vec![(part_ref(PATIENT_PART), surface)]
                }
                None => Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::kinematics::PatientOrientation;

    // Nozzle and snout above the isocenter, patient 10 mm above the couch
    // top, pedestal below.
    fn session(patient: bool) -> Session {
        let head = Machine::new(
            "head",
            vec![
                Part::new("nozzle", SurfaceModel::from_box([0.0, 0.0, 400.0], [200.0, 200.0, 200.0]).unwrap()),
                Part::new("snout", SurfaceModel::from_box([0.0, 0.0, 250.0], [100.0, 100.0, 100.0]).unwrap()).retractable(),
            ],
        );
        let couch = Machine::new(
            "couch",
            vec![
                Part::new("top", SurfaceModel::from_box([0.0, 0.0, -150.0], [500.0, 2000.0, 50.0]).unwrap()),
                Part::new("pedestal", SurfaceModel::from_box([0.0, -600.0, -700.0], [300.0, 300.0, 900.0]).unwrap())
                    .with_axes(AxisMask { longitudinal: false, ..AxisMask::ALL }),
            ],
        );
        let body = patient.then(|| SurfaceModel::from_box([0.0, 0.0, -40.0], [300.0, 1600.0, 150.0]).unwrap());
        Session::new(head, couch, body)
    }

    #[test]
    fn test_default_pairs_depend_on_patient() {
        assert_eq!(session(true).pairs().len(), 3);
        assert_eq!(session(false).pairs(), &[(Component::Gantry, Component::Couch)]);

        let custom = session(true).with_pairs(vec![
            (Component::Gantry, Component::Couch),
            (Component::Couch, Component::Gantry),
        ]);
        assert_eq!(custom.pairs().len(), 1);
    }

    #[test]
    fn test_clear_configuration() {
        let s = session(true);
        let verdict = s
            .evaluate(&KinematicFrame::default(), &CollisionDetector::default(), &Configuration::identity())
            .unwrap();
        assert!(!verdict.collision);
        // 2 head parts x 2 couch parts, 2 head parts x body, body x 2 couch parts.
        assert_eq!(verdict.pairs.len(), 8);
        assert!(verdict.min_clearance > 0.0 && verdict.min_clearance.is_finite());
        assert_eq!(verdict.confidence, Confidence::Full);
    }

    #[test]
    fn test_snout_extension_reaches_patient() {
        let s = session(true);
        let c = Configuration { snout_extension: 200.0, ..Default::default() };
        let verdict = s.evaluate(&KinematicFrame::default(), &CollisionDetector::default(), &c).unwrap();
        assert!(verdict.collision);
        let hit: Vec<_> = verdict.colliding_pairs().filter_map(|r| r.pair.as_ref()).collect();
        assert!(hit.iter().all(|p| p.first.name == "snout" && p.second.name == PATIENT_PART));
    }

    #[test]
    fn test_inactive_part_is_ignored() {
        let mut s = session(false);
        s.head.parts[0] = s.head.parts[0].clone().inactive();
        let verdict = s
            .evaluate(&KinematicFrame::default(), &CollisionDetector::default(), &Configuration::identity())
            .unwrap();
        assert_eq!(verdict.pairs.len(), 2);
    }

    #[test]
    fn test_same_component_pairs_are_dropped() {
        let s = session(true).with_pairs(vec![
            (Component::Gantry, Component::Gantry),
            (Component::Patient, Component::Couch),
            (Component::Couch, Component::Couch),
        ]);
        assert_eq!(s.pairs(), &[(Component::Patient, Component::Couch)]);
    }

    #[test]
    fn test_pair_without_active_parts_is_flagged() {
        let mut s = session(false);
        for part in &mut s.head.parts {
            part.active = false;
        }
        let verdict = s
            .evaluate(&KinematicFrame::default(), &CollisionDetector::default(), &Configuration::identity())
            .unwrap();
        assert!(verdict.pairs.is_empty());
        assert!(!verdict.collision);
        assert_eq!(verdict.untested, vec![(Component::Gantry, Component::Couch)]);
        assert_eq!(verdict.confidence, Confidence::Reduced);
    }

    #[test]
    fn test_failed_part_keeps_other_results() {
        let s = session(false);
        // Only the retractable snout depends on the extension.
        let c = Configuration { snout_extension: f64::NAN, ..Default::default() };
        let frame = KinematicFrame::default();
        let detector = CollisionDetector::default();

        let eval = s.evaluate_pairs(&frame, &detector, &c);
        assert_eq!(eval.error.as_ref().map(|e| e.kind()), Some(ErrorKind::GeometryComputation));
        assert_eq!(eval.results.len(), 4);
        let (valid, failed): (Vec<_>, Vec<_>) = eval.results.iter().partition(|r| r.valid);
        assert_eq!(valid.len(), 2);
        assert!(valid.iter().all(|r| r.pair.as_ref().is_some_and(|p| p.first.name == "nozzle")));
        assert!(failed.iter().all(|r| r.pair.as_ref().is_some_and(|p| p.first.name == "snout")));
        assert!(failed.iter().all(|r| r.distance.is_nan() && !r.collision));

        let err = s.evaluate(&frame, &detector, &c).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GeometryComputation);
    }

    #[test]
    fn test_unsupported_orientation_fails_configuration() {
        let s = session(true);
        let c = Configuration {
            orientation: Some(PatientOrientation::FeetFirstDecubitusLeft),
            ..Default::default()
        };
        let err = s.evaluate(&KinematicFrame::default(), &CollisionDetector::default(), &c).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOrientation);

        // Without a patient the orientation is never consulted.
        assert!(session(false)
            .evaluate(&KinematicFrame::default(), &CollisionDetector::default(), &c)
            .is_ok());
    }
}
