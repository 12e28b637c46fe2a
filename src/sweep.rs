//! Gantry/couch angle sweeps and the resulting collision map.

use crate::detector::{CollisionDetector, CollisionResult, Confidence};
use crate::error::{CollisionError, ErrorKind, SweepSpecError};
use crate::kinematics::{Configuration, KinematicFrame, PatientOrientation};
use crate::machine::{ConfigurationVerdict, Session};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Inclusive angle range in degrees. `stop` is included when it lands on the
/// grid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AngleRange {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl AngleRange {
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }

    /// A range holding only `angle`.
    pub fn single(angle: f64) -> Self {
        Self { start: angle, stop: angle, step: 1.0 }
    }

    pub fn validate(&self, axis: &'static str) -> Result<(), SweepSpecError> {
        if !(self.start.is_finite() && self.stop.is_finite() && self.step.is_finite()) {
            return Err(SweepSpecError::NonFinite { axis });
        }
        if self.step <= 0.0 {
            return Err(SweepSpecError::NonPositiveStep { axis, step: self.step });
        }
        if self.stop < self.start {
            return Err(SweepSpecError::Reversed { axis, start: self.start, stop: self.stop });
        }
        if self.steps() >= MAX_ANGLES as f64 {
            return Err(SweepSpecError::TooManyAngles { axis, limit: MAX_ANGLES });
        }
        Ok(())
    }

    // Whole steps from start to stop, in floating point so huge counts
    // cannot wrap. Slack so that a stop reached by accumulated steps is not
    // lost.
    fn steps(&self) -> f64 {
        ((self.stop - self.start) / self.step + 1e-9).floor()
    }

    /// Number of grid angles. Zero for an invalid range.
    pub fn len(&self) -> usize {
        if self.validate("range").is_err() {
            return 0;
        }
        self.steps() as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ascending grid angles.
    pub fn values(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.start + i as f64 * self.step).collect()
    }
}

/// Most angles a single range may sample.
pub const MAX_ANGLES: usize = 1 << 20;

/// Default cap on the number of grid cells of one sweep.
pub const DEFAULT_MAX_CELLS: usize = 1_000_000;

/// The grid to sweep and the configuration values held fixed across it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSpec {
    pub gantry: AngleRange,
    pub couch: AngleRange,
    /// Couch lateral, longitudinal and vertical offsets (mm).
    pub couch_offset: [f64; 3],
    pub snout_extension: f64,
    pub orientation: Option<PatientOrientation>,
    /// Grids with more cells are rejected before evaluation.
    pub max_cells: usize,
}

impl SweepSpec {
    pub fn new(gantry: AngleRange, couch: AngleRange) -> Self {
        Self {
            gantry,
            couch,
            couch_offset: [0.0; 3],
            snout_extension: 0.0,
            orientation: None,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }

    /// Full turn of both axes, from 0 up to but excluding 360 degrees.
    pub fn full_rotation(step: f64) -> Self {
        let range = AngleRange::new(0.0, 360.0 - step, step);
        Self::new(range, range)
    }

    pub fn validate(&self) -> Result<(), SweepSpecError> {
        self.gantry.validate("gantry")?;
        self.couch.validate("couch")?;
        let (gantry, couch) = (self.gantry.len(), self.couch.len());
        match gantry.checked_mul(couch) {
            Some(cells) if cells <= self.max_cells => Ok(()),
            _ => Err(SweepSpecError::TooManyCells { gantry, couch, limit: self.max_cells }),
        }
    }

    /// Number of grid cells. Zero for an invalid grid.
    pub fn len(&self) -> usize {
        if self.validate().is_err() {
            return 0;
        }
        self.gantry.len() * self.couch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn configuration(&self, gantry_angle: f64, couch_angle: f64) -> Configuration {
        Configuration {
            gantry_angle,
            couch_angle,
            couch_lateral: self.couch_offset[0],
            couch_longitudinal: self.couch_offset[1],
            couch_vertical: self.couch_offset[2],
            snout_extension: self.snout_extension,
            orientation: self.orientation,
        }
    }
}

impl Default for SweepSpec {
    fn default() -> Self {
        Self::full_rotation(10.0)
    }
}

/// Rotation sense of a gantry arc.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationDirection {
    /// Increasing gantry angle.
    Clockwise,
    /// Decreasing gantry angle.
    CounterClockwise,
}

impl RotationDirection {
    fn sign(self) -> f64 {
        match self {
            Self::Clockwise => 1.0,
            Self::CounterClockwise => -1.0,
        }
    }
}

/// A gantry arc from `start` to `stop`, travelled in `direction` and
/// wrapping through 0. Equal ends describe a static beam.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GantryArc {
    pub start: f64,
    pub stop: f64,
    pub direction: RotationDirection,
    /// Sampling interval in degrees.
    pub step: f64,
}

impl GantryArc {
    /// Arc sampled every degree.
    pub fn new(start: f64, stop: f64, direction: RotationDirection) -> Self {
        Self { start, stop, direction, step: 1.0 }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    pub fn validate(&self) -> Result<(), SweepSpecError> {
        let axis = "arc";
        if !(self.start.is_finite() && self.stop.is_finite() && self.step.is_finite()) {
            return Err(SweepSpecError::NonFinite { axis });
        }
        if self.step <= 0.0 {
            return Err(SweepSpecError::NonPositiveStep { axis, step: self.step });
        }
        if self.span() / self.step >= MAX_ANGLES as f64 {
            return Err(SweepSpecError::TooManyAngles { axis, limit: MAX_ANGLES });
        }
        Ok(())
    }

    /// Degrees travelled, in `[0, 360)`.
    pub fn span(&self) -> f64 {
        let d = match self.direction {
            RotationDirection::Clockwise => self.stop - self.start,
            RotationDirection::CounterClockwise => self.start - self.stop,
        };
        d.rem_euclid(360.0)
    }

    /// Sampled gantry angles in travel order, normalized to `[0, 360)`.
    /// Both ends are included; empty for an invalid arc.
    pub fn values(&self) -> Vec<f64> {
        if self.validate().is_err() {
            return Vec::new();
        }
        let span = self.span();
        let n = (span / self.step + 1e-9).floor() as usize;
        let sign = self.direction.sign();
        let mut out: Vec<f64> = (0..=n).map(|i| wrap_degrees(self.start + sign * i as f64 * self.step)).collect();
        if span - n as f64 * self.step > 1e-9 {
            out.push(wrap_degrees(self.stop));
        }
        out
    }

    /// One configuration per sampled angle, everything else taken from
    /// `base`.
    pub fn configurations(&self, base: &Configuration) -> Vec<Configuration> {
        self.values()
            .into_iter()
            .map(|gantry_angle| Configuration { gantry_angle, ..*base })
            .collect()
    }
}

fn wrap_degrees(a: f64) -> f64 {
    let w = a.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to 360.
    if w >= 360.0 { 0.0 } else { w }
}

/// Cooperative cancellation flag shared between a caller and a running
/// sweep. Checked once per grid cell.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Verdict of one grid cell.
#[derive(Clone, Debug, PartialEq)]
pub enum CellVerdict {
    Evaluated(ConfigurationVerdict),
    /// A pair test failed. `partial` holds the pairs tested at this
    /// configuration, the failed ones marked invalid.
    Unevaluated {
        configuration: Configuration,
        error: CollisionError,
        partial: Vec<CollisionResult>,
    },
    /// The sweep was cancelled before this cell ran.
    Cancelled { configuration: Configuration },
}

impl CellVerdict {
    pub fn configuration(&self) -> &Configuration {
        match self {
            Self::Evaluated(v) => &v.configuration,
            Self::Unevaluated { configuration, .. } | Self::Cancelled { configuration } => configuration,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        matches!(self, Self::Evaluated(_))
    }

    /// `Some(true)` if any pair collides, `None` without a verdict.
    pub fn collision(&self) -> Option<bool> {
        match self {
            Self::Evaluated(v) => Some(v.collision),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Unevaluated { error, .. } => Some(error.kind()),
            _ => None,
        }
    }

    pub fn verdict(&self) -> Option<&ConfigurationVerdict> {
        match self {
            Self::Evaluated(v) => Some(v),
            _ => None,
        }
    }
}

/// Counts over a collision map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub total: usize,
    pub clear: usize,
    pub colliding: usize,
    pub unevaluated: usize,
    pub cancelled: usize,
    /// Clear cells with a pair inside the clearance threshold.
    pub near_miss: usize,
    /// Evaluated cells involving a surface with warnings.
    pub reduced_confidence: usize,
}

impl SweepSummary {
    fn percent(&self, n: usize) -> f64 {
        if self.total == 0 { 0.0 } else { 100.0 * n as f64 / self.total as f64 }
    }

    pub fn clear_percent(&self) -> f64 {
        self.percent(self.clear)
    }

    pub fn colliding_percent(&self) -> f64 {
        self.percent(self.colliding)
    }

    pub fn unevaluated_percent(&self) -> f64 {
        self.percent(self.unevaluated)
    }
}

/// Cell verdicts of one run.
///
/// A grid sweep lays its cells out gantry-major in ascending angle order. A
/// run over a configuration list keeps the input order and has no grid axes.
#[derive(Clone, Debug, PartialEq)]
pub struct CollisionMap {
    gantry_angles: Vec<f64>,
    couch_angles: Vec<f64>,
    cells: Vec<CellVerdict>,
}

impl CollisionMap {
    /// True for grid sweeps, false for configuration lists.
    pub fn is_grid(&self) -> bool {
        !self.gantry_angles.is_empty()
    }

    /// Cell by enumeration index.
    pub fn cell(&self, index: usize) -> Option<&CellVerdict> {
        self.cells.get(index)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn gantry_angles(&self) -> &[f64] {
        &self.gantry_angles
    }

    pub fn couch_angles(&self) -> &[f64] {
        &self.couch_angles
    }

    pub fn get(&self, gantry_index: usize, couch_index: usize) -> Option<&CellVerdict> {
        if gantry_index >= self.gantry_angles.len() || couch_index >= self.couch_angles.len() {
            return None;
        }
        self.cells.get(gantry_index * self.couch_angles.len() + couch_index)
    }

    /// First cell whose angles match within 1e-6 degrees.
    pub fn cell_at_angles(&self, gantry_angle: f64, couch_angle: f64) -> Option<&CellVerdict> {
        let near = |x: f64, a: f64| (x - a).abs() < 1e-6;
        if !self.is_grid() {
            return self.cells.iter().find(|c| {
                let cfg = c.configuration();
                near(cfg.gantry_angle, gantry_angle) && near(cfg.couch_angle, couch_angle)
            });
        }
        let gi = self.gantry_angles.iter().position(|&x| near(x, gantry_angle))?;
        let ci = self.couch_angles.iter().position(|&x| near(x, couch_angle))?;
        self.get(gi, ci)
    }

    /// Cells in enumeration order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &CellVerdict> {
        self.cells.iter()
    }

    pub fn summary(&self) -> SweepSummary {
        let mut s = SweepSummary { total: self.cells.len(), ..Default::default() };
        for cell in &self.cells {
            match cell {
                CellVerdict::Evaluated(v) => {
                    if v.collision {
                        s.colliding += 1;
                    } else {
                        s.clear += 1;
                        if v.near_miss {
                            s.near_miss += 1;
                        }
                    }
                    if v.confidence == Confidence::Reduced {
                        s.reduced_confidence += 1;
                    }
                }
                CellVerdict::Unevaluated { .. } => s.unevaluated += 1,
                CellVerdict::Cancelled { .. } => s.cancelled += 1,
            }
        }
        s
    }

    fn angles_where(&self, keep: impl Fn(&CellVerdict) -> bool) -> Vec<(f64, f64)> {
        self.cells
            .iter()
            .filter(|c| keep(*c))
            .map(|c| {
                let cfg = c.configuration();
                (cfg.gantry_angle, cfg.couch_angle)
            })
            .collect()
    }

    /// (gantry, couch) angles of collision-free cells.
    pub fn clear_cells(&self) -> Vec<(f64, f64)> {
        self.angles_where(|c| c.collision() == Some(false))
    }

    pub fn colliding_cells(&self) -> Vec<(f64, f64)> {
        self.angles_where(|c| c.collision() == Some(true))
    }

    pub fn unevaluated_cells(&self) -> Vec<(f64, f64)> {
        self.angles_where(|c| matches!(c, CellVerdict::Unevaluated { .. }))
    }
}

/// Evaluates a session over an angle grid.
#[derive(Debug)]
pub struct SweepEvaluator {
    frame: KinematicFrame,
    detector: CollisionDetector,
}

impl SweepEvaluator {
    pub fn new(frame: KinematicFrame, detector: CollisionDetector) -> Self {
        Self { frame, detector }
    }

    pub fn frame(&self) -> &KinematicFrame {
        &self.frame
    }

    pub fn detector(&self) -> &CollisionDetector {
        &self.detector
    }

    /// Grid configurations, gantry outer loop, couch inner loop, ascending.
    pub fn configurations(&self, spec: &SweepSpec) -> Result<Vec<Configuration>, SweepSpecError> {
        spec.validate()?;
        let couch = spec.couch.values();
        Ok(spec
            .gantry
            .values()
            .into_iter()
            .flat_map(|g| couch.iter().map(move |&c| spec.configuration(g, c)))
            .collect())
    }

    pub fn run(&self, session: &Session, spec: &SweepSpec) -> Result<CollisionMap, SweepSpecError> {
        self.run_with_cancel(session, spec, &CancelToken::new())
    }

    /// Runs the sweep in parallel. Cells reached after `cancel` fires are
    /// marked [`CellVerdict::Cancelled`]; the map is always complete.
    pub fn run_with_cancel(
        &self,
        session: &Session,
        spec: &SweepSpec,
        cancel: &CancelToken,
    ) -> Result<CollisionMap, SweepSpecError> {
        let configurations = self.configurations(spec)?;
        let gantry_angles = spec.gantry.values();
        let couch_angles = spec.couch.values();
        info!(
            gantry = gantry_angles.len(),
            couch = couch_angles.len(),
            pairs = session.pairs().len(),
            "sweep started"
        );

        let map = CollisionMap {
            gantry_angles,
            couch_angles,
            cells: self.evaluate_all(session, configurations, cancel),
        };
        log_summary(&map);
        Ok(map)
    }

    /// Evaluates an arbitrary list of configurations, such as the beams of
    /// a plan or the samples of a [`GantryArc`]. Cells keep the input order;
    /// failures and cancellation are reported per cell as in a grid sweep.
    pub fn run_configurations(
        &self,
        session: &Session,
        configurations: &[Configuration],
        cancel: &CancelToken,
    ) -> CollisionMap {
        info!(
            configurations = configurations.len(),
            pairs = session.pairs().len(),
            "configuration run started"
        );
        let map = CollisionMap {
            gantry_angles: Vec::new(),
            couch_angles: Vec::new(),
            cells: self.evaluate_all(session, configurations.to_vec(), cancel),
        };
        log_summary(&map);
        map
    }

    fn evaluate_all(
        &self,
        session: &Session,
        configurations: Vec<Configuration>,
        cancel: &CancelToken,
    ) -> Vec<CellVerdict> {
        configurations
            .into_par_iter()
            .map(|configuration| {
                if cancel.is_cancelled() {
                    return CellVerdict::Cancelled { configuration };
                }
                self.evaluate_cell(session, configuration)
            })
            .collect()
    }

    fn evaluate_cell(&self, session: &Session, configuration: Configuration) -> CellVerdict {
        let mut eval = session.evaluate_pairs(&self.frame, &self.detector, &configuration);
        match eval.error.take() {
            None => {
                let verdict = eval.into_verdict(configuration);
                debug!(
                    gantry = configuration.gantry_angle,
                    couch = configuration.couch_angle,
                    collision = verdict.collision,
                    "cell evaluated"
                );
                CellVerdict::Evaluated(verdict)
            }
            Some(error) => {
                warn!(
                    gantry = configuration.gantry_angle,
                    couch = configuration.couch_angle,
                    error = %error,
                    "cell left unevaluated"
                );
                CellVerdict::Unevaluated {
                    configuration,
                    error,
                    partial: eval.results,
                }
            }
        }
    }
}

fn log_summary(map: &CollisionMap) {
    let s = map.summary();
    info!(
        total = s.total,
        clear = s.clear,
        colliding = s.colliding,
        unevaluated = s.unevaluated,
        cancelled = s.cancelled,
        "sweep finished"
    );
}
