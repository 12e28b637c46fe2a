//! Treatment-room kinematics.
//!
//! Room frame (IEC 61217 fixed system, millimetres): `x` lateral, `y`
//! longitudinal towards the gantry, `z` vertical up, isocenter at the origin.
//! Every moving component is positioned by a rigid transform composed in a
//! fixed order: component-local translation, then rotation about its axis
//! through the isocenter, then placement in the room. The order matters:
//! translating after rotating would move the effective pivot.

use crate::error::{CollisionError, GeometryComputationError, UnsupportedOrientationError};
use nalgebra::{Isometry3, Translation3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One placement of the machine to evaluate. Angles in degrees, offsets in
/// millimetres.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub gantry_angle: f64,
    pub couch_angle: f64,
    pub couch_lateral: f64,
    pub couch_longitudinal: f64,
    pub couch_vertical: f64,
    /// Travel of retractable head parts (snout) towards the isocenter.
    pub snout_extension: f64,
    /// Patient orientation; `None` places the patient model as supplied.
    pub orientation: Option<PatientOrientation>,
}

impl Configuration {
    /// Zero angles, zero offsets.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn with_angles(gantry_angle: f64, couch_angle: f64) -> Self {
        Self { gantry_angle, couch_angle, ..Self::default() }
    }

    pub fn couch_offset(&self) -> [f64; 3] {
        [self.couch_lateral, self.couch_longitudinal, self.couch_vertical]
    }

    fn is_finite(&self) -> bool {
        [
            self.gantry_angle,
            self.couch_angle,
            self.couch_lateral,
            self.couch_longitudinal,
            self.couch_vertical,
            self.snout_extension,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// DICOM patient position.
///
/// Decubitus positions are valid DICOM codes but the kinematic model does not
/// place them; they are rejected per configuration instead of guessed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatientOrientation {
    HeadFirstSupine,
    FeetFirstSupine,
    HeadFirstProne,
    FeetFirstProne,
    HeadFirstDecubitusLeft,
    HeadFirstDecubitusRight,
    FeetFirstDecubitusLeft,
    FeetFirstDecubitusRight,
}

/// Angle offsets and rotation senses that map a model exported in the DICOM
/// patient frame onto the room's zero references.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrientationOffsets {
    pub gantry_offset_deg: f64,
    pub couch_offset_deg: f64,
    pub gantry_direction: f64,
    pub couch_direction: f64,
}

impl PatientOrientation {
    pub fn code(&self) -> &'static str {
        match self {
            Self::HeadFirstSupine => "HFS",
            Self::FeetFirstSupine => "FFS",
            Self::HeadFirstProne => "HFP",
            Self::FeetFirstProne => "FFP",
            Self::HeadFirstDecubitusLeft => "HFDL",
            Self::HeadFirstDecubitusRight => "HFDR",
            Self::FeetFirstDecubitusLeft => "FFDL",
            Self::FeetFirstDecubitusRight => "FFDR",
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            Self::HeadFirstSupine | Self::FeetFirstSupine | Self::HeadFirstProne | Self::FeetFirstProne
        )
    }

    pub fn offsets(&self) -> Result<OrientationOffsets, UnsupportedOrientationError> {
        let (g0, c0, gs, cs) = match self {
            Self::HeadFirstSupine => (180.0, 180.0, -1.0, -1.0),
            Self::FeetFirstSupine => (180.0, 0.0, -1.0, -1.0),
            Self::HeadFirstProne => (0.0, 180.0, -1.0, 1.0),
            Self::FeetFirstProne => (0.0, 0.0, -1.0, 1.0),
            _ => return Err(UnsupportedOrientationError::new(self.code())),
        };
        Ok(OrientationOffsets {
            gantry_offset_deg: g0,
            couch_offset_deg: c0,
            gantry_direction: gs,
            couch_direction: cs,
        })
    }

    /// Rotation taking a head-first-supine patient model into this
    /// orientation, in the couch's local frame.
    pub fn local_flip(&self) -> Result<UnitQuaternion<f64>, UnsupportedOrientationError> {
        let half_turn = std::f64::consts::PI;
        let feet_first = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), half_turn);
        let prone = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), half_turn);
        match self {
            Self::HeadFirstSupine => Ok(UnitQuaternion::identity()),
            Self::FeetFirstSupine => Ok(feet_first),
            Self::HeadFirstProne => Ok(prone),
            Self::FeetFirstProne => Ok(feet_first * prone),
            _ => Err(UnsupportedOrientationError::new(self.code())),
        }
    }
}

impl FromStr for PatientOrientation {
    type Err = UnsupportedOrientationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HFS" => Ok(Self::HeadFirstSupine),
            "FFS" => Ok(Self::FeetFirstSupine),
            "HFP" => Ok(Self::HeadFirstProne),
            "FFP" => Ok(Self::FeetFirstProne),
            "HFDL" => Ok(Self::HeadFirstDecubitusLeft),
            "HFDR" => Ok(Self::HeadFirstDecubitusRight),
            "FFDL" => Ok(Self::FeetFirstDecubitusLeft),
            "FFDR" => Ok(Self::FeetFirstDecubitusRight),
            _ => Err(UnsupportedOrientationError::new(s.trim())),
        }
    }
}

impl fmt::Display for PatientOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Zero references and rotation senses of the treatment room.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConventions {
    /// Gantry rotation axis (horizontal, through the isocenter).
    pub gantry_axis: [f64; 3],
    /// Couch rotation axis (vertical, through the isocenter).
    pub couch_axis: [f64; 3],
    /// Direction from the isocenter to the source at gantry angle zero.
    pub beam_source_direction: [f64; 3],
    /// Added to every gantry angle before rotating.
    pub gantry_zero_offset_deg: f64,
    /// Added to every couch angle before rotating.
    pub couch_zero_offset_deg: f64,
    /// Rotation sense of the gantry, `1.0` or `-1.0`.
    pub gantry_direction: f64,
    /// Rotation sense of the couch, `1.0` or `-1.0`.
    pub couch_direction: f64,
    /// Rotation about the lateral axis applied to every model before any
    /// kinematics, to bring exported models into the room frame.
    pub model_alignment_deg: f64,
}

impl Default for RoomConventions {
    fn default() -> Self {
        Self {
            gantry_axis: [0.0, 1.0, 0.0],
            couch_axis: [0.0, 0.0, 1.0],
            beam_source_direction: [0.0, 0.0, 1.0],
            gantry_zero_offset_deg: 0.0,
            couch_zero_offset_deg: 0.0,
            gantry_direction: 1.0,
            couch_direction: 1.0,
            model_alignment_deg: 0.0,
        }
    }
}

impl RoomConventions {
    /// Conventions for models exported in the DICOM patient frame of a
    /// planning CT acquired in `orientation`.
    pub fn dicom_patient_frame(orientation: PatientOrientation) -> Result<Self, UnsupportedOrientationError> {
        let o = orientation.offsets()?;
        Ok(Self {
            gantry_zero_offset_deg: o.gantry_offset_deg,
            couch_zero_offset_deg: o.couch_offset_deg,
            gantry_direction: o.gantry_direction,
            couch_direction: o.couch_direction,
            model_alignment_deg: 90.0,
            ..Self::default()
        })
    }
}

/// The moving components of the room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Component {
    Gantry,
    Couch,
    Patient,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gantry => "gantry",
            Self::Couch => "couch",
            Self::Patient => "patient",
        })
    }
}

/// Which couch translations a couch part follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMask {
    pub lateral: bool,
    pub longitudinal: bool,
    pub vertical: bool,
}

impl AxisMask {
    pub const ALL: AxisMask = AxisMask { lateral: true, longitudinal: true, vertical: true };
    pub const NONE: AxisMask = AxisMask { lateral: false, longitudinal: false, vertical: false };

    fn apply(&self, offset: [f64; 3]) -> [f64; 3] {
        [
            if self.lateral { offset[0] } else { 0.0 },
            if self.longitudinal { offset[1] } else { 0.0 },
            if self.vertical { offset[2] } else { 0.0 },
        ]
    }
}

impl Default for AxisMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Rigid transforms of the three components for one configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ComponentTransforms {
    pub gantry: Isometry3<f64>,
    pub couch: Isometry3<f64>,
    pub patient: Isometry3<f64>,
}

/// Maps configurations to rigid transforms under a set of room conventions.
#[derive(Clone, Copy, Debug, Default)]
pub struct KinematicFrame {
    conventions: RoomConventions,
}

impl KinematicFrame {
    pub fn new(conventions: RoomConventions) -> Self {
        Self { conventions }
    }

    pub fn conventions(&self) -> &RoomConventions {
        &self.conventions
    }

    fn alignment(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), self.conventions.model_alignment_deg.to_radians())
    }

    fn gantry_rotation(&self, c: &Configuration) -> UnitQuaternion<f64> {
        let rc = &self.conventions;
        let angle = rc.gantry_direction * (c.gantry_angle + rc.gantry_zero_offset_deg);
        rotation(rc.gantry_axis, angle)
    }

    fn couch_rotation(&self, c: &Configuration) -> UnitQuaternion<f64> {
        let rc = &self.conventions;
        let angle = rc.couch_direction * (c.couch_angle + rc.couch_zero_offset_deg);
        rotation(rc.couch_axis, angle)
    }

    /// Fixed gantry parts: rotation about the gantry axis.
    pub fn gantry(&self, c: &Configuration) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::identity(), self.gantry_rotation(c) * self.alignment())
    }

    /// Retractable head parts: snout travel towards the isocenter along the
    /// beam axis, then the gantry rotation.
    pub fn retractable_head(&self, c: &Configuration) -> Isometry3<f64> {
        let d = Vector3::from(self.conventions.beam_source_direction);
        let norm = d.norm();
        let travel = if norm > 0.0 { -d * (c.snout_extension / norm) } else { d * f64::NAN };
        let local = Isometry3::from_parts(Translation3::from(travel), self.alignment());
        Isometry3::from_parts(Translation3::identity(), self.gantry_rotation(c)) * local
    }

    pub fn couch(&self, c: &Configuration) -> Isometry3<f64> {
        self.couch_masked(c, AxisMask::ALL)
    }

    /// Couch part that follows only the translations enabled in `mask`.
    pub fn couch_masked(&self, c: &Configuration, mask: AxisMask) -> Isometry3<f64> {
        let offset = mask.apply(c.couch_offset());
        let local = Isometry3::from_parts(Translation3::new(offset[0], offset[1], offset[2]), self.alignment());
        Isometry3::from_parts(Translation3::identity(), self.couch_rotation(c)) * local
    }

    /// Patient surface: orientation flip in the couch's local frame, then the
    /// full couch transform.
    pub fn patient(&self, c: &Configuration) -> Result<Isometry3<f64>, UnsupportedOrientationError> {
        let flip = match c.orientation {
            Some(o) => o.local_flip()?,
            None => UnitQuaternion::identity(),
        };
        let offset = c.couch_offset();
        let local = Isometry3::from_parts(
            Translation3::new(offset[0], offset[1], offset[2]),
            flip * self.alignment(),
        );
        Ok(Isometry3::from_parts(Translation3::identity(), self.couch_rotation(c)) * local)
    }

    pub fn component(&self, component: Component, c: &Configuration) -> Result<Isometry3<f64>, CollisionError> {
        Ok(match component {
            Component::Gantry => self.gantry(c),
            Component::Couch => self.couch(c),
            Component::Patient => self.patient(c)?,
        })
    }

    /// All three transforms, rejecting non-finite results.
    pub fn transforms(&self, c: &Configuration) -> Result<ComponentTransforms, CollisionError> {
        if !c.is_finite() {
            return Err(GeometryComputationError::NonFiniteTransform.into());
        }
        let out = ComponentTransforms {
            gantry: self.gantry(c),
            couch: self.couch(c),
            patient: self.patient(c)?,
        };
        if [&out.gantry, &out.couch, &out.patient].iter().all(|t| is_finite(t)) {
            Ok(out)
        } else {
            Err(GeometryComputationError::NonFiniteTransform.into())
        }
    }
}

fn rotation(axis: [f64; 3], angle_deg: f64) -> UnitQuaternion<f64> {
    let axis = Unit::new_normalize(Vector3::from(axis));
    UnitQuaternion::from_axis_angle(&axis, angle_deg.to_radians())
}

pub(crate) fn is_finite(t: &Isometry3<f64>) -> bool {
    t.translation.vector.iter().all(|v| v.is_finite()) && t.rotation.coords.iter().all(|v| v.is_finite())
}
