use radcollide::{
    AngleRange, CancelToken, CellVerdict, CollisionDetector, Component, Configuration, ErrorKind, GantryArc,
    KinematicFrame, Machine, Part, PatientOrientation, RotationDirection, Session, SurfaceModel, SweepEvaluator,
    SweepSpec, SweepSpecError,
};

// Nozzle spanning z 100..300 above the isocenter and a couch top at
// z -175..-125: they only meet with the gantry at 180 degrees.
fn room(with_patient: bool) -> Session {
    let head = Machine::new(
        "head",
        vec![Part::new("nozzle", SurfaceModel::from_box([0.0, 0.0, 200.0], [200.0, 200.0, 200.0]).unwrap())],
    );
    let couch = Machine::new(
        "couch",
        vec![Part::new("top", SurfaceModel::from_box([0.0, 0.0, -150.0], [500.0, 2000.0, 50.0]).unwrap())],
    );
    let patient = with_patient.then(|| SurfaceModel::from_box([0.0, 0.0, -75.0], [300.0, 1600.0, 80.0]).unwrap());
    Session::new(head, couch, patient)
}

fn evaluator() -> SweepEvaluator {
    SweepEvaluator::new(KinematicFrame::default(), CollisionDetector::default())
}

fn small_grid() -> SweepSpec {
    SweepSpec::new(AngleRange::new(0.0, 270.0, 90.0), AngleRange::new(0.0, 90.0, 90.0))
}

#[test]
fn test_map_is_complete_and_ordered() {
    let spec = SweepSpec::full_rotation(30.0);
    let map = evaluator().run(&room(false), &spec).unwrap();
    assert_eq!(map.len(), 12 * 12);
    assert_eq!(map.gantry_angles().len(), 12);
    assert_eq!(map.couch_angles().len(), 12);

    let configs = evaluator().configurations(&spec).unwrap();
    for (cell, expected) in map.iter().zip(&configs) {
        assert_eq!(cell.configuration(), expected);
        assert!(cell.is_evaluated());
    }
    let s = map.summary();
    assert_eq!(s.clear + s.colliding + s.unevaluated + s.cancelled, s.total);
}

#[test]
fn test_collision_row() {
    let map = evaluator().run(&room(false), &small_grid()).unwrap();
    let s = map.summary();
    assert_eq!(s.total, 8);
    assert_eq!(s.colliding, 2);
    assert_eq!(s.clear, 6);
    assert!((s.colliding_percent() - 25.0).abs() < 1e-12);
    assert_eq!(map.colliding_cells(), vec![(180.0, 0.0), (180.0, 90.0)]);
    assert_eq!(map.clear_cells().len(), 6);

    assert_eq!(map.cell_at_angles(180.0, 90.0).and_then(|c| c.collision()), Some(true));
    assert_eq!(map.get(1, 1).and_then(|c| c.collision()), Some(false));
    assert!(map.get(4, 0).is_none());
    assert!(map.cell_at_angles(45.0, 0.0).is_none());
}

#[test]
fn test_patient_pairs_are_evaluated() {
    let map = evaluator().run(&room(true), &small_grid()).unwrap();
    let v = map.get(0, 0).and_then(|c| c.verdict()).unwrap();
    assert_eq!(v.pairs.len(), 3);
    assert!(!v.collision);
    // The nozzle reaches the patient too once the gantry is below the couch.
    let v = map.cell_at_angles(180.0, 0.0).and_then(|c| c.verdict()).unwrap();
    assert_eq!(v.colliding_pairs().count(), 2);
}

#[test]
fn test_unsupported_orientation_marks_cells_unevaluated() {
    let mut spec = small_grid();
    spec.orientation = Some(PatientOrientation::HeadFirstDecubitusRight);
    let map = evaluator().run(&room(true), &spec).unwrap();
    assert_eq!(map.len(), 8);
    for cell in map.iter() {
        assert_eq!(cell.error_kind(), Some(ErrorKind::UnsupportedOrientation));
        assert_eq!(cell.collision(), None);
    }
    assert_eq!(map.summary().unevaluated, 8);
    assert_eq!(map.unevaluated_cells().len(), 8);

    // The machine pair is still tested; only the patient pairs fail.
    let Some(CellVerdict::Unevaluated { partial, .. }) = map.get(0, 0) else {
        panic!("Expected an unevaluated cell");
    };
    assert_eq!(partial.len(), 3);
    let valid: Vec<_> = partial.iter().filter(|r| r.valid).collect();
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].pair.as_ref().map(|p| p.second.component), Some(Component::Couch));
    assert!(partial.iter().filter(|r| !r.valid).all(|r| r.pair.as_ref().is_some_and(|p| {
        p.first.component == Component::Patient || p.second.component == Component::Patient
    })));

    // Single-configuration callers get the error itself.
    let c = spec.configuration(0.0, 0.0);
    let err = room(true)
        .evaluate(&KinematicFrame::default(), &CollisionDetector::default(), &c)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOrientation);
}

#[test]
fn test_cancelled_sweep_still_fills_the_map() {
    let token = CancelToken::new();
    token.cancel();
    let ev = evaluator();
    let map = ev.run_with_cancel(&room(false), &small_grid(), &token).unwrap();
    assert_eq!(map.len(), 8);
    assert!(map.iter().all(|c| matches!(c, CellVerdict::Cancelled { .. })));
    assert_eq!(map.summary().cancelled, 8);
    assert_eq!(ev.detector().pair_tests(), 0);
}

#[test]
fn test_far_apart_sweep_does_no_triangle_work() {
    let session = Session::new(
        Machine::new("head", vec![Part::new("nozzle", SurfaceModel::from_box([0.0, 0.0, 2000.0], [10.0; 3]).unwrap())]),
        Machine::new("couch", vec![Part::new("top", SurfaceModel::from_box([0.0, 0.0, -100.0], [10.0; 3]).unwrap())]),
        None,
    )
    .with_pairs(vec![(Component::Gantry, Component::Couch)]);
    let ev = evaluator();
    let map = ev.run(&session, &SweepSpec::full_rotation(45.0)).unwrap();
    assert_eq!(map.summary().clear, 64);
    assert_eq!(ev.detector().pair_tests(), 64);
    assert_eq!(ev.detector().prefilter_rejections(), 64);
    assert_eq!(ev.detector().triangle_tests(), 0);
}

#[test]
fn test_invalid_grid_is_rejected() {
    let spec = SweepSpec::new(AngleRange::new(0.0, 90.0, -10.0), AngleRange::single(0.0));
    assert!(evaluator().run(&room(false), &spec).is_err());
}

#[test]
fn test_oversized_grid_is_rejected() {
    let spec = SweepSpec::new(AngleRange::new(0.0, 360.0, 1e-300), AngleRange::single(0.0));
    assert!(matches!(
        evaluator().run(&room(false), &spec),
        Err(SweepSpecError::TooManyAngles { axis: "gantry", .. })
    ));

    let spec = SweepSpec { max_cells: 100, ..SweepSpec::full_rotation(10.0) };
    assert_eq!(
        evaluator().run(&room(false), &spec).unwrap_err(),
        SweepSpecError::TooManyCells { gantry: 36, couch: 36, limit: 100 }
    );
}

#[test]
fn test_geometry_failure_leaves_cell_unevaluated() {
    let bad = Configuration { couch_lateral: f64::NAN, ..Configuration::with_angles(90.0, 0.0) };
    let configs = [Configuration::with_angles(0.0, 0.0), bad, Configuration::with_angles(180.0, 0.0)];
    let ev = evaluator();
    let map = ev.run_configurations(&room(true), &configs, &CancelToken::new());

    assert_eq!(map.len(), 3);
    assert_eq!(map.cell(0).and_then(|c| c.collision()), Some(false));
    assert_eq!(map.cell(2).and_then(|c| c.collision()), Some(true));

    let cell = map.cell(1).unwrap();
    assert_eq!(cell.error_kind(), Some(ErrorKind::GeometryComputation));
    assert_eq!(cell.collision(), None);
    let CellVerdict::Unevaluated { configuration, partial, .. } = cell else {
        panic!("Expected an unevaluated cell");
    };
    assert!(configuration.couch_lateral.is_nan());
    // Couch and patient both follow the lateral offset, so every pair fails.
    assert_eq!(partial.len(), 3);
    assert!(partial.iter().all(|r| !r.valid && r.distance.is_nan()));

    let s = map.summary();
    assert_eq!((s.clear, s.colliding, s.unevaluated), (1, 1, 1));
}

#[test]
fn test_arc_run_keeps_travel_order() {
    let ev = evaluator();
    let arc = GantryArc::new(270.0, 90.0, RotationDirection::CounterClockwise).with_step(90.0);
    let configs = arc.configurations(&Configuration::identity());
    let map = ev.run_configurations(&room(false), &configs, &CancelToken::new());

    assert!(!map.is_grid());
    assert!(map.gantry_angles().is_empty());
    assert!(map.get(0, 0).is_none());
    let angles: Vec<f64> = map.iter().map(|c| c.configuration().gantry_angle).collect();
    assert_eq!(angles, vec![270.0, 180.0, 90.0]);
    assert_eq!(map.colliding_cells(), vec![(180.0, 0.0)]);
    assert_eq!(map.cell_at_angles(180.0, 0.0).and_then(|c| c.collision()), Some(true));
    assert!(map.cell_at_angles(0.0, 0.0).is_none());

    // Wrapping through zero stays clear of the couch.
    let arc = GantryArc::new(350.0, 10.0, RotationDirection::Clockwise).with_step(10.0);
    let map = ev.run_configurations(&room(false), &arc.configurations(&Configuration::identity()), &CancelToken::new());
    assert_eq!(map.clear_cells(), vec![(350.0, 0.0), (0.0, 0.0), (10.0, 0.0)]);
}

#[test]
fn test_cancelled_configuration_run() {
    let token = CancelToken::new();
    token.cancel();
    let ev = evaluator();
    let configs = [Configuration::identity(), Configuration::with_angles(180.0, 0.0)];
    let map = ev.run_configurations(&room(false), &configs, &token);
    assert_eq!(map.len(), 2);
    assert_eq!(map.summary().cancelled, 2);
    assert_eq!(ev.detector().pair_tests(), 0);
}

#[test]
fn test_fixed_values_reach_every_cell() {
    let mut spec = small_grid();
    spec.couch_offset = [10.0, -20.0, 30.0];
    spec.snout_extension = 5.0;
    let configs = evaluator().configurations(&spec).unwrap();
    assert!(configs.iter().all(|c| {
        *c == Configuration {
            couch_lateral: 10.0,
            couch_longitudinal: -20.0,
            couch_vertical: 30.0,
            snout_extension: 5.0,
            ..Configuration::with_angles(c.gantry_angle, c.couch_angle)
        }
    }));
}
