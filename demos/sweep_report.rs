use radcollide::{
    CancelToken, CellVerdict, CollisionDetector, Configuration, DetectorConfig, GantryArc, KinematicFrame, Machine,
    Part, PatientOrientation, RotationDirection, Session, SurfaceModel, SweepEvaluator, SweepSpec,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Boxy stand-ins for a proton nozzle with a snout, a couch and a patient.
    let head = Machine::new(
        "nozzle",
        vec![
            Part::new("housing", SurfaceModel::from_box([0.0, 0.0, 600.0], [400.0, 400.0, 300.0])?),
            Part::new("snout", SurfaceModel::from_box([0.0, 0.0, 380.0], [200.0, 200.0, 140.0])?).retractable(),
        ],
    );
    let couch = Machine::new(
        "couch",
        vec![Part::new("top", SurfaceModel::from_box([0.0, 300.0, -150.0], [520.0, 2000.0, 50.0])?)],
    );
    let patient = SurfaceModel::from_box([0.0, 300.0, -50.0], [360.0, 1700.0, 150.0])?;
    let session = Session::new(head, couch, Some(patient));

    let mut spec = SweepSpec::full_rotation(10.0);
    spec.snout_extension = 60.0;
    spec.orientation = Some(PatientOrientation::HeadFirstSupine);

    let detector = CollisionDetector::new(DetectorConfig {
        clearance_threshold: 20.0,
        ..Default::default()
    });
    let evaluator = SweepEvaluator::new(KinematicFrame::default(), detector);
    let map = evaluator.run(&session, &spec)?;

    println!("rows: gantry angle, columns: couch angle");
    println!("  . clear   ~ near miss   X collision   ? unevaluated\n");
    print!("      ");
    for c in map.couch_angles() {
        print!("{}", if *c as i64 % 90 == 0 { '|' } else { ' ' });
    }
    println!();
    for (gi, g) in map.gantry_angles().iter().enumerate() {
        print!("{:>5} ", g);
        for ci in 0..map.couch_angles().len() {
            let mark = match map.get(gi, ci) {
                Some(CellVerdict::Evaluated(v)) if v.collision => 'X',
                Some(CellVerdict::Evaluated(v)) if v.near_miss => '~',
                Some(CellVerdict::Evaluated(_)) => '.',
                _ => '?',
            };
            print!("{}", mark);
        }
        println!();
    }

    let s = map.summary();
    println!();
    println!("cells:       {}", s.total);
    println!("clear:       {} ({:.1}%)", s.clear, s.clear_percent());
    println!("colliding:   {} ({:.1}%)", s.colliding, s.colliding_percent());
    println!("near miss:   {}", s.near_miss);
    println!("unevaluated: {} ({:.1}%)", s.unevaluated, s.unevaluated_percent());
    println!("pair tests:  {}", evaluator.detector().pair_tests());
    println!("triangle tests: {}", evaluator.detector().triangle_tests());

    // A counter-clockwise arc through gantry zero at couch 90, every degree.
    let arc = GantryArc::new(30.0, 330.0, RotationDirection::CounterClockwise);
    let base = Configuration {
        couch_angle: 90.0,
        snout_extension: spec.snout_extension,
        orientation: spec.orientation,
        ..Default::default()
    };
    let arc_map = evaluator.run_configurations(&session, &arc.configurations(&base), &CancelToken::new());
    println!();
    println!("arc 30 -> 330 ccw: {} samples", arc_map.len());
    for (gantry, _) in arc_map.colliding_cells() {
        println!("  collision at gantry {}", gantry);
    }
    Ok(())
}
