use criterion::{criterion_group, criterion_main, Criterion};
use radcollide::{CollisionDetector, KinematicFrame, SweepEvaluator, SweepSpec};

mod common;

fn benchmark_sweep(c: &mut Criterion) {
    let session = common::room(16);
    let evaluator = SweepEvaluator::new(KinematicFrame::default(), CollisionDetector::default());

    let mut group = c.benchmark_group("sweep");
    group.sample_size(10);
    for step in [30.0, 10.0] {
        let spec = SweepSpec::full_rotation(step);
        group.bench_function(format!("full_rotation_{}_cells", spec.len()), |b| {
            b.iter(|| evaluator.run(&session, &spec).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_sweep);
criterion_main!(benches);
