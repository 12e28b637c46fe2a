use radcollide::{Machine, Part, Session, SurfaceModel};
use std::f64::consts::{PI, TAU};

/// Closed UV sphere with `rings` latitude bands and `segments` longitude steps.
pub fn sphere(center: [f64; 3], radius: f64, rings: usize, segments: usize) -> SurfaceModel {
    let mut vertices = vec![[center[0], center[1], center[2] + radius]];
    for r in 1..rings {
        let theta = PI * r as f64 / rings as f64;
        for s in 0..segments {
            let phi = TAU * s as f64 / segments as f64;
            vertices.push([
                center[0] + radius * theta.sin() * phi.cos(),
                center[1] + radius * theta.sin() * phi.sin(),
                center[2] + radius * theta.cos(),
            ]);
        }
    }
    vertices.push([center[0], center[1], center[2] - radius]);

    let south = (vertices.len() - 1) as u32;
    let ring = |r: usize, s: usize| (1 + (r - 1) * segments + s % segments) as u32;
    let mut triangles = Vec::new();
    for s in 0..segments {
        triangles.push([0, ring(1, s), ring(1, s + 1)]);
    }
    for r in 1..rings - 1 {
        for s in 0..segments {
            let (a, b, c, d) = (ring(r, s), ring(r, s + 1), ring(r + 1, s), ring(r + 1, s + 1));
            triangles.push([a, c, b]);
            triangles.push([b, c, d]);
        }
    }
    for s in 0..segments {
        triangles.push([south, ring(rings - 1, s + 1), ring(rings - 1, s)]);
    }
    SurfaceModel::new(vertices, triangles).expect("sphere is a valid surface")
}

/// Round nozzle, couch top and patient, a few thousand triangles in total.
pub fn room(detail: usize) -> Session {
    let head = Machine::new("head", vec![Part::new("nozzle", sphere([0.0, 0.0, 350.0], 150.0, detail, 2 * detail))]);
    let top = SurfaceModel::from_box([0.0, 0.0, -150.0], [500.0, 2000.0, 50.0]).expect("couch top is a valid box");
    let couch = Machine::new("couch", vec![Part::new("top", top)]);
    let patient = sphere([0.0, 0.0, -20.0], 100.0, detail, 2 * detail);
    Session::new(head, couch, Some(patient))
}
