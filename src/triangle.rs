//! Triangle-level primitives: overlap, distance and ray crossing.
//!
//! All routines work on plain `[f64; 3]` corners. The overlap test is a
//! separating-axis test over the two face normals, the nine edge-edge
//! cross products and the six in-plane edge normals, so coplanar pairs
//! are handled by the same code path as the general case.

pub type Tri = [[f64; 3]; 3];

#[inline]
pub(crate) fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub(crate) fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub(crate) fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[inline]
fn add_scaled(a: &[f64; 3], d: &[f64; 3], t: f64) -> [f64; 3] {
    [a[0] + d[0] * t, a[1] + d[1] * t, a[2] + d[2] * t]
}

#[inline]
fn dist_sq(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let d = sub(a, b);
    dot(&d, &d)
}

/// Area of the triangle.
pub fn area(t: &Tri) -> f64 {
    let n = cross(&sub(&t[1], &t[0]), &sub(&t[2], &t[0]));
    0.5 * dot(&n, &n).sqrt()
}

fn project(axis: &[f64; 3], t: &Tri) -> (f64, f64) {
    let p0 = dot(axis, &t[0]);
    let p1 = dot(axis, &t[1]);
    let p2 = dot(axis, &t[2]);
    (p0.min(p1).min(p2), p0.max(p1).max(p2))
}

/// Separating-axis overlap test. Touching triangles overlap.
///
/// `tolerance` widens every projected interval, so triangles closer than
/// roughly `tolerance` are also reported as overlapping.
pub fn overlap(a: &Tri, b: &Tri, tolerance: f64) -> bool {
    let ea = [sub(&a[1], &a[0]), sub(&a[2], &a[1]), sub(&a[0], &a[2])];
    let eb = [sub(&b[1], &b[0]), sub(&b[2], &b[1]), sub(&b[0], &b[2])];
    let na = cross(&ea[0], &ea[1]);
    let nb = cross(&eb[0], &eb[1]);

    // Scale-aware threshold for rejecting near-zero axes.
    let scale = ea.iter().chain(eb.iter()).map(|e| dot(e, e)).fold(0.0, f64::max);
    let eps = 1e-12 * scale * scale;

    let mut axes: [[f64; 3]; 17] = [[0.0; 3]; 17];
    axes[0] = na;
    axes[1] = nb;
    let mut k = 2;
    for e in &ea {
        for f in &eb {
            axes[k] = cross(e, f);
            k += 1;
        }
    }
    for e in &ea {
        axes[k] = cross(&na, e);
        k += 1;
    }
    for f in &eb {
        axes[k] = cross(&nb, f);
        k += 1;
    }

    for axis in &axes {
        let len_sq = dot(axis, axis);
        if len_sq <= eps {
            continue;
        }
        let (min_a, max_a) = project(axis, a);
        let (min_b, max_b) = project(axis, b);
        let slack = tolerance * len_sq.sqrt();
        if max_a + slack < min_b || max_b + slack < min_a {
            return false;
        }
    }
    true
}

/// Closest point on triangle `t` to point `p`.
pub fn closest_point(p: &[f64; 3], t: &Tri) -> [f64; 3] {
    let [a, b, c] = t;
    let ab = sub(b, a);
    let ac = sub(c, a);
    let ap = sub(p, a);
    let d1 = dot(&ab, &ap);
    let d2 = dot(&ac, &ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = sub(p, b);
    let d3 = dot(&ab, &bp);
    let d4 = dot(&ac, &bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return add_scaled(a, &ab, v);
    }

    let cp = sub(p, c);
    let d5 = dot(&ab, &cp);
    let d6 = dot(&ac, &cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return add_scaled(a, &ac, w);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return add_scaled(b, &sub(c, b), w);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    [
        a[0] + ab[0] * v + ac[0] * w,
        a[1] + ab[1] * v + ac[1] * w,
        a[2] + ab[2] * v + ac[2] * w,
    ]
}

/// Squared distance between segments `p1-q1` and `p2-q2`.
pub fn segment_distance_sq(p1: &[f64; 3], q1: &[f64; 3], p2: &[f64; 3], q2: &[f64; 3]) -> f64 {
    let d1 = sub(q1, p1);
    let d2 = sub(q2, p2);
    let r = sub(p1, p2);
    let a = dot(&d1, &d1);
    let e = dot(&d2, &d2);
    let f = dot(&d2, &r);
    let eps = 1e-18;

    let (s, t) = if a <= eps && e <= eps {
        (0.0, 0.0)
    } else if a <= eps {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = dot(&d1, &r);
        if e <= eps {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = dot(&d1, &d2);
            let denom = a * e - b * b;
            let mut s = if denom > eps { ((b * f - c * e) / denom).clamp(0.0, 1.0) } else { 0.0 };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };

    dist_sq(&add_scaled(p1, &d1, s), &add_scaled(p2, &d2, t))
}

/// Squared distance between two triangles, zero when they overlap.
pub fn distance_sq(a: &Tri, b: &Tri) -> f64 {
    if overlap(a, b, 0.0) {
        return 0.0;
    }
    let mut best = f64::INFINITY;
    for p in a {
        best = best.min(dist_sq(p, &closest_point(p, b)));
    }
    for p in b {
        best = best.min(dist_sq(p, &closest_point(p, a)));
    }
    for i in 0..3 {
        let (p1, q1) = (&a[i], &a[(i + 1) % 3]);
        for j in 0..3 {
            let (p2, q2) = (&b[j], &b[(j + 1) % 3]);
            best = best.min(segment_distance_sq(p1, q1, p2, q2));
        }
    }
    best
}

/// Ray/triangle crossing (Möller–Trumbore). Returns the ray parameter of a
/// strictly forward hit.
pub fn ray_hit(origin: &[f64; 3], dir: &[f64; 3], t: &Tri) -> Option<f64> {
    let e1 = sub(&t[1], &t[0]);
    let e2 = sub(&t[2], &t[0]);
    let h = cross(dir, &e2);
    let det = dot(&e1, &h);
    if det.abs() < 1e-14 {
        return None;
    }
    let inv = 1.0 / det;
    let s = sub(origin, &t[0]);
    let u = inv * dot(&s, &h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = cross(&s, &e1);
    let v = inv * dot(dir, &q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let dist = inv * dot(&e2, &q);
    (dist > 1e-12).then_some(dist)
}
