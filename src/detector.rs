//! Pairwise collision testing of positioned surfaces.
//!
//! A test runs in three stages. Whole-surface bounding boxes are compared
//! first; separated boxes end the test with the box gap as a lower bound on
//! the clearance and no triangle is ever looked at. Otherwise both surfaces are indexed by a [`TriangleTree`]
//! and only triangle pairs with overlapping boxes reach the exact
//! separating-axis test, stopping at the first intersection. Surfaces that
//! do not intersect are then checked for containment, and finally the exact
//! clearance is found by a branch-and-bound nearest-pair search.

use crate::bounds::BoundingBox;
use crate::error::GeometryComputationError;
use crate::kinematics::{Component, Configuration};
use crate::transform::TransformedSurface;
use crate::tree::TriangleTree;
use crate::triangle::{self, Tri};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use tracing::debug;

/// Tunables of the collision test. Lengths in millimetres.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Pairs closer than this without touching are flagged as near misses.
    /// Pairs settled by the pre-filter are judged on their box gap. Zero
    /// disables near-miss reporting.
    pub clearance_threshold: f64,
    /// Surfaces closer than this count as touching.
    pub contact_tolerance: f64,
    /// Positioned triangles with a smaller area (mm²) are skipped.
    pub degenerate_area_epsilon: f64,
    /// Compute the exact clearance of non-colliding pairs whose boxes
    /// overlap. When false their distance is reported as infinite.
    pub compute_distance: bool,
    /// Triangles per leaf of the acceleration tree.
    pub leaf_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            clearance_threshold: 0.0,
            contact_tolerance: 0.0,
            degenerate_area_epsilon: 1e-10,
            compute_distance: true,
            leaf_size: 8,
        }
    }
}

/// Whether a result can be fully trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    Full,
    /// At least one surface is open, non-manifold or has degenerate
    /// triangles.
    Reduced,
}

/// One part of one component.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartRef {
    pub component: Component,
    pub name: String,
}

impl PartRef {
    pub fn new(component: Component, name: impl Into<String>) -> Self {
        Self { component, name: name.into() }
    }
}

impl fmt::Display for PartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component, self.name)
    }
}

/// Identifies the two parts of a pair test.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairId {
    pub first: PartRef,
    pub second: PartRef,
}

impl PairId {
    pub fn new(first: PartRef, second: PartRef) -> Self {
        Self { first, second }
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}", self.first, self.second)
    }
}

/// Outcome of one pair test.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollisionResult {
    pub configuration: Option<Configuration>,
    pub pair: Option<PairId>,
    pub collision: bool,
    /// Minimum separation. Zero on collision, infinite when not computed.
    pub distance: f64,
    /// `distance` is the bounding-box gap, not the exact clearance.
    pub distance_is_lower_bound: bool,
    /// False when the test failed and carries no verdict.
    pub valid: bool,
    pub confidence: Confidence,
    /// `distance` is below the clearance threshold. Judged on the box gap
    /// when `distance_is_lower_bound` is set, so such a pair may in fact be
    /// farther apart.
    pub near_miss: bool,
    /// Exact triangle/triangle tests performed, overlap and distance.
    pub triangle_tests: usize,
}

impl CollisionResult {
    /// Marker for a pair whose test could not be carried out.
    pub fn failed(pair: Option<PairId>, configuration: Option<Configuration>) -> Self {
        Self {
            configuration,
            pair,
            collision: false,
            distance: f64::NAN,
            distance_is_lower_bound: false,
            valid: false,
            confidence: Confidence::Reduced,
            near_miss: false,
            triangle_tests: 0,
        }
    }
}

/// Tests pairs of positioned surfaces.
///
/// Holds only configuration and relaxed atomic counters, so one detector
/// is shared by reference between sweep workers.
#[derive(Debug, Default)]
pub struct CollisionDetector {
    config: DetectorConfig,
    pair_tests: AtomicUsize,
    prefilter_rejections: AtomicUsize,
    triangle_tests: AtomicUsize,
}

impl CollisionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Pair tests started since the last reset.
    pub fn pair_tests(&self) -> usize {
        self.pair_tests.load(AtomicOrdering::Relaxed)
    }

    /// Pair tests settled by the bounding-box pre-filter.
    pub fn prefilter_rejections(&self) -> usize {
        self.prefilter_rejections.load(AtomicOrdering::Relaxed)
    }

    /// Exact triangle/triangle tests since the last reset, overlap and
    /// distance alike.
    pub fn triangle_tests(&self) -> usize {
        self.triangle_tests.load(AtomicOrdering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.pair_tests.store(0, AtomicOrdering::Relaxed);
        self.prefilter_rejections.store(0, AtomicOrdering::Relaxed);
        self.triangle_tests.store(0, AtomicOrdering::Relaxed);
    }

    /// Tests `a` against `b`. The result does not depend on argument order.
    pub fn test(
        &self,
        a: &TransformedSurface<'_>,
        b: &TransformedSurface<'_>,
    ) -> Result<CollisionResult, GeometryComputationError> {
        let (a, b) = if canonical_order(a, b) == Ordering::Greater { (b, a) } else { (a, b) };
        self.pair_tests.fetch_add(1, AtomicOrdering::Relaxed);

        let cfg = &self.config;
        let confidence = if a.has_warnings() || b.has_warnings() {
            Confidence::Reduced
        } else {
            Confidence::Full
        };
        let mut result = CollisionResult {
            configuration: None,
            pair: None,
            collision: false,
            distance: f64::INFINITY,
            distance_is_lower_bound: false,
            valid: true,
            confidence,
            near_miss: false,
            triangle_tests: 0,
        };

        let gap = a.bounds().distance(b.bounds());
        if !gap.is_finite() {
            return Err(GeometryComputationError::NonFiniteDistance);
        }
        if !a.bounds().overlaps(b.bounds(), cfg.contact_tolerance) {
            self.prefilter_rejections.fetch_add(1, AtomicOrdering::Relaxed);
            debug!(gap, "bounding boxes separated");
            result.distance = gap;
            result.distance_is_lower_bound = true;
            result.near_miss = gap < cfg.clearance_threshold;
            return Ok(result);
        }

        let (ta, tb) = (self.index(a), self.index(b));
        if ta.is_empty() || tb.is_empty() {
            // Nothing testable remains once degenerate triangles are skipped.
            result.confidence = Confidence::Reduced;
            result.distance = gap;
            result.distance_is_lower_bound = true;
            return Ok(result);
        }

        let mut tests = 0usize;
        let tol = cfg.contact_tolerance;
        let hit = ta.visit_overlapping(&tb, tol, |i, j| {
            tests += 1;
            triangle::overlap(&a.corners(i), &b.corners(j), tol)
        });
        self.triangle_tests.fetch_add(tests, AtomicOrdering::Relaxed);
        result.triangle_tests = tests;

        let collision = hit || self.contains(b, &ta, a) || self.contains(a, &tb, b);
        debug!(collision, triangle_tests = tests, "triangle stage finished");
        if collision {
            result.collision = true;
            result.distance = 0.0;
            return Ok(result);
        }

        if cfg.compute_distance {
            let (distance, calls) = self.clearance(a, &ta, b, &tb)?;
            result.triangle_tests += calls;
            result.distance = distance;
            result.near_miss = distance < cfg.clearance_threshold;
        }
        Ok(result)
    }

    /// [`test`](Self::test), tagged with the pair and configuration.
    pub fn test_pair(
        &self,
        pair: PairId,
        configuration: Configuration,
        a: &TransformedSurface<'_>,
        b: &TransformedSurface<'_>,
    ) -> Result<CollisionResult, GeometryComputationError> {
        let mut result = self.test(a, b)?;
        debug!(pair = %pair, collision = result.collision, distance = result.distance, "pair tested");
        result.pair = Some(pair);
        result.configuration = Some(configuration);
        Ok(result)
    }

    fn index(&self, s: &TransformedSurface<'_>) -> TriangleTree {
        let eps = self.config.degenerate_area_epsilon;
        let tri_bounds = (0..s.triangle_count())
            .map(|i| BoundingBox::from_points(s.corners(i).iter()))
            .collect();
        TriangleTree::build(tri_bounds, self.config.leaf_size, |i| {
            s.is_degenerate(i) || triangle::area(&s.corners(i)) < eps
        })
    }

    fn clearance(
        &self,
        a: &TransformedSurface<'_>,
        ta: &TriangleTree,
        b: &TransformedSurface<'_>,
        tb: &TriangleTree,
    ) -> Result<(f64, usize), GeometryComputationError> {
        let mut calls = 0usize;
        let d2 = ta.nearest_pair(tb, |i, j| {
            calls += 1;
            triangle::distance_sq(&a.corners(i), &b.corners(j))
        });
        self.triangle_tests.fetch_add(calls, AtomicOrdering::Relaxed);
        if d2.is_finite() {
            Ok((d2.sqrt(), calls))
        } else {
            Err(GeometryComputationError::NonFiniteDistance)
        }
    }

    /// True if some shell of `inner` lies inside the closed surface `outer`.
    /// A shell that does not cross `outer` is wholly inside or outside it,
    /// so one vertex per shell decides.
    fn contains(
        &self,
        outer: &TransformedSurface<'_>,
        inner_tree: &TriangleTree,
        inner: &TransformedSurface<'_>,
    ) -> bool {
        if !outer.source().is_closed() || inner_tree.is_empty() {
            return false;
        }
        inner.source().shell_seeds().iter().any(|&t| {
            let origin = inner.corners(t)[0];
            outer.bounds().contains(&origin) && point_inside(&origin, outer)
        })
    }
}

// Off-axis direction so parity rays rarely graze edges of axis-aligned meshes.
const RAY_DIR: [f64; 3] = [0.431_934_5, 0.570_171_2, 0.698_827_1];

fn point_inside(p: &[f64; 3], surface: &TransformedSurface<'_>) -> bool {
    let crossings = (0..surface.triangle_count())
        .filter(|&i| !surface.is_degenerate(i))
        .filter(|&i| {
            let t: Tri = surface.corners(i);
            triangle::ray_hit(p, &RAY_DIR, &t).is_some()
        })
        .count();
    crossings % 2 == 1
}

fn canonical_order(a: &TransformedSurface<'_>, b: &TransformedSurface<'_>) -> Ordering {
    let key = |s: &TransformedSurface<'_>| {
        let bb = s.bounds();
        let c = s.centroid();
        [
            bb.min[0], bb.min[1], bb.min[2], bb.max[0], bb.max[1], bb.max[2], c[0], c[1], c[2],
        ]
    };
    a.triangle_count()
        .cmp(&b.triangle_count())
        .then(a.vertices().len().cmp(&b.vertices().len()))
        .then_with(|| {
            key(a)
                .iter()
                .zip(key(b).iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
}
