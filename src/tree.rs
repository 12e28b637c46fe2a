use crate::bounds::BoundingBox;

#[derive(Clone, Copy, Debug)]
struct TreeNode {
    bounds: BoundingBox,
    left: u32, // u32::MAX if leaf
    right: u32,
    // Leaf data: order[start..end]
    start: u32,
    end: u32,
}

impl TreeNode {
    fn is_leaf(&self) -> bool {
        self.left == u32::MAX
    }
}

/// Bounding-volume tree over the triangles of one positioned surface.
///
/// Built bottom-up by median splits of triangle centroids along the longest
/// axis of each node. Node boxes enclose the full triangles, so pruning on
/// them never discards a candidate pair.
pub struct TriangleTree {
    nodes: Vec<TreeNode>,
    order: Vec<usize>,
    tri_bounds: Vec<BoundingBox>,
    leaf_size: usize,
}

impl TriangleTree {
    /// Builds a tree over `tri_bounds`, skipping the triangles for which
    /// `skip` returns true.
    pub fn build(tri_bounds: Vec<BoundingBox>, leaf_size: usize, skip: impl Fn(usize) -> bool) -> Self {
        let order: Vec<usize> = (0..tri_bounds.len()).filter(|&i| !skip(i)).collect();
        let count = order.len();
        let mut tree = TriangleTree {
            nodes: Vec::with_capacity(count.max(1) * 2 / leaf_size.max(1) + 1),
            order,
            tri_bounds,
            leaf_size: leaf_size.max(1),
        };
        if count > 0 {
            let centroids: Vec<[f64; 3]> = tree.tri_bounds.iter().map(|b| b.center()).collect();
            tree.build_recursive(0, count, &centroids);
        }
        tree
    }

    fn build_recursive(&mut self, start: usize, end: usize, centroids: &[[f64; 3]]) -> u32 {
        let count = end - start;

        let mut bounds = BoundingBox::empty();
        for &tri in &self.order[start..end] {
            bounds = bounds.union(&self.tri_bounds[tri]);
        }

        if count <= self.leaf_size {
            let node_idx = self.nodes.len() as u32;
            self.nodes.push(TreeNode {
                bounds,
                left: u32::MAX,
                right: u32::MAX,
                start: start as u32,
                end: end as u32,
            });
            return node_idx;
        }

        let mut spread = BoundingBox::empty();
        for &tri in &self.order[start..end] {
            spread.expand_to(&centroids[tri]);
        }
        let axis = spread.longest_axis();

        let mid = start + count / 2;
        self.order[start..end].select_nth_unstable_by(count / 2, |&a, &b| {
            centroids[a][axis].total_cmp(&centroids[b][axis])
        });

        let left = self.build_recursive(start, mid, centroids);
        let right = self.build_recursive(mid, end, centroids);

        let node_idx = self.nodes.len() as u32;
        self.nodes.push(TreeNode {
            bounds,
            left,
            right,
            start: 0,
            end: 0,
        });
        node_idx
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of triangles indexed by the tree.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    fn root(&self) -> u32 {
        // Root is the last node pushed by the recursive build
        (self.nodes.len() - 1) as u32
    }

    /// Visits every pair of triangles `(i, j)`, `i` from `self` and `j` from
    /// `other`, whose boxes overlap within `tolerance`. The visitor returns
    /// `true` to stop the traversal; the return value reports whether it did.
    pub fn visit_overlapping<F>(&self, other: &TriangleTree, tolerance: f64, mut visitor: F) -> bool
    where
        F: FnMut(usize, usize) -> bool,
    {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.overlap_recursive(self.root(), other, other.root(), tolerance, &mut visitor)
    }

    fn overlap_recursive<F>(&self, a: u32, other: &TriangleTree, b: u32, tolerance: f64, visitor: &mut F) -> bool
    where
        F: FnMut(usize, usize) -> bool,
    {
        let na = &self.nodes[a as usize];
        let nb = &other.nodes[b as usize];
        if !na.bounds.overlaps(&nb.bounds, tolerance) {
            return false;
        }

        match (na.is_leaf(), nb.is_leaf()) {
            (true, true) => {
                for &i in &self.order[na.start as usize..na.end as usize] {
                    let bi = &self.tri_bounds[i];
                    if !bi.overlaps(&nb.bounds, tolerance) {
                        continue;
                    }
                    for &j in &other.order[nb.start as usize..nb.end as usize] {
                        if bi.overlaps(&other.tri_bounds[j], tolerance) && visitor(i, j) {
                            return true;
                        }
                    }
                }
                false
            }
            // Descend into the larger internal node first
            (false, true) => {
                self.overlap_recursive(na.left, other, b, tolerance, visitor)
                    || self.overlap_recursive(na.right, other, b, tolerance, visitor)
            }
            (true, false) => {
                self.overlap_recursive(a, other, nb.left, tolerance, visitor)
                    || self.overlap_recursive(a, other, nb.right, tolerance, visitor)
            }
            (false, false) => {
                if extent(&na.bounds) >= extent(&nb.bounds) {
                    self.overlap_recursive(na.left, other, b, tolerance, visitor)
                        || self.overlap_recursive(na.right, other, b, tolerance, visitor)
                } else {
                    self.overlap_recursive(a, other, nb.left, tolerance, visitor)
                        || self.overlap_recursive(a, other, nb.right, tolerance, visitor)
                }
            }
        }
    }

    /// Branch-and-bound search for the closest triangle pair.
    ///
    /// `distance_sq(i, j)` returns the exact squared distance of a candidate
    /// pair; node pairs whose boxes are already farther than the best pair
    /// found so far are skipped. Returns the smallest squared distance, or
    /// `f64::INFINITY` when either tree is empty.
    pub fn nearest_pair<F>(&self, other: &TriangleTree, mut distance_sq: F) -> f64
    where
        F: FnMut(usize, usize) -> f64,
    {
        let mut best = f64::INFINITY;
        if !self.is_empty() && !other.is_empty() {
            self.nearest_recursive(self.root(), other, other.root(), &mut best, &mut distance_sq);
        }
        best
    }

    fn nearest_recursive<F>(&self, a: u32, other: &TriangleTree, b: u32, best: &mut f64, distance_sq: &mut F)
    where
        F: FnMut(usize, usize) -> f64,
    {
        let na = &self.nodes[a as usize];
        let nb = &other.nodes[b as usize];
        if na.bounds.distance_sq(&nb.bounds) >= *best {
            return;
        }

        if na.is_leaf() && nb.is_leaf() {
            for &i in &self.order[na.start as usize..na.end as usize] {
                let bi = &self.tri_bounds[i];
                for &j in &other.order[nb.start as usize..nb.end as usize] {
                    if bi.distance_sq(&other.tri_bounds[j]) >= *best {
                        continue;
                    }
                    let d2 = distance_sq(i, j);
                    if d2 < *best {
                        *best = d2;
                    }
                }
            }
            return;
        }

        let split_self = !na.is_leaf() && (nb.is_leaf() || extent(&na.bounds) >= extent(&nb.bounds));
        let (first, second) = if split_self {
            let l = &self.nodes[na.left as usize].bounds;
            let r = &self.nodes[na.right as usize].bounds;
            let ((c1, _), (c2, _)) = nearer_first((na.left, l), (na.right, r), &nb.bounds);
            ((c1, b), (c2, b))
        } else {
            let l = &other.nodes[nb.left as usize].bounds;
            let r = &other.nodes[nb.right as usize].bounds;
            let ((c1, _), (c2, _)) = nearer_first((nb.left, l), (nb.right, r), &na.bounds);
            ((a, c1), (a, c2))
        };

        // Visit nearest child first
        self.nearest_recursive(first.0, other, first.1, best, distance_sq);
        self.nearest_recursive(second.0, other, second.1, best, distance_sq);
    }
}

// Sum of box edge lengths. Stays meaningful for the flat boxes of planar patches.
fn extent(b: &BoundingBox) -> f64 {
    let s = b.size();
    s[0] + s[1] + s[2]
}

fn nearer_first<'a>(
    l: (u32, &'a BoundingBox),
    r: (u32, &'a BoundingBox),
    target: &BoundingBox,
) -> ((u32, &'a BoundingBox), (u32, &'a BoundingBox)) {
    if l.1.distance_sq(target) <= r.1.distance_sq(target) { (l, r) } else { (r, l) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_boxes(offsets: &[f64]) -> Vec<BoundingBox> {
        offsets
            .iter()
            .map(|&x| BoundingBox::new([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0]))
            .collect()
    }

    #[test]
    fn test_overlapping_pairs_match_brute_force() {
        let a = unit_boxes(&[0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
        let b = unit_boxes(&[0.5, 7.5, 20.0]);
        let ta = TriangleTree::build(a.clone(), 2, |_| false);
        let tb = TriangleTree::build(b.clone(), 1, |_| false);

        let mut found = Vec::new();
        let stopped = ta.visit_overlapping(&tb, 0.0, |i, j| {
            found.push((i, j));
            false
        });
        assert!(!stopped);
        found.sort();

        let mut expected = Vec::new();
        for (i, bi) in a.iter().enumerate() {
            for (j, bj) in b.iter().enumerate() {
                if bi.overlaps(bj, 0.0) {
                    expected.push((i, j));
                }
            }
        }
        assert_eq!(found, expected);
    }

    #[test]
    fn test_early_stop() {
        let a = unit_boxes(&[0.0, 0.1, 0.2, 0.3]);
        let ta = TriangleTree::build(a.clone(), 1, |_| false);
        let tb = TriangleTree::build(a, 1, |_| false);
        let mut visits = 0;
        assert!(ta.visit_overlapping(&tb, 0.0, |_, _| {
            visits += 1;
            true
        }));
        assert_eq!(visits, 1);
    }

    #[test]
    fn test_nearest_pair_and_skip() {
        let a = unit_boxes(&[0.0, 3.0, 6.0]);
        let b = unit_boxes(&[10.0, 15.0]);
        // Skipping the closest box on the left must move the answer.
        let ta = TriangleTree::build(a.clone(), 1, |i| i == 2);
        let tb = TriangleTree::build(b.clone(), 1, |_| false);
        assert_eq!(ta.len(), 2);

        let d2 = ta.nearest_pair(&tb, |i, j| a[i].distance_sq(&b[j]));
        assert!((d2 - 36.0).abs() < 1e-12);

        let empty = TriangleTree::build(Vec::new(), 4, |_| false);
        assert!(empty.is_empty());
        assert_eq!(empty.nearest_pair(&tb, |_, _| 0.0), f64::INFINITY);
    }
}
