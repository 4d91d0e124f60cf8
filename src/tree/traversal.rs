use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{
    geometry::DVec3,
    query::Spatial,
    tree::Bvh,
};

/// Deferred-node capacity of the traversal stacks. The tree depth is
/// bounded by the discriminating prefix length, well under this.
const STACK_DEPTH: usize = 64;

/// Invokes `hit` with the original input index of every leaf whose box
/// satisfies the predicate and returns the number of hits.
///
/// Iterative descent with a local stack of deferred internal nodes; leaf
/// hits are emitted at visit, left subtree explored first.
pub(crate) fn spatial<P, F>(bvh: &Bvh, predicate: &P, mut hit: F) -> u32
where
    P: Spatial,
    F: FnMut(i32),
{
    let n = bvh.size();
    if n == 0 {
        return 0;
    }
    if n == 1 {
        if predicate.overlaps(&bvh.leaf_nodes[0].bounding_box) {
            hit(bvh.indices[0]);
            return 1;
        }
        return 0;
    }

    let leaf_offset = (n - 1) as i32;
    let mut count = 0;
    let mut stack = [0i32; STACK_DEPTH];
    let mut depth = 1;

    while depth > 0 {
        depth -= 1;
        let node = stack[depth] as usize;
        let (left, right) = bvh.internal_nodes[node].children;

        let mut deferred = [0i32; 2];
        let mut deferred_count = 0;

        for child in [left, right] {
            if child >= leaf_offset {
                let leaf = (child - leaf_offset) as usize;
                if predicate.overlaps(&bvh.leaf_nodes[leaf].bounding_box) {
                    hit(bvh.indices[leaf]);
                    count += 1;
                }
            } else if predicate.overlaps(&bvh.internal_nodes[child as usize].bounding_box) {
                deferred[deferred_count] = child;
                deferred_count += 1;
            }
        }

        // Push right below left so the left subtree pops first.
        for &child in deferred[..deferred_count].iter().rev() {
            debug_assert!(depth < STACK_DEPTH);
            stack[depth] = child;
            depth += 1;
        }
    }

    count
}

/// A candidate leaf of a nearest query, ordered by distance and then by
/// original index so the worst candidate is the heap maximum.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    distance: f64,
    index: i32,
}

impl PartialEq for Candidate {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.index.cmp(&other.index))
    }
}

/// Offers a candidate to the bounded heap, replacing the worst candidate
/// when full and beaten.
#[inline]
fn offer(heap: &mut BinaryHeap<Candidate>, k: usize, candidate: Candidate) {
    if heap.len() < k {
        heap.push(candidate);
    } else if let Some(mut worst) = heap.peek_mut() {
        if candidate < *worst {
            *worst = candidate;
        }
    }
}

/// Invokes `hit` with the original input index and distance of up to `k`
/// leaves closest to `point`, in ascending distance order with ties broken
/// by ascending original index. Returns the number of hits.
///
/// Keeps a bounded max-heap of the best candidates found so far; subtrees
/// are pruned once their box distance cannot beat the worst candidate, and
/// the closer child of a node is descended first.
pub(crate) fn nearest<F>(bvh: &Bvh, point: DVec3, k: usize, mut hit: F) -> u32
where
    F: FnMut(i32, f64),
{
    let n = bvh.size();
    if n == 0 || k == 0 {
        return 0;
    }

    let mut heap = BinaryHeap::with_capacity(k.min(n));

    if n == 1 {
        heap.push(Candidate {
            distance: bvh.leaf_nodes[0].bounding_box.distance(point),
            index: bvh.indices[0],
        });
    } else {
        let leaf_offset = (n - 1) as i32;
        let mut stack = [(0i32, 0.0f64); STACK_DEPTH];
        stack[0] = (0, bvh.internal_nodes[0].bounding_box.distance(point));
        let mut depth = 1;

        while depth > 0 {
            depth -= 1;
            let (node, distance) = stack[depth];

            // The stored distance is a lower bound for every leaf below.
            if heap.len() == k && heap.peek().is_some_and(|worst| distance >= worst.distance) {
                continue;
            }

            let (left, right) = bvh.internal_nodes[node as usize].children;

            let mut deferred = [(0i32, 0.0f64); 2];
            let mut deferred_count = 0;

            for child in [left, right] {
                if child >= leaf_offset {
                    let leaf = (child - leaf_offset) as usize;
                    offer(
                        &mut heap,
                        k,
                        Candidate {
                            distance: bvh.leaf_nodes[leaf].bounding_box.distance(point),
                            index: bvh.indices[leaf],
                        },
                    );
                } else {
                    let child_distance =
                        bvh.internal_nodes[child as usize].bounding_box.distance(point);
                    deferred[deferred_count] = (child, child_distance);
                    deferred_count += 1;
                }
            }

            // Push the farther child below the closer one; on equal
            // distances the left child stays on top.
            if deferred_count == 2 && deferred[0].1 > deferred[1].1 {
                deferred.swap(0, 1);
            }
            for &entry in deferred[..deferred_count].iter().rev() {
                debug_assert!(depth < STACK_DEPTH);
                stack[depth] = entry;
                depth += 1;
            }
        }
    }

    let candidates = heap.into_sorted_vec();
    for candidate in &candidates {
        hit(candidate.index, candidate.distance);
    }
    candidates.len() as u32
}
